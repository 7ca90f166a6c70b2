use std::borrow::Cow;
use std::ffi::OsStr;
use std::process::{Child, ExitStatus};

use crate::buffer::WriteBuffer;
use crate::command::Command;
use crate::log::{log_begin, log_end, Level};
use crate::log_error;

pub const EXEC_FAILED_STATUS: i32 = 127;

/// Handle to a spawned child. An invalid handle stands for a spawn that
/// failed; waiting on it fails without blocking.
#[must_use = "a spawned process must be waited on"]
#[derive(Debug)]
pub struct Proc {
    child: Option<Child>,
}

impl Proc {
    pub fn invalid() -> Self {
        Proc { child: None }
    }

    pub fn is_valid(&self) -> bool {
        self.child.is_some()
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Blocks until the child terminates. Only a normal exit with code 0 is
    /// success.
    pub fn wait(self, log: &mut WriteBuffer<'_>) -> bool {
        let Some(mut child) = self.child else {
            return false;
        };
        match child.wait() {
            Ok(status) => report_status(status, log),
            Err(err) => {
                log_error!(log, "Could not wait on child process (pid {}): {err}", child.id());
                false
            }
        }
    }
}

fn report_status(status: ExitStatus, log: &mut WriteBuffer<'_>) -> bool {
    if let Some(code) = status.code() {
        if code != 0 {
            log_error!(log, "Child process exited with exit code {code}");
            return false;
        }
        return true;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(sig) = status.signal() {
            log_error!(log, "Child process was terminated by {}", signal_name(sig));
            return false;
        }
    }

    log_error!(log, "Child process terminated abnormally: {status}");
    false
}

/// Echoes the command line, then starts it with the inherited environment and
/// standard streams.
pub fn spawn_async(cmd: &Command<'_>, log: &mut WriteBuffer<'_>) -> Proc {
    log_begin(log, Level::Info, "CMD: ");
    cmd.render(log);
    log_end(log, "");

    let Some(program) = cmd.program() else {
        log_error!(log, "Could not spawn child process: empty command");
        return Proc::invalid();
    };

    let mut child = std::process::Command::new::<&OsStr>(os_arg(program).as_ref());
    for arg in &cmd.argv()[1..] {
        child.arg::<&OsStr>(os_arg(arg).as_ref());
    }
    let spawned = child.spawn();

    match spawned {
        Ok(child) => Proc { child: Some(child) },
        Err(err) => {
            log_error!(log, "Could not spawn child process: {err}");
            Proc::invalid()
        }
    }
}

pub fn run_sync(cmd: &Command<'_>, log: &mut WriteBuffer<'_>) -> bool {
    spawn_async(cmd, log).wait(log)
}

/// Waits on every handle, even after one has failed, so no child is left
/// unreaped. Succeeds only if every child did.
pub fn wait_all(procs: impl IntoIterator<Item = Proc>, log: &mut WriteBuffer<'_>) -> bool {
    procs
        .into_iter()
        .fold(true, |ok, proc| proc.wait(log) && ok)
}

#[cfg(unix)]
fn os_arg(arg: &[u8]) -> Cow<'_, OsStr> {
    use std::os::unix::ffi::OsStrExt as _;
    Cow::Borrowed(OsStr::from_bytes(arg))
}

#[cfg(not(unix))]
fn os_arg(arg: &[u8]) -> Cow<'_, OsStr> {
    Cow::Owned(String::from_utf8_lossy(arg).into_owned().into())
}

#[cfg(unix)]
pub fn signal_name(sig: i32) -> String {
    let name = match sig {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGCHLD => "SIGCHLD",
        libc::SIGCONT => "SIGCONT",
        libc::SIGSTOP => "SIGSTOP",
        libc::SIGTSTP => "SIGTSTP",
        libc::SIGTTIN => "SIGTTIN",
        libc::SIGTTOU => "SIGTTOU",
        libc::SIGURG => "SIGURG",
        libc::SIGXCPU => "SIGXCPU",
        libc::SIGXFSZ => "SIGXFSZ",
        libc::SIGVTALRM => "SIGVTALRM",
        libc::SIGPROF => "SIGPROF",
        libc::SIGWINCH => "SIGWINCH",
        libc::SIGIO => "SIGIO",
        libc::SIGSYS => "SIGSYS",
        _ => return format!("signal {sig}"),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    #[test]
    fn invalid_handle_fails_without_blocking() {
        let region = Region::with_capacity(1024);
        let mut log = WriteBuffer::memory(&region, 256);
        let proc = Proc::invalid();
        assert!(!proc.is_valid());
        assert_eq!(proc.id(), None);
        assert!(!proc.wait(&mut log));
        assert!(log.is_empty());
    }

    #[test]
    fn empty_command_is_not_spawned() {
        let region = Region::with_capacity(1024);
        let mut out = Vec::new();
        {
            let mut log = WriteBuffer::writer(Box::new(&mut out), &region, 256);
            let cmd = Command::new(&region);
            assert!(!spawn_async(&cmd, &mut log).is_valid());
        }
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("[ERROR]: Could not spawn child process"));
    }

    #[cfg(unix)]
    #[test]
    fn spawns_with_command_and_log_in_separate_scratch_slots() {
        use crate::scratch::with_scratch;

        let ok = with_scratch(&[], |log_slot| {
            let mut log = WriteBuffer::memory(log_slot, 1024);
            with_scratch(&[log_slot.id()], |cmd_slot| {
                let mut cmd = Command::new(cmd_slot);
                cmd.arg(b"true");
                let proc = spawn_async(&cmd, &mut log);
                assert!(proc.is_valid());
                proc.wait(&mut log)
            })
        });
        assert!(ok);
    }

    #[cfg(unix)]
    #[test]
    fn signal_names_come_from_libc() {
        assert_eq!(signal_name(libc::SIGKILL), "SIGKILL");
        assert_eq!(signal_name(libc::SIGSEGV), "SIGSEGV");
        assert_eq!(signal_name(200), "signal 200");
    }
}
