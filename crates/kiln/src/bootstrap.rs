//! Self-rebuild protocol for build programs.
//!
//! `CheckStale -> Rebuilding -> Swapped -> Resumed`, or straight from
//! `CheckStale` to `Resumed` when the running binary is newer than all of its
//! sources. The new binary is always built under a different name and moved
//! into place by rename, so a failure at any step leaves either the old or the
//! new binary at the expected path.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::buffer::WriteBuffer;
use crate::command::Command;
use crate::config::RuntimeConfig;
use crate::fresh::{self, Freshness};
use crate::proc::{self, EXEC_FAILED_STATUS};
use crate::scratch::with_scratch;
use crate::{fatal, log_error, log_info};

/// Placeholder in a rebuild argv that is replaced by the staged output path.
pub const OUT_PLACEHOLDER: &str = "{out}";

pub const STAGED_SUFFIX: &str = ".new";
pub const BACKUP_SUFFIX: &str = ".old";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    CheckStale,
    Rebuilding,
    Swapped,
    Resumed,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BootstrapState::CheckStale => "check-stale",
            BootstrapState::Rebuilding => "rebuilding",
            BootstrapState::Swapped => "swapped",
            BootstrapState::Resumed => "resumed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Fresh,
    Resumed,
}

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub binary: PathBuf,
    pub sources: Vec<PathBuf>,
    pub rebuild: Vec<OsString>,
    pub staged: PathBuf,
    pub backup: PathBuf,
    pub args: Vec<OsString>,
}

impl BootstrapConfig {
    pub fn new(binary: PathBuf, sources: Vec<PathBuf>, rebuild: Vec<OsString>) -> Self {
        let staged = with_suffix(&binary, STAGED_SUFFIX);
        let backup = with_suffix(&binary, BACKUP_SUFFIX);
        BootstrapConfig {
            binary,
            sources,
            rebuild,
            staged,
            backup,
            args: Vec::new(),
        }
    }

    pub fn for_current_exe(sources: Vec<PathBuf>, rebuild: Vec<OsString>) -> Result<Self> {
        let binary = std::env::current_exe().context("locate running executable")?;
        let mut config = BootstrapConfig::new(binary, sources, rebuild);
        config.args = std::env::args_os().collect();
        Ok(config)
    }

    /// The rebuild command with `{out}` replaced by the staged path, or with
    /// `-o <staged>` appended when no placeholder is present.
    pub fn rebuild_argv(&self) -> Vec<OsString> {
        let mut substituted = false;
        let mut argv: Vec<OsString> = self
            .rebuild
            .iter()
            .map(|arg| {
                if arg == OUT_PLACEHOLDER {
                    substituted = true;
                    self.staged.clone().into_os_string()
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            argv.push(OsString::from("-o"));
            argv.push(self.staged.clone().into_os_string());
        }
        argv
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

pub fn cc_rebuild_command(config: &RuntimeConfig, source: impl AsRef<Path>) -> Vec<OsString> {
    vec![
        config.cc.clone(),
        OsString::from("-o"),
        OsString::from(OUT_PLACEHOLDER),
        source.as_ref().as_os_str().to_owned(),
    ]
}

/// Operating-system effects the protocol depends on.
pub trait BootstrapHost {
    fn needs_rebuild(
        &mut self,
        output: &Path,
        inputs: &[PathBuf],
        log: &mut WriteBuffer<'_>,
    ) -> Freshness;

    fn run_sync(&mut self, cmd: &Command<'_>, log: &mut WriteBuffer<'_>) -> bool;

    fn rename(&mut self, from: &Path, to: &Path, log: &mut WriteBuffer<'_>) -> Result<()>;

    /// Continues the run on the installed binary. Real hosts do not return on
    /// success.
    fn resume(&mut self, config: &BootstrapConfig, log: &mut WriteBuffer<'_>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Replace the process image in place, keeping the pid.
    ReplaceImage,
    /// Run the new binary as a child with the same arguments and exit with
    /// its status.
    Successor,
}

impl Default for ResumeMode {
    fn default() -> Self {
        if cfg!(unix) {
            ResumeMode::ReplaceImage
        } else {
            ResumeMode::Successor
        }
    }
}

#[derive(Debug, Default)]
pub struct OsHost {
    pub mode: ResumeMode,
}

impl BootstrapHost for OsHost {
    fn needs_rebuild(
        &mut self,
        output: &Path,
        inputs: &[PathBuf],
        log: &mut WriteBuffer<'_>,
    ) -> Freshness {
        fresh::needs_rebuild(output, inputs, log)
    }

    fn run_sync(&mut self, cmd: &Command<'_>, log: &mut WriteBuffer<'_>) -> bool {
        proc::run_sync(cmd, log)
    }

    fn rename(&mut self, from: &Path, to: &Path, _log: &mut WriteBuffer<'_>) -> Result<()> {
        std::fs::rename(from, to)
            .with_context(|| format!("rename {} -> {}", from.display(), to.display()))
    }

    fn resume(&mut self, config: &BootstrapConfig, log: &mut WriteBuffer<'_>) -> Result<()> {
        let mut cmd = std::process::Command::new(&config.binary);
        cmd.args(config.args.iter().skip(1));
        log.flush();

        match self.mode {
            #[cfg(unix)]
            ResumeMode::ReplaceImage => {
                use std::os::unix::process::CommandExt as _;
                if let Some(arg0) = config.args.first() {
                    cmd.arg0(arg0);
                }
                let err = cmd.exec();
                Err(err).with_context(|| format!("exec {}", config.binary.display()))
            }
            #[cfg(not(unix))]
            ResumeMode::ReplaceImage => {
                anyhow::bail!("process image replacement is not supported on this platform")
            }
            ResumeMode::Successor => {
                let status = match cmd.status() {
                    Ok(status) => status,
                    Err(err) => {
                        log_error!(
                            log,
                            "Could not start {}: {err}",
                            config.binary.display()
                        );
                        std::process::exit(EXEC_FAILED_STATUS);
                    }
                };
                std::process::exit(exit_code(status))
            }
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    status.code().unwrap_or(1)
}

#[derive(Debug)]
pub struct Bootstrap {
    config: BootstrapConfig,
    state: BootstrapState,
    transitions: Vec<BootstrapState>,
}

impl Bootstrap {
    pub fn new(config: BootstrapConfig) -> Self {
        Bootstrap {
            config,
            state: BootstrapState::CheckStale,
            transitions: vec![BootstrapState::CheckStale],
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn transitions(&self) -> &[BootstrapState] {
        &self.transitions
    }

    fn enter(&mut self, state: BootstrapState) {
        self.state = state;
        self.transitions.push(state);
    }

    pub fn run(
        &mut self,
        host: &mut impl BootstrapHost,
        log: &mut WriteBuffer<'_>,
    ) -> Result<BootstrapOutcome> {
        self.state = BootstrapState::CheckStale;
        self.transitions = vec![BootstrapState::CheckStale];

        let binary = self.config.binary.clone();
        match host.needs_rebuild(&binary, &self.config.sources, log) {
            Freshness::Fresh => {
                self.enter(BootstrapState::Resumed);
                return Ok(BootstrapOutcome::Fresh);
            }
            Freshness::Error => {
                anyhow::bail!("could not decide whether {} is up to date", binary.display())
            }
            Freshness::MustRebuild => {}
        }

        self.enter(BootstrapState::Rebuilding);
        log_info!(log, "Rebuilding {}", binary.display());
        self.rebuild(host, log)?;

        self.install(host, log)?;
        self.enter(BootstrapState::Swapped);
        log_info!(
            log,
            "Installed new {} (previous binary kept at {})",
            binary.display(),
            self.config.backup.display()
        );

        self.enter(BootstrapState::Resumed);
        host.resume(&self.config, log)
            .with_context(|| format!("resume {}", binary.display()))?;
        Ok(BootstrapOutcome::Resumed)
    }

    fn rebuild(&self, host: &mut impl BootstrapHost, log: &mut WriteBuffer<'_>) -> Result<()> {
        let staged = &self.config.staged;
        match std::fs::remove_file(staged) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("remove stale {}", staged.display()));
            }
        }

        if self.config.rebuild.is_empty() {
            anyhow::bail!("no rebuild command configured for {}", self.config.binary.display());
        }
        let argv = self.config.rebuild_argv();
        let conflicts = [log.region_id()];
        let ok = with_scratch(&conflicts, |scratch| {
            let mut cmd = Command::new(scratch);
            for arg in &argv {
                cmd.arg_os(arg);
            }
            host.run_sync(&cmd, log)
        });
        if !ok {
            anyhow::bail!("rebuild command failed: {}", display_argv(&argv));
        }
        if !staged.is_file() {
            anyhow::bail!("rebuild command did not produce {}", staged.display());
        }
        Ok(())
    }

    fn install(&self, host: &mut impl BootstrapHost, log: &mut WriteBuffer<'_>) -> Result<()> {
        let BootstrapConfig {
            binary,
            staged,
            backup,
            ..
        } = &self.config;
        host.rename(binary, backup, log)?;
        if let Err(err) = host.rename(staged, binary, log) {
            if let Err(restore) = host.rename(backup, binary, log) {
                log_error!(
                    log,
                    "Could not restore {} from {}: {restore:#}",
                    binary.display(),
                    backup.display()
                );
            }
            return Err(err).context("install rebuilt binary");
        }
        Ok(())
    }
}

fn display_argv(argv: &[OsString]) -> String {
    argv.iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs the protocol on the real operating system and terminates the process
/// through the fatal path on any failure.
pub fn rebuild_self_or_die(config: BootstrapConfig, log: &mut WriteBuffer<'_>) -> BootstrapOutcome {
    let mut bootstrap = Bootstrap::new(config);
    match bootstrap.run(&mut OsHost::default(), log) {
        Ok(outcome) => outcome,
        Err(err) => fatal::die(Some(log), format_args!("{err:#}")),
    }
}
