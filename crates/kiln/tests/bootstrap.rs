use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use kiln::{
    needs_rebuild, Bootstrap, BootstrapConfig, BootstrapHost, BootstrapOutcome, BootstrapState,
    Command, Freshness, Region, WriteBuffer,
};

/// Real filesystem, simulated compiler and resume.
#[derive(Default)]
struct FakeHost {
    rebuilds: Vec<Vec<String>>,
    renames: Vec<(PathBuf, PathBuf)>,
    resumes: usize,
    fail_rebuild: bool,
    fail_backup: bool,
    fail_install: bool,
}

impl BootstrapHost for FakeHost {
    fn needs_rebuild(
        &mut self,
        output: &Path,
        inputs: &[PathBuf],
        log: &mut WriteBuffer<'_>,
    ) -> Freshness {
        needs_rebuild(output, inputs, log)
    }

    fn run_sync(&mut self, cmd: &Command<'_>, _log: &mut WriteBuffer<'_>) -> bool {
        let argv: Vec<String> = cmd
            .argv()
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        self.rebuilds.push(argv.clone());
        if self.fail_rebuild {
            return false;
        }
        let out = argv.last().expect("output path");
        std::fs::write(out, b"rebuilt").is_ok()
    }

    fn rename(&mut self, from: &Path, to: &Path, _log: &mut WriteBuffer<'_>) -> Result<()> {
        self.renames.push((from.to_path_buf(), to.to_path_buf()));
        let failing = match self.renames.len() {
            1 => self.fail_backup,
            2 => self.fail_install,
            _ => false,
        };
        if failing {
            anyhow::bail!("rename {} -> {}: simulated failure", from.display(), to.display());
        }
        std::fs::rename(from, to)
            .with_context(|| format!("rename {} -> {}", from.display(), to.display()))
    }

    fn resume(&mut self, _config: &BootstrapConfig, _log: &mut WriteBuffer<'_>) -> Result<()> {
        self.resumes += 1;
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    config: BootstrapConfig,
}

fn stale_fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let binary = dir.path().join("build");
    let source = dir.path().join("build.c");
    std::fs::write(&binary, b"original").expect("write binary");
    std::fs::write(&source, b"int main(void) { return 0; }\n").expect("write source");
    let now = SystemTime::now();
    for (path, age) in [(&binary, 100), (&source, 50)] {
        File::options()
            .write(true)
            .open(path)
            .expect("open")
            .set_modified(now - Duration::from_secs(age))
            .expect("set mtime");
    }

    let config = BootstrapConfig::new(
        binary,
        vec![source],
        vec![OsString::from("cc"), OsString::from("build.c")],
    );
    Fixture { _dir: dir, config }
}

fn run(
    config: &BootstrapConfig,
    host: &mut FakeHost,
) -> (Result<BootstrapOutcome>, Vec<BootstrapState>) {
    let region = Region::with_capacity(64 * 1024);
    let mut out = Vec::new();
    let mut log = WriteBuffer::writer(Box::new(&mut out), &region, 1024);
    let mut bootstrap = Bootstrap::new(config.clone());
    let outcome = bootstrap.run(host, &mut log);
    (outcome, bootstrap.transitions().to_vec())
}

#[test]
fn simulated_rebuild_converges() {
    let fx = stale_fixture();
    let mut host = FakeHost::default();

    let (outcome, path) = run(&fx.config, &mut host);
    assert_eq!(outcome.expect("first run"), BootstrapOutcome::Resumed);
    assert_eq!(
        path,
        [
            BootstrapState::CheckStale,
            BootstrapState::Rebuilding,
            BootstrapState::Swapped,
            BootstrapState::Resumed,
        ]
    );
    assert_eq!(host.rebuilds.len(), 1);
    assert_eq!(
        host.rebuilds[0],
        [
            "cc".to_string(),
            "build.c".to_string(),
            "-o".to_string(),
            fx.config.staged.display().to_string(),
        ]
    );
    assert_eq!(
        host.renames,
        [
            (fx.config.binary.clone(), fx.config.backup.clone()),
            (fx.config.staged.clone(), fx.config.binary.clone()),
        ]
    );
    assert_eq!(host.resumes, 1);
    assert_eq!(std::fs::read(&fx.config.binary).expect("binary"), b"rebuilt");
    assert_eq!(std::fs::read(&fx.config.backup).expect("backup"), b"original");
    assert!(!fx.config.staged.exists());

    let mut again = FakeHost::default();
    let (outcome, path) = run(&fx.config, &mut again);
    assert_eq!(outcome.expect("second run"), BootstrapOutcome::Fresh);
    assert_eq!(path, [BootstrapState::CheckStale, BootstrapState::Resumed]);
    assert!(again.rebuilds.is_empty());
    assert!(again.renames.is_empty());
    assert_eq!(again.resumes, 0);
}

#[test]
fn failed_rebuild_leaves_binary_alone() {
    let fx = stale_fixture();
    let mut host = FakeHost {
        fail_rebuild: true,
        ..FakeHost::default()
    };
    let (outcome, path) = run(&fx.config, &mut host);
    let err = outcome.expect_err("rebuild must fail");
    assert!(format!("{err:#}").contains("rebuild command failed"), "{err:#}");
    assert_eq!(path.last(), Some(&BootstrapState::Rebuilding));
    assert!(host.renames.is_empty());
    assert_eq!(host.resumes, 0);
    assert_eq!(std::fs::read(&fx.config.binary).expect("binary"), b"original");
}

#[test]
fn failed_install_restores_backup() {
    let fx = stale_fixture();
    let mut host = FakeHost {
        fail_install: true,
        ..FakeHost::default()
    };
    let (outcome, path) = run(&fx.config, &mut host);
    assert!(outcome.is_err());
    assert_eq!(path.last(), Some(&BootstrapState::Rebuilding));
    assert_eq!(host.renames.len(), 3);
    assert_eq!(
        host.renames[2],
        (fx.config.backup.clone(), fx.config.binary.clone())
    );
    assert_eq!(host.resumes, 0);
    assert_eq!(std::fs::read(&fx.config.binary).expect("binary"), b"original");
}

#[test]
fn unreadable_source_is_an_error() {
    let fx = stale_fixture();
    let mut config = fx.config.clone();
    config.sources.push(PathBuf::from("/nonexistent/kiln/source.c"));
    let mut host = FakeHost::default();
    let (outcome, path) = run(&config, &mut host);
    assert!(outcome.is_err());
    assert_eq!(path, [BootstrapState::CheckStale]);
    assert!(host.rebuilds.is_empty());
}

#[test]
fn failed_backup_rename_installs_nothing() {
    let fx = stale_fixture();
    let mut host = FakeHost {
        fail_backup: true,
        ..FakeHost::default()
    };
    let (outcome, path) = run(&fx.config, &mut host);
    assert!(outcome.is_err());
    assert_eq!(path.last(), Some(&BootstrapState::Rebuilding));
    assert_eq!(
        host.renames,
        [(fx.config.binary.clone(), fx.config.backup.clone())]
    );
    assert_eq!(host.resumes, 0);
    assert_eq!(std::fs::read(&fx.config.binary).expect("binary"), b"original");
    assert!(!fx.config.backup.exists());
    assert_eq!(std::fs::read(&fx.config.staged).expect("staged"), b"rebuilt");
}

#[test]
fn empty_rebuild_command_is_rejected() {
    let fx = stale_fixture();
    let mut config = fx.config.clone();
    config.rebuild.clear();
    let mut host = FakeHost::default();
    let (outcome, path) = run(&config, &mut host);
    let err = outcome.expect_err("nothing to run");
    assert!(
        format!("{err:#}").contains("no rebuild command configured"),
        "{err:#}"
    );
    assert_eq!(path.last(), Some(&BootstrapState::Rebuilding));
    assert!(host.rebuilds.is_empty());
    assert!(host.renames.is_empty());
}
