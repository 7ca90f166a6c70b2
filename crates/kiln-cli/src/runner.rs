use std::path::Path;

use kiln::{
    log_error, log_info, mkdir_if_not_exists, needs_rebuild, run_sync, spawn_async, wait_all,
    Command, Freshness, Region, WriteBuffer,
};
use serde::Serialize;

use crate::plan::{Batch, BuildPlan, Target};

fn target_command<'r>(region: &'r Region, target: &Target) -> Command<'r> {
    let mut cmd = Command::new(region);
    for arg in &target.argv {
        cmd.arg_copy(arg);
    }
    cmd
}

/// Runs every batch in order. Returns false on the first batch that fails.
pub fn run_plan(
    plan: &BuildPlan,
    work: &mut Region,
    dry_run: bool,
    log: &mut WriteBuffer<'_>,
) -> bool {
    if !dry_run {
        for dir in &plan.dirs {
            if !mkdir_if_not_exists(dir, log) {
                return false;
            }
        }
    }
    for batch in &plan.batches {
        if !run_batch(batch, work, dry_run, log) {
            log_error!(log, "Batch {} failed", batch.name);
            return false;
        }
    }
    true
}

/// Spawns every stale job of the batch, joins them all, then runs the
/// batch's final step when a job ran or the step is itself stale.
fn run_batch(batch: &Batch, work: &mut Region, dry_run: bool, log: &mut WriteBuffer<'_>) -> bool {
    work.scoped(|region| {
        let mut procs = Vec::new();
        let mut ok = true;
        let mut ran = 0usize;
        for job in &batch.jobs {
            match needs_rebuild(&job.output, &job.inputs, log) {
                Freshness::Fresh => continue,
                Freshness::Error => {
                    ok = false;
                    break;
                }
                Freshness::MustRebuild => {}
            }
            ran += 1;
            let cmd = target_command(region, job);
            if dry_run {
                println!("{cmd}");
            } else {
                procs.push(spawn_async(&cmd, log));
            }
        }
        if !wait_all(procs, log) || !ok {
            return false;
        }

        let Some(then) = &batch.then else {
            return true;
        };
        let stale = ran > 0
            || match needs_rebuild(&then.output, &then.inputs, log) {
                Freshness::Fresh => false,
                Freshness::MustRebuild => true,
                Freshness::Error => return false,
            };
        if !stale {
            if ran == 0 {
                log_info!(log, "Batch {} is up to date", batch.name);
            }
            return true;
        }
        let cmd = target_command(region, then);
        if dry_run {
            println!("{cmd}");
            return true;
        }
        run_sync(&cmd, log)
    })
}

#[derive(Debug, Serialize)]
pub struct CheckReport<'p> {
    pub targets: Vec<TargetStatus<'p>>,
}

#[derive(Debug, Serialize)]
pub struct TargetStatus<'p> {
    pub batch: &'p str,
    pub output: &'p Path,
    pub status: &'static str,
}

impl CheckReport<'_> {
    pub fn has_errors(&self) -> bool {
        self.targets.iter().any(|t| t.status == "error")
    }
}

pub fn check_plan<'p>(plan: &'p BuildPlan, log: &mut WriteBuffer<'_>) -> CheckReport<'p> {
    let targets = plan
        .batches
        .iter()
        .flat_map(|batch| batch.targets().map(move |t| (batch.name.as_str(), t)))
        .map(|(batch, target)| TargetStatus {
            batch,
            output: &target.output,
            status: match needs_rebuild(&target.output, &target.inputs, log) {
                Freshness::Fresh => "fresh",
                Freshness::MustRebuild => "stale",
                Freshness::Error => "error",
            },
        })
        .collect();
    CheckReport { targets }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn plan_in(dir: &Path, json: &str) -> BuildPlan {
        let json = json.replace("$DIR", &dir.display().to_string());
        BuildPlan::from_slice(json.as_bytes()).expect("plan")
    }

    #[cfg(unix)]
    #[test]
    fn batch_runs_jobs_then_final_step() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.in"), b"a").expect("write");
        std::fs::write(dir.path().join("b.in"), b"b").expect("write");
        let plan = plan_in(
            dir.path(),
            r#"{
                "dirs": ["$DIR/out"],
                "batches": [{
                    "name": "copy",
                    "jobs": [
                        { "output": "$DIR/out/a", "inputs": ["$DIR/a.in"], "argv": ["cp", "$DIR/a.in", "$DIR/out/a"] },
                        { "output": "$DIR/out/b", "inputs": ["$DIR/b.in"], "argv": ["cp", "$DIR/b.in", "$DIR/out/b"] }
                    ],
                    "then": { "output": "$DIR/out/ab", "inputs": ["$DIR/out/a", "$DIR/out/b"],
                              "argv": ["sh", "-c", "cat \"$0\" \"$1\" > \"$2\"", "$DIR/out/a", "$DIR/out/b", "$DIR/out/ab"] }
                }]
            }"#,
        );

        let mut work = Region::with_capacity(64 * 1024);
        let log_region = Region::with_capacity(4096);
        let mut out = Vec::new();
        {
            let mut log = WriteBuffer::writer(Box::new(&mut out), &log_region, 1024);
            assert!(run_plan(&plan, &mut work, false, &mut log));
            assert_eq!(work.used(), 0);
            let report = check_plan(&plan, &mut log);
            assert!(report.targets.iter().all(|t| t.status == "fresh"));
        }
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.matches("CMD: cp").count(), 2, "log={text}");
        assert_eq!(
            std::fs::read(dir.path().join("out/ab")).expect("ab"),
            b"ab"
        );
    }

    #[test]
    fn check_reports_missing_inputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("stamp");
        let f = std::fs::File::create(&out).expect("create");
        f.set_modified(SystemTime::now() - Duration::from_secs(10))
            .expect("mtime");
        let plan = plan_in(
            dir.path(),
            r#"{ "batches": [{ "name": "b", "jobs": [
                { "output": "$DIR/stamp", "argv": ["true"] },
                { "output": "$DIR/stamp", "inputs": ["$DIR/missing.c"], "argv": ["true"] },
                { "output": "$DIR/gone", "inputs": ["$DIR/missing.c"], "argv": ["true"] }
            ] }] }"#,
        );
        let region = Region::with_capacity(4096);
        let mut log = WriteBuffer::memory(&region, 1024);
        let report = check_plan(&plan, &mut log);
        let statuses: Vec<_> = report.targets.iter().map(|t| t.status).collect();
        assert_eq!(statuses, ["fresh", "error", "stale"]);
        assert!(report.has_errors());
    }
}
