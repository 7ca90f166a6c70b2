use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kiln::{rebuild_self_or_die, BootstrapConfig, Region, RuntimeConfig, WriteBuffer};

mod plan;
mod runner;

use plan::{BuildPlan, DEFAULT_PLAN};

#[derive(Debug, Parser)]
#[command(name = "kiln")]
#[command(about = "Self-rebuilding build runner.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rebuild this tool if its sources changed, then run the plan.
    Run(RunArgs),
    /// Report which targets are fresh, stale, or broken.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, default_value = DEFAULT_PLAN)]
    plan: PathBuf,

    /// Print the commands that would run without spawning them.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long, default_value = DEFAULT_PLAN)]
    plan: PathBuf,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = RuntimeConfig::from_env()?;
    let log_region = Region::with_capacity(cfg.log_bytes);
    let mut log = WriteBuffer::stderr(&log_region, cfg.log_bytes);

    match cli.cmd {
        Command::Run(args) => cmd_run(&cfg, args, &mut log),
        Command::Check(args) => cmd_check(args, &mut log),
    }
}

fn cmd_run(cfg: &RuntimeConfig, args: RunArgs, log: &mut WriteBuffer<'_>) -> Result<ExitCode> {
    let plan = BuildPlan::load(&args.plan)?;

    if let (Some(sr), false) = (&plan.self_rebuild, args.dry_run) {
        let config = BootstrapConfig::for_current_exe(sr.sources.clone(), sr.rebuild_argv(cfg))
            .context("configure self-rebuild")?;
        rebuild_self_or_die(config, log);
    }

    let mut work = Region::with_capacity(cfg.scratch_bytes);
    let ok = runner::run_plan(&plan, &mut work, args.dry_run, log);
    log.flush();
    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn cmd_check(args: CheckArgs, log: &mut WriteBuffer<'_>) -> Result<ExitCode> {
    let plan = BuildPlan::load(&args.plan)?;
    let report = runner::check_plan(&plan, log);
    log.flush();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for t in &report.targets {
            println!("{:<6} {} ({})", t.status, t.output.display(), t.batch);
        }
    }

    Ok(if report.has_errors() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}
