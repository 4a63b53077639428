use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use mission_analysis::config::{ExecutionMode, PartitionConfig, ReductionConfig, load_mission};
use mission_analysis::export::{self, report};
use mission_analysis::planner::run_mission;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run every leg of a mission file and write the results.
#[derive(Parser, Debug)]
#[command(author, version, about = "Coupled mission fuel-burn analysis")]
struct Cli {
    /// Mission file (TOML, or YAML by extension)
    #[arg(long)]
    config: PathBuf,

    /// Override the execution mode of the mission file
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Override the number of ranks for distributed runs
    #[arg(long)]
    ranks: Option<usize>,

    /// Override the thread cap for parallel runs
    #[arg(long)]
    threads: Option<usize>,

    /// Leg-to-rank assignment for distributed runs
    #[arg(long, value_enum)]
    partition: Option<Partition>,

    /// How duplicated leg results are combined
    #[arg(long, value_enum)]
    reduction: Option<Reduction>,

    /// Per-leg summary CSV (use '-' for stdout)
    #[arg(long, default_value = "-")]
    summary: PathBuf,

    /// Per-station profile CSV
    #[arg(long)]
    profile: Option<PathBuf>,

    /// JSON mission report
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log solver progress (overridden by RUST_LOG)
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Copy, Clone, ValueEnum, Debug)]
enum Mode {
    Serial,
    Parallel,
    Distributed,
}

#[derive(Copy, Clone, ValueEnum, Debug)]
enum Partition {
    RoundRobin,
    Replicated,
}

#[derive(Copy, Clone, ValueEnum, Debug)]
enum Reduction {
    Owner,
    Max,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut mission = load_mission(&cli.config)?;
    let execution = &mut mission.execution;
    if let Some(mode) = cli.mode {
        execution.mode = match mode {
            Mode::Serial => ExecutionMode::Serial,
            Mode::Parallel => ExecutionMode::Parallel,
            Mode::Distributed => ExecutionMode::Distributed,
        };
    }
    if let Some(ranks) = cli.ranks {
        execution.ranks = ranks;
    }
    if let Some(threads) = cli.threads {
        execution.threads = Some(threads);
    }
    if let Some(partition) = cli.partition {
        execution.partition = match partition {
            Partition::RoundRobin => PartitionConfig::RoundRobin,
            Partition::Replicated => PartitionConfig::Replicated,
        };
    }
    if let Some(reduction) = cli.reduction {
        execution.reduction = match reduction {
            Reduction::Owner => ReductionConfig::Owner,
            Reduction::Max => ReductionConfig::Max,
        };
    }
    mission.validate()?;

    let outcome = run_mission(&mission)?;

    let mut writer = export::writer_for_path(&cli.summary)?;
    export::summary::write_report(writer.as_mut(), &outcome)?;
    writer.flush()?;

    if let Some(path) = &cli.profile {
        let mut writer = export::writer_for_path(path)?;
        export::profile::write_report(writer.as_mut(), &outcome)?;
        writer.flush()?;
        info!(path = %path.display(), "wrote station profiles");
    }
    if let Some(path) = &cli.report {
        let name = cli
            .config
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("mission");
        let mode = format!("{:?}", mission.execution.mode).to_lowercase();
        let meta = report::Metadata {
            mission: name,
            mode: &mode,
            ranks: mission.execution.ranks,
        };
        report::write_report(path, &meta, &outcome)?;
        info!(path = %path.display(), "wrote mission report");
    }

    if !outcome.all_converged() {
        eprintln!("warning: not every leg converged; see the status column");
    }
    Ok(())
}
