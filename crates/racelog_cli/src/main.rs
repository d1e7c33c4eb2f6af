//! Racelog CLI
//!
//! Stress runs over archived racing sessions, and snapshot dumps of a single
//! archived event.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use racelog_core::{EventDescriptor, EventId, StressConfig};
use racelog_replay::{ArchiveService, ChunkFetcher, PublishSink};
use racelog_sim::{MemoryArchive, NullSink, SimSeed};
use racelog_stress::WorkloadScheduler;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "racelog")]
#[command(about = "Replay archived racing sessions under load", long_about = None)]
struct Cli {
    /// Log filter, takes precedence over RUST_LOG
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stress runs against archived events
    Stress {
        #[command(subcommand)]
        mode: StressCommand,
    },
    /// Inspect archived events
    Event {
        #[command(subcommand)]
        command: EventCommand,
    },
}

#[derive(Subcommand)]
enum StressCommand {
    /// Publish replays on many concurrent streams for a fixed time
    Timed {
        #[command(flatten)]
        archive: ArchiveArgs,
        #[command(flatten)]
        stress: StressArgs,
        /// Test duration
        #[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
        duration: Duration,
        /// Minimum recorded session length of a source event
        #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
        min_session_duration: Duration,
        /// Publish every replay under this key
        #[arg(long)]
        event_key: Option<String>,
    },
    /// Page through a fixed number of randomly picked events without publishing.
    ///
    /// Events are picked from the whole archive, optionally limited by race length.
    Browser {
        #[command(flatten)]
        archive: ArchiveArgs,
        #[command(flatten)]
        stress: StressArgs,
        /// Number of replays
        #[arg(long = "num-runs", default_value_t = 1)]
        num_runs: usize,
        /// Only use races shorter than this many minutes
        #[arg(long = "race-limit")]
        race_limit: Option<u64>,
    },
}

#[derive(Subcommand)]
enum EventCommand {
    /// Reconstruct snapshots of one event and write them as JSON lines
    States {
        /// Event id
        id: i64,
        #[command(flatten)]
        archive: ArchiveArgs,
        /// Start timestamp, defaults to the event's first frame
        #[arg(long)]
        from: Option<f64>,
        /// Frames per archive page
        #[arg(long, default_value_t = 30)]
        num: usize,
        /// Page until the event is exhausted instead of stopping after one page
        #[arg(long)]
        full: bool,
        /// Output file, `-` for stdout
        #[arg(long, default_value = "-")]
        output: String,
    },
}

#[derive(Args)]
struct ArchiveArgs {
    /// Directory with events.json and frames-<id>.json files
    #[arg(long, conflicts_with = "synthetic")]
    archive: Option<PathBuf>,
    /// Generate this many synthetic events instead of loading an archive
    #[arg(long)]
    synthetic: Option<usize>,
    /// Frames per synthetic event
    #[arg(long, default_value_t = 600)]
    synthetic_frames: usize,
    /// Seed for synthetic events
    #[arg(long, default_value_t = 42)]
    synthetic_seed: u64,
}

impl ArchiveArgs {
    fn open(&self) -> Result<Arc<dyn ArchiveService>> {
        let archive = match (&self.archive, self.synthetic) {
            (Some(dir), _) => MemoryArchive::load_dir(dir)?,
            (None, Some(events)) => MemoryArchive::synthetic(
                &SimSeed::from_literal(self.synthetic_seed),
                events,
                self.synthetic_frames,
            ),
            (None, None) => return Err(eyre!("either --archive or --synthetic is required")),
        };
        Ok(Arc::new(archive))
    }
}

#[derive(Args)]
struct StressArgs {
    /// Number of concurrent workers
    #[arg(long, default_value_t = 1)]
    worker: usize,
    /// Replay speed, 0 or less disables pacing
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    speed: i64,
    /// Frames per archive page
    #[arg(long = "num-states", default_value_t = 30)]
    num_states: usize,
    /// Minimum recording software version of a source event (timed runs)
    #[arg(long, default_value = "v0.6.0")]
    racelogger_version: String,
    /// Seed for event picks
    #[arg(long)]
    seed: Option<u64>,
    /// Directory receiving the JSON report
    #[arg(long, default_value = ".")]
    report_dir: PathBuf,
}

impl StressArgs {
    fn config(&self) -> StressConfig {
        let mut config = StressConfig::new()
            .with_workers(self.worker)
            .with_speed(self.speed)
            .with_batch_size(self.num_states)
            .with_min_source_version(self.racelogger_version.clone())
            .with_report_dir(self.report_dir.clone());
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        config
    }
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    match cli.command {
        Commands::Stress { mode } => match mode {
            StressCommand::Timed {
                archive,
                stress,
                duration,
                min_session_duration,
                event_key,
            } => {
                let mut config = stress
                    .config()
                    .with_test_duration(duration)
                    .with_min_session_minutes(min_session_duration.as_secs() / 60);
                if let Some(key) = event_key {
                    config = config.with_event_key(key);
                }
                let sink: Arc<dyn PublishSink> = Arc::new(NullSink::new());
                run_stress(config, archive.open()?, Some(sink)).await
            }
            StressCommand::Browser {
                archive,
                stress,
                num_runs,
                race_limit,
            } => {
                let mut config = stress.config().with_run_limit(num_runs);
                if let Some(minutes) = race_limit {
                    config = config.with_max_session_minutes(minutes);
                }
                run_stress(config, archive.open()?, None).await
            }
        },
        Commands::Event {
            command:
                EventCommand::States {
                    id,
                    archive,
                    from,
                    num,
                    full,
                    output,
                },
        } => dump_states(archive.open()?, EventId::new(id), from, num, full, &output).await,
    }
}

async fn run_stress(
    config: StressConfig,
    archive: Arc<dyn ArchiveService>,
    sink: Option<Arc<dyn PublishSink>>,
) -> Result<()> {
    let mode = config.mode();
    let report_dir = config.report_dir.clone();
    let scheduler = WorkloadScheduler::new(config, archive, sink);

    let cancel = scheduler.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, draining workers");
            cancel.cancel();
        }
    });

    let summary = scheduler.run().await?;
    print!("{}", summary.report.render_text());
    println!(
        "Jobs: {} started, {} completed, {} failed in {:?}",
        summary.jobs_started, summary.jobs_completed, summary.jobs_failed, summary.wall_time
    );

    let path = summary.report.write_json(&report_dir, mode)?;
    println!("Report: {}", path.display());
    Ok(())
}

async fn dump_states(
    archive: Arc<dyn ArchiveService>,
    id: EventId,
    from: Option<f64>,
    batch_size: usize,
    full: bool,
    output: &str,
) -> Result<()> {
    let event = archive
        .list_events()
        .await?
        .into_iter()
        .find(|event| event.id == id)
        .unwrap_or_else(|| EventDescriptor::new(id, ""));
    let start = from.unwrap_or_else(|| event.replay_start());

    let mut out: Box<dyn Write> = if output == "-" {
        Box::new(std::io::stdout().lock())
    } else {
        Box::new(BufWriter::new(std::fs::File::create(output)?))
    };

    let mut fetcher = ChunkFetcher::new(archive, id, start, batch_size.max(1));
    let mut written = 0usize;
    while let Some(batch) = fetcher.next_batch().await? {
        for snapshot in &batch {
            serde_json::to_writer(&mut out, snapshot)?;
            writeln!(out)?;
        }
        written += batch.len();
        if !full {
            break;
        }
    }
    out.flush()?;

    info!(event = %id, snapshots = written, fetches = fetcher.fetch_count(), "dumped states");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_timed() {
        let cli = Cli::try_parse_from([
            "racelog", "stress", "timed", "--synthetic", "3", "--worker", "4", "--speed", "-1",
            "--duration", "90s", "--min-session-duration", "30m", "--event-key", "k",
        ])
        .unwrap();

        let Commands::Stress {
            mode:
                StressCommand::Timed {
                    stress,
                    duration,
                    min_session_duration,
                    event_key,
                    ..
                },
        } = cli.command
        else {
            panic!("expected stress timed");
        };
        let config = stress
            .config()
            .with_test_duration(duration)
            .with_min_session_minutes(min_session_duration.as_secs() / 60);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.replay_speed, -1);
        assert_eq!(config.min_session_duration_minutes, 30);
        assert_eq!(config.test_duration, Duration::from_secs(90));
        assert_eq!(event_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_parse_browser() {
        let cli = Cli::try_parse_from([
            "racelog", "stress", "browser", "--archive", "/tmp/a", "--num-runs", "5",
            "--race-limit", "45",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Stress {
                mode: StressCommand::Browser {
                    num_runs: 5,
                    race_limit: Some(45),
                    ..
                }
            }
        ));
    }

    #[test]
    fn test_browser_has_no_session_length_filter() {
        let result = Cli::try_parse_from([
            "racelog", "stress", "browser", "--synthetic", "2", "--min-session-duration", "30m",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_archive_and_synthetic_conflict() {
        let result = Cli::try_parse_from([
            "racelog", "event", "states", "1", "--archive", "/tmp/a", "--synthetic", "2",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dump_states_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("states.jsonl");
        let archive: Arc<dyn ArchiveService> =
            Arc::new(MemoryArchive::synthetic(&SimSeed::from_literal(2), 1, 12));

        dump_states(archive.clone(), EventId::new(1), None, 5, true, output.to_str().unwrap())
            .await
            .unwrap();
        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(text.lines().count(), 12);
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["type"], 1);

        dump_states(archive, EventId::new(1), None, 5, false, output.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap().lines().count(), 5);
    }
}
