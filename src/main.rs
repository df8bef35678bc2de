use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use tidyslot::config::Config;
use tidyslot::engine::{Candidate, Engine, Slot, Verdict};
use tidyslot::limits::{MAX_BOOKING_MINUTES, MIN_BOOKING_MINUTES};
use tidyslot::model::TimeOfDay;
use tidyslot::notify::NotifyHub;
use tidyslot::snapshot::Snapshot;

#[derive(Parser)]
#[command(name = "tidyslot", version, about = "Booking conflict checks against the schedule journal")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a JSON snapshot into the journal.
    Import { file: PathBuf },
    /// Print the whole schedule as JSON.
    Export,
    /// Would this booking be accepted?
    Check {
        #[arg(long)]
        employee: Ulid,
        #[command(flatten)]
        slot: SlotArgs,
        /// Booking being edited.
        #[arg(long)]
        exclude: Option<Ulid>,
    },
    /// Employees who cannot take a slot.
    Unavailable {
        #[command(flatten)]
        slot: SlotArgs,
        #[arg(long)]
        exclude: Option<Ulid>,
    },
    /// Open windows for one employee on one date.
    Free {
        #[arg(long)]
        employee: Ulid,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Rewrite the journal down to current state.
    Compact,
}

#[derive(clap::Args)]
struct SlotArgs {
    #[arg(long)]
    date: NaiveDate,
    /// HH:mm
    #[arg(long)]
    start: TimeOfDay,
    #[arg(long)]
    minutes: u32,
}

impl SlotArgs {
    fn slot(&self) -> Result<Slot, String> {
        if !(MIN_BOOKING_MINUTES..=MAX_BOOKING_MINUTES).contains(&self.minutes) {
            return Err(format!(
                "--minutes must be between {MIN_BOOKING_MINUTES} and {MAX_BOOKING_MINUTES}"
            ));
        }
        Ok(Slot {
            date: self.date,
            start_time: self.start,
            duration_minutes: self.minutes,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config;
    config.validate()?;
    tidyslot::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let journal = config.journal_path();
    let engine = Engine::new(journal.clone(), Arc::new(NotifyHub::new()))?;
    info!("journal: {}", journal.display());
    let settings = config.check_settings();

    match cli.command {
        Command::Import { file } => {
            let snapshot: Snapshot = serde_json::from_slice(&std::fs::read(&file)?)?;
            let report = snapshot.restore(&engine).await?;
            println!(
                "imported {} employees, {} availability records, {} off-requests, {} bookings, {} contracts; skipped {}",
                report.employees,
                report.availability,
                report.off_requests,
                report.bookings,
                report.contracts,
                report.skipped
            );
            if engine.wal_appends_since_compact().await >= config.compact_threshold {
                engine.compact_journal().await?;
            }
        }
        Command::Export => {
            let snapshot = Snapshot::capture(&engine).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Check {
            employee,
            slot,
            exclude,
        } => {
            let candidate = Candidate {
                employee_id: employee,
                slot: slot.slot()?,
                exclude_booking_id: exclude,
            };
            match engine.check(&candidate, &settings).await? {
                Verdict::Accepted => println!("ok"),
                Verdict::Rejected(reason) => {
                    println!("rejected: {reason}");
                    std::process::exit(1);
                }
            }
        }
        Command::Unavailable { slot, exclude } => {
            let slot = slot.slot()?;
            let mut ids: Vec<Ulid> = engine
                .unavailable_employees(&slot, exclude, &settings)
                .await
                .into_iter()
                .collect();
            ids.sort();
            for id in ids {
                println!("{id}");
            }
        }
        Command::Free { employee, date } => {
            for window in engine.free_windows(employee, date, &settings).await? {
                println!("{}-{}", clock(window.start), clock(window.end));
            }
        }
        Command::Compact => {
            let before = engine.wal_appends_since_compact().await;
            engine.compact_journal().await?;
            println!("compacted ({before} appends since last compaction)");
        }
    }

    Ok(())
}

fn clock(minutes: i32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}
