//! fs-audit - command line entry point

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use fs_audit::engine::identity::current_user;
use fs_audit::engine::ignore::DEFAULT_IGNORED_SUFFIXES;
use fs_audit::logging::init_logging;
use fs_audit::scheduler::SystemClock;
use fs_audit::{
    AlertDispatcher, Config, EventStore, FileMonitor, IgnorePolicy, ReportGenerator, Scheduler,
    WatchAdapter, DEFAULT_ADMIN_EMAIL, DEFAULT_CHECK_MINUTES, DEFAULT_DATABASE,
    DEFAULT_REPORTS_DIR, DEFAULT_REPORT_TIME,
};

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "fs-audit", version, about = "Filesystem audit agent")]
struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch a directory and record file activity
    Monitor {
        /// Directory to watch
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// SQLite database file
        #[arg(long, default_value = DEFAULT_DATABASE)]
        db: PathBuf,

        /// Watch subdirectories too
        #[arg(long)]
        recursive: bool,

        /// Comma separated suffixes to ignore
        #[arg(long, default_value = DEFAULT_IGNORED_SUFFIXES)]
        ignore: String,

        /// Reports directory, excluded from monitoring
        #[arg(long, default_value = DEFAULT_REPORTS_DIR)]
        out: PathBuf,
    },

    /// Generate the daily report for one date
    Report {
        #[arg(long, default_value = DEFAULT_DATABASE)]
        db: PathBuf,

        /// Date as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Reports directory
        #[arg(long, default_value = DEFAULT_REPORTS_DIR)]
        out: PathBuf,

        /// Print the aggregates as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run the daily report and suspicious sweep jobs
    Scheduler {
        #[arg(long, default_value = DEFAULT_DATABASE)]
        db: PathBuf,

        #[arg(long, default_value = DEFAULT_REPORTS_DIR)]
        out: PathBuf,

        /// Alert recipient (display only)
        #[arg(long, default_value = DEFAULT_ADMIN_EMAIL)]
        admin_email: String,

        /// Daily report time, HH:MM
        #[arg(long, default_value = DEFAULT_REPORT_TIME)]
        report_time: String,

        /// Minutes between suspicious sweeps
        #[arg(long, default_value_t = DEFAULT_CHECK_MINUTES)]
        check_minutes: u32,
    },

    /// Show event totals
    Stats {
        #[arg(long, default_value = DEFAULT_DATABASE)]
        db: PathBuf,
    },

    /// List the most recent suspicious events
    Suspicious {
        #[arg(long, default_value = DEFAULT_DATABASE)]
        db: PathBuf,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Delete every stored event and access record
    Reset {
        #[arg(long, default_value = DEFAULT_DATABASE)]
        db: PathBuf,

        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn run_monitor(config: Config) -> CliResult {
    // Validate the root before opening anything.
    let mut monitor = FileMonitor::new(&config.watch_path, config.recursive)?;
    let store = Arc::new(EventStore::open(&config.database_path)?);
    info!("Database ready at {}", store.location());

    let adapter = WatchAdapter::new(store, config.ignore_policy(), current_user());
    info!(
        "Monitoring {} as {} (recursive={}, ignored suffixes={:?})",
        monitor.root().display(),
        adapter.user(),
        monitor.recursive(),
        config.ignored_suffixes
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let notifications = monitor.start()?;
        info!("Monitoring started (Ctrl+C to stop)");
        let recorded = adapter.run(notifications, shutdown_signal()).await?;
        monitor.stop();
        info!("Recorded {} events", recorded);
        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
    })
}

fn run_report(db: &Path, date: NaiveDate, out: PathBuf, json: bool) -> CliResult {
    let store = Arc::new(EventStore::open_existing(db)?);
    let generator = ReportGenerator::new(store, out);

    let (outcome, text, path) = generator.generate_and_save(date)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("\n{text}");
    }
    println!("\nReport saved to: {}\n", path.display());
    Ok(())
}

fn run_scheduler(config: Config) -> CliResult {
    let schedule = config.schedule()?;
    let store = Arc::new(EventStore::open_existing(&config.database_path)?);
    let generator = ReportGenerator::new(store.clone(), config.reports_dir.clone());
    let dispatcher = AlertDispatcher::console(config.admin_email.clone());

    let mut scheduler = Scheduler::new(store, generator, dispatcher, SystemClock, schedule)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(scheduler.run(shutdown_signal()));
    Ok(())
}

fn run_stats(db: &Path) -> CliResult {
    let store = EventStore::open_existing(db)?;
    let stats = store.statistics()?;

    println!("\nSTATISTICS\n");
    println!("  Total events:       {}", stats.total_events);
    println!("  Suspicious events:  {}", stats.suspicious_events);
    println!("  Active users:       {}", stats.distinct_users);
    Ok(())
}

fn run_suspicious(db: &Path, limit: usize) -> CliResult {
    let store = EventStore::open_existing(db)?;
    let events = store.suspicious_events(limit)?;

    println!("\nSUSPICIOUS EVENTS\n");
    if events.is_empty() {
        println!("No suspicious events.");
    }
    for (i, event) in events.iter().enumerate() {
        println!("{}. [{}] {} - {}", i + 1, event.timestamp, event.user, event.action);
        println!("   File: {}\n", event.path);
    }
    Ok(())
}

fn run_reset(db: &Path, confirmed: bool) -> CliResult {
    if !confirmed {
        return Err(format!("refusing to reset {} without --yes", db.display()).into());
    }
    let store = EventStore::open_existing(db)?;
    store.reset()?;
    println!("Database {} was reset.", db.display());
    Ok(())
}

fn run(command: Command) -> CliResult {
    match command {
        Command::Monitor {
            path,
            db,
            recursive,
            ignore,
            out,
        } => run_monitor(Config {
            database_path: db,
            reports_dir: out,
            watch_path: path,
            recursive,
            ignored_suffixes: IgnorePolicy::parse_suffixes(&ignore),
            ..Config::default()
        }),
        Command::Report { db, date, out, json } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            run_report(&db, date, out, json)
        }
        Command::Scheduler {
            db,
            out,
            admin_email,
            report_time,
            check_minutes,
        } => run_scheduler(Config {
            database_path: db,
            reports_dir: out,
            admin_email,
            report_time,
            check_minutes,
            ..Config::default()
        }),
        Command::Stats { db } => run_stats(&db),
        Command::Suspicious { db, limit } => run_suspicious(&db, limit),
        Command::Reset { db, yes } => run_reset(&db, yes),
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let guard = init_logging(cli.log_file.as_deref(), cli.verbose);

    if let Err(e) = run(cli.command) {
        error!("{}", e);
        // Flush the file writer before exiting.
        drop(guard);
        std::process::exit(1);
    }
}
