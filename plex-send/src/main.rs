//! plex-send - Background daemon for the publish queue
//!
//! Runs scheduler ticks on an interval: promotes scheduled drafts,
//! dispatches due queue items to their publishers and finalizes drafts.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use libplexcast::logging::{LogFormat, LoggingConfig};
use libplexcast::service::events::EventReceiver;
use libplexcast::{Config, PlexcastError, PlexcastService, TickReport};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "plex-send")]
#[command(version)]
#[command(about = "Background daemon for the publish queue")]
#[command(long_about = "\
plex-send - Background daemon for the publish queue

DESCRIPTION:
    plex-send is a long-running daemon that works through the Plexcast
    publish queue. Each pass it promotes scheduled drafts that are due,
    dispatches pending queue items to their platform publishers (bounded
    by scheduler.concurrency), schedules retries with exponential backoff
    and settles each draft once all of its items are done.

    Items left in processing by a crashed run are marked failed at startup
    and can be retried with plex-queue retry.

USAGE:
    # Run in foreground (logs to stderr)
    plex-send

    # Run with custom poll interval
    plex-send --poll-interval 10

    # Stream pipeline events as JSON lines on stdout
    plex-send --events | jq 'select(.type == \"item_failed\")'

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current pass)

CONFIGURATION:
    Configuration file: ~/.config/plexcast/config.toml
    Database location: ~/.local/share/plexcast/plexcast.db

    [scheduler]
    poll_interval = \"30s\"
    concurrency = 8
    dispatch_timeout = \"30s\"
    aggregate_policy = \"best_effort\"   # or all_or_nothing

    [retry]
    base_delay = \"30s\"
    max_delay = \"1h\"

    [platforms.mastodon]
    publish_command = \"~/bin/post-mastodon\"
    max_retries = 5

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to run a scheduler pass (default: scheduler.poll_interval)")]
    poll_interval: Option<u64>,

    /// Print pipeline events to stdout as JSON lines
    #[arg(long)]
    events: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Log format (text, json, pretty)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,

    /// Run once and exit (for testing)
    #[arg(long, hide = true)]
    #[arg(help = "Run a single pass and exit (for testing)")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_format = cli
        .log_format
        .as_deref()
        .and_then(|f| LogFormat::from_str(f).ok());
    LoggingConfig::from_env(log_format, cli.verbose, "info").init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<PlexcastError>()
            .map(PlexcastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let poll_interval = cli
        .poll_interval
        .map(Duration::from_secs)
        .unwrap_or(config.scheduler.poll_interval);
    let service = PlexcastService::from_config(config).await?;

    info!("plex-send daemon starting");
    log_settings(&service, poll_interval);

    let mut events = cli.events.then(|| service.subscribe());

    // Set up graceful shutdown
    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone()).context("Signal setup failed")?;

    let recovered = service.scheduler().recover_stale(Utc::now()).await?;
    if recovered > 0 {
        warn!("Recovered {} interrupted item(s) from a previous run", recovered);
    }

    if cli.once {
        let report = service.tick().await?;
        log_report(&report);
        drain_events(events.as_mut());
        info!("plex-send: processed queue once, exiting");
    } else {
        run_daemon_loop(&service, poll_interval, shutdown, events.as_mut()).await;
    }

    info!("plex-send daemon stopped");
    Ok(())
}

fn log_settings(service: &PlexcastService, poll_interval: Duration) {
    let settings = service.scheduler().settings();
    info!("Poll interval: {}", humantime::format_duration(poll_interval));
    info!(
        "Scheduler: concurrency={} dispatch_timeout={} batch_size={} aggregate_policy={}",
        settings.concurrency,
        humantime::format_duration(settings.dispatch_timeout),
        settings.batch_size,
        settings.aggregate_policy
    );
    info!(
        "Retry: base_delay={} max_delay={}",
        humantime::format_duration(settings.retry.base_delay),
        humantime::format_duration(settings.retry.max_delay)
    );

    let commands: Vec<_> = service
        .config()
        .publish_commands()
        .map(|(platform, _)| platform.as_str())
        .collect();
    if commands.is_empty() {
        warn!("No publish_command configured; every dispatch will fail");
    } else {
        info!("Publishers: {}", commands.join(", "));
    }
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("Received signal {}, stopping gracefully...", sig);
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

/// Main daemon loop
async fn run_daemon_loop(
    service: &PlexcastService,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    mut events: Option<&mut EventReceiver>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        if let Err(e) = service.scheduler().recover_stale(Utc::now()).await {
            error!("Error recovering stale items: {}", e);
        }

        match service.tick().await {
            Ok(report) => log_report(&report),
            Err(e) => error!("Error processing queue: {}", e),
        }
        drain_events(events.as_deref_mut());

        // Sleep until next pass, checking for shutdown every second
        let deadline = Instant::now() + poll_interval;
        while !shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep((deadline - now).min(Duration::from_secs(1))).await;
        }
    }
}

fn log_report(report: &TickReport) {
    if report.is_idle() {
        debug!("Nothing due");
        return;
    }

    info!(
        "Pass: promoted={} dispatched={} completed={} retried={} failed={} discarded={} finalized={}",
        report.promoted,
        report.dispatched,
        report.completed,
        report.retried,
        report.failed,
        report.discarded,
        report.finalized
    );
    if report.errors > 0 {
        warn!("{} dispatch(es) hit a storage error", report.errors);
    }
}

/// Print buffered events as JSON lines
fn drain_events(events: Option<&mut EventReceiver>) {
    let Some(events) = events else {
        return;
    };

    loop {
        match events.try_recv() {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode event: {}", e),
            },
            Err(TryRecvError::Lagged(missed)) => {
                warn!("Event stream lagged, {} event(s) dropped", missed);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}
