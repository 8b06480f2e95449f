//! plex-queue - Manage drafts, approvals and the publish queue
//!
//! Unix-style front end to the Plexcast publishing pipeline.

use std::io::{IsTerminal, Read};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use libplexcast::approval::{Approve, Reject};
use libplexcast::integrations::ConnectRequest;
use libplexcast::logging::{LogFormat, LoggingConfig};
use libplexcast::scheduling::parse_schedule;
use libplexcast::service::drafts::NewDraft;
use libplexcast::store::{DraftFilter, ItemFilter, LedgerFilter};
use libplexcast::types::{ConnectionType, DraftStatus};
use libplexcast::{
    Actor, CancelTarget, Config, PlatformId, PlexcastError, PlexcastService, Result,
};
use secrecy::SecretString;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "plex-queue")]
#[command(version)]
#[command(about = "Manage drafts, approvals and the publish queue")]
#[command(long_about = "\
plex-queue - Manage drafts, approvals and the publish queue

DESCRIPTION:
    plex-queue composes drafts, routes them through approval and inspects
    the queue that plex-send works through. Every command acts as the user
    given with --user (or PLEXCAST_USER).

COMMANDS:
    connect          Connect a platform (credential read from stdin)
    disconnect       Disconnect an integration
    integrations     List your integrations
    create           Create a draft, optionally submitting it
    submit           Submit a draft for publishing
    approve          Approve a pending draft
    reject           Send a pending draft back with a reason
    cancel           Cancel a draft or a single queue item
    retry            Retry a failed queue item
    list             List drafts
    show             Show a draft with its queue items and deliveries
    stats            Show queue statistics
    tick             Run one scheduler pass
    ledger           List delivery records
    reconcile        Check queue, drafts and ledger against each other
    refresh-metrics  Fetch engagement metrics for delivered posts

USAGE EXAMPLES:
    # Connect Bluesky with an app password
    echo \"$APP_PASSWORD\" | plex-queue connect bluesky --type api_key

    # Create and submit a draft for two platforms
    plex-queue create \"Launch day!\" -p mastodon,bluesky --submit

    # Schedule a draft that needs review
    echo \"Q3 results\" | plex-queue create -p linkedin --approval --at \"tomorrow 9am\" --submit

    # Review it
    plex-queue --user carol approve <DRAFT_ID>
    plex-queue --user carol reject <DRAFT_ID> --reason \"Numbers not final\"

    # Inspect the queue
    plex-queue list --status publishing
    plex-queue show <DRAFT_ID> --format json
    plex-queue stats

CONFIGURATION:
    Configuration file: ~/.config/plexcast/config.toml
    Database location: ~/.local/share/plexcast/plexcast.db

    Override with environment variables:
        PLEXCAST_CONFIG    - Path to config file
        PLEXCAST_DB_PATH   - Path to database file
        PLEXCAST_USER      - Acting user

EXIT CODES:
    0 - Success
    1 - Operation failed (or reconcile found inconsistencies)
    2 - Database or configuration error
    3 - Invalid input (validation, permission, unknown id, wrong state)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Acting user
    #[arg(short, long, global = true, env = "PLEXCAST_USER")]
    user: Option<String>,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,

    /// Log format (text, json, pretty)
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect a platform, reading the credential from stdin
    Connect {
        /// Platform to connect
        platform: String,

        /// Connection type: oauth or api_key
        #[arg(long = "type", default_value = "oauth")]
        connection_type: String,

        /// Granted scope (repeatable)
        #[arg(long = "scope")]
        scopes: Vec<String>,
    },

    /// Disconnect an integration
    Disconnect {
        integration_id: String,
    },

    /// List your integrations
    Integrations {
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Create a draft
    Create {
        /// Draft content (reads from stdin if not provided)
        content: Option<String>,

        /// Target platform(s) (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        platform: Vec<String>,

        /// Require approval before publishing
        #[arg(long)]
        approval: bool,

        /// Publish time (e.g., "tomorrow 3pm", "2h")
        #[arg(long, value_name = "TIME")]
        at: Option<String>,

        /// Lower numbers are dispatched first
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        priority: i32,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Submit right after creating
        #[arg(long)]
        submit: bool,

        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Submit a draft for publishing
    Submit {
        draft_id: String,
    },

    /// Approve a pending draft
    Approve {
        draft_id: String,
    },

    /// Reject a pending draft
    Reject {
        draft_id: String,

        /// Shown to the author
        #[arg(short, long)]
        reason: String,
    },

    /// Cancel a draft, or a single queue item with --item
    Cancel {
        id: String,

        /// Treat ID as a queue item ID
        #[arg(long)]
        item: bool,
    },

    /// Retry a failed queue item
    Retry {
        item_id: String,
    },

    /// List drafts
    List {
        /// Filter by draft status
        #[arg(short, long)]
        status: Option<String>,

        /// Include drafts of every user
        #[arg(long)]
        all: bool,

        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Show a draft with its queue items and deliveries
    Show {
        draft_id: String,

        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Show queue statistics
    Stats {
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Run one scheduler pass
    Tick {
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// List delivery records, newest first
    Ledger {
        #[arg(long)]
        draft: Option<String>,

        #[arg(short, long)]
        platform: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(short, long, default_value = "text", value_parser = ["text", "json", "jsonl"])]
        format: String,
    },

    /// Check queue, drafts and ledger against each other
    Reconcile {
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Fetch engagement metrics for delivered posts
    RefreshMetrics {
        #[arg(long)]
        draft: Option<String>,

        #[arg(short, long)]
        platform: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_format = cli
        .log_format
        .as_deref()
        .and_then(|f| LogFormat::from_str(f).ok());
    LoggingConfig::from_env(log_format, cli.verbose, "error").init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load()?;
    let service = PlexcastService::from_config(config).await?;
    let actor = resolve_actor(&service, cli.user.as_deref())?;
    debug!(
        "Acting as {} (approver: {})",
        actor.user_id, actor.can_approve
    );

    match cli.command {
        Commands::Connect {
            platform,
            connection_type,
            scopes,
        } => cmd_connect(&service, &actor, &platform, &connection_type, scopes).await?,
        Commands::Disconnect { integration_id } => {
            let integration = service
                .integrations()
                .disconnect(&integration_id, &actor, Utc::now())
                .await?;
            println!("Disconnected {} ({})", integration.id, integration.platform);
        }
        Commands::Integrations { format } => cmd_integrations(&service, &actor, &format).await?,
        Commands::Create {
            content,
            platform,
            approval,
            at,
            priority,
            tags,
            submit,
            format,
        } => {
            let new = NewDraft {
                content: read_content(content)?,
                platforms: parse_platforms(&platform)?,
                requires_approval: approval,
                scheduled_at: at.map(|s| parse_schedule(&s, Utc::now())).transpose()?,
                priority,
                tags,
                ..Default::default()
            };
            cmd_create(&service, &actor, new, submit, &format).await?
        }
        Commands::Submit { draft_id } => {
            let (draft, _) = service.drafts().submit(&draft_id, &actor, Utc::now()).await?;
            println!("{} {}", draft.id, draft.status);
        }
        Commands::Approve { draft_id } => {
            let draft = service.approve(Approve { draft_id, actor }).await?;
            println!("{} {}", draft.id, draft.status);
        }
        Commands::Reject { draft_id, reason } => {
            let draft = service
                .reject(Reject {
                    draft_id,
                    actor,
                    reason,
                })
                .await?;
            println!("{} {}", draft.id, draft.status);
        }
        Commands::Cancel { id, item } => {
            let target = if item {
                CancelTarget::QueueItem(id)
            } else {
                CancelTarget::Draft(id)
            };
            service.cancel(&target, &actor).await?;
            match target {
                CancelTarget::Draft(id) => println!("Cancelled draft {}", id),
                CancelTarget::QueueItem(id) => println!("Cancelled queue item {}", id),
            }
        }
        Commands::Retry { item_id } => {
            let item = service.retry(&item_id, &actor).await?;
            println!("{} {} {}", item.id, item.platform, item.status);
        }
        Commands::List {
            status,
            all,
            limit,
            format,
        } => {
            let filter = DraftFilter {
                owner_id: if all { None } else { Some(actor.user_id.clone()) },
                status: status.as_deref().map(parse_status).transpose()?,
                limit: Some(limit),
            };
            cmd_list(&service, &filter, &format).await?
        }
        Commands::Show { draft_id, format } => cmd_show(&service, &draft_id, &format).await?,
        Commands::Stats { format } => cmd_stats(&service, &format).await?,
        Commands::Tick { format } => {
            let report = service.tick().await?;
            if format == "json" {
                print_json(&report)?;
            } else {
                println!(
                    "promoted={} dispatched={} completed={} retried={} failed={} discarded={} finalized={}",
                    report.promoted,
                    report.dispatched,
                    report.completed,
                    report.retried,
                    report.failed,
                    report.discarded,
                    report.finalized
                );
                if report.errors > 0 {
                    eprintln!("Warning: {} dispatch(es) hit a storage error", report.errors);
                }
            }
        }
        Commands::Ledger {
            draft,
            platform,
            limit,
            format,
        } => {
            let filter = LedgerFilter {
                draft_id: draft,
                platform: platform.as_deref().map(parse_platform).transpose()?,
                limit: Some(limit),
            };
            cmd_ledger(&service, &filter, &format).await?
        }
        Commands::Reconcile { format } => return cmd_reconcile(&service, &format).await,
        Commands::RefreshMetrics { draft, platform } => {
            let filter = LedgerFilter {
                draft_id: draft,
                platform: platform.as_deref().map(parse_platform).transpose()?,
                limit: None,
            };
            let report = service.ledger().refresh_metrics(&filter, Utc::now()).await?;
            println!(
                "updated={} skipped={} failed={}",
                report.updated, report.skipped, report.failed
            );
        }
    }

    Ok(0)
}

fn resolve_actor(service: &PlexcastService, user: Option<&str>) -> Result<Actor> {
    let user = user
        .map(str::to_string)
        .or_else(|| std::env::var("USER").ok())
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| {
            PlexcastError::Validation("No user given: pass --user or set PLEXCAST_USER".to_string())
        })?;
    Ok(service.actor(user.trim()))
}

/// Content from the argument, or stdin when piped
fn read_content(content: Option<String>) -> Result<String> {
    if let Some(content) = content {
        return Ok(content);
    }
    if std::io::stdin().is_terminal() {
        return Err(PlexcastError::Validation(
            "No content provided. Pass it as an argument or pipe it to stdin".to_string(),
        ));
    }
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .map_err(|e| PlexcastError::Validation(format!("Failed to read stdin: {}", e)))?;
    Ok(buffer.trim_end().to_string())
}

fn parse_platform(value: &str) -> Result<PlatformId> {
    PlatformId::from_str(value.trim()).map_err(PlexcastError::Validation)
}

fn parse_platforms(values: &[String]) -> Result<Vec<PlatformId>> {
    values.iter().map(|v| parse_platform(v)).collect()
}

fn parse_status(value: &str) -> Result<DraftStatus> {
    DraftStatus::from_str(value).map_err(PlexcastError::Validation)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PlexcastError::Validation(format!("Failed to encode output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Truncate content to max chars with ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    let first_line = content.lines().next().unwrap_or_default();
    if first_line.chars().count() <= max_chars {
        first_line.to_string()
    } else {
        let truncated: String = first_line.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

async fn cmd_connect(
    service: &PlexcastService,
    actor: &Actor,
    platform: &str,
    connection_type: &str,
    scopes: Vec<String>,
) -> Result<()> {
    let platform = parse_platform(platform)?;
    let connection_type =
        ConnectionType::from_str(connection_type).map_err(PlexcastError::Validation)?;

    if std::io::stdin().is_terminal() {
        return Err(PlexcastError::Validation(
            "Pipe the credential to stdin, e.g. echo \"$TOKEN\" | plex-queue connect ..."
                .to_string(),
        ));
    }
    let mut credential = String::new();
    std::io::stdin()
        .read_to_string(&mut credential)
        .map_err(|e| PlexcastError::Validation(format!("Failed to read stdin: {}", e)))?;

    let integration = service
        .integrations()
        .connect(
            ConnectRequest {
                user_id: actor.user_id.clone(),
                platform,
                connection_type,
                credentials: SecretString::from(credential.trim().to_string()),
                scopes,
            },
            Utc::now(),
        )
        .await?;

    println!("Connected {} as {}", integration.platform, integration.id);
    Ok(())
}

async fn cmd_integrations(service: &PlexcastService, actor: &Actor, format: &str) -> Result<()> {
    let integrations = service.integrations().list(&actor.user_id).await?;

    if format == "json" {
        return print_json(&integrations);
    }

    for integration in integrations {
        let detail = integration.error_message.as_deref().unwrap_or_default();
        println!(
            "{} | {} | {} | {} {}",
            integration.id,
            integration.platform,
            integration.connection_type,
            integration.status,
            detail
        );
    }
    Ok(())
}

async fn cmd_create(
    service: &PlexcastService,
    actor: &Actor,
    new: NewDraft,
    submit: bool,
    format: &str,
) -> Result<()> {
    let now = Utc::now();
    let mut draft = service.drafts().create(new, actor, now).await?;
    if submit {
        let (submitted, _) = service.drafts().submit(&draft.id, actor, now).await?;
        draft = submitted;
    }

    if format == "json" {
        print_json(&draft)
    } else {
        println!("{} {}", draft.id, draft.status);
        Ok(())
    }
}

async fn cmd_list(service: &PlexcastService, filter: &DraftFilter, format: &str) -> Result<()> {
    let drafts = service.drafts().list(filter).await?;

    if format == "json" {
        return print_json(&drafts);
    }

    for draft in drafts {
        let platforms: Vec<_> = draft.platforms.iter().map(|p| p.as_str()).collect();
        let when = draft
            .scheduled_at
            .map(format_time)
            .unwrap_or_else(|| "now".to_string());
        println!(
            "{} | {} | {} | {} | {}",
            draft.id,
            draft.status,
            platforms.join(","),
            when,
            truncate_content(&draft.content, 50)
        );
    }
    Ok(())
}

async fn cmd_show(service: &PlexcastService, draft_id: &str, format: &str) -> Result<()> {
    let draft = service.drafts().get(draft_id).await?;
    let items = service
        .store()
        .list_items(&ItemFilter {
            draft_id: Some(draft.id.clone()),
            ..Default::default()
        })
        .await?;
    let records = service.ledger().records_for_draft(&draft.id).await?;

    if format == "json" {
        return print_json(&serde_json::json!({
            "draft": draft,
            "items": items,
            "published": records,
        }));
    }

    println!("Draft:    {}", draft.id);
    println!("Owner:    {}", draft.owner_id);
    println!("Status:   {}", draft.status);
    if let Some(reason) = &draft.rejection_reason {
        println!("Rejected: {}", reason);
    }
    if let Some(approved_by) = &draft.approved_by {
        println!("Approved: {}", approved_by);
    }
    if let Some(at) = draft.scheduled_at {
        println!("Schedule: {}", format_time(at));
    }
    println!("Content:  {}", truncate_content(&draft.content, 60));
    println!();

    for item in &items {
        let symbol = match item.status {
            libplexcast::QueueStatus::Completed => "✓",
            libplexcast::QueueStatus::Failed => "✗",
            libplexcast::QueueStatus::Cancelled => "-",
            _ => "·",
        };
        print!(
            "  {} {} {} (attempts: {}/{})",
            symbol,
            item.platform,
            item.id,
            item.retry_count,
            item.max_retries
        );
        if let Some(next) = item.next_retry_at {
            print!(" next retry {}", format_time(next));
        }
        if let Some(error) = &item.last_error {
            print!(": {}", error);
        }
        println!();
    }

    for record in &records {
        let link = record
            .permalink
            .as_deref()
            .unwrap_or(&record.platform_post_id);
        println!(
            "  → {} {} at {}",
            record.platform,
            link,
            format_time(record.published_at)
        );
    }
    Ok(())
}

async fn cmd_stats(service: &PlexcastService, format: &str) -> Result<()> {
    let stats = service.scheduler().stats(Utc::now()).await?;

    if format == "json" {
        return print_json(&stats);
    }

    println!("Pending:       {}", stats.pending);
    println!("  due now:     {}", stats.due_now);
    println!("  in backoff:  {}", stats.waiting_retry);
    println!("Processing:    {}", stats.processing);
    println!("Completed:     {}", stats.completed);
    println!("Failed:        {}", stats.failed);
    println!("Cancelled:     {}", stats.cancelled);
    Ok(())
}

async fn cmd_ledger(service: &PlexcastService, filter: &LedgerFilter, format: &str) -> Result<()> {
    let records = service.ledger().list(filter).await?;

    match format {
        "json" => print_json(&records),
        "jsonl" => {
            for record in &records {
                let line = serde_json::to_string(record).map_err(|e| {
                    PlexcastError::Validation(format!("Failed to encode output: {}", e))
                })?;
                println!("{}", line);
            }
            Ok(())
        }
        _ => {
            for record in &records {
                println!(
                    "{} | {} | {} | {} | {}",
                    format_time(record.published_at),
                    record.draft_id,
                    record.platform,
                    record.platform_post_id,
                    truncate_content(&record.content_snapshot, 40)
                );
            }
            Ok(())
        }
    }
}

async fn cmd_reconcile(service: &PlexcastService, format: &str) -> Result<i32> {
    let report = service
        .ledger()
        .reconcile(service.config().scheduler.aggregate_policy)
        .await?;

    if format == "json" {
        print_json(&report)?;
    } else if report.is_clean() {
        println!("Queue, drafts and ledger are consistent");
    } else {
        for id in &report.missing_records {
            println!("missing ledger record for completed item {}", id);
        }
        for id in &report.orphaned_records {
            println!("ledger record {} has no completed item", id);
        }
        for mismatch in &report.status_mismatches {
            println!(
                "draft {} is {}, items say {}",
                mismatch.draft_id, mismatch.stored, mismatch.expected
            );
        }
    }

    Ok(if report.is_clean() { 0 } else { 1 })
}
