//! Service layer for Plexcast
//!
//! A single facade over the publishing pipeline, consumed by the CLI tools
//! and by embedding applications.
//!
//! # Architecture
//!
//! `PlexcastService` is the entry point and coordinates the sub-services,
//! which all share one [`Store`] and one [`EventBus`]:
//!
//! - `IntegrationRegistry`: platform connections per user
//! - `DraftService`: compose, edit and submit drafts
//! - `ApprovalService`: approve or reject submitted drafts
//! - `PublishScheduler`: fan-out, dispatch, retry and cancellation
//! - `PublishLedger`: delivery records, metrics and reconciliation
//! - `ValidationService`: content checks against platform capabilities
//!
//! # Example
//!
//! ```no_run
//! use libplexcast::service::PlexcastService;
//! use libplexcast::service::drafts::NewDraft;
//! use libplexcast::platforms::PlatformId;
//!
//! # async fn example() -> libplexcast::Result<()> {
//! let service = PlexcastService::new().await?;
//! let actor = service.actor("alice");
//!
//! let draft_id = service
//!     .submit_draft(
//!         NewDraft {
//!             content: "Launch day!".to_string(),
//!             platforms: vec![PlatformId::Mastodon, PlatformId::Bluesky],
//!             ..Default::default()
//!         },
//!         &actor,
//!     )
//!     .await?;
//!
//! let report = service.tick().await?;
//! println!("{}: {} items dispatched", draft_id, report.dispatched);
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod drafts;
pub mod events;
pub mod validation;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use self::approval::ApprovalService;
use self::drafts::{DraftService, NewDraft};
use self::events::{EventBus, EventReceiver};
use self::validation::ValidationService;
use crate::approval::{Approve, Reject};
use crate::config::Config;
use crate::db::Database;
use crate::error::{ConfigError, Result};
use crate::integrations::IntegrationRegistry;
use crate::ledger::PublishLedger;
use crate::platforms::command::CommandPublisher;
use crate::platforms::PublisherRegistry;
use crate::scheduler::{CancelTarget, PublishScheduler, TickReport};
use crate::store::Store;
use crate::types::{Actor, PublishQueueItem, SocialDraft};

/// Main service facade that coordinates all sub-services
///
/// # Shared State
///
/// All sub-services share the same `Arc<dyn Store>`, publisher registry and
/// event bus; cloning a sub-service is cheap.
pub struct PlexcastService {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    integrations: IntegrationRegistry,
    drafts: DraftService,
    approval: ApprovalService,
    scheduler: PublishScheduler,
    ledger: PublishLedger,
    validation: ValidationService,
    event_bus: EventBus,
}

impl PlexcastService {
    /// Create a service from the default configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration cannot be loaded
    /// - Database cannot be initialized
    /// - Database migrations fail
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Create a service backed by the SQLite database named in `config`
    ///
    /// A [`CommandPublisher`] is registered for every platform with a
    /// `publish_command`.
    pub async fn from_config(config: Config) -> Result<Self> {
        let db_path = config.database_path()?;
        let db_path_str = db_path.to_str().ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "database.path".to_string(),
                message: "path is not valid UTF-8".to_string(),
            }
        })?;
        let db = Database::new(db_path_str).await?;

        let mut publishers = PublisherRegistry::new();
        for (platform, command_line) in config.publish_commands() {
            if let Some(publisher) = CommandPublisher::from_command_line(platform, command_line) {
                info!("Publishing to {} through {}", platform, command_line);
                publishers.register(Arc::new(publisher));
            }
        }

        Ok(Self::with_store(config, Arc::new(db), publishers))
    }

    /// Create a service over any store and publisher set
    pub fn with_store(config: Config, store: Arc<dyn Store>, publishers: PublisherRegistry) -> Self {
        let config = Arc::new(config);
        let event_bus = EventBus::new(100);

        let integrations =
            IntegrationRegistry::new(Arc::clone(&store), publishers.clone(), event_bus.clone());
        let scheduler = PublishScheduler::new(
            Arc::clone(&store),
            publishers.clone(),
            integrations.clone(),
            config.scheduler_settings(),
            event_bus.clone(),
        );
        let drafts = DraftService::new(
            Arc::clone(&store),
            scheduler.clone(),
            integrations.clone(),
            event_bus.clone(),
        );
        let approval = ApprovalService::new(
            Arc::clone(&store),
            scheduler.clone(),
            integrations.clone(),
            event_bus.clone(),
        );
        let ledger = PublishLedger::new(Arc::clone(&store), publishers);

        Self {
            config,
            store,
            integrations,
            drafts,
            approval,
            scheduler,
            ledger,
            validation: ValidationService::new(),
            event_bus,
        }
    }

    /// Actor for `user_id`, with approval rights taken from the config
    pub fn actor(&self, user_id: &str) -> Actor {
        if self.config.approval.is_approver(user_id) {
            Actor::approver(user_id)
        } else {
            Actor::user(user_id)
        }
    }

    /// Create and submit a draft in one step, returning its id
    pub async fn submit_draft(&self, new: NewDraft, actor: &Actor) -> Result<String> {
        let now = Utc::now();
        let draft = self.drafts.create(new, actor, now).await?;
        self.drafts.submit(&draft.id, actor, now).await?;
        Ok(draft.id)
    }

    pub async fn approve(&self, command: Approve) -> Result<SocialDraft> {
        self.approval.approve(command, Utc::now()).await
    }

    pub async fn reject(&self, command: Reject) -> Result<SocialDraft> {
        self.approval.reject(command, Utc::now()).await
    }

    pub async fn cancel(&self, target: &CancelTarget, actor: &Actor) -> Result<()> {
        self.scheduler.cancel(target, actor, Utc::now()).await
    }

    /// Manually retry a failed queue item
    pub async fn retry(&self, queue_item_id: &str, actor: &Actor) -> Result<PublishQueueItem> {
        self.scheduler.retry(queue_item_id, actor, Utc::now()).await
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.scheduler.tick().await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        self.scheduler.tick_at(now).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn integrations(&self) -> &IntegrationRegistry {
        &self.integrations
    }

    pub fn drafts(&self) -> &DraftService {
        &self.drafts
    }

    pub fn approval(&self) -> &ApprovalService {
        &self.approval
    }

    pub fn scheduler(&self) -> &PublishScheduler {
        &self.scheduler
    }

    pub fn ledger(&self) -> &PublishLedger {
        &self.ledger
    }

    pub fn validation(&self) -> &ValidationService {
        &self.validation
    }

    /// Subscribe to pipeline events
    ///
    /// Multiple subscribers are supported; events emitted before the call
    /// are not replayed.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }
}
