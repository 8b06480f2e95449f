//! Plexcast - compose once, publish everywhere
//!
//! This library provides the social content publishing pipeline: drafts,
//! approval, per-platform integrations, a publish queue with retry and
//! backoff, and an append-only ledger of what was delivered.

pub mod approval;
pub mod config;
pub mod db;
pub mod error;
pub mod integrations;
pub mod ledger;
pub mod logging;
pub mod platforms;
pub mod retry;
pub mod scheduler;
pub mod scheduling;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{PlexcastError, PublishError, Result};
pub use platforms::{PlatformId, Publisher, PublisherRegistry};
pub use scheduler::{CancelTarget, PublishScheduler, SchedulerSettings, TickReport};
pub use service::PlexcastService;
pub use store::{MemoryStore, Store};
pub use types::{
    Actor, AggregatePolicy, DraftStatus, PublishQueueItem, QueueStatus, SocialDraft,
    SocialIntegration, SocialPublished,
};
