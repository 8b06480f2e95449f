//! Platform catalogue and the publisher abstraction
//!
//! The set of platforms is closed: each [`PlatformId`] maps to one static
//! [`PlatformCapabilities`] record. Delivery to a platform happens through a
//! [`Publisher`] implementation registered in a [`PublisherRegistry`].
//! Adding a platform means adding one enum variant, one capability record and
//! one publisher.
//!
//! # Examples
//!
//! ```
//! use libplexcast::platforms::{PlatformId, capabilities};
//!
//! let caps = capabilities(PlatformId::Bluesky);
//! assert_eq!(caps.character_limit, Some(300));
//! assert!(caps.supports_publish);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::PublishError;
use crate::types::{ConnectionType, EngagementMetrics, MediaAttachment};

pub mod command;

// Mock publisher is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Identifier of a supported social platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Twitter,
    LinkedIn,
    Facebook,
    Instagram,
    Threads,
    Mastodon,
    Bluesky,
    Youtube,
}

impl PlatformId {
    pub const ALL: [PlatformId; 8] = [
        PlatformId::Twitter,
        PlatformId::LinkedIn,
        PlatformId::Facebook,
        PlatformId::Instagram,
        PlatformId::Threads,
        PlatformId::Mastodon,
        PlatformId::Bluesky,
        PlatformId::Youtube,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Twitter => "twitter",
            PlatformId::LinkedIn => "linkedin",
            PlatformId::Facebook => "facebook",
            PlatformId::Instagram => "instagram",
            PlatformId::Threads => "threads",
            PlatformId::Mastodon => "mastodon",
            PlatformId::Bluesky => "bluesky",
            PlatformId::Youtube => "youtube",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "twitter" | "x" => Ok(PlatformId::Twitter),
            "linkedin" => Ok(PlatformId::LinkedIn),
            "facebook" => Ok(PlatformId::Facebook),
            "instagram" => Ok(PlatformId::Instagram),
            "threads" => Ok(PlatformId::Threads),
            "mastodon" => Ok(PlatformId::Mastodon),
            "bluesky" => Ok(PlatformId::Bluesky),
            "youtube" => Ok(PlatformId::Youtube),
            other => Err(format!(
                "Unknown platform: '{}'. Valid options: {}",
                other,
                PlatformId::ALL
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

/// Static description of what a platform supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCapabilities {
    pub platform: PlatformId,
    pub display_name: &'static str,
    pub connection_types: &'static [ConnectionType],
    pub supports_publish: bool,
    /// Maximum post length in Unicode scalar values, `None` if unbounded
    pub character_limit: Option<usize>,
    pub max_media: usize,
    pub requires_media: bool,
    pub default_max_retries: u32,
}

impl PlatformCapabilities {
    pub fn supports_connection(&self, connection_type: ConnectionType) -> bool {
        self.connection_types.contains(&connection_type)
    }
}

const OAUTH_ONLY: &[ConnectionType] = &[ConnectionType::OAuth];
const API_KEY_ONLY: &[ConnectionType] = &[ConnectionType::ApiKey];
const OAUTH_OR_API_KEY: &[ConnectionType] = &[ConnectionType::OAuth, ConnectionType::ApiKey];

static TWITTER: PlatformCapabilities = PlatformCapabilities {
    platform: PlatformId::Twitter,
    display_name: "X (Twitter)",
    connection_types: OAUTH_ONLY,
    supports_publish: true,
    character_limit: Some(280),
    max_media: 4,
    requires_media: false,
    default_max_retries: 3,
};

static LINKEDIN: PlatformCapabilities = PlatformCapabilities {
    platform: PlatformId::LinkedIn,
    display_name: "LinkedIn",
    connection_types: OAUTH_ONLY,
    supports_publish: true,
    character_limit: Some(3000),
    max_media: 9,
    requires_media: false,
    default_max_retries: 3,
};

static FACEBOOK: PlatformCapabilities = PlatformCapabilities {
    platform: PlatformId::Facebook,
    display_name: "Facebook",
    connection_types: OAUTH_ONLY,
    supports_publish: true,
    character_limit: Some(63206),
    max_media: 10,
    requires_media: false,
    default_max_retries: 3,
};

static INSTAGRAM: PlatformCapabilities = PlatformCapabilities {
    platform: PlatformId::Instagram,
    display_name: "Instagram",
    connection_types: OAUTH_ONLY,
    supports_publish: true,
    character_limit: Some(2200),
    max_media: 10,
    requires_media: true,
    default_max_retries: 3,
};

static THREADS: PlatformCapabilities = PlatformCapabilities {
    platform: PlatformId::Threads,
    display_name: "Threads",
    connection_types: OAUTH_ONLY,
    supports_publish: true,
    character_limit: Some(500),
    max_media: 10,
    requires_media: false,
    default_max_retries: 3,
};

static MASTODON: PlatformCapabilities = PlatformCapabilities {
    platform: PlatformId::Mastodon,
    display_name: "Mastodon",
    connection_types: OAUTH_OR_API_KEY,
    supports_publish: true,
    character_limit: Some(500),
    max_media: 4,
    requires_media: false,
    default_max_retries: 3,
};

static BLUESKY: PlatformCapabilities = PlatformCapabilities {
    platform: PlatformId::Bluesky,
    display_name: "Bluesky",
    connection_types: API_KEY_ONLY,
    supports_publish: true,
    character_limit: Some(300),
    max_media: 4,
    requires_media: false,
    default_max_retries: 3,
};

// Connected for analytics only; text posts cannot be published
static YOUTUBE: PlatformCapabilities = PlatformCapabilities {
    platform: PlatformId::Youtube,
    display_name: "YouTube",
    connection_types: OAUTH_ONLY,
    supports_publish: false,
    character_limit: Some(5000),
    max_media: 1,
    requires_media: true,
    default_max_retries: 3,
};

/// Capability record for a platform
pub fn capabilities(platform: PlatformId) -> &'static PlatformCapabilities {
    match platform {
        PlatformId::Twitter => &TWITTER,
        PlatformId::LinkedIn => &LINKEDIN,
        PlatformId::Facebook => &FACEBOOK,
        PlatformId::Instagram => &INSTAGRAM,
        PlatformId::Threads => &THREADS,
        PlatformId::Mastodon => &MASTODON,
        PlatformId::Bluesky => &BLUESKY,
        PlatformId::Youtube => &YOUTUBE,
    }
}

/// Everything a publisher needs to deliver one queue item
#[derive(Debug)]
pub struct PublishRequest<'a> {
    pub platform: PlatformId,
    pub draft_id: &'a str,
    /// Stable per queue item, usable as an idempotency key
    pub queue_item_id: &'a str,
    pub credentials: &'a SecretString,
    pub content: &'a str,
    pub media: &'a [MediaAttachment],
}

/// Remote identifiers returned by a successful publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub remote_post_id: String,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub metrics: Option<EngagementMetrics>,
}

impl PublishReceipt {
    pub fn new(remote_post_id: impl Into<String>) -> Self {
        Self {
            remote_post_id: remote_post_id.into(),
            permalink: None,
            metrics: None,
        }
    }

    pub fn with_permalink(mut self, permalink: impl Into<String>) -> Self {
        self.permalink = Some(permalink.into());
        self
    }
}

/// Delivery adapter for one platform
///
/// Implementations perform the network call for a single queue item and
/// classify failures through [`PublishError`]. They must not retry on their
/// own; the scheduler owns retry and backoff.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Platform this publisher delivers to
    fn platform(&self) -> PlatformId;

    /// Publish content to the platform
    ///
    /// # Errors
    ///
    /// Returns a [`PublishError`] whose variant determines whether the
    /// scheduler retries (`is_retryable`) or marks the integration expired
    /// (`is_credential_failure`).
    async fn publish(&self, request: PublishRequest<'_>) -> Result<PublishReceipt, PublishError>;

    /// Check credentials while connecting an integration
    ///
    /// The default accepts any credential.
    async fn verify_credentials(&self, _credentials: &SecretString) -> Result<(), PublishError> {
        Ok(())
    }

    /// Fetch current engagement metrics for a published post
    async fn fetch_metrics(
        &self,
        _remote_post_id: &str,
        _credentials: &SecretString,
    ) -> Result<EngagementMetrics, PublishError> {
        Err(PublishError::NotSupported(format!(
            "{} does not report metrics",
            self.platform()
        )))
    }
}

/// One publisher per platform
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<PlatformId, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher, replacing any previous one for the same platform
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.insert(publisher.platform(), publisher);
    }

    pub fn with(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.register(publisher);
        self
    }

    pub fn get(&self, platform: PlatformId) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<PlatformId> {
        let mut platforms: Vec<_> = self.publishers.keys().copied().collect();
        platforms.sort();
        platforms
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl fmt::Debug for PublisherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockPublisher;

    #[test]
    fn test_platform_round_trip_through_str() {
        for platform in PlatformId::ALL {
            assert_eq!(platform.as_str().parse::<PlatformId>().unwrap(), platform);
        }
    }

    #[test]
    fn test_platform_aliases_and_case() {
        assert_eq!("X".parse::<PlatformId>().unwrap(), PlatformId::Twitter);
        assert_eq!("LinkedIn".parse::<PlatformId>().unwrap(), PlatformId::LinkedIn);
    }

    #[test]
    fn test_unknown_platform_lists_options() {
        let err = "myspace".parse::<PlatformId>().unwrap_err();
        assert!(err.contains("Unknown platform: 'myspace'"));
        assert!(err.contains("bluesky"));
    }

    #[test]
    fn test_platform_serde_lowercase() {
        let json = serde_json::to_string(&PlatformId::LinkedIn).unwrap();
        assert_eq!(json, r#""linkedin""#);
    }

    #[test]
    fn test_every_platform_has_matching_capabilities() {
        for platform in PlatformId::ALL {
            let caps = capabilities(platform);
            assert_eq!(caps.platform, platform);
            assert!(!caps.connection_types.is_empty());
            assert!(caps.default_max_retries > 0);
        }
    }

    #[test]
    fn test_connection_type_support() {
        assert!(capabilities(PlatformId::Mastodon).supports_connection(ConnectionType::ApiKey));
        assert!(capabilities(PlatformId::Mastodon).supports_connection(ConnectionType::OAuth));
        assert!(!capabilities(PlatformId::Twitter).supports_connection(ConnectionType::ApiKey));
        assert!(!capabilities(PlatformId::Bluesky).supports_connection(ConnectionType::OAuth));
    }

    #[test]
    fn test_registry_replaces_per_platform() {
        let first = Arc::new(MockPublisher::success(PlatformId::Twitter));
        let second = Arc::new(MockPublisher::success(PlatformId::Twitter));
        let registry = PublisherRegistry::new()
            .with(first)
            .with(second.clone())
            .with(Arc::new(MockPublisher::success(PlatformId::Bluesky)));

        assert_eq!(
            registry.platforms(),
            vec![PlatformId::Twitter, PlatformId::Bluesky]
        );
        assert!(registry.get(PlatformId::LinkedIn).is_none());
        assert!(registry.get(PlatformId::Twitter).is_some());
    }
}
