//! Integration registry
//!
//! Tracks each user's connection to each platform. A (user, platform) pair
//! has at most one integration that is not `disconnected`; reconnecting an
//! expired or disconnected integration retires the old row and creates a new
//! one, so history is never rewritten.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::error::{PlexcastError, Result};
use crate::platforms::{capabilities, PlatformId, PublisherRegistry};
use crate::service::events::{Event, EventBus};
use crate::store::Store;
use crate::types::{Actor, ConnectionType, IntegrationStatus, SocialIntegration};

/// Parameters of a connect attempt
#[derive(Debug)]
pub struct ConnectRequest {
    pub user_id: String,
    pub platform: PlatformId,
    pub connection_type: ConnectionType,
    pub credentials: SecretString,
    pub scopes: Vec<String>,
}

#[derive(Clone)]
pub struct IntegrationRegistry {
    store: Arc<dyn Store>,
    publishers: PublisherRegistry,
    events: EventBus,
}

impl IntegrationRegistry {
    pub fn new(store: Arc<dyn Store>, publishers: PublisherRegistry, events: EventBus) -> Self {
        Self {
            store,
            publishers,
            events,
        }
    }

    /// Connect a platform for a user
    ///
    /// # Errors
    ///
    /// - `Connection` if the platform does not support the connection type,
    ///   the credential is empty, or the platform's publisher rejects it
    /// - `DuplicateConnection` if a pending, connected or errored
    ///   integration already exists for the pair
    pub async fn connect(
        &self,
        request: ConnectRequest,
        now: DateTime<Utc>,
    ) -> Result<SocialIntegration> {
        let caps = capabilities(request.platform);
        if !caps.supports_connection(request.connection_type) {
            return Err(PlexcastError::Connection(format!(
                "{} does not support {} connections",
                caps.display_name, request.connection_type
            )));
        }

        if request.credentials.expose_secret().trim().is_empty() {
            return Err(PlexcastError::Connection(format!(
                "Empty credentials for {}",
                caps.display_name
            )));
        }

        let existing = self
            .store
            .active_integration(&request.user_id, request.platform)
            .await?;

        if let Some(existing) = &existing {
            if existing.status.blocks_new_connection() {
                return Err(PlexcastError::DuplicateConnection(format!(
                    "{} already has a {} integration ({}) for {}",
                    request.user_id, existing.status, existing.id, request.platform
                )));
            }
        }

        if let Some(publisher) = self.publishers.get(request.platform) {
            publisher
                .verify_credentials(&request.credentials)
                .await
                .map_err(|e| {
                    PlexcastError::Connection(format!(
                        "{} rejected the credentials: {}",
                        caps.display_name, e
                    ))
                })?;
        }

        let integration = SocialIntegration::new(
            request.user_id,
            request.platform,
            request.connection_type,
            request.scopes,
            now,
        );

        match existing {
            Some(old) => {
                self.store
                    .replace_integration(&old.id, &integration, &request.credentials)
                    .await?;
                info!(
                    "Reconnected {} for {} ({} replaces {})",
                    integration.platform, integration.user_id, integration.id, old.id
                );
            }
            None => {
                self.store
                    .insert_integration(&integration, &request.credentials)
                    .await?;
                info!(
                    "Connected {} for {} ({})",
                    integration.platform, integration.user_id, integration.id
                );
            }
        }

        Ok(integration)
    }

    /// Mark an integration expired after a credential failure
    ///
    /// Only a connected integration changes; returns whether it did.
    pub async fn mark_expired(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut integration = self.require(id).await?;
        if integration.status != IntegrationStatus::Connected {
            return Ok(false);
        }

        integration.status = IntegrationStatus::Expired;
        integration.error_message = Some(reason.to_string());
        integration.updated_at = now;
        if !self
            .store
            .update_integration_if(&integration, IntegrationStatus::Connected)
            .await?
        {
            return Ok(false);
        }

        warn!(
            "{} integration {} expired: {}",
            integration.platform, integration.id, reason
        );
        self.events.emit(Event::IntegrationExpired {
            integration_id: integration.id.clone(),
            platform: integration.platform,
        });
        Ok(true)
    }

    pub async fn mark_error(&self, id: &str, message: &str, now: DateTime<Utc>) -> Result<()> {
        let mut integration = self.require(id).await?;
        if integration.status == IntegrationStatus::Disconnected {
            return Err(PlexcastError::InvalidState(format!(
                "Integration {} is disconnected",
                id
            )));
        }

        let from = integration.status;
        integration.status = IntegrationStatus::Error;
        integration.error_message = Some(message.to_string());
        integration.updated_at = now;
        if !self.store.update_integration_if(&integration, from).await? {
            return Err(PlexcastError::InvalidState(format!(
                "Integration {} changed while recording an error",
                id
            )));
        }
        Ok(())
    }

    /// Revoke an integration on behalf of its owner
    pub async fn disconnect(
        &self,
        id: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<SocialIntegration> {
        let mut integration = self.require(id).await?;
        if integration.user_id != actor.user_id {
            return Err(PlexcastError::Permission(format!(
                "{} does not own integration {}",
                actor.user_id, id
            )));
        }
        if integration.status == IntegrationStatus::Disconnected {
            return Err(PlexcastError::InvalidState(format!(
                "Integration {} is already disconnected",
                id
            )));
        }

        let from = integration.status;
        integration.status = IntegrationStatus::Disconnected;
        integration.updated_at = now;
        if !self.store.update_integration_if(&integration, from).await? {
            return Err(PlexcastError::InvalidState(format!(
                "Integration {} changed while disconnecting",
                id
            )));
        }
        info!("Disconnected {} integration {}", integration.platform, id);
        Ok(integration)
    }

    pub async fn get(&self, id: &str) -> Result<Option<SocialIntegration>> {
        self.store.get_integration(id).await
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<SocialIntegration>> {
        self.store.list_integrations(user_id).await
    }

    /// The integration that is not disconnected for (user, platform)
    pub async fn active(
        &self,
        user_id: &str,
        platform: PlatformId,
    ) -> Result<Option<SocialIntegration>> {
        self.store.active_integration(user_id, platform).await
    }

    pub async fn credentials(&self, id: &str) -> Result<SecretString> {
        self.store
            .integration_credentials(id)
            .await?
            .ok_or_else(|| PlexcastError::NotFound(format!("Credentials for integration {}", id)))
    }

    async fn require(&self, id: &str) -> Result<SocialIntegration> {
        self.store
            .get_integration(id)
            .await?
            .ok_or_else(|| PlexcastError::NotFound(format!("Integration {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::platforms::mock::MockPublisher;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, minute, 0).unwrap()
    }

    fn registry(publishers: PublisherRegistry) -> IntegrationRegistry {
        IntegrationRegistry::new(Arc::new(MemoryStore::new()), publishers, EventBus::default())
    }

    fn request(platform: PlatformId, connection_type: ConnectionType, secret: &str) -> ConnectRequest {
        ConnectRequest {
            user_id: "alice".to_string(),
            platform,
            connection_type,
            credentials: SecretString::from(secret),
            scopes: vec!["publish".to_string()],
        }
    }

    #[tokio::test]
    async fn test_connect_creates_connected_integration() {
        let registry = registry(PublisherRegistry::new());
        let integration = registry
            .connect(request(PlatformId::Twitter, ConnectionType::OAuth, "tok"), at(0))
            .await
            .unwrap();

        assert_eq!(integration.status, IntegrationStatus::Connected);
        assert_eq!(integration.connected_at, at(0));
        assert_eq!(
            registry.credentials(&integration.id).await.unwrap().expose_secret(),
            "tok"
        );
    }

    #[tokio::test]
    async fn test_unsupported_connection_type() {
        let registry = registry(PublisherRegistry::new());
        let result = registry
            .connect(request(PlatformId::Bluesky, ConnectionType::OAuth, "tok"), at(0))
            .await;
        match result {
            Err(PlexcastError::Connection(msg)) => assert!(msg.contains("Bluesky")),
            other => panic!("Expected Connection error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_credentials_rejected() {
        let registry = registry(PublisherRegistry::new());
        let result = registry
            .connect(request(PlatformId::Mastodon, ConnectionType::ApiKey, "  "), at(0))
            .await;
        assert!(matches!(result, Err(PlexcastError::Connection(_))));
    }

    #[tokio::test]
    async fn test_verifier_rejection_is_connection_error() {
        let publishers = PublisherRegistry::new().with(Arc::new(
            MockPublisher::success(PlatformId::Mastodon)
                .rejecting_credentials(PublishError::Authentication("bad token".into())),
        ));
        let registry = registry(publishers);

        let result = registry
            .connect(request(PlatformId::Mastodon, ConnectionType::ApiKey, "tok"), at(0))
            .await;
        match result {
            Err(PlexcastError::Connection(msg)) => assert!(msg.contains("bad token")),
            other => panic!("Expected Connection error, got {:?}", other),
        }
        assert!(registry.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_connection_while_connected() {
        let registry = registry(PublisherRegistry::new());
        registry
            .connect(request(PlatformId::Twitter, ConnectionType::OAuth, "tok"), at(0))
            .await
            .unwrap();

        let result = registry
            .connect(request(PlatformId::Twitter, ConnectionType::OAuth, "tok2"), at(1))
            .await;
        assert!(matches!(result, Err(PlexcastError::DuplicateConnection(_))));
    }

    #[tokio::test]
    async fn test_duplicate_connection_while_in_error() {
        let registry = registry(PublisherRegistry::new());
        let first = registry
            .connect(request(PlatformId::Twitter, ConnectionType::OAuth, "tok"), at(0))
            .await
            .unwrap();
        registry.mark_error(&first.id, "refresh failed", at(1)).await.unwrap();

        let result = registry
            .connect(request(PlatformId::Twitter, ConnectionType::OAuth, "tok2"), at(2))
            .await;
        assert!(matches!(result, Err(PlexcastError::DuplicateConnection(_))));
    }

    #[tokio::test]
    async fn test_expired_integration_is_replaced() {
        let registry = registry(PublisherRegistry::new());
        let first = registry
            .connect(request(PlatformId::LinkedIn, ConnectionType::OAuth, "old"), at(0))
            .await
            .unwrap();
        assert!(registry.mark_expired(&first.id, "token revoked", at(1)).await.unwrap());
        // Already expired: nothing changes
        assert!(!registry.mark_expired(&first.id, "again", at(2)).await.unwrap());

        let second = registry
            .connect(request(PlatformId::LinkedIn, ConnectionType::OAuth, "new"), at(3))
            .await
            .unwrap();

        let old = registry.get(&first.id).await.unwrap().unwrap();
        assert_eq!(old.status, IntegrationStatus::Disconnected);
        assert_eq!(old.error_message.as_deref(), Some("token revoked"));

        let active = registry
            .active("alice", PlatformId::LinkedIn)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);
        assert!(active.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_requires_owner_and_allows_reconnect() {
        let registry = registry(PublisherRegistry::new());
        let first = registry
            .connect(request(PlatformId::Threads, ConnectionType::OAuth, "tok"), at(0))
            .await
            .unwrap();

        let result = registry.disconnect(&first.id, &Actor::user("mallory"), at(1)).await;
        assert!(matches!(result, Err(PlexcastError::Permission(_))));

        registry
            .disconnect(&first.id, &Actor::user("alice"), at(1))
            .await
            .unwrap();
        assert!(registry
            .active("alice", PlatformId::Threads)
            .await
            .unwrap()
            .is_none());

        let again = registry.disconnect(&first.id, &Actor::user("alice"), at(2)).await;
        assert!(matches!(again, Err(PlexcastError::InvalidState(_))));

        registry
            .connect(request(PlatformId::Threads, ConnectionType::OAuth, "tok"), at(3))
            .await
            .unwrap();
        assert_eq!(registry.list("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_expired_emits_event() {
        let events = EventBus::new(10);
        let mut receiver = events.subscribe();
        let registry = IntegrationRegistry::new(
            Arc::new(MemoryStore::new()),
            PublisherRegistry::new(),
            events,
        );
        let integration = registry
            .connect(request(PlatformId::Facebook, ConnectionType::OAuth, "tok"), at(0))
            .await
            .unwrap();

        registry.mark_expired(&integration.id, "401", at(5)).await.unwrap();
        assert_eq!(
            receiver.recv().await.unwrap(),
            Event::IntegrationExpired {
                integration_id: integration.id.clone(),
                platform: PlatformId::Facebook,
            }
        );
    }
}
