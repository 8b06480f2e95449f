//! Mock publisher for testing
//!
//! A scriptable [`Publisher`] that can simulate successes, transient and
//! permanent failures, latency, and calls held in flight. It's designed for
//! integration tests of the scheduler without platform credentials or network
//! access.

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;

use crate::error::PublishError;
use crate::platforms::{PlatformId, PublishReceipt, PublishRequest, Publisher};
use crate::types::EngagementMetrics;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for holding a publish call in flight until the test releases it
#[derive(Clone, Default)]
pub struct MockGate {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl MockGate {
    /// Wait until a publish call has entered the gate
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Let one held publish call finish
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Mock publisher for testing
pub struct MockPublisher {
    platform: PlatformId,
    /// Outcomes consumed one per call; `fallback` applies once exhausted
    script: Mutex<VecDeque<Result<(), PublishError>>>,
    fallback: Result<(), PublishError>,
    delay: Duration,
    gate: Option<MockGate>,
    credential_error: Option<PublishError>,
    metrics: Option<EngagementMetrics>,
    call_count: AtomicUsize,
    published: Mutex<Vec<String>>,
}

impl MockPublisher {
    fn base(platform: PlatformId, fallback: Result<(), PublishError>) -> Self {
        Self {
            platform,
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            gate: None,
            credential_error: None,
            metrics: None,
            call_count: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    /// A publisher that always succeeds
    pub fn success(platform: PlatformId) -> Self {
        Self::base(platform, Ok(()))
    }

    /// A publisher that always fails with `error`
    pub fn failing(platform: PlatformId, error: PublishError) -> Self {
        Self::base(platform, Err(error))
    }

    /// A publisher that plays `outcomes` in order, then succeeds
    pub fn scripted(platform: PlatformId, outcomes: Vec<Result<(), PublishError>>) -> Self {
        let publisher = Self::base(platform, Ok(()));
        *lock(&publisher.script) = outcomes.into();
        publisher
    }

    /// A publisher whose calls block until the returned gate releases them
    pub fn held(platform: PlatformId) -> (Self, MockGate) {
        let gate = MockGate::default();
        let mut publisher = Self::base(platform, Ok(()));
        publisher.gate = Some(gate.clone());
        (publisher, gate)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make `verify_credentials` fail with `error`
    pub fn rejecting_credentials(mut self, error: PublishError) -> Self {
        self.credential_error = Some(error);
        self
    }

    /// Report `metrics` from `fetch_metrics`
    pub fn with_metrics(mut self, metrics: EngagementMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Number of times publish was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Content of every successful publish, in call order
    pub fn published_content(&self) -> Vec<String> {
        lock(&self.published).clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    async fn publish(&self, request: PublishRequest<'_>) -> Result<PublishReceipt, PublishError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let outcome = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        outcome?;

        lock(&self.published).push(request.content.to_string());

        let remote_post_id = format!("{}-mock-{}", self.platform, call);
        let permalink = format!("https://{}.example/posts/{}", self.platform, remote_post_id);
        Ok(PublishReceipt::new(remote_post_id).with_permalink(permalink))
    }

    async fn verify_credentials(&self, _credentials: &SecretString) -> Result<(), PublishError> {
        match &self.credential_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn fetch_metrics(
        &self,
        _remote_post_id: &str,
        _credentials: &SecretString,
    ) -> Result<EngagementMetrics, PublishError> {
        self.metrics.clone().ok_or_else(|| {
            PublishError::NotSupported(format!("{} mock has no metrics", self.platform))
        })
    }
}
