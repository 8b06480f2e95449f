//! Content validation service
//!
//! Checks a draft's content and media against each target platform's
//! capability record, and checks that the owner can actually publish to
//! every target.

use crate::error::{PlexcastError, Result};
use crate::integrations::IntegrationRegistry;
use crate::platforms::{capabilities, PlatformId};
use crate::types::MediaAttachment;

/// Maximum content size in bytes (100KB)
const MAX_CONTENT_LENGTH: usize = 100 * 1024;

/// Share of the character limit above which a warning is raised
const NEAR_LIMIT_RATIO: f64 = 0.9;

/// Validates content against platform requirements
///
/// Checks:
/// - Empty or whitespace-only content
/// - Content size (MAX_CONTENT_LENGTH = 100KB)
/// - Platform character limits, counted in Unicode scalar values
/// - Media count, required media and publish support
///
/// # Example
///
/// ```
/// use libplexcast::platforms::PlatformId;
/// use libplexcast::service::validation::{ValidationRequest, ValidationService};
///
/// let request = ValidationRequest {
///     content: "Hello everyone".to_string(),
///     media: vec![],
///     platforms: vec![PlatformId::Mastodon, PlatformId::Bluesky],
/// };
///
/// let response = ValidationService::new().validate(&request);
/// assert!(response.valid);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ValidationService;

/// Content to validate and where it is going
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub content: String,
    pub media: Vec<MediaAttachment>,
    pub platforms: Vec<PlatformId>,
}

#[derive(Debug, Clone)]
pub struct ValidationResponse {
    /// Whether content is valid for all requested platforms
    pub valid: bool,
    /// Problems that apply to every platform
    pub errors: Vec<String>,
    pub results: Vec<PlatformValidation>,
}

impl ValidationResponse {
    /// Every error, prefixed with its platform where it has one
    pub fn messages(&self) -> Vec<String> {
        let mut messages = self.errors.clone();
        for result in &self.results {
            for error in &result.errors {
                messages.push(format!("{}: {}", result.platform, error));
            }
        }
        messages
    }
}

/// Validation result for a single platform
#[derive(Debug, Clone)]
pub struct PlatformValidation {
    pub platform: PlatformId,
    pub valid: bool,
    pub errors: Vec<String>,
    /// Non-blocking
    pub warnings: Vec<String>,
}

impl ValidationService {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, request: &ValidationRequest) -> ValidationResponse {
        let mut errors = Vec::new();

        if request.content.trim().is_empty() {
            errors.push("Content cannot be empty".to_string());
        }
        if request.content.len() > MAX_CONTENT_LENGTH {
            errors.push(format!(
                "Content is {} bytes, maximum is {} bytes",
                request.content.len(),
                MAX_CONTENT_LENGTH
            ));
        }
        if request.platforms.is_empty() {
            errors.push("At least one target platform is required".to_string());
        }

        let results: Vec<PlatformValidation> = request
            .platforms
            .iter()
            .map(|platform| self.validate_platform(*platform, request))
            .collect();

        ValidationResponse {
            valid: errors.is_empty() && results.iter().all(|r| r.valid),
            errors,
            results,
        }
    }

    fn validate_platform(&self, platform: PlatformId, request: &ValidationRequest) -> PlatformValidation {
        let caps = capabilities(platform);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !caps.supports_publish {
            errors.push(format!("{} does not support publishing posts", caps.display_name));
        }

        if let Some(limit) = caps.character_limit {
            let chars = request.content.chars().count();
            if chars > limit {
                errors.push(format!(
                    "Content is {} characters, {} allows {}",
                    chars, caps.display_name, limit
                ));
            } else if chars as f64 > limit as f64 * NEAR_LIMIT_RATIO {
                warnings.push(format!(
                    "Content is {} of {} characters allowed",
                    chars, limit
                ));
            }
        }

        if request.media.len() > caps.max_media {
            errors.push(format!(
                "{} media attachments, {} allows {}",
                request.media.len(),
                caps.display_name,
                caps.max_media
            ));
        }
        if caps.requires_media && request.media.is_empty() {
            errors.push(format!("{} requires at least one media attachment", caps.display_name));
        }

        PlatformValidation {
            platform,
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Validate and turn any error into [`PlexcastError::Validation`]
    pub fn ensure_valid(&self, request: &ValidationRequest) -> Result<()> {
        let response = self.validate(request);
        if response.valid {
            Ok(())
        } else {
            Err(PlexcastError::Validation(response.messages().join("; ")))
        }
    }

    /// Require a connected integration for every target platform
    pub async fn ensure_connected(
        &self,
        integrations: &IntegrationRegistry,
        owner_id: &str,
        platforms: &[PlatformId],
    ) -> Result<()> {
        let mut missing = Vec::new();
        for platform in platforms {
            let connected = integrations
                .active(owner_id, *platform)
                .await?
                .is_some_and(|i| i.is_connected());
            if !connected {
                missing.push(platform.as_str());
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PlexcastError::Validation(format!(
                "{} has no connected integration for: {}",
                owner_id,
                missing.join(", ")
            )))
        }
    }
}
