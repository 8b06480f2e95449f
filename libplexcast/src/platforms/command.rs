//! Publisher that delegates delivery to an external executable
//!
//! Platform SDKs live outside this workspace. A `CommandPublisher` bridges to
//! them the Unix way: it runs the configured program once per queue item,
//! writes the publish request as JSON on stdin, exposes the credential in the
//! `PLEXCAST_CREDENTIAL` environment variable, and reads a JSON
//! [`PublishReceipt`] from stdout.
//!
//! Exit status contract:
//!
//! | code  | meaning                         |
//! |-------|---------------------------------|
//! | 0     | published, receipt on stdout    |
//! | 2     | authentication / expired token  |
//! | 3     | content rejected by platform    |
//! | 4     | permission denied               |
//! | 5     | rate limited                    |
//! | other | transient failure, retried      |
//!
//! An exit 0 whose stdout is not a valid receipt fails the item without a
//! retry, since the post may already be live.

use std::process::Stdio;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::PublishError;
use crate::platforms::{PlatformId, PublishReceipt, PublishRequest, Publisher};
use crate::types::MediaAttachment;

pub const CREDENTIAL_ENV: &str = "PLEXCAST_CREDENTIAL";

#[derive(Serialize)]
struct CommandPayload<'a> {
    platform: PlatformId,
    draft_id: &'a str,
    queue_item_id: &'a str,
    content: &'a str,
    media: &'a [MediaAttachment],
}

#[derive(Debug, Clone)]
pub struct CommandPublisher {
    platform: PlatformId,
    program: String,
    args: Vec<String>,
}

impl CommandPublisher {
    pub fn new(platform: PlatformId, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            platform,
            program: program.into(),
            args,
        }
    }

    /// Build from a command line such as `"~/bin/post-bluesky --verbose"`
    ///
    /// Arguments are split on whitespace; the program path is tilde-expanded.
    pub fn from_command_line(platform: PlatformId, command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = shellexpand::tilde(parts.next()?).to_string();
        let args = parts.map(str::to_string).collect();
        Some(Self::new(platform, program, args))
    }
}

fn classify_exit(code: Option<i32>, stderr: &str, platform: PlatformId) -> PublishError {
    let detail = stderr.trim();
    let detail = if detail.is_empty() {
        format!("{} publisher exited with {:?}", platform, code)
    } else {
        detail.to_string()
    };

    match code {
        Some(2) => PublishError::Authentication(detail),
        Some(3) => PublishError::ContentRejected(detail),
        Some(4) => PublishError::PermissionDenied(detail),
        Some(5) => PublishError::RateLimit(detail),
        // Killed by a signal or any other failure
        _ => PublishError::Server(detail),
    }
}

#[async_trait]
impl Publisher for CommandPublisher {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    async fn publish(&self, request: PublishRequest<'_>) -> Result<PublishReceipt, PublishError> {
        let payload = serde_json::to_vec(&CommandPayload {
            platform: request.platform,
            draft_id: request.draft_id,
            queue_item_id: request.queue_item_id,
            content: request.content,
            media: request.media,
        })
        .map_err(|e| PublishError::ContentRejected(format!("Unserializable request: {}", e)))?;

        debug!(
            "Running {} publisher: {} ({} bytes)",
            self.platform,
            self.program,
            payload.len()
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(CREDENTIAL_ENV, request.credentials.expose_secret())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PublishError::NotSupported(format!(
                    "Failed to start {} publisher '{}': {}",
                    self.platform, self.program, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that ignores stdin may close it early
            if let Err(e) = stdin.write_all(&payload).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(PublishError::Network(format!(
                        "Failed to write request to {} publisher: {}",
                        self.platform, e
                    )));
                }
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            PublishError::Network(format!("{} publisher did not finish: {}", self.platform, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_exit(output.status.code(), &stderr, self.platform));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            PublishError::Unconfirmed(format!(
                "{} publisher exited 0 with an unreadable receipt: {}",
                self.platform, e
            ))
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use tempfile::TempDir;

    fn script(dir: &TempDir, name: &str, body: &str) -> CommandPublisher {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        // Run through sh so the test never execs a freshly written file
        CommandPublisher::new(
            PlatformId::Mastodon,
            "sh",
            vec![path.to_string_lossy().to_string()],
        )
    }

    async fn run(publisher: &CommandPublisher, content: &str) -> Result<PublishReceipt, PublishError> {
        let credentials = SecretString::from("s3cret");
        publisher
            .publish(PublishRequest {
                platform: PlatformId::Mastodon,
                draft_id: "draft-1",
                queue_item_id: "item-1",
                credentials: &credentials,
                content,
                media: &[],
            })
            .await
    }

    #[tokio::test]
    async fn test_success_reads_receipt_and_receives_payload() {
        let dir = TempDir::new().unwrap();
        let captured = dir.path().join("stdin.json");
        let publisher = script(
            &dir,
            "ok.sh",
            &format!(
                "[ \"$PLEXCAST_CREDENTIAL\" = \"s3cret\" ] || exit 2\ncat > '{}'\necho '{{\"remote_post_id\":\"109\",\"permalink\":\"https://m.example/@me/109\"}}'",
                captured.display()
            ),
        );

        let receipt = run(&publisher, "Hello fediverse").await.unwrap();
        assert_eq!(receipt.remote_post_id, "109");
        assert_eq!(receipt.permalink.as_deref(), Some("https://m.example/@me/109"));

        let sent: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&captured).unwrap()).unwrap();
        assert_eq!(sent["content"], "Hello fediverse");
        assert_eq!(sent["platform"], "mastodon");
        assert_eq!(sent["queue_item_id"], "item-1");
    }

    #[tokio::test]
    async fn test_exit_codes_map_to_error_kinds() {
        let dir = TempDir::new().unwrap();

        let auth = script(&dir, "auth.sh", "echo 'token revoked' >&2\nexit 2");
        match run(&auth, "x").await {
            Err(PublishError::Authentication(msg)) => assert_eq!(msg, "token revoked"),
            other => panic!("Expected Authentication, got {:?}", other),
        }

        let content = script(&dir, "content.sh", "exit 3");
        assert!(matches!(run(&content, "x").await, Err(PublishError::ContentRejected(_))));

        let permission = script(&dir, "perm.sh", "exit 4");
        assert!(matches!(run(&permission, "x").await, Err(PublishError::PermissionDenied(_))));

        let rate = script(&dir, "rate.sh", "exit 5");
        let err = run(&rate, "x").await.unwrap_err();
        assert!(matches!(err, PublishError::RateLimit(_)));
        assert!(err.is_retryable());

        let other = script(&dir, "other.sh", "exit 1");
        assert!(run(&other, "x").await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_garbage_receipt_after_success_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let publisher = script(&dir, "garbage.sh", "echo not-json");
        let err = run(&publisher, "x").await.unwrap_err();
        assert!(matches!(err, PublishError::Unconfirmed(_)));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("exited 0"));
    }

    #[tokio::test]
    async fn test_missing_program_is_not_retryable() {
        let publisher = CommandPublisher::new(
            PlatformId::Mastodon,
            "/nonexistent/plexcast-publisher",
            vec![],
        );
        let err = run(&publisher, "x").await.unwrap_err();
        assert!(matches!(err, PublishError::NotSupported(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_command_line_splits_arguments() {
        let publisher =
            CommandPublisher::from_command_line(PlatformId::Bluesky, "/opt/post-bsky --instance bsky.social")
                .unwrap();
        assert_eq!(publisher.program, "/opt/post-bsky");
        assert_eq!(publisher.args, vec!["--instance", "bsky.social"]);

        assert!(CommandPublisher::from_command_line(PlatformId::Bluesky, "   ").is_none());
    }
}
