// Ports for the moderation pipeline.
//
// The core defines WHAT it needs from the outside world. The infra layer
// (Groq client, SQLite store) provides the HOW, and tests provide doubles.

use super::moderation_models::{
    Flag, ModerationInput, ModerationJob, ModerationNotice, ModerationResult, PostStatus,
    SystemComment,
};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// ERRORS
// ============================================================================

/// Failure of a single moderation call.
#[derive(Debug, Clone, Error)]
pub enum ModerationError {
    /// The classifier asked us to back off. Retrying costs no attempt.
    #[error("content moderation: rate limited, retry after {retry_after:?}: {message}")]
    RateLimited {
        retry_after: Duration,
        message: String,
    },

    /// Any other failure. Retrying costs one attempt.
    #[error("content moderation: {0}")]
    Request(String),
}

impl ModerationError {
    /// The back-off the classifier requested, if this is a rate limit.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ModerationError::RateLimited { retry_after, .. } => Some(*retry_after),
            ModerationError::Request(_) => None,
        }
    }
}

/// Failure of a side-effect collaborator. Logged and absorbed by the pipeline.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Post not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid notification recipient: {0}")]
    InvalidRecipient(String),

    #[error("Collaborator call timed out after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// The external classifier. Its decision logic is opaque to the pipeline.
#[async_trait]
pub trait ContentModerator: Send + Sync {
    async fn moderate_content(
        &self,
        input: &ModerationInput,
    ) -> Result<ModerationResult, ModerationError>;
}

#[async_trait]
pub trait PostStatusUpdater: Send + Sync {
    async fn update_status(&self, post_id: Uuid, status: PostStatus)
        -> Result<(), CollaboratorError>;

    /// Sets `status = draft` and records the detected language in one write.
    async fn update_original_language(
        &self,
        post_id: Uuid,
        language: &str,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait FlagCreator: Send + Sync {
    async fn create_flag(&self, flag: &Flag) -> Result<Uuid, CollaboratorError>;
}

#[async_trait]
pub trait CommentCreator: Send + Sync {
    async fn create_comment(&self, comment: &SystemComment) -> Result<Uuid, CollaboratorError>;
}

#[async_trait]
pub trait ModerationNotifier: Send + Sync {
    async fn notify_on_moderation_result(
        &self,
        notice: &ModerationNotice,
    ) -> Result<(), CollaboratorError>;
}

/// Source of posts still waiting for their moderation run.
#[async_trait]
pub trait PendingPostSource: Send + Sync {
    async fn list_pending(&self, limit: u32) -> Result<Vec<ModerationJob>, CollaboratorError>;
}

/// Backoff sleeps go through this so tests can observe them without waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
