// In-memory doubles for the moderation ports, shared by the core tests.

use super::moderation_models::{
    AuthorType, Flag, ModerationInput, ModerationJob, ModerationNotice, ModerationResult,
    PostStatus, SystemComment,
};
use super::moderation_ports::{
    CollaboratorError, CommentCreator, ContentModerator, FlagCreator, ModerationError,
    ModerationNotifier, PendingPostSource, PostStatusUpdater, Sleeper,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

pub fn job(title: &str) -> ModerationJob {
    ModerationJob {
        post_id: Uuid::new_v4(),
        post_type: "question".to_string(),
        author_type: AuthorType::Agent,
        author_id: "agent-42".to_string(),
        input: ModerationInput {
            title: title.to_string(),
            description: "How do I pin a future in an async trait?".to_string(),
            tags: vec!["rust".to_string(), "async".to_string()],
        },
    }
}

pub fn transient(message: &str) -> ModerationError {
    ModerationError::Request(message.to_string())
}

pub fn rate_limited(retry_after: Duration) -> ModerationError {
    ModerationError::RateLimited {
        retry_after,
        message: "rate limit reached".to_string(),
    }
}

/// Replays a fixed script of responses; repeats the last one when exhausted.
pub struct ScriptedModerator {
    script: Mutex<VecDeque<Result<ModerationResult, ModerationError>>>,
    last: Mutex<Option<Result<ModerationResult, ModerationError>>>,
    calls: AtomicU32,
}

impl ScriptedModerator {
    pub fn new(script: Vec<Result<ModerationResult, ModerationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentModerator for ScriptedModerator {
    async fn moderate_content(
        &self,
        _input: &ModerationInput,
    ) -> Result<ModerationResult, ModerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(response) => {
                *self.last.lock().unwrap() = Some(response.clone());
                response
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(transient("script is empty"))),
        }
    }
}

/// Never answers. Used to exercise the run deadline and cancellation.
#[derive(Default)]
pub struct HangingModerator {
    calls: AtomicU32,
}

impl HangingModerator {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentModerator for HangingModerator {
    async fn moderate_content(
        &self,
        _input: &ModerationInput,
    ) -> Result<ModerationResult, ModerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusWrite {
    Status(Uuid, PostStatus),
    OriginalLanguage(Uuid, String),
}

/// Records every collaborator call. Each collaborator can be switched to fail.
#[derive(Default)]
pub struct RecordingCollaborators {
    pub status_writes: Mutex<Vec<StatusWrite>>,
    pub flags: Mutex<Vec<Flag>>,
    pub comments: Mutex<Vec<SystemComment>>,
    pub notices: Mutex<Vec<ModerationNotice>>,
    pub pending: Mutex<Vec<ModerationJob>>,
    pub fail_status: AtomicBool,
    pub fail_flag: AtomicBool,
    pub fail_comment: AtomicBool,
    pub fail_notify: AtomicBool,
    /// Comment calls never return.
    pub hang_comment: AtomicBool,
}

impl RecordingCollaborators {
    pub fn status_writes(&self) -> Vec<StatusWrite> {
        self.status_writes.lock().unwrap().clone()
    }

    pub fn flags(&self) -> Vec<Flag> {
        self.flags.lock().unwrap().clone()
    }

    pub fn comments(&self) -> Vec<SystemComment> {
        self.comments.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<ModerationNotice> {
        self.notices.lock().unwrap().clone()
    }

    fn storage_failure(switch: &AtomicBool) -> Result<(), CollaboratorError> {
        if switch.load(Ordering::SeqCst) {
            Err(CollaboratorError::Storage("database is locked".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PostStatusUpdater for RecordingCollaborators {
    async fn update_status(
        &self,
        post_id: Uuid,
        status: PostStatus,
    ) -> Result<(), CollaboratorError> {
        self.status_writes
            .lock()
            .unwrap()
            .push(StatusWrite::Status(post_id, status));
        Self::storage_failure(&self.fail_status)
    }

    async fn update_original_language(
        &self,
        post_id: Uuid,
        language: &str,
    ) -> Result<(), CollaboratorError> {
        self.status_writes
            .lock()
            .unwrap()
            .push(StatusWrite::OriginalLanguage(post_id, language.to_string()));
        Self::storage_failure(&self.fail_status)
    }
}

#[async_trait]
impl FlagCreator for RecordingCollaborators {
    async fn create_flag(&self, flag: &Flag) -> Result<Uuid, CollaboratorError> {
        self.flags.lock().unwrap().push(flag.clone());
        Self::storage_failure(&self.fail_flag)?;
        Ok(Uuid::new_v4())
    }
}

#[async_trait]
impl CommentCreator for RecordingCollaborators {
    async fn create_comment(&self, comment: &SystemComment) -> Result<Uuid, CollaboratorError> {
        self.comments.lock().unwrap().push(comment.clone());
        if self.hang_comment.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Self::storage_failure(&self.fail_comment)?;
        Ok(Uuid::new_v4())
    }
}

#[async_trait]
impl ModerationNotifier for RecordingCollaborators {
    async fn notify_on_moderation_result(
        &self,
        notice: &ModerationNotice,
    ) -> Result<(), CollaboratorError> {
        self.notices.lock().unwrap().push(notice.clone());
        Self::storage_failure(&self.fail_notify)
    }
}

#[async_trait]
impl PendingPostSource for RecordingCollaborators {
    async fn list_pending(&self, limit: u32) -> Result<Vec<ModerationJob>, CollaboratorError> {
        Ok(self
            .pending
            .lock()
            .unwrap()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
