// Side-effect fan-out for a decided run: status transition, system comment,
// author notification. Fixed order, each step isolated. A failing or stuck
// step is logged and the next one still runs; nothing is returned to the
// caller except a report of what went through.
//
// Every call gets its own time budget, so a hung collaborator can delay a run
// by at most three budgets.

use super::moderation_models::{
    DispatchReport, ModerationJob, ModerationNotice, ModerationResult, SystemComment, Verdict,
};
use super::moderation_ports::{
    CollaboratorError, CommentCreator, ModerationNotifier, PostStatusUpdater,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub const APPROVED_COMMENT: &str =
    "Post approved by Solvr moderation. Your post is now visible in the feed.";

/// Comment text for a verdict.
pub fn comment_for(verdict: &Verdict, result: &ModerationResult) -> String {
    match verdict {
        Verdict::Approved => APPROVED_COMMENT.to_string(),
        Verdict::LanguageSoftRejected { language } => format!(
            "Your post appears to be in {}. We'll automatically translate it to English and \
             resubmit for review. This typically takes up to 24 hours.",
            language
        ),
        Verdict::HardRejected => format!(
            "Post rejected by Solvr moderation.\n\nReason: {}\n\nYou can edit your post and \
             resubmit for review.",
            result.explanation
        ),
    }
}

pub struct SideEffectDispatcher {
    posts: Arc<dyn PostStatusUpdater>,
    comments: Arc<dyn CommentCreator>,
    notifier: Arc<dyn ModerationNotifier>,
    step_timeout: Duration,
}

impl SideEffectDispatcher {
    pub fn new(
        posts: Arc<dyn PostStatusUpdater>,
        comments: Arc<dyn CommentCreator>,
        notifier: Arc<dyn ModerationNotifier>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            posts,
            comments,
            notifier,
            step_timeout,
        }
    }

    async fn within_budget<T, F>(&self, call: F) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        tokio::time::timeout(self.step_timeout, call)
            .await
            .unwrap_or(Err(CollaboratorError::Timeout(self.step_timeout)))
    }

    /// Apply every side effect of a Succeeded run. Never fails.
    pub async fn dispatch(
        &self,
        job: &ModerationJob,
        verdict: &Verdict,
        result: &ModerationResult,
    ) -> DispatchReport {
        let post_id = job.post_id;
        let mut report = DispatchReport::default();

        // 1. Status transition. The soft rejection writes status and language together.
        let status_write = match verdict {
            Verdict::LanguageSoftRejected { language } => {
                self.within_budget(self.posts.update_original_language(post_id, language))
                    .await
            }
            _ => {
                self.within_budget(self.posts.update_status(post_id, verdict.target_status()))
                    .await
            }
        };
        match status_write {
            Ok(()) => {
                report.status_applied = true;
                info!(%post_id, status = %verdict.target_status(), "Post status updated by moderation");
            }
            Err(e) => error!(
                %post_id,
                status = %verdict.target_status(),
                error = %e,
                "Failed to update post status after moderation"
            ),
        }

        // 2. System comment.
        let comment = SystemComment::moderation(post_id, comment_for(verdict, result));
        match self.within_budget(self.comments.create_comment(&comment)).await {
            Ok(_) => report.comment_created = true,
            Err(e) => error!(%post_id, error = %e, "Failed to create moderation comment"),
        }

        // 3. Author notification.
        let notice = ModerationNotice {
            post_id,
            post_title: job.input.title.clone(),
            post_type: job.post_type.clone(),
            author_type: job.author_type,
            author_id: job.author_id.clone(),
            approved: matches!(verdict, Verdict::Approved),
            explanation: result.explanation.clone(),
        };
        match self
            .within_budget(self.notifier.notify_on_moderation_result(&notice))
            .await
        {
            Ok(()) => report.author_notified = true,
            Err(e) => error!(%post_id, error = %e, "Failed to send moderation notification"),
        }

        report
    }
}
