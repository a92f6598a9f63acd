// Moderation orchestrator - drives one run from Pending to a terminal state.
//
// Pending -> Retrying (0..k) -> Succeeded | GaveUp, plus Cancelled on shutdown.
//
// A Succeeded run performs exactly one status transition and one dispatch.
// A GaveUp run raises exactly one flag and touches nothing else: the post
// stays in pending_review until someone looks at the flag.
//
// NO HTTP or database code here - just the control flow over the ports.

use super::moderation_models::{
    Flag, GiveUpReason, ModerationConfig, ModerationInput, ModerationJob, ModerationResult,
    RunOutcome,
};
use super::moderation_ports::{
    CollaboratorError, CommentCreator, ContentModerator, FlagCreator, ModerationError,
    ModerationNotifier, PostStatusUpdater, Sleeper, TokioSleeper,
};
use super::rejection_classifier::classify;
use super::retry_scheduler::{AttemptState, RetryDecision, RetryScheduler, SchedulerConfigError};
use super::side_effects::SideEffectDispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// The adapters a run talks to.
#[derive(Clone)]
pub struct ModerationCollaborators {
    pub moderator: Arc<dyn ContentModerator>,
    pub posts: Arc<dyn PostStatusUpdater>,
    pub flags: Arc<dyn FlagCreator>,
    pub comments: Arc<dyn CommentCreator>,
    pub notifier: Arc<dyn ModerationNotifier>,
}

pub struct ModerationOrchestrator {
    moderator: Arc<dyn ContentModerator>,
    flags: Arc<dyn FlagCreator>,
    dispatcher: SideEffectDispatcher,
    scheduler: RetryScheduler,
    sleeper: Arc<dyn Sleeper>,
    run_timeout: Duration,
    side_effect_timeout: Duration,
}

/// What the decision phase ended with, before any side effect.
enum Decision {
    Moderated(ModerationResult),
    Exhausted(GiveUpReason),
    Cancelled,
}

impl ModerationOrchestrator {
    pub fn new(
        collaborators: ModerationCollaborators,
        config: &ModerationConfig,
    ) -> Result<Self, SchedulerConfigError> {
        Ok(Self {
            moderator: collaborators.moderator,
            flags: collaborators.flags,
            dispatcher: SideEffectDispatcher::new(
                collaborators.posts,
                collaborators.comments,
                collaborators.notifier,
                config.side_effect_timeout,
            ),
            scheduler: RetryScheduler::new(config.retry_delays.clone())?,
            sleeper: Arc::new(TokioSleeper),
            run_timeout: config.run_timeout,
            side_effect_timeout: config.side_effect_timeout,
        })
    }

    /// Swap the sleeper (tests record sleeps instead of waiting).
    #[cfg(test)]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run the pipeline for one post.
    ///
    /// Every log line of the run carries `run_id` and `post_id` through the span.
    pub async fn run(&self, job: ModerationJob, cancel: CancellationToken) -> RunOutcome {
        let span = info_span!("moderation_run", run_id = %Uuid::new_v4(), post_id = %job.post_id);
        self.run_inner(job, cancel).instrument(span).await
    }

    async fn run_inner(&self, job: ModerationJob, cancel: CancellationToken) -> RunOutcome {
        let mut state = self.scheduler.start();
        let mut last_error: Option<ModerationError> = None;

        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => Decision::Cancelled,
            outcome = tokio::time::timeout(
                self.run_timeout,
                self.moderate_with_retries(&job.input, &mut state, &mut last_error),
            ) => match outcome {
                Ok(Some(result)) => Decision::Moderated(result),
                Ok(None) => Decision::Exhausted(GiveUpReason::RetriesExhausted),
                Err(_) => Decision::Exhausted(GiveUpReason::DeadlineExceeded(self.run_timeout)),
            },
        };

        match decision {
            Decision::Moderated(result) => {
                let verdict = classify(&result);
                info!(
                    verdict = ?verdict,
                    language = %result.language_detected,
                    reasons = ?result.rejection_reasons,
                    failed_attempts = state.attempts_used,
                    "Moderation decided"
                );
                let report = self.dispatcher.dispatch(&job, &verdict, &result).await;
                if !report.status_applied {
                    // Still pending_review: park it behind a flag so sweeps skip it.
                    let details = format!(
                        "Content moderation decided {} but the status update failed",
                        verdict.target_status()
                    );
                    self.raise_flag(&job, details).await;
                }
                RunOutcome::Succeeded { verdict, report }
            }
            Decision::Exhausted(reason) => {
                let flagged = self
                    .escalate(&job, &reason, &state, last_error.as_ref())
                    .await;
                RunOutcome::GaveUp {
                    reason,
                    attempts: state.attempts_used,
                    flagged,
                }
            }
            Decision::Cancelled => {
                warn!(
                    attempts = state.attempts_used,
                    "Moderation run cancelled before a decision; post left pending"
                );
                RunOutcome::Cancelled
            }
        }
    }

    /// Call the moderator until it answers or the scheduler gives up.
    /// `None` means the attempt budget is spent.
    async fn moderate_with_retries(
        &self,
        input: &ModerationInput,
        state: &mut AttemptState,
        last_error: &mut Option<ModerationError>,
    ) -> Option<ModerationResult> {
        loop {
            let error = match self.moderator.moderate_content(input).await {
                Ok(result) => return Some(result),
                Err(e) => e,
            };

            let decision = self.scheduler.next(state, &error);
            match (&error, decision) {
                (ModerationError::RateLimited { .. }, RetryDecision::Retry { after }) => {
                    warn!(retry_after = ?after, "Moderation rate limited, retrying");
                }
                (_, RetryDecision::Retry { after }) => {
                    warn!(
                        attempt = state.attempts_used,
                        max_attempts = state.max_attempts,
                        retry_in = ?after,
                        error = %error,
                        "Moderation attempt failed"
                    );
                }
                (_, RetryDecision::GiveUp) => {
                    error!(
                        attempts = state.attempts_used,
                        error = %error,
                        "Moderation failed after all retries"
                    );
                }
            }
            *last_error = Some(error);

            match decision {
                RetryDecision::Retry { after } => self.sleeper.sleep(after).await,
                RetryDecision::GiveUp => return None,
            }
        }
    }

    /// Raise the single pending-review flag for a run that gave up.
    async fn escalate(
        &self,
        job: &ModerationJob,
        reason: &GiveUpReason,
        state: &AttemptState,
        last_error: Option<&ModerationError>,
    ) -> bool {
        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no response from moderation service".to_string());

        let details = match reason {
            GiveUpReason::RetriesExhausted => format!(
                "Content moderation failed after {} attempts: {}",
                state.attempts_used, last_error
            ),
            GiveUpReason::DeadlineExceeded(limit) => {
                error!(timeout = ?limit, attempts = state.attempts_used, "Moderation run timed out");
                format!(
                    "Content moderation timed out after {}s ({} attempts): {}",
                    limit.as_secs(),
                    state.attempts_used,
                    last_error
                )
            }
        };

        self.raise_flag(job, details).await
    }

    async fn raise_flag(&self, job: &ModerationJob, details: String) -> bool {
        let flag = Flag::moderation_failed(job.post_id, details);
        let created = tokio::time::timeout(self.side_effect_timeout, self.flags.create_flag(&flag))
            .await
            .unwrap_or(Err(CollaboratorError::Timeout(self.side_effect_timeout)));

        match created {
            Ok(flag_id) => {
                info!(%flag_id, "Raised moderation failure flag");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to create moderation failure flag");
                false
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
