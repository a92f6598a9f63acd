// Moderation domain models - data structures for the post moderation pipeline.
//
// These are pure domain types with no HTTP or database dependencies.
// The infra layer converts them to rows and API payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Reporter id stamped on flags raised by the pipeline.
pub const MODERATION_REPORTER_ID: &str = "content-moderation";
/// Author id stamped on system comments written by the pipeline.
pub const MODERATION_AUTHOR_ID: &str = "solvr-moderator";
/// Flag reason used when a run gives up.
pub const MODERATION_FAILED_REASON: &str = "moderation_failed";

/// Snapshot of the submitted content, captured once when the run is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationInput {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Decision returned by one moderation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationResult {
    pub approved: bool,
    #[serde(default)]
    pub language_detected: String,
    #[serde(default)]
    pub rejection_reasons: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
    /// Model reasoning, kept for logs only. Never part of the wire schema.
    #[serde(skip)]
    pub reasoning: Option<String>,
}

#[cfg(test)]
impl ModerationResult {
    pub fn approved(explanation: impl Into<String>) -> Self {
        Self {
            approved: true,
            language_detected: "en".to_string(),
            rejection_reasons: Vec::new(),
            confidence: 1.0,
            explanation: explanation.into(),
            reasoning: None,
        }
    }

    pub fn rejected(
        language: impl Into<String>,
        reasons: &[&str],
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            approved: false,
            language_detected: language.into(),
            rejection_reasons: reasons.iter().map(|r| r.to_string()).collect(),
            confidence: 1.0,
            explanation: explanation.into(),
            reasoning: None,
        }
    }
}

/// Post lifecycle status. The pipeline only ever assigns `Open`, `Rejected` or `Draft`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Open,
    InProgress,
    Solved,
    Closed,
    Stale,
    Answered,
    Active,
    Dormant,
    Evolved,
    PendingReview,
    Rejected,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Open => "open",
            PostStatus::InProgress => "in_progress",
            PostStatus::Solved => "solved",
            PostStatus::Closed => "closed",
            PostStatus::Stale => "stale",
            PostStatus::Answered => "answered",
            PostStatus::Active => "active",
            PostStatus::Dormant => "dormant",
            PostStatus::Evolved => "evolved",
            PostStatus::PendingReview => "pending_review",
            PostStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let status = match value {
            "draft" => PostStatus::Draft,
            "open" => PostStatus::Open,
            "in_progress" => PostStatus::InProgress,
            "solved" => PostStatus::Solved,
            "closed" => PostStatus::Closed,
            "stale" => PostStatus::Stale,
            "answered" => PostStatus::Answered,
            "active" => PostStatus::Active,
            "dormant" => PostStatus::Dormant,
            "evolved" => PostStatus::Evolved,
            "pending_review" => PostStatus::PendingReview,
            "rejected" => PostStatus::Rejected,
            other => return Err(format!("unknown post status: {other}")),
        };
        Ok(status)
    }
}

/// Who wrote a post or comment. Agents and humans are moderated identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    Human,
    Agent,
    System,
}

impl AuthorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorType::Human => "human",
            AuthorType::Agent => "agent",
            AuthorType::System => "system",
        }
    }
}

impl fmt::Display for AuthorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthorType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "human" => Ok(AuthorType::Human),
            "agent" => Ok(AuthorType::Agent),
            "system" => Ok(AuthorType::System),
            other => Err(format!("unknown author type: {other}")),
        }
    }
}

/// Everything one run needs: the post identity plus the content snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationJob {
    pub post_id: Uuid,
    /// "problem", "question" or "idea". Only forwarded to the notification.
    pub post_type: String,
    pub author_type: AuthorType,
    pub author_id: String,
    pub input: ModerationInput,
}

/// Audit flag raised when a run gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    pub target_type: String,
    pub target_id: Uuid,
    pub reporter_type: String,
    pub reporter_id: String,
    pub reason: String,
    pub details: String,
    pub status: String,
}

impl Flag {
    pub fn moderation_failed(post_id: Uuid, details: String) -> Self {
        Self {
            target_type: "post".to_string(),
            target_id: post_id,
            reporter_type: "system".to_string(),
            reporter_id: MODERATION_REPORTER_ID.to_string(),
            reason: MODERATION_FAILED_REASON.to_string(),
            details,
            status: "pending".to_string(),
        }
    }
}

/// Comment posted on the moderated post explaining the decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemComment {
    pub target_type: String,
    pub target_id: Uuid,
    pub author_type: AuthorType,
    pub author_id: String,
    pub content: String,
}

impl SystemComment {
    pub fn moderation(post_id: Uuid, content: String) -> Self {
        Self {
            target_type: "post".to_string(),
            target_id: post_id,
            author_type: AuthorType::System,
            author_id: MODERATION_AUTHOR_ID.to_string(),
            content,
        }
    }
}

/// Arguments of one author notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationNotice {
    pub post_id: Uuid,
    pub post_title: String,
    pub post_type: String,
    pub author_type: AuthorType,
    pub author_id: String,
    pub approved: bool,
    pub explanation: String,
}

/// How a successful moderation call is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    HardRejected,
    /// Rejected only because the content is not in English; queued for translation.
    LanguageSoftRejected { language: String },
}

impl Verdict {
    /// The status this verdict moves the post into.
    pub fn target_status(&self) -> PostStatus {
        match self {
            Verdict::Approved => PostStatus::Open,
            Verdict::HardRejected => PostStatus::Rejected,
            Verdict::LanguageSoftRejected { .. } => PostStatus::Draft,
        }
    }
}

/// Which side effects of a Succeeded run actually went through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub status_applied: bool,
    pub comment_created: bool,
    pub author_notified: bool,
}

/// Why a run gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiveUpReason {
    RetriesExhausted,
    DeadlineExceeded(Duration),
}

/// Terminal state of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded {
        verdict: Verdict,
        report: DispatchReport,
    },
    GaveUp {
        reason: GiveUpReason,
        attempts: u32,
        flagged: bool,
    },
    /// Shutdown reached the run before a decision; nothing was written.
    Cancelled,
}

/// Tuning knobs for the pipeline. Overridden from the environment in `main`.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Backoff sequence; its length is the attempt budget.
    pub retry_delays: Vec<Duration>,
    /// Wall-clock ceiling for the decision phase of a run.
    pub run_timeout: Duration,
    /// Budget for each side-effect call once the run has decided.
    pub side_effect_timeout: Duration,
    /// Runs allowed in flight at once.
    pub workers: usize,
    /// Jobs that may wait in the queue before `submit` reports `Full`.
    pub queue_capacity: usize,
    pub sweep_interval: Duration,
    pub sweep_batch: u32,
    pub shutdown_grace: Duration,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            retry_delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ],
            run_timeout: Duration::from_secs(60),
            side_effect_timeout: Duration::from_secs(10),
            workers: 4,
            queue_capacity: 256,
            sweep_interval: Duration::from_secs(60),
            sweep_batch: 50,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}
