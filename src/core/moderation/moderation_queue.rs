// Bounded moderation queue.
//
// Posts are submitted to a bounded channel; a single dispatcher task pulls
// them and runs at most `workers` of them at once. A post that is queued,
// running, or already decided by this process is refused, so one post is
// moderated once even when a sweep lists it from a stale snapshot.
//
// Shutdown closes the channel, lets queued and running work drain for a grace
// period, then cancels whatever is left and waits for it to unwind.

use super::moderation_models::{ModerationJob, RunOutcome};
use super::moderation_service::ModerationOrchestrator;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("post {0} is already queued for moderation")]
    AlreadyQueued(Uuid),

    #[error("post {0} was already moderated")]
    AlreadyModerated(Uuid),

    #[error("moderation queue is full")]
    Full,

    #[error("moderation queue is shut down")]
    Closed,
}

/// Terminal states counted by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTally {
    pub succeeded: usize,
    pub gave_up: usize,
    pub cancelled: usize,
}

impl RunTally {
    fn record(&mut self, joined: Result<RunOutcome, JoinError>) {
        match joined {
            Ok(RunOutcome::Succeeded { .. }) => self.succeeded += 1,
            Ok(RunOutcome::GaveUp { .. }) => self.gave_up += 1,
            Ok(RunOutcome::Cancelled) => self.cancelled += 1,
            Err(e) => error!(error = %e, "Moderation run panicked"),
        }
    }
}

/// Post ids known to the queue.
#[derive(Default)]
struct Tracked {
    /// Queued or running.
    in_flight: DashSet<Uuid>,
    /// Reached Succeeded or GaveUp. Cancelled runs are not recorded, so a
    /// later sweep can pick them up again.
    decided: DashSet<Uuid>,
}

impl Tracked {
    fn finish(&self, post_id: Uuid, outcome: &RunOutcome) {
        // Record the decision before releasing the in-flight slot; `reserve`
        // relies on that order.
        if !matches!(outcome, RunOutcome::Cancelled) {
            self.decided.insert(post_id);
        }
        self.in_flight.remove(&post_id);
    }
}

pub struct ModerationQueue {
    sender: mpsc::Sender<ModerationJob>,
    tracked: Arc<Tracked>,
    closing: CancellationToken,
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<RunTally>>>,
}

impl ModerationQueue {
    /// Spawn the dispatcher. Must be called inside a tokio runtime.
    pub fn start(orchestrator: Arc<ModerationOrchestrator>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let tracked = Arc::new(Tracked::default());
        let closing = CancellationToken::new();
        let cancel = CancellationToken::new();

        let dispatcher = tokio::spawn(dispatch_loop(
            receiver,
            orchestrator,
            Arc::new(Semaphore::new(workers.max(1))),
            Arc::clone(&tracked),
            closing.clone(),
            cancel.clone(),
        ));

        info!(workers, capacity, "Moderation queue started");

        Self {
            sender,
            tracked,
            closing,
            cancel,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queue a post without waiting. A full queue is reported, not awaited.
    pub fn submit(&self, job: ModerationJob) -> Result<(), QueueError> {
        let post_id = job.post_id;
        self.reserve(post_id)?;

        match self.sender.try_send(job) {
            Ok(()) => {
                debug!(%post_id, "Post queued for moderation");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.tracked.in_flight.remove(&post_id);
                warn!(%post_id, "Moderation queue full, post not queued");
                Err(QueueError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                self.tracked.in_flight.remove(&post_id);
                Err(QueueError::Closed)
            }
        }
    }

    /// Posts currently queued or running.
    pub fn pending(&self) -> usize {
        self.tracked.in_flight.len()
    }

    fn reserve(&self, post_id: Uuid) -> Result<(), QueueError> {
        if self.closing.is_cancelled() {
            return Err(QueueError::Closed);
        }
        if self.tracked.decided.contains(&post_id) {
            return Err(QueueError::AlreadyModerated(post_id));
        }
        if !self.tracked.in_flight.insert(post_id) {
            return Err(QueueError::AlreadyQueued(post_id));
        }
        // A run may have finished between the two checks above.
        if self.tracked.decided.contains(&post_id) {
            self.tracked.in_flight.remove(&post_id);
            return Err(QueueError::AlreadyModerated(post_id));
        }
        Ok(())
    }

    /// Stop accepting work, drain for `grace`, then cancel the rest.
    pub async fn shutdown(&self, grace: Duration) -> RunTally {
        self.closing.cancel();

        let Some(mut handle) = self.dispatcher.lock().await.take() else {
            return RunTally::default();
        };

        let joined = match tokio::time::timeout(grace, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    remaining = self.tracked.in_flight.len(),
                    "Moderation drain exceeded grace period, cancelling remaining runs"
                );
                self.cancel.cancel();
                handle.await
            }
        };

        match joined {
            Ok(tally) => {
                info!(
                    succeeded = tally.succeeded,
                    gave_up = tally.gave_up,
                    cancelled = tally.cancelled,
                    "Moderation queue stopped"
                );
                tally
            }
            Err(e) => {
                error!(error = %e, "Moderation dispatcher failed");
                RunTally::default()
            }
        }
    }
}

async fn dispatch_loop(
    mut receiver: mpsc::Receiver<ModerationJob>,
    orchestrator: Arc<ModerationOrchestrator>,
    slots: Arc<Semaphore>,
    tracked: Arc<Tracked>,
    closing: CancellationToken,
    cancel: CancellationToken,
) -> RunTally {
    let mut tasks = JoinSet::new();
    let mut tally = RunTally::default();
    let mut closed = false;

    loop {
        tokio::select! {
            biased;
            _ = closing.cancelled(), if !closed => {
                // Buffered jobs are still delivered after close.
                receiver.close();
                closed = true;
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => tally.record(joined),
            next = receiver.recv() => {
                let Some(job) = next else { break };
                let Ok(permit) = Arc::clone(&slots).acquire_owned().await else { break };

                let orchestrator = Arc::clone(&orchestrator);
                let tracked = Arc::clone(&tracked);
                let cancel = cancel.child_token();
                tasks.spawn(async move {
                    let post_id = job.post_id;
                    let outcome = orchestrator.run(job, cancel).await;
                    tracked.finish(post_id, &outcome);
                    drop(permit);
                    outcome
                });
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        tally.record(joined);
    }
    tally
}
