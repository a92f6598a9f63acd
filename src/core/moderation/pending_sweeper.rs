// Periodically feeds posts still waiting in pending_review into the queue.
// Posts whose earlier run gave up, or whose decided status could not be
// written, carry a pending flag and are not listed by the source, so they
// wait for an admin instead of looping forever. Posts this process already
// decided are refused by the queue even if a stale listing returns them.

use super::moderation_ports::{CollaboratorError, PendingPostSource};
use super::moderation_queue::{ModerationQueue, QueueError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct PendingSweeper {
    source: Arc<dyn PendingPostSource>,
    queue: Arc<ModerationQueue>,
    batch: u32,
}

impl PendingSweeper {
    pub fn new(source: Arc<dyn PendingPostSource>, queue: Arc<ModerationQueue>, batch: u32) -> Self {
        Self {
            source,
            queue,
            batch,
        }
    }

    /// One pass. Returns how many posts were newly queued.
    pub async fn sweep_once(&self) -> Result<usize, CollaboratorError> {
        let jobs = self.source.list_pending(self.batch).await?;
        let mut queued = 0;

        for job in jobs {
            match self.queue.submit(job) {
                Ok(()) => queued += 1,
                Err(QueueError::AlreadyQueued(post_id)) => {
                    debug!(%post_id, "Post already queued, skipping");
                }
                Err(QueueError::AlreadyModerated(post_id)) => {
                    debug!(%post_id, "Post already moderated, skipping");
                }
                Err(e) => {
                    warn!(error = %e, "Stopping sweep");
                    break;
                }
            }
        }

        Ok(queued)
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        loop {
            debug!("Starting pending post sweep...");
            match self.sweep_once().await {
                Ok(0) => debug!("No pending posts to moderate"),
                Ok(n) => info!(
                    in_flight = self.queue.pending(),
                    "Queued {} pending posts for moderation",
                    n
                ),
                Err(e) => warn!("Pending post sweep failed: {}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Pending post sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::super::moderation_models::{ModerationConfig, ModerationResult};
    use super::super::moderation_service::{ModerationCollaborators, ModerationOrchestrator};
    use super::super::test_doubles::{job, RecordingCollaborators, ScriptedModerator};
    use super::*;
    use std::sync::atomic::Ordering;

    fn queue(collaborators: &Arc<RecordingCollaborators>) -> Arc<ModerationQueue> {
        let orchestrator = ModerationOrchestrator::new(
            ModerationCollaborators {
                moderator: Arc::new(ScriptedModerator::new(vec![Ok(
                    ModerationResult::approved("ok"),
                )])),
                posts: collaborators.clone(),
                flags: collaborators.clone(),
                comments: collaborators.clone(),
                notifier: collaborators.clone(),
            },
            &ModerationConfig::default(),
        )
        .unwrap();
        Arc::new(ModerationQueue::start(Arc::new(orchestrator), 2, 16))
    }

    #[tokio::test]
    async fn test_sweep_queues_pending_posts_up_to_batch() {
        let collaborators = Arc::new(RecordingCollaborators::default());
        collaborators
            .pending
            .lock()
            .unwrap()
            .extend((0..3).map(|i| job(&format!("Pending {i}"))));
        let queue = queue(&collaborators);
        let sweeper = PendingSweeper::new(collaborators.clone(), queue.clone(), 2);

        assert_eq!(sweeper.sweep_once().await.unwrap(), 2);

        let tally = queue.shutdown(Duration::from_secs(5)).await;
        assert_eq!(tally.succeeded, 2);
        assert_eq!(collaborators.notices().len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_skips_posts_already_queued() {
        let collaborators = Arc::new(RecordingCollaborators::default());
        let pending = job("Listed twice");
        collaborators
            .pending
            .lock()
            .unwrap()
            .extend([pending.clone(), pending]);
        let queue = queue(&collaborators);
        let sweeper = PendingSweeper::new(collaborators.clone(), queue.clone(), 10);

        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        queue.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let collaborators = Arc::new(RecordingCollaborators::default());
        let queue = queue(&collaborators);
        let sweeper = PendingSweeper::new(collaborators.clone(), queue.clone(), 10);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            sweeper.run(Duration::from_secs(3600), shutdown),
        )
        .await
        .expect("sweeper should stop once shutdown fires");
    }

    async fn wait_until_idle(queue: &ModerationQueue) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while queue.pending() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue should go idle");
    }

    #[tokio::test]
    async fn test_stale_listing_does_not_moderate_twice() {
        let collaborators = Arc::new(RecordingCollaborators::default());
        // The source keeps listing the post after its run has decided it.
        collaborators.pending.lock().unwrap().push(job("Stale"));
        let queue = queue(&collaborators);
        let sweeper = PendingSweeper::new(collaborators.clone(), queue.clone(), 10);

        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        wait_until_idle(&queue).await;
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        queue.shutdown(Duration::from_secs(1)).await;

        assert_eq!(collaborators.status_writes().len(), 1);
        assert_eq!(collaborators.comments().len(), 1);
        assert_eq!(collaborators.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_status_write_is_not_resubmitted() {
        let collaborators = Arc::new(RecordingCollaborators::default());
        collaborators.fail_status.store(true, Ordering::SeqCst);
        collaborators.pending.lock().unwrap().push(job("Status lost"));
        let queue = queue(&collaborators);
        let sweeper = PendingSweeper::new(collaborators.clone(), queue.clone(), 10);

        for _ in 0..3 {
            sweeper.sweep_once().await.unwrap();
            wait_until_idle(&queue).await;
        }
        queue.shutdown(Duration::from_secs(1)).await;

        assert_eq!(collaborators.comments().len(), 1);
        assert_eq!(collaborators.notices().len(), 1);
        // The flag is what keeps the post out of listings across restarts.
        assert_eq!(collaborators.flags().len(), 1);
    }
}
