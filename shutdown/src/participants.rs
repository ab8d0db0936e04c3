use std::time::Duration;
use tokio::time;
use tokio_util::task::{task_tracker::TaskTrackerToken, TaskTracker};
use tracing::{debug, warn};

// Join-counter of running loops. Sealed by the close sequence, after which
// `drained` resolves as soon as the last participant exits.
#[derive(Debug, Default)]
pub(crate) struct Participants {
    tracker: TaskTracker,
}

impl Participants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the caller as active until the returned token is dropped.
    pub fn join(&self) -> TaskTrackerToken {
        let token = self.tracker.token();
        debug!(participants = self.tracker.len(), "participant joined");
        token
    }

    pub fn seal(&self) {
        self.tracker.close();
    }

    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    pub async fn drained(&self, warn_after: Option<Duration>) {
        let Some(interval) = warn_after else {
            self.tracker.wait().await;
            return;
        };

        let wait = self.tracker.wait();
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => return,
                _ = time::sleep(interval) => {
                    warn!(
                        participants = self.tracker.len(),
                        wait_secs = interval.as_secs(),
                        "participants still running after close"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_drained_waits_for_seal_and_exit() {
        let participants = Participants::new();
        let token = participants.join();
        assert_eq!(participants.active(), 1);

        participants.seal();
        let drained = time::timeout(Duration::from_millis(10), participants.drained(None)).await;
        assert!(drained.is_err(), "drain must wait for the participant");

        drop(token);
        let drained = time::timeout(Duration::from_millis(10), participants.drained(None)).await;
        assert!(drained.is_ok());
        assert_eq!(participants.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_with_warning_still_completes() {
        let participants = Participants::new();
        let token = participants.join();
        participants.seal();

        tokio::spawn(async move {
            time::sleep(Duration::from_secs(5)).await;
            drop(token);
        });

        let start = time::Instant::now();
        participants.drained(Some(Duration::from_secs(1))).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
