//! Periodic keyframe requests
//!
//! Sends a PLI to the publisher on a fixed interval so subscribers that join
//! late, or lose packets, get a decodable frame within one interval.

use std::sync::Arc;
use std::time::Duration;

use minisfu_protocol::RelayState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::transport::FeedbackChannel;

pub const DEFAULT_KEYFRAME_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy)]
pub struct KeyframeScheduler {
    interval: Duration,
}

impl Default for KeyframeScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_KEYFRAME_INTERVAL)
    }
}

impl KeyframeScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the scheduler for the stream `ssrc`.
    ///
    /// The task stops once `state` reports `Terminated` or its sender is
    /// dropped, and yields the number of requests it sent.
    pub fn spawn(
        self,
        ssrc: u32,
        feedback: Arc<dyn FeedbackChannel>,
        state: watch::Receiver<RelayState>,
    ) -> JoinHandle<u64> {
        tokio::spawn(self.run(ssrc, feedback, state))
    }

    pub async fn run(
        self,
        ssrc: u32,
        feedback: Arc<dyn FeedbackChannel>,
        mut state: watch::Receiver<RelayState>,
    ) -> u64 {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sent = 0u64;

        tracing::info!(
            "Requesting keyframes for SSRC {} every {:?}",
            ssrc,
            self.interval
        );

        loop {
            if *state.borrow_and_update() == RelayState::Terminated {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    match feedback.request_keyframe(ssrc).await {
                        Ok(()) => {
                            sent += 1;
                            tracing::debug!("Sent PLI #{} for SSRC {}", sent, ssrc);
                        }
                        Err(e) => {
                            tracing::warn!("Failed to send PLI for SSRC {}: {}", ssrc, e);
                        }
                    }
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            "Stopped keyframe requests for SSRC {} after {} PLIs",
            ssrc,
            sent
        );

        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sfu::transport::TransportError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingFeedback {
        requests: Mutex<Vec<(Instant, u32)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl FeedbackChannel for RecordingFeedback {
        async fn request_keyframe(&self, media_ssrc: u32) -> Result<(), TransportError> {
            self.requests.lock().unwrap().push((Instant::now(), media_ssrc));
            if self.fail {
                Err(TransportError::Closed)
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_once_per_interval() {
        let feedback = Arc::new(RecordingFeedback::default());
        let (state_tx, state_rx) = watch::channel(RelayState::Active);
        let start = Instant::now();

        let handle = KeyframeScheduler::default().spawn(0xdead_beef, feedback.clone(), state_rx);

        time::sleep(Duration::from_millis(9_500)).await;
        tokio_test::assert_ok!(state_tx.send(RelayState::Terminated));
        let sent = tokio_test::assert_ok!(handle.await);

        assert_eq!(sent, 3);
        let requests = feedback.requests.lock().unwrap();
        let offsets: Vec<_> = requests
            .iter()
            .map(|(at, ssrc)| {
                assert_eq!(*ssrc, 0xdead_beef);
                at.duration_since(start).as_secs()
            })
            .collect();
        assert_eq!(offsets, vec![3, 6, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failures_are_not_fatal() {
        let feedback = Arc::new(RecordingFeedback {
            fail: true,
            ..Default::default()
        });
        let (state_tx, state_rx) = watch::channel(RelayState::Active);

        let handle = KeyframeScheduler::new(Duration::from_secs(1)).spawn(7, feedback.clone(), state_rx);

        time::sleep(Duration::from_millis(3_500)).await;
        drop(state_tx);
        let sent = tokio_test::assert_ok!(handle.await);

        assert_eq!(sent, 0);
        assert_eq!(feedback.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_terminated_sends_nothing() {
        let feedback = Arc::new(RecordingFeedback::default());
        let (_state_tx, state_rx) = watch::channel(RelayState::Terminated);

        let sent = KeyframeScheduler::default().run(1, feedback.clone(), state_rx).await;

        assert_eq!(sent, 0);
        assert!(feedback.requests.lock().unwrap().is_empty());
    }
}
