//! Matches replies to the single outstanding request.
//!
//! Replies are matched by expected command id, not by session id: the hub
//! does not echo the session id on every reply path. That only works while
//! at most one request is in flight, so every request holds the turn lock
//! returned by [`Correlator::begin`] from send until its last reply.
//! Pipelining requests would need real session-based matching.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::codec::Frame;
use crate::error::{HubError, Result};
use crate::messages::{parse_error_notification, CommandId};

#[derive(Debug)]
pub struct Correlator {
    queue: Mutex<VecDeque<Frame>>,
    capacity: usize,
    notify: Notify,
    turn: AsyncMutex<()>,
    open: AtomicBool,
    mirror_limitations: AtomicBool,
}

/// Exclusive right to talk to the hub. Dropping it lets the next request go.
pub type Turn<'a> = AsyncMutexGuard<'a, ()>;

/// Keeps limitation notifications flowing into the reply queue while alive.
pub struct MirrorGuard<'a> {
    correlator: &'a Correlator,
}

impl Drop for MirrorGuard<'_> {
    fn drop(&mut self) {
        self.correlator
            .mirror_limitations
            .store(false, Ordering::Release);
    }
}

impl Correlator {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            turn: AsyncMutex::new(()),
            open: AtomicBool::new(false),
            mirror_limitations: AtomicBool::new(false),
        }
    }

    /// Accepts replies from a fresh connection.
    pub fn open(&self) {
        self.queue.lock().clear();
        self.open.store(true, Ordering::Release);
    }

    /// Fails every waiter with [`HubError::Cancelled`] until reopened.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Waits for the request turn and drops replies nobody claimed.
    pub async fn begin(&self) -> Turn<'_> {
        let turn = self.turn.lock().await;
        let stale = {
            let mut queue = self.queue.lock();
            let stale = queue.len();
            queue.clear();
            stale
        };
        if stale > 0 {
            debug!(stale, "discarded unclaimed replies");
        }
        turn
    }

    /// Enqueues a frame from the read loop. Never blocks: when the queue is
    /// full the oldest frame is dropped.
    pub fn deliver(&self, frame: Frame) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                if let Some(dropped) = queue.pop_front() {
                    warn!(
                        command = %CommandId::from(dropped.command),
                        capacity = self.capacity,
                        "reply queue full, dropping oldest frame"
                    );
                }
            }
            queue.push_back(frame);
        }
        self.notify.notify_one();
    }

    pub fn mirror_limitations(&self) -> MirrorGuard<'_> {
        self.mirror_limitations.store(true, Ordering::Release);
        MirrorGuard { correlator: self }
    }

    pub fn is_mirroring_limitations(&self) -> bool {
        self.mirror_limitations.load(Ordering::Acquire)
    }

    /// Next queued frame, or `Ok(None)` once `wait` passes without one.
    pub async fn next_frame(&self, wait: Duration) -> Result<Option<Frame>> {
        self.next_frame_until(Instant::now() + wait).await
    }

    async fn next_frame_until(&self, deadline: Instant) -> Result<Option<Frame>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(frame) = self.queue.lock().pop_front() {
                return Ok(Some(frame));
            }
            if !self.open.load(Ordering::Acquire) {
                return Err(HubError::Cancelled);
            }
            if time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Waits for a frame carrying `command`, skipping unrelated traffic.
    ///
    /// # Errors
    /// `HubRejected` if the hub answers with `GW_ERROR_NTF`, `Timeout` when
    /// `wait` passes first and `Cancelled` if the link drops meanwhile.
    pub async fn expect(&self, command: CommandId, wait: Duration) -> Result<Frame> {
        let deadline = Instant::now() + wait;
        loop {
            let Some(frame) = self.next_frame_until(deadline).await? else {
                return Err(HubError::Timeout { command });
            };
            match CommandId::from(frame.command) {
                received if received == command => return Ok(frame),
                CommandId::ErrorNtf => {
                    return Err(HubError::HubRejected(parse_error_notification(
                        &frame.payload,
                    )))
                }
                other => debug!(expected = %command, received = %other, "skipping unrelated frame"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::messages::HubErrorCode;

    fn frame(command: CommandId) -> Frame {
        Frame::new(command, vec![0u8, 1, 0])
    }

    #[tokio::test]
    async fn expect_skips_unrelated_frames() {
        let correlator = Correlator::new(8);
        correlator.open();
        correlator.deliver(frame(CommandId::SessionFinishedNtf));
        correlator.deliver(frame(CommandId::CommandSendCfm));

        let got = correlator
            .expect(CommandId::CommandSendCfm, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(got.command, 0x0301);
    }

    #[tokio::test]
    async fn error_notification_rejects_request() {
        let correlator = Correlator::new(8);
        correlator.open();
        correlator.deliver(Frame::new(CommandId::ErrorNtf, vec![7u8]));

        let err = correlator
            .expect(CommandId::CommandSendCfm, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::HubRejected(HubErrorCode::Busy)));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_queue_times_out() {
        let correlator = Correlator::new(8);
        correlator.open();
        assert!(correlator
            .next_frame(Duration::from_secs(2))
            .await
            .unwrap()
            .is_none());
        let err = correlator
            .expect(CommandId::PasswordEnterCfm, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HubError::Timeout {
                command: CommandId::PasswordEnterCfm
            }
        ));
    }

    #[tokio::test]
    async fn full_queue_drops_oldest() {
        let correlator = Correlator::new(2);
        correlator.open();
        correlator.deliver(frame(CommandId::PasswordEnterCfm));
        correlator.deliver(frame(CommandId::CommandSendCfm));
        correlator.deliver(frame(CommandId::GetLimitationStatusCfm));

        let first = correlator.next_frame(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.command, u16::from(CommandId::CommandSendCfm));
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let correlator = Arc::new(Correlator::new(4));
        correlator.open();
        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .expect(CommandId::CommandSendCfm, Duration::from_secs(30))
                    .await
            })
        };
        tokio::task::yield_now().await;
        correlator.close();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, HubError::Cancelled));
    }

    #[tokio::test]
    async fn begin_discards_stale_replies() {
        let correlator = Correlator::new(4);
        correlator.open();
        correlator.deliver(frame(CommandId::CommandSendCfm));
        let _turn = correlator.begin().await;
        assert!(correlator.next_frame(Duration::ZERO).await.unwrap().is_none());
    }

    #[test]
    fn mirror_guard_resets_flag() {
        let correlator = Correlator::new(4);
        {
            let _mirror = correlator.mirror_limitations();
            assert!(correlator.is_mirroring_limitations());
        }
        assert!(!correlator.is_mirroring_limitations());
    }
}
