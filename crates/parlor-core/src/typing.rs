use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use serde_json::json;
use tokio::time::{Instant, Sleep};

use crate::connection::Outbox;

/// How long a remote typing indicator stays up after the last notice.
pub const TYPING_DECAY: Duration = Duration::from_millis(2500);

/// One-shot timer owned by its tracker.
///
/// Arming replaces any pending deadline; cancelling or dropping the timer
/// guarantees it never fires.
#[derive(Debug, Default)]
pub struct DecayTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl DecayTimer {
    /// Must be called within a tokio runtime.
    pub fn arm(&mut self, after: Duration) {
        self.sleep = Some(Box::pin(tokio::time::sleep(after)));
    }

    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|sleep| sleep.deadline())
    }

    /// Resolves once the armed deadline passes, then disarms.
    /// Never resolves while unarmed. Safe to drop mid-wait.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending::<()>().await,
        }
    }
}

/// Remote "is typing" indicator plus outbound typing notices.
///
/// Only the most recent remote typer is tracked; a newer notice replaces both
/// the author and the decay deadline.
#[derive(Debug, Default)]
pub struct TypingTracker {
    active_typer: Option<String>,
    timer: DecayTimer,
    throttle: Option<Duration>,
    last_sent: Option<Instant>,
}

impl TypingTracker {
    /// `throttle` is the minimum gap between outbound notices; `None` sends one
    /// per keystroke.
    pub fn new(throttle: Option<Duration>) -> Self {
        Self {
            throttle,
            ..Self::default()
        }
    }

    pub fn active_typer(&self) -> Option<&str> {
        self.active_typer.as_deref()
    }

    pub fn expiry(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Tell the room the local user is typing. Returns whether a notice went out.
    pub fn notify_typing(&mut self, outbox: &impl Outbox, room: &str, author: &str) -> bool {
        let now = Instant::now();
        if let (Some(window), Some(last)) = (self.throttle, self.last_sent) {
            if now.duration_since(last) < window {
                tracing::trace!("typing notice throttled");
                return false;
            }
        }
        outbox.emit("typing", vec![json!(room), json!(author)]);
        self.last_sent = Some(now);
        true
    }

    /// Handle a `user_typing` notice. Our own notices are never shown.
    ///
    /// Returns whether the indicator was (re)set.
    pub fn on_remote_typing(&mut self, author: &str, local_user: &str) -> bool {
        if author == local_user {
            return false;
        }
        tracing::debug!("{author} is typing");
        self.active_typer = Some(author.to_string());
        self.timer.arm(TYPING_DECAY);
        true
    }

    /// Wait for the decay deadline. Pending while no indicator is armed.
    pub async fn expired(&mut self) {
        self.timer.fired().await;
    }

    /// Clear the indicator, whoever set it. Returns the typer that was shown.
    pub fn decay(&mut self) -> Option<String> {
        self.timer.cancel();
        self.active_typer.take()
    }

    /// Stop the decay timer without touching the indicator (teardown).
    pub fn cancel(&mut self) {
        self.timer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingOutbox;
    use tokio::time::timeout;

    const JITTER: Duration = Duration::from_millis(5);

    #[tokio::test(start_paused = true)]
    async fn own_notices_are_suppressed() {
        let mut tracker = TypingTracker::new(None);
        assert!(!tracker.on_remote_typing("Alice", "Alice"));
        assert_eq!(tracker.active_typer(), None);
        assert_eq!(tracker.expiry(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_notice_decays_after_window() {
        let mut tracker = TypingTracker::new(None);
        let start = Instant::now();

        assert!(tracker.on_remote_typing("Bob", "Alice"));
        assert_eq!(tracker.active_typer(), Some("Bob"));
        assert_eq!(tracker.expiry(), Some(start + TYPING_DECAY));

        tracker.expired().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= TYPING_DECAY, "fired early: {elapsed:?}");
        assert!(elapsed <= TYPING_DECAY + JITTER, "fired late: {elapsed:?}");

        assert_eq!(tracker.decay(), Some("Bob".to_string()));
        assert_eq!(tracker.active_typer(), None);
        assert_eq!(tracker.expiry(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_notice_resets_the_window() {
        let mut tracker = TypingTracker::new(None);
        let start = Instant::now();

        tracker.on_remote_typing("Bob", "Alice");
        tokio::time::advance(Duration::from_millis(1000)).await;
        tracker.on_remote_typing("Carol", "Alice");

        assert_eq!(tracker.active_typer(), Some("Carol"));
        assert_eq!(tracker.expiry(), Some(start + Duration::from_millis(3500)));

        // The first deadline (2500 ms) passes without firing.
        assert!(timeout(Duration::from_millis(1600), tracker.expired()).await.is_err());
        assert_eq!(tracker.active_typer(), Some("Carol"));

        tracker.expired().await;
        assert!(start.elapsed() >= Duration::from_millis(3500));
        assert_eq!(tracker.decay(), Some("Carol".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn decay_timer_disarms_after_firing() {
        let mut timer = DecayTimer::default();
        assert!(!timer.is_armed());

        timer.arm(Duration::from_millis(10));
        assert!(timer.is_armed());
        timer.fired().await;
        assert!(!timer.is_armed());

        timer.arm(Duration::from_millis(10));
        timer.cancel();
        assert!(!timer.is_armed());
        assert_eq!(timer.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unarmed_timer_never_fires() {
        let mut tracker = TypingTracker::new(None);
        assert!(timeout(Duration::from_secs(60), tracker.expired()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disarms_pending_decay() {
        let mut tracker = TypingTracker::new(None);
        tracker.on_remote_typing("Bob", "Alice");
        tracker.cancel();
        assert!(timeout(Duration::from_secs(10), tracker.expired()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn every_keystroke_emits_without_throttle() {
        let outbox = RecordingOutbox::default();
        let mut tracker = TypingTracker::new(None);

        for _ in 0..3 {
            assert!(tracker.notify_typing(&outbox, "sala1", "Alice"));
        }

        assert_eq!(outbox.names(), ["typing", "typing", "typing"]);
        assert_eq!(
            outbox.sent.borrow()[0].1,
            vec![json!("sala1"), json!("Alice")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_limits_outbound_notices() {
        let outbox = RecordingOutbox::default();
        let mut tracker = TypingTracker::new(Some(Duration::from_millis(400)));

        assert!(tracker.notify_typing(&outbox, "sala1", "Alice"));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!tracker.notify_typing(&outbox, "sala1", "Alice"));
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(tracker.notify_typing(&outbox, "sala1", "Alice"));

        assert_eq!(outbox.sent.borrow().len(), 2);
    }
}
