//! Per-session admission control for stream traffic
//!
//! Each session gets a counter and a reset deadline. The first admission
//! opens a window; once the deadline has passed the next admission starts a
//! fresh one. Only [`MessageClass::Stream`] is limited.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::ids::SessionId;

/// Whether a message is subject to rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Room/session management; never limited
    Control,
    /// High-frequency frames (`pose_data`)
    Stream,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<SessionId, Window>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn admit(&self, id: &SessionId, class: MessageClass) -> bool {
        self.admit_at(id, class, Instant::now())
    }

    /// [`admit`](Self::admit) with an explicit clock
    pub fn admit_at(&self, id: &SessionId, class: MessageClass, now: Instant) -> bool {
        if class == MessageClass::Control {
            return true;
        }

        let mut entry = self.windows.entry(id.clone()).or_insert_with(|| Window {
            count: 0,
            reset_at: now + self.window,
            last_seen: now,
        });
        if now > entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }
        entry.count = entry.count.saturating_add(1);
        entry.last_seen = now;

        let admitted = entry.count <= self.limit;
        if !admitted {
            tracing::trace!(session_id = %id, count = entry.count, "Stream message over rate limit");
        }
        admitted
    }

    /// Forget a session's counters
    pub fn purge(&self, id: &SessionId) {
        self.windows.remove(id);
    }

    /// Drop counters untouched for at least `idle_after`; returns how many
    pub fn sweep_idle(&self, now: Instant, idle_after: Duration) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.saturating_duration_since(window.last_seen) < idle_after);
        before.saturating_sub(self.windows.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    fn session(name: &str) -> SessionId {
        SessionId::from_requested(name).unwrap()
    }

    #[test]
    fn test_first_thirty_admitted_rest_dropped() {
        let limiter = RateLimiter::new(30, WINDOW);
        let id = session("phone");
        let now = Instant::now();

        let admitted = (0..45)
            .filter(|_| limiter.admit_at(&id, MessageClass::Stream, now))
            .count();
        assert_eq!(admitted, 30);
    }

    #[test]
    fn test_window_resets_after_deadline() {
        let limiter = RateLimiter::new(30, WINDOW);
        let id = session("phone");
        let start = Instant::now();

        for _ in 0..31 {
            limiter.admit_at(&id, MessageClass::Stream, start);
        }
        // exactly at the deadline the old window still applies
        assert!(!limiter.admit_at(&id, MessageClass::Stream, start + WINDOW));
        assert!(limiter.admit_at(
            &id,
            MessageClass::Stream,
            start + WINDOW + Duration::from_millis(1)
        ));
    }

    #[test]
    fn test_control_messages_never_limited() {
        let limiter = RateLimiter::new(1, WINDOW);
        let id = session("phone");
        let now = Instant::now();

        assert!(limiter.admit_at(&id, MessageClass::Stream, now));
        assert!(!limiter.admit_at(&id, MessageClass::Stream, now));
        for _ in 0..100 {
            assert!(limiter.admit_at(&id, MessageClass::Control, now));
        }
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_sessions_are_independent() {
        let limiter = RateLimiter::new(2, WINDOW);
        let now = Instant::now();
        let a = session("a");
        let b = session("b");

        assert!(limiter.admit_at(&a, MessageClass::Stream, now));
        assert!(limiter.admit_at(&a, MessageClass::Stream, now));
        assert!(!limiter.admit_at(&a, MessageClass::Stream, now));
        assert!(limiter.admit_at(&b, MessageClass::Stream, now));
    }

    #[test]
    fn test_purge_resets_session() {
        let limiter = RateLimiter::new(1, WINDOW);
        let id = session("a");
        let now = Instant::now();
        limiter.admit_at(&id, MessageClass::Stream, now);

        limiter.purge(&id);

        assert!(limiter.is_empty());
        assert!(limiter.admit_at(&id, MessageClass::Stream, now));
    }

    #[test]
    fn test_sweep_removes_only_idle_counters() {
        let limiter = RateLimiter::new(30, WINDOW);
        let start = Instant::now();
        limiter.admit_at(&session("idle"), MessageClass::Stream, start);
        limiter.admit_at(
            &session("busy"),
            MessageClass::Stream,
            start + Duration::from_secs(9),
        );

        let removed = limiter.sweep_idle(start + Duration::from_secs(10), WINDOW * 10);

        assert_eq!(removed, 1);
        assert_eq!(limiter.len(), 1);
    }
}
