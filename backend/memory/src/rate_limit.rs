//! Chat rate limiting.
//!
//! Two independent limits: a sliding window over the sends a session made,
//! and a coarse fixed-window counter per client address. Both live in moka
//! caches so idle sessions and one-off addresses age out on their own.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use moka::Expiry;
use moka::ops::compute::Op;
use moka::sync::Cache;
use tracing::{debug, warn};

use flowchat_core::{Clock, RateLimitConfig};

pub const ADDRESS_WINDOW_SECS: i64 = 60 * 60;
pub const ADDRESS_CEILING: u32 = 100;

const MAX_TRACKED_SESSIONS: u64 = 100_000;
const MAX_TRACKED_ADDRESSES: u64 = 100_000;

/// Accepted sends for one session inside its trailing window.
#[derive(Debug, Clone)]
struct SendLog {
    window: Duration,
    sent_at: VecDeque<DateTime<Utc>>,
}

/// A session's log outlives its last send by one window.
struct SendLogExpiry;

impl Expiry<String, SendLog> for SendLogExpiry {
    fn expire_after_create(&self, _key: &String, value: &SendLog, _created_at: Instant) -> Option<StdDuration> {
        value.window.to_std().ok()
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &SendLog,
        _updated_at: Instant,
        _duration_until_expiry: Option<StdDuration>,
    ) -> Option<StdDuration> {
        value.window.to_std().ok()
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    sessions: Cache<String, SendLog>,
    // client address -> (request_count, window_start)
    addresses: Cache<String, (u32, DateTime<Utc>)>,
    address_ceiling: u32,
    address_window: Duration,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sessions: Cache::builder()
                .max_capacity(MAX_TRACKED_SESSIONS)
                .expire_after(SendLogExpiry)
                .build(),
            addresses: address_cache(Duration::seconds(ADDRESS_WINDOW_SECS)),
            address_ceiling: ADDRESS_CEILING,
            address_window: Duration::seconds(ADDRESS_WINDOW_SECS),
        }
    }

    /// Override the per-address ceiling and window.
    pub fn with_address_limit(mut self, ceiling: u32, window: Duration) -> Self {
        self.address_ceiling = ceiling;
        self.address_window = window;
        self.addresses = address_cache(window);
        self
    }

    /// Decide whether `session_id` may send another message, and count it if so.
    ///
    /// Always true when `config` is absent or disabled. Otherwise the address
    /// counter is bumped on every call, even when the session limit already
    /// denies the message. Only allowed sends enter the session's window.
    pub fn can_send_message(
        &self,
        session_id: &str,
        config: Option<&RateLimitConfig>,
        client_addr: Option<&str>,
    ) -> bool {
        let Some(config) = config.filter(|c| c.enabled) else {
            return true;
        };
        let now = self.clock.now();

        let address_ok = match client_addr {
            Some(addr) => self.check_address(addr, now),
            None => true,
        };
        self.check_session(session_id, config, now, address_ok) && address_ok
    }

    /// Slide the session's window to `now` and append `now` when the send goes through.
    fn check_session(&self, session_id: &str, config: &RateLimitConfig, now: DateTime<Utc>, record: bool) -> bool {
        let window = i64::try_from(config.time_window)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let since = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut sent = 0;
        let mut allowed = false;

        self.sessions.entry(session_id.to_string()).and_compute_with(|entry| {
            let mut log = entry
                .map(|e| e.into_value())
                .unwrap_or_else(|| SendLog { window, sent_at: VecDeque::new() });
            log.window = window;
            while log.sent_at.front().is_some_and(|at| *at < since) {
                log.sent_at.pop_front();
            }

            sent = log.sent_at.len();
            allowed = sent < config.max_messages as usize;
            if allowed && record {
                log.sent_at.push_back(now);
            }
            if log.sent_at.is_empty() { Op::Remove } else { Op::Put(log) }
        });

        if !allowed {
            warn!(
                session_id,
                sent,
                max = config.max_messages,
                window_secs = config.time_window,
                "Session rate limit exceeded"
            );
        }
        allowed
    }

    fn check_address(&self, addr: &str, now: DateTime<Utc>) -> bool {
        let mut count = 0;
        self.addresses.entry(addr.to_string()).and_compute_with(|entry| {
            let state = match entry.map(|e| e.into_value()) {
                Some((n, start)) if now - start < self.address_window => (n + 1, start),
                Some(_) => {
                    debug!("Address rate window reset for {}", addr);
                    (1, now)
                }
                None => (1, now),
            };
            count = state.0;
            Op::Put(state)
        });

        if count > self.address_ceiling {
            warn!("Address rate limit exceeded for {} ({} requests)", addr, count);
            false
        } else {
            true
        }
    }
}

fn address_cache(window: Duration) -> Cache<String, (u32, DateTime<Utc>)> {
    let ttl = window
        .to_std()
        .unwrap_or(StdDuration::from_secs(ADDRESS_WINDOW_SECS as u64));
    Cache::builder()
        .max_capacity(MAX_TRACKED_ADDRESSES)
        .time_to_live(ttl)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemorySessionStore, SessionStore};
    use flowchat_core::{ManualClock, Role};

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (RateLimiter::new(clock.clone()), clock)
    }

    fn config(max_messages: u32, time_window: u64) -> RateLimitConfig {
        RateLimitConfig { enabled: true, max_messages, time_window }
    }

    #[test]
    fn absent_or_disabled_config_always_allows() {
        let (limiter, _) = limiter();
        assert!(limiter.can_send_message("s1", None, Some("1.2.3.4")));

        let disabled = RateLimitConfig { enabled: false, ..config(0, 60) };
        assert!(limiter.can_send_message("s1", Some(&disabled), None));
    }

    #[test]
    fn fourth_message_in_window_is_denied_until_it_slides() {
        let (limiter, clock) = limiter();
        let cfg = config(3, 60);

        for _ in 0..3 {
            assert!(limiter.can_send_message("s1", Some(&cfg), None));
            clock.advance(Duration::seconds(5));
        }
        assert!(!limiter.can_send_message("s1", Some(&cfg), None));
        // other sessions have their own window
        assert!(limiter.can_send_message("s2", Some(&cfg), None));

        clock.advance(Duration::seconds(61));
        assert!(limiter.can_send_message("s1", Some(&cfg), None));
    }

    #[tokio::test]
    async fn window_larger_than_retained_history_is_enforced() {
        let clock = Arc::new(ManualClock::default());
        let store = InMemorySessionStore::with_clock(clock.clone());
        let limiter = RateLimiter::new(clock.clone());
        let session = store.open("wf", None).await.unwrap();
        let cfg = config(15, 3600);

        let mut allowed = 0;
        for n in 0..40 {
            if limiter.can_send_message(&session.id, Some(&cfg), None) {
                allowed += 1;
                store.append(&session.id, Role::User, &format!("q{n}")).await.unwrap();
                store.append(&session.id, Role::Assistant, &format!("a{n}")).await.unwrap();
            }
            clock.advance(Duration::seconds(1));
        }

        assert_eq!(allowed, 15);
        assert_eq!(store.history(&session.id).await.unwrap().len(), store.max_history());
    }

    #[test]
    fn address_counter_ticks_on_every_call() {
        let (limiter, clock) = limiter();
        let limiter = limiter.with_address_limit(2, Duration::seconds(ADDRESS_WINDOW_SECS));
        let cfg = config(100, 60);

        assert!(limiter.can_send_message("a", Some(&cfg), Some("10.0.0.1")));
        assert!(limiter.can_send_message("b", Some(&cfg), Some("10.0.0.1")));
        assert!(!limiter.can_send_message("a", Some(&cfg), Some("10.0.0.1")));
        // other addresses are unaffected
        assert!(limiter.can_send_message("a", Some(&cfg), Some("10.0.0.2")));

        clock.advance(Duration::hours(1));
        assert!(limiter.can_send_message("a", Some(&cfg), Some("10.0.0.1")));
    }

    #[test]
    fn session_denial_still_counts_address() {
        let (limiter, _) = limiter();
        let limiter = limiter.with_address_limit(1, Duration::seconds(ADDRESS_WINDOW_SECS));
        let blocked = config(0, 60);
        let open = config(10, 60);

        assert!(!limiter.can_send_message("s1", Some(&blocked), Some("9.9.9.9")));
        assert!(!limiter.can_send_message("s1", Some(&open), Some("9.9.9.9")));
    }

    #[test]
    fn address_denial_does_not_use_up_the_session_window() {
        let (limiter, _) = limiter();
        let limiter = limiter.with_address_limit(1, Duration::seconds(ADDRESS_WINDOW_SECS));
        let cfg = config(1, 60);

        assert!(limiter.can_send_message("s1", Some(&cfg), Some("9.9.9.9")));
        assert!(!limiter.can_send_message("s2", Some(&cfg), Some("9.9.9.9")));
        assert!(limiter.can_send_message("s2", Some(&cfg), Some("9.9.9.10")));
    }

    #[test]
    fn expired_addresses_are_dropped() {
        let (limiter, _) = limiter();
        let limiter = limiter.with_address_limit(5, Duration::milliseconds(50));
        let cfg = config(100, 60);

        for n in 0..20 {
            assert!(limiter.can_send_message("s1", Some(&cfg), Some(&format!("10.1.0.{n}"))));
        }
        assert!(limiter.addresses.contains_key("10.1.0.0"));

        std::thread::sleep(StdDuration::from_millis(120));
        limiter.addresses.run_pending_tasks();
        assert!(!limiter.addresses.contains_key("10.1.0.0"));
        assert_eq!(limiter.addresses.entry_count(), 0);
    }
}
