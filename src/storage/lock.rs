//! Per-Key Exclusive Locks
//!
//! Every key slot carries a [`KeyLock`] that serializes writers to that key.
//! Two properties keep the store from getting stuck:
//!
//! 1. **Bounded waits**: acquisition gives up after `acquire_timeout`.
//! 2. **Stale takeover**: a holder that keeps the lock longer than `max_hold`
//!    is force-released by the next acquirer.
//!
//! Each grant carries a token. Releasing only clears the lock if the token
//! still matches, so a stalled holder that wakes up after a takeover cannot
//! release the lock out from under the new holder, and releasing twice is
//! harmless.
//!
//! ```text
//!            lock()                        drop(guard)
//!   Free ──────────────> Held(token, t) ──────────────> Free
//!                          │       ▲
//!                          │       │ lock() after t + max_hold
//!                          └───────┘ (new token, old release is a no-op)
//! ```

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Timing policy for per-key locks.
///
/// # Example
///
/// ```
/// use memkv::storage::LockConfig;
/// use std::time::Duration;
///
/// let config = LockConfig::default()
///     .with_acquire_timeout(Duration::from_millis(500))
///     .with_max_hold(Duration::from_secs(2));
/// assert_eq!(config.max_hold, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// How long a writer waits for a key before failing (default: 5s)
    pub acquire_timeout: Duration,

    /// How long a holder may keep a key before it can be taken over (default: 10s)
    pub max_hold: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(5),
            max_hold: Duration::from_secs(10),
        }
    }
}

impl LockConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a writer waits for a busy key.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the age after which a held key lock is considered stale.
    pub fn with_max_hold(mut self, max_hold: Duration) -> Self {
        self.max_hold = max_hold;
        self
    }
}

/// Returned when a lock could not be acquired in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimedOut {
    /// How long the caller actually waited
    pub waited: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    token: u64,
    acquired_at: Instant,
}

#[derive(Debug, Default)]
struct LockState {
    holder: Option<Holder>,
    next_token: u64,
}

/// A timed, token-checked exclusive lock.
#[derive(Debug, Default)]
pub struct KeyLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl KeyLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock, waiting at most `timeout`.
    ///
    /// A current holder older than `max_hold` is displaced immediately; the
    /// returned guard then reports [`KeyGuard::forced`].
    pub fn lock(
        &self,
        timeout: Duration,
        max_hold: Duration,
    ) -> Result<KeyGuard<'_>, LockTimedOut> {
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let mut state = self.state();

        loop {
            let now = Instant::now();
            let current = state.holder;
            let holder = match current {
                None => return Ok(self.grant(&mut state, now, false)),
                Some(holder) => holder,
            };

            if now.saturating_duration_since(holder.acquired_at) >= max_hold {
                return Ok(self.grant(&mut state, now, true));
            }

            if deadline.is_some_and(|d| now >= d) {
                return Err(LockTimedOut {
                    waited: now.saturating_duration_since(started),
                });
            }

            // Wake on release, at the deadline, or when the holder goes stale
            let stale_at = holder.acquired_at.checked_add(max_hold);
            let wake_at = match (deadline, stale_at) {
                (Some(d), Some(s)) => Some(d.min(s)),
                (d, s) => d.or(s),
            };

            state = match wake_at {
                Some(at) => {
                    let wait = at.saturating_duration_since(now);
                    self.released
                        .wait_timeout(state, wait)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .released
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Acquires the lock only if nobody holds it right now.
    pub fn try_lock(&self) -> Option<KeyGuard<'_>> {
        let mut state = self.state();
        if state.holder.is_some() {
            return None;
        }
        Some(self.grant(&mut state, Instant::now(), false))
    }

    /// Returns true if some guard currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state().holder.is_some()
    }

    fn grant(&self, state: &mut LockState, now: Instant, forced: bool) -> KeyGuard<'_> {
        state.next_token = state.next_token.wrapping_add(1);
        let token = state.next_token;
        state.holder = Some(Holder {
            token,
            acquired_at: now,
        });
        KeyGuard {
            lock: self,
            token,
            forced,
        }
    }

    /// Clears the holder if `token` still owns the lock.
    fn release(&self, token: u64) {
        let mut state = self.state();
        if state.holder.is_some_and(|h| h.token == token) {
            state.holder = None;
            drop(state);
            self.released.notify_one();
        }
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds a [`KeyLock`] until dropped.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    lock: &'a KeyLock,
    token: u64,
    forced: bool,
}

impl KeyGuard<'_> {
    /// True if this guard displaced a stale holder.
    pub fn forced(&self) -> bool {
        self.forced
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.token);
    }
}
