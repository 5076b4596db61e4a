//! Per-identifier login throttling.
//!
//! Failures are tracked in a process-local map. Five failures lock the
//! identifier for fifteen minutes; the lock is lifted by a spawned timer
//! that deletes the record, never by the next request, so a lockout cannot
//! end early under load.
//!
//! Scaling: this state is per instance and invisible across a horizontally
//! scaled deployment. Replacing it with a shared TTL counter store keeps the
//! same interface; until then the limitation stands documented here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

const MAX_FAILURES: u32 = 5;
const LOCKOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug)]
struct Attempts {
    failures: u32,
    locked_until: Option<Instant>,
}

/// Tracks failed logins per identifier and enforces lockouts.
#[derive(Debug)]
pub struct BruteForceGuard {
    entries: Mutex<HashMap<String, Attempts>>,
    lockout: Duration,
}

impl BruteForceGuard {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            lockout: LOCKOUT,
        })
    }

    /// Test hook: shortened lockout so timer behavior stays observable.
    #[cfg(test)]
    fn with_lockout(lockout: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            lockout,
        })
    }

    /// Check whether `identifier` may attempt a login.
    ///
    /// # Errors
    /// Returns the remaining wait when the identifier is locked out.
    pub async fn check(&self, identifier: &str) -> Result<(), Duration> {
        let entries = self.entries.lock().await;
        if let Some(entry) = entries.get(identifier) {
            if let Some(locked_until) = entry.locked_until {
                let now = Instant::now();
                if locked_until > now {
                    return Err(locked_until - now);
                }
            }
        }
        Ok(())
    }

    /// Record a failed attempt. The attempt that reaches the failure limit
    /// starts the lockout; it does not itself get reported as limited.
    pub async fn record_failure(self: &Arc<Self>, identifier: &str) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(identifier.to_string()).or_insert(Attempts {
            failures: 0,
            locked_until: None,
        });
        entry.failures += 1;

        if entry.failures >= MAX_FAILURES && entry.locked_until.is_none() {
            entry.locked_until = Some(Instant::now() + self.lockout);
            warn!(identifier, failures = entry.failures, "login lockout engaged");

            // The timer owns expiry: the record disappears when it fires,
            // and with it the lock and the failure count.
            let guard = Arc::clone(self);
            let identifier = identifier.to_string();
            let lockout = self.lockout;
            tokio::spawn(async move {
                tokio::time::sleep(lockout).await;
                let mut entries = guard.entries.lock().await;
                let expired = entries
                    .get(&identifier)
                    .and_then(|entry| entry.locked_until)
                    .is_some_and(|until| until <= Instant::now());
                if expired {
                    entries.remove(&identifier);
                }
            });
        }
    }

    /// Clear the record after a successful login.
    pub async fn record_success(&self, identifier: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(identifier);
    }

    #[cfg(test)]
    async fn failures(&self, identifier: &str) -> Option<u32> {
        let entries = self.entries.lock().await;
        entries.get(identifier).map(|entry| entry.failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_below_the_limit() {
        let guard = BruteForceGuard::new();
        for _ in 0..MAX_FAILURES - 1 {
            guard.record_failure("teacher@example.com").await;
        }
        assert!(guard.check("teacher@example.com").await.is_ok());
    }

    #[tokio::test]
    async fn fifth_failure_locks_for_the_sixth_attempt() {
        let guard = BruteForceGuard::new();
        for i in 1..=MAX_FAILURES {
            // The request producing failure i was itself admitted.
            assert!(guard.check("x").await.is_ok(), "attempt {i} was admitted");
            guard.record_failure("x").await;
        }
        // The sixth attempt is the first to see the lockout.
        let retry_after = guard.check("x").await.expect_err("locked");
        assert!(retry_after <= LOCKOUT);
    }

    #[tokio::test]
    async fn success_clears_the_record() {
        let guard = BruteForceGuard::new();
        guard.record_failure("y").await;
        guard.record_failure("y").await;
        guard.record_success("y").await;
        assert_eq!(guard.failures("y").await, None);
    }

    #[tokio::test]
    async fn lockout_is_lifted_by_the_timer() {
        let guard = BruteForceGuard::with_lockout(Duration::from_millis(50));
        for _ in 0..MAX_FAILURES {
            guard.record_failure("z").await;
        }
        assert!(guard.check("z").await.is_err());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(guard.check("z").await.is_ok());
        // The timer deleted the record outright, not just the lock.
        assert_eq!(guard.failures("z").await, None);
    }

    #[tokio::test]
    async fn identifiers_are_isolated() {
        let guard = BruteForceGuard::new();
        for _ in 0..MAX_FAILURES {
            guard.record_failure("locked@example.com").await;
        }
        assert!(guard.check("locked@example.com").await.is_err());
        assert!(guard.check("other@example.com").await.is_ok());
    }
}
