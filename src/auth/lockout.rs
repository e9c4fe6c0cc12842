//! Login-attempt governor: a fixed-window failure counter per username.
//!
//! After `max_attempts` consecutive failures the username is locked for
//! `lock_for`. A locked username is rejected before credentials are looked
//! at. Once the lock elapses the entry is dropped and counting restarts.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use time::{Duration, OffsetDateTime};
use tracing::warn;

use crate::config::LockoutConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptState {
    pub failures: u32,
    pub locked_until: Option<OffsetDateTime>,
}

/// Backing table for the governor. `modify` runs the closure atomically on
/// the entry for `username`; returning `None` from it removes the entry.
pub trait LoginAttemptStore: Send + Sync {
    fn modify(
        &self,
        username: &str,
        f: &mut dyn FnMut(Option<AttemptState>) -> Option<AttemptState>,
    );
}

#[derive(Default)]
pub struct MemoryAttemptStore {
    entries: Mutex<HashMap<String, AttemptState>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, username: &str) -> Option<AttemptState> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(username)
            .cloned()
    }
}

impl LoginAttemptStore for MemoryAttemptStore {
    fn modify(
        &self,
        username: &str,
        f: &mut dyn FnMut(Option<AttemptState>) -> Option<AttemptState>,
    ) {
        // a poisoned map still holds consistent entries; keep going
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let current = entries.remove(username);
        if let Some(next) = f(current) {
            entries.insert(username.to_string(), next);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locked {
    pub until: OffsetDateTime,
}

impl Locked {
    pub fn retry_after_secs(&self, now: OffsetDateTime) -> u64 {
        let secs = (self.until - now).whole_seconds();
        secs.max(1) as u64
    }
}

#[derive(Clone)]
pub struct LoginGovernor {
    store: Arc<dyn LoginAttemptStore>,
    max_attempts: u32,
    lock_for: Duration,
}

impl LoginGovernor {
    pub fn new(store: Arc<dyn LoginAttemptStore>, max_attempts: u32, lock_for: Duration) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            lock_for,
        }
    }

    pub fn from_config(store: Arc<dyn LoginAttemptStore>, cfg: &LockoutConfig) -> Self {
        Self::new(store, cfg.max_attempts, Duration::minutes(cfg.lockout_minutes))
    }

    /// Rejects while a lock is active; clears an elapsed lock together with its counter.
    pub fn check(&self, username: &str, now: OffsetDateTime) -> Result<(), Locked> {
        let mut verdict = Ok(());
        self.store.modify(username, &mut |entry| match entry {
            Some(AttemptState {
                locked_until: Some(until),
                ..
            }) if now < until => {
                verdict = Err(Locked { until });
                entry
            }
            Some(AttemptState {
                locked_until: Some(_),
                ..
            }) => None,
            other => other,
        });
        verdict
    }

    /// Counts a failure. Returns the lock when this failure reached the threshold.
    pub fn record_failure(&self, username: &str, now: OffsetDateTime) -> Option<Locked> {
        let max = self.max_attempts;
        let lock_for = self.lock_for;
        let mut locked = None;
        self.store.modify(username, &mut |entry| {
            let mut state = entry.unwrap_or_default();
            state.failures += 1;
            if state.failures >= max && state.locked_until.is_none() {
                let until = now + lock_for;
                state.locked_until = Some(until);
                locked = Some(Locked { until });
            }
            Some(state)
        });
        if let Some(Locked { until }) = locked {
            warn!(username, %until, "login locked after repeated failures");
        }
        locked
    }

    pub fn record_success(&self, username: &str) {
        self.clear(username);
    }

    /// Drops counter and lock, used by signin success and admin unlock.
    pub fn clear(&self, username: &str) {
        self.store.modify(username, &mut |_| None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn governor() -> (Arc<MemoryAttemptStore>, LoginGovernor) {
        let store = Arc::new(MemoryAttemptStore::new());
        let gov = LoginGovernor::new(store.clone(), 5, Duration::minutes(15));
        (store, gov)
    }

    const T0: OffsetDateTime = datetime!(2025-03-01 09:00:00 UTC);

    #[test]
    fn locks_on_fifth_failure_and_rejects_until_window_ends() {
        let (_, gov) = governor();
        for i in 1..=4 {
            assert!(gov.check("bob", T0).is_ok());
            assert_eq!(gov.record_failure("bob", T0), None, "failure {i}");
        }
        assert!(gov.check("bob", T0).is_ok());
        let lock = gov.record_failure("bob", T0).expect("fifth failure locks");
        assert_eq!(lock.until, T0 + Duration::minutes(15));

        let err = gov.check("bob", T0 + Duration::minutes(14)).unwrap_err();
        assert_eq!(err.until, lock.until);
        assert_eq!(err.retry_after_secs(T0 + Duration::minutes(14)), 60);
    }

    #[test]
    fn elapsed_lock_is_cleared_and_tolerates_another_failure() {
        let (store, gov) = governor();
        for _ in 0..5 {
            gov.record_failure("bob", T0);
        }
        let later = T0 + Duration::minutes(15);
        assert!(gov.check("bob", later).is_ok());
        assert_eq!(store.get("bob"), None);

        assert_eq!(gov.record_failure("bob", later), None);
        assert!(gov.check("bob", later).is_ok());
    }

    #[test]
    fn success_resets_counter() {
        let (store, gov) = governor();
        for _ in 0..4 {
            gov.record_failure("bob", T0);
        }
        gov.record_success("bob");
        assert_eq!(store.get("bob"), None);
        for _ in 0..4 {
            assert_eq!(gov.record_failure("bob", T0), None);
        }
        assert!(gov.check("bob", T0).is_ok());
    }

    #[test]
    fn usernames_are_independent() {
        let (_, gov) = governor();
        for _ in 0..5 {
            gov.record_failure("bob", T0);
        }
        assert!(gov.check("bob", T0).is_err());
        assert!(gov.check("alice", T0).is_ok());
    }

    #[test]
    fn failures_while_locked_do_not_extend_the_lock() {
        let (_, gov) = governor();
        for _ in 0..5 {
            gov.record_failure("bob", T0);
        }
        assert_eq!(gov.record_failure("bob", T0 + Duration::minutes(10)), None);
        let err = gov.check("bob", T0 + Duration::minutes(10)).unwrap_err();
        assert_eq!(err.until, T0 + Duration::minutes(15));
    }
}
