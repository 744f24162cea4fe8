//! Replay and revocation state for token ids.
//!
//! All three maps live behind one mutex so that "is it revoked, is it
//! consumed, consume it" is a single critical section.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

/// Outcome of [`JtiStore::try_consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed,
    AlreadyConsumed,
    Revoked,
}

#[derive(Debug, Default)]
struct JtiState {
    /// jti -> expiry (unix seconds).
    consumed: HashMap<String, i64>,
    revoked: HashMap<String, i64>,
    /// session id -> (jti, expiry) minted under it.
    sessions: HashMap<String, Vec<(String, i64)>>,
}

#[derive(Debug, Default)]
pub struct JtiStore {
    state: Mutex<JtiState>,
}

impl JtiStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, JtiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_consumed(&self, jti: &str) -> bool {
        self.state().consumed.contains_key(jti)
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.state().revoked.contains_key(jti)
    }

    /// Mark `jti` consumed unless it is already consumed or revoked.
    pub fn try_consume(&self, jti: &str, exp: i64) -> ConsumeOutcome {
        let mut state = self.state();
        if state.revoked.contains_key(jti) {
            return ConsumeOutcome::Revoked;
        }
        if state.consumed.contains_key(jti) {
            return ConsumeOutcome::AlreadyConsumed;
        }
        state.consumed.insert(jti.to_string(), exp);
        ConsumeOutcome::Consumed
    }

    pub fn revoke(&self, jti: &str, exp: i64) {
        self.state().revoked.insert(jti.to_string(), exp);
    }

    pub fn track_session(&self, session_id: &str, jti: &str, exp: i64) {
        self.state()
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .push((jti.to_string(), exp));
    }

    /// Revoke every jti minted under `session_id`. Returns the revoked ids.
    pub fn revoke_session(&self, session_id: &str) -> Vec<String> {
        let mut state = self.state();
        let minted = state.sessions.remove(session_id).unwrap_or_default();
        let mut revoked = Vec::with_capacity(minted.len());
        for (jti, exp) in minted {
            state.revoked.insert(jti.clone(), exp);
            revoked.push(jti);
        }
        revoked
    }

    pub fn session_jtis(&self, session_id: &str) -> Vec<String> {
        self.state()
            .sessions
            .get(session_id)
            .map(|v| v.iter().map(|(jti, _)| jti.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop entries whose token expired before `now`. Returns how many were dropped.
    ///
    /// An expired token fails validation on its `exp` claim alone, so its
    /// consumed/revoked markers are no longer needed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let now = now.timestamp();
        let mut state = self.state();
        let before = state.consumed.len() + state.revoked.len();
        state.consumed.retain(|_, exp| *exp > now);
        state.revoked.retain(|_, exp| *exp > now);
        for minted in state.sessions.values_mut() {
            minted.retain(|(_, exp)| *exp > now);
        }
        state.sessions.retain(|_, minted| !minted.is_empty());
        before - (state.consumed.len() + state.revoked.len())
    }

    pub fn consumed_count(&self) -> usize {
        self.state().consumed.len()
    }

    pub fn revoked_count(&self) -> usize {
        self.state().revoked.len()
    }
}
