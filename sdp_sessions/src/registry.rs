// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory session registry.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use log::debug;

use crate::{
    error::SessionError,
    now_ns,
    session::{CollectionTuple, EndReason, Session, SessionId, SessionStatus},
};

/// Process-wide map from session id to live session.
///
/// One long-lived instance per machine, constructed at startup and passed
/// explicitly to the machine that owns it. Lookups take the read side of the
/// map lock; all per-session mutation goes through the session's own lock, so
/// the map lock is never held during cryptographic work or adapter I/O.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session with a fresh identifier bound to `tuple`.
    pub fn create(&self, tuple: CollectionTuple) -> Result<Arc<Session>, SessionError> {
        let session = Arc::new(Session::new(SessionId::fresh(), now_ns()?, tuple));
        self.sessions
            .write()
            .unwrap()
            .insert(session.id().clone(), session.clone());
        Ok(session)
    }

    /// Looks up a session. Every unknown-id path of both machines funnels
    /// through here, so `NotFound` means exactly one thing.
    pub fn get(&self, session_id: &SessionId) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .read()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.clone(),
            })
    }

    /// Marks a session ended. Calling this on an already-ended session is a
    /// no-op; the first reason sticks.
    pub fn terminate(
        &self,
        session_id: &SessionId,
        reason: EndReason,
    ) -> Result<Arc<Session>, SessionError> {
        let session = self.get(session_id)?;
        let mut inner = session.lock();
        if inner.status == SessionStatus::Active {
            inner.status = SessionStatus::Ended;
            inner.end_reason = Some(reason);
            inner.ended_at_ns = Some(now_ns()?);
            debug!("terminated session {session_id} ({reason:?})");
        }
        drop(inner);
        Ok(session)
    }

    /// Evicts ended sessions whose end is older than `ttl`. Active sessions
    /// are never evicted. Returns the number of sessions removed.
    pub fn remove_expired(&self, ttl: Duration) -> Result<usize, SessionError> {
        let cutoff = now_ns()?.saturating_sub(ttl.as_nanos() as u64);
        let mut sessions = self.sessions.write().unwrap();
        let before = sessions.len();
        sessions.retain(|_, session| {
            let inner = session.lock();
            !(inner.status == SessionStatus::Ended
                && inner.ended_at_ns.is_some_and(|ended_at| ended_at < cutoff))
        });
        Ok(before - sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, FixedBytes};

    use super::*;

    fn tuple() -> CollectionTuple {
        CollectionTuple {
            collection_id: FixedBytes::ZERO,
            payer: address!("1111111111111111111111111111111111111111"),
            service_provider: address!("3333333333333333333333333333333333333333"),
            data_service: address!("2222222222222222222222222222222222222222"),
        }
    }

    #[test]
    fn create_get_terminate() {
        let registry = SessionRegistry::new();
        let session = registry.create(tuple()).unwrap();
        let id = session.id().clone();

        assert_eq!(registry.get(&id).unwrap().id(), &id);
        assert_eq!(session.status(), SessionStatus::Active);

        registry.terminate(&id, EndReason::Complete).unwrap();
        assert_eq!(session.status(), SessionStatus::Ended);
        assert_eq!(session.end_reason(), Some(EndReason::Complete));

        // Second terminate is a no-op and keeps the first reason
        registry.terminate(&id, EndReason::Failed).unwrap();
        assert_eq!(session.end_reason(), Some(EndReason::Complete));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let registry = SessionRegistry::new();
        let known = registry.create(tuple()).unwrap().id().clone();
        let res = registry.get(&SessionId::fresh());
        assert!(matches!(res, Err(SessionError::NotFound { .. })));
        assert!(registry.get(&known).is_ok());
    }

    #[test]
    fn expired_sweep_only_evicts_ended_sessions() {
        let registry = SessionRegistry::new();
        let active = registry.create(tuple()).unwrap();
        let ended = registry.create(tuple()).unwrap();
        registry
            .terminate(ended.id(), EndReason::Complete)
            .unwrap();

        // A zero TTL evicts everything that has ended, and nothing else
        let removed = registry.remove_expired(Duration::ZERO).unwrap();
        assert_eq!(removed, 1);
        assert!(registry.get(active.id()).is_ok());
        assert!(matches!(
            registry.get(ended.id()),
            Err(SessionError::NotFound { .. })
        ));
    }

    #[test]
    fn long_ttl_retains_ended_sessions() {
        let registry = SessionRegistry::new();
        let ended = registry.create(tuple()).unwrap();
        registry
            .terminate(ended.id(), EndReason::Complete)
            .unwrap();

        let removed = registry.remove_expired(Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(registry.get(ended.id()).is_ok());
    }
}
