//! In-flight license sessions keyed by request id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::session::{LicenseSession, SessionState};

#[derive(Debug)]
struct Entry {
    session: LicenseSession,
    registered_at: Instant,
}

/// Sessions awaiting a license, bounded in count and age.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<Vec<u8>, Entry>,
    ttl: Duration,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl,
            max_sessions,
        }
    }

    /// Register a session that has issued its challenge.
    ///
    /// A session already stored under the same request id is replaced and
    /// returned.
    pub fn register(
        &mut self,
        request_id: Vec<u8>,
        session: LicenseSession,
    ) -> Result<Option<LicenseSession>> {
        if session.state() != SessionState::AwaitingResponse {
            return Err(Error::InvalidState {
                expected: SessionState::AwaitingResponse,
                found: session.state(),
            });
        }

        self.evict_expired(Instant::now());

        if !self.sessions.contains_key(&request_id) && self.sessions.len() >= self.max_sessions {
            return Err(Error::TooManySessions {
                max: self.max_sessions,
            });
        }

        let entry = Entry {
            session,
            registered_at: Instant::now(),
        };
        let replaced = self.sessions.insert(request_id, entry).map(|old| {
            warn!(
                "request id collision, replacing session {}",
                hex::encode(old.session.id())
            );
            old.session
        });
        Ok(replaced)
    }

    pub fn resolve(&mut self, request_id: &[u8]) -> Result<&mut LicenseSession> {
        self.sessions
            .get_mut(request_id)
            .map(|entry| &mut entry.session)
            .ok_or_else(|| Error::NotFound(request_id.to_vec()))
    }

    pub fn remove(&mut self, request_id: &[u8]) -> Result<LicenseSession> {
        self.sessions
            .remove(request_id)
            .map(|entry| entry.session)
            .ok_or_else(|| Error::NotFound(request_id.to_vec()))
    }

    pub fn contains(&self, request_id: &[u8]) -> bool {
        self.sessions.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions registered longer than the TTL before `now`.
    ///
    /// Evicted sessions are marked `Failed` and returned.
    pub fn evict_expired(&mut self, now: Instant) -> Vec<LicenseSession> {
        let ttl = self.ttl;
        let expired: Vec<Vec<u8>> = self
            .sessions
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.registered_at) > ttl)
            .map(|(request_id, _)| request_id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|request_id| {
                let mut session = self.sessions.remove(&request_id)?.session;
                debug!("evicting stale session for request {}", hex::encode(&request_id));
                session.fail();
                Some(session)
            })
            .collect()
    }

    /// Fail and drop every registered session.
    pub fn clear(&mut self) {
        for (_, mut entry) in self.sessions.drain() {
            entry.session.fail();
        }
    }
}
