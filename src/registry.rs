//! Session registry
//!
//! Owns every live [`Session`], keyed by identifier. Input and output
//! sessions share one map, so an identifier can never be present twice;
//! where callers need the sessions listed, inputs come first, then outputs,
//! each by ascending identifier.
//!
//! The map and the identifier counter are not synchronized; the manager
//! keeps them behind a single lock. Each session sits behind its own lock,
//! so a caller looks a session up, releases the registry, and only then
//! drives the engine.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::SessionError;
use crate::protocol::Direction;
use crate::session::{Session, SessionId};

/// A registered session, locked on its own so engine calls on one session
/// never hold up the registry
pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Debug)]
struct Entry {
    direction: Direction,
    session: SharedSession,
}

#[derive(Debug, Default)]
pub struct Registry {
    sessions: BTreeMap<SessionId, Entry>,
    next_uid: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next identifier for an open attempt
    ///
    /// The counter advances once per attempt, even when the open that follows
    /// fails, so a failed open leaves a gap in the sequence but nothing
    /// registered.
    pub fn reserve(&mut self) -> Result<SessionId, SessionError> {
        if self.next_uid > SessionId::MAX {
            return Err(SessionError::AllocationFailed {
                id: self.next_uid,
                reason: "identifier space exhausted".to_string(),
            });
        }

        let id = SessionId(self.next_uid);
        self.next_uid += 1;
        Ok(id)
    }

    /// Register a session opened under a reserved identifier
    pub fn insert(&mut self, session: Session) -> SharedSession {
        let id = session.id();
        let direction = session.direction();
        let session = Arc::new(Mutex::new(session));
        self.sessions.insert(
            id,
            Entry {
                direction,
                session: session.clone(),
            },
        );

        tracing::debug!("Registered {} session {} ({} live)", direction, id, self.sessions.len());
        session
    }

    pub fn find(&self, id: SessionId) -> Option<SharedSession> {
        self.sessions.get(&id).map(|e| e.session.clone())
    }

    /// Take a session out of the registry; the caller closes it
    pub fn remove(&mut self, id: SessionId) -> Option<SharedSession> {
        self.sessions.remove(&id).map(|e| e.session)
    }

    /// Identifier the next open attempt will use
    pub fn next_uid(&self) -> u32 {
        self.next_uid
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn count(&self, direction: Direction) -> usize {
        self.sessions
            .values()
            .filter(|e| e.direction == direction)
            .count()
    }

    /// Input sessions, then output sessions, each by ascending identifier
    pub fn iter(&self) -> impl Iterator<Item = &SharedSession> {
        let inputs = self
            .sessions
            .values()
            .filter(|e| e.direction == Direction::Input);
        let outputs = self
            .sessions
            .values()
            .filter(|e| e.direction == Direction::Output);
        inputs.chain(outputs).map(|e| &e.session)
    }

    /// Remove every session, in listing order
    pub fn drain(&mut self) -> Vec<SharedSession> {
        let sessions = std::mem::take(&mut self.sessions);
        let (mut inputs, outputs): (Vec<_>, Vec<_>) = sessions
            .into_values()
            .partition(|e| e.direction == Direction::Input);
        inputs.extend(outputs);
        inputs.into_iter().map(|e| e.session).collect()
    }
}
