//! Conversation sessions.
//!
//! A [`Session`] owns the ordered chat log of one REPL run or one HTTP
//! session. It is created when the conversation starts and dropped when it
//! ends; nothing is shared between sessions.
//!
//! [`SessionStore`] holds the server's open sessions. It is bounded two ways:
//! sessions idle past a TTL are pruned, and inserting at capacity evicts the
//! least recently active session.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::config::SearchMode;
use crate::models::ChatTurn;
use crate::rag::{QueryState, RagPipeline, RagResponse};

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    turns: Vec<ChatTurn>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_active: now,
            turns: Vec::new(),
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Record the outcome of one question.
    pub fn record(&mut self, question: &str, response: &RagResponse) -> &ChatTurn {
        self.turns.push(ChatTurn {
            question: question.to_string(),
            answer: response.answer.clone(),
            sources: response.sources.clone(),
            context_free: response.context_free,
            failed: response.state == QueryState::Failed,
            asked_at: Utc::now(),
        });
        self.last_active = Utc::now();
        &self.turns[self.turns.len() - 1]
    }

    /// Ask `question` through `rag` and append the turn.
    pub async fn ask(&mut self, rag: &RagPipeline, question: &str, mode: Option<SearchMode>) -> RagResponse {
        let response = rag.ask(question, mode).await;
        self.record(question, &response);
        response
    }
}

/// Open sessions keyed by id, bounded by idle time and count.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<Uuid, Session>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(idle_ttl: std::time::Duration, max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            idle_ttl: Duration::from_std(idle_ttl).unwrap_or_else(|_| Duration::days(36_500)),
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Add a session, pruning idle ones and evicting the least recently
    /// active while at capacity.
    pub fn insert(&mut self, session: Session) {
        self.insert_at(session, Utc::now());
    }

    /// The live session with `id`, marked active.
    pub fn touch(&mut self, id: &Uuid) -> Option<&mut Session> {
        self.touch_at(id, Utc::now())
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<Session> {
        self.sessions.remove(id)
    }

    /// Drop sessions idle past the TTL. Returns how many were dropped.
    pub fn prune(&mut self) -> usize {
        self.prune_at(Utc::now())
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(session.last_active) > self.idle_ttl
    }

    fn prune_at(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        let ttl = self.idle_ttl;
        self.sessions
            .retain(|_, s| now.signed_duration_since(s.last_active) <= ttl);
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            debug!(dropped, "pruned idle sessions");
        }
        dropped
    }

    fn insert_at(&mut self, session: Session, now: DateTime<Utc>) {
        self.prune_at(now);
        while self.sessions.len() >= self.max_sessions {
            let oldest = self
                .sessions
                .values()
                .min_by_key(|s| (s.last_active, s.id))
                .map(|s| s.id);
            match oldest {
                Some(id) => {
                    self.sessions.remove(&id);
                    debug!(session = %id, "evicted least recently active session");
                }
                None => break,
            }
        }
        self.sessions.insert(session.id, session);
    }

    fn touch_at(&mut self, id: &Uuid, now: DateTime<Utc>) -> Option<&mut Session> {
        let expired = self
            .sessions
            .get(id)
            .is_some_and(|s| self.is_expired(s, now));
        if expired {
            self.sessions.remove(id);
            return None;
        }
        let session = self.sessions.get_mut(id)?;
        session.last_active = now;
        Some(session)
    }
}
