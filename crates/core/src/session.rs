//! Typed per-conversation state. One struct with named fields replaces the
//! grow-as-you-go dictionary bags a retrieval turn would otherwise mutate,
//! and the registry serializes turns per conversation while letting
//! different conversations proceed fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{CandidateEntity, DocumentContext, Hit};

/// Everything a follow-up turn may read or write for one conversation.
/// Serializable so a later turn can re-target evidence without re-querying
/// the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub conversation_id: String,
    pub last_question: String,
    pub offered_entities: Vec<CandidateEntity>,
    pub cached_hits: Vec<Hit>,
    pub cached_contexts: Vec<DocumentContext>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let conversation_id = {
            let id = conversation_id.into();
            if id.trim().is_empty() {
                Uuid::new_v4().to_string()
            } else {
                id
            }
        };
        Self {
            conversation_id,
            last_question: String::new(),
            offered_entities: Vec::new(),
            cached_hits: Vec::new(),
            cached_contexts: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Records the outcome of a first-turn retrieval.
    pub fn record_turn(
        &mut self,
        question: &str,
        offered_entities: Vec<CandidateEntity>,
        cached_hits: Vec<Hit>,
        cached_contexts: Vec<DocumentContext>,
    ) {
        self.last_question = question.to_string();
        self.offered_entities = offered_entities;
        self.cached_hits = cached_hits;
        self.cached_contexts = cached_contexts;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Hands out one lock-guarded session per conversation id, so a turn for a
/// given user runs serialized while other users proceed in parallel.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session for a conversation, created on first access. Callers hold
    /// the returned lock for the duration of a turn.
    pub async fn session(&self, conversation_id: &str) -> Arc<Mutex<SessionState>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::new(conversation_id))))
            .clone()
    }

    pub async fn remove(&self, conversation_id: &str) {
        self.sessions.lock().await.remove(conversation_id);
    }
}
