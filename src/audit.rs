use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::model::UserId;
use crate::notify::SinkError;

/// One audit record. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// `None` for self-service actions without a signed-in actor (registration).
    pub actor: Option<UserId>,
    pub action: &'static str,
    pub entity_type: &'static str,
    /// Ulid for most entities; the ISO date for calendar overrides.
    pub entity_id: String,
    pub previous_state: Option<Value>,
    pub new_state: Option<Value>,
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: Option<UserId>,
        action: &'static str,
        entity_type: &'static str,
        entity_id: impl ToString,
    ) -> Self {
        Self {
            actor,
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            previous_state: None,
            new_state: None,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn previous(mut self, state: Value) -> Self {
        self.previous_state = Some(state);
        self
    }

    pub fn new_state(mut self, state: Value) -> Self {
        self.new_state = Some(state);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), SinkError>;
}

/// Append-only in-memory audit trail. Entries are never edited or removed.
#[derive(Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    pub async fn for_entity(&self, entity_id: &str) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for AuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<(), SinkError> {
        self.entries.write().await.push(entry);
        Ok(())
    }
}
