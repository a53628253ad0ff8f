use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::mapping::{auto_map, ColumnMapping};
use super::RawTable;

const SAMPLE_ROWS: usize = 5;

/// A parsed upload waiting for the client to confirm the column mapping.
#[derive(Debug, Clone)]
pub struct ImportSession {
    pub id: Uuid,
    pub file_name: String,
    pub table: RawTable,
    pub suggested: ColumnMapping,
    created_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportPreview {
    #[serde(rename = "importId")]
    pub import_id: Uuid,
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub headers: Vec<String>,
    #[serde(rename = "rowCount")]
    pub row_count: usize,
    #[serde(rename = "sampleRows")]
    pub sample_rows: Vec<Vec<String>>,
    #[serde(rename = "suggestedMapping")]
    pub suggested_mapping: ColumnMapping,
    #[serde(rename = "missingFields")]
    pub missing_fields: Vec<&'static str>,
}

impl ImportSession {
    pub fn new(file_name: String, table: RawTable) -> Self {
        let suggested = auto_map(&table.headers);
        ImportSession {
            id: Uuid::new_v4(),
            file_name,
            table,
            suggested,
            created_at: Instant::now(),
        }
    }

    pub fn preview(&self) -> ImportPreview {
        ImportPreview {
            import_id: self.id,
            file_name: self.file_name.clone(),
            headers: self.table.headers.clone(),
            row_count: self.table.rows.len(),
            sample_rows: self.table.rows.iter().take(SAMPLE_ROWS).cloned().collect(),
            suggested_mapping: self.suggested.clone(),
            missing_fields: self.suggested.missing_fields(),
        }
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.created_at) >= ttl
    }
}

/// In-memory store of pending imports.
pub struct ImportSessions {
    ttl: Duration,
    sessions: RwLock<HashMap<Uuid, ImportSession>>,
}

impl ImportSessions {
    pub fn new(ttl: Duration) -> Self {
        ImportSessions {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Stores `session`, dropping any that have expired.
    pub async fn insert(&self, session: ImportSession) -> ImportPreview {
        let preview = session.preview();
        let now = Instant::now();

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(self.ttl, now));
        let pruned = before - sessions.len();
        if pruned > 0 {
            log::debug!("Pruned {} expired import sessions", pruned);
        }

        sessions.insert(session.id, session);
        preview
    }

    pub async fn get(&self, id: &Uuid) -> Option<ImportSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .filter(|s| !s.is_expired(self.ttl, Instant::now()))
            .cloned()
    }

    pub async fn remove(&self, id: &Uuid) -> Option<ImportSession> {
        self.sessions
            .write()
            .await
            .remove(id)
            .filter(|s| !s.is_expired(self.ttl, Instant::now()))
    }

    /// Puts back a session taken with `remove`, keeping its original age.
    pub async fn restore(&self, session: ImportSession) {
        self.sessions.write().await.insert(session.id, session);
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
