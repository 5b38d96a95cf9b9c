//! Best-effort session persistence: a JSON snapshot per session plus a capped query-history
//! ring, both keyed by `sessionId` (§6). Missing files are not errors, and a write failure is
//! logged and swallowed rather than failing the workflow - persistence here is a convenience for
//! resuming a conversation, not a durability guarantee anything else depends on.

use crate::state::SharedContext;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub transaction_id: String,
    pub query_text: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

const HISTORY_CAPACITY: usize = 100;

fn snapshot_path(sessions_dir: &Path, session_id: &str) -> PathBuf {
    sessions_dir.join(format!("{}.json", session_id))
}

fn history_path(sessions_dir: &Path, session_id: &str) -> PathBuf {
    sessions_dir.join(format!("{}_history.json", session_id))
}

/// Writes `context` to `<sessionsDir>/<sessionId>.json`. Failures are logged, never propagated.
pub async fn save_state_for_session(sessions_dir: &Path, session_id: &str, context: &SharedContext) {
    let path = snapshot_path(sessions_dir, session_id);
    let json = match serde_json::to_vec_pretty(context) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!("session_store: failed to serialize context for {}: {}", session_id, err);
            return;
        }
    };
    if let Err(err) = tokio::fs::create_dir_all(sessions_dir).await {
        log::warn!("session_store: failed to create sessions dir: {}", err);
        return;
    }
    if let Err(err) = tokio::fs::write(&path, json).await {
        log::warn!("session_store: failed to write snapshot for {}: {}", session_id, err);
    }
}

/// Loads `<sessionsDir>/<sessionId>.json`. A missing file is `Ok(None)`, not an error; only a
/// parse failure on an existing file is logged.
pub async fn load_state_for_session(sessions_dir: &Path, session_id: &str) -> Option<SharedContext> {
    let path = snapshot_path(sessions_dir, session_id);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            log::warn!("session_store: failed to read snapshot for {}: {}", session_id, err);
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(context) => Some(context),
        Err(err) => {
            log::warn!("session_store: failed to parse snapshot for {}: {}", session_id, err);
            None
        }
    }
}

/// Appends `record` to the session's history ring, evicting the oldest entry once the ring
/// holds more than [`HISTORY_CAPACITY`] entries.
pub async fn save_query_to_history(sessions_dir: &Path, session_id: &str, record: HistoryRecord) {
    let path = history_path(sessions_dir, session_id);
    let mut history = match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice::<Vec<HistoryRecord>>(&bytes).unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    history.push(record);
    if history.len() > HISTORY_CAPACITY {
        let drop = history.len() - HISTORY_CAPACITY;
        history.drain(0..drop);
    }
    if let Err(err) = tokio::fs::create_dir_all(sessions_dir).await {
        log::warn!("session_store: failed to create sessions dir: {}", err);
        return;
    }
    match serde_json::to_vec_pretty(&history) {
        Ok(bytes) => {
            if let Err(err) = tokio::fs::write(&path, bytes).await {
                log::warn!("session_store: failed to write history for {}: {}", session_id, err);
            }
        }
        Err(err) => log::warn!("session_store: failed to serialize history for {}: {}", session_id, err),
    }
}

/// Returns an empty list for a session with no recorded history rather than an error.
pub async fn get_query_history(sessions_dir: &Path, session_id: &str) -> Vec<HistoryRecord> {
    let path = history_path(sessions_dir, session_id);
    match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateManager;

    #[tokio::test]
    async fn save_then_load_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StateManager::create_initial("Analyze AAPL", None, None, Some("abcd1234".into()), None);
        save_state_for_session(dir.path(), "session-1", &ctx).await;
        let loaded = load_state_for_session(dir.path(), "session-1").await.unwrap();
        assert_eq!(loaded.transaction_id, "abcd1234");
    }

    #[tokio::test]
    async fn load_state_for_missing_session_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_state_for_session(dir.path(), "nonexistent").await;
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn history_ring_evicts_oldest_past_capacity() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..(HISTORY_CAPACITY + 5) {
            save_query_to_history(
                dir.path(),
                "session-1",
                HistoryRecord {
                    transaction_id: format!("tx{}", i),
                    query_text: format!("query {}", i),
                    timestamp: chrono::Utc::now(),
                },
            )
            .await;
        }
        let history = get_query_history(dir.path(), "session-1").await;
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.last().unwrap().transaction_id, format!("tx{}", HISTORY_CAPACITY + 4));
    }

    #[tokio::test]
    async fn get_query_history_for_missing_session_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let history = get_query_history(dir.path(), "nonexistent").await;
        assert!(history.is_empty());
    }
}
