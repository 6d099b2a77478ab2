use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::model::{LOGS_TABLE, PLAYS_TABLE, Row};
use crate::store::RemoteStore;

#[derive(Debug, Clone, Serialize)]
pub struct Play {
    pub platform: String,
    pub artist: String,
    pub song: String,
    pub timestamp: String,
}

// Failures are logged, never returned.
pub fn log_event(store: &dyn RemoteStore, event: &str, data: Value) {
    let mut row = Row::new();
    row.insert("event".into(), Value::String(event.to_string()));
    row.insert("data".into(), data);
    row.insert(
        "created_at".into(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    if let Err(e) = store.insert(LOGS_TABLE, &row) {
        tracing::error!(event, error = %e, "audit log insert failed");
    }
}

pub fn log_play(store: &dyn RemoteStore, play: &Play) -> Result<()> {
    let Value::Object(row) = json!(play) else {
        return Err(Error::msg("play did not serialize to an object"));
    };
    store.insert(PLAYS_TABLE, &row).map_err(|e| {
        tracing::error!(error = %e, "play insert failed");
        Error::backend(e.code().map(str::to_string), "Failed to log play")
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::store::memory::Op;

    #[test]
    fn event_failures_are_swallowed() {
        let store = MemoryStore::new();
        store.fail(Op::Insert, "logs", Error::backend(None, "nope"));
        log_event(&store, "row_deleted", json!({"id": 1}));
        assert!(store.rows("logs").is_empty());
        store.clear_failures();
        log_event(&store, "row_deleted", json!({"id": 1}));
        let rows = store.rows("logs");
        assert_eq!(rows[0]["event"], json!("row_deleted"));
        assert_eq!(rows[0]["data"], json!({"id": 1}));
    }

    #[test]
    fn play_failure_surfaces() {
        let store = MemoryStore::new();
        let play = Play {
            platform: "Spotify".into(),
            artist: "Ivory Haven".into(),
            song: "Night Drive".into(),
            timestamp: "2025-01-01T00:00:00Z".into(),
        };
        log_play(&store, &play).unwrap();
        assert_eq!(store.rows("plays")[0]["platform"], json!("Spotify"));
        store.fail(Op::Insert, "plays", Error::backend(None, "nope"));
        assert_eq!(log_play(&store, &play).unwrap_err().message(), "Failed to log play");
    }
}
