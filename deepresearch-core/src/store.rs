//! Durable session storage.
//!
//! [`SessionStore`] is the one shared mutable resource in the system. The
//! orchestrator and comparison service take it as an injected trait object,
//! so tests swap in [`MemorySessionStore`] while production uses
//! [`JsonSessionStore`], one JSON file per session written atomically.
//!
//! Reads sanitize: persisted records from an older schema deserialize with
//! every missing field defaulted (see `types`), and files that are not valid
//! JSON at all are skipped with a warning instead of failing the listing.

use crate::error::StoreError;
use crate::types::{ResearchSession, UploadedDocument};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Ordered, durable mapping from session id to [`ResearchSession`].
pub trait SessionStore: Send + Sync {
    /// All sessions, newest `created_at` first.
    fn list(&self) -> Result<Vec<ResearchSession>, StoreError>;

    /// Look up one session. `Ok(None)` when the id is unknown.
    fn get(&self, id: &str) -> Result<Option<ResearchSession>, StoreError>;

    /// Insert or replace by id.
    fn upsert(&self, session: &ResearchSession) -> Result<(), StoreError>;

    /// Append an uploaded document to a session's attachment list.
    ///
    /// Silently a no-op when the session is absent: the caller already
    /// committed to the upload, so a vanished session is not an error.
    fn append_document(&self, session_id: &str, doc: UploadedDocument) -> Result<(), StoreError>;
}

fn sort_newest_first(sessions: &mut [ResearchSession]) {
    sessions.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// File-backed store: `<root>/<id>.json` per session.
pub struct JsonSessionStore {
    root: PathBuf,
}

impl JsonSessionStore {
    /// Open (or create on first write) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        Ok(self.root.join(format!("{id}.json")))
    }

    fn read_session(&self, path: &Path) -> Result<Option<ResearchSession>, StoreError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persistence_error(path, e)),
        };
        match serde_json::from_str::<ResearchSession>(&data) {
            Ok(mut session) => {
                // Records written before ids were embedded carry the id only
                // in the file name.
                if session.id.is_empty()
                    && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                {
                    session.id = stem.to_string();
                }
                Ok(Some(session))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable session record");
                Ok(None)
            }
        }
    }
}

impl SessionStore for JsonSessionStore {
    fn list(&self) -> Result<Vec<ResearchSession>, StoreError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence_error(&self.root, e)),
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false)
                && let Some(session) = self.read_session(&path)?
            {
                sessions.push(session);
            }
        }
        sort_newest_first(&mut sessions);
        Ok(sessions)
    }

    fn get(&self, id: &str) -> Result<Option<ResearchSession>, StoreError> {
        let path = self.session_path(id)?;
        self.read_session(&path)
    }

    fn upsert(&self, session: &ResearchSession) -> Result<(), StoreError> {
        let path = self.session_path(&session.id)?;
        atomic_write_json(&path, session)
    }

    fn append_document(&self, session_id: &str, doc: UploadedDocument) -> Result<(), StoreError> {
        match self.get(session_id)? {
            Some(mut session) => {
                session.attach_document(doc);
                self.upsert(&session)
            }
            None => {
                debug!(session_id, "append_document on absent session, ignoring");
                Ok(())
            }
        }
    }
}

/// In-memory store for tests and offline runs.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, ResearchSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn list(&self) -> Result<Vec<ResearchSession>, StoreError> {
        let sessions = self.sessions.lock().expect("session map poisoned");
        let mut all: Vec<ResearchSession> = sessions.values().cloned().collect();
        sort_newest_first(&mut all);
        Ok(all)
    }

    fn get(&self, id: &str) -> Result<Option<ResearchSession>, StoreError> {
        let sessions = self.sessions.lock().expect("session map poisoned");
        Ok(sessions.get(id).cloned())
    }

    fn upsert(&self, session: &ResearchSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn append_document(&self, session_id: &str, doc: UploadedDocument) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        match sessions.get_mut(session_id) {
            Some(session) => session.attach_document(doc),
            None => debug!(session_id, "append_document on absent session, ignoring"),
        }
        Ok(())
    }
}

/// Reject ids that cannot be used as a file name.
fn validate_id(id: &str) -> Result<(), StoreError> {
    let invalid = id.is_empty()
        || id.contains('/')
        || id.contains('\\')
        || id.contains("..")
        || id.chars().any(|c| c.is_control());
    if invalid {
        return Err(StoreError::InvalidId { id: id.to_string() });
    }
    Ok(())
}

/// Write to a `.tmp` sibling then rename, so a crash mid-write never leaves
/// a truncated record behind.
fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| persistence_error(path, io::Error::other(e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| persistence_error(path, e))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json.as_bytes()).map_err(|e| persistence_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| persistence_error(path, e))?;
    Ok(())
}

fn persistence_error(path: &Path, e: io::Error) -> StoreError {
    StoreError::Persistence {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResearchStatus;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn session_created_at(id: &str, minutes_ago: i64) -> ResearchSession {
        let mut session = ResearchSession::new(format!("query {id}"), None);
        session.id = id.to_string();
        session.created_at = Utc::now() - Duration::minutes(minutes_ago);
        session
    }

    fn assert_listing_behaviour(store: &dyn SessionStore) {
        store.upsert(&session_created_at("mid", 10)).unwrap();
        store.upsert(&session_created_at("oldest", 30)).unwrap();
        store.upsert(&session_created_at("newest", 1)).unwrap();

        let all = store.list().unwrap();
        let ids: Vec<&str> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["newest", "mid", "oldest"]);
    }

    #[test]
    fn test_json_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::new(dir.path());

        let session = ResearchSession::new("What is prompt caching?", None);
        store.upsert(&session).unwrap();

        let loaded = store.get(&session.id).unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_json_store_get_missing() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::new(dir.path());
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_json_store_list_sorted_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::new(dir.path());
        assert_listing_behaviour(&store);
    }

    #[test]
    fn test_json_store_list_empty_without_dir() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::new(dir.path().join("never-created"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_replaces_no_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::new(dir.path());

        let mut session = ResearchSession::new("v1", None);
        store.upsert(&session).unwrap();
        session.summary = "revised".into();
        store.upsert(&session).unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].summary, "revised");
    }

    #[test]
    fn test_append_document_present() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::new(dir.path());

        let session = ResearchSession::new("q", None);
        store.upsert(&session).unwrap();
        store
            .append_document(
                &session.id,
                UploadedDocument::new("notes.txt", 12, "text/plain"),
            )
            .unwrap();

        let loaded = store.get(&session.id).unwrap().unwrap();
        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.documents[0].name, "notes.txt");
        assert!(loaded.updated_at >= session.updated_at);
    }

    #[test]
    fn test_append_document_absent_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::new(dir.path());
        store
            .append_document("ghost", UploadedDocument::new("x", 1, "text/plain"))
            .unwrap();
        assert!(store.get("ghost").unwrap().is_none());
    }

    #[test]
    fn test_list_skips_unreadable_records() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::new(dir.path());
        store.upsert(&ResearchSession::new("good", None)).unwrap();
        std::fs::write(dir.path().join("broken.json"), "not json at all").unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].query, "good");
    }

    #[test]
    fn test_legacy_record_repaired_and_id_restored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("old-session.json"),
            r#"{"query":"legacy","report":"r"}"#,
        )
        .unwrap();

        let store = JsonSessionStore::new(dir.path());
        let session = store.get("old-session").unwrap().unwrap();
        assert_eq!(session.id, "old-session");
        assert_eq!(session.status, ResearchStatus::Idle);
        assert!(session.documents.is_empty());
        assert_eq!(session.cost.input_tokens, 0);
        assert!(session.trace_id.starts_with("trace_legacy_"));
    }

    #[test]
    fn test_invalid_id_rejected() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::new(dir.path());

        let mut session = ResearchSession::new("q", None);
        session.id = "../escape".into();
        let err = store.upsert(&session).unwrap_err();
        assert!(matches!(err, StoreError::InvalidId { .. }));
        assert!(store.get("with/slash").is_err());
    }

    #[test]
    fn test_no_tmp_leftover_after_upsert() {
        let dir = TempDir::new().unwrap();
        let store = JsonSessionStore::new(dir.path());
        let session = ResearchSession::new("q", None);
        store.upsert(&session).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_memory_store_roundtrip_and_sort() {
        let store = MemorySessionStore::new();
        assert_listing_behaviour(&store);
        assert!(store.get("unknown").unwrap().is_none());
    }

    #[test]
    fn test_memory_store_append_document() {
        let store = MemorySessionStore::new();
        let session = ResearchSession::new("q", None);
        store.upsert(&session).unwrap();

        store
            .append_document(&session.id, UploadedDocument::new("a.md", 5, "text/markdown"))
            .unwrap();
        store
            .append_document("missing", UploadedDocument::new("b.md", 5, "text/markdown"))
            .unwrap();

        assert_eq!(store.get(&session.id).unwrap().unwrap().documents.len(), 1);
    }
}
