use crate::logging;
use crate::session::Session;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const JOURNAL_KEY: &str = "neurosignal_journal";
pub const OPENROUTER_KEY: &str = "neurosignal_openrouter_key";
pub const OPENROUTER_KEY_STATUS: &str = "neurosignal_openrouter_key_status";
pub const OPENROUTER_MODEL: &str = "neurosignal_openrouter_model";

/// Default database location: `$NEUROSIGNAL_DATA_DIR/neurosignal.db`,
/// else `$HOME/.neurosignal/neurosignal.db`
pub fn default_db_path() -> PathBuf {
    if let Ok(dir) = std::env::var("NEUROSIGNAL_DATA_DIR") {
        return PathBuf::from(dir).join("neurosignal.db");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".neurosignal").join("neurosignal.db")
}

/// Fixed-key blob storage backed by a single SQLite table
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            // Let Connection::open report an unusable directory
            let _ = std::fs::create_dir_all(parent);
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&conn)
    }

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
            Ok(())
        })
    }

    pub fn remove_value(&self, key: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
            Ok(())
        })
    }
}

/// The saved-session journal, kept newest first
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<Store>,
}

impl SessionStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Every saved session. A missing or unreadable journal is empty.
    pub fn load_all(&self) -> Result<Vec<Session>> {
        let Some(raw) = self.store.get_value(JOURNAL_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<Session>>(&raw) {
            Ok(sessions) => Ok(sessions),
            Err(e) => {
                logging::log_error(None, &format!("Journal unreadable, treating as empty: {}", e));
                Ok(Vec::new())
            }
        }
    }

    fn write_all(&self, sessions: &[Session]) -> Result<()> {
        let raw = serde_json::to_string(sessions)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.store.set_value(JOURNAL_KEY, &raw)
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let mut sessions = self.load_all()?;
        sessions.retain(|s| s.id != session.id);
        sessions.insert(0, session.clone());
        self.write_all(&sessions)?;
        logging::log_storage(
            Some(&session.id),
            &format!("Saved session ({} in journal)", sessions.len()),
        );
        Ok(())
    }

    pub fn load_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .collect())
    }

    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.load_all()?.into_iter().find(|s| s.id == id))
    }

    /// Returns whether a session was removed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut sessions = self.load_all()?;
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.write_all(&sessions)?;
        logging::log_storage(Some(id), "Deleted session");
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Idle,
    Valid,
    Invalid,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Idle => "idle",
            KeyStatus::Valid => "valid",
            KeyStatus::Invalid => "invalid",
        }
    }

    /// Unknown values read back as `Idle`
    pub fn parse(s: &str) -> Self {
        match s {
            "valid" => KeyStatus::Valid,
            "invalid" => KeyStatus::Invalid,
            _ => KeyStatus::Idle,
        }
    }
}

/// Secondary provider key, its validation status and the selected model
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<Store>,
}

impl CredentialStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn api_key(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get_value(OPENROUTER_KEY)?
            .filter(|k| !k.trim().is_empty()))
    }

    pub fn set_api_key(&self, key: &str) -> Result<()> {
        self.store.set_value(OPENROUTER_KEY, key.trim())?;
        self.set_key_status(KeyStatus::Idle)
    }

    pub fn clear_api_key(&self) -> Result<()> {
        self.store.remove_value(OPENROUTER_KEY)?;
        self.store.remove_value(OPENROUTER_KEY_STATUS)?;
        logging::log_storage(None, "Cleared OpenRouter key");
        Ok(())
    }

    pub fn key_status(&self) -> Result<KeyStatus> {
        Ok(self
            .store
            .get_value(OPENROUTER_KEY_STATUS)?
            .map(|s| KeyStatus::parse(&s))
            .unwrap_or(KeyStatus::Idle))
    }

    pub fn set_key_status(&self, status: KeyStatus) -> Result<()> {
        self.store.set_value(OPENROUTER_KEY_STATUS, status.as_str())
    }

    pub fn selected_model(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get_value(OPENROUTER_MODEL)?
            .filter(|m| !m.trim().is_empty()))
    }

    /// An empty model name clears the selection
    pub fn set_selected_model(&self, model: &str) -> Result<()> {
        let model = model.trim();
        if model.is_empty() {
            self.store.remove_value(OPENROUTER_MODEL)
        } else {
            self.store.set_value(OPENROUTER_MODEL, model)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionTracker;
    use crate::simulator::{initial_sample, RandomWalkSource};

    fn session_for(user: &str) -> Session {
        let mut tracker = SessionTracker::new();
        tracker.ingest(initial_sample());
        tracker.finish(user, None, None)
    }

    fn memory_store() -> Arc<Store> {
        Arc::new(Store::open_in_memory().unwrap())
    }

    #[test]
    fn test_save_prepends_newest() {
        let sessions = SessionStore::new(memory_store());
        let first = session_for("a");
        let second = session_for("a");
        sessions.save(&first).unwrap();
        sessions.save(&second).unwrap();

        let all = sessions.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
    }

    #[test]
    fn test_load_for_user_filters() {
        let sessions = SessionStore::new(memory_store());
        sessions.save(&session_for("a")).unwrap();
        sessions.save(&session_for("b")).unwrap();
        sessions.save(&session_for("a")).unwrap();
        assert_eq!(sessions.load_for_user("a").unwrap().len(), 2);
        assert_eq!(sessions.load_for_user("c").unwrap().len(), 0);
    }

    #[test]
    fn test_delete_and_get() {
        let sessions = SessionStore::new(memory_store());
        let session = session_for("a");
        sessions.save(&session).unwrap();
        assert!(sessions.get(&session.id).unwrap().is_some());
        assert!(sessions.delete(&session.id).unwrap());
        assert!(!sessions.delete(&session.id).unwrap());
        assert!(sessions.get(&session.id).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_journal_loads_empty() {
        let store = memory_store();
        store.set_value(JOURNAL_KEY, "{not json").unwrap();
        let sessions = SessionStore::new(store);
        assert!(sessions.load_all().unwrap().is_empty());
        // And saving over it still works
        sessions.save(&session_for("a")).unwrap();
        assert_eq!(sessions.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_credentials() {
        let creds = CredentialStore::new(memory_store());
        assert_eq!(creds.api_key().unwrap(), None);
        assert_eq!(creds.key_status().unwrap(), KeyStatus::Idle);

        creds.set_api_key(" sk-or-123 ").unwrap();
        creds.set_key_status(KeyStatus::Valid).unwrap();
        assert_eq!(creds.api_key().unwrap().as_deref(), Some("sk-or-123"));
        assert_eq!(creds.key_status().unwrap(), KeyStatus::Valid);

        creds.set_selected_model("meta-llama/llama-3.3-70b-instruct:free").unwrap();
        assert!(creds.selected_model().unwrap().is_some());
        creds.set_selected_model("").unwrap();
        assert_eq!(creds.selected_model().unwrap(), None);

        creds.clear_api_key().unwrap();
        assert_eq!(creds.api_key().unwrap(), None);
        assert_eq!(creds.key_status().unwrap(), KeyStatus::Idle);
    }

    #[test]
    fn test_random_walk_sessions_reload_exactly() {
        let sessions = SessionStore::new(memory_store());
        let mut saved = Vec::new();
        for seed in 0..5 {
            let mut tracker = SessionTracker::new();
            let mut source = RandomWalkSource::seeded(seed);
            for _ in 0..60 {
                tracker.tick(&mut source);
            }
            let session = tracker.finish("walker", Some(format!("seed {}", seed)), None);
            sessions.save(&session).unwrap();
            saved.insert(0, session);
        }

        let loaded = sessions.load_for_user("walker").unwrap();
        assert_eq!(loaded, saved);
        assert!(loaded[0].timeline.iter().any(|s| s.confidence.fract() != 0.0));
    }

    #[test]
    fn test_key_status_parse() {
        assert_eq!(KeyStatus::parse("valid"), KeyStatus::Valid);
        assert_eq!(KeyStatus::parse("invalid"), KeyStatus::Invalid);
        assert_eq!(KeyStatus::parse("garbage"), KeyStatus::Idle);
        assert_eq!(KeyStatus::parse(KeyStatus::Valid.as_str()), KeyStatus::Valid);
    }

    #[test]
    fn test_file_backed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("neurosignal.db");
        let session = session_for("a");
        {
            let sessions = SessionStore::new(Arc::new(Store::open(&path).unwrap()));
            sessions.save(&session).unwrap();
        }
        let reopened = SessionStore::new(Arc::new(Store::open(&path).unwrap()));
        assert_eq!(reopened.get(&session.id).unwrap(), Some(session));
    }
}
