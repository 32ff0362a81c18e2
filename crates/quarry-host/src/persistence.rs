use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::paths::ProjectPaths;
use crate::timer::SaveTimer;
use crate::value::Value;

/// Opaque serializable state document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Blob(toml::Value);

impl Blob {
    /// Convert a script value. Nulls and functions have no stored form.
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(Blob(to_toml(value)?))
    }

    pub fn to_value(&self) -> Value {
        from_toml(&self.0)
    }

    pub fn as_toml(&self) -> &toml::Value {
        &self.0
    }
}

/// Players are stored as a one-key table so they read back as players
const PLAYER_TAG: &str = "__player";

fn to_toml(value: &Value) -> Result<toml::Value> {
    Ok(match value {
        Value::Null => bail!("null cannot be stored"),
        Value::Function(f) => bail!("function {} cannot be stored", f.pretty_name()),
        Value::Bool(b) => toml::Value::Boolean(*b),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
            toml::Value::Integer(*n as i64)
        }
        Value::Number(n) => toml::Value::Float(*n),
        Value::Str(s) => toml::Value::String(s.clone()),
        Value::Player(name) => {
            let mut tagged = toml::map::Map::new();
            tagged.insert(PLAYER_TAG.to_string(), toml::Value::String(name.clone()));
            toml::Value::Table(tagged)
        }
        Value::List(items) => {
            toml::Value::Array(items.iter().map(to_toml).collect::<Result<_>>()?)
        }
        Value::Map(map) => {
            let mut table = toml::map::Map::new();
            for (key, item) in map {
                table.insert(
                    key.clone(),
                    to_toml(item).with_context(|| format!("at key '{}'", key))?,
                );
            }
            toml::Value::Table(table)
        }
    })
}

fn from_toml(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::Str(s.clone()),
        toml::Value::Integer(i) => Value::Number(*i as f64),
        toml::Value::Float(f) => Value::Number(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::Str(dt.to_string()),
        toml::Value::Array(items) => Value::List(items.iter().map(from_toml).collect()),
        toml::Value::Table(table) => match player_tag(table) {
            Some(name) => Value::Player(name.to_string()),
            None => Value::Map(
                table
                    .iter()
                    .map(|(key, item)| (key.clone(), from_toml(item)))
                    .collect::<BTreeMap<_, _>>(),
            ),
        },
    }
}

fn player_tag(table: &toml::map::Map<String, toml::Value>) -> Option<&str> {
    match table.iter().next() {
        Some((key, toml::Value::String(name))) if table.len() == 1 && key == PLAYER_TAG => {
            Some(name.as_str())
        }
        _ => None,
    }
}

/// Which blob a script is addressing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobRef {
    /// The app's own debounced blob
    Own,
    /// A named blob outside any app namespace, read and written directly
    Shared(String),
}

/// Durable storage for blobs
pub trait BlobStore: Send + Sync {
    fn load(&self, app: &str) -> Result<Option<Blob>>;

    fn save(&self, app: &str, blob: &Blob) -> Result<()>;

    fn load_shared(&self, name: &str) -> Result<Option<Blob>>;

    fn save_shared(&self, name: &str, blob: &Blob) -> Result<()>;
}

/// On-disk layout of one blob file
#[derive(Debug, Serialize, Deserialize)]
struct BlobFile {
    saved_at: String,
    state: Blob,
}

/// Stores each blob as `<root>/<app>.toml`, shared ones under `<root>/shared/`
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<platform data dir>/quarry/apps`
    pub fn default_root() -> Result<PathBuf> {
        let paths = ProjectPaths::new().context("Failed to determine data directory")?;
        Ok(paths.apps_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn app_path(&self, app: &str) -> Result<PathBuf> {
        Ok(self.root.join(format!("{}.toml", checked_name(app)?)))
    }

    fn shared_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join("shared")
            .join(format!("{}.toml", checked_name(name)?)))
    }

    fn read(path: &Path) -> Result<Option<Blob>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file: BlobFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(file.state))
    }

    fn write(path: &Path, blob: &Blob) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = BlobFile {
            saved_at: chrono::Utc::now().to_rfc3339(),
            state: blob.clone(),
        };
        let content = toml::to_string_pretty(&file).context("Failed to serialize blob")?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(target: "apphost", "Saved blob to {}", path.display());
        Ok(())
    }
}

fn checked_name(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !name.starts_with('.');
    if !valid {
        bail!("'{}' is not a valid blob name", name);
    }
    Ok(name)
}

impl BlobStore for FileBlobStore {
    fn load(&self, app: &str) -> Result<Option<Blob>> {
        Self::read(&self.app_path(app)?)
    }

    fn save(&self, app: &str, blob: &Blob) -> Result<()> {
        Self::write(&self.app_path(app)?, blob)
    }

    fn load_shared(&self, name: &str) -> Result<Option<Blob>> {
        Self::read(&self.shared_path(name)?)
    }

    fn save_shared(&self, name: &str, blob: &Blob) -> Result<()> {
        Self::write(&self.shared_path(name)?, blob)
    }
}

/// The in-memory blob of one global host plus its flush schedule
pub struct PersistentState {
    app: String,
    blob: Option<Blob>,
    timer: SaveTimer,
    debounce_ticks: u32,
    store: Arc<dyn BlobStore>,
}

/// Handle shared by a global host and all of its children
pub type SharedState = Arc<Mutex<PersistentState>>;

impl PersistentState {
    /// Read the app's blob once. A failed read is logged and treated as empty.
    pub fn load(app: &str, store: Arc<dyn BlobStore>, debounce_ticks: u32) -> Self {
        let blob = match store.load(app) {
            Ok(blob) => blob,
            Err(e) => {
                error!(target: "apphost", "Failed to load state for app '{}': {:#}", app, e);
                None
            }
        };
        Self {
            app: app.to_string(),
            blob,
            timer: SaveTimer::Idle,
            debounce_ticks,
            store,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn read(&self) -> Option<&Blob> {
        self.blob.as_ref()
    }

    /// Replace the blob; the flush happens when the debounce window closes
    pub fn write(&mut self, blob: Blob) {
        self.blob = Some(blob);
        if self.timer.arm(self.debounce_ticks) {
            debug!(target: "apphost", "Scheduled save of app '{}' in {} ticks", self.app, self.debounce_ticks);
        }
    }

    /// Advance the debounce timer. Returns `true` if a flush happened.
    pub fn tick(&mut self) -> bool {
        if self.timer.tick() {
            self.flush();
            true
        } else {
            false
        }
    }

    /// Flush immediately if anything is pending
    pub fn close(&mut self) -> bool {
        if self.timer.take_pending() {
            self.flush();
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    fn flush(&self) {
        let Some(blob) = &self.blob else {
            return;
        };
        if let Err(e) = self.store.save(&self.app, blob) {
            error!(target: "apphost", "Failed to save state for app '{}': {:#}", self.app, e);
        }
    }
}

/// Lock shared state, recovering from a poisoned lock
pub fn lock_state(state: &SharedState) -> MutexGuard<'_, PersistentState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBlobStore;

    fn blob(n: i64) -> Blob {
        Blob::from_value(&Value::from(n)).unwrap()
    }

    #[test]
    fn test_value_conversion() {
        let mut map = BTreeMap::new();
        map.insert("count".to_string(), Value::Number(3.0));
        map.insert("ratio".to_string(), Value::Number(0.5));
        map.insert("tags".to_string(), Value::List(vec!["a".into(), true.into()]));
        let value = Value::Map(map);

        let stored = Blob::from_value(&value).unwrap();
        assert_eq!(stored.to_value(), value);
        assert!(Blob::from_value(&Value::Null).is_err());
        assert!(Blob::from_value(&Value::List(vec![Value::Null])).is_err());
    }

    #[test]
    fn test_players_read_back_as_players() {
        let mut map = BTreeMap::new();
        map.insert("owner".to_string(), Value::Player("alex".into()));
        map.insert("note".to_string(), Value::str("alex"));
        let value = Value::List(vec![Value::Map(map), Value::Player("bob".into())]);

        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        store.save("owners", &Blob::from_value(&value).unwrap()).unwrap();
        assert_eq!(store.load("owners").unwrap().unwrap().to_value(), value);

        // a table that merely contains the tag key stays a map
        let mut lookalike = BTreeMap::new();
        lookalike.insert(PLAYER_TAG.to_string(), Value::str("alex"));
        lookalike.insert("extra".to_string(), Value::Number(1.0));
        let lookalike = Value::Map(lookalike);
        assert_eq!(Blob::from_value(&lookalike).unwrap().to_value(), lookalike);
    }

    #[test]
    fn test_writes_in_one_window_flush_once() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut state = PersistentState::load("app", store.clone(), 3);
        state.write(blob(1));
        state.write(blob(2));
        state.tick();
        state.write(blob(3));
        assert!(!state.tick());
        assert!(state.tick());
        assert_eq!(store.save_count("app"), 1);
        assert_eq!(store.stored("app"), Some(blob(3)));

        // Nothing more without another write
        for _ in 0..10 {
            assert!(!state.tick());
        }
        assert_eq!(store.save_count("app"), 1);
    }

    #[test]
    fn test_close_mid_window_flushes_latest() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut state = PersistentState::load("app", store.clone(), 200);
        state.write(blob(1));
        state.write(blob(2));
        assert!(state.close());
        assert_eq!(store.save_count("app"), 1);
        assert_eq!(store.stored("app"), Some(blob(2)));
        assert!(!state.close());
    }

    #[test]
    fn test_load_reads_existing_blob() {
        let store = Arc::new(MemoryBlobStore::new());
        store.save("app", &blob(9)).unwrap();
        let state = PersistentState::load("app", store, 200);
        assert_eq!(state.read(), Some(&blob(9)));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        assert!(store.load("notes").unwrap().is_none());

        let mut map = BTreeMap::new();
        map.insert("text".to_string(), Value::str("hi"));
        let stored = Blob::from_value(&Value::Map(map)).unwrap();
        store.save("notes", &stored).unwrap();
        assert_eq!(store.load("notes").unwrap(), Some(stored.clone()));

        store.save_shared("common", &blob(4)).unwrap();
        assert!(dir.path().join("shared").join("common.toml").exists());
        assert_eq!(store.load_shared("common").unwrap(), Some(blob(4)));
    }

    #[test]
    fn test_file_store_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        assert!(store.save("../escape", &blob(1)).is_err());
        assert!(store.load("").is_err());
    }
}
