// Entity persistence module
// Saves and loads entity collections to/from JSON files in the data directory

use super::execution::{Execution, Notification};
use super::project::Project;
use super::template::Template;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Current version of the collection file format
const FORMAT_VERSION: u32 = 1;

/// Error types for persistence operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// File I/O error
    IoError(String),
    /// JSON serialization/deserialization error
    JsonError(String),
    /// Invalid data format
    InvalidData(String),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::IoError(msg) => write!(f, "IO Error: {}", msg),
            PersistenceError::JsonError(msg) => write!(f, "JSON Error: {}", msg),
            PersistenceError::InvalidData(msg) => write!(f, "Invalid Data: {}", msg),
        }
    }
}

impl std::error::Error for PersistenceError {}

/// Kind of persisted collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Projects with their embedded steps
    Projects,
    /// Templates
    Templates,
    /// Execution history
    Executions,
    /// Notifications
    Notifications,
}

impl EntityKind {
    /// File name of the collection inside the data directory
    pub fn file_name(self) -> &'static str {
        match self {
            EntityKind::Projects => "projects.json",
            EntityKind::Templates => "templates.json",
            EntityKind::Executions => "executions.json",
            EntityKind::Notifications => "notifications.json",
        }
    }
}

/// A record that lives in one of the store's collections
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection this record belongs to
    const KIND: EntityKind;

    /// Unique key of the record
    fn id(&self) -> &str;

    /// Contents of the collection when nothing usable is stored yet
    fn seed() -> Vec<Self> {
        Vec::new()
    }
}

impl Entity for Project {
    const KIND: EntityKind = EntityKind::Projects;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Template {
    const KIND: EntityKind = EntityKind::Templates;

    fn id(&self) -> &str {
        &self.id
    }

    fn seed() -> Vec<Self> {
        crate::orchestrator::templates::builtin_templates()
    }
}

impl Entity for Execution {
    const KIND: EntityKind = EntityKind::Executions;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Notification {
    const KIND: EntityKind = EntityKind::Notifications;

    fn id(&self) -> &str {
        &self.id
    }
}

/// On-disk envelope of a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionData<R> {
    /// Version of the file format (for future migration support)
    version: u32,
    /// Collection kind, checked on load
    kind: EntityKind,
    /// Records in insertion order
    records: R,
}

/// Durable keyed storage for every entity collection
///
/// Each collection is a single JSON file. Writes are serialized through an
/// internal lock and committed atomically (temp file + rename), so a failed
/// save never leaves a partially written collection behind.
#[derive(Debug)]
pub struct EntityStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl EntityStore {
    /// Open a store rooted at `data_dir`, creating the directory if needed
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, PersistenceError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir).map_err(|e| PersistenceError::IoError(e.to_string()))?;
        Ok(Self {
            data_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the collection files
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the default data directory
    /// Returns a path in the user's home directory or current directory
    pub fn default_data_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            let mut path = PathBuf::from(home);
            path.push(".deploy-orchestrator");
            path
        } else {
            PathBuf::from(".deploy-orchestrator")
        }
    }

    fn path_for(&self, kind: EntityKind) -> PathBuf {
        self.data_dir.join(kind.file_name())
    }

    /// Load a collection
    ///
    /// Never fails: a missing file yields the seed collection (empty for
    /// everything but templates), and an unreadable or corrupt file is logged
    /// and replaced by the seed collection as well.
    pub fn load<T: Entity>(&self) -> Vec<T> {
        let path = self.path_for(T::KIND);
        match Self::read_collection::<T>(&path, T::KIND) {
            Ok(Some(records)) => records,
            Ok(None) => T::seed(),
            Err(e) => {
                warn!(
                    kind = ?T::KIND,
                    path = %path.display(),
                    error = %e,
                    "Failed to load collection, falling back to defaults"
                );
                T::seed()
            }
        }
    }

    fn read_collection<T: Entity>(
        path: &Path,
        kind: EntityKind,
    ) -> Result<Option<Vec<T>>, PersistenceError> {
        if !path.exists() {
            return Ok(None);
        }

        let json =
            fs::read_to_string(path).map_err(|e| PersistenceError::IoError(e.to_string()))?;

        let data: CollectionData<Vec<T>> =
            serde_json::from_str(&json).map_err(|e| PersistenceError::JsonError(e.to_string()))?;

        // Validate version (for future migration support)
        if data.version != FORMAT_VERSION {
            return Err(PersistenceError::InvalidData(format!(
                "Unsupported collection version: {}",
                data.version
            )));
        }
        if data.kind != kind {
            return Err(PersistenceError::InvalidData(format!(
                "Expected {:?} collection, found {:?}",
                kind, data.kind
            )));
        }

        Ok(Some(data.records))
    }

    /// Save a whole collection, replacing what is stored
    pub fn save<T: Entity>(&self, records: &[T]) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write_collection(records)
    }

    fn write_collection<T: Entity>(&self, records: &[T]) -> Result<(), PersistenceError> {
        let data = CollectionData {
            version: FORMAT_VERSION,
            kind: T::KIND,
            records,
        };

        // Serialize the full collection before touching the filesystem
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| PersistenceError::JsonError(e.to_string()))?;

        let path = self.path_for(T::KIND);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| PersistenceError::IoError(e.to_string()))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            PersistenceError::IoError(e.to_string())
        })?;

        debug!(kind = ?T::KIND, count = records.len(), "Collection saved");
        Ok(())
    }

    /// Read-modify-write a collection under the store lock
    ///
    /// The collection is only written back when `f` returns `Ok`.
    pub fn try_update<T, R, E, F>(&self, f: F) -> Result<R, E>
    where
        T: Entity,
        E: From<PersistenceError>,
        F: FnOnce(&mut Vec<T>) -> Result<R, E>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.load::<T>();
        let result = f(&mut records)?;
        self.write_collection(&records)?;
        Ok(result)
    }

    /// Read-modify-write a collection under the store lock
    pub fn update<T, R, F>(&self, f: F) -> Result<R, PersistenceError>
    where
        T: Entity,
        F: FnOnce(&mut Vec<T>) -> R,
    {
        self.try_update::<T, R, PersistenceError, _>(|records| Ok(f(records)))
    }

    /// Get a record by ID
    pub fn get<T: Entity>(&self, id: &str) -> Option<T> {
        self.load::<T>().into_iter().find(|record| record.id() == id)
    }

    /// Insert a record, or replace the record with the same ID in place
    pub fn upsert<T: Entity>(&self, record: T) -> Result<(), PersistenceError> {
        self.update::<T, _, _>(|records| {
            match records.iter_mut().find(|r| r.id() == record.id()) {
                Some(slot) => *slot = record,
                None => records.push(record),
            }
        })
    }

    /// Append a record at the end of its collection
    pub fn append<T: Entity>(&self, record: T) -> Result<(), PersistenceError> {
        self.update::<T, _, _>(|records| records.push(record))
    }

    /// Remove a record by ID, returning it if it existed
    pub fn remove<T: Entity>(&self, id: &str) -> Result<Option<T>, PersistenceError> {
        self.update::<T, _, _>(|records| {
            records
                .iter()
                .position(|r| r.id() == id)
                .map(|idx| records.remove(idx))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::execution::TriggerSource;
    use crate::state::project::Step;
    use crate::state::status::{ExecutionStatus, StepStatus};
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, EntityStore) {
        let dir = TempDir::new().unwrap();
        let store = EntityStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_load_missing_collection_is_empty() {
        let (_dir, store) = open_store();
        assert!(store.load::<Project>().is_empty());
        assert!(store.load::<Execution>().is_empty());
    }

    #[test]
    fn test_missing_templates_fall_back_to_builtins() {
        let (_dir, store) = open_store();
        let templates = store.load::<Template>();
        assert!(!templates.is_empty());
    }

    #[test]
    fn test_project_round_trip_keeps_typed_timestamps() {
        let (_dir, store) = open_store();
        let a = Step::new("Install", 1, vec![]).with_commands(["npm ci"]);
        let b = Step::new("Build", 2, vec![a.id.clone()]);
        let mut project = Project::new("Web", vec![a, b]);
        project.steps[0].started_at = Some(Utc::now());

        store.save(&[project.clone()]).unwrap();
        let loaded = store.load::<Project>();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], project);
        let created: DateTime<Utc> = loaded[0].created_at;
        assert_eq!(created, project.created_at);
        assert_eq!(loaded[0].steps[1].status, StepStatus::Locked);
    }

    #[test]
    fn test_timestamps_are_iso8601_on_disk() {
        let (dir, store) = open_store();
        let execution = Execution::start("p1", TriggerSource::Manual);
        store.append(execution.clone()).unwrap();

        let raw = fs::read_to_string(dir.path().join("executions.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let started = value["records"][0]["started_at"].as_str().unwrap();
        let parsed: DateTime<Utc> = started.parse().unwrap();
        assert_eq!(parsed, execution.started_at);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_empty() {
        let (dir, store) = open_store();
        fs::write(dir.path().join("projects.json"), "{ not json").unwrap();
        assert!(store.load::<Project>().is_empty());
    }

    #[test]
    fn test_unsupported_version_falls_back() {
        let (dir, store) = open_store();
        fs::write(
            dir.path().join("notifications.json"),
            r#"{"version": 99, "kind": "notifications", "records": []}"#,
        )
        .unwrap();
        assert!(store.load::<Notification>().is_empty());
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let (_dir, store) = open_store();
        let first = Project::new("First", vec![]);
        let second = Project::new("Second", vec![]);
        store.upsert(first.clone()).unwrap();
        store.upsert(second.clone()).unwrap();

        let mut renamed = first.clone();
        renamed.name = "Renamed".to_string();
        store.upsert(renamed).unwrap();

        let loaded = store.load::<Project>();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "Renamed");
        assert_eq!(loaded[1].id, second.id);
    }

    #[test]
    fn test_remove() {
        let (_dir, store) = open_store();
        let project = Project::new("Gone", vec![]);
        store.upsert(project.clone()).unwrap();
        let removed = store.remove::<Project>(&project.id).unwrap();
        assert_eq!(removed.map(|p| p.id), Some(project.id.clone()));
        assert!(store.get::<Project>(&project.id).is_none());
        assert!(store.remove::<Project>(&project.id).unwrap().is_none());
    }

    #[test]
    fn test_try_update_error_does_not_write() {
        let (_dir, store) = open_store();
        store.upsert(Project::new("Kept", vec![])).unwrap();

        let result: Result<(), PersistenceError> = store.try_update::<Project, _, _, _>(|records| {
            records.clear();
            Err(PersistenceError::InvalidData("abort".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(store.load::<Project>().len(), 1);
    }

    #[test]
    fn test_append_preserves_order() {
        let (_dir, store) = open_store();
        for _ in 0..3 {
            store
                .append(Execution::start("p1", TriggerSource::Scheduled))
                .unwrap();
        }
        let executions = store.load::<Execution>();
        assert_eq!(executions.len(), 3);
        assert!(executions
            .windows(2)
            .all(|w| w[0].started_at <= w[1].started_at));
        assert!(executions
            .iter()
            .all(|e| e.status == ExecutionStatus::Running));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let (dir, store) = open_store();
        store.save(&[Project::new("A", vec![])]).unwrap();
        assert!(!dir.path().join("projects.json.tmp").exists());
    }
}
