//! Test fixtures and instance helpers.
//!
//! Provides convenience functions for setting up test instances
//! and common test scenarios.

use objdb_codec::InstanceSchema;
use objdb_core::{Instance, InstanceConfig, InstanceId, StorageKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// One collection of people, with a non-unique index on age.
pub const PEOPLE: &str = r#"[{
    "name": "Person",
    "autoIncrement": true,
    "properties": [
        {"name": "name", "type": "String"},
        {"name": "age", "type": "Int"}
    ],
    "indexes": [{"name": "age", "properties": ["age"]}]
}]"#;

/// Property position of `name` in [`PEOPLE`].
pub const NAME: u16 = 0;
/// Property position of `age` in [`PEOPLE`].
pub const AGE: u16 = 1;

/// A person as exported to JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Object id; omitted on import to let the instance allocate one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Name.
    pub name: Option<String>,
    /// Age.
    pub age: Option<i32>,
}

impl Person {
    /// A person without an id.
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            id: None,
            name: Some(name.to_string()),
            age: Some(age),
        }
    }
}

/// The parsed [`PEOPLE`] schema.
pub fn people_schema() -> InstanceSchema {
    InstanceSchema::from_json(PEOPLE).expect("people schema is valid")
}

/// A fresh instance id, unique within the process.
pub fn next_instance_id() -> InstanceId {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A test instance with automatic cleanup.
pub struct TestInstance {
    /// The instance.
    pub instance: Instance,
    config: InstanceConfig,
    schema: InstanceSchema,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestInstance {
    /// A new memory instance of [`PEOPLE`].
    pub fn memory() -> Self {
        Self::open(people_schema(), InstanceConfig::in_memory("test"), None)
    }

    /// A new native instance of [`PEOPLE`] in a temporary directory.
    pub fn native() -> Self {
        Self::file(people_schema(), StorageKind::Native)
    }

    /// A new file-backed instance of `schema` in a temporary directory.
    pub fn file(schema: InstanceSchema, kind: StorageKind) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = InstanceConfig::new("test", temp_dir.path(), kind).with_sync_on_commit(false);
        Self::open(schema, config, Some(temp_dir))
    }

    /// A new instance of `schema` with `config`.
    pub fn with_config(schema: InstanceSchema, config: InstanceConfig) -> Self {
        Self::open(schema, config, None)
    }

    fn open(schema: InstanceSchema, config: InstanceConfig, temp_dir: Option<TempDir>) -> Self {
        let instance = Instance::open(next_instance_id(), schema.clone(), config.clone())
            .expect("Failed to open instance");
        Self {
            instance,
            config,
            schema,
            _temp_dir: temp_dir,
        }
    }

    /// Closes and reopens the instance from its files.
    pub fn reopen(&mut self) {
        self.instance.close(false).expect("Failed to close instance");
        self.instance = Instance::open(next_instance_id(), self.schema.clone(), self.config.clone())
            .expect("Failed to reopen instance");
    }

    /// Closes the instance, runs `f` on the directory that held it, and
    /// reopens it.
    pub fn reopen_after(&mut self, f: impl FnOnce(&Path)) {
        let path = self.instance.path().expect("memory instances have no files");
        self.instance.close(false).expect("Failed to close instance");
        f(&path);
        self.instance = Instance::open(next_instance_id(), self.schema.clone(), self.config.clone())
            .expect("Failed to reopen instance");
    }

    /// Directory the store directory lives in, for file instances.
    pub fn parent_dir(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }

    /// Inserts `people` in one transaction and returns their ids.
    pub fn insert_people(&self, people: &[Person]) -> Vec<i64> {
        let db = &self.instance;
        let before = self.people().iter().filter_map(|p| p.id).max();
        let mut txn = db.begin_txn(true).expect("Failed to begin");
        let json = serde_json::to_string(people).expect("people serialize");
        db.import_json(&mut txn, 0, &json).expect("Failed to import");
        db.commit_txn(txn).expect("Failed to commit");
        let mut ids: Vec<i64> = self
            .people()
            .iter()
            .filter_map(|p| p.id)
            .filter(|id| before.map_or(true, |max| *id > max))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Every committed person, in id order.
    pub fn people(&self) -> Vec<Person> {
        let db = &self.instance;
        let txn = db.begin_txn(false).expect("Failed to begin");
        let json = db.export_json(&txn, 0).expect("Failed to export");
        db.abort_txn(txn).expect("Failed to end");
        serde_json::from_str(&json).expect("export is valid JSON")
    }
}

impl std::ops::Deref for TestInstance {
    type Target = Instance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

/// Runs a test with a temporary memory instance of [`PEOPLE`].
///
/// # Example
///
/// ```rust,ignore
/// use objdb_testkit::with_temp_instance;
///
/// #[test]
/// fn my_test() {
///     with_temp_instance(|db| {
///         let txn = db.begin_txn(false).unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_instance<F, R>(f: F) -> R
where
    F: FnOnce(&Instance) -> R,
{
    let test = TestInstance::memory();
    f(&test.instance)
}

/// Runs a test with a temporary native instance of [`PEOPLE`].
pub fn with_native_instance<F, R>(f: F) -> R
where
    F: FnOnce(&Instance, &Path) -> R,
{
    let test = TestInstance::native();
    let path = test.instance.path().expect("native instances have a path");
    f(&test.instance, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A memory instance holding `count` people aged 20 and up, named
    /// `person-<n>`.
    pub fn populated_people(count: usize) -> TestInstance {
        let test = TestInstance::memory();
        let people: Vec<Person> = (0..count)
            .map(|i| Person::new(&format!("person-{i}"), 20 + (i % 50) as i32))
            .collect();
        test.insert_people(&people);
        test
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_instance_round_trips_people() {
        let test = TestInstance::memory();
        let ids = test.insert_people(&[Person::new("ada", 36), Person::new("alan", 41)]);
        assert_eq!(ids, vec![1, 2]);
        let people = test.people();
        assert_eq!(people.len(), 2);
        assert_eq!(people[1].name.as_deref(), Some("alan"));
        assert_eq!(people[1].id, Some(2));
    }

    #[test]
    fn native_instance_survives_reopen() {
        let mut test = TestInstance::native();
        test.insert_people(&[Person::new("ada", 36)]);
        test.reopen();
        assert_eq!(test.people(), vec![Person { id: Some(1), ..Person::new("ada", 36) }]);
    }

    #[test]
    fn populated_scenario() {
        let test = scenarios::populated_people(10);
        assert_eq!(test.people().len(), 10);
    }
}
