//! Cross-crate integration test helpers.
//!
//! Provides a harness that mirrors every committed change in a model and
//! verifies the instance against it, plus end-to-end scenarios spanning
//! codec, storage and core.

use crate::fixtures::{Person, TestInstance, AGE};
use crate::oracle::{insert_people, Model};
use objdb_core::{Filter, Instance, Value, WatchEvent};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The instance under test.
    pub test: TestInstance,
    model: Model,
}

impl IntegrationHarness {
    /// A harness over a memory instance.
    pub fn new() -> Self {
        Self::over(TestInstance::memory())
    }

    /// A harness over `test`, which must be empty.
    pub fn over(test: TestInstance) -> Self {
        Self {
            test,
            model: Model::new(),
        }
    }

    /// Inserts people in one transaction and tracks them.
    pub fn insert(&mut self, people: &[Person]) -> Vec<i64> {
        let db = &self.test.instance;
        let mut txn = db.begin_txn(true).expect("Failed to begin");
        let ids = insert_people(db, &mut txn, people).expect("Failed to insert");
        db.commit_txn(txn).expect("Failed to commit");
        for (id, person) in ids.iter().zip(people) {
            self.model.insert(*id, person.clone());
        }
        ids
    }

    /// Deletes `id` and updates tracking.
    pub fn delete(&mut self, id: i64) -> bool {
        let db = &self.test.instance;
        let mut txn = db.begin_txn(true).expect("Failed to begin");
        let deleted = db.delete(&mut txn, 0, id).expect("Failed to delete");
        db.commit_txn(txn).expect("Failed to commit");
        assert_eq!(deleted, self.model.delete(id), "delete of {id} disagrees with the model");
        deleted
    }

    /// Verifies the instance holds exactly the tracked people.
    pub fn verify_all(&self) {
        assert_eq!(self.test.people(), self.model.people());
    }

    /// Number of tracked people.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers a watch on the filter `filter` over people and returns the
/// receiving end of its channel.
pub fn watch_people(db: &Instance, filter: Filter, port: i64) -> (objdb_core::WatchHandle, Receiver<WatchEvent>) {
    let mut builder = db.query(0).expect("Failed to start query");
    builder.set_filter(filter);
    let query = builder.build().expect("Failed to build query");
    let (tx, rx) = channel();
    let handle = db
        .watch_query(&query, port, Box::new(tx))
        .expect("Failed to watch");
    (handle, rx)
}

/// Waits up to a second for the next event.
pub fn next_event(rx: &Receiver<WatchEvent>) -> Option<WatchEvent> {
    rx.recv_timeout(Duration::from_secs(1)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{people_schema, NAME};
    use objdb_core::{AggregationKind, CoreError, InstanceConfig, Sort, StorageKind};
    use std::thread;

    fn person(id: i64, name: &str, age: i32) -> Person {
        Person {
            id: Some(id),
            ..Person::new(name, age)
        }
    }

    #[test]
    fn indexed_age_scenario() {
        let test = TestInstance::memory();
        let db = &test.instance;
        let mut txn = db.begin_txn(true).unwrap();
        insert_people(
            db,
            &mut txn,
            &[person(1, "a", 20), person(2, "b", 30), person(3, "c", 25)],
        )
        .unwrap();
        db.commit_txn(txn).unwrap();

        let mut builder = db.query(0).unwrap();
        builder.set_filter(Filter::greater(AGE, 20)).sort_by(AGE, Sort::Asc, true);
        let older = builder.build().unwrap();
        let everyone = db.query(0).unwrap().build().unwrap();

        let txn = db.begin_txn(false).unwrap();
        let ids: Vec<i64> = db
            .cursor(&txn, &older, 0, None)
            .unwrap()
            .map(|o| o.unwrap().id())
            .collect();
        assert_eq!(ids, vec![3, 2]);
        let average = db
            .aggregate(&txn, &everyone, AggregationKind::Average, Some(AGE))
            .unwrap();
        assert_eq!(average, Some(Value::Real(25.0)));
        db.abort_txn(txn).unwrap();

        let mut txn = db.begin_txn(true).unwrap();
        assert!(db.delete(&mut txn, 0, 2).unwrap());
        db.commit_txn(txn).unwrap();
        let txn = db.begin_txn(false).unwrap();
        assert_eq!(db.count(&txn, 0).unwrap(), 2);
    }

    #[test]
    fn harness_tracks_inserts_and_deletes() {
        let mut harness = IntegrationHarness::over(TestInstance::native());
        let ids = harness.insert(&[Person::new("ada", 36), Person::new("alan", 41)]);
        assert!(harness.delete(ids[0]));
        assert!(!harness.delete(ids[0]));
        harness.verify_all();
        harness.test.reopen();
        harness.verify_all();
        assert_eq!(harness.tracked_count(), 1);
    }

    #[test]
    fn readers_keep_their_snapshot_across_a_concurrent_commit() {
        let test = TestInstance::memory();
        test.insert_people(&[Person::new("ada", 36)]);
        let db = &test.instance;

        let reader = db.begin_txn(false).unwrap();
        thread::scope(|scope| {
            scope
                .spawn(|| {
                    let mut txn = db.begin_txn(true).unwrap();
                    insert_people(db, &mut txn, &[Person::new("alan", 41)]).unwrap();
                    db.delete(&mut txn, 0, 1).unwrap();
                    db.commit_txn(txn).unwrap();
                })
                .join()
                .unwrap();
        });

        assert_eq!(db.count(&reader, 0).unwrap(), 1);
        assert!(db.get(&reader, 0, 1).unwrap().is_some());
        db.abort_txn(reader).unwrap();

        let fresh = db.begin_txn(false).unwrap();
        assert!(db.get(&fresh, 0, 1).unwrap().is_none());
        assert_eq!(db.count(&fresh, 0).unwrap(), 1);
    }

    #[test]
    fn write_transactions_see_their_own_changes() {
        let test = TestInstance::memory();
        let db = &test.instance;
        let mut txn = db.begin_txn(true).unwrap();
        let ids = insert_people(db, &mut txn, &[Person::new("ada", 36)]).unwrap();
        assert_eq!(db.count(&txn, 0).unwrap(), 1);
        db.update(&mut txn, 0, ids[0], &[(AGE, Some(Value::Integer(37)))]).unwrap();
        let object = db.get(&txn, 0, ids[0]).unwrap().unwrap();
        assert_eq!(object.reader().unwrap().read_int(AGE), Some(37));
        db.abort_txn(txn).unwrap();
        assert!(test.people().is_empty());
    }

    #[test]
    fn query_watches_fire_for_matching_changes() {
        let test = TestInstance::memory();
        let db = &test.instance;
        let (handle, rx) = watch_people(db, Filter::greater(AGE, 40), 7);

        test.insert_people(&[Person::new("young", 20)]);
        let ids = test.insert_people(&[Person::new("old", 60)]);
        let event = next_event(&rx).expect("matching insert was not delivered");
        assert_eq!(event.port, 7);
        assert!(event.ids.contains(&ids[0]));

        // Leaving the filter's range is a change to a matching object.
        let mut txn = db.begin_txn(true).unwrap();
        db.update(&mut txn, 0, ids[0], &[(AGE, Some(Value::Integer(10)))]).unwrap();
        db.commit_txn(txn).unwrap();
        assert!(next_event(&rx).is_some());

        db.stop_watching(handle).unwrap();
        test.insert_people(&[Person::new("older", 80)]);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn text_filters_respect_case_sensitivity() {
        let test = TestInstance::memory();
        test.insert_people(&[Person::new("Ada", 36), Person::new("adam", 20)]);
        let db = &test.instance;
        let run = |filter: Filter| {
            let mut builder = db.query(0).unwrap();
            builder.set_filter(filter);
            let query = builder.build().unwrap();
            let txn = db.begin_txn(false).unwrap();
            db.aggregate(&txn, &query, AggregationKind::Count, None).unwrap()
        };
        assert_eq!(run(Filter::starts_with(NAME, "ad")), Some(Value::Integer(1)));
        assert_eq!(run(Filter::starts_with(NAME, "ad").ignore_case()), Some(Value::Integer(2)));
        assert_eq!(run(Filter::matches(NAME, "?da")), Some(Value::Integer(1)));
    }

    #[test]
    fn encrypted_stores_need_their_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = objdb_storage::EncryptionKey::from_bytes(&[7u8; 32]).unwrap();
        let config = InstanceConfig::new("secret", dir.path(), StorageKind::Encrypted)
            .with_encryption_key(key);
        {
            let test = TestInstance::with_config(people_schema(), config.clone());
            test.insert_people(&[Person::new("ada", 36)]);
            test.instance.close(false).unwrap();
        }
        let test = TestInstance::with_config(people_schema(), config.clone());
        assert_eq!(test.people().len(), 1);
        test.instance.close(false).unwrap();

        let wrong = objdb_storage::EncryptionKey::from_bytes(&[8u8; 32]).unwrap();
        let err = Instance::open(
            crate::next_instance_id(),
            people_schema(),
            config.with_encryption_key(wrong),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
    }

    #[test]
    fn appended_properties_read_as_null() {
        let test = TestInstance::native();
        test.insert_people(&[Person::new("ada", 36)]);
        let parent = test.parent_dir().unwrap().to_path_buf();
        test.instance.close(false).unwrap();

        let grown = objdb_codec::InstanceSchema::from_json(
            r#"[{
                "name": "Person",
                "autoIncrement": true,
                "properties": [
                    {"name": "name", "type": "String"},
                    {"name": "age", "type": "Int"},
                    {"name": "email", "type": "String"}
                ],
                "indexes": [{"name": "age", "properties": ["age"]}]
            }]"#,
        )
        .unwrap();
        let config = InstanceConfig::new("test", &parent, StorageKind::Native);
        let db = Instance::open(crate::next_instance_id(), grown, config).unwrap();
        let txn = db.begin_txn(false).unwrap();
        let object = db.get(&txn, 0, 1).unwrap().unwrap();
        let reader = object.reader().unwrap();
        assert_eq!(reader.read_string(NAME).map(|(s, _)| s), Some("ada"));
        assert!(reader.is_null(2));
        db.abort_txn(txn).unwrap();
        db.close(false).unwrap();
    }
}
