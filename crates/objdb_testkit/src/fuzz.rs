//! Fuzz testing harnesses for objdb.
//!
//! This module provides fuzz targets that can be used with cargo-fuzz
//! or other fuzzing frameworks. The tests below drive them with proptest.

use crate::fixtures::{Person, TestInstance, AGE};
use crate::oracle::insert_people;
use objdb_codec::{InstanceSchema, ObjectReader};
use objdb_core::{glob, CommitLog, Filter, Instance, Value};
use objdb_storage::InMemoryBackend;

/// A schema touching every kind of field the codec lays out.
pub const EVERY_KIND: &str = r#"[
    {"name": "Tag", "embedded": true, "properties": [{"name": "label", "type": "String"}]},
    {"name": "Post", "properties": [
        {"name": "title", "type": "String"},
        {"name": "views", "type": "Long"},
        {"name": "rating", "type": "Double"},
        {"name": "draft", "type": "Bool"},
        {"name": "flags", "type": "ByteList"},
        {"name": "tags", "type": "ObjectList", "target": "Tag"},
        {"name": "scores", "type": "IntList"},
        {"name": "words", "type": "StringList"},
        {"name": "cover", "type": "Object", "target": "Tag"}
    ]}
]"#;

/// The parsed [`EVERY_KIND`] schema.
pub fn every_kind_schema() -> InstanceSchema {
    InstanceSchema::from_json(EVERY_KIND).expect("fuzz schema is valid")
}

/// Fuzz target for object decoding.
///
/// Arbitrary bytes either fail to open as an object or read back as
/// some object; walking every field never panics.
pub fn fuzz_object_decode(schema: &InstanceSchema, data: &[u8]) {
    for collection in 0..schema.collections().len() {
        if let Ok(reader) = ObjectReader::new(1, data, schema, collection) {
            let _ = reader.to_json();
        }
    }
}

/// Fuzz target for log replay.
///
/// Replaying arbitrary bytes either fails or yields a log that replays
/// again to the same batches with nothing left to cut.
pub fn fuzz_log_replay(data: &[u8]) {
    let backend = InMemoryBackend::with_data(data.to_vec());
    let mut log = CommitLog::new(Box::new(backend), false);
    let Ok(first) = log.replay(|_, _| Ok(())) else {
        return;
    };
    let second = log
        .replay(|_, _| Ok(()))
        .expect("a replayed log replays again");
    assert_eq!(second.commits, first.commits);
    assert_eq!(second.last_sequence, first.last_sequence);
    assert_eq!(second.truncated_bytes, 0);
}

/// Fuzz target for JSON import.
///
/// Arbitrary text either imports or fails without changing what is
/// committed.
pub fn fuzz_json_import(db: &Instance, text: &str) {
    let before = count(db);
    let Ok(mut txn) = db.begin_txn(true) else {
        return;
    };
    match db.import_json(&mut txn, 0, text) {
        Ok(_) => {
            let _ = db.commit_txn(txn);
        }
        Err(_) => {
            let _ = db.abort_txn(txn);
            assert_eq!(count(db), before, "failed import changed the collection");
        }
    }
}

/// Fuzz target for instance operations.
///
/// Interprets `data` as a sequence of operations on people; none of them
/// may panic and the instance stays readable throughout.
pub fn fuzz_instance_operations(db: &Instance, data: &[u8]) {
    for chunk in data.chunks(3) {
        let [op, a, b] = match *chunk {
            [op, a, b] => [op, a, b],
            _ => return,
        };
        let id = i64::from(a % 16);
        let result = db.begin_txn(true).and_then(|mut txn| {
            match op % 5 {
                0 => {
                    let person = Person {
                        id: (b % 2 == 0).then_some(id),
                        ..Person::new(&format!("n{b}"), i32::from(b))
                    };
                    let _ = insert_people(db, &mut txn, &[person]);
                }
                1 => {
                    db.delete(&mut txn, 0, id)?;
                }
                2 => {
                    let age = (b % 3 != 0).then(|| Value::Integer(i64::from(b)));
                    db.update(&mut txn, 0, id, &[(AGE, age)])?;
                }
                3 => {
                    let mut builder = db.query(0)?;
                    builder.set_filter(Filter::less(AGE, i64::from(b)));
                    let query = builder.build()?;
                    db.query_delete(&mut txn, &query, 0, Some(u32::from(a % 4)))?;
                }
                _ => {
                    db.clear(&mut txn, 0)?;
                }
            }
            if a % 4 == 0 {
                db.abort_txn(txn)
            } else {
                db.commit_txn(txn)
            }
        });
        let _ = result;
        let _ = count(db);
    }
}

/// Fuzz target for wildcard matching. Never panics; `*` matches
/// everything.
pub fn fuzz_glob(pattern: &str, text: &str) {
    let _ = glob::matches(pattern, text);
    assert!(glob::matches("*", text));
}

fn count(db: &Instance) -> u32 {
    let Ok(txn) = db.begin_txn(false) else {
        return 0;
    };
    let count = db.count(&txn, 0).expect("count of a live instance");
    let _ = db.abort_txn(txn);
    count
}

/// Runs [`fuzz_instance_operations`] on a fresh memory instance and
/// returns it.
pub fn fuzz_fresh_instance(data: &[u8]) -> TestInstance {
    let test = TestInstance::memory();
    fuzz_instance_operations(&test, data);
    test
}
