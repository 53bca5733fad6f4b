//! Benchmark utilities.

use objdb_codec::{InstanceSchema, ObjectWriter};
use objdb_core::{apply_patch, CoreResult, Instance, InstanceConfig, Value};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// One indexed collection of people with a list of tags.
pub const SCHEMA: &str = r#"[{
    "name": "Person",
    "autoIncrement": true,
    "properties": [
        {"name": "name", "type": "String"},
        {"name": "age", "type": "Int"},
        {"name": "tags", "type": "StringList"}
    ],
    "indexes": [{"name": "age", "properties": ["age"]}]
}]"#;

/// Position of `name`.
pub const NAME: u16 = 0;
/// Position of `age`.
pub const AGE: u16 = 1;
/// Position of `tags`.
pub const TAGS: u16 = 2;

/// The parsed [`SCHEMA`].
pub fn schema() -> InstanceSchema {
    InstanceSchema::from_json(SCHEMA).expect("bench schema is valid")
}

/// Random alphanumeric text of `len` characters.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Random bytes of `size`.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Encodes a person with a `name_len` name and `tags` short tags.
pub fn encode_person(schema: &InstanceSchema, name_len: usize, tags: u32) -> Vec<u8> {
    let mut writer = ObjectWriter::for_collection(schema, 0).expect("collection exists");
    writer
        .write_string(NAME, &random_text(name_len))
        .expect("name fits");
    writer
        .write_int(AGE, rand::thread_rng().gen_range(0..100))
        .expect("age fits");
    let mut list = writer.write_list(TAGS, tags).expect("tags fit");
    for i in 0..tags {
        list.write_string(i, &random_text(6)).expect("tag fits");
    }
    writer.write_list_end(list).expect("tags fit");
    writer.finish().expect("object encodes")
}

/// A fresh memory instance of [`SCHEMA`].
pub fn memory_instance() -> Instance {
    Instance::open(1, schema(), InstanceConfig::in_memory("bench")).expect("memory instance opens")
}

/// Inserts `count` people with random names and ages in one
/// transaction and returns their ids.
pub fn populate(db: &Instance, count: u32, name_len: usize) -> CoreResult<Vec<i64>> {
    let mut rng = rand::thread_rng();
    let mut txn = db.begin_txn(true)?;
    let mut ids = Vec::with_capacity(count as usize);
    {
        let mut session = db.insert(&mut txn, 0, count)?;
        for _ in 0..count {
            let mut writer = session.writer()?;
            apply_patch(
                &mut writer,
                &[
                    (NAME, Some(Value::String(random_text(name_len)))),
                    (AGE, Some(Value::Integer(rng.gen_range(0..100)))),
                ],
            )?;
            ids.push(writer.save(None)?);
        }
    }
    db.commit_txn(txn)?;
    Ok(ids)
}
