//! Import command implementation.

use crate::store::{CliResult, Store};
use std::fs;
use std::path::Path;

/// Imports the JSON array in `json` into `collection` in one transaction
/// and returns how many objects were stored. Nothing is stored on error.
pub fn import(store: &Store, collection: &str, json: &str) -> CliResult<u32> {
    let index = store.collection(collection)?;
    let db = &store.instance;
    let mut txn = db.begin_txn(true)?;
    match db.import_json(&mut txn, index, json) {
        Ok(count) => {
            db.commit_txn(txn)?;
            Ok(count)
        }
        Err(err) => {
            db.abort_txn(txn)?;
            Err(err.into())
        }
    }
}

/// Runs the import command.
pub fn run(store: &Store, collection: &str, input: &Path) -> CliResult<()> {
    let json = fs::read_to_string(input)?;
    let count = import(store, collection, &json)?;
    println!("Imported {count} objects into {collection}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::export::export;
    use crate::store::tests::sample_store;
    use crate::store::CliError;

    #[test]
    fn imports_and_keeps_explicit_ids() {
        let (_dir, path) = sample_store();
        let store = Store::open(&path, None).unwrap();
        let count = import(
            &store,
            "Note",
            r#"[{"title": "three", "stars": 3}, {"id": 10, "title": "ten"}]"#,
        )
        .unwrap();
        assert_eq!(count, 2);
        let json: serde_json::Value =
            serde_json::from_str(&export(&store, "Note", false).unwrap()).unwrap();
        let ids: Vec<i64> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 10]);
        store.close().unwrap();
    }

    #[test]
    fn bad_input_stores_nothing() {
        let (_dir, path) = sample_store();
        let store = Store::open(&path, None).unwrap();
        let err = import(&store, "Note", r#"[{"title": "ok"}, 5]"#).unwrap_err();
        assert!(matches!(err, CliError::Core(_)));
        let txn = store.instance.begin_txn(false).unwrap();
        assert_eq!(store.instance.count(&txn, 1).unwrap(), 2);
        store.instance.abort_txn(txn).unwrap();
        store.close().unwrap();
    }
}
