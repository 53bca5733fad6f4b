//! Export command implementation.

use crate::store::{CliResult, Store};
use std::fs;
use std::path::Path;

/// Every live object of `collection` as a JSON array.
pub fn export(store: &Store, collection: &str, pretty: bool) -> CliResult<String> {
    let index = store.collection(collection)?;
    let db = &store.instance;
    let txn = db.begin_txn(false)?;
    let json = db.export_json(&txn, index);
    db.abort_txn(txn)?;
    let json = json?;
    if pretty {
        let value: serde_json::Value = serde_json::from_str(&json)?;
        Ok(serde_json::to_string_pretty(&value)?)
    } else {
        Ok(json)
    }
}

/// Runs the export command, writing to `output` or stdout.
pub fn run(store: &Store, collection: &str, output: Option<&Path>, pretty: bool) -> CliResult<()> {
    let json = export(store, collection, pretty)?;
    match output {
        Some(path) => {
            fs::write(path, json)?;
            tracing::info!(collection, path = %path.display(), "collection exported");
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_store;

    #[test]
    fn exports_every_object_with_its_id() {
        let (_dir, path) = sample_store();
        let store = Store::open(&path, None).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&export(&store, "Note", false).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"id": 1, "title": "one", "stars": 1},
                {"id": 2, "title": "two", "stars": 2}
            ])
        );
        assert!(export(&store, "Note", true).unwrap().contains('\n'));
        store.close().unwrap();
    }

    #[test]
    fn writes_to_a_file() {
        let (dir, path) = sample_store();
        let store = Store::open(&path, None).unwrap();
        let output = dir.path().join("notes.json");
        run(&store, "Note", Some(&output), false).unwrap();
        assert!(fs::read_to_string(&output).unwrap().contains("\"two\""));
        store.close().unwrap();
    }
}
