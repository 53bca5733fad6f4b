//! Inspect command implementation.

use crate::store::{CliResult, Store};
use serde::Serialize;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// On-disk format version.
    pub format_version: String,
    /// Commit log size in bytes.
    pub log_size: u64,
    /// Sequence number of the last commit.
    pub last_sequence: u64,
    /// Per-collection statistics.
    pub collections: Vec<CollectionStats>,
    /// Schema JSON (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

/// Statistics for a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Number of live objects.
    pub count: u32,
    /// Encoded size of the live objects in bytes.
    pub data_size: i64,
    /// Estimated size of the index entries in bytes.
    pub index_size: i64,
    /// Number of properties.
    pub properties: usize,
    /// Number of indexes.
    pub indexes: usize,
}

/// Gathers statistics for every top-level collection.
pub fn collect(store: &Store, with_schema: bool) -> CliResult<InspectResult> {
    let db = &store.instance;
    let txn = db.begin_txn(false)?;
    let mut collections = Vec::new();
    for collection in store.manifest.schema.collections() {
        if collection.embedded {
            continue;
        }
        let index = store.collection(&collection.name)?;
        let data_size = db.size(&txn, index, false)?;
        collections.push(CollectionStats {
            name: collection.name.clone(),
            count: db.count(&txn, index)?,
            data_size,
            index_size: db.size(&txn, index, true)? - data_size,
            properties: collection.properties.len(),
            indexes: collection.indexes.len(),
        });
    }
    db.abort_txn(txn)?;

    let (major, minor) = store.manifest.format_version;
    let schema = if with_schema {
        Some(serde_json::from_str(&store.manifest.schema.to_json())?)
    } else {
        None
    };
    Ok(InspectResult {
        path: store.path.display().to_string(),
        format_version: format!("{major}.{minor}"),
        log_size: db.log_size()?,
        last_sequence: db.committed_sequence().0,
        collections,
        schema,
    })
}

/// Runs the inspect command.
pub fn run(store: &Store, with_schema: bool, format: &str) -> CliResult<()> {
    let result = collect(store, with_schema)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("objdb Store Inspection");
    println!("======================");
    println!();
    println!("Path:           {}", result.path);
    println!("Format version: {}", result.format_version);
    println!("Last commit:    {}", result.last_sequence);
    println!("Log size:       {}", format_size(result.log_size));
    println!();
    println!("Collections:");
    for col in &result.collections {
        println!(
            "  {} - {} objects, {} data, {} indexes ({} properties, {} indexes)",
            col.name,
            col.count,
            format_size(col.data_size.max(0) as u64),
            format_size(col.index_size.max(0) as u64),
            col.properties,
            col.indexes
        );
    }
    if let Some(schema) = &result.schema {
        println!();
        println!("Schema:");
        println!("{}", serde_json::to_string_pretty(schema).unwrap_or_default());
    }
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_store;

    #[test]
    fn counts_live_objects_per_collection() {
        let (_dir, path) = sample_store();
        let store = Store::open(&path, None).unwrap();
        let result = collect(&store, true).unwrap();
        assert_eq!(result.format_version, "1.0");
        assert_eq!(result.collections.len(), 1);
        let notes = &result.collections[0];
        assert_eq!(notes.name, "Note");
        assert_eq!(notes.count, 2);
        assert!(notes.data_size > 0);
        assert!(notes.index_size > 0);
        assert!(result.log_size > 0);
        assert!(result.schema.is_some());
        store.close().unwrap();
    }

    #[test]
    fn sizes_are_readable() {
        assert_eq!(format_size(12), "12 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
