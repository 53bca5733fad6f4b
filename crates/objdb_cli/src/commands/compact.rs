//! Compact command implementation.

use super::inspect::format_size;
use crate::store::{CliResult, Store};

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Live objects across all collections.
    pub objects: u64,
    /// Encoded size of the live objects.
    pub live_bytes: u64,
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction; the current size on a dry run.
    pub bytes_after: u64,
}

/// Measures the log and, unless `dry_run`, rewrites it.
pub fn compact(store: &Store, dry_run: bool) -> CliResult<CompactStats> {
    let db = &store.instance;
    let txn = db.begin_txn(false)?;
    let mut objects = 0u64;
    let mut live_bytes = 0u64;
    for collection in store.manifest.schema.collections() {
        if collection.embedded {
            continue;
        }
        let index = store.collection(&collection.name)?;
        objects += u64::from(db.count(&txn, index)?);
        live_bytes += u64::try_from(db.size(&txn, index, false)?).unwrap_or(0);
    }
    db.abort_txn(txn)?;

    let bytes_before = db.log_size()?;
    if !dry_run {
        db.compact()?;
    }
    Ok(CompactStats {
        objects,
        live_bytes,
        bytes_before,
        bytes_after: db.log_size()?,
    })
}

/// Runs the compact command.
pub fn run(store: &Store, dry_run: bool) -> CliResult<()> {
    println!("Compacting log at {}", store.path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(store, dry_run)?;
    println!("  Live objects: {}", stats.objects);
    println!("  Live data:    {}", format_size(stats.live_bytes));
    println!("  Size before:  {}", format_size(stats.bytes_before));
    if !dry_run {
        let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
        println!("  Size after:   {}", format_size(stats.bytes_after));
        println!(
            "  Space saved:  {} ({:.1}%)",
            format_size(saved),
            if stats.bytes_before > 0 {
                saved as f64 / stats.bytes_before as f64 * 100.0
            } else {
                0.0
            }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::import::import;
    use crate::store::tests::sample_store;

    #[test]
    fn rewrites_a_log_with_overwritten_objects() {
        let (_dir, path) = sample_store();
        let store = Store::open(&path, None).unwrap();
        for _ in 0..5 {
            import(&store, "Note", r#"[{"id": 1, "title": "one again", "stars": 5}]"#).unwrap();
        }

        let dry = compact(&store, true).unwrap();
        assert_eq!(dry.objects, 2);
        assert_eq!(dry.bytes_after, dry.bytes_before);

        let stats = compact(&store, false).unwrap();
        assert!(stats.bytes_after < stats.bytes_before);
        store.close().unwrap();

        let store = Store::open(&path, None).unwrap();
        let txn = store.instance.begin_txn(false).unwrap();
        assert_eq!(store.instance.count(&txn, 1).unwrap(), 2);
        store.instance.abort_txn(txn).unwrap();
        store.close().unwrap();
    }
}
