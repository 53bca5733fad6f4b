//! Copy command implementation.

use crate::store::{CliResult, Store};
use std::path::Path;

/// Runs the copy command. `target` is the new store directory and must
/// not exist yet.
pub fn run(store: &Store, target: &Path) -> CliResult<()> {
    store.instance.copy(target)?;
    println!("Copied {} to {}", store.path.display(), target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::export::export;
    use crate::store::tests::sample_store;

    #[test]
    fn copies_open_cleanly() {
        let (dir, path) = sample_store();
        let store = Store::open(&path, None).unwrap();
        let target = dir.path().join("backup.objdb");
        run(&store, &target).unwrap();
        assert!(run(&store, &target).is_err());
        let original = export(&store, "Note", false).unwrap();
        store.close().unwrap();

        let copy = Store::open(&target, None).unwrap();
        assert_eq!(export(&copy, "Note", false).unwrap(), original);
        copy.close().unwrap();
    }
}
