//! Process-wide table of open instances.

use super::Instance;
use crate::config::InstanceConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::InstanceId;
use objdb_codec::InstanceSchema;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

struct Entry {
    instance: Arc<Instance>,
    /// Opens not yet matched by a close.
    opens: usize,
}

/// Open instances by id.
///
/// Opening a name and storage kind that is already open returns the live
/// instance and ignores the new configuration. Each open must be matched
/// by a close; the last close shuts the instance down.
#[derive(Default)]
pub struct InstanceRegistry {
    entries: Mutex<HashMap<InstanceId, Entry>>,
}

impl InstanceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<InstanceRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Opens an instance or returns the one already open under the same
    /// name and storage kind.
    ///
    /// # Errors
    ///
    /// [`CoreError::IllegalArgument`] if `id` is taken by a different
    /// instance, otherwise see [`Instance::open`].
    pub fn open(
        &self,
        id: InstanceId,
        schema: InstanceSchema,
        config: InstanceConfig,
    ) -> CoreResult<Arc<Instance>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries
            .values_mut()
            .find(|e| e.instance.name() == config.name && e.instance.kind() == config.kind)
        {
            entry.opens += 1;
            debug!(instance = entry.instance.id(), name = %config.name, "instance already open");
            return Ok(Arc::clone(&entry.instance));
        }
        if let Some(entry) = entries.get(&id) {
            return Err(CoreError::illegal_argument(format!(
                "instance id {id} is used by '{}'",
                entry.instance.name()
            )));
        }
        let instance = Arc::new(Instance::open(id, schema, config)?);
        entries.insert(
            id,
            Entry {
                instance: Arc::clone(&instance),
                opens: 1,
            },
        );
        Ok(instance)
    }

    /// The open instance `id`.
    #[must_use]
    pub fn get(&self, id: InstanceId) -> Option<Arc<Instance>> {
        self.entries
            .lock()
            .get(&id)
            .map(|e| Arc::clone(&e.instance))
    }

    /// Ids of every open instance, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.entries.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Releases one open of `id`. The last release closes the instance;
    /// `delete_files` closes it regardless and deletes its store.
    ///
    /// Returns whether the instance was closed.
    ///
    /// # Errors
    ///
    /// [`CoreError::IllegalArgument`] for an id that is not open, or
    /// whatever [`Instance::close`] reports.
    pub fn close(&self, id: InstanceId, delete_files: bool) -> CoreResult<bool> {
        let instance = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(&id)
                .ok_or_else(|| CoreError::illegal_argument(format!("instance {id} is not open")))?;
            entry.opens -= 1;
            if entry.opens > 0 && !delete_files {
                return Ok(false);
            }
            entries.remove(&id).map(|e| e.instance)
        };
        match instance {
            Some(instance) => instance.close(delete_files).map(|()| true),
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageKind;

    fn schema() -> InstanceSchema {
        InstanceSchema::from_json(r#"[{"name": "Item", "properties": [{"name": "n", "type": "Long"}]}]"#)
            .unwrap()
    }

    #[test]
    fn reopening_returns_the_live_instance() {
        let registry = InstanceRegistry::new();
        let first = registry
            .open(1, schema(), InstanceConfig::in_memory("main"))
            .unwrap();
        let second = registry
            .open(2, schema(), InstanceConfig::in_memory("main").with_max_size_mib(1))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.id(), 1);
        assert!(second.config().max_size_mib.is_none());
        assert_eq!(registry.ids(), vec![1]);

        assert!(!registry.close(1, false).unwrap());
        assert!(first.is_open());
        assert!(registry.close(1, false).unwrap());
        assert!(!first.is_open());
        assert!(registry.get(1).is_none());
    }

    #[test]
    fn ids_are_exclusive() {
        let registry = InstanceRegistry::new();
        registry
            .open(1, schema(), InstanceConfig::in_memory("a"))
            .unwrap();
        let err = registry
            .open(1, schema(), InstanceConfig::in_memory("b"))
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalArgument { .. }));
    }

    #[test]
    fn delete_files_removes_the_store() {
        let temp = tempfile::tempdir().unwrap();
        let registry = InstanceRegistry::new();
        let config = InstanceConfig::new("disk", temp.path(), StorageKind::Native);
        let instance = registry.open(3, schema(), config.clone()).unwrap();
        registry.open(3, schema(), config).unwrap();
        let path = instance.path().unwrap();
        assert!(path.exists());

        assert!(registry.close(3, true).unwrap());
        assert!(!path.exists());
        assert!(registry.close(3, false).is_err());
    }
}
