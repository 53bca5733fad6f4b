//! Type definitions for FFI.

use crate::error::FfiError;
use crate::handles::str_arg;
use objdb_codec::InstanceSchema;
use objdb_core::{CompactCondition, CoreError, InstanceConfig, StorageKind};
use objdb_storage::EncryptionKey;
use std::ffi::c_char;

/// Configuration for opening an instance.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct ObjConfig {
    /// Instance name (null-terminated UTF-8).
    pub name: *const c_char,
    /// Directory holding the store; ignored for memory instances.
    pub dir: *const c_char,
    /// Schema as JSON (null-terminated UTF-8).
    pub schema_json: *const c_char,
    /// Storage kind: 0 native, 1 memory, 2 encrypted.
    pub kind: u8,
    /// Size limit in MiB, 0 for unlimited.
    pub max_size_mib: u32,
    /// Whether to check the compaction thresholds at open.
    pub compact_on_open: bool,
    /// Minimum log size in bytes for compaction.
    pub compact_min_file_size: u64,
    /// Minimum reclaimable bytes for compaction.
    pub compact_min_bytes: u64,
    /// Minimum reclaimable fraction for compaction.
    pub compact_min_ratio: f32,
    /// Whether to fsync every commit.
    pub sync_on_commit: bool,
    /// Largest object in bytes, 0 for the default.
    pub max_object_size: u64,
    /// Encryption key bytes; required for encrypted instances.
    pub encryption_key: *const u8,
    /// Length of `encryption_key`.
    pub encryption_key_len: usize,
}

impl Default for ObjConfig {
    fn default() -> Self {
        let compact = CompactCondition::default();
        Self {
            name: std::ptr::null(),
            dir: std::ptr::null(),
            schema_json: std::ptr::null(),
            kind: StorageKind::Native as u8,
            max_size_mib: 0,
            compact_on_open: true,
            compact_min_file_size: compact.min_file_size,
            compact_min_bytes: compact.min_bytes,
            compact_min_ratio: compact.min_ratio,
            sync_on_commit: true,
            max_object_size: 0,
            encryption_key: std::ptr::null(),
            encryption_key_len: 0,
        }
    }
}

impl ObjConfig {
    /// Converts to the schema and engine configuration.
    ///
    /// # Safety
    ///
    /// Every pointer must be null or valid as documented on the fields.
    pub(crate) unsafe fn to_engine(&self) -> Result<(InstanceSchema, InstanceConfig), FfiError> {
        let name = str_arg(self.name)?;
        let schema = InstanceSchema::from_json(str_arg(self.schema_json)?)?;
        let kind = StorageKind::from_u8(self.kind).ok_or_else(|| {
            CoreError::illegal_argument(format!("unknown storage kind {}", self.kind))
        })?;

        let mut config = match kind {
            StorageKind::Memory => InstanceConfig::in_memory(name),
            kind => InstanceConfig::new(name, str_arg(self.dir)?, kind),
        }
        .with_sync_on_commit(self.sync_on_commit);
        if self.max_size_mib > 0 {
            config = config.with_max_size_mib(self.max_size_mib);
        }
        if self.max_object_size > 0 {
            config = config.with_max_object_size(
                usize::try_from(self.max_object_size).unwrap_or(usize::MAX),
            );
        }
        if self.compact_on_open {
            config = config.with_compact_condition(CompactCondition {
                min_file_size: self.compact_min_file_size,
                min_bytes: self.compact_min_bytes,
                min_ratio: self.compact_min_ratio,
            });
        }
        if !self.encryption_key.is_null() {
            let bytes = std::slice::from_raw_parts(self.encryption_key, self.encryption_key_len);
            let key = EncryptionKey::from_bytes(bytes).map_err(CoreError::from)?;
            config = config.with_encryption_key(key);
        }
        Ok((schema, config))
    }
}

/// Returns the default configuration; callers fill in name, dir and
/// schema.
#[no_mangle]
pub extern "C" fn objdb_config_default() -> ObjConfig {
    ObjConfig::default()
}
