//! Instance and collection FFI functions.

use crate::arena::{Bound, ObjHandle};
use crate::error::{ffi_call, FfiError, ObjResult};
use crate::handles::{instance, str_arg, write_out, write_string, HANDLES};
use crate::types::ObjConfig;
use objdb_core::{CoreError, InstanceRegistry};
use std::ffi::c_char;
use std::path::Path;

/// Opens instance `id`, or joins the instance already open under the same
/// name and storage kind.
///
/// Each successful open must be matched by `objdb_instance_close`.
///
/// # Safety
///
/// `config` must be a valid pointer whose string fields are valid.
#[no_mangle]
pub unsafe extern "C" fn objdb_instance_open(id: u32, config: *const ObjConfig) -> ObjResult {
    ffi_call(|| {
        let config = config.as_ref().ok_or(FfiError::NullPointer)?;
        let (schema, config) = config.to_engine()?;
        InstanceRegistry::global().open(id, schema, config)?;
        Ok(())
    })
}

/// Releases one open of instance `id`. The last close shuts it down and
/// invalidates every handle it created; `delete_files` forces that and
/// deletes the store.
///
/// # Safety
///
/// `out_closed` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_instance_close(id: u32, delete_files: bool, out_closed: *mut bool) -> ObjResult {
    ffi_call(|| {
        let closed = InstanceRegistry::global().close(id, delete_files)?;
        if closed {
            HANDLES.purge(id);
        }
        if !out_closed.is_null() {
            write_out(out_closed, closed)?;
        }
        Ok(())
    })
}

/// Whether instance `id` is open.
#[no_mangle]
pub extern "C" fn objdb_instance_is_open(id: u32) -> bool {
    InstanceRegistry::global().get(id).is_some()
}

/// Position of collection `name`.
///
/// # Safety
///
/// `name` must be a valid string and `out_index` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_collection_index(id: u32, name: *const c_char, out_index: *mut u16) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let name = str_arg(name)?;
        let index = instance
            .collection_index(name)
            .ok_or_else(|| CoreError::illegal_argument(format!("no collection '{name}'")))?;
        write_out(out_index, index)
    })
}

/// Rewrites the log of instance `id` to its live objects.
#[no_mangle]
pub extern "C" fn objdb_instance_compact(id: u32) -> ObjResult {
    ffi_call(|| Ok(instance(id)?.compact()?))
}

/// Writes a consistent backup of instance `id` into the new directory
/// `target`.
///
/// # Safety
///
/// `target` must be a valid string.
#[no_mangle]
pub unsafe extern "C" fn objdb_instance_copy(id: u32, target: *const c_char) -> ObjResult {
    ffi_call(|| {
        let target = str_arg(target)?;
        Ok(instance(id)?.copy(Path::new(target))?)
    })
}

/// Object `object_id` as JSON, or null if `txn` does not see it.
///
/// # Safety
///
/// `out_json` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_get_json(
    id: u32,
    txn: ObjHandle,
    collection: u16,
    object_id: i64,
    out_json: *mut *mut c_char,
) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let object = HANDLES.with_txn(id, txn, |txn| Ok(instance.get(txn, collection, object_id)?))?;
        match object {
            Some(object) => write_string(out_json, object.to_json()?.to_string()),
            None => write_out(out_json, std::ptr::null_mut()),
        }
    })
}

/// Reader over object `object_id`, or handle 0 if `txn` does not see it.
///
/// # Safety
///
/// `out_reader` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_get_reader(
    id: u32,
    txn: ObjHandle,
    collection: u16,
    object_id: i64,
    out_reader: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let object = HANDLES.with_txn(id, txn, |txn| Ok(instance.get(txn, collection, object_id)?))?;
        let handle = object.map_or(0, |o| HANDLES.readers.lock().insert(Bound::new(id, o)));
        write_out(out_reader, handle)
    })
}

/// Deletes object `object_id`.
///
/// # Safety
///
/// `out_deleted` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_delete(
    id: u32,
    txn: ObjHandle,
    collection: u16,
    object_id: i64,
    out_deleted: *mut bool,
) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let deleted = HANDLES.with_txn(id, txn, |txn| Ok(instance.delete(txn, collection, object_id)?))?;
        write_out(out_deleted, deleted)
    })
}

/// Sets `len` properties of object `object_id`. `values[i]` is a value
/// handle, or 0 for null; the values stay owned by the caller.
///
/// # Safety
///
/// `properties` and `values` must point to `len` elements and
/// `out_updated` must be a valid pointer.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn objdb_update(
    id: u32,
    txn: ObjHandle,
    collection: u16,
    object_id: i64,
    properties: *const u16,
    values: *const ObjHandle,
    len: usize,
    out_updated: *mut bool,
) -> ObjResult {
    ffi_call(|| {
        if len > 0 && (properties.is_null() || values.is_null()) {
            return Err(FfiError::NullPointer);
        }
        let patch = (0..len)
            .map(|i| Ok((*properties.add(i), HANDLES.value(*values.add(i))?)))
            .collect::<Result<Vec<_>, FfiError>>()?;
        let instance = instance(id)?;
        let updated = HANDLES.with_txn(id, txn, |txn| {
            Ok(instance.update(txn, collection, object_id, &patch)?)
        })?;
        write_out(out_updated, updated)
    })
}

/// Number of objects `txn` sees in `collection`.
///
/// # Safety
///
/// `out_count` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_count(id: u32, txn: ObjHandle, collection: u16, out_count: *mut u32) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let count = HANDLES.with_txn(id, txn, |txn| Ok(instance.count(txn, collection)?))?;
        write_out(out_count, count)
    })
}

/// Deletes every object of `collection`.
#[no_mangle]
pub extern "C" fn objdb_clear(id: u32, txn: ObjHandle, collection: u16) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        HANDLES.with_txn(id, txn, |txn| Ok(instance.clear(txn, collection)?))
    })
}

/// Bytes the objects of `collection` occupy.
///
/// # Safety
///
/// `out_size` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_size(
    id: u32,
    txn: ObjHandle,
    collection: u16,
    include_indexes: bool,
    out_size: *mut i64,
) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let size = HANDLES.with_txn(id, txn, |txn| Ok(instance.size(txn, collection, include_indexes)?))?;
        write_out(out_size, size)
    })
}

/// Inserts every object of the JSON array `json`.
///
/// # Safety
///
/// `json` must be a valid string and `out_count` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_import_json(
    id: u32,
    txn: ObjHandle,
    collection: u16,
    json: *const c_char,
    out_count: *mut u32,
) -> ObjResult {
    ffi_call(|| {
        let json = str_arg(json)?;
        let instance = instance(id)?;
        let count = HANDLES.with_txn(id, txn, |txn| Ok(instance.import_json(txn, collection, json)?))?;
        write_out(out_count, count)
    })
}

/// Every object of `collection` as a JSON array.
///
/// # Safety
///
/// `out_json` must be a valid pointer. Free the result with
/// `objdb_free_string`.
#[no_mangle]
pub unsafe extern "C" fn objdb_export_json(
    id: u32,
    txn: ObjHandle,
    collection: u16,
    out_json: *mut *mut c_char,
) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let json = HANDLES.with_txn(id, txn, |txn| Ok(instance.export_json(txn, collection)?))?;
        write_string(out_json, json)
    })
}
