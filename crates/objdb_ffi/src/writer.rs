//! Writer FFI functions.
//!
//! A writer collects property values for one new object and inserts it
//! when saved. Properties never set are stored as null.

use crate::arena::{Bound, ObjHandle};
use crate::error::{ffi_call, FfiError, ObjResult};
use crate::handles::{instance, write_out, HANDLES};
use objdb_core::{apply_patch, CoreError, Value};

/// An object waiting to be saved.
#[derive(Debug)]
pub struct PendingObject {
    collection: u16,
    values: Vec<(u16, Option<Value>)>,
}

/// Starts a new object in `collection`.
///
/// # Safety
///
/// `out_writer` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_writer_begin(id: u32, collection: u16, out_writer: *mut ObjHandle) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let schema = instance.schema().collection(usize::from(collection))?;
        if schema.embedded {
            return Err(CoreError::illegal_argument(format!(
                "embedded collection '{}' has no objects of its own",
                schema.name
            ))
            .into());
        }
        let pending = PendingObject {
            collection,
            values: Vec::new(),
        };
        let handle = HANDLES.writers.lock().insert(Bound::new(id, pending));
        write_out(out_writer, handle)
    })
}

/// Sets `property` to a copy of `value`; handle 0 is null.
#[no_mangle]
pub extern "C" fn objdb_writer_set(id: u32, writer: ObjHandle, property: u16, value: ObjHandle) -> ObjResult {
    ffi_call(|| {
        let value = HANDLES.value(value)?;
        let mut writers = HANDLES.writers.lock();
        let pending = writers.get_mut(writer)?.check_mut(id)?;
        pending.values.retain(|(p, _)| *p != property);
        pending.values.push((property, value));
        Ok(())
    })
}

/// Inserts the object in `txn` and frees the writer. Uses `object_id` if
/// `has_id` is set, otherwise a fresh id.
///
/// # Safety
///
/// `out_id` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_writer_save(
    id: u32,
    writer: ObjHandle,
    txn: ObjHandle,
    object_id: i64,
    has_id: bool,
    out_id: *mut i64,
) -> ObjResult {
    ffi_call(|| {
        if out_id.is_null() {
            return Err(FfiError::NullPointer);
        }
        let pending = HANDLES.writers.lock().remove_checked(writer, id)?;
        let instance = instance(id)?;
        let saved = HANDLES.with_txn(id, txn, |txn| {
            let mut session = instance.insert(txn, pending.collection, 1)?;
            let mut object = session.writer()?;
            apply_patch(&mut object, &pending.values)?;
            Ok(object.save(has_id.then_some(object_id))?)
        })?;
        write_out(out_id, saved)
    })
}

/// Frees a writer that was not saved.
#[no_mangle]
pub extern "C" fn objdb_writer_free(id: u32, writer: ObjHandle) -> ObjResult {
    ffi_call(|| HANDLES.writers.lock().remove_checked(writer, id).map(drop))
}
