//! Cursor FFI functions.
//!
//! A cursor collects its window when opened and hands the objects out one
//! at a time, each as JSON or as a reader handle. It stays tied to the
//! transaction it was opened in and stops once that transaction ends.

use crate::arena::{Bound, ObjHandle};
use crate::error::{ffi_call, FfiError, ObjResult};
use crate::handles::{instance, limit_arg, write_out, write_string, HANDLES};
use objdb_core::{CoreError, CoreResult, ObjectRef};
use std::ffi::c_char;

/// The window of a query, materialized.
pub struct FfiCursor {
    txn: ObjHandle,
    objects: std::vec::IntoIter<ObjectRef>,
}

impl FfiCursor {
    /// Next object, after checking the transaction is still running.
    fn next(&mut self, instance_id: u32) -> Result<Option<ObjectRef>, FfiError> {
        let txns = HANDLES.txns.lock();
        let txn = txns
            .get(self.txn)
            .map_err(|_| CoreError::TransactionClosed)?
            .check(instance_id)?;
        if !txn.is_active() {
            return Err(CoreError::TransactionClosed.into());
        }
        Ok(self.objects.next())
    }
}

/// Opens a cursor over the `offset`/`limit` window of the results of
/// `query`; a negative `limit` means no limit.
///
/// # Safety
///
/// `out_cursor` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_cursor_open(
    id: u32,
    txn: ObjHandle,
    query: ObjHandle,
    offset: u32,
    limit: i64,
    out_cursor: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let query = HANDLES.query(id, query)?;
        let objects = HANDLES.with_txn(id, txn, |t| {
            Ok(instance
                .cursor(t, &query, offset, limit_arg(limit))?
                .collect::<CoreResult<Vec<_>>>()?)
        })?;
        let cursor = FfiCursor {
            txn,
            objects: objects.into_iter(),
        };
        let handle = HANDLES.cursors.lock().insert(Bound::new(id, cursor));
        write_out(out_cursor, handle)
    })
}

/// Next object as JSON, or null once the cursor is exhausted.
///
/// # Safety
///
/// `out_json` must be a valid pointer. Free the result with
/// `objdb_free_string`.
#[no_mangle]
pub unsafe extern "C" fn objdb_cursor_next_json(id: u32, cursor: ObjHandle, out_json: *mut *mut c_char) -> ObjResult {
    ffi_call(|| {
        let next = HANDLES.cursors.lock().get_mut(cursor)?.check_mut(id)?.next(id)?;
        match next {
            Some(object) => write_string(out_json, object.to_json()?.to_string()),
            None => write_out(out_json, std::ptr::null_mut()),
        }
    })
}

/// Next object as a reader handle, or 0 once the cursor is exhausted.
///
/// # Safety
///
/// `out_reader` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_cursor_next_reader(id: u32, cursor: ObjHandle, out_reader: *mut ObjHandle) -> ObjResult {
    ffi_call(|| {
        let next = HANDLES.cursors.lock().get_mut(cursor)?.check_mut(id)?.next(id)?;
        let handle = next.map_or(0, |object| HANDLES.readers.lock().insert(Bound::new(id, object)));
        write_out(out_reader, handle)
    })
}

/// Frees a cursor.
#[no_mangle]
pub extern "C" fn objdb_cursor_free(id: u32, cursor: ObjHandle) -> ObjResult {
    ffi_call(|| HANDLES.cursors.lock().remove_checked(cursor, id).map(drop))
}
