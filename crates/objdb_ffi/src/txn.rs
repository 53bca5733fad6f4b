//! Transaction FFI functions.

use crate::arena::{Bound, ObjHandle};
use crate::error::{ffi_call, ObjResult};
use crate::handles::{instance, write_out, HANDLES};

/// Begins a transaction on instance `id`.
///
/// A write transaction blocks while another one is active on the
/// instance.
///
/// # Safety
///
/// `out_txn` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_txn_begin(id: u32, write: bool, out_txn: *mut ObjHandle) -> ObjResult {
    ffi_call(|| {
        let txn = instance(id)?.begin_txn(write)?;
        let handle = HANDLES.txns.lock().insert(Bound::new(id, txn));
        write_out(out_txn, handle)
    })
}

/// Commits `txn` and frees its handle, whether or not the commit succeeds.
#[no_mangle]
pub extern "C" fn objdb_txn_commit(id: u32, txn: ObjHandle) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let txn = HANDLES.txns.lock().remove_checked(txn, id)?;
        Ok(instance.commit_txn(txn)?)
    })
}

/// Aborts `txn` and frees its handle. Aborting a transaction that already
/// failed is fine.
#[no_mangle]
pub extern "C" fn objdb_txn_abort(id: u32, txn: ObjHandle) -> ObjResult {
    ffi_call(|| {
        let txn = HANDLES.txns.lock().remove_checked(txn, id)?;
        match instance(id) {
            Ok(instance) => Ok(instance.abort_txn(txn)?),
            Err(_) => Ok(()),
        }
    })
}
