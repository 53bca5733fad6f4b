//! Watch FFI functions.
//!
//! Callbacks run on the instance's dispatcher thread, never inside a
//! commit. The `ids` array is only valid for the duration of the call.

use crate::arena::{Bound, ObjHandle};
use crate::error::{ffi_call, FfiError, ObjResult};
use crate::handles::{instance, write_out, HANDLES};
use objdb_core::{WatchEvent, WatchHandle, WatchSink};

/// Called with the port, the collection and the changed ids.
pub type ObjWatchCallback = Option<extern "C" fn(port: i64, collection: u16, ids: *const i64, len: usize)>;

struct CallbackSink(extern "C" fn(i64, u16, *const i64, usize));

impl WatchSink for CallbackSink {
    fn deliver(&self, event: WatchEvent) -> bool {
        (self.0)(event.port, event.collection, event.ids.as_ptr(), event.ids.len());
        true
    }
}

unsafe fn register(
    id: u32,
    callback: ObjWatchCallback,
    out_watch: *mut ObjHandle,
    watch: impl FnOnce(Box<dyn WatchSink>) -> Result<WatchHandle, FfiError>,
) -> Result<(), FfiError> {
    let callback = callback.ok_or(FfiError::NullPointer)?;
    if out_watch.is_null() {
        return Err(FfiError::NullPointer);
    }
    let handle = watch(Box::new(CallbackSink(callback)))?;
    let handle = HANDLES.watches.lock().insert(Bound::new(id, handle));
    write_out(out_watch, handle)
}

/// Calls `callback` after every commit that changes `collection`.
///
/// # Safety
///
/// `callback` must stay callable from any thread until the watch is
/// stopped, and `out_watch` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_watch_collection(
    id: u32,
    collection: u16,
    port: i64,
    callback: ObjWatchCallback,
    out_watch: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        register(id, callback, out_watch, |sink| {
            Ok(instance.watch_collection(collection, port, sink)?)
        })
    })
}

/// Calls `callback` after every commit that changes object `object_id`.
///
/// # Safety
///
/// As [`objdb_watch_collection`].
#[no_mangle]
pub unsafe extern "C" fn objdb_watch_object(
    id: u32,
    collection: u16,
    object_id: i64,
    port: i64,
    callback: ObjWatchCallback,
    out_watch: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        register(id, callback, out_watch, |sink| {
            Ok(instance.watch_object(collection, object_id, port, sink)?)
        })
    })
}

/// Calls `callback` after every commit that changes an object matching
/// the filter of `query`. The query handle stays with the caller.
///
/// # Safety
///
/// As [`objdb_watch_collection`].
#[no_mangle]
pub unsafe extern "C" fn objdb_watch_query(
    id: u32,
    query: ObjHandle,
    port: i64,
    callback: ObjWatchCallback,
    out_watch: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let query = HANDLES.query(id, query)?;
        register(id, callback, out_watch, |sink| {
            Ok(instance.watch_query(&query, port, sink)?)
        })
    })
}

/// Stops a watch and frees its handle. No callback runs once this
/// returns.
#[no_mangle]
pub extern "C" fn objdb_watch_stop(id: u32, watch: ObjHandle) -> ObjResult {
    ffi_call(|| {
        let handle = HANDLES.watches.lock().remove_checked(watch, id)?;
        match instance(id) {
            Ok(instance) => Ok(instance.stop_watching(handle)?),
            Err(_) => Ok(()),
        }
    })
}
