//! Process-wide handle tables and pointer helpers.

use crate::arena::{Arena, Bound, ObjHandle};
use crate::cursor::FfiCursor;
use crate::error::FfiError;
use crate::writer::PendingObject;
use objdb_core::{
    CoreError, Filter, Instance, InstanceId, InstanceRegistry, ObjectRef, Query, QueryBuilder,
    Txn, Value, WatchHandle,
};
use parking_lot::Mutex;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

/// Every live handle, by kind.
///
/// Values and filters are not tied to an instance. Everything else is
/// bound to the instance that created it and checked on every use.
pub(crate) struct Handles {
    pub txns: Mutex<Arena<Bound<Txn>>>,
    pub values: Mutex<Arena<Value>>,
    pub filters: Mutex<Arena<Filter>>,
    pub builders: Mutex<Arena<Bound<QueryBuilder>>>,
    pub queries: Mutex<Arena<Bound<Query>>>,
    pub cursors: Mutex<Arena<Bound<FfiCursor>>>,
    pub readers: Mutex<Arena<Bound<ObjectRef>>>,
    pub writers: Mutex<Arena<Bound<PendingObject>>>,
    pub watches: Mutex<Arena<Bound<WatchHandle>>>,
}

pub(crate) static HANDLES: Handles = Handles {
    txns: Mutex::new(Arena::new()),
    values: Mutex::new(Arena::new()),
    filters: Mutex::new(Arena::new()),
    builders: Mutex::new(Arena::new()),
    queries: Mutex::new(Arena::new()),
    cursors: Mutex::new(Arena::new()),
    readers: Mutex::new(Arena::new()),
    writers: Mutex::new(Arena::new()),
    watches: Mutex::new(Arena::new()),
};

impl Handles {
    /// Drops every handle bound to `instance_id`.
    pub fn purge(&self, instance_id: InstanceId) {
        let keep = |id: InstanceId| id != instance_id;
        self.txns.lock().retain(|b| keep(b.instance_id));
        self.builders.lock().retain(|b| keep(b.instance_id));
        self.queries.lock().retain(|b| keep(b.instance_id));
        self.cursors.lock().retain(|b| keep(b.instance_id));
        self.readers.lock().retain(|b| keep(b.instance_id));
        self.writers.lock().retain(|b| keep(b.instance_id));
        self.watches.lock().retain(|b| keep(b.instance_id));
    }

    /// Runs `f` on transaction `txn` of `instance_id`.
    pub fn with_txn<R>(
        &self,
        instance_id: InstanceId,
        txn: ObjHandle,
        f: impl FnOnce(&mut Txn) -> Result<R, FfiError>,
    ) -> Result<R, FfiError> {
        let mut txns = self.txns.lock();
        let txn = txns.get_mut(txn)?.check_mut(instance_id)?;
        f(txn)
    }

    /// A copy of query `query` of `instance_id`.
    pub fn query(&self, instance_id: InstanceId, query: ObjHandle) -> Result<Query, FfiError> {
        Ok(self.queries.lock().get(query)?.check(instance_id)?.clone())
    }

    /// A copy of value `value`; handle `0` is null.
    pub fn value(&self, value: ObjHandle) -> Result<Option<Value>, FfiError> {
        if value == 0 {
            return Ok(None);
        }
        Ok(Some(self.values.lock().get(value)?.clone()))
    }
}

/// The open instance `id`.
pub(crate) fn instance(id: InstanceId) -> Result<Arc<Instance>, FfiError> {
    InstanceRegistry::global()
        .get(id)
        .ok_or(FfiError::Core(CoreError::InstanceClosed))
}

/// Borrows a C string argument.
///
/// # Safety
///
/// `ptr` must be null or point to a null-terminated string that outlives
/// the returned reference.
pub(crate) unsafe fn str_arg<'a>(ptr: *const c_char) -> Result<&'a str, FfiError> {
    if ptr.is_null() {
        return Err(FfiError::NullPointer);
    }
    CStr::from_ptr(ptr).to_str().map_err(|_| FfiError::InvalidUtf8)
}

/// Writes `value` through an out pointer.
///
/// # Safety
///
/// `out` must be null or valid for writes.
pub(crate) unsafe fn write_out<T>(out: *mut T, value: T) -> Result<(), FfiError> {
    if out.is_null() {
        return Err(FfiError::NullPointer);
    }
    out.write(value);
    Ok(())
}

/// Hands `text` to the caller as a string freed by `objdb_free_string`.
///
/// # Safety
///
/// `out` must be null or valid for writes.
pub(crate) unsafe fn write_string(out: *mut *mut c_char, text: String) -> Result<(), FfiError> {
    let text = CString::new(text)
        .map_err(|_| CoreError::illegal_argument("string contains a nul byte"))?;
    write_out(out, text.into_raw())
}

/// Frees a string returned by this library.
///
/// # Safety
///
/// `string` must have been returned by an objdb function and not freed yet.
#[no_mangle]
pub unsafe extern "C" fn objdb_free_string(string: *mut c_char) {
    if !string.is_null() {
        drop(CString::from_raw(string));
    }
}

/// `limit` as passed over the C ABI: negative means unlimited.
pub(crate) fn limit_arg(limit: i64) -> Option<u32> {
    u32::try_from(limit).ok().or_else(|| (limit > 0).then_some(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits() {
        assert_eq!(limit_arg(-1), None);
        assert_eq!(limit_arg(0), Some(0));
        assert_eq!(limit_arg(10), Some(10));
        assert_eq!(limit_arg(i64::MAX), Some(u32::MAX));
    }

    #[test]
    fn string_arguments() {
        let text = CString::new("hello").unwrap();
        // Safety: pointers come from live CStrings or are null
        unsafe {
            assert_eq!(str_arg(text.as_ptr()).unwrap(), "hello");
            assert!(matches!(str_arg(std::ptr::null()), Err(FfiError::NullPointer)));
        }
    }

    #[test]
    fn returned_strings_round_trip() {
        let mut out: *mut c_char = std::ptr::null_mut();
        // Safety: `out` is a local and the string is freed once
        unsafe {
            write_string(&mut out, "json".into()).unwrap();
            assert_eq!(CStr::from_ptr(out).to_str().unwrap(), "json");
            objdb_free_string(out);
            assert!(write_string(std::ptr::null_mut(), "x".into()).is_err());
        }
    }
}
