//! # ObjDB FFI
//!
//! Stable C ABI over the ObjDB engine, for host-language bindings.
//!
//! This crate provides:
//! - C-compatible function exports, all prefixed `objdb_`
//! - Generational handles for transactions, queries, cursors and the rest
//! - Result codes plus a per-thread last error message
//!
//! ## Ownership
//!
//! Every handle is owned by the caller until freed or consumed. Handles
//! bound to an instance are checked against it on every call and die with
//! it. Strings returned through out pointers are freed with
//! `objdb_free_string`.

#![warn(missing_docs)]

mod arena;
mod cursor;
mod error;
mod filter;
mod handles;
mod instance;
mod query;
mod reader;
mod txn;
mod types;
mod value;
mod watch;
mod writer;

pub use arena::ObjHandle;
pub use cursor::*;
pub use error::{clear_last_error, objdb_clear_error, objdb_last_error, set_last_error, FfiError, ObjResult};
pub use filter::*;
pub use handles::objdb_free_string;
pub use instance::*;
pub use query::*;
pub use reader::*;
pub use txn::*;
pub use types::{objdb_config_default, ObjConfig};
pub use value::{objdb_value_bool, objdb_value_free, objdb_value_integer, objdb_value_real, objdb_value_string};
pub use watch::*;
pub use writer::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{c_char, CStr, CString};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SCHEMA: &str = r#"[{
        "name": "Person",
        "autoIncrement": true,
        "properties": [
            {"name": "name", "type": "String"},
            {"name": "age", "type": "Int"}
        ]
    }]"#;

    /// Opens a memory instance under `id`; every test uses its own id.
    fn open(id: u32) {
        let name = CString::new(format!("ffi-{id}")).unwrap();
        let schema = CString::new(SCHEMA).unwrap();
        let config = ObjConfig {
            name: name.as_ptr(),
            schema_json: schema.as_ptr(),
            kind: 1,
            ..objdb_config_default()
        };
        // Safety: the config points into live CStrings
        assert_eq!(unsafe { objdb_instance_open(id, &config) }, ObjResult::Ok);
    }

    fn close(id: u32) {
        let mut closed = false;
        // Safety: `closed` is a local
        assert!(unsafe { objdb_instance_close(id, false, &mut closed) }.is_ok());
        assert!(closed);
    }

    unsafe fn take_string(ptr: *mut c_char) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        let text = CStr::from_ptr(ptr).to_str().unwrap().to_owned();
        objdb_free_string(ptr);
        Some(text)
    }

    #[test]
    fn write_query_and_read_back() {
        let id = 7001;
        open(id);
        // Safety: every pointer is a local or a live CString
        unsafe {
            let mut txn = 0;
            assert!(objdb_txn_begin(id, true, &mut txn).is_ok());
            let json = CString::new(r#"[{"name": "ada", "age": 36}, {"name": "alan", "age": 41}]"#).unwrap();
            let mut count = 0;
            assert!(objdb_import_json(id, txn, 0, json.as_ptr(), &mut count).is_ok());
            assert_eq!(count, 2);

            let (mut writer, mut value, mut new_id) = (0, 0, 0);
            assert!(objdb_writer_begin(id, 0, &mut writer).is_ok());
            let name = CString::new("grace").unwrap();
            assert!(objdb_value_string(name.as_ptr(), &mut value).is_ok());
            assert!(objdb_writer_set(id, writer, 0, value).is_ok());
            assert!(objdb_value_free(value).is_ok());
            assert!(objdb_writer_save(id, writer, txn, 0, false, &mut new_id).is_ok());
            assert_eq!(new_id, 3);
            assert!(objdb_txn_commit(id, txn).is_ok());

            let (mut filter, mut threshold, mut builder, mut query) = (0, 0, 0, 0);
            assert!(objdb_value_integer(40, &mut threshold).is_ok());
            assert!(objdb_filter_compare(1, 1, threshold, true, &mut filter).is_ok());
            assert!(objdb_query_builder(id, 0, &mut builder).is_ok());
            assert!(objdb_query_builder_set_filter(id, builder, filter).is_ok());
            assert!(objdb_query_build(id, builder, &mut query).is_ok());

            let (mut read, mut cursor, mut reader) = (0, 0, 0);
            assert!(objdb_txn_begin(id, false, &mut read).is_ok());
            assert!(objdb_cursor_open(id, read, query, 0, -1, &mut cursor).is_ok());
            assert!(objdb_cursor_next_reader(id, cursor, &mut reader).is_ok());
            let mut out: *mut c_char = std::ptr::null_mut();
            assert!(objdb_reader_read_string(id, reader, 0, &mut out).is_ok());
            assert_eq!(take_string(out).as_deref(), Some("alan"));
            assert!(objdb_cursor_next_json(id, cursor, &mut out).is_ok());
            assert_eq!(take_string(out), None);

            let mut null = false;
            let mut grace = 0;
            assert!(objdb_get_reader(id, read, 0, 3, &mut grace).is_ok());
            assert!(objdb_reader_is_null(id, grace, 1, &mut null).is_ok());
            assert!(null);

            let mut sum = 0;
            assert!(objdb_query_aggregate(id, read, query, 4, 1, &mut sum).is_ok());
            assert_eq!(take_value(sum), Some(objdb_core::Value::Integer(41)));

            assert!(objdb_reader_free(id, reader).is_ok());
            assert!(objdb_reader_free(id, grace).is_ok());
            assert!(objdb_cursor_free(id, cursor).is_ok());
            assert!(objdb_query_free(id, query).is_ok());
            assert!(objdb_txn_abort(id, read).is_ok());
        }
        close(id);
    }

    fn take_value(handle: ObjHandle) -> Option<objdb_core::Value> {
        let value = handles::HANDLES.value(handle).unwrap();
        assert!(objdb_value_free(handle).is_ok());
        value
    }

    #[test]
    fn cursors_stop_with_their_transaction() {
        let id = 7002;
        open(id);
        // Safety: every pointer is a local
        unsafe {
            let (mut txn, mut builder, mut query, mut cursor) = (0, 0, 0, 0);
            assert!(objdb_query_builder(id, 0, &mut builder).is_ok());
            assert!(objdb_query_build(id, builder, &mut query).is_ok());
            assert!(objdb_txn_begin(id, false, &mut txn).is_ok());
            assert!(objdb_cursor_open(id, txn, query, 0, -1, &mut cursor).is_ok());
            assert!(objdb_txn_abort(id, txn).is_ok());

            let mut out: *mut c_char = std::ptr::null_mut();
            assert_eq!(objdb_cursor_next_json(id, cursor, &mut out), ObjResult::TransactionClosed);
            assert_eq!(objdb_txn_abort(id, txn), ObjResult::InvalidHandle);
        }
        close(id);
    }

    #[test]
    fn handles_are_bound_to_their_instance() {
        let (a, b) = (7003, 7004);
        open(a);
        open(b);
        let mut txn = 0;
        // Safety: every pointer is a local
        unsafe {
            assert!(objdb_txn_begin(a, false, &mut txn).is_ok());
            let mut count = 0;
            assert_eq!(objdb_count(b, txn, 0, &mut count), ObjResult::InstanceMismatch);
            assert!(!objdb_last_error().is_null());
        }
        close(a);
        // Closing invalidated the transaction handle.
        assert_eq!(objdb_txn_abort(a, txn), ObjResult::InvalidHandle);
        assert!(!objdb_instance_is_open(a));
        close(b);
    }

    static DELIVERED: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn on_change(port: i64, collection: u16, _ids: *const i64, len: usize) {
        assert_eq!((port, collection), (42, 0));
        DELIVERED.fetch_add(len, Ordering::SeqCst);
    }

    #[test]
    fn watches_call_back_after_commit() {
        let id = 7005;
        open(id);
        // Safety: every pointer is a local or a live CString
        unsafe {
            let mut watch = 0;
            assert!(objdb_watch_collection(id, 0, 42, Some(on_change), &mut watch).is_ok());

            let mut txn = 0;
            assert!(objdb_txn_begin(id, true, &mut txn).is_ok());
            let json = CString::new(r#"[{"name": "a"}, {"name": "b"}]"#).unwrap();
            let mut count = 0;
            assert!(objdb_import_json(id, txn, 0, json.as_ptr(), &mut count).is_ok());
            assert!(objdb_txn_commit(id, txn).is_ok());

            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
            while DELIVERED.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            assert_eq!(DELIVERED.load(Ordering::SeqCst), 2);
            assert!(objdb_watch_stop(id, watch).is_ok());
        }
        close(id);
    }
}
