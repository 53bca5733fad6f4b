//! Value FFI functions.
//!
//! Values are operands for filters, updates and writers. The caller owns a
//! value until it frees it or passes it to a function documented as
//! consuming it.

use crate::arena::ObjHandle;
use crate::error::{ffi_call, FfiError, ObjResult};
use crate::handles::{str_arg, write_out, HANDLES};
use objdb_core::Value;
use std::ffi::c_char;

unsafe fn store(value: Value, out_value: *mut ObjHandle) -> Result<(), FfiError> {
    let handle = HANDLES.values.lock().insert(value);
    if let Err(err) = write_out(out_value, handle) {
        HANDLES.values.lock().remove(handle)?;
        return Err(err);
    }
    Ok(())
}

/// Creates a boolean value.
///
/// # Safety
///
/// `out_value` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_value_bool(value: bool, out_value: *mut ObjHandle) -> ObjResult {
    ffi_call(|| store(Value::Bool(value), out_value))
}

/// Creates an integer value.
///
/// # Safety
///
/// `out_value` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_value_integer(value: i64, out_value: *mut ObjHandle) -> ObjResult {
    ffi_call(|| store(Value::Integer(value), out_value))
}

/// Creates a floating-point value.
///
/// # Safety
///
/// `out_value` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_value_real(value: f64, out_value: *mut ObjHandle) -> ObjResult {
    ffi_call(|| store(Value::Real(value), out_value))
}

/// Creates a string value; `value` is copied.
///
/// # Safety
///
/// `value` must be a valid string and `out_value` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_value_string(value: *const c_char, out_value: *mut ObjHandle) -> ObjResult {
    ffi_call(|| store(Value::String(str_arg(value)?.to_owned()), out_value))
}

/// Frees a value.
#[no_mangle]
pub extern "C" fn objdb_value_free(value: ObjHandle) -> ObjResult {
    ffi_call(|| HANDLES.values.lock().remove(value).map(drop))
}

/// Takes value `handle` out of the table; handle 0 is null.
pub(crate) fn take(handle: ObjHandle) -> Result<Option<Value>, FfiError> {
    if handle == 0 {
        return Ok(None);
    }
    HANDLES.values.lock().remove(handle).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn values_are_freed_once() {
        let mut handle = 0;
        // Safety: out pointer is a local
        unsafe {
            assert!(objdb_value_integer(5, &mut handle).is_ok());
        }
        assert_eq!(HANDLES.value(handle).unwrap(), Some(Value::Integer(5)));
        assert!(objdb_value_free(handle).is_ok());
        assert_eq!(objdb_value_free(handle), ObjResult::InvalidHandle);
    }

    #[test]
    fn strings_are_copied() {
        let text = CString::new("abc").unwrap();
        let mut handle = 0;
        // Safety: pointers come from locals
        unsafe {
            assert!(objdb_value_string(text.as_ptr(), &mut handle).is_ok());
        }
        drop(text);
        assert_eq!(take(handle).unwrap(), Some(Value::String("abc".into())));
        assert_eq!(take(0).unwrap(), None);
    }
}
