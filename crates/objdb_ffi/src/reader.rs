//! Reader FFI functions.
//!
//! A reader holds a copy of one object, so it stays valid after the
//! transaction that produced it ends. Null or absent properties read as
//! the type's default and report `is_null`.

use crate::arena::ObjHandle;
use crate::error::{ffi_call, FfiError, ObjResult};
use crate::handles::{write_out, write_string, HANDLES};
use objdb_codec::Field;
use objdb_core::{CoreError, ObjectRef};
use std::ffi::c_char;

/// Runs `f` on reader `reader` of instance `id`.
fn with_reader<R>(
    id: u32,
    reader: ObjHandle,
    f: impl FnOnce(&ObjectRef) -> Result<R, FfiError>,
) -> Result<R, FfiError> {
    let readers = HANDLES.readers.lock();
    f(readers.get(reader)?.check(id)?)
}

fn type_error(property: u16, expected: &str) -> FfiError {
    CoreError::illegal_argument(format!("property {property} is not {expected}")).into()
}

/// Id of the object.
///
/// # Safety
///
/// `out_id` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_reader_id(id: u32, reader: ObjHandle, out_id: *mut i64) -> ObjResult {
    ffi_call(|| {
        let object_id = with_reader(id, reader, |object| Ok(object.id()))?;
        write_out(out_id, object_id)
    })
}

/// Whether `property` is null.
///
/// # Safety
///
/// `out_null` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_reader_is_null(id: u32, reader: ObjHandle, property: u16, out_null: *mut bool) -> ObjResult {
    ffi_call(|| {
        let null = with_reader(id, reader, |object| Ok(object.reader()?.is_null(property)))?;
        write_out(out_null, null)
    })
}

/// Boolean `property`; null reads as false.
///
/// # Safety
///
/// `out_value` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_reader_read_bool(id: u32, reader: ObjHandle, property: u16, out_value: *mut bool) -> ObjResult {
    ffi_call(|| {
        let value = with_reader(id, reader, |object| match object.reader()?.read_field(property) {
            Field::Null => Ok(false),
            Field::Bool(value) => Ok(value),
            _ => Err(type_error(property, "a bool")),
        })?;
        write_out(out_value, value)
    })
}

/// Integer `property` of any width; null reads as 0.
///
/// # Safety
///
/// `out_value` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_reader_read_long(id: u32, reader: ObjHandle, property: u16, out_value: *mut i64) -> ObjResult {
    ffi_call(|| {
        let value = with_reader(id, reader, |object| match object.reader()?.read_field(property) {
            Field::Null => Ok(0),
            Field::Int(value) => Ok(value),
            _ => Err(type_error(property, "an integer")),
        })?;
        write_out(out_value, value)
    })
}

/// Floating-point `property` of any width; null reads as NaN.
///
/// # Safety
///
/// `out_value` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_reader_read_double(id: u32, reader: ObjHandle, property: u16, out_value: *mut f64) -> ObjResult {
    ffi_call(|| {
        let value = with_reader(id, reader, |object| match object.reader()?.read_field(property) {
            Field::Null => Ok(f64::NAN),
            Field::Float(value) => Ok(value),
            _ => Err(type_error(property, "a float")),
        })?;
        write_out(out_value, value)
    })
}

/// String `property`, or null.
///
/// # Safety
///
/// `out_value` must be a valid pointer. Free the result with
/// `objdb_free_string`.
#[no_mangle]
pub unsafe extern "C" fn objdb_reader_read_string(
    id: u32,
    reader: ObjHandle,
    property: u16,
    out_value: *mut *mut c_char,
) -> ObjResult {
    ffi_call(|| {
        let value = with_reader(id, reader, |object| match object.reader()?.read_field(property) {
            Field::Null => Ok(None),
            Field::String(value) => Ok(Some(value.to_owned())),
            _ => Err(type_error(property, "a string")),
        })?;
        match value {
            Some(value) => write_string(out_value, value),
            None => write_out(out_value, std::ptr::null_mut()),
        }
    })
}

/// The whole object as JSON, nested objects and lists included.
///
/// # Safety
///
/// `out_json` must be a valid pointer. Free the result with
/// `objdb_free_string`.
#[no_mangle]
pub unsafe extern "C" fn objdb_reader_to_json(id: u32, reader: ObjHandle, out_json: *mut *mut c_char) -> ObjResult {
    ffi_call(|| {
        let json = with_reader(id, reader, |object| Ok(object.to_json()?.to_string()))?;
        write_string(out_json, json)
    })
}

/// Frees a reader.
#[no_mangle]
pub extern "C" fn objdb_reader_free(id: u32, reader: ObjHandle) -> ObjResult {
    ffi_call(|| HANDLES.readers.lock().remove_checked(reader, id).map(drop))
}
