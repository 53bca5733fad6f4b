//! Filter FFI functions.
//!
//! Filters are built bottom-up. Constructors consume their value handles,
//! combinators consume their child filters, and
//! `objdb_query_builder_set_filter` consumes the root.

use crate::arena::ObjHandle;
use crate::error::{ffi_call, FfiError, ObjResult};
use crate::handles::{str_arg, write_out, HANDLES};
use crate::value::take;
use objdb_core::{CompareOp, CoreError, Filter, TextOp};
use std::ffi::c_char;

unsafe fn store(filter: Filter, out_filter: *mut ObjHandle) -> Result<(), FfiError> {
    if out_filter.is_null() {
        return Err(FfiError::NullPointer);
    }
    let handle = HANDLES.filters.lock().insert(filter);
    write_out(out_filter, handle)
}

fn compare_op(op: u8) -> Result<CompareOp, FfiError> {
    Ok(match op {
        0 => CompareOp::Equal,
        1 => CompareOp::Greater,
        2 => CompareOp::GreaterOrEqual,
        3 => CompareOp::Less,
        4 => CompareOp::LessOrEqual,
        op => return Err(CoreError::illegal_argument(format!("unknown comparison {op}")).into()),
    })
}

fn text_op(op: u8) -> Result<TextOp, FfiError> {
    Ok(match op {
        0 => TextOp::StartsWith,
        1 => TextOp::EndsWith,
        2 => TextOp::Contains,
        3 => TextOp::Matches,
        op => return Err(CoreError::illegal_argument(format!("unknown string condition {op}")).into()),
    })
}

fn sensitivity(filter: Filter, case_sensitive: bool) -> Filter {
    if case_sensitive {
        filter
    } else {
        filter.ignore_case()
    }
}

/// Takes `len` child filters out of the table.
///
/// Every handle is checked before any is removed, so a bad handle leaves
/// all of them with the caller.
unsafe fn take_children(children: *const ObjHandle, len: usize) -> Result<Vec<Filter>, FfiError> {
    if len == 0 {
        return Ok(Vec::new());
    }
    if children.is_null() {
        return Err(FfiError::NullPointer);
    }
    let handles = std::slice::from_raw_parts(children, len);
    let mut filters = HANDLES.filters.lock();
    for handle in handles {
        filters.get(*handle)?;
    }
    handles.iter().map(|handle| filters.remove(*handle)).collect()
}

/// `property` is null.
///
/// # Safety
///
/// `out_filter` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_filter_is_null(property: u16, out_filter: *mut ObjHandle) -> ObjResult {
    ffi_call(|| store(Filter::is_null(property), out_filter))
}

/// `property` compares to `value` as `op` says: 0 equal, 1 greater,
/// 2 greater or equal, 3 less, 4 less or equal. Value handle 0 is null;
/// any other value is consumed.
///
/// # Safety
///
/// `out_filter` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_filter_compare(
    property: u16,
    op: u8,
    value: ObjHandle,
    case_sensitive: bool,
    out_filter: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| {
        let op = compare_op(op)?;
        let filter = Filter::compare(property, op, take(value)?);
        store(sensitivity(filter, case_sensitive), out_filter)
    })
}

/// `lower <= property <= upper`. Both value handles are consumed; 0 is
/// null.
///
/// # Safety
///
/// `out_filter` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_filter_between(
    property: u16,
    lower: ObjHandle,
    upper: ObjHandle,
    case_sensitive: bool,
    out_filter: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| {
        let (lower, upper) = {
            let mut values = HANDLES.values.lock();
            for handle in [lower, upper].into_iter().filter(|h| *h != 0) {
                values.get(handle)?;
            }
            let mut take = |handle| (handle != 0).then(|| values.remove(handle)).transpose();
            (take(lower)?, take(upper)?)
        };
        let filter = Filter::Between {
            property,
            lower,
            upper,
            case_sensitive,
        };
        store(filter, out_filter)
    })
}

/// String condition on `property`: 0 starts with, 1 ends with,
/// 2 contains, 3 wildcard match.
///
/// # Safety
///
/// `pattern` must be a valid string and `out_filter` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_filter_text(
    property: u16,
    op: u8,
    pattern: *const c_char,
    case_sensitive: bool,
    out_filter: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| {
        let filter = Filter::text(property, text_op(op)?, str_arg(pattern)?);
        store(sensitivity(filter, case_sensitive), out_filter)
    })
}

/// `lower <= len(property) <= upper` for a list property.
///
/// # Safety
///
/// `out_filter` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_filter_list_length(
    property: u16,
    lower: u32,
    upper: u32,
    out_filter: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| store(Filter::list_length(property, lower, upper), out_filter))
}

/// `filter` holds for the embedded object at `property`. Consumes
/// `filter`.
///
/// # Safety
///
/// `out_filter` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_filter_embedded(
    property: u16,
    filter: ObjHandle,
    out_filter: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| {
        let child = HANDLES.filters.lock().remove(filter)?;
        store(Filter::embedded(property, child), out_filter)
    })
}

/// `lower <= id <= upper`.
///
/// # Safety
///
/// `out_filter` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_filter_id_between(lower: i64, upper: i64, out_filter: *mut ObjHandle) -> ObjResult {
    ffi_call(|| store(Filter::id_between(lower, upper), out_filter))
}

/// Conjunction of `len` filters, which are consumed.
///
/// # Safety
///
/// `children` must point to `len` handles and `out_filter` must be a valid
/// pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_filter_and(
    children: *const ObjHandle,
    len: usize,
    out_filter: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| store(Filter::and(take_children(children, len)?), out_filter))
}

/// Disjunction of `len` filters, which are consumed.
///
/// # Safety
///
/// As [`objdb_filter_and`].
#[no_mangle]
pub unsafe extern "C" fn objdb_filter_or(
    children: *const ObjHandle,
    len: usize,
    out_filter: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| store(Filter::or(take_children(children, len)?), out_filter))
}

/// Negation of `filter`, which is consumed.
///
/// # Safety
///
/// `out_filter` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_filter_not(filter: ObjHandle, out_filter: *mut ObjHandle) -> ObjResult {
    ffi_call(|| {
        let child = HANDLES.filters.lock().remove(filter)?;
        store(Filter::not(child), out_filter)
    })
}

/// Frees a filter that was not consumed.
#[no_mangle]
pub extern "C" fn objdb_filter_free(filter: ObjHandle) -> ObjResult {
    ffi_call(|| HANDLES.filters.lock().remove(filter).map(drop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{objdb_value_free, objdb_value_integer};
    use objdb_core::Value;

    #[test]
    fn combinators_consume_children() {
        let (mut a, mut b, mut both, mut value) = (0, 0, 0, 0);
        // Safety: every pointer is a local
        unsafe {
            assert!(objdb_value_integer(30, &mut value).is_ok());
            assert!(objdb_filter_compare(2, 1, value, true, &mut a).is_ok());
            assert!(objdb_filter_is_null(1, &mut b).is_ok());
            assert!(objdb_filter_and([a, b].as_ptr(), 2, &mut both).is_ok());
        }
        assert_eq!(objdb_value_free(value), ObjResult::InvalidHandle);
        assert_eq!(objdb_filter_free(a), ObjResult::InvalidHandle);
        let filter = HANDLES.filters.lock().remove(both).unwrap();
        assert_eq!(
            filter,
            Filter::and(vec![
                Filter::compare(2, CompareOp::Greater, Some(Value::Integer(30))),
                Filter::is_null(1),
            ])
        );
    }

    #[test]
    fn bad_children_are_left_alone() {
        let (mut a, mut out) = (0, 0);
        // Safety: every pointer is a local
        unsafe {
            assert!(objdb_filter_id_between(1, 5, &mut a).is_ok());
            assert_eq!(objdb_filter_or([a, 9999].as_ptr(), 2, &mut out), ObjResult::InvalidHandle);
        }
        assert!(objdb_filter_free(a).is_ok());
    }

    #[test]
    fn unknown_operators_are_rejected() {
        let mut out = 0;
        // Safety: `out` is a local
        let result = unsafe { objdb_filter_compare(0, 9, 0, true, &mut out) };
        assert_eq!(result, ObjResult::IllegalArgument);
    }
}
