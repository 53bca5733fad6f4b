//! Query FFI functions.

use crate::arena::{Bound, ObjHandle};
use crate::error::{ffi_call, FfiError, ObjResult};
use crate::handles::{instance, limit_arg, write_out, write_string, HANDLES};
use objdb_core::{AggregationKind, CoreError, Sort};
use std::ffi::c_char;

/// Starts a query over `collection`.
///
/// # Safety
///
/// `out_builder` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_query_builder(id: u32, collection: u16, out_builder: *mut ObjHandle) -> ObjResult {
    ffi_call(|| {
        let builder = instance(id)?.query(collection)?;
        let handle = HANDLES.builders.lock().insert(Bound::new(id, builder));
        write_out(out_builder, handle)
    })
}

/// Sets the filter of `builder`, consuming `filter`.
#[no_mangle]
pub extern "C" fn objdb_query_builder_set_filter(id: u32, builder: ObjHandle, filter: ObjHandle) -> ObjResult {
    ffi_call(|| {
        let mut builders = HANDLES.builders.lock();
        let builder = builders.get_mut(builder)?.check_mut(id)?;
        let filter = HANDLES.filters.lock().remove(filter)?;
        builder.set_filter(filter);
        Ok(())
    })
}

/// Appends a sort key.
#[no_mangle]
pub extern "C" fn objdb_query_builder_sort_by(
    id: u32,
    builder: ObjHandle,
    property: u16,
    descending: bool,
    case_sensitive: bool,
) -> ObjResult {
    ffi_call(|| {
        let order = if descending { Sort::Desc } else { Sort::Asc };
        let mut builders = HANDLES.builders.lock();
        builders
            .get_mut(builder)?
            .check_mut(id)?
            .sort_by(property, order, case_sensitive);
        Ok(())
    })
}

/// Appends a distinct key.
#[no_mangle]
pub extern "C" fn objdb_query_builder_distinct_by(
    id: u32,
    builder: ObjHandle,
    property: u16,
    case_sensitive: bool,
) -> ObjResult {
    ffi_call(|| {
        let mut builders = HANDLES.builders.lock();
        builders
            .get_mut(builder)?
            .check_mut(id)?
            .distinct_by(property, case_sensitive);
        Ok(())
    })
}

/// Freezes `builder` into a query. The builder is consumed even if
/// validation fails.
///
/// # Safety
///
/// `out_query` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_query_build(id: u32, builder: ObjHandle, out_query: *mut ObjHandle) -> ObjResult {
    ffi_call(|| {
        if out_query.is_null() {
            return Err(FfiError::NullPointer);
        }
        let builder = HANDLES.builders.lock().remove_checked(builder, id)?;
        let query = builder.build()?;
        let handle = HANDLES.queries.lock().insert(Bound::new(id, query));
        write_out(out_query, handle)
    })
}

/// Frees a builder that was not built.
#[no_mangle]
pub extern "C" fn objdb_query_builder_free(id: u32, builder: ObjHandle) -> ObjResult {
    ffi_call(|| HANDLES.builders.lock().remove_checked(builder, id).map(drop))
}

/// Frees a query.
#[no_mangle]
pub extern "C" fn objdb_query_free(id: u32, query: ObjHandle) -> ObjResult {
    ffi_call(|| HANDLES.queries.lock().remove_checked(query, id).map(drop))
}

/// Aggregates over the results of `query`. `kind` is 0 count, 1 is empty,
/// 2 min, 3 max, 4 sum, 5 average; a negative `property` means none.
/// The result is a new value handle, or 0 when there is nothing to report.
///
/// # Safety
///
/// `out_value` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_query_aggregate(
    id: u32,
    txn: ObjHandle,
    query: ObjHandle,
    kind: u8,
    property: i32,
    out_value: *mut ObjHandle,
) -> ObjResult {
    ffi_call(|| {
        let kind = AggregationKind::from_u8(kind)
            .ok_or_else(|| CoreError::illegal_argument(format!("unknown aggregation {kind}")))?;
        let property = u16::try_from(property).ok();
        let instance = instance(id)?;
        let query = HANDLES.query(id, query)?;
        let result = HANDLES.with_txn(id, txn, |txn| Ok(instance.aggregate(txn, &query, kind, property)?))?;
        let handle = result.map_or(0, |value| HANDLES.values.lock().insert(value));
        write_out(out_value, handle)
    })
}

/// Deletes the `offset`/`limit` window of the results of `query`; a
/// negative `limit` means no limit.
///
/// # Safety
///
/// `out_count` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn objdb_query_delete(
    id: u32,
    txn: ObjHandle,
    query: ObjHandle,
    offset: u32,
    limit: i64,
    out_count: *mut u32,
) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let query = HANDLES.query(id, query)?;
        let count = HANDLES.with_txn(id, txn, |txn| {
            Ok(instance.query_delete(txn, &query, offset, limit_arg(limit))?)
        })?;
        write_out(out_count, count)
    })
}

/// Sets `len` properties on the `offset`/`limit` window of the results of
/// `query`. Value handles are not consumed; 0 is null.
///
/// # Safety
///
/// `properties` and `values` must point to `len` elements and `out_count`
/// must be a valid pointer.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn objdb_query_update(
    id: u32,
    txn: ObjHandle,
    query: ObjHandle,
    offset: u32,
    limit: i64,
    properties: *const u16,
    values: *const ObjHandle,
    len: usize,
    out_count: *mut u32,
) -> ObjResult {
    ffi_call(|| {
        if len > 0 && (properties.is_null() || values.is_null()) {
            return Err(FfiError::NullPointer);
        }
        let patch = (0..len)
            .map(|i| Ok((*properties.add(i), HANDLES.value(*values.add(i))?)))
            .collect::<Result<Vec<_>, FfiError>>()?;
        let instance = instance(id)?;
        let query = HANDLES.query(id, query)?;
        let count = HANDLES.with_txn(id, txn, |txn| {
            Ok(instance.query_update(txn, &query, offset, limit_arg(limit), &patch)?)
        })?;
        write_out(out_count, count)
    })
}

/// The `offset`/`limit` window of the results of `query` as a JSON array.
///
/// # Safety
///
/// `out_json` must be a valid pointer. Free the result with
/// `objdb_free_string`.
#[no_mangle]
pub unsafe extern "C" fn objdb_query_export_json(
    id: u32,
    txn: ObjHandle,
    query: ObjHandle,
    offset: u32,
    limit: i64,
    out_json: *mut *mut c_char,
) -> ObjResult {
    ffi_call(|| {
        let instance = instance(id)?;
        let query = HANDLES.query(id, query)?;
        let json = HANDLES.with_txn(id, txn, |txn| {
            Ok(instance.query_export_json(txn, &query, offset, limit_arg(limit))?)
        })?;
        write_string(out_json, json)
    })
}
