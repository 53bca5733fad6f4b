//! Result codes and the last error message.

use objdb_core::{CoreError, ErrorCode};
use std::cell::RefCell;
use std::ffi::{c_char, CString};
use thiserror::Error;

/// Result code of every FFI function.
///
/// Codes 1 to 15 mirror the engine's error codes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjResult {
    /// Success.
    Ok = 0,
    /// Store directory missing or unusable.
    Path = 1,
    /// Unique index conflict.
    UniqueViolated = 2,
    /// Mutation under a read transaction.
    WriteTxnRequired = 3,
    /// Incompatible format or schema.
    Version = 4,
    /// Object too large.
    ObjectLimitReached = 5,
    /// Handle used with the wrong instance.
    InstanceMismatch = 6,
    /// Size limit reached.
    DbFull = 7,
    /// Transaction already ended.
    TransactionClosed = 8,
    /// Instance closed.
    InstanceClosed = 9,
    /// Bad argument.
    IllegalArgument = 10,
    /// Store locked by another process.
    Locked = 11,
    /// Malformed JSON.
    Json = 12,
    /// Damaged store.
    Corrupted = 13,
    /// I/O failure.
    Storage = 14,
    /// Encoding failure.
    Codec = 15,
    /// A required pointer was null.
    NullPointer = 100,
    /// Unknown, freed or wrong-kind handle.
    InvalidHandle = 101,
    /// A string argument was not UTF-8.
    InvalidUtf8 = 102,
}

impl ObjResult {
    /// Returns true if the result indicates success.
    pub fn is_ok(self) -> bool {
        self == ObjResult::Ok
    }
}

impl From<ErrorCode> for ObjResult {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Path => Self::Path,
            ErrorCode::UniqueViolated => Self::UniqueViolated,
            ErrorCode::WriteTxnRequired => Self::WriteTxnRequired,
            ErrorCode::Version => Self::Version,
            ErrorCode::ObjectLimitReached => Self::ObjectLimitReached,
            ErrorCode::InstanceMismatch => Self::InstanceMismatch,
            ErrorCode::DbFull => Self::DbFull,
            ErrorCode::TransactionClosed => Self::TransactionClosed,
            ErrorCode::InstanceClosed => Self::InstanceClosed,
            ErrorCode::IllegalArgument => Self::IllegalArgument,
            ErrorCode::Locked => Self::Locked,
            ErrorCode::Json => Self::Json,
            ErrorCode::Corrupted => Self::Corrupted,
            ErrorCode::Storage => Self::Storage,
            ErrorCode::Codec => Self::Codec,
        }
    }
}

/// Failure of an FFI call before it becomes a result code.
#[derive(Debug, Error)]
pub enum FfiError {
    /// Engine error.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Null pointer argument.
    #[error("null pointer argument")]
    NullPointer,
    /// Unknown or stale handle.
    #[error("invalid or freed handle")]
    InvalidHandle,
    /// Non-UTF-8 string argument.
    #[error("invalid UTF-8 in string argument")]
    InvalidUtf8,
}

impl FfiError {
    /// A handle of `actual` used with instance `expected`.
    pub fn mismatch(expected: u32, actual: u32) -> Self {
        Self::Core(CoreError::InstanceMismatch { expected, actual })
    }

    /// Result code for this error.
    pub fn code(&self) -> ObjResult {
        match self {
            Self::Core(err) => err.code().into(),
            Self::NullPointer => ObjResult::NullPointer,
            Self::InvalidHandle => ObjResult::InvalidHandle,
            Self::InvalidUtf8 => ObjResult::InvalidUtf8,
        }
    }
}

impl From<objdb_codec::CodecError> for FfiError {
    fn from(err: objdb_codec::CodecError) -> Self {
        Self::Core(err.into())
    }
}

// Thread-local storage for last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Sets the last error message.
pub fn set_last_error(message: impl Into<String>) {
    let msg = message.into();
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clears the last error.
pub fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Runs an FFI body: clears the last error, then turns a failure into its
/// result code and message.
pub(crate) fn ffi_call(body: impl FnOnce() -> Result<(), FfiError>) -> ObjResult {
    clear_last_error();
    match body() {
        Ok(()) => ObjResult::Ok,
        Err(err) => {
            let code = err.code();
            tracing::debug!(?code, error = %err, "ffi call failed");
            set_last_error(err.to_string());
            code
        }
    }
}

/// Gets the last error message as a C string.
///
/// Returns null if no error is set.
///
/// # Safety
///
/// The returned pointer is valid until the next FFI call on this thread.
#[no_mangle]
pub extern "C" fn objdb_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        Some(cstr) => cstr.as_ptr(),
        None => std::ptr::null(),
    })
}

/// Clears the last error message.
#[no_mangle]
pub extern "C" fn objdb_clear_error() {
    clear_last_error();
}
