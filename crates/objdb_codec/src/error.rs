//! Codec errors.

use thiserror::Error;

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while parsing schemas or encoding and decoding objects.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// The schema definition is inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// No collection at this index.
    #[error("unknown collection {0}")]
    UnknownCollection(usize),

    /// No property at this index.
    #[error("collection '{collection}' has no property {index}")]
    UnknownProperty {
        /// Collection name.
        collection: String,
        /// Requested property index.
        index: u16,
    },

    /// The write does not fit the property's declared type.
    #[error("property '{property}' is {expected:?}, cannot write {actual}")]
    TypeMismatch {
        /// Property name.
        property: String,
        /// Declared type.
        expected: crate::DataType,
        /// What the caller tried to write.
        actual: &'static str,
    },

    /// A null was written to a non-nullable property.
    #[error("property '{0}' is not nullable")]
    NullNotAllowed(String),

    /// `finish` found a non-nullable property that was never written.
    #[error("property '{property}' of '{collection}' was not written")]
    MissingProperty {
        /// Collection name.
        collection: String,
        /// Property name.
        property: String,
    },

    /// Element index beyond the list length.
    #[error("list index {index} out of range for length {len}")]
    ListIndexOutOfRange {
        /// Requested element.
        index: u32,
        /// List length.
        len: u32,
    },

    /// A nested writer was handed back to a writer that did not create it.
    #[error("nested writer does not belong here")]
    ForeignWriter,

    /// The encoded record, or a list being started, exceeds the writer's
    /// size limit.
    #[error("encoded object too large")]
    TooLarge,

    /// The bytes are not a valid record.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// JSON input does not match the schema.
    #[error("json: {0}")]
    Json(String),
}
