//! # objdb codec
//!
//! Binary encoding of schema-typed objects.
//!
//! An object body is a record: a fixed-width static section holding one slot
//! per property, followed by a heap of length-prefixed chunks for strings,
//! nested objects and lists. Slots of variable-size properties hold the
//! chunk's offset from the record start, `0` meaning null.
//!
//! ```text
//! object record: | static_len: u16 | slots ... | heap ... |
//! list record:   | count: u32      | slots ... | heap ... |
//! heap chunk:    | len: u32 | payload |
//! ```
//!
//! Properties are addressed by their position in the collection schema.
//! Appending properties to a schema keeps older records readable: a slot
//! past the record's static section reads as null.
//!
//! ```rust
//! use objdb_codec::{InstanceSchema, ObjectReader, ObjectWriter};
//!
//! let schema = InstanceSchema::from_json(r#"[{
//!     "name": "User",
//!     "properties": [
//!         {"name": "name", "type": "String"},
//!         {"name": "age", "type": "Int"}
//!     ]
//! }]"#).unwrap();
//!
//! let mut writer = ObjectWriter::for_collection(&schema, 0).unwrap();
//! writer.write_string(0, "ada").unwrap();
//! writer.write_int(1, 36).unwrap();
//! let bytes = writer.finish().unwrap();
//!
//! let reader = ObjectReader::new(7, &bytes, &schema, 0).unwrap();
//! assert_eq!(reader.read_id(), 7);
//! assert_eq!(reader.read_string(0), Some(("ada", true)));
//! assert_eq!(reader.read_int(1), Some(36));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod json;
mod layout;
mod reader;
mod schema;
mod value;
mod writer;

pub use error::{CodecError, CodecResult};
pub use json::json_id;
pub use layout::{MAX_RECORD_SIZE, NULL_DOUBLE, NULL_FLOAT, NULL_INT, NULL_LONG};
pub use reader::{Field, ListReader, ObjectReader};
pub use schema::{CollectionSchema, DataType, IndexSchema, InstanceSchema, PropertySchema};
pub use value::Value;
pub use writer::{ListWriter, ObjectWriter};
