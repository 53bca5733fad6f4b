//! # objdb core
//!
//! Embedded transactional object database engine.
//!
//! This crate provides:
//! - Instances with a durable, append-only commit log over a storage backend
//! - Snapshot-isolated read transactions and one serialized writer per instance
//! - Collections of schema-typed objects with unique indexes
//! - Filters, queries with sort/distinct/windowing and aggregations
//! - Change watches delivered off the commit path
//!
//! ```rust
//! use objdb_codec::InstanceSchema;
//! use objdb_core::{Filter, Instance, InstanceConfig};
//!
//! let schema = InstanceSchema::from_json(r#"[{
//!     "name": "User",
//!     "autoIncrement": true,
//!     "properties": [{"name": "name", "type": "String"}, {"name": "age", "type": "Int"}]
//! }]"#).unwrap();
//! let db = Instance::open(1, schema, InstanceConfig::in_memory("demo")).unwrap();
//!
//! let mut txn = db.begin_txn(true).unwrap();
//! let count = db
//!     .import_json(&mut txn, 0, r#"[{"name": "ada", "age": 36}, {"name": "alan", "age": 41}]"#)
//!     .unwrap();
//! assert_eq!(count, 2);
//! db.commit_txn(txn).unwrap();
//!
//! let mut builder = db.query(0).unwrap();
//! builder.set_filter(Filter::greater(1, 40));
//! let query = builder.build().unwrap();
//!
//! let txn = db.begin_txn(false).unwrap();
//! let names: Vec<String> = db
//!     .cursor(&txn, &query, 0, None)
//!     .unwrap()
//!     .map(|o| o.unwrap().reader().unwrap().read_string(0).unwrap().0.to_owned())
//!     .collect();
//! assert_eq!(names, ["alan"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod dir;
mod error;
mod filter;
mod instance;
mod key;
mod log;
mod manifest;
mod object;
mod query;
mod table;
mod transaction;
mod types;
mod watch;

pub use collection::{apply_patch, InsertSession, InsertWriter};
pub use config::{CompactCondition, InstanceConfig, StorageKind};
pub use dir::{log_file, manifest_file, store_path};
pub use error::{CoreError, CoreResult, ErrorCode};
pub use filter::{glob, CompareOp, Filter, TextOp};
pub use instance::{Instance, InstanceRegistry, Patch};
pub use log::{CommitLog, ReplayStats, LOG_MAGIC, LOG_VERSION};
pub use manifest::{Manifest, FORMAT_VERSION, MANIFEST_MAGIC};
pub use object::ObjectRef;
pub use query::{AggregationKind, Cursor, DistinctSpec, Query, QueryBuilder, Sort, SortSpec};
pub use transaction::{TransactionManager, Txn, TxnState};
pub use types::{CollectionIndex, InstanceId, SequenceNumber, TransactionId};
pub use watch::{WatchEvent, WatchHandle, WatchSink};

pub use objdb_codec::Value;
