//! # objdb Testkit
//!
//! Test utilities for objdb.
//!
//! This crate provides:
//! - Test fixtures and instance helpers
//! - Property-based test generators using proptest
//! - A reference model for differential testing
//! - Cross-crate integration test helpers
//! - Crash recovery simulations
//! - Fuzz testing harnesses
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_instance() {
//!     with_temp_instance(|db| {
//!         let txn = db.begin_txn(false).unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod integration;
pub mod oracle;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::oracle::{engine_query, insert_people, Model};
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use integration::*;
pub use oracle::Model;
pub use stress::*;
