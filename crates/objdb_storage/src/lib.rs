//! # objdb storage
//!
//! Append-only byte stores underneath the objdb commit log.
//!
//! A backend never interprets what it stores. The engine frames its own
//! records on top and decides what is durable.
//!
//! ## Backends
//!
//! - [`InMemoryBackend`] - ephemeral instances and tests
//! - [`FileBackend`] - a single OS file
//! - [`EncryptedBackend`] - AES-256-GCM sealed frames over another backend
//!
//! ```rust
//! use objdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"commit").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"commit");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod encrypted;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use encrypted::{EncryptedBackend, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
