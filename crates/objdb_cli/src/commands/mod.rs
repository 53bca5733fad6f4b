//! CLI command implementations.

pub mod compact;
pub mod copy;
pub mod export;
pub mod import;
pub mod inspect;
