//! PBK Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the partial backup workspace.
//!
//! - **Error Handling**: [`PbkError`] and the crate-wide [`Result`] alias
//! - **Checksums**: SHA-256 digests used to seal archive members
//! - **Logging**: tracing subscriber setup shared by the engine and the CLI
//!
//! # Example
//!
//! ```no_run
//! use pbk_common::checksum::sha256_hex;
//!
//! let digest = sha256_hex(b"manifest");
//! assert_eq!(digest.len(), 64);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{PbkError, Result};
