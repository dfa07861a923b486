//! # sync-types
//!
//! Wire protocol for boxsync.
//!
//! This crate provides the foundation shared by the relay and its clients:
//! - [`Request`], [`Reply`] - Command codes and the reply table
//! - [`frame`] - Big-endian framing primitives (codes, counts, lengths, strings)
//! - [`transfer`] - File stream encoding on top of the framing
//! - [`path`] - Wire-relative path conversion and traversal checks
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod command;
mod error;
pub mod frame;
pub mod path;
pub mod transfer;

pub use command::{Reply, Request, INTRODUCE_REPLIES};
pub use error::WireError;
pub use frame::{CHUNK_SIZE, DEFAULT_PORT};
pub use transfer::{FileEntry, OutgoingFile};
