//! Content-addressed payload storage for Lantern.
//!
//! Large payloads (request and response bodies, images) are stored once,
//! keyed by the BLAKE3 hash of their content, and shared by every entity that
//! references them. Each blob carries a reference count; the blob is purged
//! when the count drops to zero.
//!
//! # Storage Backends
//!
//! All backends implement the [`BlobStore`] trait:
//!
//! - [`InMemoryBlobStore`] -- `HashMap`-based store for tests, in-memory
//!   entity stores, and opened archive documents
//! - [`FileBlobStore`] -- one file per blob under a directory
//!
//! # Design Rules
//!
//! 1. Keys are deterministic: the same bytes always produce the same key.
//! 2. `put` of existing content only increments the reference count.
//! 3. Payloads above the compression threshold are zstd-compressed at rest;
//!    `get` always returns the original bytes.
//! 4. The reference-count map has its own lock, independent of any caller's
//!    locking.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod codec;
pub mod error;
pub mod file;
pub mod hasher;
pub mod memory;
pub mod traits;

pub use codec::{Codec, DEFAULT_COMPRESSION_THRESHOLD};
pub use error::{BlobError, BlobResult};
pub use file::FileBlobStore;
pub use hasher::ContentHasher;
pub use memory::InMemoryBlobStore;
pub use traits::{BlobStats, BlobStore};
