//! # meshdrop-files
//!
//! The send-side chunk producer and the receive-side file writer.
//!
//! - [`source`]: the `ByteSource` capability unifying local files and other
//!   byte-range-addressable data.
//! - [`producer`]: the double-buffered, congestion-aware chunk producer.
//! - [`writer`]: the receive-side file writer, including path-safety
//!   validation.
//! - [`hash`]: optional per-piece SHA-256 verification.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod hash;
pub mod producer;
pub mod source;
pub mod writer;

pub use producer::{Chunk, ChunkProducer, ProducerMode};
pub use source::{ByteSource, InMemoryPayload, LocalFile};
pub use writer::{FileSpec, FileWriter, WriterError};
