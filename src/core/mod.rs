//! # Core Protocol Components
//!
//! Low-level packet handling, codecs, and the binary wire format.
//!
//! This module provides the foundation for the protocol: frame extraction
//! from byte streams, bit-exact encode/decode primitives, and the spatial
//! types those primitives carry.
//!
//! ## Components
//! - **Codec**: Tokio codec for varint length framing over byte streams
//! - **Reader**: cursor-based decoder over a single untrusted packet buffer
//! - **Writer**: append-only encoder whose buffer is handed to the transport
//! - **Types**: positions, chunk coordinates, and identity records
//!
//! ## Wire Format
//! ```text
//! [Length(varint)] [PacketId(varint)] [Fields...]
//! ```
//!
//! ## Security
//! - Maximum packet size: 2MB (prevents memory exhaustion)
//! - Length validation before allocation
//! - Every read is bounds-checked; malformed varints and oversized strings
//!   fail the parse instead of truncating

pub mod codec;
pub mod reader;
pub mod types;
pub mod writer;

pub use reader::PacketReader;
pub use writer::PacketWriter;
