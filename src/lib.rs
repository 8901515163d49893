//! # prompeg-fec
//!
//! Pro-MPEG Code of Practice #3 Release 2 forward error correction for
//! MPEG-TS-over-RTP streams: row/column XOR encoding and the matching
//! windowed decoder.
//!
//! This crate is the protocol core only. It consumes and produces raw byte
//! buffers (`&[u8]` in, `Bytes`/`Vec<u8>` out); opening UDP sockets, parsing
//! CLI options, and any outer container/muxer concerns belong to the caller.
//!
//! ## Crate structure
//!
//! - [`bitops`] — XOR accumulation and big-endian field access
//! - [`wire`] — RTP/bitstring/FEC packet layouts (RFC 2733 + CoP#3-R2)
//! - [`encoder`] — sliding L×D matrix, emits row/column FEC packets
//! - [`decoder`] — windowed packet store plus row/column/matrix recovery
//! - [`error`] — the `Error` enum shared by both halves
//! - [`transport`] — out-of-band helpers (port range check) for the UDP
//!   layer a caller builds around this core

pub mod bitops;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod transport;
pub mod wire;

pub use decoder::{Decoder, DecoderConfig, PacketKind};
pub use encoder::{Encoder, EncoderConfig, FecSink};
pub use error::Error;
