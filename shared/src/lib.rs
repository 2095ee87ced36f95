//! # Shared Wire Layer
//!
//! This crate contains everything the server and the interactive client must
//! agree on: the newline-delimited framing codec and the tagged text protocol
//! spoken on top of it. Keeping both in one place guarantees that the two
//! binaries can never drift apart on the wire format.
//!
//! ## Framing
//!
//! Every application message is a run of bytes terminated by a single `\n`.
//! The [`frame`] module owns the buffered reader that reassembles frames from
//! arbitrary read boundaries, and the write helpers that append exactly one
//! terminator per payload.
//!
//! ## Protocol
//!
//! The [`protocol`] module defines the tag table, the typed request
//! representation with its encode/decode pair, the raw handshake status
//! bytes, and the client-name validation rule shared by both ends.
//!
//! Two exchanges intentionally bypass the framing: the handshake status byte
//! a server sends right after reading the proposed client name, and the
//! single-byte logout acknowledgement. [`frame::FrameReader::read_byte`]
//! exists so both regimes can coexist on one stream.

pub mod frame;
pub mod protocol;
