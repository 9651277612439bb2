//! `partyio`: line framing for the chat wire protocol.
//!
//! Everything on the wire is a text line. This crate implements just that:
//! - reading LF/CRLF-delimited lines without copying
//!   (`BytesMut::split_to(..).freeze()`), with a hard cap on line length,
//! - encoding outbound lines (always CRLF-terminated).

pub mod line;

pub use line::{LineReader, encode_line};
