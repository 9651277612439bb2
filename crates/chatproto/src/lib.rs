//! `chatproto`: the partyline text protocol, shared by client and server.
//!
//! Two layers, both plain text lines:
//! - wire: the `#login <id>` handshake and the broadcast/notice line
//!   formats (`wire`),
//! - console: the operator command grammars, one table per console
//!   (`command`).
//!
//! This crate is IO-free; transport lives with the binaries.

pub mod command;
pub mod wire;

/// Reserved leading character distinguishing a command line from chat.
pub const MARKER: char = '#';
