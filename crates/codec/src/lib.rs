//! ## Rendezvous control frame codec
//!
//! The control plane between a client and its bootstrap routers speaks
//! single-datagram frames. Each frame is one bencoded dictionary of
//! string keys and byte-string values, one dictionary per datagram, with
//! the keys written in sorted order:
//!
//! ```text
//! d9:Arguments4:42425:Command4:conn2:Id1:07:Payload5:net-a5:Query3:1.0e
//! ```
//!
//! Decoding is defensive. A router under churn can emit partial or
//! foreign frames, and a single bad datagram must never take down a
//! receive loop: unknown dictionary keys are skipped, non-string values
//! are skipped, missing fields decay to the empty string, and only a
//! broken envelope or an unrecognized command tag is reported as an
//! [`Error`] for the caller to log and drop.

pub mod message;

use std::str::Utf8Error;

/// The largest datagram a receive loop will accept.
///
/// Frames above this size are not representable on the wire; receive
/// buffers are allocated at exactly this size.
pub const MAX_DATAGRAM: usize = 512;

#[derive(Debug)]
pub enum Error {
    UnexpectedEnd,
    NotADictionary,
    InvalidLength,
    InvalidInteger,
    TrailingBytes,
    MissingCommand,
    UnknownCommand(String),
    Utf8Error(Utf8Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}
