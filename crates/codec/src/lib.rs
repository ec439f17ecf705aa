//! ## Kademlia wire codec
//!
//! [paper]: https://pdos.csail.mit.edu/~petar/papers/maymounkov-kademlia-lncs.pdf
//!
//! Identifier, node and message types for the kademlia protocol, together
//! with their binary form on the wire. Every datagram carries a single
//! MessagePack frame `(id, is_call, func, payload)`; a call payload is
//! `(caller, func, args)` and a reply payload is `(ok, value)`. Identifiers
//! travel as 20 little-endian bytes, so the self-describing bin/array split
//! is what distinguishes a stored value from a node list in a `find_value`
//! reply.
//!
//! The dynamic payload hole is an [`rmpv::Value`]; the typed schemas of the
//! four protocol calls live in [`payload`] and are resolved from the
//! function name, never from the encoded data alone.

pub mod message;
pub mod payload;

mod node;

pub use self::node::{Addr, Distance, Id, Node};
pub use rmpv::Value;

/// Codec failures.
///
/// Anything inbound that does not decode is dropped at the transport
/// boundary; these variants exist so the boundary can log what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The datagram is not a well-formed MessagePack frame.
    BadFrame,
    /// The frame is well-formed MessagePack but violates the message schema.
    Schema(&'static str),
    /// An identifier field is not exactly 20 bytes, or a textual id form
    /// does not parse.
    BadId,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadFrame => write!(f, "bad frame"),
            Self::Schema(detail) => write!(f, "schema violation: {}", detail),
            Self::BadId => write!(f, "bad identifier"),
        }
    }
}
