//! Typed schemas of the four protocol calls.
//!
//! The wire payloads are positional and self-describing; what fixes their
//! meaning is the function name in the frame. These conversions are that
//! registry: one arm per function, decoding arguments the way the handler
//! declares them and replies the way the handler returns them.

use rmpv::Value;

use crate::{Error, Id, Node};

pub const PING: &str = "ping";
pub const STORE: &str = "store";
pub const FIND_NODE: &str = "find_node";
pub const FIND_VALUE: &str = "find_value";

/// The literal returned by a `ping` handler.
pub const PONG: &str = "pong";

/// Decoded arguments of an inbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArgs {
    Ping,
    Store { key: Id, value: Vec<u8> },
    FindNode { id: Id },
    FindValue { id: Id },
}

impl CallArgs {
    pub fn func(&self) -> &'static str {
        match self {
            Self::Ping => PING,
            Self::Store { .. } => STORE,
            Self::FindNode { .. } => FIND_NODE,
            Self::FindValue { .. } => FIND_VALUE,
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::Ping => Vec::new(),
            Self::Store { key, value } => vec![key.to_value(), Value::Binary(value)],
            Self::FindNode { id } | Self::FindValue { id } => vec![id.to_value()],
        }
    }

    pub fn from_values(func: &str, args: &[Value]) -> Result<CallArgs, Error> {
        match (func, args) {
            (PING, []) => Ok(CallArgs::Ping),
            (STORE, [key, Value::Binary(value)]) => Ok(CallArgs::Store {
                key: Id::from_value(key)?,
                value: value.clone(),
            }),
            (FIND_NODE, [id]) => Ok(CallArgs::FindNode {
                id: Id::from_value(id)?,
            }),
            (FIND_VALUE, [id]) => Ok(CallArgs::FindValue {
                id: Id::from_value(id)?,
            }),
            (PING | STORE | FIND_NODE | FIND_VALUE, _) => {
                Err(Error::Schema("arguments do not match the handler"))
            }
            _ => Err(Error::Schema("unknown function")),
        }
    }
}

/// Decoded value of a successful reply.
///
/// A `find_value` reply is disambiguated by encoded type: a binary string
/// is the stored value, an array is a list of closer nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyValue {
    Pong,
    Stored,
    Nodes(Vec<Node>),
    Value(Vec<u8>),
}

impl ReplyValue {
    pub fn into_value(self) -> Value {
        match self {
            Self::Pong => Value::from(PONG),
            Self::Stored => Value::Nil,
            Self::Nodes(nodes) => Value::Array(nodes.iter().map(Node::to_value).collect()),
            Self::Value(bytes) => Value::Binary(bytes),
        }
    }

    pub fn from_value(func: &str, value: &Value) -> Result<ReplyValue, Error> {
        match (func, value) {
            (PING, Value::String(_)) => Ok(ReplyValue::Pong),
            (STORE, Value::Nil) => Ok(ReplyValue::Stored),
            (FIND_NODE | FIND_VALUE, Value::Array(nodes)) => Ok(ReplyValue::Nodes(
                nodes.iter().map(Node::from_value).collect::<Result<_, _>>()?,
            )),
            (FIND_VALUE, Value::Binary(bytes)) => Ok(ReplyValue::Value(bytes.clone())),
            (PING | STORE | FIND_NODE | FIND_VALUE, _) => {
                Err(Error::Schema("reply does not match the handler"))
            }
            _ => Err(Error::Schema("unknown function")),
        }
    }
}
