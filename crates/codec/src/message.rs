use rmpv::Value;
use serde::{Deserialize, Serialize};

use crate::{Error, Node};

/// The outer frame exactly as it travels: `(id, is_call, func, payload)`.
#[derive(Serialize, Deserialize)]
struct Frame(u64, bool, String, Value);

const NO_SUCH_RPC: &str = "no_such_rpc";
const HANDLER: &str = "handler";

/// An error value carried in a failed reply.
///
/// Encoded as a `(code, detail)` pair so that a missing handler stays
/// distinguishable from a handler that ran and failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    NoSuchRpc,
    Handler(String),
}

impl WireError {
    fn to_value(&self) -> Value {
        let (code, detail) = match self {
            Self::NoSuchRpc => (NO_SUCH_RPC, ""),
            Self::Handler(detail) => (HANDLER, detail.as_str()),
        };
        Value::Array(vec![Value::from(code), Value::from(detail)])
    }

    fn from_value(value: &Value) -> Result<WireError, Error> {
        let fields = value
            .as_array()
            .ok_or(Error::Schema("error value must be an array"))?;
        match fields.as_slice() {
            [code, detail] => {
                let detail = detail
                    .as_str()
                    .ok_or(Error::Schema("error detail must be a string"))?;
                match code.as_str() {
                    Some(NO_SUCH_RPC) => Ok(WireError::NoSuchRpc),
                    Some(HANDLER) => Ok(WireError::Handler(detail.to_string())),
                    _ => Err(Error::Schema("unknown error code")),
                }
            }
            _ => Err(Error::Schema("error value must have two fields")),
        }
    }
}

/// Message body: a call towards a handler, or the reply travelling back.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Call { caller: Node, args: Vec<Value> },
    Reply(Result<Value, WireError>),
}

/// A single request/response datagram.
///
/// The `func` field names the remote handler; for calls it is also written
/// into the payload (the historical wire shape carries it twice), and the
/// outer copy is authoritative on decode.
///
/// ```
/// use kad_server_codec::message::Message;
/// use kad_server_codec::{Addr, Id, Node};
///
/// let caller = Node::new(Id::from(7u64), Addr::new("127.0.0.1", 7890));
/// let message = Message::call(1, caller, "find_node", vec![Id::from(9u64).to_value()]);
///
/// assert_eq!(Message::decode(&message.encode()).unwrap(), message);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: u64,
    pub func: String,
    pub body: Body,
}

impl Message {
    pub fn call(id: u64, caller: Node, func: &str, args: Vec<Value>) -> Message {
        Message {
            id,
            func: func.to_string(),
            body: Body::Call { caller, args },
        }
    }

    pub fn reply(id: u64, func: String, result: Result<Value, WireError>) -> Message {
        Message {
            id,
            func,
            body: Body::Reply(result),
        }
    }

    /// Serialize into a MessagePack frame. Total for every representable
    /// message.
    pub fn encode(&self) -> Vec<u8> {
        let (is_call, payload) = match &self.body {
            Body::Call { caller, args } => (
                true,
                Value::Array(vec![
                    caller.to_value(),
                    Value::from(self.func.as_str()),
                    Value::Array(args.clone()),
                ]),
            ),
            Body::Reply(result) => {
                let (ok, value) = match result {
                    Ok(value) => (true, value.clone()),
                    Err(error) => (false, error.to_value()),
                };
                (false, Value::Array(vec![Value::from(ok), value]))
            }
        };

        rmp_serde::to_vec(&Frame(self.id, is_call, self.func.clone(), payload))
            .expect("message encoding failed!")
    }

    /// Decode a frame.
    ///
    /// An unknown function name is not an error here: the arguments of such
    /// a call stay raw and the transport answers `no_such_rpc` at dispatch
    /// time.
    pub fn decode(bytes: &[u8]) -> Result<Message, Error> {
        let Frame(id, is_call, func, payload) =
            rmp_serde::from_slice(bytes).map_err(|_| Error::BadFrame)?;
        let fields = payload
            .as_array()
            .ok_or(Error::Schema("payload must be an array"))?;

        let body = if is_call {
            match fields.as_slice() {
                [caller, _func, args] => Body::Call {
                    caller: Node::from_value(caller)?,
                    args: args
                        .as_array()
                        .ok_or(Error::Schema("call arguments must be an array"))?
                        .clone(),
                },
                _ => return Err(Error::Schema("call payload must have three fields")),
            }
        } else {
            match fields.as_slice() {
                [ok, value] => {
                    let ok = ok
                        .as_bool()
                        .ok_or(Error::Schema("reply flag must be a boolean"))?;
                    Body::Reply(if ok {
                        Ok(value.clone())
                    } else {
                        Err(WireError::from_value(value)?)
                    })
                }
                _ => return Err(Error::Schema("reply payload must have two fields")),
            }
        };

        Ok(Message { id, func, body })
    }
}
