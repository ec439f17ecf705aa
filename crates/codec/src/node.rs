use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use data_encoding::BASE32;
use rand::Rng;
use rmpv::Value;

use crate::Error;

/// A 160-bit node or key identifier.
///
/// Stored big-endian so the derived ordering is the numeric ordering of the
/// id space; the wire form is 20 little-endian bytes and the human form is
/// base32 of those bytes.
///
/// ```
/// use kad_server_codec::Id;
///
/// let id = Id::from(42u64);
///
/// assert_eq!(Id::from_le_bytes(id.to_le_bytes()), id);
/// assert_eq!(id.to_string().parse::<Id>().unwrap(), id);
/// assert!(id < Id::from(43u64));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; 20]);

/// XOR distance between two identifiers, ordered by unsigned magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; 20]);

impl Distance {
    /// The distance of an identifier to itself.
    pub const ZERO: Distance = Distance([0; 20]);
}

impl Id {
    pub const BITS: u32 = 160;
    pub const MIN: Id = Id([0; 20]);

    /// Generate a uniformly random identifier for a fresh node.
    pub fn random() -> Id {
        Id(rand::rng().random())
    }

    pub fn from_le_bytes(mut bytes: [u8; 20]) -> Id {
        bytes.reverse();
        Id(bytes)
    }

    pub fn to_le_bytes(&self) -> [u8; 20] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    /// Parse a decimal string of any magnitude up to `2^160 - 1`.
    pub fn from_decimal(text: &str) -> Result<Id, Error> {
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::BadId);
        }

        let mut bytes = [0u8; 20];
        for digit in text.bytes() {
            let mut carry = (digit - b'0') as u16;
            for byte in bytes.iter_mut().rev() {
                let total = *byte as u16 * 10 + carry;
                *byte = total as u8;
                carry = total >> 8;
            }

            if carry != 0 {
                return Err(Error::BadId);
            }
        }

        Ok(Id(bytes))
    }

    /// Parse the base32 human form produced by [`Display`](fmt::Display).
    pub fn from_base32(text: &str) -> Result<Id, Error> {
        let bytes = BASE32
            .decode(text.as_bytes())
            .map_err(|_| Error::BadId)?
            .try_into()
            .map_err(|_| Error::BadId)?;
        Ok(Id::from_le_bytes(bytes))
    }

    pub fn xor(&self, other: &Id) -> Distance {
        let mut bytes = [0u8; 20];
        for (byte, (a, b)) in bytes.iter_mut().zip(self.0.iter().zip(other.0.iter())) {
            *byte = a ^ b;
        }
        Distance(bytes)
    }

    /// The bit at `index`, counting from the most significant bit.
    pub fn bit(&self, index: u32) -> bool {
        self.0[(index / 8) as usize] & (0x80 >> (index % 8)) != 0
    }

    /// A copy with the bit at `index` (from the most significant bit) set.
    pub fn with_bit(&self, index: u32) -> Id {
        let mut bytes = self.0;
        bytes[(index / 8) as usize] |= 0x80 >> (index % 8);
        Id(bytes)
    }

    /// Whether the first `bits` bits of both identifiers are equal.
    pub fn shares_prefix(&self, other: &Id, bits: u32) -> bool {
        let whole = (bits / 8) as usize;
        if self.0[..whole] != other.0[..whole] {
            return false;
        }

        match bits % 8 {
            0 => true,
            rem => (self.0[whole] ^ other.0[whole]) & (0xFF << (8 - rem)) == 0,
        }
    }

    /// `self + 2^exp`, or `None` past the top of the id space. Used to walk
    /// bucket range boundaries.
    pub fn checked_add_pow2(&self, exp: u32) -> Option<Id> {
        let mut bytes = self.0;
        let mut index = (Self::BITS - 1 - exp) as usize / 8;
        let mut carry = 1u16 << (exp % 8);
        loop {
            let total = bytes[index] as u16 + carry;
            bytes[index] = total as u8;
            carry = total >> 8;
            if carry == 0 {
                return Some(Id(bytes));
            }
            if index == 0 {
                return None;
            }
            index -= 1;
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Binary(self.to_le_bytes().to_vec())
    }

    pub fn from_value(value: &Value) -> Result<Id, Error> {
        match value {
            Value::Binary(bytes) => {
                let bytes: [u8; 20] = bytes.as_slice().try_into().map_err(|_| Error::BadId)?;
                Ok(Id::from_le_bytes(bytes))
            }
            _ => Err(Error::Schema("identifier must be a binary string")),
        }
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&value.to_be_bytes());
        Id(bytes)
    }
}

impl FromStr for Id {
    type Err = Error;

    /// Decimal when every character is a digit, base32 otherwise.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.bytes().all(|b| b.is_ascii_digit()) {
            Id::from_decimal(text)
        } else {
            Id::from_base32(text)
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE32.encode(&self.to_le_bytes()))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A transport address. The host may be a hostname; resolution is deferred
/// to send time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Addr {
    pub host: String,
    pub port: u16,
}

impl Addr {
    pub fn new(host: impl Into<String>, port: u16) -> Addr {
        Addr {
            host: host.into(),
            port,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.host.as_str()),
            Value::from(self.port),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Addr, Error> {
        let fields = value
            .as_array()
            .ok_or(Error::Schema("address must be an array"))?;
        match fields.as_slice() {
            [host, port] => {
                let host = host
                    .as_str()
                    .ok_or(Error::Schema("address host must be a string"))?;
                let port = port
                    .as_u64()
                    .and_then(|port| u16::try_from(port).ok())
                    .ok_or(Error::Schema("address port must fit in 16 bits"))?;
                Ok(Addr::new(host, port))
            }
            _ => Err(Error::Schema("address must have two fields")),
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A peer: an identifier bound to the address it was last seen at.
///
/// Equality and hashing go by identifier only; the address is metadata and
/// is refreshed whenever the peer is observed again.
#[derive(Debug, Clone, Eq)]
pub struct Node {
    pub id: Id,
    pub addr: Addr,
}

impl Node {
    pub fn new(id: Id, addr: Addr) -> Node {
        Node { id, addr }
    }

    pub fn to_value(&self) -> Value {
        Value::Array(vec![self.id.to_value(), self.addr.to_value()])
    }

    pub fn from_value(value: &Value) -> Result<Node, Error> {
        let fields = value
            .as_array()
            .ok_or(Error::Schema("node must be an array"))?;
        match fields.as_slice() {
            [id, addr] => Ok(Node::new(Id::from_value(id)?, Addr::from_value(addr)?)),
            _ => Err(Error::Schema("node must have two fields")),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}
