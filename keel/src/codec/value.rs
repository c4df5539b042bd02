//! The data model of RESP replies.

use bytes::Bytes;

/// A value received from (or sent to) a RESP peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Null bulk string (`$-1`) or null array (`*-1`).
    Nil,
    /// Integer reply (`:17`).
    Integer(i64),
    /// Simple string reply (`+OK`).
    Simple(String),
    /// Bulk string reply (`$5\r\nhello`).
    Bulk(Bytes),
    /// Array reply (`*2\r\n…`).
    Array(Vec<Value>),
    /// Error reply (`-ERR …`). Carried as a value so the transport layer
    /// can turn it into a remote error at the appropriate level.
    Error(String),
}

// ===== impl Value =====

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Integer content, if this is an integer reply.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Byte content of a bulk or simple string reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bulk(b) => Some(b),
            Value::Simple(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// UTF-8 content of a bulk or simple string reply.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bulk(b) => std::str::from_utf8(b).ok(),
            Value::Simple(s) => Some(s),
            _ => None,
        }
    }

    /// Elements of an array reply.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Message of an error reply.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Value::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bulk(b)
    }
}
