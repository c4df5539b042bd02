//! Error type shared by the async core and the network substrate.

use std::{error, fmt};

/// Error raised by sockets, tunnels, stacks and the RESP client.
///
/// Every error carries the name of the object it originates from (a socket
/// name, a network endpoint, a parser) together with a human-readable
/// message and a coarse [`ErrorKind`]. The kind is what reconnect policies
/// dispatch on: a [`Remote`](ErrorKind::Remote) error is an answer from the
/// peer and never a reason to reconnect, everything else is a transport or
/// protocol failure.
#[derive(Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    name: String,
    message: String,
}

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Underlying transfer failed or stalled (I/O failure, closed peer).
    Network,
    /// The peer did not speak the expected protocol (bad SOCKS reply,
    /// malformed RESP input).
    Protocol,
    /// The peer answered with an application-level error payload.
    Remote,
    /// The requested operation is not available on this object.
    Unsupported,
    /// A listen name is already taken.
    AddressInUse,
    /// No listener is registered for the requested name.
    ConnectionRefused,
    /// The operation did not complete within its deadline.
    TimedOut,
}

// ===== impl Error =====

impl Error {
    fn new(kind: ErrorKind, name: impl Into<String>, message: impl Into<String>) -> Self {
        Error {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Transport failure on the named object.
    pub fn network(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Network, name, message)
    }

    /// Protocol violation detected while talking to the named object.
    pub fn protocol(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Protocol, name, message)
    }

    /// Application-level error payload received from the named source.
    pub fn remote(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Remote, name, message)
    }

    /// The named object does not support the requested operation.
    pub fn unsupported(name: impl Into<String>) -> Self {
        Error::new(ErrorKind::Unsupported, name, messages::UNSUPPORTED)
    }

    /// The listen name is already registered.
    pub fn address_in_use(name: impl Into<String>) -> Self {
        Error::new(ErrorKind::AddressInUse, name, messages::ADDRESS_IN_USE)
    }

    /// Nobody is listening on the requested name.
    pub fn connection_refused(name: impl Into<String>) -> Self {
        Error::new(ErrorKind::ConnectionRefused, name, messages::CONNECTION_REFUSED)
    }

    /// The connection attempt ran out of time.
    pub fn timed_out(name: impl Into<String>) -> Self {
        Error::new(ErrorKind::TimedOut, name, messages::CONNECTION_TIMED_OUT)
    }

    /// The error's classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Name of the object the error originates from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this is an application-level answer rather than a transport
    /// failure. Remote errors must not trigger reconnects.
    pub fn is_remote(&self) -> bool {
        self.kind == ErrorKind::Remote
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("message", &self.message)
            .finish()
    }
}

impl error::Error for Error {}

/// The user-visible message vocabulary.
pub(crate) mod messages {
    pub const NETWORK_ERROR: &str = "Network error";
    pub const CONNECTION_LOST: &str = "Network connection lost";
    pub const CANNOT_WRITE: &str = "Cannot write";
    pub const SYNTAX_ERROR: &str = "Syntax error";
    pub const ADDRESS_IN_USE: &str = "Network address already in use";
    pub const CONNECTION_REFUSED: &str = "Connection refused";
    pub const CONNECTION_TIMED_OUT: &str = "Connection timed out";
    pub const UNSUPPORTED: &str = "Unsupported feature";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_source_name() {
        let err = Error::network("sock", "Network error");
        assert_eq!(err.to_string(), "sock: Network error");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!err.is_remote());
    }

    #[test]
    fn remote_errors_are_flagged() {
        let err = Error::remote("redis:6379", "ERR unknown command");
        assert!(err.is_remote());
        assert_eq!(err.message(), "ERR unknown command");
    }
}
