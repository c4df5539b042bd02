//! Network endpoint names.

use std::fmt;

/// The name of a network endpoint: a host plus a service (port number or
/// service name).
///
/// On the in-memory stack names are arbitrary strings; on tunnel stacks the
/// host part is interpreted by the proxy server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Name {
    host: String,
    service: String,
}

// ===== impl Name =====

impl Name {
    /// Name from host and service.
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Name {
            host: host.into(),
            service: service.into(),
        }
    }

    /// Name from host and port number.
    pub fn with_port(host: impl Into<String>, port: u16) -> Self {
        Name {
            host: host.into(),
            service: port.to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    pub fn set_service(&mut self, service: impl Into<String>) {
        self.service = service.into();
    }

    /// A name is valid if both parts are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && !self.service.is_empty()
    }

    /// Parse an endpoint specification as given by a user, e.g.
    /// `localhost:8181`, `127.0.0.1:8181` or `[::1]:8181`. A specification
    /// without a service part gets `default_service`.
    pub fn parse(spec: &str, default_service: &str) -> Name {
        if let Some(rest) = spec.strip_prefix('[') {
            if let Some(end) = rest.find(']') {
                let host = &rest[..end];
                let tail = &rest[end + 1..];
                if let Some(service) = tail.strip_prefix(':') {
                    // "[a:b:c]:port"
                    return Name::new(host, service);
                }
                if tail.is_empty() {
                    // "[a:b:c]"
                    return Name::new(host, default_service);
                }
            }
        }
        match spec.find(':') {
            // "a.b.c:port"
            Some(at) => Name::new(&spec[..at], &spec[at + 1..]),
            None => Name::new(spec, default_service),
        }
    }
}

impl fmt::Display for Name {
    /// Single-string representation; parseable back by [`Name::parse`].
    /// Invalid names render empty.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return Ok(());
        }
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.service)
        } else {
            write!(f, "{}:{}", self.host, self.service)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_and_port() {
        let name = Name::parse("localhost:8181", "80");
        assert_eq!(name.host(), "localhost");
        assert_eq!(name.service(), "8181");
    }

    #[test]
    fn parse_applies_default_service() {
        let name = Name::parse("example.com", "1080");
        assert_eq!(name.host(), "example.com");
        assert_eq!(name.service(), "1080");
    }

    #[test]
    fn parse_bracketed_ipv6() {
        let name = Name::parse("[::1]:8181", "80");
        assert_eq!(name.host(), "::1");
        assert_eq!(name.service(), "8181");

        let name = Name::parse("[::1]", "80");
        assert_eq!(name.host(), "::1");
        assert_eq!(name.service(), "80");
    }

    #[test]
    fn display_round_trips() {
        let name = Name::new("::1", "8181");
        assert_eq!(name.to_string(), "[::1]:8181");
        assert_eq!(Name::parse(&name.to_string(), "x"), name);

        let name = Name::with_port("host", 77);
        assert_eq!(name.to_string(), "host:77");
    }

    #[test]
    fn invalid_names_render_empty() {
        assert_eq!(Name::default().to_string(), "");
        assert!(!Name::new("host", "").is_valid());
        assert!(!Name::new("", "80").is_valid());
    }
}
