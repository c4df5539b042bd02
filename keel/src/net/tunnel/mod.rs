//! Proxy tunnels: network stacks that wrap another stack and intermediate
//! each connection through a proxy protocol.

mod socks4;
mod socks5;
mod wrapper;

pub use socks4::Socks4NetworkStack;
pub use socks5::Socks5NetworkStack;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use http::Uri;

use crate::error::Error;

use super::{Listener, Name, NetworkStack, Socket};

/// Default port of a SOCKS server.
const DEFAULT_PORT: &str = "1080";

/// A network stack with tunnels composed declaratively from URLs.
///
/// Starts out as a pass-through to its base stack. Every successful
/// [`add`](TunnelableNetworkStack::add) pushes another tunnel layer on
/// top, so the layer added last is the proxy contacted first. Recognised
/// schemes:
///
/// - `socks4://host[:port]`
/// - `socks5://host[:port]`
/// - `socks://host[:port]` (alias of socks5)
///
/// with 1080 as the default port. Anything else is rejected without side
/// effects.
///
/// # Example
///
/// ```
/// use keel::net::internal::InternalNetworkStack;
/// use keel::net::tunnel::TunnelableNetworkStack;
///
/// let tunnel = TunnelableNetworkStack::new(InternalNetworkStack::create());
/// assert!(tunnel.add("socks5://proxy.example:1080"));
/// assert!(!tunnel.add("http://proxy.example"));
/// tunnel.reset();
/// ```
pub struct TunnelableNetworkStack {
    base: Arc<dyn NetworkStack>,
    current: StdMutex<Arc<dyn NetworkStack>>,
}

// ===== impl TunnelableNetworkStack =====

impl TunnelableNetworkStack {
    /// A pass-through to `base` until tunnels are added.
    pub fn new(base: Arc<dyn NetworkStack>) -> Self {
        TunnelableNetworkStack {
            current: StdMutex::new(Arc::clone(&base)),
            base,
        }
    }

    /// Add a tunnel layer described by a URL. Returns whether the URL was
    /// understood; on `false` nothing changes.
    pub fn add(&self, link: &str) -> bool {
        let uri: Uri = match link.parse() {
            Ok(uri) => uri,
            Err(_) => return false,
        };
        let scheme = match uri.scheme_str() {
            Some(scheme) => scheme,
            None => return false,
        };
        let host = match uri.host() {
            // An IPv6 literal comes back bracketed.
            Some(host) => host.trim_start_matches('[').trim_end_matches(']'),
            None => return false,
        };
        let server = match uri.port_u16() {
            Some(port) => Name::with_port(host, port),
            None => Name::new(host, DEFAULT_PORT),
        };

        let mut current = self.current.lock().unwrap();
        match scheme {
            "socks4" => {
                *current = Arc::new(Socks4NetworkStack::new(Arc::clone(&current), server));
                true
            }
            "socks5" | "socks" => {
                *current = Arc::new(Socks5NetworkStack::new(Arc::clone(&current), server));
                true
            }
            _ => false,
        }
    }

    /// Drop all tunnels, back to the plain base stack.
    pub fn reset(&self) {
        *self.current.lock().unwrap() = Arc::clone(&self.base);
    }

    fn current(&self) -> Arc<dyn NetworkStack> {
        Arc::clone(&self.current.lock().unwrap())
    }
}

impl NetworkStack for TunnelableNetworkStack {
    fn listen(&self, name: &Name, backlog: u32) -> Result<Arc<dyn Listener>, Error> {
        self.current().listen(name, backlog)
    }

    fn connect(&self, name: &Name, timeout: Option<Duration>) -> Result<Arc<dyn Socket>, Error> {
        self.current().connect(name, timeout)
    }
}
