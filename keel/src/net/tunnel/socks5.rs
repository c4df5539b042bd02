//! SOCKS5 client tunnel.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};

use crate::aio::Controller;
use crate::error::{messages, Error};
use crate::net::{Listener, Name, NetworkStack, Socket};

const SOCKS5_VERSION: u8 = 5;
const METHOD_NO_AUTH: u8 = 0;
const CMD_CONNECT: u8 = 1;
const ATYP_IPV4: u8 = 1;
const ATYP_DOMAIN: u8 = 3;
const ATYP_IPV6: u8 = 4;
const REP_SUCCEEDED: u8 = 0;

/// Tunnels connections through a SOCKS5 proxy.
///
/// Only the no-authentication method is offered. The name given to
/// `connect` is interpreted by the proxy: a host name is sent as a domain
/// address and resolved remotely.
///
/// `listen` is not supported and fails with an unsupported-feature error.
pub struct Socks5NetworkStack {
    parent: Arc<dyn NetworkStack>,
    server: Name,
}

// ===== impl Socks5NetworkStack =====

impl Socks5NetworkStack {
    /// Tunnel through the SOCKS5 server at `server`, reached via `parent`.
    pub fn new(parent: Arc<dyn NetworkStack>, server: Name) -> Self {
        Socks5NetworkStack { parent, server }
    }
}

impl NetworkStack for Socks5NetworkStack {
    fn listen(&self, name: &Name, _backlog: u32) -> Result<Arc<dyn Listener>, Error> {
        Err(Error::unsupported(name.to_string()))
    }

    fn connect(&self, name: &Name, timeout: Option<Duration>) -> Result<Arc<dyn Socket>, Error> {
        let socket = self.parent.connect(&self.server, timeout)?;
        let ctl = Controller::new();

        // Method negotiation: offer exactly "no authentication".
        socket.full_send(&ctl, &[SOCKS5_VERSION, 1, METHOD_NO_AUTH], timeout)?;
        let greeting = socket.full_receive(&ctl, 2, timeout)?;
        if greeting[0] != SOCKS5_VERSION {
            return Err(Error::protocol(socket.name(), messages::SYNTAX_ERROR));
        }
        if greeting[1] != METHOD_NO_AUTH {
            return Err(Error::protocol(
                socket.name(),
                "No acceptable authentication method",
            ));
        }

        // Connect request.
        let request = build_request(name)
            .ok_or_else(|| Error::protocol(name.to_string(), "bad port"))?;
        socket.full_send(&ctl, &request, timeout)?;

        // Reply header, then the bound address whose size depends on the
        // address type.
        let header = socket.full_receive(&ctl, 4, timeout)?;
        if header[0] != SOCKS5_VERSION {
            return Err(Error::protocol(socket.name(), messages::SYNTAX_ERROR));
        }
        if header[1] != REP_SUCCEEDED {
            return Err(Error::protocol(
                name.to_string(),
                format!(
                    "{} (SOCKS5 error code: {})",
                    reply_message(header[1]),
                    header[1]
                ),
            ));
        }
        let addr_len = match header[3] {
            ATYP_IPV4 => 4,
            ATYP_IPV6 => 16,
            ATYP_DOMAIN => {
                let len = socket.full_receive(&ctl, 1, timeout)?;
                len[0] as usize
            }
            _ => return Err(Error::protocol(socket.name(), messages::SYNTAX_ERROR)),
        };
        socket.full_receive(&ctl, addr_len + 2, timeout)?;

        Ok(socket)
    }
}

fn reply_message(code: u8) -> &'static str {
    match code {
        1 => "General server failure",
        2 => "Connection not allowed by ruleset",
        3 => "Network unreachable",
        4 => "Host unreachable",
        5 => "Connection refused",
        6 => "TTL expired",
        7 => "Command not supported",
        8 => "Address type not supported",
        _ => "?",
    }
}

fn parse_port(service: &str) -> Option<u16> {
    if service.is_empty() || !service.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let port: u32 = service.parse().ok()?;
    if port == 0 || port > 0xFFFF {
        return None;
    }
    Some(port as u16)
}

fn build_request(name: &Name) -> Option<BytesMut> {
    let port = parse_port(name.service())?;
    let mut buf = BytesMut::with_capacity(7 + name.host().len());
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(CMD_CONNECT);
    buf.put_u8(0);
    match name.host().parse::<Ipv4Addr>() {
        Ok(ip) => {
            buf.put_u8(ATYP_IPV4);
            buf.put_slice(&ip.octets());
        }
        Err(_) => {
            let host = name.host().as_bytes();
            if host.len() > 255 {
                return None;
            }
            buf.put_u8(ATYP_DOMAIN);
            buf.put_u8(host.len() as u8);
            buf.put_slice(host);
        }
    }
    buf.put_u16(port);
    Some(buf)
}
