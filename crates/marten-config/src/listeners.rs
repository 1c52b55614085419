//! Listen specification parsing.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use super::{ConfigError, Result};

/// The DNS port assumed when an endpoint omits one.
pub const DNS_PORT: u16 = 53;

/// Transport a listen spec binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenProtocol {
    Udp,
    Tcp,
}

impl fmt::Display for ListenProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenProtocol::Udp => write!(f, "udp"),
            ListenProtocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// One parsed `<net>://<addr>` listen entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenSpec {
    pub protocol: ListenProtocol,
    pub addr: SocketAddr,
}

/// Parses a listen entry. The scheme defaults to `udp` when absent and the
/// port defaults to 53.
pub fn parse_listen(spec: &str) -> Result<ListenSpec> {
    let (net, addr) = match spec.split_once("://") {
        Some((net, addr)) => (net, addr),
        None => ("udp", spec),
    };
    let protocol = match net {
        "udp" => ListenProtocol::Udp,
        "tcp" => ListenProtocol::Tcp,
        _ => return Err(ConfigError::InvalidListen(spec.to_owned())),
    };
    Ok(ListenSpec {
        protocol,
        addr: parse_endpoint(addr)?,
    })
}

/// Parses a `host:port` endpoint, completing a missing port to 53. The host
/// must be an IP literal; bracketed IPv6 forms are accepted with or without
/// a port.
pub fn parse_endpoint(addr: &str) -> Result<SocketAddr> {
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return Ok(sock);
    }
    let bare = addr
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(addr);
    bare.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| ConfigError::InvalidEndpoint(addr.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_defaults_to_udp() {
        let spec = parse_listen("127.0.0.1:1053").unwrap();
        assert_eq!(spec.protocol, ListenProtocol::Udp);
        assert_eq!(spec.addr, "127.0.0.1:1053".parse().unwrap());
    }

    #[test]
    fn tcp_scheme_is_recognized() {
        let spec = parse_listen("tcp://0.0.0.0:53").unwrap();
        assert_eq!(spec.protocol, ListenProtocol::Tcp);
    }

    #[test]
    fn port_defaults_to_53() {
        let spec = parse_listen("udp://192.0.2.1").unwrap();
        assert_eq!(spec.addr, "192.0.2.1:53".parse().unwrap());
    }

    #[test]
    fn ipv6_endpoints_parse() {
        assert_eq!(
            parse_endpoint("[2001:db8::1]:5353").unwrap(),
            "[2001:db8::1]:5353".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_endpoint("[2001:db8::1]").unwrap(),
            "[2001:db8::1]:53".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_endpoint("2001:db8::1").unwrap(),
            "[2001:db8::1]:53".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(parse_listen("tls://127.0.0.1:853").is_err());
    }

    #[test]
    fn hostname_endpoint_is_rejected() {
        assert!(parse_endpoint("dns.example.com").is_err());
    }
}
