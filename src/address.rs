//! BACnet/IP network addressing
//!
//! Parses and formats device endpoint addresses of the form `a.b.c.d` or
//! `a.b.c.d:port`. Octets and port are range-checked at construction; nothing
//! is silently clamped.

use crate::constants::DEFAULT_PORT;
use crate::error::{BacnetError, BacnetResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// A BACnet/IP endpoint address
///
/// `relay` optionally names the device instance acting as a
/// broadcast-management relay (BBMD) for this endpoint; it does not take part
/// in the wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BacnetAddress {
    host: Ipv4Addr,
    port: u16,
    relay: Option<u32>,
}

impl BacnetAddress {
    /// Create an address from pre-validated parts
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Self {
            host,
            port,
            relay: None,
        }
    }

    /// Attach a broadcast-relay device instance
    pub fn with_relay(mut self, relay: u32) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Parse `a.b.c.d` or `a.b.c.d:port`
    ///
    /// Each octet must parse as 0..=255 and the port as 0..=65535; a missing
    /// port defaults to 47808.
    pub fn parse(text: &str) -> BacnetResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BacnetError::invalid_address("empty address"));
        }

        let (host_part, port_part) = match text.split_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (text, None),
        };

        let octets: Vec<&str> = host_part.split('.').collect();
        if octets.len() != 4 {
            return Err(BacnetError::invalid_address(format!(
                "expected four octets, got {} in '{text}'",
                octets.len()
            )));
        }

        let mut host = [0u8; 4];
        for (i, octet) in octets.iter().enumerate() {
            host[i] = octet.parse::<u8>().map_err(|_| {
                BacnetError::invalid_address(format!("octet '{octet}' not in 0..=255"))
            })?;
        }

        let port = match port_part {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| BacnetError::invalid_address(format!("port '{p}' not in 0..=65535")))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: Ipv4Addr::from(host),
            port,
            relay: None,
        })
    }

    /// Host part of the address
    pub fn host(&self) -> Ipv4Addr {
        self.host
    }

    /// UDP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Broadcast-relay device instance, if configured
    pub fn relay(&self) -> Option<u32> {
        self.relay
    }

    /// Convert to a socket address for the UDP layer
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.host, self.port))
    }
}

impl fmt::Display for BacnetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddrV4> for BacnetAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl TryFrom<SocketAddr> for BacnetAddress {
    type Error = BacnetError;

    fn try_from(addr: SocketAddr) -> BacnetResult<Self> {
        match addr {
            SocketAddr::V4(v4) => Ok(Self::from(v4)),
            SocketAddr::V6(_) => Err(BacnetError::invalid_address(
                "BACnet/IP addresses are IPv4 only",
            )),
        }
    }
}

impl std::str::FromStr for BacnetAddress {
    type Err = BacnetError;

    fn from_str(s: &str) -> BacnetResult<Self> {
        Self::parse(s)
    }
}
