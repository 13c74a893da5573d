//! Connection tuple: the classification lookup key

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::policy::Protocol;

/// 4-tuple identifying a new connection (or packet) to classify
///
/// Built fresh for every lookup and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionTuple {
    /// Source address
    pub src_ip: IpAddr,
    /// Destination address
    pub dst_ip: IpAddr,
    /// Destination port (0 is a real port)
    pub dst_port: u16,
    /// IP protocol
    pub protocol: Protocol,
}

impl ConnectionTuple {
    /// Create tuple
    #[inline(always)]
    pub const fn new(src_ip: IpAddr, dst_ip: IpAddr, dst_port: u16, protocol: Protocol) -> Self {
        Self {
            src_ip,
            dst_ip,
            dst_port,
            protocol,
        }
    }

    /// Create TCP tuple from IPv4 addresses
    #[inline(always)]
    pub const fn tcp_v4(src: Ipv4Addr, dst: Ipv4Addr, dst_port: u16) -> Self {
        Self::new(IpAddr::V4(src), IpAddr::V4(dst), dst_port, Protocol::TCP)
    }

    /// Create UDP tuple from IPv4 addresses
    #[inline(always)]
    pub const fn udp_v4(src: Ipv4Addr, dst: Ipv4Addr, dst_port: u16) -> Self {
        Self::new(IpAddr::V4(src), IpAddr::V4(dst), dst_port, Protocol::UDP)
    }

    /// Create TCP tuple from IPv6 addresses
    #[inline(always)]
    pub const fn tcp_v6(src: Ipv6Addr, dst: Ipv6Addr, dst_port: u16) -> Self {
        Self::new(IpAddr::V6(src), IpAddr::V6(dst), dst_port, Protocol::TCP)
    }

    /// Same tuple with a different protocol
    #[inline(always)]
    pub const fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}

impl fmt::Display for ConnectionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dst_ip {
            IpAddr::V4(dst) => write!(f, "{} {} -> {}:{}", self.protocol, self.src_ip, dst, self.dst_port),
            IpAddr::V6(dst) => write!(f, "{} {} -> [{}]:{}", self.protocol, self.src_ip, dst, self.dst_port),
        }
    }
}
