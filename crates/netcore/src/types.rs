//! Core type definitions for netcore.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{NetError, Result};

/// An IP network paired with the host-side gateway address on that network.
///
/// Immutable once constructed. The first binding of an
/// [`InterfaceSnapshot`] is always IPv4; later bindings, if
/// any, are IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrBinding {
    /// Network address (host bits zeroed).
    pub network: IpAddr,
    /// Prefix length, e.g. `24` for a `/24`.
    pub prefix: u8,
    /// The host-side (bridge) address on this network.
    pub gateway: IpAddr,
}

impl CidrBinding {
    /// Construct an IPv4 binding.
    #[must_use]
    pub fn v4(network: Ipv4Addr, prefix: u8, gateway: Ipv4Addr) -> Self {
        Self {
            network: IpAddr::V4(network),
            prefix,
            gateway: IpAddr::V4(gateway),
        }
    }

    /// True if this is an IPv4 binding.
    #[must_use]
    pub fn is_v4(&self) -> bool {
        self.network.is_ipv4()
    }

    /// `gateway/prefix` in standard CIDR notation.
    #[must_use]
    pub fn gateway_cidr(&self) -> String {
        format!("{}/{}", self.gateway, self.prefix)
    }

    /// `network/prefix` in standard CIDR notation.
    #[must_use]
    pub fn network_cidr(&self) -> String {
        format!("{}/{}", self.network, self.prefix)
    }
}

impl fmt::Display for CidrBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (gw {})", self.network_cidr(), self.gateway)
    }
}

/// The ordered sequence of CIDR bindings assigned to the bridge, or to a
/// container interface. The first element is always IPv4;
/// construction fails otherwise.
#[derive(Debug, Clone)]
pub struct InterfaceSnapshot {
    bindings: Vec<CidrBinding>,
}

impl InterfaceSnapshot {
    /// Build a snapshot from an ordered list of bindings. Fails if the
    /// first binding is not IPv4, or the list is empty.
    pub fn new(bindings: Vec<CidrBinding>) -> Result<Self> {
        match bindings.first() {
            Some(first) if first.is_v4() => Ok(Self { bindings }),
            Some(_) => Err(NetError::KernelInspection(
                "interface has no IPv4 address as its primary binding".into(),
            )),
            None => Err(NetError::KernelInspection(
                "interface has no CIDR bindings at all".into(),
            )),
        }
    }

    /// The primary (first, IPv4) binding.
    #[must_use]
    pub fn primary(&self) -> &CidrBinding {
        &self.bindings[0]
    }

    /// The primary binding's IPv4 network address.
    #[must_use]
    pub fn primary_network_v4(&self) -> Ipv4Addr {
        match self.primary().network {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => unreachable!("primary binding is guaranteed IPv4 by construction"),
        }
    }

    /// The primary binding's IPv4 gateway address.
    #[must_use]
    pub fn primary_gateway_v4(&self) -> Ipv4Addr {
        match self.primary().gateway {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => unreachable!("primary binding is guaranteed IPv4 by construction"),
        }
    }

    /// All bindings, primary IPv4 first, followed by zero or more IPv6
    /// bindings.
    #[must_use]
    pub fn bindings(&self) -> &[CidrBinding] {
        &self.bindings
    }
}

/// A parsed `AllocatePort` CLI spec: `"<back>"`, `"<front>:<back>"`, or
/// `":<back>"`. Protocol is always `"tcp"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nat {
    /// Always `"tcp"` — UDP exposure is out of scope.
    pub protocol: Protocol,
    /// Host-visible port. `0` means "assign any ephemeral port".
    pub frontend: u16,
    /// In-container port the frontend forwards to.
    pub backend: u16,
}

/// Transport protocol for a [`Nat`] spec. Only TCP is ever produced; the
/// variant exists so the type documents the invariant rather than leaving
/// "tcp" as a bare string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// TCP — the only protocol this crate supports.
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

impl Nat {
    /// Parse a compact port spec string:
    /// - `"<back>"` — frontend is `0` ("any ephemeral").
    /// - `"<front>:<back>"` — explicit frontend and backend.
    /// - `":<back>"` — frontend equals backend.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || NetError::InvalidArgument("Invalid port format.".to_string());

        let (frontend, backend) = if let Some(back) = spec.strip_prefix(':') {
            let back = parse_port(back).ok_or_else(invalid)?;
            (back, back)
        } else if let Some((front, back)) = spec.split_once(':') {
            let front = parse_port(front).ok_or_else(invalid)?;
            let back = parse_port(back).ok_or_else(invalid)?;
            (front, back)
        } else {
            let back = parse_port(spec).ok_or_else(invalid)?;
            (0, back)
        };

        Ok(Self {
            protocol: Protocol::Tcp,
            frontend,
            backend,
        })
    }
}

fn parse_port(s: &str) -> Option<u16> {
    if s.is_empty() {
        return None;
    }
    s.parse::<u32>().ok().and_then(|n| u16::try_from(n).ok())
}
