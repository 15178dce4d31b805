//! Interface inspection.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::warn;

use crate::command::CommandRunner;
use crate::error::{NetError, Result};
use crate::types::{CidrBinding, InterfaceSnapshot};

/// Enumerates the CIDRs assigned to a named interface and classifies them.
pub struct InterfaceInspector<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> InterfaceInspector<'a> {
    /// Build an inspector over the given command runner.
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Inspect `name`, returning `[primary IPv4] (+ [global-unicast IPv6])`.
    /// Fails if the interface has no IPv4 address.
    pub fn inspect(&self, name: &str) -> Result<InterfaceSnapshot> {
        let output = self.runner.run("ip", &["addr", "show", "dev", name])?;
        let (v4, v6) = parse_addr_show(&output);

        if v4.is_empty() {
            return Err(NetError::KernelInspection(format!(
                "interface {name} has no IPv4 address"
            )));
        }
        if v4.len() > 1 {
            warn!(interface = name, count = v4.len(), "multiple IPv4 addresses, using the first");
        }

        let mut bindings = vec![v4[0]];

        let globals: Vec<_> = v6.into_iter().filter(is_global_unicast_v6).collect();
        if globals.len() > 1 {
            warn!(
                interface = name,
                count = globals.len(),
                "multiple global-unicast IPv6 addresses, using the first"
            );
        }
        if let Some(first_v6) = globals.into_iter().next() {
            bindings.push(first_v6);
        }

        InterfaceSnapshot::new(bindings)
    }
}

fn is_global_unicast_v6(binding: &CidrBinding) -> bool {
    match binding.network {
        IpAddr::V6(v6) => is_global_unicast(v6),
        IpAddr::V4(_) => false,
    }
}

/// `Ipv6Addr::is_unicast_global` is still unstable; reimplement the check
/// the spec actually needs: not loopback, not unspecified, not
/// link-local (`fe80::/10`), not unique-local (`fc00::/7`), not multicast.
fn is_global_unicast(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() || addr.is_multicast() {
        return false;
    }
    let segments = addr.segments();
    let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
    let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
    !is_link_local && !is_unique_local
}

/// Parse `ip addr show` output into `(ipv4 bindings, ipv6 bindings)`. Each
/// `inet`/`inet6` line looks like:
/// `    inet 172.16.42.1/24 brd 172.16.42.255 scope global br0`
fn parse_addr_show(output: &str) -> (Vec<CidrBinding>, Vec<CidrBinding>) {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("inet ") else {
            if let Some(rest) = line.strip_prefix("inet6 ") {
                if let Some(binding) = parse_inet6_field(rest) {
                    v6.push(binding);
                }
            }
            continue;
        };
        if let Some(binding) = parse_inet_field(rest) {
            v4.push(binding);
        }
    }

    (v4, v6)
}

fn parse_inet_field(rest: &str) -> Option<CidrBinding> {
    let field = rest.split_whitespace().next()?;
    let (addr, prefix) = field.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    // The bridge's own address is both network member and gateway for
    // containers on that subnet.
    Some(CidrBinding::v4(addr, prefix, addr))
}

fn parse_inet6_field(rest: &str) -> Option<CidrBinding> {
    let field = rest.split_whitespace().next()?;
    let (addr, prefix) = field.split_once('/')?;
    let addr: Ipv6Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    Some(CidrBinding {
        network: IpAddr::V6(addr),
        prefix,
        gateway: IpAddr::V6(addr),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MockCommandRunner;
    use mockall::predicate::*;

    const SAMPLE: &str = "\
3: br0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500
    inet 172.16.42.1/24 brd 172.16.42.255 scope global br0
    inet6 fe80::1/64 scope link
    inet6 2001:db8::1/64 scope global";

    #[test]
    fn finds_primary_ipv4_and_first_global_ipv6() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq("ip"), eq(["addr", "show", "dev", "br0"].as_slice()))
            .returning(|_, _| Ok(SAMPLE.to_string()));

        let snapshot = InterfaceInspector::new(&runner).inspect("br0").unwrap();
        assert_eq!(snapshot.primary_network_v4(), Ipv4Addr::new(172, 16, 42, 1));
        assert_eq!(snapshot.bindings().len(), 2);
        assert!(!snapshot.bindings()[1].is_v4());
    }

    #[test]
    fn fails_without_any_ipv4() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq("ip"), eq(["addr", "show", "dev", "br0"].as_slice()))
            .returning(|_, _| Ok("inet6 fe80::1/64 scope link".to_string()));

        let err = InterfaceInspector::new(&runner).inspect("br0").unwrap_err();
        assert!(matches!(err, NetError::KernelInspection(_)));
    }

    #[test]
    fn link_local_ipv6_is_excluded() {
        assert!(!is_global_unicast("fe80::1".parse().unwrap()));
        assert!(!is_global_unicast("fc00::1".parse().unwrap()));
        assert!(!is_global_unicast("::1".parse().unwrap()));
        assert!(is_global_unicast("2001:db8::1".parse().unwrap()));
    }
}
