//! Bridge provisioning.

use std::net::Ipv4Addr;

use tracing::{debug, info};

use crate::address::networks_overlap;
use crate::command::{run_iptables, CommandRunner};
use crate::error::{NetError, Result};

/// Creates a private bridge with a non-overlapping IPv4 subnet.
pub struct BridgeProvisioner<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> BridgeProvisioner<'a> {
    /// Build a provisioner over the given command runner.
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Create `name` as a bridge, picking the first of `candidates` whose
    /// network does not overlap any route already installed on the host.
    ///
    /// Issues, in order: `ip link add ... type bridge`, `ip addr add`,
    /// `ip link set ... up`, `iptables -t nat -A POSTROUTING ... MASQUERADE`.
    /// Any step failing is fatal and may leave partial state behind — no
    /// rollback is attempted.
    pub fn create_bridge(&self, name: &str, candidates: &[(Ipv4Addr, u8)]) -> Result<(Ipv4Addr, u8)> {
        let routes = self.installed_routes()?;

        let chosen = candidates
            .iter()
            .copied()
            .find(|candidate| !routes.iter().any(|route| networks_overlap(*candidate, *route)))
            .ok_or_else(|| {
                NetError::Unavailable(format!(
                    "no candidate subnet is free for bridge {name}; configure an address manually"
                ))
            })?;

        let (gateway, prefix) = chosen;
        let cidr = format!("{gateway}/{prefix}");

        self.runner.run("ip", &["link", "add", name, "type", "bridge"])?;
        self.runner.run("ip", &["addr", "add", &cidr, "dev", name])?;
        self.runner.run("ip", &["link", "set", name, "up"])?;

        run_iptables(
            self.runner,
            &["-t", "nat", "-A", "POSTROUTING", "-s", &cidr, "!", "-d", &cidr, "-j", "MASQUERADE"],
        )?;

        info!(bridge = name, cidr = %cidr, "bridge created");
        Ok(chosen)
    }

    /// Parse `ip route` output into `(network, prefix)` pairs, skipping
    /// blank lines and the `default` route. A line that fails to parse as
    /// a CIDR is a fatal error.
    fn installed_routes(&self) -> Result<Vec<(Ipv4Addr, u8)>> {
        let output = self.runner.run("ip", &["route"])?;
        let mut routes = Vec::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let first_field = line.split_whitespace().next().unwrap_or("");
            if first_field == "default" {
                continue;
            }

            let (addr, prefix) = parse_cidr(first_field).ok_or_else(|| {
                NetError::InvalidArgument(format!("unparseable route line: {line:?}"))
            })?;
            debug!(route = %line, "existing route");
            routes.push((addr, prefix));
        }

        Ok(routes)
    }
}

/// True if a link named `name` already exists (`ip link show` exits
/// successfully).
#[must_use]
pub fn link_exists(runner: &dyn CommandRunner, name: &str) -> bool {
    runner.run("ip", &["link", "show", name]).is_ok()
}

fn parse_cidr(field: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, prefix) = field.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    Some((addr, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MockCommandRunner;
    use mockall::predicate::*;

    fn routes_output(lines: &[&str]) -> String {
        lines.join("\n")
    }

    #[test]
    fn picks_first_non_overlapping_candidate() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq("ip"), eq(["route"].as_slice()))
            .returning(|_, _| Ok(routes_output(&["172.16.0.0/12 dev eth0", "default via 1.2.3.4"])));
        runner
            .expect_run()
            .with(eq("ip"), eq(["link", "add", "br0", "type", "bridge"].as_slice()))
            .returning(|_, _| Ok(String::new()));
        runner
            .expect_run()
            .with(eq("ip"), eq(["addr", "add", "10.0.42.1/24", "dev", "br0"].as_slice()))
            .returning(|_, _| Ok(String::new()));
        runner
            .expect_run()
            .with(eq("ip"), eq(["link", "set", "br0", "up"].as_slice()))
            .returning(|_, _| Ok(String::new()));
        runner
            .expect_run()
            .withf(|program, args| program == "iptables" && args.contains(&"MASQUERADE"))
            .returning(|_, _| Ok(String::new()));

        let provisioner = BridgeProvisioner::new(&runner);
        let candidates = crate::config::DEFAULT_CANDIDATE_SUBNETS;
        let chosen = provisioner.create_bridge("br0", &candidates).unwrap();
        assert_eq!(chosen.0, Ipv4Addr::new(10, 0, 42, 1));
    }

    #[test]
    fn falls_back_to_third_candidate_when_first_two_overlap() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().with(eq("ip"), eq(["route"].as_slice())).returning(|_, _| {
            Ok(routes_output(&["172.16.0.0/12 dev eth0", "10.0.0.0/8 dev eth1"]))
        });
        runner
            .expect_run()
            .with(eq("ip"), eq(["link", "add", "br0", "type", "bridge"].as_slice()))
            .returning(|_, _| Ok(String::new()));
        runner
            .expect_run()
            .with(eq("ip"), eq(["addr", "add", "192.168.42.1/24", "dev", "br0"].as_slice()))
            .returning(|_, _| Ok(String::new()));
        runner
            .expect_run()
            .with(eq("ip"), eq(["link", "set", "br0", "up"].as_slice()))
            .returning(|_, _| Ok(String::new()));
        runner
            .expect_run()
            .withf(|program, args| program == "iptables" && args.contains(&"MASQUERADE"))
            .returning(|_, _| Ok(String::new()));

        let provisioner = BridgeProvisioner::new(&runner);
        let candidates = crate::config::DEFAULT_CANDIDATE_SUBNETS;
        let chosen = provisioner.create_bridge("br0", &candidates).unwrap();
        assert_eq!(chosen.0, Ipv4Addr::new(192, 168, 42, 1));
    }

    #[test]
    fn fails_naming_the_bridge_when_all_candidates_overlap() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().with(eq("ip"), eq(["route"].as_slice())).returning(|_, _| {
            Ok(routes_output(&[
                "172.16.0.0/12 dev eth0",
                "10.0.0.0/8 dev eth1",
                "192.168.0.0/16 dev eth2",
            ]))
        });

        let provisioner = BridgeProvisioner::new(&runner);
        let candidates = crate::config::DEFAULT_CANDIDATE_SUBNETS;
        let err = provisioner.create_bridge("br0", &candidates).unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("br0"));
    }

    #[test]
    fn unparseable_route_line_is_fatal() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq("ip"), eq(["route"].as_slice()))
            .returning(|_, _| Ok(routes_output(&["not-a-cidr-line"])));

        let provisioner = BridgeProvisioner::new(&runner);
        let candidates = crate::config::DEFAULT_CANDIDATE_SUBNETS;
        let err = provisioner.create_bridge("br0", &candidates).unwrap_err();
        assert!(matches!(err, NetError::InvalidArgument(_)));
    }
}
