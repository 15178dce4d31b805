//! Top-level composition: bridge provisioning/inspection plus the three
//! allocators, wired into a per-process [`NetworkManager`] and the
//! [`Interface`] handles it hands out.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::command::{CommandRunner, SystemCommandRunner};
use crate::config::ManagerConfig;
use crate::error::Result;
use crate::types::{CidrBinding, Nat};

use super::bridge::{link_exists, BridgeProvisioner};
use super::inspect::InterfaceInspector;
use super::ip_allocator::IpAllocator;
use super::portmap::PortMapper;
use super::ports::PortAllocator;

struct Inner {
    ip_allocator: IpAllocator,
    port_allocator: Arc<PortAllocator>,
    port_mapper: Arc<PortMapper>,
}

/// Owns the bridge's allocators for one process. At most one
/// [`NetworkManager`] may run against a given bridge/host at a time —
/// a second instance's [`PortMapper::new`] cleanup would
/// tear down the first's rules.
///
/// Cheap to clone: internally an `Arc`, so every clone shares the same
/// allocators.
#[derive(Clone)]
pub struct NetworkManager {
    inner: Arc<Inner>,
}

impl NetworkManager {
    /// Inspect (creating if necessary) the bridge named in `config`, then
    /// start the IP allocator, port allocator, and port mapper over it,
    /// using real `ip`/`iptables` binaries.
    pub fn new(config: &ManagerConfig) -> Result<Self> {
        Self::with_runner(config, Arc::new(SystemCommandRunner))
    }

    /// As [`NetworkManager::new`], but shelling out through `runner` — the
    /// seam used by tests to substitute a fake for `ip`/`iptables`.
    pub fn with_runner(config: &ManagerConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let inspector = InterfaceInspector::new(runner.as_ref());

        // Only a missing link means "not found" — create the bridge in that
        // case and re-inspect. Any other inspection failure (no IPv4 on an
        // existing bridge, a permission error talking to `ip`, ...) is a
        // real problem and must surface immediately instead of being
        // reinterpreted as "create it", which would then itself fail
        // confusingly against an interface that already exists.
        let snapshot = if link_exists(runner.as_ref(), &config.bridge_name) {
            inspector.inspect(&config.bridge_name)?
        } else {
            BridgeProvisioner::new(runner.as_ref())
                .create_bridge(&config.bridge_name, &config.candidate_subnets)?;
            inspector.inspect(&config.bridge_name)?
        };

        let ip_allocator = IpAllocator::spawn(snapshot);
        let port_allocator = Arc::new(PortAllocator::new(config.port_range()));
        let port_mapper = Arc::new(PortMapper::new(Arc::clone(&runner))?);

        Ok(Self {
            inner: Arc::new(Inner {
                ip_allocator,
                port_allocator,
                port_mapper,
            }),
        })
    }

    /// Allocate a fresh container-facing [`Interface`]: one IP (plus any
    /// IPv6 companion) per binding of the bridge's CIDR set.
    pub async fn allocate(&self) -> Result<Interface> {
        let bindings = self.inner.ip_allocator.acquire().await?;
        Ok(Interface {
            manager: Arc::clone(&self.inner),
            bindings,
            ports: Mutex::new(Vec::new()),
        })
    }
}

/// One container's network interface: its CIDR bindings on the bridge,
/// plus whatever host ports have been exposed to it so far.
pub struct Interface {
    manager: Arc<Inner>,
    bindings: Vec<CidrBinding>,
    ports: Mutex<Vec<u16>>,
}

impl Interface {
    /// The CIDR bindings assigned to this interface (primary IPv4 first).
    #[must_use]
    pub fn bindings(&self) -> &[CidrBinding] {
        &self.bindings
    }

    /// The primary (IPv4) address assigned to this interface.
    #[must_use]
    pub fn primary_address(&self) -> IpAddr {
        self.bindings[0].network
    }

    /// Parse `spec`, acquire a host port (or the one it
    /// names), and install the DNAT rule + forwarder routing it to this
    /// interface's primary address. Returns the resolved [`Nat`] — with
    /// `frontend` filled in if `spec` requested "any".
    pub async fn allocate_port(&self, spec: &str) -> Result<Nat> {
        let requested = Nat::parse(spec)?;
        let frontend = self.manager.port_allocator.acquire(requested.frontend)?;
        let backend = SocketAddr::new(self.primary_address(), requested.backend);

        if let Err(e) = self.manager.port_mapper.map(frontend, backend).await {
            self.manager.port_allocator.release(frontend);
            return Err(e);
        }

        self.ports.lock().push(frontend);
        Ok(Nat {
            protocol: requested.protocol,
            frontend,
            backend: requested.backend,
        })
    }

    /// Unmap and release a single previously-allocated port. Fails if
    /// `frontend` was not allocated through this interface.
    pub async fn release_port(&self, frontend: u16) -> Result<()> {
        self.manager.port_mapper.unmap(frontend).await?;
        self.manager.port_allocator.release(frontend);
        self.ports.lock().retain(|p| *p != frontend);
        Ok(())
    }

    /// Tear down this interface: unmap and release every exposed port,
    /// then release the primary IP. Best-effort — a failure unmapping one
    /// port does not stop the rest from being released.
    pub async fn release(&self) {
        let ports: Vec<u16> = self.ports.lock().drain(..).collect();
        for port in ports {
            if let Err(e) = self.manager.port_mapper.unmap(port).await {
                warn!(port, error = %e, "failed to unmap port during interface release");
            }
            self.manager.port_allocator.release(port);
        }

        if let IpAddr::V4(v4) = self.primary_address() {
            self.manager.ip_allocator.release(v4);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MockCommandRunner;
    use mockall::predicate::eq;
    use std::net::Ipv4Addr;

    const BRIDGE_ADDR: &str = "\
2: netcore0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500
    inet 10.0.42.1/30 brd 10.0.42.3 scope global netcore0";

    fn runner_with_existing_bridge(bridge_name: &str) -> Arc<dyn CommandRunner> {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq("ip"), eq(["addr", "show", "dev", bridge_name].as_slice()))
            .returning(|_, _| Ok(BRIDGE_ADDR.to_string()));
        runner.expect_run().returning(|_, _| Ok(String::new()));
        Arc::new(runner)
    }

    fn test_config() -> ManagerConfig {
        ManagerConfig {
            bridge_name: "netcore0".to_string(),
            port_range_start: 59_400,
            port_range_end: 59_410,
            ..ManagerConfig::default()
        }
    }

    #[tokio::test]
    async fn allocates_interface_exposes_port_then_releases() {
        let config = test_config();
        let manager =
            NetworkManager::with_runner(&config, runner_with_existing_bridge(&config.bridge_name))
                .unwrap();

        let iface = manager.allocate().await.unwrap();
        assert_eq!(iface.primary_address(), IpAddr::V4(Ipv4Addr::new(10, 0, 42, 2)));

        let nat = iface.allocate_port("8080").await.unwrap();
        assert!((59_400..59_410).contains(&nat.frontend));
        assert_eq!(nat.backend, 8080);

        iface.release().await;

        // The primary IP is reusable once the interface is released.
        let iface2 = manager.allocate().await.unwrap();
        assert_eq!(iface2.primary_address(), IpAddr::V4(Ipv4Addr::new(10, 0, 42, 2)));
    }

    #[tokio::test]
    async fn slash_30_bridge_has_exactly_one_assignable_address() {
        let config = test_config();
        let manager =
            NetworkManager::with_runner(&config, runner_with_existing_bridge(&config.bridge_name))
                .unwrap();

        let _first = manager.allocate().await.unwrap();
        let second = manager.allocate().await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn existing_bridge_missing_ipv4_propagates_instead_of_retrying_create() {
        let config = test_config();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq("ip"), eq(["link", "show", config.bridge_name.as_str()].as_slice()))
            .returning(|_, _| Ok(String::new()));
        runner
            .expect_run()
            .with(eq("ip"), eq(["addr", "show", "dev", config.bridge_name.as_str()].as_slice()))
            .returning(|_, _| Ok("inet6 fe80::1/64 scope link".to_string()));
        // `create_bridge` must never be invoked: no expectation is set up for
        // `ip link add`/`ip route`, so a call to either would panic the mock.

        let err = NetworkManager::with_runner(&config, Arc::new(runner)).unwrap_err();
        assert!(matches!(err, crate::error::NetError::KernelInspection(_)));
    }
}
