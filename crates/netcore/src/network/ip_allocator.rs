//! Single-owner IP allocator state machine.
//!
//! A single long-running task owns the scan cursor and the `in_use` set;
//! every mutation happens inside that task, reached only through message
//! passing, so no lock is needed over the allocator's own state. This
//! is the idiomatic Rust shape of "one goroutine behind two channels" —
//! an actor reachable through an `mpsc` request channel, replying via
//! `oneshot`, which also gives the FIFO-per-queue / causal ordering the
//! source's two rendezvous channels provide.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::address::{add_ip, network_size, prefix_mask};
use crate::error::{NetError, Result};
use crate::types::{CidrBinding, InterfaceSnapshot};

enum Msg {
    Acquire(oneshot::Sender<Result<Vec<CidrBinding>>>),
    Release(Ipv4Addr),
}

/// Handle to a running IP allocator actor. Cloning shares the same
/// underlying task; [`IpAllocator::acquire`]/[`IpAllocator::release`] send
/// messages to it and (for `acquire`) await the reply.
#[derive(Clone)]
pub struct IpAllocator {
    tx: mpsc::Sender<Msg>,
}

impl IpAllocator {
    /// Spawn the owner task over `snapshot` and return a handle to it.
    #[must_use]
    pub fn spawn(snapshot: InterfaceSnapshot) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(Owner::new(snapshot).run(rx));
        Self { tx }
    }

    /// Acquire one assignment: one `(address, gateway)` pair per binding
    /// of the interface snapshot, all sharing the same host offset.
    pub async fn acquire(&self) -> Result<Vec<CidrBinding>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Msg::Acquire(reply_tx))
            .await
            .map_err(|_| NetError::Internal("IP allocator task is gone".into()))?;
        reply_rx
            .await
            .map_err(|_| NetError::Internal("IP allocator task dropped the reply".into()))?
    }

    /// Release `ip` (the primary-subnet IPv4 address handed out by a prior
    /// `acquire`). Enqueued synchronously so it is ordered ahead of any
    /// `acquire` a caller sends afterward — the release happens-before a
    /// later acquire that reuses the same offset. Releases never fail
    /// visibly.
    pub fn release(&self, ip: Ipv4Addr) {
        let _ = self.tx.try_send(Msg::Release(ip));
    }
}

/// The actor's private state: the scan cursor, the in-use offset set, and
/// the parameters computed once from the primary subnet.
struct Owner {
    bindings: InterfaceSnapshot,
    in_use: HashSet<u32>,
    pos: u32,
    ip_num: u32,
    own_ip: u32,
    max: u32,
    /// Whether the previous scan exhausted the pool — governs how `pos`
    /// is adjusted on the next release.
    last_exhausted: bool,
}

impl Owner {
    fn new(snapshot: InterfaceSnapshot) -> Self {
        let first_ip = snapshot.primary_network_v4();
        let gateway = snapshot.primary_gateway_v4();
        let prefix = snapshot.primary().prefix;
        let size = network_size(prefix_mask(prefix));

        Self {
            bindings: snapshot,
            in_use: HashSet::new(),
            pos: 1,
            ip_num: u32::from(first_ip),
            own_ip: u32::from(gateway),
            max: size.saturating_sub(2),
            last_exhausted: false,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Msg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Acquire(reply) => {
                    let result = self.find_and_assign();
                    let _ = reply.send(result);
                }
                Msg::Release(ip) => {
                    self.handle_release(ip);
                }
            }
        }
    }

    /// Scan for a free offset, then build the parallel
    /// assignment across every binding.
    fn find_and_assign(&mut self) -> Result<Vec<CidrBinding>> {
        let mut found = None;

        for _ in 0..self.max {
            let candidate = self.ip_num.wrapping_add(self.pos);
            self.pos = (self.pos % self.max) + 1;

            if candidate == self.own_ip {
                continue;
            }
            if !self.in_use.contains(&candidate) {
                found = Some(candidate);
                break;
            }
        }

        self.last_exhausted = found.is_none();

        let candidate = found.ok_or_else(|| {
            NetError::Unavailable("no unallocated IP available".to_string())
        })?;

        self.in_use.insert(candidate);
        let offset = candidate - self.ip_num;

        let assignment = self
            .bindings
            .bindings()
            .iter()
            .map(|binding| {
                let base = match binding.network {
                    std::net::IpAddr::V4(v4) => std::net::IpAddr::V4(add_ip(v4, offset)),
                    std::net::IpAddr::V6(v6) => {
                        std::net::IpAddr::V6(add_ipv6(v6, offset))
                    }
                };
                CidrBinding {
                    network: base,
                    prefix: binding.prefix,
                    gateway: binding.gateway,
                }
            })
            .collect();

        debug!(offset, "ip assigned");
        Ok(assignment)
    }

    /// Remove the released offset, and retune `pos` so the
    /// next scan favors reusing it.
    fn handle_release(&mut self, ip: Ipv4Addr) {
        let offset = u32::from(ip);
        self.in_use.remove(&offset);

        let released_pos = offset.wrapping_sub(self.ip_num);
        if self.last_exhausted {
            self.pos = if released_pos == 0 { self.max } else { released_pos };
        } else {
            self.pos = if self.pos == 1 { self.max } else { self.pos - 1 };
        }
        debug!(offset, "ip released");
    }
}

fn add_ipv6(base: std::net::Ipv6Addr, n: u32) -> std::net::Ipv6Addr {
    let value = u128::from(base).wrapping_add(u128::from(n));
    std::net::Ipv6Addr::from(value)
}
