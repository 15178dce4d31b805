//! Port mapper: couples a kernel DNAT rule with a userspace TCP proxy so
//! that host-originated connections to loopback — which never traverse
//! the `PREROUTING` hook — still reach the container.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::command::{run_iptables, CommandRunner};
use crate::error::{NetError, Result};

/// Installs/removes DNAT rules in a dedicated `DOCKER` chain and runs a
/// userspace TCP forwarder per published port.
pub struct PortMapper {
    runner: Arc<dyn CommandRunner>,
    backends: Mutex<HashMap<u16, SocketAddr>>,
    listeners: Mutex<HashMap<u16, oneshot::Sender<()>>>,
}

impl PortMapper {
    /// Idempotently clean up any `DOCKER` chain and jumps left by a prior
    /// run, then (re)install them. At most one [`PortMapper`]
    /// may exist per host — this cleanup will destroy rules belonging to
    /// any other instance.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Result<Self> {
        Self::cleanup(runner.as_ref());

        run_iptables(runner.as_ref(), &["-t", "nat", "-N", "DOCKER"])?;
        run_iptables(
            runner.as_ref(),
            &["-t", "nat", "-A", "PREROUTING", "-m", "addrtype", "--dst-type", "LOCAL", "-j", "DOCKER"],
        )?;
        run_iptables(
            runner.as_ref(),
            &[
                "-t", "nat", "-A", "OUTPUT", "-m", "addrtype", "--dst-type", "LOCAL", "!", "--dst",
                "127.0.0.0/8", "-j", "DOCKER",
            ],
        )?;

        Ok(Self {
            runner,
            backends: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
        })
    }

    /// Drop any `PREROUTING`/`OUTPUT` jumps into `DOCKER` and flush+delete
    /// the chain. Errors are swallowed — the chain may not exist yet.
    fn cleanup(runner: &dyn CommandRunner) {
        let _ = runner.run(
            "iptables",
            &["-t", "nat", "-D", "PREROUTING", "-m", "addrtype", "--dst-type", "LOCAL", "-j", "DOCKER"],
        );
        let _ = runner.run(
            "iptables",
            &[
                "-t", "nat", "-D", "OUTPUT", "-m", "addrtype", "--dst-type", "LOCAL", "!", "--dst",
                "127.0.0.0/8", "-j", "DOCKER",
            ],
        );
        let _ = runner.run("iptables", &["-t", "nat", "-F", "DOCKER"]);
        let _ = runner.run("iptables", &["-t", "nat", "-X", "DOCKER"]);
    }

    /// True if `port` currently has a DNAT rule (and, usually, a running
    /// forwarder) installed.
    #[must_use]
    pub fn is_mapped(&self, port: u16) -> bool {
        self.backends.lock().contains_key(&port)
    }

    /// Install a DNAT rule forwarding `port` to `backend`, then open a
    /// `127.0.0.1:<port>` listener and start its forwarder.
    pub async fn map(&self, port: u16, backend: SocketAddr) -> Result<()> {
        self.install_dnat(port, backend)?;
        self.backends.lock().insert(port, backend);

        let listener = match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                let _ = self.unmap(port).await;
                return Err(NetError::Io(e));
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.listeners.lock().insert(port, shutdown_tx);
        tokio::spawn(forward(listener, backend, shutdown_rx));

        info!(port, %backend, "port mapped");
        Ok(())
    }

    /// Close the listener (stopping its forwarder), remove the DNAT rule,
    /// and forget the mapping. Fails if `port` is not currently mapped.
    pub async fn unmap(&self, port: u16) -> Result<()> {
        let backend = {
            let backends = self.backends.lock();
            *backends
                .get(&port)
                .ok_or_else(|| NetError::release_of_unknown(format!("port {port} is not mapped")))?
        };

        if let Some(shutdown) = self.listeners.lock().remove(&port) {
            let _ = shutdown.send(());
        }

        self.remove_dnat(port, backend)?;
        self.backends.lock().remove(&port);

        info!(port, "port unmapped");
        Ok(())
    }

    fn install_dnat(&self, port: u16, backend: SocketAddr) -> Result<()> {
        let dport = port.to_string();
        let to_destination = format!("{}:{}", backend.ip(), backend.port());
        run_iptables(
            self.runner.as_ref(),
            &[
                "-t", "nat", "-A", "DOCKER", "-p", "tcp", "--dport", &dport, "-j", "DNAT",
                "--to-destination", &to_destination,
            ],
        )?;
        Ok(())
    }

    fn remove_dnat(&self, port: u16, backend: SocketAddr) -> Result<()> {
        let dport = port.to_string();
        let to_destination = format!("{}:{}", backend.ip(), backend.port());
        run_iptables(
            self.runner.as_ref(),
            &[
                "-t", "nat", "-D", "DOCKER", "-p", "tcp", "--dport", &dport, "-j", "DNAT",
                "--to-destination", &to_destination,
            ],
        )?;
        Ok(())
    }
}

/// Accept connections until `shutdown` fires or `accept` errors (the
/// listener having been closed), splicing each to `backend`.
async fn forward(listener: TcpListener, backend: SocketAddr, mut shutdown: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!(?backend, "forwarder stopping");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((src, _)) => {
                        tokio::spawn(splice(src, backend));
                    }
                    Err(e) => {
                        debug!(%e, "forwarder accept failed, exiting");
                        return;
                    }
                }
            }
        }
    }
}

/// Dial `backend` and splice it with `src`. On dial failure the inbound
/// connection is dropped. On success, two half-copy tasks run
/// until either side finishes; the other is then aborted rather than
/// half-closed (a known rough edge, preserved rather than fixed).
async fn splice(src: TcpStream, backend: SocketAddr) {
    let dst = match TcpStream::connect(backend).await {
        Ok(dst) => dst,
        Err(e) => {
            warn!(%e, %backend, "dial to backend failed, dropping connection");
            return;
        }
    };

    let (mut src_read, mut src_write) = src.into_split();
    let (mut dst_read, mut dst_write) = dst.into_split();

    let to_backend = tokio::spawn(async move { io::copy(&mut src_read, &mut dst_write).await });
    let to_client = tokio::spawn(async move { io::copy(&mut dst_read, &mut src_write).await });

    tokio::select! {
        _ = to_backend => { to_client.abort(); }
        _ = to_client => { to_backend.abort(); }
    }
}
