//! Port allocation: a monotonic port "fountain" producing candidates into
//! a concurrency-safe in-use set.

use std::collections::HashSet;
use std::ops::Range;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{NetError, Result};

/// Acquires and releases TCP port numbers out of a fixed range.
///
/// The generator is a long-running producer thread feeding an unbuffered
/// (`bounded(0)`) rendezvous channel with candidates cycling
/// `start -> end -> start -> ...`; it blocks on send until a consumer
/// calls [`PortAllocator::acquire`] with `port == 0`. A single mutex
/// protects `in_use`; the constructor never holds it while reading from
/// the channel.
pub struct PortAllocator {
    in_use: Mutex<HashSet<u16>>,
    candidates: Receiver<u16>,
}

impl PortAllocator {
    /// Build an allocator over `range` (conventionally `49153..65535`).
    /// Spawns the generator thread immediately.
    #[must_use]
    pub fn new(range: Range<u16>) -> Self {
        let (tx, rx) = bounded(0);

        thread::spawn(move || {
            loop {
                for port in range.clone() {
                    if tx.send(port).is_err() {
                        return; // all receivers dropped
                    }
                }
            }
        });

        Self {
            in_use: Mutex::new(HashSet::new()),
            candidates: rx,
        }
    }

    /// Acquire `port`, or if `port == 0`, the next free candidate from the
    /// generator.
    pub fn acquire(&self, port: u16) -> Result<u16> {
        if port != 0 {
            return self.try_claim(port);
        }

        loop {
            let candidate = self
                .candidates
                .recv()
                .map_err(|_| NetError::Unavailable("port generator closed".into()))?;
            if self.try_claim(candidate).is_ok() {
                return Ok(candidate);
            }
        }
    }

    /// Release `port`. Always succeeds — a released port is re-offered by
    /// the generator the next time it cycles past it.
    pub fn release(&self, port: u16) {
        self.in_use.lock().remove(&port);
        debug!(port, "port released");
    }

    /// True if `port` is currently held.
    #[must_use]
    pub fn is_acquired(&self, port: u16) -> bool {
        self.in_use.lock().contains(&port)
    }

    fn try_claim(&self, port: u16) -> Result<u16> {
        let mut in_use = self.in_use.lock();
        if in_use.contains(&port) {
            return Err(NetError::Unavailable(format!("port {port} already in use")));
        }
        in_use.insert(port);
        debug!(port, "port acquired");
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquired_port_is_in_range() {
        let allocator = PortAllocator::new(49_153..65_535);
        let port = allocator.acquire(0).unwrap();
        assert!((49_153..65_535).contains(&port));
    }

    #[test]
    fn explicit_port_conflict_is_an_error() {
        let allocator = PortAllocator::new(49_153..65_535);
        assert_eq!(allocator.acquire(50_000).unwrap(), 50_000);
        let err = allocator.acquire(50_000).unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn release_then_reacquire_explicit_port() {
        let allocator = PortAllocator::new(49_153..65_535);
        allocator.acquire(50_001).unwrap();
        allocator.release(50_001);
        assert!(!allocator.is_acquired(50_001));
        assert_eq!(allocator.acquire(50_001).unwrap(), 50_001);
    }

    #[test]
    fn concurrent_any_port_acquires_never_collide() {
        let allocator = Arc::new(PortAllocator::new(49_153..49_200));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || allocator.acquire(0).unwrap())
            })
            .collect();

        let mut ports: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ports.sort_unstable();
        let before = ports.len();
        ports.dedup();
        assert_eq!(ports.len(), before, "no two concurrent acquires returned the same port");
    }
}
