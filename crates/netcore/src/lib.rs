//! # netcore
//!
//! Host-side container networking: a private bridge with a non-overlapping
//! IPv4 subnet, per-container IP allocation on that subnet, and port
//! exposure via destination NAT plus a cooperating userspace TCP forwarder.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       NetworkManager                        │
//! ├───────────────────┬───────────────────┬─────────────────────┤
//! │     IpAllocator    │   PortAllocator   │     PortMapper      │
//! │  (scan + channel)  │ (fountain + set)  │ (DNAT + forwarder)  │
//! ├───────────────────┴───────────────────┴─────────────────────┤
//! │         BridgeProvisioner / InterfaceInspector               │
//! ├───────────────────────────────────────────────────────────────┤
//! │              CommandRunner (`ip`, `iptables`)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Container lifecycle, image management, CLI parsing, and network
//! namespace/veth creation are deliberately out of scope — this crate only
//! manages the bridge, the two allocators, and the port-exposure rules.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod address;
pub mod command;
pub mod config;
pub mod error;
pub mod network;
pub mod types;

pub use config::ManagerConfig;
pub use error::{NetError, Result};
pub use network::manager::{Interface, NetworkManager};
pub use types::{CidrBinding, Nat};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::ManagerConfig;
    pub use crate::error::{NetError, Result};
    pub use crate::network::manager::{Interface, NetworkManager};
    pub use crate::types::{CidrBinding, Nat};
}
