//! Host network management: bridge provisioning, interface inspection, IP
//! allocation, and port exposure.

pub mod bridge;
pub mod inspect;
pub mod ip_allocator;
pub mod manager;
pub mod portmap;
pub mod ports;

pub use bridge::BridgeProvisioner;
pub use inspect::InterfaceInspector;
pub use ip_allocator::IpAllocator;
pub use manager::{Interface, NetworkManager};
pub use portmap::PortMapper;
pub use ports::PortAllocator;
