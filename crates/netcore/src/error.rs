//! Error types for netcore.

use thiserror::Error;

/// Result type alias using [`NetError`].
pub type Result<T> = std::result::Result<T, NetError>;

/// Error kinds for host network management.
#[derive(Error, Debug)]
pub enum NetError {
    /// No free IP address, no candidate CIDR, or a port already in use.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Malformed NAT spec or unparseable `ip route` line.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `ip`/`iptables` could not be located or exited non-zero.
    #[error("external tool failed: {0}")]
    ExternalTool(String),

    /// The bridge is missing, or has no IPv4 address.
    #[error("kernel inspection failed: {0}")]
    KernelInspection(String),

    /// `Unmap` (or an equivalent release) was called for a resource that is
    /// not currently held.
    #[error("release of unknown resource: {0}")]
    ReleaseOfUnknown(String),

    /// Underlying I/O error (listener bind, config file access, ...).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Anything else that does not fit the kinds above.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NetError {
    /// True for "no free resource" errors (the 254th
    /// `Acquire` on a full `/24` returns one of these; so does a
    /// port already in use).
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// True for errors surfaced while shelling out to `ip`/`iptables`.
    #[must_use]
    pub fn is_external_tool(&self) -> bool {
        matches!(self, Self::ExternalTool(_))
    }

    /// Convenience constructor used throughout the command-shim layer.
    pub fn external_tool(message: impl Into<String>) -> Self {
        Self::ExternalTool(message.into())
    }

    /// Convenience constructor for "not currently mapped/held" errors.
    pub fn release_of_unknown(message: impl Into<String>) -> Self {
        Self::ReleaseOfUnknown(message.into())
    }
}
