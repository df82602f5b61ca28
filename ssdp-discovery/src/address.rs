//! Local address providers
//!
//! The engine asks its provider for an address every time it opens the
//! transport. `None` means no usable interface right now; discovery then
//! stays idle until the next `start()`/`restart()`.

use std::net::IpAddr;

/// Supplies the local address discovery sockets are bound to
pub trait AddressProvider: Send + Sync {
    fn local_address(&self) -> Option<IpAddr>;
}

impl<F> AddressProvider for F
where
    F: Fn() -> Option<IpAddr> + Send + Sync,
{
    fn local_address(&self) -> Option<IpAddr> {
        self()
    }
}

/// Always returns the same address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAddress(pub IpAddr);

impl AddressProvider for StaticAddress {
    fn local_address(&self) -> Option<IpAddr> {
        Some(self.0)
    }
}

/// Picks the first non-loopback IPv4 address of the host
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDetectAddress;

impl AddressProvider for AutoDetectAddress {
    fn local_address(&self) -> Option<IpAddr> {
        match local_ip_address::local_ip() {
            Ok(ip) if !ip.is_loopback() => Some(ip),
            Ok(ip) => {
                tracing::debug!(%ip, "only a loopback address is available");
                None
            }
            Err(e) => {
                tracing::debug!("Failed to detect local address: {}", e);
                None
            }
        }
    }
}
