//! SSDP/UPnP device discovery
//!
//! This crate finds UPnP devices on the local network and keeps track of
//! which ones are still around. It multicasts SSDP `M-SEARCH` requests for the
//! device or service types you register, listens for `NOTIFY` announcements,
//! fetches each new device's description document, and reports devices as
//! they appear and disappear.
//!
//! # Quick Start
//!
//! ```no_run
//! use ssdp_discovery::{DiscoveryConfig, DiscoveryEngine, DiscoveryEvent, DiscoveryFilter};
//! use std::time::Duration;
//!
//! let engine = DiscoveryEngine::new(DiscoveryConfig::default())?;
//! engine.add_filter(DiscoveryFilter::new("urn:dial-multiscreen-org:service:dial:1", "DIAL"))?;
//!
//! let events = engine.events(Some(Duration::from_secs(30)));
//! engine.start()?;
//!
//! for event in events {
//!     if let DiscoveryEvent::Added(service) = event {
//!         println!("{} at {}", service.friendly_name.unwrap_or_default(), service.ip_address);
//!     }
//! }
//! # Ok::<(), ssdp_discovery::DiscoveryError>(())
//! ```
//!
//! # Listeners
//!
//! Implement [`DiscoveryListener`] to receive callbacks instead of iterating.
//! Callbacks run one at a time, in the order the events happened.
//!
//! # Liveness
//!
//! A device is dropped (and reported removed) when it sends `ssdp:byebye`, or
//! when nothing matching it was heard for [`DiscoveryConfig::timeout`].

mod address;
mod config;
mod context;
mod description;
mod dispatcher;
mod engine;
mod error;
mod events;
pub mod logging;
mod packet;
mod registry;
mod scheduler;
mod service;
mod ssdp;

pub use address::{AddressProvider, AutoDetectAddress, StaticAddress};
pub use config::DiscoveryConfig;
pub use context::DiscoveryContext;
pub use description::{
    DescriptionDocument, DescriptionResolver, DeviceDescription, DeviceMetadata,
    HttpDescriptionResolver, ServiceEntry,
};
pub use dispatcher::{external_ids_for, DiscoveryListener};
pub use engine::{DiscoveryEngine, DiscoveryEngineBuilder, EngineState};
pub use error::{DiscoveryError, Result};
pub use events::{ChannelListener, DiscoveryEvent, EventIterator};
pub use packet::{
    extract_uuid, search_message, Headers, PacketType, SsdpPacket, MULTICAST_ADDRESS, SSDP_PORT,
};
pub use registry::ServiceRegistry;
pub use service::{DiscoveryFilter, ServiceDescription};
pub use ssdp::{udp_opener, Datagram, SsdpTransport, Transport, TransportOpener};
