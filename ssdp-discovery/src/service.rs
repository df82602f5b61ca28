//! Discovered service records and discovery filters.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use crate::description::{DeviceMetadata, ServiceEntry};

/// One discovered device/service instance.
///
/// Records start out with only the network identity known from the SSDP
/// packet; the metadata fields are filled in once the device description
/// document has been resolved. Listeners always receive their own copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDescription {
    /// Device identity taken from the USN header
    pub uuid: String,
    /// SSDP device/service type the device was discovered under
    pub protocol_filter: String,
    /// Label of the discovery filter this copy was produced for
    pub external_id: Option<String>,
    /// Address the SSDP packet came from
    pub ip_address: String,
    /// Port, the configured default until the description is resolved
    pub port: u16,
    /// LOCATION header of the first sighting
    pub location_url: String,

    pub friendly_name: Option<String>,
    pub model_name: Option<String>,
    pub model_number: Option<String>,
    pub model_description: Option<String>,
    pub manufacturer: Option<String>,
    pub device_type: Option<String>,
    pub udn: Option<String>,
    /// DIAL application URL, always ending in `/`
    pub application_url: Option<String>,
    /// Services of the root device and all embedded devices
    pub service_list: Vec<ServiceEntry>,
    /// Headers of the description document response
    pub response_headers: BTreeMap<String, Vec<String>>,
    /// Raw description document
    pub raw_description: Option<String>,
    /// `<scheme>://<host>` of the location URL
    pub service_uri: Option<String>,
    /// `<scheme>://<host>:<port>` of the location URL
    pub base_url: Option<String>,

    /// Last time a matching packet was seen for this device
    #[serde(skip)]
    pub last_detection: Instant,
}

impl ServiceDescription {
    /// Create an unresolved record for a first sighting
    pub fn new(
        uuid: impl Into<String>,
        protocol_filter: impl Into<String>,
        ip_address: impl Into<String>,
        port: u16,
        location_url: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            protocol_filter: protocol_filter.into(),
            external_id: None,
            ip_address: ip_address.into(),
            port,
            location_url: location_url.into(),
            friendly_name: None,
            model_name: None,
            model_number: None,
            model_description: None,
            manufacturer: None,
            device_type: None,
            udn: None,
            application_url: None,
            service_list: Vec::new(),
            response_headers: BTreeMap::new(),
            raw_description: None,
            service_uri: None,
            base_url: None,
            last_detection: Instant::now(),
        }
    }

    /// Fill in resolved metadata
    pub fn apply_metadata(&mut self, metadata: DeviceMetadata) {
        self.friendly_name = metadata.friendly_name;
        self.model_name = metadata.model_name;
        self.model_number = metadata.model_number;
        self.model_description = metadata.model_description;
        self.manufacturer = metadata.manufacturer;
        self.device_type = metadata.device_type;
        self.udn = metadata.udn;
        self.application_url = metadata.application_url;
        self.service_list = metadata.service_list;
        self.response_headers = metadata.response_headers;
        self.raw_description = Some(metadata.raw_description);
        self.service_uri = Some(metadata.service_uri);
        self.base_url = Some(metadata.base_url);
        self.port = metadata.port;
    }

    /// Independent copy stamped with `external_id`
    pub fn for_external_id(&self, external_id: &str) -> Self {
        let mut copy = self.clone();
        copy.external_id = Some(external_id.to_string());
        copy
    }

    /// True once the description document has been applied
    pub fn is_resolved(&self) -> bool {
        self.raw_description.is_some()
    }

    /// Service-type URNs advertised by the device
    pub fn service_types(&self) -> impl Iterator<Item = &str> {
        self.service_list.iter().map(|s| s.service_type.as_str())
    }
}

/// What to search for and how to label matches.
///
/// Several filters may share a protocol string with different external ids;
/// a device found under that protocol is then reported once per id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DiscoveryFilter {
    /// SSDP search target, e.g. `urn:schemas-upnp-org:device:MediaRenderer:1`
    pub protocol_filter: String,
    /// Label attached to matching records, e.g. `DLNA`
    pub external_id: String,
}

impl DiscoveryFilter {
    pub fn new(protocol_filter: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            protocol_filter: protocol_filter.into(),
            external_id: external_id.into(),
        }
    }
}
