//! Device description resolution.
//!
//! Fetches the UPnP device description document a device advertises in its
//! LOCATION header and extracts the metadata attached to discovered records.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DiscoveryError, Result};

/// UPnP device description root element.
#[derive(Debug, Deserialize)]
pub struct DescriptionDocument {
    /// Base for the document's relative URLs; UPnP 1.0 devices may send it
    #[serde(rename = "URLBase")]
    pub url_base: Option<String>,
    pub device: DeviceDescription,
}

/// A `<device>` element, possibly embedded inside another device's `deviceList`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescription {
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: Option<String>,
    pub model_description: Option<String>,
    pub model_name: Option<String>,
    pub model_number: Option<String>,
    #[serde(rename = "UDN")]
    pub udn: Option<String>,
    pub service_list: Option<ServiceList>,
    pub device_list: Option<DeviceList>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceList {
    #[serde(rename = "service", default)]
    pub services: Vec<ServiceEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceList {
    #[serde(rename = "device", default)]
    pub devices: Vec<DeviceDescription>,
}

/// A `<service>` entry of a device description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    /// Service-type URN, e.g. `urn:schemas-upnp-org:service:AVTransport:1`
    pub service_type: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(rename = "SCPDURL", default)]
    pub scpd_url: String,
    #[serde(rename = "controlURL", default)]
    pub control_url: String,
    #[serde(rename = "eventSubURL", default)]
    pub event_sub_url: String,
}

impl DescriptionDocument {
    /// Parse a description document from XML.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::ParseError` if the XML is malformed or missing required fields.
    pub fn from_xml(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(xml)
            .map_err(|e| DiscoveryError::ParseError(format!("Failed to parse device XML: {}", e)))
    }
}

impl DeviceDescription {
    /// Services of this device followed by those of its embedded devices, depth-first
    pub fn all_services(&self) -> Vec<ServiceEntry> {
        let mut services = Vec::new();
        self.collect_services(&mut services);
        services
    }

    fn collect_services(&self, out: &mut Vec<ServiceEntry>) {
        if let Some(list) = &self.service_list {
            out.extend(list.services.iter().cloned());
        }
        if let Some(list) = &self.device_list {
            for device in &list.devices {
                device.collect_services(out);
            }
        }
    }
}

/// Metadata resolved from a device description document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub friendly_name: Option<String>,
    pub model_name: Option<String>,
    pub model_number: Option<String>,
    pub model_description: Option<String>,
    pub manufacturer: Option<String>,
    pub device_type: Option<String>,
    pub udn: Option<String>,
    pub application_url: Option<String>,
    pub service_list: Vec<ServiceEntry>,
    pub response_headers: BTreeMap<String, Vec<String>>,
    pub raw_description: String,
    pub service_uri: String,
    pub base_url: String,
    pub port: u16,
}

impl DeviceMetadata {
    /// Build metadata from a parsed document and the response it came in
    pub fn from_document(
        location: &Url,
        document: &DescriptionDocument,
        raw_description: String,
        response_headers: BTreeMap<String, Vec<String>>,
    ) -> Result<Self> {
        let host = location
            .host_str()
            .ok_or_else(|| DiscoveryError::ParseError(format!("Location has no host: {}", location)))?;
        let port = location
            .port_or_known_default()
            .ok_or_else(|| DiscoveryError::ParseError(format!("Location has no port: {}", location)))?;
        let service_uri = format!("{}://{}", location.scheme(), host);
        let base_url = match non_empty(document.url_base.as_ref()) {
            Some(url_base) => url_base.trim_end_matches('/').to_string(),
            None => format!("{}:{}", service_uri, port),
        };

        let application_url = response_headers
            .get("application-url")
            .and_then(|values| values.first())
            .map(|value| normalize_application_url(value));

        let device = &document.device;
        Ok(Self {
            friendly_name: non_empty(Some(&device.friendly_name)),
            model_name: non_empty(device.model_name.as_ref()),
            model_number: non_empty(device.model_number.as_ref()),
            model_description: non_empty(device.model_description.as_ref()),
            manufacturer: non_empty(device.manufacturer.as_ref()),
            device_type: non_empty(Some(&device.device_type)),
            udn: non_empty(device.udn.as_ref()),
            application_url,
            service_list: device.all_services(),
            response_headers,
            raw_description,
            service_uri,
            base_url,
            port,
        })
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Application URLs are used as a base for app paths, so they must end in `/`
fn normalize_application_url(url: &str) -> String {
    let url = url.trim();
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// Resolves a LOCATION URL into device metadata.
///
/// Implementations block; the engine only calls them from blocking background tasks.
pub trait DescriptionResolver: Send + Sync {
    fn resolve(&self, location: &str, protocol_filter: &str) -> Result<DeviceMetadata>;
}

/// Resolver fetching description documents over HTTP
pub struct HttpDescriptionResolver {
    http_client: reqwest::blocking::Client,
}

impl HttpDescriptionResolver {
    /// Create a resolver whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

impl DescriptionResolver for HttpDescriptionResolver {
    fn resolve(&self, location: &str, protocol_filter: &str) -> Result<DeviceMetadata> {
        let url = Url::parse(location)
            .map_err(|e| DiscoveryError::ParseError(format!("Invalid location {}: {}", location, e)))?;

        tracing::trace!(%location, filter = %protocol_filter, "fetching device description");

        let response = self
            .http_client
            .get(url.clone())
            .send()
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to fetch device description: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::NetworkError(format!(
                "Device description request returned {}",
                status
            )));
        }

        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        let xml = response
            .text()
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to read response body: {}", e)))?;

        let document = DescriptionDocument::from_xml(&xml)?;
        DeviceMetadata::from_document(&url, &document, xml, headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERER_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Living Room TV</friendlyName>
    <manufacturer>Acme</manufacturer>
    <modelName>Renderer 9000</modelName>
    <modelNumber>9000</modelNumber>
    <modelDescription></modelDescription>
    <UDN>uuid:abc-123</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <SCPDURL>/avt.xml</SCPDURL>
        <controlURL>/avt/control</controlURL>
        <eventSubURL>/avt/event</eventSubURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <SCPDURL>/rc.xml</SCPDURL>
        <controlURL>/rc/control</controlURL>
        <eventSubURL>/rc/event</eventSubURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
        <friendlyName>Embedded Server</friendlyName>
        <serviceList>
          <service>
            <serviceType>urn:schemas-upnp-org:service:ContentDirectory:1</serviceType>
          </service>
        </serviceList>
      </device>
    </deviceList>
  </device>
</root>"#;

    #[test]
    fn test_document_from_xml() {
        let document = DescriptionDocument::from_xml(RENDERER_XML).unwrap();

        assert_eq!(document.device.friendly_name, "Living Room TV");
        assert_eq!(document.device.manufacturer.as_deref(), Some("Acme"));
        assert_eq!(document.device.udn.as_deref(), Some("uuid:abc-123"));
        assert!(document.url_base.is_none());
    }

    #[test]
    fn test_all_services_includes_embedded_devices() {
        let document = DescriptionDocument::from_xml(RENDERER_XML).unwrap();
        let services = document.device.all_services();

        let types: Vec<_> = services.iter().map(|s| s.service_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "urn:schemas-upnp-org:service:AVTransport:1",
                "urn:schemas-upnp-org:service:RenderingControl:1",
                "urn:schemas-upnp-org:service:ContentDirectory:1",
            ]
        );
        assert_eq!(services[0].control_url, "/avt/control");
        assert_eq!(services[2].scpd_url, "");
    }

    #[test]
    fn test_metadata_from_document() {
        let document = DescriptionDocument::from_xml(RENDERER_XML).unwrap();
        let location = Url::parse("http://10.0.0.5:8080/desc.xml").unwrap();
        let mut headers = BTreeMap::new();
        headers.insert(
            "application-url".to_string(),
            vec!["http://10.0.0.5:8080/apps".to_string()],
        );

        let metadata =
            DeviceMetadata::from_document(&location, &document, RENDERER_XML.to_string(), headers)
                .unwrap();

        assert_eq!(metadata.port, 8080);
        assert_eq!(metadata.service_uri, "http://10.0.0.5");
        assert_eq!(metadata.base_url, "http://10.0.0.5:8080");
        assert_eq!(metadata.application_url.as_deref(), Some("http://10.0.0.5:8080/apps/"));
        assert_eq!(metadata.model_description, None);
        assert_eq!(metadata.model_name.as_deref(), Some("Renderer 9000"));
        assert_eq!(metadata.service_list.len(), 3);
    }

    #[test]
    fn test_metadata_default_port() {
        let document = DescriptionDocument::from_xml(RENDERER_XML).unwrap();
        let location = Url::parse("http://10.0.0.5/desc.xml").unwrap();
        let metadata =
            DeviceMetadata::from_document(&location, &document, String::new(), BTreeMap::new())
                .unwrap();

        assert_eq!(metadata.port, 80);
        assert!(metadata.application_url.is_none());
    }

    #[test]
    fn test_url_base_overrides_base_url() {
        let xml = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <URLBase>http://10.0.0.9:49152/</URLBase>
  <device>
    <deviceType>urn:schemas-upnp-org:device:InternetGatewayDevice:1</deviceType>
    <friendlyName>Router</friendlyName>
  </device>
</root>"#;
        let document = DescriptionDocument::from_xml(xml).unwrap();
        let location = Url::parse("http://10.0.0.9:1900/igd.xml").unwrap();
        let metadata =
            DeviceMetadata::from_document(&location, &document, xml.to_string(), BTreeMap::new())
                .unwrap();

        assert_eq!(metadata.base_url, "http://10.0.0.9:49152");
        assert_eq!(metadata.service_uri, "http://10.0.0.9");
        assert_eq!(metadata.port, 1900);
    }

    #[test]
    fn test_normalize_application_url() {
        assert_eq!(normalize_application_url("http://a/apps"), "http://a/apps/");
        assert_eq!(normalize_application_url("http://a/apps/"), "http://a/apps/");
    }

    #[test]
    fn test_missing_device_is_error() {
        let xml = "<?xml version=\"1.0\"?><root><specVersion/></root>";
        assert!(matches!(
            DescriptionDocument::from_xml(xml),
            Err(DiscoveryError::ParseError(_))
        ));
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(DescriptionDocument::from_xml("not xml at all").is_err());
    }

    #[test]
    fn test_resolve_rejects_invalid_location() {
        let resolver = HttpDescriptionResolver::new(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            resolver.resolve("not a url", "ssdp:all"),
            Err(DiscoveryError::ParseError(_))
        ));
    }
}
