//! SSDP packet decoding
//!
//! Turns raw datagrams into typed packets with a case-insensitive header map.
//! Anything that doesn't look like SSDP is dropped without an error: shared
//! networks carry plenty of unrelated traffic on port 1900.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};

/// SSDP multicast group
pub const MULTICAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
/// SSDP port
pub const SSDP_PORT: u16 = 1900;

/// Start line of a search request
pub const MSEARCH: &str = "M-SEARCH * HTTP/1.1";
/// Start line of a notification
pub const NOTIFY: &str = "NOTIFY * HTTP/1.1";
/// Start line of a search response
pub const OK: &str = "HTTP/1.1 200 OK";

/// NTS value announcing a device
pub const ALIVE: &str = "ssdp:alive";
/// NTS value announcing a departure
pub const BYEBYE: &str = "ssdp:byebye";
/// NTS value announcing a changed device
pub const UPDATE: &str = "ssdp:update";

/// Kind of SSDP message, derived from the start line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// `M-SEARCH * HTTP/1.1`, sent by control points (including us)
    SearchRequest,
    /// `NOTIFY * HTTP/1.1`, unsolicited alive/byebye announcements
    Notify,
    /// `HTTP/1.1 200 OK`, unicast reply to a search
    SearchResponse,
}

impl PacketType {
    fn from_start_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.eq_ignore_ascii_case(MSEARCH) {
            Some(PacketType::SearchRequest)
        } else if line.eq_ignore_ascii_case(NOTIFY) {
            Some(PacketType::Notify)
        } else if is_ok_status(line) {
            Some(PacketType::SearchResponse)
        } else {
            None
        }
    }

    /// Header carrying the device/service type for this kind of packet
    pub fn service_key_header(&self) -> &'static str {
        match self {
            PacketType::Notify => "NT",
            PacketType::SearchRequest | PacketType::SearchResponse => "ST",
        }
    }
}

/// Accepts `HTTP/1.1 200 OK` as well as `HTTP/1.0 200 OK` and bare `HTTP/1.1 200`
fn is_ok_status(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    matches!(
        (parts.next(), parts.next()),
        (Some(version), Some("200"))
            if version.get(..5).map_or(false, |p| p.eq_ignore_ascii_case("HTTP/"))
    )
}

/// Case-insensitive SSDP header map
///
/// Names are stored upper-cased; values are trimmed. When a header is repeated
/// the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    values: HashMap<String, String>,
}

impl Headers {
    /// Create an empty header map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header unless one with the same name already exists
    pub fn insert(&mut self, name: &str, value: &str) {
        self.values
            .entry(name.trim().to_ascii_uppercase())
            .or_insert_with(|| value.trim().to_string());
    }

    /// Look up a header by name, ignoring case
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(NAME, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A decoded SSDP datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpPacket {
    pub packet_type: PacketType,
    pub headers: Headers,
    pub sender: SocketAddr,
}

impl SsdpPacket {
    /// Decode a raw datagram
    ///
    /// Returns `None` when the payload isn't UTF-8, has no recognizable start
    /// line, or carries no headers at all.
    pub fn decode(payload: &[u8], sender: SocketAddr) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?;
        let mut lines = text.lines();
        let packet_type = PacketType::from_start_line(lines.next()?)?;

        let mut headers = Headers::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if !name.trim().is_empty() {
                    headers.insert(name, value);
                }
            }
        }

        if headers.is_empty() {
            return None;
        }

        Some(Self {
            packet_type,
            headers,
            sender,
        })
    }

    /// `NT` for notifications, `ST` for everything else
    pub fn service_key(&self) -> Option<&str> {
        self.headers
            .get(self.packet_type.service_key_header())
            .filter(|v| !v.is_empty())
    }

    pub fn usn(&self) -> Option<&str> {
        self.headers.get("USN")
    }

    /// Device identity extracted from the USN header
    pub fn uuid(&self) -> Option<&str> {
        self.usn().and_then(extract_uuid)
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get("LOCATION").filter(|v| !v.is_empty())
    }

    pub fn nts(&self) -> Option<&str> {
        self.headers.get("NTS")
    }

    /// True for `NTS: ssdp:byebye`
    pub fn is_bye_bye(&self) -> bool {
        self.nts()
            .map(|nts| nts.eq_ignore_ascii_case(BYEBYE))
            .unwrap_or(false)
    }
}

/// Extract the device uuid from a USN value
///
/// Takes everything between `uuid:` and the next `::` (or the end of the
/// string). `uuid:abc-123::urn:schemas-upnp-org:device:MediaRenderer:1`
/// yields `abc-123`.
pub fn extract_uuid(usn: &str) -> Option<&str> {
    let start = usn.find("uuid:")? + "uuid:".len();
    let rest = &usn[start..];
    let end = rest.find("::").unwrap_or(rest.len());
    let uuid = rest[..end].trim();
    if uuid.is_empty() {
        None
    } else {
        Some(uuid)
    }
}

/// Format an M-SEARCH request for `search_target`
pub fn search_message(search_target: &str, mx: u8, user_agent: &str) -> String {
    format!(
        "{MSEARCH}\r\n\
         HOST: {MULTICAST_ADDRESS}:{SSDP_PORT}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx}\r\n\
         ST: {search_target}\r\n\
         USER-AGENT: {user_agent}\r\n\
         \r\n"
    )
}
