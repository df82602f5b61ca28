//! Shared fixtures for integration tests
//!
//! `MemoryNetwork` stands in for the UDP sockets: tests inject NOTIFY and
//! search-response datagrams and observe the M-SEARCH requests the engine
//! sends, without touching the real network.

#![allow(dead_code)]

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use ssdp_discovery::{
    Datagram, DescriptionResolver, DiscoveryConfig, DiscoveryEngine, DiscoveryError,
    DiscoveryListener, HttpDescriptionResolver, Result, ServiceDescription, StaticAddress,
    Transport, TransportOpener,
};

pub const RENDERER: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";
pub const DIAL: &str = "urn:dial-multiscreen-org:service:dial:1";

pub fn fixture(filename: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures");
    path.push(filename);

    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", filename, e))
}

pub fn sender(ip: [u8; 4]) -> SocketAddr {
    SocketAddr::from((ip, 1900))
}

pub fn notify_alive(nt: &str, uuid: &str, location: &str) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         CACHE-CONTROL: max-age=1800\r\n\
         LOCATION: {location}\r\n\
         NT: {nt}\r\n\
         NTS: ssdp:alive\r\n\
         SERVER: Linux/5.10 UPnP/1.0 Test/1.0\r\n\
         USN: uuid:{uuid}::{nt}\r\n\r\n"
    )
}

pub fn notify_byebye(nt: &str, uuid: &str) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         NT: {nt}\r\n\
         NTS: ssdp:byebye\r\n\
         USN: uuid:{uuid}::{nt}\r\n\r\n"
    )
}

pub fn search_response(st: &str, uuid: &str, location: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age=1800\r\n\
         EXT:\r\n\
         LOCATION: {location}\r\n\
         SERVER: Linux/5.10 UPnP/1.0 Test/1.0\r\n\
         ST: {st}\r\n\
         USN: uuid:{uuid}::{st}\r\n\r\n"
    )
}

pub fn search_request(st: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 1\r\n\
         ST: {st}\r\n\r\n"
    )
}

/// A sent M-SEARCH and when it left
#[derive(Debug, Clone)]
pub struct SentSearch {
    pub at: Instant,
    pub message: String,
}

/// In-memory stand-in for the two SSDP sockets
pub struct MemoryNetwork {
    notify_tx: Sender<Datagram>,
    response_tx: Sender<Datagram>,
    notify_rx: Receiver<Datagram>,
    response_rx: Receiver<Datagram>,
    sent_tx: Sender<SentSearch>,
    pub sent: Receiver<SentSearch>,
    opened: Arc<AtomicUsize>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = channel::unbounded();
        let (response_tx, response_rx) = channel::unbounded();
        let (sent_tx, sent) = channel::unbounded();
        Self {
            notify_tx,
            response_tx,
            notify_rx,
            response_rx,
            sent_tx,
            sent,
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Opener handing out a fresh transport on this network for every open
    pub fn opener(&self) -> TransportOpener {
        let notify_rx = self.notify_rx.clone();
        let response_rx = self.response_rx.clone();
        let sent_tx = self.sent_tx.clone();
        let opened = Arc::clone(&self.opened);

        Arc::new(move |_, _| {
            opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryTransport {
                notify_rx: notify_rx.clone(),
                response_rx: response_rx.clone(),
                sent_tx: sent_tx.clone(),
                closed: AtomicBool::new(false),
            }) as Arc<dyn Transport>)
        })
    }

    /// Deliver a datagram to the multicast (NOTIFY) side
    pub fn announce(&self, payload: &str, from: SocketAddr) {
        let _ = self.notify_tx.send(Datagram {
            payload: payload.as_bytes().to_vec(),
            sender: from,
        });
    }

    /// Deliver a datagram to the unicast (search response) side
    pub fn respond(&self, payload: &str, from: SocketAddr) {
        let _ = self.response_tx.send(Datagram {
            payload: payload.as_bytes().to_vec(),
            sender: from,
        });
    }

    pub fn times_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Searches sent within `window`
    pub fn searches_within(&self, window: Duration) -> Vec<SentSearch> {
        let deadline = Instant::now() + window;
        let mut searches = Vec::new();
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.sent.recv_timeout(remaining) {
                Ok(search) => searches.push(search),
                Err(_) => break,
            }
        }
        searches
    }
}

struct MemoryTransport {
    notify_rx: Receiver<Datagram>,
    response_rx: Receiver<Datagram>,
    sent_tx: Sender<SentSearch>,
    closed: AtomicBool,
}

impl MemoryTransport {
    fn receive(&self, rx: &Receiver<Datagram>) -> Result<Datagram> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(DiscoveryError::TransportClosed);
            }
            match rx.recv_timeout(Duration::from_millis(10)) {
                Ok(datagram) => return Ok(datagram),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(DiscoveryError::TransportClosed),
            }
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DiscoveryError::TransportClosed);
        }
        let _ = self.sent_tx.send(SentSearch {
            at: Instant::now(),
            message: message.to_string(),
        });
        Ok(())
    }

    fn response_receive(&self) -> Result<Datagram> {
        self.receive(&self.response_rx)
    }

    fn multicast_receive(&self) -> Result<Datagram> {
        self.receive(&self.notify_rx)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

/// Engine wired to `network` and resolving descriptions over real HTTP
pub fn engine_on(network: &MemoryNetwork, config: DiscoveryConfig) -> DiscoveryEngine {
    let resolver = HttpDescriptionResolver::new(config.http_timeout).unwrap();
    engine_with_resolver(network, config, resolver)
}

/// Engine wired to `network` with a caller-supplied resolver
pub fn engine_with_resolver<R>(network: &MemoryNetwork, config: DiscoveryConfig, resolver: R) -> DiscoveryEngine
where
    R: DescriptionResolver + 'static,
{
    DiscoveryEngine::builder()
        .config(config)
        .address_provider(StaticAddress(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))))
        .transport_opener(network.opener())
        .resolver(resolver)
        .build()
        .unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Added(ServiceDescription),
    Removed(ServiceDescription),
}

/// Listener recording every callback and how many ran at the same time
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Listener that sleeps in every callback
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub fn added(&self) -> Vec<ServiceDescription> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Added(s) => Some(s),
                Recorded::Removed(_) => None,
            })
            .collect()
    }

    pub fn removed(&self) -> Vec<ServiceDescription> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Removed(s) => Some(s),
                Recorded::Added(_) => None,
            })
            .collect()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, event: Recorded) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.events.lock().push(event);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DiscoveryListener for RecordingListener {
    fn on_service_added(&self, _engine: &DiscoveryEngine, service: ServiceDescription) {
        self.record(Recorded::Added(service));
    }

    fn on_service_removed(&self, _engine: &DiscoveryEngine, service: ServiceDescription) {
        self.record(Recorded::Removed(service));
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
