//! Watch the network for UPnP devices and print events as JSON lines
//!
//! Usage: cargo run -p ssdp-discovery --example watch_devices -- [search-target] [seconds]
//!
//! Defaults to `ssdp:all` for 30 seconds. Set `SSDP_LOG_MODE=development` to
//! see what the engine is doing.

use serde::Serialize;
use ssdp_discovery::{logging, DiscoveryConfig, DiscoveryEngine, DiscoveryEvent, DiscoveryFilter};
use std::time::{Duration, Instant};

#[derive(Serialize)]
struct EventLine<'a> {
    event: &'a str,
    #[serde(flatten)]
    service: &'a ssdp_discovery::ServiceDescription,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging_from_env()?;

    let mut args = std::env::args().skip(1);
    let target = args.next().unwrap_or_else(|| "ssdp:all".to_string());
    let seconds = args.next().and_then(|s| s.parse().ok()).unwrap_or(30);
    let deadline = Instant::now() + Duration::from_secs(seconds);

    let engine = DiscoveryEngine::new(DiscoveryConfig::default())?;
    engine.add_filter(DiscoveryFilter::new(target, "cli"))?;

    let mut events = engine.events(Some(Duration::from_millis(500)));
    engine.start()?;
    if !engine.is_running() {
        eprintln!("No usable network interface, nothing to watch");
        return Ok(());
    }

    while Instant::now() < deadline {
        let Some(event) = events.next() else {
            continue;
        };
        let (kind, service) = match &event {
            DiscoveryEvent::Added(service) => ("added", service),
            DiscoveryEvent::Removed(service) => ("removed", service),
        };
        let summary = ServiceSummary::from(service);
        let line = EventLine {
            event: kind,
            service: &summary.0,
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    engine.stop();
    Ok(())
}

/// Drops the raw document so lines stay readable
struct ServiceSummary(ssdp_discovery::ServiceDescription);

impl From<&ssdp_discovery::ServiceDescription> for ServiceSummary {
    fn from(service: &ssdp_discovery::ServiceDescription) -> Self {
        let mut service = service.clone();
        service.raw_description = None;
        service.response_headers.clear();
        Self(service)
    }
}
