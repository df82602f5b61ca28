//! Registry of discovered devices
//!
//! Every tracked uuid lives in exactly one of two maps: `pending` (seen, with
//! a description fetch in flight) or `live` (resolved and announced to
//! listeners). Both maps sit behind a single lock so that moving a record
//! between them is one atomic step.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::description::DeviceMetadata;
use crate::service::ServiceDescription;

#[derive(Debug, Default)]
struct Entries {
    pending: HashMap<String, ServiceDescription>,
    live: HashMap<String, ServiceDescription>,
}

/// Thread-safe store of pending and live service records
///
/// All operations are internally synchronized; callers never hold a lock
/// across calls. Records handed out are copies.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    entries: Mutex<Entries>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a first sighting as pending
    ///
    /// Returns `false` (and changes nothing) if the uuid is already pending or live.
    pub fn mark_pending(&self, uuid: &str, record: ServiceDescription) -> bool {
        let mut entries = self.entries.lock();
        if entries.pending.contains_key(uuid) || entries.live.contains_key(uuid) {
            return false;
        }
        entries.pending.insert(uuid.to_string(), record);
        true
    }

    /// Move a pending record to live, applying resolved metadata
    ///
    /// Returns a copy of the new live record, or `None` if the pending record
    /// was removed in the meantime (reset, byebye race).
    pub fn promote(&self, uuid: &str, metadata: DeviceMetadata) -> Option<ServiceDescription> {
        let mut entries = self.entries.lock();
        let mut record = entries.pending.remove(uuid)?;
        record.apply_metadata(metadata);
        let snapshot = record.clone();
        entries.live.insert(uuid.to_string(), record);
        Some(snapshot)
    }

    /// Drop a pending record after a failed or rejected resolution
    pub fn discard_pending(&self, uuid: &str) -> bool {
        self.entries.lock().pending.remove(uuid).is_some()
    }

    /// Refresh the detection timestamp of a live record
    pub fn touch(&self, uuid: &str) -> bool {
        self.touch_at(uuid, Instant::now())
    }

    pub(crate) fn touch_at(&self, uuid: &str, now: Instant) -> bool {
        match self.entries.lock().live.get_mut(uuid) {
            Some(record) => {
                record.last_detection = now;
                true
            }
            None => false,
        }
    }

    /// Remove a live record in response to `ssdp:byebye`
    pub fn remove_bye_bye(&self, uuid: &str) -> Option<ServiceDescription> {
        self.entries.lock().live.remove(uuid)
    }

    /// Remove and return every live record last seen before `cutoff`
    pub fn evict_expired(&self, cutoff: Instant) -> Vec<ServiceDescription> {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .live
            .iter()
            .filter(|(_, record)| record.last_detection < cutoff)
            .map(|(uuid, _)| uuid.clone())
            .collect();

        expired
            .iter()
            .filter_map(|uuid| entries.live.remove(uuid))
            .collect()
    }

    /// Forget all pending and live records
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.pending.clear();
        entries.live.clear();
    }

    pub fn is_pending(&self, uuid: &str) -> bool {
        self.entries.lock().pending.contains_key(uuid)
    }

    pub fn is_live(&self, uuid: &str) -> bool {
        self.entries.lock().live.contains_key(uuid)
    }

    /// Copy of a live record
    pub fn live(&self, uuid: &str) -> Option<ServiceDescription> {
        self.entries.lock().live.get(uuid).cloned()
    }

    /// Copies of all live records
    pub fn live_services(&self) -> Vec<ServiceDescription> {
        self.entries.lock().live.values().cloned().collect()
    }

    pub fn live_count(&self) -> usize {
        self.entries.lock().live.len()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.lock().pending.len()
    }
}
