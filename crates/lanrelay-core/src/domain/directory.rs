//! PeerDirectory: the shared registry of every peer heard on the LAN.
//!
//! Every discovery listener thread writes to the directory and the chat and
//! transfer channels read from it, so all access goes through an internal
//! `RwLock`. Readers always receive owned copies; no caller can hold a view
//! into the map while a listener mutates it.
//!
//! # Change detection
//!
//! `upsert` compares the incoming host flag against the flag stored for that
//! id, so a host-status notification fires only on an actual transition and
//! never on repeated identical announcements.
//!
//! # Retention
//!
//! Nothing is removed implicitly. [`PeerDirectory::remove_stale`] exists for
//! an optional reaper that the node runs only when a TTL is configured.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use crate::domain::peer::{ChangeKind, PeerRecord, PeerSighting};

/// Thread-safe peer registry keyed by peer id.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: RwLock<HashMap<String, PeerRecord>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one sighting into the directory.
    ///
    /// Always refreshes `last_seen` and `address`. Returns
    /// [`ChangeKind::NewPeer`] for an unseen id, [`ChangeKind::HostStatusChanged`]
    /// when the sighting carries a host flag different from the stored one,
    /// and [`ChangeKind::NoChange`] otherwise.
    pub fn upsert(&self, sighting: PeerSighting) -> ChangeKind {
        self.upsert_record(sighting).0
    }

    /// Like [`upsert`](Self::upsert), also returning the record as this
    /// sighting left it. Both are taken under one write lock, so a concurrent
    /// upsert of the same id cannot leak into the returned snapshot.
    pub fn upsert_record(&self, sighting: PeerSighting) -> (ChangeKind, PeerRecord) {
        let mut peers = self.write();

        match peers.get_mut(&sighting.id) {
            None => {
                let record = PeerRecord {
                    id: sighting.id.clone(),
                    display_name: sighting.display_name,
                    address: sighting.address,
                    is_host: sighting.is_host.unwrap_or(false),
                    last_seen: sighting.seen_at,
                };
                peers.insert(sighting.id, record.clone());
                (ChangeKind::NewPeer, record)
            }
            Some(record) => {
                record.last_seen = sighting.seen_at;
                record.address = sighting.address;
                record.display_name = sighting.display_name;
                let change = match sighting.is_host {
                    Some(is_host) if is_host != record.is_host => {
                        record.is_host = is_host;
                        ChangeKind::HostStatusChanged
                    }
                    _ => ChangeKind::NoChange,
                };
                (change, record.clone())
            }
        }
    }

    /// Returns a snapshot of every peer, ordered by display name then id.
    pub fn list(&self) -> Vec<PeerRecord> {
        let mut all: Vec<PeerRecord> = self.read().values().cloned().collect();
        all.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    /// Returns a copy of one peer's record.
    pub fn get(&self, id: &str) -> Option<PeerRecord> {
        self.read().get(id).cloned()
    }

    /// Returns the last known address of a peer.
    pub fn resolve_address(&self, id: &str) -> Option<Ipv4Addr> {
        self.read().get(id).map(|p| p.address)
    }

    /// Returns each distinct peer address once, in ascending order.
    ///
    /// Two ids can share an address (a renamed host, or a peer heard in both
    /// announcement variants); callers sending to "everyone" use this so each
    /// machine receives a message once.
    pub fn unique_addresses(&self) -> Vec<Ipv4Addr> {
        let set: BTreeSet<Ipv4Addr> = self.read().values().map(|p| p.address).collect();
        set.into_iter().collect()
    }

    /// Returns the ids of all peers currently flagged as host.
    pub fn hosts(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .read()
            .values()
            .filter(|p| p.is_host)
            .map(|p| p.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Removes and returns every peer not seen within `ttl` of `now`.
    pub fn remove_stale(&self, ttl: Duration, now: SystemTime) -> Vec<PeerRecord> {
        let mut peers = self.write();
        let stale: Vec<String> = peers
            .values()
            .filter(|p| {
                now.duration_since(p.last_seen)
                    .map(|age| age > ttl)
                    .unwrap_or(false)
            })
            .map(|p| p.id.clone())
            .collect();

        stale.iter().filter_map(|id| peers.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panicking writer cannot leave a torn record: every mutation above is a
    // single insert or field assignment, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PeerRecord>> {
        self.peers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PeerRecord>> {
        self.peers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
