//! The peer directory: merged view of gossip hints and delivery
//! observations.
//!
//! One entry per known destination: the best next hop, its hop count, and
//! freshness. A hint replaces the current entry only when strictly newer
//! (higher last-seen) or strictly better (lower hop count); equal-hop
//! candidates fall back to next-hop reputation, then recency. Entries
//! expire after the configured window and stop being used for routing;
//! reputation lives on the peer records and survives expiry.

use std::collections::HashMap;

use weft_types::PeerId;
use weft_types::route::RouteEntry;
use weft_wire::payload::GossipAnnouncement;

/// One directory entry for a destination.
#[derive(Clone, Debug)]
pub struct DirectoryEntry {
    /// Directly connected peer to hand packets to.
    pub next_hop: PeerId,
    /// Hops to the destination via that next hop.
    pub hop_count: u8,
    /// Freshness of the reachability information, unix millis.
    pub last_seen_ms: u64,
    /// The destination's advertised X25519 key, when known.
    pub agreement_pk: Option<[u8; 32]>,
}

/// The in-memory directory. Single-writer (the engine task).
pub struct Directory {
    entries: HashMap<PeerId, DirectoryEntry>,
    entry_ttl_ms: u64,
    max_entries: usize,
}

/// Outcome of merging one hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A previously unknown destination appeared.
    Discovered,
    /// An existing entry improved or refreshed.
    Updated,
    /// The hint lost to the current entry.
    Ignored,
}

impl Directory {
    /// Create a directory with the given entry lifetime and size bound.
    pub fn new(entry_ttl_ms: u64, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            entry_ttl_ms,
            max_entries,
        }
    }

    /// Merge a single reachability observation.
    ///
    /// `rep` supplies the reputation of a candidate next hop for the
    /// equal-hop tie-break.
    pub fn observe(
        &mut self,
        destination: PeerId,
        next_hop: PeerId,
        hop_count: u8,
        last_seen_ms: u64,
        now_ms: u64,
        rep: impl Fn(&PeerId) -> u8,
    ) -> MergeOutcome {
        // A future-dated hint (clock skew) is clamped to local now so it
        // cannot pin the entry past honest refreshes.
        let last_seen_ms = last_seen_ms.min(now_ms);

        match self.entries.get(&destination) {
            None => {
                if self.entries.len() >= self.max_entries {
                    self.evict_stalest();
                }
                self.entries.insert(
                    destination,
                    DirectoryEntry {
                        next_hop,
                        hop_count,
                        last_seen_ms,
                        agreement_pk: None,
                    },
                );
                MergeOutcome::Discovered
            }
            Some(current) => {
                let strictly_better = hop_count < current.hop_count;
                let strictly_newer = last_seen_ms > current.last_seen_ms;
                let tie_break = hop_count == current.hop_count
                    && next_hop != current.next_hop
                    && (rep(&next_hop), last_seen_ms)
                        > (rep(&current.next_hop), current.last_seen_ms);
                if strictly_better || strictly_newer || tie_break {
                    let agreement_pk = current.agreement_pk;
                    self.entries.insert(
                        destination,
                        DirectoryEntry {
                            next_hop,
                            hop_count,
                            last_seen_ms,
                            agreement_pk,
                        },
                    );
                    MergeOutcome::Updated
                } else {
                    MergeOutcome::Ignored
                }
            }
        }
    }

    /// Merge a verified gossip announcement received from a direct
    /// neighbor.
    ///
    /// `announcer` originated the announcement; `inbound` is the neighbor
    /// that delivered it; `hops_to_announcer` is the distance the packet
    /// traveled. Returns the destinations newly discovered.
    #[allow(clippy::too_many_arguments)]
    pub fn merge_announcement(
        &mut self,
        announcer: PeerId,
        inbound: PeerId,
        hops_to_announcer: u8,
        announcement: &GossipAnnouncement,
        local: PeerId,
        now_ms: u64,
        rep: impl Fn(&PeerId) -> u8 + Copy,
    ) -> Vec<PeerId> {
        let mut discovered = Vec::new();

        if announcer != local {
            let outcome = self.observe(
                announcer,
                inbound,
                hops_to_announcer,
                now_ms,
                now_ms,
                rep,
            );
            if outcome == MergeOutcome::Discovered {
                discovered.push(announcer);
            }
            if let Some(entry) = self.entries.get_mut(&announcer) {
                entry.agreement_pk = Some(announcement.agreement_pk);
            }
        }

        for hint in &announcement.entries {
            if hint.peer_id == local || hint.peer_id == announcer {
                continue;
            }
            let hop_count = hops_to_announcer.saturating_add(hint.hop_count);
            let outcome = self.observe(
                hint.peer_id,
                inbound,
                hop_count,
                hint.last_seen_ms,
                now_ms,
                rep,
            );
            if outcome == MergeOutcome::Discovered {
                discovered.push(hint.peer_id);
            }
        }

        discovered
    }

    /// The live (unexpired) entry for a destination.
    pub fn entry(&self, destination: &PeerId, now_ms: u64) -> Option<&DirectoryEntry> {
        self.entries
            .get(destination)
            .filter(|e| now_ms.saturating_sub(e.last_seen_ms) < self.entry_ttl_ms)
    }

    /// The destination's advertised X25519 key, expired or not.
    pub fn agreement_pk(&self, destination: &PeerId) -> Option<[u8; 32]> {
        self.entries.get(destination).and_then(|e| e.agreement_pk)
    }

    /// Record a destination's X25519 key from a handshake envelope.
    pub fn learn_agreement_pk(&mut self, destination: PeerId, pk: [u8; 32], now_ms: u64) {
        self.entries
            .entry(destination)
            .or_insert(DirectoryEntry {
                next_hop: destination,
                hop_count: 1,
                last_seen_ms: now_ms,
                agreement_pk: None,
            })
            .agreement_pk = Some(pk);
    }

    /// Remove every entry routed via a lost next hop.
    pub fn drop_via(&mut self, next_hop: &PeerId) -> Vec<PeerId> {
        let lost: Vec<PeerId> = self
            .entries
            .iter()
            .filter(|(dest, e)| e.next_hop == *next_hop && *dest != next_hop)
            .map(|(dest, _)| *dest)
            .collect();
        for dest in &lost {
            self.entries.remove(dest);
        }
        self.entries.remove(next_hop);
        lost
    }

    /// Remove one destination.
    pub fn remove(&mut self, destination: &PeerId) {
        self.entries.remove(destination);
    }

    /// Sweep entries past the lifetime window. Returns removed
    /// destinations.
    pub fn sweep_expired(&mut self, now_ms: u64) -> Vec<PeerId> {
        let ttl = self.entry_ttl_ms;
        let expired: Vec<PeerId> = self
            .entries
            .iter()
            .filter(|(_, e)| now_ms.saturating_sub(e.last_seen_ms) >= ttl)
            .map(|(dest, _)| *dest)
            .collect();
        for dest in &expired {
            self.entries.remove(dest);
        }
        expired
    }

    /// Live destinations with their entries, for announcements and
    /// accessors.
    pub fn live_entries(&self, now_ms: u64) -> Vec<(PeerId, &DirectoryEntry)> {
        self.entries
            .iter()
            .filter(|(_, e)| now_ms.saturating_sub(e.last_seen_ms) < self.entry_ttl_ms)
            .map(|(dest, e)| (*dest, e))
            .collect()
    }

    /// All known destinations, live or expired.
    pub fn known_peers(&self) -> Vec<PeerId> {
        self.entries.keys().copied().collect()
    }

    /// Project live entries as persistable route rows.
    pub fn to_routes(&self, now_ms: u64) -> Vec<RouteEntry> {
        self.live_entries(now_ms)
            .into_iter()
            .map(|(destination, e)| RouteEntry {
                destination,
                next_hop: e.next_hop,
                hop_count: e.hop_count.max(1),
                metric: u32::from(e.hop_count.max(1)),
                expires_at_ms: e.last_seen_ms + self.entry_ttl_ms,
            })
            .collect()
    }

    /// Seed the directory from persisted route rows.
    pub fn load_routes(&mut self, routes: &[RouteEntry], now_ms: u64) {
        for route in routes {
            if route.is_expired(now_ms) {
                continue;
            }
            self.entries.insert(
                route.destination,
                DirectoryEntry {
                    next_hop: route.next_hop,
                    hop_count: route.hop_count,
                    last_seen_ms: route.expires_at_ms.saturating_sub(self.entry_ttl_ms),
                    agreement_pk: None,
                },
            );
        }
    }

    fn evict_stalest(&mut self) {
        if let Some(stalest) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_seen_ms)
            .map(|(dest, _)| *dest)
        {
            self.entries.remove(&stalest);
        }
    }
}
