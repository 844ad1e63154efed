//! Per-packet routing decisions.
//!
//! For every verified inbound packet exactly one disposition results:
//! dropped (self-loop, duplicate, blacklist, dead TTL, malformed),
//! delivered locally, forwarded to one next hop, broadcast-relayed, or
//! parked in the store-and-forward queue. The engine performs the actual
//! I/O; this module only decides.

use weft_types::{MessageId, MessageKind, PeerId};

use crate::dedup::RecentIds;
use crate::gossip::Directory;

/// What to do with one inbound packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Our own packet came back; drop it.
    DropSelf,
    /// Seen this message ID before; drop it.
    DropDuplicate,
    /// Sender or inbound peer is blacklisted; drop it.
    DropBlacklisted,
    /// Hop budget exhausted and the packet is not for us; drop it.
    DropTtl,
    /// Unicast packet without a routable destination field; drop it.
    DropMalformed,
    /// The logical recipient is this node.
    DeliverLocal,
    /// Send to exactly this directly connected peer.
    Forward { next_hop: PeerId },
    /// Relay to every connected peer except the inbound one.
    BroadcastRelay,
    /// No route; park under the destination.
    Enqueue { destination: PeerId },
}

/// The routing decision state: the dedup window plus the local address.
pub struct Router {
    local: PeerId,
    dedup: RecentIds,
}

/// Read-only context the engine supplies per decision.
pub struct RouteContext<'a> {
    /// Peers with a live transport link right now.
    pub connected: &'a [PeerId],
    /// The merged directory.
    pub directory: &'a Directory,
    /// Decision time, unix millis.
    pub now_ms: u64,
}

impl Router {
    /// Create a router for `local` with a dedup window of `dedup_size`.
    pub fn new(local: PeerId, dedup_size: usize) -> Self {
        Self {
            local,
            dedup: RecentIds::new(dedup_size),
        }
    }

    /// Whether a message ID has been seen (without recording it).
    pub fn seen(&self, id: &MessageId) -> bool {
        self.dedup.contains(id)
    }

    /// Record a locally originated message ID so our own packet echoed
    /// back by a relay is dropped as a duplicate.
    pub fn record_own(&mut self, id: MessageId) {
        let _ = self.dedup.insert(id);
    }

    /// Decide the disposition of a verified inbound packet.
    ///
    /// `destination` is the envelope's logical recipient (`None` for
    /// broadcast kinds such as gossip). `blacklisted` reports per-peer
    /// blacklist state.
    #[allow(clippy::too_many_arguments)]
    pub fn dispose(
        &mut self,
        sender: PeerId,
        message_id: MessageId,
        kind: MessageKind,
        ttl: u8,
        destination: Option<PeerId>,
        inbound: PeerId,
        ctx: &RouteContext<'_>,
        blacklisted: impl Fn(&PeerId) -> bool,
    ) -> Disposition {
        if sender == self.local {
            return Disposition::DropSelf;
        }
        if blacklisted(&sender) || blacklisted(&inbound) {
            return Disposition::DropBlacklisted;
        }
        if !self.dedup.insert(message_id) {
            return Disposition::DropDuplicate;
        }
        if destination == Some(self.local) {
            return Disposition::DeliverLocal;
        }

        // Everything below is relaying, which spends hop budget.
        if ttl == 0 {
            return Disposition::DropTtl;
        }

        if kind.permits_broadcast_relay() {
            return Disposition::BroadcastRelay;
        }

        let Some(destination) = destination else {
            return Disposition::DropMalformed;
        };
        if blacklisted(&destination) {
            return Disposition::DropBlacklisted;
        }

        // Direct link to the destination wins over any learned route.
        if destination != inbound && ctx.connected.contains(&destination) {
            return Disposition::Forward {
                next_hop: destination,
            };
        }

        if let Some(entry) = ctx.directory.entry(&destination, ctx.now_ms) {
            let next_hop = entry.next_hop;
            // The inbound peer is never chosen as the next hop, and the
            // hop must actually be up.
            if next_hop != inbound
                && next_hop != sender
                && ctx.connected.contains(&next_hop)
                && !blacklisted(&next_hop)
            {
                return Disposition::Forward { next_hop };
            }
        }

        Disposition::Enqueue { destination }
    }
}
