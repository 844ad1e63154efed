//! Engine counters.
//!
//! Routing, codec, and crypto drops are internal; they never surface to
//! the application as errors, only here.

/// Snapshot of engine counters since start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshStats {
    /// Packets dropped by the dedup window.
    pub dropped_dedup: u64,
    /// Packets dropped by decode failures (version, size, layout).
    pub dropped_codec: u64,
    /// Packets dropped by signature or AEAD failures.
    pub dropped_crypto: u64,
    /// Packets dropped with an exhausted hop budget.
    pub dropped_ttl: u64,
    /// Own packets observed back (loop suppression).
    pub dropped_self: u64,
    /// Packets delivered to the local application.
    pub delivered_local: u64,
    /// Packets forwarded to a unicast next hop.
    pub forwarded: u64,
    /// Packets relayed to all neighbors (gossip).
    pub broadcast_relayed: u64,
    /// Packets parked in the store-and-forward queue.
    pub enqueued: u64,
    /// Queue entries evicted under pressure.
    pub queue_evicted: u64,
    /// Queue entries expired undelivered.
    pub queue_expired: u64,
    /// Sends refused by the rate limiter.
    pub rate_limited: u64,
    /// Sends deferred by transport backpressure.
    pub backpressure_deferred: u64,
}
