//! Peer liveness and reputation policy.
//!
//! Liveness rides the gossip cadence: every verified packet from a peer
//! counts as a heartbeat, and silence beyond the timeout marks the peer
//! disconnected. Reputation deltas are defined here and applied by the
//! engine to the owning peer records.

use std::collections::HashMap;

use weft_types::PeerId;

/// Reputation delta for a verified, delivered packet.
pub const DELTA_VERIFIED_PACKET: i8 = 1;

/// Reputation delta for a signature-invalid or AEAD-failed packet.
pub const DELTA_CRYPTO_FAIL: i8 = -1;

/// Reputation delta for a protocol violation (malformed layout, flooding,
/// session abuse).
pub const DELTA_PROTOCOL_VIOLATION: i8 = -5;

/// Tracks when each peer was last heard from.
pub struct HealthMonitor {
    last_heard_ms: HashMap<PeerId, u64>,
    timeout_ms: u64,
}

impl HealthMonitor {
    /// Create a monitor with the given silence timeout.
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            last_heard_ms: HashMap::new(),
            timeout_ms,
        }
    }

    /// Record traffic from a peer.
    pub fn record_heard(&mut self, peer: PeerId, now_ms: u64) {
        let entry = self.last_heard_ms.entry(peer).or_insert(now_ms);
        *entry = (*entry).max(now_ms);
    }

    /// Stop tracking a peer (link closed, peer deleted).
    pub fn forget(&mut self, peer: &PeerId) {
        self.last_heard_ms.remove(peer);
    }

    /// Peers silent beyond the timeout. Each is returned once; callers
    /// mark them disconnected and tracking stops until they speak again.
    pub fn take_silent(&mut self, now_ms: u64) -> Vec<PeerId> {
        let timeout = self.timeout_ms;
        let silent: Vec<PeerId> = self
            .last_heard_ms
            .iter()
            .filter(|(_, &heard)| now_ms.saturating_sub(heard) > timeout)
            .map(|(&peer, _)| peer)
            .collect();
        for peer in &silent {
            self.last_heard_ms.remove(peer);
        }
        silent
    }

    /// When the peer was last heard, if tracked.
    pub fn last_heard(&self, peer: &PeerId) -> Option<u64> {
        self.last_heard_ms.get(peer).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    #[test]
    fn test_fresh_peer_is_not_silent() {
        let mut monitor = HealthMonitor::new(1000);
        monitor.record_heard(pid(1), 5000);
        assert!(monitor.take_silent(5500).is_empty());
    }

    #[test]
    fn test_silent_peer_reported_once() {
        let mut monitor = HealthMonitor::new(1000);
        monitor.record_heard(pid(1), 0);
        let silent = monitor.take_silent(2000);
        assert_eq!(silent, vec![pid(1)]);
        assert!(monitor.take_silent(3000).is_empty());
    }

    #[test]
    fn test_heard_never_goes_backwards() {
        let mut monitor = HealthMonitor::new(1000);
        monitor.record_heard(pid(1), 5000);
        monitor.record_heard(pid(1), 4000);
        assert_eq!(monitor.last_heard(&pid(1)), Some(5000));
    }

    #[test]
    fn test_speaking_again_resumes_tracking() {
        let mut monitor = HealthMonitor::new(1000);
        monitor.record_heard(pid(1), 0);
        let _ = monitor.take_silent(2000);
        monitor.record_heard(pid(1), 3000);
        assert!(monitor.take_silent(3500).is_empty());
        assert_eq!(monitor.take_silent(5000), vec![pid(1)]);
    }
}
