//! Mesh engine configuration.

use serde::{Deserialize, Serialize};

use crate::{MeshError, Result};

/// Complete engine configuration with spec defaults.
///
/// Deserializable from the daemon's TOML config; every field has a default
/// so a partial file works.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Maximum peers tracked in the directory.
    pub max_peers: usize,
    /// Maximum encoded packet size in bytes.
    pub max_packet_bytes: usize,

    /// Gossip/heartbeat send interval, milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence beyond this marks a peer disconnected, milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Transport connect timeout, milliseconds.
    pub connection_timeout_ms: u64,

    /// Default TTL (hop budget) on sealed packets.
    pub ttl_default: u8,
    /// Size of the recent-message-ID dedup window.
    pub dedup_lru_size: usize,

    /// Maximum store-and-forward queue entries.
    pub queue_max_size: usize,
    /// Attempts before a queued message fails.
    pub queue_max_attempts: u32,
    /// Base retry backoff, milliseconds.
    pub queue_base_backoff_ms: u64,
    /// Backoff cap, milliseconds.
    pub queue_cap_backoff_ms: u64,
    /// Default time-to-live for queued messages, milliseconds.
    pub queue_entry_ttl_ms: u64,

    /// Messages before a session rekeys.
    pub session_max_messages: u64,
    /// Seconds before a session rekeys.
    pub session_max_age_sec: u64,
    /// Grace window in which the previous rotation still decrypts, seconds.
    pub session_accept_previous_grace_sec: u64,
    /// AEAD failures from one peer before the session resets.
    pub session_fail_threshold: u32,

    /// Outbound messages per destination per minute.
    pub rate_limit_per_minute: u32,
    /// Outbound messages per destination per hour.
    pub rate_limit_per_hour: u32,

    /// Gossip announcement interval, milliseconds (jittered).
    pub gossip_interval_ms: u64,
    /// Directory entry lifetime without refresh, milliseconds.
    pub gossip_entry_ttl_ms: u64,
    /// Maximum reachability entries per announcement.
    pub gossip_max_entries: usize,

    /// Transport buffered-bytes level above which non-critical sends defer.
    pub send_high_water_bytes: usize,
    /// Level below which deferred sending resumes.
    pub send_low_water_bytes: usize,
    /// How far past the high-water mark critical packets may push.
    pub critical_overshoot_bytes: usize,

    /// Optional rendezvous service URL for signaling.
    pub signaling_url: Option<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_peers: 50,
            max_packet_bytes: 64 * 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            connection_timeout_ms: 30_000,
            ttl_default: 8,
            dedup_lru_size: 8192,
            queue_max_size: 1000,
            queue_max_attempts: 10,
            queue_base_backoff_ms: 1_000,
            queue_cap_backoff_ms: 60_000,
            queue_entry_ttl_ms: 24 * 60 * 60 * 1000,
            session_max_messages: 10_000,
            session_max_age_sec: 24 * 60 * 60,
            session_accept_previous_grace_sec: 120,
            session_fail_threshold: 5,
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 1000,
            gossip_interval_ms: 30_000,
            gossip_entry_ttl_ms: 15 * 60 * 1000,
            gossip_max_entries: 32,
            send_high_water_bytes: 1024 * 1024,
            send_low_water_bytes: 256 * 1024,
            critical_overshoot_bytes: 64 * 1024,
            signaling_url: None,
        }
    }
}

impl MeshConfig {
    /// Validate invariants between knobs. Called by `MeshNode::start`;
    /// failure aborts startup.
    pub fn validate(&self) -> Result<()> {
        if self.max_packet_bytes < weft_wire::packet::MIN_PACKET_LEN {
            return Err(MeshError::InvalidConfig(format!(
                "max_packet_bytes {} below minimum packet size",
                self.max_packet_bytes
            )));
        }
        if self.max_packet_bytes > u16::MAX as usize + weft_wire::packet::MIN_PACKET_LEN {
            return Err(MeshError::InvalidConfig(
                "max_packet_bytes exceeds the u16 payload-length field".into(),
            ));
        }
        if self.ttl_default == 0 {
            return Err(MeshError::InvalidConfig("ttl_default must be >= 1".into()));
        }
        if self.dedup_lru_size == 0 {
            return Err(MeshError::InvalidConfig("dedup_lru_size must be >= 1".into()));
        }
        if self.queue_max_size == 0 {
            return Err(MeshError::InvalidConfig("queue_max_size must be >= 1".into()));
        }
        if self.queue_base_backoff_ms == 0
            || self.queue_cap_backoff_ms < self.queue_base_backoff_ms
        {
            return Err(MeshError::InvalidConfig(
                "queue backoff cap must be >= base and base >= 1".into(),
            ));
        }
        if self.send_low_water_bytes >= self.send_high_water_bytes {
            return Err(MeshError::InvalidConfig(
                "send_low_water_bytes must be below send_high_water_bytes".into(),
            ));
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(MeshError::InvalidConfig(
                "heartbeat_timeout_ms must exceed heartbeat_interval_ms".into(),
            ));
        }
        if self.rate_limit_per_minute == 0 || self.rate_limit_per_hour == 0 {
            return Err(MeshError::InvalidConfig("rate limits must be >= 1".into()));
        }
        Ok(())
    }

    /// Largest payload a packet can carry under `max_packet_bytes`.
    pub fn max_payload_bytes(&self) -> usize {
        self.max_packet_bytes - weft_wire::packet::MIN_PACKET_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        MeshConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn test_spec_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.max_peers, 50);
        assert_eq!(config.max_packet_bytes, 64 * 1024);
        assert_eq!(config.ttl_default, 8);
        assert_eq!(config.dedup_lru_size, 8192);
        assert_eq!(config.queue_max_size, 1000);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert_eq!(config.rate_limit_per_hour, 1000);
        assert_eq!(config.gossip_entry_ttl_ms, 15 * 60 * 1000);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = MeshConfig {
            ttl_default: 0,
            ..MeshConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_watermarks_rejected() {
        let config = MeshConfig {
            send_low_water_bytes: 2048,
            send_high_water_bytes: 1024,
            ..MeshConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_must_exceed_interval() {
        let config = MeshConfig {
            heartbeat_interval_ms: 60_000,
            heartbeat_timeout_ms: 30_000,
            ..MeshConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MeshConfig =
            serde_json::from_str(r#"{"ttl_default": 4}"#).expect("parse");
        assert_eq!(config.ttl_default, 4);
        assert_eq!(config.max_peers, 50);
    }
}
