use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

pub mod request;

pub use request::{DeviceRequest, PeerRequest};

/// A WireGuard interface as presented to callers.
///
/// Numeric and string fields use their zero value for "unset", the same
/// convention the wg-quick files use: a `listen_port` of `0` means the
/// kernel picks one, an empty `table` means wg-quick's default.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub listen_port: u16,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub firewall_mark: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub mtu: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub table: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_up: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_up: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_down: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_down: Vec<String>,

    pub running: bool,
    pub peers_count: usize,
    pub total_receive_bytes: u64,
    pub total_transmit_bytes: u64,
}

impl Device {
    /// Skeleton for a device that only exists on disk.
    pub fn config_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: false,
            ..Default::default()
        }
    }

    pub fn with_peer_stats(mut self, peers: &[Peer]) -> Self {
        self.peers_count = peers.len();
        self.total_receive_bytes = peers.iter().map(|p| p.receive_bytes).sum();
        self.total_transmit_bytes = peers.iter().map(|p| p.transmit_bytes).sum();
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Peer {
    pub public_key: String,
    pub url_safe_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,
    pub allowed_ips: Vec<String>,
    #[serde(default, with = "humantime_serde")]
    pub last_handshake_time: Option<SystemTime>,
    #[serde(default, with = "humantime_serde")]
    pub persistent_keepalive_interval: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub receive_bytes: u64,
    pub transmit_bytes: u64,
}

impl Peer {
    pub fn total_bytes(&self) -> u64 {
        self.receive_bytes.saturating_add(self.transmit_bytes)
    }
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(rx: u64, tx: u64) -> Peer {
        Peer {
            receive_bytes: rx,
            transmit_bytes: tx,
            ..Default::default()
        }
    }

    #[test]
    fn test_device_peer_stats_are_aggregated() {
        let device =
            Device::config_only("wg0").with_peer_stats(&[peer(10, 1), peer(5, 2)]);
        assert_eq!(device.peers_count, 2);
        assert_eq!(device.total_receive_bytes, 15);
        assert_eq!(device.total_transmit_bytes, 3);
        assert!(!device.running);
    }

    #[test]
    fn test_peer_json_uses_readable_times() {
        let p = Peer {
            public_key: "pk".to_string(),
            persistent_keepalive_interval: Duration::from_secs(25),
            last_handshake_time: Some(
                SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            ),
            ..Default::default()
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["persistent_keepalive_interval"], "25s");
        assert_eq!(json["last_handshake_time"], "2023-11-14T22:13:20Z");
        assert!(json.get("private_key").is_none());

        let back: Peer = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_peer_json_unset_times() {
        let p = Peer {
            public_key: "pk".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["persistent_keepalive_interval"], "0s");
        assert!(json["last_handshake_time"].is_null());

        let back: Peer = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }
}
