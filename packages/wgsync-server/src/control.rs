use crate::{error::ServerError, ServerResult};
use async_trait::async_trait;
use ip_network::IpNetwork;
use std::{
    net::SocketAddr,
    sync::RwLock,
    time::{Duration, SystemTime},
};
use wgsync_crypto::Key;
use wgsync_lib::types::{Device, Peer};

/// Decodes a standard base64 key supplied for `field`.
pub(crate) fn parse_key(field: &'static str, value: &str) -> ServerResult<Key> {
    Key::from_base64(value).map_err(|e| ServerError::validation(field, e))
}

/// Kernel-side state of a running interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveDevice {
    pub name: String,
    pub private_key: Key,
    pub public_key: Key,
    pub listen_port: u16,
    pub fwmark: u32,
    pub peers: Vec<LivePeer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivePeer {
    pub public_key: Key,
    pub preshared_key: Option<Key>,
    pub endpoint: Option<SocketAddr>,
    pub persistent_keepalive: Duration,
    pub last_handshake: Option<SystemTime>,
    pub receive_bytes: u64,
    pub transmit_bytes: u64,
    pub allowed_ips: Vec<IpNetwork>,
}

impl LiveDevice {
    pub fn peer(&self, public_key: &Key) -> Option<&LivePeer> {
        self.peers.iter().find(|p| p.public_key == *public_key)
    }

    pub fn to_peers(&self) -> Vec<Peer> {
        self.peers.iter().map(LivePeer::to_peer).collect()
    }

    pub fn to_device(&self) -> Device {
        let private_key = (!self.private_key.is_zero()).then(|| self.private_key.to_base64());
        let public_key = if self.public_key.is_zero() {
            String::new()
        } else {
            self.public_key.to_base64()
        };

        Device {
            name: self.name.clone(),
            listen_port: self.listen_port,
            public_key,
            private_key,
            firewall_mark: self.fwmark,
            running: true,
            ..Default::default()
        }
        .with_peer_stats(&self.to_peers())
    }
}

impl LivePeer {
    pub fn new(public_key: Key) -> Self {
        Self {
            public_key,
            ..Default::default()
        }
    }

    pub fn to_peer(&self) -> Peer {
        Peer {
            public_key: self.public_key.to_base64(),
            url_safe_public_key: self.public_key.to_url_safe(),
            private_key: None,
            preshared_key: self.preshared_key.map(|k| k.to_base64()),
            allowed_ips: self.allowed_ips.iter().map(ToString::to_string).collect(),
            last_handshake_time: self.last_handshake,
            persistent_keepalive_interval: self.persistent_keepalive,
            endpoint: self.endpoint.map(|e| e.to_string()),
            receive_bytes: self.receive_bytes,
            transmit_bytes: self.transmit_bytes,
        }
    }
}

/// A change to apply to a running interface. `None` fields are left as
/// they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceUpdate {
    pub private_key: Option<Key>,
    pub listen_port: Option<u16>,
    pub fwmark: Option<u32>,
    pub peers: Vec<PeerUpdate>,
}

impl DeviceUpdate {
    pub fn is_empty(&self) -> bool {
        self.private_key.is_none()
            && self.listen_port.is_none()
            && self.fwmark.is_none()
            && self.peers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerUpdate {
    pub public_key: Key,
    pub remove: bool,
    /// Fail instead of creating the peer when it is not configured yet.
    pub update_only: bool,
    /// A zero key clears the preshared key.
    pub preshared_key: Option<Key>,
    pub endpoint: Option<SocketAddr>,
    pub persistent_keepalive: Option<Duration>,
    /// Replace the peer's allowed IPs instead of appending to them.
    pub replace_allowed_ips: bool,
    pub allowed_ips: Vec<IpNetwork>,
}

impl PeerUpdate {
    pub fn new(public_key: Key) -> Self {
        Self {
            public_key,
            remove: false,
            update_only: false,
            preshared_key: None,
            endpoint: None,
            persistent_keepalive: None,
            replace_allowed_ips: false,
            allowed_ips: Vec::new(),
        }
    }

    pub fn remove(public_key: Key) -> Self {
        Self {
            remove: true,
            ..Self::new(public_key)
        }
    }

    fn apply(&self, peer: &mut LivePeer) {
        if let Some(psk) = self.preshared_key {
            peer.preshared_key = (!psk.is_zero()).then_some(psk);
        }
        if let Some(endpoint) = self.endpoint {
            peer.endpoint = Some(endpoint);
        }
        if let Some(keepalive) = self.persistent_keepalive {
            peer.persistent_keepalive = keepalive;
        }
        if self.replace_allowed_ips {
            peer.allowed_ips.clear();
        }
        for ip in &self.allowed_ips {
            if !peer.allowed_ips.contains(ip) {
                peer.allowed_ips.push(*ip);
            }
        }
    }
}

/// Read and configure running WireGuard interfaces.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Running devices in the order the kernel reports them.
    async fn devices(&self) -> ServerResult<Vec<LiveDevice>>;

    /// `Ok(None)` when no interface called `name` is running.
    async fn device(&self, name: &str) -> ServerResult<Option<LiveDevice>>;

    /// Fails with [`ServerError::DeviceNotFound`] when the backend has no
    /// interface called `name` and cannot bring one into existence.
    async fn configure(&self, name: &str, update: DeviceUpdate) -> ServerResult<()>;
}

/// Control plane kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryControlPlane {
    devices: RwLock<Vec<LiveDevice>>,
    auto_create: bool,
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `configure` create missing devices instead of failing.
    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    pub fn add_device(&self, device: LiveDevice) {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        devices.retain(|d| d.name != device.name);
        devices.push(device);
    }

    pub fn remove_device(&self, name: &str) -> Option<LiveDevice> {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        let idx = devices.iter().position(|d| d.name == name)?;
        Some(devices.remove(idx))
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn devices(&self) -> ServerResult<Vec<LiveDevice>> {
        Ok(self.devices.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn device(&self, name: &str) -> ServerResult<Option<LiveDevice>> {
        Ok(self
            .devices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|d| d.name == name)
            .cloned())
    }

    async fn configure(&self, name: &str, update: DeviceUpdate) -> ServerResult<()> {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        let idx = match devices.iter().position(|d| d.name == name) {
            Some(idx) => idx,
            None if self.auto_create => {
                devices.push(LiveDevice {
                    name: name.to_string(),
                    ..Default::default()
                });
                devices.len() - 1
            }
            None => return Err(ServerError::DeviceNotFound(name.to_string())),
        };

        // Validate everything first so a failed update changes nothing.
        let device = &devices[idx];
        for p in &update.peers {
            if p.update_only && !p.remove && device.peer(&p.public_key).is_none() {
                return Err(ServerError::PeerNotFound(p.public_key.to_base64()));
            }
        }

        let device = &mut devices[idx];
        if let Some(key) = update.private_key {
            device.private_key = key;
            device.public_key = key.public_key();
        }
        if let Some(port) = update.listen_port {
            device.listen_port = port;
        }
        if let Some(fwmark) = update.fwmark {
            device.fwmark = fwmark;
        }

        for p in &update.peers {
            let existing = device.peers.iter().position(|lp| lp.public_key == p.public_key);
            match (existing, p.remove) {
                (Some(i), true) => {
                    device.peers.remove(i);
                }
                (None, true) => {}
                (Some(i), false) => p.apply(&mut device.peers[i]),
                (None, false) => {
                    let mut peer = LivePeer::new(p.public_key);
                    p.apply(&mut peer);
                    device.peers.push(peer);
                }
            }
        }

        Ok(())
    }
}
