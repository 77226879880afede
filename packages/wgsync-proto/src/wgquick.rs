//! Reading and writing wg-quick(8) configuration files.
//!
//! Parsing is deliberately forgiving: unknown keys are skipped and numeric
//! values that do not parse leave the field at zero, so a file written by a
//! newer wg-quick never makes the whole device unreadable.

use std::fmt;
use wgsync_lib::types::{Device, Peer};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgQuickInterface {
    pub private_key: String,
    pub listen_port: u16,
    pub fwmark: u32,
    pub addresses: Vec<String>,
    pub dns: Vec<String>,
    pub mtu: u32,
    pub table: String,
    pub pre_up: Vec<String>,
    pub post_up: Vec<String>,
    pub pre_down: Vec<String>,
    pub post_down: Vec<String>,
    pub save_config: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgQuickPeer {
    pub public_key: String,
    pub preshared_key: String,
    pub allowed_ips: Vec<String>,
    pub endpoint: String,
    /// Seconds; `0` disables keepalives.
    pub persistent_keepalive: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgQuickConfig {
    pub interface: WgQuickInterface,
    pub peers: Vec<WgQuickPeer>,
}

enum Section {
    Interface,
    Peer,
}

impl WgQuickConfig {
    pub fn parse(content: &str) -> Self {
        let mut config = Self::default();
        let mut section = Section::Interface;

        for line in content.lines() {
            config.parse_line(line, &mut section);
        }

        config
    }

    fn parse_line(&mut self, line: &str, section: &mut Section) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return;
        }

        match line {
            "[Interface]" => {
                *section = Section::Interface;
                return;
            }
            "[Peer]" => {
                self.peers.push(WgQuickPeer::default());
                *section = Section::Peer;
                return;
            }
            _ => {}
        }

        let Some((key, value)) = line.split_once('=') else {
            return;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match section {
            Section::Peer => {
                if let Some(peer) = self.peers.last_mut() {
                    peer.set(&key, value);
                }
            }
            Section::Interface => self.interface.set(&key, value),
        }
    }

    /// Builds the on-disk form of a device and its peers. Peer order is kept.
    pub fn from_device(device: &Device, peers: &[Peer]) -> Self {
        let interface = WgQuickInterface {
            private_key: device.private_key.clone().unwrap_or_default(),
            listen_port: device.listen_port,
            fwmark: device.firewall_mark,
            addresses: device.addresses.clone(),
            dns: device.dns.clone(),
            mtu: device.mtu,
            table: device.table.clone(),
            pre_up: device.pre_up.clone(),
            post_up: device.post_up.clone(),
            pre_down: device.pre_down.clone(),
            post_down: device.post_down.clone(),
            save_config: false,
        };

        let peers = peers
            .iter()
            .map(|p| WgQuickPeer {
                public_key: p.public_key.clone(),
                preshared_key: p.preshared_key.clone().unwrap_or_default(),
                allowed_ips: p.allowed_ips.clone(),
                endpoint: p.endpoint.clone().unwrap_or_default(),
                persistent_keepalive: u16::try_from(
                    p.persistent_keepalive_interval.as_secs(),
                )
                .unwrap_or(u16::MAX),
            })
            .collect();

        Self { interface, peers }
    }

    /// Copies the wg-quick-only interface options onto `device`. Keys, ports
    /// and counters come from the live state and are left alone.
    pub fn apply_options(&self, device: &mut Device) {
        let i = &self.interface;
        device.addresses = i.addresses.clone();
        device.dns = i.dns.clone();
        device.mtu = i.mtu;
        device.table = i.table.clone();
        device.pre_up = i.pre_up.clone();
        device.post_up = i.post_up.clone();
        device.pre_down = i.pre_down.clone();
        device.post_down = i.post_down.clone();
    }
}

impl WgQuickInterface {
    fn set(&mut self, key: &str, value: &str) {
        match key {
            "privatekey" => self.private_key = value.to_string(),
            "listenport" => self.listen_port = value.parse().unwrap_or_default(),
            "fwmark" => self.fwmark = parse_fwmark(value),
            "address" => self.addresses.extend(split_list(value)),
            "dns" => self.dns.extend(split_list(value)),
            "mtu" => self.mtu = value.parse().unwrap_or_default(),
            "table" => self.table = value.to_string(),
            "preup" => self.pre_up.push(value.to_string()),
            "postup" => self.post_up.push(value.to_string()),
            "predown" => self.pre_down.push(value.to_string()),
            "postdown" => self.post_down.push(value.to_string()),
            "saveconfig" => self.save_config = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }
}

impl WgQuickPeer {
    fn set(&mut self, key: &str, value: &str) {
        match key {
            "publickey" => self.public_key = value.to_string(),
            "presharedkey" => self.preshared_key = value.to_string(),
            "allowedips" => self.allowed_ips.extend(split_list(value)),
            "endpoint" => self.endpoint = value.to_string(),
            "persistentkeepalive" => {
                self.persistent_keepalive = value.parse().unwrap_or_default()
            }
            _ => {}
        }
    }
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// wg(8) accepts decimal, 0x-prefixed hex, or `off`.
fn parse_fwmark(value: &str) -> u32 {
    if value.eq_ignore_ascii_case("off") {
        return 0;
    }
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).unwrap_or_default(),
        None => value.parse().unwrap_or_default(),
    }
}

impl fmt::Display for WgQuickConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let i = &self.interface;

        writeln!(f, "[Interface]")?;
        if !i.private_key.is_empty() {
            writeln!(f, "PrivateKey = {}", i.private_key)?;
        }
        if i.listen_port > 0 {
            writeln!(f, "ListenPort = {}", i.listen_port)?;
        }
        if i.fwmark > 0 {
            writeln!(f, "FwMark = {}", i.fwmark)?;
        }
        if !i.addresses.is_empty() {
            writeln!(f, "Address = {}", i.addresses.join(", "))?;
        }
        if !i.dns.is_empty() {
            writeln!(f, "DNS = {}", i.dns.join(", "))?;
        }
        if i.mtu > 0 {
            writeln!(f, "MTU = {}", i.mtu)?;
        }
        if !i.table.is_empty() {
            writeln!(f, "Table = {}", i.table)?;
        }
        for cmd in &i.pre_up {
            writeln!(f, "PreUp = {cmd}")?;
        }
        for cmd in &i.post_up {
            writeln!(f, "PostUp = {cmd}")?;
        }
        for cmd in &i.pre_down {
            writeln!(f, "PreDown = {cmd}")?;
        }
        for cmd in &i.post_down {
            writeln!(f, "PostDown = {cmd}")?;
        }
        if i.save_config {
            writeln!(f, "SaveConfig = true")?;
        }

        for p in &self.peers {
            writeln!(f)?;
            writeln!(f, "[Peer]")?;
            if !p.public_key.is_empty() {
                writeln!(f, "PublicKey = {}", p.public_key)?;
            }
            if !p.preshared_key.is_empty() {
                writeln!(f, "PresharedKey = {}", p.preshared_key)?;
            }
            if !p.allowed_ips.is_empty() {
                writeln!(f, "AllowedIPs = {}", p.allowed_ips.join(", "))?;
            }
            if !p.endpoint.is_empty() {
                writeln!(f, "Endpoint = {}", p.endpoint)?;
            }
            if p.persistent_keepalive > 0 {
                writeln!(f, "PersistentKeepalive = {}", p.persistent_keepalive)?;
            }
        }

        Ok(())
    }
}
