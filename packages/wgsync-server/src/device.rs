use crate::{
    control::{parse_key, ControlPlane, DeviceUpdate},
    error::ServerError,
    paginate::paginate,
    store::{validate_device_name, ConfigStore},
    ServerResult,
};
use std::{collections::HashSet, sync::Arc};
use tracing::Span;
use wgsync_crypto::{gen_private_key, Key};
use wgsync_lib::types::{Device, DeviceRequest, Peer};
use wgsync_proto::{QuickAction, WgQuickConfig, WgTool};

/// Device view over the running interfaces and their wg-quick files.
pub struct DeviceService {
    control: Arc<dyn ControlPlane>,
    store: Arc<ConfigStore>,
    wg: WgTool,
    span: Span,
}

/// A device that only exists as a config file.
fn device_from_config(name: &str, config: &WgQuickConfig) -> Device {
    let mut device = Device::config_only(name);
    let iface = &config.interface;
    if !iface.private_key.is_empty() {
        device.private_key = Some(iface.private_key.clone());
        if let Ok(key) = Key::from_base64(&iface.private_key) {
            device.public_key = key.public_key().to_base64();
        }
    }
    device.listen_port = iface.listen_port;
    device.firewall_mark = iface.fwmark;
    device.peers_count = config.peers.len();
    config.apply_options(&mut device);
    device
}

/// Overlays the wg-quick options present in `req`.
fn apply_request_options(device: &mut Device, req: &DeviceRequest) {
    if let Some(addresses) = &req.addresses {
        device.addresses = addresses.clone();
    }
    if let Some(dns) = &req.dns {
        device.dns = dns.clone();
    }
    if let Some(mtu) = req.mtu {
        device.mtu = mtu;
    }
    if let Some(table) = &req.table {
        device.table = table.clone();
    }
    if let Some(pre_up) = &req.pre_up {
        device.pre_up = pre_up.clone();
    }
    if let Some(post_up) = &req.post_up {
        device.post_up = post_up.clone();
    }
    if let Some(pre_down) = &req.pre_down {
        device.pre_down = pre_down.clone();
    }
    if let Some(post_down) = &req.post_down {
        device.post_down = post_down.clone();
    }
}

impl DeviceService {
    pub fn new(control: Arc<dyn ControlPlane>, store: Arc<ConfigStore>, wg: WgTool) -> Self {
        Self {
            control,
            store,
            wg,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    async fn enrich(&self, device: &mut Device) {
        match self.store.load(&device.name).await {
            Ok(config) => config.apply_options(device),
            Err(ServerError::ConfigNotFound(_)) => {}
            Err(e) => {
                tracing::warn!(parent: &self.span, "Failed to read config for {}: {e}", device.name)
            }
        }
    }

    async fn persist(&self, device: &Device, peers: &[Peer]) {
        if let Err(e) = self.store.save(&device.name, device, peers).await {
            tracing::warn!(parent: &self.span, "Failed to save config for {}: {e}", device.name);
        }
    }

    /// Running devices first, then those that only have a config file.
    pub async fn list(&self, page: i64, per_page: i64) -> ServerResult<(Vec<Device>, usize)> {
        let mut devices = Vec::new();
        let mut running = HashSet::new();

        for live in self.control.devices().await? {
            running.insert(live.name.clone());
            let mut device = live.to_device();
            self.enrich(&mut device).await;
            devices.push(device);
        }

        for name in self.store.list().await {
            if running.contains(&name) {
                continue;
            }
            let device = match self.store.load(&name).await {
                Ok(config) => device_from_config(&name, &config),
                Err(e) => {
                    tracing::debug!(parent: &self.span, "Listing {name} without its config: {e}");
                    Device::config_only(&name)
                }
            };
            devices.push(device);
        }

        Ok(paginate(devices, page, per_page))
    }

    pub async fn get(&self, name: &str) -> ServerResult<Device> {
        validate_device_name(name)?;
        if let Some(live) = self.control.device(name).await? {
            let mut device = live.to_device();
            self.enrich(&mut device).await;
            return Ok(device);
        }

        match self.store.load(name).await {
            Ok(config) => Ok(device_from_config(name, &config)),
            Err(ServerError::ConfigNotFound(_)) => Err(ServerError::DeviceNotFound(name.to_string())),
            Err(e) => Err(e),
        }
    }

    pub async fn create(&self, req: DeviceRequest) -> ServerResult<Device> {
        let name = req
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ServerError::validation("name", "is required"))?;
        validate_device_name(&name)?;

        if self.control.device(&name).await?.is_some() || self.store.contains(&name).await? {
            return Err(ServerError::DeviceExists(name));
        }

        let private_key = match &req.private_key {
            Some(key) => parse_key("private_key", key)?,
            None => gen_private_key()?,
        };

        let update = DeviceUpdate {
            private_key: Some(private_key),
            listen_port: req.listen_port,
            fwmark: req.firewall_mark,
            peers: Vec::new(),
        };
        match self.control.configure(&name, update).await {
            Ok(()) => {}
            Err(ServerError::DeviceNotFound(_)) => {
                return self.create_config_only(&name, private_key, &req).await;
            }
            Err(e) => return Err(e),
        }

        let live = self
            .control
            .device(&name)
            .await?
            .ok_or_else(|| ServerError::DeviceNotFound(name.clone()))?;
        let mut device = live.to_device();
        apply_request_options(&mut device, &req);
        self.persist(&device, &live.to_peers()).await;

        tracing::info!(parent: &self.span, "Created device {name}.");
        Ok(device)
    }

    /// The control plane cannot create links, so the device starts life as
    /// a config file for `up` to bring online.
    async fn create_config_only(
        &self,
        name: &str,
        private_key: Key,
        req: &DeviceRequest,
    ) -> ServerResult<Device> {
        let mut device = Device::config_only(name);
        device.private_key = Some(private_key.to_base64());
        device.public_key = private_key.public_key().to_base64();
        device.listen_port = req.listen_port.unwrap_or_default();
        device.firewall_mark = req.firewall_mark.unwrap_or_default();
        apply_request_options(&mut device, req);

        self.store.save(name, &device, &[]).await?;
        tracing::info!(
            parent: &self.span,
            "Device {name} is not running; wrote its config. Bring it up with `wgsync up {name}`."
        );
        Ok(device)
    }

    /// Changes only what `req` supplies. wg-quick options not in `req` keep
    /// their stored values.
    pub async fn update(&self, name: &str, req: DeviceRequest) -> ServerResult<Device> {
        validate_device_name(name)?;
        if self.control.device(name).await?.is_none() {
            return Err(ServerError::DeviceNotFound(name.to_string()));
        }

        let update = DeviceUpdate {
            private_key: req
                .private_key
                .as_deref()
                .map(|k| parse_key("private_key", k))
                .transpose()?,
            listen_port: req.listen_port,
            fwmark: req.firewall_mark,
            peers: Vec::new(),
        };
        if !update.is_empty() {
            self.control.configure(name, update).await?;
        }

        let live = self
            .control
            .device(name)
            .await?
            .ok_or_else(|| ServerError::DeviceNotFound(name.to_string()))?;
        let mut device = live.to_device();
        self.enrich(&mut device).await;
        apply_request_options(&mut device, &req);
        self.persist(&device, &live.to_peers()).await;

        Ok(device)
    }

    pub async fn delete(&self, name: &str) -> ServerResult<()> {
        validate_device_name(name)?;
        let running = self.control.device(name).await?.is_some();
        if !running && !self.store.contains(name).await? {
            return Err(ServerError::DeviceNotFound(name.to_string()));
        }
        Err(ServerError::Unsupported(format!(
            "deleting {name} is not supported by the control plane; bring it down with `wgsync down {name}`"
        )))
    }

    pub async fn up(&self, name: &str) -> ServerResult<()> {
        validate_device_name(name)?;
        self.wg.quick(QuickAction::Up, name).await?;
        Ok(())
    }

    pub async fn down(&self, name: &str) -> ServerResult<()> {
        validate_device_name(name)?;
        self.wg.quick(QuickAction::Down, name).await?;
        Ok(())
    }

    /// `wg --version`, or `"unknown"`.
    pub async fn tool_version(&self) -> String {
        self.wg.version().await
    }
}
