use crate::{
    control::{parse_key, ControlPlane, DeviceUpdate, LiveDevice, PeerUpdate},
    dump::Snapshotter,
    error::ServerError,
    paginate::paginate,
    secret::SecretStore,
    store::validate_device_name,
    ServerResult,
};
use ip_network::IpNetwork;
use std::{
    cmp::Ordering,
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use strum::{AsRefStr, EnumString};
use tracing::Span;
use wgsync_crypto::{gen_keypair, Key};
use wgsync_lib::types::{Peer, PeerRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SortField {
    PubKey,
    ReceiveBytes,
    TransmitBytes,
    TotalBytes,
    LastHandshakeTime,
}

impl SortField {
    fn compare(&self, a: &Peer, b: &Peer) -> Ordering {
        match self {
            SortField::PubKey => a.public_key.cmp(&b.public_key),
            SortField::ReceiveBytes => a.receive_bytes.cmp(&b.receive_bytes),
            SortField::TransmitBytes => a.transmit_bytes.cmp(&b.transmit_bytes),
            SortField::TotalBytes => a.total_bytes().cmp(&b.total_bytes()),
            SortField::LastHandshakeTime => a.last_handshake_time.cmp(&b.last_handshake_time),
        }
    }
}

/// A sort key such as `receive_bytes` or `-last_handshake_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSort {
    pub field: SortField,
    pub descending: bool,
}

impl PeerSort {
    /// `None` for an empty or unknown field.
    pub fn lenient(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    pub fn sort(&self, peers: &mut [Peer]) {
        peers.sort_by(|a, b| {
            let ord = self.field.compare(a, b);
            if self.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }
}

impl FromStr for PeerSort {
    type Err = ServerError;
    fn from_str(s: &str) -> ServerResult<Self> {
        let (descending, field) = match s.strip_prefix('-') {
            Some(field) => (true, field),
            None => (false, s),
        };
        let field = SortField::from_str(field)
            .map_err(|_| ServerError::validation("sort", format!("unknown sort field {field:?}")))?;
        Ok(Self { field, descending })
    }
}

/// Sorts in place; an empty or unrecognized `sort` keeps the input order.
pub fn sort_peers(peers: &mut [Peer], sort: &str) {
    if let Some(sort) = PeerSort::lenient(sort) {
        sort.sort(peers);
    }
}

/// Keeps peers whose public key, endpoint or any allowed IP contains
/// `query`, ignoring case.
pub fn filter_peers(peers: Vec<Peer>, query: &str) -> Vec<Peer> {
    if query.is_empty() {
        return peers;
    }
    let query = query.to_lowercase();
    let matches = |s: &str| s.to_lowercase().contains(&query);
    peers
        .into_iter()
        .filter(|p| {
            matches(&p.public_key)
                || p.endpoint.as_deref().map(matches).unwrap_or(false)
                || p.allowed_ips.iter().any(|ip| matches(ip))
        })
        .collect()
}

/// Decodes a peer reference taken from a URL. URL-safe and standard
/// base64 are both accepted.
pub fn parse_peer_ref(s: &str) -> ServerResult<Key> {
    Key::from_url_safe(s).map_err(|e| ServerError::validation("public_key", e))
}

/// Parses `addr/prefix`, dropping host bits the way `wg(8)` does.
fn parse_cidr(s: &str) -> ServerResult<IpNetwork> {
    let invalid = || ServerError::validation("allowed_ips", format!("{s:?} is not a CIDR"));
    let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    IpNetwork::new_truncate(addr, prefix).map_err(|_| invalid())
}

fn parse_keepalive(s: &str) -> ServerResult<Duration> {
    let field = "persistent_keepalive_interval";
    let interval = humantime::parse_duration(s.trim())
        .map_err(|e| ServerError::validation(field, format!("{s:?}: {e}")))?;
    if interval.as_secs() > u64::from(u16::MAX) {
        return Err(ServerError::validation(
            field,
            format!("{s:?} exceeds {} seconds", u16::MAX),
        ));
    }
    Ok(interval)
}

async fn resolve_endpoint(s: &str) -> ServerResult<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let invalid = |reason: String| ServerError::validation("endpoint", format!("{s:?}: {reason}"));
    tokio::net::lookup_host(s)
        .await
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("no addresses".to_string()))
}

/// Peer view over the running interfaces.
pub struct PeerService {
    control: Arc<dyn ControlPlane>,
    secrets: Arc<dyn SecretStore>,
    snapshotter: Snapshotter,
    span: Span,
}

impl PeerService {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        secrets: Arc<dyn SecretStore>,
        snapshotter: Snapshotter,
    ) -> Self {
        Self {
            control,
            secrets,
            snapshotter,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    async fn live_device(&self, device: &str) -> ServerResult<LiveDevice> {
        validate_device_name(device)?;
        self.control
            .device(device)
            .await?
            .ok_or_else(|| ServerError::DeviceNotFound(device.to_string()))
    }

    async fn find_peer(&self, device: &str, key: &Key) -> ServerResult<Peer> {
        let live = self.live_device(device).await?;
        let mut peer = live
            .peer(key)
            .ok_or_else(|| ServerError::PeerNotFound(key.to_base64()))?
            .to_peer();
        match self.secrets.read(key).await {
            Ok(private_key) => peer.private_key = private_key,
            Err(e) => {
                tracing::warn!(parent: &self.span, "Failed to read private key of peer {key}: {e}")
            }
        }
        Ok(peer)
    }

    async fn snapshot(&self, device: &str) {
        if let Err(e) = self.snapshotter.snapshot(device).await {
            tracing::warn!(parent: &self.span, "Failed to save config for {device}: {e}");
        }
    }

    async fn apply(&self, device: &str, update: PeerUpdate) -> ServerResult<()> {
        let update = DeviceUpdate {
            peers: vec![update],
            ..Default::default()
        };
        self.control.configure(device, update).await
    }

    pub async fn list(
        &self,
        device: &str,
        page: i64,
        per_page: i64,
        query: &str,
        sort: &str,
    ) -> ServerResult<(Vec<Peer>, usize)> {
        let live = self.live_device(device).await?;
        let mut peers = filter_peers(live.to_peers(), query);
        sort_peers(&mut peers, sort);
        Ok(paginate(peers, page, per_page))
    }

    pub async fn get(&self, device: &str, peer_ref: &str) -> ServerResult<Peer> {
        let key = parse_peer_ref(peer_ref)?;
        self.find_peer(device, &key).await
    }

    /// Adds a peer. Without keys in `req` a key pair is generated and the
    /// private half kept in the secret store.
    pub async fn create(&self, device: &str, req: PeerRequest) -> ServerResult<Peer> {
        let live = self.live_device(device).await?;
        let (public_key, private_key) = peer_keys(&req)?;
        if live.peer(&public_key).is_some() {
            return Err(ServerError::PeerExists(public_key.to_base64()));
        }

        let mut update = PeerUpdate::new(public_key);
        update.replace_allowed_ips = true;
        fill_update(&mut update, &req).await?;
        self.apply(device, update).await?;

        if let Some(private_key) = &private_key {
            if let Err(e) = self.secrets.write(&public_key, &private_key.to_base64()).await {
                tracing::warn!(parent: &self.span, "Failed to store private key of peer {public_key}: {e}");
            }
        }
        self.snapshot(device).await;
        tracing::info!(parent: &self.span, "Added peer {public_key} to {device}.");

        let mut peer = self.find_peer(device, &public_key).await?;
        if let Some(private_key) = private_key {
            peer.private_key = Some(private_key.to_base64());
        }
        Ok(peer)
    }

    /// Changes only what `req` supplies; allowed IPs, when given, replace
    /// the current list.
    pub async fn update(&self, device: &str, peer_ref: &str, req: PeerRequest) -> ServerResult<Peer> {
        let key = parse_peer_ref(peer_ref)?;
        let live = self.live_device(device).await?;
        if live.peer(&key).is_none() {
            return Err(ServerError::PeerNotFound(key.to_base64()));
        }

        let mut update = PeerUpdate::new(key);
        update.update_only = true;
        fill_update(&mut update, &req).await?;
        self.apply(device, update).await?;
        self.snapshot(device).await;

        self.find_peer(device, &key).await
    }

    /// Removes a peer and returns it as it was.
    pub async fn delete(&self, device: &str, peer_ref: &str) -> ServerResult<Peer> {
        let key = parse_peer_ref(peer_ref)?;
        let peer = self.find_peer(device, &key).await?;

        self.apply(device, PeerUpdate::remove(key)).await?;
        if let Err(e) = self.secrets.remove(&key).await {
            tracing::warn!(parent: &self.span, "Failed to remove private key of peer {key}: {e}");
        }
        self.snapshot(device).await;
        tracing::info!(parent: &self.span, "Removed peer {key} from {device}.");

        Ok(peer)
    }
}

fn peer_keys(req: &PeerRequest) -> ServerResult<(Key, Option<Key>)> {
    let private_key = req
        .private_key
        .as_deref()
        .map(|k| parse_key("private_key", k))
        .transpose()?;
    let public_key = req
        .public_key
        .as_deref()
        .map(|k| parse_key("public_key", k))
        .transpose()?;

    match (public_key, private_key) {
        (Some(public_key), Some(private_key)) => {
            if private_key.public_key() != public_key {
                return Err(ServerError::validation(
                    "private_key",
                    "does not belong to public_key",
                ));
            }
            Ok((public_key, Some(private_key)))
        }
        (Some(public_key), None) => Ok((public_key, None)),
        (None, Some(private_key)) => Ok((private_key.public_key(), Some(private_key))),
        (None, None) => {
            let pair = gen_keypair()?;
            Ok((*pair.pubkey(), Some(*pair.privkey())))
        }
    }
}

async fn fill_update(update: &mut PeerUpdate, req: &PeerRequest) -> ServerResult<()> {
    if let Some(psk) = &req.preshared_key {
        update.preshared_key = Some(if psk.is_empty() {
            Key::default()
        } else {
            parse_key("preshared_key", psk)?
        });
    }
    if let Some(ips) = &req.allowed_ips {
        update.replace_allowed_ips = true;
        update.allowed_ips = ips
            .iter()
            .map(|ip| parse_cidr(ip))
            .collect::<ServerResult<Vec<_>>>()?;
    }
    if let Some(keepalive) = &req.persistent_keepalive_interval {
        update.persistent_keepalive = Some(parse_keepalive(keepalive)?);
    }
    if let Some(endpoint) = req.endpoint.as_deref().filter(|e| !e.is_empty()) {
        update.endpoint = Some(resolve_endpoint(endpoint).await?);
    }
    Ok(())
}
