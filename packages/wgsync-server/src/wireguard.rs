use crate::{
    control::{ControlPlane, DeviceUpdate, LiveDevice, LivePeer, PeerUpdate},
    error::ServerError,
    ServerResult,
};
use async_trait::async_trait;
use ip_network::IpNetwork;
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::Span;
use wgsync_crypto::Key;
use wgsync_proto::{CommandOutput, CommandRunner, CommandSpec, ProtoError};

const NONE: &str = "(none)";
const NO_DEVICE_MARKERS: &[&str] = &["No such device", "does not exist"];
const NAME_MAP_DIR: &str = "/var/run/wireguard";

/// Control plane backed by the `wg` tool. Every call spawns a fresh process,
/// so nothing is held open between operations.
pub struct WgControlPlane {
    runner: Arc<dyn CommandRunner>,
    name_dir: Option<PathBuf>,
    span: Span,
}

impl WgControlPlane {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        // wg-quick on macOS and FreeBSD runs wg0 as utunN and records the
        // mapping in /var/run/wireguard/wg0.name.
        let name_dir = cfg!(any(target_os = "macos", target_os = "freebsd"))
            .then(|| PathBuf::from(NAME_MAP_DIR));
        Self {
            runner,
            name_dir,
            span: Span::none(),
        }
    }

    pub fn with_name_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.name_dir = dir;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    async fn interface_name(&self, name: &str) -> String {
        let Some(dir) = &self.name_dir else {
            return name.to_string();
        };
        match tokio::fs::read_to_string(dir.join(format!("{name}.name"))).await {
            Ok(real) if !real.trim().is_empty() => real.trim().to_string(),
            _ => name.to_string(),
        }
    }

    async fn wg(&self, spec: CommandSpec) -> ServerResult<CommandOutput> {
        let tool = format!("wg {}", spec.args.first().map(String::as_str).unwrap_or(""));
        let output = self.runner.run(spec).await?;
        if output.success() {
            return Ok(output);
        }
        Err(ProtoError::ToolFailed {
            tool,
            code: output.code,
            message: output.message(),
        }
        .into())
    }
}

#[async_trait]
impl ControlPlane for WgControlPlane {
    async fn devices(&self) -> ServerResult<Vec<LiveDevice>> {
        let output = self
            .wg(CommandSpec::new("wg").args(["show", "all", "dump"]))
            .await?;
        parse_all_dump(&output.stdout_lossy())
    }

    async fn device(&self, name: &str) -> ServerResult<Option<LiveDevice>> {
        let real = self.interface_name(name).await;
        let spec = CommandSpec::new("wg").args(["show", real.as_str(), "dump"]);
        match self.wg(spec).await {
            Ok(output) => parse_dump(name, &output.stdout_lossy()).map(Some),
            Err(ServerError::Proto(ProtoError::ToolFailed { message, .. }))
                if NO_DEVICE_MARKERS.iter().any(|m| message.contains(m)) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn configure(&self, name: &str, update: DeviceUpdate) -> ServerResult<()> {
        let live = self
            .device(name)
            .await?
            .ok_or_else(|| ServerError::DeviceNotFound(name.to_string()))?;
        let real = self.interface_name(name).await;

        for spec in set_commands(&real, &live, &update)? {
            tracing::debug!(parent: &self.span, "Configuring {name}: `{}`", spec.display());
            self.wg(spec).await?;
        }
        Ok(())
    }
}

/// `wg set` invocations for `update`. Each carries at most one key on stdin.
pub(crate) fn set_commands(
    iface: &str,
    live: &LiveDevice,
    update: &DeviceUpdate,
) -> ServerResult<Vec<CommandSpec>> {
    for p in &update.peers {
        if p.update_only && !p.remove && live.peer(&p.public_key).is_none() {
            return Err(ServerError::PeerNotFound(p.public_key.to_base64()));
        }
    }

    let mut specs = Vec::new();
    let base = || CommandSpec::new("wg").args(["set", iface]);

    if update.private_key.is_some() || update.listen_port.is_some() || update.fwmark.is_some() {
        let mut spec = base();
        if let Some(port) = update.listen_port {
            spec = spec.args(["listen-port".to_string(), port.to_string()]);
        }
        if let Some(fwmark) = update.fwmark {
            let value = if fwmark == 0 {
                "off".to_string()
            } else {
                fwmark.to_string()
            };
            spec = spec.args(["fwmark".to_string(), value]);
        }
        if let Some(key) = update.private_key {
            spec = spec
                .args(["private-key", "/dev/stdin"])
                .stdin(format!("{key}\n"));
        }
        specs.push(spec);
    }

    for p in &update.peers {
        specs.push(peer_command(base(), live, p));
    }

    Ok(specs)
}

fn peer_command(spec: CommandSpec, live: &LiveDevice, p: &PeerUpdate) -> CommandSpec {
    let mut spec = spec.args(["peer".to_string(), p.public_key.to_base64()]);
    if p.remove {
        return spec.arg("remove");
    }

    match p.preshared_key {
        Some(psk) if psk.is_zero() => spec = spec.args(["preshared-key", "/dev/null"]),
        Some(psk) => {
            spec = spec
                .args(["preshared-key", "/dev/stdin"])
                .stdin(format!("{psk}\n"))
        }
        None => {}
    }
    if let Some(endpoint) = p.endpoint {
        spec = spec.args(["endpoint".to_string(), endpoint.to_string()]);
    }
    if let Some(keepalive) = p.persistent_keepalive {
        let value = match keepalive.as_secs() {
            0 => "off".to_string(),
            secs => secs.to_string(),
        };
        spec = spec.args(["persistent-keepalive".to_string(), value]);
    }

    // `wg set ... allowed-ips` always replaces, so appends merge in the
    // current list first.
    let allowed_ips = if p.replace_allowed_ips {
        Some(p.allowed_ips.clone())
    } else if !p.allowed_ips.is_empty() {
        let mut merged = live
            .peer(&p.public_key)
            .map(|lp| lp.allowed_ips.clone())
            .unwrap_or_default();
        for ip in &p.allowed_ips {
            if !merged.contains(ip) {
                merged.push(*ip);
            }
        }
        Some(merged)
    } else {
        None
    };
    if let Some(ips) = allowed_ips {
        let joined = ips
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        spec = spec.args(["allowed-ips".to_string(), joined]);
    }

    spec
}

fn malformed(line: &str) -> ServerError {
    ServerError::ControlPlane(format!("unexpected `wg show` dump line: {line:?}"))
}

fn parse_key(s: &str, line: &str) -> ServerResult<Option<Key>> {
    if s == NONE {
        return Ok(None);
    }
    Key::from_base64(s).map(Some).map_err(|_| malformed(line))
}

fn parse_fwmark(s: &str, line: &str) -> ServerResult<u32> {
    if s == "off" {
        return Ok(0);
    }
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| malformed(line))
}

fn parse_interface(name: &str, fields: &[&str], line: &str) -> ServerResult<LiveDevice> {
    let [private_key, public_key, listen_port, fwmark] = fields else {
        return Err(malformed(line));
    };
    Ok(LiveDevice {
        name: name.to_string(),
        private_key: parse_key(private_key, line)?.unwrap_or_default(),
        public_key: parse_key(public_key, line)?.unwrap_or_default(),
        listen_port: listen_port.parse().map_err(|_| malformed(line))?,
        fwmark: parse_fwmark(fwmark, line)?,
        peers: Vec::new(),
    })
}

fn parse_peer(fields: &[&str], line: &str) -> ServerResult<LivePeer> {
    let [public_key, preshared_key, endpoint, allowed_ips, handshake, rx, tx, keepalive] = fields
    else {
        return Err(malformed(line));
    };

    let endpoint = match *endpoint {
        NONE => None,
        e => Some(e.parse::<SocketAddr>().map_err(|_| malformed(line))?),
    };
    let allowed_ips = match *allowed_ips {
        NONE => Vec::new(),
        ips => ips
            .split(',')
            .map(|ip| ip.trim().parse::<IpNetwork>().map_err(|_| malformed(line)))
            .collect::<ServerResult<Vec<_>>>()?,
    };
    let last_handshake = match handshake.parse::<u64>().map_err(|_| malformed(line))? {
        0 => None,
        secs => Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
    };
    let persistent_keepalive = match *keepalive {
        "off" => Duration::ZERO,
        secs => Duration::from_secs(secs.parse().map_err(|_| malformed(line))?),
    };

    Ok(LivePeer {
        public_key: parse_key(public_key, line)?.ok_or_else(|| malformed(line))?,
        preshared_key: parse_key(preshared_key, line)?,
        endpoint,
        persistent_keepalive,
        last_handshake,
        receive_bytes: rx.parse().map_err(|_| malformed(line))?,
        transmit_bytes: tx.parse().map_err(|_| malformed(line))?,
        allowed_ips,
    })
}

/// Parses `wg show <name> dump`: one interface line, then one line per peer.
pub(crate) fn parse_dump(name: &str, text: &str) -> ServerResult<LiveDevice> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let first = lines.next().ok_or_else(|| malformed(""))?;
    let fields: Vec<&str> = first.split('\t').collect();
    let mut device = parse_interface(name, &fields, first)?;

    for line in lines {
        let fields: Vec<&str> = line.split('\t').collect();
        device.peers.push(parse_peer(&fields, line)?);
    }
    Ok(device)
}

/// Parses `wg show all dump`, where every line is prefixed by its
/// interface name.
pub(crate) fn parse_all_dump(text: &str) -> ServerResult<Vec<LiveDevice>> {
    let mut devices: Vec<LiveDevice> = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        let Some((iface, rest)) = fields.split_first() else {
            continue;
        };
        match rest.len() {
            4 => devices.push(parse_interface(iface, rest, line)?),
            8 => {
                let peer = parse_peer(rest, line)?;
                match devices.iter_mut().rev().find(|d| d.name == *iface) {
                    Some(device) => device.peers.push(peer),
                    None => return Err(malformed(line)),
                }
            }
            _ => return Err(malformed(line)),
        }
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{str::FromStr, sync::Mutex};
    use wgsync_proto::ProtoResult;

    const PRIV: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
    const PUB: &str = "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=";
    const PEER: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
    const PEER2: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";

    fn dump() -> String {
        [
            format!("{PRIV}\t{PUB}\t51820\toff"),
            format!("{PEER}\t(none)\t192.95.5.67:1234\t10.192.122.3/32,10.192.124.0/24\t1700000000\t100\t200\t25"),
            format!("{PEER2}\t(none)\t(none)\t(none)\t0\t0\t0\toff"),
        ]
        .join("\n")
    }

    struct ScriptedRunner {
        outputs: Mutex<Vec<CommandOutput>>,
        seen: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<CommandOutput>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: CommandSpec) -> ProtoResult<CommandOutput> {
            self.seen.lock().unwrap().push(spec);
            Ok(self.outputs.lock().unwrap().remove(0))
        }
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(1),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_parse_dump() {
        let device = parse_dump("wg0", &dump()).unwrap();
        assert_eq!(device.name, "wg0");
        assert_eq!(device.private_key.to_base64(), PRIV);
        assert_eq!(device.public_key.to_base64(), PUB);
        assert_eq!(device.listen_port, 51820);
        assert_eq!(device.fwmark, 0);
        assert_eq!(device.peers.len(), 2);

        let first = &device.peers[0];
        assert_eq!(first.public_key.to_base64(), PEER);
        assert_eq!(first.preshared_key, None);
        assert_eq!(first.endpoint, Some("192.95.5.67:1234".parse().unwrap()));
        assert_eq!(first.allowed_ips.len(), 2);
        assert_eq!(
            first.last_handshake,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );
        assert_eq!((first.receive_bytes, first.transmit_bytes), (100, 200));
        assert_eq!(first.persistent_keepalive, Duration::from_secs(25));

        let second = &device.peers[1];
        assert_eq!(second.endpoint, None);
        assert!(second.allowed_ips.is_empty());
        assert_eq!(second.last_handshake, None);
        assert_eq!(second.persistent_keepalive, Duration::ZERO);
    }

    #[test]
    fn test_parse_all_dump_groups_peers_by_interface() {
        let text = format!(
            "wg0\t{PRIV}\t{PUB}\t51820\t0x10\nwg0\t{PEER}\t(none)\t(none)\t(none)\t0\t0\t0\toff\nwg1\t(none)\t(none)\t0\toff\n"
        );
        let devices = parse_all_dump(&text).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].fwmark, 16);
        assert_eq!(devices[0].peers.len(), 1);
        assert_eq!(devices[1].name, "wg1");
        assert!(devices[1].private_key.is_zero());
        assert!(devices[1].peers.is_empty());

        assert!(parse_all_dump("").unwrap().is_empty());
        assert!(parse_all_dump("wg0\tgarbage").is_err());
    }

    #[tokio::test]
    async fn test_missing_device_is_none() {
        let runner = ScriptedRunner::new(vec![failed(
            "Unable to access interface: No such device",
        )]);
        let plane = WgControlPlane::new(runner.clone()).with_name_dir(None);
        assert_eq!(plane.device("wg9").await.unwrap(), None);
        assert_eq!(runner.seen.lock().unwrap()[0].display(), "wg show wg9 dump");
    }

    #[tokio::test]
    async fn test_other_show_failures_are_errors() {
        let runner = ScriptedRunner::new(vec![failed(
            "Unable to access interface: Operation not permitted",
        )]);
        let plane = WgControlPlane::new(runner).with_name_dir(None);
        let err = plane.device("wg0").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ExternalTool);
    }

    #[tokio::test]
    async fn test_configure_passes_keys_on_stdin() {
        let runner = ScriptedRunner::new(vec![ok(&dump()), ok(""), ok("")]);
        let plane = WgControlPlane::new(runner.clone()).with_name_dir(None);

        let psk = Key::from_bytes([7; 32]);
        let mut peer = PeerUpdate::new(Key::from_str(PEER).unwrap());
        peer.update_only = true;
        peer.preshared_key = Some(psk);
        peer.persistent_keepalive = Some(Duration::from_secs(25));
        peer.allowed_ips = vec![IpNetwork::from_str("10.0.9.0/24").unwrap()];

        plane
            .configure(
                "wg0",
                DeviceUpdate {
                    private_key: Some(Key::from_str(PRIV).unwrap()),
                    listen_port: Some(51821),
                    fwmark: None,
                    peers: vec![peer],
                },
            )
            .await
            .unwrap();

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen[1].display(),
            "wg set wg0 listen-port 51821 private-key /dev/stdin"
        );
        assert_eq!(seen[1].stdin, Some(format!("{PRIV}\n").into_bytes()));
        assert_eq!(
            seen[2].display(),
            format!(
                "wg set wg0 peer {PEER} preshared-key /dev/stdin persistent-keepalive 25 allowed-ips 10.192.122.3/32,10.192.124.0/24,10.0.9.0/24"
            )
        );
        assert_eq!(seen[2].stdin, Some(format!("{psk}\n").into_bytes()));
    }

    #[test]
    fn test_replace_and_remove_commands() {
        let live = parse_dump("wg0", &dump()).unwrap();
        let key = Key::from_str(PEER).unwrap();

        let mut replace = PeerUpdate::new(key);
        replace.replace_allowed_ips = true;
        let remove = PeerUpdate::remove(Key::from_str(PEER2).unwrap());
        let specs = set_commands(
            "wg0",
            &live,
            &DeviceUpdate {
                peers: vec![replace, remove],
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].args.last().unwrap(), "");
        assert_eq!(specs[0].args[specs[0].args.len() - 2], "allowed-ips");
        assert_eq!(specs[1].display(), format!("wg set wg0 peer {PEER2} remove"));
    }

    #[test]
    fn test_update_only_unknown_peer_issues_nothing() {
        let live = parse_dump("wg0", &format!("{PRIV}\t{PUB}\t51820\toff")).unwrap();
        let mut update = PeerUpdate::new(Key::from_str(PEER).unwrap());
        update.update_only = true;
        let err = set_commands(
            "wg0",
            &live,
            &DeviceUpdate {
                listen_port: Some(1),
                peers: vec![update],
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::PeerNotFound(_)));
    }

    #[tokio::test]
    async fn test_logical_name_maps_to_utun() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wg0.name"), "utun7\n").unwrap();
        let runner = ScriptedRunner::new(vec![ok(&dump())]);
        let plane =
            WgControlPlane::new(runner.clone()).with_name_dir(Some(dir.path().to_path_buf()));

        let device = plane.device("wg0").await.unwrap().unwrap();
        assert_eq!(device.name, "wg0");
        assert_eq!(runner.seen.lock().unwrap()[0].display(), "wg show utun7 dump");
    }
}
