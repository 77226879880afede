#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::{path::Path, sync::Arc, time::Duration};
    use tempfile::TempDir;
    use tokio::sync::broadcast;
    use wgsync_crypto::gen_keypair;
    use wgsync_lib::types::{DeviceRequest, PeerRequest};
    use wgsync_proto::{CommandOutput, CommandRunner, CommandSpec, ProtoResult, WgQuickConfig};
    use wgsync_server::{
        Config, ControlPlane, Engine, ErrorKind, FileBackend, FileSecretStore, MemoryControlPlane,
        ServerError,
    };

    /// Plays `wg` against an in-memory control plane: `showconf` renders the
    /// live device, `--version` answers, everything else succeeds quietly.
    struct FakeWg {
        control: Arc<MemoryControlPlane>,
    }

    #[async_trait]
    impl CommandRunner for FakeWg {
        async fn run(&self, spec: CommandSpec) -> ProtoResult<CommandOutput> {
            let ok = |stdout: String| CommandOutput {
                code: Some(0),
                stdout: stdout.into_bytes(),
                stderr: Vec::new(),
            };
            match (spec.program.as_str(), spec.args.first().map(String::as_str)) {
                ("wg", Some("showconf")) => {
                    let live = self.control.device(&spec.args[1]).await.unwrap();
                    match live {
                        Some(live) => Ok(ok(WgQuickConfig::from_device(
                            &live.to_device(),
                            &live.to_peers(),
                        )
                        .to_string())),
                        None => Ok(CommandOutput {
                            code: Some(1),
                            stdout: Vec::new(),
                            stderr: b"Unable to access interface: No such device".to_vec(),
                        }),
                    }
                }
                ("wg", Some("--version")) => Ok(ok("wireguard-tools v1.0.20210914".to_string())),
                _ => Ok(ok(String::new())),
            }
        }
    }

    struct Harness {
        engine: Engine,
        control: Arc<MemoryControlPlane>,
        configs: TempDir,
        secrets: TempDir,
    }

    fn harness() -> Harness {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();

        let configs = tempfile::tempdir().unwrap();
        let secrets = tempfile::tempdir().unwrap();
        let config = Config::default()
            .with_config_dirs(vec![configs.path().to_path_buf()])
            .with_secrets_dir(secrets.path())
            .with_dump_interval(Duration::from_secs(60));

        let control = Arc::new(MemoryControlPlane::new().with_auto_create(true));
        let runner = Arc::new(FakeWg {
            control: control.clone(),
        });
        let backend = Arc::new(FileBackend);
        let secret_store = Arc::new(FileSecretStore::with_backend(
            secrets.path(),
            backend.clone(),
        ));
        let engine = Engine::new(&config, control.clone(), runner, backend, secret_store).unwrap();

        Harness {
            engine,
            control,
            configs,
            secrets,
        }
    }

    fn read_config(dir: &Path, name: &str) -> WgQuickConfig {
        let contents = std::fs::read_to_string(dir.join(format!("{name}.conf"))).unwrap();
        WgQuickConfig::parse(&contents)
    }

    #[tokio::test]
    async fn test_device_lifecycle_is_persisted() {
        let h = harness();
        let devices = &h.engine.devices;

        let created = devices
            .create(DeviceRequest {
                name: Some("wg0".to_string()),
                listen_port: Some(51820),
                addresses: Some(vec!["10.8.0.1/24".to_string()]),
                dns: Some(vec!["1.1.1.1".to_string()]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(created.running);
        assert_eq!(created.listen_port, 51820);
        assert!(created.private_key.is_some());

        let on_disk = read_config(h.configs.path(), "wg0");
        assert_eq!(on_disk.interface.listen_port, 51820);
        assert_eq!(on_disk.interface.addresses, vec!["10.8.0.1/24"]);
        assert_eq!(Some(on_disk.interface.private_key), created.private_key);

        let err = devices
            .create(DeviceRequest {
                name: Some("wg0".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let updated = devices
            .update(
                "wg0",
                DeviceRequest {
                    listen_port: Some(51821),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.listen_port, 51821);
        // Options the update did not mention come back from the file.
        assert_eq!(updated.dns, vec!["1.1.1.1"]);
        assert_eq!(read_config(h.configs.path(), "wg0").interface.listen_port, 51821);

        let err = devices.delete("wg0").await.unwrap_err();
        assert!(matches!(err, ServerError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_stopped_devices_are_listed_from_their_files() {
        let h = harness();
        std::fs::write(
            h.configs.path().join("wg9.conf"),
            "[Interface]\nListenPort = 51999\nAddress = 10.9.0.1/24\n",
        )
        .unwrap();
        std::fs::write(h.configs.path().join("not a device.conf"), "").unwrap();

        h.engine
            .devices
            .create(DeviceRequest {
                name: Some("wg0".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let (devices, total) = h.engine.devices.list(0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(devices[0].name, "wg0");
        assert!(devices[0].running);
        assert_eq!(devices[1].name, "wg9");
        assert!(!devices[1].running);
        assert_eq!(devices[1].listen_port, 51999);

        let wg9 = h.engine.devices.get("wg9").await.unwrap();
        assert_eq!(wg9.addresses, vec!["10.9.0.1/24"]);
        assert_eq!(
            h.engine.devices.get("wg5").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_peer_changes_are_snapshotted() {
        let h = harness();
        h.engine
            .devices
            .create(DeviceRequest {
                name: Some("wg0".to_string()),
                listen_port: Some(51820),
                ..Default::default()
            })
            .await
            .unwrap();
        let peers = &h.engine.peers;

        let generated = peers
            .create(
                "wg0",
                PeerRequest {
                    allowed_ips: Some(vec!["10.8.0.2/32".to_string()]),
                    persistent_keepalive_interval: Some("25s".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(generated.private_key.is_some());
        assert_eq!(generated.allowed_ips, vec!["10.8.0.2/32"]);

        let on_disk = read_config(h.configs.path(), "wg0");
        assert_eq!(on_disk.peers.len(), 1);
        assert_eq!(on_disk.peers[0].public_key, generated.public_key);
        assert_eq!(on_disk.peers[0].persistent_keepalive, 25);

        let secret = h
            .secrets
            .path()
            .join("v1")
            .join(format!("{}.conf", generated.url_safe_public_key));
        assert!(std::fs::read_to_string(&secret)
            .unwrap()
            .contains(generated.private_key.as_deref().unwrap()));

        let other = *gen_keypair().unwrap().pubkey();
        peers
            .create(
                "wg0",
                PeerRequest {
                    public_key: Some(other.to_base64()),
                    allowed_ips: Some(vec!["10.8.0.3/32".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let updated = peers
            .update(
                "wg0",
                &other.to_url_safe(),
                PeerRequest {
                    allowed_ips: Some(vec!["10.8.0.4/32".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.allowed_ips, vec!["10.8.0.4/32"]);

        let (listed, total) = peers.list("wg0", 0, 10, "10.8.0.4", "").await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(listed[0].public_key, other.to_base64());

        peers
            .delete("wg0", &generated.url_safe_public_key)
            .await
            .unwrap();
        assert!(!secret.exists());
        let on_disk = read_config(h.configs.path(), "wg0");
        assert_eq!(on_disk.peers.len(), 1);
        assert_eq!(on_disk.peers[0].allowed_ips, vec!["10.8.0.4/32"]);

        assert_eq!(
            peers
                .get("wg0", &generated.public_key)
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_dump_pass_writes_every_running_device() {
        let h = harness();
        for name in ["wg0", "wg1"] {
            h.engine
                .devices
                .create(DeviceRequest {
                    name: Some(name.to_string()),
                    ..Default::default()
                })
                .await
                .unwrap();
            std::fs::remove_file(h.configs.path().join(format!("{name}.conf"))).unwrap();
        }

        let report = h.engine.scheduler.save_all().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.saved, vec!["wg0", "wg1"]);
        assert!(h.configs.path().join("wg0.conf").exists());
        assert!(h.configs.path().join("wg1.conf").exists());
    }

    #[tokio::test]
    async fn test_dump_service_flushes_on_shutdown() {
        let h = harness();
        let (tx, rx) = broadcast::channel(1);
        let engine = Arc::new(h.engine);

        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.scheduler.run(rx).await }
        });

        // A device that appears after the first pass is caught by the last.
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine
            .devices
            .create(DeviceRequest {
                name: Some("wg0".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        std::fs::remove_file(h.configs.path().join("wg0.conf")).unwrap();
        assert!(h.control.device("wg0").await.unwrap().is_some());

        tx.send(()).unwrap();
        task.await.unwrap();
        assert!(h.configs.path().join("wg0.conf").exists());
    }
}
