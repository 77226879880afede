use crate::{
    config::Config,
    control::ControlPlane,
    device::DeviceService,
    dump::{DumpScheduler, Snapshotter},
    peer::PeerService,
    secret::{FileSecretStore, SecretStore},
    store::{ConfigBackend, ConfigStore, FileBackend},
    wireguard::WgControlPlane,
    ServerResult,
};
use std::sync::Arc;
use tracing::info_span;
use wgsync_proto::{CommandRunner, SystemCommandRunner, WgTool};

/// Everything wgsync runs, wired from one [`Config`].
pub struct Engine {
    pub devices: DeviceService,
    pub peers: PeerService,
    pub scheduler: DumpScheduler,
    store: Arc<ConfigStore>,
}

impl Engine {
    /// Talks to the host through `wg` and `wg-quick` and keeps files on disk.
    pub fn system(config: &Config) -> ServerResult<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        let control = Arc::new(
            WgControlPlane::new(runner.clone()).with_span(info_span!("control")),
        );
        let backend: Arc<dyn ConfigBackend> = Arc::new(FileBackend);
        let secrets = Arc::new(FileSecretStore::with_backend(
            config.secrets_dir(),
            backend.clone(),
        ));
        Self::new(config, control, runner, backend, secrets)
    }

    pub fn new(
        config: &Config,
        control: Arc<dyn ControlPlane>,
        runner: Arc<dyn CommandRunner>,
        backend: Arc<dyn ConfigBackend>,
        secrets: Arc<dyn SecretStore>,
    ) -> ServerResult<Self> {
        config.validate()?;

        let store = Arc::new(
            ConfigStore::with_backend(config.config_dirs().iter().cloned(), backend)?
                .with_span(info_span!("store")),
        );
        let wg = WgTool::new(runner);
        let snapshotter =
            Snapshotter::new(wg.clone(), store.clone()).with_span(info_span!("snapshot"));

        let devices = DeviceService::new(control.clone(), store.clone(), wg)
            .with_span(info_span!("devices"));
        let peers = PeerService::new(control.clone(), secrets, snapshotter.clone())
            .with_span(info_span!("peers"));
        let scheduler = DumpScheduler::new(config.dump_interval(), control, snapshotter)?
            .with_span(info_span!("dump"));

        Ok(Self {
            devices,
            peers,
            scheduler,
            store,
        })
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }
}
