use crate::{control::ControlPlane, error::ServerError, store::ConfigStore, ServerResult};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::broadcast,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::Span;
use wgsync_proto::WgTool;

/// Persists the live state of one device through `wg showconf`.
#[derive(Clone)]
pub struct Snapshotter {
    wg: WgTool,
    store: Arc<ConfigStore>,
    span: Span,
}

impl Snapshotter {
    pub fn new(wg: WgTool, store: Arc<ConfigStore>) -> Self {
        Self {
            wg,
            store,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub async fn snapshot(&self, name: &str) -> ServerResult<()> {
        let contents = self.wg.showconf(name).await?;
        self.store.save_raw(name, &contents).await?;
        tracing::debug!(parent: &self.span, "Snapshotted {name}");
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpReport {
    pub saved: Vec<String>,
    /// Device name and the reason its snapshot failed.
    pub failed: Vec<(String, String)>,
}

impl DumpReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Snapshots every running device on an interval.
pub struct DumpScheduler {
    interval: Duration,
    control: Arc<dyn ControlPlane>,
    snapshotter: Snapshotter,
    span: Span,
}

impl DumpScheduler {
    pub fn new(
        interval: Duration,
        control: Arc<dyn ControlPlane>,
        snapshotter: Snapshotter,
    ) -> ServerResult<Self> {
        if interval.is_zero() {
            return Err(ServerError::validation(
                "dump_interval",
                "must be greater than zero",
            ));
        }
        Ok(Self {
            interval,
            control,
            snapshotter,
            span: Span::none(),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One pass over the running devices. Only failing to list them is an
    /// error; per-device failures land in the report.
    pub async fn save_all(&self) -> ServerResult<DumpReport> {
        let mut report = DumpReport::default();
        for device in self.control.devices().await? {
            match self.snapshotter.snapshot(&device.name).await {
                Ok(()) => report.saved.push(device.name),
                Err(e) => {
                    tracing::warn!(parent: &self.span, "Failed to dump config for {}: {e}", device.name);
                    report.failed.push((device.name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn pass(&self, label: &str) {
        match self.save_all().await {
            Ok(report) => tracing::info!(
                parent: &self.span,
                "{label} config dump finished: {} saved, {} failed.",
                report.saved.len(),
                report.failed.len()
            ),
            Err(e) => tracing::error!(parent: &self.span, "{label} config dump failed: {e}"),
        }
    }

    /// Dumps immediately, then on every tick, then once more when
    /// `shutdown` fires or its sender goes away.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            parent: &self.span,
            "Starting config dump service (interval {}).",
            humantime::format_duration(self.interval)
        );
        self.pass("Initial").await;

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!(parent: &self.span, "Config dump service shutting down.");
                    self.pass("Final").await;
                    return;
                }
                _ = ticker.tick() => self.pass("Periodic").await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        control::{LiveDevice, MemoryControlPlane},
        store::MemoryBackend,
    };
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };
    use wgsync_proto::{CommandOutput, CommandRunner, CommandSpec, ProtoResult};

    /// Answers `wg showconf <name>` with a config naming the device, or
    /// fails for names listed in `broken`.
    #[derive(Default)]
    struct ShowconfRunner {
        broken: Vec<String>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for ShowconfRunner {
        async fn run(&self, spec: CommandSpec) -> ProtoResult<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = spec.args[1].clone();
            self.seen.lock().unwrap().push(name.clone());
            if self.broken.contains(&name) {
                return Ok(CommandOutput {
                    code: Some(1),
                    stdout: Vec::new(),
                    stderr: b"Unable to access interface".to_vec(),
                });
            }
            Ok(CommandOutput {
                code: Some(0),
                stdout: format!("[Interface]\n# {name}\nListenPort = 51820\n").into_bytes(),
                stderr: Vec::new(),
            })
        }
    }

    fn setup(
        names: &[&str],
        runner: Arc<ShowconfRunner>,
        backend: Arc<MemoryBackend>,
    ) -> DumpScheduler {
        let control = Arc::new(MemoryControlPlane::new());
        for name in names {
            control.add_device(LiveDevice {
                name: name.to_string(),
                ..Default::default()
            });
        }
        let store = Arc::new(ConfigStore::with_backend(["/etc/wireguard"], backend).unwrap());
        let snapshotter = Snapshotter::new(WgTool::new(runner), store);
        DumpScheduler::new(Duration::from_secs(600), control, snapshotter).unwrap()
    }

    #[tokio::test]
    async fn test_save_all_keeps_going_past_failures() {
        let runner = Arc::new(ShowconfRunner {
            broken: vec!["wg1".to_string()],
            ..Default::default()
        });
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = setup(&["wg0", "wg1", "wg2"], runner, backend.clone());

        let report = scheduler.save_all().await.unwrap();
        assert_eq!(report.saved, vec!["wg0", "wg2"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "wg1");
        assert!(!report.is_clean());

        let saved = backend.get("/etc/wireguard/wg2.conf").unwrap();
        assert!(String::from_utf8(saved).unwrap().contains("# wg2"));
        assert!(backend.get("/etc/wireguard/wg1.conf").is_none());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let store = Arc::new(
            ConfigStore::with_backend(["/etc/wireguard"], Arc::new(MemoryBackend::new())).unwrap(),
        );
        let snapshotter = Snapshotter::new(
            WgTool::new(Arc::new(ShowconfRunner::default())),
            store,
        );
        assert!(DumpScheduler::new(
            Duration::ZERO,
            Arc::new(MemoryControlPlane::new()),
            snapshotter
        )
        .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_dumps_at_start_on_ticks_and_at_shutdown() {
        let runner = Arc::new(ShowconfRunner::default());
        let scheduler = Arc::new(setup(&["wg0"], runner.clone(), Arc::new(MemoryBackend::new())));
        let (tx, rx) = broadcast::channel(1);

        let task = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(rx).await }
        });

        // Initial pass.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

        // Two ticks.
        tokio::time::sleep(Duration::from_secs(1200)).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);

        tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), 4);
    }
}
