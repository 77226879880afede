use crate::{error::ServerError, ServerResult};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
};
use tokio::{io::AsyncWriteExt, sync::Mutex};
use tracing::Span;
use wgsync_lib::{
    constant::CONFIG_FILE_EXTENSION,
    types::{Device, Peer},
};
use wgsync_proto::WgQuickConfig;

const MAX_NAME_LEN: usize = 15;

/// Filesystem capabilities the stores need.
#[async_trait]
pub trait ConfigBackend: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// File names (not paths) of the regular files directly under `dir`.
    async fn read_dir(&self, dir: &Path) -> io::Result<Vec<String>>;

    async fn create_dir_all(&self, dir: &Path) -> io::Result<()>;

    /// Creates or truncates `path`, readable by the owner only.
    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn remove_file(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileBackend;

#[async_trait]
impl ConfigBackend for FileBackend {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn read_dir(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(dir).await
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(path).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        file.write_all(contents).await?;
        file.sync_all().await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

/// In-memory backend. Renames can be made to fail to exercise the
/// temp-file cleanup path.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: StdMutex<BTreeMap<PathBuf, Vec<u8>>>,
    dirs: StdMutex<BTreeSet<PathBuf>>,
    fail_renames: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        let path = path.into();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.files_mut().insert(path, contents.into());
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files_mut().get(path.as_ref()).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files_mut().keys().cloned().collect()
    }

    pub fn fail_renames(&self, fail: bool) {
        self.fail_renames.store(fail, Ordering::SeqCst);
    }

    fn add_dir(&self, dir: &Path) {
        let mut dirs = self.dirs.lock().unwrap_or_else(|e| e.into_inner());
        for ancestor in dir.ancestors() {
            dirs.insert(ancestor.to_path_buf());
        }
    }

    fn files_mut(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

#[async_trait]
impl ConfigBackend for MemoryBackend {
    async fn exists(&self, path: &Path) -> bool {
        self.files_mut().contains_key(path)
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.get(path).ok_or_else(|| not_found(path))
    }

    async fn read_dir(&self, dir: &Path) -> io::Result<Vec<String>> {
        let known = self
            .dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(dir);
        if !known {
            return Err(not_found(dir));
        }
        Ok(self
            .files_mut()
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect())
    }

    async fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        self.add_dir(dir);
        Ok(())
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let parent_known = match path.parent() {
            Some(parent) => self
                .dirs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(parent),
            None => false,
        };
        if !parent_known {
            return Err(not_found(path));
        }
        self.files_mut().insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if self.fail_renames.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "rename refused",
            ));
        }
        let mut files = self.files_mut();
        let contents = files.remove(from).ok_or_else(|| not_found(from))?;
        files.insert(to.to_path_buf(), contents);
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.files_mut()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }
}

/// Checks `name` against the wg-quick interface-name rule before it is
/// ever joined onto a path.
pub fn validate_device_name(name: &str) -> ServerResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ServerError::validation(
            "name",
            format!("{name:?} must be 1 to {MAX_NAME_LEN} characters"),
        ));
    }
    if name == "." || name == ".." {
        return Err(ServerError::validation("name", format!("{name:?} is reserved")));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-'));
    if !valid {
        return Err(ServerError::validation(
            "name",
            format!("{name:?} contains characters outside [A-Za-z0-9_=+.-]"),
        ));
    }
    Ok(())
}

fn file_name(name: &str) -> String {
    format!("{name}.{CONFIG_FILE_EXTENSION}")
}

/// A temp file next to `target`, unique to this process and this write so
/// concurrent writers, in-process or not, never share one.
pub(crate) fn tmp_path(target: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(format!(".{}.{seq}.tmp", std::process::id()));
    PathBuf::from(tmp)
}

/// wg-quick files spread over an ordered list of directories. Reads take
/// the first directory holding `<name>.conf`; new files go to the first
/// directory.
pub struct ConfigStore {
    dirs: Vec<PathBuf>,
    backend: Arc<dyn ConfigBackend>,
    write_lock: Mutex<()>,
    span: Span,
}

impl ConfigStore {
    pub fn new<I, P>(dirs: I) -> ServerResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::with_backend(dirs, Arc::new(FileBackend))
    }

    pub fn with_backend<I, P>(dirs: I, backend: Arc<dyn ConfigBackend>) -> ServerResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let dirs: Vec<PathBuf> = dirs.into_iter().map(Into::into).collect();
        if dirs.is_empty() {
            return Err(ServerError::NoConfigDirs);
        }
        Ok(Self {
            dirs,
            backend,
            write_lock: Mutex::new(()),
            span: Span::none(),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    async fn existing(&self, name: &str) -> Option<PathBuf> {
        for dir in &self.dirs {
            let path = dir.join(file_name(name));
            if self.backend.exists(&path).await {
                return Some(path);
            }
        }
        None
    }

    /// Path of `<name>.conf`: the first existing one, else where a new
    /// file would be written.
    pub async fn resolve(&self, name: &str) -> ServerResult<PathBuf> {
        Ok(self.owning_directory(name).await?.join(file_name(name)))
    }

    pub async fn owning_directory(&self, name: &str) -> ServerResult<PathBuf> {
        validate_device_name(name)?;
        if let Some(path) = self.existing(name).await {
            if let Some(dir) = path.parent() {
                return Ok(dir.to_path_buf());
            }
        }
        Ok(self.dirs[0].clone())
    }

    pub async fn contains(&self, name: &str) -> ServerResult<bool> {
        validate_device_name(name)?;
        Ok(self.existing(name).await.is_some())
    }

    /// Device names with a config file, de-duplicated in search order.
    pub async fn list(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        let suffix = format!(".{CONFIG_FILE_EXTENSION}");

        for dir in &self.dirs {
            let files = match self.backend.read_dir(dir).await {
                Ok(files) => files,
                Err(e) => {
                    tracing::debug!(parent: &self.span, "Skipping config dir {}: {e}", dir.display());
                    continue;
                }
            };
            for file in files {
                let Some(name) = file.strip_suffix(&suffix) else {
                    continue;
                };
                if validate_device_name(name).is_err() {
                    tracing::debug!(parent: &self.span, "Ignoring {file} in {}: not a device name", dir.display());
                    continue;
                }
                if seen.insert(name.to_string()) {
                    names.push(name.to_string());
                }
            }
        }

        names
    }

    pub async fn load(&self, name: &str) -> ServerResult<WgQuickConfig> {
        validate_device_name(name)?;
        let path = self
            .existing(name)
            .await
            .ok_or_else(|| ServerError::ConfigNotFound(name.to_string()))?;
        let contents = self.backend.read(&path).await?;
        Ok(WgQuickConfig::parse(&String::from_utf8_lossy(&contents)))
    }

    /// Writes `device` and `peers` as wg-quick text. `SaveConfig` has no
    /// live counterpart, so an existing file's setting is kept.
    pub async fn save(&self, name: &str, device: &Device, peers: &[Peer]) -> ServerResult<()> {
        let mut config = WgQuickConfig::from_device(device, peers);
        config.interface.save_config = match self.load(name).await {
            Ok(existing) => existing.interface.save_config,
            Err(_) => false,
        };
        self.write_atomic(name, config.to_string().as_bytes()).await
    }

    /// Stores text produced elsewhere, e.g. by `wg showconf`, verbatim.
    pub async fn save_raw(&self, name: &str, contents: &[u8]) -> ServerResult<()> {
        self.write_atomic(name, contents).await
    }

    async fn write_atomic(&self, name: &str, contents: &[u8]) -> ServerResult<()> {
        let _guard = self.write_lock.lock().await;

        let dir = self.owning_directory(name).await?;
        self.backend.create_dir_all(&dir).await?;

        let target = dir.join(file_name(name));
        let tmp = tmp_path(&target);
        self.backend.write(&tmp, contents).await?;

        if let Err(e) = self.backend.rename(&tmp, &target).await {
            if let Err(cleanup) = self.backend.remove_file(&tmp).await {
                tracing::warn!(parent: &self.span, "Failed to remove {}: {cleanup}", tmp.display());
            }
            return Err(e.into());
        }

        tracing::debug!(parent: &self.span, "Saved {}", target.display());
        Ok(())
    }
}
