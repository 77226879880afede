use crate::{
    store::{tmp_path, ConfigBackend, FileBackend},
    ServerResult,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
};
use tokio::sync::Mutex;
use wgsync_crypto::Key;

const LAYOUT_VERSION: &str = "v1";

/// Private keys of peers whose key pair wgsync generated, keyed by the
/// peer's public key.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read(&self, public_key: &Key) -> ServerResult<Option<String>>;

    async fn write(&self, public_key: &Key, private_key: &str) -> ServerResult<()>;

    /// Removing an absent entry is not an error.
    async fn remove(&self, public_key: &Key) -> ServerResult<()>;
}

/// One `<dir>/v1/<url-safe public key>.conf` file per peer holding a
/// `PrivateKey = ...` line.
pub struct FileSecretStore {
    dir: PathBuf,
    backend: Arc<dyn ConfigBackend>,
    write_lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_backend(root, Arc::new(FileBackend))
    }

    pub fn with_backend(root: impl AsRef<Path>, backend: Arc<dyn ConfigBackend>) -> Self {
        Self {
            dir: root.as_ref().join(LAYOUT_VERSION),
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self, public_key: &Key) -> PathBuf {
        self.dir.join(format!("{}.conf", public_key.to_url_safe()))
    }
}

fn parse_private_key(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("privatekey")
            .then(|| value.trim().to_string())
    })
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn read(&self, public_key: &Key) -> ServerResult<Option<String>> {
        match self.backend.read(&self.path(public_key)).await {
            Ok(contents) => Ok(parse_private_key(&String::from_utf8_lossy(&contents))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, public_key: &Key, private_key: &str) -> ServerResult<()> {
        let _guard = self.write_lock.lock().await;
        let target = self.path(public_key);
        let tmp = tmp_path(&target);

        self.backend.create_dir_all(&self.dir).await?;
        self.backend
            .write(&tmp, format!("PrivateKey = {private_key}\n").as_bytes())
            .await?;
        if let Err(e) = self.backend.rename(&tmp, &target).await {
            if let Err(cleanup) = self.backend.remove_file(&tmp).await {
                tracing::warn!("Failed to remove {}: {cleanup}", tmp.display());
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, public_key: &Key) -> ServerResult<()> {
        let _guard = self.write_lock.lock().await;
        match self.backend.remove_file(&self.path(public_key)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: StdMutex<HashMap<Key, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn read(&self, public_key: &Key) -> ServerResult<Option<String>> {
        let secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(secrets.get(public_key).cloned())
    }

    async fn write(&self, public_key: &Key, private_key: &str) -> ServerResult<()> {
        let mut secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        secrets.insert(*public_key, private_key.to_string());
        Ok(())
    }

    async fn remove(&self, public_key: &Key) -> ServerResult<()> {
        let mut secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        secrets.remove(public_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use wgsync_crypto::gen_keypair;

    #[tokio::test]
    async fn test_file_secret_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(tmp.path());
        let pair = gen_keypair().unwrap();
        let private = pair.privkey().to_base64();

        assert_eq!(store.read(pair.pubkey()).await.unwrap(), None);
        store.write(pair.pubkey(), &private).await.unwrap();

        let path = tmp
            .path()
            .join("v1")
            .join(format!("{}.conf", pair.pubkey().to_url_safe()));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            format!("PrivateKey = {private}\n")
        );
        assert_eq!(store.read(pair.pubkey()).await.unwrap(), Some(private));

        store.remove(pair.pubkey()).await.unwrap();
        store.remove(pair.pubkey()).await.unwrap();
        assert_eq!(store.read(pair.pubkey()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreadable_secret_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(tmp.path());
        let key = *gen_keypair().unwrap().pubkey();
        // A directory where the file should be cannot be read as one.
        std::fs::create_dir_all(store.path(&key)).unwrap();
        assert!(store.read(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_secret_write_leaves_no_tmp() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_renames(true);
        let store = FileSecretStore::with_backend("/var/lib/wgsync", backend.clone());
        let key = *gen_keypair().unwrap().pubkey();

        assert!(store.write(&key, "secret").await.is_err());
        assert!(backend.paths().is_empty());
    }

    #[test]
    fn test_private_key_line_is_found_leniently() {
        assert_eq!(
            parse_private_key("# generated\nprivatekey=abc=\n"),
            Some("abc=".to_string())
        );
        assert_eq!(parse_private_key(""), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_two_secret_stores_write_concurrently() {
        let tmp = tempfile::tempdir().unwrap();
        let first = Arc::new(FileSecretStore::new(tmp.path()));
        let second = Arc::new(FileSecretStore::new(tmp.path()));
        let key = *gen_keypair().unwrap().pubkey();

        for _ in 0..20 {
            let left = tokio::spawn({
                let store = first.clone();
                async move { store.write(&key, "left").await }
            });
            let right = tokio::spawn({
                let store = second.clone();
                async move { store.write(&key, "right").await }
            });
            left.await.unwrap().unwrap();
            right.await.unwrap().unwrap();
        }

        let stored = first.read(&key).await.unwrap().unwrap();
        assert!(stored == "left" || stored == "right");
        assert_eq!(std::fs::read_dir(tmp.path().join("v1")).unwrap().count(), 1);
    }
}
