use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use chatgate_common::{ProviderCredentials, unix_now};

use crate::acquirer::{AcquireError, AcquireHints, SessionAcquirer};
use crate::bundle::SessionBundle;
use crate::crypto::{self, SealedEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session bundle serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("session sealing failed: {0}")]
    Seal(#[from] crypto::SealError),
    #[error(transparent)]
    Acquire(#[from] AcquireError),
}

/// File-backed store of per-provider session bundles.
///
/// One file per provider under the session directory. Writes are atomic
/// (sibling temp file + rename) and guarded by an advisory lock so a second
/// gateway process sharing the directory cannot tear a bundle. Within this
/// process, acquisition is serialized per provider: the first caller that
/// finds an expired bundle runs the acquirer, peers for the same provider
/// wait for its result, and peers for other providers proceed in parallel.
pub struct SessionStore {
    dir: PathBuf,
    ttl_secs: u64,
    secret: Option<String>,
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>, ttl_secs: u64, secret: Option<String>) -> Self {
        let store = Self {
            dir: dir.into(),
            ttl_secs,
            secret,
            guards: Mutex::new(HashMap::new()),
        };
        if store.secret.is_none() {
            warn!(
                event = "session_store_plaintext",
                "no session_key configured; bundles will be stored unencrypted"
            );
        }
        store
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Currently valid bundle, or `None` for missing/expired/corrupt files.
    pub async fn get(&self, provider_id: &str) -> Option<SessionBundle> {
        let path = self.session_path(provider_id);
        let secret = self.secret.clone();
        let loaded = tokio::task::spawn_blocking(move || read_bundle(&path, secret.as_deref()))
            .await
            .ok()??;
        if loaded.is_expired(unix_now()) {
            debug!(provider = provider_id, "cached session expired");
            return None;
        }
        Some(loaded)
    }

    /// Atomically replace the stored bundle. Disk failures propagate; a
    /// request must not continue on a session that was never persisted.
    pub async fn put(&self, provider_id: &str, bundle: &SessionBundle) -> Result<(), StoreError> {
        let path = self.session_path(provider_id);
        let payload = serde_json::to_vec(bundle)?;
        let body = match &self.secret {
            Some(secret) => serde_json::to_vec(&crypto::seal(secret, &payload)?)?,
            None => payload,
        };
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .map_err(|err| StoreError::Io {
                path: self.session_path(provider_id),
                source: std::io::Error::other(err),
            })?
    }

    pub async fn invalidate(&self, provider_id: &str) {
        let path = self.session_path(provider_id);
        let _ = tokio::task::spawn_blocking(move || remove_locked(&path)).await;
    }

    /// The operation adapters actually use: return a valid bundle, acquiring
    /// one at most once per provider no matter how many callers race here.
    pub async fn get_or_acquire(
        &self,
        provider_id: &str,
        acquirer: &dyn SessionAcquirer,
        credentials: &ProviderCredentials,
        hints: AcquireHints,
    ) -> Result<SessionBundle, StoreError> {
        if let Some(bundle) = self.get(provider_id).await {
            return Ok(bundle);
        }

        let guard = self.guard_for(provider_id).await;
        let _held = guard.lock().await;

        // A peer may have finished the login while this caller waited.
        if let Some(bundle) = self.get(provider_id).await {
            return Ok(bundle);
        }

        debug!(provider = provider_id, "acquiring fresh session");
        let bundle = acquirer.acquire(provider_id, credentials, hints).await?;
        self.put(provider_id, &bundle).await?;
        Ok(bundle)
    }

    async fn guard_for(&self, provider_id: &str) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().await;
        guards
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn session_path(&self, provider_id: &str) -> PathBuf {
        self.dir.join(format!("{provider_id}.session"))
    }
}

fn read_bundle(path: &Path, secret: Option<&str>) -> Option<SessionBundle> {
    let lock = acquire_lock(path, LockKind::Shared).ok()?;
    let raw = std::fs::read(path).ok()?;
    drop(lock);

    let value: serde_json::Value = serde_json::from_slice(&raw).ok()?;
    let plaintext = if crypto::looks_sealed(&value) {
        let envelope: SealedEnvelope = serde_json::from_value(value).ok()?;
        let secret = secret?;
        crypto::open(secret, &envelope).ok()?
    } else {
        raw
    };

    let bundle: SessionBundle = serde_json::from_slice(&plaintext).ok()?;
    bundle.is_well_formed().then_some(bundle)
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let lock = acquire_lock(path, LockKind::Exclusive).map_err(io_err)?;

    let tmp = path.with_extension("session.tmp");
    let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(body).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    drop(lock);
    Ok(())
}

fn remove_locked(path: &Path) {
    let Ok(lock) = acquire_lock(path, LockKind::Exclusive) else {
        return;
    };
    let _ = std::fs::remove_file(path);
    drop(lock);
}

enum LockKind {
    Shared,
    Exclusive,
}

/// Advisory lock on a sibling `.lock` file; locking the data file itself
/// does not survive the rename-replace.
fn acquire_lock(path: &Path, kind: LockKind) -> std::io::Result<std::fs::File> {
    let lock_path = path.with_extension("session.lock");
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    match kind {
        LockKind::Shared => fs2::FileExt::lock_shared(&file)?,
        LockKind::Exclusive => fs2::FileExt::lock_exclusive(&file)?,
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct CountingAcquirer {
        calls: AtomicUsize,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl SessionAcquirer for CountingAcquirer {
        async fn acquire(
            &self,
            provider_id: &str,
            _credentials: &ProviderCredentials,
            _hints: AcquireHints,
        ) -> Result<SessionBundle, AcquireError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let mut bundle = SessionBundle::new(provider_id, 3600);
            bundle
                .cookies
                .insert("token".to_string(), "fresh".to_string());
            Ok(bundle)
        }
    }

    fn temp_store(secret: Option<&str>) -> SessionStore {
        let dir = std::env::temp_dir().join(format!("chatgate-store-{}", uuid::Uuid::new_v4()));
        SessionStore::new(dir, 3600, secret.map(|value| value.to_string()))
    }

    #[tokio::test]
    async fn put_get_round_trips_within_ttl() {
        let store = temp_store(None);
        let mut bundle = SessionBundle::new("glm", 3600);
        bundle.bearer_token = Some("jwt".to_string());
        store.put("glm", &bundle).await.unwrap();
        assert_eq!(store.get("glm").await, Some(bundle));
    }

    #[tokio::test]
    async fn expired_bundle_reads_as_none() {
        let store = temp_store(None);
        let mut bundle = SessionBundle::new("glm", 3600);
        bundle.expires_at = bundle.created_at + 1;
        bundle.created_at -= 10;
        bundle.expires_at -= 10;
        store.put("glm", &bundle).await.unwrap();
        assert_eq!(store.get("glm").await, None);
    }

    #[tokio::test]
    async fn sealed_round_trip_and_wrong_key_degrades_to_none() {
        let store = temp_store(Some("k1"));
        let bundle = SessionBundle::new("qwen", 3600);
        store.put("qwen", &bundle).await.unwrap();
        assert_eq!(store.get("qwen").await, Some(bundle));

        // Same directory, different key: unreadable file behaves as missing.
        let other = SessionStore::new(store.dir.clone(), 3600, Some("k2".to_string()));
        assert_eq!(other.get("qwen").await, None);
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_none() {
        let store = temp_store(None);
        let path = store.session_path("k2");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();
        assert_eq!(store.get("k2").await, None);
    }

    #[tokio::test]
    async fn invalidate_removes_bundle() {
        let store = temp_store(None);
        store
            .put("glm", &SessionBundle::new("glm", 3600))
            .await
            .unwrap();
        store.invalidate("glm").await;
        assert_eq!(store.get("glm").await, None);
    }

    #[tokio::test]
    async fn concurrent_get_or_acquire_runs_acquirer_once() {
        let store = Arc::new(temp_store(None));
        let acquirer = Arc::new(CountingAcquirer {
            calls: AtomicUsize::new(0),
            delay: std::time::Duration::from_millis(50),
        });

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            let acquirer = acquirer.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .get_or_acquire(
                        "glm",
                        acquirer.as_ref(),
                        &ProviderCredentials::default(),
                        AcquireHints::default(),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut bundles = Vec::new();
        for task in tasks {
            bundles.push(task.await.unwrap());
        }
        assert_eq!(acquirer.calls.load(Ordering::SeqCst), 1);
        assert!(bundles.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn acquisitions_for_different_providers_run_in_parallel() {
        let store = Arc::new(temp_store(None));
        let acquirer = Arc::new(CountingAcquirer {
            calls: AtomicUsize::new(0),
            delay: std::time::Duration::from_millis(80),
        });

        let started = std::time::Instant::now();
        let glm = {
            let (store, acquirer) = (store.clone(), acquirer.clone());
            tokio::spawn(async move {
                store
                    .get_or_acquire(
                        "glm",
                        acquirer.as_ref(),
                        &ProviderCredentials::default(),
                        AcquireHints::default(),
                    )
                    .await
            })
        };
        let qwen = {
            let (store, acquirer) = (store.clone(), acquirer.clone());
            tokio::spawn(async move {
                store
                    .get_or_acquire(
                        "qwen",
                        acquirer.as_ref(),
                        &ProviderCredentials::default(),
                        AcquireHints::default(),
                    )
                    .await
            })
        };
        glm.await.unwrap().unwrap();
        qwen.await.unwrap().unwrap();

        // Serialized acquisitions would need at least two full delays.
        assert!(started.elapsed() < std::time::Duration::from_millis(150));
        assert_eq!(acquirer.calls.load(Ordering::SeqCst), 2);
    }
}
