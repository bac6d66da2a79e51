//! [`CachedKeyProvider`]: snapshot cache with periodic and on-miss refresh.

use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::{sync::Mutex, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    current_of, rotation, KeyError, KeyGenerator, KeyMaterial, KeyProvider, KeyStoreSnapshot,
};
use crate::store::KeyStoreClient;

/// State shared between the provider handle and its refresh task.
struct Shared {
    store: Arc<dyn KeyStoreClient>,
    path: String,
    generator: Arc<KeyGenerator>,
    /// Current snapshot. Readers load it without locking.
    snapshot: ArcSwap<KeyStoreSnapshot>,
    /// Serialises every fetch-and-swap (periodic, forced, rotate, reset).
    refresh_lock: Mutex<()>,
}

impl Shared {
    /// Fetch the document and atomically publish it as the new snapshot.
    async fn refresh(&self) -> Result<Arc<KeyStoreSnapshot>, KeyError> {
        let _guard = self.refresh_lock.lock().await;
        let fresh = Arc::new(rotation::fetch(self.store.as_ref(), &self.path).await?);
        self.snapshot.store(Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Publish a document just persisted by this instance. Caller holds
    /// `refresh_lock`.
    fn install(&self, persisted: KeyStoreSnapshot) -> String {
        let id = persisted.current_key_id().to_owned();
        self.snapshot.store(Arc::new(persisted));
        id
    }
}

/// Key provider backed by an in-memory snapshot of the key document.
///
/// - Lookups read the current snapshot lock-free; concurrent readers always
///   see a complete document, old or new, never a mix.
/// - A background task owned by this provider refreshes the snapshot every
///   `refresh_interval`. Failures are logged and retried on the next tick
///   while the last good snapshot keeps serving.
/// - A lookup for an id missing from the snapshot forces one synchronous
///   refresh, so keys rotated in by another instance are found without
///   waiting for the next tick.
/// - Rotation and reset publish the persisted document locally as soon as
///   the store write succeeds.
///
/// The refresh task stops when the provider is dropped or
/// [`shutdown`](Self::shutdown) is called.
pub struct CachedKeyProvider {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    refresher: Option<JoinHandle<()>>,
}

impl CachedKeyProvider {
    /// Load the document at `path` and start the background refresh task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::ConfigRetrieval`] if the initial load fails.
    pub async fn new(
        store: Arc<dyn KeyStoreClient>,
        path: impl Into<String>,
        generator: Arc<KeyGenerator>,
        refresh_interval: Duration,
    ) -> Result<Self, KeyError> {
        let path = path.into();
        let initial = rotation::fetch(store.as_ref(), &path).await?;
        info!(
            path = %path,
            key_id = initial.current_key_id(),
            keys = initial.len(),
            "key snapshot loaded"
        );

        let shared = Arc::new(Shared {
            store,
            path,
            generator,
            snapshot: ArcSwap::from_pointee(initial),
            refresh_lock: Mutex::new(()),
        });
        let shutdown = CancellationToken::new();
        let refresher = refresh_task(Arc::clone(&shared), refresh_interval, shutdown.clone());

        Ok(Self {
            shared,
            shutdown,
            refresher: Some(refresher),
        })
    }

    /// The snapshot lookups are currently served from.
    pub fn snapshot(&self) -> Arc<KeyStoreSnapshot> {
        self.shared.snapshot.load_full()
    }

    /// Refresh the snapshot now, independent of the schedule.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::ConfigRetrieval`] if the fetch fails; the previous
    /// snapshot stays in place.
    pub async fn refresh(&self) -> Result<(), KeyError> {
        self.shared.refresh().await.map(|_| ())
    }

    /// Stop the background refresh task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(refresher) = self.refresher.take() {
            let _ = refresher.await;
        }
    }
}

impl Drop for CachedKeyProvider {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl KeyProvider for CachedKeyProvider {
    async fn current_key_id(&self) -> Result<String, KeyError> {
        Ok(self.shared.snapshot.load().current_key_id().to_owned())
    }

    async fn key(&self, id: &str) -> Result<KeyMaterial, KeyError> {
        if let Some(key) = self.shared.snapshot.load().key(id) {
            return Ok(key);
        }
        debug!(path = %self.shared.path, key_id = id, "key not in snapshot; forcing refresh");
        self.shared
            .refresh()
            .await?
            .key(id)
            .ok_or_else(|| KeyError::KeyNotFound(id.to_owned()))
    }

    async fn current_key(&self) -> Result<KeyMaterial, KeyError> {
        current_of(&self.shared.snapshot.load())
    }

    async fn rotate(&self) -> Result<String, KeyError> {
        let shared = &self.shared;
        let _guard = shared.refresh_lock.lock().await;
        let persisted =
            rotation::rotate(shared.store.as_ref(), &shared.path, &shared.generator).await?;
        Ok(shared.install(persisted))
    }

    async fn reset(&self) -> Result<String, KeyError> {
        let shared = &self.shared;
        let _guard = shared.refresh_lock.lock().await;
        let persisted =
            rotation::reset(shared.store.as_ref(), &shared.path, &shared.generator).await?;
        Ok(shared.install(persisted))
    }
}

/// Spawn the periodic refresh loop for one provider.
///
/// The first refresh fires after one full interval (construction has just
/// loaded the document). A failed refresh retains the previous snapshot and
/// never stops the schedule.
fn refresh_task(
    shared: Arc<Shared>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // First tick fires immediately; construction already fetched.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match shared.refresh().await {
                Ok(snapshot) => debug!(
                    path = %shared.path,
                    key_id = snapshot.current_key_id(),
                    "key snapshot refreshed"
                ),
                Err(e) => warn!(
                    path = %shared.path,
                    error = %e,
                    "key snapshot refresh failed; retaining previous snapshot"
                ),
            }
        }
        debug!(path = %shared.path, "key snapshot refresh task stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::{Notify, Semaphore};

    use super::*;
    use crate::keys::EagerKeyProvider;
    use crate::store::{MemoryKeyStore, StoreError};

    const PATH: &str = "codec/farewell";
    const NEVER: Duration = Duration::from_secs(3600);

    /// Memory store that counts reads and can be switched to fail.
    #[derive(Default)]
    struct ObservedStore {
        inner: MemoryKeyStore,
        reads: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl KeyStoreClient for ObservedStore {
        async fn get(&self, path: &str) -> Result<Option<KeyStoreSnapshot>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("store offline".into()));
            }
            self.inner.get(path).await
        }

        async fn put(&self, path: &str, snapshot: &KeyStoreSnapshot) -> Result<(), StoreError> {
            self.inner.put(path, snapshot).await
        }
    }

    /// Memory store whose reads can be held open until released, recording
    /// how many reads were ever in progress at once.
    struct GatedStore {
        inner: MemoryKeyStore,
        parked: AtomicBool,
        release: Semaphore,
        entered: Notify,
        started: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl GatedStore {
        async fn seeded() -> Arc<Self> {
            let store = Arc::new(Self {
                inner: MemoryKeyStore::new(),
                parked: AtomicBool::new(false),
                release: Semaphore::new(0),
                entered: Notify::new(),
                started: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            });
            let doc = KeyStoreSnapshot::single(&KeyGenerator::new().generate());
            store.inner.put(PATH, &doc).await.unwrap();
            store
        }

        fn park(&self) {
            self.parked.store(true, Ordering::SeqCst);
        }

        fn unpark(&self) {
            self.parked.store(false, Ordering::SeqCst);
            self.release.add_permits(1);
        }
    }

    #[async_trait]
    impl KeyStoreClient for GatedStore {
        async fn get(&self, path: &str) -> Result<Option<KeyStoreSnapshot>, StoreError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if self.parked.load(Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.acquire().await.unwrap().forget();
            }
            let result = self.inner.get(path).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn put(&self, path: &str, snapshot: &KeyStoreSnapshot) -> Result<(), StoreError> {
            self.inner.put(path, snapshot).await
        }
    }

    async fn seeded_store() -> Arc<ObservedStore> {
        let store = Arc::new(ObservedStore::default());
        let doc = KeyStoreSnapshot::single(&KeyGenerator::new().generate());
        store.inner.put(PATH, &doc).await.unwrap();
        store
    }

    fn writer(store: &Arc<ObservedStore>) -> EagerKeyProvider {
        EagerKeyProvider::new(store.clone(), PATH, Arc::new(KeyGenerator::new()))
    }

    #[tokio::test]
    async fn construction_fails_without_document() {
        let result = CachedKeyProvider::new(
            Arc::new(MemoryKeyStore::new()),
            PATH,
            Arc::new(KeyGenerator::new()),
            NEVER,
        )
        .await;
        assert!(matches!(result, Err(KeyError::ConfigRetrieval(_))));
    }

    #[tokio::test]
    async fn lookups_are_served_from_snapshot() {
        let store = seeded_store().await;
        let provider =
            CachedKeyProvider::new(store.clone(), PATH, Arc::new(KeyGenerator::new()), NEVER)
                .await
                .unwrap();
        let reads_after_load = store.reads.load(Ordering::SeqCst);

        let id = provider.current_key_id().await.unwrap();
        for _ in 0..10 {
            provider.key(&id).await.unwrap();
            provider.current_key().await.unwrap();
        }
        assert_eq!(store.reads.load(Ordering::SeqCst), reads_after_load);
    }

    #[tokio::test]
    async fn miss_heals_with_exactly_one_forced_refresh() {
        let store = seeded_store().await;
        let provider =
            CachedKeyProvider::new(store.clone(), PATH, Arc::new(KeyGenerator::new()), NEVER)
                .await
                .unwrap();

        // Rotation performed elsewhere; this instance's snapshot predates it.
        let new_id = writer(&store).rotate().await.unwrap();
        assert!(!provider.snapshot().contains(&new_id));

        let reads_before = store.reads.load(Ordering::SeqCst);
        let key = provider.key(&new_id).await.unwrap();
        assert_eq!(key.id(), new_id);
        assert_eq!(store.reads.load(Ordering::SeqCst), reads_before + 1);
        assert_eq!(provider.current_key_id().await.unwrap(), new_id);
    }

    #[tokio::test]
    async fn still_missing_after_refresh_is_not_found() {
        let store = seeded_store().await;
        let provider =
            CachedKeyProvider::new(store.clone(), PATH, Arc::new(KeyGenerator::new()), NEVER)
                .await
                .unwrap();
        assert!(matches!(
            provider.key("key-1").await,
            Err(KeyError::KeyNotFound(id)) if id == "key-1"
        ));
    }

    #[tokio::test]
    async fn periodic_refresh_picks_up_rotation() {
        let store = seeded_store().await;
        let provider = CachedKeyProvider::new(
            store.clone(),
            PATH,
            Arc::new(KeyGenerator::new()),
            Duration::from_millis(25),
        )
        .await
        .unwrap();

        let new_id = writer(&store).rotate().await.unwrap();
        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(provider.snapshot().current_key_id(), new_id);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_serving_and_retries() {
        let store = seeded_store().await;
        let provider = CachedKeyProvider::new(
            store.clone(),
            PATH,
            Arc::new(KeyGenerator::new()),
            Duration::from_millis(20),
        )
        .await
        .unwrap();
        let id = provider.current_key_id().await.unwrap();

        store.failing.store(true, Ordering::SeqCst);
        let reads_before = store.reads.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(200)).await;
        // Several scheduled attempts failed, the stale snapshot still serves.
        assert!(store.reads.load(Ordering::SeqCst) >= reads_before + 2);
        assert_eq!(provider.key(&id).await.unwrap().id(), id);

        // Once the store recovers the schedule picks up new documents again.
        store.failing.store(false, Ordering::SeqCst);
        let new_id = writer(&store).rotate().await.unwrap();
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(provider.snapshot().current_key_id(), new_id);
    }

    #[tokio::test]
    async fn rotate_is_visible_without_waiting() {
        let store = seeded_store().await;
        let provider =
            CachedKeyProvider::new(store.clone(), PATH, Arc::new(KeyGenerator::new()), NEVER)
                .await
                .unwrap();
        let old_id = provider.current_key_id().await.unwrap();

        let new_id = provider.rotate().await.unwrap();
        let reads_before = store.reads.load(Ordering::SeqCst);
        assert_eq!(provider.current_key_id().await.unwrap(), new_id);
        assert!(provider.key(&old_id).await.is_ok());
        assert_eq!(store.reads.load(Ordering::SeqCst), reads_before);
    }

    #[tokio::test]
    async fn reset_drops_old_keys_locally() {
        let store = seeded_store().await;
        let provider =
            CachedKeyProvider::new(store.clone(), PATH, Arc::new(KeyGenerator::new()), NEVER)
                .await
                .unwrap();
        let old_id = provider.current_key_id().await.unwrap();

        let new_id = provider.reset().await.unwrap();
        assert_eq!(provider.snapshot().len(), 1);
        assert_eq!(provider.current_key_id().await.unwrap(), new_id);
        assert!(matches!(
            provider.key(&old_id).await,
            Err(KeyError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn forced_refresh_failure_surfaces() {
        let store = seeded_store().await;
        let provider =
            CachedKeyProvider::new(store.clone(), PATH, Arc::new(KeyGenerator::new()), NEVER)
                .await
                .unwrap();
        store.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            provider.key("key-1").await,
            Err(KeyError::ConfigRetrieval(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_readers_see_complete_snapshots() {
        let store = seeded_store().await;
        let provider = Arc::new(
            CachedKeyProvider::new(
                store.clone(),
                PATH,
                Arc::new(KeyGenerator::new()),
                Duration::from_millis(5),
            )
            .await
            .unwrap(),
        );
        let rotator = writer(&store);

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move {
                    for _ in 0..200 {
                        let snapshot = provider.snapshot();
                        assert!(snapshot.validate().is_ok());
                        assert!(snapshot.current_key().is_some());
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for _ in 0..10 {
            rotator.rotate().await.unwrap();
            provider.refresh().await.unwrap();
        }
        for reader in readers {
            reader.await.unwrap();
        }
    }

    #[tokio::test]
    async fn reads_do_not_wait_for_an_in_flight_refresh() {
        let store = GatedStore::seeded().await;
        let provider = Arc::new(
            CachedKeyProvider::new(store.clone(), PATH, Arc::new(KeyGenerator::new()), NEVER)
                .await
                .unwrap(),
        );
        let id = provider.current_key_id().await.unwrap();

        store.park();
        let refreshing = tokio::spawn({
            let provider = Arc::clone(&provider);
            async move { provider.refresh().await }
        });
        store.entered.notified().await;

        // The refresh holds the lock and is stuck in the store.
        let quick = Duration::from_millis(100);
        let key = time::timeout(quick, provider.key(&id)).await.unwrap().unwrap();
        assert_eq!(key.id(), id);
        let current = time::timeout(quick, provider.current_key()).await.unwrap().unwrap();
        assert_eq!(current.id(), id);
        assert!(!refreshing.is_finished());

        store.unpark();
        refreshing.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn refreshes_run_one_at_a_time() {
        let store = GatedStore::seeded().await;
        let provider = Arc::new(
            CachedKeyProvider::new(
                store.clone(),
                PATH,
                Arc::new(KeyGenerator::new()),
                Duration::from_millis(10),
            )
            .await
            .unwrap(),
        );

        store.park();
        let forced: Vec<_> = (0..2)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move { provider.refresh().await })
            })
            .collect();
        store.entered.notified().await;
        let started = store.started.load(Ordering::SeqCst);

        // The other forced refresh and every periodic tick queue behind the lock.
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.started.load(Ordering::SeqCst), started);
        assert_eq!(store.in_flight.load(Ordering::SeqCst), 1);

        store.unpark();
        for handle in forced {
            handle.await.unwrap().unwrap();
        }
        time::sleep(Duration::from_millis(50)).await;
        assert!(store.started.load(Ordering::SeqCst) > started);
        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_refresh_task() {
        let store = seeded_store().await;
        let provider = CachedKeyProvider::new(
            store.clone(),
            PATH,
            Arc::new(KeyGenerator::new()),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        provider.shutdown().await;

        let reads_after = store.reads.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.reads.load(Ordering::SeqCst), reads_after);
    }
}
