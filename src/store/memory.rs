use {
    super::{LockStore, StoreError},
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, AtomicU64, Ordering},
            Arc, Mutex, MutexGuard, PoisonError,
        },
        time::Duration,
    },
    tokio::time::Instant,
};

struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    unreachable: AtomicBool,
    latency_ms: AtomicU64,
}

///
/// In-process [`LockStore`] backed by an expiring hash map.
///
/// Every primitive runs under a single mutex, so compare-and-delete and compare-and-extend are atomic.
/// Expiry follows [`tokio::time::Instant`], which makes it play well with paused-time tests.
///
/// Cloning is cheap and clones share the same data, so a test can keep a handle to inspect or
/// break an endpoint after handing it to a [`crate::LockManager`].
///
#[derive(Clone)]
pub struct MemoryStore {
    name: String,
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Inner::default()),
        }
    }

    ///
    /// Simulate a network partition: while unreachable, every call fails with [`StoreError::Unreachable`].
    ///
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.unreachable.store(!reachable, Ordering::Release);
    }

    ///
    /// Delay every call by `latency` before it reaches the map.
    ///
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::Release);
    }

    ///
    /// Current, non-expired value stored under `resource`.
    ///
    pub fn get(&self, resource: &str) -> Option<String> {
        let now = Instant::now();
        self.entries()
            .get(resource)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    ///
    /// Number of live keys.
    ///
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn round_trip(&self) -> Result<(), StoreError> {
        let latency = self.inner.latency_ms.load(Ordering::Acquire);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.inner.unreachable.load(Ordering::Acquire) {
            return Err(StoreError::Unreachable(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LockStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), StoreError> {
        self.round_trip().await
    }

    async fn set_if_absent(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.round_trip().await?;
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(resource) {
            Some(entry) if entry.expires_at > now => Ok(false),
            _ => {
                entries.insert(
                    resource.to_string(),
                    Entry {
                        value: token.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, resource: &str, token: &str) -> Result<u64, StoreError> {
        self.round_trip().await?;
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(resource) {
            Some(entry) if entry.expires_at > now && entry.value == token => {
                entries.remove(resource);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn compare_and_extend(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.round_trip().await?;
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get_mut(resource) {
            Some(entry) if entry.expires_at > now && entry.value == token => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
