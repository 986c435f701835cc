#![allow(dead_code)]

use {
    quorum_lock::{
        clock::Clock, random::RandomSource, store::memory::MemoryStore, LockManager,
        LockManagerOptions, LockStore, StoreError,
    },
    std::{
        sync::{
            atomic::{AtomicU64, AtomicU8, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    },
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn random_str(len: usize) -> String {
    use rand::{distributions::Alphanumeric, thread_rng, Rng};
    let mut rng = thread_rng();
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn memory_stores(n: usize) -> Vec<MemoryStore> {
    (0..n).map(|i| MemoryStore::new(format!("mem-{i}"))).collect()
}

pub fn as_lock_stores(stores: &[MemoryStore]) -> Vec<Arc<dyn LockStore>> {
    stores
        .iter()
        .map(|s| Arc::new(s.clone()) as Arc<dyn LockStore>)
        .collect()
}

pub fn memory_cluster(n: usize, options: LockManagerOptions) -> (Vec<MemoryStore>, LockManager) {
    init_tracing();
    let stores = memory_stores(n);
    let lock_man =
        LockManager::new(as_lock_stores(&stores), options).expect("invalid lock manager config");
    (stores, lock_man)
}

///
/// Clock that moves forward by `step` every time it is read.
///
pub struct StepClock {
    now_ms: AtomicU64,
    step_ms: u64,
}

impl StepClock {
    pub fn new(step: Duration) -> Self {
        Self {
            now_ms: AtomicU64::new(0),
            step_ms: step.as_millis() as u64,
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.now_ms.fetch_add(self.step_ms, Ordering::SeqCst))
    }
}

///
/// Deterministic byte source: every call fills the buffer with an incrementing byte.
///
#[derive(Default)]
pub struct CountingRandom {
    next: AtomicU8,
}

impl RandomSource for CountingRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        let b = self.next.fetch_add(1, Ordering::SeqCst);
        dest.fill(b);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Set { resource: String, token: String },
    Delete { resource: String, token: String },
    Extend { resource: String, token: String },
}

///
/// Memory store recording every primitive call it receives.
///
#[derive(Clone)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    pub calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingStore {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryStore::new(name),
            calls: Default::default(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl LockStore for RecordingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn connect(&self) -> Result<(), StoreError> {
        self.inner.connect().await
    }

    async fn set_if_absent(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.record(Call::Set {
            resource: resource.to_string(),
            token: token.to_string(),
        });
        self.inner.set_if_absent(resource, token, ttl).await
    }

    async fn compare_and_delete(&self, resource: &str, token: &str) -> Result<u64, StoreError> {
        self.record(Call::Delete {
            resource: resource.to_string(),
            token: token.to_string(),
        });
        self.inner.compare_and_delete(resource, token).await
    }

    async fn compare_and_extend(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.record(Call::Extend {
            resource: resource.to_string(),
            token: token.to_string(),
        });
        self.inner.compare_and_extend(resource, token, ttl).await
    }
}
