use {
    crate::{
        clock::{Clock, TokioClock},
        lock::Lock,
        random::{new_token, OsRandom, RandomSource},
        store::LockStore,
    },
    futures::future::join_all,
    rand::{rngs::StdRng, Rng, SeedableRng},
    serde::{Deserialize, Serialize},
    std::{
        sync::{Arc, Mutex, PoisonError},
        time::Duration,
    },
    tracing::{debug, trace, warn},
};

pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_CLOCK_DRIFT_FACTOR: f64 = 0.01;

// Absorbs rounding and scheduling jitter on top of the proportional drift.
const DRIFT_SAFETY_MARGIN: Duration = Duration::from_millis(2);

///
/// Tuning knobs of a [`LockManager`].
///
/// Can be deserialized from the host's own configuration, `retry_delay` is expressed in milliseconds:
///
/// ```
/// use quorum_lock::LockManagerOptions;
///
/// let opts: LockManagerOptions = serde_json::from_str(r#"{ "retry_count": 5, "retry_delay": 50 }"#).unwrap();
/// assert_eq!(opts.retry_count, 5);
/// assert_eq!(opts.clock_drift_factor, 0.01);
/// ```
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockManagerOptions {
    ///
    /// Maximum number of acquisition rounds before giving up.
    ///
    pub retry_count: u32,

    ///
    /// Upper bound of the randomized pause between two rounds.
    ///
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,

    ///
    /// Proportional safety margin applied to the ttl when computing the validity window.
    ///
    pub clock_drift_factor: f64,
}

impl Default for LockManagerOptions {
    fn default() -> Self {
        Self {
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
            clock_drift_factor: DEFAULT_CLOCK_DRIFT_FACTOR,
        }
    }
}

mod duration_millis {
    use {
        serde::{Deserialize, Deserializer, Serializer},
        std::time::Duration,
    };

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one store endpoint is required")]
    NoStores,
    #[error("retry_count must be at least 1")]
    ZeroRetryCount,
    #[error("retry_delay must be at least 1ms")]
    ZeroRetryDelay,
    #[error("clock_drift_factor must be a finite, non-negative number, got {0}")]
    InvalidClockDriftFactor(f64),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("resource name must not be empty")]
    EmptyResource,
    #[error("ttl must be at least 1ms, got {0:?}")]
    InvalidTtl(Duration),
}

///
/// Minimum number of endpoints that must accept a write: a strict majority, or 1 for a single endpoint.
///
pub fn quorum_for(store_count: usize) -> usize {
    if store_count == 1 {
        1
    } else {
        store_count / 2 + 1
    }
}

///
/// Clock drift allowance for `ttl`: `floor(ttl_ms * factor) + 2ms`.
///
pub fn drift_for(ttl: Duration, clock_drift_factor: f64) -> Duration {
    let proportional = (ttl.as_millis() as f64 * clock_drift_factor).floor() as u64;
    Duration::from_millis(proportional) + DRIFT_SAFETY_MARGIN
}

///
/// Remaining validity `ttl - elapsed - drift`, `None` when it is not strictly positive.
///
pub fn validity_for(ttl: Duration, elapsed: Duration, drift: Duration) -> Option<Duration> {
    ttl.checked_sub(elapsed)
        .and_then(|rest| rest.checked_sub(drift))
        .filter(|validity| !validity.is_zero())
}

async fn release_on(stores: &[Arc<dyn LockStore>], resource: &str, token: &str) -> u64 {
    let results = join_all(
        stores
            .iter()
            .map(|store| store.compare_and_delete(resource, token)),
    )
    .await;
    results
        .into_iter()
        .zip(stores)
        .map(|(result, store)| match result {
            Ok(deleted) => deleted,
            Err(e) => {
                debug!("failed to release `{resource}` on {}: {e}", store.name());
                0
            }
        })
        .sum()
}

///
/// Releases an in-flight round's token if the acquisition future is dropped before the round settled.
///
struct RoundGuard {
    stores: Arc<[Arc<dyn LockStore>]>,
    resource: String,
    token: String,
    armed: bool,
}

impl RoundGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RoundGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!(
                "acquisition of `{}` cancelled outside of a runtime, partial locks will expire on their own",
                self.resource
            );
            return;
        };
        let stores = Arc::clone(&self.stores);
        let resource = std::mem::take(&mut self.resource);
        let token = std::mem::take(&mut self.token);
        rt.spawn(async move {
            let deleted = release_on(&stores, &resource, &token).await;
            trace!("released {deleted} partial lock(s) on `{resource}` after cancellation");
        });
    }
}

///
/// Coordinates a lock across a fixed set of independent store endpoints.
///
/// A lock is granted when a quorum of endpoints accepted the conditional write of a fresh token,
/// and enough of the ttl is left once network time and clock drift are accounted for.
///
/// Cloning is cheap, clones share the endpoints and can be used concurrently from many tasks.
///
/// Examples
///
/// ```
/// use quorum_lock::{store::memory::MemoryStore, LockManager, LockManagerOptions, LockStore};
/// use std::{sync::Arc, time::Duration};
///
/// # #[tokio::main] async fn main() {
/// let stores: Vec<Arc<dyn LockStore>> = (0..3)
///     .map(|i| Arc::new(MemoryStore::new(format!("mem-{i}"))) as Arc<dyn LockStore>)
///     .collect();
/// let lock_man = LockManager::new(stores, LockManagerOptions::default()).expect("invalid config");
///
/// let lock = lock_man
///     .lock("my-resource", Duration::from_millis(1000))
///     .await
///     .expect("invalid input")
///     .expect("resource already taken");
/// assert!(lock.validity() < Duration::from_millis(1000));
///
/// lock_man.unlock(&lock).await;
/// # }
/// ```
///
#[derive(Clone)]
pub struct LockManager {
    stores: Arc<[Arc<dyn LockStore>]>,
    quorum: usize,
    options: LockManagerOptions,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    backoff_rng: Arc<Mutex<StdRng>>,
}

///
/// Backoff jitter seed taken from a monotonic clock reading, mixed with the process id so managers
/// started at the same instant on different processes do not back off in lockstep.
///
fn clock_seed(clock: &dyn Clock) -> u64 {
    let reading = clock.now().as_nanos() as u64;
    reading ^ (u64::from(std::process::id()) << 32)
}

impl LockManager {
    pub fn new(
        stores: Vec<Arc<dyn LockStore>>,
        options: LockManagerOptions,
    ) -> Result<Self, ConfigError> {
        if stores.is_empty() {
            return Err(ConfigError::NoStores);
        }
        if options.retry_count == 0 {
            return Err(ConfigError::ZeroRetryCount);
        }
        if options.retry_delay.as_millis() == 0 {
            return Err(ConfigError::ZeroRetryDelay);
        }
        if !options.clock_drift_factor.is_finite() || options.clock_drift_factor < 0.0 {
            return Err(ConfigError::InvalidClockDriftFactor(
                options.clock_drift_factor,
            ));
        }
        let quorum = quorum_for(stores.len());
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        Ok(Self {
            stores: stores.into(),
            quorum,
            options,
            backoff_rng: Arc::new(Mutex::new(StdRng::seed_from_u64(clock_seed(
                clock.as_ref(),
            )))),
            clock,
            random: Arc::new(OsRandom),
        })
    }

    ///
    /// Replace the time source used to measure acquisition rounds.
    ///
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    ///
    /// Replace the source of token bytes.
    ///
    pub fn with_random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    ///
    /// Reseed the inter-round backoff jitter, making the pauses between rounds reproducible.
    ///
    pub fn with_backoff_seed(mut self, seed: u64) -> Self {
        self.backoff_rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn options(&self) -> &LockManagerOptions {
        &self.options
    }

    pub fn stores(&self) -> &[Arc<dyn LockStore>] {
        &self.stores
    }

    ///
    /// Connect every store endpoint, in order.
    ///
    /// Returns `false` if any endpoint failed to connect. Failures are logged, not retried.
    ///
    pub async fn connect(&self) -> bool {
        let mut all_connected = true;
        for store in self.stores.iter() {
            if let Err(e) = store.connect().await {
                warn!("failed to connect to store {}: {e}", store.name());
                all_connected = false;
            }
        }
        all_connected
    }

    ///
    /// Try to acquire `resource` for `ttl`.
    ///
    /// Returns `Ok(None)` when no lock could be obtained within `retry_count` rounds, which is the
    /// expected outcome of contention. `Err` is reserved for invalid arguments.
    ///
    /// Dropping the returned future mid-round releases that round's token in the background.
    ///
    pub async fn lock(&self, resource: &str, ttl: Duration) -> Result<Option<Lock>, LockError> {
        validate(resource, ttl)?;
        let drift = drift_for(ttl, self.options.clock_drift_factor);
        let retry_count = self.options.retry_count;

        for round in 1..=retry_count {
            let token = new_token(self.random.as_ref());
            let mut guard = RoundGuard {
                stores: Arc::clone(&self.stores),
                resource: resource.to_string(),
                token: token.clone(),
                armed: true,
            };

            let start = self.clock.now();
            let results = join_all(
                self.stores
                    .iter()
                    .map(|store| store.set_if_absent(resource, &token, ttl)),
            )
            .await;
            let elapsed = self.clock.now().saturating_sub(start);
            let acquired = self.count_accepted(resource, results);

            match validity_for(ttl, elapsed, drift) {
                Some(validity) if acquired >= self.quorum => {
                    guard.disarm();
                    trace!(
                        "locked `{resource}` on {acquired}/{} stores, valid for {validity:?}",
                        self.stores.len()
                    );
                    return Ok(Some(Lock::new(resource.to_string(), token, validity)));
                }
                Some(_) => {
                    trace!(
                        "round {round}/{retry_count} on `{resource}`: {acquired}/{} stores, quorum is {}",
                        self.stores.len(),
                        self.quorum
                    );
                }
                None => {
                    trace!(
                        "round {round}/{retry_count} on `{resource}`: fan-out took {elapsed:?}, no validity left out of {ttl:?}"
                    );
                }
            }

            release_on(&self.stores, resource, &token).await;
            guard.disarm();

            if round < retry_count {
                tokio::time::sleep(self.backoff()).await;
            }
        }

        warn!("could not lock `{resource}` after {retry_count} rounds");
        Ok(None)
    }

    ///
    /// Release `lock` on every store endpoint.
    ///
    /// Each endpoint is tried exactly once and only keys still holding the lock's token are deleted.
    /// Always returns `true`: unreachable endpoints will drop the key when its ttl expires.
    ///
    pub async fn unlock(&self, lock: &Lock) -> bool {
        let deleted = release_on(&self.stores, lock.resource(), lock.token()).await;
        trace!("unlocked `{}` on {deleted}/{} stores", lock.resource(), self.stores.len());
        true
    }

    ///
    /// Push the expiry of a held lock to `ttl` from now.
    ///
    /// Runs a single round with the lock's own token. On success, returns a new [`Lock`] with a fresh
    /// validity window. On failure returns `Ok(None)`: the previous expiry still bounds the lock
    /// and nothing is rolled back.
    ///
    pub async fn extend(&self, lock: &Lock, ttl: Duration) -> Result<Option<Lock>, LockError> {
        validate(lock.resource(), ttl)?;
        let drift = drift_for(ttl, self.options.clock_drift_factor);

        let start = self.clock.now();
        let results = join_all(
            self.stores
                .iter()
                .map(|store| store.compare_and_extend(lock.resource(), lock.token(), ttl)),
        )
        .await;
        let elapsed = self.clock.now().saturating_sub(start);
        let extended = self.count_accepted(lock.resource(), results);

        match validity_for(ttl, elapsed, drift) {
            Some(validity) if extended >= self.quorum => Ok(Some(Lock::new(
                lock.resource().to_string(),
                lock.token().to_string(),
                validity,
            ))),
            _ => {
                debug!(
                    "could not extend `{}`: {extended}/{} stores, quorum is {}",
                    lock.resource(),
                    self.stores.len(),
                    self.quorum
                );
                Ok(None)
            }
        }
    }

    fn count_accepted(
        &self,
        resource: &str,
        results: Vec<Result<bool, crate::store::StoreError>>,
    ) -> usize {
        results
            .into_iter()
            .zip(self.stores.iter())
            .filter(|(result, store)| match result {
                Ok(accepted) => *accepted,
                Err(e) => {
                    debug!("store {} failed on `{resource}`: {e}", store.name());
                    false
                }
            })
            .count()
    }

    fn backoff(&self) -> Duration {
        let upper = self.options.retry_delay.as_millis().max(1) as u64;
        let millis = self
            .backoff_rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(1..=upper);
        Duration::from_millis(millis)
    }
}

fn validate(resource: &str, ttl: Duration) -> Result<(), LockError> {
    if resource.is_empty() {
        return Err(LockError::EmptyResource);
    }
    if ttl.as_millis() == 0 {
        return Err(LockError::InvalidTtl(ttl));
    }
    Ok(())
}
