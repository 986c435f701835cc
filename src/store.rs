use std::time::Duration;

///
/// etcd-backed store endpoint.
///
pub mod etcd;

///
/// In-process store endpoint, handy for tests and local development.
///
pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store endpoint is not connected")]
    NotConnected,
    #[error("store endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("store rejected the request: {0}")]
    Rejected(String),
}

impl StoreError {
    ///
    /// Returns true if the failure was caused by "outside" forces, such as a network partition,
    /// and a later attempt may succeed.
    ///
    /// The lock manager never retries a single endpoint call, this is for callers driving a
    /// [`LockStore`] directly or deciding whether to call [`LockStore::connect`] again.
    ///
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Transient(_))
    }
}

///
/// One independent key-value store instance taking part in the lock quorum.
///
/// Implementations only need to honor the primitives below; connection management,
/// framing and reconnection are up to them.
///
/// `compare_and_delete` and `compare_and_extend` MUST be evaluated atomically on the store side:
/// a read followed by a separate write would race against other lock holders.
///
#[async_trait::async_trait]
pub trait LockStore: Send + Sync {
    ///
    /// Label used in logs.
    ///
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), StoreError>;

    ///
    /// Set `resource = token` only if `resource` is absent, expiring after `ttl`.
    ///
    /// Returns `Ok(true)` if the write was applied.
    ///
    async fn set_if_absent(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    ///
    /// Delete `resource` if and only if its current value equals `token`.
    ///
    /// Returns the number of deleted keys, `0` when the key is absent or owned by someone else.
    ///
    async fn compare_and_delete(&self, resource: &str, token: &str) -> Result<u64, StoreError>;

    ///
    /// Reset the expiry of `resource` to `ttl` if and only if its current value equals `token`.
    ///
    async fn compare_and_extend(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;
}
