use {
    serde::{Deserialize, Serialize},
    std::{future::Future, time::Duration},
};

///
/// A granted lock.
///
/// A `Lock` is a plain value: it holds no connection and nothing happens when it is dropped.
/// Hand it back to [`crate::LockManager::unlock`] to release the resource before its TTL runs out.
///
/// `validity` is an upper bound, measured from the moment the lock was returned, on how long the
/// holder may consider itself the exclusive owner of `resource`.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lock {
    resource: String,
    token: String,
    validity: Duration,
}

impl Lock {
    pub(crate) fn new(resource: String, token: String, validity: Duration) -> Self {
        Self {
            resource,
            token,
            validity,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    ///
    /// Value written to every store endpoint, proving ownership on release.
    ///
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    ///
    /// Run the future produced by `f` for at most the lock's validity window.
    ///
    /// If the window elapses first, the future is dropped and [`LockExpired`] is returned: past that
    /// point another client may legitimately hold the resource.
    ///
    pub async fn scope<T, F, Fut>(&self, f: F) -> Result<T, LockExpired>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        tokio::time::timeout(self.validity, f())
            .await
            .map_err(|_| LockExpired {
                resource: self.resource.clone(),
                validity: self.validity,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("lock on `{resource}` expired after {validity:?}")]
pub struct LockExpired {
    pub resource: String,
    pub validity: Duration,
}
