use {
    super::{LockStore, StoreError},
    etcd_client::{Client, Compare, CompareOp, ConnectOptions, PutOptions, Txn, TxnOp},
    std::{error::Error, time::Duration},
    tokio::sync::OnceCell,
    tracing::{trace, warn},
};

pub fn is_transient(err: &etcd_client::Error) -> bool {
    match err {
        etcd_client::Error::GRpcStatus(status) => match status.code() {
            tonic::Code::Ok => false,
            tonic::Code::Cancelled => false,
            tonic::Code::Unknown => status.source().is_none(),
            tonic::Code::InvalidArgument => false,
            tonic::Code::DeadlineExceeded => true,
            tonic::Code::NotFound => false,
            tonic::Code::AlreadyExists => false,
            tonic::Code::PermissionDenied => false,
            tonic::Code::ResourceExhausted => true,
            tonic::Code::FailedPrecondition => false,
            tonic::Code::Aborted => false,
            tonic::Code::OutOfRange => false,
            tonic::Code::Unimplemented => false,
            tonic::Code::Internal => true,
            tonic::Code::Unavailable => true,
            tonic::Code::DataLoss => true,
            tonic::Code::Unauthenticated => false,
        },
        _ => false,
    }
}

impl From<etcd_client::Error> for StoreError {
    fn from(err: etcd_client::Error) -> Self {
        match err {
            etcd_client::Error::TransportError(e) => StoreError::Unreachable(e.to_string()),
            etcd_client::Error::IoError(e) => StoreError::Unreachable(e.to_string()),
            e if is_transient(&e) => StoreError::Transient(e.to_string()),
            e => StoreError::Rejected(e.to_string()),
        }
    }
}

///
/// etcd lease granularity is one second, round up so the key never expires before `ttl`.
///
fn lease_secs(ttl: Duration) -> i64 {
    let millis = ttl.as_millis().max(1);
    millis.div_ceil(1000) as i64
}

///
/// [`LockStore`] over a single etcd cluster endpoint.
///
/// Expiry is carried by a dedicated lease per write, and every conditional primitive is a single
/// etcd transaction, so comparisons and mutations are evaluated atomically by the server.
///
/// Examples
///
/// ```no_run
/// use quorum_lock::{store::etcd::EtcdStore, LockManager, LockManagerOptions, LockStore};
/// use std::sync::Arc;
///
/// # async fn run() {
/// let stores: Vec<Arc<dyn LockStore>> = ["http://10.0.0.1:2379", "http://10.0.0.2:2379", "http://10.0.0.3:2379"]
///     .into_iter()
///     .map(|addr| Arc::new(EtcdStore::new(addr, [addr], None)) as Arc<dyn LockStore>)
///     .collect();
///
/// let lock_man = LockManager::new(stores, LockManagerOptions::default()).expect("invalid config");
/// assert!(lock_man.connect().await);
/// # }
/// ```
///
pub struct EtcdStore {
    name: String,
    endpoints: Vec<String>,
    options: Option<ConnectOptions>,
    client: OnceCell<Client>,
}

impl EtcdStore {
    pub fn new<E, S>(name: impl Into<String>, endpoints: S, options: Option<ConnectOptions>) -> Self
    where
        E: AsRef<str>,
        S: IntoIterator<Item = E>,
    {
        Self {
            name: name.into(),
            endpoints: endpoints
                .into_iter()
                .map(|e| e.as_ref().to_string())
                .collect(),
            options,
            client: OnceCell::new(),
        }
    }

    ///
    /// Wrap an already connected client.
    ///
    pub fn with_client(name: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            endpoints: vec![],
            options: None,
            client: OnceCell::new_with(Some(client)),
        }
    }

    fn client(&self) -> Result<Client, StoreError> {
        self.client.get().cloned().ok_or(StoreError::NotConnected)
    }

    async fn revoke_quietly(&self, mut client: Client, lease_id: i64) {
        if let Err(e) = client.lease_revoke(lease_id).await {
            warn!(
                "failed to revoke unused lease {lease_id} on {}: {e:?}",
                self.name
            );
        }
    }

    ///
    /// Grant a lease for `ttl`, run `txn_for(lease_id)` and revoke the lease if the transaction
    /// did not apply.
    ///
    async fn txn_with_lease<F>(&self, ttl: Duration, txn_for: F) -> Result<bool, StoreError>
    where
        F: FnOnce(i64) -> Txn,
    {
        let mut client = self.client()?;
        let lease_id = client.lease_grant(lease_secs(ttl), None).await?.id();
        match client.txn(txn_for(lease_id)).await {
            Ok(resp) if resp.succeeded() => Ok(true),
            Ok(_) => {
                self.revoke_quietly(client, lease_id).await;
                Ok(false)
            }
            Err(e) => {
                self.revoke_quietly(client, lease_id).await;
                Err(e.into())
            }
        }
    }
}

#[async_trait::async_trait]
impl LockStore for EtcdStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), StoreError> {
        self.client
            .get_or_try_init(|| async {
                trace!("connecting to etcd {:?}", self.endpoints);
                Client::connect(self.endpoints.as_slice(), self.options.clone()).await
            })
            .await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.txn_with_lease(ttl, |lease_id| {
            Txn::new()
                .when(vec![Compare::create_revision(resource, CompareOp::Equal, 0)])
                .and_then(vec![TxnOp::put(
                    resource,
                    token,
                    Some(PutOptions::new().with_lease(lease_id)),
                )])
        })
        .await
    }

    async fn compare_and_delete(&self, resource: &str, token: &str) -> Result<u64, StoreError> {
        let mut client = self.client()?;
        let txn = Txn::new()
            .when(vec![Compare::value(resource, CompareOp::Equal, token)])
            .and_then(vec![TxnOp::delete(resource, None)]);
        let resp = client.txn(txn).await?;
        Ok(if resp.succeeded() { 1 } else { 0 })
    }

    async fn compare_and_extend(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.txn_with_lease(ttl, |lease_id| {
            Txn::new()
                .when(vec![Compare::value(resource, CompareOp::Equal, token)])
                .and_then(vec![TxnOp::put(
                    resource,
                    token,
                    Some(PutOptions::new().with_lease(lease_id)),
                )])
        })
        .await
    }
}
