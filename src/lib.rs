///
/// Provides the quorum lock manager
///
pub mod manager;

///
/// The lock value handed out by the manager
///
pub mod lock;

///
/// Store endpoint port and its implementations
///
pub mod store;

///
/// Monotonic time port
///
pub mod clock;

///
/// Token entropy port
///
pub mod random;

pub use {
    lock::{Lock, LockExpired},
    manager::{ConfigError, LockError, LockManager, LockManagerOptions},
    store::{LockStore, StoreError},
};
