//! Persisted credential contract: the coordinator owns mutation of
//! certificate/signed-time/user-map state through a small trait, since the
//! concrete storage medium (disk, a config entry, ...) is out of scope here.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::cloud::{CertificateBundle, UserMap};

/// This client's long-term identity: its ECDSA keypair (as PKCS#8 DER) and
/// the device's pinned public key (SEC1 uncompressed point).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockIdentity {
    pub device_id: u64,
    pub mobile_id: String,
    pub identity_private_key_der: Vec<u8>,
    pub device_public_key: Vec<u8>,
}

/// Everything the coordinator needs to establish a session, bundled for
/// one atomic load/store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockCredentials {
    pub identity: LockIdentity,
    pub certificate: CertificateBundle,
    #[serde(default)]
    pub user_map: UserMap,
}

/// A partial update merged into the stored credentials by [`CredentialStore::store`].
#[derive(Debug, Clone, Default)]
pub struct CredentialsUpdate {
    pub certificate: Option<CertificateBundle>,
    pub user_map: Option<UserMap>,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("no credentials stored yet")]
    NotFound,
    #[error("credential store backend error: {0}")]
    Backend(String),
}

/// The persistence contract the coordinator depends on.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<LockCredentials, CredentialStoreError>;

    /// Merge `update` into the stored credentials.
    async fn store(&self, update: CredentialsUpdate) -> Result<(), CredentialStoreError>;

    /// A channel that publishes the current credentials every time `store`
    /// changes them.
    fn observe(&self) -> watch::Receiver<Option<LockCredentials>>;
}

/// An in-memory reference implementation, used by tests and as a template
/// for a real backing store.
pub struct MemoryCredentialStore {
    state: RwLock<Option<LockCredentials>>,
    sender: watch::Sender<Option<LockCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new(initial: Option<LockCredentials>) -> Arc<Self> {
        let (sender, _) = watch::channel(initial.clone());
        Arc::new(Self { state: RwLock::new(initial), sender })
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<LockCredentials, CredentialStoreError> {
        self.state
            .read()
            .unwrap()
            .clone()
            .ok_or(CredentialStoreError::NotFound)
    }

    async fn store(&self, update: CredentialsUpdate) -> Result<(), CredentialStoreError> {
        let mut guard = self.state.write().unwrap();
        let current = guard.as_mut().ok_or(CredentialStoreError::NotFound)?;
        if let Some(certificate) = update.certificate {
            current.certificate = certificate;
        }
        if let Some(user_map) = update.user_map {
            current.user_map = user_map;
        }
        let snapshot = guard.clone();
        drop(guard);
        let _ = self.sender.send(snapshot);
        Ok(())
    }

    fn observe(&self) -> watch::Receiver<Option<LockCredentials>> {
        self.sender.subscribe()
    }
}
