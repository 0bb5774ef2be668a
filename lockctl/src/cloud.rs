//! The cloud API surface the coordinator consumes: mobile registration,
//! device certificate issuance, signed time, and the activity-derived user
//! map. No HTTP client is implemented here — callers bring their own and
//! implement [`CloudApi`] against it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The mobile access certificate issued for one registered client, used as
/// the `certificate` bytes in [`ptls::PtlsSession::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateBundle {
    pub certificate: Vec<u8>,
    /// RFC 3339 timestamp; see [`certificate_needs_refresh`].
    pub expiration_date: String,
}

/// A signed wall-clock time blob, pushed to the lock via
/// `LockCommands::set_signed_time` before any other command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTimeBlob {
    pub datetime: Vec<u8>,
    pub signature: Vec<u8>,
}

/// userId -> display name, built from device activity logs.
pub type UserMap = HashMap<u32, String>;

#[derive(Debug, thiserror::Error)]
#[error("cloud API request failed with status {status}: {message}")]
pub struct CloudApiError {
    pub status: u16,
    pub message: String,
}

/// The cloud API contract the coordinator depends on. Implementations own
/// authentication, transport, and retry policy; this trait only describes
/// the calls the coordinator needs.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Register this client's public key with the cloud, returning the
    /// assigned mobile id.
    async fn register_mobile(&self, public_key_b64: &str, name: &str) -> Result<String, CloudApiError>;

    /// Fetch the BLE access certificate for a registered mobile/device pair.
    async fn get_device_certificate(&self, mobile_id: &str, device_id: u64) -> Result<CertificateBundle, CloudApiError>;

    /// Fetch a freshly signed wall-clock time blob.
    async fn get_signed_time(&self) -> Result<SignedTimeBlob, CloudApiError>;

    /// Build a userId -> name map from this device's recent activity log.
    async fn get_user_map(&self, device_id: u64) -> Result<UserMap, CloudApiError>;
}

/// Whether a certificate with the given RFC 3339 expiration should be
/// refreshed (fewer than 5 days remaining). Fails open — a missing or
/// unparseable expiration is treated as "needs refresh".
pub fn certificate_needs_refresh(expiration_date: &str) -> bool {
    if expiration_date.is_empty() {
        return true;
    }
    match DateTime::parse_from_rfc3339(expiration_date) {
        Ok(exp) => {
            let remaining = exp.with_timezone(&Utc) - Utc::now();
            remaining < chrono::Duration::days(5)
        }
        Err(_) => true,
    }
}
