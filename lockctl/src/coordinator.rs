//! Connection lifecycle: connect/reconnect with backoff, a background
//! notification loop with keep-alive polling, certificate refresh, and the
//! command methods entities call.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ptls::{crypto::IdentityKeyPair, PtlsSession, Transport};

use crate::cloud::{certificate_needs_refresh, CloudApi};
use crate::commands::{LockCommands, DOOR_STATE_UNKNOWN, LOCK_NONE, LOCK_STATE_UNKNOWN, STATUS_OK, UNLOCK_NONE};
use crate::credentials::{CredentialStore, CredentialsUpdate};
use crate::error::{LockCtlError, Result};
use crate::notifications::Notification;

const RECONNECT_DELAYS: &[u64] = &[2, 5, 10, 30, 60];
/// Suggested interval for callers to drive [`Coordinator::poll`] on their
/// own timer, as a fallback when BLE notifications go quiet.
pub const POLL_INTERVAL: Duration = Duration::from_secs(600);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(45);
const CERT_CHECK_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// Builds a fresh transport for one connection attempt. Reconnecting means
/// tearing down and rebuilding the whole BLE link, so the coordinator needs
/// a factory rather than a single owned transport.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    type Transport: Transport;

    async fn connect(&self) -> ptls::Result<Self::Transport>;
}

/// The lock's externally observable state, published over [`Coordinator::observe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockObservation {
    pub lock_state: u8,
    pub status: u8,
    pub door_state: u8,
    pub battery_level: Option<u8>,
    pub battery_charging: bool,
    pub available: bool,
    pub last_trigger: String,
    pub last_user: String,
}

impl Default for LockObservation {
    fn default() -> Self {
        Self {
            lock_state: LOCK_STATE_UNKNOWN,
            status: STATUS_OK,
            door_state: DOOR_STATE_UNKNOWN,
            battery_level: None,
            battery_charging: false,
            available: false,
            last_trigger: "unknown".to_string(),
            last_user: String::new(),
        }
    }
}

struct Connected<T: Transport> {
    lock: LockCommands<T>,
}

/// Owns one lock's connection lifecycle: connect/disconnect, reconnect
/// backoff, the notification-loop background task, keep-alive scheduling,
/// and certificate refresh.
pub struct Coordinator<F: TransportFactory, C: CloudApi, S: CredentialStore> {
    factory: F,
    cloud: Arc<C>,
    credentials: Arc<S>,

    /// Lets `&self` methods hand a task an owned `Arc<Self>` to outlive the
    /// call (spawned notification loop, reconnect retries) without requiring
    /// every caller to carry one around.
    self_weak: Weak<Self>,

    connecting_lock: AsyncMutex<()>,
    command_lock: AsyncMutex<()>,
    connected: AsyncMutex<Option<Arc<Connected<F::Transport>>>>,

    notification_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    reconnect_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    reconnect_attempt: AtomicUsize,
    shutting_down: AtomicBool,
    last_cert_check: std::sync::Mutex<Option<Instant>>,

    state: watch::Sender<LockObservation>,
}

impl<F, C, S> Coordinator<F, C, S>
where
    F: TransportFactory + 'static,
    C: CloudApi + 'static,
    S: CredentialStore + 'static,
{
    pub fn new(factory: F, cloud: Arc<C>, credentials: Arc<S>) -> Arc<Self> {
        let (state, _) = watch::channel(LockObservation::default());
        Arc::new_cyclic(|weak| Self {
            factory,
            cloud,
            credentials,
            self_weak: weak.clone(),
            connecting_lock: AsyncMutex::new(()),
            command_lock: AsyncMutex::new(()),
            connected: AsyncMutex::new(None),
            notification_task: std::sync::Mutex::new(None),
            reconnect_task: std::sync::Mutex::new(None),
            reconnect_attempt: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            last_cert_check: std::sync::Mutex::new(None),
            state,
        })
    }

    /// An owned handle to this coordinator, for handing to a spawned task.
    fn arc_self(&self) -> Arc<Self> {
        self.self_weak
            .upgrade()
            .expect("coordinator outlives any method call on it")
    }

    pub fn observe(&self) -> watch::Receiver<LockObservation> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LockObservation {
        self.state.borrow().clone()
    }

    pub async fn is_connected(&self) -> bool {
        match self.current().await {
            Some(c) => c.lock.session().is_established(),
            None => false,
        }
    }

    /// A cheap snapshot of the current connection, if any — cloning the
    /// `Arc` and releasing the mutex immediately so long-running operations
    /// (a blocking notification read, a 10s command) never hold it.
    async fn current(&self) -> Option<Arc<Connected<F::Transport>>> {
        self.connected.lock().await.clone()
    }

    fn publish(&self, f: impl FnOnce(&mut LockObservation)) {
        self.state.send_modify(f);
    }

    /// Run the full connection sequence: cert refresh, transport+handshake
    /// (with cert-rejected / no-trusted-time retry), initial state fetch,
    /// then spawn the notification loop.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connecting_lock.lock().await;
        if self.is_connected().await {
            debug!("already connected, skipping");
            return Ok(());
        }

        info!("connecting");
        self.refresh_certificate_if_needed().await?;

        let (session, needs_signed_time) = self.establish_session().await?;
        let lock = LockCommands::new(session, self.state.borrow().door_state);

        if needs_signed_time {
            let signed_time = self.cloud.get_signed_time().await.map_err(|e| LockCtlError::Cloud(e.message))?;
            lock.set_signed_time(&crate::commands::SignedDateTime {
                datetime: signed_time.datetime,
                signature: signed_time.signature,
            })
            .await?;
        }

        lock.drain_pending_notifications().await.ok();

        match lock.get_state().await {
            Ok(s) => self.publish(|st| {
                st.lock_state = s.lock_state;
                st.status = s.status;
                if s.door_state != DOOR_STATE_UNKNOWN {
                    st.door_state = s.door_state;
                }
            }),
            Err(e) => warn!(error = %e, "failed to get initial lock state"),
        }
        match lock.get_battery().await {
            Ok(b) => self.publish(|st| {
                st.battery_level = Some(b.level);
                st.battery_charging = b.is_charging;
            }),
            Err(e) => warn!(error = %e, "failed to get initial battery"),
        }

        self.publish(|st| st.available = true);
        self.reconnect_attempt.store(0, Ordering::SeqCst);

        *self.connected.lock().await = Some(Arc::new(Connected { lock }));

        let this = self.arc_self();
        let handle = tokio::spawn(async move { this.notification_loop().await });
        *self.notification_task.lock().unwrap() = Some(handle);

        info!("connected successfully");
        Ok(())
    }

    /// Build a transport and run the handshake, retrying once against a
    /// freshly refreshed certificate or signed time if the device rejects
    /// the first attempt for exactly those reasons.
    async fn establish_session(&self) -> Result<(PtlsSession<F::Transport>, bool)> {
        let session = self.build_session().await?;
        match session.handshake().await {
            Ok(()) => return Ok((session, false)),
            Err(ptls::PtlsError::Alert(ptls::error::AlertCode::InvalidCertificate)) => {
                warn!("certificate rejected by device, forcing refresh");
                self.force_refresh_certificate().await?;
            }
            Err(ptls::PtlsError::Alert(ptls::error::AlertCode::NoTrustedTime)) => {
                warn!("device has no trusted time, fetching and retrying");
                let session = self.build_session().await?;
                session.handshake().await?;
                return Ok((session, true));
            }
            Err(other) => return Err(other.into()),
        }

        let session = self.build_session().await?;
        session.handshake().await?;
        Ok((session, false))
    }

    async fn build_session(&self) -> Result<PtlsSession<F::Transport>> {
        let transport = self.factory.connect().await?;
        let creds = self
            .credentials
            .load()
            .await
            .map_err(|e| LockCtlError::Credentials(e.to_string()))?;
        let identity = IdentityKeyPair::from_pkcs8_der(&creds.identity.identity_private_key_der)
            .map_err(LockCtlError::Ptls)?;
        let device_public_key = ptls::crypto::verifying_key_from_sec1_bytes(&creds.identity.device_public_key)
            .map_err(LockCtlError::Ptls)?;
        Ok(PtlsSession::new(transport, identity, creds.certificate.certificate, device_public_key))
    }

    pub async fn disconnect(&self) {
        if let Some(handle) = self.notification_task.lock().unwrap().take() {
            handle.abort();
        }
        *self.connected.lock().await = None;
    }

    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reconnect_task.lock().unwrap().take() {
            handle.abort();
        }
        self.disconnect().await;
    }

    fn on_disconnect(&self) {
        warn!("BLE disconnected");
        self.publish(|st| st.available = false);
        if !self.shutting_down.load(Ordering::SeqCst) {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&self) {
        let mut guard = self.reconnect_task.lock().unwrap();
        if guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        let attempt = self.reconnect_attempt.fetch_add(1, Ordering::SeqCst);
        let delay_idx = attempt.min(RECONNECT_DELAYS.len() - 1);
        let delay = Duration::from_secs(RECONNECT_DELAYS[delay_idx]);
        info!(delay_secs = delay.as_secs(), attempt, "scheduling reconnect");

        let this = self.arc_self();
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.disconnect().await;
            if let Err(err) = this.connect().await {
                warn!(error = %err, "reconnect failed");
                if !this.shutting_down.load(Ordering::SeqCst) {
                    this.schedule_reconnect();
                }
            }
        }));
    }

    /// Background loop: wait for a notification, falling back to a
    /// keep-alive `get_state` if none arrives before the device's BLE idle
    /// timeout. Exits (and triggers reconnect) on an unrecoverable error.
    async fn notification_loop(self: Arc<Self>) {
        debug!("notification loop started");
        let mut last_activity = Instant::now();

        loop {
            if !self.is_connected().await {
                break;
            }

            let elapsed = last_activity.elapsed();
            let wait_time = KEEPALIVE_INTERVAL.saturating_sub(elapsed).max(Duration::from_secs(1));
            let deadline = Instant::now() + wait_time;

            let Some(connected) = self.current().await else { break };
            let frame = tokio::time::timeout_at(deadline, connected.lock.session().transport().read_notification()).await;

            match frame {
                Ok(Ok(frame)) => {
                    last_activity = Instant::now();
                    self.handle_notification(&frame).await;
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "notification read error");
                    break;
                }
                Err(_) => {
                    if let Err(err) = self.send_keepalive().await {
                        warn!(error = %err, "keep-alive failed");
                        break;
                    }
                    last_activity = Instant::now();
                }
            }
        }

        debug!("notification loop ended");
        self.on_disconnect();
    }

    async fn send_keepalive(&self) -> Result<()> {
        let _cmd_guard = self.command_lock.lock().await;
        let connected = self.current().await.ok_or(LockCtlError::NotConnected)?;
        let s = connected.lock.get_state().await?;
        self.publish(|st| {
            st.lock_state = s.lock_state;
            st.status = s.status;
            if s.door_state != DOOR_STATE_UNKNOWN {
                st.door_state = s.door_state;
            }
        });
        Ok(())
    }

    async fn handle_notification(&self, frame: &[u8]) {
        let Some(connected) = self.current().await else { return };
        let notification = match connected.lock.handle_notification_frame(frame).await {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "failed to handle notification");
                return;
            }
        };

        let Some(notification) = notification else { return };
        debug!(?notification, "notification received");

        match notification {
            Notification::LockStatusChange(change) => {
                let username = if change.access_id != 0 {
                    Some(self.resolve_user(change.access_id).await)
                } else {
                    None
                };
                self.publish(|st| {
                    st.lock_state = change.lock_state;
                    st.status = change.status;
                    st.last_trigger = change.trigger_name().to_string();
                    st.last_user = username.unwrap_or_default();
                    if change.door_state != DOOR_STATE_UNKNOWN {
                        st.door_state = change.door_state;
                    }
                });
            }
            Notification::NeedDateTime => {
                info!("lock requests time sync");
                if let Err(err) = self.handle_time_sync_request().await {
                    warn!(error = %err, "failed to sync time");
                }
            }
            Notification::SignedDateTimeAck { result } => {
                debug!(result, "signed datetime ack");
            }
            Notification::DeviceStats { .. } | Notification::Unknown { .. } => {}
        }
    }

    async fn handle_time_sync_request(&self) -> Result<()> {
        let signed_time = self.cloud.get_signed_time().await.map_err(|e| LockCtlError::Cloud(e.message))?;
        let _cmd_guard = self.command_lock.lock().await;
        let connected = self.current().await.ok_or(LockCtlError::NotConnected)?;
        connected
            .lock
            .set_signed_time(&crate::commands::SignedDateTime { datetime: signed_time.datetime, signature: signed_time.signature })
            .await
    }

    /// Resolve an access id to a display name, refreshing the user map from
    /// the cloud once if it isn't already known, falling back to the
    /// stringified id if the refresh also fails.
    async fn resolve_user(&self, access_id: u32) -> String {
        let creds = match self.credentials.load().await {
            Ok(c) => c,
            Err(_) => return access_id.to_string(),
        };
        if let Some(name) = creds.user_map.get(&access_id) {
            return name.clone();
        }

        match self.cloud.get_user_map(creds.identity.device_id).await {
            Ok(user_map) => {
                let name = user_map.get(&access_id).cloned().unwrap_or_else(|| access_id.to_string());
                let _ = self.credentials.store(CredentialsUpdate { certificate: None, user_map: Some(user_map) }).await;
                name
            }
            Err(_) => {
                debug!(access_id, "failed to refresh user map");
                access_id.to_string()
            }
        }
    }

    /// Polling fallback: certificate freshness check, reconnect if needed,
    /// then a fresh state+battery read.
    pub async fn poll(&self) -> Result<LockObservation> {
        let should_check_cert = {
            let mut guard = self.last_cert_check.lock().unwrap();
            let due = guard.map(|t| t.elapsed() >= CERT_CHECK_INTERVAL).unwrap_or(true);
            if due {
                *guard = Some(Instant::now());
            }
            due
        };
        if should_check_cert {
            if let Err(err) = self.refresh_certificate_if_needed().await {
                warn!(error = %err, "certificate check failed");
            }
        }

        if !self.is_connected().await {
            if self.reconnect_task.lock().unwrap().as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
                debug!("reconnect already in progress, skipping poll reconnect");
                return Ok(self.state());
            }
            self.disconnect().await;
            if let Err(err) = self.connect().await {
                warn!(error = %err, "poll reconnect failed");
                self.publish(|st| st.available = false);
                return Ok(self.state());
            }
        }

        let _cmd_guard = self.command_lock.lock().await;
        if let Some(connected) = self.current().await {
            match connected.lock.get_state().await {
                Ok(s) => self.publish(|st| {
                    st.lock_state = s.lock_state;
                    st.status = s.status;
                    if s.door_state != DOOR_STATE_UNKNOWN {
                        st.door_state = s.door_state;
                    }
                }),
                Err(err) => warn!(error = %err, "failed to poll lock state"),
            }
            match connected.lock.get_battery().await {
                Ok(b) => self.publish(|st| {
                    st.battery_level = Some(b.level);
                    st.battery_charging = b.is_charging;
                }),
                Err(err) => warn!(error = %err, "failed to poll battery"),
            }
        }

        Ok(self.state())
    }

    // ─── command methods ───

    pub async fn lock(&self) -> Result<()> {
        let _cmd_guard = self.command_lock.lock().await;
        let connected = self.current().await.ok_or(LockCtlError::NotConnected)?;
        connected.lock.lock(LOCK_NONE).await?;
        Ok(())
    }

    pub async fn unlock(&self, auto_pull: bool) -> Result<()> {
        let _cmd_guard = self.command_lock.lock().await;
        let connected = self.current().await.ok_or(LockCtlError::NotConnected)?;
        if auto_pull {
            connected.lock.unlock_and_pull().await?;
        } else {
            connected.lock.unlock(UNLOCK_NONE).await?;
        }
        Ok(())
    }

    pub async fn open(&self) -> Result<()> {
        let _cmd_guard = self.command_lock.lock().await;
        let connected = self.current().await.ok_or(LockCtlError::NotConnected)?;
        connected.lock.pull_spring().await?;
        Ok(())
    }

    // ─── certificate / signed time ───

    async fn refresh_certificate_if_needed(&self) -> Result<()> {
        let creds = self.credentials.load().await.map_err(|e| LockCtlError::Credentials(e.to_string()))?;
        if !certificate_needs_refresh(&creds.certificate.expiration_date) {
            return Ok(());
        }
        self.force_refresh_certificate().await
    }

    async fn force_refresh_certificate(&self) -> Result<()> {
        info!("refreshing certificate");
        let creds = self.credentials.load().await.map_err(|e| LockCtlError::Credentials(e.to_string()))?;
        let bundle = self
            .cloud
            .get_device_certificate(&creds.identity.mobile_id, creds.identity.device_id)
            .await
            .map_err(|e| LockCtlError::Cloud(e.message))?;
        let user_map = self
            .cloud
            .get_user_map(creds.identity.device_id)
            .await
            .map_err(|e| LockCtlError::Cloud(e.message))?;

        self.credentials
            .store(CredentialsUpdate { certificate: Some(bundle.clone()), user_map: Some(user_map) })
            .await
            .map_err(|e| LockCtlError::Credentials(e.to_string()))?;
        info!(expires = %bundle.expiration_date, "certificate refreshed");
        Ok(())
    }
}
