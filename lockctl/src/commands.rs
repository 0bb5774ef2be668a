//! Opcodes, result/state tables, and the lock command interface sent over
//! an established [`ptls::PtlsSession`].

use std::time::Duration;

use tracing::{debug, info};

use ptls::{PtlsSession, Transport};

use crate::error::{LockCtlError, Result};

pub const CMD_GET_BATTERY: u8 = 0x0C;
pub const CMD_LOCK: u8 = 0x50;
pub const CMD_UNLOCK: u8 = 0x51;
pub const CMD_PULL_SPRING: u8 = 0x52;
pub const CMD_GET_STATE: u8 = 0x5A;
pub const CMD_SET_SIGNED_DATETIME: u8 = 0x71;

pub const UNLOCK_NONE: u8 = 0x00;
pub const UNLOCK_AUTO: u8 = 0x01;
pub const UNLOCK_FORCE: u8 = 0x02;

pub const LOCK_NONE: u8 = 0x00;
pub const LOCK_FORCE: u8 = 0x02;

pub const RESULT_SUCCESS: u8 = 0x00;
pub const RESULT_INVALID_PARAM: u8 = 0x01;
pub const RESULT_ERROR: u8 = 0x02;
pub const RESULT_BUSY: u8 = 0x03;
pub const RESULT_NOT_CALIBRATED: u8 = 0x05;

/// Human-readable names for command result codes, for logging and
/// diagnostics only — callers should match on the numeric code.
pub fn result_name(code: u8) -> &'static str {
    match code {
        0x00 => "SUCCESS",
        0x01 => "INVALID_PARAM",
        0x02 => "ERROR",
        0x03 => "BUSY",
        0x05 => "NOT_CALIBRATED",
        0x06 => "ALREADY_CALLED_BY_AUTOUNLOCK",
        0x08 => "NOT_CONFIGURED",
        0x09 => "DISMOUNTED",
        0x0A => "ALREADY_CALLED_BY_OTHER_OPERATION",
        _ => "UNKNOWN",
    }
}

pub const LOCK_STATE_UNCALIBRATED: u8 = 0x00;
pub const LOCK_STATE_CALIBRATION: u8 = 0x01;
pub const LOCK_STATE_UNLOCKED: u8 = 0x02;
pub const LOCK_STATE_PARTIALLY_UNLOCKED: u8 = 0x03;
pub const LOCK_STATE_UNLOCKING: u8 = 0x04;
pub const LOCK_STATE_LOCKING: u8 = 0x05;
pub const LOCK_STATE_LOCKED: u8 = 0x06;
pub const LOCK_STATE_PULL_SPRING: u8 = 0x07;
pub const LOCK_STATE_PULLING: u8 = 0x08;
pub const LOCK_STATE_UNKNOWN: u8 = 0x09;

pub fn lock_state_name(code: u8) -> &'static str {
    match code {
        0x00 => "UNCALIBRATED",
        0x01 => "CALIBRATION",
        0x02 => "UNLOCKED",
        0x03 => "PARTIALLY_UNLOCKED",
        0x04 => "UNLOCKING",
        0x05 => "LOCKING",
        0x06 => "LOCKED",
        0x07 => "PULL_SPRING",
        0x08 => "PULLING",
        0x09 => "UNKNOWN",
        _ => "UNKNOWN",
    }
}

pub const STATUS_OK: u8 = 0x00;
pub const STATUS_JAMMED: u8 = 0x01;

pub const DOOR_STATE_UNKNOWN: u8 = 0x00;
pub const DOOR_STATE_OPEN: u8 = 0x02;
pub const DOOR_STATE_CLOSED: u8 = 0x03;

pub fn door_state_name(code: u8) -> &'static str {
    match code {
        0x00 => "UNKNOWN",
        0x02 => "OPEN",
        0x03 => "CLOSED",
        _ => "UNKNOWN",
    }
}

/// Byte 3 of a `LOCK_STATUS_CHANGE` notification.
pub const TRIGGER_BUTTON: u8 = 0x01;
pub const TRIGGER_REMOTE: u8 = 0x02;
pub const TRIGGER_AUTO_LOCK: u8 = 0x04;
pub const TRIGGER_DOOR_SENSOR: u8 = 0x10;

pub fn trigger_name(code: u8) -> &'static str {
    match code {
        0x01 => "button",
        0x02 => "remote",
        0x04 => "auto_lock",
        0x10 => "door_sensor",
        _ => "unknown",
    }
}

/// `(lock_state, jam_status, door_state)`, as returned by [`LockCommands::get_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    pub lock_state: u8,
    pub status: u8,
    pub door_state: u8,
}

impl LockState {
    pub fn is_jammed(&self) -> bool {
        self.status == STATUS_JAMMED
    }
}

/// Batter level (0-100) and charging flag, as returned by
/// [`LockCommands::get_battery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    pub level: u8,
    pub is_charging: bool,
}

/// Signed wall-clock time blob as handed back by the cloud API, ready to be
/// pushed to the lock with [`LockCommands::set_signed_time`].
#[derive(Debug, Clone)]
pub struct SignedDateTime {
    pub datetime: Vec<u8>,
    pub signature: Vec<u8>,
}

/// The high-level lock command interface, built on one established PTLS
/// session. Tracks the door sensor's last known state across calls, since
/// `get_state` itself does not report it (it only arrives in notifications).
pub struct LockCommands<T: Transport> {
    session: PtlsSession<T>,
    door_state: std::sync::Mutex<u8>,
}

impl<T: Transport> LockCommands<T> {
    pub fn new(session: PtlsSession<T>, initial_door_state: u8) -> Self {
        Self {
            session,
            door_state: std::sync::Mutex::new(initial_door_state),
        }
    }

    pub fn session(&self) -> &PtlsSession<T> {
        &self.session
    }

    pub fn door_state(&self) -> u8 {
        *self.door_state.lock().unwrap()
    }

    async fn send_command(&self, command: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let encrypted = self.session.encrypt(command)?;
        self.session.transport().write_command(&encrypted).await?;

        let response = tokio::time::timeout(timeout, self.session.transport().read_command_response())
            .await
            .map_err(|_| LockCtlError::CommandTimeout)??;
        let decrypted = self.session.decrypt(&response).await?;
        debug!(raw = ?decrypted, "command response");

        if decrypted.is_empty() {
            return Err(LockCtlError::ResponseTooShort { expected: 1, actual: 0 });
        }
        // response format: [opcode] [result_code] [data...]
        Ok(decrypted[1..].to_vec())
    }

    fn require_success(response: &[u8], opcode: u8) -> Result<u8> {
        let result = *response
            .first()
            .ok_or(LockCtlError::ResponseTooShort { expected: 1, actual: 0 })?;
        if result != RESULT_SUCCESS {
            return Err(LockCtlError::CommandFailed { opcode, result, result_name: result_name(result) });
        }
        Ok(result)
    }

    /// Push a signed wall-clock time to the lock. Must be called first after
    /// the session is established, before any other command will succeed.
    pub async fn set_signed_time(&self, signed_time: &SignedDateTime) -> Result<()> {
        let mut payload = vec![CMD_SET_SIGNED_DATETIME];
        payload.extend_from_slice(&signed_time.datetime);
        payload.extend_from_slice(&signed_time.signature);

        info!("setting signed datetime");
        let response = self.send_command(&payload, Duration::from_secs(10)).await?;
        Self::require_success(&response, CMD_SET_SIGNED_DATETIME)?;
        info!("signed datetime set");
        Ok(())
    }

    /// Unlock the door in the given mode (`UNLOCK_NONE`/`UNLOCK_AUTO`/`UNLOCK_FORCE`).
    pub async fn unlock(&self, mode: u8) -> Result<u8> {
        let command = [CMD_UNLOCK, mode];
        info!(mode, "sending unlock command");
        let response = self.send_command(&command, Duration::from_secs(10)).await?;
        let result = Self::require_success(&response, CMD_UNLOCK)?;
        info!("unlock command accepted");
        Ok(result)
    }

    /// Unlock in `UNLOCK_AUTO` mode, then poll `get_state` every 500ms for
    /// up to 15s waiting for `LOCK_STATE_UNLOCKED` before pulling the spring.
    pub async fn unlock_and_pull(&self) -> Result<()> {
        self.unlock(UNLOCK_AUTO).await?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            let state = self.get_state().await?;
            if state.lock_state == LOCK_STATE_UNLOCKED {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LockCtlError::AutoPullTimeout);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        self.pull_spring().await?;
        Ok(())
    }

    /// Lock the door in the given mode (`LOCK_NONE`/`LOCK_FORCE`).
    pub async fn lock(&self, mode: u8) -> Result<u8> {
        let command = [CMD_LOCK, mode];
        info!(mode, "sending lock command");
        let response = self.send_command(&command, Duration::from_secs(10)).await?;
        let result = Self::require_success(&response, CMD_LOCK)?;
        info!("lock command accepted");
        Ok(result)
    }

    /// Activate the pull-spring mechanism.
    pub async fn pull_spring(&self) -> Result<u8> {
        let command = [CMD_PULL_SPRING];
        info!("sending pull spring command");
        let response = self.send_command(&command, Duration::from_secs(10)).await?;
        let result = Self::require_success(&response, CMD_PULL_SPRING)?;
        info!("pull spring command accepted");
        Ok(result)
    }

    /// Read the current lock state. Door state is carried over from the
    /// last `LOCK_STATUS_CHANGE` notification seen, since this command does
    /// not report it directly.
    pub async fn get_state(&self) -> Result<LockState> {
        let command = [CMD_GET_STATE];
        let response = self.send_command(&command, Duration::from_secs(10)).await?;
        Self::require_success(&response, CMD_GET_STATE)?;

        let lock_state = *response.get(1).ok_or(LockCtlError::ResponseTooShort { expected: 2, actual: response.len() })?;
        let status = response.get(2).copied().unwrap_or(STATUS_OK);
        let door_state = self.door_state();

        info!(
            state = lock_state_name(lock_state),
            jammed = status == STATUS_JAMMED,
            door = door_state_name(door_state),
            "lock state"
        );
        Ok(LockState { lock_state, status, door_state })
    }

    /// Read battery level and charging status.
    pub async fn get_battery(&self) -> Result<BatteryStatus> {
        let command = [CMD_GET_BATTERY];
        info!("getting battery info");
        let response = self.send_command(&command, Duration::from_secs(10)).await?;
        Self::require_success(&response, CMD_GET_BATTERY)?;

        let level = *response.get(1).ok_or(LockCtlError::ResponseTooShort { expected: 2, actual: response.len() })?;
        let is_charging = response.get(2).map(|&b| b == 1).unwrap_or(false);

        info!(level, is_charging, "battery status");
        Ok(BatteryStatus { level, is_charging })
    }

    /// Drain any notifications already pending right after connect, so a
    /// stale `LOCK_STATUS_CHANGE` doesn't get mistaken for a fresh event.
    pub async fn drain_pending_notifications(&self) -> Result<Vec<crate::notifications::Notification>> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut drained = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_millis(300), self.session.transport().read_notification()).await {
                Ok(Ok(frame)) => {
                    if let Some(notification) = self.handle_notification_frame(&frame).await? {
                        drained.push(notification);
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }
        Ok(drained)
    }

    /// Decrypt and parse one raw notification frame, updating the tracked
    /// door state as a side effect of lock-state-change notifications.
    pub async fn handle_notification_frame(&self, frame: &[u8]) -> Result<Option<crate::notifications::Notification>> {
        let plaintext = match self.session.decrypt(frame).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decrypt notification");
                return Ok(None);
            }
        };
        let notification = crate::notifications::parse_notification(&plaintext);
        if let Some(crate::notifications::Notification::LockStatusChange(ref change)) = notification {
            if change.door_state != DOOR_STATE_UNKNOWN {
                *self.door_state.lock().unwrap() = change.door_state;
            }
        }
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_name_lookup() {
        assert_eq!(result_name(RESULT_SUCCESS), "SUCCESS");
        assert_eq!(result_name(0x0A), "ALREADY_CALLED_BY_OTHER_OPERATION");
        assert_eq!(result_name(0xFF), "UNKNOWN");
    }

    #[test]
    fn lock_state_name_lookup() {
        assert_eq!(lock_state_name(LOCK_STATE_LOCKED), "LOCKED");
        assert_eq!(lock_state_name(0xFF), "UNKNOWN");
    }

    #[test]
    fn lock_state_jam_detection() {
        let state = LockState { lock_state: LOCK_STATE_LOCKED, status: STATUS_JAMMED, door_state: DOOR_STATE_CLOSED };
        assert!(state.is_jammed());
    }
}
