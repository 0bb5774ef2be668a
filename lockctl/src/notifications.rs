//! Parsing of device-initiated notifications (already decrypted by the
//! caller — see [`crate::commands::LockCommands::handle_notification_frame`]).

use crate::commands::{door_state_name, lock_state_name, trigger_name, DOOR_STATE_UNKNOWN, STATUS_JAMMED};

pub const NOTIFY_LOCK_STATUS_CHANGE: u8 = 0xBA;
pub const NOTIFY_SIGNED_DATETIME: u8 = 0x7B;
pub const NOTIFY_NEED_DATE_TIME: u8 = 0xA4;
pub const NOTIFY_DEVICE_STATS: u8 = 0xE2;

/// A `LOCK_STATUS_CHANGE` notification's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatusChange {
    pub lock_state: u8,
    pub status: u8,
    pub trigger: u8,
    /// Non-zero for user-initiated actions; identifies who triggered it.
    pub access_id: u32,
    pub door_state: u8,
}

impl LockStatusChange {
    pub fn is_jammed(&self) -> bool {
        self.status == STATUS_JAMMED
    }

    pub fn state_name(&self) -> &'static str {
        lock_state_name(self.lock_state)
    }

    pub fn trigger_name(&self) -> &'static str {
        trigger_name(self.trigger)
    }

    pub fn door_name(&self) -> &'static str {
        door_state_name(self.door_state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    LockStatusChange(LockStatusChange),
    NeedDateTime,
    SignedDateTimeAck { result: u8 },
    DeviceStats { raw: Vec<u8> },
    Unknown { id: u8, raw: Vec<u8> },
}

/// Parse an already-decrypted notification payload. Returns `None` only for
/// an empty payload; anything else is at least an `Unknown` variant.
pub fn parse_notification(data: &[u8]) -> Option<Notification> {
    let notify_id = *data.first()?;

    if notify_id == NOTIFY_LOCK_STATUS_CHANGE {
        let lock_state = data.get(1).copied().unwrap_or(0xFF);
        let status = data.get(2).copied().unwrap_or(0x00);
        let trigger = data.get(3).copied().unwrap_or(0xFF);
        let door_state = data.get(9).copied().unwrap_or(DOOR_STATE_UNKNOWN);
        let access_id = if data.len() > 7 {
            u32::from_be_bytes([data[4], data[5], data[6], data[7]])
        } else {
            0
        };

        let change = LockStatusChange { lock_state, status, trigger, access_id, door_state };
        tracing::info!(
            state = change.state_name(),
            jammed = change.is_jammed(),
            trigger = change.trigger_name(),
            access_id,
            door = change.door_name(),
            "lock status change"
        );
        return Some(Notification::LockStatusChange(change));
    }

    if notify_id == NOTIFY_NEED_DATE_TIME {
        return Some(Notification::NeedDateTime);
    }

    if notify_id == NOTIFY_SIGNED_DATETIME {
        let result = data.get(1).copied().unwrap_or(0xFF);
        return Some(Notification::SignedDateTimeAck { result });
    }

    if notify_id == NOTIFY_DEVICE_STATS {
        return Some(Notification::DeviceStats { raw: data[1..].to_vec() });
    }

    tracing::debug!(id = notify_id, "unknown notification");
    Some(Notification::Unknown { id: notify_id, raw: data.to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lock_status_change() {
        let mut data = vec![NOTIFY_LOCK_STATUS_CHANGE, 0x06, 0x00, 0x01];
        data.extend_from_slice(&42u32.to_be_bytes());
        data.extend_from_slice(&[0, 0x02]);

        let parsed = parse_notification(&data).unwrap();
        match parsed {
            Notification::LockStatusChange(change) => {
                assert_eq!(change.lock_state, 0x06);
                assert_eq!(change.trigger, 0x01);
                assert_eq!(change.access_id, 42);
                assert_eq!(change.door_state, 0x02);
                assert!(!change.is_jammed());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parses_need_datetime() {
        assert_eq!(parse_notification(&[NOTIFY_NEED_DATE_TIME]), Some(Notification::NeedDateTime));
    }

    #[test]
    fn parses_unknown_id() {
        let parsed = parse_notification(&[0x01, 0x02]).unwrap();
        assert_eq!(parsed, Notification::Unknown { id: 0x01, raw: vec![0x01, 0x02] });
    }

    #[test]
    fn empty_payload_is_none() {
        assert_eq!(parse_notification(&[]), None);
    }
}
