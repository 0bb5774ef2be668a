//! Opcode command/notification protocol, cloud-API and credential
//! contracts, and the connection coordinator built on one [`ptls::PtlsSession`].

pub mod cloud;
pub mod commands;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod notifications;

pub use commands::{BatteryStatus, LockCommands, LockState};
pub use coordinator::{Coordinator, LockObservation, TransportFactory};
pub use error::{LockCtlError, Result};
pub use notifications::{Notification, LockStatusChange};
