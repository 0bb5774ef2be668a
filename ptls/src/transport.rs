//! The BLE byte-pipe contract a [`crate::session::PtlsSession`] is built on.
//!
//! A real implementation maps these calls onto BLE GATT characteristics:
//! handshake frames flow over a write characteristic and a notify
//! characteristic, command/response frames over an indicate
//! characteristic, and notifications over a second notify characteristic.
//! This crate has no BLE stack dependency itself — callers supply their
//! own `Transport`.

use async_trait::async_trait;

use crate::error::Result;

/// One logical BLE connection's three byte-channels: handshake,
/// command/response, and device-initiated notifications.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write a frame to the handshake characteristic.
    async fn write_handshake(&self, frame: &[u8]) -> Result<()>;

    /// Read the next frame from the handshake notify characteristic.
    async fn read_handshake(&self) -> Result<Vec<u8>>;

    /// Write a frame to the command characteristic.
    async fn write_command(&self, frame: &[u8]) -> Result<()>;

    /// Read the next frame from the command-response characteristic.
    async fn read_command_response(&self) -> Result<Vec<u8>>;

    /// Read the next frame from the notification characteristic.
    async fn read_notification(&self) -> Result<Vec<u8>>;

    /// The peer's advertised MTU, used to decide whether a handshake or
    /// command payload must be split across multiple writes.
    fn peer_mtu(&self) -> usize;

    /// Whether the underlying BLE connection is currently up.
    fn is_connected(&self) -> bool;
}

#[cfg(feature = "test-support")]
pub mod mock {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::Transport;
    use crate::error::{PtlsError, Result};

    /// An in-memory [`Transport`] double driven by test code, with one
    /// inbound queue per channel.
    pub struct MockTransport {
        handshake_in: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        command_in: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        notification_in: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        pub handshake_out: mpsc::UnboundedSender<Vec<u8>>,
        pub command_out: mpsc::UnboundedSender<Vec<u8>>,
        mtu: usize,
        connected: std::sync::atomic::AtomicBool,
    }

    pub struct MockTransportHandles {
        pub handshake_in: mpsc::UnboundedSender<Vec<u8>>,
        pub command_in: mpsc::UnboundedSender<Vec<u8>>,
        pub notification_in: mpsc::UnboundedSender<Vec<u8>>,
        pub handshake_out: mpsc::UnboundedReceiver<Vec<u8>>,
        pub command_out: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    impl MockTransport {
        pub fn new(mtu: usize) -> (Self, MockTransportHandles) {
            let (h_in_tx, h_in_rx) = mpsc::unbounded_channel();
            let (c_in_tx, c_in_rx) = mpsc::unbounded_channel();
            let (n_in_tx, n_in_rx) = mpsc::unbounded_channel();
            let (h_out_tx, h_out_rx) = mpsc::unbounded_channel();
            let (c_out_tx, c_out_rx) = mpsc::unbounded_channel();

            let transport = Self {
                handshake_in: Mutex::new(h_in_rx),
                command_in: Mutex::new(c_in_rx),
                notification_in: Mutex::new(n_in_rx),
                handshake_out: h_out_tx,
                command_out: c_out_tx,
                mtu,
                connected: std::sync::atomic::AtomicBool::new(true),
            };
            let handles = MockTransportHandles {
                handshake_in: h_in_tx,
                command_in: c_in_tx,
                notification_in: n_in_tx,
                handshake_out: h_out_rx,
                command_out: c_out_rx,
            };
            (transport, handles)
        }

        pub fn set_connected(&self, connected: bool) {
            self.connected
                .store(connected, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn write_handshake(&self, frame: &[u8]) -> Result<()> {
            self.handshake_out
                .send(frame.to_vec())
                .map_err(|_| PtlsError::Transport("handshake channel closed".into()))
        }

        async fn read_handshake(&self) -> Result<Vec<u8>> {
            self.handshake_in
                .lock()
                .unwrap()
                .recv()
                .await
                .ok_or(PtlsError::Disconnected)
        }

        async fn write_command(&self, frame: &[u8]) -> Result<()> {
            self.command_out
                .send(frame.to_vec())
                .map_err(|_| PtlsError::Transport("command channel closed".into()))
        }

        async fn read_command_response(&self) -> Result<Vec<u8>> {
            self.command_in
                .lock()
                .unwrap()
                .recv()
                .await
                .ok_or(PtlsError::Disconnected)
        }

        async fn read_notification(&self) -> Result<Vec<u8>> {
            self.notification_in
                .lock()
                .unwrap()
                .recv()
                .await
                .ok_or(PtlsError::Disconnected)
        }

        fn peer_mtu(&self) -> usize {
            self.mtu
        }

        fn is_connected(&self) -> bool {
            self.connected.load(std::sync::atomic::Ordering::SeqCst)
        }
    }
}
