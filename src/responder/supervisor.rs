//! Connection supervisor: opens radio sessions and keeps retrying.
//!
//! Every failed attempt is logged with its cause and followed by a fixed delay. The
//! only way out of the retry loop without a session is a shutdown request. Errors
//! that retrying cannot fix ([`TransportError::is_fatal`]) end the *initial* connect;
//! once the responder has been up, they are retried like anything else since a USB
//! radio that vanished may well be plugged back in.

use crate::metrics;
use crate::transport::{Connector, RadioTransport, TransportError};
use log::{info, warn};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Shut down; no further connects.
    Closed,
}

/// Resolves once `shutdown` carries `true`. Never resolves if the sender is gone
/// without having signalled.
pub async fn wait_for_stop(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub struct ConnectionSupervisor<C: Connector> {
    connector: C,
    retry_delay: Duration,
    state: LinkState,
    attempts: u64,
    reconnects: u64,
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(connector: C, retry_delay: Duration) -> Self {
        Self {
            connector,
            retry_delay,
            state: LinkState::Disconnected,
            attempts: 0,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Total `open()` calls made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Sessions re-established after a link failure.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// First connection at startup. `Ok(None)` means shutdown was requested.
    pub async fn connect_initial(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<C::Transport>, TransportError> {
        info!("Connecting to radio at {}", self.connector.describe());
        self.connect_loop(shutdown, true).await
    }

    /// Replace a lost session. Retries until it succeeds or shutdown is requested.
    pub async fn reconnect(&mut self, shutdown: &mut watch::Receiver<bool>) -> Option<C::Transport> {
        info!("Reconnecting to radio at {}", self.connector.describe());
        // fatal errors are retried here, so the loop never returns Err
        let transport = self.connect_loop(shutdown, false).await.ok().flatten();
        if transport.is_some() {
            self.reconnects += 1;
            metrics::inc_reconnects();
        }
        transport
    }

    /// Close a session. Safe to call on a link that already failed.
    pub async fn disconnect(&mut self, transport: &mut C::Transport) {
        transport.close().await;
        if self.state != LinkState::Closed {
            self.state = LinkState::Disconnected;
        }
    }

    pub fn close(&mut self) {
        self.state = LinkState::Closed;
    }

    async fn connect_loop(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        fatal_aborts: bool,
    ) -> Result<Option<C::Transport>, TransportError> {
        loop {
            if self.state == LinkState::Closed || *shutdown.borrow() {
                return Ok(None);
            }
            self.state = LinkState::Connecting;
            self.attempts += 1;
            metrics::inc_connect_attempts();

            let result = tokio::select! {
                r = self.connector.open() => r,
                _ = wait_for_stop(shutdown) => {
                    self.state = LinkState::Disconnected;
                    return Ok(None);
                }
            };

            match result {
                Ok(transport) => {
                    self.state = LinkState::Connected;
                    info!(
                        "Connected to radio at {} (attempt {})",
                        self.connector.describe(),
                        self.attempts
                    );
                    return Ok(Some(transport));
                }
                Err(e) if fatal_aborts && e.is_fatal() => {
                    self.state = LinkState::Disconnected;
                    return Err(e);
                }
                Err(e) => {
                    self.state = LinkState::Disconnected;
                    warn!(
                        "Connection to {} failed: {}; retrying in {}s",
                        self.connector.describe(),
                        e,
                        self.retry_delay.as_secs_f32()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_delay) => {}
                        _ = wait_for_stop(shutdown) => return Ok(None),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockRadio;

    #[tokio::test(start_paused = true)]
    async fn fatal_error_aborts_initial_connect_only() {
        let radio = MockRadio::new();
        radio.push_open_failure(TransportError::DeviceNotFound("/dev/ttyUSB9".into()));
        let (_tx, mut rx) = watch::channel(false);
        let mut sup = ConnectionSupervisor::new(radio.connector(), Duration::from_secs(5));
        let err = sup.connect_initial(&mut rx).await.err().unwrap();
        assert!(err.is_fatal());
        assert_eq!(sup.state(), LinkState::Disconnected);

        radio.push_open_failure(TransportError::DeviceNotFound("/dev/ttyUSB9".into()));
        let transport = sup.reconnect(&mut rx).await;
        assert!(transport.is_some());
        assert_eq!(sup.attempts(), 3);
        assert_eq!(sup.reconnects(), 1);
        assert_eq!(sup.state(), LinkState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let radio = MockRadio::new();
        radio.fail_next_opens(100);
        let (tx, mut rx) = watch::channel(false);
        let mut sup = ConnectionSupervisor::new(radio.connector(), Duration::from_secs(5));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            let _ = tx.send(true);
        });
        assert!(sup.reconnect(&mut rx).await.is_none());
        assert_eq!(radio.open_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_supervisor_never_connects() {
        let radio = MockRadio::new();
        let (_tx, mut rx) = watch::channel(false);
        let mut sup = ConnectionSupervisor::new(radio.connector(), Duration::from_secs(1));
        let mut transport = sup.connect_initial(&mut rx).await.unwrap().unwrap();
        sup.close();
        sup.disconnect(&mut transport).await;
        assert_eq!(sup.state(), LinkState::Closed);
        assert!(sup.reconnect(&mut rx).await.is_none());
        assert_eq!(radio.open_attempts(), 1);
        assert_eq!(radio.closes(), 1);
    }
}
