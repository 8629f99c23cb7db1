//! In-memory radio for tests and dry runs.
//!
//! A [`MockRadio`] is a cloneable handle to shared state. Hand its [`MockConnector`]
//! to the responder, then drive traffic from the test: inject packets, drop the link,
//! script connection failures, and inspect what was sent.
//!
//! ```rust
//! use meshping::transport::mock::MockRadio;
//! use meshping::transport::{InboundPacket, NodeId};
//!
//! let radio = MockRadio::new();
//! radio.upsert_node_named(NodeId(0x1a2b3c4d), "ABC");
//! let connector = radio.connector();
//! # let _ = connector;
//! assert!(!radio.inject(InboundPacket::text(NodeId(0x1a2b3c4d), "ping"))); // nobody subscribed yet
//! ```

use super::{
    Connector, Destination, InboundPacket, NodeId, NodeTelemetry, RadioTransport,
    TransportError, TransportEvent,
};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// A text the responder asked the radio to send.
#[derive(Debug, Clone, PartialEq)]
pub struct SentText {
    pub text: String,
    pub dest: Destination,
    /// Session (1-based, one per successful open) the send went through.
    pub session: u64,
}

#[derive(Debug, Default)]
struct MockState {
    nodes: HashMap<NodeId, NodeTelemetry>,
    sent: Vec<SentText>,
    open_failures: VecDeque<TransportError>,
    open_attempts: usize,
    session: u64,
    subscriber: Option<(u64, mpsc::UnboundedSender<TransportEvent>)>,
    broken_session: Option<u64>,
    failing_sends: usize,
    closes: usize,
    node_reads: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    state: Arc<Mutex<MockState>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            radio: self.clone(),
        }
    }

    pub fn upsert_node(&self, telemetry: NodeTelemetry) {
        self.lock().nodes.insert(telemetry.num, telemetry);
    }

    pub fn upsert_node_named(&self, id: NodeId, short_name: &str) {
        let mut t = NodeTelemetry::new(id);
        t.short_name = Some(short_name.to_string());
        self.upsert_node(t);
    }

    pub fn remove_node(&self, id: NodeId) {
        self.lock().nodes.remove(&id);
    }

    /// Make the next `open()` fail with `err`. Calls queue up in order.
    pub fn push_open_failure(&self, err: TransportError) {
        self.lock().open_failures.push_back(err);
    }

    /// Make the next `n` opens fail with a refused connection.
    pub fn fail_next_opens(&self, n: usize) {
        for _ in 0..n {
            self.push_open_failure(TransportError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )));
        }
    }

    /// Make the next `n` sends fail with a broken pipe.
    pub fn fail_next_sends(&self, n: usize) {
        self.lock().failing_sends = n;
    }

    /// Deliver a packet to the current subscriber. Returns false if nobody listens.
    pub fn inject(&self, packet: InboundPacket) -> bool {
        let state = self.lock();
        match &state.subscriber {
            Some((_, tx)) => tx.send(TransportEvent::Packet(packet)).is_ok(),
            None => false,
        }
    }

    /// Kill the current session and notify the subscriber, like a radio reset.
    pub fn drop_link(&self, reason: &str) {
        let mut state = self.lock();
        state.broken_session = Some(state.session);
        if let Some((_, tx)) = state.subscriber.take() {
            let _ = tx.send(TransportEvent::LinkLost(reason.to_string()));
        }
    }

    /// Kill the current session silently; only `poll_link` and sends notice.
    pub fn break_link(&self) {
        let mut state = self.lock();
        state.broken_session = Some(state.session);
    }

    pub fn sent(&self) -> Vec<SentText> {
        self.lock().sent.clone()
    }

    pub fn open_attempts(&self) -> usize {
        self.lock().open_attempts
    }

    /// Number of successful opens so far.
    pub fn sessions(&self) -> u64 {
        self.lock().session
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// How many times a transport's node table was read.
    pub fn node_reads(&self) -> usize {
        self.lock().node_reads
    }

    pub fn has_subscriber(&self) -> bool {
        self.lock().subscriber.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct MockConnector {
    radio: MockRadio,
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn open(&mut self) -> Result<MockTransport, TransportError> {
        let mut state = self.radio.lock();
        state.open_attempts += 1;
        if let Some(err) = state.open_failures.pop_front() {
            return Err(err);
        }
        state.session += 1;
        debug!("mock radio: session {} opened", state.session);
        Ok(MockTransport {
            radio: self.radio.clone(),
            session: state.session,
        })
    }

    fn describe(&self) -> String {
        "mock radio".to_string()
    }
}

#[derive(Debug)]
pub struct MockTransport {
    radio: MockRadio,
    session: u64,
}

impl MockTransport {
    pub fn session(&self) -> u64 {
        self.session
    }

    fn is_broken(&self, state: &MockState) -> bool {
        state.broken_session == Some(self.session) || state.session != self.session
    }
}

impl RadioTransport for MockTransport {
    fn nodes(&self) -> HashMap<NodeId, NodeTelemetry> {
        let mut state = self.radio.lock();
        state.node_reads += 1;
        state.nodes.clone()
    }

    async fn send_text(&mut self, text: &str, dest: Destination) -> Result<(), TransportError> {
        let mut state = self.radio.lock();
        if self.is_broken(&state) {
            return Err(TransportError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(TransportError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }
        state.sent.push(SentText {
            text: text.to_string(),
            dest,
            session: self.session,
        });
        Ok(())
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.radio.lock().subscriber = Some((self.session, tx));
        rx
    }

    async fn poll_link(&mut self) -> Result<(), TransportError> {
        let state = self.radio.lock();
        if self.is_broken(&state) {
            return Err(TransportError::LinkLost(format!(
                "mock session {} is down",
                self.session
            )));
        }
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.radio.lock();
        state.closes += 1;
        if matches!(state.subscriber, Some((s, _)) if s == self.session) {
            state.subscriber = None;
        }
    }
}
