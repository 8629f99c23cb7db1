//! # Radio Transport Collaborator
//!
//! The responder never talks to hardware directly. It depends on two traits:
//!
//! - [`Connector`] opens a session to a radio (and is asked again after every failure)
//! - [`RadioTransport`] is one live session: node table, text sending, event feed,
//!   link health and close
//!
//! Inbound traffic is delivered as [`TransportEvent`]s on an unbounded channel handed
//! out by [`RadioTransport::subscribe`]. A subscription belongs to exactly one session;
//! after a reconnect the caller must subscribe again.
//!
//! All packet and telemetry types here are transport-neutral so the interpreter and the
//! directory can be exercised without protobuf support compiled in. The Meshtastic
//! implementation lives in [`crate::meshtastic`], an in-memory one in [`mock`].

pub mod mock;

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use tokio::sync::mpsc;

/// `Data.portnum` value of plain UTF-8 text messages (`TEXT_MESSAGE_APP`).
pub const TEXT_MESSAGE_APP: i32 = 1;

/// A Meshtastic node number. Displays as `!1a2b3c4d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const BROADCAST: NodeId = NodeId(0xffff_ffff);

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node id '{0}' (expected !hex, 0xhex or decimal)")]
pub struct ParseNodeIdError(pub String);

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let parsed = if let Some(hex) = t.strip_prefix('!') {
            u32::from_str_radix(hex, 16)
        } else if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16)
        } else {
            t.parse::<u32>()
        };
        parsed.map(NodeId).map_err(|_| ParseNodeIdError(t.to_string()))
    }
}

/// Last reported GPS fix of a node, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<i32>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5},{:.5}", self.latitude, self.longitude)?;
        if let Some(alt) = self.altitude {
            write!(f, " alt={}m", alt)?;
        }
        Ok(())
    }
}

/// Raw per-node data as a transport reports it. Every field except the id is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeTelemetry {
    pub num: NodeId,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub rssi: Option<i32>,
    pub snr: Option<f32>,
    pub battery_level: Option<u32>,
    /// Unix seconds.
    pub last_heard: Option<u32>,
    pub position: Option<Position>,
    pub hops_away: Option<u32>,
}

impl NodeTelemetry {
    pub fn new(num: NodeId) -> Self {
        Self {
            num,
            ..Default::default()
        }
    }
}

/// Where an outbound text goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Broadcast { channel: u32 },
    Direct { node: NodeId },
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Broadcast { channel } => write!(f, "channel {}", channel),
            Destination::Direct { node } => write!(f, "DM {}", node),
        }
    }
}

/// Decoded application payload of a mesh packet.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub portnum: i32,
    pub payload: Vec<u8>,
}

/// One received mesh packet. `decoded` is `None` for packets the radio could not
/// decrypt or that carried no application data.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundPacket {
    pub from: NodeId,
    pub to: Option<NodeId>,
    pub channel: u32,
    pub decoded: Option<DecodedPayload>,
    pub rx_rssi: Option<i32>,
    pub rx_snr: Option<f32>,
}

impl InboundPacket {
    pub fn new(from: NodeId, portnum: i32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            from,
            to: None,
            channel: 0,
            decoded: Some(DecodedPayload {
                portnum,
                payload: payload.into(),
            }),
            rx_rssi: None,
            rx_snr: None,
        }
    }

    /// A `TEXT_MESSAGE_APP` packet carrying `text`.
    pub fn text(from: NodeId, text: &str) -> Self {
        Self::new(from, TEXT_MESSAGE_APP, text.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Packet(InboundPacket),
    /// The session is dead; the subscriber should reconnect.
    LinkLost(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid radio address '{0}'")]
    InvalidAddress(String),

    #[error("radio device not found: {0}")]
    DeviceNotFound(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("radio link lost: {0}")]
    LinkLost(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("text too large ({len} bytes, max {max})")]
    PayloadTooLarge { len: usize, max: usize },
}

impl TransportError {
    /// Errors that retrying cannot fix; fatal when hit on the first connect.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::InvalidAddress(_) | TransportError::DeviceNotFound(_)
        )
    }

    /// Errors that mean the session is gone and a full reconnect is required.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::LinkLost(_) | TransportError::Connect(_)
        )
    }
}

/// One live radio session.
pub trait RadioTransport: Send {
    /// Current node table, keyed by node id.
    fn nodes(&self) -> HashMap<NodeId, NodeTelemetry>;

    fn send_text(
        &mut self,
        text: &str,
        dest: Destination,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Start a new event subscription. Any previous subscription of this session is
    /// closed.
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TransportEvent>;

    /// Health check run from the idle tick. Transports may also use it for keepalives.
    fn poll_link(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release the session. Must not fail on an already broken link.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens radio sessions.
pub trait Connector: Send {
    type Transport: RadioTransport;

    fn open(&mut self) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;

    /// Address label for logs.
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display_and_parse() {
        let id = NodeId(0x1a2b3c4d);
        assert_eq!(id.to_string(), "!1a2b3c4d");
        assert_eq!("!1a2b3c4d".parse::<NodeId>().unwrap(), id);
        assert_eq!("0x1A2B3C4D".parse::<NodeId>().unwrap(), id);
        assert_eq!("439041101".parse::<NodeId>().unwrap(), id);
        assert!("!zz".parse::<NodeId>().is_err());
        assert!(NodeId::BROADCAST.is_broadcast());
    }

    #[test]
    fn node_id_serializes_as_string() {
        let json = serde_json::to_string(&NodeId(0xab)).unwrap();
        assert_eq!(json, "\"!000000ab\"");
    }

    #[test]
    fn position_display() {
        let p = Position {
            latitude: 50.088041,
            longitude: 14.420761,
            altitude: Some(235),
        };
        assert_eq!(p.to_string(), "50.08804,14.42076 alt=235m");
        let p = Position {
            altitude: None,
            ..p
        };
        assert_eq!(p.to_string(), "50.08804,14.42076");
    }

    #[test]
    fn error_classification() {
        assert!(TransportError::InvalidAddress("x".into()).is_fatal());
        assert!(TransportError::DeviceNotFound("/dev/x".into()).is_fatal());
        let io = TransportError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(io.is_link_failure());
        assert!(!io.is_fatal());
        assert!(!TransportError::PayloadTooLarge { len: 300, max: 228 }.is_link_failure());
    }
}
