//! Meshtastic client API session.
//!
//! [`MeshtasticConnector::open`] opens the byte link, asks the radio for its node
//! database (`want_config_id`) and waits until the radio echoes the id back in
//! `config_complete_id` or the config timeout passes. A pump task then decodes every
//! `FromRadio` frame: node table updates are applied to shared state and mesh packets
//! are forwarded to the current subscriber.

use super::framing::{encode_frame, StreamFramer};
use super::link::{Link, LinkChunk, RadioAddress};
use crate::config::{MeshtasticConfig, MAX_TEXT_PAYLOAD_BYTES};
use crate::logutil::{escape_log, hex_snippet};
use crate::protobuf::meshtastic_generated as proto;
use crate::transport::{
    Connector, DecodedPayload, Destination, InboundPacket, NodeId, NodeTelemetry, Position,
    RadioTransport, TransportError, TransportEvent,
};
use log::{debug, info, trace, warn};
use prost::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const DEFAULT_HOP_LIMIT: u32 = 3;

fn nonzero_random() -> u32 {
    loop {
        let v: u32 = rand::random();
        if v != 0 {
            return v;
        }
    }
}

/// Node table and session flags shared between the pump task and the device.
#[derive(Debug, Default)]
pub struct RadioState {
    nodes: HashMap<NodeId, NodeTelemetry>,
    our_node: Option<NodeId>,
    config_id: u32,
    config_complete: bool,
    link_error: Option<String>,
    subscriber: Option<mpsc::UnboundedSender<TransportEvent>>,
}

impl RadioState {
    pub fn new(config_id: u32) -> Self {
        Self {
            config_id,
            ..Default::default()
        }
    }

    pub fn nodes(&self) -> &HashMap<NodeId, NodeTelemetry> {
        &self.nodes
    }

    pub fn our_node(&self) -> Option<NodeId> {
        self.our_node
    }

    pub fn config_complete(&self) -> bool {
        self.config_complete
    }

    /// Apply one `FromRadio`. Returns the packet to forward, if any.
    pub fn apply_from_radio(&mut self, msg: proto::FromRadio) -> Option<InboundPacket> {
        use proto::from_radio::PayloadVariant as FR;
        match msg.payload_variant? {
            FR::MyInfo(info) => {
                let id = NodeId(info.my_node_num);
                if self.our_node != Some(id) {
                    info!("Radio node id is {}", id);
                }
                self.our_node = Some(id);
                None
            }
            FR::NodeInfo(n) => {
                self.apply_node_info(n);
                None
            }
            FR::ConfigCompleteId(id) => {
                if id == self.config_id {
                    debug!("Config complete ({} nodes)", self.nodes.len());
                    self.config_complete = true;
                } else {
                    debug!(
                        "Ignoring config_complete_id 0x{:08x} (expected 0x{:08x})",
                        id, self.config_id
                    );
                }
                None
            }
            FR::Packet(pkt) => self.apply_packet(pkt),
            FR::LogRecord(rec) => {
                debug!("Radio log: {}", escape_log(&rec.message));
                None
            }
            FR::Rebooted(_) => {
                warn!("Radio reported a reboot");
                self.fail("radio rebooted");
                None
            }
        }
    }

    fn apply_node_info(&mut self, n: proto::NodeInfo) {
        let id = NodeId(n.num);
        if id.is_broadcast() {
            return;
        }
        let entry = self
            .nodes
            .entry(id)
            .or_insert_with(|| NodeTelemetry::new(id));
        if let Some(user) = &n.user {
            set_names(entry, user);
        }
        if n.snr != 0.0 {
            entry.snr = Some(n.snr);
        }
        if n.last_heard != 0 {
            entry.last_heard = Some(n.last_heard);
        }
        if let Some(battery) = n.device_metrics.as_ref().and_then(|m| m.battery_level) {
            entry.battery_level = Some(battery);
        }
        if let Some(pos) = n.position.as_ref().and_then(to_position) {
            entry.position = Some(pos);
        }
        if n.hops_away.is_some() {
            entry.hops_away = n.hops_away;
        }
        trace!("node info {} ({:?})", id, entry.short_name);
    }

    fn apply_packet(&mut self, pkt: proto::MeshPacket) -> Option<InboundPacket> {
        use proto::mesh_packet::PayloadVariant as MP;
        let from = NodeId(pkt.from);
        if pkt.from == 0 || from.is_broadcast() {
            return None;
        }

        let rx_rssi = (pkt.rx_rssi != 0).then_some(pkt.rx_rssi);
        let rx_snr = (pkt.rx_snr != 0.0).then_some(pkt.rx_snr);
        let entry = self
            .nodes
            .entry(from)
            .or_insert_with(|| NodeTelemetry::new(from));
        if rx_rssi.is_some() {
            entry.rssi = rx_rssi;
        }
        if rx_snr.is_some() {
            entry.snr = rx_snr;
        }
        if pkt.rx_time != 0 {
            entry.last_heard = Some(pkt.rx_time);
        }
        if pkt.hop_start > 0 && pkt.hop_start >= pkt.hop_limit {
            entry.hops_away = Some(pkt.hop_start - pkt.hop_limit);
        }

        let decoded = match pkt.payload_variant {
            Some(MP::Decoded(data)) => {
                apply_app_payload(entry, data.portnum, &data.payload);
                Some(DecodedPayload {
                    portnum: data.portnum,
                    payload: data.payload.to_vec(),
                })
            }
            Some(MP::Encrypted(bytes)) => {
                trace!("encrypted packet from {} ({} bytes)", from, bytes.len());
                None
            }
            None => None,
        };

        if self.our_node == Some(from) {
            trace!("ignoring own packet");
            return None;
        }
        Some(InboundPacket {
            from,
            to: (pkt.to != 0).then_some(NodeId(pkt.to)),
            channel: pkt.channel,
            decoded,
            rx_rssi,
            rx_snr,
        })
    }

    fn forward(&mut self, event: TransportEvent) {
        let closed = match &self.subscriber {
            Some(tx) => tx.send(event).is_err(),
            None => false,
        };
        if closed {
            self.subscriber = None;
        }
    }

    /// Mark the session dead and tell the subscriber. Only the first reason sticks.
    fn fail(&mut self, reason: &str) {
        if self.link_error.is_none() {
            self.link_error = Some(reason.to_string());
            self.forward(TransportEvent::LinkLost(reason.to_string()));
        }
    }
}

fn set_names(entry: &mut NodeTelemetry, user: &proto::User) {
    let short = user.short_name.trim();
    if !short.is_empty() {
        entry.short_name = Some(short.to_string());
    }
    let long = user.long_name.trim();
    if !long.is_empty() {
        entry.long_name = Some(long.to_string());
    }
}

fn to_position(p: &proto::Position) -> Option<Position> {
    match (p.latitude_i, p.longitude_i) {
        (Some(lat), Some(lon)) if lat != 0 || lon != 0 => Some(Position {
            latitude: lat as f64 * 1e-7,
            longitude: lon as f64 * 1e-7,
            altitude: p.altitude.or(p.altitude_hae),
        }),
        _ => None,
    }
}

/// Fold node-describing app payloads (user, position, device metrics) into the table.
fn apply_app_payload(entry: &mut NodeTelemetry, portnum: i32, payload: &[u8]) {
    match proto::PortNum::try_from(portnum).unwrap_or(proto::PortNum::UnknownApp) {
        proto::PortNum::NodeinfoApp => {
            if let Ok(user) = proto::User::decode(payload) {
                set_names(entry, &user);
                debug!("NODEINFO {}: {:?} / {:?}", entry.num, entry.short_name, entry.long_name);
            }
        }
        proto::PortNum::PositionApp => {
            if let Some(pos) = proto::Position::decode(payload).ok().as_ref().and_then(to_position) {
                debug!("POSITION {}: {}", entry.num, pos);
                entry.position = Some(pos);
            }
        }
        proto::PortNum::TelemetryApp => {
            if let Ok(proto::Telemetry {
                variant: Some(proto::telemetry::Variant::DeviceMetrics(dm)),
                ..
            }) = proto::Telemetry::decode(payload)
            {
                if let Some(battery) = dm.battery_level {
                    debug!("TELEMETRY {}: battery {}%", entry.num, battery);
                    entry.battery_level = Some(battery);
                }
            }
        }
        proto::PortNum::TextMessageApp => {}
        other => trace!("{:?} from {}: {}", other, entry.num, hex_snippet(payload, 16)),
    }
}

fn lock(state: &Mutex<RadioState>) -> MutexGuard<'_, RadioState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reads link chunks, frames and decodes them, and updates `state`.
async fn pump(
    mut chunks: mpsc::UnboundedReceiver<LinkChunk>,
    state: Arc<Mutex<RadioState>>,
    ready: watch::Sender<bool>,
) {
    let mut framer = StreamFramer::new();
    loop {
        let chunk = match chunks.recv().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                lock(&state).fail(&format!("read error: {}", e));
                break;
            }
            None => {
                lock(&state).fail("link reader stopped");
                break;
            }
        };
        framer.push(&chunk);
        while let Some(frame) = framer.next_frame() {
            let msg = match proto::FromRadio::decode(frame.as_slice()) {
                Ok(m) => m,
                Err(e) => {
                    debug!("Undecodable FromRadio ({} bytes): {} {}", frame.len(), e, hex_snippet(&frame, 16));
                    continue;
                }
            };
            let mut st = lock(&state);
            if let Some(packet) = st.apply_from_radio(msg) {
                st.forward(TransportEvent::Packet(packet));
            }
            if st.config_complete && !*ready.borrow() {
                let _ = ready.send(true);
            }
        }
        let skipped = framer.take_skipped();
        if skipped > 0 {
            trace!("skipped {} non-frame bytes", skipped);
        }
    }
}

/// Opens Meshtastic sessions over serial or TCP.
#[derive(Debug, Clone)]
pub struct MeshtasticConnector {
    address: RadioAddress,
    config_timeout: Duration,
    heartbeat_interval: Duration,
}

impl MeshtasticConnector {
    pub fn from_config(cfg: &MeshtasticConfig) -> Result<Self, TransportError> {
        Ok(Self {
            address: RadioAddress::from_config(cfg)?,
            config_timeout: cfg.config_timeout(),
            heartbeat_interval: cfg.heartbeat_interval(),
        })
    }

    pub fn address(&self) -> &RadioAddress {
        &self.address
    }
}

impl Connector for MeshtasticConnector {
    type Transport = MeshtasticDevice;

    async fn open(&mut self) -> Result<MeshtasticDevice, TransportError> {
        let (link, chunks) = Link::open(&self.address).await?;
        let config_id = nonzero_random();
        let state = Arc::new(Mutex::new(RadioState::new(config_id)));
        let (ready_tx, mut ready_rx) = watch::channel(false);
        let pump = tokio::spawn(pump(chunks, Arc::clone(&state), ready_tx));

        let mut device = MeshtasticDevice {
            link,
            state,
            pump,
            heartbeat_interval: self.heartbeat_interval,
            last_heartbeat: Instant::now(),
        };

        debug!("Requesting node database (want_config_id=0x{:08x})", config_id);
        device
            .send_to_radio(proto::to_radio::PayloadVariant::WantConfigId(config_id))
            .await?;

        let handshake = tokio::time::timeout(self.config_timeout, ready_rx.wait_for(|done| *done))
            .await
            .map(|r| r.is_ok());
        match handshake {
            Ok(true) => {}
            Ok(false) => {
                let reason = lock(&device.state)
                    .link_error
                    .clone()
                    .unwrap_or_else(|| "link closed during config".to_string());
                device.close().await;
                return Err(TransportError::LinkLost(reason));
            }
            Err(_) => warn!(
                "Radio config not complete after {}s; continuing with {} known nodes",
                self.config_timeout.as_secs(),
                lock(&device.state).nodes.len()
            ),
        }
        Ok(device)
    }

    fn describe(&self) -> String {
        self.address.to_string()
    }
}

/// One connected radio.
#[derive(Debug)]
pub struct MeshtasticDevice {
    link: Link,
    state: Arc<Mutex<RadioState>>,
    pump: JoinHandle<()>,
    heartbeat_interval: Duration,
    last_heartbeat: Instant,
}

impl MeshtasticDevice {
    pub fn our_node(&self) -> Option<NodeId> {
        lock(&self.state).our_node
    }

    async fn send_to_radio(
        &mut self,
        variant: proto::to_radio::PayloadVariant,
    ) -> Result<(), TransportError> {
        let msg = proto::ToRadio {
            payload_variant: Some(variant),
        };
        let frame = encode_frame(&msg.encode_to_vec())?;
        self.link.write_frame(&frame).await
    }

    fn check_link(&self) -> Result<(), TransportError> {
        if let Some(reason) = &lock(&self.state).link_error {
            return Err(TransportError::LinkLost(reason.clone()));
        }
        if self.pump.is_finished() {
            return Err(TransportError::LinkLost("reader task ended".to_string()));
        }
        Ok(())
    }
}

impl RadioTransport for MeshtasticDevice {
    fn nodes(&self) -> HashMap<NodeId, NodeTelemetry> {
        lock(&self.state).nodes.clone()
    }

    async fn send_text(&mut self, text: &str, dest: Destination) -> Result<(), TransportError> {
        use proto::mesh_packet::{PayloadVariant as MP, Priority};
        if text.len() > MAX_TEXT_PAYLOAD_BYTES {
            return Err(TransportError::PayloadTooLarge {
                len: text.len(),
                max: MAX_TEXT_PAYLOAD_BYTES,
            });
        }
        self.check_link()?;

        let from = self.our_node().map(|n| n.0).unwrap_or(0);
        let (to, channel, direct) = match dest {
            Destination::Direct { node } => (node.0, 0, true),
            Destination::Broadcast { channel } => (NodeId::BROADCAST.0, channel, false),
        };
        let id = nonzero_random();
        let packet = proto::MeshPacket {
            from,
            to,
            channel,
            id,
            hop_limit: DEFAULT_HOP_LIMIT,
            want_ack: direct,
            priority: if direct { Priority::Reliable as i32 } else { 0 },
            payload_variant: Some(MP::Decoded(proto::Data {
                portnum: proto::PortNum::TextMessageApp as i32,
                payload: bytes::Bytes::copy_from_slice(text.as_bytes()),
                ..Default::default()
            })),
            ..Default::default()
        };
        self.send_to_radio(proto::to_radio::PayloadVariant::Packet(packet))
            .await?;
        debug!(
            "Sent text id=0x{:08x} to {} ({} bytes, want_ack={})",
            id,
            dest,
            text.len(),
            direct
        );
        Ok(())
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut st = lock(&self.state);
        if let Some(reason) = &st.link_error {
            let _ = tx.send(TransportEvent::LinkLost(reason.clone()));
        }
        st.subscriber = Some(tx);
        rx
    }

    async fn poll_link(&mut self) -> Result<(), TransportError> {
        self.check_link()?;
        if self.last_heartbeat.elapsed() >= self.heartbeat_interval {
            self.last_heartbeat = Instant::now();
            let nonce: u32 = rand::random();
            self.send_to_radio(proto::to_radio::PayloadVariant::Heartbeat(
                proto::Heartbeat { nonce },
            ))
            .await?;
            trace!("heartbeat sent");
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.check_link().is_ok() {
            let _ = self
                .send_to_radio(proto::to_radio::PayloadVariant::Disconnect(true))
                .await;
        }
        self.link.shutdown().await;
        self.pump.abort();
        lock(&self.state).subscriber = None;
        debug!("Radio session closed");
    }
}
