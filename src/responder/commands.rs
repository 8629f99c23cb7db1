//! Keyword interpreter.
//!
//! Matches are exact up to ASCII case: `PING` matches, ` ping`, `ping\n` and
//! `ping me` do not. Everything here is pure so it can be driven from tests
//! with a fixed clock and a hand-built directory.

use crate::config::{InfoFields, PingReplyMode, ResponderConfig};
use crate::directory::{NodeDirectory, NodeRecord};
use crate::logutil::truncate_utf8;
use crate::transport::{Destination, InboundPacket, NodeId, TEXT_MESSAGE_APP};
use chrono::NaiveDateTime;
use log::trace;
use std::fmt::Display;

/// Rendered in place of any value the directory does not have.
pub const NOT_AVAILABLE: &str = "N/A";

const PONG_TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
const LAST_HEARD_FORMAT: &str = "%d/%m/%Y %H:%M:%S UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Info,
    InfoTest,
}

impl Command {
    pub fn parse(text: &str) -> Option<Command> {
        if text.eq_ignore_ascii_case("ping") {
            Some(Command::Ping)
        } else if text.eq_ignore_ascii_case("info") {
            Some(Command::Info)
        } else if text.eq_ignore_ascii_case("infotest") {
            Some(Command::InfoTest)
        } else {
            None
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Info => "info",
            Command::InfoTest => "infotest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("packet carries no decoded payload")]
    MissingPayload,

    #[error("not a text message (portnum {0})")]
    NotText(i32),

    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,
}

/// A text message ready for interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub sender: NodeId,
    pub channel: u32,
    pub text: String,
}

impl InboundMessage {
    pub fn new(sender: NodeId, text: impl Into<String>) -> Self {
        Self {
            sender,
            channel: 0,
            text: text.into(),
        }
    }

    pub fn from_packet(packet: &InboundPacket) -> Result<Self, DecodeError> {
        let decoded = packet.decoded.as_ref().ok_or(DecodeError::MissingPayload)?;
        if decoded.portnum != TEXT_MESSAGE_APP {
            return Err(DecodeError::NotText(decoded.portnum));
        }
        let text = std::str::from_utf8(&decoded.payload).map_err(|_| DecodeError::InvalidUtf8)?;
        Ok(Self {
            sender: packet.from,
            channel: packet.channel,
            text: text.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundReply {
    pub text: String,
    pub dest: Destination,
}

/// Reply-shaping settings, taken from `[responder]` and the broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplyPolicy {
    pub ping_reply: PingReplyMode,
    pub info_fields: InfoFields,
    pub channel: u32,
    pub max_reply_bytes: usize,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self::from_config(&ResponderConfig::default(), 1)
    }
}

impl ReplyPolicy {
    pub fn from_config(responder: &ResponderConfig, channel: u32) -> Self {
        Self {
            ping_reply: responder.ping_reply,
            info_fields: responder.info_fields,
            channel,
            max_reply_bytes: responder.max_reply_bytes,
        }
    }

    fn reply(&self, text: String, dest: Destination) -> OutboundReply {
        let text = truncate_utf8(&text, self.max_reply_bytes).to_string();
        OutboundReply { text, dest }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    NoOp,
    Reply(OutboundReply),
    /// Rebuild the directory, then answer with [`node_report`].
    RefreshAndReply { sender: NodeId, sender_name: String },
}

fn or_na<T: Display>(v: Option<T>) -> String {
    v.map(|x| x.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// SNR keeps its decimal point: `-7.0`, `5.5`.
fn snr_or_na(v: Option<f32>) -> String {
    v.map(|x| format!("{:?}", x))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

pub fn interpret(
    message: &InboundMessage,
    directory: &NodeDirectory,
    now: NaiveDateTime,
    policy: &ReplyPolicy,
) -> Action {
    let Some(command) = Command::parse(&message.text) else {
        return Action::NoOp;
    };
    let sender = message.sender;
    trace!("matched '{}' from {}", command.keyword(), sender);
    let direct = Destination::Direct { node: sender };

    match command {
        Command::Ping => {
            let dest = match policy.ping_reply {
                PingReplyMode::Direct => direct,
                PingReplyMode::Channel => Destination::Broadcast {
                    channel: policy.channel,
                },
            };
            let text = format!("pong - [{}]", now.format(PONG_TIME_FORMAT));
            Action::Reply(policy.reply(text, dest))
        }
        Command::Info => {
            let record = directory.lookup(sender);
            let snr = snr_or_na(record.and_then(|r| r.snr));
            let text = match policy.info_fields {
                InfoFields::RssiSnr => {
                    format!("RSSI : {} SNR : {}", or_na(record.and_then(|r| r.rssi)), snr)
                }
                InfoFields::BatterySnr => format!(
                    "Battery : {} SNR : {}",
                    or_na(record.and_then(|r| r.battery_level)),
                    snr
                ),
            };
            Action::Reply(policy.reply(text, direct))
        }
        Command::InfoTest => Action::RefreshAndReply {
            sender,
            sender_name: directory.short_name(sender).to_string(),
        },
    }
}

/// Full status line for `infotest`, built from a freshly refreshed directory.
pub fn node_report(
    sender: NodeId,
    sender_name: &str,
    directory: &NodeDirectory,
    policy: &ReplyPolicy,
) -> OutboundReply {
    let record: Option<&NodeRecord> = directory.lookup(sender);
    let text = format!(
        "Node info for {} (ID: {}): RSSI: {}, SNR: {}, Last Heard: {}, Battery Level: {}, Position: {}",
        sender_name,
        sender,
        or_na(record.and_then(|r| r.rssi)),
        snr_or_na(record.and_then(|r| r.snr)),
        or_na(record.and_then(|r| r.last_heard).map(|t| t.format(LAST_HEARD_FORMAT))),
        or_na(record.and_then(|r| r.battery_level)),
        or_na(record.and_then(|r| r.position)),
    );
    policy.reply(text, Destination::Direct { node: sender })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NodeTelemetry;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(7, 5, 3)
            .unwrap()
    }

    #[test]
    fn parse_folds_case_only() {
        assert_eq!(Command::parse("PiNg"), Some(Command::Ping));
        assert_eq!(Command::parse("INFO"), Some(Command::Info));
        assert_eq!(Command::parse("infoTest"), Some(Command::InfoTest));
        assert_eq!(Command::parse(" ping"), None);
        assert_eq!(Command::parse("ping\n"), None);
        assert_eq!(Command::parse("\tinfo "), None);
        assert_eq!(Command::parse("ping me"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn snr_keeps_decimal_point() {
        assert_eq!(snr_or_na(Some(-7.0)), "-7.0");
        assert_eq!(snr_or_na(Some(5.5)), "5.5");
        assert_eq!(snr_or_na(Some(-3.25)), "-3.25");
        assert_eq!(snr_or_na(None), "N/A");
    }

    #[test]
    fn decode_rejects_non_text() {
        let mut packet = InboundPacket::new(NodeId(1), 3, vec![1, 2, 3]);
        assert_eq!(
            InboundMessage::from_packet(&packet),
            Err(DecodeError::NotText(3))
        );
        packet.decoded = None;
        assert_eq!(
            InboundMessage::from_packet(&packet),
            Err(DecodeError::MissingPayload)
        );
        let packet = InboundPacket::new(NodeId(1), TEXT_MESSAGE_APP, vec![0xff, 0xfe]);
        assert_eq!(
            InboundMessage::from_packet(&packet),
            Err(DecodeError::InvalidUtf8)
        );
    }

    #[test]
    fn ping_formats_local_time() {
        let msg = InboundMessage::new(NodeId(5), "ping");
        let action = interpret(&msg, &NodeDirectory::default(), now(), &ReplyPolicy::default());
        assert_eq!(
            action,
            Action::Reply(OutboundReply {
                text: "pong - [09/03/2024 07:05:03]".to_string(),
                dest: Destination::Direct { node: NodeId(5) },
            })
        );
    }

    #[test]
    fn infotest_report_lists_every_field() {
        let mut t = NodeTelemetry::new(NodeId(0x1a2b3c4d));
        t.short_name = Some("ABC".into());
        t.rssi = Some(-80);
        t.snr = Some(5.5);
        t.battery_level = Some(87);
        t.last_heard = Some(1_700_000_000);
        let dir = NodeDirectory::from_telemetry(vec![t]);
        let reply = node_report(NodeId(0x1a2b3c4d), "ABC", &dir, &ReplyPolicy {
            max_reply_bytes: 228,
            ..ReplyPolicy::default()
        });
        assert_eq!(
            reply.text,
            "Node info for ABC (ID: !1a2b3c4d): RSSI: -80, SNR: 5.5, \
             Last Heard: 14/11/2023 22:13:20 UTC, Battery Level: 87, Position: N/A"
        );
    }

    #[test]
    fn replies_are_cut_to_limit() {
        let policy = ReplyPolicy {
            max_reply_bytes: 16,
            ..ReplyPolicy::default()
        };
        let reply = node_report(NodeId(1), "X", &NodeDirectory::default(), &policy);
        assert_eq!(reply.text, "Node info for X ");
    }
}
