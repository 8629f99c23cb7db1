//! # Meshping - Keyword Auto-Responder for Meshtastic Networks
//!
//! Meshping sits on a Meshtastic radio (USB serial or TCP) and answers a handful of
//! keywords sent by other mesh nodes with status information about the sender:
//!
//! - `ping` → `pong - [DD/MM/YYYY HH:MM:SS]` (to the sender, or broadcast on a channel)
//! - `info` → `RSSI : <rssi> SNR : <snr>` from the cached node directory
//! - `infotest` → refreshes the node directory, then replies with RSSI, SNR, last heard,
//!   battery level and position
//!
//! Matching is case-insensitive and exact; anything else is ignored.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "meshtastic-proto")]
//! # {
//! use meshping::config::Config;
//! use meshping::meshtastic::MeshtasticConnector;
//! use meshping::responder::ResponderServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     let connector = MeshtasticConnector::from_config(&config.meshtastic)?;
//!     let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//!     let server = ResponderServer::new(&config, connector, stop_rx);
//!     server.run().await?;
//!     Ok(())
//! }
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`responder`] - command interpreter, connection supervisor and the event dispatch loop
//! - [`directory`] - immutable node directory snapshots
//! - [`transport`] - radio collaborator traits, neutral packet types and an in-memory mock radio
//! - [`meshtastic`] - Meshtastic client API transport over serial or TCP
//! - [`config`] - configuration loading, defaults and validation
//! - [`protobuf`] - generated Meshtastic protocol buffer types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ ResponderServer │ ← dispatch loop: decode → interpret → send
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Supervisor    │ ← connect / fixed-backoff reconnect
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Transport     │ ← Meshtastic device (serial / TCP) or mock
//! └─────────────────┘
//! ```

pub mod config;
pub mod directory;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod protobuf; // always declare; internal stubs handle feature gating
pub mod responder;
pub mod transport;
