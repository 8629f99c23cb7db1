//! # Meshtastic Radio Transport
//!
//! Talks the Meshtastic client API to a radio over USB serial or TCP (port 4403):
//!
//! - [`framing`] - `0x94 0xC3 <len16>` stream framing with resync
//! - [`link`] - serial and TCP byte links with background readers
//! - `device` - config handshake, live node table, heartbeat and text sending
//!   (needs the `meshtastic-proto` feature)
//!
//! ```rust,no_run
//! # #[cfg(feature = "meshtastic-proto")]
//! # async fn demo() -> anyhow::Result<()> {
//! use meshping::config::Config;
//! use meshping::meshtastic::MeshtasticConnector;
//! use meshping::transport::{Connector, RadioTransport};
//!
//! let config = Config::default();
//! let mut connector = MeshtasticConnector::from_config(&config.meshtastic)?;
//! let device = connector.open().await?;
//! println!("{} nodes known", device.nodes().len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [meshtastic]
//! transport = "serial"
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! config_timeout_secs = 10
//! heartbeat_secs = 300
//! ```

pub mod framing;
pub mod link;

#[cfg(feature = "meshtastic-proto")]
mod device;

#[cfg(feature = "meshtastic-proto")]
pub use device::{MeshtasticConnector, MeshtasticDevice, RadioState};
pub use link::RadioAddress;
