//! Test utilities & fixtures.
//! Mock radio setups and a handle on a responder running in the background.
#![allow(dead_code)]

use meshping::config::Config;
use meshping::responder::{ResponderServer, RunSummary};
use meshping::transport::mock::MockRadio;
use meshping::transport::{NodeId, NodeTelemetry};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const ABC: NodeId = NodeId(0x1a2b3c4d);
pub const XYZ: NodeId = NodeId(0x00c0ffee);

/// `ABC` with rssi -80, snr 5.5 and 87 % battery.
pub fn abc_telemetry() -> NodeTelemetry {
    let mut t = NodeTelemetry::new(ABC);
    t.short_name = Some("ABC".to_string());
    t.long_name = Some("Alpha Bravo Charlie".to_string());
    t.rssi = Some(-80);
    t.snr = Some(5.5);
    t.battery_level = Some(87);
    t
}

pub fn radio_with_abc() -> MockRadio {
    let radio = MockRadio::new();
    radio.upsert_node(abc_telemetry());
    radio
}

/// Defaults with a fast idle tick, 1 s backoff and no log file.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.meshtastic.idle_tick_ms = 50;
    config.meshtastic.reconnect_delay_secs = 1;
    config.logging.file = None;
    config
}

pub struct Running {
    pub radio: MockRadio,
    stop: watch::Sender<bool>,
    task: JoinHandle<anyhow::Result<RunSummary>>,
}

impl Running {
    pub async fn stop(self) -> RunSummary {
        let _ = self.stop.send(true);
        self.task
            .await
            .expect("responder task panicked")
            .expect("responder failed")
    }
}

/// Spawn a responder on `radio` and wait until it listens.
pub async fn start(config: Config, radio: MockRadio) -> Running {
    let (stop, rx) = watch::channel(false);
    let server = ResponderServer::new(&config, radio.connector(), rx);
    let task = tokio::spawn(server.run());
    let probe = radio.clone();
    wait_until(move || probe.has_subscriber()).await;
    Running { radio, stop, task }
}

/// Poll `cond` every 10 ms (virtual time under a paused clock).
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Let the responder drain whatever is queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}
