use meshping::config::{Config, ConfigError, InfoFields, PingReplyMode, TransportKind};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path.to_str().unwrap().to_string()
}

#[tokio::test]
async fn test_create_default_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    let path = path.to_str().unwrap();

    Config::create_default(path).await.unwrap();
    let loaded = Config::load(path).await.unwrap();
    assert_eq!(loaded, Config::default());
    assert_eq!(loaded.validate(), Ok(()));
}

#[test]
fn test_partial_file_takes_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "tcp.toml",
        r#"
[responder]
ping_reply = "channel"
info_fields = "battery_snr"

[meshtastic]
transport = "tcp"
host = "192.168.15.10"
channel = 2
"#,
    );

    let config = tokio_test::block_on(Config::load(&path)).unwrap();
    assert_eq!(config.responder.ping_reply, PingReplyMode::Channel);
    assert_eq!(config.responder.info_fields, InfoFields::BatterySnr);
    assert!(!config.responder.refresh_on_reconnect);
    assert_eq!(config.responder.max_reply_bytes, 200);
    assert_eq!(config.meshtastic.transport, TransportKind::Tcp);
    assert_eq!(config.meshtastic.tcp_port, 4403);
    assert_eq!(config.meshtastic.address_label(), "192.168.15.10:4403");
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.validate(), Ok(()));
}

#[test]
fn test_unreadable_or_malformed_file() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");
    let err = tokio_test::block_on(Config::load(missing.to_str().unwrap())).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));

    let bad = write(&dir, "bad.toml", "[meshtastic]\nbaud_rate = \"fast\"\n");
    let err = tokio_test::block_on(Config::load(&bad)).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));

    let bad = write(&dir, "mode.toml", "[responder]\nping_reply = \"shout\"\n");
    assert!(tokio_test::block_on(Config::load(&bad)).is_err());
}

#[test]
fn test_validation_rejects_unusable_settings() {
    let mut config = Config::default();
    config.meshtastic.transport = TransportKind::Tcp;
    assert_eq!(config.validate(), Err(ConfigError::MissingHost));

    let mut config = Config::default();
    config.meshtastic.port = "  ".into();
    assert_eq!(config.validate(), Err(ConfigError::MissingSerialPort));

    let mut config = Config::default();
    config.meshtastic.channel = 8;
    assert_eq!(config.validate(), Err(ConfigError::InvalidChannel(8)));

    let mut config = Config::default();
    config.responder.max_reply_bytes = 500;
    match config.validate() {
        Err(ConfigError::InvalidReplyLimit { got: 500, max: 228 }) => {}
        other => panic!("Expected InvalidReplyLimit, got {:?}", other),
    }

    let mut config = Config::default();
    config.logging.level = "chatty".into();
    assert_eq!(
        config.validate(),
        Err(ConfigError::InvalidLogLevel("chatty".into()))
    );
}
