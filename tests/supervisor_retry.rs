use meshping::responder::{ConnectionSupervisor, LinkState};
use meshping::transport::mock::MockRadio;
use meshping::transport::TransportError;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_n_failures_then_success() {
    for n in [0usize, 1, 4] {
        let radio = MockRadio::new();
        radio.fail_next_opens(n);
        let mut supervisor = ConnectionSupervisor::new(radio.connector(), Duration::from_secs(5));
        let (_tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        let transport = supervisor
            .connect_initial(&mut rx)
            .await
            .expect("refused connections are retried");
        assert!(transport.is_some());
        assert_eq!(supervisor.attempts(), n as u64 + 1);
        assert_eq!(radio.open_attempts(), n + 1);
        assert_eq!(started.elapsed(), Duration::from_secs(5 * n as u64));
        assert_eq!(supervisor.state(), LinkState::Connected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_ends_initial_connect() {
    let radio = MockRadio::new();
    radio.push_open_failure(TransportError::DeviceNotFound("/dev/ttyUSB9".into()));
    let mut supervisor = ConnectionSupervisor::new(radio.connector(), Duration::from_secs(5));
    let (_tx, mut rx) = watch::channel(false);

    match supervisor.connect_initial(&mut rx).await {
        Err(TransportError::DeviceNotFound(path)) => assert_eq!(path, "/dev/ttyUSB9"),
        other => panic!("Expected DeviceNotFound, got {:?}", other.map(|t| t.is_some())),
    }
    assert_eq!(supervisor.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_survives_missing_device() {
    let radio = MockRadio::new();
    radio.push_open_failure(TransportError::DeviceNotFound("/dev/ttyUSB0".into()));
    radio.fail_next_opens(1);
    let mut supervisor = ConnectionSupervisor::new(radio.connector(), Duration::from_secs(2));
    let (_tx, mut rx) = watch::channel(false);

    let started = Instant::now();
    let transport = supervisor.reconnect(&mut rx).await;
    assert!(transport.is_some());
    assert_eq!(supervisor.attempts(), 3);
    assert_eq!(supervisor.reconnects(), 1);
    assert_eq!(started.elapsed(), Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_backoff() {
    let radio = MockRadio::new();
    radio.fail_next_opens(100);
    let mut supervisor = ConnectionSupervisor::new(radio.connector(), Duration::from_secs(5));
    let (tx, mut rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        let _ = tx.send(true);
    });

    let started = Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(60), supervisor.reconnect(&mut rx))
        .await
        .expect("shutdown should end the retry loop");
    assert!(result.is_none());
    assert_eq!(started.elapsed(), Duration::from_secs(7));
    assert_eq!(supervisor.attempts(), 2);
    assert_eq!(supervisor.reconnects(), 0);
}
