//! Process-wide responder counters.
//!
//! Plain relaxed atomics; a [`Snapshot`] is logged on shutdown and can be read by
//! tests. Counters are monotonic for the life of the process.
use std::sync::atomic::{AtomicU64, Ordering};

static PACKETS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static PACKETS_DROPPED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_MATCHED: AtomicU64 = AtomicU64::new(0);
static REPLIES_SENT: AtomicU64 = AtomicU64::new(0);
static REPLY_FAILURES: AtomicU64 = AtomicU64::new(0);
static DIRECTORY_REFRESHES: AtomicU64 = AtomicU64::new(0);
static CONNECT_ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static RECONNECTS: AtomicU64 = AtomicU64::new(0);

pub fn inc_packets_received() {
    PACKETS_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

/// Packet arrived but was not actionable text (wrong port, no payload, bad UTF-8).
pub fn inc_packets_dropped() {
    PACKETS_DROPPED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_commands_matched() {
    COMMANDS_MATCHED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_replies_sent() {
    REPLIES_SENT.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_reply_failures() {
    REPLY_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_directory_refreshes() {
    DIRECTORY_REFRESHES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_connect_attempts() {
    CONNECT_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_reconnects() {
    RECONNECTS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub commands_matched: u64,
    pub replies_sent: u64,
    pub reply_failures: u64,
    pub directory_refreshes: u64,
    pub connect_attempts: u64,
    pub reconnects: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        packets_received: PACKETS_RECEIVED.load(Ordering::Relaxed),
        packets_dropped: PACKETS_DROPPED.load(Ordering::Relaxed),
        commands_matched: COMMANDS_MATCHED.load(Ordering::Relaxed),
        replies_sent: REPLIES_SENT.load(Ordering::Relaxed),
        reply_failures: REPLY_FAILURES.load(Ordering::Relaxed),
        directory_refreshes: DIRECTORY_REFRESHES.load(Ordering::Relaxed),
        connect_attempts: CONNECT_ATTEMPTS.load(Ordering::Relaxed),
        reconnects: RECONNECTS.load(Ordering::Relaxed),
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "packets={} dropped={} commands={} replies={} reply_failures={} refreshes={} connect_attempts={} reconnects={}",
            self.packets_received,
            self.packets_dropped,
            self.commands_matched,
            self.replies_sent,
            self.reply_failures,
            self.directory_refreshes,
            self.connect_attempts,
            self.reconnects
        )
    }
}
