//! Node directory: immutable snapshots of the nodes a radio knows about.
//!
//! A [`NodeDirectory`] is built wholesale from [`RadioTransport::nodes`] and never
//! patched afterwards. The dispatch loop keeps the current one in a
//! [`DirectoryHandle`]; readers clone the `Arc` and keep a consistent view even while
//! a refresh swaps in a new snapshot.

use crate::logutil::escape_log;
use crate::transport::{NodeId, NodeTelemetry, Position, RadioTransport};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Label used for nodes that never announced a short name.
pub const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub short_name: String,
    pub long_name: Option<String>,
    pub rssi: Option<i32>,
    pub snr: Option<f32>,
    pub battery_level: Option<u32>,
    pub last_heard: Option<DateTime<Utc>>,
    pub position: Option<Position>,
    pub hops_away: Option<u32>,
}

impl NodeRecord {
    pub fn from_telemetry(t: &NodeTelemetry) -> Self {
        let short_name = t
            .short_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_NAME)
            .to_string();
        Self {
            id: t.num,
            short_name,
            long_name: t.long_name.clone().filter(|s| !s.trim().is_empty()),
            rssi: t.rssi,
            snr: t.snr,
            battery_level: t.battery_level,
            last_heard: t
                .last_heard
                .filter(|secs| *secs > 0)
                .and_then(|secs| DateTime::from_timestamp(i64::from(secs), 0)),
            position: t.position,
            hops_away: t.hops_away,
        }
    }

    fn describe(&self) -> String {
        fn opt<T: std::fmt::Display>(v: &Option<T>) -> String {
            v.as_ref()
                .map(|x| x.to_string())
                .unwrap_or_else(|| "-".to_string())
        }
        format!(
            "{} {} ({}) rssi={} snr={} battery={} last_heard={} position={} hops={}",
            self.id,
            escape_log(&self.short_name),
            escape_log(self.long_name.as_deref().unwrap_or("-")),
            opt(&self.rssi),
            opt(&self.snr),
            opt(&self.battery_level),
            opt(&self.last_heard.map(|t| t.format("%Y-%m-%d %H:%M:%S"))),
            opt(&self.position),
            opt(&self.hops_away),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeDirectory {
    nodes: HashMap<NodeId, NodeRecord>,
    refreshed_at: DateTime<Utc>,
}

impl Default for NodeDirectory {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            refreshed_at: Utc::now(),
        }
    }
}

impl NodeDirectory {
    /// Build a snapshot from raw node telemetry. The broadcast id is never a node.
    pub fn from_telemetry<I>(telemetry: I) -> Self
    where
        I: IntoIterator<Item = NodeTelemetry>,
    {
        let nodes = telemetry
            .into_iter()
            .filter(|t| !t.num.is_broadcast())
            .map(|t| (t.num, NodeRecord::from_telemetry(&t)))
            .collect();
        Self {
            nodes,
            refreshed_at: Utc::now(),
        }
    }

    /// Read the transport's node table into a fresh snapshot.
    ///
    /// With `verbose` every node is logged at info level, otherwise at debug.
    pub fn refresh<T: RadioTransport + ?Sized>(transport: &T, verbose: bool) -> Self {
        let directory = Self::from_telemetry(transport.nodes().into_values());
        for record in directory.sorted() {
            if verbose {
                info!("node {}", record.describe());
            } else {
                debug!("node {}", record.describe());
            }
        }
        crate::metrics::inc_directory_refreshes();
        directory
    }

    pub fn lookup(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id)
    }

    /// Short name of `id`, or `"Unknown"` when the node is not in the snapshot.
    pub fn short_name(&self, id: NodeId) -> &str {
        self.nodes
            .get(&id)
            .map(|r| r.short_name.as_str())
            .unwrap_or(UNKNOWN_NAME)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    /// Records ordered by node id.
    pub fn sorted(&self) -> Vec<&NodeRecord> {
        let mut records: Vec<&NodeRecord> = self.nodes.values().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// One-line node list for the startup log: `3 nodes: !00000001 AAA, ...`.
    pub fn summary(&self) -> String {
        if self.nodes.is_empty() {
            return "no nodes known".to_string();
        }
        let names: Vec<String> = self
            .sorted()
            .into_iter()
            .map(|r| format!("{} {}", r.id, escape_log(&r.short_name)))
            .collect();
        format!(
            "{} node{}: {}",
            self.nodes.len(),
            if self.nodes.len() == 1 { "" } else { "s" },
            names.join(", ")
        )
    }
}

/// Shared holder of the current directory snapshot.
#[derive(Debug, Clone, Default)]
pub struct DirectoryHandle {
    current: Arc<RwLock<Arc<NodeDirectory>>>,
}

impl DirectoryHandle {
    pub fn new(directory: NodeDirectory) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(directory))),
        }
    }

    pub fn snapshot(&self) -> Arc<NodeDirectory> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new snapshot. Readers holding the previous one are unaffected.
    pub fn replace(&self, directory: NodeDirectory) -> Arc<NodeDirectory> {
        let next = Arc::new(directory);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&next),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&next),
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry(num: u32, name: Option<&str>) -> NodeTelemetry {
        let mut t = NodeTelemetry::new(NodeId(num));
        t.short_name = name.map(str::to_string);
        t
    }

    #[test]
    fn lookup_hits_and_misses() {
        let mut t = telemetry(0x1a2b3c4d, Some("ABC"));
        t.rssi = Some(-80);
        t.snr = Some(5.5);
        let dir = NodeDirectory::from_telemetry(vec![t]);
        let rec = dir.lookup(NodeId(0x1a2b3c4d)).unwrap();
        assert_eq!(rec.short_name, "ABC");
        assert_eq!(rec.rssi, Some(-80));
        assert!(dir.lookup(NodeId(0xdead)).is_none());
        assert_eq!(dir.short_name(NodeId(0xdead)), UNKNOWN_NAME);
    }

    #[test]
    fn blank_names_become_unknown() {
        let dir = NodeDirectory::from_telemetry(vec![telemetry(1, None), telemetry(2, Some("  "))]);
        assert_eq!(dir.short_name(NodeId(1)), UNKNOWN_NAME);
        assert_eq!(dir.short_name(NodeId(2)), UNKNOWN_NAME);
    }

    #[test]
    fn broadcast_and_zero_last_heard_are_ignored() {
        let mut t = telemetry(7, Some("SEV"));
        t.last_heard = Some(0);
        let dir = NodeDirectory::from_telemetry(vec![t, telemetry(0xffff_ffff, Some("ALL"))]);
        assert_eq!(dir.len(), 1);
        assert!(dir.lookup(NodeId(7)).unwrap().last_heard.is_none());
    }

    #[test]
    fn summary_is_sorted() {
        let dir = NodeDirectory::from_telemetry(vec![telemetry(2, Some("TWO")), telemetry(1, Some("ONE"))]);
        assert_eq!(dir.summary(), "2 nodes: !00000001 ONE, !00000002 TWO");
        assert_eq!(NodeDirectory::default().summary(), "no nodes known");
    }

    #[test]
    fn replace_keeps_old_snapshots_intact() {
        let handle = DirectoryHandle::new(NodeDirectory::from_telemetry(vec![telemetry(1, Some("OLD"))]));
        let before = handle.snapshot();
        handle.replace(NodeDirectory::from_telemetry(vec![telemetry(1, Some("NEW"))]));
        assert_eq!(before.short_name(NodeId(1)), "OLD");
        assert_eq!(handle.snapshot().short_name(NodeId(1)), "NEW");
    }

    #[test]
    fn serializes_for_node_dump() {
        let dir = NodeDirectory::from_telemetry(vec![telemetry(0xab, Some("AB"))]);
        let json = serde_json::to_value(&dir).unwrap();
        assert_eq!(json["nodes"]["!000000ab"]["short_name"], "AB");
    }
}
