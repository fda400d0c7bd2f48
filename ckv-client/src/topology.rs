//! # Cluster Topology
//!
//! Purpose: Map each of the 16384 slots onto the pool of the shard that
//! owns it.
//!
//! ## Design Principles
//! 1. **Immutable Snapshots**: A `Topology` is never edited after it is
//!    built; a refresh builds a new one and swaps it in whole.
//! 2. **Sorted Ranges**: Ranges are kept ordered by start slot so lookup is
//!    a binary search.
//! 3. **Tolerant Parsing**: Unknown INFO fields are ignored; only the
//!    fields the client acts on are interpreted.

use std::collections::BTreeMap;
use std::sync::Arc;

use ckv_common::{Endpoint, SLOT_COUNT};

use crate::pool::ShardPool;

/// One `CLUSTER SLOTS` entry: an inclusive slot range and its servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAssignment {
    pub start: u16,
    pub end: u16,
    pub master: Endpoint,
    pub replicas: Vec<Endpoint>,
}

/// Contiguous, inclusive slot range bound to a shard pool.
#[derive(Debug, Clone)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    pub endpoint: Endpoint,
    pub pool: Arc<ShardPool>,
}

impl SlotRange {
    pub fn contains(&self, slot: u16) -> bool {
        self.start <= slot && slot <= self.end
    }
}

/// Slot routing table.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    ranges: Vec<SlotRange>,
}

impl Topology {
    /// Builds a table from unordered ranges.
    pub fn new(mut ranges: Vec<SlotRange>) -> Self {
        ranges.sort_by_key(|range| range.start);
        Topology { ranges }
    }

    pub fn ranges(&self) -> &[SlotRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Pool owning `slot`, if any range contains it.
    pub fn find_pool(&self, slot: u16) -> Option<&Arc<ShardPool>> {
        let idx = self.ranges.partition_point(|range| range.end < slot);
        self.ranges
            .get(idx)
            .filter(|range| range.contains(slot))
            .map(|range| &range.pool)
    }

    /// Slot ranges no entry covers, as inclusive `(start, end)` pairs.
    pub fn gaps(&self) -> Vec<(u16, u16)> {
        let mut gaps = Vec::new();
        let mut next: u32 = 0;
        for range in &self.ranges {
            let start = u32::from(range.start);
            if start > next {
                gaps.push((next as u16, (start - 1) as u16));
            }
            next = next.max(u32::from(range.end) + 1);
        }
        if next < u32::from(SLOT_COUNT) {
            gaps.push((next as u16, SLOT_COUNT - 1));
        }
        gaps
    }

    /// Whether two neighbouring ranges share a slot.
    pub fn has_overlap(&self) -> bool {
        self.ranges
            .windows(2)
            .any(|pair| pair[1].start <= pair[0].end)
    }

    /// Every slot is covered by exactly one range.
    pub fn is_complete(&self) -> bool {
        !self.has_overlap() && self.gaps().is_empty()
    }
}

/// Parses `INFO` output into a field map.
///
/// Blank lines and `# Section` headers are skipped. Returns `None` when a
/// line has no `:` separator.
pub fn parse_info(text: &str) -> Option<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once(':')?;
        fields.insert(key.to_string(), value.to_string());
    }
    Some(fields)
}

/// Whether the server runs in cluster mode; `None` when INFO lacks the
/// `cluster_enabled` field.
pub fn cluster_enabled(info: &BTreeMap<String, String>) -> Option<bool> {
    info.get("cluster_enabled")
        .map(|value| value.trim().parse::<i64>().map_or(false, |flag| flag != 0))
}

/// Replica endpoints advertised by a standalone master.
///
/// Reads `connected_slaves` and the `slaveN:ip=..,port=..` entries; entries
/// without both an address and a port are skipped.
pub fn replica_endpoints(info: &BTreeMap<String, String>) -> Vec<Endpoint> {
    let count = info
        .get("connected_slaves")
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    (0..count)
        .filter_map(|idx| info.get(&format!("slave{idx}")))
        .filter_map(|entry| {
            let mut host = None;
            let mut port = None;
            for item in entry.split(',') {
                if let Some(ip) = item.trim().strip_prefix("ip=") {
                    host = Some(ip.to_string());
                } else if let Some(value) = item.trim().strip_prefix("port=") {
                    port = value.parse::<u16>().ok();
                }
            }
            match (host, port) {
                (Some(host), Some(port)) if !host.is_empty() && port != 0 => {
                    Some(Endpoint::new(host, port))
                }
                _ => None,
            }
        })
        .collect()
}
