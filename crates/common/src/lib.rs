//! Shared data model for the kubestat agent and relay server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One per-container sample for one collection cycle.
///
/// Cumulative counters (`cpuacct_usage`, `throttled_time`) are read straight
/// from the cgroup accounting files; the `_d` fields carry the derived
/// per-interval deltas. A delta is only meaningful when the previous
/// cumulative reading was strictly positive, otherwise it is 0 (first
/// observation or counter reset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSample {
    /// Pod UID, the cgroup directory name minus its `pod` prefix.
    pub id: String,
    /// Resolved pod display name; empty until the name mapper finds it.
    #[serde(default)]
    pub name: String,

    /// Cumulative CPU usage in nanoseconds.
    pub cpuacct_usage: i64,
    pub cpuacct_usage_d: i64,
    pub nr_throttled: i64,
    /// Cumulative throttled time in nanoseconds.
    pub throttled_time: i64,
    pub throttled_time_d: i64,

    pub total_rss: i64,
    pub total_cache: i64,
    pub total_mapped_file: i64,
    pub hierarchical_memory_limit: i64,

    /// CFS quota and period in microseconds; quota is -1 when unlimited.
    pub cpu_cfs_quota_us: i64,
    pub cpu_cfs_period_us: i64,

    /// Wall-clock timestamp of this sample.
    pub time: DateTime<Utc>,
    /// Elapsed interval since the previous sample for this container, in
    /// nanoseconds. Zero for the first observation.
    pub dt_ns: i64,

    /// Whether `name` has been resolved; once set the mapper is never
    /// queried again for this container. Not part of the wire format.
    #[serde(skip)]
    pub named: bool,
}

impl PodSample {
    pub fn new(id: impl Into<String>) -> Self {
        PodSample {
            id: id.into(),
            name: String::new(),
            cpuacct_usage: 0,
            cpuacct_usage_d: 0,
            nr_throttled: 0,
            throttled_time: 0,
            throttled_time_d: 0,
            total_rss: 0,
            total_cache: 0,
            total_mapped_file: 0,
            hierarchical_memory_limit: 0,
            cpu_cfs_quota_us: 0,
            cpu_cfs_period_us: 0,
            time: DateTime::<Utc>::MIN_UTC,
            dt_ns: 0,
            named: false,
        }
    }
}
