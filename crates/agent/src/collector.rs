//! The differential sampling engine.
//!
//! Each cycle walks the cpu and memory controller trees for both QoS
//! classes, updates the long-lived per-pod state, and derives per-interval
//! deltas from the cumulative counters. Any individual file that fails to
//! read or parse leaves its field at the previous value; a cycle never
//! aborts partway.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kubestat_common::PodSample;

use crate::cgroup;
use crate::namemap::NameMapper;

const QOS_CLASSES: [&str; 2] = ["burstable", "besteffort"];
const POD_PREFIX: &str = "pod";

/// Cgroup directories are named `pod<uid>` where the uid contains a dash.
fn matches_pod_name(name: &str) -> bool {
    name.starts_with(POD_PREFIX) && name.contains('-')
}

/// Delta of a cumulative counter. Only defined when the previous reading
/// was strictly positive; a reset (current below previous) clamps to 0 and
/// the new reading becomes the baseline.
fn counter_delta(prev: i64, current: i64) -> i64 {
    if prev > 0 {
        (current - prev).max(0)
    } else {
        0
    }
}

pub struct Collector {
    root: PathBuf,
    pods: HashMap<String, PodSample>,
    /// Directory names seen in the previous cycle; entries absent from both
    /// this set and the current cycle's listing are reconciled away.
    seen_prev: HashSet<String>,
}

impl Collector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Collector {
            root: root.into(),
            pods: HashMap::new(),
            seen_prev: HashSet::new(),
        }
    }

    /// Runs one collection cycle. Strictly sequential; the caller drives
    /// this on a fixed cadence and never overlaps invocations.
    pub fn refresh(&mut self, mapper: &dyn NameMapper) {
        let mut seen = HashSet::new();

        for class in QOS_CLASSES {
            let cpu_base = self.root.join("cpu/kubepods").join(class);
            for dir in list_pod_dirs(&cpu_base) {
                self.sample_cpu(&cpu_base.join(&dir), &dir, mapper);
                seen.insert(dir);
            }

            let mem_base = self.root.join("memory/kubepods").join(class);
            for dir in list_pod_dirs(&mem_base) {
                self.sample_memory(&mem_base.join(&dir), &dir);
                seen.insert(dir);
            }
        }

        // Drop state for pods gone from the two most recent listings.
        let prev = std::mem::take(&mut self.seen_prev);
        self.pods
            .retain(|dir, _| seen.contains(dir) || prev.contains(dir));
        self.seen_prev = seen;
    }

    /// Clones the current state of every tracked pod.
    pub fn snapshot(&self) -> Vec<PodSample> {
        self.pods.values().cloned().collect()
    }

    fn sample_cpu(&mut self, dir: &Path, name: &str, mapper: &dyn NameMapper) {
        let now = Utc::now();
        let pod = self.get_or_insert(name);

        pod.dt_ns = if pod.time > DateTime::<Utc>::MIN_UTC {
            (now - pod.time).num_nanoseconds().unwrap_or(0)
        } else {
            0
        };
        pod.time = now;

        if !pod.named {
            if let Some(resolved) = mapper.lookup(&pod.id) {
                pod.name = resolved;
                pod.named = true;
            }
        }

        if let Some(usage) = cgroup::read_i64_file(&dir.join("cpuacct.usage")) {
            pod.cpuacct_usage_d = counter_delta(pod.cpuacct_usage, usage);
            pod.cpuacct_usage = usage;
        }

        let stat = cgroup::read_stat_file(&dir.join("cpu.stat"));
        if let Some(&nr_throttled) = stat.get("nr_throttled") {
            pod.nr_throttled = nr_throttled;
        }
        if let Some(&throttled) = stat.get("throttled_time") {
            pod.throttled_time_d = counter_delta(pod.throttled_time, throttled);
            pod.throttled_time = throttled;
        }

        if let Some(quota) = cgroup::read_i64_file(&dir.join("cpu.cfs_quota_us")) {
            pod.cpu_cfs_quota_us = quota;
        }
        if let Some(period) = cgroup::read_i64_file(&dir.join("cpu.cfs_period_us")) {
            pod.cpu_cfs_period_us = period;
        }
    }

    fn sample_memory(&mut self, dir: &Path, name: &str) {
        let stat = cgroup::read_stat_file(&dir.join("memory.stat"));
        let pod = self.get_or_insert(name);

        if let Some(&rss) = stat.get("total_rss") {
            pod.total_rss = rss;
        }
        if let Some(&cache) = stat.get("total_cache") {
            pod.total_cache = cache;
        }
        if let Some(&mapped) = stat.get("total_mapped_file") {
            pod.total_mapped_file = mapped;
        }
        if let Some(&limit) = stat.get("hierarchical_memory_limit") {
            pod.hierarchical_memory_limit = limit;
        }
    }

    fn get_or_insert(&mut self, dir_name: &str) -> &mut PodSample {
        self.pods
            .entry(dir_name.to_string())
            .or_insert_with(|| PodSample::new(dir_name.trim_start_matches(POD_PREFIX)))
    }
}

fn list_pod_dirs(base: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(base) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| matches_pod_name(name))
        .collect()
}
