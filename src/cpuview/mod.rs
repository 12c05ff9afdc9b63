//! Per-cgroup CPU accounting with stable, monotonic virtual counters.
//!
//! `/proc/stat` exposes per-host-CPU tick counters. A container confined to
//! `cpuset.cpus = 2,5` must instead see `cpu0` and `cpu1`, carrying the
//! ticks of host CPUs 2 and 5. The naive projection breaks down as soon as
//! the world moves: the cpuset gets rewritten (virtual ids renumber onto
//! different host CPUs), a host CPU goes offline and returns with reset
//! counters, or the container is migrated. Userspace tools assume `/proc`
//! counters never run backwards, so each virtual CPU carries a per-entry
//! tick offset that absorbs every such discontinuity.
//!
//! Entries live in a process-wide sharded map keyed by cgroup path, each
//! entry guarded by its own mutex. Entries whose cgroup directory has
//! disappeared are dropped by the periodic [`CpuView::reap`] sweep.

use std::sync::Mutex;
use std::time::SystemTime;

use dashmap::DashMap;

use crate::parsers::{CpuTicks, HostStat};

/// One virtual CPU of a cached entry.
#[derive(Debug, Clone, Default)]
struct VirtCpu {
    host_id: u32,
    /// Added to the raw host counters on every read. Grows whenever the raw
    /// value would make the reported value regress.
    offset: CpuTicks,
    /// The values most recently handed out for this virtual id.
    last_reported: CpuTicks,
}

/// Cached accounting state for one cgroup.
#[derive(Debug, Default)]
struct Entry {
    virt: Vec<VirtCpu>,
    last_host_cpuset: Vec<u32>,
    last_sampled_at: Option<SystemTime>,
    view_sequence: u64,
}

/// The projection handed to the `/proc/stat` renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuProjection {
    /// Counters per virtual CPU, in virtual id order.
    pub per_cpu: Vec<CpuTicks>,
    /// Sum over the virtual CPUs, for the aggregate `cpu` line.
    pub aggregate: CpuTicks,
    /// Bumped every time the virtual-to-host mapping changes.
    pub view_sequence: u64,
}

/// The process-wide CPU accounting cache.
#[derive(Debug, Default)]
pub struct CpuView {
    entries: DashMap<String, Mutex<Entry>>,
}

impl CpuView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached cgroup entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Projects the host counters onto the cgroup's virtual CPUs.
    ///
    /// `host_cpus` is the ordered intersection of the cgroup's cpuset with
    /// the host online set; position `i` becomes virtual CPU `cpu<i>`.
    ///
    /// Guarantees, per cgroup key:
    ///
    /// - every reported counter is non-decreasing across calls;
    /// - a cpuset change renumbers without regressing surviving virtual ids;
    /// - a host counter reset (CPU offline/online cycle) is absorbed into
    ///   the offset instead of leaking backwards.
    pub fn project(&self, key: &str, host: &HostStat, host_cpus: &[u32]) -> CpuProjection {
        let entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| Mutex::new(Entry::default()));
        let mut entry = entry.lock().expect("cpuview entry lock poisoned");

        if entry.last_host_cpuset != host_cpus {
            remap(&mut entry, host, host_cpus);
        }

        let mut projection = CpuProjection {
            per_cpu: Vec::with_capacity(entry.virt.len()),
            aggregate: CpuTicks::default(),
            view_sequence: entry.view_sequence,
        };

        for virt in entry.virt.iter_mut() {
            let raw = host.cpu(virt.host_id).copied().unwrap_or_default();
            let mut reported = raw + virt.offset;
            if reported.any_below(&virt.last_reported) {
                virt.offset = virt.offset + virt.last_reported.saturating_sub(&reported);
                reported = reported.component_max(&virt.last_reported);
            }
            virt.last_reported = reported;

            projection.aggregate += reported;
            projection.per_cpu.push(reported);
        }

        entry.last_sampled_at = Some(SystemTime::now());
        projection
    }

    /// Drops entries whose cgroup no longer exists.
    ///
    /// `cgroup_exists` is called with each entry key (the cgroup's absolute
    /// path). Returns the number of entries removed.
    pub fn reap(&self, cgroup_exists: impl Fn(&str) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| cgroup_exists(key));
        let removed = before - self.entries.len();
        if removed > 0 {
            log::debug!("reaped {removed} stale cpu accounting entries");
        }
        removed
    }
}

/// Rebuilds the virtual-to-host mapping after a cpuset change.
///
/// A surviving virtual index keeps continuity: its new offset is chosen so
/// the first value reported from the new host CPU equals the last value
/// reported from the old one. Fresh indices start from the raw counters.
fn remap(entry: &mut Entry, host: &HostStat, host_cpus: &[u32]) {
    let mut virt = Vec::with_capacity(host_cpus.len());

    for (index, &host_id) in host_cpus.iter().enumerate() {
        let raw = host.cpu(host_id).copied().unwrap_or_default();
        match entry.virt.get(index) {
            Some(previous) => {
                let offset = previous.last_reported.saturating_sub(&raw);
                virt.push(VirtCpu {
                    host_id,
                    offset,
                    last_reported: previous.last_reported,
                });
            }
            None => virt.push(VirtCpu {
                host_id,
                offset: CpuTicks::default(),
                last_reported: CpuTicks::default(),
            }),
        }
    }

    entry.virt = virt;
    entry.last_host_cpuset = host_cpus.to_vec();
    entry.view_sequence += 1;
}
