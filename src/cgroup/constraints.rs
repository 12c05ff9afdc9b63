//! Constraint assembly: the resource limits that apply to one process.
//!
//! A [`ConstraintSet`] is derived per operation from the caller's cgroup
//! placements. Every field degrades to its unlimited/inherit value when the
//! owning controller is absent, its file is missing, or its content is
//! malformed; only an unreadable `/proc/<pid>/cgroup` fails the operation.

use std::path::Path;

use crate::fsutil;
use crate::parsers::{self, CpuSet, MemCgStat};

use super::hierarchy::{HierarchySnapshot, Version};
use super::resolve::{self, CgroupPath};
use super::Result;

const DEFAULT_CPU_PERIOD_US: u64 = 100_000;
const DEFAULT_CPU_SHARES: u64 = 1024;

/// The resource constraints governing one process, with unlimited defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintSet {
    /// Logical CPUs the process may run on; empty means "inherit host".
    pub cpuset: CpuSet,
    /// CFS quota in microseconds per period; `None` is unlimited.
    pub cpu_quota_us: Option<u64>,
    /// CFS enforcement period in microseconds.
    pub cpu_period_us: u64,
    /// Relative CPU weight, normalized to v1 `cpu.shares` scale.
    pub cpu_shares: u64,
    /// Memory limit in bytes; `None` is unlimited.
    pub mem_limit_bytes: Option<u64>,
    /// Soft memory limit (v1 soft limit, v2 `memory.high`).
    pub mem_soft_limit_bytes: Option<u64>,
    /// Memory+swap limit in bytes; `None` is unlimited.
    pub memsw_limit_bytes: Option<u64>,
    /// Maximum number of tasks; `None` is unlimited.
    pub pids_max: Option<u64>,
}

impl Default for ConstraintSet {
    fn default() -> Self {
        Self {
            cpuset: CpuSet::default(),
            cpu_quota_us: None,
            cpu_period_us: DEFAULT_CPU_PERIOD_US,
            cpu_shares: DEFAULT_CPU_SHARES,
            mem_limit_bytes: None,
            mem_soft_limit_bytes: None,
            memsw_limit_bytes: None,
            pids_max: None,
        }
    }
}

impl ConstraintSet {
    /// Derives the constraints for `pid` from its cgroup placements.
    ///
    /// # Errors
    ///
    /// Only an unreadable `/proc/<pid>/cgroup`; missing controllers and
    /// malformed files degrade per field.
    pub fn for_pid(snapshot: &HierarchySnapshot, proc_root: &Path, pid: u32) -> Result<Self> {
        let entries = resolve::proc_cgroup_entries(proc_root, pid)?;
        let mut constraints = Self::default();

        if let Some(cg) = resolve::resolve_from_entries(snapshot, &entries, "cpuset")? {
            constraints.cpuset = read_cpuset(&cg);
        }

        if let Some(cg) = resolve::resolve_from_entries(snapshot, &entries, "cpu")? {
            match cg.controller().version() {
                Version::V2 => {
                    if let Some(raw) = read_opt(&cg, "cpu.max") {
                        let (quota, period) = parse_cpu_max(&raw);
                        constraints.cpu_quota_us = quota;
                        constraints.cpu_period_us = period;
                    }
                    // cpu.weight runs 1..=10000 with a default of 100; scale
                    // onto the v1 shares range so consumers see one unit.
                    let weight =
                        parsers::parse_or_default(read_opt(&cg, "cpu.weight").as_deref(), 100);
                    constraints.cpu_shares = (weight * DEFAULT_CPU_SHARES) / 100;
                }
                Version::V1 => {
                    constraints.cpu_quota_us = read_opt(&cg, "cpu.cfs_quota_us")
                        .and_then(|raw| parse_limit_logged(&cg, "cpu.cfs_quota_us", &raw));
                    constraints.cpu_period_us = parsers::parse_or_default(
                        read_opt(&cg, "cpu.cfs_period_us").as_deref(),
                        DEFAULT_CPU_PERIOD_US,
                    );
                    constraints.cpu_shares = parsers::parse_or_default(
                        read_opt(&cg, "cpu.shares").as_deref(),
                        DEFAULT_CPU_SHARES,
                    );
                }
            }
        }

        if let Some(cg) = resolve::resolve_from_entries(snapshot, &entries, "memory")? {
            match cg.controller().version() {
                Version::V2 => {
                    constraints.mem_limit_bytes = min_limit_walk(&cg, "memory.max");
                    constraints.mem_soft_limit_bytes = read_opt(&cg, "memory.high")
                        .and_then(|raw| parse_limit_logged(&cg, "memory.high", &raw));
                    // v2 tracks swap separately; normalize to mem+swap.
                    let swap = min_limit_walk(&cg, "memory.swap.max");
                    constraints.memsw_limit_bytes =
                        match (constraints.mem_limit_bytes, swap) {
                            (Some(mem), Some(swap)) => Some(mem.saturating_add(swap)),
                            _ => None,
                        };
                }
                Version::V1 => {
                    constraints.mem_limit_bytes = min_limit_walk(&cg, "memory.limit_in_bytes");
                    constraints.mem_soft_limit_bytes = read_opt(&cg, "memory.soft_limit_in_bytes")
                        .and_then(|raw| parse_limit_logged(&cg, "memory.soft_limit_in_bytes", &raw));
                    constraints.memsw_limit_bytes =
                        min_limit_walk(&cg, "memory.memsw.limit_in_bytes");
                }
            }
        }

        if let Some(cg) = resolve::resolve_from_entries(snapshot, &entries, "pids")? {
            constraints.pids_max = read_opt(&cg, "pids.max")
                .and_then(|raw| parse_limit_logged(&cg, "pids.max", &raw));
        }

        Ok(constraints)
    }

    /// Upper bound on usable CPUs implied by the CFS quota, rounded up.
    ///
    /// `None` when no quota is set.
    pub fn cfs_cpu_count(&self) -> Option<u64> {
        self.cpu_quota_us
            .map(|quota| quota.div_ceil(self.cpu_period_us.max(1)).max(1))
    }
}

/// Current memory consumption of a cgroup, for the meminfo and swaps views.
///
/// Reads degrade to zero so a half-populated memory controller still renders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub usage_bytes: u64,
    pub swap_usage_bytes: u64,
    pub stat: MemCgStat,
}

impl MemoryUsage {
    /// Reads usage counters from the memory cgroup at `cg`.
    pub fn for_cgroup(cg: &CgroupPath) -> Self {
        let stat = match fsutil::open_file_reader(cg.file("memory.stat")) {
            Ok(mut reader) => {
                use crate::parsers::KeyValueStat;
                MemCgStat::from_reader(&mut reader).unwrap_or_default()
            }
            Err(_) => MemCgStat::default(),
        };

        match cg.controller().version() {
            Version::V2 => Self {
                usage_bytes: read_u64(cg, "memory.current"),
                swap_usage_bytes: read_u64(cg, "memory.swap.current"),
                stat,
            },
            Version::V1 => {
                let usage = read_u64(cg, "memory.usage_in_bytes");
                let memsw = read_u64(cg, "memory.memsw.usage_in_bytes");
                Self {
                    usage_bytes: usage,
                    swap_usage_bytes: memsw.saturating_sub(usage),
                    stat,
                }
            }
        }
    }
}

/// Reads the effective cpuset of a cgroup.
///
/// Prefers the kernel-computed effective file and falls back to the
/// configured one; an empty file at the leaf inherits from ancestors, so the
/// walk continues upward until something is set.
fn read_cpuset(cg: &CgroupPath) -> CpuSet {
    let candidates: &[&str] = match cg.controller().version() {
        Version::V2 => &["cpuset.cpus.effective", "cpuset.cpus"],
        Version::V1 => &["cpuset.effective_cpus", "cpuset.cpus"],
    };

    let mountpoint = cg.controller().mountpoint();
    let mut dir = cg.absolute();
    loop {
        for name in candidates {
            if let Some(raw) = read_opt_at(&dir, name) {
                match CpuSet::parse(&raw) {
                    Ok(set) if !set.is_empty() => return set,
                    Ok(_) => {}
                    Err(err) => {
                        log::warn!(
                            "treating malformed `{name}` under `{}` as inherited: {err}",
                            dir.display()
                        );
                    }
                }
            }
        }
        if dir == mountpoint || !dir.pop() || !dir.starts_with(mountpoint) {
            return CpuSet::default();
        }
    }
}

/// Minimum of a limit file over the cgroup and its ancestors.
///
/// Limits are hierarchical: an ancestor's tighter limit binds the child even
/// when the child file says `max`.
fn min_limit_walk(cg: &CgroupPath, name: &str) -> Option<u64> {
    let mountpoint = cg.controller().mountpoint();
    let mut dir = cg.absolute();
    let mut min: Option<u64> = None;

    loop {
        if let Some(raw) = read_opt_at(&dir, name) {
            if let Some(limit) = parse_limit_logged(cg, name, &raw) {
                min = Some(min.map_or(limit, |m: u64| m.min(limit)));
            }
        }
        if dir == mountpoint || !dir.pop() || !dir.starts_with(mountpoint) {
            return min;
        }
    }
}

fn read_opt(cg: &CgroupPath, name: &str) -> Option<String> {
    read_opt_at(&cg.absolute(), name)
}

fn read_opt_at(dir: &Path, name: &str) -> Option<String> {
    match fsutil::read_trimmed_opt(dir.join(name)) {
        Ok(value) => value,
        Err(err) => {
            log::debug!("failed to read `{name}` under `{}`: {err}", dir.display());
            None
        }
    }
}

fn read_u64(cg: &CgroupPath, name: &str) -> u64 {
    parsers::parse_or_default(read_opt(cg, name).as_deref(), 0)
}

fn parse_limit_logged(cg: &CgroupPath, name: &str, raw: &str) -> Option<u64> {
    match parsers::parse_limit(raw) {
        Ok(limit) => limit,
        Err(err) => {
            log::warn!(
                "treating malformed `{name}` in `{}` as unlimited: {err}",
                cg.absolute().display()
            );
            None
        }
    }
}

/// Parses a v2 `cpu.max` line: `<quota>|max [<period>]`.
fn parse_cpu_max(raw: &str) -> (Option<u64>, u64) {
    let mut parts = raw.split_whitespace();
    let quota = match parts.next() {
        Some("max") | None => None,
        Some(value) => value.parse::<u64>().ok(),
    };
    let period = parts
        .next()
        .and_then(|p| p.parse::<u64>().ok())
        .unwrap_or(DEFAULT_CPU_PERIOD_US);
    (quota, period)
}
