//! Virtualized `/proc` views.
//!
//! Each file has its own renderer, pure over the parsed host state, the
//! caller's constraints, and (for `/proc/stat`) the accounting projection.
//! This module wires the renderers to live kernel state: for one operation
//! the caller's cgroup constraints are read first, then the host data file,
//! so a single read sees a consistent pairing. No atomicity is promised
//! across different files.

mod blkio;
mod cpuinfo;
mod loadavg;
mod meminfo;
mod stat;
mod sys_cpu;
mod uptime;

pub use loadavg::{LoadavgTracker, SAMPLE_INTERVAL_SECS};

use std::path::Path;

use crate::cgroup::{
    self, ConstraintSet, HierarchySnapshot, MemoryUsage, Version, resolve_first,
};
use crate::cpuview::CpuView;
use crate::error::OpError;
use crate::fsutil;
use crate::opts::Opts;
use crate::parsers::{CpuSet, DeviceIoStats, HostStat, Meminfo};

/// Controllers that can stand in for "the caller's cgroup directory" when a
/// view only needs membership, not a specific controller file.
const ANY_CGROUP: &[&str] = &["memory", "cpu", "cpuset", "pids", "cpuacct"];

/// The set of virtualized files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcFile {
    Cpuinfo,
    Meminfo,
    Stat,
    Uptime,
    Loadavg,
    Swaps,
    Diskstats,
    CpuOnline,
}

impl ProcFile {
    /// Maps a mount-relative path to its view, if the path is virtualized.
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/proc/cpuinfo" => Some(Self::Cpuinfo),
            "/proc/meminfo" => Some(Self::Meminfo),
            "/proc/stat" => Some(Self::Stat),
            "/proc/uptime" => Some(Self::Uptime),
            "/proc/loadavg" => Some(Self::Loadavg),
            "/proc/swaps" => Some(Self::Swaps),
            "/proc/diskstats" => Some(Self::Diskstats),
            "/sys/devices/system/cpu/online" => Some(Self::CpuOnline),
            _ => None,
        }
    }
}

/// Everything a renderer needs for one operation.
pub struct ViewContext<'a> {
    pub snapshot: &'a HierarchySnapshot,
    pub proc_root: &'a Path,
    pub sys_root: &'a Path,
    pub pid: u32,
    pub opts: &'a Opts,
    pub cpuview: &'a CpuView,
    pub loadavg: Option<&'a LoadavgTracker>,
}

impl ProcFile {
    /// Computes the full rendered content of this file for the caller.
    ///
    /// # Errors
    ///
    /// `Fatal` (EIO) when the caller's cgroup membership is unreadable or a
    /// required host file cannot be read; individual cgroup files degrade
    /// instead of failing.
    pub fn render(&self, ctx: &ViewContext<'_>) -> Result<Vec<u8>, OpError> {
        match self {
            Self::Cpuinfo => render_cpuinfo(ctx),
            Self::Meminfo => render_meminfo(ctx),
            Self::Stat => render_stat(ctx),
            Self::Uptime => render_uptime(ctx),
            Self::Loadavg => render_loadavg(ctx),
            Self::Swaps => render_swaps(ctx),
            Self::Diskstats => render_diskstats(ctx),
            Self::CpuOnline => render_cpu_online(ctx),
        }
    }
}

/// The host's online CPU set.
///
/// Prefers `/sys/devices/system/cpu/online`; falls back to the ids that
/// reported counters in `/proc/stat`.
fn host_online(ctx: &ViewContext<'_>, host_stat: Option<&HostStat>) -> CpuSet {
    if let Ok(raw) = fsutil::read_trimmed(ctx.sys_root.join("devices/system/cpu/online")) {
        if let Ok(set) = CpuSet::parse(&raw) {
            if !set.is_empty() {
                return set;
            }
        }
    }

    let from_stat = |stat: &HostStat| stat.online_ids().collect::<CpuSet>();
    match host_stat {
        Some(stat) => from_stat(stat),
        None => fsutil::open_file_reader(ctx.proc_root.join("stat"))
            .ok()
            .and_then(|mut reader| HostStat::from_reader(&mut reader).ok())
            .map(|stat| from_stat(&stat))
            .unwrap_or_default(),
    }
}

/// The ordered host CPU ids backing the caller's virtual CPUs.
///
/// An empty cpuset inherits the host online set. With the CFS option on,
/// the list is truncated to the quota-implied CPU count.
fn visible_cpus(
    ctx: &ViewContext<'_>,
    constraints: &ConstraintSet,
    host_stat: Option<&HostStat>,
) -> Vec<u32> {
    let online = host_online(ctx, host_stat);
    let usable = if constraints.cpuset.is_empty() {
        online
    } else {
        constraints.cpuset.intersect(&online)
    };

    let mut cpus: Vec<u32> = usable.iter().collect();
    if ctx.opts.cfs {
        if let Some(count) = constraints.cfs_cpu_count() {
            cpus.truncate(count as usize);
        }
    }
    cpus
}

fn constraints_for(ctx: &ViewContext<'_>) -> Result<ConstraintSet, OpError> {
    Ok(ConstraintSet::for_pid(ctx.snapshot, ctx.proc_root, ctx.pid)?)
}

fn read_host(ctx: &ViewContext<'_>, name: &str) -> Result<String, OpError> {
    std::fs::read_to_string(ctx.proc_root.join(name))
        .map_err(|err| OpError::Fatal(format!("failed to read host /proc/{name}: {err}")))
}

fn render_cpuinfo(ctx: &ViewContext<'_>) -> Result<Vec<u8>, OpError> {
    let constraints = constraints_for(ctx)?;
    let cpus = visible_cpus(ctx, &constraints, None);
    let host = read_host(ctx, "cpuinfo")?;
    Ok(cpuinfo::render(&host, &cpus).into_bytes())
}

fn render_stat(ctx: &ViewContext<'_>) -> Result<Vec<u8>, OpError> {
    let constraints = constraints_for(ctx)?;

    let mut reader = fsutil::open_file_reader(ctx.proc_root.join("stat"))
        .map_err(|err| OpError::Fatal(err.to_string()))?;
    let host = HostStat::from_reader(&mut reader)
        .map_err(|err| OpError::Fatal(format!("failed to parse host /proc/stat: {err}")))?;

    let cpus = visible_cpus(ctx, &constraints, Some(&host));
    let key = accounting_key(ctx)?;
    let projection = ctx.cpuview.project(&key, &host, &cpus);
    Ok(stat::render(&host, &projection).into_bytes())
}

/// Cache key for the caller's CPU accounting entry: the absolute path of
/// its cgroup directory, which doubles as the existence probe for reaping.
fn accounting_key(ctx: &ViewContext<'_>) -> Result<String, OpError> {
    let entries = cgroup::proc_cgroup_entries(ctx.proc_root, ctx.pid)?;
    let cg = resolve_first(ctx.snapshot, &entries, &["cpuacct", "cpu", "cpuset", "memory"])?;
    Ok(match cg {
        Some(cg) => cg.absolute().to_string_lossy().into_owned(),
        None => "<unconfined>".to_owned(),
    })
}

fn render_meminfo(ctx: &ViewContext<'_>) -> Result<Vec<u8>, OpError> {
    let constraints = constraints_for(ctx)?;
    let usage = memory_usage(ctx)?;

    let mut reader = fsutil::open_file_reader(ctx.proc_root.join("meminfo"))
        .map_err(|err| OpError::Fatal(err.to_string()))?;
    let host = Meminfo::from_reader(&mut reader)
        .map_err(|err| OpError::Fatal(format!("failed to parse host /proc/meminfo: {err}")))?;

    Ok(meminfo::render(&host, &constraints, &usage, ctx.opts.swap_off).into_bytes())
}

fn memory_usage(ctx: &ViewContext<'_>) -> Result<MemoryUsage, OpError> {
    let entries = cgroup::proc_cgroup_entries(ctx.proc_root, ctx.pid)?;
    Ok(
        match cgroup::resolve_first(ctx.snapshot, &entries, &["memory"])? {
            Some(cg) => MemoryUsage::for_cgroup(&cg),
            None => MemoryUsage::default(),
        },
    )
}

fn render_uptime(ctx: &ViewContext<'_>) -> Result<Vec<u8>, OpError> {
    let constraints = constraints_for(ctx)?;
    let entries = cgroup::proc_cgroup_entries(ctx.proc_root, ctx.pid)?;

    let pids = match resolve_first(ctx.snapshot, &entries, ANY_CGROUP)? {
        Some(cg) => uptime::cgroup_pids(&cg.absolute()),
        None => Vec::new(),
    };

    let host_uptime = uptime::host_uptime_secs(ctx.proc_root);
    let age = uptime::container_age(ctx.proc_root, &pids, host_uptime, ticks_per_sec());
    let cpu_count = visible_cpus(ctx, &constraints, None).len();
    Ok(uptime::render(age, cpu_count).into_bytes())
}

fn render_loadavg(ctx: &ViewContext<'_>) -> Result<Vec<u8>, OpError> {
    if let (true, Some(tracker)) = (ctx.opts.loadavg, ctx.loadavg) {
        let entries = cgroup::proc_cgroup_entries(ctx.proc_root, ctx.pid)?;
        if let Some(cg) = resolve_first(ctx.snapshot, &entries, ANY_CGROUP)? {
            let dir = cg.absolute();
            let key = dir.to_string_lossy().into_owned();
            return Ok(tracker.render(&key, &dir).into_bytes());
        }
    }
    Ok(read_host(ctx, "loadavg")?.into_bytes())
}

fn render_swaps(ctx: &ViewContext<'_>) -> Result<Vec<u8>, OpError> {
    let constraints = constraints_for(ctx)?;
    let host_swaps = read_host(ctx, "swaps")?;

    // Unconstrained callers see the host file untouched (unless swap is
    // suppressed outright); only a real mem+swap limit earns the synthetic
    // entry.
    let constrained =
        constraints.memsw_limit_bytes.is_some() && constraints.mem_limit_bytes.is_some();
    if !constrained && !ctx.opts.swap_off {
        return Ok(host_swaps.into_bytes());
    }

    let usage = memory_usage(ctx)?;
    let host_swap_total_kb = fsutil::open_file_reader(ctx.proc_root.join("meminfo"))
        .ok()
        .and_then(|mut reader| Meminfo::from_reader(&mut reader).ok())
        .and_then(|info| info.value("SwapTotal"))
        .unwrap_or(0);

    let (total_kb, used_kb) =
        meminfo::swap_kb(&constraints, &usage, host_swap_total_kb, ctx.opts.swap_off);
    Ok(blkio::render_swaps(&host_swaps, total_kb, used_kb).into_bytes())
}

fn render_diskstats(ctx: &ViewContext<'_>) -> Result<Vec<u8>, OpError> {
    let entries = cgroup::proc_cgroup_entries(ctx.proc_root, ctx.pid)?;
    let stats = resolve_first(ctx.snapshot, &entries, &["io", "blkio"])?.and_then(|cg| {
        match cg.controller().version() {
            Version::V2 => fsutil::open_file_reader(cg.file("io.stat"))
                .ok()
                .and_then(|mut reader| DeviceIoStats::from_io_stat(&mut reader).ok()),
            Version::V1 => {
                let bytes = fsutil::open_file_reader(cg.file("blkio.throttle.io_service_bytes"));
                let ops = fsutil::open_file_reader(cg.file("blkio.throttle.io_serviced"));
                match (bytes, ops) {
                    (Ok(mut bytes), Ok(mut ops)) => {
                        DeviceIoStats::from_blkio_throttle(&mut bytes, &mut ops).ok()
                    }
                    _ => None,
                }
            }
        }
    });

    let host = read_host(ctx, "diskstats")?;
    Ok(blkio::render_diskstats(&host, stats.as_ref()).into_bytes())
}

fn render_cpu_online(ctx: &ViewContext<'_>) -> Result<Vec<u8>, OpError> {
    let constraints = constraints_for(ctx)?;
    let count = visible_cpus(ctx, &constraints, None).len();
    Ok(sys_cpu::render_online(count).into_bytes())
}

/// USER_HZ, the unit of `/proc` tick counters.
fn ticks_per_sec() -> u64 {
    // SAFETY: sysconf has no memory-safety preconditions.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 { hz as u64 } else { 100 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(ProcFile::from_path("/proc/meminfo"), Some(ProcFile::Meminfo));
        assert_eq!(ProcFile::from_path("/proc/stat"), Some(ProcFile::Stat));
        assert_eq!(
            ProcFile::from_path("/sys/devices/system/cpu/online"),
            Some(ProcFile::CpuOnline)
        );
        assert_eq!(ProcFile::from_path("/proc/version"), None);
        assert_eq!(ProcFile::from_path("/proc/meminfo/x"), None);
    }

    #[test]
    fn test_ticks_per_sec_is_sane() {
        let hz = ticks_per_sec();
        assert!(hz >= 1 && hz <= 1000);
    }
}
