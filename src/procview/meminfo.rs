//! Renderer for `/proc/meminfo`.
//!
//! Memory-capacity keys are rewritten from the caller's memory cgroup;
//! every other key passes through from the host untouched. Rewrites go
//! through the column-preserving formatter so the rendered file is
//! byte-compatible with the host's field order and alignment.

use crate::cgroup::{ConstraintSet, MemoryUsage};
use crate::parsers::Meminfo;

/// Renders the meminfo view.
///
/// All arithmetic happens in kB, clamped so `MemFree <= MemTotal <=
/// host MemTotal` holds whatever the cgroup reports.
pub fn render(
    host: &Meminfo,
    constraints: &ConstraintSet,
    usage: &MemoryUsage,
    swap_off: bool,
) -> String {
    let host_total_kb = host.value("MemTotal").unwrap_or(0);
    let host_swap_total_kb = host.value("SwapTotal").unwrap_or(0);

    let total_kb = match constraints.mem_limit_bytes {
        Some(limit) => host_total_kb.min(limit / 1024),
        None => host_total_kb,
    };
    let usage_kb = usage.usage_bytes / 1024;
    let free_kb = total_kb.saturating_sub(usage_kb);
    let cached_kb = (usage.stat.cached / 1024).min(total_kb);
    let available_kb = free_kb.saturating_add(cached_kb).min(total_kb);
    let shmem_kb = (usage.stat.shmem / 1024).min(total_kb);

    let (swap_total_kb, swap_used_kb) = swap_kb(constraints, usage, host_swap_total_kb, swap_off);
    let swap_free_kb = swap_total_kb.saturating_sub(swap_used_kb);

    let mut out = String::with_capacity(2048);
    for line in &host.lines {
        let rewritten = match line.key.as_str() {
            "MemTotal" => Some(total_kb),
            "MemFree" => Some(free_kb),
            "MemAvailable" => Some(available_kb),
            "Buffers" => Some(0),
            "Cached" => Some(cached_kb),
            "SwapCached" => Some(0),
            "SwapTotal" => Some(swap_total_kb),
            "SwapFree" => Some(swap_free_kb),
            "Shmem" => Some(shmem_kb),
            _ => None,
        };
        match rewritten {
            Some(value) => out.push_str(&line.render_with(value)),
            None => out.push_str(line.raw()),
        }
    }

    out
}

/// Swap total and used for a container, in kB.
///
/// The container's swap is the slack between the mem+swap limit and the
/// memory limit, capped by what the host actually has; without both limits
/// it inherits the host's swap.
pub(super) fn swap_kb(
    constraints: &ConstraintSet,
    usage: &MemoryUsage,
    host_swap_total_kb: u64,
    swap_off: bool,
) -> (u64, u64) {
    if swap_off {
        return (0, 0);
    }
    let total_kb = match (constraints.memsw_limit_bytes, constraints.mem_limit_bytes) {
        (Some(memsw), Some(mem)) => (memsw.saturating_sub(mem) / 1024).min(host_swap_total_kb),
        _ => host_swap_total_kb,
    };
    let used_kb = (usage.swap_usage_bytes / 1024).min(total_kb);
    (total_kb, used_kb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::MemCgStat;

    const HOST: &str = "\
MemTotal:       16334728 kB
MemFree:         7980660 kB
MemAvailable:   11543676 kB
Buffers:          532412 kB
Cached:          3233500 kB
SwapCached:            0 kB
SwapTotal:       2097148 kB
SwapFree:        2097148 kB
Shmem:            502764 kB
Slab:             432004 kB
";

    fn host() -> Meminfo {
        Meminfo::from_reader(&mut HOST.as_bytes()).unwrap()
    }

    fn constrained(limit: u64) -> ConstraintSet {
        ConstraintSet {
            mem_limit_bytes: Some(limit),
            ..Default::default()
        }
    }

    #[test]
    fn test_limit_caps_memtotal() {
        let usage = MemoryUsage::default();
        let out = render(&host(), &constrained(1 << 30), &usage, false);
        assert!(out.starts_with("MemTotal:        1048576 kB\n"));
    }

    #[test]
    fn test_memfree_subtracts_usage() {
        let usage = MemoryUsage {
            usage_bytes: 100 << 20,
            ..Default::default()
        };
        let out = render(&host(), &constrained(1 << 30), &usage, false);
        let free_line = out.lines().nth(1).unwrap();
        assert_eq!(free_line, "MemFree:          946176 kB");
    }

    #[test]
    fn test_usage_above_limit_clamps_free_to_zero() {
        let usage = MemoryUsage {
            usage_bytes: 2 << 30,
            ..Default::default()
        };
        let out = render(&host(), &constrained(1 << 30), &usage, false);
        assert!(out.contains("MemFree:               0 kB"));
    }

    #[test]
    fn test_unlimited_cgroup_reports_host_total() {
        let out = render(
            &host(),
            &ConstraintSet::default(),
            &MemoryUsage::default(),
            false,
        );
        assert!(out.starts_with("MemTotal:       16334728 kB\n"));
    }

    #[test]
    fn test_field_order_matches_host() {
        let out = render(&host(), &constrained(1 << 30), &MemoryUsage::default(), false);
        let host_keys: Vec<&str> = HOST.lines().map(|l| l.split(':').next().unwrap()).collect();
        let out_keys: Vec<&str> = out.lines().map(|l| l.split(':').next().unwrap()).collect();
        assert_eq!(host_keys, out_keys);
    }

    #[test]
    fn test_unknown_keys_pass_through_verbatim() {
        let out = render(&host(), &constrained(1 << 30), &MemoryUsage::default(), false);
        assert!(out.contains("Slab:             432004 kB\n"));
    }

    #[test]
    fn test_cached_comes_from_cgroup_stat() {
        let usage = MemoryUsage {
            usage_bytes: 0,
            swap_usage_bytes: 0,
            stat: MemCgStat {
                cached: 8 << 20,
                shmem: 1 << 20,
                swap: 0,
            },
        };
        let out = render(&host(), &constrained(1 << 30), &usage, false);
        assert!(out.contains("Cached:             8192 kB\n"));
        assert!(out.contains("Shmem:              1024 kB\n"));
        assert!(out.contains("Buffers:               0 kB\n"));
    }

    #[test]
    fn test_swap_slack_between_limits() {
        let constraints = ConstraintSet {
            mem_limit_bytes: Some(1 << 30),
            memsw_limit_bytes: Some((1 << 30) + (256 << 20)),
            ..Default::default()
        };
        let usage = MemoryUsage {
            swap_usage_bytes: 64 << 20,
            ..Default::default()
        };
        let out = render(&host(), &constraints, &usage, false);
        assert!(out.contains("SwapTotal:        262144 kB\n"));
        assert!(out.contains("SwapFree:         196608 kB\n"));
    }

    #[test]
    fn test_swap_off_zeroes_swap() {
        let out = render(&host(), &constrained(1 << 30), &MemoryUsage::default(), true);
        assert!(out.contains("SwapTotal:             0 kB\n"));
        assert!(out.contains("SwapFree:              0 kB\n"));
    }

    #[test]
    fn test_memtotal_never_exceeds_host() {
        let out = render(
            &host(),
            &constrained(u64::MAX),
            &MemoryUsage::default(),
            false,
        );
        assert!(out.starts_with("MemTotal:       16334728 kB\n"));
    }
}
