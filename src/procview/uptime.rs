//! Renderer for `/proc/uptime`.
//!
//! The first number is the container's age: wall time elapsed since its
//! oldest surviving process started, computed from the `starttime` field of
//! `/proc/<pid>/stat` for every PID in the caller's cgroup. The second
//! number follows the kernel's convention of cumulative idle time summed
//! over CPUs, so it scales with the virtual CPU count.

use std::io::BufRead;
use std::path::Path;

use crate::fsutil;

/// Renders the uptime view.
pub fn render(age_secs: f64, virt_cpu_count: usize) -> String {
    let idle = age_secs * virt_cpu_count as f64;
    format!("{age_secs:.2} {idle:.2}\n")
}

/// Computes the container age in seconds.
///
/// `pids` are the members of the caller's cgroup; the earliest `starttime`
/// among them anchors the age. An empty cgroup reports `0.00`.
pub fn container_age(proc_root: &Path, pids: &[u32], host_uptime_secs: f64, ticks_per_sec: u64) -> f64 {
    let earliest_start_ticks = pids
        .iter()
        .filter_map(|&pid| process_start_ticks(proc_root, pid))
        .min();

    match earliest_start_ticks {
        Some(ticks) => {
            let started_secs = ticks as f64 / ticks_per_sec.max(1) as f64;
            (host_uptime_secs - started_secs).max(0.0)
        }
        None => 0.0,
    }
}

/// Reads the `starttime` field (22nd) of `/proc/<pid>/stat`.
///
/// The comm field may contain spaces and parentheses; everything up to the
/// final `)` is skipped before counting fields.
fn process_start_ticks(proc_root: &Path, pid: u32) -> Option<u64> {
    let stat = fsutil::read_trimmed(proc_root.join(pid.to_string()).join("stat")).ok()?;
    let after_comm = &stat[stat.rfind(')')? + 1..];
    // `state` is field 3; `starttime` is field 22.
    after_comm
        .split_whitespace()
        .nth(19)
        .and_then(|tok| tok.parse::<u64>().ok())
}

/// Reads the PIDs of a cgroup from its `cgroup.procs` file.
pub fn cgroup_pids(cgroup_dir: &Path) -> Vec<u32> {
    let Ok(reader) = fsutil::open_file_reader(cgroup_dir.join("cgroup.procs")) else {
        return Vec::new();
    };
    reader
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

/// Reads the first number of the host `/proc/uptime`.
pub fn host_uptime_secs(proc_root: &Path) -> f64 {
    fsutil::read_trimmed(proc_root.join("uptime"))
        .ok()
        .and_then(|raw| {
            raw.split_whitespace()
                .next()
                .and_then(|tok| tok.parse::<f64>().ok())
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_proc_stat(proc_root: &Path, pid: u32, comm: &str, starttime: u64) {
        let dir = proc_root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        // Fields 3..=21 between comm and starttime.
        let middle = "S 1 1 1 0 -1 4194560 1000 0 0 0 5 5 0 0 20 0 1 0";
        fs::write(
            dir.join("stat"),
            format!("{pid} ({comm}) {middle} {starttime} 1000000\n"),
        )
        .unwrap();
    }

    #[test]
    fn test_render_format() {
        assert_eq!(render(12.5, 2), "12.50 25.00\n");
        assert_eq!(render(0.0, 4), "0.00 0.00\n");
    }

    #[test]
    fn test_age_from_earliest_process() {
        let tmp = tempfile::tempdir().unwrap();
        write_proc_stat(tmp.path(), 100, "init", 5000);
        write_proc_stat(tmp.path(), 101, "worker", 90_000);

        // 5000 ticks at 100 Hz = started 50 s after boot.
        let age = container_age(tmp.path(), &[100, 101], 1000.0, 100);
        assert!((age - 950.0).abs() < 1e-9);
    }

    #[test]
    fn test_age_with_no_processes() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(container_age(tmp.path(), &[], 1000.0, 100), 0.0);
    }

    #[test]
    fn test_comm_with_spaces_and_parens() {
        let tmp = tempfile::tempdir().unwrap();
        write_proc_stat(tmp.path(), 200, "tmux: server (1)", 42_000);
        let age = container_age(tmp.path(), &[200], 1000.0, 100);
        assert!((age - 580.0).abs() < 1e-9);
    }

    #[test]
    fn test_vanished_pid_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_proc_stat(tmp.path(), 100, "init", 5000);
        let age = container_age(tmp.path(), &[100, 555], 1000.0, 100);
        assert!((age - 950.0).abs() < 1e-9);
    }

    #[test]
    fn test_cgroup_pids() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("cgroup.procs"), "12\n34\n").unwrap();
        assert_eq!(cgroup_pids(tmp.path()), vec![12, 34]);
        assert!(cgroup_pids(&tmp.path().join("missing")).is_empty());
    }
}
