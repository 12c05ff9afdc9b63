//! Per-cgroup load average tracking and the `/proc/loadavg` renderer.
//!
//! The kernel maintains its load averages as fixed-point EMAs updated every
//! five seconds; this tracker mirrors that arithmetic per cgroup, counting
//! runnable and uninterruptible tasks from the member processes' states.
//! When tracking is disabled the dispatcher proxies the host file instead.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;

use crate::fsutil;

/// Fixed-point base of the kernel's load average arithmetic (1 << 11).
const FIXED_1: u64 = 2048;
/// Decay factors for the 1, 5 and 15 minute windows at a 5 s sample period:
/// `2048 / e^(5/60m)` per include/linux/sched/loadavg.h.
const EXP_1: u64 = 1884;
const EXP_5: u64 = 2014;
const EXP_15: u64 = 2037;

/// How often entries are expected to be resampled.
pub const SAMPLE_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Default)]
struct LoadEntry {
    cgroup_dir: PathBuf,
    load1: u64,
    load5: u64,
    load15: u64,
    nr_running: u64,
    nr_total: u64,
    last_pid: u32,
}

/// One EMA step of the kernel's `calc_load`.
fn calc_load(load: u64, exp: u64, active_fixed: u64) -> u64 {
    let mut newload = load * exp + active_fixed * (FIXED_1 - exp);
    if active_fixed >= load {
        newload += FIXED_1 - 1;
    }
    newload / FIXED_1
}

fn load_int(load: u64) -> u64 {
    load >> 11
}

fn load_frac(load: u64) -> u64 {
    load_int((load & (FIXED_1 - 1)) * 100)
}

/// Process-wide per-cgroup load tracker.
///
/// Entries appear on the first `/proc/loadavg` read from a cgroup and are
/// resampled by the background task every [`SAMPLE_INTERVAL_SECS`]; entries
/// whose cgroup directory vanished are dropped during the sweep.
#[derive(Debug, Default)]
pub struct LoadavgTracker {
    proc_root: PathBuf,
    entries: DashMap<String, Mutex<LoadEntry>>,
}

impl LoadavgTracker {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the load view for a cgroup, starting to track it if needed.
    pub fn render(&self, key: &str, cgroup_dir: &Path) -> String {
        let entry = self.entries.entry(key.to_owned()).or_insert_with(|| {
            let mut entry = LoadEntry {
                cgroup_dir: cgroup_dir.to_path_buf(),
                ..Default::default()
            };
            sample_entry(&self.proc_root, &mut entry);
            // Seed the averages at the current task count rather than
            // ramping up from zero.
            let seed = entry.nr_running * FIXED_1;
            entry.load1 = seed;
            entry.load5 = seed;
            entry.load15 = seed;
            Mutex::new(entry)
        });
        let entry = entry.lock().expect("loadavg entry lock poisoned");

        format!(
            "{}.{:02} {}.{:02} {}.{:02} {}/{} {}\n",
            load_int(entry.load1),
            load_frac(entry.load1),
            load_int(entry.load5),
            load_frac(entry.load5),
            load_int(entry.load15),
            load_frac(entry.load15),
            entry.nr_running,
            entry.nr_total,
            entry.last_pid,
        )
    }

    /// Resamples every tracked cgroup and drops vanished ones.
    ///
    /// Driven by the 5 s background interval in the daemon loop.
    pub fn sample_all(&self) {
        self.entries.retain(|_, entry| {
            let mut entry = entry.lock().expect("loadavg entry lock poisoned");
            if !entry.cgroup_dir.is_dir() {
                return false;
            }
            sample_entry(&self.proc_root, &mut entry);
            let active_fixed = entry.nr_running * FIXED_1;
            entry.load1 = calc_load(entry.load1, EXP_1, active_fixed);
            entry.load5 = calc_load(entry.load5, EXP_5, active_fixed);
            entry.load15 = calc_load(entry.load15, EXP_15, active_fixed);
            true
        });
    }
}

/// Refreshes a cgroup's task counts from its member processes.
///
/// Runnable (`R`) and uninterruptible (`D`) states count toward the load.
fn sample_entry(proc_root: &Path, entry: &mut LoadEntry) {
    let mut running = 0u64;
    let mut total = 0u64;
    let mut last_pid = 0u32;

    if let Ok(reader) = fsutil::open_file_reader(entry.cgroup_dir.join("cgroup.procs")) {
        for line in reader.lines().map_while(Result::ok) {
            let Ok(pid) = line.trim().parse::<u32>() else {
                continue;
            };
            total += 1;
            last_pid = last_pid.max(pid);
            if matches!(process_state(proc_root, pid), Some('R') | Some('D')) {
                running += 1;
            }
        }
    }

    entry.nr_running = running;
    entry.nr_total = total;
    entry.last_pid = last_pid;
}

/// Reads the state field (3rd) of `/proc/<pid>/stat`.
fn process_state(proc_root: &Path, pid: u32) -> Option<char> {
    let stat = fsutil::read_trimmed(proc_root.join(pid.to_string()).join("stat")).ok()?;
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm.split_whitespace().next()?.chars().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture(states: &[(u32, char)]) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let cgroup = tmp.path().join("cg");
        fs::create_dir_all(&cgroup).unwrap();

        let mut procs = String::new();
        for &(pid, state) in states {
            procs.push_str(&format!("{pid}\n"));
            let dir = tmp.path().join(pid.to_string());
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join("stat"),
                format!("{pid} (proc) {state} 1 1 1 0 -1 0 0 0 0 0 0 0 0 0 20 0 1 0 100 0\n"),
            )
            .unwrap();
        }
        fs::write(cgroup.join("cgroup.procs"), procs).unwrap();
        (tmp, cgroup)
    }

    #[test]
    fn test_calc_load_converges_upward() {
        let mut load = 0u64;
        for _ in 0..200 {
            load = calc_load(load, EXP_1, 2 * FIXED_1);
        }
        assert_eq!(load_int(load), 2);
    }

    #[test]
    fn test_calc_load_decays_toward_zero() {
        let mut load = 4 * FIXED_1;
        for _ in 0..500 {
            load = calc_load(load, EXP_1, 0);
        }
        assert_eq!(load_int(load), 0);
    }

    #[test]
    fn test_render_counts_running_and_total() {
        let (tmp, cgroup) = fixture(&[(10, 'R'), (11, 'S'), (12, 'D')]);
        let tracker = LoadavgTracker::new(tmp.path());

        let out = tracker.render("/cg", &cgroup);
        let tail: Vec<&str> = out.split_whitespace().skip(3).collect();
        assert_eq!(tail, vec!["2/3", "12"]);
        // Seeded at the active count.
        assert!(out.starts_with("2.00 2.00 2.00"));
    }

    #[test]
    fn test_sample_all_decays_after_tasks_stop() {
        let (tmp, cgroup) = fixture(&[(10, 'R')]);
        let tracker = LoadavgTracker::new(tmp.path());
        tracker.render("/cg", &cgroup);

        // The task goes idle; the 1-minute average decays below its seed.
        fs::write(
            tmp.path().join("10/stat"),
            "10 (proc) S 1 1 1 0 -1 0 0 0 0 0 0 0 0 0 20 0 1 0 100 0\n",
        )
        .unwrap();
        for _ in 0..12 {
            tracker.sample_all();
        }

        let out = tracker.render("/cg", &cgroup);
        let load1: f64 = out.split_whitespace().next().unwrap().parse().unwrap();
        assert!(load1 < 1.0, "expected decay, got {out}");
    }

    #[test]
    fn test_sample_all_drops_vanished_cgroup() {
        let (tmp, cgroup) = fixture(&[(10, 'R')]);
        let tracker = LoadavgTracker::new(tmp.path());
        tracker.render("/cg", &cgroup);
        assert_eq!(tracker.len(), 1);

        fs::remove_dir_all(&cgroup).unwrap();
        tracker.sample_all();
        assert!(tracker.is_empty());
    }
}
