//! PID to cgroup path resolution via `/proc/<pid>/cgroup`.
//!
//! Each line of that file is `hierarchy-id:controllers:path`. For v1 lines
//! the controller list is non-empty; the single v2 line has hierarchy id 0
//! and an empty controller list. On hybrid hosts a controller can be
//! reachable through both versions at once; the v2 placement wins whenever
//! the reader actually sits in a non-root v2 cgroup, otherwise the v1 line
//! is used.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::fsutil;

use super::hierarchy::{Controller, HierarchySnapshot, Version};
use super::{Error, Result};

/// One parsed line of `/proc/<pid>/cgroup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcCgroupEntry {
    pub hierarchy_id: u32,
    pub controllers: Vec<String>,
    pub path: String,
}

/// A controller placement for one process: the controller plus the path of
/// the process's cgroup relative to the controller's hierarchy root.
///
/// Derived on demand from a PID and dropped after the operation; the only
/// long-lived use is as a key into the CPU accounting cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupPath {
    controller: Controller,
    relative: String,
}

impl CgroupPath {
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Path beneath the controller root, always starting with `/`.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Absolute host path of the cgroup directory.
    pub fn absolute(&self) -> PathBuf {
        join_cgroup(self.controller.mountpoint(), &self.relative)
    }

    /// Absolute host path of a file inside the cgroup directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.absolute().join(name)
    }
}

/// Joins a controller mountpoint with a `/proc/<pid>/cgroup` path.
pub(super) fn join_cgroup(mountpoint: &Path, relative: &str) -> PathBuf {
    mountpoint.join(relative.trim_start_matches('/'))
}

fn parse_proc_cgroup<R: BufRead>(mut reader: R) -> std::io::Result<Vec<ProcCgroupEntry>> {
    let mut entries = Vec::new();
    let mut line = String::new();

    while reader.read_line(&mut line)? != 0 {
        let trimmed = line.trim_end();
        let mut parts = trimmed.splitn(3, ':');
        if let (Some(id), Some(controllers), Some(path)) =
            (parts.next(), parts.next(), parts.next())
        {
            if let Ok(hierarchy_id) = id.parse::<u32>() {
                entries.push(ProcCgroupEntry {
                    hierarchy_id,
                    controllers: controllers
                        .split(',')
                        .filter(|c| !c.is_empty())
                        .map(str::to_owned)
                        .collect(),
                    path: path.to_owned(),
                });
            }
        }
        line.clear();
    }

    Ok(entries)
}

/// Reads and parses `/proc/<pid>/cgroup`.
///
/// # Errors
///
/// Returns [`Error::ProcCgroupUnreadable`], which the dispatch layer maps to
/// `EIO`: a process whose cgroup membership cannot be read cannot be served
/// a virtualized view.
pub fn proc_cgroup_entries(proc_root: &Path, pid: u32) -> Result<Vec<ProcCgroupEntry>> {
    let path = proc_root.join(pid.to_string()).join("cgroup");
    let reader = fsutil::open_file_reader(&path).map_err(|err| Error::ProcCgroupUnreadable {
        pid,
        source: err.source,
    })?;
    parse_proc_cgroup(reader).map_err(|source| Error::ProcCgroupUnreadable { pid, source })
}

/// Resolves the cgroup placement of `pid` for the named controller.
///
/// Returns `Ok(None)` when the controller is not present on this host in
/// either version; callers treat that as "unconstrained" so the view
/// degrades gracefully on kernels without the controller.
///
/// # Errors
///
/// Only [`Error::ProcCgroupUnreadable`]; controller absence is not an error.
pub fn resolve(
    snapshot: &HierarchySnapshot,
    proc_root: &Path,
    pid: u32,
    controller: &str,
) -> Result<Option<CgroupPath>> {
    let entries = proc_cgroup_entries(proc_root, pid)?;
    resolve_from_entries(snapshot, &entries, controller)
}

/// Resolution core, split out so tests can feed synthetic entries.
pub(super) fn resolve_from_entries(
    snapshot: &HierarchySnapshot,
    entries: &[ProcCgroupEntry],
    controller: &str,
) -> Result<Option<CgroupPath>> {
    let v2_entry = entries
        .iter()
        .find(|e| e.hierarchy_id == 0 && e.controllers.is_empty());
    let v1_entry = entries
        .iter()
        .find(|e| e.controllers.iter().any(|c| c == controller));

    let v2_controller = snapshot.controller(controller, Version::V2);
    let v1_controller = snapshot.controller(controller, Version::V1);

    // Hybrid rule: prefer v2 when the reader's v2 placement is non-root,
    // else fall back to v1.
    if let (Some(ctrl), Some(entry)) = (v2_controller, v2_entry) {
        if entry.path != "/" || v1_controller.is_none() || v1_entry.is_none() {
            return Ok(Some(CgroupPath {
                controller: ctrl.clone(),
                relative: entry.path.clone(),
            }));
        }
    }

    if let (Some(ctrl), Some(entry)) = (v1_controller, v1_entry) {
        return Ok(Some(CgroupPath {
            controller: ctrl.clone(),
            relative: entry.path.clone(),
        }));
    }

    Ok(None)
}

/// Resolves the first of several candidate controllers that is present.
///
/// Views that only need "the caller's cgroup directory" (uptime, loadavg,
/// CPU accounting) accept any of a few controllers; preference order is the
/// caller's.
pub fn resolve_first(
    snapshot: &HierarchySnapshot,
    entries: &[ProcCgroupEntry],
    controllers: &[&str],
) -> Result<Option<CgroupPath>> {
    for controller in controllers {
        if let Some(cg) = resolve_from_entries(snapshot, entries, controller)? {
            return Ok(Some(cg));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::hierarchy::bootstrap;
    use std::fs;

    const PROC_CGROUP_HYBRID: &str = "\
12:memory:/docker/abc
4:cpu,cpuacct:/docker/abc
3:cpuset:/docker/abc
0::/payload
";

    fn hybrid_snapshot(tmp: &Path) -> HierarchySnapshot {
        let v2 = tmp.join("unified");
        fs::create_dir_all(&v2).unwrap();
        fs::write(v2.join("cgroup.controllers"), "memory pids\n").unwrap();
        fs::create_dir_all(tmp.join("self")).unwrap();
        fs::write(
            tmp.join("self/mountinfo"),
            format!(
                "30 25 0:26 / {root}/memory rw shared:9 - cgroup cgroup rw,memory\n\
                 31 25 0:27 / {root}/cpuset rw shared:9 - cgroup cgroup rw,cpuset\n\
                 43 25 0:39 / {unified} rw shared:11 - cgroup2 cgroup rw\n",
                root = tmp.join("v1").display(),
                unified = v2.display(),
            ),
        )
        .unwrap();
        fs::write(tmp.join("cgroups"), "").unwrap();
        bootstrap(tmp).unwrap()
    }

    #[test]
    fn test_parse_proc_cgroup_lines() {
        let entries = parse_proc_cgroup(PROC_CGROUP_HYBRID.as_bytes()).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].hierarchy_id, 12);
        assert_eq!(entries[0].controllers, vec!["memory".to_owned()]);
        assert_eq!(entries[1].controllers.len(), 2);
        assert_eq!(entries[3].hierarchy_id, 0);
        assert!(entries[3].controllers.is_empty());
        assert_eq!(entries[3].path, "/payload");
    }

    #[test]
    fn test_resolve_prefers_v2_when_placed() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot = hybrid_snapshot(tmp.path());
        let entries = parse_proc_cgroup(PROC_CGROUP_HYBRID.as_bytes()).unwrap();

        let placed = resolve_from_entries(&snapshot, &entries, "memory")
            .unwrap()
            .unwrap();
        assert!(placed.controller().is_unified());
        assert_eq!(placed.relative(), "/payload");
        assert!(placed.absolute().ends_with("unified/payload"));
    }

    #[test]
    fn test_resolve_falls_back_to_v1_at_v2_root() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot = hybrid_snapshot(tmp.path());
        let entries = parse_proc_cgroup(
            "12:memory:/docker/abc\n0::/\n".as_bytes(),
        )
        .unwrap();

        let placed = resolve_from_entries(&snapshot, &entries, "memory")
            .unwrap()
            .unwrap();
        assert!(!placed.controller().is_unified());
        assert_eq!(placed.relative(), "/docker/abc");
    }

    #[test]
    fn test_resolve_v1_only_controller() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot = hybrid_snapshot(tmp.path());
        let entries = parse_proc_cgroup(PROC_CGROUP_HYBRID.as_bytes()).unwrap();

        let placed = resolve_from_entries(&snapshot, &entries, "cpuset")
            .unwrap()
            .unwrap();
        assert!(!placed.controller().is_unified());
        assert_eq!(placed.relative(), "/docker/abc");
    }

    #[test]
    fn test_resolve_absent_controller_is_unconstrained() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot = hybrid_snapshot(tmp.path());
        let entries = parse_proc_cgroup(PROC_CGROUP_HYBRID.as_bytes()).unwrap();

        assert!(resolve_from_entries(&snapshot, &entries, "hugetlb")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_resolve_unreadable_proc_cgroup() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot = hybrid_snapshot(tmp.path());
        let err = resolve(&snapshot, tmp.path(), 999_999, "memory").unwrap_err();
        assert!(matches!(err, Error::ProcCgroupUnreadable { pid: 999_999, .. }));
    }
}
