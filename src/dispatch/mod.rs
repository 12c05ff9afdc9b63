//! Operation routing between the transport and the views.
//!
//! The transport (a FUSE session loop, out of tree) delivers `lookup`,
//! `getattr`, `open`, `read`, `readdir`, `write` and `release` operations,
//! each carrying the requesting process's PID and credentials. This module
//! classifies the path — virtualized `/proc` file, static directory, or
//! cgroup subtree — and forwards to the matching engine.
//!
//! Virtualized files are rendered in full at `open`; `read` slices the
//! rendered buffer, so a reader always sees one consistent snapshot even
//! across short reads. Handles are released explicitly or leak-swept with
//! the transport's session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::cgfs::{Attr, CgroupFs, Credentials, DirEntry};
use crate::cgroup::SharedHierarchy;
use crate::cpuview::CpuView;
use crate::devices::{DeviceController, RulesetEntry};
use crate::error::{OpError, ResultOkLogExt};
use crate::opts::Opts;
use crate::procview::{LoadavgTracker, ProcFile, ViewContext};

/// Where a mount-relative path leads.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    /// A synthesized `/proc` or `/sys` file.
    View(ProcFile),
    /// A static directory of the virtual tree.
    Dir(&'static str),
    /// The `/sys/fs/cgroup` root listing the controllers.
    CgroupRoot,
    /// A path below one controller of the cgroup tree.
    Cgroup { controller: String, rel: String },
}

/// Directories the virtual tree always contains.
const STATIC_DIRS: &[&str] = &[
    "/",
    "/proc",
    "/sys",
    "/sys/fs",
    "/sys/devices",
    "/sys/devices/system",
    "/sys/devices/system/cpu",
];

/// File names listed under `/proc`.
const PROC_FILES: &[&str] = &[
    "cpuinfo",
    "diskstats",
    "loadavg",
    "meminfo",
    "stat",
    "swaps",
    "uptime",
];

fn route(path: &str) -> Option<Route> {
    if let Some(view) = ProcFile::from_path(path) {
        return Some(Route::View(view));
    }
    if path == "/sys/fs/cgroup" {
        return Some(Route::CgroupRoot);
    }
    if let Some(rest) = path.strip_prefix("/sys/fs/cgroup/") {
        let (controller, rel) = match rest.split_once('/') {
            Some((controller, rel)) => (controller, format!("/{rel}")),
            None => (rest, "/".to_owned()),
        };
        if controller.is_empty() {
            return Some(Route::CgroupRoot);
        }
        return Some(Route::Cgroup {
            controller: controller.to_owned(),
            rel,
        });
    }
    STATIC_DIRS
        .iter()
        .find(|&&dir| dir == path)
        .map(|&dir| Route::Dir(dir))
}

/// The operation router; one per daemon, shared across worker threads.
#[derive(Debug)]
pub struct Dispatcher {
    hierarchy: SharedHierarchy,
    cpuview: CpuView,
    loadavg: Option<LoadavgTracker>,
    devices: DeviceController,
    opts: Opts,
    sys_root: PathBuf,
    handles: DashMap<u64, Vec<u8>>,
    next_handle: AtomicU64,
}

impl Dispatcher {
    pub fn new(hierarchy: SharedHierarchy, opts: Opts) -> Self {
        let loadavg = opts
            .loadavg
            .then(|| LoadavgTracker::new(hierarchy.proc_root().to_path_buf()));
        Self {
            hierarchy,
            cpuview: CpuView::new(),
            loadavg,
            devices: DeviceController::new(),
            opts,
            sys_root: PathBuf::from("/sys"),
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Overrides the sysfs root, for tests running against fixture trees.
    #[cfg(test)]
    fn with_sys_root(mut self, sys_root: impl Into<PathBuf>) -> Self {
        self.sys_root = sys_root.into();
        self
    }

    /// `lookup`: does the path exist for this caller?
    ///
    /// # Errors
    ///
    /// `NotFound` for paths outside the virtual surface; visibility errors
    /// from the cgroup tree.
    pub fn lookup(&self, creds: &Credentials, path: &str) -> Result<Attr, OpError> {
        self.getattr(creds, path)
    }

    /// `getattr` for any path of the surface.
    pub fn getattr(&self, creds: &Credentials, path: &str) -> Result<Attr, OpError> {
        match route(path).ok_or(OpError::NotFound)? {
            Route::View(_) => Ok(Attr {
                is_dir: false,
                // Like kernel procfs, synthesized files advertise no size;
                // readers keep reading until EOF.
                size: 0,
                mode: 0o100444,
                uid: creds.uid,
                gid: creds.gid,
            }),
            Route::Dir(_) | Route::CgroupRoot => Ok(dir_attr(creds)),
            Route::Cgroup { controller, rel } => {
                let snapshot = self.hierarchy.snapshot();
                CgroupFs::new(&snapshot, self.hierarchy.proc_root()).getattr(
                    creds,
                    &controller,
                    &rel,
                )
            }
        }
    }

    /// `open`: renders a virtualized file and returns a handle for reads.
    ///
    /// Cgroup-tree files are re-read per `read`, so their handle carries no
    /// buffer and is zero.
    pub fn open(&self, creds: &Credentials, path: &str) -> Result<u64, OpError> {
        match route(path).ok_or(OpError::NotFound)? {
            Route::View(view) => {
                let content = self.render(creds, view)?;
                let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
                self.handles.insert(handle, content);
                Ok(handle)
            }
            Route::Cgroup { .. } => Ok(0),
            Route::Dir(_) | Route::CgroupRoot => Err(OpError::Invalid(
                "cannot open a directory for reading".to_owned(),
            )),
        }
    }

    /// `read` from an open handle (virtualized files) or straight from the
    /// cgroup tree.
    pub fn read(
        &self,
        creds: &Credentials,
        path: &str,
        handle: u64,
        offset: u64,
        size: u32,
    ) -> Result<Vec<u8>, OpError> {
        if handle != 0 {
            let content = self.handles.get(&handle).ok_or(OpError::NotFound)?;
            return Ok(slice_at(&content, offset, size));
        }

        match route(path).ok_or(OpError::NotFound)? {
            Route::Cgroup { controller, rel } => {
                let snapshot = self.hierarchy.snapshot();
                let content = CgroupFs::new(&snapshot, self.hierarchy.proc_root()).read(
                    creds,
                    &controller,
                    &rel,
                )?;
                Ok(slice_at(&content, offset, size))
            }
            _ => Err(OpError::Invalid("read without an open handle".to_owned())),
        }
    }

    /// `readdir` for the static tree and the cgroup subtree.
    pub fn readdir(&self, creds: &Credentials, path: &str) -> Result<Vec<DirEntry>, OpError> {
        match route(path).ok_or(OpError::NotFound)? {
            Route::Dir("/proc") => Ok(PROC_FILES
                .iter()
                .map(|&name| DirEntry {
                    name: name.to_owned(),
                    is_dir: false,
                })
                .collect()),
            Route::Dir("/sys/devices/system/cpu") => Ok(vec![DirEntry {
                name: "online".to_owned(),
                is_dir: false,
            }]),
            Route::Dir(dir) => Ok(static_dir_children(dir)),
            Route::CgroupRoot => {
                let snapshot = self.hierarchy.snapshot();
                let mut names: Vec<String> = snapshot
                    .controllers()
                    .iter()
                    .map(|c| c.name().to_owned())
                    .collect();
                names.sort();
                names.dedup();
                Ok(names
                    .into_iter()
                    .map(|name| DirEntry {
                        name,
                        is_dir: true,
                    })
                    .collect())
            }
            Route::Cgroup { controller, rel } => {
                let snapshot = self.hierarchy.snapshot();
                CgroupFs::new(&snapshot, self.hierarchy.proc_root()).readdir(
                    creds,
                    &controller,
                    &rel,
                )
            }
            Route::View(_) => Err(OpError::Invalid("not a directory".to_owned())),
        }
    }

    /// `write`, permitted on the cgroup tree only.
    pub fn write(
        &self,
        creds: &Credentials,
        path: &str,
        data: &[u8],
    ) -> Result<usize, OpError> {
        match route(path).ok_or(OpError::NotFound)? {
            Route::Cgroup { controller, rel } => {
                let snapshot = self.hierarchy.snapshot();
                CgroupFs::new(&snapshot, self.hierarchy.proc_root()).write(
                    creds,
                    &controller,
                    &rel,
                    data,
                )
            }
            _ => Err(OpError::Permission),
        }
    }

    /// `release`: drops a render buffer.
    pub fn release(&self, handle: u64) {
        if handle != 0 {
            self.handles.remove(&handle);
        }
    }

    fn render(&self, creds: &Credentials, view: ProcFile) -> Result<Vec<u8>, OpError> {
        let snapshot = self.hierarchy.snapshot();
        let ctx = ViewContext {
            snapshot: &snapshot,
            proc_root: self.hierarchy.proc_root(),
            sys_root: &self.sys_root,
            pid: creds.pid,
            opts: &self.opts,
            cpuview: &self.cpuview,
            loadavg: self.loadavg.as_ref(),
        };
        view.render(&ctx)
    }

    /// Whether device cgroup programs can be installed on this kernel.
    pub fn devices_supported(&self) -> bool {
        self.devices.supported()
    }

    /// Installs a device ruleset on a cgroup directory (container-manager
    /// request path, independent of the file surface).
    pub fn apply_device_ruleset(
        &self,
        cgroup_dir: &Path,
        entries: &[RulesetEntry],
    ) -> Result<(), OpError> {
        self.devices.apply(cgroup_dir, entries)
    }

    /// Re-bootstraps the hierarchy snapshot (`SIGUSR1`).
    pub fn refresh(&self) {
        if let Some(generation) = self.hierarchy.refresh().ok_log() {
            log::info!("hierarchy refreshed, generation {generation}");
        }
    }

    /// Orderly shutdown (`SIGTERM`): detach device programs.
    pub fn shutdown(&self) {
        self.devices.detach_all();
        log::info!("detached device programs, shutting down");
    }

    /// Sweeps the CPU accounting cache for vanished cgroups.
    pub fn reap_cpu_entries(&self) -> usize {
        self.cpuview
            .reap(|key| !key.starts_with('/') || Path::new(key).is_dir())
    }

    /// Resamples tracked load averages (5 s cadence).
    pub fn sample_loadavg(&self) {
        if let Some(tracker) = &self.loadavg {
            tracker.sample_all();
        }
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }
}

/// The transport contract: a kernel-facing message loop that feeds
/// operations to the dispatcher. Implemented out of tree.
pub trait Transport {
    /// Runs the session loop until unmount or fatal transport error.
    fn serve(self, dispatcher: Arc<Dispatcher>) -> std::io::Result<()>;
}

fn dir_attr(creds: &Credentials) -> Attr {
    Attr {
        is_dir: true,
        size: 0,
        mode: 0o040555,
        uid: creds.uid,
        gid: creds.gid,
    }
}

fn static_dir_children(dir: &str) -> Vec<DirEntry> {
    let child = |name: &str| DirEntry {
        name: name.to_owned(),
        is_dir: true,
    };
    match dir {
        "/" => vec![child("proc"), child("sys")],
        "/sys" => vec![child("devices"), child("fs")],
        "/sys/fs" => vec![child("cgroup")],
        "/sys/devices" => vec![child("system")],
        "/sys/devices/system" => vec![child("cpu")],
        _ => Vec::new(),
    }
}

fn slice_at(content: &[u8], offset: u64, size: u32) -> Vec<u8> {
    let start = (offset as usize).min(content.len());
    let end = start.saturating_add(size as usize).min(content.len());
    content[start..end].to_vec()
}
