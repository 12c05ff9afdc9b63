//! Controller discovery and the published hierarchy snapshot.
//!
//! At startup the daemon enumerates `/proc/self/mountinfo` and
//! `/proc/cgroups` to learn which controllers exist, which cgroup version
//! each one is served by, and where its hierarchy is mounted. Hybrid hosts
//! expose v1 hierarchies and the v2 unified tree at the same time; both are
//! recorded side by side and the resolver applies the version preference per
//! lookup.
//!
//! The result is an immutable [`HierarchySnapshot`] published through
//! [`SharedHierarchy`]: readers grab an `Arc` clone and keep a stable view
//! for the duration of one operation, while a refresh swaps the pointer for
//! newly bootstrapped state.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::fsutil;
use crate::mountinfo::{self, CgroupMount};

use super::Result;

/// Which cgroup layout serves a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    V1,
    V2,
}

/// A named kernel resource controller and where its hierarchy is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controller {
    name: String,
    version: Version,
    mountpoint: PathBuf,
}

impl Controller {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Host path of the hierarchy root this controller lives under.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// `true` for controllers served by the v2 unified hierarchy.
    pub fn is_unified(&self) -> bool {
        self.version == Version::V2
    }
}

/// An immutable view of the controller layout, produced by [`bootstrap`].
#[derive(Debug, Default)]
pub struct HierarchySnapshot {
    controllers: Vec<Controller>,
    v2_root: Option<PathBuf>,
    generation: u64,
}

impl HierarchySnapshot {
    /// Looks up a controller under a specific version.
    pub fn controller(&self, name: &str, version: Version) -> Option<&Controller> {
        self.controllers
            .iter()
            .find(|c| c.name == name && c.version == version)
    }

    /// All discovered controllers, v1 and v2 alike.
    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    /// Mount point of the v2 unified hierarchy, if the host has one.
    pub fn v2_root(&self) -> Option<&Path> {
        self.v2_root.as_deref()
    }

    /// Monotonic bootstrap counter, bumped on every refresh.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Controllers the kernel reports in `/proc/cgroups`.
///
/// Format: `#subsys_name hierarchy num_cgroups enabled`, one controller per
/// line after the header. Controllers with `enabled == 0` are skipped.
fn parse_proc_cgroups<R: BufRead>(mut reader: R) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut line = String::new();

    while reader.read_line(&mut line)? != 0 {
        if !line.starts_with('#') {
            let mut parts = line.split_whitespace();
            if let (Some(name), Some(enabled)) = (parts.next(), parts.nth(2)) {
                if enabled == "1" {
                    names.push(name.to_owned());
                }
            }
        }
        line.clear();
    }

    Ok(names)
}

/// Controllers enabled at the root of the v2 unified hierarchy, from
/// `cgroup.controllers`.
fn v2_enabled_controllers(v2_root: &Path) -> Vec<String> {
    match fsutil::read_trimmed_opt(v2_root.join("cgroup.controllers")) {
        Ok(Some(contents)) => contents.split_whitespace().map(str::to_owned).collect(),
        Ok(None) => Vec::new(),
        Err(err) => {
            log::warn!(
                "failed to read cgroup.controllers under `{}`: {err}",
                v2_root.display()
            );
            Vec::new()
        }
    }
}

/// Discovers the controller layout of the host.
///
/// # Arguments
///
/// * `proc_root` - The procfs root, normally `/proc`. Parameterized so tests
///   can point at fixture trees.
///
/// # Errors
///
/// Returns [`super::Error::Mountinfo`] if `<proc_root>/self/mountinfo` cannot be
/// read or contains no cgroup mount at all. A missing or unreadable
/// `/proc/cgroups` degrades to mountinfo-only discovery.
pub fn bootstrap(proc_root: &Path) -> Result<HierarchySnapshot> {
    let mounts = mountinfo::detect_cgroup_mounts(proc_root.join("self/mountinfo"))?;

    let known = match fsutil::open_file_reader(proc_root.join("cgroups")) {
        Ok(reader) => parse_proc_cgroups(reader).unwrap_or_default(),
        Err(err) => {
            log::warn!("failed to open /proc/cgroups, trusting mountinfo alone: {err}");
            Vec::new()
        }
    };

    let mut controllers = Vec::new();
    let mut v2_root = None;

    for mount in mounts {
        match mount {
            CgroupMount::V1 {
                mount_point,
                controllers: names,
            } => {
                for name in names {
                    if !known.is_empty() && !known.contains(&name) {
                        log::debug!("skipping v1 mount option `{name}`: not a known controller");
                        continue;
                    }
                    // At most one mountpoint per (name, version): keep the first.
                    if controllers
                        .iter()
                        .any(|c: &Controller| c.name == name && c.version == Version::V1)
                    {
                        continue;
                    }
                    controllers.push(Controller {
                        name,
                        version: Version::V1,
                        mountpoint: mount_point.clone(),
                    });
                }
            }
            CgroupMount::V2 { mount_point } => {
                if v2_root.is_none() {
                    for name in v2_enabled_controllers(&mount_point) {
                        controllers.push(Controller {
                            name,
                            version: Version::V2,
                            mountpoint: mount_point.clone(),
                        });
                    }
                    v2_root = Some(mount_point);
                }
            }
        }
    }

    log::debug!(
        "bootstrapped cgroup hierarchy: {} controllers, unified root {:?}",
        controllers.len(),
        v2_root
    );

    Ok(HierarchySnapshot {
        controllers,
        v2_root,
        generation: 0,
    })
}

/// The process-wide hierarchy handle.
///
/// Holds the current snapshot behind an `RwLock<Arc<..>>`; readers clone the
/// `Arc` (cheap, reference-counted) and never observe a half-updated layout.
/// A refresh bootstraps a fresh snapshot and swaps the pointer, leaving
/// in-flight readers on the old one until they drop it.
#[derive(Debug)]
pub struct SharedHierarchy {
    current: RwLock<Arc<HierarchySnapshot>>,
    proc_root: PathBuf,
    generation: AtomicU64,
}

impl SharedHierarchy {
    /// Bootstraps the initial snapshot from the given procfs root.
    ///
    /// # Errors
    ///
    /// Fails only if initial discovery fails; see [`bootstrap`].
    pub fn bootstrap(proc_root: impl Into<PathBuf>) -> Result<Self> {
        let proc_root = proc_root.into();
        let snapshot = bootstrap(&proc_root)?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            proc_root,
            generation: AtomicU64::new(0),
        })
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<HierarchySnapshot> {
        Arc::clone(&self.current.read().expect("hierarchy lock poisoned"))
    }

    /// Re-discovers the controller layout and publishes it.
    ///
    /// Invoked on `SIGUSR1`. On failure the previous snapshot stays
    /// published and the error is returned for logging.
    ///
    /// # Errors
    ///
    /// Returns [`super::Error::Mountinfo`] when re-discovery fails.
    pub fn refresh(&self) -> Result<u64> {
        let mut snapshot = bootstrap(&self.proc_root)?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        snapshot.generation = generation;

        let mut current = self.current.write().expect("hierarchy lock poisoned");
        *current = Arc::new(snapshot);
        Ok(generation)
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }
}
