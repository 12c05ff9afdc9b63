//! The browsable cgroup tree: `/sys/fs/cgroup/<controller>/...`.
//!
//! Operations proxy to the backing cgroup files on the host, scoped by the
//! visibility rule: a caller may only see paths at or below its own cgroup
//! for the controller in question. Ownership is remapped so files the host
//! root owns appear owned by the caller's user-namespace root, and writes
//! are only forwarded where that remapped owner could write. Kernel error
//! codes pass through unchanged so controller semantics (EINVAL on a bad
//! cpuset, EBUSY on a populated cgroup, ...) survive the indirection.

use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

use crate::cgroup::{self, HierarchySnapshot};
use crate::error::OpError;

/// Caller identity delivered by the transport with each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

/// One directory entry of a `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// File attributes with ownership remapped for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub is_dir: bool,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Bounded retries for EINTR, per the transient-error policy.
const EINTR_RETRIES: usize = 3;

/// The cgroup subtree filesystem.
#[derive(Debug)]
pub struct CgroupFs<'a> {
    snapshot: &'a HierarchySnapshot,
    proc_root: &'a Path,
}

impl<'a> CgroupFs<'a> {
    pub fn new(snapshot: &'a HierarchySnapshot, proc_root: &'a Path) -> Self {
        Self {
            snapshot,
            proc_root,
        }
    }

    /// Resolves a caller-visible path to the backing host path, enforcing
    /// the visibility rule.
    ///
    /// `rel` is the path beneath the controller root as the container sees
    /// it (e.g. `/payload/cgroup.procs`).
    ///
    /// # Errors
    ///
    /// `Permission` when the path sits outside the caller's cgroup subtree
    /// or escapes via `..`; `NotFound` when the controller does not exist;
    /// resolution errors for an unreadable caller.
    fn backing_path(
        &self,
        creds: &Credentials,
        controller: &str,
        rel: &str,
    ) -> Result<PathBuf, OpError> {
        let rel = normalize(rel)?;

        let Some(own) = cgroup::resolve(self.snapshot, self.proc_root, creds.pid, controller)?
        else {
            return Err(OpError::NotFound);
        };

        // Visibility: the requested path must be at or below the caller's
        // own cgroup. The caller's path itself prefixes everything it may
        // touch, directories and files alike.
        let own_rel = normalize(own.relative())?;
        if !rel.starts_with(&own_rel) {
            return Err(OpError::Permission);
        }

        let mut backing = own.controller().mountpoint().to_path_buf();
        backing.extend(rel.components().skip(1));
        Ok(backing)
    }

    /// Enumerates a cgroup directory.
    ///
    /// # Errors
    ///
    /// Visibility errors from resolution, `Kernel` errors from the host.
    pub fn readdir(
        &self,
        creds: &Credentials,
        controller: &str,
        rel: &str,
    ) -> Result<Vec<DirEntry>, OpError> {
        let backing = self.backing_path(creds, controller, rel)?;

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&backing).map_err(map_io)? {
            let entry = entry.map_err(map_io)?;
            let is_dir = entry.file_type().map_err(map_io)?.is_dir();
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Stats a backing file, remapping host-root ownership to the caller.
    pub fn getattr(
        &self,
        creds: &Credentials,
        controller: &str,
        rel: &str,
    ) -> Result<Attr, OpError> {
        let backing = self.backing_path(creds, controller, rel)?;
        let metadata = std::fs::metadata(&backing).map_err(map_io)?;

        // Host root's files belong to the container's userns root.
        let uid = if metadata.uid() == 0 { creds.uid } else { metadata.uid() };
        let gid = if metadata.gid() == 0 { creds.gid } else { metadata.gid() };

        Ok(Attr {
            is_dir: metadata.is_dir(),
            size: metadata.size(),
            mode: metadata.mode(),
            uid,
            gid,
        })
    }

    /// Reads a backing cgroup file.
    pub fn read(
        &self,
        creds: &Credentials,
        controller: &str,
        rel: &str,
    ) -> Result<Vec<u8>, OpError> {
        let backing = self.backing_path(creds, controller, rel)?;
        retry_eintr(|| std::fs::read(&backing)).map_err(map_io)
    }

    /// Writes a backing cgroup file.
    ///
    /// Only files the caller's userns root could write are writable: the
    /// backing file must be host-root-owned with the owner write bit, or
    /// already owned by the caller.
    ///
    /// # Errors
    ///
    /// `Permission` when the write gate fails; otherwise the kernel's own
    /// error code from the write (controllers reject bad values with
    /// EINVAL, ERANGE, EBUSY and similar).
    pub fn write(
        &self,
        creds: &Credentials,
        controller: &str,
        rel: &str,
        data: &[u8],
    ) -> Result<usize, OpError> {
        let backing = self.backing_path(creds, controller, rel)?;
        let metadata = std::fs::metadata(&backing).map_err(map_io)?;

        let owner_matches = metadata.uid() == 0 || metadata.uid() == creds.uid;
        let owner_writable = metadata.mode() & 0o200 != 0;
        if !owner_matches || !owner_writable {
            return Err(OpError::Permission);
        }

        retry_eintr(|| std::fs::write(&backing, data)).map_err(map_io)?;
        Ok(data.len())
    }
}

/// Normalizes a caller-supplied path: leading `/`, no `.`/`..` components.
fn normalize(rel: &str) -> Result<PathBuf, OpError> {
    let mut normalized = PathBuf::from("/");
    for component in Path::new(rel).components() {
        match component {
            Component::RootDir => {}
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(OpError::Permission);
            }
        }
    }
    Ok(normalized)
}

fn map_io(err: std::io::Error) -> OpError {
    match err.kind() {
        ErrorKind::NotFound => OpError::NotFound,
        _ => OpError::from(err),
    }
}

fn retry_eintr<T>(mut f: impl FnMut() -> std::io::Result<T>) -> std::io::Result<T> {
    let mut attempts = 0;
    loop {
        match f() {
            Err(err) if err.kind() == ErrorKind::Interrupted && attempts < EINTR_RETRIES => {
                attempts += 1;
            }
            other => return other,
        }
    }
}
