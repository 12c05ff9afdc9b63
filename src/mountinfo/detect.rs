use crate::fsutil;

use super::parser::parse_mount_info_line;
use super::{Error, Result};
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// A cgroup filesystem mount discovered in a `mountinfo` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CgroupMount {
    /// A cgroup v1 hierarchy mount carrying one or more named controllers.
    V1 {
        mount_point: PathBuf,
        controllers: Vec<String>,
    },
    /// The cgroup v2 unified hierarchy mount.
    V2 { mount_point: PathBuf },
}

impl CgroupMount {
    /// Returns the host-visible mount point of this cgroup mount.
    pub fn mount_point(&self) -> &Path {
        match self {
            CgroupMount::V1 { mount_point, .. } => mount_point,
            CgroupMount::V2 { mount_point } => mount_point,
        }
    }
}

/// Detects every cgroup mount (v1 hierarchies and the v2 unified tree) by
/// parsing a Linux `mountinfo` file.
///
/// On hybrid hosts both kinds are present at once; all are returned in file
/// order. A v1 entry's controller list is taken from its superblock options,
/// skipping mount flags and named hierarchies (`name=...`).
///
/// # Arguments
///
/// * `path` - Path to a Linux mountinfo file (e.g., `/proc/self/mountinfo`).
///
/// # Errors
///
/// - [`Error::FileOpen`] if the file can't be opened.
/// - [`Error::ReadLine`] if reading from the file fails.
/// - [`Error::Parse`] if parsing any line fails.
/// - [`Error::MissingCgroupMount`] if no cgroup mount of either version is found.
///
/// # Example
///
/// ```no_run
/// use containerfs::mountinfo::detect_cgroup_mounts;
///
/// let mounts = detect_cgroup_mounts("/proc/self/mountinfo").unwrap();
/// for mount in &mounts {
///     println!("cgroup mount: {}", mount.mount_point().display());
/// }
/// ```
pub fn detect_cgroup_mounts(path: impl AsRef<Path>) -> Result<Vec<CgroupMount>> {
    let path = path.as_ref();
    let buf = fsutil::open_file_reader(path)?;

    detect_cgroup_mounts_from_reader(buf, path)
}

/// Mount flags that show up in a v1 cgroup mount's superblock options
/// alongside the controller names.
fn is_mount_flag(token: &str) -> bool {
    matches!(
        token,
        "rw" | "ro" | "nosuid" | "nodev" | "noexec" | "relatime" | "noatime"
    ) || token.starts_with("name=")
}

fn detect_cgroup_mounts_from_reader<R: BufRead>(
    mut reader: R,
    origin: &Path,
) -> Result<Vec<CgroupMount>> {
    let mut line = String::with_capacity(256);
    let mut mounts = Vec::new();

    while reader
        .read_line(&mut line)
        .map_err(|source| Error::ReadLine {
            path: origin.to_path_buf(),
            source,
        })?
        != 0
    {
        let mount_info = parse_mount_info_line(line.as_str()).map_err(|source| Error::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        match mount_info.fs_type {
            "cgroup2" => {
                log::debug!(
                    "Found `cgroup2` mount point with root `{}`: {}",
                    mount_info.root,
                    mount_info.mount_point
                );
                mounts.push(CgroupMount::V2 {
                    mount_point: PathBuf::from(mount_info.mount_point),
                });
            }
            "cgroup" => {
                let controllers: Vec<String> = mount_info
                    .super_options
                    .split(',')
                    .filter(|tok| !tok.is_empty() && !is_mount_flag(tok))
                    .map(str::to_owned)
                    .collect();
                if controllers.is_empty() {
                    // Named hierarchy without controllers, nothing to resolve.
                    line.clear();
                    continue;
                }
                log::debug!(
                    "Found `cgroup` v1 mount point for `{}`: {}",
                    controllers.join(","),
                    mount_info.mount_point
                );
                mounts.push(CgroupMount::V1 {
                    mount_point: PathBuf::from(mount_info.mount_point),
                    controllers,
                });
            }
            _ => {}
        }

        line.clear();
    }

    if mounts.is_empty() {
        return Err(Error::MissingCgroupMount {
            path: origin.to_path_buf(),
        });
    }

    Ok(mounts)
}
