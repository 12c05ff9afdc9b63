//! Mountinfo line parser for Linux systems.
//!
//! Parses lines in `/proc/[pid]/mountinfo` format. See
//! [`proc_pid_mountinfo(5)`](https://man7.org/linux/man-pages/man5/proc_pid_mountinfo.5.html)
//! for details on the structure.

/// Represents a parsed mountinfo line.
///
/// Only the fields cgroup mount discovery consumes are retained; the mount
/// and parent IDs, the device number, and the per-mount options are skipped
/// during parsing.
#[derive(Debug, PartialEq, Eq)]
pub struct MountInfo<'a> {
    /// Root of the mount within the filesystem.
    pub root: &'a str,
    /// Mount point relative to the process's root.
    pub mount_point: &'a str,
    /// Filesystem type (e.g., `cgroup`, `cgroup2`).
    pub fs_type: &'a str,
    /// Superblock options. For cgroup v1 mounts this carries the
    /// comma-separated controller list.
    pub super_options: &'a str,
}

/// Named fields in a mountinfo line.
#[derive(Debug)]
pub enum MountInfoField {
    Root,
    MountPoint,
    FsType,
    SuperOptions,
}

impl std::fmt::Display for MountInfoField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MountInfoField::Root => "root",
            MountInfoField::MountPoint => "mount_point",
            MountInfoField::FsType => "fs_type",
            MountInfoField::SuperOptions => "super_options",
        };
        write!(f, "{name}")
    }
}

/// Errors that may occur when parsing a mountinfo line.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing separator ` - ` in line: `{0}`")]
    MissingSeparator(String),

    #[error("missing `{field}` in pre-separator section of line: `{line}`")]
    MissingPreSeparatorField { field: MountInfoField, line: String },

    #[error("missing `{field}` in post-separator section of line: `{line}`")]
    MissingPostSeparatorField { field: MountInfoField, line: String },
}

/// Parses a single line of mountinfo data.
///
/// The line must follow the Linux kernel format described in
/// [`proc_pid_mountinfo(5)`](https://man7.org/linux/man-pages/man5/proc_pid_mountinfo.5.html).
/// The variable-length optional-field section between the mount point and the
/// ` - ` separator is skipped without allocation.
///
/// # Arguments
///
/// * `line` - A single line from `/proc/[pid]/mountinfo`.
///
/// # Returns
///
/// On success, returns a [`MountInfo`] struct referencing fields in the original input line.
///
/// # Errors
///
/// Returns [`ParseError`] variants for missing separator or required fields.
pub fn parse_mount_info_line(line: &str) -> Result<MountInfo<'_>, ParseError> {
    let (pre, post) = line
        .split_once(" - ")
        .ok_or_else(|| ParseError::MissingSeparator(line.to_owned()))?;

    // mount-id, parent-id and major:minor precede the root field.
    let mut pre_fields = pre.split_whitespace().skip(3);
    let root = pre_fields
        .next()
        .ok_or_else(|| ParseError::MissingPreSeparatorField {
            field: MountInfoField::Root,
            line: line.to_owned(),
        })?;
    let mount_point = pre_fields
        .next()
        .ok_or_else(|| ParseError::MissingPreSeparatorField {
            field: MountInfoField::MountPoint,
            line: line.to_owned(),
        })?;

    let mut post_fields = post.split_whitespace();
    let fs_type = post_fields
        .next()
        .ok_or_else(|| ParseError::MissingPostSeparatorField {
            field: MountInfoField::FsType,
            line: line.to_owned(),
        })?;
    // The source field sits between fs_type and super_options.
    let super_options = post_fields
        .nth(1)
        .ok_or_else(|| ParseError::MissingPostSeparatorField {
            field: MountInfoField::SuperOptions,
            line: line.to_owned(),
        })?;

    Ok(MountInfo {
        root,
        mount_point,
        fs_type,
        super_options,
    })
}
