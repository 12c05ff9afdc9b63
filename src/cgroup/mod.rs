//! The cgroup abstraction layer: controller discovery, PID resolution, and
//! constraint reads across mixed v1/v2 hierarchies.
//!
//! Every virtualized view starts here. An operation arrives with the
//! caller's PID; this module resolves it to per-controller cgroup paths and
//! turns the controller files found there into typed constraints. Hosts may
//! run pure v1, pure v2, or a hybrid of both; the same resolution path
//! serves all three.
//!
//! # Key Components
//!
//! - [`SharedHierarchy`] — the bootstrap-derived controller layout,
//!   published as an immutable snapshot and swapped atomically on refresh.
//! - [`CgroupPath`] — a (controller, relative path) pair derived from a PID.
//! - [`ConstraintSet`] — the caller's resource limits with unlimited
//!   defaults for anything absent.
//!
//! # Degradation rules
//!
//! A missing controller, a missing file, or a malformed value never fails a
//! read; each degrades to the unlimited/inherit value for its field. The
//! only hard error is an unreadable `/proc/<pid>/cgroup`.

mod constraints;
mod error;
mod hierarchy;
mod resolve;

pub use constraints::{ConstraintSet, MemoryUsage};
pub use error::{Error, Result};
pub use hierarchy::{Controller, HierarchySnapshot, SharedHierarchy, Version, bootstrap};
pub use resolve::{CgroupPath, ProcCgroupEntry, proc_cgroup_entries, resolve, resolve_first};
