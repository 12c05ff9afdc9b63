//! Parsers for the short kernel text formats this crate consumes.
//!
//! Everything under this module is pure: readers and strings in, structured
//! values out. The cgroup layer decides which file to read and what absence
//! means; the renderers decide how parsed values are projected back into
//! `/proc`-shaped bytes.
//!
//! # Contents
//!
//! - [`CpuSet`] — cpuset range strings (`0-2,5`), canonicalization and
//!   intersection with the host online set.
//! - [`parse_limit`] — byte/count quantities with unit suffixes and the
//!   `max`/`-1` unlimited sentinels.
//! - [`KeyValueStat`] — the generic key-value stat file reader behind
//!   [`MemCgStat`].
//! - [`DeviceIoStats`] — per-device block I/O counters from `io.stat` or
//!   the v1 throttle files.
//! - [`HostStat`]/[`CpuTicks`] — host `/proc/stat` CPU counters plus
//!   pass-through lines.
//! - [`Meminfo`] — host `/proc/meminfo` with column-preserving value
//!   rewriting.

mod blkio;
mod cpuset;
mod kvstat;
mod meminfo;
mod memstat;
mod procstat;
mod quantity;

pub use blkio::{DeviceIo, DeviceIoStats};
pub use cpuset::{CpuSet, ParseError as CpuSetParseError};
pub use kvstat::KeyValueStat;
pub use meminfo::{Meminfo, MeminfoLine};
pub use memstat::MemCgStat;
pub use procstat::{CpuTicks, HostStat, render_aggregate_line, render_cpu_line};
pub use quantity::{Limit, ParseError as QuantityParseError, parse_limit, parse_or_default};
