//! Parser and renderer for the host `/proc/stat` CPU accounting lines.
//!
//! `/proc/stat` mixes per-CPU tick counters (`cpu0 ...`) with host-global
//! lines (`intr`, `ctxt`, `btime`, ...). The per-CPU lines are parsed into
//! [`CpuTicks`] so the CPU view can project them onto virtual CPUs; all
//! other lines are preserved verbatim, in file order, for pass-through.

use std::io::BufRead;
use std::ops::{Add, AddAssign};

/// Tick counters of a single `cpuN` line, in USER_HZ units.
///
/// Kernels before 2.6.33 emit fewer than ten columns; missing columns parse
/// as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

impl CpuTicks {
    fn fields(&self) -> [u64; 10] {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
            self.guest,
            self.guest_nice,
        ]
    }

    fn from_fields(fields: [u64; 10]) -> Self {
        let [user, nice, system, idle, iowait, irq, softirq, steal, guest, guest_nice] = fields;
        Self {
            user,
            nice,
            system,
            idle,
            iowait,
            irq,
            softirq,
            steal,
            guest,
            guest_nice,
        }
    }

    /// Component-wise saturating subtraction.
    pub fn saturating_sub(&self, other: &CpuTicks) -> CpuTicks {
        let mut out = [0u64; 10];
        for (slot, (a, b)) in out
            .iter_mut()
            .zip(self.fields().into_iter().zip(other.fields()))
        {
            *slot = a.saturating_sub(b);
        }
        Self::from_fields(out)
    }

    /// Component-wise maximum.
    pub fn component_max(&self, other: &CpuTicks) -> CpuTicks {
        let mut out = [0u64; 10];
        for (slot, (a, b)) in out
            .iter_mut()
            .zip(self.fields().into_iter().zip(other.fields()))
        {
            *slot = a.max(b);
        }
        Self::from_fields(out)
    }

    /// Returns `true` if any component of `self` is below `other`.
    pub fn any_below(&self, other: &CpuTicks) -> bool {
        self.fields()
            .into_iter()
            .zip(other.fields())
            .any(|(a, b)| a < b)
    }

    /// Renders the counters after a `cpuN` label, matching the kernel's
    /// single-space separation.
    pub fn render_fields(&self, out: &mut String) {
        use std::fmt::Write;
        for field in self.fields() {
            // Writing to a String cannot fail.
            let _ = write!(out, " {field}");
        }
        out.push('\n');
    }
}

impl Add for CpuTicks {
    type Output = CpuTicks;

    fn add(self, rhs: CpuTicks) -> CpuTicks {
        let mut out = [0u64; 10];
        for (slot, (a, b)) in out
            .iter_mut()
            .zip(self.fields().into_iter().zip(rhs.fields()))
        {
            *slot = a.saturating_add(b);
        }
        Self::from_fields(out)
    }
}

impl AddAssign for CpuTicks {
    fn add_assign(&mut self, rhs: CpuTicks) {
        *self = *self + rhs;
    }
}

/// The host `/proc/stat`, split into per-CPU counters and pass-through lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostStat {
    /// Per-CPU counters keyed by host CPU id, in file order.
    pub cpus: Vec<(u32, CpuTicks)>,
    /// All non-CPU lines (`intr`, `ctxt`, `btime`, `processes`, ...) kept
    /// verbatim in file order, including the trailing newline.
    pub passthrough: Vec<String>,
}

impl HostStat {
    /// Parses `/proc/stat` content from a buffered reader.
    ///
    /// The aggregate `cpu` line is discarded; the virtualized view recomputes
    /// it from the virtual CPUs it emits.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading fails. Malformed counter columns parse
    /// as zero rather than failing the read.
    pub fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let mut stat = HostStat::default();
        let mut line = String::new();

        while buf.read_line(&mut line)? != 0 {
            if let Some(rest) = line.strip_prefix("cpu") {
                // Per-CPU lines run the id into the label (`cpu0`); the
                // aggregate line (`cpu `) is dropped here and recomputed by
                // the view.
                if rest.starts_with(|c: char| c.is_ascii_digit()) {
                    let mut parts = rest.split_whitespace();
                    if let Some(id) = parts.next().and_then(|tok| tok.parse::<u32>().ok()) {
                        let mut fields = [0u64; 10];
                        for slot in fields.iter_mut() {
                            match parts.next() {
                                Some(tok) => *slot = tok.parse::<u64>().unwrap_or(0),
                                None => break,
                            }
                        }
                        stat.cpus.push((id, CpuTicks::from_fields(fields)));
                    }
                }
            } else {
                let mut kept = String::with_capacity(line.len() + 1);
                kept.push_str(line.trim_end_matches('\n'));
                kept.push('\n');
                stat.passthrough.push(kept);
            }
            line.clear();
        }

        Ok(stat)
    }

    /// Returns the counters for a host CPU id, if that CPU is present.
    pub fn cpu(&self, id: u32) -> Option<&CpuTicks> {
        self.cpus
            .iter()
            .find(|(cpu_id, _)| *cpu_id == id)
            .map(|(_, ticks)| ticks)
    }

    /// The set of host CPU ids that reported counters.
    pub fn online_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.cpus.iter().map(|(id, _)| *id)
    }
}

/// Renders the aggregate `cpu` line.
///
/// The kernel separates the bare `cpu` label from the first counter with two
/// spaces; per-CPU lines use one.
pub fn render_aggregate_line(total: &CpuTicks, out: &mut String) {
    out.push_str("cpu ");
    total.render_fields(out);
}

/// Renders a `cpu<index>` line.
pub fn render_cpu_line(index: usize, ticks: &CpuTicks, out: &mut String) {
    use std::fmt::Write;
    let _ = write!(out, "cpu{index}");
    ticks.render_fields(out);
}
