//! Renderer for `/proc/stat`.
//!
//! CPU lines come from the accounting cache's projection; every non-CPU
//! line (`intr`, `ctxt`, `btime`, `processes`, ...) is the host's own,
//! byte for byte and in host order.

use crate::cpuview::CpuProjection;
use crate::parsers::{HostStat, render_aggregate_line, render_cpu_line};

/// Renders the stat view from the host file and a per-cgroup projection.
pub fn render(host: &HostStat, projection: &CpuProjection) -> String {
    let mut out = String::with_capacity(1024);

    render_aggregate_line(&projection.aggregate, &mut out);
    for (index, ticks) in projection.per_cpu.iter().enumerate() {
        render_cpu_line(index, ticks, &mut out);
    }
    for line in &host.passthrough {
        out.push_str(line);
    }

    out
}
