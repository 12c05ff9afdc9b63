//! Renderers for `/proc/diskstats` and `/proc/swaps`.
//!
//! Both views filter host content through the caller's block I/O and memory
//! cgroup statistics. When the statistics are unavailable (no controller,
//! empty files) the host content passes through unchanged.

use crate::parsers::DeviceIoStats;

/// Sector size the kernel uses for the diskstats sector counters.
const SECTOR_SIZE: u64 = 512;

/// Renders the diskstats view.
///
/// Each host line keeps its device identity (`major minor name`) and field
/// layout; the I/O counters are replaced with the cgroup's numbers, zero
/// for devices the cgroup never touched. With no statistics at all, the
/// host file is returned verbatim.
pub fn render_diskstats(host_diskstats: &str, stats: Option<&DeviceIoStats>) -> String {
    let Some(stats) = stats.filter(|s| !s.is_empty()) else {
        return host_diskstats.to_owned();
    };

    let mut out = String::with_capacity(host_diskstats.len());
    for line in host_diskstats.split_inclusive('\n') {
        out.push_str(&rewrite_diskstats_line(line, stats));
    }
    out
}

fn rewrite_diskstats_line(line: &str, stats: &DeviceIoStats) -> String {
    let mut tokens = line.split_whitespace();
    let (Some(major), Some(minor), Some(_name)) = (
        tokens.next().and_then(|t| t.parse::<u32>().ok()),
        tokens.next().and_then(|t| t.parse::<u32>().ok()),
        tokens.next(),
    ) else {
        return line.to_owned();
    };
    let counter_count = tokens.count();

    // Everything up to the end of the device name is kept verbatim.
    let prefix_end = end_of_nth_token(line, 3);
    let io = stats.device(major, minor).copied().unwrap_or_default();

    // diskstats counters: rd_ios rd_merges rd_sectors rd_ticks wr_ios
    // wr_merges wr_sectors wr_ticks in_flight io_ticks time_in_queue, plus
    // discard/flush fields on newer kernels. Only the fields the controller
    // accounts for are non-zero.
    let mut values = vec![0u64; counter_count];
    if counter_count >= 7 {
        values[0] = io.read_ops;
        values[2] = io.read_bytes / SECTOR_SIZE;
        values[4] = io.write_ops;
        values[6] = io.write_bytes / SECTOR_SIZE;
    }

    let mut out = String::with_capacity(line.len());
    out.push_str(&line[..prefix_end]);
    for value in values {
        out.push(' ');
        out.push_str(&value.to_string());
    }
    out.push('\n');
    out
}

/// Byte offset just past the `n`-th whitespace-separated token.
fn end_of_nth_token(line: &str, n: usize) -> usize {
    let mut seen = 0;
    let mut in_token = false;
    for (idx, ch) in line.char_indices() {
        if ch.is_whitespace() {
            if in_token {
                seen += 1;
                if seen == n {
                    return idx;
                }
                in_token = false;
            }
        } else {
            in_token = true;
        }
    }
    line.len()
}

/// Renders the swaps view.
///
/// The header line always comes from the host. A container with swap slack
/// gets a single synthetic `none virtual` entry sized to it; with swap
/// suppressed or no slack, the header stands alone.
pub fn render_swaps(host_swaps: &str, swap_total_kb: u64, swap_used_kb: u64) -> String {
    let header = host_swaps
        .lines()
        .next()
        .unwrap_or("Filename\t\t\t\tType\t\tSize\t\tUsed\t\tPriority");

    let mut out = String::with_capacity(128);
    out.push_str(header);
    out.push('\n');

    if swap_total_kb > 0 {
        out.push_str(&format!(
            "none{:width$}virtual\t\t{}\t{}\t0\n",
            " ",
            swap_total_kb,
            swap_used_kb.min(swap_total_kb),
            width = 36 - 4,
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST_DISKSTATS: &str = "\
   8       0 sda 12735 7491 1181998 12693 63651 6300 1667136 100073 0 54988 112766 0 0 0 0
   8      16 sdb 192 0 2850 51 353 206 614777 3241 0 2972 3292 0 0 0 0
 254       0 dm-0 1100 0 8868 291 0 0 0 0 0 500 291 0 0 0 0
";

    fn stats() -> DeviceIoStats {
        let data = "8:16 rbytes=1459200 wbytes=314773504 rios=192 wios=353\n";
        DeviceIoStats::from_io_stat(&mut data.as_bytes()).unwrap()
    }

    #[test]
    fn test_no_stats_passes_host_through() {
        assert_eq!(render_diskstats(HOST_DISKSTATS, None), HOST_DISKSTATS);
        let empty = DeviceIoStats::default();
        assert_eq!(render_diskstats(HOST_DISKSTATS, Some(&empty)), HOST_DISKSTATS);
    }

    #[test]
    fn test_rewrites_accounted_device() {
        let out = render_diskstats(HOST_DISKSTATS, Some(&stats()));
        let sdb = out.lines().nth(1).unwrap();
        assert!(sdb.starts_with("   8      16 sdb "));
        let fields: Vec<&str> = sdb.split_whitespace().collect();
        assert_eq!(fields[3], "192"); // read ops
        assert_eq!(fields[5], "2850"); // read sectors
        assert_eq!(fields[7], "353"); // write ops
        assert_eq!(fields[9], "614792"); // write sectors
    }

    #[test]
    fn test_unaccounted_device_zeroes_counters() {
        let out = render_diskstats(HOST_DISKSTATS, Some(&stats()));
        let sda = out.lines().next().unwrap();
        let fields: Vec<&str> = sda.split_whitespace().collect();
        assert_eq!(fields[0], "8");
        assert_eq!(fields[2], "sda");
        assert!(fields[3..].iter().all(|&f| f == "0"));
    }

    #[test]
    fn test_swaps_with_slack() {
        let host = "Filename                                Type            Size            Used            Priority\n/dev/sda2                               partition       2097148         0               -2\n";
        let out = render_swaps(host, 262144, 65536);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Filename"));
        assert!(lines[1].starts_with("none"));
        assert!(lines[1].contains("virtual"));
        assert!(lines[1].contains("262144"));
        assert!(lines[1].contains("65536"));
    }

    #[test]
    fn test_swaps_without_slack_is_header_only() {
        let host = "Filename                                Type            Size            Used            Priority\n";
        let out = render_swaps(host, 0, 0);
        assert_eq!(out.lines().count(), 1);
    }
}
