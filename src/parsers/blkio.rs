//! Parsers for per-device block I/O statistics from the io/blkio controller.
//!
//! The diskstats view needs read/write bytes and operation counts keyed by
//! `major:minor`. Cgroup v2 packs everything into `io.stat` with `key=value`
//! tokens; cgroup v1 splits the same numbers across
//! `blkio.throttle.io_service_bytes` and `blkio.throttle.io_serviced` with
//! an `<dev> <Op> <value>` shape.

use std::collections::HashMap;
use std::io::BufRead;

/// I/O counters for one block device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceIo {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_ops: u64,
    pub write_ops: u64,
}

/// Per-device I/O statistics keyed by `(major, minor)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIoStats {
    devices: HashMap<(u32, u32), DeviceIo>,
}

impl DeviceIoStats {
    pub fn device(&self, major: u32, minor: u32) -> Option<&DeviceIo> {
        self.devices.get(&(major, minor))
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Parses a cgroup v2 `io.stat` file.
    ///
    /// Lines look like `8:16 rbytes=1459200 wbytes=314773504 rios=192
    /// wios=353 dbytes=0 dios=0`. Unknown keys and malformed lines are
    /// skipped; the diskstats view degrades to host pass-through when
    /// nothing parses.
    pub fn from_io_stat<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let mut stats = Self::default();
        let mut line = String::new();

        while buf.read_line(&mut line)? != 0 {
            let mut parts = line.split_whitespace();
            if let Some(dev) = parts.next().and_then(parse_dev) {
                let entry = stats.devices.entry(dev).or_default();
                for part in parts {
                    match part.split_once('=') {
                        Some(("rbytes", v)) => entry.read_bytes = parse_u64(v),
                        Some(("wbytes", v)) => entry.write_bytes = parse_u64(v),
                        Some(("rios", v)) => entry.read_ops = parse_u64(v),
                        Some(("wios", v)) => entry.write_ops = parse_u64(v),
                        _ => {}
                    }
                }
            }
            line.clear();
        }

        Ok(stats)
    }

    /// Parses the v1 `blkio.throttle.io_service_bytes` and
    /// `blkio.throttle.io_serviced` pair.
    ///
    /// Each file carries `<major>:<minor> <Read|Write|...> <value>` rows plus
    /// a trailing `Total` row, which is skipped.
    pub fn from_blkio_throttle<R: BufRead>(
        service_bytes: &mut R,
        serviced: &mut R,
    ) -> std::io::Result<Self> {
        let mut stats = Self::default();
        stats.merge_v1_rows(service_bytes, |entry, op, value| match op {
            "Read" => entry.read_bytes = value,
            "Write" => entry.write_bytes = value,
            _ => {}
        })?;
        stats.merge_v1_rows(serviced, |entry, op, value| match op {
            "Read" => entry.read_ops = value,
            "Write" => entry.write_ops = value,
            _ => {}
        })?;
        Ok(stats)
    }

    fn merge_v1_rows<R: BufRead>(
        &mut self,
        buf: &mut R,
        apply: impl Fn(&mut DeviceIo, &str, u64),
    ) -> std::io::Result<()> {
        let mut line = String::new();
        while buf.read_line(&mut line)? != 0 {
            let mut parts = line.split_whitespace();
            if let (Some(dev), Some(op), Some(value)) = (parts.next(), parts.next(), parts.next())
            {
                if let Some(dev) = parse_dev(dev) {
                    apply(self.devices.entry(dev).or_default(), op, parse_u64(value));
                }
            }
            line.clear();
        }
        Ok(())
    }
}

fn parse_dev(token: &str) -> Option<(u32, u32)> {
    let (major, minor) = token.split_once(':')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn parse_u64(token: &str) -> u64 {
    token.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v2_io_stat() {
        let data = "\
8:16 rbytes=1459200 wbytes=314773504 rios=192 wios=353 dbytes=0 dios=0
8:0 rbytes=90112 wbytes=0 rios=8 wios=0 dbytes=0 dios=0
";
        let stats = DeviceIoStats::from_io_stat(&mut data.as_bytes()).unwrap();
        let sdb = stats.device(8, 16).unwrap();
        assert_eq!(sdb.read_bytes, 1_459_200);
        assert_eq!(sdb.write_bytes, 314_773_504);
        assert_eq!(sdb.read_ops, 192);
        assert_eq!(sdb.write_ops, 353);
        assert!(stats.device(8, 32).is_none());
    }

    #[test]
    fn test_parse_v1_throttle_pair() {
        let bytes = "\
8:0 Read 1048576
8:0 Write 4194304
8:0 Sync 0
8:0 Total 5242880
Total 5242880
";
        let ops = "\
8:0 Read 256
8:0 Write 1024
Total 1280
";
        let stats =
            DeviceIoStats::from_blkio_throttle(&mut bytes.as_bytes(), &mut ops.as_bytes())
                .unwrap();
        let sda = stats.device(8, 0).unwrap();
        assert_eq!(sda.read_bytes, 1_048_576);
        assert_eq!(sda.write_bytes, 4_194_304);
        assert_eq!(sda.read_ops, 256);
        assert_eq!(sda.write_ops, 1024);
    }

    #[test]
    fn test_empty_files() {
        let stats = DeviceIoStats::from_io_stat(&mut "".as_bytes()).unwrap();
        assert!(stats.is_empty());
    }
}
