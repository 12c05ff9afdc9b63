//! Parser for the memory controller's `memory.stat` file.
//!
//! Both cgroup versions expose the fields the meminfo view needs, under
//! different names: v2 writes `file`/`shmem`, v1 writes `total_cache`/
//! `total_shmem` (plain `cache`/`shmem` at non-hierarchical levels). All
//! spellings feed the same fields, so one parse handles either version.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::kvstat::KeyValueStat;

/// Page-cache related counters from `memory.stat`, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemCgStat {
    /// Page cache memory (`file` in v2, `total_cache`/`cache` in v1).
    pub cached: u64,
    /// Shared memory (`shmem` in v2, `total_shmem`/`shmem` in v1).
    pub shmem: u64,
    /// Swap charged to the cgroup (`swap` in v2, `total_swap` in v1).
    pub swap: u64,
}

impl MemCgStat {
    fn set_cached(&mut self, v: u64) {
        self.cached = v;
    }

    fn set_shmem(&mut self, v: u64) {
        self.shmem = v;
    }

    fn set_swap(&mut self, v: u64) {
        self.swap = v;
    }
}

type Setter = fn(&mut MemCgStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(8);

    m.insert("file", MemCgStat::set_cached);
    m.insert("cache", MemCgStat::set_cached);
    m.insert("total_cache", MemCgStat::set_cached);
    m.insert("shmem", MemCgStat::set_shmem);
    m.insert("total_shmem", MemCgStat::set_shmem);
    m.insert("swap", MemCgStat::set_swap);
    m.insert("total_swap", MemCgStat::set_swap);

    m
});

impl KeyValueStat for MemCgStat {
    const SPLIT_CHAR: Option<char> = None;
    const SKIP_VALUES: usize = 0;

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v2_names() {
        let data = "\
anon 2899968
file 44513280
kernel_stack 0
shmem 18710528
swap 0
";
        let stat = MemCgStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat.cached, 44_513_280);
        assert_eq!(stat.shmem, 18_710_528);
        assert_eq!(stat.swap, 0);
    }

    #[test]
    fn test_parse_v1_total_names() {
        let data = "\
cache 1000
total_cache 5000
total_shmem 300
total_swap 128
";
        let stat = MemCgStat::from_reader(&mut data.as_bytes()).unwrap();
        // The hierarchical totals come last in v1 files and win.
        assert_eq!(stat.cached, 5000);
        assert_eq!(stat.shmem, 300);
        assert_eq!(stat.swap, 128);
    }

    #[test]
    fn test_parse_empty() {
        let stat = MemCgStat::from_reader(&mut "".as_bytes()).unwrap();
        assert_eq!(stat, MemCgStat::default());
    }
}
