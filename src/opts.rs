//! Runtime options, read once from the environment at startup.

use std::time::Duration;

const DEFAULT_REAP_INTERVAL_SECS: u64 = 10;

/// Behavior toggles threaded through the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
    /// Report zero swap in `/proc/meminfo` and an empty `/proc/swaps`.
    pub swap_off: bool,
    /// Maintain a per-cgroup load average instead of proxying the host's.
    pub loadavg: bool,
    /// Cap the virtual CPU count by the CFS quota (`ceil(quota/period)`).
    pub cfs: bool,
    /// How often the CPU accounting cache sweeps for vanished cgroups.
    pub reap_interval: Duration,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            swap_off: false,
            loadavg: false,
            cfs: false,
            reap_interval: Duration::from_secs(DEFAULT_REAP_INTERVAL_SECS),
        }
    }
}

impl Opts {
    /// Reads options from `CONTAINERFS_*` environment variables.
    ///
    /// Boolean variables are enabled by the values `1`, `true`, or `yes`;
    /// anything else (including absence) leaves the default.
    pub fn from_env() -> Self {
        Self {
            swap_off: env_flag("CONTAINERFS_SWAP_OFF"),
            loadavg: env_flag("CONTAINERFS_LOADAVG"),
            cfs: env_flag("CONTAINERFS_CFS"),
            reap_interval: Duration::from_secs(
                std::env::var("CONTAINERFS_REAP_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|&secs| secs > 0)
                    .unwrap_or(DEFAULT_REAP_INTERVAL_SECS),
            ),
        }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Opts::default();
        assert!(!opts.swap_off);
        assert!(!opts.loadavg);
        assert!(!opts.cfs);
        assert_eq!(opts.reap_interval, Duration::from_secs(10));
    }
}
