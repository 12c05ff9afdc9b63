//! Operation-level error classification.
//!
//! Every per-operation failure folds into one of a small set of kinds, each
//! with a fixed errno for the transport. The daemon itself never exits on a
//! per-operation error: `Fatal` aborts the one operation with `EIO` and
//! leaves everything else running.

/// Error kinds surfaced to the transport.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// The kernel lacks a feature (e.g. the device cgroup attach type).
    /// Reported once at `warn`, then the affected surface degrades.
    #[error("not supported by this kernel: {0}")]
    NotSupported(&'static str),

    /// The cgroup path vanished between resolution and use.
    #[error("no such file or directory")]
    NotFound,

    /// The kernel denied access; propagated verbatim.
    #[error("permission denied")]
    Permission,

    /// Malformed input that cannot be degraded away.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// A conflicting attachment already exists.
    #[error("resource busy")]
    Busy,

    /// Bounded-retry exhausted on EINTR/EAGAIN.
    #[error("transient failure, retries exhausted")]
    Transient,

    /// Broken invariants or resource exhaustion; the operation dies with
    /// `EIO`, the daemon stays up.
    #[error("operation failed: {0}")]
    Fatal(String),

    /// A raw errno from a proxied kernel call, passed through unchanged so
    /// container userspace sees exactly what the kernel said.
    #[error("kernel error (errno {0})")]
    Kernel(i32),
}

impl OpError {
    /// The errno delivered to the transport for this error.
    pub fn errno(&self) -> i32 {
        match self {
            OpError::NotSupported(_) => libc::ENOSYS,
            OpError::NotFound => libc::ENOENT,
            OpError::Permission => libc::EACCES,
            OpError::Invalid(_) => libc::EINVAL,
            OpError::Busy => libc::EBUSY,
            OpError::Transient => libc::EAGAIN,
            OpError::Fatal(_) => libc::EIO,
            OpError::Kernel(errno) => *errno,
        }
    }
}

impl From<std::io::Error> for OpError {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => OpError::Kernel(errno),
            None => OpError::Fatal(err.to_string()),
        }
    }
}

impl From<crate::cgroup::Error> for OpError {
    fn from(err: crate::cgroup::Error) -> Self {
        // An unresolvable caller means the view cannot be computed at all.
        OpError::Fatal(err.to_string())
    }
}

pub trait ResultOkLogExt<T, E> {
    fn ok_log(self) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::error!("{err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(OpError::NotFound.errno(), libc::ENOENT);
        assert_eq!(OpError::Permission.errno(), libc::EACCES);
        assert_eq!(OpError::Busy.errno(), libc::EBUSY);
        assert_eq!(OpError::Fatal("x".into()).errno(), libc::EIO);
        assert_eq!(OpError::Kernel(libc::EPERM).errno(), libc::EPERM);
    }

    #[test]
    fn test_io_error_keeps_kernel_errno() {
        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(OpError::from(err).errno(), libc::EACCES);
    }
}
