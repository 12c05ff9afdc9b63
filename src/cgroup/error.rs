use crate::mountinfo;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Mountinfo(#[from] mountinfo::Error),

    #[error("failed to read cgroup membership of pid {pid}: {source}")]
    ProcCgroupUnreadable {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
