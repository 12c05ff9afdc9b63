//! Parsing and set arithmetic for kernel cpuset range strings.
//!
//! Files like `cpuset.cpus` and `/sys/devices/system/cpu/online` describe a
//! set of logical CPU ids as comma-separated tokens, where each token is a
//! single id (`5`) or an inclusive range (`0-3`). An empty file means the
//! empty set, which callers interpret as "inherit the host".

use std::collections::BTreeSet;
use std::fmt;

/// Errors that may occur when parsing a cpuset range string.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid cpu id `{token}`: {source}")]
    InvalidId {
        token: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("inverted range `{token}`")]
    InvertedRange { token: String },
}

/// An ordered set of logical CPU ids.
///
/// Parsing collapses duplicates and overlapping ranges; [`fmt::Display`]
/// renders the canonical form (sorted, maximally merged ranges), so
/// parse-display-parse is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuSet(BTreeSet<u32>);

impl CpuSet {
    /// Parses a cpuset range string such as `"0-2,5"`.
    ///
    /// An empty (or all-whitespace) input yields the empty set.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidId`] for non-numeric tokens and
    /// [`ParseError::InvertedRange`] for ranges with `start > end`.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let mut ids = BTreeSet::new();
        for token in s.trim().split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            match token.split_once('-') {
                Some((start, end)) => {
                    let start = parse_id(start, token)?;
                    let end = parse_id(end, token)?;
                    if start > end {
                        return Err(ParseError::InvertedRange {
                            token: token.to_owned(),
                        });
                    }
                    ids.extend(start..=end);
                }
                None => {
                    ids.insert(parse_id(token, token)?);
                }
            }
        }
        Ok(Self(ids))
    }

    /// Returns the subset of `self` that is also present in `other`.
    ///
    /// Used to drop CPUs a cgroup lists but the host has taken offline.
    pub fn intersect(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.intersection(&other.0).copied().collect())
    }

    /// Returns the ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<u32> for CpuSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CpuSet {
    /// Formats the set in the kernel's canonical range notation, e.g. `0-2,5`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids = self.0.iter().copied();
        let Some(mut start) = ids.next() else {
            return Ok(());
        };
        let mut end = start;
        let mut first = true;

        let flush = |f: &mut fmt::Formatter<'_>, start: u32, end: u32, first: &mut bool| {
            if !*first {
                write!(f, ",")?;
            }
            *first = false;
            if start == end {
                write!(f, "{start}")
            } else {
                write!(f, "{start}-{end}")
            }
        };

        for id in ids {
            if id == end + 1 {
                end = id;
            } else {
                flush(f, start, end, &mut first)?;
                start = id;
                end = id;
            }
        }
        flush(f, start, end, &mut first)
    }
}

fn parse_id(s: &str, token: &str) -> Result<u32, ParseError> {
    s.trim().parse::<u32>().map_err(|source| ParseError::InvalidId {
        token: token.to_owned(),
        source,
    })
}
