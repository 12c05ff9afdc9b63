//! Generic parsing for key-value formatted kernel stat files.
//!
//! Controller stat files share one shape: lines of whitespace-separated
//! tokens where keys map to `u64` values, either as alternating `key value`
//! pairs (`memory.stat`) or as `key=value` tokens after a leading device
//! field (`io.stat`). Implementors declare the dialect through associated
//! constants and a handler map; handlers decide whether a value is stored or
//! accumulated.

use std::collections::HashMap;
use std::io::BufRead;
use std::num::ParseIntError;

/// Error raised for a known key whose value fails to parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for '{key}' at line {line}: '{value}': {source}")]
pub struct InvalidKeyValue {
    pub key: String,
    pub value: String,
    pub line: usize,
    #[source]
    pub source: ParseIntError,
}

impl From<InvalidKeyValue> for std::io::Error {
    fn from(err: InvalidKeyValue) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, err)
    }
}

/// A trait for parsing structured key-value style stat files such as
/// `memory.stat` or `io.stat`, commonly found under `/sys/fs/cgroup`.
///
/// Implementors define the known keys and how to apply values for them; the
/// trait supplies the line-by-line reader. Unknown keys are ignored, so a
/// newer kernel adding fields never breaks the parse.
pub trait KeyValueStat: Default
where
    Self: 'static,
{
    /// If `Some(char)`, each token is a `key<char>value` pair, as in
    /// `rbytes=1024`. If `None`, keys and values alternate as separate
    /// whitespace-separated tokens, as in `anon 1000`.
    const SPLIT_CHAR: Option<char>;

    /// Number of leading whitespace-separated tokens to skip on each line
    /// (e.g. the `major:minor` device field of `io.stat`).
    const SKIP_VALUES: usize;

    /// Returns the map of known keys to handler functions. Handlers mutate
    /// the struct; an accumulating handler (`+=`) makes repeated keys sum
    /// across lines.
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)>;

    /// Parses a stat file from the given buffered reader.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if reading fails, or an [`InvalidKeyValue`]
    /// wrapped in `io::Error` when a known key carries a non-numeric value.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let mut stat = Self::default();
        let handlers = Self::field_handlers();

        let mut line = String::new();
        let mut lineno = 0;
        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            let mut parts = line.split_whitespace().skip(Self::SKIP_VALUES);

            match Self::SPLIT_CHAR {
                Some(split_char) => {
                    for part in parts {
                        if let Some((key, val)) = part.split_once(split_char) {
                            Self::apply(key, val, &mut stat, lineno, handlers)?;
                        }
                    }
                }
                None => {
                    while let (Some(key), Some(val)) = (parts.next(), parts.next()) {
                        Self::apply(key, val, &mut stat, lineno, handlers)?;
                    }
                }
            }

            line.clear();
        }

        Ok(stat)
    }

    /// Parses a single key-value pair and applies it through the handler map.
    fn apply(
        key: &str,
        val: &str,
        stat: &mut Self,
        lineno: usize,
        handlers: &HashMap<&'static str, fn(&mut Self, u64)>,
    ) -> std::io::Result<()> {
        if let Some(handler) = handlers.get(key) {
            let parsed = val.parse::<u64>().map_err(|source| InvalidKeyValue {
                key: key.to_string(),
                value: val.to_string(),
                line: lineno,
                source,
            })?;
            handler(stat, parsed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    #[derive(Debug, Default, PartialEq, Eq)]
    struct FlatStat {
        foo: u64,
        bar: u64,
    }

    static FLAT_SETTERS: LazyLock<HashMap<&'static str, fn(&mut FlatStat, u64)>> =
        LazyLock::new(|| {
            let mut m: HashMap<&'static str, fn(&mut FlatStat, u64)> = HashMap::new();
            m.insert("foo", |s, v| s.foo = v);
            m.insert("bar", |s, v| s.bar += v);
            m
        });

    impl KeyValueStat for FlatStat {
        const SPLIT_CHAR: Option<char> = None;
        const SKIP_VALUES: usize = 0;

        fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
            &FLAT_SETTERS
        }
    }

    #[derive(Debug, Default, PartialEq, Eq)]
    struct PairStat {
        rbytes: u64,
    }

    static PAIR_SETTERS: LazyLock<HashMap<&'static str, fn(&mut PairStat, u64)>> =
        LazyLock::new(|| {
            let mut m: HashMap<&'static str, fn(&mut PairStat, u64)> = HashMap::new();
            m.insert("rbytes", |s, v| s.rbytes += v);
            m
        });

    impl KeyValueStat for PairStat {
        const SPLIT_CHAR: Option<char> = Some('=');
        const SKIP_VALUES: usize = 1;

        fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
            &PAIR_SETTERS
        }
    }

    #[test]
    fn test_flat_pairs_with_unknown_keys() {
        let data = "foo 10\nsomething_else 99\nbar 5\nbar 7\n";
        let stat = FlatStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat, FlatStat { foo: 10, bar: 12 });
    }

    #[test]
    fn test_split_pairs_skip_device_field() {
        let data = "8:0 rbytes=1024 wbytes=2048\n254:0 rbytes=16\n";
        let stat = PairStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat.rbytes, 1040);
    }

    #[test]
    fn test_invalid_value_for_known_key() {
        let data = "foo abc\n";
        let err = FlatStat::from_reader(&mut data.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_empty_input() {
        let stat = FlatStat::from_reader(&mut "".as_bytes()).unwrap();
        assert_eq!(stat, FlatStat::default());
    }
}
