//! Parser and value-rewriter for the host `/proc/meminfo`.
//!
//! The rendered view must be byte-indistinguishable from the host file in
//! field order, column widths and separators, so parsing keeps every raw
//! line. Rewriting a key replaces only the numeric field, right-aligned in
//! the same column width the host used.

use std::io::BufRead;

/// One `/proc/meminfo` line, with the numeric field located for rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeminfoLine {
    /// Key without the trailing colon (e.g. `MemTotal`).
    pub key: String,
    /// Parsed value. Memory-capacity keys report kB.
    pub value: u64,
    raw: String,
    value_start: usize,
    value_end: usize,
}

impl MeminfoLine {
    /// Re-renders the line with a new value, preserving the host's column
    /// alignment. A value wider than the host's column widens the field to
    /// the left, exactly as the kernel's fixed-width formatter would.
    pub fn render_with(&self, value: u64) -> String {
        let digits = value.to_string();
        let width = self.value_end - self.value_start;
        let mut out = String::with_capacity(self.raw.len() + digits.len());
        out.push_str(&self.raw[..self.value_start]);
        for _ in digits.len()..width {
            out.push(' ');
        }
        out.push_str(&digits);
        out.push_str(&self.raw[self.value_end..]);
        out
    }

    /// The unmodified host line, including the trailing newline.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// The host `/proc/meminfo` in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meminfo {
    pub lines: Vec<MeminfoLine>,
}

impl Meminfo {
    /// Parses `/proc/meminfo` content from a buffered reader.
    ///
    /// Lines without a recognizable `Key: value` shape are kept verbatim
    /// with a zero value so rendering can still pass them through.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading fails.
    pub fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let mut lines = Vec::with_capacity(56);
        let mut line = String::new();

        while buf.read_line(&mut line)? != 0 {
            let mut raw = String::with_capacity(line.len() + 1);
            raw.push_str(line.trim_end_matches('\n'));
            raw.push('\n');

            lines.push(parse_line(raw));
            line.clear();
        }

        Ok(Self { lines })
    }

    /// Returns the parsed value for a key, if present.
    pub fn value(&self, key: &str) -> Option<u64> {
        self.lines
            .iter()
            .find(|l| l.key == key)
            .map(|l| l.value)
    }
}

fn parse_line(raw: String) -> MeminfoLine {
    let Some(colon) = raw.find(':') else {
        return MeminfoLine {
            key: String::new(),
            value: 0,
            value_start: raw.len().saturating_sub(1),
            value_end: raw.len().saturating_sub(1),
            raw,
        };
    };

    let key = raw[..colon].to_owned();
    let after = colon + 1;
    let rest = &raw[after..];
    let digit_start = rest
        .find(|c: char| c.is_ascii_digit())
        .map(|off| after + off);

    match digit_start {
        Some(start) => {
            let end = raw[start..]
                .find(|c: char| !c.is_ascii_digit())
                .map(|off| start + off)
                .unwrap_or(raw.len());
            let value = raw[start..end].parse::<u64>().unwrap_or(0);
            // A wider value eats padding from the left but always keeps one
            // space after the colon; past that the suffix shifts right, as
            // with the kernel's fixed minimum field width.
            MeminfoLine {
                key,
                value,
                value_start: start.min(after + 1),
                value_end: end,
                raw,
            }
        }
        None => MeminfoLine {
            key,
            value: 0,
            value_start: raw.len().saturating_sub(1),
            value_end: raw.len().saturating_sub(1),
            raw,
        },
    }
}
