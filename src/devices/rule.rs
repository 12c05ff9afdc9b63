//! Device access rules and rulesets.
//!
//! A ruleset is an ordered list of rules plus a default policy. Each rule
//! pins some combination of device kind, major/minor numbers, and an access
//! mask, and either permits or denies matching requests. A classifier walks
//! the rules first-match-wins and falls back to the default.

use std::fmt;

/// Access bits, matching the kernel's `BPF_DEVCG_ACC_*` values
/// (linux/bpf.h): mknod = 1, read = 2, write = 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access(u32);

impl Access {
    pub const MKNOD: u32 = 1;
    pub const READ: u32 = 2;
    pub const WRITE: u32 = 4;
    pub const ALL: u32 = Self::MKNOD | Self::READ | Self::WRITE;

    pub fn new(mask: u32) -> Self {
        Self(mask & Self::ALL)
    }

    pub fn all() -> Self {
        Self(Self::ALL)
    }

    /// Parses an access string of `r`, `w`, `m` characters.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let mut mask = 0;
        for ch in s.chars() {
            mask |= match ch {
                'r' => Self::READ,
                'w' => Self::WRITE,
                'm' => Self::MKNOD,
                other => return Err(ParseError::InvalidAccess(other)),
            };
        }
        Ok(Self(mask))
    }

    pub fn mask(&self) -> u32 {
        self.0
    }

    /// `true` when every access kind is covered, in which case a classifier
    /// need not test the access bits at all.
    pub fn is_all(&self) -> bool {
        self.0 == Self::ALL
    }

    pub fn contains(&self, mask: u32) -> bool {
        self.0 & mask == mask
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(Self::READ) {
            write!(f, "r")?;
        }
        if self.contains(Self::WRITE) {
            write!(f, "w")?;
        }
        if self.contains(Self::MKNOD) {
            write!(f, "m")?;
        }
        Ok(())
    }
}

/// Device kind, matching `BPF_DEVCG_DEV_*`: block = 1, char = 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// Matches both kinds; emits no type comparison.
    Any,
    Block,
    Char,
}

impl DeviceType {
    pub fn parse(c: char) -> Result<Self, ParseError> {
        match c {
            'a' => Ok(Self::Any),
            'b' => Ok(Self::Block),
            'c' => Ok(Self::Char),
            other => Err(ParseError::InvalidType(other)),
        }
    }

    /// The kernel's encoding of this kind in the low 16 bits of
    /// `access_type`, `None` for the wildcard.
    pub fn kernel_value(&self) -> Option<u32> {
        match self {
            Self::Any => None,
            Self::Block => Some(1),
            Self::Char => Some(2),
        }
    }
}

/// What an unmatched access falls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPolicy {
    /// Only listed devices are allowed; the epilogue denies.
    Allowlist,
    /// Listed devices are denied; the epilogue permits.
    Denylist,
}

impl DefaultPolicy {
    /// The classifier's return value when no rule matched.
    pub fn verdict(&self) -> u32 {
        match self {
            Self::Allowlist => 0,
            Self::Denylist => 1,
        }
    }
}

/// One device rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRule {
    pub dev_type: DeviceType,
    /// `None` is the `*` wildcard.
    pub major: Option<u32>,
    /// `None` is the `*` wildcard.
    pub minor: Option<u32>,
    pub access: Access,
    /// `true` permits matching accesses, `false` denies them.
    pub allow: bool,
}

/// An entry of a ruleset: either a concrete rule or a global entry that
/// only sets the default policy and emits no instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulesetEntry {
    Default(DefaultPolicy),
    Rule(DeviceRule),
}

/// Errors from parsing a device rule line.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid device type `{0}`")]
    InvalidType(char),

    #[error("invalid access character `{0}`")]
    InvalidAccess(char),

    #[error("invalid device number `{0}`")]
    InvalidNumber(String),

    #[error("malformed device rule `{0}`")]
    Malformed(String),
}

impl DeviceRule {
    /// Parses a devices-cgroup style rule line such as `c 1:3 rwm`.
    ///
    /// A rule of `a *:* rwm` is the classic "touch everything" form; paired
    /// with `allow`, callers usually treat it as a global entry rather than
    /// emitting it (see [`RulesetEntry`]).
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] describing the offending component.
    pub fn parse(line: &str, allow: bool) -> Result<Self, ParseError> {
        let mut parts = line.split_whitespace();
        let (Some(type_str), Some(numbers), Some(access_str)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::Malformed(line.to_owned()));
        };

        let mut type_chars = type_str.chars();
        let (Some(type_char), None) = (type_chars.next(), type_chars.next()) else {
            return Err(ParseError::Malformed(line.to_owned()));
        };

        let (major_str, minor_str) = numbers
            .split_once(':')
            .ok_or_else(|| ParseError::Malformed(line.to_owned()))?;

        Ok(Self {
            dev_type: DeviceType::parse(type_char)?,
            major: parse_device_number(major_str)?,
            minor: parse_device_number(minor_str)?,
            access: Access::parse(access_str)?,
            allow,
        })
    }

    /// `true` when the rule matches every device and access, i.e. carries
    /// no constraint a classifier would need to test.
    pub fn is_catch_all(&self) -> bool {
        self.dev_type == DeviceType::Any
            && self.major.is_none()
            && self.minor.is_none()
            && self.access.is_all()
    }

    /// First-match semantics of this rule against one access attempt.
    pub fn matches(&self, dev_type: DeviceType, major: u32, minor: u32, access_mask: u32) -> bool {
        if let Some(required) = self.dev_type.kernel_value() {
            let requested = match dev_type.kernel_value() {
                Some(value) => value,
                None => return false,
            };
            if required != requested {
                return false;
            }
        }
        if !self.access.contains(access_mask) {
            return false;
        }
        if let Some(required) = self.major {
            if required != major {
                return false;
            }
        }
        if let Some(required) = self.minor {
            if required != minor {
                return false;
            }
        }
        true
    }
}

fn parse_device_number(s: &str) -> Result<Option<u32>, ParseError> {
    if s == "*" {
        return Ok(None);
    }
    s.parse::<u32>()
        .map(Some)
        .map_err(|_| ParseError::InvalidNumber(s.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_concrete_rule() {
        let rule = DeviceRule::parse("c 1:3 rwm", true).unwrap();
        assert_eq!(rule.dev_type, DeviceType::Char);
        assert_eq!(rule.major, Some(1));
        assert_eq!(rule.minor, Some(3));
        assert!(rule.access.is_all());
        assert!(rule.allow);
    }

    #[test]
    fn test_parse_wildcards() {
        let rule = DeviceRule::parse("a *:* rwm", false).unwrap();
        assert!(rule.is_catch_all());

        let rule = DeviceRule::parse("b 8:* rw", true).unwrap();
        assert_eq!(rule.major, Some(8));
        assert_eq!(rule.minor, None);
        assert!(!rule.access.is_all());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            DeviceRule::parse("x 1:3 rwm", true),
            Err(ParseError::InvalidType('x'))
        ));
        assert!(matches!(
            DeviceRule::parse("c 1:3 rwx", true),
            Err(ParseError::InvalidAccess('x'))
        ));
        assert!(matches!(
            DeviceRule::parse("c 1-3 rwm", true),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            DeviceRule::parse("c one:3 rwm", true),
            Err(ParseError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_access_parse_and_display() {
        let access = Access::parse("rw").unwrap();
        assert!(access.contains(Access::READ));
        assert!(access.contains(Access::WRITE));
        assert!(!access.contains(Access::MKNOD));
        assert_eq!(access.to_string(), "rw");
    }

    #[test]
    fn test_matches_first_match_semantics() {
        let rule = DeviceRule::parse("c 1:3 rw", true).unwrap();
        assert!(rule.matches(DeviceType::Char, 1, 3, Access::READ));
        assert!(rule.matches(DeviceType::Char, 1, 3, Access::READ | Access::WRITE));
        assert!(!rule.matches(DeviceType::Char, 1, 3, Access::MKNOD));
        assert!(!rule.matches(DeviceType::Block, 1, 3, Access::READ));
        assert!(!rule.matches(DeviceType::Char, 1, 5, Access::READ));
    }

    #[test]
    fn test_default_policy_verdicts() {
        assert_eq!(DefaultPolicy::Allowlist.verdict(), 0);
        assert_eq!(DefaultPolicy::Denylist.verdict(), 1);
    }
}
