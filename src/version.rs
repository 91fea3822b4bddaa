//! Composite sequence numbers.
//!
//! A [`Version`] pairs a record-level position `p` with an intra-record
//! offset `f`, plus an `eof` flag marking the final event of a record.
//!
//! The string form is fixed-width (`{p:020}.{f:03}{e|~}`) so that lexical
//! order matches numeric order; the encoded value is used directly as a
//! range-scan sort key by the storage layer.
//!
//! Ordering, equality and hashing ignore `eof`. Use [`Version::exact_eq`]
//! when the flag matters.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Length of the encoded form: 20 digits, `.`, 3 digits, one suffix byte.
pub const ENCODED_LEN: usize = 25;

const P_DIGITS: usize = 20;
const EOF_SUFFIX: char = 'e';
const OPEN_SUFFIX: char = '~';

/// Errors raised by version parsing and arithmetic.
///
/// These indicate a broken invariant upstream (corrupt data or a caller
/// bug), never a transient condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("Malformed version: {0:?}")]
    Malformed(String),

    #[error("Version limit exceeded: {version} {op} ({dp}, {df})")]
    LimitExceeded {
        version: String,
        op: &'static str,
        dp: u64,
        df: u8,
    },

    #[error("Cannot decrement version {0}")]
    InvalidDecrement(String),
}

/// Composite sequence number `{p, f, eof}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Version {
    p: u64,
    f: u8,
    eof: bool,
}

impl Version {
    /// The unset sentinel. Never a valid assigned version.
    pub const ZERO: Version = Version {
        p: 0,
        f: 0,
        eof: false,
    };

    /// First assignable version.
    pub const MIN: Version = Version {
        p: 1,
        f: 0,
        eof: false,
    };

    /// Largest representable version.
    pub const MAX: Version = Version {
        p: u64::MAX,
        f: u8::MAX,
        eof: false,
    };

    pub const fn new(p: u64, f: u8) -> Self {
        Self { p, f, eof: false }
    }

    /// Record-level sequence.
    pub fn p(&self) -> u64 {
        self.p
    }

    /// Intra-record offset.
    pub fn f(&self) -> u8 {
        self.f
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn is_zero(&self) -> bool {
        self.p == 0 && self.f == 0
    }

    /// Advance to the next record position: `p + 1`, offset and eof cleared.
    pub fn incr(self) -> Result<Self, VersionError> {
        let p = self.p.checked_add(1).ok_or_else(|| self.limit("incr", 1, 0))?;
        Ok(Self::new(p, 0))
    }

    /// Retreat to the previous record position. Fails on `p == 0`.
    pub fn decr(self) -> Result<Self, VersionError> {
        if self.p == 0 {
            return Err(VersionError::InvalidDecrement(self.to_string()));
        }
        Ok(Self::new(self.p - 1, 0))
    }

    /// Checked addition on both components. The result never carries eof.
    pub fn add(self, dp: u64, df: u8) -> Result<Self, VersionError> {
        let p = self.p.checked_add(dp);
        let f = self.f.checked_add(df);
        match (p, f) {
            (Some(p), Some(f)) => Ok(Self::new(p, f)),
            _ => Err(self.limit("add", dp, df)),
        }
    }

    /// Checked subtraction on both components. The result never carries eof.
    pub fn drop(self, dp: u64, df: u8) -> Result<Self, VersionError> {
        let p = self.p.checked_sub(dp);
        let f = self.f.checked_sub(df);
        match (p, f) {
            (Some(p), Some(f)) => Ok(Self::new(p, f)),
            _ => Err(self.limit("drop", dp, df)),
        }
    }

    /// Mark as the final event of its record.
    pub fn eof(self) -> Self {
        Self { eof: true, ..self }
    }

    /// Record position only: offset and eof cleared.
    pub fn trunc(self) -> Self {
        Self::new(self.p, 0)
    }

    /// True iff `self` immediately follows `to`.
    ///
    /// Either the same record with `f = to.f + 1`, or the first event of the
    /// next record when `to` closed its record (`to.f == 0` or `to.eof`).
    pub fn next(&self, to: &Version) -> bool {
        if self.p == to.p {
            return to.f.checked_add(1) == Some(self.f);
        }
        to.p.checked_add(1) == Some(self.p) && self.f == 0 && (to.f == 0 || to.eof)
    }

    pub fn before(&self, other: &Version) -> bool {
        self < other
    }

    pub fn after(&self, other: &Version) -> bool {
        self > other
    }

    /// Inclusive range check, eof-insensitive.
    pub fn between(&self, from: &Version, to: &Version) -> bool {
        self >= from && self <= to
    }

    /// Equality including the eof flag.
    pub fn exact_eq(&self, other: &Version) -> bool {
        self == other && self.eof == other.eof
    }

    fn limit(&self, op: &'static str, dp: u64, df: u8) -> VersionError {
        VersionError::LimitExceeded {
            version: self.to_string(),
            op,
            dp,
            df,
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.p == other.p && self.f == other.f
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.p.hash(state);
        self.f.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.p, self.f).cmp(&(other.p, other.f))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.eof { EOF_SUFFIX } else { OPEN_SUFFIX };
        write!(f, "{:020}.{:03}{}", self.p, self.f, suffix)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::ZERO);
        }
        let malformed = || VersionError::Malformed(s.to_string());
        if s.len() != ENCODED_LEN || !s.is_ascii() {
            return Err(malformed());
        }

        let (p_str, rest) = s.split_at(P_DIGITS);
        let (dot, rest) = rest.split_at(1);
        let (f_str, suffix) = rest.split_at(3);
        if dot != "." || !all_digits(p_str) || !all_digits(f_str) {
            return Err(malformed());
        }

        let p = p_str.parse::<u64>().map_err(|_| malformed())?;
        let f = f_str.parse::<u8>().map_err(|_| malformed())?;
        let eof = match suffix.chars().next() {
            Some(EOF_SUFFIX) => true,
            Some(OPEN_SUFFIX) => false,
            _ => return Err(malformed()),
        };

        Ok(Self { p, f, eof })
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests;
