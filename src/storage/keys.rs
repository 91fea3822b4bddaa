//! Storage key layout.
//!
//! Every stream of a global name shares the hash key `{global}#{page}`.
//! Range keys start with the stream's parts, each followed by `/`, then a
//! mode marker and a fixed-width position:
//!
//! - logging: `{parts}t_{nanos:020}` (first event timestamp)
//! - sourcing: `{parts}@v_{version}` (batch base version, truncated)
//!
//! Both positions are fixed width so lexical order matches numeric order,
//! and a child stream's keys can be told apart by length.

use chrono::{DateTime, Utc};

use crate::stream::{StreamId, SEPARATOR};
use crate::validation::ValidationError;
use crate::version::{Version, ENCODED_LEN};

/// Width of the zero-padded nanosecond position of logging keys.
pub const NANOS_WIDTH: usize = 20;

/// Upper bound of the nanosecond position, above any encodable timestamp.
pub const NANOS_CEILING: &str = "99999999999999999999";

/// Which append mode wrote a range key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Logging,
    Sourcing,
}

impl Layout {
    pub fn marker(&self) -> &'static str {
        match self {
            Layout::Logging => "t_",
            Layout::Sourcing => "@v_",
        }
    }

    fn width(&self) -> usize {
        match self {
            Layout::Logging => NANOS_WIDTH,
            Layout::Sourcing => ENCODED_LEN,
        }
    }

    /// Whether `range` is a key of this layout written directly under
    /// `prefix`, as opposed to one belonging to a child stream.
    pub fn owns(&self, prefix: &str, range: &str) -> bool {
        range.len() == prefix.len() + self.marker().len() + self.width()
            && range.starts_with(prefix)
            && range[prefix.len()..].starts_with(self.marker())
    }
}

pub fn hash_key(stream: &StreamId, page: u32) -> String {
    format!("{}#{}", stream.partition(), page)
}

/// Range key prefix shared by every record of `stream`.
pub fn parts_prefix(stream: &StreamId) -> String {
    stream
        .parts()
        .iter()
        .map(|part| format!("{}{}", part, SEPARATOR))
        .collect()
}

/// Nanoseconds since the epoch, rejecting instants that cannot be encoded
/// in a logging key.
pub fn nanos(timestamp: DateTime<Utc>) -> Result<i64, ValidationError> {
    timestamp
        .timestamp_nanos_opt()
        .filter(|n| *n >= 0)
        .ok_or(ValidationError::TimestampOutOfRange(timestamp))
}

pub fn logging_key(stream: &StreamId, first: DateTime<Utc>) -> Result<String, ValidationError> {
    Ok(format!(
        "{}{}{:020}",
        parts_prefix(stream),
        Layout::Logging.marker(),
        nanos(first)?
    ))
}

/// Inclusive key range of logging records that may hold events within
/// `[since, until]`.
///
/// The lower bound is widened by `span` because a record is keyed by its
/// first event only.
pub fn logging_range(
    stream: &StreamId,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    span: chrono::Duration,
) -> (String, String) {
    let prefix = format!("{}{}", parts_prefix(stream), Layout::Logging.marker());
    let lo = since
        .and_then(|s| s.checked_sub_signed(span))
        .and_then(|s| s.timestamp_nanos_opt())
        .unwrap_or(0)
        .max(0);
    let hi = match until.and_then(|u| u.timestamp_nanos_opt()) {
        Some(n) if n >= 0 => format!("{:020}", n),
        Some(_) => format!("{:020}", 0),
        None => NANOS_CEILING.to_string(),
    };
    (format!("{}{:020}", prefix, lo), format!("{}{}", prefix, hi))
}

pub fn sourcing_key(stream: &StreamId, base: Version) -> String {
    format!(
        "{}{}{}",
        parts_prefix(stream),
        Layout::Sourcing.marker(),
        base.trunc()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_shared_by_partition() {
        let a = StreamId::must("orders/eu/1");
        let b = StreamId::must("orders");
        assert_eq!(hash_key(&a, 0), "orders#0");
        assert_eq!(hash_key(&b, 3), "orders#3");
    }

    #[test]
    fn test_parts_prefix() {
        assert_eq!(parts_prefix(&StreamId::must("orders")), "");
        assert_eq!(parts_prefix(&StreamId::must("orders/eu/1")), "eu/1/");
    }

    #[test]
    fn test_logging_key_sorts_numerically() {
        let stream = StreamId::must("logs/a");
        let early = DateTime::from_timestamp(9, 0).unwrap();
        let late = DateTime::from_timestamp(10, 0).unwrap();
        let k1 = logging_key(&stream, early).unwrap();
        let k2 = logging_key(&stream, late).unwrap();
        assert_eq!(k1, "a/t_00000000009000000000");
        assert!(k1 < k2);
        assert!(Layout::Logging.owns("a/", &k1));
    }

    #[test]
    fn test_logging_key_rejects_pre_epoch() {
        let stream = StreamId::must("logs/a");
        let before = DateTime::from_timestamp(-1, 0).unwrap();
        assert!(matches!(
            logging_key(&stream, before),
            Err(ValidationError::TimestampOutOfRange(_))
        ));
    }

    #[test]
    fn test_logging_range_widens_lower_bound() {
        let stream = StreamId::must("logs/a");
        let since = DateTime::from_timestamp(100, 0).unwrap();
        let (lo, hi) = logging_range(&stream, Some(since), None, chrono::Duration::seconds(60));
        assert_eq!(lo, "a/t_00000000040000000000");
        assert_eq!(hi, format!("a/t_{}", NANOS_CEILING));

        let (lo, _) = logging_range(&stream, Some(since), None, chrono::Duration::seconds(600));
        assert_eq!(lo, "a/t_00000000000000000000");
    }

    #[test]
    fn test_sourcing_key_truncates() {
        let stream = StreamId::must("orders/1");
        let key = sourcing_key(&stream, Version::new(7, 3).eof());
        assert_eq!(key, "1/@v_00000000000000000007.000~");
        assert!(Layout::Sourcing.owns("1/", &key));
    }

    #[test]
    fn test_child_keys_not_owned() {
        let child = StreamId::must("logs/a/t_5");
        let key = logging_key(&child, DateTime::from_timestamp(1, 0).unwrap()).unwrap();
        assert!(key.starts_with("a/t_"));
        assert!(!Layout::Logging.owns("a/", &key));
        assert!(!Layout::Sourcing.owns("a/", &key));
    }
}
