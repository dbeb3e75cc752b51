//! Eventstamps: totally ordered hybrid logical clock readings.
//!
//! Every write in a store is stamped with an [`Eventstamp`], and all conflict
//! resolution reduces to comparing stamps. The stamp is a triple of wall-clock
//! milliseconds, a logical counter for events within the same millisecond, and
//! a random nonce that breaks ties between replicas deterministically.
//!
//! # Wire format
//!
//! Stamps serialize to the string `"YYYY-MM-DDTHH:MM:SS.sssZ|hhhh|hhhh"` --
//! ISO-8601 UTC with millisecond precision, followed by the counter and nonce
//! as zero-padded lowercase 4-hex-digit fields. The field order guarantees
//! that lexicographic order on the serialized form equals numeric order on
//! `(timestamp_ms, counter, nonce)`, so serialized stamps are comparable as
//! plain strings by any peer.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest supported `timestamp_ms`: `9999-12-31T23:59:59.999Z`.
///
/// Bounding the year to four digits keeps the serialized form fixed-width,
/// which the lexicographic-order guarantee depends on.
pub const MAX_TIMESTAMP_MS: u64 = 253_402_300_799_999;

/// A hybrid logical clock reading.
///
/// Ordering is `timestamp_ms` first, then `counter`, then `nonce`. Two stamps
/// produced by the same [`Clock`](crate::clock::Clock) are strictly
/// increasing; the nonce makes equal stamps from different replicas
/// practically impossible.
///
/// Every stamp holds `timestamp_ms <= MAX_TIMESTAMP_MS`: [`Eventstamp::new`]
/// validates, the parser rejects, and the clock clamps its wall source, so a
/// stamp that exists can always be formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Eventstamp {
    /// Wall-clock milliseconds since the Unix epoch.
    pub(crate) timestamp_ms: u64,
    /// Logical counter for events within the same millisecond.
    pub(crate) counter: u16,
    /// Random tie-breaker, regenerated on every clock reading.
    pub(crate) nonce: u16,
}

impl Eventstamp {
    /// The smallest stamp; the state of a clock that has emitted nothing yet.
    pub const MIN: Eventstamp = Eventstamp {
        timestamp_ms: 0,
        counter: 0,
        nonce: 0,
    };

    /// Creates a stamp from its raw fields.
    ///
    /// Returns `None` when `timestamp_ms` exceeds [`MAX_TIMESTAMP_MS`]; such
    /// a stamp would have no canonical form.
    #[must_use]
    pub const fn new(timestamp_ms: u64, counter: u16, nonce: u16) -> Option<Self> {
        if timestamp_ms > MAX_TIMESTAMP_MS {
            return None;
        }
        Some(Self {
            timestamp_ms,
            counter,
            nonce,
        })
    }

    /// Wall-clock milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Logical counter for events within the same millisecond.
    #[must_use]
    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Random tie-breaker.
    #[must_use]
    pub fn nonce(&self) -> u16 {
        self.nonce
    }
}

impl Ord for Eventstamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp_ms
            .cmp(&other.timestamp_ms)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.nonce.cmp(&other.nonce))
    }
}

impl PartialOrd for Eventstamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Eventstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Infallible: every constructor enforces the MAX_TIMESTAMP_MS bound.
        let instant = DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms as i64)
            .expect("eventstamp millis within the four-digit-year range");
        write!(
            f,
            "{}|{:04x}|{:04x}",
            instant.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.counter,
            self.nonce
        )
    }
}

impl From<Eventstamp> for String {
    fn from(stamp: Eventstamp) -> Self {
        stamp.to_string()
    }
}

impl TryFrom<String> for Eventstamp {
    type Error = ParseEventstampError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Errors from parsing the canonical stamp string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseEventstampError {
    /// The string did not have exactly three `|`-separated parts.
    #[error("expected `timestamp|counter|nonce`, got {parts} part(s)")]
    Shape {
        /// Number of parts found.
        parts: usize,
    },
    /// The timestamp part was not a UTC ISO-8601 instant.
    #[error("invalid ISO-8601 timestamp `{0}`")]
    Timestamp(String),
    /// The timestamp was negative or past the four-digit-year bound.
    #[error("timestamp out of range: {0}ms")]
    OutOfRange(i64),
    /// A counter or nonce field was not 4 lowercase hex digits.
    #[error("invalid hex field `{0}`")]
    Hex(String),
}

fn parse_hex16(part: &str) -> Result<u16, ParseEventstampError> {
    let well_formed = part.len() == 4
        && part
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !well_formed {
        return Err(ParseEventstampError::Hex(part.to_string()));
    }
    u16::from_str_radix(part, 16).map_err(|_| ParseEventstampError::Hex(part.to_string()))
}

impl FromStr for Eventstamp {
    type Err = ParseEventstampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('|').collect();
        if parts.len() != 3 {
            return Err(ParseEventstampError::Shape { parts: parts.len() });
        }

        if !parts[0].ends_with('Z') {
            return Err(ParseEventstampError::Timestamp(parts[0].to_string()));
        }
        let instant = DateTime::parse_from_rfc3339(parts[0])
            .map_err(|_| ParseEventstampError::Timestamp(parts[0].to_string()))?;
        let millis = instant.with_timezone(&Utc).timestamp_millis();
        if millis < 0 || millis > MAX_TIMESTAMP_MS as i64 {
            return Err(ParseEventstampError::OutOfRange(millis));
        }

        Ok(Eventstamp {
            timestamp_ms: millis as u64,
            counter: parse_hex16(parts[1])?,
            nonce: parse_hex16(parts[2])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Ordering ----

    #[test]
    fn ordering_millis_first() {
        let a = Eventstamp::new(100, 0xffff, 0xffff).unwrap();
        let b = Eventstamp::new(200, 0, 0).unwrap();
        assert!(a < b);
    }

    #[test]
    fn ordering_counter_second() {
        let a = Eventstamp::new(100, 1, 0xffff).unwrap();
        let b = Eventstamp::new(100, 2, 0).unwrap();
        assert!(a < b);
    }

    #[test]
    fn ordering_nonce_third() {
        let a = Eventstamp::new(100, 1, 0x00aa).unwrap();
        let b = Eventstamp::new(100, 1, 0x00ab).unwrap();
        assert!(a < b);
    }

    #[test]
    fn min_is_smallest() {
        assert!(Eventstamp::MIN < Eventstamp::new(0, 0, 1).unwrap());
        assert!(Eventstamp::MIN < Eventstamp::new(0, 1, 0).unwrap());
        assert!(Eventstamp::MIN < Eventstamp::new(1, 0, 0).unwrap());
        assert_eq!(Eventstamp::MIN, Eventstamp::new(0, 0, 0).unwrap());
    }

    // ---- construction ----

    #[test]
    fn new_rejects_out_of_range_millis() {
        assert!(Eventstamp::new(MAX_TIMESTAMP_MS + 1, 0, 0).is_none());
        assert!(Eventstamp::new(u64::MAX, 0, 0).is_none());
    }

    #[test]
    fn new_accepts_the_bound_and_stays_formattable() {
        let stamp = Eventstamp::new(MAX_TIMESTAMP_MS, 0xffff, 0xffff).unwrap();
        assert_eq!(stamp.to_string(), "9999-12-31T23:59:59.999Z|ffff|ffff");
        assert_eq!(stamp.timestamp_ms(), MAX_TIMESTAMP_MS);
        assert_eq!(stamp.counter(), 0xffff);
        assert_eq!(stamp.nonce(), 0xffff);
    }

    // ---- Display / parse ----

    #[test]
    fn display_canonical_form() {
        let stamp = Eventstamp::new(1_700_000_000_000, 0x002a, 0xbeef).unwrap();
        assert_eq!(stamp.to_string(), "2023-11-14T22:13:20.000Z|002a|beef");
    }

    #[test]
    fn display_min() {
        assert_eq!(
            Eventstamp::MIN.to_string(),
            "1970-01-01T00:00:00.000Z|0000|0000"
        );
    }

    #[test]
    fn parse_valid() {
        let stamp: Eventstamp = "2023-11-14T22:13:20.000Z|002a|beef".parse().unwrap();
        assert_eq!(stamp.timestamp_ms, 1_700_000_000_000);
        assert_eq!(stamp.counter, 0x002a);
        assert_eq!(stamp.nonce, 0xbeef);
    }

    #[test]
    fn display_parse_roundtrip() {
        let original = Eventstamp::new(1_234_567_890_123, 1000, 65_535).unwrap();
        let parsed: Eventstamp = original.to_string().parse().unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn parse_rejects_wrong_shape() {
        assert_eq!(
            "not-a-stamp".parse::<Eventstamp>(),
            Err(ParseEventstampError::Shape { parts: 1 })
        );
        assert_eq!(
            "2023-11-14T22:13:20.000Z|002a".parse::<Eventstamp>(),
            Err(ParseEventstampError::Shape { parts: 2 })
        );
        assert!("a|b|c|d".parse::<Eventstamp>().is_err());
    }

    #[test]
    fn parse_rejects_bad_timestamp() {
        assert!(matches!(
            "garbage|0000|0000".parse::<Eventstamp>(),
            Err(ParseEventstampError::Timestamp(_))
        ));
        // Offset form is not canonical even though it names the same instant.
        assert!(matches!(
            "2023-11-14T22:13:20.000+00:00|0000|0000".parse::<Eventstamp>(),
            Err(ParseEventstampError::Timestamp(_))
        ));
    }

    #[test]
    fn parse_rejects_bad_hex() {
        assert_eq!(
            "2023-11-14T22:13:20.000Z|2a|0000".parse::<Eventstamp>(),
            Err(ParseEventstampError::Hex("2a".to_string()))
        );
        // Uppercase hex is not canonical.
        assert_eq!(
            "2023-11-14T22:13:20.000Z|002A|0000".parse::<Eventstamp>(),
            Err(ParseEventstampError::Hex("002A".to_string()))
        );
        assert_eq!(
            "2023-11-14T22:13:20.000Z|0000|zzzz".parse::<Eventstamp>(),
            Err(ParseEventstampError::Hex("zzzz".to_string()))
        );
    }

    // ---- Serde ----

    #[test]
    fn serde_json_as_string() {
        let stamp = Eventstamp::new(1_700_000_000_000, 1, 2).unwrap();
        let json = serde_json::to_string(&stamp).unwrap();
        assert_eq!(json, "\"2023-11-14T22:13:20.000Z|0001|0002\"");
        let back: Eventstamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stamp);
    }

    #[test]
    fn serde_msgpack_roundtrip() {
        let stamp = Eventstamp::new(1_700_000_000_000, 42, 7).unwrap();
        let bytes = rmp_serde::to_vec(&stamp).expect("serialize");
        let decoded: Eventstamp = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(decoded, stamp);
    }
}
