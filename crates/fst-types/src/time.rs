use std::fmt;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// UTC instant truncated to millisecond precision.
///
/// The RFC 3339 form (`2024-01-02T03:04:05.678Z`) is stable across
/// serialize/parse, which matters because snapshot ids hash it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Wrap a `DateTime`, dropping sub-millisecond precision.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(3))
    }

    /// Convert a filesystem timestamp.
    pub fn from_system_time(t: std::time::SystemTime) -> Self {
        Self::from_datetime(DateTime::<Utc>::from(t))
    }

    /// Milliseconds since the UNIX epoch.
    pub fn from_millis(ms: i64) -> Self {
        Self::from_datetime(DateTime::from_timestamp_millis(ms).unwrap_or_default())
    }

    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Canonical RFC 3339 representation with millisecond precision.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(s: &str) -> Result<Self, TypeError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self::from_datetime(dt.with_timezone(&Utc)))
            .map_err(|e| TypeError::InvalidTimestamp(e.to_string()))
    }

    /// This instant shifted forward by `duration` (saturating).
    pub fn plus(&self, duration: std::time::Duration) -> Self {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        Self::from_datetime(self.0.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// This instant shifted back by `duration` (saturating).
    pub fn minus(&self, duration: std::time::Duration) -> Self {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        Self::from_datetime(self.0.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    pub fn is_before(&self, other: &Self) -> bool {
        self < other
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.to_rfc3339())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_roundtrip_is_exact() {
        let ts = Timestamp::now();
        let parsed = Timestamp::parse(&ts.to_rfc3339()).unwrap();
        assert_eq!(ts, parsed);
    }

    #[test]
    fn millis_format() {
        let ts = Timestamp::from_millis(1_700_000_000_123);
        assert_eq!(ts.to_rfc3339(), "2023-11-14T22:13:20.123Z");
        assert_eq!(ts.as_millis(), 1_700_000_000_123);
    }

    #[test]
    fn plus_moves_forward() {
        let ts = Timestamp::from_millis(1_000);
        let later = ts.plus(std::time::Duration::from_secs(2));
        assert_eq!(later.as_millis(), 3_000);
        assert!(ts.is_before(&later));
        assert_eq!(later.minus(std::time::Duration::from_secs(2)), ts);
    }

    #[test]
    fn from_system_time_matches_millis() {
        let t = std::time::UNIX_EPOCH + std::time::Duration::from_millis(5_250);
        assert_eq!(Timestamp::from_system_time(t).as_millis(), 5_250);
    }

    #[test]
    fn serde_roundtrip() {
        let ts = Timestamp::from_millis(42);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"1970-01-01T00:00:00.042Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, back);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Timestamp::parse("yesterday"),
            Err(TypeError::InvalidTimestamp(_))
        ));
    }
}
