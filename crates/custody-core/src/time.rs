//! Timestamp normalization.
//!
//! All timestamps are UTC, truncated to microseconds, and rendered as RFC 3339
//! with exactly six fractional digits and a `Z` suffix. A timestamp that went
//! through SQLite text, JSON or CBOR comes back bit-identical.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::CoreError;

pub type Timestamp = DateTime<Utc>;

/// Truncate to microsecond precision.
pub fn normalize(ts: Timestamp) -> Timestamp {
    ts.trunc_subsecs(6)
}

/// Current time, normalized.
pub fn now() -> Timestamp {
    normalize(Utc::now())
}

/// Render as canonical RFC 3339.
pub fn format(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 string into a normalized UTC timestamp.
pub fn parse(s: &str) -> Result<Timestamp, CoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| normalize(ts.with_timezone(&Utc)))
        .map_err(|e| CoreError::InvalidTimestamp(format!("{s}: {e}")))
}

/// Serde adapter for canonical RFC 3339 timestamps.
pub mod rfc3339 {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Timestamp;

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional canonical RFC 3339 timestamps.
pub mod rfc3339_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Timestamp;

    pub fn serialize<S: Serializer>(
        ts: &Option<Timestamp>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_some(&super::format(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Timestamp>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
