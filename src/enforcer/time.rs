//! Points in time as used by the enforcer.

use std::fmt;
use std::str::FromStr;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

//------------ UnixTime ------------------------------------------------------

/// A point in time expressed as whole seconds since the Unix epoch.
///
/// Every timestamp the enforcer stores or compares is a `UnixTime`. Sub
/// second precision is of no use for key timing, which is expressed in
/// TTLs and delays of at least several seconds.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct UnixTime(u64);

impl UnixTime {
    /// Create a time from seconds since the epoch.
    pub const fn from_secs(secs: u64) -> Self {
        UnixTime(secs)
    }

    /// Seconds since the epoch.
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// Value used for this time in query predicates.
    pub fn as_field(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }

    /// Recreate a time from a query field.
    pub fn from_field(field: i64) -> Self {
        UnixTime(u64::try_from(field).unwrap_or_default())
    }

    /// Add a number of seconds, saturating at the end of time.
    pub const fn add_secs(self, secs: u64) -> Self {
        UnixTime(self.0.saturating_add(secs))
    }

    /// Subtract a number of seconds, saturating at the epoch.
    pub const fn sub_secs(self, secs: u64) -> Self {
        UnixTime(self.0.saturating_sub(secs))
    }
}

impl From<Timestamp> for UnixTime {
    fn from(ts: Timestamp) -> Self {
        UnixTime(u64::try_from(ts.as_second()).unwrap_or_default())
    }
}

impl FromStr for UnixTime {
    type Err = String;

    /// Accepts both plain seconds and an RFC 3339 timestamp.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(secs) = s.parse::<u64>() {
            return Ok(UnixTime(secs));
        }
        let ts = Timestamp::from_str(s).map_err(|e| format!("unable to parse time {s}: {e}"))?;
        if ts.as_second() < 0 {
            return Err(format!("time {s} is before the Unix epoch"));
        }
        Ok(ts.into())
    }
}

impl fmt::Display for UnixTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match i64::try_from(self.0)
            .ok()
            .and_then(|secs| Timestamp::from_second(secs).ok())
        {
            Some(ts) => write!(f, "{}", ts.strftime("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_seconds_and_timestamps() {
        assert_eq!("1000".parse::<UnixTime>().unwrap(), UnixTime::from_secs(1000));
        assert_eq!(
            "2024-01-01T00:00:00Z".parse::<UnixTime>().unwrap(),
            UnixTime::from_secs(1_704_067_200)
        );
        assert!("yesterday".parse::<UnixTime>().is_err());
    }

    #[test]
    fn display() {
        assert_eq!(
            UnixTime::from_secs(1_704_067_200).to_string(),
            "2024-01-01 00:00:00"
        );
    }

    #[test]
    fn saturating_arithmetic() {
        assert_eq!(UnixTime::from_secs(u64::MAX).add_secs(1).as_secs(), u64::MAX);
        assert_eq!(UnixTime::from_secs(5).sub_secs(10).as_secs(), 0);
        assert_eq!(UnixTime::from_secs(u64::MAX).as_field(), i64::MAX);
    }
}
