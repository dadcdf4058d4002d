//! Unix timestamps recorded on payment state entries.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::{Duration, SystemTime};

/// Seconds since the Unix epoch (1970-01-01T00:00:00Z).
///
/// Serialized as a stringified integer, the way the Lightning REST gateway
/// renders its own `int64` fields.
///
/// ```
/// use lnpaywall_types::timestamp::UnixTimestamp;
///
/// let ts = UnixTimestamp::from_secs(1_700_000_000);
/// assert_eq!(ts.as_secs(), 1_700_000_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(UnixTimestamp(ts))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0.saturating_add(rhs))
    }
}

impl UnixTimestamp {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Current system time. A clock set before the epoch reads as zero.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_string() {
        let ts = UnixTimestamp::from_secs(42);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "\"42\"");
        assert_eq!(serde_json::from_str::<UnixTimestamp>("\"42\"").unwrap(), ts);
        assert!(serde_json::from_str::<UnixTimestamp>("\"-1\"").is_err());
    }

    #[test]
    fn saturating_sub_clamps_at_epoch() {
        let ts = UnixTimestamp::from_secs(10);
        assert_eq!(ts.saturating_sub(Duration::from_secs(4)).as_secs(), 6);
        assert_eq!(ts.saturating_sub(Duration::from_secs(40)).as_secs(), 0);
    }
}
