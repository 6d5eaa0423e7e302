//! Domain primitives: TimeMs, AgentId, Instrument, Direction, ActionKind.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// UTC time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        TimeMs(dt.timestamp_millis())
    }

    /// Convert to a chrono UTC timestamp, falling back to the epoch for
    /// out-of-range values.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Whole seconds elapsed from `earlier` to `self`, rounded to the nearest second.
    pub fn seconds_since(&self, earlier: TimeMs) -> i64 {
        let delta = self.0 - earlier.0;
        if delta >= 0 {
            (delta + 500) / 1000
        } else {
            (delta - 500) / 1000
        }
    }
}

impl fmt::Display for TimeMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

/// Identifier of one trading agent (one account/oracle/exchange triple).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        AgentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tradable symbol, e.g. a perpetual pair such as "BTCUSDT".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instrument(pub String);

impl Instrument {
    /// Create an Instrument from a string as-is.
    pub fn new(symbol: impl Into<String>) -> Self {
        Instrument(symbol.into())
    }

    /// Normalize user input: trim, upper-case, and append the `USDT` quote
    /// when it is missing ("sol" -> "SOLUSDT").
    pub fn normalize(symbol: &str) -> Self {
        let upper = symbol.trim().to_ascii_uppercase();
        if upper.is_empty() || upper.ends_with("USDT") {
            Instrument(upper)
        } else {
            Instrument(format!("{}USDT", upper))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a textual action kind is not one of the four trade kinds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid action kind: {0}")]
pub struct InvalidActionKind(pub String);

/// Direction-qualified kind of an executed trade action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

impl ActionKind {
    pub fn direction(&self) -> Direction {
        match self {
            ActionKind::OpenLong | ActionKind::CloseLong => Direction::Long,
            ActionKind::OpenShort | ActionKind::CloseShort => Direction::Short,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ActionKind::OpenLong | ActionKind::OpenShort)
    }

    pub fn is_close(&self) -> bool {
        !self.is_open()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::OpenLong => "open_long",
            ActionKind::OpenShort => "open_short",
            ActionKind::CloseLong => "close_long",
            ActionKind::CloseShort => "close_short",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = InvalidActionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open_long" => Ok(ActionKind::OpenLong),
            "open_short" => Ok(ActionKind::OpenShort),
            "close_long" => Ok(ActionKind::CloseLong),
            "close_short" => Ok(ActionKind::CloseShort),
            _ => Err(InvalidActionKind(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_parse() {
        assert_eq!("open_long".parse::<ActionKind>(), Ok(ActionKind::OpenLong));
        assert_eq!(" CLOSE_SHORT ".parse::<ActionKind>(), Ok(ActionKind::CloseShort));
        assert_eq!(
            "hold".parse::<ActionKind>(),
            Err(InvalidActionKind("hold".to_string()))
        );
    }

    #[test]
    fn test_action_kind_direction() {
        assert_eq!(ActionKind::OpenLong.direction(), Direction::Long);
        assert_eq!(ActionKind::CloseLong.direction(), Direction::Long);
        assert_eq!(ActionKind::OpenShort.direction(), Direction::Short);
        assert!(ActionKind::OpenShort.is_open());
        assert!(ActionKind::CloseShort.is_close());
    }

    #[test]
    fn test_action_kind_serialization() {
        let json = serde_json::to_string(&ActionKind::CloseShort).unwrap();
        assert_eq!(json, "\"close_short\"");
    }

    #[test]
    fn test_instrument_normalize() {
        assert_eq!(Instrument::normalize("sol").as_str(), "SOLUSDT");
        assert_eq!(Instrument::normalize(" btcusdt ").as_str(), "BTCUSDT");
        assert_eq!(Instrument::normalize("").as_str(), "");
    }

    #[test]
    fn test_seconds_since_rounds() {
        let open = TimeMs::new(0);
        assert_eq!(TimeMs::new(7_200_000).seconds_since(open), 7200);
        assert_eq!(TimeMs::new(1_499).seconds_since(open), 1);
        assert_eq!(TimeMs::new(1_500).seconds_since(open), 2);
    }

    #[test]
    fn test_timems_ordering() {
        assert!(TimeMs::new(1000) < TimeMs::new(2000));
    }
}
