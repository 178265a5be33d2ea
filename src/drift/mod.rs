//! Trust drift detection.
//!
//! Snapshots capture an entity's trust neighborhood at a point in time, drifts
//! compare two snapshots of the same entity, and pattern detection looks for
//! trends and cycles across an entity's drift history. Snapshots and drifts
//! are immutable once stored, so only snapshot capture touches the graph lock.

pub mod calculator;
pub mod patterns;
pub mod snapshot;
pub mod timeseries;

pub use calculator::{DriftCalculator, DriftOutcome, DriftReport, DriftSweep};
pub use patterns::{
    DriftPattern, PatternDetector, PatternOutcome, PatternReport, PatternType, Trajectory,
};
pub use snapshot::SnapshotManager;

use std::str::FromStr;

use chrono::Duration;

/// Window a drift is calculated over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TimePeriod {
    /// One day ("1d").
    Day,
    /// Seven days ("7d").
    #[default]
    Week,
    /// Thirty days ("30d").
    Month,
}

impl TimePeriod {
    /// Canonical label.
    pub fn label(&self) -> &'static str {
        match self {
            TimePeriod::Day => "1d",
            TimePeriod::Week => "7d",
            TimePeriod::Month => "30d",
        }
    }

    /// Length in days.
    pub fn days(&self) -> i64 {
        match self {
            TimePeriod::Day => 1,
            TimePeriod::Week => 7,
            TimePeriod::Month => 30,
        }
    }

    /// Length as a duration.
    pub fn duration(&self) -> Duration {
        Duration::days(self.days())
    }

    /// Parse a label, falling back to a week for anything unrecognised.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or_default()
    }
}

impl std::fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for TimePeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1d" | "day" => Ok(TimePeriod::Day),
            "7d" | "week" => Ok(TimePeriod::Week),
            "30d" | "month" => Ok(TimePeriod::Month),
            _ => Err(format!("Unknown time period: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_labels() {
        assert_eq!(TimePeriod::Day.label(), "1d");
        assert_eq!(TimePeriod::Month.to_string(), "30d");
        assert_eq!(TimePeriod::Week.duration(), Duration::days(7));
    }

    #[test]
    fn test_period_parse_strict() {
        assert_eq!("1d".parse::<TimePeriod>(), Ok(TimePeriod::Day));
        assert_eq!("Week".parse::<TimePeriod>(), Ok(TimePeriod::Week));
        assert_eq!(" 30d ".parse::<TimePeriod>(), Ok(TimePeriod::Month));
        assert!("fortnight".parse::<TimePeriod>().is_err());
    }

    #[test]
    fn test_period_from_label_defaults_to_week() {
        assert_eq!(TimePeriod::from_label("month"), TimePeriod::Month);
        assert_eq!(TimePeriod::from_label("3h"), TimePeriod::Week);
        assert_eq!(TimePeriod::from_label(""), TimePeriod::Week);
    }
}
