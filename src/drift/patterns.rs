//! Pattern detection over an entity's drift history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::timeseries::{autocorrelation, first_cycle, linear_trend, mean, LinearTrend};
use crate::config::PatternConfig;
use crate::error::DriftResult;
use crate::storage::{SharedStorage, TrustDrift};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Kind of drift pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Drift magnitude trending up.
    IncreasingVolatility,
    /// Drift magnitude trending down.
    DecreasingVolatility,
    /// Average incoming drift trending up.
    IncreasingIncomingTrust,
    /// Average incoming drift trending down.
    DecreasingIncomingTrust,
    /// Average outgoing drift trending up.
    IncreasingOutgoingTrust,
    /// Average outgoing drift trending down.
    DecreasingOutgoingTrust,
    /// Drift magnitude repeats at a regular lag.
    CyclicalDrift,
    /// Incoming and outgoing drift keep diverging.
    PersistentTrustAsymmetry,
}

/// Overall direction of an entity's trust across its drift history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trajectory {
    /// Trust mostly rising.
    Improving,
    /// Trust mostly falling.
    Declining,
    /// No clear direction.
    Stable,
}

/// One detected pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftPattern {
    /// Kind of pattern.
    pub pattern_type: PatternType,
    /// Human-readable description.
    pub description: String,
    /// |r| for trends, the autocorrelation for cycles, the mean gap for
    /// asymmetry.
    pub strength: f64,
    /// Trend slope per day.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
    /// Trend p-value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    /// Cycle length in drift records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_lag: Option<usize>,
    /// Cycle length in days, from the mean spacing between drifts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_days: Option<f64>,
}

/// Patterns found in an entity's drift history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternReport {
    /// Entity analysed.
    pub entity_id: String,
    /// Number of drifts analysed.
    pub drift_count: usize,
    /// Patterns found, possibly none.
    pub patterns: Vec<DriftPattern>,
    /// Overall direction.
    pub trajectory: Trajectory,
    /// Mean of (incoming + outgoing) / 2 across the drifts.
    pub combined_average_drift: f64,
    /// When the analysis ran.
    pub analyzed_at: DateTime<Utc>,
}

/// Result of a pattern request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PatternOutcome {
    /// At least two drifts were analysed.
    Analyzed(PatternReport),
    /// Fewer than two drifts exist for the entity.
    InsufficientData {
        /// Entity requested.
        entity_id: String,
        /// Drifts available.
        available_drifts: usize,
    },
}

/// Reads drift history and reports patterns.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    storage: SharedStorage,
    config: PatternConfig,
}

impl PatternDetector {
    /// Create a detector with default thresholds.
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            config: PatternConfig::default(),
        }
    }

    /// Use the given thresholds.
    pub fn with_config(mut self, config: PatternConfig) -> Self {
        self.config = config;
        self
    }

    /// Analyse every stored drift of the entity.
    pub async fn analyze_drift_patterns(&self, entity_id: &str) -> DriftResult<PatternOutcome> {
        let drifts = self.storage.list_drifts(entity_id).await?;
        if drifts.len() < 2 {
            return Ok(PatternOutcome::InsufficientData {
                entity_id: entity_id.to_string(),
                available_drifts: drifts.len(),
            });
        }

        let report = detect_patterns(entity_id, &drifts, &self.config);
        debug!(
            entity_id = %entity_id,
            drifts = report.drift_count,
            patterns = report.patterns.len(),
            "Drift patterns analysed"
        );
        Ok(PatternOutcome::Analyzed(report))
    }
}

fn trend_pattern(
    trend: Option<LinearTrend>,
    config: &PatternConfig,
    rising: PatternType,
    falling: PatternType,
    subject: &str,
) -> Option<DriftPattern> {
    let trend = trend?;
    if trend.r.abs() <= config.min_correlation || trend.p_value >= config.significance_level {
        return None;
    }
    let (pattern_type, verb) = if trend.slope > 0.0 {
        (rising, "increasing")
    } else {
        (falling, "decreasing")
    };
    Some(DriftPattern {
        pattern_type,
        description: format!(
            "{} consistently {} (r = {:.2}, p = {:.3})",
            subject, verb, trend.r, trend.p_value
        ),
        strength: trend.r.abs(),
        slope: Some(trend.slope),
        p_value: Some(trend.p_value),
        cycle_lag: None,
        cycle_days: None,
    })
}

/// Detect trends, cycles and asymmetry in a drift history.
///
/// `drifts` must be ordered oldest first. x values are days relative to the
/// most recent drift, so they are all non-positive; slopes keep their usual
/// sign (positive means growing over time).
pub fn detect_patterns(
    entity_id: &str,
    drifts: &[TrustDrift],
    config: &PatternConfig,
) -> PatternReport {
    let latest = drifts
        .last()
        .map(|d| d.end_timestamp)
        .unwrap_or_else(Utc::now);
    let days: Vec<f64> = drifts
        .iter()
        .map(|d| (d.end_timestamp - latest).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY)
        .collect();
    let magnitude: Vec<f64> = drifts.iter().map(|d| d.drift_magnitude).collect();
    let incoming: Vec<f64> = drifts.iter().map(|d| d.avg_incoming_drift).collect();
    let outgoing: Vec<f64> = drifts.iter().map(|d| d.avg_outgoing_drift).collect();

    let mut patterns: Vec<DriftPattern> = [
        trend_pattern(
            linear_trend(&days, &magnitude),
            config,
            PatternType::IncreasingVolatility,
            PatternType::DecreasingVolatility,
            "Drift magnitude",
        ),
        trend_pattern(
            linear_trend(&days, &incoming),
            config,
            PatternType::IncreasingIncomingTrust,
            PatternType::DecreasingIncomingTrust,
            "Incoming trust",
        ),
        trend_pattern(
            linear_trend(&days, &outgoing),
            config,
            PatternType::IncreasingOutgoingTrust,
            PatternType::DecreasingOutgoingTrust,
            "Outgoing trust",
        ),
    ]
    .into_iter()
    .flatten()
    .collect();

    if drifts.len() >= config.min_points_for_cycles {
        let coefficients = autocorrelation(&magnitude);
        if let Some(lag) = first_cycle(&coefficients, config.cycle_correlation) {
            let span = days.last().copied().unwrap_or(0.0) - days.first().copied().unwrap_or(0.0);
            let spacing = span / (days.len() - 1) as f64;
            let cycle_days = lag as f64 * spacing;
            patterns.push(DriftPattern {
                pattern_type: PatternType::CyclicalDrift,
                description: format!(
                    "Drift magnitude repeats every {} drifts (about {:.1} days)",
                    lag, cycle_days
                ),
                strength: coefficients[lag],
                slope: None,
                p_value: None,
                cycle_lag: Some(lag),
                cycle_days: Some(cycle_days),
            });
        }
    }

    let gaps: Vec<f64> = incoming
        .iter()
        .zip(&outgoing)
        .map(|(i, o)| (i - o).abs())
        .collect();
    let asymmetry = mean(&gaps);
    if asymmetry > config.persistent_asymmetry {
        patterns.push(DriftPattern {
            pattern_type: PatternType::PersistentTrustAsymmetry,
            description: format!(
                "Incoming and outgoing trust drift differ by {:.2} on average",
                asymmetry
            ),
            strength: asymmetry,
            slope: None,
            p_value: None,
            cycle_lag: None,
            cycle_days: None,
        });
    }

    let combined: Vec<f64> = incoming
        .iter()
        .zip(&outgoing)
        .map(|(i, o)| (i + o) / 2.0)
        .collect();
    let combined_average_drift = mean(&combined);
    let trajectory = if combined_average_drift > config.trajectory_threshold {
        Trajectory::Improving
    } else if combined_average_drift < -config.trajectory_threshold {
        Trajectory::Declining
    } else {
        Trajectory::Stable
    };

    PatternReport {
        entity_id: entity_id.to_string(),
        drift_count: drifts.len(),
        patterns,
        trajectory,
        combined_average_drift,
        analyzed_at: Utc::now(),
    }
}
