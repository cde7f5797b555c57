//! SLA thresholds and their evaluation against [`ExecutionMetrics`]

use pipeline_core::{Result, VerifyError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::summary::ExecutionMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlaMetric {
    MinExecutionCount,
    MaxErrors,
    MaxErrorRate,
    MaxAverageDurationMs,
    MaxP95DurationMs,
    MaxDurationMs,
    MaxColdStarts,
}

impl SlaMetric {
    pub const ALL: [SlaMetric; 7] = [
        SlaMetric::MinExecutionCount,
        SlaMetric::MaxErrors,
        SlaMetric::MaxErrorRate,
        SlaMetric::MaxAverageDurationMs,
        SlaMetric::MaxP95DurationMs,
        SlaMetric::MaxDurationMs,
        SlaMetric::MaxColdStarts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlaMetric::MinExecutionCount => "minExecutionCount",
            SlaMetric::MaxErrors => "maxErrors",
            SlaMetric::MaxErrorRate => "maxErrorRate",
            SlaMetric::MaxAverageDurationMs => "maxAverageDurationMs",
            SlaMetric::MaxP95DurationMs => "maxP95DurationMs",
            SlaMetric::MaxDurationMs => "maxDurationMs",
            SlaMetric::MaxColdStarts => "maxColdStarts",
        }
    }

    fn is_lower_bound(&self) -> bool {
        matches!(self, SlaMetric::MinExecutionCount)
    }

    /// The observed value this threshold is compared against.
    fn observe(&self, metrics: &ExecutionMetrics) -> Option<f64> {
        match self {
            SlaMetric::MinExecutionCount => Some(metrics.execution_count as f64),
            SlaMetric::MaxErrors => Some(metrics.errors as f64),
            SlaMetric::MaxErrorRate => metrics.error_rate,
            SlaMetric::MaxAverageDurationMs => metrics.average_duration_ms,
            SlaMetric::MaxP95DurationMs => metrics.p95_duration_ms.map(|v| v as f64),
            SlaMetric::MaxDurationMs => metrics.max_duration_ms.map(|v| v as f64),
            SlaMetric::MaxColdStarts => Some(metrics.cold_starts as f64),
        }
    }
}

impl fmt::Display for SlaMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SlaMetric {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self> {
        SlaMetric::ALL
            .into_iter()
            .find(|metric| metric.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| VerifyError::InvalidPolicy {
                reason: format!("unknown SLA metric '{}'", s),
            })
    }
}

/// Metric name → threshold mapping.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlaRequirements(BTreeMap<SlaMetric, f64>);

impl SlaRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metric: SlaMetric, threshold: f64) -> Result<()> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(VerifyError::InvalidPolicy {
                reason: format!("{} threshold must be a non-negative number, got {}", metric, threshold),
            });
        }
        if metric == SlaMetric::MaxErrorRate && threshold > 1.0 {
            return Err(VerifyError::InvalidPolicy {
                reason: format!("maxErrorRate is a fraction in [0, 1], got {}", threshold),
            });
        }
        self.0.insert(metric, threshold);
        Ok(())
    }

    pub fn with(mut self, metric: SlaMetric, threshold: f64) -> Result<Self> {
        self.insert(metric, threshold)?;
        Ok(self)
    }

    /// Build from `(name, threshold)` pairs as step tables supply them.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Result<Self> {
        let mut requirements = Self::new();
        for (name, threshold) in pairs {
            requirements.insert(name.parse()?, threshold)?;
        }
        Ok(requirements)
    }

    /// Parse `name=threshold` entries, e.g. `maxErrors=0`.
    pub fn parse_entry(entry: &str) -> Result<(SlaMetric, f64)> {
        let (name, value) = entry.split_once('=').ok_or_else(|| VerifyError::InvalidPolicy {
            reason: format!("expected name=threshold, got '{}'", entry),
        })?;
        let threshold = value
            .trim()
            .parse::<f64>()
            .map_err(|e| VerifyError::InvalidPolicy {
                reason: format!("bad threshold for {}: {}", name.trim(), e),
            })?;
        Ok((name.trim().parse()?, threshold))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlaMetric, f64)> + '_ {
        self.0.iter().map(|(metric, threshold)| (*metric, *threshold))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaViolation {
    pub metric: String,
    /// `None` when the window held no data for this metric.
    pub observed: Option<f64>,
    pub threshold: f64,
}

impl fmt::Display for SlaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.observed {
            Some(observed) => write!(
                f,
                "{}: observed {}, threshold {}",
                self.metric, observed, self.threshold
            ),
            None => write!(f, "{}: no data, threshold {}", self.metric, self.threshold),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaReport {
    #[serde(rename = "meetsSLA")]
    pub meets_sla: bool,
    pub violations: Vec<SlaViolation>,
    pub metrics: ExecutionMetrics,
}

impl SlaReport {
    pub fn violation_messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

/// Compare `metrics` to every threshold in `requirements`.
///
/// A window without executions always carries an `executionCount` violation
/// so an empty window never satisfies an SLA.
pub fn evaluate_sla(metrics: &ExecutionMetrics, requirements: &SlaRequirements) -> SlaReport {
    let mut violations = Vec::new();
    if !metrics.has_data() {
        violations.push(SlaViolation {
            metric: "executionCount".to_string(),
            observed: Some(0.0),
            threshold: requirements
                .0
                .get(&SlaMetric::MinExecutionCount)
                .copied()
                .unwrap_or(1.0)
                .max(1.0),
        });
    }

    for (metric, threshold) in requirements.iter() {
        if metric == SlaMetric::MinExecutionCount && !metrics.has_data() {
            continue;
        }
        let observed = metric.observe(metrics);
        let holds = match observed {
            Some(value) if metric.is_lower_bound() => value >= threshold,
            Some(value) => value <= threshold,
            None => false,
        };
        if !holds {
            violations.push(SlaViolation {
                metric: metric.to_string(),
                observed,
                threshold,
            });
        }
    }

    SlaReport {
        meets_sla: violations.is_empty(),
        violations,
        metrics: metrics.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy_metrics() -> ExecutionMetrics {
        ExecutionMetrics {
            execution_count: 20,
            errors: 2,
            average_duration_ms: Some(850.0),
            cold_starts: 1,
            max_duration_ms: Some(2_400),
            p95_duration_ms: Some(1_900),
            error_rate: Some(0.1),
        }
    }

    #[test]
    fn parses_metric_names() {
        assert_eq!("maxErrors".parse::<SlaMetric>().unwrap(), SlaMetric::MaxErrors);
        assert_eq!("MAXP95DURATIONMS".parse::<SlaMetric>().unwrap(), SlaMetric::MaxP95DurationMs);
        assert!("throughput".parse::<SlaMetric>().is_err());
    }

    #[test]
    fn rejects_nonsensical_thresholds() {
        let mut requirements = SlaRequirements::new();
        assert!(requirements.insert(SlaMetric::MaxErrors, -1.0).is_err());
        assert!(requirements.insert(SlaMetric::MaxErrorRate, 1.5).is_err());
        assert!(requirements.insert(SlaMetric::MaxDurationMs, f64::NAN).is_err());
        assert!(requirements.is_empty());
    }

    #[test]
    fn parses_name_threshold_entries() {
        assert_eq!(
            SlaRequirements::parse_entry("maxAverageDurationMs = 1000").unwrap(),
            (SlaMetric::MaxAverageDurationMs, 1000.0)
        );
        assert!(SlaRequirements::parse_entry("maxErrors").is_err());
        assert!(SlaRequirements::parse_entry("maxErrors=lots").is_err());
    }

    #[test]
    fn report_lists_each_violated_threshold() {
        let requirements = SlaRequirements::from_pairs([
            ("maxErrors", 0.0),
            ("maxAverageDurationMs", 1_000.0),
            ("maxP95DurationMs", 1_500.0),
            ("minExecutionCount", 10.0),
        ])
        .unwrap();
        let report = evaluate_sla(&busy_metrics(), &requirements);
        assert!(!report.meets_sla);
        assert_eq!(
            report.violation_messages(),
            vec![
                "maxErrors: observed 2, threshold 0".to_string(),
                "maxP95DurationMs: observed 1900, threshold 1500".to_string(),
            ]
        );
    }

    #[test]
    fn satisfied_requirements_meet_sla() {
        let requirements = SlaRequirements::new()
            .with(SlaMetric::MaxErrorRate, 0.2)
            .unwrap()
            .with(SlaMetric::MaxColdStarts, 1.0)
            .unwrap();
        let report = evaluate_sla(&busy_metrics(), &requirements);
        assert!(report.meets_sla);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn empty_window_never_meets_sla() {
        let report = evaluate_sla(&ExecutionMetrics::default(), &SlaRequirements::new());
        assert!(!report.meets_sla);
        assert_eq!(report.violations[0].metric, "executionCount");

        let requirements = SlaRequirements::new()
            .with(SlaMetric::MaxAverageDurationMs, 1_000.0)
            .unwrap();
        let report = evaluate_sla(&ExecutionMetrics::default(), &requirements);
        assert_eq!(
            report.violation_messages(),
            vec![
                "executionCount: observed 0, threshold 1".to_string(),
                "maxAverageDurationMs: no data, threshold 1000".to_string(),
            ]
        );
    }
}
