use chrono::{DateTime, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Reporting horizon for behavior incidents, in days.
pub const BEHAVIOR_WINDOW_DAYS: i64 = 14;

/// Coarse risk tag attached to an at-risk shortlist entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskFactor {
    LowAttendance { rate: Option<f64> },
    LowParticipation { average: Option<f64> },
    GradeDecline,
    BehaviorIncidents { count: u32 },
    Other { label: String },
}

static INCIDENT_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s+(?:behaviou?r(?:al)?\s+)?incidents?\b").expect("valid regex")
});

impl RiskFactor {
    /// Reads a legacy free-text tag. Only an explicit "N incidents" yields a count;
    /// anything else about behavior stays an opaque label.
    pub fn parse(tag: &str) -> RiskFactor {
        if let Some(count) = INCIDENT_COUNT
            .captures(tag)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        {
            return RiskFactor::BehaviorIncidents { count };
        }

        let lower = tag.to_lowercase();
        if lower.contains("attendance") || lower.contains("absence") {
            RiskFactor::LowAttendance { rate: None }
        } else if lower.contains("participation") {
            RiskFactor::LowParticipation { average: None }
        } else if lower.contains("grade") || lower.contains("decline") {
            RiskFactor::GradeDecline
        } else {
            RiskFactor::Other {
                label: tag.trim().to_string(),
            }
        }
    }
}

/// Largest reported incident count, if any tag carries one.
pub fn incident_count(factors: &[RiskFactor]) -> Option<u32> {
    factors
        .iter()
        .filter_map(|factor| match factor {
            RiskFactor::BehaviorIncidents { count } => Some(*count),
            _ => None,
        })
        .max()
}

/// Ratios reported as percentages (anything above 1) are scaled back to [0, 1].
pub fn normalize_ratio(value: f64) -> f64 {
    if value > 1.0 {
        value / 100.0
    } else {
        value
    }
}

/// Averages reported as percentages (anything above 20) are rescaled to /20.
pub fn normalize_grade_average(value: f64) -> f64 {
    if value > 20.0 {
        value / 100.0 * 20.0
    } else {
        value
    }
}

pub fn horizon_start(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days.max(1))
}

pub fn cutoff_date(since_days: i64) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(since_days.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_incident_counts() {
        assert_eq!(
            RiskFactor::parse("4 incidents"),
            RiskFactor::BehaviorIncidents { count: 4 }
        );
        assert_eq!(
            RiskFactor::parse("Reported 6 behavioral incidents this month"),
            RiskFactor::BehaviorIncidents { count: 6 }
        );
        assert_eq!(
            RiskFactor::parse("1 Behaviour incident"),
            RiskFactor::BehaviorIncidents { count: 1 }
        );
    }

    #[test]
    fn phrase_without_count_implies_nothing() {
        let factor = RiskFactor::parse("behavior change noticed");
        assert_eq!(
            factor,
            RiskFactor::Other {
                label: "behavior change noticed".to_string()
            }
        );
        assert_eq!(incident_count(&[factor]), None);
    }

    #[test]
    fn parses_metric_tags() {
        assert_eq!(
            RiskFactor::parse("Low attendance"),
            RiskFactor::LowAttendance { rate: None }
        );
        assert_eq!(
            RiskFactor::parse("low participation"),
            RiskFactor::LowParticipation { average: None }
        );
        assert_eq!(RiskFactor::parse("grade decline"), RiskFactor::GradeDecline);
    }

    #[test]
    fn incident_count_takes_the_largest_tag() {
        let factors = vec![
            RiskFactor::BehaviorIncidents { count: 2 },
            RiskFactor::GradeDecline,
            RiskFactor::BehaviorIncidents { count: 5 },
        ];
        assert_eq!(incident_count(&factors), Some(5));
        assert_eq!(incident_count(&[]), None);
    }

    #[test]
    fn normalizes_percentages() {
        assert!((normalize_ratio(62.0) - 0.62).abs() < 1e-9);
        assert_eq!(normalize_ratio(0.62), 0.62);
        assert_eq!(normalize_ratio(0.0), 0.0);
        assert!((normalize_grade_average(70.0) - 14.0).abs() < 1e-9);
        assert_eq!(normalize_grade_average(14.0), 14.0);
    }

    #[test]
    fn cutoff_date_respects_since_days() {
        let cutoff = cutoff_date(14);
        let expected = Utc::now().date_naive() - Duration::days(14);
        assert_eq!(cutoff, expected);
    }

    #[test]
    fn horizon_start_is_window_before_now() {
        let now = Utc::now();
        assert_eq!(horizon_start(now, BEHAVIOR_WINDOW_DAYS), now - Duration::days(14));
        assert_eq!(horizon_start(now, 0), now - Duration::days(1));
    }
}
