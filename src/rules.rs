//! Class-level alert rules. Each rule looks at one dimension of a hydrated
//! context and returns at most one alert; missing data never alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::behavior;
use crate::models::{
    AlertDetail, AlertEvaluationContext, DataSource, IncidentSource, ParticipationRecord,
    Severity, StudentAlert,
};
use crate::risk::{self, BEHAVIOR_WINDOW_DAYS};

pub const ATTENDANCE_THRESHOLD: f64 = 0.75;
pub const ATTENDANCE_HIGH_THRESHOLD: f64 = 0.6;
pub const PARTICIPATION_THRESHOLD: f64 = 2.5;
pub const PARTICIPATION_HIGH_THRESHOLD: f64 = 1.5;
pub const PARTICIPATION_MIN_SAMPLE: u32 = 5;
pub const GRADE_DROP_THRESHOLD: f64 = 2.0;
pub const GRADE_DROP_HIGH_THRESHOLD: f64 = 4.0;
pub const BEHAVIOR_INCIDENT_THRESHOLD: u32 = 3;
pub const BEHAVIOR_INCIDENT_HIGH_THRESHOLD: u32 = 5;

/// Where behavior incidents come from when the shortlist carries no count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentFallback {
    Disabled,
    ParticipationSeries,
}

impl IncidentFallback {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" | "none" => Some(IncidentFallback::Disabled),
            "series" | "participation_series" => Some(IncidentFallback::ParticipationSeries),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuleSet {
    pub incident_fallback: IncidentFallback,
}

impl RuleSet {
    pub fn new(incident_fallback: IncidentFallback) -> Self {
        Self { incident_fallback }
    }

    /// Runs all four rules; at most one alert per type.
    pub fn evaluate(&self, context: &AlertEvaluationContext, now: DateTime<Utc>) -> Vec<StudentAlert> {
        [
            evaluate_attendance(context, now),
            evaluate_participation(context, now),
            evaluate_grade_drop(context, now),
            evaluate_behavior(context, self.incident_fallback, now),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

pub fn evaluate_attendance(
    context: &AlertEvaluationContext,
    now: DateTime<Utc>,
) -> Option<StudentAlert> {
    let ratio = risk::normalize_ratio(context.snapshot.attendance_ratio?);
    if ratio >= ATTENDANCE_THRESHOLD {
        return None;
    }

    let severity = if ratio < ATTENDANCE_HIGH_THRESHOLD {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(StudentAlert::new(
        context,
        severity,
        format!(
            "Attendance at {:.0}% over the period (threshold {:.0}%)",
            ratio * 100.0,
            ATTENDANCE_THRESHOLD * 100.0
        ),
        AlertDetail::Attendance {
            attendance_ratio: ratio,
            threshold: ATTENDANCE_THRESHOLD,
        },
        now,
        vec![DataSource::AttendanceRate],
    ))
}

pub fn evaluate_participation(
    context: &AlertEvaluationContext,
    now: DateTime<Utc>,
) -> Option<StudentAlert> {
    let (average, sample_size) = match (
        context.snapshot.participation_average,
        context.snapshot.participation_sample_size,
    ) {
        (Some(average), Some(sample_size)) => (average, sample_size),
        _ => return None,
    };

    if sample_size < PARTICIPATION_MIN_SAMPLE || average >= PARTICIPATION_THRESHOLD {
        return None;
    }

    let severity = if average < PARTICIPATION_HIGH_THRESHOLD {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(StudentAlert::new(
        context,
        severity,
        format!(
            "Participation average {average:.1} across {sample_size} sessions (threshold {PARTICIPATION_THRESHOLD})"
        ),
        AlertDetail::Participation {
            participation_average: average,
            sample_size,
            threshold: PARTICIPATION_THRESHOLD,
        },
        now,
        vec![DataSource::ParticipationAverage],
    ))
}

pub fn evaluate_grade_drop(
    context: &AlertEvaluationContext,
    now: DateTime<Utc>,
) -> Option<StudentAlert> {
    let snapshot = &context.snapshot;
    if snapshot.recent_results_count == 0 {
        return None;
    }
    let period_average = risk::normalize_grade_average(snapshot.period_grade_average?);
    let recent_average = snapshot.recent_grade_average?;

    let drop = period_average - recent_average;
    if drop < GRADE_DROP_THRESHOLD {
        return None;
    }

    let severity = if drop >= GRADE_DROP_HIGH_THRESHOLD {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(StudentAlert::new(
        context,
        severity,
        format!(
            "Recent results average {recent_average:.1}/20, {drop:.1} points below the period average of {period_average:.1}/20"
        ),
        AlertDetail::GradeDrop {
            period_average,
            recent_average,
            drop,
            recent_results: snapshot.recent_results_count,
        },
        now,
        vec![DataSource::StudentResults, DataSource::StudentProfile],
    ))
}

pub fn evaluate_behavior(
    context: &AlertEvaluationContext,
    fallback: IncidentFallback,
    now: DateTime<Utc>,
) -> Option<StudentAlert> {
    let (incident_count, source) = match risk::incident_count(&context.snapshot.risk_factors) {
        Some(count) => (count, IncidentSource::RiskFactors),
        None => match fallback {
            IncidentFallback::Disabled => return None,
            IncidentFallback::ParticipationSeries => {
                let series = context.participations.as_deref()?;
                (
                    infer_incidents(series, now)?,
                    IncidentSource::ParticipationSeries,
                )
            }
        },
    };

    if incident_count < BEHAVIOR_INCIDENT_THRESHOLD {
        return None;
    }

    let severity = if incident_count >= BEHAVIOR_INCIDENT_HIGH_THRESHOLD {
        Severity::High
    } else {
        Severity::Medium
    };
    let (sources, message) = match source {
        IncidentSource::RiskFactors => (
            vec![DataSource::ClassAnalytics],
            format!("{incident_count} behavior incidents in the last {BEHAVIOR_WINDOW_DAYS} days"),
        ),
        // no incident count was reported, so this is an estimate
        IncidentSource::ParticipationSeries => (
            vec![DataSource::ParticipationSeries],
            format!(
                "{incident_count} disengaged sessions after a behavior change in the last {BEHAVIOR_WINDOW_DAYS} days"
            ),
        ),
    };

    Some(StudentAlert::new(
        context,
        severity,
        message,
        AlertDetail::Behavior {
            incident_count,
            window_days: BEHAVIOR_WINDOW_DAYS,
            source,
        },
        now,
        sources,
    ))
}

/// Counts disengaged sessions inside the horizon, but only when the same window
/// shows a behavior change.
fn infer_incidents(series: &[ParticipationRecord], now: DateTime<Utc>) -> Option<u32> {
    let since = risk::horizon_start(now, BEHAVIOR_WINDOW_DAYS);
    let window: Vec<ParticipationRecord> = series
        .iter()
        .filter(|p| p.marked_at >= since && p.marked_at <= now)
        .cloned()
        .collect();

    let features = behavior::analyze_behavioral_patterns(&window);
    let trends = behavior::calculate_behavioral_trends(&window);
    let changed = behavior::detect_behavioral_alerts(&features, &trends)
        .iter()
        .any(|alert| alert.kind == behavior::BehavioralAlertKind::BehaviorChange);

    if changed {
        Some(behavior::count_disengaged_sessions(&window, since))
    } else {
        None
    }
}
