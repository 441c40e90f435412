//! Per-student context hydration.

use std::future::Future;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    AlertEvaluationContext, AnalyticsPeriod, AtRiskStudent, AttendanceRate, DataSource,
    MetricSnapshot, ParticipationAverage, StudentProfile, StudentResults,
};
use crate::provider::{MetricProvider, ParticipationSeriesProvider, ProviderResult};

/// Results averaged for the "recent" side of the grade-drop comparison.
pub const RECENT_RESULTS_WINDOW: usize = 3;

/// Awaits one provider call; a failure is logged and becomes `None`.
pub(crate) async fn recover<T>(
    student_id: Uuid,
    source: DataSource,
    call: impl Future<Output = ProviderResult<T>>,
) -> Option<T> {
    match call.await {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(
                student_id = %student_id,
                source = ?source,
                error = %error,
                "Metric call failed, continuing without it"
            );
            None
        }
    }
}

/// Fetches every data source for one student concurrently. Never fails: a source
/// that errors is simply missing from the returned context.
pub async fn hydrate_context(
    metrics: &dyn MetricProvider,
    series: &dyn ParticipationSeriesProvider,
    student_id: Uuid,
    period: AnalyticsPeriod,
    at_risk: Option<AtRiskStudent>,
    results_limit: u32,
) -> AlertEvaluationContext {
    let range = period.as_range();

    let (attendance, participation, results, profile, participations) = tokio::join!(
        recover(
            student_id,
            DataSource::AttendanceRate,
            metrics.attendance_rate(student_id, &range),
        ),
        recover(
            student_id,
            DataSource::ParticipationAverage,
            metrics.participation_average(student_id, &range),
        ),
        recover(
            student_id,
            DataSource::StudentResults,
            metrics.student_results(student_id, &range, results_limit),
        ),
        recover(
            student_id,
            DataSource::StudentProfile,
            metrics.student_profile(student_id),
        ),
        recover(
            student_id,
            DataSource::ParticipationSeries,
            series.participation_series(student_id),
        ),
    );

    let mut sources = Vec::new();
    for (present, source) in [
        (attendance.is_some(), DataSource::AttendanceRate),
        (participation.is_some(), DataSource::ParticipationAverage),
        (results.is_some(), DataSource::StudentResults),
        (profile.is_some(), DataSource::StudentProfile),
        (participations.is_some(), DataSource::ParticipationSeries),
    ] {
        if present {
            sources.push(source);
        }
    }
    if at_risk.is_some() {
        sources.push(DataSource::ClassAnalytics);
    }

    let snapshot = build_snapshot(
        attendance.as_ref(),
        participation.as_ref(),
        results.as_ref(),
        profile.as_ref(),
        at_risk.as_ref(),
    );

    debug!(
        student_id = %student_id,
        sources = sources.len(),
        "Hydrated evaluation context"
    );

    AlertEvaluationContext {
        student_id,
        period,
        snapshot,
        participations,
        at_risk,
        sources,
    }
}

pub fn build_snapshot(
    attendance: Option<&AttendanceRate>,
    participation: Option<&ParticipationAverage>,
    results: Option<&StudentResults>,
    profile: Option<&StudentProfile>,
    at_risk: Option<&AtRiskStudent>,
) -> MetricSnapshot {
    let recent = results.map(recent_grades).unwrap_or_default();
    let recent_grade_average = if recent.is_empty() {
        None
    } else {
        Some(recent.iter().sum::<f64>() / recent.len() as f64)
    };

    MetricSnapshot {
        attendance_ratio: attendance.map(|a| a.attendance_rate),
        participation_average: participation.map(|p| p.participation_average),
        participation_sample_size: participation.map(|p| p.total_sessions_with_participation),
        recent_grade_average,
        recent_results_count: recent.len(),
        period_grade_average: profile.and_then(|p| p.analytics.average_grade),
        risk_factors: at_risk.map(|r| r.risk_factors.clone()).unwrap_or_default(),
    }
}

/// Last few non-absent grades on the /20 scale, most recent first.
fn recent_grades(results: &StudentResults) -> Vec<f64> {
    let mut items: Vec<_> = results.items.iter().collect();
    items.sort_by(|a, b| b.exam_date.cmp(&a.exam_date));
    items
        .into_iter()
        .filter_map(|r| r.normalized_grade())
        .take(RECENT_RESULTS_WINDOW)
        .collect()
}
