use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::academic::{self, AcademicPerformance, AcademicProgress, AcademicRisk};
use crate::behavior::{self, BehavioralAlert, BehavioralFeatures, BehavioralTrends};
use crate::models::{DateRange, ExamResult, ParticipationRecord, Recommendation};

/// Both analysis layers for one student, recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentInsights {
    pub student_id: Uuid,
    pub features: BehavioralFeatures,
    pub trends: BehavioralTrends,
    pub behavioral_alerts: Vec<BehavioralAlert>,
    pub behavioral_recommendations: Vec<Recommendation>,
    pub performance: AcademicPerformance,
    pub progress: AcademicProgress,
    pub academic_risks: Vec<AcademicRisk>,
    pub academic_recommendations: Vec<Recommendation>,
}

pub fn build_insights(
    student_id: Uuid,
    participations: &[ParticipationRecord],
    results: &[ExamResult],
) -> StudentInsights {
    let features = behavior::analyze_behavioral_patterns(participations);
    let trends = behavior::calculate_behavioral_trends(participations);
    let behavioral_alerts = behavior::detect_behavioral_alerts(&features, &trends);
    let behavioral_recommendations = behavior::generate_behavioral_recommendations(&features);

    let performance = academic::analyze_academic_performance(results);
    let progress = academic::calculate_academic_progress(results);
    let academic_risks = academic::detect_academic_risks(&performance, &progress);
    let academic_recommendations =
        academic::generate_academic_recommendations(&performance, &progress);

    StudentInsights {
        student_id,
        features,
        trends,
        behavioral_alerts,
        behavioral_recommendations,
        performance,
        progress,
        academic_risks,
        academic_recommendations,
    }
}

/// Keeps the records whose `marked_at` date falls inside `range`.
pub fn within_range(records: Vec<ParticipationRecord>, range: &DateRange) -> Vec<ParticipationRecord> {
    records
        .into_iter()
        .filter(|p| {
            let day = p.marked_at.date_naive();
            range.start_date.map_or(true, |start| day >= start)
                && range.end_date.map_or(true, |end| day <= end)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::tests::record;
    use chrono::{Duration, Utc};

    #[test]
    fn empty_inputs_produce_neutral_insights() {
        let insights = build_insights(Uuid::nil(), &[], &[]);
        assert_eq!(insights.features, BehavioralFeatures::default());
        assert!(insights.behavioral_alerts.is_empty());
        assert!(insights.academic_risks.is_empty());
        assert!(insights.academic_recommendations.is_empty());
    }

    #[test]
    fn range_filter_is_inclusive() {
        let today = Utc::now().date_naive();
        let records = vec![
            record(10, true, Some(10.0), true, true),
            record(5, true, Some(10.0), true, true),
            record(0, true, Some(10.0), true, true),
        ];
        let range = DateRange::new(Some(today - Duration::days(5)), Some(today));
        assert_eq!(within_range(records.clone(), &range).len(), 2);
        assert_eq!(within_range(records, &DateRange::default()).len(), 3);
    }
}
