use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::risk::RiskFactor;

/// Optional `[start, end]` window passed to every provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start_date: Option<NaiveDate>, end_date: Option<NaiveDate>) -> Self {
        Self {
            start_date,
            end_date,
        }
    }

    pub fn is_inverted(&self) -> bool {
        matches!((self.start_date, self.end_date), (Some(start), Some(end)) if start > end)
    }
}

/// Period the provider actually computed class analytics over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl AnalyticsPeriod {
    pub fn as_range(&self) -> DateRange {
        DateRange::new(Some(self.start_date), Some(self.end_date))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRate {
    pub attendance_rate: f64,
    pub total_sessions: u32,
    pub attended_sessions: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipationAverage {
    pub participation_average: f64,
    pub total_sessions_with_participation: u32,
    pub coverage_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamResult {
    pub exam_date: NaiveDate,
    pub subject: Option<String>,
    pub points_obtained: Option<f64>,
    pub max_points: f64,
    pub is_absent: bool,
}

impl ExamResult {
    /// Grade on the 20-point scale, `None` for absences or unusable rows.
    pub fn normalized_grade(&self) -> Option<f64> {
        if self.is_absent || self.max_points <= 0.0 {
            return None;
        }
        self.points_obtained
            .map(|points| points / self.max_points * 20.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentResults {
    pub items: Vec<ExamResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileAnalytics {
    pub average_grade: Option<f64>,
    pub attendance_rate: Option<f64>,
    pub participation_average: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub analytics: ProfileAnalytics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtRiskStudent {
    pub student_id: Uuid,
    pub risk_factors: Vec<RiskFactor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassStatistics {
    pub at_risk_students: Vec<AtRiskStudent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub total: u32,
    pub present: u32,
    pub absent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAnalyticsRow {
    pub student_id: Uuid,
    pub full_name: String,
    pub attendance_rate: Option<f64>,
    pub participation_average: Option<f64>,
    pub session_counts: SessionCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStudentAnalytics {
    pub analytics_period: AnalyticsPeriod,
    pub class_statistics: ClassStatistics,
    pub students: Vec<StudentAnalyticsRow>,
}

impl ClassStudentAnalytics {
    pub fn at_risk_entry(&self, student_id: Uuid) -> Option<&AtRiskStudent> {
        self.class_statistics
            .at_risk_students
            .iter()
            .find(|entry| entry.student_id == student_id)
    }
}

/// One raw participation record. `participation_level` is on a 0-20 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipationRecord {
    pub is_present: bool,
    pub participation_level: Option<f64>,
    pub homework_done: bool,
    pub camera_enabled: bool,
    pub marked_at: DateTime<Utc>,
}

/// Identifies one provider call that fed an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    AttendanceRate,
    ParticipationAverage,
    StudentResults,
    StudentProfile,
    ParticipationSeries,
    ClassAnalytics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub attendance_ratio: Option<f64>,
    pub participation_average: Option<f64>,
    pub participation_sample_size: Option<u32>,
    pub recent_grade_average: Option<f64>,
    pub recent_results_count: usize,
    pub period_grade_average: Option<f64>,
    pub risk_factors: Vec<RiskFactor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvaluationContext {
    pub student_id: Uuid,
    pub period: AnalyticsPeriod,
    pub snapshot: MetricSnapshot,
    pub participations: Option<Vec<ParticipationRecord>>,
    pub at_risk: Option<AtRiskStudent>,
    pub sources: Vec<DataSource>,
}

impl AlertEvaluationContext {
    pub fn has_source(&self, source: DataSource) -> bool {
        self.sources.contains(&source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Attendance,
    Participation,
    GradeDrop,
    Behavior,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Attendance => "attendance",
            AlertType::Participation => "participation",
            AlertType::GradeDrop => "grade_drop",
            AlertType::Behavior => "behavior",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSource {
    RiskFactors,
    ParticipationSeries,
}

/// The "why" of an alert. Exactly one variant per alert type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertDetail {
    Attendance {
        attendance_ratio: f64,
        threshold: f64,
    },
    Participation {
        participation_average: f64,
        sample_size: u32,
        threshold: f64,
    },
    GradeDrop {
        period_average: f64,
        recent_average: f64,
        drop: f64,
        recent_results: usize,
    },
    Behavior {
        incident_count: u32,
        window_days: i64,
        source: IncidentSource,
    },
}

impl AlertDetail {
    pub fn alert_type(&self) -> AlertType {
        match self {
            AlertDetail::Attendance { .. } => AlertType::Attendance,
            AlertDetail::Participation { .. } => AlertType::Participation,
            AlertDetail::GradeDrop { .. } => AlertType::GradeDrop,
            AlertDetail::Behavior { .. } => AlertType::Behavior,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMetrics {
    pub period: AnalyticsPeriod,
    pub detail: AlertDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAlert {
    pub student_id: Uuid,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub metrics: AlertMetrics,
    pub detected_at: DateTime<Utc>,
    pub sources: Vec<DataSource>,
}

impl StudentAlert {
    pub fn new(
        context: &AlertEvaluationContext,
        severity: Severity,
        message: String,
        detail: AlertDetail,
        detected_at: DateTime<Utc>,
        sources: Vec<DataSource>,
    ) -> Self {
        Self {
            student_id: context.student_id,
            alert_type: detail.alert_type(),
            severity,
            message,
            metrics: AlertMetrics {
                period: context.period,
                detail,
            },
            detected_at,
            sources,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAlertsResult {
    pub class_id: Uuid,
    pub class_name: Option<String>,
    pub alerts: Vec<StudentAlert>,
    pub evaluated_at: DateTime<Utc>,
    pub analytics_period: AnalyticsPeriod,
    pub student_ids: Vec<Uuid>,
    pub students_evaluated: usize,
}

impl StudentAlertsResult {
    pub fn lists_student(&self, student_id: Uuid) -> bool {
        self.student_ids.contains(&student_id)
    }

    pub fn alerts_for(&self, student_id: Uuid) -> impl Iterator<Item = &StudentAlert> {
        self.alerts
            .iter()
            .filter(move |alert| alert.student_id == student_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRef {
    pub class_id: Uuid,
    pub class_name: Option<String>,
}

/// Analysis-layer recommendation shared by the behavioral and academic modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: String,
    pub priority: Severity,
    pub title: String,
    pub description: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}
