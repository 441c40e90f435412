//! Metric provider contracts consumed by the alerting core.
//!
//! Implementations own transport concerns, including timeouts: a call that never
//! returns stalls the hydration awaiting it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::models::{
    AttendanceRate, ClassStudentAnalytics, DateRange, ParticipationAverage, ParticipationRecord,
    StudentProfile, StudentResults,
};

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Read-only access to pre-computed per-student and per-class metrics.
#[async_trait]
pub trait MetricProvider: Send + Sync {
    async fn attendance_rate(
        &self,
        student_id: Uuid,
        range: &DateRange,
    ) -> ProviderResult<AttendanceRate>;

    async fn participation_average(
        &self,
        student_id: Uuid,
        range: &DateRange,
    ) -> ProviderResult<ParticipationAverage>;

    /// Most recent results first, at most `limit` rows.
    async fn student_results(
        &self,
        student_id: Uuid,
        range: &DateRange,
        limit: u32,
    ) -> ProviderResult<StudentResults>;

    async fn student_profile(&self, student_id: Uuid) -> ProviderResult<StudentProfile>;

    async fn class_student_analytics(
        &self,
        class_id: Uuid,
        range: &DateRange,
    ) -> ProviderResult<ClassStudentAnalytics>;
}

/// Raw participation records for one student, in any order.
#[async_trait]
pub trait ParticipationSeriesProvider: Send + Sync {
    async fn participation_series(
        &self,
        student_id: Uuid,
    ) -> ProviderResult<Vec<ParticipationRecord>>;
}
