//! In-memory provider and clock used by the unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::cache::Clock;
use crate::error::ProviderError;
use crate::models::{
    AnalyticsPeriod, AtRiskStudent, AttendanceRate, ClassStatistics, ClassStudentAnalytics,
    DataSource, DateRange, ExamResult, ParticipationAverage, ParticipationRecord,
    ProfileAnalytics, SessionCounts, StudentAnalyticsRow, StudentProfile, StudentResults,
};
use crate::provider::{MetricProvider, ParticipationSeriesProvider, ProviderResult};
use crate::risk::RiskFactor;

pub fn period() -> AnalyticsPeriod {
    AnalyticsPeriod {
        start_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 3, 27).unwrap(),
    }
}

#[derive(Debug, Clone)]
struct FakeStudent {
    id: Uuid,
    class_id: Uuid,
    full_name: String,
    attendance: f64,
    participation: f64,
    sample: u32,
    average_grade: Option<f64>,
    results: Vec<ExamResult>,
    series: Vec<ParticipationRecord>,
    risk_factors: Vec<RiskFactor>,
}

pub struct FakeProvider {
    pub class_id: Uuid,
    students: Mutex<Vec<FakeStudent>>,
    failures: Mutex<HashSet<(Uuid, DataSource)>>,
    failing_classes: Mutex<HashSet<Uuid>>,
    class_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            class_id: Uuid::new_v4(),
            students: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
            failing_classes: Mutex::new(HashSet::new()),
            class_calls: AtomicUsize::new(0),
        }
    }

    pub fn add_student(
        &self,
        full_name: &str,
        attendance: f64,
        participation: f64,
        sample: u32,
        average_grade: Option<f64>,
    ) -> Uuid {
        self.add_student_to(self.class_id, full_name, attendance, participation, sample, average_grade)
    }

    pub fn add_student_to(
        &self,
        class_id: Uuid,
        full_name: &str,
        attendance: f64,
        participation: f64,
        sample: u32,
        average_grade: Option<f64>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.students.lock().push(FakeStudent {
            id,
            class_id,
            full_name: full_name.to_string(),
            attendance,
            participation,
            sample,
            average_grade,
            results: Vec::new(),
            series: Vec::new(),
            risk_factors: Vec::new(),
        });
        id
    }

    fn update(&self, student_id: Uuid, apply: impl FnOnce(&mut FakeStudent)) {
        if let Some(student) = self.students.lock().iter_mut().find(|s| s.id == student_id) {
            apply(student);
        }
    }

    pub fn set_attendance(&self, student_id: Uuid, attendance: f64) {
        self.update(student_id, |s| s.attendance = attendance);
    }

    pub fn set_results(&self, student_id: Uuid, results: Vec<ExamResult>) {
        self.update(student_id, |s| s.results = results);
    }

    pub fn set_series(&self, student_id: Uuid, series: Vec<ParticipationRecord>) {
        self.update(student_id, |s| s.series = series);
    }

    pub fn set_risk_factors(&self, student_id: Uuid, risk_factors: Vec<RiskFactor>) {
        self.update(student_id, |s| s.risk_factors = risk_factors);
    }

    pub fn fail(&self, student_id: Uuid, source: DataSource) {
        self.failures.lock().insert((student_id, source));
    }

    pub fn fail_class(&self, class_id: Uuid) {
        self.failing_classes.lock().insert(class_id);
    }

    pub fn class_calls(&self) -> usize {
        self.class_calls.load(Ordering::SeqCst)
    }

    fn student(&self, student_id: Uuid, source: DataSource) -> ProviderResult<FakeStudent> {
        if self.failures.lock().contains(&(student_id, source)) {
            return Err(ProviderError::Unavailable(format!("{source:?} failed")));
        }
        self.students
            .lock()
            .iter()
            .find(|s| s.id == student_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("student {student_id}")))
    }
}

#[async_trait]
impl MetricProvider for FakeProvider {
    async fn attendance_rate(
        &self,
        student_id: Uuid,
        _range: &DateRange,
    ) -> ProviderResult<AttendanceRate> {
        let student = self.student(student_id, DataSource::AttendanceRate)?;
        Ok(AttendanceRate {
            attendance_rate: student.attendance,
            total_sessions: 20,
            attended_sessions: (student.attendance * 20.0).round() as u32,
        })
    }

    async fn participation_average(
        &self,
        student_id: Uuid,
        _range: &DateRange,
    ) -> ProviderResult<ParticipationAverage> {
        let student = self.student(student_id, DataSource::ParticipationAverage)?;
        Ok(ParticipationAverage {
            participation_average: student.participation,
            total_sessions_with_participation: student.sample,
            coverage_percentage: student.sample as f64 / 20.0 * 100.0,
        })
    }

    async fn student_results(
        &self,
        student_id: Uuid,
        _range: &DateRange,
        limit: u32,
    ) -> ProviderResult<StudentResults> {
        let student = self.student(student_id, DataSource::StudentResults)?;
        let mut items = student.results;
        items.sort_by(|a, b| b.exam_date.cmp(&a.exam_date));
        items.truncate(limit as usize);
        Ok(StudentResults { items })
    }

    async fn student_profile(&self, student_id: Uuid) -> ProviderResult<StudentProfile> {
        let student = self.student(student_id, DataSource::StudentProfile)?;
        Ok(StudentProfile {
            analytics: ProfileAnalytics {
                average_grade: student.average_grade,
                attendance_rate: Some(student.attendance),
                participation_average: Some(student.participation),
            },
        })
    }

    async fn class_student_analytics(
        &self,
        class_id: Uuid,
        _range: &DateRange,
    ) -> ProviderResult<ClassStudentAnalytics> {
        self.class_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_classes.lock().contains(&class_id) {
            return Err(ProviderError::Unavailable("class summary".to_string()));
        }

        let students = self.students.lock();
        let members: Vec<&FakeStudent> = students.iter().filter(|s| s.class_id == class_id).collect();

        Ok(ClassStudentAnalytics {
            analytics_period: period(),
            class_statistics: ClassStatistics {
                at_risk_students: members
                    .iter()
                    .filter(|s| !s.risk_factors.is_empty())
                    .map(|s| AtRiskStudent {
                        student_id: s.id,
                        risk_factors: s.risk_factors.clone(),
                    })
                    .collect(),
            },
            students: members
                .iter()
                .map(|s| StudentAnalyticsRow {
                    student_id: s.id,
                    full_name: s.full_name.clone(),
                    attendance_rate: Some(s.attendance),
                    participation_average: Some(s.participation),
                    session_counts: {
                        let present = ((s.attendance * 20.0).round() as u32).min(20);
                        SessionCounts {
                            total: 20,
                            present,
                            absent: 20 - present,
                        }
                    },
                })
                .collect(),
        })
    }
}

#[async_trait]
impl ParticipationSeriesProvider for FakeProvider {
    async fn participation_series(
        &self,
        student_id: Uuid,
    ) -> ProviderResult<Vec<ParticipationRecord>> {
        Ok(self.student(student_id, DataSource::ParticipationSeries)?.series)
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 3, 16, 8, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
