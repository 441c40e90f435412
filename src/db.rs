use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::models::{
    AnalyticsPeriod, AtRiskStudent, AttendanceRate, ClassRef, ClassStatistics,
    ClassStudentAnalytics, DateRange, ExamResult, ParticipationAverage, ParticipationRecord,
    ProfileAnalytics, SessionCounts, StudentAnalyticsRow, StudentProfile, StudentResults,
};
use crate::provider::{MetricProvider, ParticipationSeriesProvider, ProviderResult};
use crate::risk::{self, RiskFactor, BEHAVIOR_WINDOW_DAYS};
use crate::rules::{ATTENDANCE_THRESHOLD, PARTICIPATION_THRESHOLD};

/// Analytics period used when the caller gives no start date.
pub const DEFAULT_PERIOD_DAYS: i64 = 30;

/// Stored participation levels are /20; the provider reports a 0-5 rating.
const PARTICIPATION_RATING_DIVISOR: f64 = 4.0;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed metric provider over the `classroom_alerts` schema.
#[derive(Clone)]
pub struct PgMetricProvider {
    pool: PgPool,
}

impl PgMetricProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_student(&self, student_id: Uuid) -> ProviderResult<()> {
        sqlx::query("SELECT id FROM classroom_alerts.students WHERE id = $1")
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("student {student_id}")))
    }
}

#[async_trait]
impl MetricProvider for PgMetricProvider {
    async fn attendance_rate(
        &self,
        student_id: Uuid,
        range: &DateRange,
    ) -> ProviderResult<AttendanceRate> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE is_present) AS attended
            FROM classroom_alerts.participations
            WHERE student_id = $1
              AND ($2::date IS NULL OR marked_at::date >= $2)
              AND ($3::date IS NULL OR marked_at::date <= $3)
            "#,
        )
        .bind(student_id)
        .bind(range.start_date)
        .bind(range.end_date)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        let attended: i64 = row.get("attended");
        if total == 0 {
            return Err(ProviderError::NotFound(format!(
                "sessions for student {student_id}"
            )));
        }

        Ok(AttendanceRate {
            attendance_rate: attended as f64 / total as f64,
            total_sessions: total as u32,
            attended_sessions: attended as u32,
        })
    }

    async fn participation_average(
        &self,
        student_id: Uuid,
        range: &DateRange,
    ) -> ProviderResult<ParticipationAverage> {
        let row = sqlx::query(
            r#"
            SELECT AVG(participation_level)::float8 AS avg_level,
                   COUNT(participation_level) AS rated,
                   COUNT(*) AS present
            FROM classroom_alerts.participations
            WHERE student_id = $1
              AND is_present
              AND ($2::date IS NULL OR marked_at::date >= $2)
              AND ($3::date IS NULL OR marked_at::date <= $3)
            "#,
        )
        .bind(student_id)
        .bind(range.start_date)
        .bind(range.end_date)
        .fetch_one(&self.pool)
        .await?;

        let avg_level: Option<f64> = row.get("avg_level");
        let rated: i64 = row.get("rated");
        let present: i64 = row.get("present");
        let avg_level = avg_level.ok_or_else(|| {
            ProviderError::NotFound(format!("participation for student {student_id}"))
        })?;

        Ok(ParticipationAverage {
            participation_average: avg_level / PARTICIPATION_RATING_DIVISOR,
            total_sessions_with_participation: rated as u32,
            coverage_percentage: if present == 0 {
                0.0
            } else {
                rated as f64 / present as f64 * 100.0
            },
        })
    }

    async fn student_results(
        &self,
        student_id: Uuid,
        range: &DateRange,
        limit: u32,
    ) -> ProviderResult<StudentResults> {
        let rows = sqlx::query(
            r#"
            SELECT subject, exam_date, points_obtained, max_points, is_absent
            FROM classroom_alerts.exam_results
            WHERE student_id = $1
              AND ($2::date IS NULL OR exam_date >= $2)
              AND ($3::date IS NULL OR exam_date <= $3)
            ORDER BY exam_date DESC
            LIMIT $4
            "#,
        )
        .bind(student_id)
        .bind(range.start_date)
        .bind(range.end_date)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(|row| ExamResult {
                exam_date: row.get("exam_date"),
                subject: row.get("subject"),
                points_obtained: row.get("points_obtained"),
                max_points: row.get("max_points"),
                is_absent: row.get("is_absent"),
            })
            .collect();

        Ok(StudentResults { items })
    }

    async fn student_profile(&self, student_id: Uuid) -> ProviderResult<StudentProfile> {
        self.ensure_student(student_id).await?;

        let row = sqlx::query(
            r#"
            SELECT
                (SELECT AVG(points_obtained / max_points * 20)::float8
                 FROM classroom_alerts.exam_results
                 WHERE student_id = $1 AND NOT is_absent AND points_obtained IS NOT NULL)
                    AS average_grade,
                (SELECT AVG(CASE WHEN is_present THEN 1 ELSE 0 END)::float8
                 FROM classroom_alerts.participations
                 WHERE student_id = $1)
                    AS attendance_rate,
                (SELECT (AVG(participation_level) / $2)::float8
                 FROM classroom_alerts.participations
                 WHERE student_id = $1 AND is_present)
                    AS participation_average
            "#,
        )
        .bind(student_id)
        .bind(PARTICIPATION_RATING_DIVISOR)
        .fetch_one(&self.pool)
        .await?;

        Ok(StudentProfile {
            analytics: ProfileAnalytics {
                average_grade: row.get("average_grade"),
                attendance_rate: row.get("attendance_rate"),
                participation_average: row.get("participation_average"),
            },
        })
    }

    async fn class_student_analytics(
        &self,
        class_id: Uuid,
        range: &DateRange,
    ) -> ProviderResult<ClassStudentAnalytics> {
        if class_name(&self.pool, class_id).await?.is_none() {
            return Err(ProviderError::NotFound(format!("class {class_id}")));
        }

        let period = AnalyticsPeriod {
            start_date: range
                .start_date
                .unwrap_or_else(|| risk::cutoff_date(DEFAULT_PERIOD_DAYS)),
            end_date: range.end_date.unwrap_or_else(|| Utc::now().date_naive()),
        };
        let incidents_since = risk::horizon_start(Utc::now(), BEHAVIOR_WINDOW_DAYS);

        let rows = sqlx::query(
            r#"
            SELECT s.id, s.full_name, s.risk_flags,
                   COUNT(p.id) AS total,
                   COUNT(p.id) FILTER (WHERE p.is_present) AS present,
                   (AVG(p.participation_level) FILTER (WHERE p.is_present) / $4)::float8
                       AS participation_average,
                   (SELECT COUNT(*)
                    FROM classroom_alerts.behavior_incidents b
                    WHERE b.student_id = s.id AND b.occurred_at >= $5) AS incidents
            FROM classroom_alerts.students s
            LEFT JOIN classroom_alerts.participations p
                   ON p.student_id = s.id
                  AND p.marked_at::date BETWEEN $2 AND $3
            WHERE s.class_id = $1
            GROUP BY s.id, s.full_name, s.risk_flags
            ORDER BY s.full_name
            "#,
        )
        .bind(class_id)
        .bind(period.start_date)
        .bind(period.end_date)
        .bind(PARTICIPATION_RATING_DIVISOR)
        .bind(incidents_since)
        .fetch_all(&self.pool)
        .await?;

        let mut students = Vec::with_capacity(rows.len());
        let mut at_risk_students = Vec::new();

        for row in rows {
            let student_id: Uuid = row.get("id");
            let total: i64 = row.get("total");
            let present: i64 = row.get("present");
            let participation_average: Option<f64> = row.get("participation_average");
            let incidents: i64 = row.get("incidents");
            let risk_flags: Vec<String> = row.get("risk_flags");
            let attendance_rate = (total > 0).then(|| present as f64 / total as f64);

            let mut risk_factors =
                shortlist_factors(attendance_rate, participation_average, incidents);
            risk_factors.extend(risk_flags.iter().map(|flag| RiskFactor::parse(flag)));
            if !risk_factors.is_empty() {
                at_risk_students.push(AtRiskStudent {
                    student_id,
                    risk_factors,
                });
            }

            students.push(StudentAnalyticsRow {
                student_id,
                full_name: row.get("full_name"),
                attendance_rate,
                participation_average,
                session_counts: SessionCounts {
                    total: total as u32,
                    present: present as u32,
                    absent: (total - present) as u32,
                },
            });
        }

        Ok(ClassStudentAnalytics {
            analytics_period: period,
            class_statistics: ClassStatistics { at_risk_students },
            students,
        })
    }
}

#[async_trait]
impl ParticipationSeriesProvider for PgMetricProvider {
    async fn participation_series(
        &self,
        student_id: Uuid,
    ) -> ProviderResult<Vec<ParticipationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT is_present, participation_level, homework_done, camera_enabled, marked_at
            FROM classroom_alerts.participations
            WHERE student_id = $1
            ORDER BY marked_at
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ParticipationRecord {
                is_present: row.get("is_present"),
                participation_level: row.get("participation_level"),
                homework_done: row.get("homework_done"),
                camera_enabled: row.get("camera_enabled"),
                marked_at: row.get("marked_at"),
            })
            .collect())
    }
}

/// Coarse provider-side shortlist tags for one student.
fn shortlist_factors(
    attendance_rate: Option<f64>,
    participation_average: Option<f64>,
    incidents: i64,
) -> Vec<RiskFactor> {
    let mut factors = Vec::new();
    if let Some(rate) = attendance_rate.filter(|r| *r < ATTENDANCE_THRESHOLD) {
        factors.push(RiskFactor::LowAttendance { rate: Some(rate) });
    }
    if let Some(average) = participation_average.filter(|a| *a < PARTICIPATION_THRESHOLD) {
        factors.push(RiskFactor::LowParticipation {
            average: Some(average),
        });
    }
    if incidents > 0 {
        factors.push(RiskFactor::BehaviorIncidents {
            count: incidents as u32,
        });
    }
    factors
}

pub async fn class_name(pool: &PgPool, class_id: Uuid) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT name FROM classroom_alerts.classes WHERE id = $1")
        .bind(class_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("name")))
}

pub async fn list_classes(pool: &PgPool) -> anyhow::Result<Vec<ClassRef>> {
    let rows = sqlx::query("SELECT id, name FROM classroom_alerts.classes ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| ClassRef {
            class_id: row.get("id"),
            class_name: Some(row.get("name")),
        })
        .collect())
}

pub async fn student_names(
    pool: &PgPool,
) -> anyhow::Result<std::collections::HashMap<Uuid, String>> {
    let rows = sqlx::query("SELECT id, full_name FROM classroom_alerts.students")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get("id"), row.get("full_name")))
        .collect())
}

async fn upsert_student(
    pool: &PgPool,
    class_name: &str,
    full_name: &str,
    email: &str,
) -> anyhow::Result<Uuid> {
    let class_id: Uuid = sqlx::query(
        r#"
        INSERT INTO classroom_alerts.classes (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(class_name)
    .fetch_one(pool)
    .await?
    .get("id");

    let student_id: Uuid = sqlx::query(
        r#"
        INSERT INTO classroom_alerts.students (id, class_id, full_name, email)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name, class_id = EXCLUDED.class_id
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(class_id)
    .bind(full_name)
    .bind(email)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(student_id)
}

async fn insert_participation(
    pool: &PgPool,
    student_id: Uuid,
    record: &ParticipationRecord,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO classroom_alerts.participations
        (id, student_id, marked_at, is_present, participation_level, homework_done, camera_enabled, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(record.marked_at)
    .bind(record.is_present)
    .bind(record.participation_level)
    .bind(record.homework_done)
    .bind(record.camera_enabled)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn insert_result(
    pool: &PgPool,
    student_id: Uuid,
    result: &ExamResult,
    source_key: &str,
) -> anyhow::Result<bool> {
    let outcome = sqlx::query(
        r#"
        INSERT INTO classroom_alerts.exam_results
        (id, student_id, subject, exam_date, points_obtained, max_points, is_absent, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(&result.subject)
    .bind(result.exam_date)
    .bind(result.points_obtained)
    .bind(result.max_points)
    .bind(result.is_absent)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    // (name, email, attendance pattern, participation early, participation late, grades)
    let students = [
        (
            "Avery Lee",
            "avery.lee@school.example",
            [true, false, true, false, false, true, false, true],
            12.0,
            11.0,
            [12.0, 11.0, 12.0, 11.0],
            0,
        ),
        (
            "Jules Moreno",
            "jules.moreno@school.example",
            [true; 8],
            16.0,
            6.0,
            [15.0, 14.0, 10.0, 8.0],
            4,
        ),
        (
            "Kiara Patel",
            "kiara.patel@school.example",
            [true; 8],
            17.0,
            17.0,
            [16.0, 17.0, 15.0, 18.0],
            0,
        ),
    ];

    let today = Utc::now();
    for (name, email, attendance, early, late, grades, incidents) in students {
        let student_id = upsert_student(pool, "5B", name, email).await?;

        for (i, is_present) in attendance.iter().enumerate() {
            let days_ago = 26 - (i as i64) * 3;
            let level = if i < attendance.len() / 2 { early } else { late };
            let record = ParticipationRecord {
                is_present: *is_present,
                participation_level: is_present.then_some(level),
                homework_done: *is_present && level >= 10.0,
                camera_enabled: *is_present && level >= 8.0,
                marked_at: today - Duration::days(days_ago),
            };
            insert_participation(pool, student_id, &record, &format!("seed-{email}-p{i}")).await?;
        }

        for (i, grade) in grades.iter().enumerate() {
            let exam_date: NaiveDate = (today - Duration::days(24 - (i as i64) * 7)).date_naive();
            let result = ExamResult {
                exam_date,
                subject: Some(if i % 2 == 0 { "Maths" } else { "History" }.to_string()),
                points_obtained: Some(*grade),
                max_points: 20.0,
                is_absent: false,
            };
            insert_result(pool, student_id, &result, &format!("seed-{email}-r{i}")).await?;
        }

        for i in 0..incidents {
            let occurred_at: DateTime<Utc> = today - Duration::days(2 + i);
            sqlx::query(
                r#"
                INSERT INTO classroom_alerts.behavior_incidents
                (id, student_id, occurred_at, note, source_key)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (source_key) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(student_id)
            .bind(occurred_at)
            .bind("Disrupted class activity")
            .bind(format!("seed-{email}-i{i}"))
            .execute(pool)
            .await
            .context("failed to insert seed incident")?;
        }
    }

    sqlx::query(
        r#"
        UPDATE classroom_alerts.students
        SET risk_flags = $2
        WHERE email = $1
        "#,
    )
    .bind("avery.lee@school.example")
    .bind(vec!["Frequent absences".to_string(), "Missed make-up exam".to_string()])
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn import_participations(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        class_name: String,
        full_name: String,
        email: String,
        marked_at: DateTime<Utc>,
        is_present: bool,
        participation_level: Option<f64>,
        homework_done: bool,
        camera_enabled: bool,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let student_id = upsert_student(pool, &row.class_name, &row.full_name, &row.email).await?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let record = ParticipationRecord {
            is_present: row.is_present,
            participation_level: row.participation_level,
            homework_done: row.homework_done,
            camera_enabled: row.camera_enabled,
            marked_at: row.marked_at,
        };

        if insert_participation(pool, student_id, &record, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_results(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        class_name: String,
        full_name: String,
        email: String,
        subject: Option<String>,
        exam_date: NaiveDate,
        points_obtained: Option<f64>,
        max_points: f64,
        is_absent: bool,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let student_id = upsert_student(pool, &row.class_name, &row.full_name, &row.email).await?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let exam = ExamResult {
            exam_date: row.exam_date,
            subject: row.subject,
            points_obtained: row.points_obtained,
            max_points: row.max_points,
            is_absent: row.is_absent,
        };

        if insert_result(pool, student_id, &exam, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}
