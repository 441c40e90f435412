//! Class-level alert orchestration.
//!
//! ```text
//!   MISS ──► FETCHING ──► CACHED(ttl) ──► EXPIRED ──► MISS
//!              │
//!              ├─ class summary (fatal on failure)
//!              ├─ hydrate every student concurrently
//!              └─ four rules per student
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cache::{AlertsCache, Clock, SystemClock};
use crate::config::Config;
use crate::error::{AlertsError, AlertsResult};
use crate::hydrator::{self, hydrate_context};
use crate::insights::{self, StudentInsights};
use crate::models::{ClassRef, DataSource, DateRange, StudentAlert, StudentAlertsResult};
use crate::provider::{MetricProvider, ParticipationSeriesProvider};
use crate::rules::RuleSet;

/// Exam results pulled for a single-student analysis.
const ANALYSIS_RESULTS_LIMIT: u32 = 200;

#[derive(Debug, Clone, Default)]
pub struct AlertsOptions {
    pub class_name: Option<String>,
    pub params: Option<DateRange>,
    pub force_refresh: bool,
}

pub struct AlertsService {
    metrics: Arc<dyn MetricProvider>,
    series: Arc<dyn ParticipationSeriesProvider>,
    cache: AlertsCache,
    rules: RuleSet,
    results_limit: u32,
}

impl AlertsService {
    pub fn new(
        metrics: Arc<dyn MetricProvider>,
        series: Arc<dyn ParticipationSeriesProvider>,
        config: &Config,
    ) -> Self {
        Self::with_clock(metrics, series, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        metrics: Arc<dyn MetricProvider>,
        series: Arc<dyn ParticipationSeriesProvider>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            metrics,
            series,
            cache: AlertsCache::new(config.cache_ttl(), clock),
            rules: RuleSet::new(config.incident_fallback),
            results_limit: config.results_limit,
        }
    }

    pub async fn get_alerts_for_class(
        &self,
        class_id: Uuid,
        options: &AlertsOptions,
    ) -> AlertsResult<StudentAlertsResult> {
        let range = options.params.unwrap_or_default();
        if range.is_inverted() {
            return Err(AlertsError::InvalidRange(range));
        }

        let key = AlertsCache::key(class_id, &range);
        if !options.force_refresh {
            if let Some(cached) = self.cache.get(&key, options.class_name.as_deref()) {
                debug!(class_id = %class_id, "Serving class alerts from cache");
                return Ok(cached);
            }
        }

        let result = self
            .evaluate_class(class_id, options.class_name.clone(), &range)
            .await?;
        self.cache
            .insert(key, options.class_name.clone(), result.clone());
        Ok(result)
    }

    /// Evaluates several classes concurrently. Results keep the input order; the
    /// first class whose summary fails aborts the batch.
    pub async fn get_alerts_for_classes(
        &self,
        classes: &[ClassRef],
        options: &AlertsOptions,
    ) -> AlertsResult<Vec<StudentAlertsResult>> {
        let evaluations = classes.iter().map(|class| {
            let options = AlertsOptions {
                class_name: class.class_name.clone(),
                ..options.clone()
            };
            async move { self.get_alerts_for_class(class.class_id, &options).await }
        });

        join_all(evaluations).await.into_iter().collect()
    }

    async fn evaluate_class(
        &self,
        class_id: Uuid,
        class_name: Option<String>,
        range: &DateRange,
    ) -> AlertsResult<StudentAlertsResult> {
        let summary = self
            .metrics
            .class_student_analytics(class_id, range)
            .await
            .map_err(|source| {
                error!(class_id = %class_id, error = %source, "Class analytics call failed");
                AlertsError::ClassAnalytics { class_id, source }
            })?;

        let period = summary.analytics_period;
        let evaluated_at = self.cache.now();

        let mut seen = HashSet::new();
        let student_ids: Vec<Uuid> = summary
            .students
            .iter()
            .map(|row| row.student_id)
            .filter(|id| seen.insert(*id))
            .collect();

        let contexts = join_all(student_ids.iter().map(|&student_id| {
            hydrate_context(
                self.metrics.as_ref(),
                self.series.as_ref(),
                student_id,
                period,
                summary.at_risk_entry(student_id).cloned(),
                self.results_limit,
            )
        }))
        .await;

        let alerts: Vec<StudentAlert> = contexts
            .iter()
            .flat_map(|context| self.rules.evaluate(context, evaluated_at))
            .collect();

        info!(
            class_id = %class_id,
            students = student_ids.len(),
            alerts = alerts.len(),
            "Evaluated class alerts"
        );

        Ok(StudentAlertsResult {
            class_id,
            class_name,
            alerts,
            evaluated_at,
            analytics_period: period,
            students_evaluated: student_ids.len(),
            student_ids,
        })
    }

    /// Runs the behavioral and academic analysis layers for one student. Missing
    /// sources degrade to empty series, like hydration does.
    pub async fn analyze_student(
        &self,
        student_id: Uuid,
        range: &DateRange,
    ) -> AlertsResult<StudentInsights> {
        if range.is_inverted() {
            return Err(AlertsError::InvalidRange(*range));
        }

        let (results, series) = tokio::join!(
            hydrator::recover(
                student_id,
                DataSource::StudentResults,
                self.metrics
                    .student_results(student_id, range, ANALYSIS_RESULTS_LIMIT),
            ),
            hydrator::recover(
                student_id,
                DataSource::ParticipationSeries,
                self.series.participation_series(student_id),
            ),
        );

        let participations = insights::within_range(series.unwrap_or_default(), range);
        let results = results.map(|r| r.items).unwrap_or_default();

        Ok(insights::build_insights(
            student_id,
            &participations,
            &results,
        ))
    }

    pub fn invalidate_cache(&self) {
        self.cache.clear();
        debug!("Alert cache cleared");
    }

    pub fn invalidate_cache_for_class(&self, class_id: Uuid, range: Option<&DateRange>) -> usize {
        let evicted = self.cache.invalidate_class(class_id, range);
        debug!(class_id = %class_id, evicted, "Invalidated class alerts");
        evicted
    }

    pub fn invalidate_cache_for_student(&self, student_id: Uuid) -> usize {
        let evicted = self.cache.invalidate_student(student_id);
        debug!(student_id = %student_id, evicted, "Invalidated alerts listing student");
        evicted
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::tests::record;
    use crate::models::{AlertType, ExamResult, Severity};
    use crate::risk::RiskFactor;
    use crate::testing::{FakeProvider, ManualClock};
    use chrono::{Duration, NaiveDate};

    fn service(provider: &Arc<FakeProvider>) -> (Arc<ManualClock>, AlertsService) {
        let clock = Arc::new(ManualClock::new());
        let service = AlertsService::with_clock(
            provider.clone(),
            provider.clone(),
            &Config::default(),
            clock.clone(),
        );
        (clock, service)
    }

    fn options(class_name: &str) -> AlertsOptions {
        AlertsOptions {
            class_name: Some(class_name.to_string()),
            ..Default::default()
        }
    }

    fn alert_set(result: &StudentAlertsResult) -> HashSet<(Uuid, AlertType, Severity)> {
        result
            .alerts
            .iter()
            .map(|a| (a.student_id, a.alert_type, a.severity))
            .collect()
    }

    fn exam(day: u32, points: f64) -> ExamResult {
        ExamResult {
            exam_date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            subject: Some("Maths".to_string()),
            points_obtained: Some(points),
            max_points: 20.0,
            is_absent: false,
        }
    }

    #[tokio::test]
    async fn evaluates_every_rule_across_the_roster() {
        let provider = Arc::new(FakeProvider::new());
        let absent = provider.add_student("Avery Lee", 0.58, 3.5, 10, Some(13.0));
        let quiet = provider.add_student("Jules Moreno", 0.9, 2.0, 6, Some(13.0));
        let slipping = provider.add_student("Kiara Patel", 0.95, 4.0, 12, Some(14.0));
        let disruptive = provider.add_student("Sam Okafor", 0.9, 4.0, 12, None);
        let fine = provider.add_student("Noa Levi", 0.98, 4.2, 12, Some(15.0));
        provider.set_results(slipping, vec![exam(2, 10.0), exam(9, 9.0), exam(16, 8.0)]);
        provider.set_risk_factors(disruptive, vec![RiskFactor::BehaviorIncidents { count: 5 }]);
        provider.set_results(fine, vec![exam(16, 15.0)]);

        let (_, service) = service(&provider);
        let result = service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap();

        let expected: HashSet<_> = [
            (absent, AlertType::Attendance, Severity::High),
            (quiet, AlertType::Participation, Severity::Medium),
            (slipping, AlertType::GradeDrop, Severity::High),
            (disruptive, AlertType::Behavior, Severity::High),
        ]
        .into_iter()
        .collect();
        assert_eq!(alert_set(&result), expected);
        assert_eq!(result.students_evaluated, 5);
        assert!(result.alerts.iter().all(|a| result.lists_student(a.student_id)));
        assert_eq!(result.alerts_for(fine).count(), 0);
        assert_eq!(result.class_name.as_deref(), Some("5B"));
    }

    #[tokio::test]
    async fn repeated_call_within_ttl_is_served_from_cache() {
        let provider = Arc::new(FakeProvider::new());
        provider.add_student("Avery Lee", 0.5, 3.0, 10, None);
        let (clock, service) = service(&provider);

        let first = service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap();
        clock.advance(Duration::seconds(30));
        let second = service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.class_calls(), 1);
    }

    #[tokio::test]
    async fn expired_or_forced_calls_refetch() {
        let provider = Arc::new(FakeProvider::new());
        provider.add_student("Avery Lee", 0.5, 3.0, 10, None);
        let (clock, service) = service(&provider);

        let first = service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap();
        clock.advance(Duration::seconds(61));
        let second = service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap();
        assert_eq!(provider.class_calls(), 2);
        assert!(second.evaluated_at > first.evaluated_at);

        let forced = AlertsOptions {
            force_refresh: true,
            ..options("5B")
        };
        service
            .get_alerts_for_class(provider.class_id, &forced)
            .await
            .unwrap();
        assert_eq!(provider.class_calls(), 3);
    }

    #[tokio::test]
    async fn different_label_bypasses_cache() {
        let provider = Arc::new(FakeProvider::new());
        provider.add_student("Avery Lee", 0.5, 3.0, 10, None);
        let (_, service) = service(&provider);

        service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap();
        let relabeled = service
            .get_alerts_for_class(provider.class_id, &options("5B - Maths"))
            .await
            .unwrap();

        assert_eq!(provider.class_calls(), 2);
        assert_eq!(relabeled.class_name.as_deref(), Some("5B - Maths"));
    }

    #[tokio::test]
    async fn student_invalidation_evicts_and_refetches() {
        let provider = Arc::new(FakeProvider::new());
        let student = provider.add_student("Avery Lee", 0.9, 3.0, 10, None);
        let (_, service) = service(&provider);

        let before = service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap();
        assert!(before.alerts.is_empty());

        provider.set_attendance(student, 0.5);
        assert_eq!(service.invalidate_cache_for_student(student), 1);
        assert_eq!(service.cached_entries(), 0);

        let after = service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap();
        assert_eq!(provider.class_calls(), 2);
        assert_eq!(after.alerts.len(), 1);
        assert_eq!(after.alerts[0].alert_type, AlertType::Attendance);
    }

    #[tokio::test]
    async fn class_and_global_invalidation() {
        let provider = Arc::new(FakeProvider::new());
        provider.add_student("Avery Lee", 0.9, 3.0, 10, None);
        let (_, service) = service(&provider);

        service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap();
        assert_eq!(service.invalidate_cache_for_class(provider.class_id, None), 1);

        service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap();
        service.invalidate_cache();
        assert_eq!(service.cached_entries(), 0);
        assert_eq!(service.purge_expired(), 0);
    }

    #[tokio::test]
    async fn failed_participation_call_only_suppresses_that_alert() {
        let provider = Arc::new(FakeProvider::new());
        let student = provider.add_student("Avery Lee", 0.55, 1.0, 10, None);
        provider.fail(student, DataSource::ParticipationAverage);
        let (_, service) = service(&provider);

        let result = service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap();

        let types: HashSet<AlertType> = result.alerts.iter().map(|a| a.alert_type).collect();
        assert!(types.contains(&AlertType::Attendance));
        assert!(!types.contains(&AlertType::Participation));
    }

    #[tokio::test]
    async fn class_summary_failure_is_fatal_and_not_cached() {
        let provider = Arc::new(FakeProvider::new());
        provider.add_student("Avery Lee", 0.5, 1.0, 10, None);
        provider.fail_class(provider.class_id);
        let (_, service) = service(&provider);

        let err = service
            .get_alerts_for_class(provider.class_id, &options("5B"))
            .await
            .unwrap_err();

        assert!(matches!(err, AlertsError::ClassAnalytics { class_id, .. } if class_id == provider.class_id));
        assert_eq!(service.cached_entries(), 0);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected_before_fetching() {
        let provider = Arc::new(FakeProvider::new());
        let (_, service) = service(&provider);
        let options = AlertsOptions {
            params: Some(DateRange::new(
                NaiveDate::from_ymd_opt(2026, 3, 1),
                NaiveDate::from_ymd_opt(2026, 1, 1),
            )),
            ..Default::default()
        };

        let err = service
            .get_alerts_for_class(provider.class_id, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, AlertsError::InvalidRange(_)));
        assert_eq!(provider.class_calls(), 0);
    }

    #[tokio::test]
    async fn evaluates_classes_in_input_order() {
        let provider = Arc::new(FakeProvider::new());
        let other_class = Uuid::new_v4();
        provider.add_student("Avery Lee", 0.5, 3.0, 10, None);
        let other = provider.add_student_to(other_class, "Jules Moreno", 0.9, 3.0, 10, None);
        let (_, service) = service(&provider);

        let classes = vec![
            ClassRef {
                class_id: other_class,
                class_name: Some("4A".to_string()),
            },
            ClassRef {
                class_id: provider.class_id,
                class_name: Some("5B".to_string()),
            },
        ];
        let results = service
            .get_alerts_for_classes(&classes, &AlertsOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].class_id, other_class);
        assert_eq!(results[0].student_ids, vec![other]);
        assert!(results[0].alerts.is_empty());
        assert_eq!(results[1].class_name.as_deref(), Some("5B"));
        assert_eq!(results[1].alerts.len(), 1);
        assert_eq!(service.cached_entries(), 2);
    }

    #[tokio::test]
    async fn one_failing_class_fails_the_batch() {
        let provider = Arc::new(FakeProvider::new());
        let broken = Uuid::new_v4();
        provider.fail_class(broken);
        let (_, service) = service(&provider);

        let classes = vec![
            ClassRef {
                class_id: provider.class_id,
                class_name: None,
            },
            ClassRef {
                class_id: broken,
                class_name: None,
            },
        ];
        let err = service
            .get_alerts_for_classes(&classes, &AlertsOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AlertsError::ClassAnalytics { class_id, .. } if class_id == broken));
    }

    #[tokio::test]
    async fn analyzes_a_single_student() {
        let provider = Arc::new(FakeProvider::new());
        let student = provider.add_student("Avery Lee", 0.9, 3.0, 10, None);
        provider.set_results(
            student,
            vec![exam(2, 14.0), exam(5, 12.0), exam(9, 6.0), exam(12, 4.0)],
        );
        provider.set_series(
            student,
            vec![
                record(8, true, Some(16.0), true, true),
                record(6, true, Some(15.0), true, true),
                record(4, true, Some(5.0), false, false),
                record(2, true, Some(4.0), false, false),
            ],
        );
        provider.fail(student, DataSource::StudentProfile);
        let (_, service) = service(&provider);

        let insights = service
            .analyze_student(student, &DateRange::default())
            .await
            .unwrap();

        assert_eq!(insights.student_id, student);
        assert_eq!(insights.features.total_sessions, 4);
        assert!(!insights.behavioral_alerts.is_empty());
        assert_eq!(insights.progress.overall_trend, crate::models::Trend::Declining);
        assert!(!insights.academic_risks.is_empty());
    }

    #[tokio::test]
    async fn analysis_tolerates_missing_series() {
        let provider = Arc::new(FakeProvider::new());
        let student = provider.add_student("Avery Lee", 0.9, 3.0, 10, None);
        provider.fail(student, DataSource::ParticipationSeries);
        let (_, service) = service(&provider);

        let insights = service
            .analyze_student(student, &DateRange::default())
            .await
            .unwrap();
        assert_eq!(insights.features.total_sessions, 0);
    }
}
