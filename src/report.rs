use std::collections::HashMap;
use std::fmt::Write;

use uuid::Uuid;

use crate::models::{AlertType, Severity, StudentAlert, StudentAlertsResult};

#[derive(Debug, Clone, PartialEq)]
pub struct AlertTypeSummary {
    pub alert_type: AlertType,
    pub count: usize,
    pub high: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentAlertCount {
    pub student_id: Uuid,
    pub count: usize,
    pub worst: Severity,
}

pub fn summarize_by_type(alerts: &[StudentAlert]) -> Vec<AlertTypeSummary> {
    let mut map: HashMap<AlertType, (usize, usize)> = HashMap::new();

    for alert in alerts {
        let entry = map.entry(alert.alert_type).or_insert((0, 0));
        entry.0 += 1;
        if alert.severity == Severity::High {
            entry.1 += 1;
        }
    }

    let mut summaries: Vec<AlertTypeSummary> = map
        .into_iter()
        .map(|(alert_type, (count, high))| AlertTypeSummary {
            alert_type,
            count,
            high,
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.alert_type.as_str().cmp(b.alert_type.as_str()))
    });
    summaries
}

/// Students ordered by worst severity, then alert count.
pub fn rank_students(alerts: &[StudentAlert]) -> Vec<StudentAlertCount> {
    let mut map: HashMap<Uuid, StudentAlertCount> = HashMap::new();

    for alert in alerts {
        let entry = map.entry(alert.student_id).or_insert(StudentAlertCount {
            student_id: alert.student_id,
            count: 0,
            worst: alert.severity,
        });
        entry.count += 1;
        entry.worst = entry.worst.max(alert.severity);
    }

    let mut ranked: Vec<StudentAlertCount> = map.into_values().collect();
    ranked.sort_by(|a, b| {
        b.worst
            .cmp(&a.worst)
            .then_with(|| b.count.cmp(&a.count))
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    ranked
}

pub fn build_report(results: &[StudentAlertsResult], names: &HashMap<Uuid, String>) -> String {
    let mut output = String::new();
    let name_of = |id: &Uuid| names.get(id).cloned().unwrap_or_else(|| id.to_string());

    let _ = writeln!(output, "# Classroom Early Warning Report");

    if results.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "No classes evaluated.");
        return output;
    }

    for result in results {
        let label = result
            .class_name
            .clone()
            .unwrap_or_else(|| result.class_id.to_string());

        let _ = writeln!(output);
        let _ = writeln!(output, "## {label}");
        let _ = writeln!(
            output,
            "Period {} to {}, {} students evaluated at {}",
            result.analytics_period.start_date,
            result.analytics_period.end_date,
            result.students_evaluated,
            result.evaluated_at.format("%Y-%m-%d %H:%M UTC")
        );
        let _ = writeln!(output);
        let _ = writeln!(output, "### Alert Mix");

        let summaries = summarize_by_type(&result.alerts);
        if summaries.is_empty() {
            let _ = writeln!(output, "No alerts for this class.");
            continue;
        }
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {}: {} alerts ({} high)",
                summary.alert_type.as_str(),
                summary.count,
                summary.high
            );
        }

        let _ = writeln!(output);
        let _ = writeln!(output, "### Students To Follow Up");
        for ranked in rank_students(&result.alerts).iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({} alerts, worst {})",
                name_of(&ranked.student_id),
                ranked.count,
                ranked.worst.as_str()
            );
            for alert in result.alerts_for(ranked.student_id) {
                let _ = writeln!(
                    output,
                    "  - [{}] {}",
                    alert.severity.as_str(),
                    alert.message
                );
            }
        }
    }

    output
}
