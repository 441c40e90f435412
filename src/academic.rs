//! Academic analytics over exam results. Grades are normalized to /20.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{ExamResult, Recommendation, Severity, Trend};

const MIN_SUBJECT_TREND_RESULTS: usize = 3;
const SLOPE_DEADBAND: f64 = 0.5;
const PROGRESS_DEADBAND: f64 = 1.0;
const MAX_SUBJECT_DEVIATION: f64 = 5.0;
const STRONG_SUBJECT_AVERAGE: f64 = 12.0;
const WEAK_SUBJECT_AVERAGE: f64 = 10.0;
const MAX_MILESTONES: usize = 5;
const DEFAULT_SUBJECT: &str = "General";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectAnalysis {
    pub subject: String,
    pub average: f64,
    pub exam_count: usize,
    pub trend: Trend,
    pub consistency: f64,
    pub last_grade: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcademicPerformance {
    pub subjects: Vec<SubjectAnalysis>,
    pub overall_average: f64,
    pub consistency_score: f64,
    pub strongest_subjects: Vec<String>,
    pub weakest_subjects: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    Achievement,
    Challenge,
    Improvement,
    Decline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub date: NaiveDate,
    pub kind: MilestoneKind,
    pub grade: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcademicProgress {
    pub overall_trend: Trend,
    pub progress_rate: f64,
    pub milestones: Vec<Milestone>,
}

impl Default for AcademicProgress {
    fn default() -> Self {
        Self {
            overall_trend: Trend::Stable,
            progress_rate: 0.0,
            milestones: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcademicRiskKind {
    GlobalDecline,
    SubjectDifficulty,
    Inconsistency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcademicRisk {
    pub kind: AcademicRiskKind,
    pub subject: Option<String>,
    pub severity: Severity,
    pub description: String,
    pub actions: Vec<String>,
}

/// Non-absent results as `(date, grade/20)`, oldest first.
fn graded(results: &[ExamResult]) -> Vec<(NaiveDate, f64)> {
    let mut grades: Vec<(NaiveDate, f64)> = results
        .iter()
        .filter_map(|r| r.normalized_grade().map(|g| (r.exam_date, g)))
        .collect();
    grades.sort_by_key(|(date, _)| *date);
    grades
}

pub fn analyze_academic_performance(results: &[ExamResult]) -> AcademicPerformance {
    let mut by_subject: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut ordered: Vec<&ExamResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.exam_date);

    for result in ordered {
        if let Some(grade) = result.normalized_grade() {
            let subject = result
                .subject
                .clone()
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
            by_subject.entry(subject).or_default().push(grade);
        }
    }

    if by_subject.is_empty() {
        return AcademicPerformance::default();
    }

    let subjects: Vec<SubjectAnalysis> = by_subject
        .into_iter()
        .map(|(subject, grades)| analyze_subject(subject, &grades))
        .collect();

    let exam_total: usize = subjects.iter().map(|s| s.exam_count).sum();
    let overall_average = subjects
        .iter()
        .map(|s| s.average * s.exam_count as f64)
        .sum::<f64>()
        / exam_total as f64;

    let averages: Vec<f64> = subjects.iter().map(|s| s.average).collect();
    let consistency_score =
        (1.0 - std_dev(&averages).min(MAX_SUBJECT_DEVIATION) / MAX_SUBJECT_DEVIATION).max(0.0);

    let mut ranked: Vec<&SubjectAnalysis> = subjects.iter().collect();
    ranked.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let strongest_subjects = ranked
        .iter()
        .filter(|s| s.average >= STRONG_SUBJECT_AVERAGE)
        .map(|s| s.subject.clone())
        .collect();
    let weakest_subjects = ranked
        .iter()
        .rev()
        .filter(|s| s.average < WEAK_SUBJECT_AVERAGE)
        .map(|s| s.subject.clone())
        .collect();

    AcademicPerformance {
        subjects,
        overall_average,
        consistency_score,
        strongest_subjects,
        weakest_subjects,
    }
}

fn analyze_subject(subject: String, grades: &[f64]) -> SubjectAnalysis {
    let average = mean(grades);
    let trend = if grades.len() >= MIN_SUBJECT_TREND_RESULTS {
        let slope = regression_slope(grades);
        if slope > SLOPE_DEADBAND {
            Trend::Improving
        } else if slope < -SLOPE_DEADBAND {
            Trend::Declining
        } else {
            Trend::Stable
        }
    } else {
        Trend::Stable
    };
    let consistency = if average > 0.0 {
        (1.0 - std_dev(grades) / average).max(0.0)
    } else {
        0.0
    };

    SubjectAnalysis {
        subject,
        average,
        exam_count: grades.len(),
        trend,
        consistency,
        last_grade: grades.last().copied().unwrap_or(0.0),
    }
}

pub fn calculate_academic_progress(results: &[ExamResult]) -> AcademicProgress {
    let grades = graded(results);
    if grades.len() < 2 {
        return AcademicProgress::default();
    }

    let values: Vec<f64> = grades.iter().map(|(_, g)| *g).collect();
    let (first_half, second_half) = values.split_at(values.len() / 2);
    let delta = mean(second_half) - mean(first_half);
    let overall_trend = if delta > PROGRESS_DEADBAND {
        Trend::Improving
    } else if delta < -PROGRESS_DEADBAND {
        Trend::Declining
    } else {
        Trend::Stable
    };

    let first = values[0];
    let last = values[values.len() - 1];
    let progress_rate = if first == 0.0 {
        0.0
    } else {
        (last - first) / first
    };

    AcademicProgress {
        overall_trend,
        progress_rate,
        milestones: detect_milestones(&grades),
    }
}

fn detect_milestones(grades: &[(NaiveDate, f64)]) -> Vec<Milestone> {
    let mut milestones = Vec::new();

    for window in grades.windows(3) {
        let (prev, (date, cur), next) = (window[0].1, window[1], window[2].1);

        if cur > prev && cur > next && cur >= 15.0 {
            milestones.push(Milestone {
                date,
                kind: MilestoneKind::Achievement,
                grade: cur,
                description: format!("Peak result of {cur:.1}/20"),
            });
        }
        if cur < prev && cur < next && cur <= 8.0 {
            milestones.push(Milestone {
                date,
                kind: MilestoneKind::Challenge,
                grade: cur,
                description: format!("Low point of {cur:.1}/20"),
            });
        }

        let jump = cur - prev;
        if jump >= 4.0 {
            milestones.push(Milestone {
                date,
                kind: MilestoneKind::Improvement,
                grade: cur,
                description: format!("Gained {jump:.1} points"),
            });
        } else if jump <= -4.0 {
            milestones.push(Milestone {
                date,
                kind: MilestoneKind::Decline,
                grade: cur,
                description: format!("Lost {:.1} points", -jump),
            });
        }
    }

    let skip = milestones.len().saturating_sub(MAX_MILESTONES);
    milestones.split_off(skip)
}

pub fn detect_academic_risks(
    performance: &AcademicPerformance,
    progress: &AcademicProgress,
) -> Vec<AcademicRisk> {
    let mut risks = Vec::new();

    if progress.overall_trend == Trend::Declining && progress.progress_rate < -0.3 {
        risks.push(AcademicRisk {
            kind: AcademicRiskKind::GlobalDecline,
            subject: None,
            severity: if progress.progress_rate < -0.5 {
                Severity::High
            } else {
                Severity::Medium
            },
            description: format!(
                "Results fell {:.0}% over the period",
                -progress.progress_rate * 100.0
            ),
            actions: vec![
                "Schedule a one-to-one review meeting".to_string(),
                "Inform the family and the class council".to_string(),
                "Set short-term recovery goals".to_string(),
            ],
        });
    }

    for subject in performance.subjects.iter().filter(|s| s.average < 8.0) {
        risks.push(AcademicRisk {
            kind: AcademicRiskKind::SubjectDifficulty,
            subject: Some(subject.subject.clone()),
            severity: if subject.average < 5.0 {
                Severity::High
            } else {
                Severity::Medium
            },
            description: format!(
                "Average of {:.1}/20 in {}",
                subject.average, subject.subject
            ),
            actions: vec![
                format!("Offer targeted support sessions in {}", subject.subject),
                "Revisit prerequisite notions with adapted exercises".to_string(),
            ],
        });
    }

    if !performance.subjects.is_empty() && performance.consistency_score < 0.6 {
        risks.push(AcademicRisk {
            kind: AcademicRiskKind::Inconsistency,
            subject: None,
            severity: if performance.consistency_score < 0.4 {
                Severity::High
            } else {
                Severity::Medium
            },
            description: format!(
                "Uneven results across subjects (consistency {:.2})",
                performance.consistency_score
            ),
            actions: vec![
                "Identify the subjects driving the gap".to_string(),
                "Balance study time across subjects".to_string(),
            ],
        });
    }

    risks
}

pub fn generate_academic_recommendations(
    performance: &AcademicPerformance,
    progress: &AcademicProgress,
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    for name in &performance.weakest_subjects {
        let average = performance
            .subjects
            .iter()
            .find(|s| &s.subject == name)
            .map(|s| s.average)
            .unwrap_or(0.0);
        recommendations.push(Recommendation {
            category: "academic_support".to_string(),
            priority: if average < 8.0 {
                Severity::High
            } else {
                Severity::Medium
            },
            title: format!("Remediation in {name}"),
            description: format!("Average of {average:.1}/20"),
            actions: vec![
                "Provide graded practice exercises".to_string(),
                "Check understanding after each new chapter".to_string(),
            ],
        });
    }

    if progress.overall_trend == Trend::Declining {
        recommendations.push(Recommendation {
            category: "follow_up".to_string(),
            priority: Severity::High,
            title: "Follow up on declining results".to_string(),
            description: format!(
                "Progress rate {:+.0}% over the period",
                progress.progress_rate * 100.0
            ),
            actions: vec![
                "Review the most recent assessments with the student".to_string(),
                "Agree on a two-week improvement plan".to_string(),
            ],
        });
    }

    if !performance.subjects.is_empty() && performance.consistency_score < 0.6 {
        recommendations.push(Recommendation {
            category: "study_routine".to_string(),
            priority: Severity::Medium,
            title: "Build a regular study routine".to_string(),
            description: format!(
                "Consistency score {:.2}",
                performance.consistency_score
            ),
            actions: vec![
                "Plan short daily revision slots".to_string(),
                "Alternate subjects across the week".to_string(),
            ],
        });
    }

    if !performance.strongest_subjects.is_empty() {
        recommendations.push(Recommendation {
            category: "enrichment".to_string(),
            priority: Severity::Low,
            title: "Build on strengths".to_string(),
            description: format!("Strong in {}", performance.strongest_subjects.join(", ")),
            actions: vec![
                "Offer extension work in strong subjects".to_string(),
                "Invite the student to tutor peers".to_string(),
            ],
        });
    }

    recommendations
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Least-squares slope of `values` against their index.
fn regression_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
