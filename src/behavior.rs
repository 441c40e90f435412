//! Behavioral analytics over a raw participation series.
//!
//! Participation levels and the derived dimension scores are on a 0-20 scale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ParticipationRecord, Recommendation, Severity};

pub const MIN_TREND_RECORDS: usize = 4;
const STABLE_CHANGE_PERCENT: f64 = 10.0;
const SHARP_DROP_PERCENT: f64 = 20.0;
pub const LOW_PARTICIPATION_LEVEL: f64 = 8.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehavioralFeatures {
    pub total_sessions: usize,
    pub present_sessions: usize,
    pub rated_sessions: usize,
    pub attendance_ratio: f64,
    pub participation_level: f64,
    pub camera_usage_ratio: f64,
    pub homework_ratio: f64,
    pub attention_score: f64,
    pub cooperation_score: f64,
    pub autonomy_score: f64,
    pub dominant_behaviors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionTrend {
    pub direction: TrendDirection,
    pub change_percent: f64,
}

impl DimensionTrend {
    fn stable() -> Self {
        Self {
            direction: TrendDirection::Stable,
            change_percent: 0.0,
        }
    }

    fn between(before: Option<f64>, after: Option<f64>) -> Self {
        let (before, after) = match (before, after) {
            (Some(before), Some(after)) => (before, after),
            _ => return Self::stable(),
        };

        let change_percent = if before == 0.0 {
            if after > 0.0 {
                100.0
            } else {
                0.0
            }
        } else {
            (after - before) / before * 100.0
        };

        let direction = if change_percent.abs() < STABLE_CHANGE_PERCENT {
            TrendDirection::Stable
        } else if change_percent > 0.0 {
            TrendDirection::Up
        } else {
            TrendDirection::Down
        };

        Self {
            direction,
            change_percent,
        }
    }

    fn is_sharp_drop(&self) -> bool {
        self.direction == TrendDirection::Down && self.change_percent.abs() > SHARP_DROP_PERCENT
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralTrends {
    pub attention: DimensionTrend,
    pub participation: DimensionTrend,
    pub evolution: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehavioralAlertKind {
    LowAttendance,
    LowParticipation,
    BehaviorChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralAlert {
    pub kind: BehavioralAlertKind,
    pub severity: Severity,
    pub message: String,
}

pub fn analyze_behavioral_patterns(participations: &[ParticipationRecord]) -> BehavioralFeatures {
    if participations.is_empty() {
        return BehavioralFeatures::default();
    }

    let total = participations.len();
    let present: Vec<&ParticipationRecord> =
        participations.iter().filter(|p| p.is_present).collect();
    let levels: Vec<f64> = present
        .iter()
        .filter_map(|p| p.participation_level)
        .collect();

    let attendance_ratio = present.len() as f64 / total as f64;
    let participation_level = mean(&levels).unwrap_or(0.0);
    let camera_usage_ratio =
        participations.iter().filter(|p| p.camera_enabled).count() as f64 / total as f64;
    let homework_ratio = if present.is_empty() {
        0.0
    } else {
        present.iter().filter(|p| p.homework_done).count() as f64 / present.len() as f64
    };

    let mut features = BehavioralFeatures {
        total_sessions: total,
        present_sessions: present.len(),
        rated_sessions: levels.len(),
        attendance_ratio,
        participation_level,
        camera_usage_ratio,
        homework_ratio,
        attention_score: (participation_level + camera_usage_ratio * 20.0) / 2.0,
        cooperation_score: (participation_level + homework_ratio * 20.0) / 2.0,
        autonomy_score: homework_ratio * 20.0,
        dominant_behaviors: Vec::new(),
    };
    features.dominant_behaviors = dominant_behaviors(&features);
    features
}

fn dominant_behaviors(features: &BehavioralFeatures) -> Vec<String> {
    let mut labels = Vec::new();

    if features.rated_sessions > 0 {
        if features.participation_level >= 15.0 {
            labels.push("very participative".to_string());
        } else if features.participation_level <= LOW_PARTICIPATION_LEVEL {
            labels.push("low participation".to_string());
        }
    }

    if features.attendance_ratio >= 0.95 {
        labels.push("very regular".to_string());
    } else if features.attendance_ratio <= 0.8 {
        labels.push("frequent absences".to_string());
    }

    if labels.is_empty() {
        let label = if features.participation_level >= 10.0 {
            "active participant"
        } else {
            "observer"
        };
        labels.push(label.to_string());
    }

    labels
}

pub fn calculate_behavioral_trends(participations: &[ParticipationRecord]) -> BehavioralTrends {
    if participations.len() < MIN_TREND_RECORDS {
        return BehavioralTrends {
            attention: DimensionTrend::stable(),
            participation: DimensionTrend::stable(),
            evolution: "insufficient data".to_string(),
        };
    }

    let mut sorted = participations.to_vec();
    sorted.sort_by_key(|p| p.marked_at);
    let (first, second) = sorted.split_at(sorted.len() / 2);

    let attention = DimensionTrend::between(
        mean(&session_values(first, session_attention)),
        mean(&session_values(second, session_attention)),
    );
    let participation = DimensionTrend::between(
        mean(&session_values(first, session_participation)),
        mean(&session_values(second, session_participation)),
    );

    let evolution = describe_evolution(&[("attention", attention), ("participation", participation)]);

    BehavioralTrends {
        attention,
        participation,
        evolution,
    }
}

fn session_attention(record: &ParticipationRecord) -> Option<f64> {
    if !record.is_present {
        return None;
    }
    let camera = if record.camera_enabled { 20.0 } else { 0.0 };
    Some((record.participation_level.unwrap_or(0.0) + camera) / 2.0)
}

fn session_participation(record: &ParticipationRecord) -> Option<f64> {
    if record.is_present {
        record.participation_level
    } else {
        None
    }
}

fn session_values(
    records: &[ParticipationRecord],
    value: fn(&ParticipationRecord) -> Option<f64>,
) -> Vec<f64> {
    records.iter().filter_map(value).collect()
}

fn describe_evolution(dimensions: &[(&str, DimensionTrend)]) -> String {
    let parts: Vec<String> = dimensions
        .iter()
        .filter(|(_, trend)| trend.direction != TrendDirection::Stable)
        .map(|(name, trend)| {
            let word = match trend.direction {
                TrendDirection::Up => "improving",
                _ => "declining",
            };
            format!("{name} {word} ({:+.1}%)", trend.change_percent)
        })
        .collect();

    if parts.is_empty() {
        "stable behavior".to_string()
    } else {
        parts.join("; ")
    }
}

pub fn detect_behavioral_alerts(
    features: &BehavioralFeatures,
    trends: &BehavioralTrends,
) -> Vec<BehavioralAlert> {
    let mut alerts = Vec::new();
    if features.total_sessions == 0 {
        return alerts;
    }

    if features.attendance_ratio < 0.8 {
        alerts.push(BehavioralAlert {
            kind: BehavioralAlertKind::LowAttendance,
            severity: if features.attendance_ratio < 0.6 {
                Severity::High
            } else {
                Severity::Medium
            },
            message: format!(
                "Attended {:.0}% of sessions",
                features.attendance_ratio * 100.0
            ),
        });
    }

    if features.rated_sessions > 0 && features.participation_level < LOW_PARTICIPATION_LEVEL {
        alerts.push(BehavioralAlert {
            kind: BehavioralAlertKind::LowParticipation,
            severity: if features.participation_level < 5.0 {
                Severity::High
            } else {
                Severity::Medium
            },
            message: format!(
                "Average participation {:.1}/20",
                features.participation_level
            ),
        });
    }

    let dropping: Vec<String> = [
        ("attention", trends.attention),
        ("participation", trends.participation),
    ]
    .iter()
    .filter(|(_, trend)| trend.is_sharp_drop())
    .map(|(name, trend)| format!("{name} {:+.1}%", trend.change_percent))
    .collect();

    if !dropping.is_empty() {
        alerts.push(BehavioralAlert {
            kind: BehavioralAlertKind::BehaviorChange,
            severity: Severity::Medium,
            message: format!("Behavior change detected: {}", dropping.join(", ")),
        });
    }

    alerts
}

pub fn generate_behavioral_recommendations(features: &BehavioralFeatures) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();
    if features.total_sessions == 0 {
        return recommendations;
    }

    if features.attention_score < 12.0 {
        recommendations.push(Recommendation {
            category: "attention".to_string(),
            priority: Severity::High,
            title: "Strengthen attention in class".to_string(),
            description: format!("Attention score {:.1}/20", features.attention_score),
            actions: vec![
                "Seat the student closer to the board".to_string(),
                "Break activities into short timed segments".to_string(),
                "Ask for the camera to stay on during remote sessions".to_string(),
            ],
        });
    }

    if features.participation_level < 10.0 {
        recommendations.push(Recommendation {
            category: "participation".to_string(),
            priority: Severity::Medium,
            title: "Encourage oral participation".to_string(),
            description: format!(
                "Participation level {:.1}/20",
                features.participation_level
            ),
            actions: vec![
                "Ask targeted questions the student can succeed on".to_string(),
                "Use small-group work before whole-class discussion".to_string(),
                "Acknowledge every spontaneous contribution".to_string(),
            ],
        });
    }

    if features.cooperation_score < 10.0 {
        recommendations.push(Recommendation {
            category: "cooperation".to_string(),
            priority: Severity::Medium,
            title: "Build cooperation with peers".to_string(),
            description: format!("Cooperation score {:.1}/20", features.cooperation_score),
            actions: vec![
                "Assign a defined role in group activities".to_string(),
                "Pair the student with a supportive classmate".to_string(),
            ],
        });
    }

    if features.autonomy_score < 10.0 {
        recommendations.push(Recommendation {
            category: "autonomy".to_string(),
            priority: Severity::Low,
            title: "Develop working autonomy".to_string(),
            description: format!("Autonomy score {:.1}/20", features.autonomy_score),
            actions: vec![
                "Provide a weekly homework planner".to_string(),
                "Check homework completion at the start of each session".to_string(),
                "Contact the family about the home study routine".to_string(),
            ],
        });
    }

    recommendations
}

/// Present sessions since `since` whose participation fell below the low cut point.
pub fn count_disengaged_sessions(records: &[ParticipationRecord], since: DateTime<Utc>) -> u32 {
    records
        .iter()
        .filter(|p| p.marked_at >= since && p.is_present)
        .filter(|p| matches!(p.participation_level, Some(level) if level < LOW_PARTICIPATION_LEVEL))
        .count() as u32
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
