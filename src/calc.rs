use serde::{Deserialize, Serialize};

/// Council panel roles. Closed set; adding a role is a compile-checked
/// change everywhere scores are weighted or dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScorerRole {
    Supervisor,
    Reviewer,
    Chairperson,
    Secretary,
    Member,
}

impl ScorerRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "supervisor" => Some(ScorerRole::Supervisor),
            "reviewer" => Some(ScorerRole::Reviewer),
            "chairperson" => Some(ScorerRole::Chairperson),
            "secretary" => Some(ScorerRole::Secretary),
            "member" => Some(ScorerRole::Member),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScorerRole::Supervisor => "supervisor",
            ScorerRole::Reviewer => "reviewer",
            ScorerRole::Chairperson => "chairperson",
            ScorerRole::Secretary => "secretary",
            ScorerRole::Member => "member",
        }
    }

    pub const ALL: [ScorerRole; 5] = [
        ScorerRole::Supervisor,
        ScorerRole::Reviewer,
        ScorerRole::Chairperson,
        ScorerRole::Secretary,
        ScorerRole::Member,
    ];
}

/// Per-role totals for one student on one topic. A role that has not
/// scored stays `None` and contributes 0.0 to every policy.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoleScores {
    pub supervisor: Option<f64>,
    pub reviewer: Option<f64>,
    pub chairperson: Option<f64>,
    pub secretary: Option<f64>,
    pub member: Option<f64>,
}

impl RoleScores {
    pub fn set(&mut self, role: ScorerRole, total: f64) {
        match role {
            ScorerRole::Supervisor => self.supervisor = Some(total),
            ScorerRole::Reviewer => self.reviewer = Some(total),
            ScorerRole::Chairperson => self.chairperson = Some(total),
            ScorerRole::Secretary => self.secretary = Some(total),
            ScorerRole::Member => self.member = Some(total),
        }
    }

    pub fn get(&self, role: ScorerRole) -> Option<f64> {
        match role {
            ScorerRole::Supervisor => self.supervisor,
            ScorerRole::Reviewer => self.reviewer,
            ScorerRole::Chairperson => self.chairperson,
            ScorerRole::Secretary => self.secretary,
            ScorerRole::Member => self.member,
        }
    }

    pub fn is_empty(&self) -> bool {
        ScorerRole::ALL.iter().all(|r| self.get(*r).is_none())
    }
}

/// One named weighting policy: per-role multipliers over a fixed divisor.
/// Both presets observed in the field are expressible; exactly one is
/// active per workspace (`grading.policy` setting).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationPolicy {
    pub name: &'static str,
    pub supervisor_weight: f64,
    pub reviewer_weight: f64,
    pub chairperson_weight: f64,
    pub secretary_weight: f64,
    pub member_weight: f64,
    pub divisor: f64,
}

impl AggregationPolicy {
    /// ((supervisor + reviewer) * 2 + secretary + chairperson + member) / 7
    pub fn comprehensive() -> Self {
        AggregationPolicy {
            name: "comprehensive",
            supervisor_weight: 2.0,
            reviewer_weight: 2.0,
            chairperson_weight: 1.0,
            secretary_weight: 1.0,
            member_weight: 1.0,
            divisor: 7.0,
        }
    }

    /// (chairperson + secretary + supervisor*2 + reviewer*2) / 6.
    /// The minutes form has no ordinary-member line.
    pub fn council_minutes() -> Self {
        AggregationPolicy {
            name: "council_minutes",
            supervisor_weight: 2.0,
            reviewer_weight: 2.0,
            chairperson_weight: 1.0,
            secretary_weight: 1.0,
            member_weight: 0.0,
            divisor: 6.0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "comprehensive" => Some(Self::comprehensive()),
            "council_minutes" => Some(Self::council_minutes()),
            _ => None,
        }
    }

    fn weight(&self, role: ScorerRole) -> f64 {
        match role {
            ScorerRole::Supervisor => self.supervisor_weight,
            ScorerRole::Reviewer => self.reviewer_weight,
            ScorerRole::Chairperson => self.chairperson_weight,
            ScorerRole::Secretary => self.secretary_weight,
            ScorerRole::Member => self.member_weight,
        }
    }
}

/// Weighted final score. Total and deterministic: every input combination
/// yields a finite number, missing roles count as zero.
pub fn aggregate(scores: &RoleScores, policy: &AggregationPolicy) -> f64 {
    let mut sum = 0.0;
    for role in ScorerRole::ALL {
        sum += policy.weight(role) * scores.get(role).unwrap_or(0.0);
    }
    sum / policy.divisor
}

/// Half-up rounding to 2 decimals, used for every displayed final score.
pub fn round_half_up_2dp(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// One classification band: applies when `final_score >= min`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub min: f64,
    pub label: String,
}

pub fn default_grade_bands() -> Vec<GradeBand> {
    vec![
        GradeBand {
            min: 9.0,
            label: "Excellent".to_string(),
        },
        GradeBand {
            min: 8.0,
            label: "Very Good".to_string(),
        },
        GradeBand {
            min: 7.0,
            label: "Good".to_string(),
        },
        GradeBand {
            min: 5.0,
            label: "Average".to_string(),
        },
        GradeBand {
            min: 0.0,
            label: "Fail".to_string(),
        },
    ]
}

/// First band whose threshold the score meets, scanning highest first.
/// Bands are policy, not mechanism; callers load them from settings.
pub fn grade_text(final_score: f64, bands: &[GradeBand]) -> String {
    let mut sorted: Vec<&GradeBand> = bands.iter().collect();
    sorted.sort_by(|a, b| b.min.partial_cmp(&a.min).unwrap_or(std::cmp::Ordering::Equal));
    for band in sorted {
        if final_score >= band.min {
            return band.label.clone();
        }
    }
    "Fail".to_string()
}
