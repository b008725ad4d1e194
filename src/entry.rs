use serde::Serialize;

/// Evaluation rubric as served by the template provider. Consumed
/// read-only by scoring; a criterion that has sub-criteria carries no
/// independent score of its own.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub criteria: Vec<Criterion>,
}

#[derive(Debug, Clone)]
pub struct Criterion {
    pub id: String,
    pub category: String,
    pub max_score: f64,
    pub elos: Vec<String>,
    pub subcriteria: Vec<Subcriterion>,
}

#[derive(Debug, Clone)]
pub struct Subcriterion {
    pub id: String,
    pub name: String,
    pub max_score: f64,
    pub elos: Vec<String>,
}

/// One in-progress edit from the scoring form. `subcriterion_id` set
/// means a leaf edit; unset means a main-criterion edit.
#[derive(Debug, Clone)]
pub struct EntryEdit {
    pub criterion_id: String,
    pub subcriterion_id: Option<String>,
    pub score: f64,
}

/// One flattened row ready for the score store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatEntry {
    pub criterion_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcriterion_id: Option<String>,
    pub score: f64,
    pub max_score: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryError {
    pub criterion_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcriterion_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub entries: Vec<FlatEntry>,
    pub total_score: f64,
}

/// Validates a scorer's edits against the rubric and flattens them for
/// storage. Collects every violation rather than stopping at the first.
///
/// Parent scores are recomputed as the sum of their sub-criteria; an
/// incoming main-score edit for a criterion that has sub-criteria is
/// ignored in favor of the recomputed sum. Leaves without an edit score
/// as 0, matching a form initialized to zeros.
///
/// Flattening order is per criterion in template order: its sub-criterion
/// rows first, then its main row.
pub fn validate_and_flatten(
    template: &Template,
    edits: &[EntryEdit],
    max_total: f64,
) -> Result<Submission, Vec<EntryError>> {
    let mut errors: Vec<EntryError> = Vec::new();

    for edit in edits {
        if !edit.score.is_finite() {
            errors.push(EntryError {
                criterion_id: edit.criterion_id.clone(),
                subcriterion_id: edit.subcriterion_id.clone(),
                message: "score must be a finite number".to_string(),
            });
        }
        if lookup(template, edit).is_none() {
            errors.push(EntryError {
                criterion_id: edit.criterion_id.clone(),
                subcriterion_id: edit.subcriterion_id.clone(),
                message: "entry does not match any rubric criterion".to_string(),
            });
        }
    }

    let mut entries: Vec<FlatEntry> = Vec::new();
    let mut total: f64 = 0.0;

    for criterion in &template.criteria {
        if criterion.subcriteria.is_empty() {
            let score = main_edit(edits, &criterion.id).unwrap_or(0.0);
            if score < 0.0 || score > criterion.max_score {
                errors.push(EntryError {
                    criterion_id: criterion.id.clone(),
                    subcriterion_id: None,
                    message: format!(
                        "score {} out of range [0, {}]",
                        score, criterion.max_score
                    ),
                });
            }
            total += score;
            entries.push(FlatEntry {
                criterion_id: criterion.id.clone(),
                subcriterion_id: None,
                score,
                max_score: criterion.max_score,
            });
            continue;
        }

        let mut sum = 0.0;
        for sub in &criterion.subcriteria {
            let score = sub_edit(edits, &criterion.id, &sub.id).unwrap_or(0.0);
            if score < 0.0 || score > sub.max_score {
                errors.push(EntryError {
                    criterion_id: criterion.id.clone(),
                    subcriterion_id: Some(sub.id.clone()),
                    message: format!("score {} out of range [0, {}]", score, sub.max_score),
                });
            }
            sum += score;
            entries.push(FlatEntry {
                criterion_id: criterion.id.clone(),
                subcriterion_id: Some(sub.id.clone()),
                score,
                max_score: sub.max_score,
            });
        }

        // Parent row is derived, never taken from the form.
        total += sum;
        entries.push(FlatEntry {
            criterion_id: criterion.id.clone(),
            subcriterion_id: None,
            score: sum,
            max_score: criterion.max_score,
        });
    }

    if total > max_total {
        errors.push(EntryError {
            criterion_id: String::new(),
            subcriterion_id: None,
            message: format!("total score {} exceeds maximum {}", total, max_total),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(Submission {
        entries,
        total_score: total,
    })
}

/// Rubric self-consistency checks run when a template is saved.
pub fn validate_template(criteria: &[Criterion]) -> Vec<String> {
    let mut errors = Vec::new();
    for criterion in criteria {
        if criterion.max_score <= 0.0 {
            errors.push(format!(
                "criterion {}: maxScore must be positive",
                criterion.id
            ));
        }
        for sub in &criterion.subcriteria {
            if sub.max_score <= 0.0 {
                errors.push(format!(
                    "subcriterion {}: maxScore must be positive",
                    sub.id
                ));
            }
        }
        if !criterion.subcriteria.is_empty() {
            let sum: f64 = criterion.subcriteria.iter().map(|s| s.max_score).sum();
            if (sum - criterion.max_score).abs() > 1e-9 {
                errors.push(format!(
                    "criterion {}: subcriteria maxScores sum to {} but criterion maxScore is {}",
                    criterion.id, sum, criterion.max_score
                ));
            }
        }
    }
    errors
}

fn lookup(template: &Template, edit: &EntryEdit) -> Option<()> {
    let criterion = template
        .criteria
        .iter()
        .find(|c| c.id == edit.criterion_id)?;
    match &edit.subcriterion_id {
        Some(sub_id) => criterion
            .subcriteria
            .iter()
            .find(|s| &s.id == sub_id)
            .map(|_| ()),
        None => Some(()),
    }
}

fn main_edit(edits: &[EntryEdit], criterion_id: &str) -> Option<f64> {
    edits
        .iter()
        .find(|e| e.criterion_id == criterion_id && e.subcriterion_id.is_none())
        .map(|e| e.score)
}

fn sub_edit(edits: &[EntryEdit], criterion_id: &str, subcriterion_id: &str) -> Option<f64> {
    edits
        .iter()
        .find(|e| {
            e.criterion_id == criterion_id
                && e.subcriterion_id.as_deref() == Some(subcriterion_id)
        })
        .map(|e| e.score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rubric() -> Template {
        Template {
            id: "t1".to_string(),
            name: "Defense rubric".to_string(),
            criteria: vec![
                Criterion {
                    id: "c1".to_string(),
                    category: "Content".to_string(),
                    max_score: 4.0,
                    elos: vec!["ELO1".to_string()],
                    subcriteria: vec![
                        Subcriterion {
                            id: "c1a".to_string(),
                            name: "Problem statement".to_string(),
                            max_score: 2.0,
                            elos: vec![],
                        },
                        Subcriterion {
                            id: "c1b".to_string(),
                            name: "Methodology".to_string(),
                            max_score: 2.0,
                            elos: vec![],
                        },
                    ],
                },
                Criterion {
                    id: "c2".to_string(),
                    category: "Presentation".to_string(),
                    max_score: 6.0,
                    elos: vec![],
                    subcriteria: vec![],
                },
            ],
        }
    }

    fn edit(criterion: &str, sub: Option<&str>, score: f64) -> EntryEdit {
        EntryEdit {
            criterion_id: criterion.to_string(),
            subcriterion_id: sub.map(|s| s.to_string()),
            score,
        }
    }

    #[test]
    fn parent_score_is_recomputed_from_subcriteria() {
        let edits = vec![
            edit("c1", Some("c1a"), 1.5),
            edit("c1", Some("c1b"), 2.0),
            // Stale main score must be ignored, not trusted.
            edit("c1", None, 0.5),
            edit("c2", None, 4.0),
        ];
        let submission = validate_and_flatten(&rubric(), &edits, 10.0).expect("valid");
        assert_eq!(submission.total_score, 7.5);

        let parent = submission
            .entries
            .iter()
            .find(|e| e.criterion_id == "c1" && e.subcriterion_id.is_none())
            .expect("parent row");
        assert_eq!(parent.score, 3.5);
    }

    #[test]
    fn flatten_order_is_subs_then_main_per_criterion() {
        let edits = vec![
            edit("c1", Some("c1a"), 1.0),
            edit("c1", Some("c1b"), 1.0),
            edit("c2", None, 3.0),
        ];
        let submission = validate_and_flatten(&rubric(), &edits, 10.0).expect("valid");
        let keys: Vec<(String, Option<String>)> = submission
            .entries
            .iter()
            .map(|e| (e.criterion_id.clone(), e.subcriterion_id.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("c1".to_string(), Some("c1a".to_string())),
                ("c1".to_string(), Some("c1b".to_string())),
                ("c1".to_string(), None),
                ("c2".to_string(), None),
            ]
        );
    }

    #[test]
    fn out_of_range_errors_are_collected_exhaustively() {
        let edits = vec![
            edit("c1", Some("c1a"), 3.0),
            edit("c1", Some("c1b"), -1.0),
            edit("c2", None, 7.0),
        ];
        let errors = validate_and_flatten(&rubric(), &edits, 10.0).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors
            .iter()
            .any(|e| e.subcriterion_id.as_deref() == Some("c1a")));
        assert!(errors
            .iter()
            .any(|e| e.subcriterion_id.as_deref() == Some("c1b")));
        assert!(errors
            .iter()
            .any(|e| e.criterion_id == "c2" && e.subcriterion_id.is_none()));
    }

    #[test]
    fn total_above_policy_maximum_is_rejected() {
        let mut template = rubric();
        // Inflate the simple criterion so per-entry checks pass.
        template.criteria[1].max_score = 9.0;
        let edits = vec![
            edit("c1", Some("c1a"), 2.0),
            edit("c1", Some("c1b"), 2.0),
            edit("c2", None, 8.0),
        ];
        let errors = validate_and_flatten(&template, &edits, 10.0).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("exceeds maximum"));
    }

    #[test]
    fn missing_leaves_default_to_zero() {
        let edits = vec![edit("c1", Some("c1a"), 2.0)];
        let submission = validate_and_flatten(&rubric(), &edits, 10.0).expect("valid");
        assert_eq!(submission.total_score, 2.0);
        assert_eq!(submission.entries.len(), 4);
    }

    #[test]
    fn unknown_entry_ids_are_rejected() {
        let edits = vec![edit("nope", None, 1.0)];
        let errors = validate_and_flatten(&rubric(), &edits, 10.0).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("does not match any rubric criterion")));
    }

    #[test]
    fn template_subcriteria_max_must_sum_to_parent_max() {
        let mut template = rubric();
        template.criteria[0].max_score = 5.0;
        let errors = validate_template(&template.criteria);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("sum to 4"));
    }
}
