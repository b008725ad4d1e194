use crate::calc::{self, AggregationPolicy, GradeBand, RoleScores, ScorerRole};
use crate::db::{self, CouncilState};
use crate::entry;
use crate::ipc::error::err;
use crate::ipc::types::ActorContext;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn db(e: impl ToString) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn parse_actor(params: &serde_json::Value) -> Result<ActorContext, HandlerErr> {
    let Some(obj) = params.get("actor") else {
        return Err(HandlerErr::new("bad_params", "missing actor"));
    };
    let Some(user_id) = obj.get("userId").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::new("bad_params", "missing actor.userId"));
    };
    Ok(ActorContext {
        user_id: user_id.to_string(),
        faculty_board: obj
            .get("facultyBoard")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}

#[derive(Debug, Clone)]
pub struct CouncilRow {
    pub id: String,
    pub name: String,
    pub template_id: String,
    pub state: CouncilState,
    pub council_comments: Option<String>,
    pub published_at: Option<String>,
    pub publish_idempotency_key: Option<String>,
}

pub fn load_council(conn: &Connection, council_id: &str) -> Result<CouncilRow, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, name, template_id, state, council_comments, published_at,
                    publish_idempotency_key
             FROM councils WHERE id = ?",
            [council_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;

    let Some((id, name, template_id, state_raw, comments, published_at, key)) = row else {
        return Err(HandlerErr::with_details(
            "not_found",
            "council not found",
            json!({ "councilId": council_id }),
        ));
    };
    let Some(state) = CouncilState::parse(&state_raw) else {
        return Err(HandlerErr::new(
            "db_query_failed",
            format!("council has unknown state '{}'", state_raw),
        ));
    };
    Ok(CouncilRow {
        id,
        name,
        template_id,
        state,
        council_comments: comments,
        published_at,
        publish_idempotency_key: key,
    })
}

#[derive(Debug, Clone)]
pub struct TopicRow {
    pub id: String,
    pub council_id: String,
    pub title_vn: String,
    pub title_eng: Option<String>,
    pub defense_order: i64,
    pub is_locked: bool,
}

pub fn load_topic(conn: &Connection, topic_id: &str) -> Result<TopicRow, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, council_id, title_vn, title_eng, defense_order, is_locked
             FROM topics WHERE id = ?",
            [topic_id],
            |r| {
                Ok(TopicRow {
                    id: r.get(0)?,
                    council_id: r.get(1)?,
                    title_vn: r.get(2)?,
                    title_eng: r.get(3)?,
                    defense_order: r.get(4)?,
                    is_locked: r.get::<_, i64>(5)? != 0,
                })
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;
    row.ok_or_else(|| {
        HandlerErr::with_details(
            "not_found",
            "topic not found",
            json!({ "topicId": topic_id }),
        )
    })
}

/// Published councils accept no further mutations of any kind.
pub fn ensure_not_published(council: &CouncilRow) -> Result<(), HandlerErr> {
    match council.state {
        CouncilState::Published => Err(HandlerErr::with_details(
            "terminal_state",
            "council results are published; no further changes are possible",
            json!({ "councilId": council.id }),
        )),
        CouncilState::Scoring | CouncilState::Completed => Ok(()),
    }
}

pub fn load_template(conn: &Connection, template_id: &str) -> Result<entry::Template, HandlerErr> {
    let name: Option<String> = conn
        .query_row("SELECT name FROM templates WHERE id = ?", [template_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(name) = name else {
        return Err(HandlerErr::with_details(
            "not_found",
            "evaluation template not found",
            json!({ "templateId": template_id }),
        ));
    };

    let mut crit_stmt = conn
        .prepare(
            "SELECT id, category, max_score, elos FROM criteria
             WHERE template_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;
    let crit_rows = crit_stmt
        .query_map([template_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut sub_stmt = conn
        .prepare(
            "SELECT id, name, max_score, elos FROM subcriteria
             WHERE criterion_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;

    let mut criteria = Vec::with_capacity(crit_rows.len());
    for (id, category, max_score, elos) in crit_rows {
        let subcriteria = sub_stmt
            .query_map([&id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, Option<String>>(3)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db)?
            .into_iter()
            .map(|(sid, sname, smax, selos)| entry::Subcriterion {
                id: sid,
                name: sname,
                max_score: smax,
                elos: parse_elos(selos.as_deref()),
            })
            .collect::<Vec<_>>();

        criteria.push(entry::Criterion {
            id,
            category,
            max_score,
            elos: parse_elos(elos.as_deref()),
            subcriteria,
        });
    }

    Ok(entry::Template {
        id: template_id.to_string(),
        name,
        criteria,
    })
}

pub fn parse_elos(raw: Option<&str>) -> Vec<String> {
    match raw {
        Some(text) => serde_json::from_str::<Vec<String>>(text).unwrap_or_default(),
        None => Vec::new(),
    }
}

pub fn elos_to_json(elos: &[String]) -> Option<String> {
    if elos.is_empty() {
        None
    } else {
        serde_json::to_string(elos).ok()
    }
}

/// Active weighting policy for the workspace; defaults to the
/// comprehensive formula when nothing was configured.
pub fn active_policy(conn: &Connection) -> Result<AggregationPolicy, HandlerErr> {
    let section = db::settings_get_json(conn, "setup.grading").map_err(HandlerErr::db)?;
    let name = section
        .as_ref()
        .and_then(|v| v.get("policy"))
        .and_then(|v| v.as_str())
        .unwrap_or("comprehensive")
        .to_string();
    AggregationPolicy::parse(&name).ok_or_else(|| {
        HandlerErr::new(
            "db_query_failed",
            format!("configured aggregation policy '{}' is unknown", name),
        )
    })
}

pub fn grade_bands(conn: &Connection) -> Result<Vec<GradeBand>, HandlerErr> {
    let section = db::settings_get_json(conn, "setup.grading").map_err(HandlerErr::db)?;
    let bands = section
        .as_ref()
        .and_then(|v| v.get("bands"))
        .cloned()
        .and_then(|v| serde_json::from_value::<Vec<GradeBand>>(v).ok());
    Ok(bands.unwrap_or_else(calc::default_grade_bands))
}

/// Latest per-role totals for one student, fresh from the score store.
/// Later submissions win when the same role somehow scored twice.
pub fn role_scores_for_student(
    conn: &Connection,
    topic_id: &str,
    student_id: &str,
) -> Result<RoleScores, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT scorer_role, total_score FROM student_scores
             WHERE topic_id = ? AND student_id = ?
             ORDER BY submitted_at",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((topic_id, student_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut scores = RoleScores::default();
    for (role_raw, total) in rows {
        if let Some(role) = ScorerRole::parse(&role_raw) {
            scores.set(role, total);
        }
    }
    Ok(scores)
}

pub fn topic_score_count(conn: &Connection, topic_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*) FROM student_scores WHERE topic_id = ?",
        [topic_id],
        |r| r.get(0),
    )
    .map_err(HandlerErr::db)
}

pub fn member_role(
    conn: &Connection,
    topic_id: &str,
    member_id: &str,
) -> Result<Option<ScorerRole>, HandlerErr> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT role FROM topic_members WHERE topic_id = ? AND member_id = ?",
            (topic_id, member_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    Ok(raw.as_deref().and_then(ScorerRole::parse))
}

pub fn member_id_for_role(
    conn: &Connection,
    topic_id: &str,
    role: ScorerRole,
) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT member_id FROM topic_members WHERE topic_id = ? AND role = ?",
        (topic_id, role.as_str()),
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::db)
}

/// Single write path into the score store, shared by the interactive
/// form and the bulk import. Replaces the prior record for the
/// (topic, student, scorer) key together with its detail rows in one
/// transaction; there are no partial writes.
#[allow(clippy::too_many_arguments)]
pub fn upsert_student_score(
    conn: &Connection,
    topic_id: &str,
    student_id: &str,
    scorer_id: &str,
    scorer_role: ScorerRole,
    total_score: f64,
    comment: Option<&str>,
    source: &str,
    entries: &[entry::FlatEntry],
) -> Result<(String, String), HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM student_scores
             WHERE topic_id = ? AND student_id = ? AND scorer_id = ?",
            (topic_id, student_id, scorer_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;

    let submitted_at = now_rfc3339();
    let record_id = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE student_scores
                 SET scorer_role = ?, total_score = ?, comment = ?, source = ?, submitted_at = ?
                 WHERE id = ?",
                (
                    scorer_role.as_str(),
                    total_score,
                    comment,
                    source,
                    &submitted_at,
                    &id,
                ),
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
            tx.execute(
                "DELETE FROM score_entries WHERE student_score_id = ?",
                [&id],
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO student_scores(id, topic_id, student_id, scorer_id, scorer_role,
                                            total_score, comment, source, submitted_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    topic_id,
                    student_id,
                    scorer_id,
                    scorer_role.as_str(),
                    total_score,
                    comment,
                    source,
                    &submitted_at,
                ),
            )
            .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
            id
        }
    };

    for (i, row) in entries.iter().enumerate() {
        tx.execute(
            "INSERT INTO score_entries(id, student_score_id, criterion_id, subcriterion_id,
                                       score, max_score, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &record_id,
                &row.criterion_id,
                &row.subcriterion_id,
                row.score,
                row.max_score,
                i as i64,
            ),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok((record_id, submitted_at))
}
