use crate::entry::{self, EntryEdit, FlatEntry};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const MAX_TOTAL_SCORE: f64 = 10.0;

fn parse_edits(params: &serde_json::Value) -> Result<Vec<EntryEdit>, HandlerErr> {
    let Some(arr) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing entries[]"));
    };
    let mut edits = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let Some(criterion_id) = item.get("criterionId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::new(
                "bad_params",
                format!("entries[{}] missing criterionId", i),
            ));
        };
        let Some(score) = item.get("score").and_then(|v| v.as_f64()) else {
            return Err(HandlerErr::new(
                "bad_params",
                format!("entries[{}] missing numeric score", i),
            ));
        };
        edits.push(EntryEdit {
            criterion_id: criterion_id.to_string(),
            subcriterion_id: item
                .get("subcriterionId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            score,
        });
    }
    Ok(edits)
}

/// Stored rows for the scorer's live record, for the no-op guard.
fn stored_submission(
    conn: &Connection,
    topic_id: &str,
    student_id: &str,
    scorer_id: &str,
) -> Result<Option<(Vec<FlatEntry>, Option<String>)>, HandlerErr> {
    let record: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT id, comment FROM student_scores
             WHERE topic_id = ? AND student_id = ? AND scorer_id = ?",
            (topic_id, student_id, scorer_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((record_id, comment)) = record else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT criterion_id, subcriterion_id, score, max_score
             FROM score_entries WHERE student_score_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;
    let entries = stmt
        .query_map([&record_id], |r| {
            Ok(FlatEntry {
                criterion_id: r.get(0)?,
                subcriterion_id: r.get(1)?,
                score: r.get(2)?,
                max_score: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(Some((entries, comment)))
}

fn handle_score_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(council_id) = req.params.get("councilId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing councilId", None);
    };
    let Some(topic_id) = req.params.get("topicId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing topicId", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let actor = match helpers::parse_actor(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let comment = req.params.get("comment").and_then(|v| v.as_str());

    let council = match helpers::load_council(conn, council_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let topic = match helpers::load_topic(conn, topic_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if topic.council_id != council.id {
        return err(
            &req.id,
            "bad_params",
            "topic does not belong to this council",
            None,
        );
    }

    // Terminal state outranks the lock; the lock outranks validation.
    if let Err(e) = helpers::ensure_not_published(&council) {
        return e.response(&req.id);
    }
    if topic.is_locked {
        return err(
            &req.id,
            "topic_locked",
            "topic scores are locked; ask the faculty board to unlock",
            Some(json!({ "topicId": topic_id })),
        );
    }

    let role = match helpers::member_role(conn, topic_id, &actor.user_id) {
        Ok(Some(role)) => role,
        Ok(None) => {
            return err(
                &req.id,
                "permission_denied",
                "actor is not on this topic's evaluation panel",
                Some(json!({ "userId": actor.user_id })),
            )
        }
        Err(e) => return e.response(&req.id),
    };

    let student_known: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM topic_students WHERE topic_id = ? AND student_id = ?",
            (topic_id, student_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_known.is_none() {
        return err(
            &req.id,
            "not_found",
            "student is not assigned to this topic",
            Some(json!({ "studentId": student_id })),
        );
    }

    let edits = match parse_edits(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let template = match helpers::load_template(conn, &council.template_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let submission = match entry::validate_and_flatten(&template, &edits, MAX_TOTAL_SCORE) {
        Ok(v) => v,
        Err(errors) => {
            return err(
                &req.id,
                "validation_failed",
                "score entries failed validation",
                Some(json!({ "errors": errors })),
            )
        }
    };

    // No-op guard: an identical resubmission never reaches the store.
    match stored_submission(conn, topic_id, student_id, &actor.user_id) {
        Ok(Some((prior_entries, prior_comment)))
            if prior_entries == submission.entries && prior_comment.as_deref() == comment =>
        {
            return err(
                &req.id,
                "validation_failed",
                "nothing changed since the last submission",
                Some(json!({ "reason": "unchanged" })),
            );
        }
        Ok(_) => {}
        Err(e) => return e.response(&req.id),
    }

    match helpers::upsert_student_score(
        conn,
        topic_id,
        student_id,
        &actor.user_id,
        role,
        submission.total_score,
        comment,
        "form",
        &submission.entries,
    ) {
        Ok((record_id, submitted_at)) => ok(
            &req.id,
            json!({
                "studentScoreId": record_id,
                "scorerRole": role.as_str(),
                "totalScore": submission.total_score,
                "submittedAt": submitted_at,
            }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn handle_score_get_for_topic(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(topic_id) = req.params.get("topicId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing topicId", None);
    };
    if let Err(e) = helpers::load_topic(conn, topic_id) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare(
        "SELECT id, student_id, scorer_id, scorer_role, total_score, comment, source, submitted_at
         FROM student_scores WHERE topic_id = ? ORDER BY student_id, scorer_role",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let records = match stmt
        .query_map([topic_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut entry_stmt = match conn.prepare(
        "SELECT criterion_id, subcriterion_id, score, max_score
         FROM score_entries WHERE student_score_id = ? ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut scores_json = Vec::with_capacity(records.len());
    for (id, student_id, scorer_id, scorer_role, total, comment, source, submitted_at) in records {
        let detailed = match entry_stmt
            .query_map([&id], |r| {
                Ok(json!({
                    "criterionId": r.get::<_, String>(0)?,
                    "subcriterionId": r.get::<_, Option<String>>(1)?,
                    "score": r.get::<_, f64>(2)?,
                    "maxScore": r.get::<_, f64>(3)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        scores_json.push(json!({
            "studentScoreId": id,
            "topicId": topic_id,
            "studentId": student_id,
            "scorerId": scorer_id,
            "scorerRole": scorer_role,
            "totalScore": total,
            "comment": comment,
            "source": source,
            "submittedAt": submitted_at,
            "detailedScores": detailed,
        }));
    }

    ok(&req.id, json!({ "scores": scores_json }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "score.submit" => Some(handle_score_submit(state, req)),
        "score.getForTopic" => Some(handle_score_get_for_topic(state, req)),
        _ => None,
    }
}
