use crate::calc::{self, ScorerRole};
use crate::db::CouncilState;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

fn handle_council_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(name) = req.params.get("name").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing name", None);
    };
    let Some(template_id) = req.params.get("templateId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing templateId", None);
    };
    if let Err(e) = helpers::load_template(conn, template_id) {
        return e.response(&req.id);
    }

    let council_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO councils(id, name, template_id, state) VALUES(?, ?, ?, 'scoring')",
        (&council_id, name, template_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "councilId": council_id }))
}

fn handle_council_add_topic(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(council_id) = req.params.get("councilId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing councilId", None);
    };
    let Some(title_vn) = req.params.get("titleVn").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing titleVn", None);
    };
    if title_vn.trim().is_empty() {
        return err(&req.id, "bad_params", "titleVn must not be empty", None);
    }

    let council = match helpers::load_council(conn, council_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = helpers::ensure_not_published(&council) {
        return e.response(&req.id);
    }
    // The completion guard quantifies over the topic list; it must not
    // grow after the council was judged complete.
    if council.state == CouncilState::Completed {
        return err(
            &req.id,
            "validation_failed",
            "council is already completed; topics can no longer be added",
            None,
        );
    }

    let title_eng = req.params.get("titleEng").and_then(|v| v.as_str());
    let defense_order = req
        .params
        .get("defenseOrder")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let students = match req.params.get("students").and_then(|v| v.as_array()) {
        Some(arr) => arr.clone(),
        None => Vec::new(),
    };
    let members = match req.params.get("members").and_then(|v| v.as_array()) {
        Some(arr) => arr.clone(),
        None => Vec::new(),
    };

    let mut seen_roles: HashSet<&str> = HashSet::new();
    let mut parsed_members: Vec<(String, String, ScorerRole)> = Vec::new();
    for (i, item) in members.iter().enumerate() {
        let member_id = item.get("memberId").and_then(|v| v.as_str());
        let member_name = item.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let role_raw = item.get("role").and_then(|v| v.as_str());
        let (Some(member_id), Some(role_raw)) = (member_id, role_raw) else {
            return err(
                &req.id,
                "bad_params",
                format!("members[{}] needs memberId and role", i),
                None,
            );
        };
        let Some(role) = ScorerRole::parse(role_raw) else {
            return err(
                &req.id,
                "bad_params",
                format!("members[{}] has unknown role '{}'", i, role_raw),
                Some(json!({ "allowed": ScorerRole::ALL.map(|r| r.as_str()) })),
            );
        };
        if !seen_roles.insert(role.as_str()) {
            return err(
                &req.id,
                "validation_failed",
                format!("role '{}' assigned more than once", role.as_str()),
                None,
            );
        }
        parsed_members.push((member_id.to_string(), member_name.to_string(), role));
    }

    let topic_id = Uuid::new_v4().to_string();
    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };
    let insert = (|| -> Result<(), rusqlite::Error> {
        tx.execute(
            "INSERT INTO topics(id, council_id, title_vn, title_eng, defense_order, is_locked)
             VALUES(?, ?, ?, ?, ?, 0)",
            (&topic_id, council_id, title_vn, title_eng, defense_order),
        )?;
        for (i, item) in students.iter().enumerate() {
            let student_id = item
                .get("studentId")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let name = item.get("name").and_then(|v| v.as_str()).unwrap_or("");
            tx.execute(
                "INSERT INTO topic_students(topic_id, student_id, name, sort_order)
                 VALUES(?, ?, ?, ?)",
                (&topic_id, student_id, name, i as i64),
            )?;
        }
        for (member_id, name, role) in &parsed_members {
            tx.execute(
                "INSERT INTO topic_members(topic_id, member_id, name, role)
                 VALUES(?, ?, ?, ?)",
                (&topic_id, member_id, name, role.as_str()),
            )?;
        }
        tx.commit()
    })();
    if let Err(e) = insert {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "topicId": topic_id }))
}

/// Full council view. Final scores are computed from live records on
/// every read; nothing here is cached.
pub fn build_council_view(
    conn: &Connection,
    council_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let council = helpers::load_council(conn, council_id)?;
    let policy = helpers::active_policy(conn)?;
    let bands = helpers::grade_bands(conn)?;

    let mut topic_stmt = conn
        .prepare(
            "SELECT id, title_vn, title_eng, defense_order, is_locked
             FROM topics WHERE council_id = ? ORDER BY defense_order, title_vn",
        )
        .map_err(HandlerErr::db)?;
    let topic_rows = topic_stmt
        .query_map([council_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut student_stmt = conn
        .prepare(
            "SELECT student_id, name FROM topic_students
             WHERE topic_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;
    let mut member_stmt = conn
        .prepare(
            "SELECT member_id, name, role FROM topic_members
             WHERE topic_id = ? ORDER BY role",
        )
        .map_err(HandlerErr::db)?;

    let mut scored_topics = 0usize;
    let mut topics_json = Vec::with_capacity(topic_rows.len());
    for (topic_id, title_vn, title_eng, defense_order, is_locked) in &topic_rows {
        let students = student_stmt
            .query_map([topic_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db)?;
        let members = member_stmt
            .query_map([topic_id], |r| {
                Ok(json!({
                    "memberId": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "role": r.get::<_, String>(2)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db)?;

        if helpers::topic_score_count(conn, topic_id)? > 0 {
            scored_topics += 1;
        }

        let mut students_json = Vec::with_capacity(students.len());
        for (student_id, name) in &students {
            let scores = helpers::role_scores_for_student(conn, topic_id, student_id)?;
            let (final_score, grade) = if scores.is_empty() {
                (None, None)
            } else {
                let v = calc::round_half_up_2dp(calc::aggregate(&scores, &policy));
                (Some(v), Some(calc::grade_text(v, &bands)))
            };
            students_json.push(json!({
                "studentId": student_id,
                "name": name,
                "finalScore": final_score,
                "gradeText": grade,
            }));
        }

        topics_json.push(json!({
            "topicId": topic_id,
            "titleVn": title_vn,
            "titleEng": title_eng,
            "defenseOrder": defense_order,
            "isLocked": is_locked,
            "members": members,
            "students": students_json,
        }));
    }

    let total = topic_rows.len();
    let percent = if total > 0 {
        100.0 * scored_topics as f64 / total as f64
    } else {
        0.0
    };

    Ok(json!({
        "councilId": council.id,
        "name": council.name,
        "templateId": council.template_id,
        "state": council.state.as_str(),
        "councilComments": council.council_comments,
        "publishedAt": council.published_at,
        "aggregationPolicy": policy.name,
        "topics": topics_json,
        "progress": {
            "scoredTopics": scored_topics,
            "totalTopics": total,
            "percent": percent,
        },
    }))
}

fn handle_council_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(council_id) = req.params.get("councilId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing councilId", None);
    };
    match build_council_view(conn, council_id) {
        Ok(view) => ok(&req.id, view),
        Err(e) => e.response(&req.id),
    }
}

fn handle_council_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(council_id) = req.params.get("councilId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing councilId", None);
    };
    match build_council_view(conn, council_id) {
        Ok(view) => ok(
            &req.id,
            view.get("progress").cloned().unwrap_or_else(|| json!({})),
        ),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "council.create" => Some(handle_council_create(state, req)),
        "council.addTopic" => Some(handle_council_add_topic(state, req)),
        "council.get" => Some(handle_council_get(state, req)),
        "council.progress" => Some(handle_council_progress(state, req)),
        _ => None,
    }
}
