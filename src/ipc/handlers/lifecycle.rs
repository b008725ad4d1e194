use crate::db::CouncilState;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// Topic ids under the council that have no score record yet.
fn unscored_topics(conn: &Connection, council_id: &str) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT t.id FROM topics t
             WHERE t.council_id = ?
               AND NOT EXISTS (SELECT 1 FROM student_scores s WHERE s.topic_id = t.id)
             ORDER BY t.defense_order",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([council_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)
}

fn handle_council_complete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(council_id) = req.params.get("councilId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing councilId", None);
    };
    let actor = match helpers::parse_actor(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if !actor.faculty_board {
        return err(
            &req.id,
            "permission_denied",
            "only the faculty board may complete a council",
            Some(json!({ "userId": actor.user_id })),
        );
    }

    let council = match helpers::load_council(conn, council_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match council.state {
        CouncilState::Published => {
            return err(
                &req.id,
                "terminal_state",
                "council results are published; no further changes are possible",
                None,
            )
        }
        CouncilState::Completed => {
            // Safe to retry.
            return ok(
                &req.id,
                json!({ "councilId": council_id, "state": "completed", "alreadyCompleted": true }),
            );
        }
        CouncilState::Scoring => {}
    }

    // Guard: every topic carries at least one score record. This does
    // not require all five roles to have scored; that looser rule is
    // deliberate and documented.
    let unscored = match unscored_topics(conn, council_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if !unscored.is_empty() {
        return err(
            &req.id,
            "validation_failed",
            "not every topic has been scored",
            Some(json!({ "unscoredTopicIds": unscored })),
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE councils SET state = 'completed' WHERE id = ?",
        [council_id],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "councilId": council_id, "state": "completed" }),
    )
}

fn enqueue_publish_notifications(
    conn: &Connection,
    council_id: &str,
    council_name: &str,
) -> Result<usize, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT t.id, s.student_id FROM topics t
             JOIN topic_students s ON s.topic_id = t.id
             WHERE t.council_id = ?",
        )
        .map_err(HandlerErr::db)?;
    let pairs = stmt
        .query_map([council_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let created_at = helpers::now_rfc3339();
    for (topic_id, student_id) in &pairs {
        conn.execute(
            "INSERT INTO notifications(id, council_id, topic_id, student_id, kind, message, created_at)
             VALUES(?, ?, ?, ?, 'results_published', ?, ?)",
            (
                Uuid::new_v4().to_string(),
                council_id,
                topic_id,
                student_id,
                format!("Defense results for council '{}' have been published", council_name),
                &created_at,
            ),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }
    Ok(pairs.len())
}

fn handle_council_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(council_id) = req.params.get("councilId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing councilId", None);
    };
    let actor = match helpers::parse_actor(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if !actor.faculty_board {
        return err(
            &req.id,
            "permission_denied",
            "only the faculty board may publish results",
            Some(json!({ "userId": actor.user_id })),
        );
    }
    let idempotency_key = req
        .params
        .get("idempotencyKey")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let council = match helpers::load_council(conn, council_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match council.state {
        CouncilState::Scoring => {
            return err(
                &req.id,
                "validation_failed",
                "council must be completed before publishing",
                Some(json!({ "state": "scoring" })),
            )
        }
        CouncilState::Published => {
            // Publish runs at most once. A retry carrying the key of the
            // successful attempt gets the recorded outcome; anything
            // else is a genuine post-publication mutation.
            if idempotency_key.is_some()
                && idempotency_key == council.publish_idempotency_key
            {
                return ok(
                    &req.id,
                    json!({
                        "councilId": council_id,
                        "state": "published",
                        "publishedAt": council.published_at,
                        "alreadyPublished": true,
                    }),
                );
            }
            return err(
                &req.id,
                "terminal_state",
                "council results are already published",
                None,
            );
        }
        CouncilState::Completed => {}
    }

    let published_at = helpers::now_rfc3339();
    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "UPDATE councils SET state = 'published', published_at = ?,
                             publish_idempotency_key = ?
         WHERE id = ?",
        (&published_at, &idempotency_key, council_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    let notified = match enqueue_publish_notifications(&tx, council_id, &council.name) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "councilId": council_id,
            "state": "published",
            "publishedAt": published_at,
            "notificationsQueued": notified,
        }),
    )
}

fn handle_notifications_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(council_id) = req.params.get("councilId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing councilId", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, topic_id, student_id, kind, message, created_at
         FROM notifications WHERE council_id = ? ORDER BY created_at, student_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([council_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "topicId": r.get::<_, String>(1)?,
                "studentId": r.get::<_, String>(2)?,
                "kind": r.get::<_, String>(3)?,
                "message": r.get::<_, String>(4)?,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "notifications": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "council.complete" => Some(handle_council_complete(state, req)),
        "council.publish" => Some(handle_council_publish(state, req)),
        "notifications.list" => Some(handle_notifications_list(state, req)),
        _ => None,
    }
}
