use crate::calc::ScorerRole;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, HandlerErr};
use crate::ipc::types::{ActorContext, AppState, Request};
use rusqlite::Connection;
use serde_json::json;

struct LockTarget {
    council: helpers::CouncilRow,
    topic: helpers::TopicRow,
}

fn load_target(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(LockTarget, ActorContext), HandlerErr> {
    let Some(council_id) = params.get("councilId").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::new("bad_params", "missing councilId"));
    };
    let Some(topic_id) = params.get("topicId").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::new("bad_params", "missing topicId"));
    };
    let actor = helpers::parse_actor(params)?;

    let council = helpers::load_council(conn, council_id)?;
    let topic = helpers::load_topic(conn, topic_id)?;
    if topic.council_id != council.id {
        return Err(HandlerErr::new(
            "bad_params",
            "topic does not belong to this council",
        ));
    }
    // Publication is terminal for the lock state machine too.
    helpers::ensure_not_published(&council)?;
    Ok((LockTarget { council, topic }, actor))
}

fn set_locked(conn: &Connection, topic_id: &str, locked: bool) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE topics SET is_locked = ? WHERE id = ?",
        (locked as i64, topic_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(())
}

fn handle_topic_lock(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (target, actor) = match load_target(conn, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Locking is for the faculty board or the topic's own secretary,
    // tighter than the legacy any-scorer rule.
    let is_secretary = match helpers::member_role(conn, &target.topic.id, &actor.user_id) {
        Ok(role) => role == Some(ScorerRole::Secretary),
        Err(e) => return e.response(&req.id),
    };
    if !actor.faculty_board && !is_secretary {
        return err(
            &req.id,
            "permission_denied",
            "only the faculty board or the topic secretary may lock scoring",
            Some(json!({ "userId": actor.user_id })),
        );
    }

    let score_count = match helpers::topic_score_count(conn, &target.topic.id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if score_count == 0 {
        return err(
            &req.id,
            "validation_failed",
            "topic has no score submissions yet",
            Some(json!({ "topicId": target.topic.id })),
        );
    }

    if let Err(e) = set_locked(conn, &target.topic.id, true) {
        return e.response(&req.id);
    }
    ok(
        &req.id,
        json!({
            "topicId": target.topic.id,
            "isLocked": true,
            "councilState": target.council.state.as_str(),
        }),
    )
}

fn handle_topic_unlock(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (target, actor) = match load_target(conn, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if !actor.faculty_board {
        return err(
            &req.id,
            "permission_denied",
            "only the faculty board may unlock scoring",
            Some(json!({ "userId": actor.user_id })),
        );
    }

    if let Err(e) = set_locked(conn, &target.topic.id, false) {
        return e.response(&req.id);
    }
    ok(
        &req.id,
        json!({
            "topicId": target.topic.id,
            "isLocked": false,
            "councilState": target.council.state.as_str(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "topic.lock" => Some(handle_topic_lock(state, req)),
        "topic.unlock" => Some(handle_topic_unlock(state, req)),
        _ => None,
    }
}
