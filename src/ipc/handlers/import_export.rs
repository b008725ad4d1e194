use crate::archive;
use crate::calc::ScorerRole;
use crate::import::{self, IMPORT_ROLES};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::councils;
use crate::ipc::helpers::{self, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;

fn find_topic_by_title(
    conn: &Connection,
    council_id: &str,
    title_vn: &str,
) -> Result<Option<(String, bool)>, HandlerErr> {
    conn.query_row(
        "SELECT id, is_locked FROM topics WHERE council_id = ? AND TRIM(title_vn) = TRIM(?)",
        (council_id, title_vn),
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0)),
    )
    .optional()
    .map_err(HandlerErr::db)
}

fn topic_students(conn: &Connection, topic_id: &str) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id FROM topic_students WHERE topic_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([topic_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)
}

fn role_record(
    conn: &Connection,
    topic_id: &str,
    student_id: &str,
    role: ScorerRole,
) -> Result<Option<(f64, Option<String>)>, HandlerErr> {
    conn.query_row(
        "SELECT total_score, comment FROM student_scores
         WHERE topic_id = ? AND student_id = ? AND scorer_role = ?
         ORDER BY submitted_at DESC LIMIT 1",
        (topic_id, student_id, role.as_str()),
        |r| Ok((r.get::<_, f64>(0)?, r.get::<_, Option<String>>(1)?)),
    )
    .optional()
    .map_err(HandlerErr::db)
}

/// Score sheet for a whole council in the CSV exchange shape, one row
/// per topic. Role cells reflect the first student's current totals;
/// bulk rows apply uniformly to every student of the topic, so the
/// sheet round-trips import -> export by title.
pub fn build_export_csv(conn: &Connection, council_id: &str) -> Result<String, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title_vn, defense_order FROM topics
             WHERE council_id = ? ORDER BY defense_order, title_vn",
        )
        .map_err(HandlerErr::db)?;
    let topics = stmt
        .query_map([council_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut out = String::from(import::EXPORT_HEADER);
    out.push('\n');
    for (topic_id, title_vn, defense_order) in topics {
        let students = topic_students(conn, &topic_id)?;
        let mut cells: [(Option<f64>, Option<String>); 4] = Default::default();
        if let Some(first) = students.first() {
            for (slot, role) in IMPORT_ROLES.iter().enumerate() {
                if let Some((total, comment)) = role_record(conn, &topic_id, first, *role)? {
                    cells[slot] = (Some(total), comment);
                }
            }
        }
        out.push_str(&import::export_line(
            defense_order,
            &title_vn,
            &students,
            &cells,
        ));
        out.push('\n');
    }
    Ok(out)
}

fn read_sheet(params: &serde_json::Value) -> Result<(String, Vec<import::RawRow>), HandlerErr> {
    let Some(path) = params.get("path").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::new("bad_params", "missing path"));
    };
    let text = std::fs::read_to_string(path).map_err(|e| {
        HandlerErr::with_details(
            "file_read_failed",
            format!("cannot read {}: {}", path, e),
            json!({ "path": path }),
        )
    })?;
    let rows = import::parse_import_file(&text)
        .map_err(|msg| HandlerErr::with_details("parse_error", msg, json!({ "path": path })))?;
    Ok((path.to_string(), rows))
}

fn handle_import_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(council_id) = req.params.get("councilId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing councilId", None);
    };
    if let Err(e) = helpers::load_council(conn, council_id) {
        return e.response(&req.id);
    }
    let (_, rows) = match read_sheet(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let errors = import::validate_rows(&rows);

    let mut matched = 0usize;
    let mut unmatched: Vec<serde_json::Value> = Vec::new();
    for row in &rows {
        if row.title_vn.trim().is_empty() {
            continue;
        }
        match find_topic_by_title(conn, council_id, &row.title_vn) {
            Ok(Some(_)) => matched += 1,
            Ok(None) => unmatched.push(json!({ "row": row.row, "titleVn": row.title_vn })),
            Err(e) => return e.response(&req.id),
        }
    }

    ok(
        &req.id,
        json!({
            "rowsTotal": rows.len(),
            "errors": errors,
            "canCommit": errors.is_empty(),
            "rowsMatched": matched,
            "rowsUnmatched": unmatched,
        }),
    )
}

fn handle_import_commit(state: &mut AppState, req: &Request) -> serde_json::Value {
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
            "only the faculty board may bulk-import scores",
            Some(json!({ "userId": actor.user_id })),
        );
    }

    let council = match helpers::load_council(conn, council_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = helpers::ensure_not_published(&council) {
        return e.response(&req.id);
    }

    let (_, rows) = match read_sheet(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // All-or-nothing against validation: one bad cell blocks the batch.
    let errors = import::validate_rows(&rows);
    if !errors.is_empty() {
        return err(
            &req.id,
            "validation_failed",
            "import sheet failed validation; nothing was committed",
            Some(json!({ "errors": errors })),
        );
    }

    let total_count = rows.len();
    let mut success_count = 0usize;
    let mut skipped: Vec<serde_json::Value> = Vec::new();

    for row in &rows {
        let (topic_id, is_locked) =
            match find_topic_by_title(conn, council_id, &row.title_vn) {
                Ok(Some(v)) => v,
                Ok(None) => {
                    skipped.push(json!({ "row": row.row, "reason": "topic title not found" }));
                    continue;
                }
                Err(e) => return e.response(&req.id),
            };
        if is_locked {
            skipped.push(json!({ "row": row.row, "reason": "topic is locked" }));
            continue;
        }
        let students = match topic_students(conn, &topic_id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        if students.is_empty() {
            skipped.push(json!({ "row": row.row, "reason": "topic has no students" }));
            continue;
        }

        // Bulk rows carry aggregate role totals only; they store with an
        // empty detail list rather than being force-fit into entries.
        for student_id in &students {
            for (role, total, comment) in import::resolved_scores(row) {
                let scorer_id = match helpers::member_id_for_role(conn, &topic_id, role) {
                    Ok(Some(id)) => id,
                    Ok(None) => format!("import:{}", role.as_str()),
                    Err(e) => return e.response(&req.id),
                };
                if let Err(e) = helpers::upsert_student_score(
                    conn,
                    &topic_id,
                    student_id,
                    &scorer_id,
                    role,
                    total,
                    comment.as_deref(),
                    "import",
                    &[],
                ) {
                    return e.response(&req.id);
                }
            }
        }
        success_count += 1;
    }

    ok(
        &req.id,
        json!({
            "successCount": success_count,
            "totalCount": total_count,
            "skipped": skipped,
        }),
    )
}

fn handle_export_template(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(council_id) = req.params.get("councilId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing councilId", None);
    };
    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing path", None);
    };
    if let Err(e) = helpers::load_council(conn, council_id) {
        return e.response(&req.id);
    }

    let csv = match build_export_csv(conn, council_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let out_path = PathBuf::from(path);
    if let Some(parent) = out_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(&req.id, "file_write_failed", e.to_string(), None);
        }
    }
    let rows_exported = csv.lines().count().saturating_sub(1);
    if let Err(e) = std::fs::write(&out_path, &csv) {
        return err(&req.id, "file_write_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "path": path, "rowsExported": rows_exported }),
    )
}

fn handle_export_council_archive(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(council_id) = req.params.get("councilId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing councilId", None);
    };
    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing path", None);
    };

    let view = match councils::build_council_view(conn, council_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let csv = match build_export_csv(conn, council_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match archive::export_council_archive(&PathBuf::from(path), &view, &csv) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "path": path,
                "archiveFormat": summary.archive_format,
                "entryCount": summary.entry_count,
                "scoresSha256": summary.scores_sha256,
            }),
        ),
        Err(e) => err(&req.id, "archive_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.importPreview" => Some(handle_import_preview(state, req)),
        "scores.importCommit" => Some(handle_import_commit(state, req)),
        "scores.exportTemplate" => Some(handle_export_template(state, req)),
        "export.councilArchive" => Some(handle_export_council_archive(state, req)),
        _ => None,
    }
}
