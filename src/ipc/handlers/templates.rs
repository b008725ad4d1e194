use crate::entry;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn parse_criteria(params: &serde_json::Value) -> Result<Vec<entry::Criterion>, HandlerErr> {
    let Some(arr) = params.get("criteria").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing criteria[]"));
    };

    let mut criteria = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return Err(HandlerErr::new(
                "bad_params",
                format!("criteria[{}] must be an object", i),
            ));
        };
        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let Some(category) = obj.get("category").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::new(
                "bad_params",
                format!("criteria[{}] missing category", i),
            ));
        };
        let Some(max_score) = obj.get("maxScore").and_then(|v| v.as_f64()) else {
            return Err(HandlerErr::new(
                "bad_params",
                format!("criteria[{}] missing maxScore", i),
            ));
        };
        let elos = string_list(obj.get("elos"));

        let mut subcriteria = Vec::new();
        if let Some(subs) = obj.get("subcriteria").and_then(|v| v.as_array()) {
            for (j, sub_item) in subs.iter().enumerate() {
                let Some(sub) = sub_item.as_object() else {
                    return Err(HandlerErr::new(
                        "bad_params",
                        format!("criteria[{}].subcriteria[{}] must be an object", i, j),
                    ));
                };
                let sub_id = sub
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                let Some(name) = sub.get("name").and_then(|v| v.as_str()) else {
                    return Err(HandlerErr::new(
                        "bad_params",
                        format!("criteria[{}].subcriteria[{}] missing name", i, j),
                    ));
                };
                let Some(sub_max) = sub.get("maxScore").and_then(|v| v.as_f64()) else {
                    return Err(HandlerErr::new(
                        "bad_params",
                        format!("criteria[{}].subcriteria[{}] missing maxScore", i, j),
                    ));
                };
                subcriteria.push(entry::Subcriterion {
                    id: sub_id,
                    name: name.to_string(),
                    max_score: sub_max,
                    elos: string_list(sub.get("elos")),
                });
            }
        }

        criteria.push(entry::Criterion {
            id,
            category: category.to_string(),
            max_score,
            elos,
            subcriteria,
        });
    }
    Ok(criteria)
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn handle_template_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(name) = req.params.get("name").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing name", None);
    };
    let template_id = req
        .params
        .get("templateId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let criteria = match parse_criteria(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let problems = entry::validate_template(&criteria);
    if !problems.is_empty() {
        return err(
            &req.id,
            "validation_failed",
            "template is not self-consistent",
            Some(json!({ "errors": problems })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };
    let save = (|| -> Result<(), rusqlite::Error> {
        tx.execute(
            "INSERT INTO templates(id, name) VALUES(?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            (&template_id, name),
        )?;
        tx.execute(
            "DELETE FROM subcriteria WHERE criterion_id IN
             (SELECT id FROM criteria WHERE template_id = ?)",
            [&template_id],
        )?;
        tx.execute("DELETE FROM criteria WHERE template_id = ?", [&template_id])?;
        for (i, c) in criteria.iter().enumerate() {
            tx.execute(
                "INSERT INTO criteria(id, template_id, category, max_score, elos, sort_order)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &c.id,
                    &template_id,
                    &c.category,
                    c.max_score,
                    helpers::elos_to_json(&c.elos),
                    i as i64,
                ),
            )?;
            for (j, s) in c.subcriteria.iter().enumerate() {
                tx.execute(
                    "INSERT INTO subcriteria(id, criterion_id, name, max_score, elos, sort_order)
                     VALUES(?, ?, ?, ?, ?, ?)",
                    (
                        &s.id,
                        &c.id,
                        &s.name,
                        s.max_score,
                        helpers::elos_to_json(&s.elos),
                        j as i64,
                    ),
                )?;
            }
        }
        tx.commit()
    })();
    if let Err(e) = save {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "templateId": template_id, "criteriaCount": criteria.len() }),
    )
}

fn handle_template_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(template_id) = req.params.get("templateId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing templateId", None);
    };

    let template = match helpers::load_template(conn, template_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let criteria: Vec<serde_json::Value> = template
        .criteria
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "category": c.category,
                "maxScore": c.max_score,
                "elos": c.elos,
                "subcriteria": c.subcriteria.iter().map(|s| json!({
                    "id": s.id,
                    "name": s.name,
                    "maxScore": s.max_score,
                    "elos": s.elos,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "templateId": template.id,
            "name": template.name,
            "criteria": criteria
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "template.save" => Some(handle_template_save(state, req)),
        "template.get" => Some(handle_template_get(state, req)),
        _ => None,
    }
}
