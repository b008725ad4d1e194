mod test_support;

use serde_json::json;
use std::fs;
use test_support::*;

const HEADER: &str = "order,title_vn,students,supervisor_score,supervisor_comment,reviewer_score,reviewer_comment,chairperson_score,chairperson_comment,secretary_score,secretary_comment";

#[test]
fn commit_writes_role_totals_and_reports_counts() {
    let workspace = temp_dir("defensed-import-commit");
    let sheet_dir = temp_dir("defensed-import-commit-sheets");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_basic_council(&mut stdin, &mut reader);
    add_topic(
        &mut stdin,
        &mut reader,
        &seeded.council_id,
        "Topic Beta",
        2,
        "SV002",
    );

    let sheet = sheet_dir.join("council.csv");
    fs::write(
        &sheet,
        format!(
            "{}\n1,Topic Alpha,SV001,8.5,làm tốt,7,,9,,8,\n2,Topic Beta,SV002,6,,,,7,,6.5,\n3,Ghost Topic,SV003,5,,,,,,,\n",
            HEADER
        ),
    )
    .expect("write sheet");

    let committed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scores.importCommit",
        json!({
            "councilId": seeded.council_id,
            "path": sheet.to_string_lossy(),
            "actor": faculty_actor(),
        }),
    );
    // Unmatched titles are skipped with a count, never a silent failure.
    assert_eq!(committed.get("successCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(committed.get("totalCount").and_then(|v| v.as_u64()), Some(3));
    let skipped = committed.get("skipped").and_then(|v| v.as_array()).unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].get("row").and_then(|v| v.as_u64()), Some(3));

    // Bulk records carry role totals with no per-criterion detail.
    let scores = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "score.getForTopic",
        json!({ "topicId": seeded.topic_id }),
    );
    let records = scores.get("scores").and_then(|v| v.as_array()).unwrap();
    assert_eq!(records.len(), 4);
    let supervisor = records
        .iter()
        .find(|r| r.get("scorerRole").and_then(|v| v.as_str()) == Some("supervisor"))
        .expect("supervisor record");
    assert_eq!(
        supervisor.get("totalScore").and_then(|v| v.as_f64()),
        Some(8.5)
    );
    assert_eq!(
        supervisor.get("comment").and_then(|v| v.as_str()),
        Some("làm tốt")
    );
    assert_eq!(supervisor.get("source").and_then(|v| v.as_str()), Some("import"));
    assert_eq!(
        supervisor
            .get("detailedScores")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn commit_skips_locked_topics_instead_of_aborting() {
    let workspace = temp_dir("defensed-import-locked");
    let sheet_dir = temp_dir("defensed-import-locked-sheets");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_basic_council(&mut stdin, &mut reader);
    add_topic(
        &mut stdin,
        &mut reader,
        &seeded.council_id,
        "Topic Beta",
        2,
        "SV002",
    );

    submit_score(&mut stdin, &mut reader, &seeded, "sup-1", 8.0);
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "topic.lock",
        json!({
            "councilId": seeded.council_id,
            "topicId": seeded.topic_id,
            "actor": faculty_actor(),
        }),
    );

    let sheet = sheet_dir.join("council.csv");
    fs::write(
        &sheet,
        format!(
            "{}\n1,Topic Alpha,SV001,9,,,,,,,\n2,Topic Beta,SV002,6,,,,,,,\n",
            HEADER
        ),
    )
    .expect("write sheet");

    let committed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "scores.importCommit",
        json!({
            "councilId": seeded.council_id,
            "path": sheet.to_string_lossy(),
            "actor": faculty_actor(),
        }),
    );
    assert_eq!(committed.get("successCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(committed.get("totalCount").and_then(|v| v.as_u64()), Some(2));
    let skipped = committed.get("skipped").and_then(|v| v.as_array()).unwrap();
    assert_eq!(
        skipped[0].get("reason").and_then(|v| v.as_str()),
        Some("topic is locked")
    );

    // The locked topic still holds the interactive 8.0, not the 9.0.
    let scores = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "score.getForTopic",
        json!({ "topicId": seeded.topic_id }),
    );
    let records = scores.get("scores").and_then(|v| v.as_array()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].get("totalScore").and_then(|v| v.as_f64()),
        Some(8.0)
    );
}

#[test]
fn import_then_export_round_trips_topic_score_associations() {
    let workspace = temp_dir("defensed-roundtrip");
    let sheet_dir = temp_dir("defensed-roundtrip-sheets");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_basic_council(&mut stdin, &mut reader);
    add_topic(
        &mut stdin,
        &mut reader,
        &seeded.council_id,
        "Topic Beta",
        2,
        "SV002",
    );

    let sheet = sheet_dir.join("in.csv");
    fs::write(
        &sheet,
        format!(
            "{}\n1,Topic Alpha,SV001,8,,7,,9,,8,\n2,Topic Beta,SV002,6,,5,,7,,6,\n",
            HEADER
        ),
    )
    .expect("write sheet");
    let committed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scores.importCommit",
        json!({
            "councilId": seeded.council_id,
            "path": sheet.to_string_lossy(),
            "actor": faculty_actor(),
        }),
    );
    assert_eq!(committed.get("successCount").and_then(|v| v.as_u64()), Some(2));

    let out = sheet_dir.join("out.csv");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "scores.exportTemplate",
        json!({
            "councilId": seeded.council_id,
            "path": out.to_string_lossy(),
        }),
    );
    assert_eq!(exported.get("rowsExported").and_then(|v| v.as_u64()), Some(2));

    let text = fs::read_to_string(&out).expect("read export");
    let mut lines = text.lines();
    let header = lines.next().expect("header");
    assert!(header.starts_with("order,title_vn,students,supervisor_score"));

    let rows: Vec<Vec<&str>> = lines
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.split(',').collect())
        .collect();
    assert_eq!(rows.len(), 2);

    // Same associations as the input sheet, matched by title.
    assert_eq!(rows[0][1], "Topic Alpha");
    assert_eq!(rows[0][3], "8");
    assert_eq!(rows[0][5], "7");
    assert_eq!(rows[0][7], "9");
    assert_eq!(rows[0][9], "8");
    assert_eq!(rows[1][1], "Topic Beta");
    assert_eq!(rows[1][3], "6");
    assert_eq!(rows[1][5], "5");
    assert_eq!(rows[1][7], "7");
    assert_eq!(rows[1][9], "6");
}
