#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_defensed");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn defensed");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Expects failure and returns the error object for code/details asserts.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

pub fn error_code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

pub fn faculty_actor() -> serde_json::Value {
    json!({ "userId": "board-1", "facultyBoard": true })
}

pub fn panel_actor(user_id: &str) -> serde_json::Value {
    json!({ "userId": user_id, "facultyBoard": false })
}

/// Standard rubric: one criterion split 2.0 + 2.0 and one flat criterion
/// worth 6.0, total 10.0.
pub fn rubric_criteria() -> serde_json::Value {
    json!([
        {
            "id": "c1",
            "category": "Content",
            "maxScore": 4.0,
            "elos": ["ELO1"],
            "subcriteria": [
                { "id": "c1a", "name": "Problem statement", "maxScore": 2.0 },
                { "id": "c1b", "name": "Methodology", "maxScore": 2.0 }
            ]
        },
        {
            "id": "c2",
            "category": "Presentation",
            "maxScore": 6.0,
            "subcriteria": []
        }
    ])
}

pub fn standard_members() -> serde_json::Value {
    json!([
        { "memberId": "sup-1", "name": "Dr. Supervisor", "role": "supervisor" },
        { "memberId": "rev-1", "name": "Dr. Reviewer", "role": "reviewer" },
        { "memberId": "chair-1", "name": "Dr. Chair", "role": "chairperson" },
        { "memberId": "sec-1", "name": "Dr. Secretary", "role": "secretary" },
        { "memberId": "mem-1", "name": "Dr. Member", "role": "member" }
    ])
}

pub struct SeededCouncil {
    pub template_id: String,
    pub council_id: String,
    pub topic_id: String,
}

/// One council, one topic ("Topic Alpha") with student SV001 and a full
/// five-role panel.
pub fn seed_basic_council(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> SeededCouncil {
    let template = request_ok(
        stdin,
        reader,
        "seed-template",
        "template.save",
        json!({ "name": "Defense rubric", "criteria": rubric_criteria() }),
    );
    let template_id = template
        .get("templateId")
        .and_then(|v| v.as_str())
        .expect("templateId")
        .to_string();

    let council = request_ok(
        stdin,
        reader,
        "seed-council",
        "council.create",
        json!({ "name": "Council A", "templateId": template_id }),
    );
    let council_id = council
        .get("councilId")
        .and_then(|v| v.as_str())
        .expect("councilId")
        .to_string();

    let topic = request_ok(
        stdin,
        reader,
        "seed-topic",
        "council.addTopic",
        json!({
            "councilId": council_id,
            "titleVn": "Topic Alpha",
            "titleEng": "Topic Alpha (EN)",
            "defenseOrder": 1,
            "students": [{ "studentId": "SV001", "name": "Nguyen Van A" }],
            "members": standard_members(),
        }),
    );
    let topic_id = topic
        .get("topicId")
        .and_then(|v| v.as_str())
        .expect("topicId")
        .to_string();

    SeededCouncil {
        template_id,
        council_id,
        topic_id,
    }
}

pub fn add_topic(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    council_id: &str,
    title_vn: &str,
    defense_order: i64,
    student_id: &str,
) -> String {
    let topic = request_ok(
        stdin,
        reader,
        "seed-topic-extra",
        "council.addTopic",
        json!({
            "councilId": council_id,
            "titleVn": title_vn,
            "defenseOrder": defense_order,
            "students": [{ "studentId": student_id, "name": student_id }],
            "members": standard_members(),
        }),
    );
    topic
        .get("topicId")
        .and_then(|v| v.as_str())
        .expect("topicId")
        .to_string()
}

/// Entries against `rubric_criteria`, totalling sub1 + sub2 + flat.
pub fn entries(sub1: f64, sub2: f64, flat: f64) -> serde_json::Value {
    json!([
        { "criterionId": "c1", "subcriterionId": "c1a", "score": sub1 },
        { "criterionId": "c1", "subcriterionId": "c1b", "score": sub2 },
        { "criterionId": "c2", "score": flat }
    ])
}

/// Submits a full-form score for one panel member; asserts success.
pub fn submit_score(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    seeded: &SeededCouncil,
    user_id: &str,
    total: f64,
) -> serde_json::Value {
    // Split the total across the rubric without breaching any maxScore.
    let sub1 = (total / 2.0).min(2.0);
    let sub2 = ((total - sub1) / 2.0).min(2.0);
    let flat = (total - sub1 - sub2).min(6.0);
    request_ok(
        stdin,
        reader,
        "seed-score",
        "score.submit",
        json!({
            "councilId": seeded.council_id,
            "topicId": seeded.topic_id,
            "studentId": "SV001",
            "actor": panel_actor(user_id),
            "entries": entries(sub1, sub2, flat),
        }),
    )
}
