mod test_support;

use serde_json::json;
use test_support::*;

#[test]
fn publish_requires_complete_and_complete_requires_scores_everywhere() {
    let workspace = temp_dir("defensed-lifecycle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_basic_council(&mut stdin, &mut reader);
    let topic_b = add_topic(
        &mut stdin,
        &mut reader,
        &seeded.council_id,
        "Topic Beta",
        2,
        "SV002",
    );

    // Publishing straight from scoring is refused.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "council.publish",
        json!({ "councilId": seeded.council_id, "actor": faculty_actor() }),
    );
    assert_eq!(error_code(&error), "validation_failed");

    submit_score(&mut stdin, &mut reader, &seeded, "sup-1", 8.0);

    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "2b",
        "council.progress",
        json!({ "councilId": seeded.council_id }),
    );
    assert_eq!(progress.get("scoredTopics").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(progress.get("totalTopics").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(progress.get("percent").and_then(|v| v.as_f64()), Some(50.0));

    // Topic Beta has no score yet, so completion is premature.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "council.complete",
        json!({ "councilId": seeded.council_id, "actor": faculty_actor() }),
    );
    assert_eq!(error_code(&error), "validation_failed");
    let unscored = error
        .get("details")
        .and_then(|d| d.get("unscoredTopicIds"))
        .and_then(|v| v.as_array())
        .expect("unscored list");
    assert_eq!(unscored.len(), 1);
    assert_eq!(unscored[0].as_str(), Some(topic_b.as_str()));

    // Score the second topic and complete.
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "score.submit",
        json!({
            "councilId": seeded.council_id,
            "topicId": topic_b,
            "studentId": "SV002",
            "actor": panel_actor("rev-1"),
            "entries": entries(2.0, 1.0, 4.0),
        }),
    );
    let completed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "council.complete",
        json!({ "councilId": seeded.council_id, "actor": faculty_actor() }),
    );
    assert_eq!(completed.get("state").and_then(|v| v.as_str()), Some("completed"));

    // Retrying completion is harmless.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "council.complete",
        json!({ "councilId": seeded.council_id, "actor": faculty_actor() }),
    );
    assert_eq!(
        again.get("alreadyCompleted").and_then(|v| v.as_bool()),
        Some(true)
    );

    let published = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "council.publish",
        json!({
            "councilId": seeded.council_id,
            "actor": faculty_actor(),
            "idempotencyKey": "pub-001",
        }),
    );
    assert_eq!(published.get("state").and_then(|v| v.as_str()), Some("published"));
    assert_eq!(
        published.get("notificationsQueued").and_then(|v| v.as_u64()),
        Some(2)
    );
}

#[test]
fn published_is_terminal_for_every_mutation() {
    let workspace = temp_dir("defensed-terminal");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_basic_council(&mut stdin, &mut reader);
    submit_score(&mut stdin, &mut reader, &seeded, "sup-1", 8.0);
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "council.complete",
        json!({ "councilId": seeded.council_id, "actor": faculty_actor() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "council.publish",
        json!({ "councilId": seeded.council_id, "actor": faculty_actor() }),
    );

    let submit = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "score.submit",
        json!({
            "councilId": seeded.council_id,
            "topicId": seeded.topic_id,
            "studentId": "SV001",
            "actor": panel_actor("rev-1"),
            "entries": entries(1.0, 1.0, 3.0),
        }),
    );
    assert_eq!(error_code(&submit), "terminal_state");

    let lock = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "topic.lock",
        json!({
            "councilId": seeded.council_id,
            "topicId": seeded.topic_id,
            "actor": faculty_actor(),
        }),
    );
    assert_eq!(error_code(&lock), "terminal_state");

    let unlock = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "topic.unlock",
        json!({
            "councilId": seeded.council_id,
            "topicId": seeded.topic_id,
            "actor": faculty_actor(),
        }),
    );
    assert_eq!(error_code(&unlock), "terminal_state");

    let complete = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "council.complete",
        json!({ "councilId": seeded.council_id, "actor": faculty_actor() }),
    );
    assert_eq!(error_code(&complete), "terminal_state");
}

#[test]
fn publish_is_permission_gated_and_at_most_once() {
    let workspace = temp_dir("defensed-publish-once");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_basic_council(&mut stdin, &mut reader);
    submit_score(&mut stdin, &mut reader, &seeded, "sup-1", 8.0);
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "council.complete",
        json!({ "councilId": seeded.council_id, "actor": faculty_actor() }),
    );

    let denied = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "council.publish",
        json!({ "councilId": seeded.council_id, "actor": panel_actor("sec-1") }),
    );
    assert_eq!(error_code(&denied), "permission_denied");

    let published = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "council.publish",
        json!({
            "councilId": seeded.council_id,
            "actor": faculty_actor(),
            "idempotencyKey": "pub-42",
        }),
    );
    let published_at = published
        .get("publishedAt")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    // Same key: recorded outcome, no second side effect.
    let retried = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "council.publish",
        json!({
            "councilId": seeded.council_id,
            "actor": faculty_actor(),
            "idempotencyKey": "pub-42",
        }),
    );
    assert_eq!(
        retried.get("alreadyPublished").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        retried.get("publishedAt").and_then(|v| v.as_str()),
        Some(published_at.as_str())
    );

    // Different key: a genuine post-publication attempt.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "council.publish",
        json!({
            "councilId": seeded.council_id,
            "actor": faculty_actor(),
            "idempotencyKey": "pub-43",
        }),
    );
    assert_eq!(error_code(&error), "terminal_state");

    // The notification outbox holds one row per student, once.
    let notifications = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "notifications.list",
        json!({ "councilId": seeded.council_id }),
    );
    let rows = notifications
        .get("notifications")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("studentId").and_then(|v| v.as_str()), Some("SV001"));
    assert_eq!(
        rows[0].get("kind").and_then(|v| v.as_str()),
        Some("results_published")
    );
}
