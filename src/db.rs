use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

/// Council lifecycle. Persisted as text in `councils.state`; one-way:
/// scoring -> completed -> published, and published is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouncilState {
    Scoring,
    Completed,
    Published,
}

impl CouncilState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scoring" => Some(CouncilState::Scoring),
            "completed" => Some(CouncilState::Completed),
            "published" => Some(CouncilState::Published),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CouncilState::Scoring => "scoring",
            CouncilState::Completed => "completed",
            CouncilState::Published => "published",
        }
    }
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("defense.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS templates(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS criteria(
            id TEXT PRIMARY KEY,
            template_id TEXT NOT NULL,
            category TEXT NOT NULL,
            max_score REAL NOT NULL,
            elos TEXT,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(template_id) REFERENCES templates(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_criteria_template ON criteria(template_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subcriteria(
            id TEXT PRIMARY KEY,
            criterion_id TEXT NOT NULL,
            name TEXT NOT NULL,
            max_score REAL NOT NULL,
            elos TEXT,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(criterion_id) REFERENCES criteria(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subcriteria_criterion ON subcriteria(criterion_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS councils(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            template_id TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'scoring',
            council_comments TEXT,
            published_at TEXT,
            publish_idempotency_key TEXT,
            FOREIGN KEY(template_id) REFERENCES templates(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS topics(
            id TEXT PRIMARY KEY,
            council_id TEXT NOT NULL,
            title_vn TEXT NOT NULL,
            title_eng TEXT,
            defense_order INTEGER NOT NULL DEFAULT 0,
            is_locked INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(council_id) REFERENCES councils(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_topics_council ON topics(council_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS topic_students(
            topic_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(topic_id, student_id),
            FOREIGN KEY(topic_id) REFERENCES topics(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS topic_members(
            topic_id TEXT NOT NULL,
            member_id TEXT NOT NULL,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            PRIMARY KEY(topic_id, member_id),
            UNIQUE(topic_id, role),
            FOREIGN KEY(topic_id) REFERENCES topics(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_scores(
            id TEXT PRIMARY KEY,
            topic_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            scorer_id TEXT NOT NULL,
            scorer_role TEXT NOT NULL,
            total_score REAL NOT NULL,
            comment TEXT,
            submitted_at TEXT NOT NULL,
            FOREIGN KEY(topic_id) REFERENCES topics(id),
            UNIQUE(topic_id, student_id, scorer_id)
        )",
        [],
    )?;
    ensure_student_scores_source(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_scores_topic ON student_scores(topic_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_scores_student ON student_scores(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_entries(
            id TEXT PRIMARY KEY,
            student_score_id TEXT NOT NULL,
            criterion_id TEXT NOT NULL,
            subcriterion_id TEXT,
            score REAL NOT NULL,
            max_score REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(student_score_id) REFERENCES student_scores(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_entries_score ON score_entries(student_score_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            council_id TEXT NOT NULL,
            topic_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(council_id) REFERENCES councils(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_council ON notifications(council_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_student_scores_source(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces predate bulk import; score provenance was implicit.
    if table_has_column(conn, "student_scores", "source")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE student_scores ADD COLUMN source TEXT NOT NULL DEFAULT 'form'",
        [],
    )?;
    Ok(())
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
