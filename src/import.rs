use crate::calc::ScorerRole;
use serde::Serialize;

/// Role columns a council exchange sheet may carry. The ordinary member
/// has no column in the observed sheet layout.
pub const IMPORT_ROLES: [ScorerRole; 4] = [
    ScorerRole::Supervisor,
    ScorerRole::Reviewer,
    ScorerRole::Chairperson,
    ScorerRole::Secretary,
];

pub const IMPORT_MAX_SCORE: f64 = 10.0;

/// One data row as parsed, before validation. Score cells stay raw text
/// so validation can report exactly what the sheet contained.
#[derive(Debug, Clone, Default)]
pub struct RawRow {
    /// 1-based data row number (header excluded), used in error reports.
    pub row: usize,
    pub order: Option<i64>,
    pub title_vn: String,
    pub students: Vec<String>,
    pub score_cells: [Option<String>; 4],
    pub comment_cells: [Option<String>; 4],
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row: usize,
    pub field: String,
    pub message: String,
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

struct ColumnMap {
    order: Option<usize>,
    title_vn: usize,
    students: Option<usize>,
    scores: [Option<usize>; 4],
    comments: [Option<usize>; 4],
}

/// Header columns are matched by name; anything unrecognized is ignored.
/// A sheet without a `title_vn` column is not an exchange sheet at all.
fn map_header(header: &[String]) -> Result<ColumnMap, String> {
    let mut map = ColumnMap {
        order: None,
        title_vn: usize::MAX,
        students: None,
        scores: [None; 4],
        comments: [None; 4],
    };
    for (idx, raw) in header.iter().enumerate() {
        let name = raw.trim().to_ascii_lowercase();
        match name.as_str() {
            "order" => map.order = Some(idx),
            "title_vn" => map.title_vn = idx,
            "students" => map.students = Some(idx),
            _ => {
                for (slot, role) in IMPORT_ROLES.iter().enumerate() {
                    if name == format!("{}_score", role.as_str()) {
                        map.scores[slot] = Some(idx);
                    } else if name == format!("{}_comment", role.as_str()) {
                        map.comments[slot] = Some(idx);
                    }
                }
            }
        }
    }
    if map.title_vn == usize::MAX {
        return Err("header has no title_vn column".to_string());
    }
    Ok(map)
}

/// Parse stage of the import pipeline. Fails before producing any row
/// when the file is not a recognizable exchange sheet.
pub fn parse_import_file(text: &str) -> Result<Vec<RawRow>, String> {
    let mut lines = text.lines();
    let header_line = loop {
        match lines.next() {
            Some(l) if l.trim().is_empty() => continue,
            Some(l) => break l,
            None => return Err("file is empty".to_string()),
        }
    };
    let map = map_header(&parse_csv_record(header_line))?;

    let mut rows = Vec::new();
    let mut row_no = 0usize;
    for raw_line in lines {
        let line = raw_line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }
        row_no += 1;
        let fields = parse_csv_record(line);
        let cell = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| fields.get(i)).map(|s| s.trim().to_string())
        };

        let mut row = RawRow {
            row: row_no,
            order: cell(map.order).and_then(|v| v.parse::<i64>().ok()),
            title_vn: cell(Some(map.title_vn)).unwrap_or_default(),
            students: cell(map.students)
                .map(|v| {
                    v.split(';')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            ..RawRow::default()
        };
        for slot in 0..IMPORT_ROLES.len() {
            row.score_cells[slot] = cell(map.scores[slot]).filter(|v| !v.is_empty());
            row.comment_cells[slot] = cell(map.comments[slot]).filter(|v| !v.is_empty());
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Validation stage: exhaustive, collecting every error across every row
/// so the preview can show them all at once.
pub fn validate_rows(rows: &[RawRow]) -> Vec<RowError> {
    let mut errors = Vec::new();
    for row in rows {
        if row.title_vn.trim().is_empty() {
            errors.push(RowError {
                row: row.row,
                field: "title_vn".to_string(),
                message: "topic title is required".to_string(),
            });
        }

        let mut any_score = false;
        for (slot, role) in IMPORT_ROLES.iter().enumerate() {
            let Some(raw) = &row.score_cells[slot] else {
                continue;
            };
            any_score = true;
            let field = format!("{}_score", role.as_str());
            match raw.parse::<f64>() {
                Ok(v) if (0.0..=IMPORT_MAX_SCORE).contains(&v) => {}
                Ok(v) => errors.push(RowError {
                    row: row.row,
                    field,
                    message: format!("score {} out of range [0, {}]", v, IMPORT_MAX_SCORE),
                }),
                Err(_) => errors.push(RowError {
                    row: row.row,
                    field,
                    message: format!("score '{}' is not a number", raw),
                }),
            }
        }

        if !any_score {
            errors.push(RowError {
                row: row.row,
                field: "scores".to_string(),
                message: "no score entered for any role".to_string(),
            });
        }
    }
    errors
}

/// Per-role parsed values for one validated row. Only meaningful after
/// `validate_rows` came back empty.
pub fn resolved_scores(row: &RawRow) -> Vec<(ScorerRole, f64, Option<String>)> {
    let mut out = Vec::new();
    for (slot, role) in IMPORT_ROLES.iter().enumerate() {
        if let Some(raw) = &row.score_cells[slot] {
            if let Ok(v) = raw.parse::<f64>() {
                out.push((*role, v, row.comment_cells[slot].clone()));
            }
        }
    }
    out
}

pub const EXPORT_HEADER: &str = "order,title_vn,students,supervisor_score,supervisor_comment,reviewer_score,reviewer_comment,chairperson_score,chairperson_comment,secretary_score,secretary_comment";

/// One export line in the exchange shape; import and export must agree
/// on columns so a round-trip preserves topic/score associations.
pub fn export_line(
    order: i64,
    title_vn: &str,
    students: &[String],
    cells: &[(Option<f64>, Option<String>); 4],
) -> String {
    let mut fields: Vec<String> = vec![
        order.to_string(),
        csv_quote(title_vn),
        csv_quote(&students.join("; ")),
    ];
    for (score, comment) in cells {
        fields.push(score.map(|v| v.to_string()).unwrap_or_default());
        fields.push(csv_quote(comment.as_deref().unwrap_or("")));
    }
    fields.join(",")
}
