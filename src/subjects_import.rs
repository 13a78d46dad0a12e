//! Subject list import from a plain CSV file: one header row, then one
//! subject per row with an optional teacher.

use crate::db;
use crate::timetable::validate_id;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Columns {
    pub code: usize,
    pub name: usize,
    pub teacher: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRecord {
    pub row: usize,
    pub code: String,
    pub name: String,
    pub teacher: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSheet {
    pub records: Vec<SubjectRecord>,
    /// `Row N: skipped (...)` lines, 1-based counting the header.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported: usize,
    pub teachers_added: usize,
    pub failed: usize,
    pub skipped: Vec<String>,
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| !l.trim().is_empty())
}

/// Splits one CSV line. Double quotes group commas; `""` inside quotes is a quote.
pub fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut cur).trim().to_string()),
            _ => cur.push(c),
        }
    }
    fields.push(cur.trim().to_string());
    fields
}

/// Finds the code, name and teacher columns by header text. The name column
/// is the first `subject`/`name` header that is not the code column, so a
/// `Subject Code, Subject Name` header resolves as expected.
pub fn locate_columns(header: &[String]) -> anyhow::Result<Columns> {
    let lower: Vec<String> = header.iter().map(|h| h.to_lowercase()).collect();
    let code = lower.iter().position(|h| h.contains("code"));
    let name = lower
        .iter()
        .enumerate()
        .position(|(i, h)| Some(i) != code && (h.contains("subject") || h.contains("name")));
    let teacher = lower.iter().position(|h| h.contains("teacher"));
    match (code, name) {
        (Some(code), Some(name)) => Ok(Columns {
            code,
            name,
            teacher: teacher.filter(|t| *t != code && *t != name),
        }),
        _ => anyhow::bail!("header must include subject code and subject name columns"),
    }
}

pub fn parse_sheet(text: &str) -> anyhow::Result<ParsedSheet> {
    let mut lines = data_lines(text);
    let Some((_, header)) = lines.next() else {
        anyhow::bail!("file is empty");
    };
    let cols = locate_columns(&split_line(header))?;

    let mut sheet = ParsedSheet::default();
    for (row, line) in lines {
        let fields = split_line(line);
        let cell = |i: usize| fields.get(i).map(String::as_str).unwrap_or("").trim();
        let code = cell(cols.code);
        let name = cell(cols.name);
        if code.is_empty() || name.is_empty() {
            sheet.skipped.push(format!("Row {row}: skipped (missing code/name)"));
            continue;
        }
        if validate_id(code, "code").is_err() {
            sheet.skipped.push(format!("Row {row}: skipped (invalid code {code})"));
            continue;
        }
        let teacher = cols
            .teacher
            .map(cell)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        sheet.records.push(SubjectRecord {
            row,
            code: code.to_string(),
            name: name.to_string(),
            teacher,
        });
    }
    Ok(sheet)
}

/// Rows after the header.
pub fn preview(path: &Path) -> anyhow::Result<usize> {
    let text = read_text(path)?;
    Ok(data_lines(&text).count().saturating_sub(1))
}

pub fn import(conn: &Connection, path: &Path) -> anyhow::Result<ImportSummary> {
    let sheet = parse_sheet(&read_text(path)?)?;
    let mut summary = ImportSummary {
        skipped: sheet.skipped,
        ..ImportSummary::default()
    };
    for rec in &sheet.records {
        let written = db::subject_upsert(conn, &rec.code, &rec.name).and_then(|_| match &rec.teacher {
            Some(t) => db::teacher_add(conn, &rec.code, t).map(|_| true),
            None => Ok(false),
        });
        match written {
            Ok(added) => {
                summary.imported += 1;
                if added {
                    summary.teachers_added += 1;
                }
            }
            Err(e) => {
                warn!(row = rec.row, code = %rec.code, error = %e, "subject import row failed");
                summary.failed += 1;
            }
        }
    }
    info!(
        imported = summary.imported,
        failed = summary.failed,
        skipped = summary.skipped.len(),
        "subject import finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn quoted_fields_keep_commas_and_quotes() {
        assert_eq!(
            split_line(r#"CS1, "Data, Structures" ,"Dr ""K"""#),
            vec!["CS1", "Data, Structures", r#"Dr "K""#]
        );
    }

    #[test]
    fn subject_code_header_is_not_taken_as_the_name() {
        let cols = locate_columns(&header(&["Subject Code", "Subject Name", "Teacher"])).expect("cols");
        assert_eq!(cols, Columns { code: 0, name: 1, teacher: Some(2) });

        let cols = locate_columns(&header(&["Name", "Code"])).expect("cols");
        assert_eq!(cols, Columns { code: 1, name: 0, teacher: None });

        assert!(locate_columns(&header(&["Code", "Teacher"])).is_err());
    }

    #[test]
    fn incomplete_rows_are_skipped_and_reported() {
        let text = "Code,Subject,Teacher\nCS1,Programming,Alice\n,Orphan,Bob\n\nCS2,,\nCS3,Networks,\n";
        let sheet = parse_sheet(text).expect("parse");
        let codes: Vec<&str> = sheet.records.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["CS1", "CS3"]);
        assert_eq!(sheet.records[1].teacher, None);
        assert_eq!(
            sheet.skipped,
            vec![
                "Row 3: skipped (missing code/name)".to_string(),
                "Row 5: skipped (missing code/name)".to_string()
            ]
        );
    }

    #[test]
    fn import_writes_subjects_and_teachers() {
        let dir = std::env::temp_dir().join(format!("routined-csv-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("subjects.csv");
        std::fs::write(&path, "\u{feff}Subject Code,Subject Name,Teacher\nCS1,Programming,Alice\nCS1,Programming,Bob\nCS2,Maths,\n")
            .expect("write");

        let conn = Connection::open_in_memory().expect("db");
        db::init_schema(&conn).expect("schema");
        assert_eq!(preview(&path).expect("preview"), 3);

        let summary = import(&conn, &path).expect("import");
        assert_eq!(summary.imported, 3);
        assert_eq!(summary.teachers_added, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(db::teachers_for_subject(&conn, "CS1").expect("teachers").len(), 2);
        assert_eq!(db::subject_name(&conn, "CS2").expect("name").as_deref(), Some("Maths"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
