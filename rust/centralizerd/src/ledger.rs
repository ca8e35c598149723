use crate::model::{CentralizedRecord, Scope, Term};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// A record about to be written. Timestamps are filled by the writer.
#[derive(Debug, Clone)]
pub struct RecordWrite<'a> {
    pub scope: &'a Scope,
    pub term: Term,
    pub student_id: &'a str,
    pub subject_code: &'a str,
    pub score: f64,
    pub attributed_to: &'a str,
    pub period_id: &'a str,
}

/// Bind values for the slice predicate below, in order.
fn slice_params(scope: &Scope, term: Term, period_id: &str) -> Vec<Value> {
    vec![
        Value::Text(scope.school_id.clone()),
        Value::Text(scope.level.clone()),
        Value::Integer(scope.grade),
        Value::Text(scope.section.clone()),
        Value::Integer(term.get()),
        Value::Text(period_id.to_string()),
    ]
}

const SLICE_WHERE: &str = "school_id = ? AND level = ? AND grade = ? AND section = ? \
                           AND term = ? AND period_id = ?";

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

/// createdAt of the period's existing rows for the subject-set, keyed by
/// (student, subject).
pub fn created_at_by_key(
    conn: &Connection,
    scope: &Scope,
    term: Term,
    period_id: &str,
    subjects: &BTreeSet<String>,
) -> rusqlite::Result<HashMap<(String, String), String>> {
    if subjects.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT student_id, subject_code, created_at
         FROM centralized_records
         WHERE {} AND subject_code IN ({})",
        SLICE_WHERE,
        placeholders(subjects.len())
    );
    let mut bind = slice_params(scope, term, period_id);
    bind.extend(subjects.iter().map(|s| Value::Text(s.clone())));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(bind), |r| {
        Ok(((r.get::<_, String>(0)?, r.get::<_, String>(1)?), r.get(2)?))
    })?;
    rows.collect()
}

/// Removes the period's rows for the given subjects only. Rows held by any other
/// management period are never touched.
pub fn delete_subjects(
    conn: &Connection,
    scope: &Scope,
    term: Term,
    period_id: &str,
    subjects: &BTreeSet<String>,
) -> rusqlite::Result<usize> {
    if subjects.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "DELETE FROM centralized_records
         WHERE {} AND subject_code IN ({})",
        SLICE_WHERE,
        placeholders(subjects.len())
    );
    let mut bind = slice_params(scope, term, period_id);
    bind.extend(subjects.iter().map(|s| Value::Text(s.clone())));
    conn.execute(&sql, params_from_iter(bind))
}

/// Inserts or replaces the record for the write's key. `created_at` is kept when the
/// key already exists.
///
/// Returns `false`, writing nothing, when the key is held by a row of another
/// management period.
pub fn upsert(
    conn: &Connection,
    w: &RecordWrite<'_>,
    created_at: &str,
    now: &str,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT INTO centralized_records(
            id, school_id, level, grade, section, student_id, subject_code, term,
            score, attributed_to, period_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(school_id, level, grade, section, student_id, subject_code, term)
         DO UPDATE SET
           score = excluded.score,
           attributed_to = excluded.attributed_to,
           updated_at = excluded.updated_at
         WHERE centralized_records.period_id = excluded.period_id",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            w.scope.school_id,
            w.scope.level,
            w.scope.grade,
            w.scope.section,
            w.student_id,
            w.subject_code,
            w.term.get(),
            w.score,
            w.attributed_to,
            w.period_id,
            created_at,
            now,
        ],
    )?;
    Ok(changed > 0)
}

/// Management period holding the record for a key, if any.
pub fn holding_period(
    conn: &Connection,
    scope: &Scope,
    term: Term,
    student_id: &str,
    subject_code: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT period_id FROM centralized_records
         WHERE school_id = ? AND level = ? AND grade = ? AND section = ?
           AND term = ? AND student_id = ? AND subject_code = ?",
        rusqlite::params![
            scope.school_id,
            scope.level,
            scope.grade,
            scope.section,
            term.get(),
            student_id,
            subject_code,
        ],
        |r| r.get(0),
    )
    .optional()
}

fn map_record(r: &rusqlite::Row<'_>) -> rusqlite::Result<CentralizedRecord> {
    Ok(CentralizedRecord {
        id: r.get(0)?,
        scope: Scope {
            school_id: r.get(1)?,
            level: r.get(2)?,
            grade: r.get(3)?,
            section: r.get(4)?,
        },
        student_id: r.get(5)?,
        subject_code: r.get(6)?,
        term: r.get(7)?,
        score: r.get(8)?,
        attributed_to: r.get(9)?,
        period_id: r.get(10)?,
        created_at: r.get(11)?,
        updated_at: r.get(12)?,
    })
}

pub fn load_slice(
    conn: &Connection,
    scope: &Scope,
    term: Term,
    period_id: &str,
) -> rusqlite::Result<Vec<CentralizedRecord>> {
    let sql = format!(
        "SELECT id, school_id, level, grade, section, student_id, subject_code, term,
                score, attributed_to, period_id, created_at, updated_at
         FROM centralized_records
         WHERE {}
         ORDER BY student_id, subject_code",
        SLICE_WHERE
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params_from_iter(slice_params(scope, term, period_id)),
        map_record,
    )?;
    rows.collect()
}

/// (student, score) pairs of the period's slice with a recorded grade (score > 0).
pub fn graded_scores(
    conn: &Connection,
    scope: &Scope,
    term: Term,
    period_id: &str,
) -> rusqlite::Result<Vec<(String, f64)>> {
    let sql = format!(
        "SELECT student_id, score
         FROM centralized_records
         WHERE {} AND score > 0
         ORDER BY student_id, subject_code",
        SLICE_WHERE
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(slice_params(scope, term, period_id)), |r| {
        Ok((r.get(0)?, r.get(1)?))
    })?;
    rows.collect()
}

/// Copies every live record of the scope (all terms) into the archive for the period,
/// then removes the live rows. Caller owns the transaction.
pub fn archive_scope(
    conn: &Connection,
    scope: &Scope,
    period_id: &str,
    now: &str,
) -> rusqlite::Result<usize> {
    let scope_bind = (
        &scope.school_id,
        &scope.level,
        scope.grade,
        &scope.section,
        period_id,
    );
    conn.execute(
        "INSERT INTO centralized_records_archive(
            id, school_id, level, grade, section, student_id, subject_code, term,
            score, attributed_to, period_id, created_at, updated_at, archived_at)
         SELECT id, school_id, level, grade, section, student_id, subject_code, term,
                score, attributed_to, period_id, created_at, updated_at, ?
         FROM centralized_records
         WHERE school_id = ? AND level = ? AND grade = ? AND section = ? AND period_id = ?",
        (
            now,
            scope_bind.0,
            scope_bind.1,
            scope_bind.2,
            scope_bind.3,
            scope_bind.4,
        ),
    )?;
    conn.execute(
        "DELETE FROM centralized_records
         WHERE school_id = ? AND level = ? AND grade = ? AND section = ? AND period_id = ?",
        scope_bind,
    )
}
