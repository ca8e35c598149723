//! Expected subject sets: the configured list of subjects each grade must carry.
//!
//! Sets are stored per (level, grade) with a monotonically increasing version; the
//! newest version is the active one. Statistics use the size of the active set as the
//! composite denominator, so the set is never inferred from the grades on record.

use crate::error::EngineError;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedSubjectSet {
    pub level: String,
    pub grade: i64,
    pub version: i64,
    pub subjects: Vec<String>,
}

impl ExpectedSubjectSet {
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// Two-tier catalog: grades below `extension_from_grade` carry the base subjects,
/// grades at or above it carry base plus extension.
#[derive(Debug, Clone)]
pub struct TieredCatalog {
    pub base: Vec<String>,
    pub extension: Vec<String>,
    pub extension_from_grade: i64,
}

impl TieredCatalog {
    pub fn subjects_for_grade(&self, grade: i64) -> Vec<String> {
        let mut out = self.base.clone();
        if grade >= self.extension_from_grade {
            out.extend(self.extension.iter().cloned());
        }
        normalize_subjects(&out)
    }
}

pub fn normalize_subjects(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for s in raw {
        let code = s.trim().to_ascii_uppercase();
        if code.is_empty() || out.contains(&code) {
            continue;
        }
        out.push(code);
    }
    out
}

pub fn active_subject_set(
    conn: &Connection,
    level: &str,
    grade: i64,
) -> Result<Option<ExpectedSubjectSet>, EngineError> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT version, subjects_json
             FROM expected_subject_sets
             WHERE level = ? AND grade = ?
             ORDER BY version DESC
             LIMIT 1",
            (level, grade),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((version, subjects_json)) = row else {
        return Ok(None);
    };
    let subjects: Vec<String> =
        serde_json::from_str(&subjects_json).map_err(|e| EngineError::InvalidSettings {
            message: format!(
                "subject set {} grade {} v{} is not a JSON string list: {}",
                level, grade, version, e
            ),
        })?;
    Ok(Some(ExpectedSubjectSet {
        level: level.to_string(),
        grade,
        version,
        subjects,
    }))
}

/// Active set for a grade; a missing or empty set is a configuration error, never a
/// silent zero denominator.
pub fn expected_subject_set(
    conn: &Connection,
    level: &str,
    grade: i64,
) -> Result<ExpectedSubjectSet, EngineError> {
    let Some(set) = active_subject_set(conn, level, grade)? else {
        return Err(EngineError::MissingSubjectSet {
            level: level.to_string(),
            grade,
        });
    };
    if set.is_empty() {
        return Err(EngineError::EmptySubjectSet {
            level: level.to_string(),
            grade,
        });
    }
    Ok(set)
}

/// Appends a new version for (level, grade). Earlier versions stay for audit.
pub fn put_subject_set(
    conn: &Connection,
    level: &str,
    grade: i64,
    subjects: &[String],
) -> Result<ExpectedSubjectSet, EngineError> {
    let subjects = normalize_subjects(subjects);
    if subjects.is_empty() {
        return Err(EngineError::EmptySubjectSet {
            level: level.to_string(),
            grade,
        });
    }
    let next_version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) + 1
         FROM expected_subject_sets
         WHERE level = ? AND grade = ?",
        (level, grade),
        |r| r.get(0),
    )?;
    let subjects_json =
        serde_json::to_string(&subjects).map_err(|e| EngineError::InvalidSettings {
            message: e.to_string(),
        })?;
    conn.execute(
        "INSERT INTO expected_subject_sets(level, grade, version, subjects_json, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            level,
            grade,
            next_version,
            &subjects_json,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    tracing::info!(
        level,
        grade,
        version = next_version,
        subjects = subjects.len(),
        "subject set stored"
    );
    Ok(ExpectedSubjectSet {
        level: level.to_string(),
        grade,
        version: next_version,
        subjects,
    })
}

/// Writes a new version for every listed grade from a tiered catalog, all or nothing.
pub fn seed_tiered(
    conn: &Connection,
    level: &str,
    grades: &[i64],
    catalog: &TieredCatalog,
) -> Result<Vec<ExpectedSubjectSet>, EngineError> {
    let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut out = Vec::with_capacity(grades.len());
    for &grade in grades {
        out.push(put_subject_set(
            &tx,
            level,
            grade,
            &catalog.subjects_for_grade(grade),
        )?);
    }
    tx.commit()?;
    Ok(out)
}
