use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;

/// School-wide placement of a ledger slice: every centralized record belongs to
/// exactly one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub school_id: String,
    pub level: String,
    /// Nominal grade number (1-based).
    pub grade: i64,
    pub section: String,
}

impl Scope {
    pub fn parse(raw: Option<&serde_json::Value>) -> Result<Scope, String> {
        let Some(raw) = raw else {
            return Err("missing scope".to_string());
        };
        let Some(obj) = raw.as_object() else {
            return Err("scope must be an object".to_string());
        };
        let text = |key: &str| -> Result<String, String> {
            let s = obj
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            if s.is_empty() {
                return Err(format!("scope.{} must be a non-empty string", key));
            }
            Ok(s)
        };
        let school_id = text("schoolId")?;
        let level = text("level")?.to_ascii_lowercase();
        let section = text("section")?.to_ascii_uppercase();
        let Some(grade) = obj.get("grade").and_then(|v| v.as_i64()) else {
            return Err("scope.grade must be an integer".to_string());
        };
        if grade < 1 {
            return Err("scope.grade must be >= 1".to_string());
        }
        Ok(Scope {
            school_id,
            level,
            grade,
            section,
        })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.school_id, self.level, self.grade, self.section
        )
    }
}

/// Academic term, 1 through 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Term(u8);

impl Term {
    pub const MAX: i64 = 3;

    pub fn new(raw: i64) -> Result<Term, EngineError> {
        if (1..=Self::MAX).contains(&raw) {
            Ok(Term(raw as u8))
        } else {
            Err(EngineError::InvalidTerm { term: raw })
        }
    }

    pub fn get(self) -> i64 {
        i64::from(self.0)
    }
}

/// Upper bound of a classroom final score.
pub const SCORE_MAX: f64 = 100.0;

/// Scores carry at most two fractional digits.
pub fn round_score(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// One enrollment's final term score as produced by the classroom gradebook.
/// A score of 0 means "no grade yet".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomFinalScore {
    pub enrollment_id: String,
    pub student_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub id: String,
    pub classroom_id: String,
    pub student_id: String,
}

/// A classroom-subject offering as resolved by the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassroomOffering {
    pub classroom_id: String,
    pub scope: Scope,
    pub subject_code: String,
    pub period_id: String,
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CentralizedRecord {
    pub id: String,
    #[serde(flatten)]
    pub scope: Scope,
    pub student_id: String,
    pub subject_code: String,
    pub term: i64,
    pub score: f64,
    pub attributed_to: String,
    pub period_id: String,
    pub created_at: String,
    pub updated_at: String,
}
