use serde_json::json;
use thiserror::Error;

use crate::model::Scope;

/// Broad category of an engine failure. Callers decide retry policy on the kind:
/// validation errors need a corrected request, closed periods need an administrator,
/// store errors may be retried as a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    PeriodClosed,
    Authorization,
    Configuration,
    Store,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::PeriodClosed => "period_closed",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Store => "store",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("batch is empty")]
    EmptyBatch,

    #[error("enrollment {enrollment_id} resolves to scope {found}, expected {expected}")]
    CrossScopeBatch {
        enrollment_id: String,
        expected: Scope,
        found: Scope,
    },

    #[error("term must be in 1..=3, got {term}")]
    InvalidTerm { term: i64 },

    #[error("score {score} for enrollment {enrollment_id} is outside 0..=100")]
    InvalidScore { enrollment_id: String, score: f64 },

    #[error("unknown enrollment {enrollment_id}")]
    UnknownEnrollment { enrollment_id: String },

    #[error("unknown classroom {classroom_id}")]
    UnknownClassroom { classroom_id: String },

    #[error("enrollment {enrollment_id} belongs to student {expected}, not {found}")]
    StudentMismatch {
        enrollment_id: String,
        expected: String,
        found: String,
    },

    #[error("student {student_id} appears more than once for subject {subject_code}")]
    DuplicateKey {
        student_id: String,
        subject_code: String,
    },

    #[error("requested subjects {requested:?} do not match batch subjects {found:?}")]
    SubjectSetMismatch {
        requested: Vec<String>,
        found: Vec<String>,
    },

    #[error("enrollment {enrollment_id} belongs to period {found}, expected {expected}")]
    PeriodMismatch {
        enrollment_id: String,
        expected: String,
        found: String,
    },

    #[error("management period {period_id} is not active")]
    PeriodNotActive { period_id: String },

    #[error("management period {period_id} is still active")]
    PeriodStillActive { period_id: String },

    #[error(
        "record for student {student_id} subject {subject_code} is held by management \
         period {period_id}; archive that period first"
    )]
    KeyHeldByOtherPeriod {
        student_id: String,
        subject_code: String,
        period_id: String,
    },

    #[error("actor {actor_id} may not centralize grades")]
    NotAuthorized { actor_id: String },

    #[error("no expected subject set configured for {level} grade {grade}")]
    MissingSubjectSet { level: String, grade: i64 },

    #[error("expected subject set for {level} grade {grade} is empty")]
    EmptySubjectSet { level: String, grade: i64 },

    #[error("invalid settings: {message}")]
    InvalidSettings { message: String },

    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::EmptyBatch
            | EngineError::CrossScopeBatch { .. }
            | EngineError::InvalidTerm { .. }
            | EngineError::InvalidScore { .. }
            | EngineError::UnknownEnrollment { .. }
            | EngineError::UnknownClassroom { .. }
            | EngineError::StudentMismatch { .. }
            | EngineError::DuplicateKey { .. }
            | EngineError::SubjectSetMismatch { .. }
            | EngineError::PeriodMismatch { .. } => ErrorKind::Validation,
            EngineError::PeriodNotActive { .. }
            | EngineError::PeriodStillActive { .. }
            | EngineError::KeyHeldByOtherPeriod { .. } => ErrorKind::PeriodClosed,
            EngineError::NotAuthorized { .. } => ErrorKind::Authorization,
            EngineError::MissingSubjectSet { .. }
            | EngineError::EmptySubjectSet { .. }
            | EngineError::InvalidSettings { .. } => ErrorKind::Configuration,
            EngineError::Store(_) => ErrorKind::Store,
        }
    }

    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::EmptyBatch => "empty_batch",
            EngineError::CrossScopeBatch { .. } => "cross_scope_batch",
            EngineError::InvalidTerm { .. } => "invalid_term",
            EngineError::InvalidScore { .. } => "invalid_score",
            EngineError::UnknownEnrollment { .. } => "unknown_enrollment",
            EngineError::UnknownClassroom { .. } => "unknown_classroom",
            EngineError::StudentMismatch { .. } => "student_mismatch",
            EngineError::DuplicateKey { .. } => "duplicate_key",
            EngineError::SubjectSetMismatch { .. } => "subject_set_mismatch",
            EngineError::PeriodMismatch { .. } => "period_mismatch",
            EngineError::PeriodNotActive { .. } => "period_not_active",
            EngineError::PeriodStillActive { .. } => "period_still_active",
            EngineError::KeyHeldByOtherPeriod { .. } => "key_held_by_other_period",
            EngineError::NotAuthorized { .. } => "not_authorized",
            EngineError::MissingSubjectSet { .. } => "missing_subject_set",
            EngineError::EmptySubjectSet { .. } => "empty_subject_set",
            EngineError::InvalidSettings { .. } => "invalid_settings",
            EngineError::Store(_) => "store_failed",
        }
    }

    pub fn details(&self) -> serde_json::Value {
        let mut details = json!({ "kind": self.kind().as_str() });
        let extra = match self {
            EngineError::CrossScopeBatch {
                enrollment_id,
                expected,
                found,
            } => json!({
                "enrollmentId": enrollment_id,
                "expectedScope": expected,
                "foundScope": found,
            }),
            EngineError::InvalidTerm { term } => json!({ "term": term }),
            EngineError::InvalidScore {
                enrollment_id,
                score,
            } => json!({ "enrollmentId": enrollment_id, "score": score }),
            EngineError::UnknownEnrollment { enrollment_id } => {
                json!({ "enrollmentId": enrollment_id })
            }
            EngineError::UnknownClassroom { classroom_id } => {
                json!({ "classroomId": classroom_id })
            }
            EngineError::StudentMismatch {
                enrollment_id,
                expected,
                found,
            } => json!({
                "enrollmentId": enrollment_id,
                "expectedStudentId": expected,
                "foundStudentId": found,
            }),
            EngineError::DuplicateKey {
                student_id,
                subject_code,
            } => json!({ "studentId": student_id, "subjectCode": subject_code }),
            EngineError::SubjectSetMismatch { requested, found } => {
                json!({ "requested": requested, "found": found })
            }
            EngineError::PeriodMismatch {
                enrollment_id,
                expected,
                found,
            } => json!({
                "enrollmentId": enrollment_id,
                "expectedPeriodId": expected,
                "foundPeriodId": found,
            }),
            EngineError::PeriodNotActive { period_id }
            | EngineError::PeriodStillActive { period_id } => json!({ "periodId": period_id }),
            EngineError::KeyHeldByOtherPeriod {
                student_id,
                subject_code,
                period_id,
            } => json!({
                "studentId": student_id,
                "subjectCode": subject_code,
                "heldByPeriodId": period_id,
            }),
            EngineError::NotAuthorized { actor_id } => json!({ "actorId": actor_id }),
            EngineError::MissingSubjectSet { level, grade }
            | EngineError::EmptySubjectSet { level, grade } => {
                json!({ "level": level, "grade": grade })
            }
            _ => json!({}),
        };
        if let (Some(d), Some(e)) = (details.as_object_mut(), extra.as_object()) {
            for (k, v) in e {
                d.insert(k.clone(), v.clone());
            }
        }
        details
    }
}
