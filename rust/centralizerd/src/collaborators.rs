//! Seams to the systems that own rosters, gradebooks, management periods and actors.
//!
//! The engines only see these traits. `SqliteCollaborators` reads the collaborator tables
//! that live in the same workspace database.

use crate::error::EngineError;
use crate::model::{ClassroomFinalScore, ClassroomOffering, Enrollment, Scope, Term};
use crate::settings;
use rusqlite::{Connection, OptionalExtension};

pub trait Gradebook {
    /// Final term score of every enrollment in the classroom.
    fn final_scores(
        &self,
        classroom_id: &str,
        term: Term,
    ) -> Result<Vec<ClassroomFinalScore>, EngineError>;
}

pub trait Roster {
    fn resolve_scope(&self, classroom_id: &str) -> Result<Option<ClassroomOffering>, EngineError>;
    fn enrollment(&self, enrollment_id: &str) -> Result<Option<Enrollment>, EngineError>;
}

pub trait PeriodRegistry {
    /// Queried on every call; the answer must never be cached across requests.
    fn is_active_period(&self, period_id: &str) -> Result<bool, EngineError>;
}

pub trait Authorizer {
    fn can_centralize(&self, actor_id: &str) -> Result<bool, EngineError>;
}

pub trait Collaborators: Gradebook + Roster + PeriodRegistry + Authorizer {}

impl<T: Gradebook + Roster + PeriodRegistry + Authorizer> Collaborators for T {}

pub struct SqliteCollaborators<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCollaborators<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl Gradebook for SqliteCollaborators<'_> {
    fn final_scores(
        &self,
        classroom_id: &str,
        term: Term,
    ) -> Result<Vec<ClassroomFinalScore>, EngineError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.student_id, s.score
             FROM enrollments e
             JOIN classroom_final_scores s ON s.enrollment_id = e.id
             WHERE e.classroom_id = ? AND s.term = ?
             ORDER BY e.student_id",
        )?;
        let rows = stmt
            .query_map((classroom_id, term.get()), |r| {
                Ok(ClassroomFinalScore {
                    enrollment_id: r.get(0)?,
                    student_id: r.get(1)?,
                    score: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl Roster for SqliteCollaborators<'_> {
    fn resolve_scope(&self, classroom_id: &str) -> Result<Option<ClassroomOffering>, EngineError> {
        let offering = self
            .conn
            .query_row(
                "SELECT id, school_id, level, grade, section, subject_code, period_id, teacher_id
                 FROM classroom_offerings
                 WHERE id = ?",
                [classroom_id],
                |r| {
                    Ok(ClassroomOffering {
                        classroom_id: r.get(0)?,
                        scope: Scope {
                            school_id: r.get(1)?,
                            level: r.get(2)?,
                            grade: r.get(3)?,
                            section: r.get(4)?,
                        },
                        subject_code: r.get(5)?,
                        period_id: r.get(6)?,
                        teacher_id: r.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(offering)
    }

    fn enrollment(&self, enrollment_id: &str) -> Result<Option<Enrollment>, EngineError> {
        let enrollment = self
            .conn
            .query_row(
                "SELECT id, classroom_id, student_id FROM enrollments WHERE id = ?",
                [enrollment_id],
                |r| {
                    Ok(Enrollment {
                        id: r.get(0)?,
                        classroom_id: r.get(1)?,
                        student_id: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(enrollment)
    }
}

impl PeriodRegistry for SqliteCollaborators<'_> {
    fn is_active_period(&self, period_id: &str) -> Result<bool, EngineError> {
        let active: Option<i64> = self
            .conn
            .query_row(
                "SELECT active FROM management_periods WHERE id = ?",
                [period_id],
                |r| r.get(0),
            )
            .optional()?;
        // Unknown periods are treated as closed.
        Ok(active.unwrap_or(0) != 0)
    }
}

impl Authorizer for SqliteCollaborators<'_> {
    fn can_centralize(&self, actor_id: &str) -> Result<bool, EngineError> {
        let role: Option<String> = self
            .conn
            .query_row("SELECT role FROM actors WHERE id = ?", [actor_id], |r| {
                r.get(0)
            })
            .optional()?;
        let Some(role) = role else {
            return Ok(false);
        };
        let allowed = settings::allowed_roles(self.conn)?;
        Ok(allowed.iter().any(|r| r.eq_ignore_ascii_case(&role)))
    }
}
