//! Centralization: consolidating classroom final scores into the school-wide ledger.
//!
//! A batch replaces the ledger rows of the subjects it carries, inside one IMMEDIATE
//! transaction, so readers see either the old subject-set or the new one. Subjects not
//! in the batch are never touched.

use crate::collaborators::{Authorizer, Collaborators, PeriodRegistry};
use crate::error::EngineError;
use crate::ledger::{self, RecordWrite};
use crate::model::{round_score, ClassroomFinalScore, Scope, Term, SCORE_MAX};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone)]
pub struct CentralizeRequest {
    pub scope: Scope,
    pub term: Term,
    pub period_id: String,
    /// Subjects the caller expects the batch to carry. Checked, never widened.
    pub subjects: Option<BTreeSet<String>>,
    pub batch: Vec<ClassroomFinalScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CentralizeOutcome {
    pub records_written: usize,
    pub subjects: Vec<String>,
    pub term: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveOutcome {
    pub records_archived: usize,
}

/// A batch item after roster resolution.
#[derive(Debug, Clone)]
struct ResolvedItem {
    student_id: String,
    subject_code: String,
    score: f64,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn validate_score(item: &ClassroomFinalScore) -> Result<f64, EngineError> {
    if !item.score.is_finite() || item.score < 0.0 || item.score > SCORE_MAX {
        return Err(EngineError::InvalidScore {
            enrollment_id: item.enrollment_id.clone(),
            score: item.score,
        });
    }
    Ok(round_score(item.score))
}

fn require_authorized<C: Authorizer + ?Sized>(
    collab: &C,
    actor_id: &str,
) -> Result<(), EngineError> {
    if !collab.can_centralize(actor_id)? {
        return Err(EngineError::NotAuthorized {
            actor_id: actor_id.to_string(),
        });
    }
    Ok(())
}

fn require_active<C: PeriodRegistry + ?Sized>(
    collab: &C,
    period_id: &str,
) -> Result<(), EngineError> {
    if !collab.is_active_period(period_id)? {
        return Err(EngineError::PeriodNotActive {
            period_id: period_id.to_string(),
        });
    }
    Ok(())
}

/// Resolves every item through the roster and checks that the whole batch targets the
/// requested scope and period, with one item per (student, subject).
fn resolve_batch<C: Collaborators + ?Sized>(
    collab: &C,
    scope: &Scope,
    period_id: &str,
    batch: &[ClassroomFinalScore],
) -> Result<Vec<ResolvedItem>, EngineError> {
    let mut out: Vec<ResolvedItem> = Vec::with_capacity(batch.len());
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for item in batch {
        let score = validate_score(item)?;
        let Some(enrollment) = collab.enrollment(&item.enrollment_id)? else {
            return Err(EngineError::UnknownEnrollment {
                enrollment_id: item.enrollment_id.clone(),
            });
        };
        if enrollment.student_id != item.student_id {
            return Err(EngineError::StudentMismatch {
                enrollment_id: enrollment.id,
                expected: enrollment.student_id,
                found: item.student_id.clone(),
            });
        }
        let Some(offering) = collab.resolve_scope(&enrollment.classroom_id)? else {
            return Err(EngineError::UnknownClassroom {
                classroom_id: enrollment.classroom_id,
            });
        };
        if offering.scope != *scope {
            return Err(EngineError::CrossScopeBatch {
                enrollment_id: item.enrollment_id.clone(),
                expected: scope.clone(),
                found: offering.scope,
            });
        }
        if offering.period_id != period_id {
            return Err(EngineError::PeriodMismatch {
                enrollment_id: item.enrollment_id.clone(),
                expected: period_id.to_string(),
                found: offering.period_id,
            });
        }
        if !seen.insert((item.student_id.clone(), offering.subject_code.clone())) {
            return Err(EngineError::DuplicateKey {
                student_id: item.student_id.clone(),
                subject_code: offering.subject_code,
            });
        }
        out.push(ResolvedItem {
            student_id: item.student_id.clone(),
            subject_code: offering.subject_code,
            score,
        });
    }
    Ok(out)
}

/// Writes one record, refusing a key still held by another management period.
fn write_record(
    tx: &Transaction<'_>,
    w: &RecordWrite<'_>,
    created_at: &str,
    now: &str,
) -> Result<(), EngineError> {
    if ledger::upsert(tx, w, created_at, now)? {
        return Ok(());
    }
    let held_by = ledger::holding_period(tx, w.scope, w.term, w.student_id, w.subject_code)?;
    Err(EngineError::KeyHeldByOtherPeriod {
        student_id: w.student_id.to_string(),
        subject_code: w.subject_code.to_string(),
        period_id: held_by.unwrap_or_default(),
    })
}

/// Replaces the ledger rows for the batch's subject-set in `req.scope` / `req.term`.
///
/// Validation, authorization and the active-period check all happen before anything is
/// written; any failure leaves the ledger exactly as it was. Re-running the same batch
/// yields the same ledger and the same `records_written`.
pub fn centralize<C: Collaborators + ?Sized>(
    conn: &Connection,
    collab: &C,
    req: &CentralizeRequest,
    actor_id: &str,
) -> Result<CentralizeOutcome, EngineError> {
    let span = tracing::info_span!(
        "centralize",
        scope = %req.scope,
        term = req.term.get(),
        period = %req.period_id,
        actor = actor_id,
        items = req.batch.len()
    );
    let _guard = span.enter();

    require_authorized(collab, actor_id)?;
    if req.batch.is_empty() {
        return Err(EngineError::EmptyBatch);
    }
    let items = resolve_batch(collab, &req.scope, &req.period_id, &req.batch)?;

    let subjects: BTreeSet<String> = items.iter().map(|i| i.subject_code.clone()).collect();
    if let Some(requested) = &req.subjects {
        if *requested != subjects {
            return Err(EngineError::SubjectSetMismatch {
                requested: requested.iter().cloned().collect(),
                found: subjects.into_iter().collect(),
            });
        }
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    // Checked under the write lock so a period closed by a concurrent writer is seen.
    require_active(collab, &req.period_id)?;

    let now = now_rfc3339();
    let created =
        ledger::created_at_by_key(&tx, &req.scope, req.term, &req.period_id, &subjects)?;
    let cleared = ledger::delete_subjects(&tx, &req.scope, req.term, &req.period_id, &subjects)?;
    for item in &items {
        let created_at = created
            .get(&(item.student_id.clone(), item.subject_code.clone()))
            .map(String::as_str)
            .unwrap_or(now.as_str());
        write_record(
            &tx,
            &RecordWrite {
                scope: &req.scope,
                term: req.term,
                student_id: &item.student_id,
                subject_code: &item.subject_code,
                score: item.score,
                attributed_to: actor_id,
                period_id: &req.period_id,
            },
            created_at,
            &now,
        )?;
    }
    tx.commit()?;

    tracing::info!(
        cleared,
        written = items.len(),
        subjects = subjects.len(),
        "centralization committed"
    );
    Ok(CentralizeOutcome {
        records_written: items.len(),
        subjects: subjects.into_iter().collect(),
        term: req.term.get(),
    })
}

/// Propagates one classroom's final scores to the ledger, upserting per student. Rows of
/// students in other classrooms for the same subject are left alone.
pub fn centralize_single_classroom<C: Collaborators + ?Sized>(
    conn: &Connection,
    collab: &C,
    classroom_id: &str,
    term: Term,
    actor_id: &str,
) -> Result<CentralizeOutcome, EngineError> {
    let span = tracing::info_span!(
        "centralize_classroom",
        classroom = classroom_id,
        term = term.get(),
        actor = actor_id
    );
    let _guard = span.enter();

    require_authorized(collab, actor_id)?;
    let Some(offering) = collab.resolve_scope(classroom_id)? else {
        return Err(EngineError::UnknownClassroom {
            classroom_id: classroom_id.to_string(),
        });
    };
    let batch = collab.final_scores(classroom_id, term)?;
    if batch.is_empty() {
        return Err(EngineError::EmptyBatch);
    }
    let items = resolve_batch(collab, &offering.scope, &offering.period_id, &batch)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    require_active(collab, &offering.period_id)?;
    let now = now_rfc3339();
    for item in &items {
        write_record(
            &tx,
            &RecordWrite {
                scope: &offering.scope,
                term,
                student_id: &item.student_id,
                subject_code: &item.subject_code,
                score: item.score,
                attributed_to: actor_id,
                period_id: &offering.period_id,
            },
            &now,
            &now,
        )?;
    }
    tx.commit()?;

    tracing::info!(
        written = items.len(),
        classroom = %offering.classroom_id,
        teacher = ?offering.teacher_id,
        subject = %offering.subject_code,
        "classroom centralized"
    );
    Ok(CentralizeOutcome {
        records_written: items.len(),
        subjects: vec![offering.subject_code],
        term: term.get(),
    })
}

/// Moves a closed period's records for the scope out of the live ledger.
pub fn archive_scope<C: Collaborators + ?Sized>(
    conn: &Connection,
    collab: &C,
    scope: &Scope,
    period_id: &str,
    actor_id: &str,
) -> Result<ArchiveOutcome, EngineError> {
    require_authorized(collab, actor_id)?;
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    if collab.is_active_period(period_id)? {
        return Err(EngineError::PeriodStillActive {
            period_id: period_id.to_string(),
        });
    }
    let archived = ledger::archive_scope(&tx, scope, period_id, &now_rfc3339())?;
    tx.commit()?;
    tracing::info!(scope = %scope, period = period_id, archived, "scope archived");
    Ok(ArchiveOutcome {
        records_archived: archived,
    })
}
