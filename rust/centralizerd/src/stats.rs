use crate::catalog;
use crate::error::EngineError;
use crate::ledger;
use crate::model::{Scope, Term};
use crate::settings::{self, StatisticsSettings};
use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Which count divides a student's score sum.
///
/// Students are divided by the number of subjects their grade is expected to carry, so
/// a student missing grades is pulled down by the absent subjects. Switching the active
/// rule is a one-line change to `COMPOSITE_DENOMINATOR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenominatorRule {
    ExpectedSubjectCount,
    #[allow(dead_code)]
    GradedSubjectCount,
}

pub const COMPOSITE_DENOMINATOR: DenominatorRule = DenominatorRule::ExpectedSubjectCount;

impl DenominatorRule {
    pub fn denominator(self, expected: usize, graded: usize) -> usize {
        match self {
            DenominatorRule::ExpectedSubjectCount => expected,
            DenominatorRule::GradedSubjectCount => graded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GradingScale {
    #[serde(rename = "0-10")]
    Ten,
    #[serde(rename = "0-100")]
    Hundred,
}

impl GradingScale {
    pub fn max(self) -> f64 {
        match self {
            GradingScale::Ten => 10.0,
            GradingScale::Hundred => 100.0,
        }
    }
}

/// The scale is inferred from the highest score on record. An empty slice reports the
/// native 0-100 scale.
pub fn detect_scale(max_observed: Option<f64>, ten_scale_max: f64) -> GradingScale {
    match max_observed {
        Some(m) if m <= ten_scale_max => GradingScale::Ten,
        _ => GradingScale::Hundred,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub pass: f64,
    pub honor: f64,
}

impl Thresholds {
    pub fn for_scale(scale: GradingScale, settings: &StatisticsSettings) -> Self {
        let unit = scale.max() / 100.0;
        Self {
            pass: round_2(settings.pass_percent * unit),
            honor: round_2(settings.honor_percent * unit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Fail,
    Pass,
    Honor,
}

pub fn classify(composite: f64, thresholds: &Thresholds) -> StudentStatus {
    if composite >= thresholds.honor {
        StudentStatus::Honor
    } else if composite >= thresholds.pass {
        StudentStatus::Pass
    } else {
        StudentStatus::Fail
    }
}

fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentComposite {
    pub student_id: String,
    pub composite: f64,
    pub materials_graded: usize,
    pub materials_expected: usize,
    pub status: StudentStatus,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsReport {
    pub scope: Scope,
    pub term: i64,
    pub period_id: String,
    pub scale: GradingScale,
    pub pass_threshold: f64,
    pub honor_threshold: f64,
    pub expected_subjects: usize,
    pub subject_set_version: i64,
    pub student_count: usize,
    pub mean_composite: f64,
    pub pass_count: usize,
    pub fail_count: usize,
    pub honor_count: usize,
    pub per_student: Vec<StudentComposite>,
}

/// Aggregates without touching the store. `graded` holds (student, score) pairs with
/// score > 0.
pub fn summarize(
    graded: &[(String, f64)],
    expected_count: usize,
    settings: &StatisticsSettings,
) -> Summary {
    let mut by_student: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    let mut max_observed: Option<f64> = None;
    for (student_id, score) in graded {
        if *score <= 0.0 {
            continue;
        }
        let e = by_student.entry(student_id.as_str()).or_insert((0.0, 0));
        e.0 += score;
        e.1 += 1;
        max_observed = Some(max_observed.map_or(*score, |m: f64| m.max(*score)));
    }

    let scale = detect_scale(max_observed, settings.ten_scale_max);
    let thresholds = Thresholds::for_scale(scale, settings);

    let mut raw: Vec<(String, f64, usize)> = by_student
        .into_iter()
        .map(|(student_id, (sum, graded_count))| {
            let denom = COMPOSITE_DENOMINATOR.denominator(expected_count, graded_count);
            let composite = if denom > 0 { sum / denom as f64 } else { 0.0 };
            (student_id.to_string(), composite, graded_count)
        })
        .collect();
    raw.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut per_student: Vec<StudentComposite> = Vec::with_capacity(raw.len());
    let mut pass_count = 0;
    let mut honor_count = 0;
    let mut composite_sum = 0.0;
    let mut rank = 0;
    let mut prev: Option<f64> = None;
    for (i, (student_id, composite, graded_count)) in raw.into_iter().enumerate() {
        // Competition ranking: ties share a rank, the next distinct value skips ahead.
        if prev != Some(composite) {
            rank = i + 1;
            prev = Some(composite);
        }
        let status = classify(composite, &thresholds);
        if status != StudentStatus::Fail {
            pass_count += 1;
        }
        if status == StudentStatus::Honor {
            honor_count += 1;
        }
        composite_sum += composite;
        per_student.push(StudentComposite {
            student_id,
            composite: round_2(composite),
            materials_graded: graded_count,
            materials_expected: expected_count,
            status,
            rank,
        });
    }

    let student_count = per_student.len();
    let mean_composite = if student_count > 0 {
        round_2(composite_sum / student_count as f64)
    } else {
        0.0
    };

    Summary {
        scale,
        thresholds,
        student_count,
        mean_composite,
        pass_count,
        fail_count: student_count - pass_count,
        honor_count,
        per_student,
    }
}

#[derive(Debug, Clone)]
pub struct Summary {
    pub scale: GradingScale,
    pub thresholds: Thresholds,
    pub student_count: usize,
    pub mean_composite: f64,
    pub pass_count: usize,
    pub fail_count: usize,
    pub honor_count: usize,
    pub per_student: Vec<StudentComposite>,
}

/// Composite averages and classification for one ledger slice. Read-only.
pub fn compute_statistics(
    conn: &Connection,
    scope: &Scope,
    term: Term,
    period_id: &str,
) -> Result<StatisticsReport, EngineError> {
    let subject_set = catalog::expected_subject_set(conn, &scope.level, scope.grade)?;
    let settings = settings::statistics_settings(conn)?;
    let graded = ledger::graded_scores(conn, scope, term, period_id)?;
    let summary = summarize(&graded, subject_set.len(), &settings);

    tracing::debug!(
        scope = %scope,
        term = term.get(),
        period = period_id,
        students = summary.student_count,
        expected = subject_set.len(),
        "statistics computed"
    );

    Ok(StatisticsReport {
        scope: scope.clone(),
        term: term.get(),
        period_id: period_id.to_string(),
        scale: summary.scale,
        pass_threshold: summary.thresholds.pass,
        honor_threshold: summary.thresholds.honor,
        expected_subjects: subject_set.len(),
        subject_set_version: subject_set.version,
        student_count: summary.student_count,
        mean_composite: summary.mean_composite,
        pass_count: summary.pass_count,
        fail_count: summary.fail_count,
        honor_count: summary.honor_count,
        per_student: summary.per_student,
    })
}
