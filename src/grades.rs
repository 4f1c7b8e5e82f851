use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Marks live on a 0-20 scale; 10.5 is the fixed approval cutoff.
pub const PASS_MARK: f64 = 10.5;

pub const EVALUATION_SLOTS: usize = 8;
pub const PRACTICE_SLOTS: usize = 4;
pub const PARTIAL_SLOTS: usize = 2;

/// Registrar-compatible 2-decimal rounding:
/// `Int(100*x + 0.5) / 100`
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Same scheme at 1 decimal, used for cohort percentages.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Evaluations,
    Practices,
    Partials,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Evaluations => "evaluations",
            Category::Practices => "practices",
            Category::Partials => "partials",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s.to_ascii_lowercase().as_str() {
            "evaluations" => Some(Category::Evaluations),
            "practices" => Some(Category::Practices),
            "partials" => Some(Category::Partials),
            _ => None,
        }
    }

    pub fn slot_capacity(self) -> usize {
        match self {
            Category::Evaluations => EVALUATION_SLOTS,
            Category::Practices => PRACTICE_SLOTS,
            Category::Partials => PARTIAL_SLOTS,
        }
    }
}

/// One student's raw slots for one course. A `None` slot was never entered;
/// a stored 0 is read back as not-entered too (legacy convention: teachers
/// clear a cell by typing 0).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreSet {
    pub evaluations: Vec<Option<f64>>,
    pub practices: Vec<Option<f64>>,
    pub partials: Vec<Option<f64>>,
}

impl ScoreSet {
    pub fn category(&self, cat: Category) -> &[Option<f64>] {
        match cat {
            Category::Evaluations => &self.evaluations,
            Category::Practices => &self.practices,
            Category::Partials => &self.partials,
        }
    }

    pub fn category_mut(&mut self, cat: Category) -> &mut Vec<Option<f64>> {
        match cat {
            Category::Evaluations => &mut self.evaluations,
            Category::Practices => &mut self.practices,
            Category::Partials => &mut self.partials,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryWeights {
    pub evaluations: f64,
    pub practices: f64,
    pub partials: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            evaluations: 0.33,
            practices: 0.33,
            partials: 0.34,
        }
    }
}

impl CategoryWeights {
    pub fn weight(&self, cat: Category) -> f64 {
        match cat {
            Category::Evaluations => self.evaluations,
            Category::Practices => self.practices,
            Category::Partials => self.partials,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GradeStatus {
    Approved,
    Disapproved,
    NoGrade,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub average: Option<f64>,
    pub weight: f64,
    /// `average * weight`; absent when the category has no entered scores,
    /// in which case it contributes nothing to the final mark.
    pub weighted: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResult {
    pub evaluations: CategoryBreakdown,
    pub practices: CategoryBreakdown,
    pub partials: CategoryBreakdown,
    pub final_score: Option<f64>,
    pub status: GradeStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSummary {
    pub total: usize,
    pub approved: usize,
    pub disapproved: usize,
    pub approval_percentage: f64,
}

/// Mean of the entered slots, 2-decimal rounded. `None` and 0 slots are
/// both skipped; an all-skipped category yields `None`, which callers must
/// keep distinct from an average of 0. No range check here: out-of-range
/// values flow through as-is and are rejected earlier, at the IPC boundary.
pub fn average_category(scores: &[Option<f64>]) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for s in scores {
        match s {
            Some(v) if *v != 0.0 => {
                sum += *v;
                count += 1;
            }
            _ => {}
        }
    }
    if count == 0 {
        None
    } else {
        Some(round_off_2_decimals(sum / count as f64))
    }
}

/// Weighted final over the categories that actually have entered scores,
/// renormalized by the sum of their weights. A course with only evaluations
/// entered so far reads as a running average instead of collapsing toward
/// zero. Weights need not sum to 1.
pub fn compute_final(set: &ScoreSet, weights: &CategoryWeights) -> GradeResult {
    let mut sum_weighted = 0.0_f64;
    let mut sum_weights = 0.0_f64;

    let mut breakdown = |cat: Category| {
        let average = average_category(set.category(cat));
        let weight = weights.weight(cat);
        let weighted = average.map(|avg| avg * weight);
        if let Some(w) = weighted {
            sum_weighted += w;
            sum_weights += weight;
        }
        CategoryBreakdown {
            average,
            weight,
            weighted,
        }
    };

    let evaluations = breakdown(Category::Evaluations);
    let practices = breakdown(Category::Practices);
    let partials = breakdown(Category::Partials);

    // A populated-weight sum of zero is a degenerate configuration, not a
    // divide-by-zero fault.
    let final_score = if sum_weights > 0.0 {
        Some(round_off_2_decimals(sum_weighted / sum_weights))
    } else {
        None
    };

    let status = match final_score {
        None => GradeStatus::NoGrade,
        Some(f) if f >= PASS_MARK => GradeStatus::Approved,
        Some(_) => GradeStatus::Disapproved,
    };

    GradeResult {
        evaluations,
        practices,
        partials,
        final_score,
        status,
    }
}

pub fn summarize_cohort(results: &[GradeResult]) -> CohortSummary {
    let total = results.len();
    let approved = results
        .iter()
        .filter(|r| r.status == GradeStatus::Approved)
        .count();
    let disapproved = results
        .iter()
        .filter(|r| r.status == GradeStatus::Disapproved)
        .count();
    let approval_percentage = if total > 0 {
        round_off_1_decimal(100.0 * approved as f64 / total as f64)
    } else {
        0.0
    };
    CohortSummary {
        total,
        approved,
        disapproved,
        approval_percentage,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub course_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRef {
    pub id: String,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStanding {
    pub student_id: String,
    pub display_name: String,
    pub active: bool,
    pub evaluations_avg: Option<f64>,
    pub practices_avg: Option<f64>,
    pub partials_avg: Option<f64>,
    pub final_score: Option<f64>,
    pub status: GradeStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummaryModel {
    pub course: CourseRef,
    pub weights: CategoryWeights,
    pub default_weights: bool,
    pub per_student: Vec<StudentStanding>,
    pub cohort: CohortSummary,
}

/// Per-course weights row, falling back to the stock 0.33/0.33/0.34 split
/// when the course has never been configured. The bool reports whether the
/// fallback was used.
pub fn load_course_weights(
    conn: &Connection,
    course_id: &str,
) -> Result<(CategoryWeights, bool), CalcError> {
    let row: Option<(f64, f64, f64)> = conn
        .query_row(
            "SELECT evaluations_weight, practices_weight, partials_weight
             FROM course_weights
             WHERE course_id = ?",
            [course_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    match row {
        Some((evaluations, practices, partials)) => Ok((
            CategoryWeights {
                evaluations,
                practices,
                partials,
            },
            false,
        )),
        None => Ok((CategoryWeights::default(), true)),
    }
}

/// Reads one student's slots for a course into a dense ScoreSet. Missing
/// rows and NULL values read back as not-entered.
pub fn load_score_set(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<ScoreSet, CalcError> {
    let mut set = ScoreSet {
        evaluations: vec![None; EVALUATION_SLOTS],
        practices: vec![None; PRACTICE_SLOTS],
        partials: vec![None; PARTIAL_SLOTS],
    };

    let mut stmt = conn
        .prepare(
            "SELECT category, slot, value FROM scores
             WHERE course_id = ? AND student_id = ?",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map((course_id, student_id), |r| {
            let category: String = r.get(0)?;
            let slot: i64 = r.get(1)?;
            let value: Option<f64> = r.get(2)?;
            Ok((category, slot, value))
        })
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    for row in rows {
        let (category, slot, value) =
            row.map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
        let Some(cat) = Category::parse(&category) else {
            continue;
        };
        let slots = set.category_mut(cat);
        let idx = slot as usize;
        if idx < slots.len() {
            slots[idx] = value;
        }
    }

    Ok(set)
}

struct CohortStudent {
    id: String,
    display_name: String,
    active: bool,
}

/// Fresh per-student finals plus cohort aggregates for every enrolled
/// student in a course. Nothing is cached; callers re-run this after edits.
pub fn compute_course_summary(ctx: &CalcContext<'_>) -> Result<CourseSummaryModel, CalcError> {
    let conn = ctx.conn;
    let course_id = ctx.course_id;

    let course: Option<(String, String)> = conn
        .query_row(
            "SELECT name, code FROM courses WHERE id = ?",
            [course_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let Some((course_name, course_code)) = course else {
        return Err(CalcError::new("not_found", "course not found"));
    };

    let (weights, default_weights) = load_course_weights(conn, course_id)?;

    let mut students_stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name, s.active
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.course_id = ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let students: Vec<CohortStudent> = students_stmt
        .query_map([course_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(CohortStudent {
                id: r.get(0)?,
                display_name: format!("{}, {}", last, first),
                active: r.get::<_, i64>(3)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    // One pass over the course's score rows instead of a query per student.
    let mut sets_by_student: HashMap<String, ScoreSet> = HashMap::new();
    let mut scores_stmt = conn
        .prepare(
            "SELECT student_id, category, slot, value FROM scores
             WHERE course_id = ?",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let score_rows = scores_stmt
        .query_map([course_id], |r| {
            let student_id: String = r.get(0)?;
            let category: String = r.get(1)?;
            let slot: i64 = r.get(2)?;
            let value: Option<f64> = r.get(3)?;
            Ok((student_id, category, slot, value))
        })
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    for row in score_rows {
        let (student_id, category, slot, value) =
            row.map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
        let Some(cat) = Category::parse(&category) else {
            continue;
        };
        let set = sets_by_student.entry(student_id).or_insert_with(|| ScoreSet {
            evaluations: vec![None; EVALUATION_SLOTS],
            practices: vec![None; PRACTICE_SLOTS],
            partials: vec![None; PARTIAL_SLOTS],
        });
        let slots = set.category_mut(cat);
        let idx = slot as usize;
        if idx < slots.len() {
            slots[idx] = value;
        }
    }

    let empty = ScoreSet {
        evaluations: vec![None; EVALUATION_SLOTS],
        practices: vec![None; PRACTICE_SLOTS],
        partials: vec![None; PARTIAL_SLOTS],
    };

    let mut per_student: Vec<StudentStanding> = Vec::with_capacity(students.len());
    let mut results: Vec<GradeResult> = Vec::new();
    for s in &students {
        let set = sets_by_student.get(&s.id).unwrap_or(&empty);
        let result = compute_final(set, &weights);
        per_student.push(StudentStanding {
            student_id: s.id.clone(),
            display_name: s.display_name.clone(),
            active: s.active,
            evaluations_avg: result.evaluations.average,
            practices_avg: result.practices.average,
            partials_avg: result.partials.average,
            final_score: result.final_score,
            status: result.status,
        });
        // Aggregate over active students only; withdrawn rows still render.
        if s.active {
            results.push(result);
        }
    }

    let cohort = summarize_cohort(&results);

    Ok(CourseSummaryModel {
        course: CourseRef {
            id: course_id.to_string(),
            name: course_name,
            code: course_code,
        },
        weights,
        default_weights,
        per_student,
        cohort,
    })
}
