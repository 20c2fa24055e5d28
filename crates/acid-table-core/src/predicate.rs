//! Row predicates with SQL three-valued logic and statistics-based pruning.
//!
//! A [`Predicate`] is evaluated two ways:
//!
//! - per row ([`Predicate::evaluate`]), yielding `Some(true)`, `Some(false)`
//!   or `None` (unknown, e.g. a comparison with NULL). Only rows evaluating
//!   to `Some(true)` match;
//! - per data file against its column statistics
//!   ([`Predicate::eval_on_file`]), yielding an [`IntervalTruth`] that lets
//!   the planner skip files no row of which can match.
//!
//! For file evaluation, `AlwaysTrue` means "no row evaluates to false" and
//! `AlwaysFalse` means "no row evaluates to true". Both are closed under
//! AND / OR / NOT with Kleene logic, so NULLs never make pruning unsound.
use std::{cmp::Ordering, collections::BTreeSet, fmt};

use snafu::prelude::*;

use crate::{
    rows::Value,
    transaction_log::{data_files::DataFileMeta, schema::LogicalSchema},
};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::NotEq => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::LtEq => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::GtEq => ord != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        })
    }
}

/// Truth of a predicate over all rows of a file, derived from statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalTruth {
    /// No row can evaluate to false.
    AlwaysTrue,
    /// No row can evaluate to true; the file can be skipped.
    AlwaysFalse,
    /// Statistics cannot decide.
    MaybeTrue,
}

impl IntervalTruth {
    /// Kleene AND.
    pub fn and(self, other: Self) -> Self {
        use IntervalTruth::*;
        match (self, other) {
            (AlwaysFalse, _) | (_, AlwaysFalse) => AlwaysFalse,
            (AlwaysTrue, AlwaysTrue) => AlwaysTrue,
            _ => MaybeTrue,
        }
    }

    /// Kleene OR.
    pub fn or(self, other: Self) -> Self {
        use IntervalTruth::*;
        match (self, other) {
            (AlwaysTrue, _) | (_, AlwaysTrue) => AlwaysTrue,
            (AlwaysFalse, AlwaysFalse) => AlwaysFalse,
            _ => MaybeTrue,
        }
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        use IntervalTruth::*;
        match self {
            AlwaysTrue => AlwaysFalse,
            AlwaysFalse => AlwaysTrue,
            MaybeTrue => MaybeTrue,
        }
    }
}

/// A predicate referenced a column the schema does not have.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("Predicate references unknown column {column}"))]
pub struct UnknownColumnError {
    /// The unknown column.
    pub column: String,
}

/// A boolean row predicate.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Predicate {
    /// Matches every row.
    #[default]
    True,
    /// `column <op> value`
    Compare {
        /// Column name.
        column: String,
        /// Operator.
        op: CompareOp,
        /// Literal operand.
        value: Value,
    },
    /// `column IN (values...)`
    In {
        /// Column name.
        column: String,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// `column IS NULL`
    IsNull(String),
    /// `column IS NOT NULL`
    IsNotNull(String),
    /// Conjunction.
    And(Box<Predicate>, Box<Predicate>),
    /// Disjunction.
    Or(Box<Predicate>, Box<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
}

impl Predicate {
    fn cmp(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(column, CompareOp::Eq, value)
    }

    /// `column <> value`
    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(column, CompareOp::NotEq, value)
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(column, CompareOp::Lt, value)
    }

    /// `column <= value`
    pub fn lt_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(column, CompareOp::LtEq, value)
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(column, CompareOp::Gt, value)
    }

    /// `column >= value`
    pub fn gt_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(column, CompareOp::GtEq, value)
    }

    /// `column IN (values...)`
    pub fn in_list(column: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Predicate::In {
            column: column.into(),
            values: values.into_iter().collect(),
        }
    }

    /// `column IS NULL`
    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull(column.into())
    }

    /// `column IS NOT NULL`
    pub fn is_not_null(column: impl Into<String>) -> Self {
        Predicate::IsNotNull(column.into())
    }

    /// `self AND other`
    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    /// `self OR other`
    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// `NOT self`
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Whether this predicate trivially matches everything.
    pub fn is_true(&self) -> bool {
        matches!(self, Predicate::True)
    }

    /// Columns referenced by the predicate.
    pub fn columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Predicate::True => {}
            Predicate::Compare { column, .. }
            | Predicate::In { column, .. }
            | Predicate::IsNull(column)
            | Predicate::IsNotNull(column) => {
                out.insert(column.as_str());
            }
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Predicate::Not(p) => p.collect_columns(out),
        }
    }

    /// Fail if any referenced column is missing from `schema`.
    pub fn validate(&self, schema: &LogicalSchema) -> Result<(), UnknownColumnError> {
        for column in self.columns() {
            ensure!(
                schema.field(column).is_some(),
                UnknownColumnSnafu { column }
            );
        }
        Ok(())
    }

    /// Three-valued evaluation against one row laid out per `schema`.
    ///
    /// Columns missing from `schema` read as NULL.
    pub fn evaluate(&self, schema: &LogicalSchema, row: &[Value]) -> Option<bool> {
        let get = |column: &str| {
            schema
                .index_of(column)
                .and_then(|i| row.get(i))
                .unwrap_or(&Value::Null)
        };

        match self {
            Predicate::True => Some(true),
            Predicate::Compare { column, op, value } => {
                get(column).compare(value).map(|ord| op.holds(ord))
            }
            Predicate::In { column, values } => {
                let v = get(column);
                if v.is_null() {
                    return None;
                }
                let mut unknown = false;
                for candidate in values {
                    match v.compare(candidate) {
                        Some(Ordering::Equal) => return Some(true),
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                if unknown { None } else { Some(false) }
            }
            Predicate::IsNull(column) => Some(get(column).is_null()),
            Predicate::IsNotNull(column) => Some(!get(column).is_null()),
            Predicate::And(a, b) => match (a.evaluate(schema, row), b.evaluate(schema, row)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Predicate::Or(a, b) => match (a.evaluate(schema, row), b.evaluate(schema, row)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Predicate::Not(p) => p.evaluate(schema, row).map(|b| !b),
        }
    }

    /// Whether the row satisfies the predicate (evaluates to true).
    pub fn matches(&self, schema: &LogicalSchema, row: &[Value]) -> bool {
        self.evaluate(schema, row) == Some(true)
    }

    /// Evaluate against a data file's statistics and partition values.
    pub fn eval_on_file(&self, file: &DataFileMeta) -> IntervalTruth {
        use IntervalTruth::*;
        match self {
            Predicate::True => AlwaysTrue,
            Predicate::Compare { column, op, value } => {
                let Some(stats) = file.column_stats(column) else {
                    return MaybeTrue;
                };
                if value.is_null() || stats.null_count == file.row_count {
                    // Every row compares as unknown.
                    return AlwaysFalse;
                }
                match (&stats.min, &stats.max) {
                    (Some(min), Some(max)) => eval_cmp_on_interval(*op, value, min, max),
                    _ => MaybeTrue,
                }
            }
            Predicate::In { column, values } => values
                .iter()
                .map(|v| Predicate::eq(column.clone(), v.clone()).eval_on_file(file))
                .fold(AlwaysFalse, IntervalTruth::or),
            Predicate::IsNull(column) => match file.column_stats(column) {
                Some(s) if s.null_count == 0 => AlwaysFalse,
                Some(s) if s.null_count == file.row_count => AlwaysTrue,
                _ => MaybeTrue,
            },
            Predicate::IsNotNull(column) => Predicate::IsNull(column.clone()).eval_on_file(file).not(),
            Predicate::And(a, b) => a.eval_on_file(file).and(b.eval_on_file(file)),
            Predicate::Or(a, b) => a.eval_on_file(file).or(b.eval_on_file(file)),
            Predicate::Not(p) => p.eval_on_file(file).not(),
        }
    }
}

/// Evaluate `x <op> lit` for all non-null `x` in `[min, max]`.
pub(crate) fn eval_cmp_on_interval(
    op: CompareOp,
    lit: &Value,
    min: &Value,
    max: &Value,
) -> IntervalTruth {
    use IntervalTruth::*;
    let (Some(lo), Some(hi)) = (min.compare(lit), max.compare(lit)) else {
        return MaybeTrue;
    };
    use Ordering::*;
    match op {
        CompareOp::Lt => {
            if hi == Less {
                AlwaysTrue
            } else if lo != Less {
                AlwaysFalse
            } else {
                MaybeTrue
            }
        }
        CompareOp::LtEq => {
            if hi != Greater {
                AlwaysTrue
            } else if lo == Greater {
                AlwaysFalse
            } else {
                MaybeTrue
            }
        }
        CompareOp::Gt => {
            if lo == Greater {
                AlwaysTrue
            } else if hi != Greater {
                AlwaysFalse
            } else {
                MaybeTrue
            }
        }
        CompareOp::GtEq => {
            if lo != Less {
                AlwaysTrue
            } else if hi == Less {
                AlwaysFalse
            } else {
                MaybeTrue
            }
        }
        CompareOp::Eq => {
            if lo == Greater || hi == Less {
                AlwaysFalse
            } else if lo == Equal && hi == Equal {
                AlwaysTrue
            } else {
                MaybeTrue
            }
        }
        CompareOp::NotEq => eval_cmp_on_interval(CompareOp::Eq, lit, min, max).not(),
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => write!(f, "true"),
            Predicate::Compare { column, op, value } => write!(f, "{column} {op} {value}"),
            Predicate::In { column, values } => {
                write!(f, "{column} IN (")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            Predicate::IsNull(column) => write!(f, "{column} IS NULL"),
            Predicate::IsNotNull(column) => write!(f, "{column} IS NOT NULL"),
            Predicate::And(a, b) => write!(f, "({a} AND {b})"),
            Predicate::Or(a, b) => write!(f, "({a} OR {b})"),
            Predicate::Not(p) => write!(f, "NOT ({p})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction_log::{
        data_files::ColumnStats,
        schema::{LogicalDataType, LogicalField},
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn schema() -> LogicalSchema {
        LogicalSchema::new(vec![
            LogicalField::new("id", LogicalDataType::Int64, false),
            LogicalField::new("state", LogicalDataType::Utf8, true),
        ])
        .unwrap()
    }

    fn file(min: i64, max: i64, nulls: u64, rows: u64) -> DataFileMeta {
        DataFileMeta {
            path: "data/part-x.parquet".to_string(),
            size_bytes: 1,
            row_count: rows,
            partition_values: BTreeMap::new(),
            stats: BTreeMap::from([(
                "id".to_string(),
                ColumnStats {
                    min: Some(Value::Int64(min)),
                    max: Some(Value::Int64(max)),
                    null_count: nulls,
                },
            )]),
            modification_time: Utc::now(),
            data_change: true,
        }
    }

    #[test]
    fn row_evaluation_uses_three_valued_logic() {
        let s = schema();
        let row = vec![Value::Int64(1), Value::Null];

        assert_eq!(Predicate::eq("state", "CA").evaluate(&s, &row), None);
        assert_eq!(Predicate::eq("state", "CA").not().evaluate(&s, &row), None);
        assert_eq!(
            Predicate::eq("state", "CA")
                .or(Predicate::eq("id", 1))
                .evaluate(&s, &row),
            Some(true)
        );
        assert_eq!(
            Predicate::eq("state", "CA")
                .and(Predicate::eq("id", 2))
                .evaluate(&s, &row),
            Some(false)
        );
        assert!(Predicate::is_null("state").matches(&s, &row));
        assert!(Predicate::in_list("id", [Value::Int64(3), Value::Int64(1)]).matches(&s, &row));
        assert!(Predicate::True.matches(&s, &row));
    }

    #[test]
    fn numeric_literals_compare_across_int_and_float() {
        let s = schema();
        let row = vec![Value::Int64(5), Value::Null];
        assert!(Predicate::gt("id", 4.5).matches(&s, &row));
        assert!(!Predicate::lt_eq("id", 4.9).matches(&s, &row));
    }

    #[test]
    fn eval_cmp_lt() {
        let f = file(5, 10, 0, 3);
        assert_eq!(Predicate::lt("id", 5).eval_on_file(&f), IntervalTruth::AlwaysFalse);
        assert_eq!(Predicate::lt("id", 8).eval_on_file(&f), IntervalTruth::MaybeTrue);
        assert_eq!(Predicate::lt("id", 11).eval_on_file(&f), IntervalTruth::AlwaysTrue);
    }

    #[test]
    fn eval_cmp_gte_and_eq() {
        let f = file(5, 10, 0, 3);
        assert_eq!(Predicate::gt_eq("id", 5).eval_on_file(&f), IntervalTruth::AlwaysTrue);
        assert_eq!(Predicate::gt_eq("id", 11).eval_on_file(&f), IntervalTruth::AlwaysFalse);
        assert_eq!(Predicate::eq("id", 4).eval_on_file(&f), IntervalTruth::AlwaysFalse);
        assert_eq!(Predicate::eq("id", 7).eval_on_file(&f), IntervalTruth::MaybeTrue);

        let single = file(7, 7, 0, 3);
        assert_eq!(Predicate::eq("id", 7).eval_on_file(&single), IntervalTruth::AlwaysTrue);
        assert_eq!(
            Predicate::not_eq("id", 7).eval_on_file(&single),
            IntervalTruth::AlwaysFalse
        );
    }

    #[test]
    fn negation_prunes_soundly_with_nulls() {
        // All non-null ids are < 20; nulls compare as unknown, so NOT never matches.
        let f = file(1, 10, 2, 5);
        assert_eq!(
            Predicate::lt("id", 20).not().eval_on_file(&f),
            IntervalTruth::AlwaysFalse
        );
        assert_eq!(Predicate::is_null("id").eval_on_file(&f), IntervalTruth::MaybeTrue);
        assert_eq!(
            Predicate::is_null("id").eval_on_file(&file(1, 1, 0, 5)),
            IntervalTruth::AlwaysFalse
        );
    }

    #[test]
    fn unknown_columns_are_never_pruned() {
        let f = file(1, 10, 0, 5);
        assert_eq!(Predicate::eq("state", "CA").eval_on_file(&f), IntervalTruth::MaybeTrue);
        assert_eq!(
            Predicate::in_list("id", [Value::Int64(20), Value::Int64(30)]).eval_on_file(&f),
            IntervalTruth::AlwaysFalse
        );
    }

    #[test]
    fn partition_values_drive_pruning() {
        let mut f = file(1, 10, 0, 5);
        f.partition_values
            .insert("state".to_string(), Value::from("WA"));
        assert_eq!(Predicate::eq("state", "CA").eval_on_file(&f), IntervalTruth::AlwaysFalse);
        assert_eq!(Predicate::eq("state", "WA").eval_on_file(&f), IntervalTruth::AlwaysTrue);
    }

    #[test]
    fn validate_and_display() {
        let p = Predicate::eq("state", "CA").and(Predicate::gt("id", 3).not());
        assert_eq!(p.to_string(), "(state = 'CA' AND NOT (id > 3))");
        assert!(p.validate(&schema()).is_ok());
        assert_eq!(
            Predicate::is_null("zip").validate(&schema()),
            Err(UnknownColumnError {
                column: "zip".to_string()
            })
        );
    }
}
