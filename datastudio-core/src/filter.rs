//! Declarative row filters over polars frames.
//!
//! A filter specification is a mapping of column name to predicate (logical
//! AND across entries) or a list of specifications (logical OR). Predicates
//! come in several kinds: exact-match literals, whole-value anchored regex
//! patterns, relational expressions with a leading `<`, `>` or `=`, the
//! `--EMPTY--` sentinel for blank values, lists of predicates (OR on the
//! same column) and callables producing a row mask from the full frame.

use std::fmt;
use std::sync::Arc;

use polars::prelude::*;
use serde::Deserialize;
use tracing::{debug, error};

use crate::error::Error;

/// Sentinel token matching entirely-blank column values. Rows whose value
/// is missing match only when the sentinel was present in the pattern.
pub const EMPTY_SENTINEL: &str = "--EMPTY--";

const SELECTION_COLUMN: &str = "selection";

/// A callable predicate over the full frame, returning a boolean row mask.
pub type FilterFn = Arc<dyn Fn(&DataFrame) -> Result<BooleanChunked, Error> + Send + Sync>;

/// Predicate applied to a single column of a frame.
#[derive(Clone)]
pub enum Predicate {
    /// Exact equality against a scalar (number, boolean or null).
    Value(serde_json::Value),
    /// String predicate, dispatched at evaluation: a leading `<`, `>` or `=`
    /// makes it a relational expression, the `--EMPTY--` sentinel matches
    /// blank values, anything else is a whole-value regex match.
    Text(String),
    /// OR across predicates evaluated against the same column.
    AnyOf(Vec<Predicate>),
    /// Callable taking the full frame, returning a boolean mask.
    Function(FilterFn),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Value(value) => write!(f, "Value({})", value),
            Predicate::Text(text) => write!(f, "Text({:?})", text),
            Predicate::AnyOf(predicates) => f.debug_tuple("AnyOf").field(predicates).finish(),
            Predicate::Function(_) => write!(f, "Function(..)"),
        }
    }
}

/// A recursively defined filter specification.
#[derive(Debug, Clone)]
pub enum FilterSpec {
    /// Mapping of column name to predicate; entries combine with AND.
    /// An empty mapping selects everything.
    And(Vec<(String, Predicate)>),
    /// OR across specifications. An empty list is invalid.
    Or(Vec<FilterSpec>),
}

impl Predicate {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&DataFrame) -> Result<BooleanChunked, Error> + Send + Sync + 'static,
    {
        Predicate::Function(Arc::new(f))
    }

    /// Builds a predicate from configuration data.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, Error> {
        match value {
            serde_json::Value::String(text) => Ok(Predicate::Text(text.clone())),
            serde_json::Value::Array(items) => {
                if items.is_empty() {
                    return Err(Error::empty_filter_list());
                }
                let predicates = items
                    .iter()
                    .map(Predicate::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Predicate::AnyOf(predicates))
            }
            serde_json::Value::Object(_) => Err(Error::invalid_filter(format!(
                "A predicate can't be a mapping: {}",
                value
            ))),
            scalar => Ok(Predicate::Value(scalar.clone())),
        }
    }

    fn selection(&self, key: &str, df: &DataFrame) -> Result<BooleanChunked, Error> {
        match self {
            Predicate::Function(f) => f(df),
            Predicate::AnyOf(predicates) => {
                let mut iter = predicates.iter();
                let first = iter.next().ok_or_else(Error::empty_filter_list)?;
                let mut mask = first.selection(key, df)?;
                for predicate in iter {
                    mask = &mask | &predicate.selection(key, df)?;
                }
                Ok(mask)
            }
            Predicate::Value(value) => {
                require_column(df, key)?;
                let expr = col(key).eq(scalar_literal(key, value)?);
                mask_from_expr(df, key, expr.fill_null(lit(false)))
            }
            Predicate::Text(text) => {
                if let Some((op, rhs)) = split_relational(text) {
                    let dtype = require_column(df, key)?;
                    let rhs = parse_comparison_value(key, &dtype, rhs)?;
                    let expr = match op {
                        RelOp::Lt => col(key).lt(rhs),
                        RelOp::Le => col(key).lt_eq(rhs),
                        RelOp::Gt => col(key).gt(rhs),
                        RelOp::Ge => col(key).gt_eq(rhs),
                        RelOp::Eq => col(key).eq(rhs),
                    };
                    mask_from_expr(df, key, expr.fill_null(lit(false)))
                } else {
                    require_column(df, key)?;
                    // Anchor first, then substitute the sentinel, so a bare
                    // sentinel still matches whitespace-only values.
                    let mut pattern = format!("^{}$", text);
                    let match_missing = pattern.contains(EMPTY_SENTINEL);
                    if match_missing {
                        pattern = pattern.replacen(EMPTY_SENTINEL, "^\\s+$", 1);
                    }
                    regex::Regex::new(&pattern).map_err(|e| {
                        Error::invalid_filter(format!(
                            "Invalid pattern '{}' for column '{}': {}",
                            text, key, e
                        ))
                    })?;
                    let mut expr = col(key).str().contains(lit(pattern.as_str()), true);
                    if match_missing {
                        expr = expr.or(col(key).is_null());
                    }
                    mask_from_expr(df, key, expr.fill_null(lit(false)))
                }
            }
        }
    }
}

impl FilterSpec {
    /// A filter selecting every row.
    pub fn empty() -> Self {
        FilterSpec::And(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FilterSpec::And(entries) if entries.is_empty())
    }

    /// Builds a specification from configuration data: a mapping becomes
    /// AND entries, a list becomes OR elements.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, Error> {
        match value {
            serde_json::Value::Object(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, predicate) in map {
                    entries.push((key.clone(), Predicate::from_value(predicate)?));
                }
                Ok(FilterSpec::And(entries))
            }
            serde_json::Value::Array(items) => {
                if items.is_empty() {
                    return Err(Error::empty_filter_list());
                }
                let specs = items
                    .iter()
                    .map(FilterSpec::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FilterSpec::Or(specs))
            }
            other => Err(Error::invalid_filter(format!(
                "A filter must be a mapping or a list of mappings: {}",
                other
            ))),
        }
    }

    /// Evaluates the filter to a boolean row mask over `df`.
    pub fn selection(&self, df: &DataFrame) -> Result<BooleanChunked, Error> {
        match self {
            FilterSpec::And(entries) => {
                let mut mask =
                    BooleanChunked::full(SELECTION_COLUMN.into(), true, df.height());
                for (key, predicate) in entries {
                    debug!(key = %key, predicate = ?predicate, "applying filter entry");
                    let entry_mask = predicate.selection(key, df).map_err(|e| {
                        error!(key = %key, filter = ?self, "filter entry failed: {}", e);
                        e
                    })?;
                    mask = &mask & &entry_mask;
                }
                Ok(mask)
            }
            FilterSpec::Or(specs) => {
                let mut iter = specs.iter();
                let first = iter.next().ok_or_else(Error::empty_filter_list)?;
                let mut mask = first.selection(df)?;
                for spec in iter {
                    mask = &mask | &spec.selection(df)?;
                }
                Ok(mask)
            }
        }
    }

    /// Evaluates the filter and returns the rows it selects.
    pub fn filter(&self, df: &DataFrame) -> Result<DataFrame, Error> {
        let mask = self.selection(df)?;
        df.filter(&mask)
            .map_err(|e| Error::filter_evaluation(format!("Filter failed: {}", e)))
    }
}

impl<'de> Deserialize<'de> for FilterSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        FilterSpec::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Keeps the rows of `df` whose values across the reference frame's columns
/// appear as a row in the reference frame - an allow-list semi join.
pub fn filter_by_frame(reference: &DataFrame, df: &DataFrame) -> Result<DataFrame, Error> {
    let keys: Vec<String> = reference
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    for key in &keys {
        require_column(df, key)?;
    }
    let left: Vec<Expr> = keys.iter().map(|key| col(key.as_str())).collect();
    let right = left.clone();
    df.clone()
        .lazy()
        .join(
            reference.clone().lazy(),
            left,
            right,
            JoinArgs::new(JoinType::Semi),
        )
        .collect()
        .map_err(|e| {
            Error::filter_evaluation(format!("Frame filter on columns {:?} failed: {}", keys, e))
        })
}

fn require_column(df: &DataFrame, key: &str) -> Result<DataType, Error> {
    df.schema()
        .get(key)
        .cloned()
        .ok_or_else(|| Error::filter_key(key, "column not found"))
}

fn mask_from_expr(df: &DataFrame, key: &str, expr: Expr) -> Result<BooleanChunked, Error> {
    let selected = df
        .clone()
        .lazy()
        .select([expr.alias(SELECTION_COLUMN)])
        .collect()
        .map_err(|e| Error::filter_key(key, e))?;
    let mask = selected
        .column(SELECTION_COLUMN)
        .map_err(|e| Error::filter_key(key, e))?
        .as_materialized_series()
        .bool()
        .map_err(|e| Error::filter_key(key, e))?
        .clone();
    Ok(mask)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

fn split_relational(text: &str) -> Option<(RelOp, &str)> {
    // Two-character operators first.
    for (token, op) in [
        ("<=", RelOp::Le),
        (">=", RelOp::Ge),
        ("==", RelOp::Eq),
        ("<", RelOp::Lt),
        (">", RelOp::Gt),
        ("=", RelOp::Eq),
    ] {
        if let Some(rest) = text.strip_prefix(token) {
            return Some((op, rest.trim()));
        }
    }
    None
}

/// Parses the right-hand side of a relational expression into a literal
/// matching the column dtype.
fn parse_comparison_value(key: &str, dtype: &DataType, raw: &str) -> Result<Expr, Error> {
    let raw = raw.trim();
    let parse_error = || {
        Error::filter_evaluation(format!(
            "Cannot parse '{}' as {:?} for column '{}'",
            raw, dtype, key
        ))
    };
    match dtype {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => raw.parse::<i64>().map(lit).map_err(|_| parse_error()),
        DataType::Float32 | DataType::Float64 => {
            raw.parse::<f64>().map(lit).map_err(|_| parse_error())
        }
        DataType::Boolean => match raw.trim().to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(lit(true)),
            "false" | "f" | "0" => Ok(lit(false)),
            _ => Err(parse_error()),
        },
        DataType::String => Ok(lit(raw)),
        DataType::Date => {
            let date =
                chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| parse_error())?;
            let unix_epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
                .ok_or_else(|| Error::general_error("Invalid epoch".to_string()))?;
            let days_since_epoch = date.signed_duration_since(unix_epoch).num_days() as i32;
            Ok(lit(days_since_epoch))
        }
        other => Err(Error::filter_evaluation(format!(
            "Comparison not supported for column '{}' of type {:?}",
            key, other
        ))),
    }
}

/// Literal for an exact-equality predicate.
fn scalar_literal(key: &str, value: &serde_json::Value) -> Result<Expr, Error> {
    match value {
        serde_json::Value::Bool(b) => Ok(lit(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(lit(i))
            } else if let Some(f) = n.as_f64() {
                Ok(lit(f))
            } else {
                Err(Error::filter_evaluation(format!(
                    "Cannot use number '{}' as a literal for column '{}'",
                    n, key
                )))
            }
        }
        serde_json::Value::Null => Ok(lit(NULL)),
        other => Err(Error::invalid_filter(format!(
            "Unsupported literal {} for column '{}'",
            other, key
        ))),
    }
}
