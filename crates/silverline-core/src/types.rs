use std::fmt;

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column type inferred from raw cell text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Date,
    Text,
}

/// Typed view over a raw cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(value) => Some(*value as f64),
            Scalar::Float(value) => Some(*value),
            _ => None,
        }
    }
}

/// A cell could not be read as the requested type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot coerce '{value}' to {target}")]
pub struct CoercionError {
    pub value: String,
    pub target: ColumnType,
}

impl ColumnType {
    /// Types tried, narrowest first, when inferring a column.
    pub const INFERENCE_ORDER: [ColumnType; 5] = [
        ColumnType::Integer,
        ColumnType::Float,
        ColumnType::Boolean,
        ColumnType::Date,
        ColumnType::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Text => "text",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    /// Read a raw, non-null cell as this type.
    pub fn coerce(&self, raw: &str) -> Result<Scalar, CoercionError> {
        let trimmed = raw.trim();
        let error = || CoercionError {
            value: raw.to_string(),
            target: *self,
        };
        match self {
            ColumnType::Integer => trimmed.parse::<i64>().map(Scalar::Int).map_err(|_| error()),
            ColumnType::Float => trimmed
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Scalar::Float)
                .ok_or_else(error),
            ColumnType::Boolean => parse_bool(trimmed).map(Scalar::Bool).ok_or_else(error),
            ColumnType::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(Scalar::Date)
                .map_err(|_| error()),
            ColumnType::Text => Ok(Scalar::Text(raw.to_string())),
        }
    }

    /// Infer the narrowest type every non-null value coerces to.
    ///
    /// Returns `None` when the iterator yields no non-null values.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<ColumnType> {
        let mut candidates = Self::INFERENCE_ORDER.to_vec();
        let mut seen_any = false;
        for value in values {
            seen_any = true;
            candidates.retain(|candidate| candidate.coerce(value).is_ok());
            if candidates.len() == 1 {
                break;
            }
        }
        if !seen_any {
            return None;
        }
        candidates.first().copied()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true for cell text that represents a missing value.
pub fn is_null_literal(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("na")
        || trimmed.eq_ignore_ascii_case("n/a")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "t" | "yes" => Some(true),
        "false" | "f" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_narrowest_type() {
        assert_eq!(ColumnType::infer(["1", "2", "30"]), Some(ColumnType::Integer));
        assert_eq!(ColumnType::infer(["1", "2.5"]), Some(ColumnType::Float));
        assert_eq!(ColumnType::infer(["true", "no"]), Some(ColumnType::Boolean));
        assert_eq!(ColumnType::infer(["2024-01-02"]), Some(ColumnType::Date));
        assert_eq!(ColumnType::infer(["1", "abc"]), Some(ColumnType::Text));
        assert_eq!(ColumnType::infer(Vec::<&str>::new()), None);
    }

    #[test]
    fn coercion_reports_target() {
        let err = ColumnType::Integer.coerce("12x").unwrap_err();
        assert_eq!(err.target, ColumnType::Integer);
        assert_eq!(ColumnType::Float.coerce(" 3.5 ").unwrap(), Scalar::Float(3.5));
        assert!(ColumnType::Float.coerce("inf").is_err());
    }

    #[test]
    fn recognises_null_literals() {
        assert!(is_null_literal(""));
        assert!(is_null_literal(" NULL "));
        assert!(is_null_literal("NaN"));
        assert!(!is_null_literal("0"));
    }
}
