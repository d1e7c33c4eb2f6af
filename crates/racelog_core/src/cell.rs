//! Table cell values.
//!
//! Archive tables are dynamically typed. Every cell is one of four JSON scalars,
//! and `Null` doubles as the sentinel for slots created by array extension.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound (exclusive) for row and column indices in a delta patch.
///
/// Patches grow the tables to fit the largest index they touch, so an
/// unbounded index would turn one malformed frame into an allocation failure.
pub const MAX_TABLE_INDEX: usize = 4096;

/// A single cell of a `cars` or `session` table
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Missing value, also used for slots added by extension
    #[default]
    Null,
    /// Boolean cell
    Bool(bool),
    /// Numeric cell (the archive encodes all numbers as floats)
    Number(f64),
    /// Text cell
    String(String),
}

impl CellValue {
    /// Check for the null sentinel
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the numeric value, if any
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Interpret the cell as a table index.
    ///
    /// Accepts integral, non-negative numbers below [`MAX_TABLE_INDEX`] only.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Decode` if the cell is not a usable index
    pub fn as_index(&self, what: &str) -> CoreResult<usize> {
        match self {
            Self::Number(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 => {
                if *n >= MAX_TABLE_INDEX as f64 {
                    return Err(CoreError::decode(format!(
                        "{} index {} exceeds the table limit of {}",
                        what, n, MAX_TABLE_INDEX
                    )));
                }
                Ok(*n as usize)
            }
            other => Err(CoreError::decode(format!(
                "{} index {} is not a non-negative integer",
                what, other
            ))),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&CellValue> for serde_json::Value {
    fn from(cell: &CellValue) -> Self {
        match cell {
            CellValue::Null => Self::Null,
            CellValue::Bool(b) => Self::Bool(*b),
            CellValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Self::Number)
                .unwrap_or(Self::Null),
            CellValue::String(s) => Self::String(s.clone()),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}
