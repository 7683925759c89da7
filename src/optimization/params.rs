//! Typed strategy parameter schema
//!
//! Parameter sets are only constructed through a `ParameterSchema`, which fixes
//! the field list and each field's type. That keeps canonicalization exhaustive:
//! two processes building the same logical set always serialize it the same way.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed precision used for floats in canonical form
pub const CANONICAL_FLOAT_DECIMALS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    Float,
    Bool,
}

/// Section a parameter is reported under in best-config artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamGroup {
    Indicator,
    Risk,
    Behavior,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ParamValue {
    /// Numeric view used for tolerant comparison (`true` = 1, `false` = 0)
    pub fn as_f64(&self) -> f64 {
        match *self {
            ParamValue::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            ParamValue::Int(i) => i as f64,
            ParamValue::Float(f) => f,
        }
    }

    /// Parse a CSV cell. Empty cells yield `None`.
    pub fn parse_cell(cell: &str) -> Option<ParamValue> {
        let cell = cell.trim();
        if cell.is_empty() {
            return None;
        }
        match cell.to_ascii_lowercase().as_str() {
            "true" => return Some(ParamValue::Bool(true)),
            "false" => return Some(ParamValue::Bool(false)),
            _ => {}
        }
        if let Ok(i) = cell.parse::<i64>() {
            return Some(ParamValue::Int(i));
        }
        cell.parse::<f64>().ok().map(ParamValue::Float)
    }

    /// Close enough under an absolute tolerance
    pub fn approx_eq(&self, other: &ParamValue, tolerance: f64) -> bool {
        let (a, b) = (self.as_f64(), other.as_f64());
        if a.is_nan() || b.is_nan() {
            return false;
        }
        (a - b).abs() <= tolerance
    }

    fn canonical(&self) -> String {
        match *self {
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => {
                let f = if f == 0.0 { 0.0 } else { f };
                format!("{:.*}", CANONICAL_FLOAT_DECIMALS, f)
            }
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamField {
    pub name: String,
    pub kind: ParamKind,
    pub group: ParamGroup,
    pub default: ParamValue,
}

impl ParamField {
    pub fn new(name: &str, kind: ParamKind, group: ParamGroup, default: ParamValue) -> Self {
        Self {
            name: name.to_string(),
            kind,
            group,
            default,
        }
    }

    /// Coerce a raw value into this field's kind
    pub fn coerce(&self, value: ParamValue) -> Result<ParamValue, SchemaError> {
        match (self.kind, value) {
            (ParamKind::Bool, ParamValue::Bool(b)) => Ok(ParamValue::Bool(b)),
            (ParamKind::Int, ParamValue::Int(i)) => Ok(ParamValue::Int(i)),
            (ParamKind::Int, ParamValue::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                Ok(ParamValue::Int(f as i64))
            }
            (ParamKind::Float, ParamValue::Float(f)) if f.is_finite() => Ok(ParamValue::Float(f)),
            (ParamKind::Float, ParamValue::Int(i)) => Ok(ParamValue::Float(i as f64)),
            (kind, value) => Err(SchemaError::WrongType {
                field: self.name.clone(),
                expected: kind,
                got: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("Unknown parameter '{0}'")]
    UnknownField(String),

    #[error("Missing parameter '{0}'")]
    MissingField(String),

    #[error("Parameter '{field}' expects {expected:?}, got '{got}'")]
    WrongType {
        field: String,
        expected: ParamKind,
        got: String,
    },

    #[error("Duplicate parameter '{0}' in schema")]
    DuplicateField(String),

    #[error("Invalid range for '{field}': {reason}")]
    InvalidRange { field: String, reason: String },
}

/// Ordered field list with declared types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    fields: Vec<ParamField>,
}

impl ParameterSchema {
    pub fn new(fields: Vec<ParamField>) -> Result<Self, SchemaError> {
        let mut seen = std::collections::BTreeSet::new();
        for field in &fields {
            if !seen.insert(field.name.clone()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    /// Bollinger band + VWAP mean-reversion strategy parameters
    pub fn bb_vwap() -> Self {
        use ParamGroup::*;
        use ParamKind::*;
        Self {
            fields: vec![
                ParamField::new("bb_window", Int, Indicator, ParamValue::Int(20)),
                ParamField::new("bb_std", Float, Indicator, ParamValue::Float(2.0)),
                ParamField::new("vwap_window", Int, Indicator, ParamValue::Int(20)),
                ParamField::new("vwap_std", Float, Indicator, ParamValue::Float(2.0)),
                ParamField::new("atr_period", Int, Indicator, ParamValue::Int(14)),
                ParamField::new("risk_per_position_pct", Float, Risk, ParamValue::Float(1.0)),
                ParamField::new("stop_loss_atr_multiplier", Float, Risk, ParamValue::Float(1.5)),
                ParamField::new("risk_reward_ratio", Float, Risk, ParamValue::Float(2.0)),
                ParamField::new("max_positions", Int, Risk, ParamValue::Int(1)),
                ParamField::new("require_reversal", Bool, Behavior, ParamValue::Bool(false)),
                ParamField::new("use_regime_filter", Bool, Behavior, ParamValue::Bool(false)),
                ParamField::new("regime_min_score", Int, Indicator, ParamValue::Int(0)),
            ],
        }
    }

    pub fn fields(&self) -> &[ParamField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ParamField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Group for a parameter name; unknown names are classified by value type
    pub fn group_of(&self, name: &str, value: &ParamValue) -> ParamGroup {
        match self.field(name) {
            Some(field) => field.group,
            None if matches!(value, ParamValue::Bool(_)) => ParamGroup::Behavior,
            None => ParamGroup::Indicator,
        }
    }

    /// Build a complete set; every schema field must be supplied
    pub fn build<I, S>(&self, values: I) -> Result<ParameterSet, SchemaError>
    where
        I: IntoIterator<Item = (S, ParamValue)>,
        S: Into<String>,
    {
        let mut supplied: BTreeMap<String, ParamValue> = BTreeMap::new();
        for (name, value) in values {
            let name = name.into();
            let field = self
                .field(&name)
                .ok_or_else(|| SchemaError::UnknownField(name.clone()))?;
            supplied.insert(name, field.coerce(value)?);
        }

        for field in &self.fields {
            if !supplied.contains_key(&field.name) {
                return Err(SchemaError::MissingField(field.name.clone()));
            }
        }

        Ok(ParameterSet { values: supplied })
    }

    /// Build a set, filling unspecified fields with their defaults
    pub fn build_with_defaults<I, S>(&self, values: I) -> Result<ParameterSet, SchemaError>
    where
        I: IntoIterator<Item = (S, ParamValue)>,
        S: Into<String>,
    {
        let mut merged: BTreeMap<String, ParamValue> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.default))
            .collect();
        for (name, value) in values {
            merged.insert(name.into(), value);
        }
        self.build(merged)
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::bb_vwap()
    }
}

/// A complete, type-checked parameter combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    /// Loose set without schema checks, used when reading foreign files
    pub fn from_values(values: BTreeMap<String, ParamValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sorted `name=value` pairs with fixed float precision
    pub fn canonical_string(&self) -> String {
        self.values
            .iter()
            .map(|(name, value)| format!("{}={}", name, value.canonical()))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Short label for progress output
    pub fn label(&self) -> String {
        self.values
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Every field of `self` is present in `other` and numerically close
    pub fn approx_matches(&self, other: &ParameterSet, tolerance: f64) -> bool {
        self.values.iter().all(|(name, value)| {
            other
                .get(name)
                .map(|candidate| value.approx_eq(candidate, tolerance))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_schema() -> ParameterSchema {
        ParameterSchema::new(vec![
            ParamField::new("bb_window", ParamKind::Int, ParamGroup::Indicator, ParamValue::Int(20)),
            ParamField::new("bb_std", ParamKind::Float, ParamGroup::Indicator, ParamValue::Float(2.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_canonical_order_independent() {
        let schema = small_schema();
        let a = schema
            .build(vec![("bb_window", ParamValue::Int(20)), ("bb_std", ParamValue::Float(2.0))])
            .unwrap();
        let b = schema
            .build(vec![("bb_std", ParamValue::Float(2.0)), ("bb_window", ParamValue::Int(20))])
            .unwrap();
        assert_eq!(a.canonical_string(), b.canonical_string());
        assert_eq!(a.canonical_string(), "bb_std=2.0000000000;bb_window=20");
    }

    #[test]
    fn test_int_literal_coerced_for_float_field() {
        let schema = small_schema();
        let a = schema
            .build(vec![("bb_window", ParamValue::Int(20)), ("bb_std", ParamValue::Int(2))])
            .unwrap();
        assert_eq!(a.get("bb_std"), Some(&ParamValue::Float(2.0)));
    }

    #[test]
    fn test_negative_zero_normalized() {
        let schema = small_schema();
        let a = schema
            .build(vec![("bb_window", ParamValue::Int(1)), ("bb_std", ParamValue::Float(-0.0))])
            .unwrap();
        assert!(a.canonical_string().contains("bb_std=0.0000000000"));
    }

    #[test]
    fn test_missing_and_unknown_fields() {
        let schema = small_schema();
        assert_eq!(
            schema.build(vec![("bb_window", ParamValue::Int(20))]).unwrap_err(),
            SchemaError::MissingField("bb_std".to_string())
        );
        assert!(matches!(
            schema.build(vec![("nope", ParamValue::Int(1))]),
            Err(SchemaError::UnknownField(_))
        ));
        assert!(matches!(
            schema.build(vec![("bb_window", ParamValue::Float(20.5)), ("bb_std", ParamValue::Float(2.0))]),
            Err(SchemaError::WrongType { .. })
        ));
    }

    #[test]
    fn test_defaults_fill_gaps() {
        let schema = ParameterSchema::bb_vwap();
        let set = schema
            .build_with_defaults(vec![("bb_window", ParamValue::Int(30))])
            .unwrap();
        assert_eq!(set.len(), schema.fields().len());
        assert_eq!(set.get("bb_window"), Some(&ParamValue::Int(30)));
        assert_eq!(set.get("atr_period"), Some(&ParamValue::Int(14)));
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(ParamValue::parse_cell("True"), Some(ParamValue::Bool(true)));
        assert_eq!(ParamValue::parse_cell("20"), Some(ParamValue::Int(20)));
        assert_eq!(ParamValue::parse_cell("2.5"), Some(ParamValue::Float(2.5)));
        assert_eq!(ParamValue::parse_cell(""), None);
        assert_eq!(ParamValue::parse_cell("abc"), None);
    }

    #[test]
    fn test_approx_matches() {
        let mut a = BTreeMap::new();
        a.insert("bb_std".to_string(), ParamValue::Float(2.0));
        a.insert("require_reversal".to_string(), ParamValue::Bool(true));
        let a = ParameterSet::from_values(a);

        let mut b = BTreeMap::new();
        b.insert("bb_std".to_string(), ParamValue::Float(2.0 + 1e-12));
        b.insert("require_reversal".to_string(), ParamValue::Int(1));
        b.insert("extra".to_string(), ParamValue::Int(5));
        let b = ParameterSet::from_values(b);

        assert!(a.approx_matches(&b, 1e-9));

        let mut c = BTreeMap::new();
        c.insert("bb_std".to_string(), ParamValue::Float(2.001));
        c.insert("require_reversal".to_string(), ParamValue::Bool(true));
        assert!(!a.approx_matches(&ParameterSet::from_values(c), 1e-9));
    }
}
