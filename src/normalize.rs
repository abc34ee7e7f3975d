//! Turns row/criteria mappings into uniform `(field, placeholder, value)` entries.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{BoundValue, FieldValues, Literal, RowValues};

/// Text prefix that promotes a plain string value to a [`Literal`].
pub const ASIS_PREFIX: &str = "@asis ";

/// Placeholder token emitted for bound parameters.
pub const PLACEHOLDER: &str = "?";

lazy_static! {
    static ref ASIS_PATTERN: Regex =
        Regex::new(r"(?is)^@asis (.*)$").expect("static @asis pattern compiles");
}

/// How a normalized entry reaches the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedValue {
    /// Rendered as a placeholder; the value goes to the parameter list.
    Bound(BoundValue),
    /// Rendered verbatim into the SQL text.
    Literal(String),
}

/// One normalized mapping entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedParam {
    pub field: Option<String>,
    pub value: NormalizedValue,
}

impl NormalizedParam {
    /// The placeholder token, present exactly when the value is bound.
    #[must_use]
    pub fn placeholder(&self) -> Option<&'static str> {
        match self.value {
            NormalizedValue::Bound(_) => Some(PLACEHOLDER),
            NormalizedValue::Literal(_) => None,
        }
    }

    /// Right-hand side of a clause: the placeholder or the literal text.
    #[must_use]
    pub fn rhs(&self) -> &str {
        match &self.value {
            NormalizedValue::Bound(_) => PLACEHOLDER,
            NormalizedValue::Literal(text) => text,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.value, NormalizedValue::Bound(BoundValue::Null))
    }

    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self.value, NormalizedValue::Literal(_))
    }
}

/// Strip the `@asis ` prefix (any case) from a string, if present.
#[must_use]
pub fn strip_asis(text: &str) -> Option<&str> {
    ASIS_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Resolve a value to a literal if it is one, or is text carrying the `@asis ` prefix.
#[must_use]
pub fn as_literal(value: &RowValues) -> Option<Literal> {
    match value {
        RowValues::AsIs(literal) => Some(literal.clone()),
        RowValues::Text(text) => strip_asis(text).map(Literal::new),
        _ => None,
    }
}

/// Normalize a single value (without a field).
#[must_use]
pub fn normalize_value(value: &RowValues) -> NormalizedValue {
    match as_literal(value) {
        Some(literal) => NormalizedValue::Literal(literal.into_inner()),
        None => NormalizedValue::Bound(value.to_bound()),
    }
}

/// Normalize a whole mapping, keeping entry order and count.
#[must_use]
pub fn normalize_params(params: &FieldValues) -> Vec<NormalizedParam> {
    params
        .iter()
        .map(|(field, value)| NormalizedParam {
            field: field.map(str::to_string),
            value: normalize_value(value),
        })
        .collect()
}
