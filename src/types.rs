use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// A raw SQL fragment that is rendered verbatim instead of being bound.
///
/// Only ever build one from trusted text: the fragment lands in the statement unescaped.
/// ```rust
/// use multidb_fixtures::prelude::*;
///
/// let now = Literal::new("NOW()");
/// assert_eq!(now.to_string(), "NOW()");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Literal(String);

impl Literal {
    #[must_use]
    pub fn new(fragment: impl Into<String>) -> Self {
        Literal(fragment.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value bound to a `?` placeholder.
///
/// Scalars are stringified; binary data stays binary. Serializes as a JSON string,
/// byte array or `null` for error reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BoundValue {
    Null,
    Text(String),
    Blob(Vec<u8>),
}

impl BoundValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, BoundValue::Null)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            BoundValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for BoundValue {
    fn from(value: &str) -> Self {
        BoundValue::Text(value.to_string())
    }
}

impl From<String> for BoundValue {
    fn from(value: String) -> Self {
        BoundValue::Text(value)
    }
}

/// Values used in row/criteria mappings and returned in result rows.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value; a `@asis ` prefix turns it into a literal during normalization
    Text(String),
    /// Boolean value, bound as `1`/`0`
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value, bound as its serialized text
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
    /// Raw SQL fragment
    AsIs(Literal),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    /// Integer view that also accepts numeric text (drivers differ in what they hand back).
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            RowValues::Int(i) => Some(*i),
            RowValues::Text(s) => s.trim().parse().ok(),
            RowValues::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            RowValues::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Form used when binding: text for scalars, bytes for blobs.
    #[must_use]
    pub fn to_bound(&self) -> BoundValue {
        match self {
            RowValues::Int(i) => BoundValue::Text(i.to_string()),
            RowValues::Float(f) => BoundValue::Text(f.to_string()),
            RowValues::Text(s) => BoundValue::Text(s.clone()),
            RowValues::Bool(b) => BoundValue::Text(if *b { "1" } else { "0" }.to_string()),
            RowValues::Timestamp(dt) => BoundValue::Text(dt.format("%F %T%.f").to_string()),
            RowValues::Null => BoundValue::Null,
            RowValues::JSON(json) => BoundValue::Text(json.to_string()),
            RowValues::Blob(bytes) => BoundValue::Blob(bytes.clone()),
            RowValues::AsIs(literal) => BoundValue::Text(literal.as_str().to_string()),
        }
    }

    /// Whether a caller-supplied key value counts as "not given".
    ///
    /// Null, zero, the empty string, `"0"` and `false` are all treated as absent.
    #[must_use]
    pub fn is_blank_key(&self) -> bool {
        match self {
            RowValues::Null => true,
            RowValues::Int(i) => *i == 0,
            RowValues::Float(f) => *f == 0.0,
            RowValues::Bool(b) => !b,
            RowValues::Text(s) => s.is_empty() || s == "0",
            _ => false,
        }
    }
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<i32> for RowValues {
    fn from(value: i32) -> Self {
        RowValues::Int(i64::from(value))
    }
}

impl From<u32> for RowValues {
    fn from(value: u32) -> Self {
        RowValues::Int(i64::from(value))
    }
}

impl From<f64> for RowValues {
    fn from(value: f64) -> Self {
        RowValues::Float(value)
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_string())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

impl From<NaiveDateTime> for RowValues {
    fn from(value: NaiveDateTime) -> Self {
        RowValues::Timestamp(value)
    }
}

impl From<JsonValue> for RowValues {
    fn from(value: JsonValue) -> Self {
        RowValues::JSON(value)
    }
}

impl From<Vec<u8>> for RowValues {
    fn from(value: Vec<u8>) -> Self {
        RowValues::Blob(value)
    }
}

impl From<Literal> for RowValues {
    fn from(value: Literal) -> Self {
        RowValues::AsIs(value)
    }
}

impl<T: Into<RowValues>> From<Option<T>> for RowValues {
    fn from(value: Option<T>) -> Self {
        value.map_or(RowValues::Null, Into::into)
    }
}

/// Ordered field → value mapping used for rows, criteria and updates.
///
/// Entries without a field name are positional: they render as bare fragments
/// (a raw criteria expression, a projection).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldValues {
    entries: Vec<(Option<String>, RowValues)>,
}

impl FieldValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`FieldValues::set`].
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<RowValues>) -> Self {
        self.set(field, value);
        self
    }

    /// Builder form of [`FieldValues::push_positional`].
    #[must_use]
    pub fn with_positional(mut self, value: impl Into<RowValues>) -> Self {
        self.push_positional(value);
        self
    }

    /// Set a named field, replacing the value in place if the field is already present.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<RowValues>) {
        let field = field.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(name, _)| name.as_deref() == Some(field.as_str()))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((Some(field), value)),
        }
    }

    pub fn push_positional(&mut self, value: impl Into<RowValues>) {
        self.entries.push((None, value.into()));
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&RowValues> {
        self.entries
            .iter()
            .find(|(name, _)| name.as_deref() == Some(field))
            .map(|(_, value)| value)
    }

    /// Names of the named entries, in order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|(name, _)| name.as_deref())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Option<&str>, &RowValues)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_deref(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn has_positional(&self) -> bool {
        self.entries.iter().any(|(name, _)| name.is_none())
    }
}

impl<K, V> FromIterator<(K, V)> for FieldValues
where
    K: Into<String>,
    V: Into<RowValues>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = FieldValues::new();
        for (field, value) in iter {
            fields.set(field, value);
        }
        fields
    }
}

/// Build a [`FieldValues`] mapping in place.
///
/// ```rust
/// use multidb_fixtures::prelude::*;
///
/// let row = fields! { "Email" => "a@b.com", "Created" => "@asis NOW()", "Flag" => RowValues::Null };
/// assert_eq!(row.field_names(), vec!["Email", "Created", "Flag"]);
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::types::FieldValues::new()
    };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut fields = $crate::types::FieldValues::new();
        $(fields.set($field, $value);)+
        fields
    }};
}
