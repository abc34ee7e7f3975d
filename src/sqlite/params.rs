use rusqlite::types::Value;

use crate::types::BoundValue;

/// Bound parameters converted to `SQLite` values.
///
/// Scalars arrive as text; column affinity takes care of numeric comparisons.
pub struct Params(pub Vec<Value>);

impl Params {
    #[must_use]
    pub fn convert(params: &[BoundValue]) -> Self {
        Params(
            params
                .iter()
                .map(|param| match param {
                    BoundValue::Text(text) => Value::Text(text.clone()),
                    BoundValue::Blob(bytes) => Value::Blob(bytes.clone()),
                    BoundValue::Null => Value::Null,
                })
                .collect(),
        )
    }

    /// Borrow the underlying values.
    #[must_use]
    pub fn as_values(&self) -> &[Value] {
        &self.0
    }

    /// Build a borrowed params slice suitable for rusqlite execution.
    #[must_use]
    pub fn as_refs(&self) -> Vec<&dyn rusqlite::ToSql> {
        self.0.iter().map(|v| v as &dyn rusqlite::ToSql).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_each_bound_kind() {
        let params = Params::convert(&["5".into(), BoundValue::Blob(vec![0xff, 0]), BoundValue::Null]);
        assert_eq!(
            params.as_values(),
            &[Value::Text("5".into()), Value::Blob(vec![0xff, 0]), Value::Null]
        );
        assert_eq!(params.as_refs().len(), 3);
    }
}
