use crate::error::MultiDbError;
use crate::normalize::{normalize_params, strip_asis};
use crate::types::{FieldValues, Literal};

use super::{BuiltStatement, ClauseContext, QuoteIdentifier, render_clauses};

/// Projection of a SELECT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Columns {
    /// `*`
    #[default]
    All,
    /// One raw projection expression, e.g. `COUNT(*)`; rendered verbatim.
    Raw(String),
    /// Column names, quoted; names carrying the `@asis ` prefix are rendered verbatim.
    Names(Vec<String>),
}

impl Columns {
    fn render<Q: QuoteIdentifier + ?Sized>(&self, quoter: &Q) -> String {
        match self {
            Columns::All => "*".to_string(),
            Columns::Raw(expression) if expression.is_empty() => "*".to_string(),
            Columns::Raw(expression) => expression.clone(),
            Columns::Names(names) if names.is_empty() => "*".to_string(),
            Columns::Names(names) => names
                .iter()
                .map(|name| match strip_asis(name) {
                    Some(raw) => raw.to_string(),
                    None => quoter.quote_identifier(name),
                })
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

impl From<&str> for Columns {
    fn from(expression: &str) -> Self {
        Columns::Raw(expression.to_string())
    }
}

impl From<Literal> for Columns {
    fn from(expression: Literal) -> Self {
        Columns::Raw(expression.into_inner())
    }
}

impl From<Vec<&str>> for Columns {
    fn from(names: Vec<&str>) -> Self {
        Columns::Names(names.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Columns {
    fn from(names: Vec<String>) -> Self {
        Columns::Names(names)
    }
}

/// `SELECT cols FROM t [WHERE criteria] [LIMIT n]`.
///
/// # Errors
/// This builder currently never fails but keeps `Result` for parity with the others.
pub fn build_select<Q: QuoteIdentifier + ?Sized>(
    quoter: &Q,
    table: &str,
    criteria: &FieldValues,
    columns: &Columns,
    limit: Option<u64>,
) -> Result<BuiltStatement, MultiDbError> {
    let mut params = Vec::with_capacity(criteria.len());
    let mut sql = format!(
        "SELECT {} FROM {}",
        columns.render(quoter),
        quoter.quote_identifier(table)
    );

    if !criteria.is_empty() {
        let normalized = normalize_params(criteria);
        sql.push_str(" WHERE ");
        sql.push_str(&render_clauses(
            quoter,
            &normalized,
            ClauseContext::Where,
            " AND ",
            &mut params,
        ));
    }

    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    Ok(BuiltStatement { sql, params })
}
