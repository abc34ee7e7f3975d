//! Single-table statement builders.
//!
//! Each builder normalizes its mappings, renders the SQL text with `?` placeholders and
//! collects the bound values in placeholder order. Identifiers are quoted through a
//! [`QuoteIdentifier`] supplied by the driver; values only reach the SQL text through
//! the literal escape hatch.

use std::fmt;

use crate::normalize::{NormalizedParam, NormalizedValue};
use crate::types::BoundValue;

mod dml;
mod insert;
mod select;

pub use dml::{build_delete, build_update};
pub use insert::{Upsert, build_insert_many, build_insert_one};
pub use select::{Columns, build_select};

/// SQL text plus its bound parameters, ready for a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltStatement {
    pub sql: String,
    pub params: Vec<BoundValue>,
}

impl fmt::Display for BuiltStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Driver-specific identifier quoting (table, column and database names).
pub trait QuoteIdentifier {
    fn quote_identifier(&self, name: &str) -> String;
}

/// The two common identifier quoting conventions.
///
/// Dotted names (`Database.Table`) are quoted segment by segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// MySQL-style `` `name` ``
    Backtick,
    /// ANSI/SQLite-style `"name"`
    DoubleQuote,
}

impl QuoteIdentifier for QuoteStyle {
    fn quote_identifier(&self, name: &str) -> String {
        let quote = match self {
            QuoteStyle::Backtick => '`',
            QuoteStyle::DoubleQuote => '"',
        };
        let escaped = format!("{quote}{quote}");
        name.split('.')
            .map(|segment| format!("{quote}{}{quote}", segment.replace(quote, &escaped)))
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Where a clause is rendered; only WHERE criteria compare NULL with `IS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClauseContext {
    Where,
    Set,
}

/// Render one `field OP rhs` clause (or a bare `rhs` for positional entries),
/// appending the bound value to `params` when there is one.
pub(crate) fn render_clause<Q: QuoteIdentifier + ?Sized>(
    quoter: &Q,
    param: &NormalizedParam,
    context: ClauseContext,
    params: &mut Vec<BoundValue>,
) -> String {
    if let NormalizedValue::Bound(value) = &param.value {
        params.push(value.clone());
    }

    let rhs = param.rhs();
    match &param.field {
        None => rhs.to_string(),
        Some(field) => {
            let operator = if context == ClauseContext::Where && param.is_null() {
                "IS"
            } else {
                "="
            };
            format!("{} {operator} {rhs}", quoter.quote_identifier(field))
        }
    }
}

pub(crate) fn render_clauses<Q: QuoteIdentifier + ?Sized>(
    quoter: &Q,
    normalized: &[NormalizedParam],
    context: ClauseContext,
    joiner: &str,
    params: &mut Vec<BoundValue>,
) -> String {
    normalized
        .iter()
        .map(|param| render_clause(quoter, param, context, params))
        .collect::<Vec<_>>()
        .join(joiner)
}
