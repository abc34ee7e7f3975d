use crate::error::MultiDbError;
use crate::normalize::normalize_params;
use crate::types::FieldValues;

use super::{BuiltStatement, ClauseContext, QuoteIdentifier, render_clauses};

/// `UPDATE t SET assignments WHERE criteria`; SET params come before WHERE params.
///
/// # Errors
/// Returns `MultiDbError::BuildError` if there is nothing to update or no criteria.
pub fn build_update<Q: QuoteIdentifier + ?Sized>(
    quoter: &Q,
    table: &str,
    updates: &FieldValues,
    criteria: &FieldValues,
) -> Result<BuiltStatement, MultiDbError> {
    if updates.is_empty() {
        return Err(MultiDbError::BuildError(format!(
            "No field updates given for {table}"
        )));
    }
    require_criteria(table, criteria, "UPDATE")?;

    let mut params = Vec::with_capacity(updates.len() + criteria.len());
    let assignments = render_clauses(
        quoter,
        &normalize_params(updates),
        ClauseContext::Set,
        ", ",
        &mut params,
    );
    let conditions = render_clauses(
        quoter,
        &normalize_params(criteria),
        ClauseContext::Where,
        " AND ",
        &mut params,
    );

    Ok(BuiltStatement {
        sql: format!(
            "UPDATE {} SET {assignments} WHERE {conditions}",
            quoter.quote_identifier(table)
        ),
        params,
    })
}

/// `DELETE FROM t WHERE criteria`.
///
/// # Errors
/// Returns `MultiDbError::BuildError` if no criteria are given.
pub fn build_delete<Q: QuoteIdentifier + ?Sized>(
    quoter: &Q,
    table: &str,
    criteria: &FieldValues,
) -> Result<BuiltStatement, MultiDbError> {
    require_criteria(table, criteria, "DELETE")?;

    let mut params = Vec::with_capacity(criteria.len());
    let conditions = render_clauses(
        quoter,
        &normalize_params(criteria),
        ClauseContext::Where,
        " AND ",
        &mut params,
    );

    Ok(BuiltStatement {
        sql: format!(
            "DELETE FROM {} WHERE {conditions}",
            quoter.quote_identifier(table)
        ),
        params,
    })
}

// An empty WHERE would touch every row in the table.
fn require_criteria(table: &str, criteria: &FieldValues, verb: &str) -> Result<(), MultiDbError> {
    if criteria.is_empty() {
        return Err(MultiDbError::BuildError(format!(
            "{verb} on {table} needs at least one criterion"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::query_builder::QuoteStyle;
    use crate::types::{BoundValue, RowValues};

    #[test]
    fn update_binds_set_params_before_where_params() {
        let built = build_update(
            &QuoteStyle::Backtick,
            "Users",
            &fields! { "Name" => "X" },
            &fields! { "ID" => 5, "Flag" => RowValues::Null },
        )
        .unwrap();
        assert_eq!(
            built.sql,
            "UPDATE `Users` SET `Name` = ? WHERE `ID` = ? AND `Flag` IS ?"
        );
        assert_eq!(built.params, vec!["X".into(), "5".into(), BoundValue::Null]);
    }

    #[test]
    fn update_set_null_uses_equals() {
        let built = build_update(
            &QuoteStyle::Backtick,
            "Users",
            &fields! { "Email" => RowValues::Null, "Seen" => "@asis NOW()" },
            &fields! { "ID" => 1 },
        )
        .unwrap();
        assert_eq!(
            built.sql,
            "UPDATE `Users` SET `Email` = ?, `Seen` = NOW() WHERE `ID` = ?"
        );
        assert_eq!(built.params, vec![BoundValue::Null, "1".into()]);
    }

    #[test]
    fn delete_with_compound_criteria() {
        let built = build_delete(
            &QuoteStyle::Backtick,
            "Blog.Posts",
            &fields! { "BlogID" => 3, "Slug" => "hello" },
        )
        .unwrap();
        assert_eq!(
            built.sql,
            "DELETE FROM `Blog`.`Posts` WHERE `BlogID` = ? AND `Slug` = ?"
        );
        assert_eq!(built.params, vec![BoundValue::from("3"), "hello".into()]);
    }

    #[test]
    fn empty_criteria_is_rejected() {
        let none = FieldValues::new();
        assert!(matches!(
            build_delete(&QuoteStyle::Backtick, "T", &none),
            Err(MultiDbError::BuildError(_))
        ));
        assert!(matches!(
            build_update(&QuoteStyle::Backtick, "T", &fields! { "A" => 1 }, &none),
            Err(MultiDbError::BuildError(_))
        ));
        assert!(matches!(
            build_update(&QuoteStyle::Backtick, "T", &none, &fields! { "A" => 1 }),
            Err(MultiDbError::BuildError(_))
        ));
    }
}
