use crate::error::MultiDbError;
use crate::normalize::normalize_params;
use crate::types::{BoundValue, FieldValues};

use super::{BuiltStatement, ClauseContext, QuoteIdentifier, render_clauses};

/// Whether an insert tolerates duplicate keys by turning into an update.
///
/// `Fields` limits the updated columns to the given list; an empty list behaves like `Off`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Upsert {
    #[default]
    Off,
    AllFields,
    Fields(Vec<String>),
}

impl Upsert {
    fn update_fields<'a>(&'a self, row_fields: &[&'a str]) -> Option<Vec<&'a str>> {
        match self {
            Upsert::Off => None,
            Upsert::AllFields => Some(row_fields.to_vec()),
            Upsert::Fields(list) if list.is_empty() => None,
            Upsert::Fields(list) => Some(list.iter().map(String::as_str).collect()),
        }
    }
}

impl From<bool> for Upsert {
    fn from(enabled: bool) -> Self {
        if enabled { Upsert::AllFields } else { Upsert::Off }
    }
}

/// `INSERT INTO t (cols) VALUES (vals)`, optionally with `ON DUPLICATE KEY UPDATE`.
///
/// With a single-field primary key the first assignment is `pk=LAST_INSERT_ID(pk)` so the
/// driver's last-insert-id still points at the existing row after a collision. Primary key
/// fields are never in the `VALUES(...)` assignments.
///
/// # Errors
/// Returns `MultiDbError::BuildError` if the row has positional (unnamed) entries.
pub fn build_insert_one<Q: QuoteIdentifier + ?Sized>(
    quoter: &Q,
    table: &str,
    row: &FieldValues,
    primary_key: &[String],
    upsert: &Upsert,
) -> Result<BuiltStatement, MultiDbError> {
    ensure_named(row, table)?;
    let row_fields = row.field_names();

    let mut assignments = Vec::new();
    if let Some(update_fields) = upsert.update_fields(&row_fields) {
        if let [pk] = primary_key {
            let quoted = quoter.quote_identifier(pk);
            assignments.push(format!("{quoted}=LAST_INSERT_ID({quoted})"));
        }
        assignments.extend(
            update_fields
                .into_iter()
                .filter(|field| !primary_key.iter().any(|pk| pk.as_str() == *field))
                .map(|field| values_assignment(quoter, field)),
        );
    }

    let mut params = Vec::with_capacity(row.len());
    let values = values_tuple(quoter, row, &mut params);
    Ok(BuiltStatement {
        sql: insert_sql(quoter, table, &row_fields, &[values], &assignments),
        params,
    })
}

/// Multi-row `INSERT INTO t (cols) VALUES (...), (...)`.
///
/// Columns come from the first row; later rows are matched to them by name. Upsert
/// assignments are `f=VALUES(f)` for every column (or the allow-list).
///
/// # Errors
/// Returns `MultiDbError::BuildError` if there are no rows, the first row is empty, a row
/// has positional entries, or a row's fields differ from the first row's.
pub fn build_insert_many<Q: QuoteIdentifier + ?Sized>(
    quoter: &Q,
    table: &str,
    rows: &[FieldValues],
    upsert: &Upsert,
) -> Result<BuiltStatement, MultiDbError> {
    let Some(first) = rows.first().filter(|row| !row.is_empty()) else {
        return Err(MultiDbError::BuildError(format!(
            "Invalid data rows given for a multi-row insert into {table}"
        )));
    };
    ensure_named(first, table)?;
    let columns = first.field_names();

    let mut expected = columns.clone();
    expected.sort_unstable();

    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let mut tuples = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        ensure_named(row, table)?;
        let mut names = row.field_names();
        names.sort_unstable();
        if names != expected {
            return Err(MultiDbError::BuildError(format!(
                "Row {idx} for {table} has fields {:?}; expected {:?}",
                row.field_names(),
                columns
            )));
        }
        let aligned: FieldValues = columns
            .iter()
            .filter_map(|column| row.get(column).map(|value| (*column, value.clone())))
            .collect();
        tuples.push(values_tuple(quoter, &aligned, &mut params));
    }

    let assignments = upsert
        .update_fields(&columns)
        .map(|fields| {
            fields
                .into_iter()
                .map(|field| values_assignment(quoter, field))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok(BuiltStatement {
        sql: insert_sql(quoter, table, &columns, &tuples, &assignments),
        params,
    })
}

fn ensure_named(row: &FieldValues, table: &str) -> Result<(), MultiDbError> {
    if row.has_positional() {
        return Err(MultiDbError::BuildError(format!(
            "Insert into {table} needs a field name for every value"
        )));
    }
    Ok(())
}

fn values_assignment<Q: QuoteIdentifier + ?Sized>(quoter: &Q, field: &str) -> String {
    let quoted = quoter.quote_identifier(field);
    format!("{quoted}=VALUES({quoted})")
}

fn values_tuple<Q: QuoteIdentifier + ?Sized>(
    quoter: &Q,
    row: &FieldValues,
    params: &mut Vec<BoundValue>,
) -> String {
    // Fields are rendered by the insert column list, so only the right-hand sides go here.
    let rhs_only: Vec<_> = normalize_params(row)
        .into_iter()
        .map(|mut param| {
            param.field = None;
            param
        })
        .collect();
    render_clauses(quoter, &rhs_only, ClauseContext::Set, ", ", params)
}

fn insert_sql<Q: QuoteIdentifier + ?Sized>(
    quoter: &Q,
    table: &str,
    columns: &[&str],
    tuples: &[String],
    assignments: &[String],
) -> String {
    let columns = columns
        .iter()
        .map(|column| quoter.quote_identifier(column))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({columns}) VALUES ({})",
        quoter.quote_identifier(table),
        tuples.join("), (")
    );
    if !assignments.is_empty() {
        sql.push_str(" ON DUPLICATE KEY UPDATE ");
        sql.push_str(&assignments.join(", "));
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::query_builder::QuoteStyle;
    use crate::types::RowValues;

    fn pk(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| (*f).to_string()).collect()
    }

    #[test]
    fn insert_one_plain() {
        let row = fields! { "Name" => "Ann", "Created" => "@asis NOW()", "Score" => 3 };
        let built =
            build_insert_one(&QuoteStyle::Backtick, "Users", &row, &pk(&["ID"]), &Upsert::Off)
                .unwrap();
        assert_eq!(
            built.sql,
            "INSERT INTO `Users` (`Name`, `Created`, `Score`) VALUES (?, NOW(), ?)"
        );
        assert_eq!(built.params, vec!["Ann".into(), "3".into()]);
    }

    #[test]
    fn insert_one_upsert_with_single_pk_starts_with_last_insert_id() {
        let row = fields! { "ID" => 7, "Name" => "Ann", "Email" => RowValues::Null };
        let built = build_insert_one(
            &QuoteStyle::Backtick,
            "Users",
            &row,
            &pk(&["ID"]),
            &Upsert::AllFields,
        )
        .unwrap();
        assert_eq!(
            built.sql,
            "INSERT INTO `Users` (`ID`, `Name`, `Email`) VALUES (?, ?, ?) ON DUPLICATE KEY UPDATE \
             `ID`=LAST_INSERT_ID(`ID`), `Name`=VALUES(`Name`), `Email`=VALUES(`Email`)"
        );
        assert_eq!(built.params, vec!["7".into(), "Ann".into(), BoundValue::Null]);
    }

    #[test]
    fn insert_one_upsert_allow_list_skips_compound_pk_fields() {
        let row = fields! { "A" => 1, "B" => 2, "C" => 3 };
        let built = build_insert_one(
            &QuoteStyle::Backtick,
            "T",
            &row,
            &pk(&["A", "B"]),
            &Upsert::Fields(vec!["B".into(), "C".into()]),
        )
        .unwrap();
        assert!(built.sql.ends_with(" ON DUPLICATE KEY UPDATE `C`=VALUES(`C`)"));
    }

    #[test]
    fn upsert_without_assignments_is_omitted() {
        let row = fields! { "A" => 1, "B" => 2 };
        let built = build_insert_one(
            &QuoteStyle::Backtick,
            "T",
            &row,
            &pk(&["A", "B"]),
            &Upsert::AllFields,
        )
        .unwrap();
        assert_eq!(built.sql, "INSERT INTO `T` (`A`, `B`) VALUES (?, ?)");

        let off = build_insert_one(
            &QuoteStyle::Backtick,
            "T",
            &row,
            &pk(&["A"]),
            &Upsert::Fields(Vec::new()),
        )
        .unwrap();
        assert!(!off.sql.contains("DUPLICATE"));
    }

    #[test]
    fn insert_one_rejects_positional_values() {
        let row = FieldValues::new().with_positional(1);
        let err = build_insert_one(&QuoteStyle::Backtick, "T", &row, &[], &Upsert::Off)
            .unwrap_err();
        assert!(matches!(err, MultiDbError::BuildError(_)));
    }

    #[test]
    fn insert_many_aligns_rows_to_first_row_columns() {
        let rows = vec![
            fields! { "A" => 1, "B" => "x" },
            fields! { "B" => "@asis UUID()", "A" => 2 },
        ];
        let built = build_insert_many(&QuoteStyle::Backtick, "T", &rows, &Upsert::AllFields)
            .unwrap();
        assert_eq!(
            built.sql,
            "INSERT INTO `T` (`A`, `B`) VALUES (?, ?), (?, UUID()) ON DUPLICATE KEY UPDATE \
             `A`=VALUES(`A`), `B`=VALUES(`B`)"
        );
        assert_eq!(
            built.params,
            vec![BoundValue::from("1"), "x".into(), "2".into()]
        );
    }

    #[test]
    fn insert_many_rejects_empty_input_and_mismatched_rows() {
        let empty: Vec<FieldValues> = Vec::new();
        assert!(matches!(
            build_insert_many(&QuoteStyle::Backtick, "T", &empty, &Upsert::Off),
            Err(MultiDbError::BuildError(_))
        ));
        assert!(matches!(
            build_insert_many(&QuoteStyle::Backtick, "T", &[FieldValues::new()], &Upsert::Off),
            Err(MultiDbError::BuildError(_))
        ));
        let ragged = vec![fields! { "A" => 1 }, fields! { "A" => 2, "B" => 3 }];
        assert!(matches!(
            build_insert_many(&QuoteStyle::Backtick, "T", &ragged, &Upsert::Off),
            Err(MultiDbError::BuildError(_))
        ));
    }

    #[test]
    fn upsert_from_bool() {
        assert_eq!(Upsert::from(true), Upsert::AllFields);
        assert_eq!(Upsert::from(false), Upsert::Off);
    }
}
