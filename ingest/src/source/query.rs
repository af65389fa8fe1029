//! Construction of the delta-selection query.
//!
//! Every source table carries two implicit audit columns: a creation
//! timestamp and a nullable alteration timestamp. The effective change
//! timestamp of a row is the alteration timestamp when present, the creation
//! timestamp otherwise.

use pg_escape::quote_identifier;

/// Audit column holding the row creation timestamp.
pub const CREATED_AT_COLUMN: &str = "aud_dh_criacao";

/// Audit column holding the row alteration timestamp. NULL until first update.
pub const UPDATED_AT_COLUMN: &str = "aud_dh_alteracao";

/// Projected column carrying the effective change timestamp.
pub const DATA_REF_COLUMN: &str = "data_ref";

/// Projected column carrying the insert/update classification flag.
pub const CHANGE_OP_COLUMN: &str = "change_op";

/// Builds the delta-selection query for one table.
///
/// The watermark is the single bind parameter (`$1`). The predicate selects
/// rows whose effective change timestamp is strictly greater than the
/// watermark; the projection derives `data_ref` and the `change_op` flag
/// (`'I'` when the row was never altered, `'U'` otherwise). Ordering by
/// `(data_ref, business key)` ascending makes replays and tie-breaks
/// deterministic.
pub fn build_delta_query(source_schema: &str, table: &str, order_keys: &[String]) -> String {
    let qualified_table = format!(
        "{}.{}",
        quote_identifier(source_schema),
        quote_identifier(table)
    );

    let mut order_by = DATA_REF_COLUMN.to_string();
    for key in order_keys {
        order_by.push_str(", t.");
        order_by.push_str(&quote_identifier(key));
    }

    format!(
        r#"
        select
            t.*,
            coalesce(t.{updated}, t.{created}) as {data_ref},
            case when t.{updated} is null then 'I' else 'U' end as {change_op}
        from {qualified_table} t
        where coalesce(t.{updated}, t.{created}) > $1
        order by {order_by}
        "#,
        updated = UPDATED_AT_COLUMN,
        created = CREATED_AT_COLUMN,
        data_ref = DATA_REF_COLUMN,
        change_op = CHANGE_OP_COLUMN,
    )
}
