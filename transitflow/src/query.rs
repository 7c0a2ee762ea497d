//! Distinct-key reads that drive the enrichment pipelines.
//!
//! A failed read is logged and treated as "no keys": the cycle then has
//! nothing to do and ends without touching the upstream API.

use serde_json::Value;
use tracing::{debug, error};

use crate::warehouse::{QueryRow, ReadQuery, TableRef, Warehouse};

/// Distinct `columns` over today's rows of `table` where `non_null` is set.
///
/// Returns an empty list on any query failure.
pub async fn distinct_keys(
    warehouse: &dyn Warehouse,
    table: &TableRef,
    columns: &[&str],
    non_null: &str,
) -> Vec<QueryRow> {
    let query = ReadQuery::distinct_today(table, columns, non_null);
    match warehouse.query(&query).await {
        Ok(rows) => {
            debug!(table = %table, keys = rows.len(), "Fetched distinct keys");
            rows
        }
        Err(e) => {
            error!(table = %table, error = %e, "Distinct key query failed");
            Vec::new()
        }
    }
}

/// Line codes seen in today's positions.
pub async fn distinct_line_codes(warehouse: &dyn Warehouse, positions: &TableRef) -> Vec<String> {
    distinct_keys(warehouse, positions, &["line_c"], "line_c")
        .await
        .iter()
        .filter_map(|row| as_text(row.get("line_c")?))
        .collect()
}

/// `(line code, internal code)` pairs seen in today's line variants.
pub async fn distinct_line_variants(
    warehouse: &dyn Warehouse,
    lines: &TableRef,
) -> Vec<(String, i64)> {
    distinct_keys(warehouse, lines, &["line_c", "cl"], "cl")
        .await
        .iter()
        .filter_map(|row| {
            let code = as_text(row.get("line_c")?)?;
            let internal = as_integer(row.get("cl")?)?;
            Some((code, internal))
        })
        .collect()
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
