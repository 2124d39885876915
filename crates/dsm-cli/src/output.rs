//! Terminal rendering for query results and pool status

use comfy_table::{Table, presets::UTF8_FULL};
use dsm_connection::{PoolConfig, PoolStats};
use dsm_core::{Row, Value};

/// Render rows as a table, one column per result column
pub fn rows_table(columns: &[String], rows: &[Row]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(columns.to_vec());
    for row in rows {
        table.add_row(row.values().iter().map(Value::to_string).collect::<Vec<_>>());
    }
    table
}

/// Render rows as a JSON array of objects
pub fn rows_json(rows: &[Row]) -> serde_json::Value {
    let rows = rows
        .iter()
        .map(|row| {
            let object = row
                .columns()
                .iter()
                .zip(row.values())
                .map(|(column, value)| (column.clone(), value_json(value)))
                .collect::<serde_json::Map<_, _>>();
            serde_json::Value::Object(object)
        })
        .collect();
    serde_json::Value::Array(rows)
}

fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int64(i) => serde_json::Value::from(*i),
        Value::Float64(f) => serde_json::Value::from(*f),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
    }
}

/// Render pool bounds and counters
pub fn status_table(stats: &PoolStats, config: &PoolConfig) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Setting", "Value"]);
    table.add_row(vec!["idle".to_string(), stats.idle().to_string()]);
    table.add_row(vec!["active".to_string(), stats.active().to_string()]);
    table.add_row(vec!["min_idle".to_string(), config.min_idle().to_string()]);
    table.add_row(vec!["max_idle".to_string(), config.max_idle().to_string()]);
    table.add_row(vec!["max_active".to_string(), config.max_active().to_string()]);
    table.add_row(vec![
        "acquire_timeout".to_string(),
        config
            .acquire_timeout()
            .map(|t| format!("{} ms", t.as_millis()))
            .unwrap_or_else(|| "fail fast".to_string()),
    ]);
    table.add_row(vec![
        "utilization".to_string(),
        format!("{:.0}%", stats.utilization() * 100.0),
    ]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn sample_rows() -> Vec<Row> {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        vec![
            Row::new(Arc::clone(&columns), vec![Value::Int64(1), Value::from("ada")]),
            Row::new(columns, vec![Value::Int64(2), Value::Null]),
        ]
    }

    #[test]
    fn test_rows_table() {
        let columns = ["id".to_string(), "name".to_string()];
        let rendered = rows_table(&columns, &sample_rows()).to_string();
        assert!(rendered.contains("ada"));
        assert!(rendered.contains("NULL"));
    }

    #[test]
    fn test_rows_json() {
        let json = rows_json(&sample_rows());
        assert_eq!(
            json,
            serde_json::json!([{"id": 1, "name": "ada"}, {"id": 2, "name": null}])
        );
    }

    #[test]
    fn test_status_table() {
        let rendered =
            status_table(&PoolStats::new(2, 1, 0, false), &PoolConfig::new(2, 5)).to_string();
        assert!(rendered.contains("max_active"));
        assert!(rendered.contains("fail fast"));
    }
}
