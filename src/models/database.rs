use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One column's descriptive metadata, as rendered into the schema summary
/// the selector hands to the decomposer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub column_name: String,
    pub display_name: String,
    pub comment: Option<String>,
}

/// Up to three example values drawn from a live column, used to ground the
/// LLM's understanding of what a column actually contains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleColumnValues {
    pub column_name: String,
    pub examples: Vec<String>,
}

/// A single foreign-key edge: `local_table.local_column = foreign_table.foreign_column`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyEdge {
    pub local_column: String,
    pub foreign_table: String,
    pub foreign_column: String,
}

/// Introspected description of one database, cached by the selector keyed
/// on `database_id` and invalidated only on explicit refresh (spec.md §9
/// "Schema cache coherence").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub database_name: String,
    pub description_map: HashMap<String, Vec<ColumnDescription>>,
    pub sample_value_map: HashMap<String, Vec<SampleColumnValues>>,
    pub primary_key_map: HashMap<String, Vec<String>>,
    pub foreign_key_map: HashMap<String, Vec<ForeignKeyEdge>>,
}

impl DatabaseInfo {
    pub fn table_names(&self) -> Vec<&str> {
        self.description_map.keys().map(String::as_str).collect()
    }

    pub fn column_count(&self, table: &str) -> usize {
        self.description_map.get(table).map(Vec::len).unwrap_or(0)
    }

    /// Derive the scalar summary used by the selector's pruning decision.
    pub fn stats(&self) -> DatabaseStats {
        let table_count = self.description_map.len();
        let mut total_column_count = 0usize;
        let mut max_column_count = 0usize;
        for columns in self.description_map.values() {
            total_column_count += columns.len();
            max_column_count = max_column_count.max(columns.len());
        }
        let average_column_count = if table_count == 0 {
            0.0
        } else {
            total_column_count as f64 / table_count as f64
        };
        DatabaseStats {
            table_count,
            max_column_count,
            total_column_count,
            average_column_count,
        }
    }
}

/// Scalar summary derived from [`DatabaseInfo`], used by the selector's
/// complexity-evaluation gate (spec.md §4.2).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub table_count: usize,
    pub max_column_count: usize,
    pub total_column_count: usize,
    pub average_column_count: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> DatabaseInfo {
        let mut description_map = HashMap::new();
        description_map.insert(
            "schools".to_string(),
            vec![
                ColumnDescription { column_name: "id".into(), display_name: "ID".into(), comment: None },
                ColumnDescription { column_name: "city".into(), display_name: "City".into(), comment: None },
            ],
        );
        description_map.insert(
            "students".to_string(),
            vec![ColumnDescription { column_name: "id".into(), display_name: "ID".into(), comment: None }],
        );
        DatabaseInfo {
            database_name: "shop".into(),
            description_map,
            sample_value_map: HashMap::new(),
            primary_key_map: HashMap::new(),
            foreign_key_map: HashMap::new(),
        }
    }

    #[test]
    fn stats_average_matches_manual_computation() {
        let stats = sample_info().stats();
        assert_eq!(stats.table_count, 2);
        assert_eq!(stats.total_column_count, 3);
        assert_eq!(stats.max_column_count, 2);
        assert!((stats.average_column_count - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn boundary_thirty_columns_average_six_does_not_trigger() {
        let mut description_map = HashMap::new();
        for i in 0..5 {
            let columns = (0..6)
                .map(|c| ColumnDescription { column_name: format!("c{c}"), display_name: format!("C{c}"), comment: None })
                .collect();
            description_map.insert(format!("t{i}"), columns);
        }
        let info = DatabaseInfo { database_name: "x".into(), description_map, ..Default::default() };
        let stats = info.stats();
        assert_eq!(stats.total_column_count, 30);
        assert!((stats.average_column_count - 6.0).abs() < f64::EPSILON);
    }
}
