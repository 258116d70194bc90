use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ColumnType, is_null_literal};

/// Stable identifier of a record within one source batch (1-based data row).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Column name with its inferred type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnSchema {
    pub name: String,
    /// `None` when the column holds no non-null values.
    pub inferred_type: Option<ColumnType>,
}

/// Identifies one bronze-to-silver unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetHandle {
    pub dataset_id: String,
    pub source_path: PathBuf,
    /// SHA-256 of the source bytes.
    pub fingerprint: String,
    pub schema: Vec<ColumnSchema>,
    pub row_count: u64,
    pub created_at: DateTime<Utc>,
}

impl DatasetHandle {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.schema.iter().find(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// One row of raw cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub values: Vec<Option<String>>,
}

/// An in-memory table of raw cells keyed by column position.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    columns: Vec<String>,
    lookup: HashMap<String, usize>,
    records: Vec<Record>,
}

impl RecordBatch {
    /// Build a batch, rejecting duplicate columns and ragged rows.
    pub fn new(columns: Vec<String>, records: Vec<Record>) -> Result<Self> {
        let mut lookup = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            if lookup.insert(column.clone(), idx).is_some() {
                return Err(Error::InvalidDataset(format!("duplicate column: {column}")));
            }
        }
        for record in &records {
            if record.values.len() != columns.len() {
                return Err(Error::InvalidDataset(format!(
                    "record {} has {} value(s), expected {}",
                    record.id,
                    record.values.len(),
                    columns.len()
                )));
            }
        }
        Ok(Self {
            columns,
            lookup,
            records,
        })
    }

    /// Build a batch from raw text rows, numbering records from 1 and
    /// normalizing null literals.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        let records = rows
            .into_iter()
            .enumerate()
            .map(|(idx, row)| Record {
                id: RecordId(idx as u64 + 1),
                values: row
                    .into_iter()
                    .map(|cell| if is_null_literal(&cell) { None } else { Some(cell) })
                    .collect(),
            })
            .collect();
        Self::new(columns, records)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn record_ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|record| record.id).collect()
    }

    /// Non-null values of a column in record order.
    pub fn column_values(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        let idx = self.column_index(name)?;
        Some(
            self.records
                .iter()
                .filter_map(move |record| record.values[idx].as_deref()),
        )
    }

    /// Replace every cell of a column through `f`, leaving nulls untouched.
    pub fn map_column<F>(&mut self, name: &str, mut f: F) -> bool
    where
        F: FnMut(&str) -> String,
    {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        for record in &mut self.records {
            if let Some(value) = record.values[idx].as_deref() {
                record.values[idx] = Some(f(value));
            }
        }
        true
    }

    /// Infer a schema snapshot from every non-null value.
    pub fn infer_schema(&self) -> Vec<ColumnSchema> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, name)| ColumnSchema {
                name: name.clone(),
                inferred_type: ColumnType::infer(
                    self.records
                        .iter()
                        .filter_map(|record| record.values[idx].as_deref()),
                ),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[&[&str]]) -> Vec<Vec<String>> {
        values
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    #[test]
    fn rejects_ragged_rows() {
        let result = RecordBatch::from_rows(
            vec!["a".to_string(), "b".to_string()],
            rows(&[&["1", "2"], &["3"]]),
        );
        assert!(matches!(result, Err(Error::InvalidDataset(_))));
    }

    #[test]
    fn normalizes_nulls_and_numbers_records() {
        let batch = RecordBatch::from_rows(
            vec!["a".to_string(), "b".to_string()],
            rows(&[&["1", ""], &["NULL", "x"]]),
        )
        .expect("batch");
        assert_eq!(batch.record_ids(), vec![RecordId(1), RecordId(2)]);
        assert_eq!(batch.records()[0].values[1], None);
        assert_eq!(batch.records()[1].values[0], None);
        let schema = batch.infer_schema();
        assert_eq!(schema[0].inferred_type, Some(ColumnType::Integer));
        assert_eq!(schema[1].inferred_type, Some(ColumnType::Text));
    }

    #[test]
    fn map_column_skips_nulls() {
        let mut batch =
            RecordBatch::from_rows(vec!["a".to_string()], rows(&[&["x"], &[""]])).expect("batch");
        assert!(batch.map_column("a", |value| value.to_uppercase()));
        assert_eq!(batch.records()[0].values[0].as_deref(), Some("X"));
        assert_eq!(batch.records()[1].values[0], None);
        assert!(!batch.map_column("missing", |value| value.to_string()));
    }
}
