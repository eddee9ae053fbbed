//! Result-set row representation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::MySqlValue;

/// Column metadata shared by every row of one result set.
///
/// Wrapped in `Arc` so rows stay cheap to produce while streaming large
/// result sets.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row streamed out of a query.
///
/// Values are accessible by position or by column name.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<MySqlValue>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a row owning its column metadata. Prefer [`Row::with_columns`]
    /// when many rows share one result set.
    pub fn new(column_names: Vec<String>, values: Vec<MySqlValue>) -> Self {
        Self {
            values,
            columns: Arc::new(ColumnInfo::new(column_names)),
        }
    }

    /// Create a row sharing column metadata with its siblings.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<MySqlValue>) -> Self {
        Self { values, columns }
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value by position.
    pub fn get(&self, index: usize) -> Option<&MySqlValue> {
        self.values.get(index)
    }

    /// Value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&MySqlValue> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Iterate over the values in column order.
    pub fn values(&self) -> impl Iterator<Item = &MySqlValue> {
        self.values.iter()
    }

    /// Consume the row, yielding its values.
    pub fn into_values(self) -> Vec<MySqlValue> {
        self.values
    }
}
