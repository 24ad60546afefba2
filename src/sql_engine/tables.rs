use std::collections::HashMap;

use super::model::TableInfo;

/// Column layout of a known table
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: TableInfo,
    pub columns: Vec<String>,
}

/// Optional schema knowledge used to expand wildcards and to decide which
/// FROM binding owns an unqualified column. Lineage works without it.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    schemas: HashMap<TableInfo, TableSchema>,
}

impl Catalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    /// Add or update a table schema
    pub fn register_schema(&mut self, schema: TableSchema) {
        self.schemas.insert(schema.table.clone(), schema);
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Get all known tables
    pub fn get_tables(&self) -> Vec<&TableInfo> {
        self.schemas.keys().collect()
    }

    /// Look a table up by exact identity; a reference without a database
    /// also matches a single registered table of the same name.
    pub fn get_schema(&self, table: &TableInfo) -> Option<&TableSchema> {
        if let Some(schema) = self.schemas.get(table) {
            return Some(schema);
        }
        if table.database_name.is_some() {
            return None;
        }

        let mut by_name = self
            .schemas
            .values()
            .filter(|schema| schema.table.table_name == table.table_name);
        match (by_name.next(), by_name.next()) {
            (Some(schema), None) => Some(schema),
            _ => None,
        }
    }

    /// Get column names for a table, in declaration order
    pub fn get_column_names(&self, table: &TableInfo) -> Option<&[String]> {
        self.get_schema(table).map(|schema| schema.columns.as_slice())
    }

    /// `Some(true/false)` when the table is known, `None` otherwise
    pub fn has_column(&self, table: &TableInfo, column: &str) -> Option<bool> {
        self.get_column_names(table)
            .map(|columns| columns.iter().any(|c| c == column))
    }
}
