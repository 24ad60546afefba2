use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use sqlparser::dialect::{dialect_from_str, Dialect};

use crate::sql_engine::detector::AnalysisOptions;
use crate::sql_engine::model::TableInfo;
use crate::sql_engine::scope::DEFAULT_MAX_DEPTH;
use crate::sql_engine::tables::{Catalog, TableSchema};

/// File looked up in the current directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "lineage.yaml";

/// Analysis settings, usually read from `lineage.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageConfig {
    /// SQL dialect name understood by sqlparser (generic, clickhouse, hive, ...)
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// Limit on query nesting and on resolver recursion
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Known table layouts used for wildcard expansion and disambiguation
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

/// Column layout of one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default)]
    pub database: Option<String>,

    pub name: String,

    #[serde(default)]
    pub columns: Vec<String>,
}

fn default_dialect() -> String {
    "generic".to_string()
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            max_depth: default_max_depth(),
            tables: Vec::new(),
        }
    }
}

impl LineageConfig {
    pub fn dialect(&self) -> anyhow::Result<Box<dyn Dialect>> {
        match dialect_from_str(&self.dialect) {
            Some(dialect) => Ok(dialect),
            None => bail!("Unknown SQL dialect: {}", self.dialect),
        }
    }

    /// Build the catalog from the configured tables
    pub fn catalog(&self) -> Catalog {
        let mut catalog = Catalog::new();
        for table in &self.tables {
            catalog.register_schema(TableSchema {
                table: TableInfo::new(table.database.clone(), table.name.clone()),
                columns: table.columns.clone(),
            });
        }
        catalog
    }

    pub fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            max_depth: self.max_depth,
        }
    }
}

/// Reads the configuration file from the specified path, or looks for
/// lineage.yaml in the current directory. Without either the defaults apply.
pub fn read_config(config_path: Option<&Path>) -> anyhow::Result<LineageConfig> {
    let config_path: PathBuf = match config_path {
        Some(path) => {
            if !path.exists() {
                bail!("Configuration file not found at: {}", path.display());
            }
            path.to_path_buf()
        }
        None => {
            let candidate = std::env::current_dir()
                .context("Cannot determine the current directory")?
                .join(DEFAULT_CONFIG_FILE);
            if !candidate.exists() {
                return Ok(LineageConfig::default());
            }
            candidate
        }
    };

    let config_str = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    let config: LineageConfig = serde_yaml::from_str(&config_str)
        .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

    Ok(config)
}
