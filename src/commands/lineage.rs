use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use sqlparser::parser::Parser as SqlParser;
use tracing::{info, warn};
use walkdir::WalkDir;

use lineage_flow::config::{read_config, LineageConfig};
use lineage_flow::sql_engine::detector::LineageDetector;
use lineage_flow::sql_engine::lineage::{analyze_statements, generate_lineage_graph};
use lineage_flow::sql_engine::model::{ScopeRecord, StatementLineage};

use crate::display;

/// Where the SQL comes from
pub enum SqlInput<'a> {
    Inline(&'a str),
    Path(&'a Path),
}

/// Lineage of every statement in one input
#[derive(Serialize)]
struct SourceLineage {
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_error: Option<String>,
    statements: Vec<StatementLineage>,
}

/// Load the config file and let CLI flags override it
pub fn load_config(
    config_path: Option<&Path>,
    dialect: Option<String>,
) -> anyhow::Result<LineageConfig> {
    let mut config = read_config(config_path)?;
    if let Some(dialect) = dialect {
        config.dialect = dialect;
    }
    Ok(config)
}

/// Run the lineage command
pub fn lineage_command(
    input: SqlInput<'_>,
    format: &str,
    config: &LineageConfig,
) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let sources = collect_sources(input)?;

    let results: Vec<SourceLineage> = sources
        .into_iter()
        .map(|(source, sql)| analyze_source(source, &sql, config))
        .collect::<anyhow::Result<_>>()?;

    let failed = results
        .iter()
        .filter(|r| r.parse_error.is_some() || r.statements.iter().any(|s| !s.is_ok()))
        .count();
    info!(
        sources = results.len(),
        failed,
        elapsed = ?start_time.elapsed(),
        "lineage command finished"
    );

    match format {
        "text" => output_text_format(&results),
        "json" => println!("{}", serde_json::to_string_pretty(&results)?),
        "dot" => {
            let lineage: Vec<_> = results
                .iter()
                .flat_map(|r| r.statements.iter())
                .flat_map(|s| s.lineage.iter().cloned())
                .collect();
            println!("{}", generate_lineage_graph(&lineage));
        }
        _ => {
            println!(
                "Unsupported output format: {}. Using text format instead.",
                format
            );
            output_text_format(&results);
        }
    }

    Ok(())
}

/// Dump the scope arena of every statement as JSON
pub fn scopes_command(sql: &str, config: &LineageConfig) -> anyhow::Result<()> {
    #[derive(Serialize)]
    struct StatementScopes {
        statement_index: usize,
        root: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        scopes: Vec<ScopeRecord>,
    }

    let dialect = config.dialect()?;
    let statements = SqlParser::parse_sql(dialect.as_ref(), sql).context("Error parsing SQL")?;
    let catalog = config.catalog();

    let mut output = Vec::with_capacity(statements.len());
    for (statement_index, statement) in statements.iter().enumerate() {
        let mut detector = LineageDetector::new(&catalog, config.analysis_options());
        let error = detector.detect(statement).err().map(|err| err.to_string());
        output.push(StatementScopes {
            statement_index,
            root: detector.root_scope(),
            error,
            scopes: detector.scopes().iter().cloned().collect(),
        });
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn analyze_source(source: String, sql: &str, config: &LineageConfig) -> anyhow::Result<SourceLineage> {
    let dialect = config.dialect()?;
    match SqlParser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => Ok(SourceLineage {
            source,
            parse_error: None,
            statements: analyze_statements(&statements, config),
        }),
        Err(err) => {
            warn!(source = %source, error = %err, "failed to parse SQL");
            Ok(SourceLineage {
                source,
                parse_error: Some(err.to_string()),
                statements: Vec::new(),
            })
        }
    }
}

fn collect_sources(input: SqlInput<'_>) -> anyhow::Result<Vec<(String, String)>> {
    match input {
        SqlInput::Inline(sql) => Ok(vec![("inline".to_string(), sql.to_string())]),
        SqlInput::Path(path) => {
            if !path.exists() {
                bail!("Path not found: {}", path.display());
            }
            let files = find_sql_files(path);
            println!(
                "{}",
                format!("Found {} SQL files in: {}", files.len(), path.display()).green()
            );
            files
                .into_iter()
                .map(|file| {
                    let sql = fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    Ok((file.display().to_string(), sql))
                })
                .collect()
        }
    }
}

/// Find all SQL files under `path` (recursively), or `path` itself when it
/// is a file
fn find_sql_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    let mut sql_files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "sql"))
        .collect();
    sql_files.sort();
    sql_files
}

fn output_text_format(results: &[SourceLineage]) {
    println!("\n--- {} ---", "Column Lineage".green());
    for result in results {
        if let Some(err) = &result.parse_error {
            println!("\n{} {}", result.source.bold(), format!("parse error: {}", err).red());
            continue;
        }
        for statement in &result.statements {
            print!("{}", display::format_statement(&result.source, statement));
        }
    }
}
