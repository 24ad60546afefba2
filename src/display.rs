use colored::*;

use lineage_flow::sql_engine::model::{SourceKind, StatementLineage};

/// Returns the compact version of the logo
pub fn get_compact_logo() -> String {
    let logo = r#"
  _    _ _  _ ____ ____ ____ ____    ____ _    ____ _ _ _
  |    | |\ | |___ |__| | __ |___    |___ |    |  | | | |
  |___ | | \| |___ |  | |__] |___    |    |___ |__| |_|_|
    "#;

    logo.to_string()
}

/// Display version information with the logo
pub fn display_version() {
    println!("{}", get_compact_logo().bright_cyan());
    println!("LineageFlow CLI version {}", env!("CARGO_PKG_VERSION"));
    println!("Column-level lineage for SQL");
    println!("Repository: {}", env!("CARGO_PKG_REPOSITORY"));
}

/// Render one statement's lineage as indented text
pub fn format_statement(source: &str, result: &StatementLineage) -> String {
    let mut out = String::new();

    let target = match &result.target_table {
        Some(table) => format!(" → {}", table),
        None => String::new(),
    };
    out.push_str(&format!(
        "\n{} #{}{}\n",
        source.bold(),
        result.statement_index + 1,
        target.green()
    ));

    for item in &result.lineage {
        out.push_str(&format!(
            "  {} [{}]\n",
            item.target.to_string().bold(),
            item.transformation
        ));
        for source in &item.sources {
            let line = match source.kind {
                SourceKind::Column => source.to_string().normal(),
                SourceKind::Literal => source.to_string().dimmed(),
                _ => source.to_string().yellow(),
            };
            out.push_str(&format!("    ← {}\n", line));
        }
    }

    for warning in &result.warnings {
        out.push_str(&format!("  {} {}\n", "warning:".yellow(), warning));
    }
    if let Some(err) = &result.error {
        out.push_str(&format!("  {} {}\n", "error:".red(), err));
    }
    out
}
