//! Column-level lineage for SQL statements
//!
//! Analysis runs in two passes. [`LineageDetector`] walks the statement and
//! fills the scope arena; [`LineageResolver`] then follows every output
//! column of the root scope down through derived tables, CTEs, set
//! operations and scalar subqueries until it reaches base-table columns.
use std::collections::{BTreeSet, HashMap};

use anyhow::Context;
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use sqlparser::ast::Statement;
use sqlparser::parser::Parser;
use tracing::{debug, info, warn};

use super::detector::{AnalysisOptions, LineageDetector, TargetDescriptor};
use super::error::{LineageError, LineageResult};
use super::model::{
    FieldInfo, FieldKind, FieldLineageInfo, Origin, ScopeId, ScopeRecord, SourceColumn,
    SourceKind, StatementLineage, TargetColumn,
};
use super::scope::ScopeStack;
use super::tables::Catalog;
use crate::config::LineageConfig;

/// Sources already found for a name looked up in a scope's output
type ResolvedNames = HashMap<(ScopeId, String, Option<usize>), BTreeSet<SourceColumn>>;

/// Read-only walk from output fields to their base-table sources
pub struct LineageResolver<'s> {
    scopes: &'s ScopeStack,
    max_depth: usize,
    warnings: Vec<LineageError>,
    resolved: ResolvedNames,
}

impl<'s> LineageResolver<'s> {
    pub fn new(scopes: &'s ScopeStack, max_depth: usize) -> Self {
        Self {
            scopes,
            max_depth,
            warnings: Vec::new(),
            resolved: HashMap::new(),
        }
    }

    /// All sources of one field
    pub fn sources_of(&mut self, field: &FieldInfo) -> LineageResult<BTreeSet<SourceColumn>> {
        let mut sources = BTreeSet::new();
        self.resolve_field(field, 0, &mut sources)?;
        Ok(sources)
    }

    pub fn warnings(&self) -> &[LineageError] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<LineageError> {
        self.warnings
    }

    fn resolve_field(
        &mut self,
        field: &FieldInfo,
        depth: usize,
        out: &mut BTreeSet<SourceColumn>,
    ) -> LineageResult<()> {
        match &field.kind {
            FieldKind::Column(column) => match &column.origin {
                Origin::Table(table) => {
                    out.insert(SourceColumn::column(table.clone(), column.column.clone()));
                }
                Origin::Scope(child) => {
                    self.resolve_named(*child, &column.column, column.position, depth + 1, out)?;
                }
                Origin::Ambiguous(_) => {
                    out.insert(SourceColumn::other(
                        column.qualifier.clone(),
                        column.column.clone(),
                        SourceKind::Ambiguous,
                    ));
                }
                Origin::Unbound | Origin::Pending => {
                    out.insert(SourceColumn::other(
                        column.qualifier.clone(),
                        column.column.clone(),
                        SourceKind::Unresolved,
                    ));
                }
            },
            FieldKind::Derived(dependencies) => {
                for dependency in dependencies {
                    self.resolve_field(dependency, depth, out)?;
                }
            }
            FieldKind::ScalarSubquery(child) => {
                let scope = self.scope(*child, depth + 1)?;
                for output in &scope.output_fields {
                    self.resolve_field(output, depth + 1, out)?;
                }
            }
            FieldKind::Constant => {
                out.insert(SourceColumn::other(
                    None,
                    field.field_name.clone(),
                    SourceKind::Literal,
                ));
            }
            FieldKind::UnresolvedWildcard { table } => {
                out.insert(SourceColumn::other(
                    table.clone(),
                    "*",
                    SourceKind::UnresolvedWildcard,
                ));
            }
        }
        Ok(())
    }

    /// Follow a name into the output of scope `id`. Each lookup is resolved
    /// once; shared subtrees reuse the stored sources.
    fn resolve_named(
        &mut self,
        id: ScopeId,
        name: &str,
        position: Option<usize>,
        depth: usize,
        out: &mut BTreeSet<SourceColumn>,
    ) -> LineageResult<()> {
        let key = (id, name.to_string(), position);
        if let Some(sources) = self.resolved.get(&key) {
            out.extend(sources.iter().cloned());
            return Ok(());
        }
        let mut sources = BTreeSet::new();
        self.lookup_named(id, name, position, depth, &mut sources)?;
        out.extend(sources.iter().cloned());
        self.resolved.insert(key, sources);
        Ok(())
    }

    fn lookup_named(
        &mut self,
        id: ScopeId,
        name: &str,
        position: Option<usize>,
        depth: usize,
        out: &mut BTreeSet<SourceColumn>,
    ) -> LineageResult<()> {
        let scope = self.scope(id, depth)?;
        let fields = &scope.output_fields;

        let at_position = position
            .and_then(|p| fields.get(p))
            .filter(|field| field.field_name == name);
        let chosen = match at_position {
            Some(field) => Some(field),
            None => {
                let mut matches = fields.iter().filter(|field| field.field_name == name);
                let first = matches.next();
                if first.is_some() && matches.next().is_some() {
                    self.duplicate_output(name, id);
                }
                first.or_else(|| {
                    position
                        .and_then(|p| fields.get(p))
                        .filter(|field| !field.is_star())
                })
            }
        };
        if let Some(field) = chosen {
            return self.resolve_field(field, depth, out);
        }

        let stars: Vec<&FieldInfo> = fields.iter().filter(|field| field.is_star()).collect();
        match stars.as_slice() {
            [star] => self.resolve_through_star(star, name, depth, out),
            [] => {
                debug!(scope = id, column = name, "name not found in scope output");
                out.insert(SourceColumn::other(None, name, SourceKind::Unresolved));
                Ok(())
            }
            _ => {
                out.insert(SourceColumn::other(None, name, SourceKind::Ambiguous));
                Ok(())
            }
        }
    }

    /// A name missing from a scope's output can still come from its single
    /// unexpanded wildcard.
    fn resolve_through_star(
        &mut self,
        star: &FieldInfo,
        name: &str,
        depth: usize,
        out: &mut BTreeSet<SourceColumn>,
    ) -> LineageResult<()> {
        match &star.kind {
            FieldKind::UnresolvedWildcard { table: Some(table) } => {
                out.insert(SourceColumn::column(table.clone(), name));
            }
            FieldKind::Column(column) => match &column.origin {
                Origin::Scope(child) => self.resolve_named(*child, name, None, depth + 1, out)?,
                Origin::Table(table) => {
                    out.insert(SourceColumn::column(table.clone(), name));
                }
                _ => {
                    out.insert(SourceColumn::other(None, name, SourceKind::Unresolved));
                }
            },
            _ => {
                out.insert(SourceColumn::other(None, name, SourceKind::Unresolved));
            }
        }
        Ok(())
    }

    fn scope(&self, id: ScopeId, depth: usize) -> LineageResult<&'s ScopeRecord> {
        if depth > self.max_depth {
            return Err(LineageError::DepthExceeded(self.max_depth));
        }
        self.scopes
            .get(id)
            .ok_or_else(|| LineageError::MalformedAst(format!("unknown scope {}", id)))
    }

    fn duplicate_output(&mut self, column: &str, scope: ScopeId) {
        let warning = LineageError::DuplicateOutputName {
            column: column.to_string(),
            scope,
        };
        if !self.warnings.contains(&warning) {
            warn!(column, scope, "duplicate output name, using the first");
            self.warnings.push(warning);
        }
    }
}

/// Analyze one parsed statement. Failures are carried in the result's
/// `error` together with whatever lineage was computed before them.
pub fn analyze_statement(
    statement_index: usize,
    statement: &Statement,
    catalog: &Catalog,
    options: &AnalysisOptions,
) -> StatementLineage {
    let mut result = StatementLineage {
        statement_index,
        target_table: None,
        lineage: Vec::new(),
        warnings: Vec::new(),
        error: None,
    };

    let mut detector = LineageDetector::new(catalog, *options);
    let detected = detector.detect(statement);
    result.warnings = detector.take_warnings();
    result.target_table = detector.target().and_then(|target| target.table.clone());
    if let Err(err) = detected {
        warn!(statement = statement_index, error = %err, "statement analysis failed");
        result.error = Some(err);
        return result;
    }

    let Some(root) = detector
        .root_scope()
        .and_then(|id| detector.scopes().get(id))
    else {
        result.error = Some(LineageError::MalformedAst(
            "statement has no query body".to_string(),
        ));
        return result;
    };

    let (names, mismatch) = target_names(&root.output_fields, detector.target());
    // Output names are not columns of the target table
    let target_table = match mismatch {
        Some(_) => None,
        None => result.target_table.clone(),
    };
    result.error = mismatch;

    let mut resolver = LineageResolver::new(detector.scopes(), options.max_depth);
    for (field, name) in root.output_fields.iter().zip(names) {
        match resolver.sources_of(field) {
            Ok(sources) => result.lineage.push(FieldLineageInfo {
                target: TargetColumn {
                    table: target_table.clone(),
                    field: name,
                },
                sources,
                transformation: field.process,
            }),
            Err(err) => {
                warn!(statement = statement_index, error = %err, "lineage resolution stopped");
                result.error = Some(err);
                break;
            }
        }
    }
    result.warnings.extend(resolver.into_warnings());
    result
}

/// Target column names for the root outputs. An explicit column list must
/// match the output count; on mismatch the output names are used instead.
fn target_names(
    outputs: &[FieldInfo],
    target: Option<&TargetDescriptor>,
) -> (Vec<String>, Option<LineageError>) {
    let output_names = || outputs.iter().map(|f| f.field_name.clone()).collect();
    match target {
        Some(target) if !target.columns.is_empty() => {
            if target.columns.len() == outputs.len() {
                (target.columns.clone(), None)
            } else {
                (
                    output_names(),
                    Some(LineageError::PositionalMismatch {
                        targets: target.columns.len(),
                        outputs: outputs.len(),
                    }),
                )
            }
        }
        _ => (output_names(), None),
    }
}

/// Analyze a batch; one failing statement never stops the rest
pub fn analyze_statements(statements: &[Statement], config: &LineageConfig) -> Vec<StatementLineage> {
    let catalog = config.catalog();
    let options = config.analysis_options();

    let results: Vec<StatementLineage> = statements
        .iter()
        .enumerate()
        .map(|(index, statement)| analyze_statement(index, statement, &catalog, &options))
        .collect();

    let failed = results.iter().filter(|r| !r.is_ok()).count();
    info!(
        statements = results.len(),
        failed,
        "lineage analysis complete"
    );
    results
}

/// Parse `sql` with the configured dialect and analyze every statement
pub fn extract_column_lineage(
    sql: &str,
    config: &LineageConfig,
) -> anyhow::Result<Vec<StatementLineage>> {
    let dialect = config.dialect()?;
    let statements = Parser::parse_sql(dialect.as_ref(), sql).context("Error parsing SQL")?;
    Ok(analyze_statements(&statements, config))
}

/// Generate a graph representation of the lineage (dot format for Graphviz)
pub fn generate_lineage_graph(lineage: &[FieldLineageInfo]) -> String {
    let mut graph: DiGraph<String, String> = DiGraph::new();
    let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
    let mut node = |graph: &mut DiGraph<String, String>, label: String| {
        *nodes
            .entry(label.clone())
            .or_insert_with(|| graph.add_node(label))
    };

    for item in lineage {
        let target = node(&mut graph, item.target.to_string());
        for source in &item.sources {
            let source = node(&mut graph, source.to_string());
            graph.add_edge(source, target, item.transformation.to_string());
        }
    }

    format!("{}", Dot::new(&graph))
}
