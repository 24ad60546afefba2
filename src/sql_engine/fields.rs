//! Turns SELECT-list items into [`FieldInfo`] values
use std::ops::ControlFlow;

use sqlparser::ast::{Expr, Ident, Query, SelectItem, Visit, Visitor};
use tracing::warn;

use super::detector::LineageDetector;
use super::error::{LineageError, LineageResult};
use super::model::{
    BindingTarget, ColumnRef, FieldInfo, FieldKind, Origin, ScopeKind, TableInfo,
    Transformation,
};

const AGGREGATE_FUNCTIONS: &[&str] = &[
    "sum",
    "count",
    "avg",
    "min",
    "max",
    "any",
    "anylast",
    "argmin",
    "argmax",
    "uniq",
    "uniqexact",
    "grouparray",
    "groupuniqarray",
    "array_agg",
    "string_agg",
    "median",
    "stddev",
    "variance",
];

/// Build the output fields for one select item. Every item yields exactly one
/// field except wildcards, which yield one per column they expand to.
pub(crate) fn build_select_item(
    detector: &mut LineageDetector<'_>,
    item: &SelectItem,
) -> LineageResult<Vec<FieldInfo>> {
    match item {
        SelectItem::UnnamedExpr(expr) => Ok(vec![build_expr_field(detector, expr, None)?]),
        SelectItem::ExprWithAlias { expr, alias } => {
            Ok(vec![build_expr_field(detector, expr, Some(alias.value.as_str()))?])
        }
        SelectItem::Wildcard(_) => expand_wildcard(detector, None),
        SelectItem::QualifiedWildcard(name, _) => {
            let qualifier = TableInfo::from_object_name(name).ok_or_else(|| {
                LineageError::MalformedAst("qualified wildcard without a table name".to_string())
            })?;
            expand_wildcard(detector, Some(qualifier))
        }
    }
}

/// Field for a single expression. Unaliased expressions other than plain
/// column references are named by their rendered SQL text.
pub(crate) fn build_expr_field(
    detector: &mut LineageDetector<'_>,
    expr: &Expr,
    alias: Option<&str>,
) -> LineageResult<FieldInfo> {
    if alias.is_none() {
        if let Some(column) = column_ref(expr) {
            return Ok(FieldInfo::column(column.column.clone(), column));
        }
    }

    let name = alias
        .map(str::to_string)
        .unwrap_or_else(|| expr.to_string());
    let process = match determine_transformation(expr) {
        Transformation::Direct => Transformation::Alias,
        other => other,
    };
    let dependencies = ExprWalker::collect(detector, expr, WalkMode::Value)?;

    if dependencies.is_empty() {
        Ok(FieldInfo::constant(name, process))
    } else {
        Ok(FieldInfo::derived(name, dependencies, process))
    }
}

/// Visit the subqueries of a predicate (WHERE, HAVING, JOIN ON). Nothing
/// found here flows into an output column.
pub(crate) fn walk_predicate(detector: &mut LineageDetector<'_>, expr: &Expr) -> LineageResult<()> {
    ExprWalker::collect(detector, expr, WalkMode::Predicate).map(|_| ())
}

fn column_ref(expr: &Expr) -> Option<ColumnRef> {
    match expr {
        Expr::Identifier(ident) => Some(ColumnRef::pending(None, ident.value.clone())),
        Expr::CompoundIdentifier(idents) => column_ref_from_idents(idents),
        Expr::Nested(inner) => column_ref(inner),
        _ => None,
    }
}

fn column_ref_from_idents(idents: &[Ident]) -> Option<ColumnRef> {
    let (column, qualifier) = idents.split_last()?;
    Some(ColumnRef::pending(
        TableInfo::from_parts(qualifier),
        column.value.clone(),
    ))
}

fn expand_wildcard(
    detector: &mut LineageDetector<'_>,
    qualifier: Option<TableInfo>,
) -> LineageResult<Vec<FieldInfo>> {
    let resolver = detector.tables();
    let scopes = detector.scopes();
    let scope = scopes
        .current()
        .and_then(|id| scopes.get(id))
        .ok_or_else(|| LineageError::MalformedAst("wildcard outside of a SELECT".to_string()))?;

    let bindings: Vec<_> = match &qualifier {
        Some(qualifier) => resolver.find_qualified(scope, qualifier).into_iter().collect(),
        None => scope.bindings.iter().collect(),
    };

    let mut fields = Vec::new();
    let mut unresolved = Vec::new();

    if bindings.is_empty() {
        let marker = match &qualifier {
            Some(qualifier) => format!("{}.*", qualifier),
            None => "*".to_string(),
        };
        unresolved.push(marker.clone());
        // An unbound qualifier names no table
        fields.push(FieldInfo {
            field_name: marker,
            kind: FieldKind::UnresolvedWildcard { table: None },
            process: Transformation::Wildcard,
        });
    }

    for binding in bindings {
        let exposed_as = binding.alias.clone().map(|alias| TableInfo::new(None, alias));
        match &binding.target {
            BindingTarget::Scope(child) => {
                let Some(child_scope) = scopes.get(*child) else {
                    continue;
                };
                for (position, field) in child_scope.output_fields.iter().enumerate() {
                    fields.push(FieldInfo {
                        field_name: field.field_name.clone(),
                        kind: FieldKind::Column(ColumnRef {
                            qualifier: exposed_as.clone(),
                            column: field.field_name.clone(),
                            position: Some(position),
                            origin: Origin::Scope(*child),
                        }),
                        process: Transformation::Wildcard,
                    });
                }
            }
            BindingTarget::Table(table) => match resolver.catalog().get_column_names(table) {
                Some(columns) => {
                    for column in columns {
                        fields.push(FieldInfo {
                            field_name: column.clone(),
                            kind: FieldKind::Column(ColumnRef {
                                qualifier: exposed_as.clone(),
                                column: column.clone(),
                                position: None,
                                origin: Origin::Table(table.clone()),
                            }),
                            process: Transformation::Wildcard,
                        });
                    }
                }
                None => {
                    let marker = match &binding.alias {
                        Some(alias) if qualifier.is_some() => format!("{}.*", alias),
                        _ => "*".to_string(),
                    };
                    unresolved.push(format!("{}.*", table));
                    fields.push(FieldInfo {
                        field_name: marker,
                        kind: FieldKind::UnresolvedWildcard {
                            table: Some(table.clone()),
                        },
                        process: Transformation::Wildcard,
                    });
                }
            },
        }
    }

    for marker in unresolved {
        warn!(wildcard = %marker, "wildcard left unexpanded, no catalog entry");
        detector.push_warning(LineageError::UnresolvedWildcard(marker));
    }
    Ok(fields)
}

/// Classify how an expression transforms its inputs
pub fn determine_transformation(expr: &Expr) -> Transformation {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => Transformation::Direct,
        Expr::Nested(inner) => determine_transformation(inner),
        Expr::Function(func) => {
            if func.over.is_some() {
                return Transformation::Window;
            }
            let name = func
                .name
                .0
                .last()
                .map(|ident| ident.value.to_lowercase())
                .unwrap_or_default();
            if AGGREGATE_FUNCTIONS.contains(&name.as_str()) {
                Transformation::Aggregation
            } else {
                Transformation::Function
            }
        }
        Expr::Case { .. } => Transformation::CaseWhen,
        Expr::Cast { .. } => Transformation::Cast,
        Expr::Subquery(_) => Transformation::Subquery,
        Expr::Value(_) => Transformation::Literal,
        _ => Transformation::Expression,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkMode {
    /// Collect the inputs of an output column
    Value,
    /// Only visit nested subqueries
    Predicate,
}

/// Build context threaded through one expression walk. Column references
/// inside nested queries belong to those queries and are skipped here; the
/// detector visits such queries as scopes of their own.
struct ExprWalker<'a, 'c> {
    detector: &'a mut LineageDetector<'c>,
    mode: WalkMode,
    query_depth: usize,
    dependencies: Vec<FieldInfo>,
}

impl<'a, 'c> ExprWalker<'a, 'c> {
    fn collect(
        detector: &'a mut LineageDetector<'c>,
        expr: &Expr,
        mode: WalkMode,
    ) -> LineageResult<Vec<FieldInfo>> {
        let mut walker = ExprWalker {
            detector,
            mode,
            query_depth: 0,
            dependencies: Vec::new(),
        };
        match expr.visit(&mut walker) {
            ControlFlow::Break(err) => Err(err),
            ControlFlow::Continue(()) => Ok(walker.dependencies),
        }
    }

    fn push_dependency(&mut self, dependency: FieldInfo) {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
    }

    fn visit_subquery(&mut self, query: &Query, kind: ScopeKind) -> ControlFlow<LineageError> {
        match self.detector.visit_query(query, kind, None) {
            Ok(scope) => {
                if kind == ScopeKind::Scalar {
                    self.push_dependency(FieldInfo {
                        field_name: format!("({})", query),
                        kind: FieldKind::ScalarSubquery(scope),
                        process: Transformation::Subquery,
                    });
                }
                ControlFlow::Continue(())
            }
            Err(err) => ControlFlow::Break(err),
        }
    }
}

impl Visitor for ExprWalker<'_, '_> {
    type Break = LineageError;

    fn pre_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.query_depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.query_depth = self.query_depth.saturating_sub(1);
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.query_depth > 0 {
            return ControlFlow::Continue(());
        }

        match expr {
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) if self.mode == WalkMode::Value => {
                if let Some(column) = column_ref(expr) {
                    self.push_dependency(FieldInfo::column(column.column.clone(), column));
                }
                ControlFlow::Continue(())
            }
            Expr::Subquery(query) => {
                let kind = match self.mode {
                    WalkMode::Value => ScopeKind::Scalar,
                    WalkMode::Predicate => ScopeKind::Predicate,
                };
                self.visit_subquery(query, kind)
            }
            Expr::Exists { subquery, .. } | Expr::InSubquery { subquery, .. } => {
                self.visit_subquery(subquery, ScopeKind::Predicate)
            }
            _ => ControlFlow::Continue(()),
        }
    }
}
