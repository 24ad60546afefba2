//! Depth-first walk over one statement that builds the scope arena
//!
//! The detector drives the three traversal-time components together:
//! the [`ScopeStack`] opens a scope for every SELECT, the table resolver
//! records FROM/JOIN bindings, and the field builder turns select items
//! into [`FieldInfo`](super::model::FieldInfo) values. After `detect`
//! returns, the arena is complete and read-only; the lineage resolver
//! takes over from there.
use std::collections::HashMap;

use sqlparser::ast::{
    Insert, JoinConstraint, JoinOperator, Query, Select, SetExpr, Statement, TableFactor,
    TableObject, TableWithJoins, Values,
};
use tracing::{debug, warn};

use super::bindings::TableResolver;
use super::error::{LineageError, LineageResult};
use super::fields;
use super::model::{
    BindingTarget, ColumnRef, FieldInfo, Origin, ScopeId, ScopeKind, ScopeRecord, TableBinding,
    TableInfo, Transformation, UsingColumn,
};
use super::scope::{ScopeStack, DEFAULT_MAX_DEPTH};
use super::tables::Catalog;

/// Knobs for a single analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// Limit on SELECT nesting and on resolver recursion
    pub max_depth: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Destination of a statement's rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub table: Option<TableInfo>,
    /// Explicit column list, matched positionally to the root output
    pub columns: Vec<String>,
}

/// Stateful walker for exactly one statement. Use a new detector, or call
/// [`reset`](Self::reset), for every statement.
pub struct LineageDetector<'c> {
    scopes: ScopeStack,
    tables: TableResolver<'c>,
    cte_frames: Vec<HashMap<String, ScopeId>>,
    target: Option<TargetDescriptor>,
    root: Option<ScopeId>,
    warnings: Vec<LineageError>,
    in_use: bool,
}

impl<'c> LineageDetector<'c> {
    pub fn new(catalog: &'c Catalog, options: AnalysisOptions) -> Self {
        Self {
            scopes: ScopeStack::new(options.max_depth),
            tables: TableResolver::new(catalog),
            cte_frames: Vec::new(),
            target: None,
            root: None,
            warnings: Vec::new(),
            in_use: false,
        }
    }

    /// Walk `statement` and populate the scope arena
    pub fn detect(&mut self, statement: &Statement) -> LineageResult<()> {
        if self.in_use {
            return Err(LineageError::DetectorReused);
        }
        self.in_use = true;

        match statement {
            Statement::Query(query) => {
                self.root = Some(self.visit_query(query, ScopeKind::Query, None)?);
            }
            Statement::Insert(insert) => self.visit_insert(insert)?,
            Statement::CreateTable(create) => {
                let query = create.query.as_ref().ok_or_else(|| {
                    LineageError::UnsupportedStatement("CREATE TABLE without AS SELECT".to_string())
                })?;
                self.target = Some(TargetDescriptor {
                    table: TableInfo::from_object_name(&create.name),
                    columns: create.columns.iter().map(|c| c.name.value.clone()).collect(),
                });
                self.root = Some(self.visit_query(query, ScopeKind::Query, None)?);
            }
            Statement::CreateView {
                name,
                columns,
                query,
                ..
            } => {
                self.target = Some(TargetDescriptor {
                    table: TableInfo::from_object_name(name),
                    columns: columns.iter().map(|c| c.name.value.clone()).collect(),
                });
                self.root = Some(self.visit_query(query, ScopeKind::Query, None)?);
            }
            other => {
                let keyword = other
                    .to_string()
                    .split_whitespace()
                    .take(2)
                    .collect::<Vec<_>>()
                    .join(" ");
                return Err(LineageError::UnsupportedStatement(keyword));
            }
        }

        if self.scopes.depth() != 0 {
            return Err(LineageError::MalformedAst(
                "scopes left open after traversal".to_string(),
            ));
        }
        Ok(())
    }

    /// Forget everything so the detector can take another statement
    pub fn reset(&mut self) {
        self.scopes.reset();
        self.cte_frames.clear();
        self.target = None;
        self.root = None;
        self.warnings.clear();
        self.in_use = false;
    }

    pub fn scopes(&self) -> &ScopeStack {
        &self.scopes
    }

    pub fn tables(&self) -> TableResolver<'c> {
        self.tables
    }

    /// Scope of the statement's top-level query body
    pub fn root_scope(&self) -> Option<ScopeId> {
        self.root
    }

    pub fn target(&self) -> Option<&TargetDescriptor> {
        self.target.as_ref()
    }

    pub fn warnings(&self) -> &[LineageError] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<LineageError> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn push_warning(&mut self, warning: LineageError) {
        self.warnings.push(warning);
    }

    fn visit_insert(&mut self, insert: &Insert) -> LineageResult<()> {
        let table = match &insert.table {
            TableObject::TableName(name) => TableInfo::from_object_name(name)
                .filter(|table| !table.is_blank())
                .ok_or_else(|| {
                    LineageError::MalformedAst("INSERT without a table identifier".to_string())
                })?,
            TableObject::TableFunction(_) => {
                return Err(LineageError::MalformedAst(
                    "INSERT into a table function has no table identifier".to_string(),
                ));
            }
        };
        debug!(table = %table, columns = insert.columns.len(), "insert target");

        self.target = Some(TargetDescriptor {
            table: Some(table),
            columns: insert.columns.iter().map(|c| c.value.clone()).collect(),
        });

        let source = insert.source.as_ref().ok_or_else(|| {
            LineageError::MalformedAst("INSERT without a source query".to_string())
        })?;
        self.root = Some(self.visit_query(source, ScopeKind::Query, None)?);
        Ok(())
    }

    /// Visit a query (with its WITH clause) as one scope of kind `kind`
    pub(crate) fn visit_query(
        &mut self,
        query: &Query,
        kind: ScopeKind,
        alias: Option<String>,
    ) -> LineageResult<ScopeId> {
        self.cte_frames.push(HashMap::new());
        let result = self.visit_query_body(query, kind, alias);
        self.cte_frames.pop();
        result
    }

    fn visit_query_body(
        &mut self,
        query: &Query,
        kind: ScopeKind,
        alias: Option<String>,
    ) -> LineageResult<ScopeId> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let name = cte.alias.name.value.clone();
                let id = self.visit_query(&cte.query, ScopeKind::Cte, Some(name.clone()))?;
                if let Some(frame) = self.cte_frames.last_mut() {
                    frame.insert(name, id);
                }
            }
        }
        self.visit_set_expr(&query.body, kind, alias)
    }

    fn visit_set_expr(
        &mut self,
        body: &SetExpr,
        kind: ScopeKind,
        alias: Option<String>,
    ) -> LineageResult<ScopeId> {
        match body {
            SetExpr::Select(select) => self.visit_select(select, kind, alias),
            SetExpr::Query(query) => self.visit_query(query, kind, alias),
            SetExpr::SetOperation { left, right, .. } => {
                self.visit_set_operation(left, right, kind, alias)
            }
            SetExpr::Values(values) => self.visit_values(values, kind, alias),
            other => Err(LineageError::MalformedAst(format!(
                "unsupported query body: {}",
                other
            ))),
        }
    }

    fn visit_select(
        &mut self,
        select: &Select,
        kind: ScopeKind,
        alias: Option<String>,
    ) -> LineageResult<ScopeId> {
        let id = self.scopes.enter_scope(kind, alias)?;

        for table_with_joins in &select.from {
            self.visit_table_with_joins(table_with_joins)?;
        }

        let mut output_fields = Vec::with_capacity(select.projection.len());
        for item in &select.projection {
            output_fields.extend(fields::build_select_item(self, item)?);
        }
        self.scope_mut(id)?.output_fields = output_fields;

        if let Some(selection) = &select.selection {
            fields::walk_predicate(self, selection)?;
        }
        if let Some(having) = &select.having {
            fields::walk_predicate(self, having)?;
        }

        let warnings = self.tables.finalize_scope(&mut self.scopes, id);
        self.warnings.extend(warnings);
        self.scopes.exit_scope()?;
        Ok(id)
    }

    /// UNION / INTERSECT / EXCEPT: output column `i` draws from column `i`
    /// of every operand, named after the left operand.
    fn visit_set_operation(
        &mut self,
        left: &SetExpr,
        right: &SetExpr,
        kind: ScopeKind,
        alias: Option<String>,
    ) -> LineageResult<ScopeId> {
        let id = self.scopes.enter_scope(kind, alias)?;
        let operands = [
            self.visit_set_expr(left, ScopeKind::SetOperand, None)?,
            self.visit_set_expr(right, ScopeKind::SetOperand, None)?,
        ];

        let mut output_fields = Vec::new();
        if let Some(first) = self.scopes.get(operands[0]) {
            for (position, field) in first.output_fields.iter().enumerate() {
                let dependencies = operands
                    .iter()
                    .filter_map(|operand| {
                        let operand_field = self.scopes.get(*operand)?.output_fields.get(position)?;
                        Some(FieldInfo::column(
                            operand_field.field_name.clone(),
                            ColumnRef {
                                qualifier: None,
                                column: operand_field.field_name.clone(),
                                position: Some(position),
                                origin: Origin::Scope(*operand),
                            },
                        ))
                    })
                    .collect();
                output_fields.push(FieldInfo::derived(
                    field.field_name.clone(),
                    dependencies,
                    Transformation::Direct,
                ));
            }
        }

        let scope = self.scope_mut(id)?;
        scope.output_fields = output_fields;
        for operand in operands {
            scope.bindings.push(TableBinding {
                alias: None,
                target: BindingTarget::Scope(operand),
            });
        }
        self.scopes.exit_scope()?;
        Ok(id)
    }

    /// VALUES rows expose `column1..columnN`, built from the first row
    fn visit_values(
        &mut self,
        values: &Values,
        kind: ScopeKind,
        alias: Option<String>,
    ) -> LineageResult<ScopeId> {
        let kind = if kind == ScopeKind::Query {
            ScopeKind::Values
        } else {
            kind
        };
        let id = self.scopes.enter_scope(kind, alias)?;

        let mut output_fields = Vec::new();
        if let Some(row) = values.rows.first() {
            for (index, expr) in row.iter().enumerate() {
                let name = format!("column{}", index + 1);
                output_fields.push(fields::build_expr_field(self, expr, Some(name.as_str()))?);
            }
        }
        self.scope_mut(id)?.output_fields = output_fields;

        let warnings = self.tables.finalize_scope(&mut self.scopes, id);
        self.warnings.extend(warnings);
        self.scopes.exit_scope()?;
        Ok(id)
    }

    fn visit_table_with_joins(&mut self, table_with_joins: &TableWithJoins) -> LineageResult<()> {
        self.visit_table_factor(&table_with_joins.relation)?;
        for join in &table_with_joins.joins {
            self.visit_table_factor(&join.relation)?;
            match join_constraint(&join.join_operator) {
                Some(JoinConstraint::On(condition)) => fields::walk_predicate(self, condition)?,
                Some(JoinConstraint::Using(columns)) => {
                    let scope = self.scopes.current_mut()?;
                    let bindings = scope.bindings.len();
                    for column in columns.iter().filter_map(|name| name.0.last()) {
                        scope.using_columns.retain(|using| using.column != column.value);
                        scope.using_columns.push(UsingColumn {
                            column: column.value.clone(),
                            bindings,
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn visit_table_factor(&mut self, factor: &TableFactor) -> LineageResult<()> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let table = TableInfo::from_object_name(name).ok_or_else(|| {
                    LineageError::MalformedAst("table reference without a name".to_string())
                })?;
                let alias = alias
                    .as_ref()
                    .map(|alias| alias.name.value.clone())
                    .unwrap_or_else(|| table.table_name.clone());
                let target = match self.lookup_cte(&table) {
                    Some(cte) => BindingTarget::Scope(cte),
                    None => BindingTarget::Table(table),
                };
                self.tables.bind(&mut self.scopes, Some(alias), target)
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let alias = alias.as_ref().map(|alias| alias.name.value.clone());
                let child = self.visit_query(subquery, ScopeKind::Derived, alias.clone())?;
                self.tables
                    .bind(&mut self.scopes, alias, BindingTarget::Scope(child))
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.visit_table_with_joins(table_with_joins),
            other => {
                warn!(relation = %other, "relation kind carries no column lineage, skipped");
                Ok(())
            }
        }
    }

    fn lookup_cte(&self, table: &TableInfo) -> Option<ScopeId> {
        if table.database_name.is_some() {
            return None;
        }
        self.cte_frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(&table.table_name).copied())
    }

    fn scope_mut(&mut self, id: ScopeId) -> LineageResult<&mut ScopeRecord> {
        self.scopes
            .get_mut(id)
            .ok_or_else(|| LineageError::MalformedAst(format!("unknown scope {}", id)))
    }
}

fn join_constraint(operator: &JoinOperator) -> Option<&JoinConstraint> {
    match operator {
        JoinOperator::Inner(constraint)
        | JoinOperator::LeftOuter(constraint)
        | JoinOperator::RightOuter(constraint)
        | JoinOperator::FullOuter(constraint) => Some(constraint),
        _ => None,
    }
}
