//! Data model shared by the detector and the lineage resolver
use std::collections::BTreeSet;
use std::fmt;

use serde::{Serialize, Serializer};
use sqlparser::ast::{Ident, ObjectName};

use super::error::LineageError;

/// Index of a scope in the [`ScopeStack`](super::scope::ScopeStack) arena
pub type ScopeId = usize;

/// A concrete table, optionally qualified by its database
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableInfo {
    pub database_name: Option<String>,
    pub table_name: String,
}

impl TableInfo {
    pub fn new(database_name: Option<String>, table_name: impl Into<String>) -> Self {
        Self {
            database_name,
            table_name: table_name.into(),
        }
    }

    /// Build from identifier parts: the last part is the table, the one
    /// before it the database. Catalog prefixes beyond that are dropped.
    pub fn from_parts(parts: &[Ident]) -> Option<Self> {
        let (table, rest) = parts.split_last()?;
        Some(Self {
            database_name: rest.last().map(|db| db.value.clone()),
            table_name: table.value.clone(),
        })
    }

    pub fn from_object_name(name: &ObjectName) -> Option<Self> {
        Self::from_parts(&name.0)
    }

    pub fn is_blank(&self) -> bool {
        self.table_name.is_empty()
    }
}

impl fmt::Display for TableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.database_name {
            Some(db) => write!(f, "{}.{}", db, self.table_name),
            None => write!(f, "{}", self.table_name),
        }
    }
}

impl Serialize for TableInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How an output column is derived from its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transformation {
    Direct,
    Alias,
    Aggregation,
    Function,
    Expression,
    CaseWhen,
    Cast,
    Window,
    Subquery,
    Literal,
    Wildcard,
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transformation::Direct => "direct",
            Transformation::Alias => "alias",
            Transformation::Aggregation => "aggregation",
            Transformation::Function => "function",
            Transformation::Expression => "expression",
            Transformation::CaseWhen => "case_when",
            Transformation::Cast => "cast",
            Transformation::Window => "window",
            Transformation::Subquery => "subquery",
            Transformation::Literal => "literal",
            Transformation::Wildcard => "wildcard",
        };
        f.write_str(name)
    }
}

/// Where a column reference points once FROM bindings are known
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Origin {
    /// Not resolved yet; the owning scope has not been finalized
    Pending,
    /// A base table
    Table(TableInfo),
    /// An output column of another scope
    Scope(ScopeId),
    /// More than one binding could provide the column
    Ambiguous(Vec<String>),
    /// Nothing in scope provides the column
    Unbound,
}

/// A column read straight out of a FROM binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRef {
    /// Qualifier as written (`t` in `t.a`, `db.t` in `db.t.a`)
    pub qualifier: Option<TableInfo>,
    pub column: String,
    /// Position in the providing scope's output, when known from expansion
    pub position: Option<usize>,
    pub origin: Origin,
}

impl ColumnRef {
    pub fn pending(qualifier: Option<TableInfo>, column: impl Into<String>) -> Self {
        Self {
            qualifier,
            column: column.into(),
            position: None,
            origin: Origin::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldKind {
    /// Direct reference to a column
    Column(ColumnRef),
    /// Computed from the listed inputs
    Derived(Vec<FieldInfo>),
    /// Value of a scalar subquery scope
    ScalarSubquery(ScopeId),
    /// No column inputs at all
    Constant,
    /// Wildcard whose columns could not be enumerated; `table` is the
    /// concrete table behind it when there is one
    UnresolvedWildcard { table: Option<TableInfo> },
}

/// One output column of a scope, or one input of a derived column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub field_name: String,
    pub kind: FieldKind,
    pub process: Transformation,
}

impl FieldInfo {
    pub fn column(field_name: impl Into<String>, column: ColumnRef) -> Self {
        Self {
            field_name: field_name.into(),
            kind: FieldKind::Column(column),
            process: Transformation::Direct,
        }
    }

    pub fn derived(
        field_name: impl Into<String>,
        dependencies: Vec<FieldInfo>,
        process: Transformation,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            kind: FieldKind::Derived(dependencies),
            process,
        }
    }

    pub fn constant(field_name: impl Into<String>, process: Transformation) -> Self {
        Self {
            field_name: field_name.into(),
            kind: FieldKind::Constant,
            process,
        }
    }

    /// `*` and `t.*` placeholders that stand for columns nobody listed
    pub fn is_star(&self) -> bool {
        match &self.kind {
            FieldKind::UnresolvedWildcard { .. } => true,
            FieldKind::Column(column) => is_star_name(&column.column),
            _ => false,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.kind, FieldKind::Column(_))
    }

    /// The base table this field reads from, for direct fields resolved to one
    pub fn owning_table(&self) -> Option<&TableInfo> {
        match &self.kind {
            FieldKind::Column(ColumnRef {
                origin: Origin::Table(table),
                ..
            }) => Some(table),
            _ => None,
        }
    }

    pub fn dependencies(&self) -> &[FieldInfo] {
        match &self.kind {
            FieldKind::Derived(deps) => deps,
            _ => &[],
        }
    }
}

pub(crate) fn is_star_name(name: &str) -> bool {
    name == "*" || name.ends_with(".*")
}

/// What a FROM/JOIN alias is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BindingTarget {
    Table(TableInfo),
    Scope(ScopeId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableBinding {
    /// `None` only for a derived table written without an alias
    pub alias: Option<String>,
    pub target: BindingTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// The statement's own query body
    Query,
    /// Subquery in FROM/JOIN
    Derived,
    /// WITH clause body
    Cte,
    /// Scalar subquery whose value flows into a select item
    Scalar,
    /// Subquery in WHERE/HAVING/ON, traversed but never part of an output
    Predicate,
    /// Branch of UNION/INTERSECT/EXCEPT
    SetOperand,
    /// VALUES rows
    Values,
}

/// A `JOIN ... USING` column, shared by the first `bindings` FROM entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsingColumn {
    pub column: String,
    pub bindings: usize,
}

/// Analysis context for one SELECT (sub)statement
#[derive(Debug, Clone, Serialize)]
pub struct ScopeRecord {
    pub id: ScopeId,
    pub parent_id: Option<ScopeId>,
    pub kind: ScopeKind,
    pub output_fields: Vec<FieldInfo>,
    pub bindings: Vec<TableBinding>,
    /// Set only when FROM holds exactly one concrete table
    pub from_table: Option<TableInfo>,
    /// Alias this scope is exposed under in its parent's FROM
    pub table_alias: Option<String>,
    /// Columns merged by `JOIN ... USING`
    pub using_columns: Vec<UsingColumn>,
}

impl ScopeRecord {
    pub fn new(
        id: ScopeId,
        parent_id: Option<ScopeId>,
        kind: ScopeKind,
        table_alias: Option<String>,
    ) -> Self {
        Self {
            id,
            parent_id,
            kind,
            output_fields: Vec::new(),
            bindings: Vec::new(),
            from_table: None,
            table_alias,
            using_columns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetColumn {
    pub table: Option<TableInfo>,
    pub field: String,
}

impl fmt::Display for TargetColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.field),
            None => write!(f, "{}", self.field),
        }
    }
}

/// Why a source is not a plain base-table column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Column,
    Literal,
    Unresolved,
    Ambiguous,
    UnresolvedWildcard,
}

impl SourceKind {
    fn is_column(&self) -> bool {
        *self == SourceKind::Column
    }
}

/// A leaf of the lineage walk
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceColumn {
    pub table: Option<TableInfo>,
    pub field: String,
    #[serde(skip_serializing_if = "SourceKind::is_column")]
    pub kind: SourceKind,
}

impl SourceColumn {
    pub fn column(table: TableInfo, field: impl Into<String>) -> Self {
        Self {
            table: Some(table),
            field: field.into(),
            kind: SourceKind::Column,
        }
    }

    pub fn other(table: Option<TableInfo>, field: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            table,
            field: field.into(),
            kind,
        }
    }
}

impl fmt::Display for SourceColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.field)?,
            None => write!(f, "{}", self.field)?,
        }
        if !self.kind.is_column() {
            write!(f, " ({:?})", self.kind)?;
        }
        Ok(())
    }
}

/// Lineage of one target column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldLineageInfo {
    pub target: TargetColumn,
    pub sources: BTreeSet<SourceColumn>,
    #[serde(skip)]
    pub transformation: Transformation,
}

impl FieldLineageInfo {
    /// Only the plain base-table sources
    pub fn column_sources(&self) -> impl Iterator<Item = &SourceColumn> {
        self.sources.iter().filter(|s| s.kind.is_column())
    }
}

/// Everything computed for one statement of a batch
#[derive(Debug, Clone, Serialize)]
pub struct StatementLineage {
    pub statement_index: usize,
    pub target_table: Option<TableInfo>,
    pub lineage: Vec<FieldLineageInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<LineageError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LineageError>,
}

impl StatementLineage {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Find the lineage entry for a target column by name
    pub fn target(&self, field: &str) -> Option<&FieldLineageInfo> {
        self.lineage.iter().find(|l| l.target.field == field)
    }
}
