//! FROM/JOIN alias bindings and column origin resolution
use tracing::{debug, warn};

use super::error::{LineageError, LineageResult};
use super::model::{
    BindingTarget, ColumnRef, FieldInfo, FieldKind, Origin, ScopeId, ScopeKind, ScopeRecord,
    TableBinding, TableInfo,
};
use super::scope::ScopeStack;
use super::tables::Catalog;

/// Whether a binding can supply a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provides {
    Yes,
    No,
    /// No metadata either way
    Unknown,
}

/// Tracks what each FROM alias stands for and decides where a column
/// reference comes from once a scope's FROM clause is complete.
#[derive(Debug, Clone, Copy)]
pub struct TableResolver<'c> {
    catalog: &'c Catalog,
}

impl<'c> TableResolver<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &'c Catalog {
        self.catalog
    }

    /// Add a binding to the scope currently being visited
    pub fn bind(
        &self,
        scopes: &mut ScopeStack,
        alias: Option<String>,
        target: BindingTarget,
    ) -> LineageResult<()> {
        let scope = scopes.current_mut()?;
        debug!(scope = scope.id, alias = ?alias, target = ?target, "bind table");
        scope.bindings.push(TableBinding { alias, target });
        Ok(())
    }

    /// Binding named by a qualifier: `t` matches an alias, `db.t` matches a
    /// concrete table with the same identity.
    pub fn find_qualified<'s>(
        &self,
        scope: &'s ScopeRecord,
        qualifier: &TableInfo,
    ) -> Option<&'s TableBinding> {
        scope.bindings.iter().find(|binding| {
            match (&qualifier.database_name, &binding.target) {
                (None, _) => binding.alias.as_deref() == Some(qualifier.table_name.as_str()),
                (Some(_), BindingTarget::Table(table)) => table == qualifier,
                (Some(_), BindingTarget::Scope(_)) => false,
            }
        })
    }

    /// Resolve every pending column of `id`'s output and fix `from_table`.
    /// Returns the warnings raised along the way.
    pub fn finalize_scope(&self, scopes: &mut ScopeStack, id: ScopeId) -> Vec<LineageError> {
        let mut warnings = Vec::new();
        let Some(scope) = scopes.get_mut(id) else {
            return warnings;
        };
        let mut fields = std::mem::take(&mut scope.output_fields);

        for field in &mut fields {
            self.resolve_field(scopes, id, field, &mut warnings);
        }

        if let Some(scope) = scopes.get_mut(id) {
            scope.output_fields = fields;
            scope.from_table = match scope.bindings.as_slice() {
                [TableBinding {
                    target: BindingTarget::Table(table),
                    ..
                }] => Some(table.clone()),
                _ => None,
            };
        }
        warnings
    }

    fn resolve_field(
        &self,
        scopes: &ScopeStack,
        id: ScopeId,
        field: &mut FieldInfo,
        warnings: &mut Vec<LineageError>,
    ) {
        if let Some(sides) = self.using_sides(scopes, id, field) {
            field.kind = FieldKind::Derived(sides);
            return;
        }
        match &mut field.kind {
            FieldKind::Column(column) if column.origin == Origin::Pending => {
                column.origin = self.resolve(scopes, id, column);
                if let Origin::Ambiguous(candidates) = &column.origin {
                    warn!(column = %column.column, ?candidates, "ambiguous column reference");
                    warnings.push(LineageError::AmbiguousReference {
                        column: column.column.clone(),
                        candidates: candidates.clone(),
                    });
                }
            }
            FieldKind::Derived(dependencies) => {
                for dependency in dependencies {
                    self.resolve_field(scopes, id, dependency, warnings);
                }
            }
            _ => {}
        }
    }

    /// An unqualified `JOIN ... USING` column comes from every joined side
    /// that may hold it.
    fn using_sides(
        &self,
        scopes: &ScopeStack,
        id: ScopeId,
        field: &FieldInfo,
    ) -> Option<Vec<FieldInfo>> {
        let FieldKind::Column(column) = &field.kind else {
            return None;
        };
        if column.origin != Origin::Pending || column.qualifier.is_some() {
            return None;
        }
        let scope = scopes.get(id)?;
        let using = scope
            .using_columns
            .iter()
            .find(|using| using.column == column.column)?;

        let sides: Vec<FieldInfo> = scope
            .bindings
            .iter()
            .take(using.bindings)
            .filter(|binding| self.provides(scopes, binding, &column.column) != Provides::No)
            .map(|binding| {
                FieldInfo::column(
                    column.column.clone(),
                    ColumnRef {
                        origin: origin_of(&binding.target),
                        ..column.clone()
                    },
                )
            })
            .collect();
        debug!(scope = id, column = %column.column, sides = sides.len(), "USING column");
        (sides.len() > 1).then_some(sides)
    }

    /// Where `column`, referenced from scope `id`, comes from. Subqueries in
    /// expressions may reach bindings of the scopes enclosing them.
    pub fn resolve(&self, scopes: &ScopeStack, id: ScopeId, column: &ColumnRef) -> Origin {
        let mut current = scopes.get(id);
        while let Some(scope) = current {
            if let Some(origin) = self.resolve_in(scopes, scope, column) {
                return origin;
            }
            if !sees_enclosing_scope(scope.kind) {
                break;
            }
            current = scope.parent_id.and_then(|parent| scopes.get(parent));
        }
        Origin::Unbound
    }

    fn resolve_in(
        &self,
        scopes: &ScopeStack,
        scope: &ScopeRecord,
        column: &ColumnRef,
    ) -> Option<Origin> {
        if let Some(qualifier) = &column.qualifier {
            return self
                .find_qualified(scope, qualifier)
                .map(|binding| origin_of(&binding.target));
        }

        let plausible: Vec<&TableBinding> = scope
            .bindings
            .iter()
            .filter(|binding| self.provides(scopes, binding, &column.column) != Provides::No)
            .collect();

        match plausible.as_slice() {
            [] => None,
            [binding] => Some(origin_of(&binding.target)),
            many => Some(Origin::Ambiguous(
                many.iter().map(|binding| binding_label(binding)).collect(),
            )),
        }
    }

    fn provides(&self, scopes: &ScopeStack, binding: &TableBinding, column: &str) -> Provides {
        match &binding.target {
            BindingTarget::Table(table) => match self.catalog.has_column(table, column) {
                Some(true) => Provides::Yes,
                Some(false) => Provides::No,
                None => Provides::Unknown,
            },
            BindingTarget::Scope(child) => {
                let Some(child) = scopes.get(*child) else {
                    return Provides::Unknown;
                };
                if child.output_fields.iter().any(|f| f.field_name == column) {
                    Provides::Yes
                } else if child.output_fields.iter().any(FieldInfo::is_star) {
                    Provides::Unknown
                } else {
                    Provides::No
                }
            }
        }
    }
}

/// Correlated subqueries may read columns of the query around them;
/// FROM-clause subqueries and CTE bodies may not.
fn sees_enclosing_scope(kind: ScopeKind) -> bool {
    matches!(
        kind,
        ScopeKind::Scalar | ScopeKind::Predicate | ScopeKind::SetOperand
    )
}

fn origin_of(target: &BindingTarget) -> Origin {
    match target {
        BindingTarget::Table(table) => Origin::Table(table.clone()),
        BindingTarget::Scope(id) => Origin::Scope(*id),
    }
}

fn binding_label(binding: &TableBinding) -> String {
    match (&binding.alias, &binding.target) {
        (Some(alias), _) => alias.clone(),
        (None, BindingTarget::Table(table)) => table.to_string(),
        (None, BindingTarget::Scope(id)) => format!("subquery #{}", id),
    }
}
