//! Scope arena and the stack of scopes currently being visited
use tracing::debug;

use super::error::{LineageError, LineageResult};
use super::model::{ScopeId, ScopeKind, ScopeRecord};

/// Default limit on SELECT nesting and on resolver recursion
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Owns every [`ScopeRecord`] created while walking one statement.
///
/// Ids are arena indexes handed out in visiting order, so a child always has
/// a larger id than its parent and the parent links form a forest. Records
/// are never removed; the lineage resolver reads them after traversal.
#[derive(Debug)]
pub struct ScopeStack {
    arena: Vec<ScopeRecord>,
    stack: Vec<ScopeId>,
    max_depth: usize,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ScopeStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            arena: Vec::new(),
            stack: Vec::new(),
            max_depth,
        }
    }

    /// Open a scope nested in the current one and make it current
    pub fn enter_scope(
        &mut self,
        kind: ScopeKind,
        table_alias: Option<String>,
    ) -> LineageResult<ScopeId> {
        if self.stack.len() >= self.max_depth {
            return Err(LineageError::DepthExceeded(self.max_depth));
        }

        let id = self.arena.len();
        let parent_id = self.current();
        debug!(scope = id, parent = ?parent_id, ?kind, alias = ?table_alias, "enter scope");

        self.arena
            .push(ScopeRecord::new(id, parent_id, kind, table_alias));
        self.stack.push(id);
        Ok(id)
    }

    /// Close the current scope and restore its parent as current
    pub fn exit_scope(&mut self) -> LineageResult<ScopeId> {
        let id = self.stack.pop().ok_or(LineageError::ScopeUnderflow)?;
        debug!(scope = id, "exit scope");
        Ok(id)
    }

    pub fn current(&self) -> Option<ScopeId> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn get(&self, id: ScopeId) -> Option<&ScopeRecord> {
        self.arena.get(id)
    }

    pub fn get_mut(&mut self, id: ScopeId) -> Option<&mut ScopeRecord> {
        self.arena.get_mut(id)
    }

    /// The current scope, or `MalformedAst` when nothing is open
    pub fn current_mut(&mut self) -> LineageResult<&mut ScopeRecord> {
        let id = self
            .current()
            .ok_or_else(|| LineageError::MalformedAst("no SELECT in progress".to_string()))?;
        Ok(&mut self.arena[id])
    }

    /// Parent chain of `id`, nearest first, `id` itself excluded
    pub fn ancestors(&self, id: ScopeId) -> Ancestors<'_> {
        Ancestors {
            scopes: self,
            next: self.get(id).and_then(|scope| scope.parent_id),
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScopeRecord> {
        self.arena.iter()
    }

    pub fn reset(&mut self) {
        self.arena.clear();
        self.stack.clear();
    }
}

pub struct Ancestors<'a> {
    scopes: &'a ScopeStack,
    next: Option<ScopeId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a ScopeRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let scope = self.scopes.get(self.next?)?;
        self.next = scope.parent_id;
        Some(scope)
    }
}
