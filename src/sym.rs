//! Symbol tables: a per-bundle stack of parse scopes, archived by name so a
//! class's or method's locals can be retrieved during analysis and emission.

use std::collections::HashMap;

use crate::ast::ExprId;
use crate::span::Span;
use crate::types::Type;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntryId(pub u32);

/// A named, typed slot. Entries carry back-links to every variable
/// expression referencing them so an inferred (`Var`) type can be tightened
/// retroactively at its first assignment.
#[derive(Clone, Debug)]
pub struct SymbolEntry {
    /// Scope-qualified name, e.g. `Ship:Refuel:amount`.
    pub name: String,
    pub ty: Type,
    pub is_static: bool,
    pub is_local: bool,
    pub is_self: bool,
    /// Memory slot, assigned during emission.
    pub id: i32,
    pub variables: Vec<ExprId>,
    pub span: Span,
}

impl SymbolEntry {
    pub fn new(name: String, ty: Type, is_static: bool, is_local: bool, span: Span) -> Self {
        Self {
            name,
            ty,
            is_static,
            is_local,
            is_self: false,
            id: -1,
            variables: Vec::new(),
            span,
        }
    }

    pub fn simple_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }
}

/// One scope-structured table (a class's fields or a method's locals).
#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, EntryId>>,
    /// Every entry ever added, in declaration order; the emitter walks this
    /// to lay out memory slots.
    entries: Vec<EntryId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
            entries: Vec::new(),
        }
    }

    pub fn new_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn previous_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Adds an entry under its simple name. Rejects duplicates in the
    /// current scope.
    pub fn add_entry(&mut self, simple_name: &str, id: EntryId) -> bool {
        let scope = self.scopes.last_mut().expect("table has at least one scope");
        if scope.contains_key(simple_name) {
            return false;
        }
        scope.insert(simple_name.to_string(), id);
        self.entries.push(id);
        true
    }

    /// Lookup walking from the innermost scope outward.
    pub fn get_entry(&self, simple_name: &str) -> Option<EntryId> {
        for scope in self.scopes.iter().rev() {
            if let Some(&id) = scope.get(simple_name) {
                return Some(id);
            }
        }
        None
    }

    pub fn entries(&self) -> &[EntryId] {
        &self.entries
    }
}

/// Per-bundle scope stack. `new_parse_scope` pushes, and
/// `previous_parse_scope(name)` pops and archives the popped table under
/// `name` for later retrieval.
#[derive(Debug, Default)]
pub struct SymbolTableManager {
    parse_stack: Vec<SymbolTable>,
    tables: Vec<SymbolTable>,
    archived: HashMap<String, usize>,
}

impl SymbolTableManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_parse_scope(&mut self) {
        self.parse_stack.push(SymbolTable::new());
    }

    /// Adds an entry to the innermost open parse scope. Returns false on a
    /// duplicate or when no scope is open.
    pub fn add_entry(&mut self, simple_name: &str, id: EntryId) -> bool {
        match self.parse_stack.last_mut() {
            Some(table) => table.add_entry(simple_name, id),
            None => false,
        }
    }

    /// Looks up a name in the innermost open parse scope only.
    pub fn current_scope_entry(&self, simple_name: &str) -> Option<EntryId> {
        self.parse_stack.last().and_then(|table| table.get_entry(simple_name))
    }

    pub fn previous_parse_scope(&mut self, archive_name: &str) {
        if let Some(table) = self.parse_stack.pop() {
            let index = self.tables.len();
            self.tables.push(table);
            self.archived.insert(archive_name.to_string(), index);
        }
    }

    pub fn table_index(&self, name: &str) -> Option<usize> {
        self.archived.get(name).copied()
    }

    pub fn table(&self, index: usize) -> &SymbolTable {
        &self.tables[index]
    }

    pub fn table_mut(&mut self, index: usize) -> &mut SymbolTable {
        &mut self.tables[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeKind;

    fn entry(name: &str) -> SymbolEntry {
        SymbolEntry::new(
            name.to_string(),
            Type::basic(TypeKind::Int),
            false,
            true,
            Span::dummy(),
        )
    }

    #[test]
    fn test_duplicate_rejected_in_same_scope() {
        let mut table = SymbolTable::new();
        assert!(table.add_entry("x", EntryId(0)));
        assert!(!table.add_entry("x", EntryId(1)));
    }

    #[test]
    fn test_shadowing_across_scopes() {
        let mut table = SymbolTable::new();
        assert!(table.add_entry("x", EntryId(0)));
        table.new_scope();
        assert!(table.add_entry("x", EntryId(1)));
        assert_eq!(table.get_entry("x"), Some(EntryId(1)));
        table.previous_scope();
        assert_eq!(table.get_entry("x"), Some(EntryId(0)));
    }

    #[test]
    fn test_entries_keep_declaration_order() {
        let mut table = SymbolTable::new();
        table.add_entry("a", EntryId(3));
        table.new_scope();
        table.add_entry("b", EntryId(7));
        table.previous_scope();
        assert_eq!(table.entries(), &[EntryId(3), EntryId(7)]);
    }

    #[test]
    fn test_archive_and_retrieve() {
        let mut manager = SymbolTableManager::new();
        manager.new_parse_scope();
        assert!(manager.add_entry("field", EntryId(0)));
        manager.new_parse_scope();
        assert!(manager.add_entry("local", EntryId(1)));
        manager.previous_parse_scope("Ship:Sail");
        manager.previous_parse_scope("Ship");

        let method_table = manager.table_index("Ship:Sail").expect("archived");
        assert_eq!(manager.table(method_table).get_entry("local"), Some(EntryId(1)));
        assert_eq!(manager.table(method_table).get_entry("field"), None);

        let class_table = manager.table_index("Ship").expect("archived");
        assert_eq!(manager.table(class_table).get_entry("field"), Some(EntryId(0)));
    }

    #[test]
    fn test_entry_simple_name() {
        let e = entry("Ship:Sail:speed");
        assert_eq!(e.simple_name(), "speed");
    }
}
