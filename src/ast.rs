//! The parse tree: bundles, classes, enums, methods, statements, expressions.
//!
//! Expressions, statements, classes, methods, enums, and symbol entries live
//! in arenas owned by [`Program`] and are addressed by stable ids. The
//! analyzer decorates nodes in place through those ids (resolved references,
//! evaluation types, cast annotations, selected overloads); the emitter then
//! reads the decorated tree.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::linker::{LibClassId, LibMethodId};
use crate::span::Span;
use crate::sym::{EntryId, SymbolTableManager};
use crate::types::{Type, TypeKind};

/// Name of the implicit self reference in every class scope.
pub const SELF_ID: &str = "@self";
/// Name of the implicit parent reference in every class scope.
pub const PARENT_ID: &str = "@parent";
/// Root of the class hierarchy; the default parent.
pub const SYSTEM_BASE_NAME: &str = "System.Base";
/// The distinguished class used to box character strings.
pub const STRING_CLASS_NAME: &str = "System.String";
/// Wrapper classes for method calls on basic-typed receivers.
pub const BOOL_CLASS_NAME: &str = "$Bool";
pub const BYTE_CLASS_NAME: &str = "$Byte";
pub const CHAR_CLASS_NAME: &str = "$Char";
pub const INT_CLASS_NAME: &str = "$Int";
pub const FLOAT_CLASS_NAME: &str = "$Float";
/// Mutex class required by critical sections.
pub const THREAD_MUTEX_CLASS_NAME: &str = "System.Concurrency.ThreadMutex";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StmtId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EnumId(pub u32);

bitflags! {
    /// Interface is structurally virtual; the two bits travel together.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ClassFlags: u8 {
        const VIRTUAL = 0b01;
        const INTERFACE = 0b10;
    }
}

/// A named namespace holding classes and enums.
#[derive(Debug)]
pub struct Bundle {
    pub name: String,
    pub classes: Vec<ClassId>,
    pub enums: Vec<EnumId>,
    pub symbols: SymbolTableManager,
}

impl Bundle {
    pub fn new(name: String) -> Self {
        Self {
            name,
            classes: Vec::new(),
            enums: Vec::new(),
            symbols: SymbolTableManager::new(),
        }
    }
}

/// A resolved parent or interface: exactly one of a program class or a
/// library class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParentRef {
    Program(ClassId),
    Library(LibClassId),
}

#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub bundle: usize,
    pub parent_name: String,
    pub parent: Option<ClassId>,
    pub lib_parent: Option<LibClassId>,
    pub interface_names: Vec<String>,
    pub interfaces: Vec<ClassId>,
    pub lib_interfaces: Vec<LibClassId>,
    pub children: Vec<ClassId>,
    pub flags: ClassFlags,
    pub called: bool,
    pub id: i32,
    pub span: Span,
    pub file_name: String,
    /// Field declarations, in declaration order.
    pub statements: Vec<StmtId>,
    pub methods: Vec<MethodId>,
    /// Encoded name -> method, rebuilt after signature re-encoding.
    pub method_map: HashMap<String, MethodId>,
    /// Simple (unqualified) name -> overload set.
    pub unqualified_methods: HashMap<String, Vec<MethodId>>,
    /// The call site that instantiated this anonymous class, if any.
    pub anonymous_call: Option<ExprId>,
}

impl Class {
    pub fn new(name: String, bundle: usize, parent_name: String, interface_names: Vec<String>, is_interface: bool, file_name: String, span: Span) -> Self {
        let flags = if is_interface {
            ClassFlags::INTERFACE | ClassFlags::VIRTUAL
        } else {
            ClassFlags::empty()
        };
        Self {
            name,
            bundle,
            parent_name,
            parent: None,
            lib_parent: None,
            interface_names,
            interfaces: Vec::new(),
            lib_interfaces: Vec::new(),
            children: Vec::new(),
            flags,
            called: false,
            id: -1,
            span,
            file_name,
            statements: Vec::new(),
            methods: Vec::new(),
            method_map: HashMap::new(),
            unqualified_methods: HashMap::new(),
            anonymous_call: None,
        }
    }

    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }

    pub fn is_virtual(&self) -> bool {
        self.flags.contains(ClassFlags::VIRTUAL)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodKind {
    Public,
    Private,
    NewPublic,
    NewPrivate,
}

impl MethodKind {
    pub fn is_constructor(self) -> bool {
        matches!(self, MethodKind::NewPublic | MethodKind::NewPrivate)
    }

    pub fn is_private(self) -> bool {
        matches!(self, MethodKind::Private | MethodKind::NewPrivate)
    }

    pub fn as_i32(self) -> i32 {
        match self {
            MethodKind::Public => 0,
            MethodKind::Private => 1,
            MethodKind::NewPublic => 2,
            MethodKind::NewPrivate => 3,
        }
    }
}

#[derive(Debug)]
pub struct Method {
    pub class_id: ClassId,
    /// Fully-qualified parsed name: `ClassName:SimpleName`.
    pub name: String,
    /// `ClassName:SimpleName:<encoded-param-types>`.
    pub encoded_name: String,
    /// Parse-time encoded name; stays the archive key of the method's
    /// symbol table after signatures are re-encoded.
    pub table_key: String,
    pub encoded_return: String,
    pub kind: MethodKind,
    pub is_static: bool,
    pub is_function: bool,
    pub is_virtual: bool,
    pub is_native: bool,
    pub has_and_or: bool,
    pub declarations: Vec<StmtId>,
    pub return_type: Type,
    /// `None` for virtual methods.
    pub statements: Option<Vec<StmtId>>,
    pub id: i32,
    pub span: Span,
}

impl Method {
    pub fn simple_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug)]
pub struct EnumItem {
    pub name: String,
    pub id: i32,
}

#[derive(Debug)]
pub struct Enum {
    pub name: String,
    pub offset: i32,
    pub items: Vec<EnumItem>,
    pub span: Span,
}

impl Enum {
    pub fn item(&self, name: &str) -> Option<&EnumItem> {
        self.items.iter().find(|item| item.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignKind {
    Plain,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Declaration {
        entry: EntryId,
        assignment: Option<StmtId>,
    },
    Assignment {
        kind: AssignKind,
        variable: ExprId,
        value: ExprId,
    },
    MethodCall(ExprId),
    /// A bare expression statement (a chained or casted variable).
    Simple(ExprId),
    If {
        arms: Vec<(ExprId, Vec<StmtId>)>,
        else_block: Option<Vec<StmtId>>,
    },
    While {
        cond: ExprId,
        body: Vec<StmtId>,
    },
    DoWhile {
        body: Vec<StmtId>,
        cond: ExprId,
    },
    For {
        pre: StmtId,
        cond: ExprId,
        update: StmtId,
        body: Vec<StmtId>,
    },
    Select {
        expr: ExprId,
        branches: Vec<(Vec<ExprId>, Vec<StmtId>)>,
        other: Option<Vec<StmtId>>,
        /// label value -> branch index, resolved by the analyzer.
        labels: Vec<(i32, usize)>,
    },
    Break,
    Critical {
        variable: ExprId,
        body: Vec<StmtId>,
    },
    Return(Option<ExprId>),
    /// A trap directive, only legal when compiling the system bundle.
    System(i32),
    Empty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalcOp {
    And,
    Or,
    Eql,
    Neql,
    Les,
    Gtr,
    LesEql,
    GtrEql,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
}

impl CalcOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            CalcOp::Eql | CalcOp::Neql | CalcOp::Les | CalcOp::Gtr | CalcOp::LesEql | CalcOp::GtrEql
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, CalcOp::And | CalcOp::Or)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallType {
    Method,
    NewInstance,
    NewArray,
    Parent,
    Enum,
    FunctionDef,
}

/// One segment of an interpolated character string.
#[derive(Clone, Debug)]
pub enum StringSegment {
    Literal {
        value: String,
        /// Char-string pool id.
        id: i32,
    },
    Entry {
        entry: EntryId,
        /// `ToString` method used for object segments.
        method: Option<MethodId>,
        lib_method: Option<LibMethodId>,
    },
}

#[derive(Clone, Debug)]
pub struct MethodCallData {
    pub call_type: CallType,
    /// Receiver variable or class name (possibly dotted).
    pub variable_name: String,
    pub method_name: String,
    /// Receiver variable expression for indexed/chained receivers.
    pub variable: Option<ExprId>,
    /// Resolved receiver entry.
    pub entry: Option<EntryId>,
    pub params: Vec<ExprId>,
    /// Element type for new-array calls.
    pub array_type: Option<Type>,
    /// Return-type annotation on function references.
    pub func_rtrn: Option<Type>,
    /// Resolved enum item: (enum name, item id).
    pub enum_item: Option<(String, i32)>,
    pub lib_enum_item: Option<(String, i32)>,
    pub method: Option<MethodId>,
    pub lib_method: Option<LibMethodId>,
    /// Class the call was written against, for super dispatch.
    pub original_class: Option<ClassId>,
    pub original_lib_class: Option<LibClassId>,
    pub is_enum_call: bool,
    pub is_func_def: bool,
    /// Entry of the function-typed variable for dynamic calls.
    pub dyn_func_entry: Option<EntryId>,
}

impl MethodCallData {
    pub fn new(call_type: CallType, variable_name: String, method_name: String, params: Vec<ExprId>) -> Self {
        Self {
            call_type,
            variable_name,
            method_name,
            variable: None,
            entry: None,
            params,
            array_type: None,
            func_rtrn: None,
            enum_item: None,
            lib_enum_item: None,
            method: None,
            lib_method: None,
            original_class: None,
            original_lib_class: None,
            is_enum_call: false,
            is_func_def: false,
            dyn_func_entry: None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Nil,
    BoolLit(bool),
    ByteLit(u8),
    CharLit(char),
    IntLit(i32),
    FloatLit(f64),
    CharString {
        raw: String,
        segments: Vec<StringSegment>,
        concat: Option<EntryId>,
    },
    StaticArray {
        elements: Vec<ExprId>,
        dimension: u32,
        element_kind: Option<TypeKind>,
        /// Literal-pool id.
        id: i32,
    },
    Variable {
        name: String,
        indices: Option<Vec<ExprId>>,
        entry: Option<EntryId>,
    },
    Calc {
        op: CalcOp,
        left: ExprId,
        right: ExprId,
    },
    Cond {
        cond: ExprId,
        if_expr: ExprId,
        else_expr: ExprId,
    },
    MethodCall(MethodCallData),
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Type the expression evaluates to, attached by the analyzer.
    pub eval_type: Option<Type>,
    /// Original type before implicit conversions.
    pub base_type: Option<Type>,
    /// Explicit or implicit cast target.
    pub cast_type: Option<Type>,
    /// `TypeOf` check target.
    pub type_of: Option<Type>,
    /// Subsequent chained method call.
    pub method_call: Option<ExprId>,
    /// Resolved cast target class.
    pub to_class: Option<ClassId>,
    pub to_lib_class: Option<LibClassId>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            eval_type: None,
            base_type: None,
            cast_type: None,
            type_of: None,
            method_call: None,
            to_class: None,
            to_lib_class: None,
        }
    }

    /// Sets the evaluation type; `also_base` records it as the base type when
    /// no base type has been seen yet.
    pub fn set_eval_type(&mut self, ty: Type, also_base: bool) {
        if also_base && self.base_type.is_none() {
            self.base_type = Some(ty.clone());
        }
        self.eval_type = Some(ty);
    }
}

/// The root of a compilation: bundles plus the arenas every node lives in.
#[derive(Debug, Default)]
pub struct Program {
    pub bundles: Vec<Bundle>,
    pub uses: Vec<String>,
    pub file_names: Vec<String>,
    pub classes: Vec<Class>,
    pub methods: Vec<Method>,
    pub enums: Vec<Enum>,
    pub exprs: Vec<Expr>,
    pub stmts: Vec<Stmt>,
    pub entries: Vec<crate::sym::SymbolEntry>,
    /// Deduplicated literal pools; ids are contiguous from 0.
    pub char_strings: Vec<String>,
    pub int_strings: Vec<Vec<i32>>,
    pub float_strings: Vec<Vec<f64>>,
    /// Entry point, set iff compiling an executable or web artifact.
    pub start: Option<(ClassId, MethodId)>,
    class_map: HashMap<String, ClassId>,
    enum_map: HashMap<String, EnumId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, name: String) -> u16 {
        self.file_names.push(name);
        (self.file_names.len() - 1) as u16
    }

    pub fn file_name(&self, id: u16) -> &str {
        self.file_names
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    pub fn alloc_expr(&mut self, expr: Expr) -> ExprId {
        self.exprs.push(expr);
        ExprId(self.exprs.len() as u32 - 1)
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.0 as usize]
    }

    pub fn alloc_stmt(&mut self, stmt: Stmt) -> StmtId {
        self.stmts.push(stmt);
        StmtId(self.stmts.len() as u32 - 1)
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.0 as usize]
    }

    pub fn alloc_entry(&mut self, entry: crate::sym::SymbolEntry) -> crate::sym::EntryId {
        self.entries.push(entry);
        crate::sym::EntryId(self.entries.len() as u32 - 1)
    }

    pub fn entry(&self, id: crate::sym::EntryId) -> &crate::sym::SymbolEntry {
        &self.entries[id.0 as usize]
    }

    pub fn entry_mut(&mut self, id: crate::sym::EntryId) -> &mut crate::sym::SymbolEntry {
        &mut self.entries[id.0 as usize]
    }

    pub fn add_class(&mut self, class: Class) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.class_map.insert(class.name.clone(), id);
        let bundle = class.bundle;
        self.classes.push(class);
        self.bundles[bundle].classes.push(id);
        id
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }

    pub fn add_enum(&mut self, bundle: usize, eenum: Enum) -> EnumId {
        let id = EnumId(self.enums.len() as u32);
        self.enum_map.insert(eenum.name.clone(), id);
        self.enums.push(eenum);
        self.bundles[bundle].enums.push(id);
        id
    }

    pub fn enum_(&self, id: EnumId) -> &Enum {
        &self.enums[id.0 as usize]
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.0 as usize]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut Method {
        &mut self.methods[id.0 as usize]
    }

    /// Registers a method on its class. Fails when the parse-time signature
    /// already exists in the class's method table.
    pub fn add_method(&mut self, class_id: ClassId, method: Method) -> Option<MethodId> {
        let id = MethodId(self.methods.len() as u32);
        let key = method.encoded_name.clone();
        let simple = method.simple_name().to_string();
        let class = &mut self.classes[class_id.0 as usize];
        if class.method_map.contains_key(&key) {
            return None;
        }
        class.method_map.insert(key, id);
        class.unqualified_methods.entry(simple).or_default().push(id);
        class.methods.push(id);
        self.methods.push(method);
        Some(id)
    }

    /// Exact lookup, then each use-prefix concatenated with the name.
    pub fn search_classes(&self, name: &str) -> Option<ClassId> {
        if let Some(&id) = self.class_map.get(name) {
            return Some(id);
        }
        for use_name in &self.uses {
            if let Some(&id) = self.class_map.get(&format!("{}.{}", use_name, name)) {
                return Some(id);
            }
        }
        None
    }

    pub fn search_enums(&self, name: &str) -> Option<EnumId> {
        if let Some(&id) = self.enum_map.get(name) {
            return Some(id);
        }
        for use_name in &self.uses {
            if let Some(&id) = self.enum_map.get(&format!("{}.{}", use_name, name)) {
                return Some(id);
            }
        }
        None
    }

    pub fn has_bundle_name(&self, name: &str) -> bool {
        self.bundles.iter().any(|bundle| bundle.name == name)
    }

    pub fn add_use(&mut self, name: String) {
        if !self.uses.contains(&name) {
            self.uses.push(name);
        }
    }

    /// Interns a char string, returning its stable pool id.
    pub fn intern_char_string(&mut self, value: &str) -> i32 {
        if let Some(pos) = self.char_strings.iter().position(|existing| existing == value) {
            return pos as i32;
        }
        self.char_strings.push(value.to_string());
        self.char_strings.len() as i32 - 1
    }

    pub fn intern_int_string(&mut self, value: Vec<i32>) -> i32 {
        if let Some(pos) = self.int_strings.iter().position(|existing| *existing == value) {
            return pos as i32;
        }
        self.int_strings.push(value);
        self.int_strings.len() as i32 - 1
    }

    /// Element-wise equality, as the pools are value-keyed.
    pub fn intern_float_string(&mut self, value: Vec<f64>) -> i32 {
        if let Some(pos) = self.float_strings.iter().position(|existing| {
            existing.len() == value.len()
                && existing.iter().zip(value.iter()).all(|(a, b)| a == b)
        }) {
            return pos as i32;
        }
        self.float_strings.push(value);
        self.float_strings.len() as i32 - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_char_string_dedup() {
        let mut program = Program::new();
        let a = program.intern_char_string("abc");
        let b = program.intern_char_string("def");
        let c = program.intern_char_string("abc");
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(a, c);
        assert_eq!(program.char_strings.len(), 2);
    }

    #[test]
    fn test_intern_float_string_elementwise() {
        let mut program = Program::new();
        let a = program.intern_float_string(vec![1.0, 2.0]);
        let b = program.intern_float_string(vec![1.0, 2.0]);
        let c = program.intern_float_string(vec![1.0, 2.5]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_search_classes_through_uses() {
        let mut program = Program::new();
        program.bundles.push(Bundle::new("Fleet".to_string()));
        let class = Class::new(
            "Fleet.Ship".to_string(),
            0,
            String::new(),
            Vec::new(),
            false,
            "fleet.opl".to_string(),
            Span::dummy(),
        );
        program.add_class(class);

        assert!(program.search_classes("Fleet.Ship").is_some());
        assert!(program.search_classes("Ship").is_none());
        program.add_use("Fleet".to_string());
        assert!(program.search_classes("Ship").is_some());
    }

    #[test]
    fn test_duplicate_method_key_rejected() {
        let mut program = Program::new();
        program.bundles.push(Bundle::new(String::new()));
        let class_id = program.add_class(Class::new(
            "A".to_string(),
            0,
            String::new(),
            Vec::new(),
            false,
            "a.opl".to_string(),
            Span::dummy(),
        ));
        let make = |name: &str| Method {
            class_id,
            name: "A:f".to_string(),
            encoded_name: name.to_string(),
            table_key: name.to_string(),
            encoded_return: "n".to_string(),
            kind: MethodKind::Public,
            is_static: false,
            is_function: false,
            is_virtual: false,
            is_native: false,
            has_and_or: false,
            declarations: Vec::new(),
            return_type: Type::basic(TypeKind::Nil),
            statements: Some(Vec::new()),
            id: -1,
            span: Span::dummy(),
        };
        assert!(program.add_method(class_id, make("A:f:i,")).is_some());
        assert!(program.add_method(class_id, make("A:f:i,")).is_none());
        assert!(program.add_method(class_id, make("A:f:f,")).is_some());
    }

    #[test]
    fn test_interface_flags_imply_virtual() {
        let class = Class::new(
            "I".to_string(),
            0,
            String::new(),
            Vec::new(),
            true,
            "i.opl".to_string(),
            Span::dummy(),
        );
        assert!(class.is_interface());
        assert!(class.is_virtual());
    }
}
