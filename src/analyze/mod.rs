//! The context analyzer: multi-pass class/method registration followed by
//! full semantic analysis of enums, classes, methods, statements, and
//! expressions. The tree is decorated in place; diagnostics collect into a
//! line-keyed set and any error suppresses emission.

mod call;
mod expr;
mod stmt;
#[cfg(test)]
mod tests;

use crate::ast::*;
use crate::diagnostic::{DiagnosticSet, FatalError};
use crate::linker::Linker;
use crate::span::Span;
use crate::sym::EntryId;
use crate::types::{encode_function_type, encode_parameter_list, Type, TypeKind};

/// Target flavor of the running compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Executable,
    Library,
    Web,
}

#[derive(Debug)]
pub struct Analyzer {
    pub program: Program,
    pub linker: Linker,
    pub diagnostics: DiagnosticSet,
    target: TargetKind,
    /// True when compiling the system bundle itself.
    is_system: bool,
    main_found: bool,
    web_found: bool,
    in_loop: bool,
    current_class: Option<ClassId>,
    current_method: Option<MethodId>,
    /// (bundle, table) of the active method scope.
    current_table: Option<(usize, usize)>,
    /// (bundle, table) of the active class scope.
    class_table: Option<(usize, usize)>,
    anonymous_classes: Vec<ClassId>,
}

impl Analyzer {
    pub fn new(program: Program, linker: Linker, target: TargetKind) -> Self {
        let is_system = program.bundles.iter().any(|bundle| bundle.name == "System");
        Self {
            program,
            linker,
            diagnostics: DiagnosticSet::new(),
            target,
            is_system,
            main_found: false,
            web_found: false,
            in_loop: false,
            current_class: None,
            current_method: None,
            current_table: None,
            class_table: None,
            anonymous_classes: Vec::new(),
        }
    }

    pub fn is_lib(&self) -> bool {
        self.target == TargetKind::Library
    }

    pub fn is_web(&self) -> bool {
        self.target == TargetKind::Web
    }

    /// Runs the whole analysis. Fatal errors abort; recoverable errors
    /// collect into `diagnostics`.
    pub fn analyze(&mut self) -> Result<(), FatalError> {
        if !self.is_system {
            self.linker.load()?;
        }

        // every `uses` name must exist in the program or a linked library
        for name in self.program.uses.clone() {
            if !self.program.has_bundle_name(&name) && !self.linker.has_bundle_name(&name) {
                self.diagnostics.error_global(format!(
                    "bundle name '{}' not defined in program or linked libraries",
                    name
                ));
            }
        }

        self.expand_default_parameters();
        self.encode_signatures();
        self.resolve_parents();

        // per-bundle walk: enums, classes, then class methods
        let bundle_count = self.program.bundles.len();
        for bundle in 0..bundle_count {
            for enum_id in self.program.bundles[bundle].enums.clone() {
                self.analyze_enum(enum_id);
            }
            let classes = self.program.bundles[bundle].classes.clone();
            for class_id in classes.iter().copied() {
                self.analyze_class(class_id);
            }
            for class_id in classes {
                self.analyze_methods(class_id);
            }
        }

        self.check_anonymous_classes();

        // entry points
        match self.target {
            TargetKind::Executable => {
                if !self.main_found {
                    self.diagnostics
                        .error_global("the 'Main(args)' function was not defined".to_string());
                }
            }
            TargetKind::Web => {
                if !self.web_found {
                    self.diagnostics
                        .error_global("the 'Request(args)' function was not defined".to_string());
                }
            }
            TargetKind::Library => {}
        }

        Ok(())
    }

    // ----- registration passes -----

    /// Walks every class x method and expands default-valued parameters into
    /// synthetic forwarding overloads.
    fn expand_default_parameters(&mut self) {
        for bundle in 0..self.program.bundles.len() {
            for class_id in self.program.bundles[bundle].classes.clone() {
                for method_id in self.program.class(class_id).methods.clone() {
                    self.add_default_parameter_methods(bundle, class_id, method_id);
                }
            }
        }
    }

    fn add_default_parameter_methods(
        &mut self,
        bundle: usize,
        class_id: ClassId,
        method_id: MethodId,
    ) {
        let declarations = self.program.method(method_id).declarations.clone();
        let Some(last) = declarations.last() else {
            return;
        };
        if !self.declaration_has_default(*last) {
            return;
        }

        // defaults must be trailing, and never on virtual methods
        let method_span = self.program.method(method_id).span;
        if self.program.method(method_id).is_virtual {
            self.error(
                method_span,
                "virtual methods and interfaces cannot contain default parameter values",
            );
            return;
        }
        let mut defaults_started = false;
        for declaration in &declarations {
            if self.declaration_has_default(*declaration) {
                defaults_started = true;
            } else if defaults_started {
                self.error(method_span, "only trailing parameters may have default values");
                return;
            }
        }

        let mut start = -1i32;
        let end = declarations.len() as i32;
        while start < end {
            start = self.generate_parameter_method(bundle, class_id, method_id, start);
        }
    }

    fn declaration_has_default(&self, stmt: StmtId) -> bool {
        matches!(
            self.program.stmt(stmt).kind,
            StmtKind::Declaration {
                assignment: Some(_),
                ..
            }
        )
    }

    /// Generates one synthetic overload covering the first `offset`
    /// parameters (all required ones when `offset` is -1). The body declares
    /// the dropped parameters as defaulted locals and forwards.
    fn generate_parameter_method(
        &mut self,
        bundle: usize,
        class_id: ClassId,
        method_id: MethodId,
        offset: i32,
    ) -> i32 {
        let source = self.program.method(method_id);
        let name = source.name.clone();
        let simple_name = source.simple_name().to_string();
        let kind = source.kind;
        let is_static = source.is_static;
        let is_function = source.is_function;
        let is_native = source.is_native;
        let return_type = source.return_type.clone();
        let span = source.span;
        let declarations = source.declarations.clone();

        self.program.bundles[bundle].symbols.new_parse_scope();

        let mut param_declarations = Vec::new();
        let mut param_types = Vec::new();
        let mut forwarded: Vec<String> = Vec::new();
        let mut body = Vec::new();

        let end = declarations.len() as i32;
        let mut index = 0i32;
        let mut done = false;
        while !done && index < end {
            let declaration = declarations[index as usize];
            // copy the required prefix; `offset` widens it one default at a
            // time across the generated overloads
            let copy_param = (!self.declaration_has_default(declaration) && offset == -1)
                || (offset != -1 && index < offset);
            if copy_param {
                let (entry_id, _) = self.declaration_entry(declaration);
                let original = self.program.entry(entry_id).clone();
                let simple = original.simple_name().to_string();
                let ty = original.ty.clone();
                param_types.push(ty.clone());
                let copy = self.program.alloc_entry(crate::sym::SymbolEntry::new(
                    original.name.clone(),
                    ty,
                    false,
                    true,
                    span,
                ));
                self.program.bundles[bundle].symbols.add_entry(&simple, copy);
                param_declarations.push(self.program.alloc_stmt(Stmt {
                    kind: StmtKind::Declaration {
                        entry: copy,
                        assignment: None,
                    },
                    span,
                }));
                forwarded.push(simple);
                index += 1;
            } else {
                done = true;
            }
        }

        // defaulted parameters become initialized locals in the body
        for declaration in declarations.iter().skip(index.max(0) as usize) {
            let (entry_id, assignment) = self.declaration_entry(*declaration);
            let original = self.program.entry(entry_id).clone();
            let simple = original.simple_name().to_string();
            let local = self.program.alloc_entry(crate::sym::SymbolEntry::new(
                original.name.clone(),
                original.ty.clone(),
                false,
                true,
                span,
            ));
            self.program.bundles[bundle].symbols.add_entry(&simple, local);

            let local_assignment = assignment.map(|stmt| self.clone_stmt(stmt));
            body.push(self.program.alloc_stmt(Stmt {
                kind: StmtKind::Declaration {
                    entry: local,
                    assignment: local_assignment,
                },
                span,
            }));
            forwarded.push(simple);
        }

        // forward to the full-arity method
        let call_params: Vec<ExprId> = forwarded
            .iter()
            .map(|param| {
                self.program.alloc_expr(Expr::new(
                    ExprKind::Variable {
                        name: param.clone(),
                        indices: None,
                        entry: None,
                    },
                    span,
                ))
            })
            .collect();
        let call = self.program.alloc_expr(Expr::new(
            ExprKind::MethodCall(MethodCallData::new(
                CallType::Method,
                String::new(),
                simple_name,
                call_params,
            )),
            span,
        ));
        if return_type.kind == TypeKind::Nil {
            body.push(self.program.alloc_stmt(Stmt {
                kind: StmtKind::MethodCall(call),
                span,
            }));
        } else {
            body.push(self.program.alloc_stmt(Stmt {
                kind: StmtKind::Return(Some(call)),
                span,
            }));
        }

        let parse_key = format!("{}:{}", name, encode_parameter_list(&param_types));
        self.program.bundles[bundle]
            .symbols
            .previous_parse_scope(&parse_key);

        let method = Method {
            class_id,
            name: name.clone(),
            encoded_name: parse_key.clone(),
            table_key: parse_key,
            encoded_return: return_type.encode(),
            kind,
            is_static,
            is_function,
            is_virtual: false,
            is_native,
            has_and_or: false,
            declarations: param_declarations,
            return_type,
            statements: Some(body),
            id: -1,
            span,
        };
        if self.program.add_method(class_id, method).is_none() {
            self.error(span, &format!("method or function already overloaded '{}'", name));
        }

        // the next overload widens past the parameter that stopped this one
        if done {
            index + 1
        } else {
            index
        }
    }

    fn declaration_entry(&self, stmt: StmtId) -> (EntryId, Option<StmtId>) {
        match &self.program.stmt(stmt).kind {
            StmtKind::Declaration { entry, assignment } => (*entry, *assignment),
            _ => unreachable!("parameter declarations are declaration statements"),
        }
    }

    /// Deep clone of a statement subtree; synthetic overloads must not share
    /// decorated nodes with their source method.
    fn clone_stmt(&mut self, stmt: StmtId) -> StmtId {
        let cloned = self.program.stmt(stmt).clone();
        let kind = match cloned.kind {
            StmtKind::Assignment {
                kind,
                variable,
                value,
            } => {
                let variable = self.clone_expr(variable);
                let value = self.clone_expr(value);
                StmtKind::Assignment {
                    kind,
                    variable,
                    value,
                }
            }
            other => other,
        };
        self.program.alloc_stmt(Stmt {
            kind,
            span: cloned.span,
        })
    }

    fn clone_expr(&mut self, expr: ExprId) -> ExprId {
        let node = self.program.expr(expr).clone();
        let kind = match node.kind {
            ExprKind::Calc { op, left, right } => {
                let left = self.clone_expr(left);
                let right = self.clone_expr(right);
                ExprKind::Calc { op, left, right }
            }
            ExprKind::Cond {
                cond,
                if_expr,
                else_expr,
            } => {
                let cond = self.clone_expr(cond);
                let if_expr = self.clone_expr(if_expr);
                let else_expr = self.clone_expr(else_expr);
                ExprKind::Cond {
                    cond,
                    if_expr,
                    else_expr,
                }
            }
            ExprKind::Variable { name, indices, .. } => {
                let indices =
                    indices.map(|list| list.iter().map(|&idx| self.clone_expr(idx)).collect());
                ExprKind::Variable {
                    name,
                    indices,
                    entry: None,
                }
            }
            ExprKind::MethodCall(mut data) => {
                data.params = data
                    .params
                    .iter()
                    .map(|&param| self.clone_expr(param))
                    .collect();
                ExprKind::MethodCall(data)
            }
            other => other,
        };
        self.program.alloc_expr(Expr {
            kind,
            span: node.span,
            eval_type: None,
            base_type: None,
            cast_type: node.cast_type,
            type_of: node.type_of,
            method_call: None,
            to_class: None,
            to_lib_class: None,
        })
    }

    /// Re-encodes every method signature with fully qualified class names so
    /// overload keys are stable across bundles, then rebuilds each class's
    /// method maps.
    fn encode_signatures(&mut self) {
        for method_index in 0..self.program.methods.len() {
            let method_id = MethodId(method_index as u32);
            let declarations = self.program.method(method_id).declarations.clone();

            let mut param_types = Vec::new();
            for declaration in declarations {
                let (entry_id, _) = self.declaration_entry(declaration);
                let ty = self.program.entry(entry_id).ty.clone();
                let resolved = self.resolve_type_names(ty);
                self.program.entry_mut(entry_id).ty = resolved.clone();
                param_types.push(resolved);
            }

            let rtrn = self.program.method(method_id).return_type.clone();
            let rtrn = self.resolve_type_names(rtrn);

            let method = self.program.method_mut(method_id);
            let simple = method.simple_name().to_string();
            method.encoded_name = format!(
                "{}:{}:{}",
                method.name.rsplit_once(':').map(|(class, _)| class).unwrap_or(""),
                simple,
                encode_parameter_list(&param_types)
            );
            method.encoded_return = rtrn.encode();
            method.return_type = rtrn;
        }

        // rebuild method tables keyed by the re-encoded names
        for class in &mut self.program.classes {
            class.method_map.clear();
            class.unqualified_methods.clear();
        }
        for method_index in 0..self.program.methods.len() {
            let method_id = MethodId(method_index as u32);
            let class_id = self.program.method(method_id).class_id;
            let key = self.program.method(method_id).encoded_name.clone();
            let simple = self.program.method(method_id).simple_name().to_string();
            let class = self.program.class_mut(class_id);
            if class.method_map.insert(key.clone(), method_id).is_some() {
                let span = self.program.method(method_id).span;
                self.diagnostics.error(
                    format!("method or function already overloaded '{}'", key),
                    span,
                );
            } else {
                self.program
                    .class_mut(class_id)
                    .unqualified_methods
                    .entry(simple)
                    .or_default()
                    .push(method_id);
            }
        }
    }

    /// Qualifies a type's class name against the program and the libraries.
    pub(crate) fn resolve_type_names(&self, mut ty: Type) -> Type {
        match ty.kind {
            TypeKind::Class => {
                if let Some(class_id) = self.program.search_classes(&ty.class_name) {
                    ty.class_name = self.program.class(class_id).name.clone();
                } else if let Some(lib_id) = self
                    .linker
                    .search_class_libraries(&ty.class_name, &self.program.uses)
                {
                    ty.class_name = self.linker.class(lib_id).name.clone();
                } else if let Some(enum_id) = self.program.search_enums(&ty.class_name) {
                    ty.class_name = self.program.enum_(enum_id).name.clone();
                } else if let Some(enum_id) = self
                    .linker
                    .search_enum_libraries(&ty.class_name, &self.program.uses)
                {
                    ty.class_name = self.linker.enum_(enum_id).name.clone();
                }
                ty
            }
            TypeKind::Func => {
                let params: Vec<Type> = ty
                    .func_params
                    .iter()
                    .map(|param| self.resolve_type_names(param.clone()))
                    .collect();
                let rtrn = ty
                    .func_return
                    .as_deref()
                    .map(|rtrn| self.resolve_type_names(rtrn.clone()))
                    .unwrap_or_else(|| Type::basic(TypeKind::Nil));
                ty.class_name = format!("m.{}", encode_function_type(&params, &rtrn));
                ty.func_params = params;
                ty.func_return = Some(Box::new(rtrn));
                ty
            }
            _ => ty,
        }
    }

    /// Resolves parent names: program classes first, then libraries; a class
    /// without a parent defaults to the hierarchy root.
    fn resolve_parents(&mut self) {
        for class_index in 0..self.program.classes.len() {
            let class_id = ClassId(class_index as u32);
            let mut parent_name = self.program.class(class_id).parent_name.clone();
            let class_name = self.program.class(class_id).name.clone();
            let span = self.program.class(class_id).span;

            let mut defaulted = false;
            if parent_name.is_empty() {
                if class_name == SYSTEM_BASE_NAME {
                    continue;
                }
                parent_name = SYSTEM_BASE_NAME.to_string();
                defaulted = true;
                self.program.class_mut(class_id).parent_name = parent_name.clone();
            }

            if let Some(parent) = self.program.search_classes(&parent_name) {
                if parent != class_id {
                    self.program.class_mut(class_id).parent = Some(parent);
                    self.program.class_mut(parent).children.push(class_id);
                }
            } else if let Some(lib_parent) = self
                .linker
                .search_class_libraries(&parent_name, &self.program.uses)
            {
                self.program.class_mut(class_id).lib_parent = Some(lib_parent);
                self.linker.class_mut(lib_parent).children.push(class_id);
                // the whole ancestor chain must survive dead-class pruning
                let mut ancestor = Some(lib_parent);
                while let Some(current) = ancestor {
                    self.linker.class_mut(current).was_called = true;
                    let parent_name = self.linker.class(current).parent_name.clone();
                    ancestor = if parent_name.is_empty() {
                        None
                    } else {
                        self.linker
                            .search_class_libraries(&parent_name, &self.program.uses)
                    };
                }
            } else if defaulted {
                // no system library linked; the class is its own root
                self.program.class_mut(class_id).parent_name = String::new();
            } else {
                self.error(span, "attempting to inherit from an undefined class type");
            }
        }
    }

    // ----- per-construct analysis entry points -----

    fn analyze_enum(&mut self, enum_id: EnumId) {
        let name = self.program.enum_(enum_id).name.clone();
        let span = self.program.enum_(enum_id).span;
        if self
            .linker
            .search_enum_libraries(&name, &self.program.uses)
            .is_some()
        {
            self.error(
                span,
                &format!("enum '{}' defined in program and shared libraries", name),
            );
        }
    }

    fn analyze_class(&mut self, class_id: ClassId) {
        let span = self.program.class(class_id).span;
        let name = self.program.class(class_id).name.clone();
        let bundle = self.program.class(class_id).bundle;

        self.current_class = Some(class_id);
        self.program.class_mut(class_id).called = true;
        self.class_table = self.program.bundles[bundle]
            .symbols
            .table_index(&name)
            .map(|table| (bundle, table));
        self.current_table = self.class_table;
        self.current_method = None;

        if self
            .linker
            .search_class_libraries(&name, &self.program.uses)
            .is_some()
        {
            self.error(
                span,
                &format!("class '{}' defined in program and shared libraries", name),
            );
        }

        // interfaces may only appear in the implements set
        let parent_is_interface = match (
            self.program.class(class_id).parent,
            self.program.class(class_id).lib_parent,
        ) {
            (Some(parent), _) => self.program.class(parent).is_interface(),
            (None, Some(lib_parent)) => self.linker.class(lib_parent).is_interface,
            _ => false,
        };
        if parent_is_interface {
            self.error(span, "classes cannot be derived from interfaces");
        }

        self.analyze_interfaces(class_id);

        for stmt in self.program.class(class_id).statements.clone() {
            self.analyze_declaration(stmt);
        }

        self.current_class = None;
    }

    fn analyze_methods(&mut self, class_id: ClassId) {
        self.current_class = Some(class_id);
        let bundle = self.program.class(class_id).bundle;
        let name = self.program.class(class_id).name.clone();
        self.class_table = self.program.bundles[bundle]
            .symbols
            .table_index(&name)
            .map(|table| (bundle, table));

        for (index, method_id) in self.program.class(class_id).methods.clone().into_iter().enumerate() {
            self.program.method_mut(method_id).id = index as i32;
            self.analyze_method(method_id);
        }

        // a virtual parent's contract must be satisfied
        let span = self.program.class(class_id).span;
        if let Some(parent) = self.program.class(class_id).parent {
            if self.program.class(parent).is_virtual()
                && !self.check_virtual_methods_program(class_id, parent)
            {
                let parent_name = self.program.class(parent).name.clone();
                self.error(
                    span,
                    &format!(
                        "not all virtual methods have been implemented for the class/interface: {}",
                        parent_name
                    ),
                );
            }
        } else if let Some(lib_parent) = self.program.class(class_id).lib_parent {
            if self.linker.class(lib_parent).is_virtual
                && !self.check_virtual_methods_library(class_id, lib_parent)
            {
                let parent_name = self.linker.class(lib_parent).name.clone();
                self.error(
                    span,
                    &format!(
                        "not all virtual methods have been implemented for the class/interface: {}",
                        parent_name
                    ),
                );
            }
        }

        if self.program.class(class_id).anonymous_call.is_some() {
            self.anonymous_classes.push(class_id);
        }

        self.current_class = None;
        self.class_table = None;
    }

    fn analyze_method(&mut self, method_id: MethodId) {
        self.current_method = Some(method_id);
        let class_id = self.program.method(method_id).class_id;
        let bundle = self.program.class(class_id).bundle;
        let table_key = self.program.method(method_id).table_key.clone();
        self.current_table = self.program.bundles[bundle]
            .symbols
            .table_index(&table_key)
            .map(|table| (bundle, table));

        for declaration in self.program.method(method_id).declarations.clone() {
            self.analyze_parameter_declaration(declaration);
        }

        let is_virtual = self.program.method(method_id).is_virtual;
        if !is_virtual {
            let statements = self
                .program
                .method(method_id)
                .statements
                .clone()
                .unwrap_or_default();
            for stmt in &statements {
                self.analyze_statement(*stmt);
            }

            self.check_constructor_parent_call(method_id, &statements);
            self.check_method_returns(method_id, &statements);
            self.check_entry_point(method_id);
        }

        self.current_method = None;
        self.current_table = self.class_table;
    }

    fn check_constructor_parent_call(&mut self, method_id: MethodId, statements: &[StmtId]) {
        let method = self.program.method(method_id);
        if !method.kind.is_constructor() {
            return;
        }
        let class_id = method.class_id;
        let span = method.span;
        let class = self.program.class(class_id);
        if class.is_interface() {
            return;
        }
        let has_real_parent = class.parent.is_some()
            || class
                .lib_parent
                .map(|lib_parent| self.linker.class(lib_parent).name != SYSTEM_BASE_NAME)
                .unwrap_or(false);
        if !has_real_parent {
            return;
        }

        let first_is_parent_call = statements.first().map(|stmt| {
            matches!(
                &self.program.stmt(*stmt).kind,
                StmtKind::MethodCall(expr)
                    if matches!(
                        &self.program.expr(*expr).kind,
                        ExprKind::MethodCall(data) if data.call_type == CallType::Parent
                    )
            )
        });
        if first_is_parent_call != Some(true) {
            self.error(span, "parent call required");
        }
    }

    fn check_method_returns(&mut self, method_id: MethodId, statements: &[StmtId]) {
        if self.is_system {
            return;
        }
        let method = self.program.method(method_id);
        if method.kind.is_constructor() || method.return_type.kind == TypeKind::Nil {
            return;
        }
        let span = method.span;
        let ends_with_return = statements
            .last()
            .map(|stmt| matches!(self.program.stmt(*stmt).kind, StmtKind::Return(_)))
            .unwrap_or(false);
        if !ends_with_return {
            self.error(span, "method/function does not return a value");
        }
    }

    fn check_entry_point(&mut self, method_id: MethodId) {
        let method = self.program.method(method_id);
        let class_id = method.class_id;
        let span = method.span;
        let encoded = method.encoded_name.clone();
        let is_static = method.is_static;
        let class_name = self.program.class(class_id).name.clone();

        let main_key = format!("{}:Main:o.System.String*,", class_name);
        if encoded == main_key {
            if self.main_found {
                self.error(span, "the 'Main(args)' function has already been defined");
            } else if is_static {
                self.program.class_mut(class_id).called = true;
                self.program.start = Some((class_id, method_id));
                self.main_found = true;
            }
            if self.main_found && (self.is_lib() || self.is_web()) {
                self.error(
                    span,
                    "libraries and web applications may not define a 'Main(args)' function",
                );
            }
            return;
        }

        if self.is_web() {
            let request_key = format!("{}:Request:o.Web.Request,o.Web.Response,", class_name);
            if encoded == request_key {
                if self.web_found {
                    self.error(span, "the 'Request(args)' function has already been defined");
                } else if is_static {
                    self.program.class_mut(class_id).called = true;
                    self.program.start = Some((class_id, method_id));
                    self.web_found = true;
                }
            }
        }
    }

    // ----- interface and virtual-method verification -----

    fn analyze_interfaces(&mut self, class_id: ClassId) {
        let interface_names = self.program.class(class_id).interface_names.clone();
        let span = self.program.class(class_id).span;
        let mut interfaces = Vec::new();
        let mut lib_interfaces = Vec::new();

        for interface_name in interface_names {
            if let Some(interface_id) = self.program.search_classes(&interface_name) {
                if !self.program.class(interface_id).is_interface() {
                    self.error(span, "expected an interface type");
                    return;
                }
                for method_id in self.program.class(interface_id).methods.clone() {
                    if !self.program.method(method_id).is_virtual {
                        let method_span = self.program.method(method_id).span;
                        self.error(method_span, "interface method must be defined as 'virtual'");
                    }
                }
                if !self.check_virtual_methods_program(class_id, interface_id) {
                    let name = self.program.class(interface_id).name.clone();
                    self.error(
                        span,
                        &format!(
                            "not all methods have been implemented for the interface: {}",
                            name
                        ),
                    );
                } else {
                    self.program.class_mut(interface_id).called = true;
                    self.program.class_mut(interface_id).children.push(class_id);
                    interfaces.push(interface_id);
                }
            } else if let Some(lib_interface) = self
                .linker
                .search_class_libraries(&interface_name, &self.program.uses)
            {
                if !self.linker.class(lib_interface).is_interface {
                    self.error(span, "expected an interface type");
                    return;
                }
                if !self.check_virtual_methods_library(class_id, lib_interface) {
                    let name = self.linker.class(lib_interface).name.clone();
                    self.error(
                        span,
                        &format!(
                            "not all methods have been implemented for the interface: {}",
                            name
                        ),
                    );
                } else {
                    self.linker.class_mut(lib_interface).was_called = true;
                    self.linker.class_mut(lib_interface).children.push(class_id);
                    lib_interfaces.push(lib_interface);
                }
            } else {
                self.error(span, &format!("undefined interface: '{}'", interface_name));
            }
        }

        let class = self.program.class_mut(class_id);
        class.interfaces = interfaces;
        class.lib_interfaces = lib_interfaces;
    }

    /// Looks up the implementation of `virtual_method_name` (an encoded name
    /// of the virtual class) in `impl_class` or its ancestors, substituting
    /// each candidate class's name into the key.
    fn find_implementation(
        &self,
        impl_class: ClassId,
        virtual_method_name: &str,
    ) -> Option<ImplMethod> {
        let suffix_start = virtual_method_name.find(':')?;
        let suffix = &virtual_method_name[suffix_start..];

        let mut current = Some(impl_class);
        while let Some(class_id) = current {
            let class = self.program.class(class_id);
            let key = format!("{}{}", class.name, suffix);
            if let Some(&method) = class.method_map.get(&key) {
                return Some(ImplMethod::Program(method));
            }
            if let Some(lib_parent) = class.lib_parent {
                let lib_class = self.linker.class(lib_parent);
                let key = format!("{}{}", lib_class.name, suffix);
                if let Some(method) = self.linker.find_method(lib_parent, &key) {
                    return Some(ImplMethod::Library(method));
                }
            }
            current = class.parent;
        }
        None
    }

    fn check_virtual_methods_program(&mut self, impl_class: ClassId, virtual_class: ClassId) -> bool {
        let mut all_defined = true;
        for virtual_method_id in self.program.class(virtual_class).methods.clone() {
            let virtual_method = self.program.method(virtual_method_id);
            if !virtual_method.is_virtual {
                continue;
            }
            let encoded = virtual_method.encoded_name.clone();
            match self.find_implementation(impl_class, &encoded) {
                Some(found) => {
                    let holder = self.program.class(virtual_class).name.clone();
                    let virtual_kind = virtual_method.kind;
                    let virtual_return = virtual_method.return_type.clone();
                    let virtual_static = virtual_method.is_static;
                    self.check_virtual_signature(
                        impl_class,
                        found,
                        virtual_kind,
                        &virtual_return,
                        virtual_static,
                        &holder,
                    );
                }
                None => all_defined = false,
            }
        }
        all_defined
    }

    fn check_virtual_methods_library(
        &mut self,
        impl_class: ClassId,
        virtual_class: crate::linker::LibClassId,
    ) -> bool {
        let mut all_defined = true;
        let method_count = self.linker.class(virtual_class).methods.len();
        for method_index in 0..method_count {
            let virtual_method = &self.linker.class(virtual_class).methods[method_index];
            if !virtual_method.is_virtual {
                continue;
            }
            let encoded = virtual_method.name.clone();
            let virtual_kind = MethodKind::try_from_i32(virtual_method.kind)
                .unwrap_or(MethodKind::Public);
            let virtual_return = virtual_method.rtrn_type.clone();
            let virtual_static = virtual_method.is_static();
            let holder = self.linker.class(virtual_class).name.clone();

            match self.find_implementation(impl_class, &encoded) {
                Some(found) => {
                    self.check_virtual_signature(
                        impl_class,
                        found,
                        virtual_kind,
                        &virtual_return,
                        virtual_static,
                        &holder,
                    );
                }
                None => all_defined = false,
            }
        }
        all_defined
    }

    /// Matching requires identical kind, return type (classes compared by
    /// resolved identity), static-ness, and a non-virtual implementer.
    fn check_virtual_signature(
        &mut self,
        impl_class: ClassId,
        found: ImplMethod,
        virtual_kind: MethodKind,
        virtual_return: &Type,
        virtual_static: bool,
        holder_name: &str,
    ) {
        let span = self.program.class(impl_class).span;
        let (impl_kind, impl_return, impl_static, impl_virtual) = match found {
            ImplMethod::Program(method_id) => {
                let method = self.program.method(method_id);
                (
                    method.kind,
                    method.return_type.clone(),
                    method.is_static,
                    method.is_virtual,
                )
            }
            ImplMethod::Library(method_id) => {
                let method = self.linker.method(method_id);
                (
                    MethodKind::try_from_i32(method.kind).unwrap_or(MethodKind::Public),
                    method.rtrn_type.clone(),
                    method.is_static(),
                    method.is_virtual,
                )
            }
        };

        let message = format!(
            "not all virtual methods have been defined for class/interface: {}",
            holder_name
        );
        if impl_kind != virtual_kind {
            self.error(span, &message);
        }
        if impl_return.kind != virtual_return.kind {
            self.error(span, &message);
        } else if impl_return.kind == TypeKind::Class
            && impl_return.class_name != virtual_return.class_name
            && !self.same_resolved_class(&impl_return.class_name, &virtual_return.class_name)
        {
            self.error(span, &message);
        }
        if impl_static != virtual_static {
            self.error(span, &message);
        }
        if impl_virtual {
            self.error(span, "implementation method cannot be virtual");
        }
    }

    fn same_resolved_class(&self, left: &str, right: &str) -> bool {
        let left_program = self.program.search_classes(left);
        let right_program = self.program.search_classes(right);
        if left_program.is_some() || right_program.is_some() {
            return left_program == right_program && left_program.is_some();
        }
        let left_lib = self.linker.search_class_libraries(left, &self.program.uses);
        let right_lib = self.linker.search_class_libraries(right, &self.program.uses);
        left_lib.is_some() && left_lib == right_lib
    }

    // ----- anonymous classes -----

    fn check_anonymous_classes(&mut self) {
        for class_id in self.anonymous_classes.clone() {
            let Some(call) = self.program.class(class_id).anonymous_call else {
                continue;
            };
            let span = self.program.class(class_id).span;
            let data = match &self.program.expr(call).kind {
                ExprKind::MethodCall(data) => data.clone(),
                _ => continue,
            };

            let found = if let Some(method_id) = data.method {
                let key = self.program.method(method_id).encoded_name.clone();
                self.program.class(class_id).method_map.contains_key(&key)
            } else if let Some(lib_method) = data.lib_method {
                let key = self.linker.method(lib_method).name.clone();
                self.program.class(class_id).method_map.contains_key(&key)
            } else {
                false
            };

            if !found {
                self.error(
                    span,
                    "caller's 'New(..)' method signature not defined in anonymous class",
                );
            }
        }
    }

    // ----- entry lookup -----

    /// Resolves a simple variable name: method scope, class scope, then
    /// ancestor class scopes.
    pub(crate) fn get_entry(&self, simple_name: &str) -> Option<EntryId> {
        if let Some((bundle, table)) = self.current_table {
            if let Some(entry) = self.program.bundles[bundle]
                .symbols
                .table(table)
                .get_entry(simple_name)
            {
                return Some(entry);
            }
        }
        if let Some((bundle, table)) = self.class_table {
            if self.current_table != Some((bundle, table)) {
                if let Some(entry) = self.program.bundles[bundle]
                    .symbols
                    .table(table)
                    .get_entry(simple_name)
                {
                    return Some(entry);
                }
            }
        }
        self.get_parent_entry_from(self.current_class?, simple_name)
    }

    /// Resolves a field in the parent chain only (`@parent` references).
    pub(crate) fn get_parent_entry(&self, simple_name: &str) -> Option<EntryId> {
        let class_id = self.current_class?;
        let parent = self.program.class(class_id).parent?;
        self.lookup_class_field(parent, simple_name)
            .or_else(|| self.get_parent_entry_from(parent, simple_name))
    }

    fn get_parent_entry_from(&self, class_id: ClassId, simple_name: &str) -> Option<EntryId> {
        let mut current = self.program.class(class_id).parent;
        while let Some(parent) = current {
            if let Some(entry) = self.lookup_class_field(parent, simple_name) {
                return Some(entry);
            }
            current = self.program.class(parent).parent;
        }
        None
    }

    fn lookup_class_field(&self, class_id: ClassId, simple_name: &str) -> Option<EntryId> {
        let class = self.program.class(class_id);
        let table = self.program.bundles[class.bundle]
            .symbols
            .table_index(&class.name)?;
        self.program.bundles[class.bundle]
            .symbols
            .table(table)
            .get_entry(simple_name)
    }

    // ----- small shared helpers -----

    pub(crate) fn error(&mut self, span: Span, message: &str) {
        self.diagnostics.error(message.to_string(), span);
    }

    pub(crate) fn is_program_or_lib_enum(&self, name: &str) -> bool {
        self.program.search_enums(name).is_some()
            || self
                .linker
                .search_enum_libraries(name, &self.program.uses)
                .is_some()
    }

    /// Records the class named by a resolved type as reachable.
    pub(crate) fn mark_called(&mut self, name: &str) {
        if let Some(class_id) = self.program.search_classes(name) {
            self.program.class_mut(class_id).called = true;
        } else if let Some(lib_id) = self.linker.search_class_libraries(name, &self.program.uses) {
            self.linker.class_mut(lib_id).was_called = true;
        }
    }
}

/// An implementation candidate for a virtual method.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ImplMethod {
    Program(MethodId),
    Library(crate::linker::LibMethodId),
}

impl MethodKind {
    pub fn try_from_i32(value: i32) -> Option<MethodKind> {
        match value {
            0 => Some(MethodKind::Public),
            1 => Some(MethodKind::Private),
            2 => Some(MethodKind::NewPublic),
            3 => Some(MethodKind::NewPrivate),
            _ => None,
        }
    }
}
