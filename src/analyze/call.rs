//! Method-call resolution: receiver typing, candidate scoring, implicit-cast
//! installation, parent and dynamic-function fallthrough, and function
//! references.

use super::Analyzer;
use crate::ast::*;
use crate::linker::{LibClassId, LibMethodId};
use crate::types::{Type, TypeKind};

/// Per-argument match quality: 0 exact, 1 widening, -1 no match.
const MATCH_EXACT: i32 = 0;
const MATCH_WIDENING: i32 = 1;
const MATCH_NONE: i32 = -1;

impl Analyzer {
    pub(crate) fn analyze_method_call(&mut self, call_id: ExprId) {
        let data = match &self.program.expr(call_id).kind {
            ExprKind::MethodCall(data) => data.clone(),
            _ => return,
        };
        if data.method.is_some() || data.lib_method.is_some() || data.dyn_func_entry.is_some() {
            return;
        }

        match data.call_type {
            CallType::NewArray => self.analyze_new_array_call(call_id, &data),
            CallType::Enum => self.analyze_enum_call(call_id, &data),
            CallType::Parent => self.analyze_parent_call(call_id, &data),
            _ => self.analyze_general_call(call_id, &data),
        }
    }

    fn analyze_new_array_call(&mut self, call_id: ExprId, data: &MethodCallData) {
        let span = self.program.expr(call_id).span;
        self.analyze_expressions(&data.params);
        if data.params.is_empty() {
            self.error(span, "empty array index");
        }
        for param in &data.params {
            if let Some(ty) = self.get_expression_type(*param) {
                match ty.kind {
                    TypeKind::Byte | TypeKind::Char | TypeKind::Int => {}
                    _ => {
                        let param_span = self.program.expr(*param).span;
                        self.error(param_span, "invalid array index type");
                    }
                }
            }
        }

        let element = data
            .array_type
            .clone()
            .unwrap_or_else(|| Type::basic(TypeKind::Int));
        let element = self.resolve_type_names(element);
        let ty = element.with_dimension(data.params.len() as u32);
        if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
            slot.array_type = Some(ty.clone());
        }
        self.set_eval(call_id, ty, true);
    }

    fn analyze_enum_call(&mut self, call_id: ExprId, data: &MethodCallData) {
        let span = self.program.expr(call_id).span;

        if let Some(enum_id) = self.program.search_enums(&data.variable_name) {
            let eenum = self.program.enum_(enum_id);
            let enum_name = eenum.name.clone();
            match eenum.item(&data.method_name) {
                Some(item) => {
                    let id = item.id;
                    if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
                        slot.enum_item = Some((enum_name.clone(), id));
                    }
                    self.set_eval(call_id, Type::class(enum_name), true);
                }
                None => {
                    self.error(span, &format!("undefined enum item: '{}'", data.method_name))
                }
            }
        } else if let Some(lib_enum_id) = self
            .linker
            .search_enum_libraries(&data.variable_name, &self.program.uses)
        {
            let eenum = self.linker.enum_(lib_enum_id);
            let enum_name = eenum.name.clone();
            match eenum.item(&data.method_name) {
                Some(item) => {
                    let id = item.id;
                    if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
                        slot.lib_enum_item = Some((enum_name.clone(), id));
                    }
                    self.set_eval(call_id, Type::class(enum_name), true);
                }
                None => {
                    self.error(span, &format!("undefined enum item: '{}'", data.method_name))
                }
            }
        } else if data.variable_name == SELF_ID || data.variable_name == PARENT_ID {
            // a field reference through the implicit receiver
            let entry = if data.variable_name == SELF_ID {
                self.get_entry(&data.method_name)
            } else {
                self.get_parent_entry(&data.method_name)
            };
            match entry {
                Some(entry_id) => {
                    let entry = self.program.entry(entry_id);
                    if entry.is_local || entry.is_static {
                        self.error(
                            span,
                            &format!(
                                "invalid '{}' reference for variable: '{}'",
                                data.variable_name, data.method_name
                            ),
                        );
                    } else {
                        let ty = entry.ty.clone();
                        if let ExprKind::MethodCall(slot) =
                            &mut self.program.expr_mut(call_id).kind
                        {
                            slot.entry = Some(entry_id);
                        }
                        self.set_eval(call_id, ty, true);
                    }
                }
                None => self.error(
                    span,
                    &format!(
                        "invalid '{}' reference for variable: '{}'",
                        data.variable_name, data.method_name
                    ),
                ),
            }
        } else {
            self.error(span, &format!("undefined enum: '{}'", data.variable_name));
        }

        self.analyze_expression_method_call(call_id);
    }

    fn analyze_parent_call(&mut self, call_id: ExprId, data: &MethodCallData) {
        let span = self.program.expr(call_id).span;
        self.analyze_expressions(&data.params);

        let Some(class_id) = self.current_class else {
            return;
        };
        if let Some(parent) = self.program.class(class_id).parent {
            self.analyze_method_call_on_class(parent, call_id, false, String::new());
        } else if let Some(lib_parent) = self.program.class(class_id).lib_parent {
            self.analyze_method_call_on_lib_class(lib_parent, call_id, false, String::new(), true);
        } else {
            self.error(span, "class has no parent");
        }
    }

    /// Receiver discovery for plain method, constructor, and function-def
    /// calls.
    fn analyze_general_call(&mut self, call_id: ExprId, data: &MethodCallData) {
        let span = self.program.expr(call_id).span;

        // a held receiver variable binds (and checks) first
        if let Some(variable) = data.variable {
            if self.program.expr(variable).eval_type.is_none() {
                self.analyze_variable(variable);
            }
        }

        // a named receiver resolving to an entry is remembered for emission
        let mut data = data.clone();
        if data.variable.is_none() && !data.variable_name.is_empty() {
            if let Some(entry_id) = self.get_entry(&data.variable_name) {
                data.entry = Some(entry_id);
                if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
                    slot.entry = Some(entry_id);
                }
            }
        }
        let data = &data;

        // receiver within the program
        let mut encoding = String::new();
        if let Some(klass) = self.program_receiver(data, &mut encoding) {
            if data.is_func_def {
                self.analyze_expressions(&data.params);
                self.analyze_function_reference_program(klass, call_id, &encoding);
            } else {
                self.analyze_method_call_on_class(klass, call_id, false, encoding);
            }
            return;
        }

        // receiver within a library
        let mut encoding = String::new();
        if let Some(lib_klass) = self.library_receiver(call_id, data, &mut encoding) {
            if data.is_func_def {
                self.analyze_expressions(&data.params);
                self.analyze_function_reference_library(lib_klass, call_id, &encoding);
            } else {
                self.analyze_method_call_on_lib_class(lib_klass, call_id, false, encoding, false);
            }
            return;
        }

        // basic-typed receivers route to the built-in wrapper classes
        if !data.variable_name.is_empty() {
            if let Some(entry_id) = self.get_entry(&data.variable_name) {
                let ty = self.program.entry(entry_id).ty.clone();
                let dimension = if self.receiver_fully_indexed(data) {
                    0
                } else {
                    ty.dimension
                };
                let receiver = self.receiver_class_for_type(&ty, dimension);
                if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
                    slot.entry = Some(entry_id);
                    slot.is_enum_call = receiver.is_enum_call;
                }
                if let Some(klass) = receiver.class {
                    self.analyze_method_call_on_class(klass, call_id, false, receiver.encoding);
                    return;
                }
                if let Some(lib_klass) = receiver.lib_class {
                    self.analyze_method_call_on_lib_class(
                        lib_klass,
                        call_id,
                        false,
                        receiver.encoding,
                        false,
                    );
                    return;
                }
                self.error(span, "invalid class type or assignment");
                return;
            }
        }

        self.error(
            span,
            &format!("undefined class: '{}'", data.variable_name),
        );
    }

    fn receiver_fully_indexed(&self, data: &MethodCallData) -> bool {
        data.variable
            .map(|variable| {
                matches!(
                    &self.program.expr(variable).kind,
                    ExprKind::Variable {
                        indices: Some(_),
                        ..
                    }
                )
            })
            .unwrap_or(false)
    }

    fn program_receiver(&mut self, data: &MethodCallData, encoding: &mut String) -> Option<ClassId> {
        // same-class call (and the dynamic function-call fallthrough)
        if data.variable_name.is_empty() {
            return self.current_class;
        }

        if let Some(entry_id) = self.get_entry(&data.variable_name) {
            let ty = self.program.entry(entry_id).ty.clone();
            if ty.kind == TypeKind::Class {
                if ty.dimension > 0 && !self.receiver_fully_indexed(data) {
                    if let Some(base) = self.program.search_classes(SYSTEM_BASE_NAME) {
                        encoding.push_str("o.System.Base*,");
                        return Some(base);
                    }
                } else if let Some(cast) = self.receiver_cast(data) {
                    // the cast annotation overrides the declared type
                    if let Some(klass) = self.program.search_classes(&cast.class_name) {
                        if let Some(variable) = data.variable {
                            self.analyze_class_cast(&cast, variable);
                        }
                        return Some(klass);
                    }
                } else if let Some(klass) = self.program.search_classes(&ty.class_name) {
                    return Some(klass);
                }
            }
        }

        // static call through a class name
        self.program.search_classes(&data.variable_name)
    }

    fn receiver_cast(&self, data: &MethodCallData) -> Option<Type> {
        let variable = data.variable?;
        let cast = self.program.expr(variable).cast_type.clone()?;
        (cast.kind == TypeKind::Class).then_some(cast)
    }

    fn library_receiver(
        &mut self,
        _call_id: ExprId,
        data: &MethodCallData,
        encoding: &mut String,
    ) -> Option<LibClassId> {
        if data.variable_name.is_empty() {
            return None;
        }

        if let Some(entry_id) = self.get_entry(&data.variable_name) {
            let ty = self.program.entry(entry_id).ty.clone();
            if ty.kind == TypeKind::Class {
                if ty.dimension > 0 && !self.receiver_fully_indexed(data) {
                    if let Some(base) = self
                        .linker
                        .search_class_libraries(SYSTEM_BASE_NAME, &self.program.uses)
                    {
                        encoding.push_str("o.System.Base*,");
                        return Some(base);
                    }
                } else if let Some(cast) = self.receiver_cast(data) {
                    if let Some(lib_klass) = self
                        .linker
                        .search_class_libraries(&cast.class_name, &self.program.uses)
                    {
                        if let Some(variable) = data.variable {
                            self.analyze_class_cast(&cast, variable);
                        }
                        return Some(lib_klass);
                    }
                } else if let Some(lib_klass) = self
                    .linker
                    .search_class_libraries(&ty.class_name, &self.program.uses)
                {
                    return Some(lib_klass);
                }
            }
        }

        self.linker
            .search_class_libraries(&data.variable_name, &self.program.uses)
    }

    /// Wrapper-class routing for a receiver of the given type.
    fn receiver_class_for_type(&self, ty: &Type, dimension: u32) -> ReceiverClasses {
        let mut receiver = ReceiverClasses::default();
        let wrapper = match ty.kind {
            TypeKind::Bool => {
                receiver.encoding.push('l');
                Some(BOOL_CLASS_NAME)
            }
            TypeKind::Byte => {
                receiver.encoding.push('b');
                Some(BYTE_CLASS_NAME)
            }
            TypeKind::Char => {
                receiver.encoding.push('c');
                Some(CHAR_CLASS_NAME)
            }
            TypeKind::Int => {
                receiver.encoding.push('i');
                Some(INT_CLASS_NAME)
            }
            TypeKind::Float => {
                receiver.encoding.push('f');
                Some(FLOAT_CLASS_NAME)
            }
            TypeKind::Class => {
                if dimension > 0 && ty.dimension > 0 {
                    receiver.encoding.push_str("o.System.Base");
                    receiver.class = self.program.search_classes(SYSTEM_BASE_NAME);
                    receiver.lib_class = self
                        .linker
                        .search_class_libraries(SYSTEM_BASE_NAME, &self.program.uses);
                } else {
                    receiver.class = self.program.search_classes(&ty.class_name);
                    receiver.lib_class = self
                        .linker
                        .search_class_libraries(&ty.class_name, &self.program.uses);
                    if receiver.class.is_none()
                        && receiver.lib_class.is_none()
                        && self.is_program_or_lib_enum(&ty.class_name)
                    {
                        receiver.class = self.program.search_classes(INT_CLASS_NAME);
                        receiver.lib_class = self
                            .linker
                            .search_class_libraries(INT_CLASS_NAME, &self.program.uses);
                        receiver.encoding.push_str("i,");
                        receiver.is_enum_call = true;
                    }
                }
                None
            }
            _ => None,
        };
        if let Some(wrapper) = wrapper {
            receiver.class = self.program.search_classes(wrapper);
            receiver.lib_class = self
                .linker
                .search_class_libraries(wrapper, &self.program.uses);
        }

        for _ in 0..dimension {
            receiver.encoding.push('*');
        }
        if ty.kind != TypeKind::Class {
            receiver.encoding.push(',');
        }
        receiver
    }

    /// Continues a call chain: the next link's receiver is this
    /// expression's resulting type.
    pub(crate) fn analyze_expression_method_call(&mut self, expr_id: ExprId) {
        let Some(next) = self.program.expr(expr_id).method_call else {
            return;
        };
        let already = match &self.program.expr(next).kind {
            ExprKind::MethodCall(data) => {
                data.method.is_some() || data.lib_method.is_some() || data.dyn_func_entry.is_some()
            }
            _ => true,
        };
        if already {
            return;
        }
        let span = self.program.expr(expr_id).span;

        if matches!(self.program.expr(expr_id).kind, ExprKind::StaticArray { .. }) {
            self.error(span, "unable to make method calls on static arrays");
            return;
        }

        let indexed = matches!(
            &self.program.expr(expr_id).kind,
            ExprKind::Variable {
                indices: Some(_),
                ..
            }
        );
        let expr = self.program.expr(expr_id);
        let ty = if indexed {
            expr.eval_type.clone()
        } else {
            expr.cast_type.clone().or_else(|| expr.eval_type.clone())
        };
        let Some(ty) = ty else {
            self.error(span, "invalid class type or assignment");
            return;
        };
        let dimension = if indexed { 0 } else { ty.dimension };

        let receiver = self.receiver_class_for_type(&ty, dimension);
        if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(next).kind {
            slot.is_enum_call = receiver.is_enum_call;
        }
        if let Some(klass) = receiver.class {
            self.analyze_method_call_on_class(klass, next, true, receiver.encoding);
        } else if let Some(lib_klass) = receiver.lib_class {
            self.analyze_method_call_on_lib_class(lib_klass, next, true, receiver.encoding, false);
        } else {
            self.error(span, "invalid class type or assignment");
        }
    }

    // ----- program-class resolution -----

    pub(crate) fn analyze_method_call_on_class(
        &mut self,
        klass: ClassId,
        call_id: ExprId,
        is_expr: bool,
        encoding: String,
    ) {
        let data = match &self.program.expr(call_id).kind {
            ExprKind::MethodCall(data) => data.clone(),
            _ => return,
        };
        let span = self.program.expr(call_id).span;

        self.analyze_expressions(&data.params);

        let mut method = self.resolve_method_call(klass, &data);

        // basic-type wrappers use string-encoded keys
        if method.is_none() {
            let encoded_params = self.encode_method_call(&data.params);
            let encoded = format!(
                "{}:{}:{}{}",
                self.program.class(klass).name,
                data.method_name,
                encoding,
                encoded_params
            );
            method = self.program.class(klass).method_map.get(&encoded).copied();
        }

        let Some(method_id) = method else {
            // walk to the parent, remembering the written-against class
            if let Some(parent) = self.program.class(klass).parent {
                self.set_original_class(call_id, klass);
                self.analyze_method_call_on_class(parent, call_id, is_expr, String::new());
                return;
            }
            if let Some(lib_parent) = self.program.class(klass).lib_parent {
                self.set_original_class(call_id, klass);
                self.analyze_method_call_on_lib_class(
                    lib_parent,
                    call_id,
                    is_expr,
                    String::new(),
                    true,
                );
                return;
            }
            self.analyze_dynamic_function_call(call_id);
            return;
        };

        // install the implicit casts the chosen overload implies
        let declarations = self.program.method(method_id).declarations.clone();
        if declarations.len() != data.params.len() && !self.is_system {
            self.error(span, "invalid method call context");
            return;
        }
        for (param, declaration) in data.params.iter().zip(&declarations) {
            let (entry_id, _) = self.declaration_entry(*declaration);
            let declared = self.program.entry(entry_id).ty.clone();
            let tail = self.chain_tail(*param);
            let scalar = self.is_scalar(tail);
            self.analyze_right_cast_expr(&declared, tail, scalar);
        }

        // visibility
        let method = self.program.method(method_id);
        let method_kind = method.kind;
        let method_static = method.is_static;
        let method_return = method.return_type.clone();
        let caller_class = self.current_class;
        if method_kind.is_private() && !method_static && Some(klass) != caller_class {
            let accessible = caller_class
                .map(|current| self.class_has_ancestor(current, klass))
                .unwrap_or(false);
            if !accessible {
                self.error(span, "cannot reference a private method from this context");
            }
        }

        // static context
        if !is_expr && self.invalid_static_call(&data, method_static, method_kind) {
            self.error(span, "cannot reference an instance method from this context");
        }

        // virtual classes cannot be instantiated
        if method_kind.is_constructor()
            && self.program.class(klass).is_virtual()
            && caller_class
                .map(|current| self.program.class(current).parent != Some(klass))
                .unwrap_or(true)
        {
            self.error(span, "cannot create an instance of a virtual class");
        }

        self.program.class_mut(klass).called = true;
        self.set_original_class(call_id, klass);
        if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
            slot.method = Some(method_id);
        }
        self.set_eval(call_id, method_return.clone(), true);
        if let Some(next) = self.program.expr(call_id).method_call {
            self.set_eval(next, method_return, false);
        }
        self.analyze_expression_method_call(call_id);
    }

    fn set_original_class(&mut self, call_id: ExprId, klass: ClassId) {
        if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
            if slot.original_class.is_none() && slot.original_lib_class.is_none() {
                slot.original_class = Some(klass);
            }
        }
    }

    fn class_has_ancestor(&self, class_id: ClassId, ancestor: ClassId) -> bool {
        let mut current = self.program.class(class_id).parent;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.program.class(parent).parent;
        }
        false
    }

    fn invalid_static_call(
        &self,
        data: &MethodCallData,
        target_static: bool,
        target_kind: MethodKind,
    ) -> bool {
        if target_static || target_kind.is_constructor() {
            return false;
        }
        if data.variable_name.is_empty() {
            // same-class call: instance methods need an instance
            return self
                .current_method
                .map(|method| self.program.method(method).is_static)
                .unwrap_or(false);
        }
        // class-named receiver without a variable entry is a static context
        data.entry.is_none() && data.variable.is_none() && self.get_entry(&data.variable_name).is_none()
    }

    /// Scores every candidate overload; minimal score sum wins, exactness
    /// breaking ties.
    fn resolve_method_call(&mut self, klass: ClassId, data: &MethodCallData) -> Option<MethodId> {
        let candidates = self
            .program
            .class(klass)
            .unqualified_methods
            .get(&data.method_name)
            .cloned()
            .unwrap_or_default();

        let mut best: Option<(MethodId, i32, usize)> = None;
        for candidate in candidates {
            let declarations = self.program.method(candidate).declarations.clone();
            if declarations.len() != data.params.len() {
                continue;
            }
            let mut total = 0;
            let mut exact = 0usize;
            let mut valid = true;
            for (param, declaration) in data.params.iter().zip(&declarations) {
                let (entry_id, _) = self.declaration_entry(*declaration);
                let declared = self.program.entry(entry_id).ty.clone();
                match self.match_calling_parameter(*param, &declared) {
                    MATCH_NONE => {
                        valid = false;
                        break;
                    }
                    score => {
                        total += score;
                        if score == MATCH_EXACT {
                            exact += 1;
                        }
                    }
                }
            }
            if !valid {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, best_total, best_exact)) => {
                    total < *best_total || (total == *best_total && exact > *best_exact)
                }
            };
            if better {
                best = Some((candidate, total, exact));
            }
        }
        best.map(|(method, _, _)| method)
    }

    /// The pure scoring function from calling argument to declared
    /// parameter.
    pub(crate) fn match_calling_parameter(&mut self, param: ExprId, method_type: &Type) -> i32 {
        let Some(calling_type) = self.get_expression_type(param) else {
            return MATCH_NONE;
        };

        if !self.is_scalar(param) {
            if calling_type.kind == method_type.kind {
                if calling_type.kind == TypeKind::Class {
                    if self.class_enum_parameter_match(&calling_type, method_type)
                        && calling_type.dimension == method_type.dimension
                    {
                        return MATCH_EXACT;
                    }
                    return MATCH_NONE;
                }
                if calling_type.dimension == method_type.dimension {
                    return MATCH_EXACT;
                }
            }
            return MATCH_NONE;
        }

        // exact scalar match over the basic kinds
        if calling_type.kind != TypeKind::Class
            && method_type.kind != TypeKind::Class
            && calling_type.kind != TypeKind::Func
            && method_type.kind != TypeKind::Func
            && method_type.dimension == 0
            && calling_type.kind == method_type.kind
        {
            return MATCH_EXACT;
        }

        if method_type.dimension != 0 {
            return MATCH_NONE;
        }

        match calling_type.kind {
            TypeKind::Nil => {
                if method_type.kind == TypeKind::Class {
                    MATCH_WIDENING
                } else {
                    MATCH_NONE
                }
            }
            TypeKind::Bool => {
                if method_type.kind == TypeKind::Bool {
                    MATCH_EXACT
                } else {
                    MATCH_NONE
                }
            }
            TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float => {
                match method_type.kind {
                    TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float => {
                        MATCH_WIDENING
                    }
                    _ => MATCH_NONE,
                }
            }
            TypeKind::Class => {
                if method_type.kind != TypeKind::Class {
                    return MATCH_NONE;
                }
                if self.class_enum_parameter_match(&calling_type, method_type) {
                    return MATCH_EXACT;
                }
                let from_program = self.program.search_classes(&calling_type.class_name);
                let from_lib = self
                    .linker
                    .search_class_libraries(&calling_type.class_name, &self.program.uses);
                let target = self
                    .program
                    .search_classes(&method_type.class_name)
                    .map(|id| self.program.class(id).name.clone())
                    .or_else(|| {
                        self.linker
                            .search_class_libraries(&method_type.class_name, &self.program.uses)
                            .map(|id| self.linker.class(id).name.clone())
                    });
                match target {
                    Some(target_name) => {
                        if self.valid_down_cast(&target_name, from_program, from_lib) {
                            MATCH_WIDENING
                        } else {
                            MATCH_NONE
                        }
                    }
                    None => MATCH_NONE,
                }
            }
            TypeKind::Func => {
                if method_type.kind != TypeKind::Func {
                    return MATCH_NONE;
                }
                let calling_name = self.function_type_name(&calling_type);
                let method_name = self.function_type_name(method_type);
                if calling_name == method_name {
                    MATCH_EXACT
                } else {
                    MATCH_NONE
                }
            }
            _ => MATCH_NONE,
        }
    }

    fn class_enum_parameter_match(&self, calling: &Type, method: &Type) -> bool {
        let calling = self.resolve_type_names(calling.clone());
        let method = self.resolve_type_names(method.clone());
        calling.class_name == method.class_name
    }

    // ----- library-class resolution -----

    pub(crate) fn analyze_method_call_on_lib_class(
        &mut self,
        klass: LibClassId,
        call_id: ExprId,
        is_expr: bool,
        encoding: String,
        is_parent: bool,
    ) {
        let data = match &self.program.expr(call_id).kind {
            ExprKind::MethodCall(data) => data.clone(),
            _ => return,
        };

        self.analyze_expressions(&data.params);

        let mut lib_method = self.resolve_lib_method_call(klass, &data);

        // parent chain
        let mut parent_name = self.linker.class(klass).parent_name.clone();
        while lib_method.is_none() && !parent_name.is_empty() {
            let Some(parent) = self
                .linker
                .search_class_libraries(&parent_name, &self.program.uses)
            else {
                break;
            };
            lib_method = self.resolve_lib_method_call(parent, &data);
            parent_name = self.linker.class(parent).parent_name.clone();
        }

        if lib_method.is_none() {
            let encoded_params = self.encode_method_call(&data.params);
            let encoded = format!(
                "{}:{}:{}{}",
                self.linker.class(klass).name,
                data.method_name,
                encoding,
                encoded_params
            );
            lib_method = self.linker.find_method(klass, &encoded);
        }

        if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
            if slot.original_class.is_none() && slot.original_lib_class.is_none() {
                slot.original_lib_class = Some(klass);
            }
        }
        let is_virtual_receiver = self.linker.class(klass).is_virtual && !is_parent;
        self.finish_lib_method_call(lib_method, call_id, &data, is_virtual_receiver, is_expr);
    }

    fn finish_lib_method_call(
        &mut self,
        lib_method: Option<LibMethodId>,
        call_id: ExprId,
        data: &MethodCallData,
        is_virtual_receiver: bool,
        is_expr: bool,
    ) {
        let span = self.program.expr(call_id).span;
        let Some(method_id) = lib_method else {
            self.analyze_dynamic_function_call(call_id);
            return;
        };

        // install implicit casts
        let declared_types = self.linker.method(method_id).declarations.clone();
        for (param, declared) in data.params.iter().zip(&declared_types) {
            let tail = self.chain_tail(*param);
            let scalar = self.is_scalar(tail);
            self.analyze_right_cast_expr(declared, tail, scalar);
        }

        let method = self.linker.method(method_id);
        let method_kind = MethodKind::try_from_i32(method.kind).unwrap_or(MethodKind::Public);
        let method_static = method.is_static();
        let method_return = method.rtrn_type.clone();

        if method_kind.is_private() && !method_static {
            self.error(span, "cannot reference a private method from this context");
        }
        if !is_expr && self.invalid_static_call(data, method_static, method_kind) {
            self.error(span, "cannot reference an instance method from this context");
        }
        if method_kind.is_constructor() && is_virtual_receiver {
            self.error(span, "cannot create an instance of a virtual class");
        }

        self.linker.class_mut(method_id.class_id()).was_called = true;
        if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
            slot.lib_method = Some(method_id);
        }
        self.set_eval(call_id, method_return.clone(), true);
        if let Some(next) = self.program.expr(call_id).method_call {
            self.set_eval(next, method_return, false);
        }
        self.analyze_expression_method_call(call_id);
    }

    fn resolve_lib_method_call(
        &mut self,
        klass: LibClassId,
        data: &MethodCallData,
    ) -> Option<LibMethodId> {
        let candidates = self.linker.unqualified_methods(klass, &data.method_name);

        let mut best: Option<(LibMethodId, i32, usize)> = None;
        for candidate in candidates {
            let declared_types = self.linker.method(candidate).declarations.clone();
            if declared_types.len() != data.params.len() {
                continue;
            }
            let mut total = 0;
            let mut exact = 0usize;
            let mut valid = true;
            for (param, declared) in data.params.iter().zip(&declared_types) {
                match self.match_calling_parameter(*param, declared) {
                    MATCH_NONE => {
                        valid = false;
                        break;
                    }
                    score => {
                        total += score;
                        if score == MATCH_EXACT {
                            exact += 1;
                        }
                    }
                }
            }
            if !valid {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, best_total, best_exact)) => {
                    total < *best_total || (total == *best_total && exact > *best_exact)
                }
            };
            if better {
                best = Some((candidate, total, exact));
            }
        }
        best.map(|(method, _, _)| method)
    }

    // ----- dynamic function calls -----

    /// A variable of function type called directly; the call's actual types
    /// must match the declared structural encoding.
    pub(crate) fn analyze_dynamic_function_call(&mut self, call_id: ExprId) {
        let data = match &self.program.expr(call_id).kind {
            ExprKind::MethodCall(data) => data.clone(),
            _ => return,
        };
        let span = self.program.expr(call_id).span;

        let entry = self.get_entry(&data.method_name);
        let is_func = entry
            .map(|entry_id| self.program.entry(entry_id).ty.kind == TypeKind::Func)
            .unwrap_or(false);
        if !is_func {
            let name = if data.method_name.is_empty() {
                data.variable_name.clone()
            } else {
                data.method_name.clone()
            };
            self.error(
                span,
                &format!("undefined function/method call: '{}(..)'", name),
            );
            return;
        }
        let entry_id = entry.expect("checked above");

        // first contact synthesizes the encoded identity
        let mut ty = self.program.entry(entry_id).ty.clone();
        if ty.class_name.is_empty() {
            ty = self.resolve_type_names(ty);
        }
        let declared_params = {
            let name = &ty.class_name;
            match (name.find('('), name.rfind(')')) {
                (Some(start), Some(end)) if start < end => name[start + 1..end].to_string(),
                _ => String::new(),
            }
        };
        ty.func_param_count = data.params.len() as i32;
        self.program.entry_mut(entry_id).ty = ty.clone();

        let call_params = self.encode_method_call(&data.params);
        if declared_params != call_params {
            self.error(
                span,
                &format!("undefined function/method call: '{}(..)'", data.method_name),
            );
        }

        let rtrn = self.function_return_type(&ty);
        if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
            slot.dyn_func_entry = Some(entry_id);
        }
        self.set_eval(call_id, rtrn.clone(), true);
        if let Some(next) = self.program.expr(call_id).method_call {
            self.set_eval(next, rtrn, false);
        }
        self.analyze_expression_method_call(call_id);
    }

    pub(crate) fn function_return_type(&self, ty: &Type) -> Type {
        if let Some(rtrn) = ty.func_return.as_deref() {
            return rtrn.clone();
        }
        match ty.class_name.rfind('~') {
            Some(pos) => crate::types::decode_return(&ty.class_name[pos + 1..]),
            None => Type::basic(TypeKind::Nil),
        }
    }

    // ----- function references -----

    fn analyze_function_reference_program(
        &mut self,
        klass: ClassId,
        call_id: ExprId,
        encoding: &str,
    ) {
        let data = match &self.program.expr(call_id).kind {
            ExprKind::MethodCall(data) => data.clone(),
            _ => return,
        };
        let span = self.program.expr(call_id).span;

        let func_encoding = self.encode_function_reference(&data.params);
        let encoded_name = format!(
            "{}:{}:{}{}",
            self.program.class(klass).name,
            data.method_name,
            encoding,
            func_encoding
        );

        match self.program.class(klass).method_map.get(&encoded_name).copied() {
            Some(method_id) => {
                let func_type_id = format!(
                    "m.({})~{}",
                    func_encoding,
                    self.program.method(method_id).encoded_return
                );
                let mut ty = Type::basic(TypeKind::Func);
                ty.class_name = func_type_id;
                ty.func_param_count = data.params.len() as i32;
                self.program.class_mut(klass).called = true;
                if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
                    slot.method = Some(method_id);
                }
                self.set_eval(call_id, ty, true);
            }
            None => {
                self.error(
                    span,
                    &format!("undefined function/method call: '{}(..)'", data.method_name),
                );
            }
        }
    }

    fn analyze_function_reference_library(
        &mut self,
        klass: LibClassId,
        call_id: ExprId,
        encoding: &str,
    ) {
        let data = match &self.program.expr(call_id).kind {
            ExprKind::MethodCall(data) => data.clone(),
            _ => return,
        };
        let span = self.program.expr(call_id).span;

        let func_encoding = self.encode_function_reference(&data.params);
        let encoded_name = format!(
            "{}:{}:{}{}",
            self.linker.class(klass).name,
            data.method_name,
            encoding,
            func_encoding
        );

        match self.linker.find_method(klass, &encoded_name) {
            Some(method_id) => {
                let func_type_id = format!(
                    "m.({})~{}",
                    func_encoding,
                    self.linker.method(method_id).rtrn_name
                );
                let mut ty = Type::basic(TypeKind::Func);
                ty.class_name = func_type_id;
                ty.func_param_count = data.params.len() as i32;
                self.linker.class_mut(klass).was_called = true;
                if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(call_id).kind {
                    slot.lib_method = Some(method_id);
                }
                self.set_eval(call_id, ty, true);
            }
            None => {
                self.error(
                    span,
                    &format!("undefined function/method call: '{}(..)'", data.method_name),
                );
            }
        }
    }

    /// Encodes a function reference's parameter list: the arguments are
    /// variables naming types.
    fn encode_function_reference(&mut self, params: &[ExprId]) -> String {
        let mut encoded = String::new();
        for param in params {
            let (name, indices) = match &self.program.expr(*param).kind {
                ExprKind::Variable { name, indices, .. } => (name.clone(), indices.clone()),
                _ => {
                    // induce a mismatch
                    encoded.push('#');
                    continue;
                }
            };
            let ty = match name.as_str() {
                "Bool" => {
                    encoded.push('l');
                    Type::basic(TypeKind::Bool)
                }
                "Byte" => {
                    encoded.push('b');
                    Type::basic(TypeKind::Byte)
                }
                "Char" => {
                    encoded.push('c');
                    Type::basic(TypeKind::Char)
                }
                "Int" => {
                    encoded.push('i');
                    Type::basic(TypeKind::Int)
                }
                "Float" => {
                    encoded.push('f');
                    Type::basic(TypeKind::Float)
                }
                "Nil" => {
                    encoded.push('n');
                    Type::basic(TypeKind::Nil)
                }
                other => {
                    encoded.push_str("o.");
                    let resolved = self.resolve_type_names(Type::class(other));
                    encoded.push_str(&resolved.class_name);
                    resolved
                }
            };
            let mut ty = ty;
            if let Some(indices) = &indices {
                ty.dimension = indices.len() as u32;
                for _ in indices {
                    encoded.push('*');
                }
            }
            self.set_eval(*param, ty, true);
            encoded.push(',');
        }
        encoded
    }

    // ----- encodings -----

    /// Encodes the calling parameters the way method keys store them.
    pub(crate) fn encode_method_call(&mut self, params: &[ExprId]) -> String {
        let mut encoded = String::new();
        for param in params {
            let tail = self.chain_tail(*param);
            let expr = self.program.expr(tail);
            let ty = expr.cast_type.clone().or_else(|| expr.eval_type.clone());
            if let Some(ty) = ty {
                encoded.push_str(&ty.encode_base());
                if !self.is_scalar(*param) {
                    for _ in 0..ty.dimension {
                        encoded.push('*');
                    }
                }
                encoded.push(',');
            }
        }
        encoded
    }

    pub(crate) fn chain_tail(&self, expr_id: ExprId) -> ExprId {
        let mut id = expr_id;
        while let Some(next) = self.program.expr(id).method_call {
            id = next;
        }
        id
    }
}

#[derive(Default)]
struct ReceiverClasses {
    class: Option<ClassId>,
    lib_class: Option<LibClassId>,
    encoding: String,
    is_enum_call: bool,
}

impl Type {
    /// Encoding without dimension markers, used when the context supplies
    /// them.
    fn encode_base(&self) -> String {
        let undimensioned = Type {
            dimension: 0,
            ..self.clone()
        };
        undimensioned.encode()
    }
}
