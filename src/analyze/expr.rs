//! Expression analysis: evaluation types, implicit numeric widening, cast
//! validation, interpolated strings, and static arrays.

use super::Analyzer;
use crate::ast::*;
use crate::sym::SymbolEntry;
use crate::types::{encode_function_type, Type, TypeKind};

impl Analyzer {
    pub(crate) fn analyze_expression(&mut self, expr_id: ExprId) {
        match self.program.expr(expr_id).kind.clone() {
            ExprKind::Nil => {
                self.set_eval(expr_id, Type::basic(TypeKind::Nil), true);
            }
            ExprKind::BoolLit(_) => {
                self.set_eval(expr_id, Type::basic(TypeKind::Bool), true);
            }
            ExprKind::ByteLit(_) => {
                self.set_eval(expr_id, Type::basic(TypeKind::Byte), true);
            }
            ExprKind::CharLit(_) => {
                self.set_eval(expr_id, Type::basic(TypeKind::Char), true);
            }
            ExprKind::IntLit(_) => {
                self.set_eval(expr_id, Type::basic(TypeKind::Int), true);
            }
            ExprKind::FloatLit(_) => {
                self.set_eval(expr_id, Type::basic(TypeKind::Float), true);
            }
            ExprKind::CharString { .. } => {
                self.analyze_character_string(expr_id);
            }
            ExprKind::StaticArray { .. } => {
                self.analyze_static_array(expr_id);
            }
            ExprKind::Variable { .. } => {
                self.analyze_variable(expr_id);
            }
            ExprKind::Calc { .. } => {
                self.analyze_calculation(expr_id);
            }
            ExprKind::Cond { .. } => {
                self.analyze_conditional(expr_id);
            }
            ExprKind::MethodCall(_) => {
                self.analyze_method_call(expr_id);
            }
        }
        self.analyze_cast(expr_id);

        // chains hanging off literal and grouped bases
        if !matches!(self.program.expr(expr_id).kind, ExprKind::MethodCall(_))
            && self.program.expr(expr_id).method_call.is_some()
        {
            self.analyze_expression_method_call(expr_id);
        }
    }

    pub(crate) fn analyze_expressions(&mut self, exprs: &[ExprId]) {
        for expr in exprs {
            self.analyze_expression(*expr);
        }
    }

    pub(crate) fn set_eval(&mut self, expr_id: ExprId, ty: Type, also_base: bool) {
        self.program.expr_mut(expr_id).set_eval_type(ty, also_base);
    }

    /// The type an expression contributes to its context: the chain tail's
    /// cast type when present, its evaluation type otherwise.
    pub(crate) fn get_expression_type(&self, expr_id: ExprId) -> Option<Type> {
        let mut id = expr_id;
        while let Some(next) = self.program.expr(id).method_call {
            id = next;
        }
        let expr = self.program.expr(id);
        expr.cast_type.clone().or_else(|| expr.eval_type.clone())
    }

    pub(crate) fn is_scalar(&self, expr_id: ExprId) -> bool {
        let mut id = expr_id;
        while let Some(next) = self.program.expr(id).method_call {
            id = next;
        }
        if let ExprKind::Variable {
            indices: Some(_), ..
        } = &self.program.expr(id).kind
        {
            return true;
        }
        self.get_expression_type(id)
            .map(|ty| ty.dimension == 0)
            .unwrap_or(true)
    }

    pub(crate) fn is_boolean_expression(&self, expr_id: ExprId) -> bool {
        self.get_expression_type(expr_id)
            .map(|ty| ty.kind == TypeKind::Bool && ty.dimension == 0)
            .unwrap_or(false)
    }

    pub(crate) fn is_integer_expression(&self, expr_id: ExprId) -> bool {
        self.get_expression_type(expr_id)
            .map(|ty| match ty.kind {
                TypeKind::Byte | TypeKind::Char | TypeKind::Int => ty.dimension == 0,
                TypeKind::Class => self.is_program_or_lib_enum(&ty.class_name),
                _ => false,
            })
            .unwrap_or(false)
    }

    pub(crate) fn is_enum_expression(&self, expr_id: ExprId) -> bool {
        self.get_expression_type(expr_id)
            .map(|ty| ty.kind == TypeKind::Class && self.is_program_or_lib_enum(&ty.class_name))
            .unwrap_or(false)
    }

    // ----- variables -----

    pub(crate) fn analyze_variable(&mut self, variable_id: ExprId) {
        let (name, indices) = match &self.program.expr(variable_id).kind {
            ExprKind::Variable { name, indices, .. } => (name.clone(), indices.clone()),
            _ => return,
        };
        let entry = self.get_entry(&name);
        self.analyze_variable_with_entry(variable_id, &name, indices, entry);
    }

    pub(crate) fn analyze_variable_with_entry(
        &mut self,
        variable_id: ExprId,
        name: &str,
        indices: Option<Vec<ExprId>>,
        entry: Option<crate::sym::EntryId>,
    ) {
        let span = self.program.expr(variable_id).span;

        if let Some(entry_id) = entry {
            if self.program.search_classes(name).is_some()
                || self.program.search_enums(name).is_some()
                || self
                    .linker
                    .search_class_libraries(name, &self.program.uses)
                    .is_some()
                || self
                    .linker
                    .search_enum_libraries(name, &self.program.uses)
                    .is_some()
            {
                self.error(
                    span,
                    "variable name already used to define a class, enum or function",
                );
            }

            // associate the variable and the entry once
            if self.program.expr(variable_id).eval_type.is_none() {
                let ty = self.program.entry(entry_id).ty.clone();
                self.set_eval(variable_id, ty, true);
                if let ExprKind::Variable { entry, .. } =
                    &mut self.program.expr_mut(variable_id).kind
                {
                    *entry = Some(entry_id);
                }
                self.program.entry_mut(entry_id).variables.push(variable_id);
            }

            if let Some(indices) = indices {
                let dimension = self.program.entry(entry_id).ty.dimension;
                if dimension == indices.len() as u32 {
                    self.analyze_indices(&indices);
                } else {
                    self.error(span, "dimension size mismatch or uninitialized type");
                }
            }

            // instance data is unreachable from static methods
            let entry = self.program.entry(entry_id);
            if !entry.is_local && !entry.is_static && !entry.is_self {
                let in_static = self
                    .current_method
                    .map(|method| self.program.method(method).is_static)
                    .unwrap_or(false);
                if in_static {
                    self.error(span, "cannot reference an instance variable from this context");
                }
            }
        } else if let Some(method_id) = self.current_method {
            // first sighting: an inferred variable, narrowed at assignment
            let scope_name = format!("{}:{}", self.program.method(method_id).name, name);
            let entry_id = self.program.alloc_entry(SymbolEntry::new(
                scope_name,
                Type::basic(TypeKind::Var),
                false,
                true,
                span,
            ));
            if let Some((bundle, table)) = self.current_table {
                self.program.bundles[bundle]
                    .symbols
                    .table_mut(table)
                    .add_entry(name, entry_id);
            }
            let ty = self.program.entry(entry_id).ty.clone();
            self.set_eval(variable_id, ty, true);
            if let ExprKind::Variable { entry, .. } = &mut self.program.expr_mut(variable_id).kind {
                *entry = Some(entry_id);
            }
            self.program.entry_mut(entry_id).variables.push(variable_id);
        } else {
            self.error(span, &format!("undefined variable: '{}'", name));
        }
    }

    pub(crate) fn analyze_indices(&mut self, indices: &[ExprId]) {
        for index in indices {
            self.analyze_expression(*index);
            let span = self.program.expr(*index).span;
            if let Some(ty) = self.get_expression_type(*index) {
                match ty.kind {
                    TypeKind::Byte | TypeKind::Char | TypeKind::Int => {}
                    _ => self.error(span, "expected Byte, Char or Int class"),
                }
            }
        }
    }

    // ----- conditionals -----

    fn analyze_conditional(&mut self, expr_id: ExprId) {
        let (cond, if_expr, else_expr) = match &self.program.expr(expr_id).kind {
            ExprKind::Cond {
                cond,
                if_expr,
                else_expr,
            } => (*cond, *if_expr, *else_expr),
            _ => return,
        };
        let span = self.program.expr(expr_id).span;

        self.analyze_expression(cond);
        self.analyze_expression(if_expr);
        self.analyze_expression(else_expr);

        let if_type = self.get_expression_type(if_expr);
        let else_type = self.get_expression_type(else_expr);

        match (if_type, else_type) {
            (Some(if_type), Some(else_type)) => {
                if if_type.kind == TypeKind::Class && else_type.kind == TypeKind::Class {
                    self.analyze_class_cast(&if_type, else_expr);
                } else if if_type.kind != else_type.kind
                    || if_type.kind == TypeKind::Nil
                    || else_type.kind == TypeKind::Nil
                {
                    self.error(span, "'?' invalid type mismatch");
                }
                self.set_eval(expr_id, if_type, true);
                if let Some(method_id) = self.current_method {
                    self.program.method_mut(method_id).has_and_or = true;
                }
            }
            _ => self.error(span, "invalid 'if' statement"),
        }
    }

    // ----- interpolated strings -----

    /// Splits the raw text into literal and `{$variable}` segments, interns
    /// the literals, resolves each variable segment, and reserves the hidden
    /// `#concat#` accumulator when concatenation is needed.
    fn analyze_character_string(&mut self, expr_id: ExprId) {
        let (raw, already_processed) = match &self.program.expr(expr_id).kind {
            ExprKind::CharString { raw, segments, .. } => (raw.clone(), !segments.is_empty()),
            _ => return,
        };
        let span = self.program.expr(expr_id).span;

        if !already_processed {
            let mut segments = Vec::new();
            if raw.is_empty() {
                let id = self.program.intern_char_string("");
                segments.push(StringSegment::Literal {
                    value: String::new(),
                    id,
                });
            } else {
                let mut literal = String::new();
                let mut chars = raw.chars().peekable();
                while let Some(ch) = chars.next() {
                    if ch == '{' && chars.peek() == Some(&'$') {
                        chars.next();
                        let mut token = String::new();
                        for var_ch in chars.by_ref() {
                            if var_ch == '}' {
                                break;
                            }
                            token.push(var_ch);
                        }
                        let id = self.program.intern_char_string(&literal);
                        segments.push(StringSegment::Literal {
                            value: std::mem::take(&mut literal),
                            id,
                        });
                        match self.get_entry(&token) {
                            Some(entry) => {
                                let segment = self.analyze_string_variable(entry, span);
                                segments.push(segment);
                            }
                            None => {
                                self.error(span, &format!("undefined variable: '{}'", token))
                            }
                        }
                    } else {
                        literal.push(ch);
                    }
                }
                if !literal.is_empty() || segments.is_empty() {
                    let id = self.program.intern_char_string(&literal);
                    segments.push(StringSegment::Literal { value: literal, id });
                }
            }

            // the accumulator local, shared by every interpolation in the
            // enclosing method
            let mut concat = None;
            if segments.len() > 1 {
                if let Some(method_id) = self.current_method {
                    let scope_name =
                        format!("{}:#concat#", self.program.method(method_id).name);
                    let existing = self.get_entry("#concat#");
                    let entry_id = match existing {
                        Some(entry) => entry,
                        None => {
                            let entry = self.program.alloc_entry(SymbolEntry::new(
                                scope_name,
                                Type::class(STRING_CLASS_NAME),
                                false,
                                true,
                                span,
                            ));
                            if let Some((bundle, table)) = self.current_table {
                                self.program.bundles[bundle]
                                    .symbols
                                    .table_mut(table)
                                    .add_entry("#concat#", entry);
                            }
                            entry
                        }
                    };
                    concat = Some(entry_id);
                }
            }

            if let ExprKind::CharString {
                segments: slot,
                concat: concat_slot,
                ..
            } = &mut self.program.expr_mut(expr_id).kind
            {
                *slot = segments;
                *concat_slot = concat;
            }

            // boxing requires the string class
            if self.program.search_classes(STRING_CLASS_NAME).is_none() {
                if let Some(lib_class) = self
                    .linker
                    .search_class_libraries(STRING_CLASS_NAME, &self.program.uses)
                {
                    self.linker.class_mut(lib_class).was_called = true;
                } else {
                    self.error(span, "internal compiler error");
                }
            }
        }

        self.set_eval(expr_id, Type::class(STRING_CLASS_NAME), true);
    }

    /// Resolves a `{$x}` segment. Object segments need a `ToString` method.
    fn analyze_string_variable(
        &mut self,
        entry_id: crate::sym::EntryId,
        span: crate::span::Span,
    ) -> StringSegment {
        let ty = self.program.entry(entry_id).ty.clone();
        let mut method = None;
        let mut lib_method = None;

        if ty.kind == TypeKind::Class
            && ty.class_name != STRING_CLASS_NAME
            && !self.is_program_or_lib_enum(&ty.class_name)
        {
            let key_suffix = ":ToString:";
            if let Some(class_id) = self.program.search_classes(&ty.class_name) {
                let key = format!("{}{}", self.program.class(class_id).name, key_suffix);
                method = self.program.class(class_id).method_map.get(&key).copied();
            }
            if method.is_none() {
                if let Some(lib_class) = self
                    .linker
                    .search_class_libraries(&ty.class_name, &self.program.uses)
                {
                    let key = format!("{}{}", self.linker.class(lib_class).name, key_suffix);
                    lib_method = self.linker.find_method(lib_class, &key);
                }
            }
            if method.is_none() && lib_method.is_none() {
                self.error(
                    span,
                    &format!("class '{}' does not define 'ToString()'", ty.class_name),
                );
            }
        }

        StringSegment::Entry {
            entry: entry_id,
            method,
            lib_method,
        }
    }

    // ----- static arrays -----

    fn analyze_static_array(&mut self, expr_id: ExprId) {
        let elements = match &self.program.expr(expr_id).kind {
            ExprKind::StaticArray { elements, .. } => elements.clone(),
            _ => return,
        };
        let span = self.program.expr(expr_id).span;

        // determine shape: 1 or 2 dimensions of matching lengths
        let nested: Vec<Option<Vec<ExprId>>> = elements
            .iter()
            .map(|element| match &self.program.expr(*element).kind {
                ExprKind::StaticArray {
                    elements: inner, ..
                } => Some(inner.clone()),
                _ => None,
            })
            .collect();
        let is_nested = nested.iter().any(Option::is_some);
        if is_nested && nested.iter().any(Option::is_none) {
            self.error(span, "array element types do not match");
            return;
        }

        let (dimension, all_elements) = if is_nested {
            let lengths: Vec<usize> = nested
                .iter()
                .flatten()
                .map(|inner| inner.len())
                .collect();
            if lengths.windows(2).any(|pair| pair[0] != pair[1]) {
                self.error(span, "array dimension lengths do not match");
                return;
            }
            let flattened: Vec<ExprId> = nested.into_iter().flatten().flatten().collect();
            (2u32, flattened)
        } else {
            (1u32, elements)
        };

        let mut element_kind: Option<TypeKind> = None;
        for element in &all_elements {
            let kind = match &self.program.expr(*element).kind {
                ExprKind::IntLit(_) => TypeKind::Int,
                ExprKind::FloatLit(_) => TypeKind::Float,
                ExprKind::CharLit(_) => TypeKind::Char,
                ExprKind::CharString { .. } => TypeKind::Class,
                _ => {
                    self.error(span, "invalid type for static array");
                    return;
                }
            };
            match element_kind {
                None => element_kind = Some(kind),
                Some(existing) if existing != kind => {
                    self.error(span, "array element types do not match");
                    return;
                }
                _ => {}
            }
        }
        let Some(kind) = element_kind else {
            self.error(span, "invalid static array declaration");
            return;
        };

        // intern the flattened values
        let id = match kind {
            TypeKind::Int => {
                let values: Vec<i32> = all_elements
                    .iter()
                    .map(|element| match self.program.expr(*element).kind {
                        ExprKind::IntLit(value) => value,
                        _ => 0,
                    })
                    .collect();
                self.program.intern_int_string(values)
            }
            TypeKind::Float => {
                let values: Vec<f64> = all_elements
                    .iter()
                    .map(|element| match self.program.expr(*element).kind {
                        ExprKind::FloatLit(value) => value,
                        _ => 0.0,
                    })
                    .collect();
                self.program.intern_float_string(values)
            }
            TypeKind::Char => {
                let value: String = all_elements
                    .iter()
                    .map(|element| match self.program.expr(*element).kind {
                        ExprKind::CharLit(value) => value,
                        _ => '\0',
                    })
                    .collect();
                self.program.intern_char_string(&value)
            }
            _ => {
                for element in &all_elements {
                    self.analyze_character_string(*element);
                }
                -1
            }
        };

        let mut ty = match kind {
            TypeKind::Class => Type::class(STRING_CLASS_NAME),
            basic => Type::basic(basic),
        };
        ty.dimension = dimension;
        self.set_eval(expr_id, ty, false);

        if let ExprKind::StaticArray {
            dimension: dim_slot,
            element_kind: kind_slot,
            id: id_slot,
            ..
        } = &mut self.program.expr_mut(expr_id).kind
        {
            *dim_slot = dimension;
            *kind_slot = Some(kind);
            *id_slot = id;
        }
    }

    // ----- calculations -----

    fn analyze_calculation(&mut self, expr_id: ExprId) {
        let (op, left, right) = match &self.program.expr(expr_id).kind {
            ExprKind::Calc { op, left, right } => (*op, *left, *right),
            _ => return,
        };
        let span = self.program.expr(expr_id).span;

        self.analyze_expression(left);
        self.analyze_expression(right);
        self.analyze_calculation_cast(expr_id, left, right);

        match op {
            CalcOp::And | CalcOp::Or => {
                if !self.is_boolean_expression(left) || !self.is_boolean_expression(right) {
                    self.error(span, "invalid mathematical operation");
                }
                self.set_eval(expr_id, Type::basic(TypeKind::Bool), true);
                if let Some(method_id) = self.current_method {
                    self.program.method_mut(method_id).has_and_or = true;
                }
            }
            CalcOp::Eql | CalcOp::Neql => {
                if self.is_boolean_expression(left) != self.is_boolean_expression(right) {
                    self.error(span, "invalid mathematical operation");
                }
                self.set_eval(expr_id, Type::basic(TypeKind::Bool), true);
            }
            CalcOp::Les | CalcOp::Gtr | CalcOp::LesEql | CalcOp::GtrEql => {
                if self.is_boolean_expression(left) || self.is_boolean_expression(right) {
                    self.error(span, "invalid mathematical operation");
                } else if self.is_enum_expression(left) && self.is_enum_expression(right) {
                    self.error(span, "invalid mathematical operation");
                } else if self.operand_is_class(left) || self.operand_is_class(right) {
                    self.error(span, "invalid mathematical operation");
                } else if self.operand_is_nil(left) || self.operand_is_nil(right) {
                    self.error(span, "invalid mathematical operation");
                }
                self.set_eval(expr_id, Type::basic(TypeKind::Bool), true);
            }
            CalcOp::Mod => {
                if self.is_boolean_expression(left)
                    || self.is_boolean_expression(right)
                    || self.is_enum_expression(left)
                    || self.is_enum_expression(right)
                    || self.operand_is_class(left)
                    || self.operand_is_class(right)
                {
                    self.error(span, "invalid mathematical operation");
                }
                if self.operand_is_float(left) || self.operand_is_float(right) {
                    self.error(span, "expected Byte, Char or Int class");
                }
            }
            _ => {
                if self.is_boolean_expression(left)
                    || self.is_boolean_expression(right)
                    || self.is_enum_expression(left)
                    || self.is_enum_expression(right)
                    || self.operand_is_class(left)
                    || self.operand_is_class(right)
                {
                    self.error(span, "invalid mathematical operation");
                }
            }
        }
    }

    fn operand_is_class(&self, expr_id: ExprId) -> bool {
        self.get_expression_type(expr_id)
            .map(|ty| ty.kind == TypeKind::Class && !self.is_program_or_lib_enum(&ty.class_name))
            .unwrap_or(false)
    }

    fn operand_is_nil(&self, expr_id: ExprId) -> bool {
        self.program
            .expr(expr_id)
            .eval_type
            .as_ref()
            .map(|ty| ty.kind == TypeKind::Nil)
            .unwrap_or(false)
    }

    fn operand_is_float(&self, expr_id: ExprId) -> bool {
        self.get_expression_type(expr_id)
            .map(|ty| ty.kind == TypeKind::Float)
            .unwrap_or(false)
    }

    /// Inserts implicit widening casts between the operands and settles the
    /// expression's evaluation type on the wider side.
    fn analyze_calculation_cast(&mut self, expr_id: ExprId, left: ExprId, right: ExprId) {
        let Some(left_type) = self.get_expression_type(left) else {
            return;
        };
        let Some(right_type) = self.get_expression_type(right) else {
            return;
        };
        let span = self.program.expr(left).span;

        if !self.is_scalar(left) || !self.is_scalar(right) {
            if right_type.kind != TypeKind::Nil && left_type.kind != TypeKind::Nil {
                self.error(span, "invalid array calculation");
            }
            return;
        }

        let int_group = |kind: TypeKind| {
            matches!(kind, TypeKind::Byte | TypeKind::Char | TypeKind::Int)
        };

        match (left_type.kind, right_type.kind) {
            (TypeKind::Var, other) | (other, TypeKind::Var) => {
                let name = Type::basic(other).display();
                self.error(
                    span,
                    &format!("invalid operation using classes: Var and {}", name),
                );
            }
            (TypeKind::Nil, TypeKind::Class) | (TypeKind::Class, TypeKind::Nil) => {}
            (TypeKind::Nil, other) | (other, TypeKind::Nil) => {
                let name = Type::basic(other).display();
                self.error(
                    span,
                    &format!("invalid operation using classes: Nil and {}", name),
                );
            }
            (TypeKind::Bool, TypeKind::Bool) => {
                self.set_eval(expr_id, left_type, true);
            }
            (TypeKind::Bool, _) | (_, TypeKind::Bool) => {
                self.error(span, "invalid operation using classes: Bool and non-Bool");
            }
            (TypeKind::Float, TypeKind::Float) => {
                self.set_eval(expr_id, left_type, true);
            }
            (kind, TypeKind::Float) if int_group(kind) => {
                self.program.expr_mut(left).cast_type = Some(right_type.clone());
                self.set_eval(expr_id, right_type, true);
            }
            (TypeKind::Float, kind) if int_group(kind) => {
                self.program.expr_mut(right).cast_type = Some(left_type.clone());
                self.set_eval(expr_id, left_type, true);
            }
            (kind, other) if int_group(kind) && int_group(other) => {
                self.set_eval(expr_id, left_type, true);
            }
            (TypeKind::Class, TypeKind::Class) => {
                // object identity comparisons; enum mixes are rejected above
            }
            (TypeKind::Func, TypeKind::Func) => {
                if left_type.class_name != right_type.class_name {
                    self.error(span, "invalid operation using mismatched function references");
                }
            }
            (left_kind, right_kind) => {
                self.error(
                    span,
                    &format!(
                        "invalid operation using classes: {} and {}",
                        Type::basic(left_kind).display(),
                        Type::basic(right_kind).display()
                    ),
                );
            }
        }
    }

    // ----- assignment-position and argument-position conversions -----

    pub(crate) fn analyze_right_cast_expr(&mut self, left: &Type, expr_id: ExprId, is_scalar: bool) {
        let Some(right) = self.get_expression_type(expr_id) else {
            return;
        };
        self.analyze_right_cast(left, &right, expr_id, is_scalar);
    }

    /// Validates that `right` may flow into a slot of type `left`,
    /// installing implicit numeric conversions on the expression.
    pub(crate) fn analyze_right_cast(
        &mut self,
        left: &Type,
        right: &Type,
        expr_id: ExprId,
        is_scalar: bool,
    ) {
        let span = self.program.expr(expr_id).span;
        let int_group = |kind: TypeKind| {
            matches!(kind, TypeKind::Byte | TypeKind::Char | TypeKind::Int)
        };

        if !is_scalar {
            if left.dimension != right.dimension && right.kind != TypeKind::Nil {
                self.error(span, "dimension size mismatch");
            }
            if left.kind != right.kind && right.kind != TypeKind::Nil {
                self.error(span, "invalid array cast");
            }
            if left.kind == TypeKind::Class && right.kind == TypeKind::Class {
                self.analyze_class_cast(left, expr_id);
            }
            self.set_eval(expr_id, left.clone(), false);
            return;
        }

        match left.kind {
            TypeKind::Var => {
                if right.kind == TypeKind::Var {
                    self.error(span, "invalid operation using classes: Var and Var");
                }
            }
            TypeKind::Nil => {
                self.error(
                    span,
                    &format!("invalid cast with classes: Nil and {}", right.display()),
                );
            }
            TypeKind::Byte | TypeKind::Char | TypeKind::Int => match right.kind {
                TypeKind::Func => {
                    self.error(span, "invalid operation with a function reference");
                }
                TypeKind::Var => {
                    self.error(span, "invalid operation using an uninitialized type");
                }
                TypeKind::Nil => {
                    if left.dimension < 1 {
                        self.error(
                            span,
                            &format!("invalid cast with classes: {} and Nil", left.display()),
                        );
                    }
                }
                right_kind if int_group(right_kind) => {
                    let keep = self
                        .program
                        .expr(expr_id)
                        .eval_type
                        .as_ref()
                        .map(|ty| ty.kind != TypeKind::Float)
                        .unwrap_or(false);
                    if keep {
                        self.set_eval(expr_id, left.clone(), false);
                    }
                }
                TypeKind::Float => {
                    self.program.expr_mut(expr_id).cast_type = Some(left.clone());
                    self.set_eval(expr_id, right.clone(), false);
                }
                TypeKind::Class => {
                    if !self.is_program_or_lib_enum(&right.class_name) {
                        self.error(
                            span,
                            &format!(
                                "invalid cast with classes: {} and {}",
                                left.display(),
                                right.class_name
                            ),
                        );
                    }
                }
                TypeKind::Bool => {
                    self.error(
                        span,
                        &format!("invalid cast with classes: {} and Bool", left.display()),
                    );
                }
                _ => {}
            },
            TypeKind::Float => match right.kind {
                TypeKind::Float => {
                    let keep = self
                        .program
                        .expr(expr_id)
                        .eval_type
                        .as_ref()
                        .map(|ty| ty.kind != TypeKind::Int)
                        .unwrap_or(false);
                    if keep {
                        self.set_eval(expr_id, left.clone(), false);
                    }
                }
                right_kind if int_group(right_kind) => {
                    self.program.expr_mut(expr_id).cast_type = Some(left.clone());
                    self.set_eval(expr_id, right.clone(), false);
                }
                TypeKind::Nil => {
                    if left.dimension < 1 {
                        self.error(span, "invalid cast with classes: Float and Nil");
                    }
                }
                _ => {
                    self.error(
                        span,
                        &format!("invalid cast with classes: Float and {}", right.display()),
                    );
                }
            },
            TypeKind::Class => match right.kind {
                TypeKind::Nil => {
                    if !matches!(self.program.expr(expr_id).kind, ExprKind::Nil) {
                        self.error(
                            span,
                            &format!("invalid cast with classes: {} and Nil", left.class_name),
                        );
                    }
                }
                right_kind if int_group(right_kind) => {
                    if !self.is_program_or_lib_enum(&left.class_name) {
                        self.error(
                            span,
                            &format!(
                                "invalid cast with classes: {} and {}",
                                left.class_name,
                                right.display()
                            ),
                        );
                    }
                }
                TypeKind::Float => {
                    self.error(
                        span,
                        &format!("invalid cast with classes: {} and Float", left.class_name),
                    );
                }
                TypeKind::Class => {
                    self.analyze_class_cast(left, expr_id);
                }
                TypeKind::Bool => {
                    self.error(
                        span,
                        &format!("invalid cast with classes: {} and Bool", left.class_name),
                    );
                }
                _ => {
                    self.error(
                        span,
                        &format!(
                            "invalid cast with classes: {} and {}",
                            left.class_name,
                            right.display()
                        ),
                    );
                }
            },
            TypeKind::Bool => match right.kind {
                TypeKind::Bool => {}
                TypeKind::Nil => {
                    if left.dimension < 1 {
                        self.error(span, "invalid cast with classes: Bool and Nil");
                    }
                }
                _ => {
                    self.error(
                        span,
                        &format!("invalid cast with classes: Bool and {}", right.display()),
                    );
                }
            },
            TypeKind::Func => match right.kind {
                TypeKind::Func => {
                    let left_name = self.function_type_name(left);
                    let right_name = self.function_type_name(right);
                    if left_name != right_name {
                        self.error(
                            span,
                            &format!(
                                "invalid operation using mismatched functions: {} and {}",
                                left_name, right_name
                            ),
                        );
                    }
                }
                _ => {
                    self.error(
                        span,
                        &format!(
                            "invalid cast with classes: function reference and {}",
                            right.display()
                        ),
                    );
                }
            },
        }
    }

    /// A function type's structural identity, computing and caching the
    /// encoding on first contact.
    pub(crate) fn function_type_name(&self, ty: &Type) -> String {
        if !ty.class_name.is_empty() {
            return ty.class_name.clone();
        }
        let rtrn = ty
            .func_return
            .as_deref()
            .cloned()
            .unwrap_or_else(|| Type::basic(TypeKind::Nil));
        format!("m.{}", encode_function_type(&ty.func_params, &rtrn))
    }

    // ----- class and enum casts -----

    /// Validates a class-to-class (or enum-to-enum) conversion of
    /// `expr` into `left`, annotating the runtime check target.
    pub(crate) fn analyze_class_cast(&mut self, left: &Type, expr_id: ExprId) {
        let span = self.program.expr(expr_id).span;
        let right = self
            .program
            .expr(expr_id)
            .cast_type
            .clone()
            .or_else(|| self.program.expr(expr_id).eval_type.clone());
        let Some(right) = right else {
            return;
        };

        // enums cast only to themselves
        let left_enum = self.resolved_enum_name(&left.class_name);
        if let Some(left_enum) = left_enum {
            match self.resolved_enum_name(&right.class_name) {
                Some(right_enum) => {
                    if left_enum != right_enum {
                        self.error(
                            span,
                            &format!(
                                "invalid cast between enums: '{}' and '{}'",
                                left.class_name, right.class_name
                            ),
                        );
                    }
                }
                None => self.error(span, "invalid cast between enum and class"),
            }
            return;
        }
        if right.kind == TypeKind::Nil || matches!(self.program.expr(expr_id).kind, ExprKind::Nil) {
            return;
        }
        if self.resolved_enum_name(&right.class_name).is_some() {
            self.error(span, "invalid cast between enum and class");
            return;
        }

        let left_program = self.program.search_classes(&left.class_name);
        let left_lib = self
            .linker
            .search_class_libraries(&left.class_name, &self.program.uses);
        if left_program.is_none() && left_lib.is_none() {
            self.error(span, "invalid class, enum or method call context");
            return;
        }
        let left_name = left_program
            .map(|id| self.program.class(id).name.clone())
            .or_else(|| left_lib.map(|id| self.linker.class(id).name.clone()))
            .unwrap_or_else(|| left.class_name.clone());

        let right_program = self.program.search_classes(&right.class_name);
        let right_lib = self
            .linker
            .search_class_libraries(&right.class_name, &self.program.uses);
        if right_program.is_none() && right_lib.is_none() {
            self.error(span, "invalid cast between class, enum or Nil");
            return;
        }

        let left_is_interface = left_program
            .map(|id| self.program.class(id).is_interface())
            .or_else(|| left_lib.map(|id| self.linker.class(id).is_interface))
            .unwrap_or(false);
        let right_is_interface = right_program
            .map(|id| self.program.class(id).is_interface())
            .or_else(|| right_lib.map(|id| self.linker.class(id).is_interface))
            .unwrap_or(false);

        // downcast: the target is an ancestor or implemented interface
        let down = self.valid_down_cast(&left_name, right_program, right_lib);
        // upcast: the target is a descendant, checked at runtime
        let up = right_is_interface || self.valid_up_cast(&left_name, right_program, right_lib);

        if down || up {
            if up || left_is_interface {
                self.program.expr_mut(expr_id).to_class = left_program;
                self.program.expr_mut(expr_id).to_lib_class =
                    if left_program.is_none() { left_lib } else { None };
            }
            if let Some(class_id) = left_program {
                self.program.class_mut(class_id).called = true;
            }
            if let Some(lib_id) = left_lib {
                self.linker.class_mut(lib_id).was_called = true;
            }
            if let Some(class_id) = right_program {
                self.program.class_mut(class_id).called = true;
            }
            if let Some(lib_id) = right_lib {
                self.linker.class_mut(lib_id).was_called = true;
            }
            return;
        }

        self.program.expr_mut(expr_id).to_class = left_program;
        self.error(
            span,
            &format!(
                "invalid cast between classes: '{}' and '{}'",
                left.class_name, right.class_name
            ),
        );
    }

    fn resolved_enum_name(&self, name: &str) -> Option<String> {
        if let Some(enum_id) = self.program.search_enums(name) {
            return Some(self.program.enum_(enum_id).name.clone());
        }
        self.linker
            .search_enum_libraries(name, &self.program.uses)
            .map(|id| self.linker.enum_(id).name.clone())
    }

    /// True when `target_name` names an ancestor of `from` or an interface
    /// `from` (or an ancestor) implements.
    pub(crate) fn valid_down_cast(
        &self,
        target_name: &str,
        from_program: Option<ClassId>,
        from_lib: Option<crate::linker::LibClassId>,
    ) -> bool {
        if let Some(mut current) = from_program {
            loop {
                let class = self.program.class(current);
                if class.name == target_name {
                    return true;
                }
                for interface in &class.interfaces {
                    if self.program.class(*interface).name == target_name {
                        return true;
                    }
                }
                for lib_interface in &class.lib_interfaces {
                    if self.linker.class(*lib_interface).name == target_name {
                        return true;
                    }
                }
                if let Some(lib_parent) = class.lib_parent {
                    return self.valid_down_cast(target_name, None, Some(lib_parent));
                }
                match class.parent {
                    Some(parent) => current = parent,
                    None => return false,
                }
            }
        }

        if let Some(from_lib) = from_lib {
            let mut current = from_lib;
            loop {
                let class = self.linker.class(current);
                if class.name == target_name {
                    return true;
                }
                if class.interface_names.iter().any(|name| name == target_name) {
                    return true;
                }
                if class.parent_name.is_empty() {
                    return false;
                }
                match self.linker.search_class_libraries(&class.parent_name, &[]) {
                    Some(parent) => current = parent,
                    None => return false,
                }
            }
        }

        false
    }

    /// True when `target_name` names a descendant of `from`.
    fn valid_up_cast(
        &self,
        target_name: &str,
        from_program: Option<ClassId>,
        from_lib: Option<crate::linker::LibClassId>,
    ) -> bool {
        if let Some(from) = from_program {
            for child in &self.program.class(from).children {
                if self.program.class(*child).name == target_name
                    || self.valid_up_cast(target_name, Some(*child), None)
                {
                    return true;
                }
            }
        }
        if let Some(from) = from_lib {
            let class = self.linker.class(from);
            for child in &class.children {
                if self.program.class(*child).name == target_name
                    || self.valid_up_cast(target_name, Some(*child), None)
                {
                    return true;
                }
            }
            for lib_child in &class.lib_children {
                if self.linker.class(*lib_child).name == target_name
                    || self.valid_up_cast(target_name, None, Some(*lib_child))
                {
                    return true;
                }
            }
        }
        false
    }

    // ----- explicit casts and TypeOf -----

    pub(crate) fn analyze_cast(&mut self, expr_id: ExprId) {
        let span = self.program.expr(expr_id).span;

        if let Some(cast_type) = self.program.expr(expr_id).cast_type.clone() {
            let cast_type = self.resolve_type_names(cast_type);
            self.program.expr_mut(expr_id).cast_type = Some(cast_type.clone());

            let root_type = self
                .program
                .expr(expr_id)
                .base_type
                .clone()
                .or_else(|| self.program.expr(expr_id).eval_type.clone());

            if let Some(root) = &root_type {
                if root.kind == TypeKind::Var {
                    self.error(span, "cannot cast an uninitialized type");
                }
            }

            let is_plain_variable = matches!(
                &self.program.expr(expr_id).kind,
                ExprKind::Variable { indices: None, .. }
            );
            if let Some(root) = &root_type {
                if is_plain_variable && cast_type.dimension != root.dimension {
                    self.error(span, "dimension size mismatch");
                }
            }

            let is_method_call = matches!(
                &self.program.expr(expr_id).kind,
                ExprKind::MethodCall(data) if data.variable.is_none()
            );
            if is_method_call {
                if let Some(root) = root_type {
                    let scalar = self.is_scalar(expr_id);
                    self.analyze_right_cast(&cast_type, &root, expr_id, scalar);
                }
            } else if cast_type.kind == TypeKind::Class && is_plain_variable {
                self.analyze_class_cast(&cast_type, expr_id);
            }
        } else if let Some(type_of) = self.program.expr(expr_id).type_of.clone() {
            let eval_is_class = self
                .program
                .expr(expr_id)
                .eval_type
                .as_ref()
                .map(|ty| ty.kind == TypeKind::Class)
                .unwrap_or(false);
            if type_of.kind != TypeKind::Class || !eval_is_class {
                self.error(span, "invalid 'TypeOf' check, only complex classes are supported");
            }

            let resolved = self.resolve_type_names(type_of.clone());
            if self.program.search_classes(&resolved.class_name).is_none()
                && self
                    .linker
                    .search_class_libraries(&resolved.class_name, &self.program.uses)
                    .is_none()
            {
                self.error(
                    span,
                    &format!(
                        "invalid 'TypeOf' check, unknown class '{}'",
                        type_of.class_name
                    ),
                );
            } else {
                self.mark_called(&resolved.class_name);
            }
            self.program.expr_mut(expr_id).type_of = Some(resolved);
            self.set_eval(expr_id, Type::basic(TypeKind::Bool), true);
        }
    }
}
