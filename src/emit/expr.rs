//! Postfix expression lowering: literals, variables, array elements,
//! calculations, casts, string interpolation, and the three dispatch shapes.

use super::Emitter;
use crate::ast::*;
use crate::instr::{Instruction, MemCtx, Opcode, ReturnKind, Trap};
use crate::sym::EntryId;
use crate::types::TypeKind;

impl Emitter {
    pub(crate) fn emit_expression(&mut self, expr_id: ExprId) {
        self.cur_line = self.program.expr(expr_id).span.line;

        match self.program.expr(expr_id).kind.clone() {
            ExprKind::Nil => {
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, 0));
            }
            ExprKind::BoolLit(value) => {
                self.emit(Instruction::int1(
                    self.cur_line,
                    Opcode::LoadIntLit,
                    value as i32,
                ));
            }
            ExprKind::ByteLit(value) => {
                self.emit(Instruction::int1(
                    self.cur_line,
                    Opcode::LoadIntLit,
                    value as i32,
                ));
                self.emit_cast(expr_id);
            }
            ExprKind::CharLit(value) => {
                self.emit(Instruction::int1(
                    self.cur_line,
                    Opcode::LoadCharLit,
                    value as i32,
                ));
                self.emit_cast(expr_id);
            }
            ExprKind::IntLit(value) => {
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, value));
                self.emit_cast(expr_id);
            }
            ExprKind::FloatLit(value) => {
                self.emit(Instruction::float(self.cur_line, Opcode::LoadFloatLit, value));
                self.emit_cast(expr_id);
            }
            ExprKind::CharString { .. } => {
                self.emit_character_string(expr_id);
            }
            ExprKind::StaticArray { .. } => {
                self.emit_static_array(expr_id);
            }
            ExprKind::Variable { .. } => {
                self.emit_variable(expr_id);
                self.emit_cast(expr_id);
            }
            ExprKind::Calc { op, .. } => {
                if op.is_logical() {
                    self.emit_and_or(expr_id);
                    self.emit(Instruction::int2(
                        self.cur_line,
                        Opcode::LoadIntVar,
                        0,
                        MemCtx::Local.into(),
                    ));
                } else {
                    self.emit_calculation(expr_id);
                }
            }
            ExprKind::Cond { .. } => {
                self.emit_conditional(expr_id);
            }
            ExprKind::MethodCall(_) => {
                self.emit_method_call_expression(expr_id);
                return;
            }
        }

        // chains hanging off literal bases (string interpolation results)
        if self.program.expr(expr_id).method_call.is_some() {
            let mut is_nested = matches!(
                self.program.expr(expr_id).kind,
                ExprKind::CharString { .. }
            );
            let mut current = self.program.expr(expr_id).method_call;
            while let Some(call) = current {
                self.emit_method_call_parameters(call);
                if !self.is_str_array && self.new_char_str_count > 0 {
                    let has_params = match &self.program.expr(call).kind {
                        ExprKind::MethodCall(data) => !data.params.is_empty(),
                        _ => false,
                    };
                    if has_params {
                        self.emit(Instruction::new(self.cur_line, Opcode::SwapInt));
                    }
                }
                self.new_char_str_count = 0;

                self.emit_method_call(call, is_nested);
                self.emit_cast(call);
                let has_variable = match &self.program.expr(call).kind {
                    ExprKind::MethodCall(data) => data.variable.is_some(),
                    _ => false,
                };
                if !has_variable {
                    self.emit_class_cast(call);
                }
                is_nested = self.returns_object(call);
                current = self.program.expr(call).method_call;
            }
        }
    }

    // ----- variables -----

    pub(crate) fn emit_variable(&mut self, variable_id: ExprId) {
        self.cur_line = self.program.expr(variable_id).span.line;
        let (entry_id, indices) = match &self.program.expr(variable_id).kind {
            ExprKind::Variable { entry, indices, .. } => (*entry, indices.clone()),
            _ => return,
        };
        let Some(entry_id) = entry_id else {
            return;
        };

        let entry = self.program.entry(entry_id).clone();
        if entry.is_self {
            self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
            return;
        }
        let ctx = self.entry_mem_ctx(entry_id);
        let slot = entry.id;

        match indices {
            Some(indices) => {
                let dimension = indices.len() as i32;
                for index in &indices {
                    self.emit_expression(*index);
                }
                self.emit_mem_ctx_load(ctx);
                self.emit(Instruction::int2(
                    self.cur_line,
                    Opcode::LoadIntVar,
                    slot,
                    ctx.into(),
                ));
                let op = match entry.ty.kind {
                    TypeKind::Byte | TypeKind::Bool => Opcode::LoadByteAryElm,
                    TypeKind::Char => Opcode::LoadCharAryElm,
                    TypeKind::Float => Opcode::LoadFloatAryElm,
                    _ => Opcode::LoadIntAryElm,
                };
                self.emit(Instruction::int2(self.cur_line, op, dimension, ctx.into()));
            }
            None => {
                self.emit_mem_ctx_load(ctx);
                let op = match entry.ty.kind {
                    TypeKind::Float if entry.ty.dimension == 0 => Opcode::LoadFloatVar,
                    TypeKind::Func => Opcode::LoadFuncVar,
                    _ => Opcode::LoadIntVar,
                };
                self.emit(Instruction::int2(self.cur_line, op, slot, ctx.into()));
            }
        }
    }

    // ----- casts -----

    /// Numeric conversions implied by an installed cast, and `TypeOf`
    /// checks.
    pub(crate) fn emit_cast(&mut self, expr_id: ExprId) {
        let expr = self.program.expr(expr_id);
        if let Some(cast_type) = expr.cast_type.clone() {
            let base = match &expr.kind {
                ExprKind::MethodCall(data) => {
                    if data.call_type == CallType::Enum {
                        expr.eval_type.clone()
                    } else if let Some(method) = data.method {
                        Some(self.program.method(method).return_type.clone())
                    } else if let Some(lib_method) = data.lib_method {
                        Some(self.linker.method(lib_method).rtrn_type.clone())
                    } else {
                        expr.base_type.clone()
                    }
                }
                _ => expr.base_type.clone(),
            };
            let Some(base) = base else {
                return;
            };
            match base.kind {
                TypeKind::Byte | TypeKind::Char | TypeKind::Int => {
                    if cast_type.kind == TypeKind::Float {
                        self.emit(Instruction::new(self.cur_line, Opcode::I2f));
                    }
                }
                TypeKind::Float => {
                    if cast_type.kind != TypeKind::Float {
                        self.emit(Instruction::new(self.cur_line, Opcode::F2i));
                    }
                }
                _ => {}
            }
        } else if let Some(type_of) = expr.type_of.clone() {
            let id = self
                .program
                .search_classes(&type_of.class_name)
                .map(|class| self.program.class(class).id)
                .or_else(|| {
                    self.linker
                        .search_class_libraries(&type_of.class_name, &self.program.uses)
                        .map(|class| self.linker.class(class).id)
                });
            if let Some(id) = id {
                self.emit(Instruction::int1(self.cur_line, Opcode::ObjTypeOf, id));
            }
        }
    }

    /// Runtime class-cast checks annotated by the analyzer.
    pub(crate) fn emit_class_cast(&mut self, expr_id: ExprId) {
        let expr = self.program.expr(expr_id);
        if let Some(to_class) = expr.to_class {
            if self.is_lib() {
                let name = self.program.class(to_class).name.clone();
                self.emit(Instruction::text(
                    self.cur_line,
                    Opcode::LibObjInstCast,
                    name,
                ));
            } else {
                let id = self.program.class(to_class).id;
                self.emit(Instruction::int1(self.cur_line, Opcode::ObjInstCast, id));
            }
        } else if let Some(to_lib_class) = expr.to_lib_class {
            if self.is_lib() {
                let name = self.linker.class(to_lib_class).name.clone();
                self.emit(Instruction::text(
                    self.cur_line,
                    Opcode::LibObjInstCast,
                    name,
                ));
            } else {
                let id = self.linker.class(to_lib_class).id;
                self.emit(Instruction::int1(self.cur_line, Opcode::ObjInstCast, id));
            }
        }
    }

    // ----- conditionals and short-circuit logic -----

    fn emit_conditional(&mut self, expr_id: ExprId) {
        let (cond, if_expr, else_expr) = match self.program.expr(expr_id).kind.clone() {
            ExprKind::Cond {
                cond,
                if_expr,
                else_expr,
            } => (cond, if_expr, else_expr),
            _ => return,
        };

        let end_label = self.next_unconditional_label();
        self.emit_expression(cond);
        let else_label = self.next_conditional_label();
        self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, else_label, 0));
        self.emit_expression(if_expr);
        self.emit(Instruction::int2(
            self.cur_line,
            Opcode::StorIntVar,
            0,
            MemCtx::Local.into(),
        ));
        self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, end_label, -1));
        self.new_char_str_count = 0;
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, else_label));
        self.emit_expression(else_expr);
        self.emit(Instruction::int2(
            self.cur_line,
            Opcode::StorIntVar,
            0,
            MemCtx::Local.into(),
        ));
        self.new_char_str_count = 0;
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, end_label));
        self.emit(Instruction::int2(
            self.cur_line,
            Opcode::LoadIntVar,
            0,
            MemCtx::Local.into(),
        ));
    }

    /// Short-circuit and/or through the flag slot: the right side first, a
    /// jump deciding whether the left side even evaluates.
    fn emit_and_or(&mut self, expr_id: ExprId) {
        let (op, left, right) = match self.program.expr(expr_id).kind.clone() {
            ExprKind::Calc { op, left, right } => (op, left, right),
            _ => return,
        };

        let (short_value, jump_condition) = match op {
            CalcOp::And => (0, 1),
            _ => (1, 0),
        };

        self.emit_expression(right);
        let label = self.next_conditional_label();
        self.emit(Instruction::int2(
            self.cur_line,
            Opcode::Jmp,
            label,
            jump_condition,
        ));
        self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, short_value));
        self.emit(Instruction::int2(
            self.cur_line,
            Opcode::StorIntVar,
            0,
            MemCtx::Local.into(),
        ));
        let end = self.next_unconditional_label();
        self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, end, -1));
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, label));
        self.emit_expression(left);
        self.emit(Instruction::int2(
            self.cur_line,
            Opcode::StorIntVar,
            0,
            MemCtx::Local.into(),
        ));
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, end));
    }

    // ----- calculations -----

    fn emit_calculation(&mut self, expr_id: ExprId) {
        let (op, left, right) = match self.program.expr(expr_id).kind.clone() {
            ExprKind::Calc { op, left, right } => (op, left, right),
            _ => return,
        };

        self.emit_expression(right);
        self.emit_expression(left);

        let operand_float = |emitter: &Emitter, operand: ExprId| {
            emitter
                .program
                .expr(operand)
                .eval_type
                .as_ref()
                .map(|ty| ty.kind == TypeKind::Float && ty.dimension == 0)
                .unwrap_or(false)
        };
        let compare_float = operand_float(self, left) || operand_float(self, right);
        let eval_float = self
            .program
            .expr(expr_id)
            .eval_type
            .as_ref()
            .map(|ty| ty.kind == TypeKind::Float)
            .unwrap_or(false);

        let opcode = match op {
            CalcOp::Eql => {
                if compare_float {
                    Opcode::EqlFloat
                } else {
                    Opcode::EqlInt
                }
            }
            CalcOp::Neql => {
                if compare_float {
                    Opcode::NeqlFloat
                } else {
                    Opcode::NeqlInt
                }
            }
            CalcOp::Les => {
                if compare_float {
                    Opcode::LesFloat
                } else {
                    Opcode::LesInt
                }
            }
            CalcOp::Gtr => {
                if compare_float {
                    Opcode::GtrFloat
                } else {
                    Opcode::GtrInt
                }
            }
            CalcOp::LesEql => {
                if compare_float {
                    Opcode::LesEqlFloat
                } else {
                    Opcode::LesEqlInt
                }
            }
            CalcOp::GtrEql => {
                if compare_float {
                    Opcode::GtrEqlFloat
                } else {
                    Opcode::GtrEqlInt
                }
            }
            CalcOp::Add => {
                if eval_float {
                    Opcode::AddFloat
                } else {
                    Opcode::AddInt
                }
            }
            CalcOp::Sub => {
                if eval_float {
                    Opcode::SubFloat
                } else {
                    Opcode::SubInt
                }
            }
            CalcOp::Mul => {
                if eval_float {
                    Opcode::MulFloat
                } else {
                    Opcode::MulInt
                }
            }
            CalcOp::Div => {
                if eval_float {
                    Opcode::DivFloat
                } else {
                    Opcode::DivInt
                }
            }
            CalcOp::Mod => Opcode::ModInt,
            CalcOp::Shl => Opcode::ShlInt,
            CalcOp::Shr => Opcode::ShrInt,
            CalcOp::BitAnd => Opcode::BitAndInt,
            CalcOp::BitOr => Opcode::BitOrInt,
            CalcOp::BitXor => Opcode::BitXorInt,
            CalcOp::And => Opcode::AndInt,
            CalcOp::Or => Opcode::OrInt,
        };
        self.emit(Instruction::new(self.cur_line, opcode));
        self.emit_cast(expr_id);
    }

    // ----- interpolated strings -----

    fn emit_character_string(&mut self, expr_id: ExprId) {
        let (segments, concat) = match &self.program.expr(expr_id).kind {
            ExprKind::CharString {
                segments, concat, ..
            } => (segments.clone(), *concat),
            _ => return,
        };

        for (index, segment) in segments.iter().enumerate() {
            if index == 0 {
                self.emit_string_segment(segment, concat.filter(|_| segments.len() > 1));
            } else {
                self.emit_append_segment(segment, concat);
            }
        }

        if segments.len() > 1 {
            if let Some(concat) = concat {
                let slot = self.program.entry(concat).id;
                self.emit(Instruction::int2(
                    self.cur_line,
                    Opcode::LoadIntVar,
                    slot,
                    MemCtx::Local.into(),
                ));
            }
        }
    }

    /// Builds a boxed string from a literal segment: copy the pooled
    /// characters into a fresh array and construct `System.String`.
    fn emit_string_segment(&mut self, segment: &StringSegment, concat: Option<EntryId>) {
        let StringSegment::Literal { value, id } = segment else {
            return;
        };

        if !value.is_empty() {
            let length = value.chars().count() as i32;
            self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, length));
            self.emit(Instruction::int1(self.cur_line, Opcode::NewCharAry, 1));
            self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, *id));
            self.emit(Instruction::int1(
                self.cur_line,
                Opcode::LoadIntLit,
                Trap::CpyCharStrAry.into(),
            ));
            self.emit(Instruction::int1(self.cur_line, Opcode::TrapRtrn, 3));
            self.emit_new_string_instance();
            self.emit_string_method("System.String:New:c*,");
        } else {
            self.emit_new_string_instance();
            self.emit_string_method("System.String:New:");
        }

        if let Some(concat) = concat {
            let slot = self.program.entry(concat).id;
            self.emit(Instruction::int2(
                self.cur_line,
                Opcode::StorIntVar,
                slot,
                MemCtx::Local.into(),
            ));
        }

        self.new_char_str_count += 1;
        if !self.is_str_array && self.new_char_str_count >= 2 {
            self.emit(Instruction::new(self.cur_line, Opcode::SwapInt));
            self.new_char_str_count = 0;
        }
    }

    /// Appends one segment to the accumulator through the matching
    /// `Append` overload.
    fn emit_append_segment(&mut self, segment: &StringSegment, concat: Option<EntryId>) {
        let Some(concat) = concat else {
            return;
        };
        let concat_slot = self.program.entry(concat).id;

        match segment {
            StringSegment::Literal { .. } => {
                self.emit_string_segment(segment, None);
                self.emit(Instruction::int2(
                    self.cur_line,
                    Opcode::LoadIntVar,
                    concat_slot,
                    MemCtx::Local.into(),
                ));
                self.emit_string_method("System.String:Append:o.System.String,");
            }
            StringSegment::Entry {
                entry,
                method,
                lib_method,
            } => {
                let entry_data = self.program.entry(*entry).clone();
                let ctx = self.entry_mem_ctx(*entry);
                let slot = entry_data.id;

                let append_key = match entry_data.ty.kind {
                    TypeKind::Bool => "System.String:Append:l,",
                    TypeKind::Byte => "System.String:Append:b,",
                    TypeKind::Char => "System.String:Append:c,",
                    TypeKind::Int => "System.String:Append:i,",
                    TypeKind::Float => "System.String:Append:f,",
                    TypeKind::Class => {
                        if self.is_enum_type(&entry_data.ty) {
                            "System.String:Append:i,"
                        } else {
                            "System.String:Append:o.System.String,"
                        }
                    }
                    _ => return,
                };

                // push the value
                self.emit_mem_ctx_load(ctx);
                let load_op = if entry_data.ty.kind == TypeKind::Float {
                    Opcode::LoadFloatVar
                } else {
                    Opcode::LoadIntVar
                };
                self.emit(Instruction::int2(self.cur_line, load_op, slot, ctx.into()));

                // objects stringify first
                if entry_data.ty.kind == TypeKind::Class
                    && !self.is_enum_type(&entry_data.ty)
                    && entry_data.ty.class_name != STRING_CLASS_NAME
                {
                    if let Some(method) = method {
                        if self.is_lib() {
                            let class_name = self
                                .program
                                .class(self.program.method(*method).class_id)
                                .name
                                .clone();
                            let encoded = self.program.method(*method).encoded_name.clone();
                            self.emit(Instruction::lib_call(
                                self.cur_line,
                                Opcode::LibMthdCall,
                                0,
                                class_name,
                                encoded,
                            ));
                        } else {
                            let class_id = self
                                .program
                                .class(self.program.method(*method).class_id)
                                .id;
                            let method_id = self.program.method(*method).id;
                            self.emit(Instruction::int3(
                                self.cur_line,
                                Opcode::MthdCall,
                                class_id,
                                method_id,
                                0,
                            ));
                        }
                    } else if let Some(lib_method) = lib_method {
                        if self.is_lib() {
                            let class_name =
                                self.linker.class(lib_method.class_id()).name.clone();
                            let encoded = self.linker.method(*lib_method).name.clone();
                            self.emit(Instruction::lib_call(
                                self.cur_line,
                                Opcode::LibMthdCall,
                                0,
                                class_name,
                                encoded,
                            ));
                        } else {
                            let class_id = self.linker.class(lib_method.class_id()).id;
                            let method_id = self.linker.method(*lib_method).id;
                            self.emit(Instruction::int3(
                                self.cur_line,
                                Opcode::MthdCall,
                                class_id,
                                method_id,
                                0,
                            ));
                        }
                    }
                }

                self.emit(Instruction::int2(
                    self.cur_line,
                    Opcode::LoadIntVar,
                    concat_slot,
                    MemCtx::Local.into(),
                ));
                self.emit_string_method(append_key);
                self.new_char_str_count = 0;
            }
        }
    }

    fn emit_new_string_instance(&mut self) {
        if self.is_lib() {
            self.emit(Instruction::text(
                self.cur_line,
                Opcode::LibNewObjInst,
                STRING_CLASS_NAME.to_string(),
            ));
        } else {
            let id = self
                .string_cls_program
                .map(|class| self.program.class(class).id)
                .unwrap_or_else(|| {
                    self.string_cls
                        .map(|class| self.linker.class(class).id)
                        .unwrap_or(-1)
                });
            self.emit(Instruction::int1(self.cur_line, Opcode::NewObjInst, id));
        }
    }

    /// Invokes a `System.String` method by encoded name through whichever
    /// form the target flavor requires.
    fn emit_string_method(&mut self, encoded: &str) {
        if self.is_lib() {
            self.emit(Instruction::lib_call(
                self.cur_line,
                Opcode::LibMthdCall,
                0,
                STRING_CLASS_NAME.to_string(),
                encoded.to_string(),
            ));
            return;
        }
        if let Some(class) = self.string_cls_program {
            let class_id = self.program.class(class).id;
            if let Some(&method) = self.program.class(class).method_map.get(encoded) {
                let method_id = self.program.method(method).id;
                self.emit(Instruction::int3(
                    self.cur_line,
                    Opcode::MthdCall,
                    class_id,
                    method_id,
                    0,
                ));
            }
            return;
        }
        if let Some(class) = self.string_cls {
            let class_id = self.linker.class(class).id;
            if let Some(method) = self.linker.find_method(class, encoded) {
                let method_id = self.linker.method(method).id;
                self.emit(Instruction::int3(
                    self.cur_line,
                    Opcode::MthdCall,
                    class_id,
                    method_id,
                    0,
                ));
            }
        }
    }

    // ----- static arrays -----

    fn emit_static_array(&mut self, expr_id: ExprId) {
        let (elements, dimension, element_kind, id) = match &self.program.expr(expr_id).kind {
            ExprKind::StaticArray {
                elements,
                dimension,
                element_kind,
                id,
            } => (elements.clone(), *dimension, *element_kind, *id),
            _ => return,
        };
        let Some(kind) = element_kind else {
            return;
        };

        // dimension sizes from the nested shape
        let mut sizes = vec![elements.len() as i32];
        if dimension > 1 {
            let inner = elements
                .first()
                .map(|element| match &self.program.expr(*element).kind {
                    ExprKind::StaticArray { elements, .. } => elements.len() as i32,
                    _ => 0,
                })
                .unwrap_or(0);
            sizes.push(inner);
        }

        if kind != TypeKind::Class {
            for size in sizes.iter().rev() {
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, *size));
            }
            let (new_op, copy_trap) = match kind {
                TypeKind::Float => (Opcode::NewFloatAry, Trap::CpyFloatStrAry),
                TypeKind::Char => (Opcode::NewCharAry, Trap::CpyCharStrAry),
                _ => (Opcode::NewIntAry, Trap::CpyIntStrAry),
            };
            self.emit(Instruction::int1(self.cur_line, new_op, dimension as i32));
            self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, id));
            self.emit(Instruction::int1(
                self.cur_line,
                Opcode::LoadIntLit,
                copy_trap.into(),
            ));
            self.emit(Instruction::int1(self.cur_line, Opcode::TrapRtrn, 3));
        } else {
            // string arrays: boxed literals then a gather copy
            self.is_str_array = true;
            for element in elements.iter().rev() {
                self.emit_expression(*element);
            }
            self.is_str_array = false;

            for size in &sizes {
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, *size));
            }
            self.emit(Instruction::int1(
                self.cur_line,
                Opcode::NewIntAry,
                dimension as i32,
            ));
            self.emit(Instruction::int1(
                self.cur_line,
                Opcode::LoadIntLit,
                Trap::CpyCharStrArys.into(),
            ));
            self.emit(Instruction::int1(
                self.cur_line,
                Opcode::TrapRtrn,
                elements.len() as i32 + 2,
            ));
        }
    }

    // ----- method calls -----

    /// An expression-position call chain.
    pub(crate) fn emit_method_call_expression(&mut self, head: ExprId) {
        let data = match &self.program.expr(head).kind {
            ExprKind::MethodCall(data) => data.clone(),
            _ => return,
        };

        if data.is_func_def {
            self.emit_function_definition(head, &data);
            return;
        }
        if data.dyn_func_entry.is_some() {
            let chain = self.call_chain(head);
            for call in chain.iter().rev() {
                self.emit_method_call_parameters(*call);
            }
            self.emit_dynamic_call(head, &data);

            let mut is_nested = false;
            for call in chain.iter().skip(1) {
                self.emit_method_call(*call, is_nested);
                self.emit_cast(*call);
                let has_variable = match &self.program.expr(*call).kind {
                    ExprKind::MethodCall(data) => data.variable.is_some(),
                    _ => false,
                };
                if !has_variable {
                    self.emit_class_cast(*call);
                }
                is_nested = self.returns_object(*call);
            }
            return;
        }

        let chain = self.call_chain(head);
        for call in chain.iter().rev() {
            self.emit_method_call_parameters(*call);
        }

        let mut is_nested = false;
        for call in &chain {
            self.emit_method_call(*call, is_nested);
            self.emit_cast(*call);
            let has_variable = match &self.program.expr(*call).kind {
                ExprKind::MethodCall(data) => data.variable.is_some(),
                _ => false,
            };
            if !has_variable {
                self.emit_class_cast(*call);
            }
            is_nested = self.returns_object(*call);
        }
    }

    /// Pushes one call's arguments (and allocation headers) ahead of its
    /// dispatch.
    pub(crate) fn emit_method_call_parameters(&mut self, call_id: ExprId) {
        self.cur_line = self.program.expr(call_id).span.line;
        let data = match &self.program.expr(call_id).kind {
            ExprKind::MethodCall(data) => data.clone(),
            _ => return,
        };

        match data.call_type {
            CallType::NewArray => {
                for param in &data.params {
                    self.emit_expression(*param);
                    self.emit_class_cast(*param);
                }
                self.is_new_inst = false;
            }
            CallType::Enum => {
                if let Some((_, value)) = &data.enum_item {
                    self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, *value));
                } else if let Some((_, value)) = &data.lib_enum_item {
                    self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, *value));
                } else if let Some(entry) = data.entry {
                    // self/parent field reference
                    let ctx = self.entry_mem_ctx(entry);
                    let slot = self.program.entry(entry).id;
                    let op = match self.program.entry(entry).ty.kind {
                        TypeKind::Float => Opcode::LoadFloatVar,
                        TypeKind::Func => Opcode::LoadFuncVar,
                        _ => Opcode::LoadIntVar,
                    };
                    self.emit_mem_ctx_load(ctx);
                    self.emit(Instruction::int2(self.cur_line, op, slot, ctx.into()));
                }
                self.is_new_inst = false;
            }
            CallType::NewInstance => {
                for param in &data.params {
                    self.emit_expression(*param);
                    self.emit_class_cast(*param);
                    self.new_char_str_count = 0;
                }
                if let Some(method) = data.method {
                    let class_id = self.program.method(method).class_id;
                    if self.is_lib() {
                        let name = self.program.class(class_id).name.clone();
                        self.emit(Instruction::text(self.cur_line, Opcode::LibNewObjInst, name));
                    } else {
                        let id = self.program.class(class_id).id;
                        self.emit(Instruction::int1(self.cur_line, Opcode::NewObjInst, id));
                    }
                } else if let Some(lib_method) = data.lib_method {
                    let class = lib_method.class_id();
                    if self.is_lib() {
                        let name = self.linker.class(class).name.clone();
                        self.emit(Instruction::text(self.cur_line, Opcode::LibNewObjInst, name));
                    } else {
                        let id = self.linker.class(class).id;
                        self.emit(Instruction::int1(self.cur_line, Opcode::NewObjInst, id));
                    }
                }
                self.is_new_inst = true;
            }
            _ => {
                for param in &data.params {
                    self.emit_expression(*param);
                    self.emit_class_cast(*param);
                    self.new_char_str_count = 0;
                }
                self.is_new_inst = false;
            }
        }
    }

    /// One dispatch: receiver, instance slot, then the call instruction.
    pub(crate) fn emit_method_call(&mut self, call_id: ExprId, is_nested: bool) {
        self.cur_line = self.program.expr(call_id).span.line;
        let data = match &self.program.expr(call_id).kind {
            ExprKind::MethodCall(data) => data.clone(),
            _ => return,
        };

        if data.call_type == CallType::NewArray {
            let ty = data.array_type.clone().unwrap_or_default();
            let op = match ty.kind {
                TypeKind::Byte | TypeKind::Bool => Opcode::NewByteAry,
                TypeKind::Char => Opcode::NewCharAry,
                TypeKind::Float => Opcode::NewFloatAry,
                _ => Opcode::NewIntAry,
            };
            self.emit(Instruction::int1(
                self.cur_line,
                op,
                data.params.len() as i32,
            ));
            self.new_char_str_count = 0;
            self.is_new_inst = false;
            return;
        }

        // receiver value; enum calls pushed theirs in the parameter stage
        let mut entry_loaded = false;
        if let (Some(variable), CallType::Method) = (data.variable, data.call_type) {
            self.emit_variable(variable);
            self.emit_class_cast(variable);
        } else if let (Some(entry_id), true) = (data.entry, data.call_type != CallType::Enum) {
            entry_loaded = true;
            let entry = self.program.entry(entry_id).clone();
            let ctx = self.entry_mem_ctx(entry_id);
            if entry.is_self {
                self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
            } else if entry.ty.dimension > 0 && entry.ty.kind == TypeKind::Class {
                self.emit_mem_ctx_load(ctx);
                self.emit(Instruction::int2(
                    self.cur_line,
                    Opcode::LoadIntVar,
                    entry.id,
                    ctx.into(),
                ));
                self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
            } else {
                self.emit_mem_ctx_load(ctx);
                let op = match entry.ty.kind {
                    TypeKind::Float if entry.ty.dimension == 0 => Opcode::LoadFloatVar,
                    TypeKind::Func => Opcode::LoadFuncVar,
                    _ => Opcode::LoadIntVar,
                };
                self.emit(Instruction::int2(self.cur_line, op, entry.id, ctx.into()));
            }
        }

        // instance slot for targets that need one
        if let Some(method_id) = data.method {
            let method_kind = self.program.method(method_id).kind;
            let is_plain = data.call_type == CallType::Parent
                || !method_kind.is_constructor()
                || self.current_method == Some(method_id);
            if is_plain {
                if entry_loaded {
                    if let Some(entry_id) = data.entry {
                        let ty = self.program.entry(entry_id).ty.clone();
                        let needs_instance = matches!(
                            ty.kind,
                            TypeKind::Bool
                                | TypeKind::Byte
                                | TypeKind::Char
                                | TypeKind::Int
                                | TypeKind::Float
                                | TypeKind::Func
                        ) || (ty.kind == TypeKind::Class && self.is_enum_type(&ty));
                        if needs_instance && ty.dimension == 0 {
                            self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
                        }
                    }
                } else if !is_nested && data.variable.is_none() {
                    self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
                } else if data.is_enum_call {
                    self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
                }
            } else if self.in_constructor() && method_kind.is_constructor() && !self.is_new_inst {
                self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
            }
        } else if let Some(lib_method_id) = data.lib_method {
            let method_kind = self.linker.method(lib_method_id).kind;
            let is_ctor = MethodKind::try_from_i32(method_kind)
                .map(|kind| kind.is_constructor())
                .unwrap_or(false);
            if !is_ctor {
                if entry_loaded {
                    if let Some(entry_id) = data.entry {
                        let ty = self.program.entry(entry_id).ty.clone();
                        let needs_instance = matches!(
                            ty.kind,
                            TypeKind::Bool
                                | TypeKind::Byte
                                | TypeKind::Char
                                | TypeKind::Int
                                | TypeKind::Float
                                | TypeKind::Func
                        ) || (ty.kind == TypeKind::Class && self.is_enum_type(&ty));
                        if needs_instance && ty.dimension == 0 {
                            self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
                        }
                    }
                } else if !is_nested && data.variable.is_none() {
                    self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
                } else if data.is_enum_call {
                    self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
                }
            } else if self.in_constructor() && !self.is_new_inst {
                self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
            }
        }

        // dispatch
        if let Some(method_id) = data.method {
            let method = self.program.method(method_id);
            let native = method.is_native as i32;
            if self.is_lib() {
                let class_name = self.program.class(method.class_id).name.clone();
                let encoded = method.encoded_name.clone();
                self.emit(Instruction::lib_call(
                    self.cur_line,
                    Opcode::LibMthdCall,
                    native,
                    class_name,
                    encoded,
                ));
            } else {
                let class_id = self.program.class(method.class_id).id;
                let id = method.id;
                self.emit(Instruction::int3(
                    self.cur_line,
                    Opcode::MthdCall,
                    class_id,
                    id,
                    native,
                ));
            }
        } else if let Some(lib_method_id) = data.lib_method {
            let method = self.linker.method(lib_method_id);
            let native = method.is_native as i32;
            if self.is_lib() {
                let class_name = self.linker.class(lib_method_id.class_id()).name.clone();
                let encoded = method.name.clone();
                self.emit(Instruction::lib_call(
                    self.cur_line,
                    Opcode::LibMthdCall,
                    native,
                    class_name,
                    encoded,
                ));
            } else {
                let class_id = self.linker.class(lib_method_id.class_id()).id;
                let id = method.id;
                self.emit(Instruction::int3(
                    self.cur_line,
                    Opcode::MthdCall,
                    class_id,
                    id,
                    native,
                ));
            }
        }

        self.new_char_str_count = 0;
        self.is_new_inst = false;
    }

    fn in_constructor(&self) -> bool {
        self.current_method
            .map(|method| self.program.method(method).kind.is_constructor())
            .unwrap_or(false)
    }

    /// A function reference pushes the target's method and class ids.
    pub(crate) fn emit_function_definition(&mut self, call_id: ExprId, data: &MethodCallData) {
        self.cur_line = self.program.expr(call_id).span.line;
        if let Some(method_id) = data.method {
            let method = self.program.method(method_id);
            if self.is_lib() {
                let class_name = self.program.class(method.class_id).name.clone();
                let encoded = method.encoded_name.clone();
                self.emit(Instruction::lib_call(
                    self.cur_line,
                    Opcode::LibFuncDef,
                    -1,
                    class_name,
                    encoded,
                ));
            } else {
                let id = method.id;
                let class_id = self.program.class(method.class_id).id;
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, id));
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, class_id));
            }
        } else if let Some(lib_method_id) = data.lib_method {
            let method = self.linker.method(lib_method_id);
            if self.is_lib() {
                let class_name = self.linker.class(lib_method_id.class_id()).name.clone();
                let encoded = method.name.clone();
                self.emit(Instruction::lib_call(
                    self.cur_line,
                    Opcode::LibFuncDef,
                    -1,
                    class_name,
                    encoded,
                ));
            } else {
                let id = method.id;
                let class_id = self.linker.class(lib_method_id.class_id()).id;
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, id));
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, class_id));
            }
        }
    }

    /// Dynamic dispatch through a function-typed variable.
    pub(crate) fn emit_dynamic_call(&mut self, call_id: ExprId, data: &MethodCallData) {
        self.cur_line = self.program.expr(call_id).span.line;
        let Some(entry_id) = data.dyn_func_entry else {
            return;
        };
        let entry = self.program.entry(entry_id).clone();
        let ctx = self.entry_mem_ctx(entry_id);

        self.emit_mem_ctx_load(ctx);
        self.emit(Instruction::int2(
            self.cur_line,
            Opcode::LoadFuncVar,
            entry.id,
            ctx.into(),
        ));
        self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));

        let param_count = entry.ty.func_param_count.max(0);
        let rtrn = self
            .program
            .expr(call_id)
            .eval_type
            .clone()
            .unwrap_or_default();
        let rtrn_kind = match rtrn.kind {
            TypeKind::Nil => ReturnKind::Nil,
            TypeKind::Float if rtrn.dimension == 0 => ReturnKind::Float,
            TypeKind::Func => ReturnKind::Func,
            _ => ReturnKind::Int,
        };
        self.emit(Instruction::int2(
            self.cur_line,
            Opcode::DynMthdCall,
            param_count,
            rtrn_kind.into(),
        ));
    }
}
