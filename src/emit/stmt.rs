//! Statement lowering: control flow, assignments, select dispatch, critical
//! sections, and trap directives.

use super::Emitter;
use crate::ast::*;
use crate::instr::{Instruction, MemCtx, Opcode, Trap};
use crate::types::TypeKind;

/// Label count at which select dispatch switches from an equality cascade to
/// a balanced comparison tree.
const SELECT_TREE_THRESHOLD: usize = 4;

impl Emitter {
    pub(crate) fn emit_statement(&mut self, stmt_id: StmtId) {
        self.cur_line = self.program.stmt(stmt_id).span.line;
        match self.program.stmt(stmt_id).kind.clone() {
            StmtKind::Empty => {}
            StmtKind::Declaration { assignment, .. } => {
                if let Some(assignment) = assignment {
                    self.emit_statement(assignment);
                }
            }
            StmtKind::Assignment { .. } => self.emit_assignment(stmt_id),
            StmtKind::MethodCall(call) => self.emit_method_call_statement(call),
            StmtKind::Simple(expr) => {
                self.emit_expression(expr);
            }
            StmtKind::If { .. } => self.emit_if(stmt_id),
            StmtKind::While { cond, body } => self.emit_while(cond, &body),
            StmtKind::DoWhile { body, cond } => self.emit_do_while(&body, cond),
            StmtKind::For {
                pre,
                cond,
                update,
                body,
            } => self.emit_for(pre, cond, update, &body),
            StmtKind::Select { .. } => self.emit_select(stmt_id),
            StmtKind::Break => {
                let label = self.break_labels.last().copied().unwrap_or(0);
                self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, label, -1));
            }
            StmtKind::Critical { variable, body } => self.emit_critical(variable, &body),
            StmtKind::Return(expr) => {
                if let Some(expr) = expr {
                    self.emit_expression(expr);
                }
                self.emit(Instruction::new(self.cur_line, Opcode::Rtrn));
            }
            StmtKind::System(directive) => self.emit_system_directive(directive),
        }
    }

    // ----- control flow -----

    fn emit_if(&mut self, stmt_id: StmtId) {
        let (arms, else_block) = match self.program.stmt(stmt_id).kind.clone() {
            StmtKind::If { arms, else_block } => (arms, else_block),
            _ => return,
        };

        let end_label = self.next_unconditional_label();
        let mut next_label = self.next_conditional_label();

        for (index, (cond, block)) in arms.iter().enumerate() {
            self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, next_label));
            self.emit_expression(*cond);

            let last_arm = index + 1 == arms.len();
            let fail_label = if last_arm && else_block.is_none() {
                end_label
            } else {
                next_label = self.next_conditional_label();
                next_label
            };
            self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, fail_label, 0));

            for stmt in block {
                self.emit_statement(*stmt);
            }
            self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, end_label, -1));
        }

        if let Some(block) = else_block {
            self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, next_label));
            for stmt in &block {
                self.emit_statement(*stmt);
            }
        }
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, end_label));
    }

    fn emit_while(&mut self, cond: ExprId, body: &[StmtId]) {
        let top = self.next_unconditional_label();
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, top));
        self.emit_expression(cond);

        let break_label = self.next_conditional_label();
        self.break_labels.push(break_label);
        self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, break_label, 0));

        for stmt in body {
            self.emit_statement(*stmt);
        }
        self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, top, -1));

        let break_label = self.break_labels.pop().unwrap_or(break_label);
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, break_label));
    }

    fn emit_do_while(&mut self, body: &[StmtId], cond: ExprId) {
        let top = self.next_conditional_label();
        let break_label = self.next_unconditional_label();
        self.break_labels.push(break_label);

        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, top));
        for stmt in body {
            self.emit_statement(*stmt);
        }
        self.emit_expression(cond);
        self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, top, 1));

        let break_label = self.break_labels.pop().unwrap_or(break_label);
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, break_label));
    }

    fn emit_for(&mut self, pre: StmtId, cond: ExprId, update: StmtId, body: &[StmtId]) {
        self.emit_statement(pre);

        let top = self.next_unconditional_label();
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, top));
        self.emit_expression(cond);

        let break_label = self.next_conditional_label();
        self.break_labels.push(break_label);
        self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, break_label, 0));

        for stmt in body {
            self.emit_statement(*stmt);
        }
        self.emit_statement(update);
        self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, top, -1));

        let break_label = self.break_labels.pop().unwrap_or(break_label);
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, break_label));
    }

    fn emit_critical(&mut self, variable: ExprId, body: &[StmtId]) {
        self.emit_variable(variable);
        self.emit(Instruction::new(self.cur_line, Opcode::CriticalStart));
        for stmt in body {
            self.emit_statement(*stmt);
        }
        self.emit_variable(variable);
        self.emit(Instruction::new(self.cur_line, Opcode::CriticalEnd));
    }

    // ----- select -----

    fn emit_select(&mut self, stmt_id: StmtId) {
        let (expr, branches, other, labels) = match self.program.stmt(stmt_id).kind.clone() {
            StmtKind::Select {
                expr,
                branches,
                other,
                labels,
            } => (expr, branches, other, labels),
            _ => return,
        };

        if labels.len() >= SELECT_TREE_THRESHOLD {
            self.emit_select_tree(expr, &branches, other.as_deref(), &labels);
        } else {
            self.emit_select_cascade(expr, &branches, other.as_deref(), &labels);
        }
    }

    /// Up to three labels: a chain of equality tests.
    fn emit_select_cascade(
        &mut self,
        expr: ExprId,
        branches: &[(Vec<ExprId>, Vec<StmtId>)],
        other: Option<&[StmtId]>,
        labels: &[(i32, usize)],
    ) {
        let end_label = self.next_unconditional_label();
        let branch_labels: Vec<i32> = branches
            .iter()
            .map(|_| self.next_conditional_label())
            .collect();
        let other_label = other.map(|_| self.next_conditional_label());

        for (value, branch_index) in labels {
            self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, *value));
            self.emit_expression(expr);
            self.emit(Instruction::new(self.cur_line, Opcode::EqlInt));
            self.emit(Instruction::int2(
                self.cur_line,
                Opcode::Jmp,
                branch_labels[*branch_index],
                1,
            ));
        }
        match other_label {
            Some(label) => self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, label, -1)),
            None => self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, end_label, -1)),
        }

        for (branch_index, (_, block)) in branches.iter().enumerate() {
            self.emit(Instruction::int1(
                self.cur_line,
                Opcode::Lbl,
                branch_labels[branch_index],
            ));
            for stmt in block {
                self.emit_statement(*stmt);
            }
            self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, end_label, -1));
        }
        if let (Some(block), Some(label)) = (other, other_label) {
            self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, label));
            for stmt in block {
                self.emit_statement(*stmt);
            }
            self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, end_label, -1));
        }
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, end_label));
    }

    /// Four or more labels: a balanced comparison tree over the sorted
    /// values whose leaves dispatch to the per-label blocks.
    fn emit_select_tree(
        &mut self,
        expr: ExprId,
        branches: &[(Vec<ExprId>, Vec<StmtId>)],
        other: Option<&[StmtId]>,
        labels: &[(i32, usize)],
    ) {
        let mut sorted: Vec<(i32, usize)> = labels.to_vec();
        sorted.sort_by_key(|(value, _)| *value);

        let end_label = self.next_unconditional_label();
        let value_labels: Vec<i32> = sorted
            .iter()
            .map(|_| self.next_conditional_label())
            .collect();
        let other_label = other.map(|_| self.next_conditional_label());

        let values: Vec<i32> = sorted.iter().map(|(value, _)| *value).collect();
        let tree = self.divide(&values, 0, values.len() - 1);
        self.emit_select_node(
            &tree,
            expr,
            &values,
            &value_labels,
            other_label,
            end_label,
        );

        // per-value blocks, each reachable from exactly one leaf
        let mut branch_entry_labels: Vec<Vec<i32>> = vec![Vec::new(); branches.len()];
        for (position, (_, branch_index)) in sorted.iter().enumerate() {
            branch_entry_labels[*branch_index].push(value_labels[position]);
        }
        for (branch_index, (_, block)) in branches.iter().enumerate() {
            for label in &branch_entry_labels[branch_index] {
                self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, *label));
            }
            for stmt in block {
                self.emit_statement(*stmt);
            }
            self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, end_label, -1));
        }

        if let (Some(block), Some(label)) = (other, other_label) {
            self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, label));
            for stmt in block {
                self.emit_statement(*stmt);
            }
            self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, end_label, -1));
        }
        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, end_label));
    }

    /// Builds a balanced tree over a sorted value slice. Each internal node
    /// tests its median for equality, then splits on `LES_INT`.
    fn divide(&mut self, values: &[i32], start: usize, end: usize) -> SelectNode {
        if start == end {
            return SelectNode {
                id: self.next_conditional_label(),
                value: values[start],
                left: None,
                right: None,
            };
        }
        let middle = (end - start + 1) / 2 + start;
        let id = self.next_conditional_label();
        let left = (middle > start).then(|| Box::new(self.divide(values, start, middle - 1)));
        let right = (middle < end).then(|| Box::new(self.divide(values, middle + 1, end)));
        SelectNode {
            id,
            value: values[middle],
            left,
            right,
        }
    }

    fn emit_select_node(
        &mut self,
        node: &SelectNode,
        expr: ExprId,
        values: &[i32],
        value_labels: &[i32],
        other_label: Option<i32>,
        end_label: i32,
    ) {
        let miss = other_label.unwrap_or(end_label);
        let label_for = |value: i32| -> i32 {
            values
                .iter()
                .position(|&candidate| candidate == value)
                .map(|index| value_labels[index])
                .unwrap_or(end_label)
        };

        self.emit(Instruction::int1(self.cur_line, Opcode::Lbl, node.id));

        // equality leaf-test of this node's value
        self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, node.value));
        self.emit_expression(expr);
        self.emit(Instruction::new(self.cur_line, Opcode::EqlInt));
        self.emit(Instruction::int2(
            self.cur_line,
            Opcode::Jmp,
            label_for(node.value),
            1,
        ));

        if node.left.is_none() && node.right.is_none() {
            self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, miss, -1));
            return;
        }

        // split on less-than
        self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, node.value));
        self.emit_expression(expr);
        self.emit(Instruction::new(self.cur_line, Opcode::LesInt));
        let left_target = node.left.as_ref().map(|left| left.id).unwrap_or(miss);
        let right_target = node.right.as_ref().map(|right| right.id).unwrap_or(miss);
        self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, left_target, 1));
        self.emit(Instruction::int2(self.cur_line, Opcode::Jmp, right_target, -1));

        if let Some(left) = &node.left {
            self.emit_select_node(left, expr, values, value_labels, other_label, end_label);
        }
        if let Some(right) = &node.right {
            self.emit_select_node(right, expr, values, value_labels, other_label, end_label);
        }
    }

    // ----- system directives -----

    /// Trap directives lower to a fixed sequence: argument slots, the
    /// directive code, then the trap.
    fn emit_system_directive(&mut self, directive: i32) {
        let Ok(trap) = Trap::try_from(directive) else {
            return;
        };
        match trap {
            Trap::StdOutBool
            | Trap::StdOutByte
            | Trap::StdOutChar
            | Trap::StdOutInt
            | Trap::StdOutCharAry
            | Trap::Exit => {
                self.emit(Instruction::int2(
                    self.cur_line,
                    Opcode::LoadIntVar,
                    0,
                    MemCtx::Local.into(),
                ));
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, directive));
                self.emit(Instruction::int1(self.cur_line, Opcode::Trap, 2));
            }
            Trap::StdOutFloat => {
                self.emit(Instruction::int2(
                    self.cur_line,
                    Opcode::LoadFloatVar,
                    0,
                    MemCtx::Local.into(),
                ));
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, directive));
                self.emit(Instruction::int1(self.cur_line, Opcode::Trap, 2));
            }
            Trap::StdInString => {
                self.emit(Instruction::int2(
                    self.cur_line,
                    Opcode::LoadIntVar,
                    0,
                    MemCtx::Local.into(),
                ));
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, directive));
                self.emit(Instruction::int1(self.cur_line, Opcode::TrapRtrn, 2));
            }
            Trap::SysTime => {
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, directive));
                self.emit(Instruction::int1(self.cur_line, Opcode::TrapRtrn, 1));
            }
            Trap::LoadArySize => {
                self.emit(Instruction::int2(
                    self.cur_line,
                    Opcode::LoadIntVar,
                    0,
                    MemCtx::Local.into(),
                ));
                self.emit(Instruction::new(self.cur_line, Opcode::LoadArySize));
            }
            Trap::LoadInstUid => {
                self.emit(Instruction::new(self.cur_line, Opcode::LoadInstMem));
            }
            Trap::CpyCharStrAry
            | Trap::CpyCharStrArys
            | Trap::CpyIntStrAry
            | Trap::CpyFloatStrAry => {
                for slot in 0..3 {
                    self.emit(Instruction::int2(
                        self.cur_line,
                        Opcode::LoadIntVar,
                        slot,
                        MemCtx::Local.into(),
                    ));
                }
                self.emit(Instruction::int1(self.cur_line, Opcode::LoadIntLit, directive));
                self.emit(Instruction::int1(self.cur_line, Opcode::TrapRtrn, 4));
            }
        }
    }

    // ----- assignments -----

    fn emit_assignment(&mut self, stmt_id: StmtId) {
        let (kind, variable, value) = match self.program.stmt(stmt_id).kind.clone() {
            StmtKind::Assignment {
                kind,
                variable,
                value,
            } => (kind, variable, value),
            _ => return,
        };

        self.emit_expression(value);
        self.emit_class_cast(value);

        let (entry_id, indices) = match &self.program.expr(variable).kind {
            ExprKind::Variable { entry, indices, .. } => (*entry, indices.clone()),
            _ => return,
        };
        let Some(entry_id) = entry_id else {
            return;
        };
        let ctx = self.entry_mem_ctx(entry_id);
        let entry_ty = self.program.entry(entry_id).ty.clone();
        let slot = self.program.entry(entry_id).id;
        let is_float = entry_ty.kind == TypeKind::Float;

        if kind != AssignKind::Plain {
            // load current value, apply the operator
            self.emit_variable(variable);
            let op = match (kind, is_float) {
                (AssignKind::Add, true) => Opcode::AddFloat,
                (AssignKind::Add, false) => Opcode::AddInt,
                (AssignKind::Sub, true) => Opcode::SubFloat,
                (AssignKind::Sub, false) => Opcode::SubInt,
                (AssignKind::Mul, true) => Opcode::MulFloat,
                (AssignKind::Mul, false) => Opcode::MulInt,
                (AssignKind::Div, true) => Opcode::DivFloat,
                (AssignKind::Div, false) => Opcode::DivInt,
                (AssignKind::Plain, _) => unreachable!(),
            };
            self.emit(Instruction::new(self.cur_line, op));
        }

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
                let op = match entry_ty.kind {
                    TypeKind::Byte | TypeKind::Bool => Opcode::StorByteAryElm,
                    TypeKind::Char => Opcode::StorCharAryElm,
                    TypeKind::Float => Opcode::StorFloatAryElm,
                    _ => Opcode::StorIntAryElm,
                };
                self.emit(Instruction::int2(self.cur_line, op, dimension, ctx.into()));
            }
            None => {
                self.emit_mem_ctx_load(ctx);
                let op = match entry_ty.kind {
                    TypeKind::Float if entry_ty.dimension == 0 => Opcode::StorFloatVar,
                    TypeKind::Func => Opcode::StorFuncVar,
                    _ => Opcode::StorIntVar,
                };
                self.emit(Instruction::int2(self.cur_line, op, slot, ctx.into()));
            }
        }
        self.new_char_str_count = 0;
    }

    // ----- statement-position method calls -----

    pub(crate) fn emit_method_call_statement(&mut self, head: ExprId) {
        let data = match &self.program.expr(head).kind {
            ExprKind::MethodCall(data) => data.clone(),
            _ => return,
        };

        if data.is_func_def {
            self.emit_function_definition(head, &data);
            return;
        }
        if data.dyn_func_entry.is_some() {
            self.emit_dynamic_call_chain(head, &data);
            return;
        }

        // parameters for the whole chain, tail first
        let chain = self.call_chain(head);
        for call in chain.iter().rev() {
            self.emit_method_call_parameters(*call);
        }

        let mut is_nested = false;
        for (position, call) in chain.iter().enumerate() {
            self.emit_method_call(*call, is_nested);
            self.emit_cast(*call);

            let last = position + 1 == chain.len();
            if last {
                let orphan = self.orphan_return(*call);
                self.emit_orphan_pops(orphan);
            }
            is_nested = self.returns_object(*call);
            let has_variable = match &self.program.expr(*call).kind {
                ExprKind::MethodCall(data) => data.variable.is_some(),
                _ => false,
            };
            if !has_variable {
                self.emit_class_cast(*call);
            }
        }
    }

    pub(crate) fn call_chain(&self, head: ExprId) -> Vec<ExprId> {
        let mut chain = vec![head];
        let mut current = head;
        while let Some(next) = self.program.expr(current).method_call {
            chain.push(next);
            current = next;
        }
        chain
    }

    pub(crate) fn returns_object(&self, call_id: ExprId) -> bool {
        let data = match &self.program.expr(call_id).kind {
            ExprKind::MethodCall(data) => data,
            _ => return false,
        };
        let rtrn = if let Some(method) = data.method {
            Some(self.program.method(method).return_type.clone())
        } else {
            data.lib_method
                .map(|method| self.linker.method(method).rtrn_type.clone())
        };
        match rtrn {
            Some(ty) => ty.kind == TypeKind::Class && !self.is_enum_type(&ty),
            None => false,
        }
    }

    /// A dynamic call and its trailing chain.
    fn emit_dynamic_call_chain(&mut self, head: ExprId, data: &MethodCallData) {
        let chain = self.call_chain(head);
        for call in chain.iter().rev() {
            self.emit_method_call_parameters(*call);
        }

        self.emit_dynamic_call(head, data);
        if chain.len() == 1 {
            let orphan = self.orphan_return(head);
            self.emit_orphan_pops(orphan);
        }

        let mut is_nested = false;
        for (position, call) in chain.iter().enumerate().skip(1) {
            self.emit_method_call(*call, is_nested);
            self.emit_cast(*call);
            if position + 1 == chain.len() {
                let orphan = self.orphan_return(*call);
                self.emit_orphan_pops(orphan);
            }
            is_nested = self.returns_object(*call);
        }
    }
}

struct SelectNode {
    id: i32,
    value: i32,
    left: Option<Box<SelectNode>>,
    right: Option<Box<SelectNode>>,
}
