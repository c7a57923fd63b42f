//! Statement analysis: declarations, assignments with `Var` narrowing,
//! control flow, select labels, critical sections, and returns.

use super::Analyzer;
use crate::ast::*;
use crate::types::TypeKind;

impl Analyzer {
    pub(crate) fn analyze_statements(&mut self, statements: &[StmtId]) {
        if let Some((bundle, table)) = self.current_table {
            self.program.bundles[bundle].symbols.table_mut(table).new_scope();
        }
        for stmt in statements {
            self.analyze_statement(*stmt);
        }
        if let Some((bundle, table)) = self.current_table {
            self.program.bundles[bundle]
                .symbols
                .table_mut(table)
                .previous_scope();
        }
    }

    pub(crate) fn analyze_statement(&mut self, stmt_id: StmtId) {
        let span = self.program.stmt(stmt_id).span;
        match self.program.stmt(stmt_id).kind.clone() {
            StmtKind::Empty | StmtKind::System(_) => {}
            StmtKind::Declaration { .. } => self.analyze_declaration(stmt_id),
            StmtKind::MethodCall(expr) => {
                self.analyze_method_call(expr);
                self.analyze_cast(expr);
            }
            StmtKind::Simple(expr) => {
                self.analyze_expression(expr);
                // a bare expression is only meaningful as a call chain
                if self.program.expr(expr).method_call.is_none()
                    && !matches!(self.program.expr(expr).kind, ExprKind::MethodCall(_))
                {
                    self.error(span, "invalid statement");
                }
            }
            StmtKind::Assignment { .. } => self.analyze_assignment(stmt_id),
            StmtKind::Return(expr) => self.analyze_return(stmt_id, expr),
            StmtKind::If { arms, else_block } => {
                for (cond, block) in &arms {
                    self.analyze_expression(*cond);
                    if !self.is_boolean_expression(*cond) {
                        let cond_span = self.program.expr(*cond).span;
                        self.error(cond_span, "expected Bool expression");
                    }
                    self.analyze_statements(block);
                }
                if let Some(block) = &else_block {
                    self.analyze_statements(block);
                }
            }
            StmtKind::While { cond, body } => {
                self.analyze_expression(cond);
                if !self.is_boolean_expression(cond) {
                    self.error(span, "expected Bool expression");
                }
                let was_in_loop = self.in_loop;
                self.in_loop = true;
                self.analyze_statements(&body);
                self.in_loop = was_in_loop;
            }
            StmtKind::DoWhile { body, cond } => {
                let was_in_loop = self.in_loop;
                self.in_loop = true;
                self.analyze_statements(&body);
                self.in_loop = was_in_loop;
                self.analyze_expression(cond);
                if !self.is_boolean_expression(cond) {
                    self.error(span, "expected Bool expression");
                }
            }
            StmtKind::For {
                pre,
                cond,
                update,
                body,
            } => {
                if let Some((bundle, table)) = self.current_table {
                    self.program.bundles[bundle].symbols.table_mut(table).new_scope();
                }
                self.analyze_statement(pre);
                self.analyze_expression(cond);
                if !self.is_boolean_expression(cond) {
                    self.error(span, "expected Bool expression");
                }
                self.analyze_statement(update);
                let was_in_loop = self.in_loop;
                self.in_loop = true;
                self.analyze_statements(&body);
                self.in_loop = was_in_loop;
                if let Some((bundle, table)) = self.current_table {
                    self.program.bundles[bundle]
                        .symbols
                        .table_mut(table)
                        .previous_scope();
                }
            }
            StmtKind::Break => {
                if !self.in_loop {
                    self.error(span, "breaks are only allowed in loops");
                }
            }
            StmtKind::Select { .. } => self.analyze_select(stmt_id),
            StmtKind::Critical { variable, body } => {
                self.analyze_expression(variable);
                let is_mutex = self
                    .get_expression_type(variable)
                    .map(|ty| {
                        ty.kind == TypeKind::Class && ty.class_name == THREAD_MUTEX_CLASS_NAME
                    })
                    .unwrap_or(false);
                if !is_mutex {
                    self.error(span, "expected ThreadMutex type");
                }
                self.analyze_statements(&body);
            }
        }
    }

    // ----- declarations -----

    pub(crate) fn analyze_parameter_declaration(&mut self, stmt_id: StmtId) {
        self.analyze_declaration(stmt_id);
    }

    pub(crate) fn analyze_declaration(&mut self, stmt_id: StmtId) {
        let span = self.program.stmt(stmt_id).span;
        let (entry_id, assignment) = match &self.program.stmt(stmt_id).kind {
            StmtKind::Declaration { entry, assignment } => (*entry, *assignment),
            _ => return,
        };

        let ty = self.program.entry(entry_id).ty.clone();
        match ty.kind {
            TypeKind::Class => {
                let resolved = self.resolve_type_names(ty);
                if self.program.search_classes(&resolved.class_name).is_none()
                    && self
                        .linker
                        .search_class_libraries(&resolved.class_name, &self.program.uses)
                        .is_none()
                    && !self.is_program_or_lib_enum(&resolved.class_name)
                {
                    self.error(
                        span,
                        &format!("undefined class or enum: '{}'", resolved.class_name),
                    );
                }
                self.program.entry_mut(entry_id).ty = resolved;
            }
            TypeKind::Func => {
                let resolved = self.resolve_type_names(ty);
                self.program.entry_mut(entry_id).ty = resolved;
            }
            _ => {}
        }

        if let Some(assignment) = assignment {
            self.analyze_statement(assignment);
        }
    }

    // ----- assignments -----

    fn analyze_assignment(&mut self, stmt_id: StmtId) {
        let (kind, variable, value) = match &self.program.stmt(stmt_id).kind {
            StmtKind::Assignment {
                kind,
                variable,
                value,
            } => (*kind, *variable, *value),
            _ => return,
        };
        let span = self.program.stmt(stmt_id).span;

        self.analyze_variable(variable);
        self.analyze_expression(value);
        let tail = self.chain_tail(value);

        // first assignment narrows an inferred variable exactly once
        let variable_is_var = self
            .program
            .expr(variable)
            .eval_type
            .as_ref()
            .map(|ty| ty.kind == TypeKind::Var)
            .unwrap_or(false);
        if variable_is_var {
            let indexed = matches!(
                &self.program.expr(variable).kind,
                ExprKind::Variable {
                    indices: Some(_),
                    ..
                }
            );
            if indexed {
                self.error(span, "invalid operation using Var type");
            }
            let entry = match &self.program.expr(variable).kind {
                ExprKind::Variable { entry, .. } => *entry,
                _ => None,
            };
            if let Some(entry_id) = entry {
                let tail_expr = self.program.expr(tail);
                let mut to_type = tail_expr
                    .cast_type
                    .clone()
                    .or_else(|| tail_expr.eval_type.clone());
                if let Some(to_type) = to_type.as_mut() {
                    // dereferencing an array element narrows to the scalar
                    if let ExprKind::Variable {
                        indices: Some(_), ..
                    } = &self.program.expr(tail).kind
                    {
                        to_type.dimension = 0;
                    }
                    if to_type.kind == TypeKind::Nil || to_type.kind == TypeKind::Var {
                        self.error(span, "invalid operation using Var type");
                    }
                    self.program.entry_mut(entry_id).ty = to_type.clone();
                    // retroactively tighten every reference
                    for reference in self.program.entry(entry_id).variables.clone() {
                        let expr = self.program.expr_mut(reference);
                        expr.eval_type = Some(to_type.clone());
                        expr.base_type = Some(to_type.clone());
                    }
                }
            }
        }

        // compound forms are numeric only
        if kind != AssignKind::Plain {
            let numeric = self
                .get_expression_type(variable)
                .map(|ty| {
                    matches!(
                        ty.kind,
                        TypeKind::Byte | TypeKind::Char | TypeKind::Int | TypeKind::Float
                    )
                })
                .unwrap_or(false);
            if !numeric {
                self.error(span, "invalid mathematical operation");
            }
        }

        if let Some(eval) = self.program.expr(variable).eval_type.clone() {
            let scalar = self.is_scalar(variable) && self.is_scalar(value);
            self.analyze_right_cast_expr(&eval, tail, scalar);
        }

        // a Nil-returning call is not a value
        if let ExprKind::MethodCall(data) = &self.program.expr(tail).kind {
            if !data.is_func_def && data.dyn_func_entry.is_none() {
                let returns_nil = data
                    .method
                    .map(|method| self.program.method(method).return_type.kind == TypeKind::Nil)
                    .or_else(|| {
                        data.lib_method
                            .map(|method| self.linker.method(method).rtrn_type.kind == TypeKind::Nil)
                    })
                    .unwrap_or(false);
                if returns_nil {
                    self.error(
                        span,
                        &format!(
                            "invalid assignment, method '{}(..)' does not return a value",
                            data.method_name
                        ),
                    );
                }
            }
        }
    }

    // ----- returns -----

    fn analyze_return(&mut self, stmt_id: StmtId, expr: Option<ExprId>) {
        let span = self.program.stmt(stmt_id).span;
        let Some(method_id) = self.current_method else {
            return;
        };
        let return_type = self.program.method(method_id).return_type.clone();

        match expr {
            Some(expr_id) => {
                self.analyze_expression(expr_id);
                let tail = self.chain_tail(expr_id);
                let scalar = self.is_scalar(expr_id) && return_type.dimension == 0;
                self.analyze_right_cast_expr(&return_type, tail, scalar);

                if return_type.kind == TypeKind::Class {
                    let resolved = self.resolve_type_names(return_type.clone());
                    if self.program.search_classes(&resolved.class_name).is_none()
                        && self
                            .linker
                            .search_class_libraries(&resolved.class_name, &self.program.uses)
                            .is_none()
                        && !self.is_program_or_lib_enum(&resolved.class_name)
                    {
                        self.error(
                            span,
                            &format!("undefined class or enum: '{}'", resolved.class_name),
                        );
                    }
                }
            }
            None => {
                if return_type.kind != TypeKind::Nil {
                    self.error(span, "invalid return statement");
                }
            }
        }

        if self.program.method(method_id).kind.is_constructor() && expr.is_some() {
            self.error(span, "cannot return value from constructor");
        }
    }

    // ----- select -----

    fn analyze_select(&mut self, stmt_id: StmtId) {
        let (expr, branches, other) = match &self.program.stmt(stmt_id).kind {
            StmtKind::Select {
                expr,
                branches,
                other,
                ..
            } => (*expr, branches.clone(), other.clone()),
            _ => return,
        };
        let span = self.program.stmt(stmt_id).span;

        self.analyze_expression(expr);
        if !self.is_integer_expression(expr) {
            self.error(span, "expected integer expression");
        }
        if branches.is_empty() {
            self.error(span, "select statement does not have labels");
        }

        // every label is a literal integer or an enum item, unique overall
        let mut labels: Vec<(i32, usize)> = Vec::new();
        for (branch_index, (label_exprs, _)) in branches.iter().enumerate() {
            for label in label_exprs {
                self.analyze_expression(*label);
                let label_span = self.program.expr(*label).span;
                let value = match &self.program.expr(*label).kind {
                    ExprKind::IntLit(value) => Some(*value),
                    ExprKind::CharLit(value) => Some(*value as i32),
                    ExprKind::MethodCall(data) => data
                        .enum_item
                        .as_ref()
                        .map(|(_, id)| *id)
                        .or_else(|| data.lib_enum_item.as_ref().map(|(_, id)| *id)),
                    _ => None,
                };
                match value {
                    Some(value) => {
                        if labels.iter().any(|(existing, _)| *existing == value) {
                            self.error(label_span, "duplicate select value");
                        } else {
                            labels.push((value, branch_index));
                        }
                    }
                    None => {
                        self.error(label_span, "expected integer literal or enum item")
                    }
                }
            }
        }
        if let StmtKind::Select { labels: slot, .. } = &mut self.program.stmt_mut(stmt_id).kind {
            *slot = labels;
        }

        for (_, block) in &branches {
            self.analyze_statements(block);
        }
        if let Some(block) = &other {
            self.analyze_statements(block);
        }
    }
}
