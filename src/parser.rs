//! Recursive-descent parser producing the decorated-later parse tree.
//!
//! Recovery is panic-mode: on an unexpected token the parser records a
//! diagnostic and skips to the next statement terminator or closing brace.

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::lexeme::Lexeme;
use crate::span::{Span, Spanned};
use crate::sym::SymbolEntry;
use crate::types::{encode_parameter_list, Type, TypeKind};

const MAX_NESTING_DEPTH: u32 = 256;

pub struct Parser<'prog> {
    program: &'prog mut Program,
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    depth: u32,
    file_name: String,
    bundle: usize,
    current_class: Option<ClassId>,
    current_class_name: String,
    current_method_name: String,
    anonymous_count: u32,
    /// True when the compiled bundle is the system bundle itself; unlocks
    /// trap directives.
    is_system: bool,
}

impl<'prog> Parser<'prog> {
    pub fn new(
        program: &'prog mut Program,
        tokens: Vec<Spanned<Lexeme>>,
        file_name: String,
    ) -> Self {
        // classes outside any bundle statement land in the default bundle
        if program.bundles.is_empty() {
            program.bundles.push(Bundle::new(String::new()));
        }
        Self {
            program,
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            depth: 0,
            file_name,
            bundle: 0,
            current_class: None,
            current_class_name: String::new(),
            current_method_name: String::new(),
            anonymous_count: 0,
            is_system: false,
        }
    }

    pub fn parse(mut self) -> Result<(), Vec<Diagnostic>> {
        while !self.at(&Lexeme::Eof) {
            if self.at(&Lexeme::Use) {
                self.advance();
                let name = self.parse_bundle_name();
                self.program.add_use(name);
                self.expect(&Lexeme::Semicolon);
            } else if self.at(&Lexeme::Bundle) {
                self.parse_bundle();
            } else if self.at(&Lexeme::Class) || self.at(&Lexeme::Interface) {
                self.bundle = 0;
                self.parse_class_or_interface(String::new());
            } else if self.at(&Lexeme::Enum) {
                self.bundle = 0;
                self.parse_enum(String::new());
            } else {
                self.error("expected 'use', 'bundle', 'class', 'interface' or 'enum'");
                self.advance();
            }
        }

        if self.diagnostics.is_empty() {
            Ok(())
        } else {
            Err(self.diagnostics)
        }
    }

    // ----- bundles, classes, enums, methods -----

    fn parse_bundle(&mut self) {
        self.advance();
        let name = self.parse_bundle_name();
        self.is_system = name == "System";
        self.bundle = match self
            .program
            .bundles
            .iter()
            .position(|bundle| bundle.name == name)
        {
            Some(index) => index,
            None => {
                self.program.bundles.push(Bundle::new(name.clone()));
                self.program.bundles.len() - 1
            }
        };
        self.expect(&Lexeme::LBrace);
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            if self.at(&Lexeme::Class) || self.at(&Lexeme::Interface) {
                self.parse_class_or_interface(name.clone());
            } else if self.at(&Lexeme::Enum) {
                self.parse_enum(name.clone());
            } else {
                self.error("expected 'class', 'interface' or 'enum'");
                self.advance();
            }
        }
        self.expect(&Lexeme::RBrace);
        self.bundle = 0;
        self.is_system = false;
    }

    fn parse_enum(&mut self, bundle_name: String) {
        let span = self.current_span();
        self.advance();
        let name = self.expect_ident();
        let qualified = qualify(&bundle_name, &name);

        let mut offset = 0;
        if self.eat(&Lexeme::Assign) {
            match self.current().clone() {
                Lexeme::IntLit(value) => {
                    offset = value;
                    self.advance();
                }
                _ => self.error("expected integer enum offset"),
            }
        }

        self.expect(&Lexeme::LBrace);
        let mut items = Vec::new();
        let mut next_id = offset;
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            let item_name = self.expect_ident();
            items.push(EnumItem {
                name: item_name,
                id: next_id,
            });
            next_id += 1;
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RBrace);

        self.program.add_enum(
            self.bundle,
            Enum {
                name: qualified,
                offset,
                items,
                span,
            },
        );
    }

    fn parse_class_or_interface(&mut self, bundle_name: String) {
        let span = self.current_span();
        let is_interface = self.at(&Lexeme::Interface);
        self.advance();
        let name = self.expect_ident();
        let qualified = qualify(&bundle_name, &name);

        let mut parent_name = String::new();
        if !is_interface && self.eat(&Lexeme::From) {
            parent_name = self.parse_bundle_name();
        }

        let mut interface_names = Vec::new();
        if !is_interface && self.eat(&Lexeme::Implements) {
            loop {
                interface_names.push(self.parse_bundle_name());
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
        }

        if self.program.search_classes(&qualified).is_some() {
            self.error(&format!("class '{}' has already been defined", qualified));
        }

        let class_id = self.program.add_class(Class::new(
            qualified.clone(),
            self.bundle,
            parent_name,
            interface_names,
            is_interface,
            self.file_name.clone(),
            span,
        ));
        self.current_class = Some(class_id);
        self.current_class_name = qualified.clone();

        // class scope with the implicit self and parent references
        self.new_parse_scope();
        let self_ty = Type::class(qualified.clone());
        let self_entry = self.alloc_entry(
            format!("{}:{}", qualified, SELF_ID),
            self_ty.clone(),
            false,
            false,
            span,
        );
        self.program.entries[self_entry.0 as usize].is_self = true;
        self.add_scope_entry(SELF_ID, self_entry);
        let parent_entry =
            self.alloc_entry(format!("{}:{}", qualified, PARENT_ID), self_ty, false, false, span);
        self.add_scope_entry(PARENT_ID, parent_entry);

        self.expect(&Lexeme::LBrace);
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            if self.at(&Lexeme::Method) || self.at(&Lexeme::Function) || self.at(&Lexeme::New) {
                self.parse_method(class_id, is_interface);
            } else if matches!(self.current(), Lexeme::Ident(_)) {
                // field declaration
                let stmt = self.parse_declaration_statement();
                self.expect(&Lexeme::Semicolon);
                self.program.class_mut(class_id).statements.push(stmt);
            } else {
                self.error("expected method, function or field declaration");
                self.advance();
            }
        }
        self.expect(&Lexeme::RBrace);

        self.previous_parse_scope(&qualified.clone());
        self.current_class = None;
        self.current_class_name.clear();
    }

    fn parse_method(&mut self, class_id: ClassId, interface: bool) {
        let span = self.current_span();
        let class_name = self.current_class_name.clone();

        let mut kind = MethodKind::Private;
        let mut is_function = false;
        let mut is_virtual = false;
        let mut is_native = false;
        let mut is_static = false;
        let simple_name;

        if self.at(&Lexeme::New) {
            self.advance();
            kind = MethodKind::NewPublic;
            if self.eat(&Lexeme::Colon) {
                if self.eat(&Lexeme::Private) {
                    kind = MethodKind::NewPrivate;
                } else {
                    self.error("expected 'private'");
                }
            }
            simple_name = "New".to_string();
        } else {
            is_function = self.at(&Lexeme::Function);
            if is_function {
                is_static = true;
                kind = MethodKind::Public;
            }
            self.advance();
            self.expect(&Lexeme::Colon);

            // qualifiers, each followed by ':'
            loop {
                if self.at(&Lexeme::Public) {
                    kind = MethodKind::Public;
                } else if self.at(&Lexeme::Private) {
                    kind = MethodKind::Private;
                } else if self.at(&Lexeme::Static) {
                    is_static = true;
                } else if self.at(&Lexeme::Virtual) {
                    if is_virtual {
                        self.error("the 'virtual' attribute has already been specified");
                    }
                    is_virtual = true;
                } else if self.at(&Lexeme::Native) {
                    is_native = true;
                } else {
                    break;
                }
                self.advance();
                self.expect(&Lexeme::Colon);
            }

            simple_name = self.expect_ident();
        }

        if is_virtual {
            let class = self.program.class_mut(class_id);
            class.flags |= ClassFlags::VIRTUAL;
        }

        let name = format!("{}:{}", class_name, simple_name);
        self.current_method_name = name.clone();

        // method scope: parameters then locals
        self.new_parse_scope();
        let (declarations, param_types) = self.parse_parameter_list(&name);

        // return type; constructors return their class
        let return_type = if kind.is_constructor() {
            Type::class(class_name.clone())
        } else {
            self.expect(&Lexeme::Tilde);
            self.parse_type()
        };

        let parse_key = format!("{}:{}", name, encode_parameter_list(&param_types));

        let statements = if is_virtual {
            if !self.expect(&Lexeme::Semicolon) {
                self.advance();
            }
            None
        } else if interface && !is_virtual {
            self.error("interface methods must be declared 'virtual'");
            Some(self.parse_statement_block())
        } else {
            Some(self.parse_statement_block())
        };

        self.previous_parse_scope(&parse_key);
        self.current_method_name.clear();

        let method = Method {
            class_id,
            name,
            encoded_name: parse_key.clone(),
            table_key: parse_key,
            encoded_return: return_type.encode(),
            kind,
            is_static,
            is_function,
            is_virtual,
            is_native,
            has_and_or: false,
            declarations,
            return_type,
            statements,
            id: -1,
            span,
        };
        let method_name = method.name.clone();
        if self.program.add_method(class_id, method).is_none() {
            self.diagnostics.push(Diagnostic::error(
                format!("method or function already overloaded '{}'", method_name),
                span,
            ));
        }
    }

    /// Parses `(name : Type, name : Type := default, ...)`. Returns the
    /// declaration statements plus the declared parameter types.
    fn parse_parameter_list(&mut self, method_name: &str) -> (Vec<StmtId>, Vec<Type>) {
        let mut declarations = Vec::new();
        let mut types = Vec::new();
        self.expect(&Lexeme::LParen);
        while !self.at(&Lexeme::RParen) && !self.at(&Lexeme::Eof) {
            let span = self.current_span();
            let param_name = self.expect_ident();
            self.expect(&Lexeme::Colon);
            let ty = self.parse_type();
            types.push(ty.clone());

            let scoped = format!("{}:{}", method_name, param_name);
            let entry = self.alloc_entry(scoped, ty, false, true, span);
            if !self.add_scope_entry(&param_name, entry) {
                self.error(&format!("variable '{}' already defined", param_name));
            }

            // trailing default value
            let assignment = if self.eat(&Lexeme::Assign) {
                let variable = self.program.alloc_expr(Expr::new(
                    ExprKind::Variable {
                        name: param_name.clone(),
                        indices: None,
                        entry: None,
                    },
                    span,
                ));
                let value = self.parse_expression();
                Some(self.program.alloc_stmt(Stmt {
                    kind: StmtKind::Assignment {
                        kind: AssignKind::Plain,
                        variable,
                        value,
                    },
                    span,
                }))
            } else {
                None
            };

            declarations.push(self.program.alloc_stmt(Stmt {
                kind: StmtKind::Declaration { entry, assignment },
                span,
            }));

            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RParen);
        (declarations, types)
    }

    fn parse_statement_block(&mut self) -> Vec<StmtId> {
        self.expect(&Lexeme::LBrace);
        let mut statements = Vec::new();
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            statements.push(self.parse_statement());
        }
        self.expect(&Lexeme::RBrace);
        statements
    }

    // ----- statements -----

    fn parse_statement(&mut self) -> StmtId {
        let span = self.current_span();
        if !self.enter_nesting() {
            self.advance();
            return self.program.alloc_stmt(Stmt {
                kind: StmtKind::Empty,
                span,
            });
        }

        let stmt = match self.current().clone() {
            Lexeme::Semicolon => {
                self.advance();
                self.program.alloc_stmt(Stmt {
                    kind: StmtKind::Empty,
                    span,
                })
            }
            Lexeme::Return => self.parse_return(),
            Lexeme::If => {
                let stmt = self.parse_if();
                self.exit_nesting();
                return stmt;
            }
            Lexeme::Do => {
                let stmt = self.parse_do_while();
                self.exit_nesting();
                return stmt;
            }
            Lexeme::While => {
                let stmt = self.parse_while();
                self.exit_nesting();
                return stmt;
            }
            Lexeme::For => {
                let stmt = self.parse_for();
                self.exit_nesting();
                return stmt;
            }
            Lexeme::Each => {
                let stmt = self.parse_each();
                self.exit_nesting();
                return stmt;
            }
            Lexeme::Select => {
                let stmt = self.parse_select();
                self.exit_nesting();
                return stmt;
            }
            Lexeme::Critical => {
                let stmt = self.parse_critical();
                self.exit_nesting();
                return stmt;
            }
            Lexeme::Break => {
                self.advance();
                let stmt = self.program.alloc_stmt(Stmt {
                    kind: StmtKind::Break,
                    span,
                });
                self.expect(&Lexeme::Semicolon);
                stmt
            }
            Lexeme::Parent => {
                self.advance();
                let params = self.parse_calling_parameters();
                let mut data =
                    MethodCallData::new(CallType::Parent, String::new(), "New".to_string(), params);
                data.original_class = None;
                let expr = self
                    .program
                    .alloc_expr(Expr::new(ExprKind::MethodCall(data), span));
                let stmt = self.program.alloc_stmt(Stmt {
                    kind: StmtKind::MethodCall(expr),
                    span,
                });
                self.expect(&Lexeme::Semicolon);
                stmt
            }
            Lexeme::Ident(ident) => {
                // trap directives only exist inside the system bundle
                if self.is_system && self.peek_is(&Lexeme::Semicolon) {
                    if let Some(trap) = crate::instr::Trap::from_directive(&ident) {
                        self.advance();
                        self.advance();
                        self.exit_nesting();
                        return self.program.alloc_stmt(Stmt {
                            kind: StmtKind::System(trap.into()),
                            span,
                        });
                    }
                }
                let stmt = self.parse_ident_statement();
                self.expect(&Lexeme::Semicolon);
                stmt
            }
            _ => {
                self.error("expected statement");
                self.synchronize();
                self.program.alloc_stmt(Stmt {
                    kind: StmtKind::Empty,
                    span,
                })
            }
        };
        self.exit_nesting();
        stmt
    }

    /// A statement opening with an identifier: declaration, assignment,
    /// compound assignment, or method call.
    fn parse_ident_statement(&mut self) -> StmtId {
        let span = self.current_span();
        let ident = self.parse_bundle_name();

        match self.current().clone() {
            Lexeme::Colon => self.parse_declaration_after_name(ident, span),
            Lexeme::Assign => {
                self.advance();
                let variable = self.alloc_variable(ident, None, span);
                let value = self.parse_expression();
                self.program.alloc_stmt(Stmt {
                    kind: StmtKind::Assignment {
                        kind: AssignKind::Plain,
                        variable,
                        value,
                    },
                    span,
                })
            }
            Lexeme::AddAssign | Lexeme::SubAssign | Lexeme::MulAssign | Lexeme::DivAssign => {
                let kind = self.compound_assign_kind();
                self.advance();
                let variable = self.alloc_variable(ident, None, span);
                let value = self.parse_expression();
                self.program.alloc_stmt(Stmt {
                    kind: StmtKind::Assignment {
                        kind,
                        variable,
                        value,
                    },
                    span,
                })
            }
            Lexeme::LBracket => {
                let indices = self.parse_indices();
                match self.current().clone() {
                    Lexeme::Assign => {
                        self.advance();
                        let variable = self.alloc_variable(ident, Some(indices), span);
                        let value = self.parse_expression();
                        self.program.alloc_stmt(Stmt {
                            kind: StmtKind::Assignment {
                                kind: AssignKind::Plain,
                                variable,
                                value,
                            },
                            span,
                        })
                    }
                    Lexeme::AddAssign
                    | Lexeme::SubAssign
                    | Lexeme::MulAssign
                    | Lexeme::DivAssign => {
                        let kind = self.compound_assign_kind();
                        self.advance();
                        let variable = self.alloc_variable(ident, Some(indices), span);
                        let value = self.parse_expression();
                        self.program.alloc_stmt(Stmt {
                            kind: StmtKind::Assignment {
                                kind,
                                variable,
                                value,
                            },
                            span,
                        })
                    }
                    Lexeme::Assessor => {
                        let variable = self.alloc_variable(ident, Some(indices), span);
                        let expr = self.parse_postfix(variable);
                        self.statement_for_expr(expr, span)
                    }
                    _ => {
                        self.error("expected assignment or method call");
                        self.synchronize();
                        self.program.alloc_stmt(Stmt {
                            kind: StmtKind::Empty,
                            span,
                        })
                    }
                }
            }
            Lexeme::Assessor | Lexeme::LParen => {
                let expr = self.parse_call_from_name(ident, span);
                self.statement_for_expr(expr, span)
            }
            _ => {
                self.error("expected statement");
                self.synchronize();
                self.program.alloc_stmt(Stmt {
                    kind: StmtKind::Empty,
                    span,
                })
            }
        }
    }

    fn statement_for_expr(&mut self, expr: ExprId, span: Span) -> StmtId {
        let kind = match &self.program.expr(expr).kind {
            ExprKind::MethodCall(_) => StmtKind::MethodCall(expr),
            _ => StmtKind::Simple(expr),
        };
        self.program.alloc_stmt(Stmt { kind, span })
    }

    fn compound_assign_kind(&self) -> AssignKind {
        match self.current() {
            Lexeme::AddAssign => AssignKind::Add,
            Lexeme::SubAssign => AssignKind::Sub,
            Lexeme::MulAssign => AssignKind::Mul,
            _ => AssignKind::Div,
        }
    }

    fn parse_declaration_statement(&mut self) -> StmtId {
        let span = self.current_span();
        let name = self.expect_ident();
        self.parse_declaration_after_name(name, span)
    }

    /// The name is consumed; parses `: [static :] Type [:= expr]`.
    fn parse_declaration_after_name(&mut self, name: String, span: Span) -> StmtId {
        self.eat(&Lexeme::Colon);

        let is_static = if self.at(&Lexeme::Static) {
            self.advance();
            self.expect(&Lexeme::Colon);
            true
        } else {
            false
        };

        let ty = self.parse_type();

        let in_method = !self.current_method_name.is_empty();
        let scope = if in_method {
            format!("{}:{}", self.current_method_name, name)
        } else {
            format!("{}:{}", self.current_class_name, name)
        };
        let entry = self.alloc_entry(scope, ty, is_static, in_method, span);
        if !self.add_scope_entry(&name, entry) {
            self.error(&format!("variable '{}' already defined", name));
        }

        let assignment = if self.eat(&Lexeme::Assign) {
            let variable = self.alloc_variable(name, None, span);
            let value = self.parse_expression();
            Some(self.program.alloc_stmt(Stmt {
                kind: StmtKind::Assignment {
                    kind: AssignKind::Plain,
                    variable,
                    value,
                },
                span,
            }))
        } else {
            None
        };

        self.program.alloc_stmt(Stmt {
            kind: StmtKind::Declaration { entry, assignment },
            span,
        })
    }

    fn parse_return(&mut self) -> StmtId {
        let span = self.current_span();
        self.advance();
        let expr = if self.at(&Lexeme::Semicolon) {
            None
        } else {
            Some(self.parse_expression())
        };
        self.expect(&Lexeme::Semicolon);
        self.program.alloc_stmt(Stmt {
            kind: StmtKind::Return(expr),
            span,
        })
    }

    fn parse_if(&mut self) -> StmtId {
        let span = self.current_span();
        self.advance();
        self.expect(&Lexeme::LParen);
        let cond = self.parse_expression();
        self.expect(&Lexeme::RParen);
        let block = self.parse_statement_block();

        let mut arms = vec![(cond, block)];
        let mut else_block = None;
        while self.at(&Lexeme::Else) {
            self.advance();
            if self.at(&Lexeme::If) {
                self.advance();
                self.expect(&Lexeme::LParen);
                let cond = self.parse_expression();
                self.expect(&Lexeme::RParen);
                let block = self.parse_statement_block();
                arms.push((cond, block));
            } else {
                else_block = Some(self.parse_statement_block());
                break;
            }
        }

        self.program.alloc_stmt(Stmt {
            kind: StmtKind::If { arms, else_block },
            span,
        })
    }

    fn parse_while(&mut self) -> StmtId {
        let span = self.current_span();
        self.advance();
        self.expect(&Lexeme::LParen);
        let cond = self.parse_expression();
        self.expect(&Lexeme::RParen);
        let body = self.parse_statement_block();
        self.program.alloc_stmt(Stmt {
            kind: StmtKind::While { cond, body },
            span,
        })
    }

    fn parse_do_while(&mut self) -> StmtId {
        let span = self.current_span();
        self.advance();
        let body = self.parse_statement_block();
        self.expect(&Lexeme::While);
        self.expect(&Lexeme::LParen);
        let cond = self.parse_expression();
        self.expect(&Lexeme::RParen);
        self.expect(&Lexeme::Semicolon);
        self.program.alloc_stmt(Stmt {
            kind: StmtKind::DoWhile { body, cond },
            span,
        })
    }

    fn parse_for(&mut self) -> StmtId {
        let span = self.current_span();
        self.advance();
        self.expect(&Lexeme::LParen);
        let pre = self.parse_ident_statement();
        self.expect(&Lexeme::Semicolon);
        let cond = self.parse_expression();
        self.expect(&Lexeme::Semicolon);
        let update = self.parse_ident_statement();
        self.expect(&Lexeme::RParen);
        let body = self.parse_statement_block();
        self.program.alloc_stmt(Stmt {
            kind: StmtKind::For {
                pre,
                cond,
                update,
                body,
            },
            span,
        })
    }

    /// `each (i : array)` is sugar for an index-driven `for` over the
    /// array's `Size()`.
    fn parse_each(&mut self) -> StmtId {
        let span = self.current_span();
        self.advance();
        self.expect(&Lexeme::LParen);
        let var_name = self.expect_ident();
        self.expect(&Lexeme::Colon);
        let array_name = self.expect_ident();
        self.expect(&Lexeme::RParen);

        // i : Int := 0;
        let scope = format!("{}:{}", self.current_method_name, var_name);
        let entry = self.alloc_entry(scope, Type::basic(TypeKind::Int), false, true, span);
        if !self.add_scope_entry(&var_name, entry) {
            self.error(&format!("variable '{}' already defined", var_name));
        }
        let init_var = self.alloc_variable(var_name.clone(), None, span);
        let zero = self
            .program
            .alloc_expr(Expr::new(ExprKind::IntLit(0), span));
        let init = self.program.alloc_stmt(Stmt {
            kind: StmtKind::Assignment {
                kind: AssignKind::Plain,
                variable: init_var,
                value: zero,
            },
            span,
        });
        let pre = self.program.alloc_stmt(Stmt {
            kind: StmtKind::Declaration {
                entry,
                assignment: Some(init),
            },
            span,
        });

        // i < array->Size()
        let cond_var = self.alloc_variable(var_name.clone(), None, span);
        let size_call = self.program.alloc_expr(Expr::new(
            ExprKind::MethodCall(MethodCallData::new(
                CallType::Method,
                array_name,
                "Size".to_string(),
                Vec::new(),
            )),
            span,
        ));
        let cond = self.program.alloc_expr(Expr::new(
            ExprKind::Calc {
                op: CalcOp::Les,
                left: cond_var,
                right: size_call,
            },
            span,
        ));

        // i += 1
        let update_var = self.alloc_variable(var_name, None, span);
        let one = self
            .program
            .alloc_expr(Expr::new(ExprKind::IntLit(1), span));
        let update = self.program.alloc_stmt(Stmt {
            kind: StmtKind::Assignment {
                kind: AssignKind::Add,
                variable: update_var,
                value: one,
            },
            span,
        });

        let body = self.parse_statement_block();
        self.program.alloc_stmt(Stmt {
            kind: StmtKind::For {
                pre,
                cond,
                update,
                body,
            },
            span,
        })
    }

    fn parse_select(&mut self) -> StmtId {
        let span = self.current_span();
        self.advance();
        self.expect(&Lexeme::LParen);
        let expr = self.parse_expression();
        self.expect(&Lexeme::RParen);
        self.expect(&Lexeme::LBrace);

        let mut branches = Vec::new();
        let mut other = None;
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            if self.eat(&Lexeme::Label) {
                let mut labels = Vec::new();
                loop {
                    labels.push(self.parse_expression());
                    if !self.eat(&Lexeme::Comma) {
                        break;
                    }
                }
                self.expect(&Lexeme::Colon);
                let block = self.parse_statement_block();
                branches.push((labels, block));
            } else if self.eat(&Lexeme::Other) {
                self.expect(&Lexeme::Colon);
                let block = self.parse_statement_block();
                if other.is_some() {
                    self.error("'other' may appear at most once");
                }
                other = Some(block);
            } else {
                self.error("expected 'label' or 'other'");
                self.advance();
            }
        }
        self.expect(&Lexeme::RBrace);

        self.program.alloc_stmt(Stmt {
            kind: StmtKind::Select {
                expr,
                branches,
                other,
                labels: Vec::new(),
            },
            span,
        })
    }

    fn parse_critical(&mut self) -> StmtId {
        let span = self.current_span();
        self.advance();
        self.expect(&Lexeme::LParen);
        let name = self.expect_ident();
        let variable = self.alloc_variable(name, None, span);
        self.expect(&Lexeme::RParen);
        let body = self.parse_statement_block();
        self.program.alloc_stmt(Stmt {
            kind: StmtKind::Critical { variable, body },
            span,
        })
    }

    // ----- expressions -----

    fn parse_expression(&mut self) -> ExprId {
        let span = self.current_span();
        let cond = self.parse_logic();
        if self.eat(&Lexeme::Question) {
            let if_expr = self.parse_logic();
            self.expect(&Lexeme::Colon);
            let else_expr = self.parse_logic();
            return self.program.alloc_expr(Expr::new(
                ExprKind::Cond {
                    cond,
                    if_expr,
                    else_expr,
                },
                span,
            ));
        }
        cond
    }

    fn parse_logic(&mut self) -> ExprId {
        let span = self.current_span();
        let mut left = self.parse_comparison();
        loop {
            let op = match self.current() {
                Lexeme::And => CalcOp::And,
                Lexeme::Or => CalcOp::Or,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison();
            left = self
                .program
                .alloc_expr(Expr::new(ExprKind::Calc { op, left, right }, span));
        }
        left
    }

    fn parse_comparison(&mut self) -> ExprId {
        let span = self.current_span();
        let mut left = self.parse_term();
        loop {
            let op = match self.current() {
                Lexeme::Eql => CalcOp::Eql,
                Lexeme::Neql => CalcOp::Neql,
                Lexeme::Les => CalcOp::Les,
                Lexeme::Gtr => CalcOp::Gtr,
                Lexeme::LesEql => CalcOp::LesEql,
                Lexeme::GtrEql => CalcOp::GtrEql,
                _ => break,
            };
            self.advance();
            let right = self.parse_term();
            left = self
                .program
                .alloc_expr(Expr::new(ExprKind::Calc { op, left, right }, span));
        }
        left
    }

    fn parse_term(&mut self) -> ExprId {
        let span = self.current_span();
        let mut left = self.parse_factor();
        loop {
            let op = match self.current() {
                Lexeme::Add => CalcOp::Add,
                Lexeme::Sub => CalcOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor();
            left = self
                .program
                .alloc_expr(Expr::new(ExprKind::Calc { op, left, right }, span));
        }
        left
    }

    fn parse_factor(&mut self) -> ExprId {
        let span = self.current_span();
        let mut left = self.parse_unary();
        loop {
            let op = match self.current() {
                Lexeme::Mul => CalcOp::Mul,
                Lexeme::Div => CalcOp::Div,
                Lexeme::Mod => CalcOp::Mod,
                Lexeme::Shl => CalcOp::Shl,
                Lexeme::Shr => CalcOp::Shr,
                Lexeme::AndId => CalcOp::BitAnd,
                Lexeme::OrId => CalcOp::BitOr,
                Lexeme::XorId => CalcOp::BitXor,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary();
            left = self
                .program
                .alloc_expr(Expr::new(ExprKind::Calc { op, left, right }, span));
        }
        left
    }

    fn parse_unary(&mut self) -> ExprId {
        let span = self.current_span();
        if self.at(&Lexeme::Sub) {
            self.advance();
            // negative literals fold; everything else subtracts from zero
            match self.current().clone() {
                Lexeme::IntLit(value) => {
                    self.advance();
                    return self
                        .program
                        .alloc_expr(Expr::new(ExprKind::IntLit(-value), span));
                }
                Lexeme::FloatLit(value) => {
                    self.advance();
                    return self
                        .program
                        .alloc_expr(Expr::new(ExprKind::FloatLit(-value), span));
                }
                _ => {
                    let zero = self
                        .program
                        .alloc_expr(Expr::new(ExprKind::IntLit(0), span));
                    let right = self.parse_primary();
                    return self.program.alloc_expr(Expr::new(
                        ExprKind::Calc {
                            op: CalcOp::Sub,
                            left: zero,
                            right,
                        },
                        span,
                    ));
                }
            }
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ExprId {
        let span = self.current_span();
        if !self.enter_nesting() {
            self.advance();
            return self.program.alloc_expr(Expr::new(ExprKind::Nil, span));
        }

        let expr = match self.current().clone() {
            Lexeme::IntLit(value) => {
                self.advance();
                self.program
                    .alloc_expr(Expr::new(ExprKind::IntLit(value), span))
            }
            Lexeme::ByteLit(value) => {
                self.advance();
                self.program
                    .alloc_expr(Expr::new(ExprKind::ByteLit(value), span))
            }
            Lexeme::FloatLit(value) => {
                self.advance();
                self.program
                    .alloc_expr(Expr::new(ExprKind::FloatLit(value), span))
            }
            Lexeme::CharLit(value) => {
                self.advance();
                self.program
                    .alloc_expr(Expr::new(ExprKind::CharLit(value), span))
            }
            Lexeme::StringLit(value) => {
                self.advance();
                let expr = self.program.alloc_expr(Expr::new(
                    ExprKind::CharString {
                        raw: value,
                        segments: Vec::new(),
                        concat: None,
                    },
                    span,
                ));
                self.parse_postfix(expr)
            }
            Lexeme::True => {
                self.advance();
                self.program
                    .alloc_expr(Expr::new(ExprKind::BoolLit(true), span))
            }
            Lexeme::False => {
                self.advance();
                self.program
                    .alloc_expr(Expr::new(ExprKind::BoolLit(false), span))
            }
            Lexeme::NilTy => {
                self.advance();
                self.program.alloc_expr(Expr::new(ExprKind::Nil, span))
            }
            Lexeme::LParen => {
                self.advance();
                let inner = self.parse_expression();
                self.expect(&Lexeme::RParen);
                self.parse_postfix(inner)
            }
            Lexeme::LBracket => {
                let elements = self.parse_static_array_elements();
                self.program.alloc_expr(Expr::new(
                    ExprKind::StaticArray {
                        elements,
                        dimension: 1,
                        element_kind: None,
                        id: -1,
                    },
                    span,
                ))
            }
            Lexeme::BoolTy | Lexeme::ByteTy | Lexeme::CharTy | Lexeme::IntTy | Lexeme::FloatTy => {
                // basic-type receiver: array allocation or a function-ref
                // parameter name
                let name = self.type_keyword_name();
                self.advance();
                if self.at(&Lexeme::Assessor) {
                    self.parse_call_from_name(name, span)
                } else {
                    self.alloc_variable(name, None, span)
                }
            }
            Lexeme::Ident(_) => {
                let name = self.parse_bundle_name();
                match self.current().clone() {
                    Lexeme::Assessor | Lexeme::LParen => self.parse_call_from_name(name, span),
                    Lexeme::LBracket => {
                        let indices = self.parse_indices();
                        let variable = self.alloc_variable(name, Some(indices), span);
                        self.parse_postfix(variable)
                    }
                    _ => {
                        let variable = self.alloc_variable(name, None, span);
                        variable
                    }
                }
            }
            _ => {
                self.error("expected expression");
                self.advance();
                self.program.alloc_expr(Expr::new(ExprKind::Nil, span))
            }
        };
        self.exit_nesting();
        expr
    }

    /// Parses `name(...)`, `name->Method(...)`, `name->New(...)`,
    /// `name->New[...]`, `name->Item` and subsequent chain links.
    fn parse_call_from_name(&mut self, name: String, span: Span) -> ExprId {
        // same-class call: `Method(args)`
        if self.at(&Lexeme::LParen) {
            let params = self.parse_calling_parameters();
            let data = MethodCallData::new(CallType::Method, String::new(), name, params);
            let expr = self
                .program
                .alloc_expr(Expr::new(ExprKind::MethodCall(data), span));
            return self.parse_postfix(expr);
        }

        self.expect(&Lexeme::Assessor);

        // a cast or type check on the named variable re-enters the chain
        if self.at(&Lexeme::As) {
            self.advance();
            self.expect(&Lexeme::LParen);
            let ty = self.parse_type();
            self.expect(&Lexeme::RParen);
            let variable = self.alloc_variable(name, None, span);
            self.program.expr_mut(variable).cast_type = Some(ty);
            return self.parse_postfix(variable);
        }
        if self.at(&Lexeme::TypeOf) {
            self.advance();
            self.expect(&Lexeme::LParen);
            let ty = self.parse_type();
            self.expect(&Lexeme::RParen);
            let variable = self.alloc_variable(name, None, span);
            self.program.expr_mut(variable).type_of = Some(ty);
            return self.parse_postfix(variable);
        }

        // allocation
        if self.at(&Lexeme::New) {
            self.advance();
            if self.at(&Lexeme::LBracket) {
                let dims = self.parse_indices();
                let mut data =
                    MethodCallData::new(CallType::NewArray, name.clone(), "New".to_string(), dims);
                data.array_type = Some(self.type_for_name(&name));
                let expr = self
                    .program
                    .alloc_expr(Expr::new(ExprKind::MethodCall(data), span));
                return self.parse_postfix(expr);
            }
            let params = self.parse_calling_parameters();
            let data = MethodCallData::new(CallType::NewInstance, name, "New".to_string(), params);
            let expr = self
                .program
                .alloc_expr(Expr::new(ExprKind::MethodCall(data), span));
            // a trailing body defines an anonymous class at the call site
            if self.at(&Lexeme::LBrace) {
                let anon_name = self.parse_anonymous_class(expr, span);
                if let ExprKind::MethodCall(slot) = &mut self.program.expr_mut(expr).kind {
                    slot.variable_name = anon_name;
                }
            }
            return self.parse_postfix(expr);
        }

        let method_name = self.expect_ident();
        if self.at(&Lexeme::LParen) {
            let params = self.parse_calling_parameters();
            let mut data = MethodCallData::new(CallType::Method, name, method_name, params);
            // a trailing '~ Type' marks a function reference
            if self.at(&Lexeme::Tilde) {
                self.advance();
                data.call_type = CallType::FunctionDef;
                data.is_func_def = true;
                data.func_rtrn = Some(self.parse_type());
            }
            let expr = self
                .program
                .alloc_expr(Expr::new(ExprKind::MethodCall(data), span));
            return self.parse_postfix(expr);
        }

        // no parentheses: an enum item or a self/parent field reference
        let data = MethodCallData::new(CallType::Enum, name, method_name, Vec::new());
        let expr = self
            .program
            .alloc_expr(Expr::new(ExprKind::MethodCall(data), span));
        self.parse_postfix(expr)
    }

    /// An anonymous class defined at a `New` call site: it implements the
    /// named interface and must supply the constructor the call expects.
    fn parse_anonymous_class(&mut self, call_expr: ExprId, span: Span) -> String {
        let interface_name = match &self.program.expr(call_expr).kind {
            ExprKind::MethodCall(data) => data.variable_name.clone(),
            _ => String::new(),
        };
        self.anonymous_count += 1;
        let anon_name = format!("{}#{}", self.current_class_name, self.anonymous_count);

        let outer_class = self.current_class;
        let outer_class_name = std::mem::take(&mut self.current_class_name);
        let outer_method_name = std::mem::take(&mut self.current_method_name);

        let class_id = self.program.add_class(Class::new(
            anon_name.clone(),
            self.bundle,
            String::new(),
            vec![interface_name],
            false,
            self.file_name.clone(),
            span,
        ));
        self.program.class_mut(class_id).anonymous_call = Some(call_expr);
        self.current_class = Some(class_id);
        self.current_class_name = anon_name.clone();

        self.new_parse_scope();
        let self_ty = Type::class(anon_name.clone());
        let self_entry = self.alloc_entry(
            format!("{}:{}", anon_name, SELF_ID),
            self_ty.clone(),
            false,
            false,
            span,
        );
        self.program.entries[self_entry.0 as usize].is_self = true;
        self.add_scope_entry(SELF_ID, self_entry);
        let parent_entry =
            self.alloc_entry(format!("{}:{}", anon_name, PARENT_ID), self_ty, false, false, span);
        self.add_scope_entry(PARENT_ID, parent_entry);

        self.expect(&Lexeme::LBrace);
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            if self.at(&Lexeme::Method) || self.at(&Lexeme::Function) || self.at(&Lexeme::New) {
                self.parse_method(class_id, false);
            } else {
                self.error("expected method or function");
                self.advance();
            }
        }
        self.expect(&Lexeme::RBrace);
        self.previous_parse_scope(&anon_name.clone());

        self.current_class = outer_class;
        self.current_class_name = outer_class_name;
        self.current_method_name = outer_method_name;
        anon_name
    }

    /// Postfix chain on an expression: `->Method(...)`, `->As(Type)`,
    /// `->TypeOf(Type)`, `->Item`.
    ///
    /// On a variable receiver the chain head becomes the expression and
    /// keeps the variable; on any other base the chain hangs off the base
    /// and the base stays the expression.
    fn parse_postfix(&mut self, base: ExprId) -> ExprId {
        let base_is_variable = matches!(self.program.expr(base).kind, ExprKind::Variable { .. });
        let mut head = base;
        let mut tail = base;
        while self.at(&Lexeme::Assessor) {
            let span = self.current_span();
            self.advance();

            if self.at(&Lexeme::As) {
                self.advance();
                self.expect(&Lexeme::LParen);
                let ty = self.parse_type();
                self.expect(&Lexeme::RParen);
                self.program.expr_mut(tail).cast_type = Some(ty);
                continue;
            }
            if self.at(&Lexeme::TypeOf) {
                self.advance();
                self.expect(&Lexeme::LParen);
                let ty = self.parse_type();
                self.expect(&Lexeme::RParen);
                self.program.expr_mut(tail).type_of = Some(ty);
                continue;
            }

            let method_name = self.expect_ident();
            let params = if self.at(&Lexeme::LParen) {
                self.parse_calling_parameters()
            } else {
                Vec::new()
            };
            let mut data =
                MethodCallData::new(CallType::Method, String::new(), method_name, params);
            if base_is_variable && tail == base {
                // head of a variable chain: the call owns the receiver
                if let ExprKind::Variable { name, .. } = &self.program.expr(base).kind {
                    data.variable_name = name.clone();
                }
                data.variable = Some(base);
                let call = self
                    .program
                    .alloc_expr(Expr::new(ExprKind::MethodCall(data), span));
                head = call;
                tail = call;
                continue;
            }
            let call = self
                .program
                .alloc_expr(Expr::new(ExprKind::MethodCall(data), span));
            self.program.expr_mut(tail).method_call = Some(call);
            tail = call;
        }
        head
    }

    fn parse_calling_parameters(&mut self) -> Vec<ExprId> {
        let mut params = Vec::new();
        self.expect(&Lexeme::LParen);
        while !self.at(&Lexeme::RParen) && !self.at(&Lexeme::Eof) {
            params.push(self.parse_expression());
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RParen);
        params
    }

    fn parse_indices(&mut self) -> Vec<ExprId> {
        let mut indices = Vec::new();
        self.expect(&Lexeme::LBracket);
        while !self.at(&Lexeme::RBracket) && !self.at(&Lexeme::Eof) {
            indices.push(self.parse_expression());
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RBracket);
        indices
    }

    fn parse_static_array_elements(&mut self) -> Vec<ExprId> {
        let mut elements = Vec::new();
        self.expect(&Lexeme::LBracket);
        while !self.at(&Lexeme::RBracket) && !self.at(&Lexeme::Eof) {
            elements.push(self.parse_expression());
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RBracket);
        elements
    }

    // ----- types -----

    fn parse_type(&mut self) -> Type {
        let mut ty = match self.current().clone() {
            Lexeme::NilTy => {
                self.advance();
                Type::basic(TypeKind::Nil)
            }
            Lexeme::BoolTy => {
                self.advance();
                Type::basic(TypeKind::Bool)
            }
            Lexeme::ByteTy => {
                self.advance();
                Type::basic(TypeKind::Byte)
            }
            Lexeme::CharTy => {
                self.advance();
                Type::basic(TypeKind::Char)
            }
            Lexeme::IntTy => {
                self.advance();
                Type::basic(TypeKind::Int)
            }
            Lexeme::FloatTy => {
                self.advance();
                Type::basic(TypeKind::Float)
            }
            Lexeme::LParen => {
                // function type: (Int, Float) ~ Bool
                self.advance();
                let mut params = Vec::new();
                while !self.at(&Lexeme::RParen) && !self.at(&Lexeme::Eof) {
                    params.push(self.parse_type());
                    if !self.eat(&Lexeme::Comma) {
                        break;
                    }
                }
                self.expect(&Lexeme::RParen);
                self.expect(&Lexeme::Tilde);
                let rtrn = self.parse_type();
                Type::func(params, rtrn)
            }
            Lexeme::Ident(_) => {
                let name = self.parse_bundle_name();
                Type::class(name)
            }
            _ => {
                self.error("expected type");
                self.advance();
                Type::basic(TypeKind::Nil)
            }
        };

        // array dimensions: [] adds one, each ',' inside adds another
        while self.at(&Lexeme::LBracket) {
            self.advance();
            ty.dimension += 1;
            while self.eat(&Lexeme::Comma) {
                ty.dimension += 1;
            }
            self.expect(&Lexeme::RBracket);
        }
        ty
    }

    fn type_for_name(&self, name: &str) -> Type {
        match name {
            "Bool" => Type::basic(TypeKind::Bool),
            "Byte" => Type::basic(TypeKind::Byte),
            "Char" => Type::basic(TypeKind::Char),
            "Int" => Type::basic(TypeKind::Int),
            "Float" => Type::basic(TypeKind::Float),
            other => Type::class(other),
        }
    }

    fn type_keyword_name(&self) -> String {
        match self.current() {
            Lexeme::BoolTy => "Bool".to_string(),
            Lexeme::ByteTy => "Byte".to_string(),
            Lexeme::CharTy => "Char".to_string(),
            Lexeme::IntTy => "Int".to_string(),
            _ => "Float".to_string(),
        }
    }

    // ----- scope and entry helpers -----

    fn alloc_entry(
        &mut self,
        scoped_name: String,
        ty: Type,
        is_static: bool,
        is_local: bool,
        span: Span,
    ) -> crate::sym::EntryId {
        self.program
            .alloc_entry(SymbolEntry::new(scoped_name, ty, is_static, is_local, span))
    }

    fn alloc_variable(&mut self, name: String, indices: Option<Vec<ExprId>>, span: Span) -> ExprId {
        self.program.alloc_expr(Expr::new(
            ExprKind::Variable {
                name,
                indices,
                entry: None,
            },
            span,
        ))
    }

    fn new_parse_scope(&mut self) {
        self.program.bundles[self.bundle].symbols.new_parse_scope();
    }

    fn previous_parse_scope(&mut self, archive_name: &str) {
        self.program.bundles[self.bundle]
            .symbols
            .previous_parse_scope(archive_name);
    }

    fn add_scope_entry(&mut self, simple_name: &str, entry: crate::sym::EntryId) -> bool {
        self.program.bundles[self.bundle]
            .symbols
            .add_entry(simple_name, entry)
    }

    // ----- token helpers -----

    fn current(&self) -> &Lexeme {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn at(&self, token: &Lexeme) -> bool {
        self.current() == token
    }

    fn peek_is(&self, token: &Lexeme) -> bool {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.node == token)
            .unwrap_or(false)
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &Lexeme) -> bool {
        if self.at(token) {
            self.advance();
            return true;
        }
        false
    }

    fn expect(&mut self, token: &Lexeme) -> bool {
        if self.eat(token) {
            return true;
        }
        let found = self.current().describe();
        self.error(&format!("expected {}, found {}", token.describe(), found));
        false
    }

    fn expect_ident(&mut self) -> String {
        if let Lexeme::Ident(name) = self.current().clone() {
            self.advance();
            return name;
        }
        self.error("expected identifier");
        String::new()
    }

    /// Dotted name: `System.IO.File`.
    fn parse_bundle_name(&mut self) -> String {
        let mut name = self.expect_ident();
        while self.at(&Lexeme::Dot) && matches!(self.tokens.get(self.pos + 1).map(|t| &t.node), Some(Lexeme::Ident(_))) {
            self.advance();
            name.push('.');
            name.push_str(&self.expect_ident());
        }
        name
    }

    fn error(&mut self, message: &str) {
        self.diagnostics
            .push(Diagnostic::error(message.to_string(), self.current_span()));
    }

    /// Skips to the next statement terminator.
    fn synchronize(&mut self) {
        while !self.at(&Lexeme::Eof) {
            if self.at(&Lexeme::Semicolon) {
                self.advance();
                return;
            }
            if self.at(&Lexeme::RBrace) {
                return;
            }
            self.advance();
        }
    }

    fn enter_nesting(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.error("nesting depth exceeded");
            return false;
        }
        true
    }

    fn exit_nesting(&mut self) {
        self.depth -= 1;
    }
}

fn qualify(bundle_name: &str, name: &str) -> String {
    if bundle_name.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", bundle_name, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse_source(source: &str) -> Result<Program, Vec<Diagnostic>> {
        let mut program = Program::new();
        program.add_file("test.opl".to_string());
        let (tokens, lex_errors) = Lexer::new(source, 0).tokenize();
        assert!(lex_errors.is_empty(), "lex errors: {:?}", lex_errors);
        Parser::new(&mut program, tokens, "test.opl".to_string()).parse()?;
        Ok(program)
    }

    #[test]
    fn test_hello_world_shape() {
        let program = parse_source(
            "class Hello { function : Main(args : System.String[]) ~ Nil { } }",
        )
        .expect("parses");
        assert_eq!(program.classes.len(), 1);
        let class = &program.classes[0];
        assert_eq!(class.name, "Hello");
        assert_eq!(class.methods.len(), 1);

        let method = program.method(class.methods[0]);
        assert_eq!(method.name, "Hello:Main");
        assert!(method.is_function);
        assert!(method.is_static);
        assert_eq!(method.encoded_name, "Hello:Main:o.System.String*,");
    }

    #[test]
    fn test_bundle_qualifies_names() {
        let program = parse_source(
            "bundle Fleet { class Ship { } enum Rank := 100 { Ensign, Captain } }",
        )
        .expect("parses");
        assert!(program.search_classes("Fleet.Ship").is_some());
        let rank = program.search_enums("Fleet.Rank").expect("enum");
        let rank = program.enum_(rank);
        assert_eq!(rank.offset, 100);
        assert_eq!(rank.item("Captain").map(|item| item.id), Some(101));
    }

    #[test]
    fn test_interface_methods_are_virtual() {
        let program = parse_source(
            "interface Shape { method : virtual : public : Area() ~ Float; }",
        )
        .expect("parses");
        let class = &program.classes[0];
        assert!(class.is_interface());
        assert!(class.is_virtual());
        let method = program.method(class.methods[0]);
        assert!(method.is_virtual);
        assert!(method.statements.is_none());
    }

    #[test]
    fn test_constructor_and_parent_call() {
        let program = parse_source(
            "class Tug from Boat { New(size : Int) { Parent(size); } }",
        )
        .expect("parses");
        let class = &program.classes[0];
        assert_eq!(class.parent_name, "Boat");
        let method = program.method(class.methods[0]);
        assert_eq!(method.kind, MethodKind::NewPublic);
        assert_eq!(method.encoded_name, "Tug:New:i,");
        let body = method.statements.as_ref().expect("body");
        assert_eq!(body.len(), 1);
        match &program.stmt(body[0]).kind {
            StmtKind::MethodCall(expr) => match &program.expr(*expr).kind {
                ExprKind::MethodCall(data) => assert_eq!(data.call_type, CallType::Parent),
                other => panic!("unexpected expr {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_default_parameter_declarations() {
        let program = parse_source(
            "class M { method : public : G(x : Int, y : Int := 1) ~ Int { return x; } }",
        )
        .expect("parses");
        let method = program.method(program.classes[0].methods[0]);
        assert_eq!(method.declarations.len(), 2);
        let with_default = match &program.stmt(method.declarations[1]).kind {
            StmtKind::Declaration { assignment, .. } => assignment.is_some(),
            _ => false,
        };
        assert!(with_default);
    }

    #[test]
    fn test_select_statement() {
        let program = parse_source(
            "class S { method : public : Pick(x : Int) ~ Nil { \
               select (x) { label 1, 3 : { } label 5 : { } other : { } } \
             } }",
        )
        .expect("parses");
        let method = program.method(program.classes[0].methods[0]);
        let body = method.statements.as_ref().expect("body");
        match &program.stmt(body[0]).kind {
            StmtKind::Select {
                branches, other, ..
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(branches[0].0.len(), 2);
                assert!(other.is_some());
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_method_call_chain_and_cast() {
        let program = parse_source(
            "class C { method : public : R(s : Shape) ~ Float { \
               return s->As(Circle)->Area(); \
             } }",
        )
        .expect("parses");
        let method = program.method(program.classes[0].methods[0]);
        let body = method.statements.as_ref().expect("body");
        match &program.stmt(body[0]).kind {
            StmtKind::Return(Some(expr)) => match &program.expr(*expr).kind {
                ExprKind::MethodCall(data) => {
                    assert_eq!(data.method_name, "Area");
                    let variable = data.variable.expect("receiver variable");
                    assert!(program.expr(variable).cast_type.is_some());
                }
                other => panic!("unexpected expr {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_new_array_call() {
        let program = parse_source(
            "class C { method : public : M() ~ Nil { a : Int[]; a := Int->New[10]; } }",
        )
        .expect("parses");
        let method = program.method(program.classes[0].methods[0]);
        let body = method.statements.as_ref().expect("body");
        match &program.stmt(body[1]).kind {
            StmtKind::Assignment { value, .. } => match &program.expr(*value).kind {
                ExprKind::MethodCall(data) => {
                    assert_eq!(data.call_type, CallType::NewArray);
                    assert_eq!(data.params.len(), 1);
                }
                other => panic!("unexpected expr {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_overload_rejected() {
        let err = parse_source(
            "class D { method : public : F(x : Int) ~ Nil { } \
                       method : public : F(y : Int) ~ Nil { } }",
        )
        .unwrap_err();
        assert!(err
            .iter()
            .any(|d| d.message.contains("already overloaded")));
    }

    #[test]
    fn test_recovery_continues_past_bad_statement() {
        let err = parse_source(
            "class R { method : public : M() ~ Nil { ~~~; x : Int; } }",
        )
        .unwrap_err();
        // the parser reported the bad statement but kept going
        assert!(!err.is_empty());
    }
}
