//! Statement and declaration compilation.

use std::rc::Rc;

use veld_bytecode::{CaseKey, Constant, FuncKind, OpCode, SwitchTable};
use veld_syntax::{Token, TokenKind};

use crate::compiler::{ClassCompiler, Parser};

impl<'src> Parser<'src> {
    pub(crate) fn declaration(&mut self) {
        if self.matches(TokenKind::KwClass) {
            self.class_declaration(true);
        } else if self.matches(TokenKind::KwFunction) {
            self.func_declaration();
        } else if self.matches(TokenKind::KwVar) || self.matches(TokenKind::KwConst) {
            self.var_declaration(false);
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    pub(crate) fn statement(&mut self) {
        if self.matches(TokenKind::Semicolon) {
            // empty statement
        } else if self.matches(TokenKind::KwEcho) {
            self.echo_statement();
        } else if self.matches(TokenKind::KwIf) {
            self.if_statement();
        } else if self.matches(TokenKind::KwDo) {
            self.do_while_statement();
        } else if self.matches(TokenKind::KwWhile) {
            self.while_statement();
        } else if self.matches(TokenKind::KwFor) {
            self.for_statement();
        } else if self.matches(TokenKind::KwForeach) {
            self.foreach_statement();
        } else if self.matches(TokenKind::KwSwitch) {
            self.switch_statement();
        } else if self.matches(TokenKind::KwContinue) {
            self.continue_statement();
        } else if self.matches(TokenKind::KwBreak) {
            self.break_statement();
        } else if self.matches(TokenKind::KwReturn) {
            self.return_statement();
        } else if self.matches(TokenKind::KwAssert) {
            self.assert_statement();
        } else if self.matches(TokenKind::KwThrow) {
            self.throw_statement();
        } else if self.matches(TokenKind::KwTry) {
            self.try_statement();
        } else if self.matches(TokenKind::BraceOpen) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement(false);
        }
    }

    pub(crate) fn block(&mut self) {
        while !self.check(TokenKind::BraceClose) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::BraceClose, "expected '}' after block");
        self.matches(TokenKind::Semicolon);
    }

    fn expression_statement(&mut self, is_initializer: bool) {
        self.expression();
        if is_initializer {
            self.consume(TokenKind::Semicolon, "expected ';' after initializer");
            self.emit_op(OpCode::Pop);
            return;
        }
        let echo = self.options.repl_echo
            && self.compilers.len() == 1
            && self.fc_ref().scope_depth == 0;
        if echo {
            self.emit_op(OpCode::Echo);
        } else {
            self.emit_op(OpCode::Pop);
        }
        self.consume_stmt_end();
    }

    fn echo_statement(&mut self) {
        self.expression();
        self.emit_op(OpCode::Echo);
        self.consume_stmt_end();
    }

    // ---- variables / functions / classes -----------------------------

    fn var_declaration(&mut self, is_initializer: bool) {
        loop {
            let global = self.parse_variable("variable name expected");
            if self.matches(TokenKind::Assign) {
                self.expression();
            } else {
                self.emit_op(OpCode::PushNull);
            }
            self.define_variable(global);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        if is_initializer {
            self.consume(TokenKind::Semicolon, "expected ';' after initializer");
        } else {
            self.consume_stmt_end();
        }
    }

    fn func_declaration(&mut self) {
        let global = self.parse_variable("function name expected");
        self.mark_initialized();
        let name = self.string_of_token(self.previous);
        self.function_body(&name, FuncKind::Function);
        self.define_variable(global);
    }

    /// Parameter list plus body; leaves a closure on the stack.
    pub(crate) fn function_body(&mut self, name: &str, kind: FuncKind) {
        self.push_compiler(name, kind);
        self.begin_scope();
        self.consume(TokenKind::ParenOpen, "expected '(' after function name");
        if !self.check(TokenKind::ParenClose) {
            self.parameter_list();
        }
        self.consume(TokenKind::ParenClose, "expected ')' after function parameters");
        self.consume(TokenKind::BraceOpen, "expected '{' before function body");
        self.block();
        let proto = self.end_compiler();
        let upvalues = proto.upvalues.clone();
        let idx = self.make_constant(Constant::Func(Rc::new(proto)));
        self.emit_op_short(OpCode::Closure, idx);
        for uv in upvalues {
            self.emit_byte(uv.is_local as u8);
            self.emit_short(uv.index);
        }
    }

    fn parameter_list(&mut self) {
        loop {
            self.fc().proto.arity += 1;
            if self.matches(TokenKind::Ellipsis) {
                self.consume(TokenKind::Ident, "expected identifier after '...'");
                self.fc().proto.is_variadic = true;
                self.declare_variable();
                self.mark_initialized();
                break;
            }
            self.consume(TokenKind::Ident, "expected parameter name");
            self.declare_variable();
            self.mark_initialized();
            if self.matches(TokenKind::Assign) {
                self.optional_parameter();
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
    }

    /// A default value for the parameter just declared. Defaults live in
    /// the blob's dedicated pool and must be constant literals.
    fn optional_parameter(&mut self) {
        let constant = if self.matches(TokenKind::KwNull) {
            Constant::Null
        } else if self.matches(TokenKind::KwTrue) {
            Constant::Bool(true)
        } else if self.matches(TokenKind::KwFalse) {
            Constant::Bool(false)
        } else if self.matches(TokenKind::Number)
            || self.matches(TokenKind::BinNumber)
            || self.matches(TokenKind::OctNumber)
            || self.matches(TokenKind::HexNumber)
        {
            Constant::Number(self.number_value())
        } else if self.matches(TokenKind::Str) || self.matches(TokenKind::RawStr) {
            Constant::Str(Rc::from(self.string_value().as_str()))
        } else {
            self.error("default parameter value must be a constant literal");
            return;
        };
        let slot = (self.fc_ref().locals.len() - 1) as u16;
        let didx = self.fc().proto.blob.add_default(constant);
        self.emit_op(OpCode::ArgOptional);
        self.emit_short(slot);
        self.emit_short(didx);
    }

    pub(crate) fn class_declaration(&mut self, named: bool) {
        let class_name: Token;
        let name_const;
        if named {
            self.consume(TokenKind::Ident, "class name expected");
            class_name = self.previous;
            self.declare_variable();
            name_const = self.ident_constant(class_name);
        } else {
            class_name = Token::synthetic(TokenKind::Ident);
            name_const = self.name_constant("<anonclass>");
        }
        self.emit_op_short(OpCode::MakeClass, name_const);
        if named {
            self.define_variable(name_const);
        }
        self.class_compilers.push(ClassCompiler {
            name: class_name,
            has_superclass: false,
        });
        if self.matches(TokenKind::KwExtends) {
            self.consume(TokenKind::Ident, "name of superclass expected");
            let super_tok = self.previous;
            self.named_variable(super_tok, false);
            if named && self.text(class_name) == self.text(super_tok) {
                let name = self.string_of_token(class_name);
                self.error(&format!("class {name} cannot inherit from itself"));
            }
            self.begin_scope();
            self.add_local("super");
            self.mark_initialized();
            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            self.class_compilers
                .last_mut()
                .expect("class compiler just pushed")
                .has_superclass = true;
        }
        if named {
            self.named_variable(class_name, false);
        }
        self.consume(TokenKind::BraceOpen, "expected '{' before class body");
        while !self.check(TokenKind::BraceClose) && !self.check(TokenKind::Eof) {
            let is_static = self.matches(TokenKind::KwStatic);
            // `var` before a field is tolerated
            self.matches(TokenKind::KwVar);
            if let Some(name_tok) = self.class_member(is_static) {
                self.method(name_tok, is_static);
            }
        }
        self.consume(TokenKind::BraceClose, "expected '}' after class body");
        self.matches(TokenKind::Semicolon);
        if named {
            self.emit_op(OpCode::Pop);
        }
        let has_superclass = self
            .class_compilers
            .last()
            .expect("class compiler still pushed")
            .has_superclass;
        if has_superclass {
            self.end_scope();
        }
        self.class_compilers.pop();
    }

    /// A class body entry. A field (`name = expr`) is compiled in place
    /// and `None` is returned; otherwise the consumed name token is
    /// handed back for method compilation.
    fn class_member(&mut self, is_static: bool) -> Option<Token> {
        if !self.matches(TokenKind::Ident) {
            self.error_at_current("method name expected");
            // skip the offending token so the body loop makes progress
            self.advance();
            return None;
        }
        let name_tok = self.previous;
        if self.matches(TokenKind::Assign) {
            let field_const = self.ident_constant(name_tok);
            self.expression();
            self.emit_op(OpCode::ClassPropertyDefine);
            self.emit_short(field_const);
            self.emit_byte(is_static as u8);
            self.consume_stmt_end();
            return None;
        }
        Some(name_tok)
    }

    fn method(&mut self, name_tok: Token, is_static: bool) {
        let constant = self.ident_constant(name_tok);
        let name = self.string_of_token(name_tok);
        let kind = if is_static {
            FuncKind::Static
        } else if name == "constructor" {
            FuncKind::Initializer
        } else if name.starts_with('_') {
            FuncKind::Private
        } else {
            FuncKind::Method
        };
        self.function_body(&name, kind);
        self.emit_op_short(OpCode::MakeMethod, constant);
    }

    // ---- control flow -------------------------------------------------

    fn if_statement(&mut self) {
        self.expression();
        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.matches(TokenKind::KwElse) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    /// Compile a loop body with the loop bookkeeping saved and restored
    /// around it.
    fn loop_body<F: FnOnce(&mut Self)>(&mut self, loop_start: usize, body: F) {
        let saved_start = self.innermost_loop_start;
        let saved_depth = self.innermost_loop_scope_depth;
        let saved_in_switch = self.in_switch;
        self.innermost_loop_start = loop_start as i32;
        self.innermost_loop_scope_depth = self.fc_ref().scope_depth;
        self.in_switch = false;
        body(self);
        self.innermost_loop_start = saved_start;
        self.innermost_loop_scope_depth = saved_depth;
        self.in_switch = saved_in_switch;
    }

    fn while_statement(&mut self) {
        let loop_start = self.blob_len();
        self.loop_body(loop_start, |p| {
            p.expression();
            let exit_jump = p.emit_jump(OpCode::JumpIfFalse);
            p.emit_op(OpCode::Pop);
            p.statement();
            p.emit_loop(loop_start);
            p.patch_jump(exit_jump);
            p.emit_op(OpCode::Pop);
            p.end_loop(loop_start);
        });
    }

    fn do_while_statement(&mut self) {
        let loop_start = self.blob_len();
        self.loop_body(loop_start, |p| {
            p.statement();
            p.consume(TokenKind::KwWhile, "expecting 'while' statement");
            p.expression();
            let exit_jump = p.emit_jump(OpCode::JumpIfFalse);
            p.emit_op(OpCode::Pop);
            p.emit_loop(loop_start);
            p.patch_jump(exit_jump);
            p.emit_op(OpCode::Pop);
            p.end_loop(loop_start);
        });
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::ParenOpen, "expected '(' after 'for'");
        // initializer
        if self.matches(TokenKind::Semicolon) {
            // none
        } else if self.matches(TokenKind::KwVar) {
            self.var_declaration(true);
        } else {
            self.expression_statement(true);
        }
        let mut loop_start = self.blob_len();
        // condition
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "expected ';' after condition");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }
        // increment runs after the body, so jump over it on the way in
        if !self.check(TokenKind::ParenClose) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let incr_start = self.blob_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.emit_loop(loop_start);
            loop_start = incr_start;
            self.patch_jump(body_jump);
        }
        self.consume(TokenKind::ParenClose, "expected ')' after 'for'");
        self.loop_body(loop_start, |p| {
            p.statement();
            p.emit_loop(loop_start);
            if let Some(exit) = exit_jump {
                p.patch_jump(exit);
                p.emit_op(OpCode::Pop);
            }
            p.end_loop(loop_start);
        });
        self.end_scope();
    }

    /// `foreach (k, v in expr)` desugars onto the `@itern`/`@iter`
    /// protocol; the iterable and both cursors live in hidden locals
    /// whose names cannot collide with user variables.
    fn foreach_statement(&mut self) {
        self.begin_scope();
        let citer = self.name_constant("@iter");
        let citern = self.name_constant("@itern");
        self.consume(TokenKind::ParenOpen, "expected '(' after 'foreach'");
        self.consume(TokenKind::Ident, "expected variable name after 'foreach'");
        let key_name;
        let value_name;
        if !self.check(TokenKind::Comma) {
            key_name = " _ ".to_string();
            value_name = self.string_of_token(self.previous);
        } else {
            key_name = self.string_of_token(self.previous);
            self.consume(TokenKind::Comma, "");
            self.consume(TokenKind::Ident, "expected variable name after ','");
            value_name = self.string_of_token(self.previous);
        }
        self.consume(TokenKind::KwIn, "expected 'in' after for loop variable(s)");
        self.expression();
        self.consume(TokenKind::ParenClose, "expected ')' after 'foreach'");
        let iterator_slot = self.add_local(" iterator") as u16;
        self.mark_initialized();
        self.emit_op(OpCode::PushNull);
        let key_slot = self.add_local(&key_name) as u16;
        self.mark_initialized();
        self.emit_op(OpCode::PushNull);
        let value_slot = self.add_local(&value_name) as u16;
        self.mark_initialized();
        let loop_start = self.blob_len();
        self.loop_body(loop_start, |p| {
            // key = iterable.@itern(key)
            p.emit_op_short(OpCode::LocalGet, iterator_slot);
            p.emit_op_short(OpCode::LocalGet, key_slot);
            p.emit_op(OpCode::Invoke);
            p.emit_short(citern);
            p.emit_byte(1);
            p.emit_op_short(OpCode::LocalSet, key_slot);
            let false_jump = p.emit_jump(OpCode::JumpIfFalse);
            p.emit_op(OpCode::Pop);
            // value = iterable.@iter(key)
            p.emit_op_short(OpCode::LocalGet, iterator_slot);
            p.emit_op_short(OpCode::LocalGet, key_slot);
            p.emit_op(OpCode::Invoke);
            p.emit_short(citer);
            p.emit_byte(1);
            // fresh binding per iteration so closures do not share it
            p.begin_scope();
            p.emit_op_short(OpCode::LocalSet, value_slot);
            p.emit_op(OpCode::Pop);
            p.statement();
            p.end_scope();
            p.emit_loop(loop_start);
            p.patch_jump(false_jump);
            p.emit_op(OpCode::Pop);
            p.end_loop(loop_start);
        });
        self.end_scope();
    }

    fn switch_statement(&mut self) {
        self.consume(TokenKind::ParenOpen, "expected '(' before 'switch'");
        self.expression();
        self.consume(TokenKind::ParenClose, "expected ')' after 'switch'");
        self.consume(TokenKind::BraceOpen, "expected '{' after 'switch' expression");
        let mut table = SwitchTable::new();
        self.emit_op(OpCode::Switch);
        self.emit_short(0xffff);
        let operand_at = self.blob_len() - 2;
        let start_offset = self.blob_len();
        // 0: before all cases, 1: inside a case, 2: after default
        let mut state = 0u8;
        let mut case_ends: Vec<usize> = Vec::new();
        let saved_in_switch = self.in_switch;
        self.in_switch = true;
        while !self.matches(TokenKind::BraceClose) && !self.check(TokenKind::Eof) {
            if self.matches(TokenKind::KwCase) || self.matches(TokenKind::KwDefault) {
                let case_kind = self.previous.kind;
                if state == 2 {
                    self.error("cannot have another case after a default case");
                }
                if state == 1 {
                    // close the previous case: jump over the rest
                    case_ends.push(self.emit_jump(OpCode::Jump));
                }
                if case_kind == TokenKind::KwCase {
                    state = 1;
                    loop {
                        self.advance();
                        let offset = (self.blob_len() - start_offset) as u16;
                        let key = match self.previous.kind {
                            TokenKind::KwTrue => Some(CaseKey::Bool(true)),
                            TokenKind::KwFalse => Some(CaseKey::Bool(false)),
                            TokenKind::Str | TokenKind::RawStr => {
                                let s = self.string_value();
                                Some(CaseKey::Str(Rc::from(s.as_str())))
                            }
                            TokenKind::Number
                            | TokenKind::BinNumber
                            | TokenKind::OctNumber
                            | TokenKind::HexNumber => Some(CaseKey::number(self.number_value())),
                            _ => None,
                        };
                        match key {
                            Some(key) => {
                                table.cases.insert(key, offset);
                            }
                            None => {
                                self.error("only constants can be used in 'case' expressions");
                                self.in_switch = saved_in_switch;
                                return;
                            }
                        }
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.consume(TokenKind::Colon, "expected ':' after 'case' constants");
                } else {
                    self.consume(TokenKind::Colon, "expected ':' after 'default'");
                    state = 2;
                    table.default_offset = Some((self.blob_len() - start_offset) as u16);
                }
            } else {
                if state == 0 {
                    self.error("cannot have statements before any case");
                }
                self.statement();
            }
        }
        if state == 1 {
            case_ends.push(self.emit_jump(OpCode::Jump));
        }
        for end in case_ends {
            self.patch_jump(end);
        }
        table.exit_offset = (self.blob_len() - start_offset) as u16;
        let idx = self.make_constant(Constant::Switch(Rc::new(table)));
        let blob = &mut self.fc().proto.blob;
        blob.code[operand_at].code = (idx >> 8) as u8;
        blob.code[operand_at + 1].code = idx as u8;
        self.in_switch = saved_in_switch;
    }

    fn continue_statement(&mut self) {
        if self.innermost_loop_start == -1 {
            self.error("'continue' can only be used in a loop");
        }
        self.discard_locals(self.innermost_loop_scope_depth + 1);
        let start = self.innermost_loop_start.max(0) as usize;
        self.emit_loop(start);
        self.consume_stmt_end();
    }

    fn break_statement(&mut self) {
        if !self.in_switch {
            if self.innermost_loop_start == -1 {
                self.error("'break' can only be used in a loop");
            }
            self.discard_locals(self.innermost_loop_scope_depth + 1);
            self.emit_jump(OpCode::BreakPlaceholder);
        }
        self.consume_stmt_end();
    }

    fn return_statement(&mut self) {
        if self.matches(TokenKind::Semicolon)
            || self.check(TokenKind::BraceClose)
            || self.check(TokenKind::Eof)
        {
            self.emit_return();
            return;
        }
        if self.fc_ref().proto.kind == FuncKind::Initializer {
            self.error("cannot return value from constructor");
        }
        if self.in_try {
            self.emit_op(OpCode::TryPop);
        }
        self.expression();
        self.emit_op(OpCode::Return);
        self.consume_stmt_end();
    }

    fn assert_statement(&mut self) {
        self.consume(TokenKind::ParenOpen, "expected '(' after 'assert'");
        self.expression();
        if self.matches(TokenKind::Comma) {
            self.expression();
        } else {
            self.emit_op(OpCode::PushNull);
        }
        self.emit_op(OpCode::Assert);
        self.consume(TokenKind::ParenClose, "expected ')' after 'assert'");
        self.consume_stmt_end();
    }

    fn throw_statement(&mut self) {
        self.expression();
        self.emit_op(OpCode::Throw);
        self.consume_stmt_end();
    }

    /// `try`/`catch`/`finally`. The handler registration carries the
    /// exception-class constant and both target addresses; the `finally`
    /// body runs behind a pushed re-publish flag — false on the normal
    /// path, true when the exception machinery jumps in.
    fn try_statement(&mut self) {
        self.emit_op(OpCode::TryPush);
        self.emit_short(0xffff);
        self.emit_short(0);
        self.emit_short(0);
        let operand_at = self.blob_len() - 6;
        let was_in_try = self.in_try;
        self.in_try = true;
        self.statement();
        self.emit_op(OpCode::TryPop);
        let exit_jump = self.emit_jump(OpCode::Jump);
        self.in_try = was_in_try;

        let mut type_const = None;
        let mut catch_address = 0usize;
        let mut catch_exists = false;
        if self.matches(TokenKind::KwCatch) {
            catch_exists = true;
            self.begin_scope();
            self.consume(TokenKind::ParenOpen, "expected '(' after 'catch'");
            self.consume(TokenKind::Ident, "missing exception class name");
            type_const = Some(self.ident_constant(self.previous));
            catch_address = self.blob_len();
            if self.matches(TokenKind::Ident) {
                self.created_var(self.previous);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.consume(TokenKind::ParenClose, "expected ')' after 'catch'");
            self.emit_op(OpCode::TryPop);
            self.statement();
            self.end_scope();
        }
        self.patch_jump(exit_jump);

        let mut finally_address = 0usize;
        let mut finally_exists = false;
        if self.matches(TokenKind::KwFinally) {
            finally_exists = true;
            // reaching here normally means no exception is in flight
            self.emit_op(OpCode::PushFalse);
            finally_address = self.blob_len();
            self.statement();
            let continue_jump = self.emit_jump(OpCode::JumpIfFalse);
            self.emit_op(OpCode::Pop);
            self.emit_op(OpCode::TryPublish);
            self.patch_jump(continue_jump);
            self.emit_op(OpCode::Pop);
        }
        if !catch_exists && !finally_exists {
            self.error("try block must contain at least one of catch or finally");
        }

        let type_const = match type_const {
            Some(idx) => idx,
            None => self.name_constant("Exception"),
        };
        let blob = &mut self.fc().proto.blob;
        blob.code[operand_at].code = (type_const >> 8) as u8;
        blob.code[operand_at + 1].code = type_const as u8;
        blob.code[operand_at + 2].code = ((catch_address >> 8) & 0xff) as u8;
        blob.code[operand_at + 3].code = (catch_address & 0xff) as u8;
        blob.code[operand_at + 4].code = ((finally_address >> 8) & 0xff) as u8;
        blob.code[operand_at + 5].code = (finally_address & 0xff) as u8;
    }
}
