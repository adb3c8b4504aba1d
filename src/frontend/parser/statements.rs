//! Statement parsing: the keyword-indexed dispatch, automatic semicolon
//! insertion points, labels, and function declarations.

use rustc_hash::FxHashSet;

use crate::common::error::ParseError;
use crate::frontend::lexer::token::{
    is_strict_bad_id_word, is_strict_reserved_word, TokenType,
};

use super::ast::{LiteralValue, Node, NodeKind};
use super::parser::{Label, LabelKind, Marker, Parser};

/// Is this statement a `"use strict"` directive prologue entry?
fn is_use_strict(stmt: &Node) -> bool {
    if let NodeKind::ExpressionStatement { expression } = &stmt.kind {
        if let NodeKind::Literal { value: LiteralValue::Str(s), raw } = &expression.kind {
            // The spelling must be escape-free for the directive to count.
            return s == "use strict" && raw.len() == "'use strict'".len();
        }
    }
    false
}

impl Parser {
    /// Entry point: parse statements until end of input. When a `program`
    /// node is seeded through the options, new statements are appended to
    /// its body.
    pub(crate) fn parse_top_level(&mut self, program: Option<Node>) -> Result<Node, ParseError> {
        let marker = self.marker_at(0, self.tok_start_loc.map(|_| crate::common::source::Position::new(1, 0)));
        let mut body = match program {
            Some(node) => match node.kind {
                NodeKind::Program { body } => body,
                _ => return self.raise(0, "The program option must hold a Program node"),
            },
            None => Vec::new(),
        };
        let mut first = true;
        while self.tok_type != TokenType::Eof
            || self.node_message_send_object_expression.is_some()
        {
            let stmt = self.parse_statement()?;
            if first && is_use_strict(&stmt) && !self.strict {
                self.set_strict(true)?;
            }
            body.push(stmt);
            first = false;
        }
        Ok(self.finish_node(marker, NodeKind::Program { body }))
    }

    pub(crate) fn parse_statement(&mut self) -> Result<Node, ParseError> {
        // A bracketed expression latched by the previous statement opens a
        // message-send statement here.
        if self.node_message_send_object_expression.is_some() {
            return self.parse_pending_message_send_statement();
        }

        let starttype = self.tok_type;
        let marker = self.start_marker();
        match starttype {
            TokenType::Break | TokenType::Continue => self.parse_break_continue(marker, starttype),
            TokenType::Debugger => {
                self.next()?;
                self.semicolon()?;
                Ok(self.finish_node(marker, NodeKind::DebuggerStatement))
            }
            TokenType::Do => {
                self.next()?;
                self.labels.push(Label { name: String::new(), kind: Some(LabelKind::Loop) });
                let body = self.parse_statement()?;
                self.labels.pop();
                self.expect(TokenType::While)?;
                let test = self.parse_paren_expression()?;
                self.semicolon()?;
                Ok(self.finish_node(
                    marker,
                    NodeKind::DoWhileStatement { body: Box::new(body), test: Box::new(test) },
                ))
            }
            TokenType::For => self.parse_for(marker),
            TokenType::Function => {
                self.next()?;
                self.parse_function(marker, true)
            }
            TokenType::If => {
                self.next()?;
                let test = self.parse_paren_expression()?;
                let consequent = self.parse_statement()?;
                let alternate = if self.eat(TokenType::Else)? {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(self.finish_node(
                    marker,
                    NodeKind::IfStatement {
                        test: Box::new(test),
                        consequent: Box::new(consequent),
                        alternate,
                    },
                ))
            }
            TokenType::Return => {
                if !self.in_function {
                    return self.raise(self.tok_start, "'return' outside of function");
                }
                self.next()?;
                let argument = if self.eat(TokenType::Semi)? {
                    None
                } else if self.can_insert_semicolon() {
                    None
                } else {
                    let arg = self.parse_expression(false, false)?;
                    self.semicolon()?;
                    Some(Box::new(arg))
                };
                Ok(self.finish_node(marker, NodeKind::ReturnStatement { argument }))
            }
            TokenType::Switch => self.parse_switch(marker),
            TokenType::Throw => {
                self.next()?;
                if self.tok_first_on_line {
                    return self.raise(self.last_end, "Illegal newline after throw");
                }
                let argument = self.parse_expression(false, false)?;
                self.semicolon()?;
                Ok(self.finish_node(
                    marker,
                    NodeKind::ThrowStatement { argument: Box::new(argument) },
                ))
            }
            TokenType::Try => self.parse_try(marker),
            TokenType::Var => {
                self.next()?;
                let declarations = self.parse_var_declarations(false)?;
                self.semicolon()?;
                Ok(self.finish_node(
                    marker,
                    NodeKind::VariableDeclaration { declarations, kind: "var" },
                ))
            }
            TokenType::While => {
                self.next()?;
                let test = self.parse_paren_expression()?;
                self.labels.push(Label { name: String::new(), kind: Some(LabelKind::Loop) });
                let body = self.parse_statement()?;
                self.labels.pop();
                Ok(self.finish_node(
                    marker,
                    NodeKind::WhileStatement { test: Box::new(test), body: Box::new(body) },
                ))
            }
            TokenType::With => {
                if self.strict {
                    return self.raise(self.tok_start, "'with' in strict mode");
                }
                self.next()?;
                let object = self.parse_paren_expression()?;
                let body = self.parse_statement()?;
                Ok(self.finish_node(
                    marker,
                    NodeKind::WithStatement { object: Box::new(object), body: Box::new(body) },
                ))
            }
            TokenType::BraceL => self.parse_block_rest(marker, false),
            TokenType::Semi => {
                self.next()?;
                Ok(self.finish_node(marker, NodeKind::EmptyStatement))
            }
            // Objective-J statements
            TokenType::Implementation => self.parse_class_declaration(marker, false),
            TokenType::Interface => self.parse_class_declaration(marker, true),
            TokenType::Protocol => self.parse_protocol_statement(marker),
            TokenType::Import => self.parse_import_statement(marker),
            TokenType::Class => {
                self.next()?;
                let id = self.parse_ident(false)?;
                self.semicolon()?;
                Ok(self.finish_node(marker, NodeKind::ClassStatement { id: Box::new(id) }))
            }
            TokenType::Global => {
                self.next()?;
                let id = self.parse_ident(false)?;
                self.semicolon()?;
                Ok(self.finish_node(marker, NodeKind::GlobalStatement { id: Box::new(id) }))
            }
            _ => {
                let expr = self.parse_expression(false, false)?;
                if starttype == TokenType::Name
                    && matches!(&expr.kind, NodeKind::Identifier { .. })
                    && self.eat(TokenType::Colon)?
                {
                    return self.parse_labeled_statement(marker, expr);
                }
                self.semicolon()?;
                Ok(self.finish_node(
                    marker,
                    NodeKind::ExpressionStatement { expression: Box::new(expr) },
                ))
            }
        }
    }

    fn parse_labeled_statement(&mut self, marker: Marker, label: Node) -> Result<Node, ParseError> {
        let name = match &label.kind {
            NodeKind::Identifier { name } => name.clone(),
            _ => unreachable!("label is an identifier"),
        };
        if self.labels.iter().any(|l| l.name == name) {
            return self.raise(label.start, format!("Label '{}' is already declared", name));
        }
        let kind = if self.tok_type.is_loop() {
            Some(LabelKind::Loop)
        } else if self.tok_type == TokenType::Switch {
            Some(LabelKind::Switch)
        } else {
            None
        };
        self.labels.push(Label { name, kind });
        let body = self.parse_statement()?;
        self.labels.pop();
        Ok(self.finish_node(
            marker,
            NodeKind::LabeledStatement { label: Box::new(label), body: Box::new(body) },
        ))
    }

    fn parse_break_continue(
        &mut self,
        marker: Marker,
        starttype: TokenType,
    ) -> Result<Node, ParseError> {
        let is_break = starttype == TokenType::Break;
        let keyword_pos = self.tok_start;
        self.next()?;
        let label = if self.eat(TokenType::Semi)? || self.can_insert_semicolon() {
            None
        } else if self.tok_type == TokenType::Name {
            let id = self.parse_ident(false)?;
            self.semicolon()?;
            Some(id)
        } else {
            return self.unexpected();
        };

        let word = if is_break { "break" } else { "continue" };
        let mut found = false;
        for l in &self.labels {
            match &label {
                None => {
                    if l.kind == Some(LabelKind::Loop)
                        || (is_break && l.kind == Some(LabelKind::Switch))
                    {
                        found = true;
                        break;
                    }
                }
                Some(id) => {
                    let name = match &id.kind {
                        NodeKind::Identifier { name } => name,
                        _ => continue,
                    };
                    if &l.name == name && (is_break || l.kind == Some(LabelKind::Loop)) {
                        found = true;
                        break;
                    }
                }
            }
        }
        if !found {
            return self.raise(keyword_pos, format!("Unsyntactic {}", word));
        }
        let kind = if is_break {
            NodeKind::BreakStatement { label: label.map(Box::new) }
        } else {
            NodeKind::ContinueStatement { label: label.map(Box::new) }
        };
        Ok(self.finish_node(marker, kind))
    }

    fn parse_switch(&mut self, marker: Marker) -> Result<Node, ParseError> {
        self.next()?;
        let discriminant = self.parse_paren_expression()?;
        self.expect(TokenType::BraceL)?;
        self.labels.push(Label { name: String::new(), kind: Some(LabelKind::Switch) });
        let mut cases: Vec<Node> = Vec::new();
        let mut saw_default = false;
        while self.tok_type != TokenType::BraceR {
            let cmarker = self.start_marker();
            let test = match self.tok_type {
                TokenType::Case => {
                    self.next()?;
                    Some(Box::new(self.parse_expression(false, false)?))
                }
                TokenType::Default => {
                    if saw_default {
                        return self.raise(self.tok_start, "Multiple default clauses");
                    }
                    saw_default = true;
                    self.next()?;
                    None
                }
                _ => return self.unexpected(),
            };
            self.expect(TokenType::Colon)?;
            let mut consequent = Vec::new();
            while !matches!(
                self.tok_type,
                TokenType::Case | TokenType::Default | TokenType::BraceR
            ) {
                consequent.push(self.parse_statement()?);
            }
            cases.push(self.finish_node(cmarker, NodeKind::SwitchCase { test, consequent }));
        }
        self.next()?; // '}'
        self.labels.pop();
        Ok(self.finish_node(
            marker,
            NodeKind::SwitchStatement { discriminant: Box::new(discriminant), cases },
        ))
    }

    fn parse_try(&mut self, marker: Marker) -> Result<Node, ParseError> {
        self.next()?;
        let block = self.parse_block(false)?;
        let handler = if self.tok_type == TokenType::Catch {
            let cmarker = self.start_marker();
            self.next()?;
            self.expect(TokenType::ParenL)?;
            let param = self.parse_ident(false)?;
            if self.strict {
                if let NodeKind::Identifier { name } = &param.kind {
                    if is_strict_bad_id_word(name) {
                        return self.raise(
                            param.start,
                            format!("Binding {} in strict mode", name),
                        );
                    }
                }
            }
            self.expect(TokenType::ParenR)?;
            let body = self.parse_block(false)?;
            Some(Box::new(self.finish_node(
                cmarker,
                NodeKind::CatchClause { param: Box::new(param), body: Box::new(body) },
            )))
        } else {
            None
        };
        let finalizer = if self.eat(TokenType::Finally)? {
            Some(Box::new(self.parse_block(false)?))
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return self.raise(marker.start, "Missing catch or finally clause");
        }
        Ok(self.finish_node(
            marker,
            NodeKind::TryStatement { block: Box::new(block), handler, finalizer },
        ))
    }

    fn parse_for(&mut self, marker: Marker) -> Result<Node, ParseError> {
        self.next()?;
        self.expect(TokenType::ParenL)?;
        if self.tok_type == TokenType::Semi {
            return self.parse_for_rest(marker, None);
        }
        if self.tok_type == TokenType::Var {
            let vmarker = self.start_marker();
            self.next()?;
            let declarations = self.parse_var_declarations(true)?;
            let single = declarations.len() == 1;
            let init = self.finish_node(
                vmarker,
                NodeKind::VariableDeclaration { declarations, kind: "var" },
            );
            if single && self.tok_type == TokenType::In {
                return self.parse_for_in(marker, init);
            }
            return self.parse_for_rest(marker, Some(init));
        }
        let init = self.parse_expression(false, true)?;
        if self.tok_type == TokenType::In {
            self.check_lval(&init)?;
            return self.parse_for_in(marker, init);
        }
        self.parse_for_rest(marker, Some(init))
    }

    fn parse_for_rest(&mut self, marker: Marker, init: Option<Node>) -> Result<Node, ParseError> {
        self.expect(TokenType::Semi)?;
        let test = if self.tok_type == TokenType::Semi {
            None
        } else {
            Some(Box::new(self.parse_expression(false, false)?))
        };
        self.expect(TokenType::Semi)?;
        let update = if self.tok_type == TokenType::ParenR {
            None
        } else {
            Some(Box::new(self.parse_expression(false, false)?))
        };
        self.expect(TokenType::ParenR)?;
        self.labels.push(Label { name: String::new(), kind: Some(LabelKind::Loop) });
        let body = self.parse_statement()?;
        self.labels.pop();
        Ok(self.finish_node(
            marker,
            NodeKind::ForStatement {
                init: init.map(Box::new),
                test,
                update,
                body: Box::new(body),
            },
        ))
    }

    fn parse_for_in(&mut self, marker: Marker, left: Node) -> Result<Node, ParseError> {
        self.next()?; // 'in'
        let right = self.parse_expression(false, false)?;
        self.expect(TokenType::ParenR)?;
        self.labels.push(Label { name: String::new(), kind: Some(LabelKind::Loop) });
        let body = self.parse_statement()?;
        self.labels.pop();
        Ok(self.finish_node(
            marker,
            NodeKind::ForInStatement {
                left: Box::new(left),
                right: Box::new(right),
                body: Box::new(body),
            },
        ))
    }

    pub(crate) fn parse_var_declarations(
        &mut self,
        no_in: bool,
    ) -> Result<Vec<Node>, ParseError> {
        let mut declarations = Vec::new();
        loop {
            let dmarker = self.start_marker();
            let id = self.parse_ident(false)?;
            if self.strict {
                if let NodeKind::Identifier { name } = &id.kind {
                    if is_strict_bad_id_word(name) {
                        return self.raise(id.start, format!("Binding {} in strict mode", name));
                    }
                }
            }
            let init = if self.eat(TokenType::Eq)? {
                Some(Box::new(self.parse_maybe_assign(no_in)?))
            } else {
                None
            };
            declarations.push(
                self.finish_node(dmarker, NodeKind::VariableDeclarator { id: Box::new(id), init }),
            );
            if !self.eat(TokenType::Comma)? {
                break;
            }
        }
        Ok(declarations)
    }

    pub(crate) fn parse_paren_expression(&mut self) -> Result<Node, ParseError> {
        self.expect(TokenType::ParenL)?;
        let expr = self.parse_expression(false, false)?;
        self.expect(TokenType::ParenR)?;
        Ok(expr)
    }

    /// `{ ... }`. With `allow_strict`, a leading `"use strict"` switches
    /// the parser into strict mode (the caller restores it).
    pub(crate) fn parse_block(&mut self, allow_strict: bool) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        self.expect(TokenType::BraceL)?;
        self.parse_block_rest_inner(marker, allow_strict)
    }

    /// Block body when the `{` is the current token of a statement.
    fn parse_block_rest(&mut self, marker: Marker, allow_strict: bool) -> Result<Node, ParseError> {
        self.next()?; // '{'
        self.parse_block_rest_inner(marker, allow_strict)
    }

    fn parse_block_rest_inner(
        &mut self,
        marker: Marker,
        allow_strict: bool,
    ) -> Result<Node, ParseError> {
        let mut body = Vec::new();
        let mut first = true;
        loop {
            if self.tok_type == TokenType::Eof {
                return self.unexpected();
            }
            if self.eat(TokenType::BraceR)? {
                break;
            }
            let stmt = self.parse_statement()?;
            if first && allow_strict && is_use_strict(&stmt) && !self.strict {
                self.set_strict(true)?;
            }
            body.push(stmt);
            first = false;
        }
        Ok(self.finish_node(marker, NodeKind::BlockStatement { body }))
    }

    /// Function declarations and expressions. The `function` keyword has
    /// been consumed; `marker` points at it.
    pub(crate) fn parse_function(
        &mut self,
        marker: Marker,
        is_statement: bool,
    ) -> Result<Node, ParseError> {
        let id = if self.tok_type == TokenType::Name {
            Some(self.parse_ident(false)?)
        } else if is_statement {
            return self.unexpected();
        } else {
            None
        };

        self.expect(TokenType::ParenL)?;
        let mut params = Vec::new();
        let mut first = true;
        while !self.eat(TokenType::ParenR)? {
            if !first {
                self.expect(TokenType::Comma)?;
            }
            params.push(self.parse_ident(false)?);
            first = false;
        }

        let old_in_function = self.in_function;
        let old_labels = std::mem::take(&mut self.labels);
        let old_strict = self.strict;
        self.in_function = true;
        let body = self.parse_block(true)?;
        self.in_function = old_in_function;
        self.labels = old_labels;

        // Strict functions reject reserved/restricted names and duplicate
        // parameters, including when strictness came from the body prologue.
        if self.strict {
            let check = |node: &Node| -> Result<(), ParseError> {
                if let NodeKind::Identifier { name } = &node.kind {
                    if is_strict_bad_id_word(name) {
                        return self.raise(
                            node.start,
                            format!("Defining '{}' in strict mode", name),
                        );
                    }
                    if is_strict_reserved_word(name) {
                        return self.raise(
                            node.start,
                            format!("The keyword '{}' is reserved in strict mode", name),
                        );
                    }
                }
                Ok(())
            };
            if let Some(id) = &id {
                check(id)?;
            }
            let mut names: FxHashSet<&str> = FxHashSet::default();
            for param in &params {
                check(param)?;
                if let NodeKind::Identifier { name } = &param.kind {
                    if !names.insert(name.as_str()) {
                        return self.raise(
                            param.start,
                            "Argument name clash in strict mode",
                        );
                    }
                }
            }
        }
        if self.strict != old_strict {
            self.set_strict(old_strict)?;
        }

        let kind = if is_statement {
            NodeKind::FunctionDeclaration {
                id: Box::new(id.expect("statement functions are named")),
                params,
                body: Box::new(body),
            }
        } else {
            NodeKind::FunctionExpression { id: id.map(Box::new), params, body: Box::new(body) }
        };
        Ok(self.finish_node(marker, kind))
    }
}
