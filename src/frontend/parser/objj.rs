//! Objective-J syntax: class-ish declarations, typed instance variables,
//! method signatures, message sends, and the `@` literal family.
//!
//! Message sends share their opening bracket with array literals and
//! subscripts. At expression-start the two are told apart after the first
//! element (a `,` or `]` means array); after a complete expression the
//! subscript parser latches the bracketed expression and the enclosing
//! statement re-enters here through `parse_pending_message_send_statement`.

use crate::common::error::ParseError;
use crate::frontend::lexer::token::TokenType;

use super::ast::{Accessors, MethodArgument, Node, NodeKind};
use super::parser::{Marker, Parser};

impl Parser {
    // === Statements ===

    /// `@implementation` / `@interface` declarations: shared shape per the
    /// two keywords, differing only in whether methods carry bodies.
    pub(crate) fn parse_class_declaration(
        &mut self,
        marker: Marker,
        is_interface: bool,
    ) -> Result<Node, ParseError> {
        let decl_start = self.tok_start;
        self.next()?;
        let classname = self.parse_ident(false)?;

        let mut superclassname = None;
        let mut categoryname = None;
        if self.eat(TokenType::ParenL)? {
            categoryname = Some(Box::new(self.parse_ident(false)?));
            self.expect(TokenType::ParenR)?;
        } else if self.eat(TokenType::Colon)? {
            superclassname = Some(Box::new(self.parse_ident(false)?));
        }
        let protocols = self.parse_protocol_list()?;
        let ivardeclarations = if self.tok_type == TokenType::BraceL {
            self.parse_ivar_declarations()?
        } else {
            Vec::new()
        };

        let mut body = Vec::new();
        loop {
            match self.tok_type {
                TokenType::End => {
                    self.next()?;
                    break;
                }
                TokenType::Eof => {
                    let which = if is_interface { "@interface" } else { "@implementation" };
                    return self.raise(decl_start, format!("Expected @end after {}", which));
                }
                TokenType::PlusMin => {
                    body.push(self.parse_method_declaration(!is_interface)?);
                }
                _ => body.push(self.parse_statement()?),
            }
        }

        let kind = if is_interface {
            NodeKind::InterfaceDeclarationStatement {
                classname: Box::new(classname),
                superclassname,
                categoryname,
                protocols,
                ivardeclarations,
                body,
            }
        } else {
            NodeKind::ClassDeclarationStatement {
                classname: Box::new(classname),
                superclassname,
                categoryname,
                protocols,
                ivardeclarations,
                body,
            }
        };
        Ok(self.finish_node(marker, kind))
    }

    /// Statement-position `@protocol`: either a protocol declaration or,
    /// when followed by `(`, the literal expression form.
    pub(crate) fn parse_protocol_statement(&mut self, marker: Marker) -> Result<Node, ParseError> {
        let proto_start = self.tok_start;
        let proto_loc = self.tok_start_loc;
        self.next()?;
        if self.tok_type == TokenType::ParenL {
            // `@protocol(Name)` used as an expression statement.
            let lmarker = self.marker_at(proto_start, proto_loc);
            self.next()?;
            let id = self.parse_ident(false)?;
            self.expect(TokenType::ParenR)?;
            let literal = self.finish_node(
                lmarker,
                NodeKind::ProtocolLiteralExpression { id: Box::new(id) },
            );
            let mut expr = self.parse_subscripts(literal, false)?;
            expr = self.parse_expr_op(expr, -1, false)?;
            expr = self.parse_conditional_rest(expr, false)?;
            self.semicolon()?;
            return Ok(self.finish_node(
                marker,
                NodeKind::ExpressionStatement { expression: Box::new(expr) },
            ));
        }

        let protocolname = self.parse_ident(false)?;
        let protocols = self.parse_protocol_list()?;
        let mut required: Vec<Node> = Vec::new();
        let mut optional: Vec<Node> = Vec::new();
        let mut in_optional = false;
        loop {
            match self.tok_type {
                TokenType::End => {
                    self.next()?;
                    break;
                }
                TokenType::Eof => {
                    return self.raise(proto_start, "Expected @end after @protocol");
                }
                TokenType::Required => {
                    in_optional = false;
                    self.next()?;
                }
                TokenType::Optional => {
                    in_optional = true;
                    self.next()?;
                }
                TokenType::PlusMin => {
                    let method = self.parse_method_declaration(false)?;
                    if in_optional {
                        optional.push(method);
                    } else {
                        required.push(method);
                    }
                }
                _ => return self.unexpected(),
            }
        }
        Ok(self.finish_node(
            marker,
            NodeKind::ProtocolDeclarationStatement {
                protocolname: Box::new(protocolname),
                protocols,
                required,
                optional,
            },
        ))
    }

    pub(crate) fn parse_import_statement(&mut self, marker: Marker) -> Result<Node, ParseError> {
        self.next()?;
        let local = match self.tok_type {
            TokenType::String => true,
            TokenType::Filename => false,
            _ => {
                return self.raise(self.tok_start, "Expected \" or < after @import");
            }
        };
        let filename = self.parse_literal()?;
        Ok(self.finish_node(
            marker,
            NodeKind::ImportStatement { filename: Box::new(filename), local },
        ))
    }

    /// `< P1, P2 >` protocol conformance list, when present.
    fn parse_protocol_list(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut protocols = Vec::new();
        if self.tok_type == TokenType::Relational && self.tok_value.punct() == Some("<") {
            self.next()?;
            loop {
                protocols.push(self.parse_ident(false)?);
                if !self.eat(TokenType::Comma)? {
                    break;
                }
            }
            if self.tok_type == TokenType::Relational && self.tok_value.punct() == Some(">") {
                self.next()?;
            } else {
                return self.unexpected();
            }
        }
        Ok(protocols)
    }

    // === Instance variables ===

    fn parse_ivar_declarations(&mut self) -> Result<Vec<Node>, ParseError> {
        self.expect(TokenType::BraceL)?;
        let mut declarations = Vec::new();
        while !self.eat(TokenType::BraceR)? {
            if self.tok_type == TokenType::Eof {
                return self.unexpected();
            }
            let marker = self.start_marker();
            let mut outlet = false;
            if self.tok_type == TokenType::Outlet {
                outlet = true;
                self.next()?;
            } else if self.tok_name() == Some("IBOutlet") {
                outlet = true;
                self.next()?;
            }
            let ivartype = self.parse_objective_j_type()?;
            let mut first = true;
            loop {
                let dmarker = if first {
                    Marker {
                        start: marker.start,
                        start_loc: marker.start_loc,
                        comments: None,
                        spaces: None,
                    }
                } else {
                    self.start_marker()
                };
                let id = self.parse_ident(false)?;
                let accessors = self.parse_accessors()?;
                let mut decl = self.finish_node(
                    dmarker,
                    NodeKind::IvarDeclaration {
                        ivartype: Box::new(ivartype.clone()),
                        id: Box::new(id),
                        outlet,
                        accessors,
                    },
                );
                if first {
                    decl.comments_before = marker.comments.clone();
                    decl.spaces_before = marker.spaces.clone();
                }
                declarations.push(decl);
                first = false;
                if !self.eat(TokenType::Comma)? {
                    break;
                }
            }
            self.semicolon()?;
        }
        Ok(declarations)
    }

    /// Optional `@accessors` with its attribute list.
    fn parse_accessors(&mut self) -> Result<Option<Accessors>, ParseError> {
        if self.tok_type != TokenType::Accessors {
            return Ok(None);
        }
        self.next()?;
        let mut accessors = Accessors::default();
        if self.eat(TokenType::ParenL)? {
            while !self.eat(TokenType::ParenR)? {
                let attr_pos = self.tok_start;
                let attr = match self.tok_name() {
                    Some(word) => word.to_string(),
                    None => return self.unexpected(),
                };
                self.next()?;
                match attr.as_str() {
                    "property" | "getter" | "setter" => {
                        self.expect(TokenType::Eq)?;
                        let value = Some(Box::new(self.parse_ident(true)?));
                        match attr.as_str() {
                            "property" => accessors.property = value,
                            "getter" => accessors.getter = value,
                            _ => accessors.setter = value,
                        }
                    }
                    "readwrite" => accessors.readwrite = true,
                    "readonly" => accessors.readonly = true,
                    "copy" => accessors.copy = true,
                    _ => {
                        return self.raise(
                            attr_pos,
                            format!("Unknown accessors attribute '{}'", attr),
                        );
                    }
                }
                if self.tok_type != TokenType::ParenR {
                    self.expect(TokenType::Comma)?;
                }
            }
        }
        Ok(Some(accessors))
    }

    // === Types ===

    /// The Objective-J type grammar: `void`, `id` with an optional protocol
    /// list, the signed/unsigned integer family, or a class name.
    pub(crate) fn parse_objective_j_type(&mut self) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        if self.tok_type == TokenType::Void {
            self.next()?;
            return Ok(self.finish_node(
                marker,
                NodeKind::ObjectiveJType {
                    name: "void".to_string(),
                    typeisclass: false,
                    protocols: Vec::new(),
                },
            ));
        }
        let Some(word) = self.tok_name().map(str::to_string) else {
            return self.unexpected();
        };
        match word.as_str() {
            "id" => {
                self.next()?;
                let protocols = self.parse_protocol_list()?;
                Ok(self.finish_node(
                    marker,
                    NodeKind::ObjectiveJType { name: "id".to_string(), typeisclass: false, protocols },
                ))
            }
            "signed" | "unsigned" => {
                let mut name = word;
                self.next()?;
                if let Some(next) = self.tok_name() {
                    if matches!(next, "char" | "byte" | "short" | "int") {
                        let base = next.to_string();
                        self.next()?;
                        name.push(' ');
                        name.push_str(&base);
                        if base == "int" {
                            self.append_long_suffixes(&mut name)?;
                        }
                    }
                }
                Ok(self.finish_node(
                    marker,
                    NodeKind::ObjectiveJType { name, typeisclass: false, protocols: Vec::new() },
                ))
            }
            "char" | "byte" | "short" => {
                self.next()?;
                Ok(self.finish_node(
                    marker,
                    NodeKind::ObjectiveJType { name: word, typeisclass: false, protocols: Vec::new() },
                ))
            }
            "int" => {
                let mut name = word;
                self.next()?;
                self.append_long_suffixes(&mut name)?;
                Ok(self.finish_node(
                    marker,
                    NodeKind::ObjectiveJType { name, typeisclass: false, protocols: Vec::new() },
                ))
            }
            _ => {
                // Anything else names a class.
                self.next()?;
                Ok(self.finish_node(
                    marker,
                    NodeKind::ObjectiveJType { name: word, typeisclass: true, protocols: Vec::new() },
                ))
            }
        }
    }

    /// Up to two trailing `long` widenings on `int`.
    fn append_long_suffixes(&mut self, name: &mut String) -> Result<(), ParseError> {
        for _ in 0..2 {
            if self.tok_name() == Some("long") {
                self.next()?;
                name.push_str(" long");
            } else {
                break;
            }
        }
        Ok(())
    }

    // === Methods ===

    /// `+`/`-` method declaration with typed selector arguments. Bodies are
    /// parsed for `@implementation` methods; `@interface` and `@protocol`
    /// methods end at the signature.
    pub(crate) fn parse_method_declaration(&mut self, with_body: bool) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        let methodtype = if self.tok_value.punct() == Some("+") { '+' } else { '-' };
        self.next()?;

        let mut action = false;
        let mut returntype = None;
        if self.eat(TokenType::ParenL)? {
            if self.tok_type == TokenType::Action || self.tok_name() == Some("IBAction") {
                action = true;
                let amarker = self.start_marker();
                self.next()?;
                returntype =
                    Some(Box::new(self.finish_node(amarker, NodeKind::ObjectiveJActionType)));
            } else if self.tok_type != TokenType::ParenR {
                returntype = Some(Box::new(self.parse_objective_j_type()?));
            }
            self.expect(TokenType::ParenR)?;
        }

        let mut selectors: Vec<Option<Node>> = Vec::new();
        let mut arguments: Vec<MethodArgument> = Vec::new();
        let mut variadic = false;
        loop {
            let part = if self.tok_type == TokenType::Colon {
                None
            } else {
                Some(self.parse_ident(true)?)
            };
            selectors.push(part);
            if !self.eat(TokenType::Colon)? {
                // A part without a colon is a complete unary selector.
                if selectors.len() > 1 || selectors[0].is_none() {
                    return self.unexpected();
                }
                break;
            }
            let arg_type = if self.eat(TokenType::ParenL)? {
                let t = self.parse_objective_j_type()?;
                self.expect(TokenType::ParenR)?;
                Some(t)
            } else {
                None
            };
            let id = self.parse_ident(false)?;
            arguments.push(MethodArgument { arg_type, id });
            if self.tok_type == TokenType::Comma {
                self.next()?;
                self.expect_method_ellipsis()?;
                variadic = true;
                break;
            }
            // Another selector part follows, or the signature is done.
            let more = self.tok_type == TokenType::Colon
                || self.tok_type == TokenType::Name
                || self.tok_type.keyword().is_some();
            if !more {
                break;
            }
        }

        let body = if with_body {
            let old_in_function = self.in_function;
            let old_labels = std::mem::take(&mut self.labels);
            let old_strict = self.strict;
            self.in_function = true;
            let block = self.parse_block(true)?;
            self.in_function = old_in_function;
            self.labels = old_labels;
            if self.strict != old_strict {
                self.set_strict(old_strict)?;
            }
            Some(Box::new(block))
        } else {
            self.eat(TokenType::Semi)?;
            None
        };

        Ok(self.finish_node(
            marker,
            NodeKind::MethodDeclarationStatement {
                methodtype,
                action,
                returntype,
                selectors,
                arguments,
                variadic,
                body,
            },
        ))
    }

    /// `...` after the comma in a variadic method signature.
    fn expect_method_ellipsis(&mut self) -> Result<(), ParseError> {
        let mut end = None;
        for _ in 0..3 {
            if self.tok_type != TokenType::Dot {
                return self.raise(self.tok_start, "Expected '...' in method declaration");
            }
            if let Some(end) = end {
                if self.tok_start != end {
                    return self.raise(self.tok_start, "Expected '...' in method declaration");
                }
            }
            end = Some(self.tok_end);
            self.next()?;
        }
        Ok(())
    }

    // === Message sends ===

    /// Expression-start `[`: an array literal when the first element is
    /// followed by `,` or `]`, otherwise a message send.
    pub(crate) fn parse_array_or_message_send(&mut self) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        self.next()?; // '['
        if !self.lex.options.objj {
            return self.parse_array_rest(marker, None);
        }
        if self.tok_type == TokenType::BracketR {
            self.next()?;
            return Ok(self.finish_node(marker, NodeKind::ArrayExpression { elements: Vec::new() }));
        }
        if self.tok_type == TokenType::Comma {
            // A hole: definitely an array.
            return self.parse_array_rest(marker, Some(None));
        }
        let first = self.parse_maybe_assign(false)?;
        match self.tok_type {
            TokenType::Comma | TokenType::BracketR => {
                self.parse_array_rest(marker, Some(Some(first)))
            }
            _ => self.parse_message_send_rest(marker, first),
        }
    }

    /// A message send latched by the previous statement's subscript parse:
    /// build the send, then let it continue as a full expression statement.
    pub(crate) fn parse_pending_message_send_statement(&mut self) -> Result<Node, ParseError> {
        let pending = self
            .node_message_send_object_expression
            .take()
            .expect("checked by caller");
        let stmt_marker = self.marker_at(pending.bracket_start, pending.bracket_start_loc);
        let msg_marker = self.marker_at(pending.bracket_start, pending.bracket_start_loc);
        let send = self.parse_message_send_rest(msg_marker, pending.object)?;
        let mut expr = self.parse_subscripts(send, false)?;
        expr = self.parse_expr_op(expr, -1, false)?;
        expr = self.parse_conditional_rest(expr, false)?;
        self.semicolon()?;
        Ok(self.finish_node(
            stmt_marker,
            NodeKind::ExpressionStatement { expression: Box::new(expr) },
        ))
    }

    /// Selector parts, arguments, and the trailing variadic list up to `]`.
    /// `object` is the already-parsed receiver; `super` is recorded as a
    /// flag instead of an object expression.
    fn parse_message_send_rest(&mut self, marker: Marker, object: Node) -> Result<Node, ParseError> {
        let (object, super_object) = match &object.kind {
            NodeKind::Identifier { name } if name == "super" => (None, true),
            _ => (Some(Box::new(object)), false),
        };
        let mut selectors: Vec<Option<Node>> = Vec::new();
        let mut arguments: Vec<Node> = Vec::new();
        let mut parameters: Vec<Node> = Vec::new();
        loop {
            match self.tok_type {
                TokenType::BracketR => {
                    self.next()?;
                    break;
                }
                TokenType::Eof => return self.unexpected(),
                TokenType::Comma => {
                    while self.eat(TokenType::Comma)? {
                        parameters.push(self.parse_maybe_assign(false)?);
                    }
                    self.expect(TokenType::BracketR)?;
                    break;
                }
                TokenType::Colon => {
                    selectors.push(None);
                    self.next()?;
                    arguments.push(self.parse_maybe_assign(false)?);
                }
                _ => {
                    let part = self.parse_ident(true)?;
                    if self.eat(TokenType::Colon)? {
                        selectors.push(Some(part));
                        arguments.push(self.parse_maybe_assign(false)?);
                    } else if self.tok_type == TokenType::BracketR
                        && selectors.is_empty()
                        && arguments.is_empty()
                    {
                        // Unary selector.
                        selectors.push(Some(part));
                    } else {
                        return self.unexpected();
                    }
                }
            }
        }
        if selectors.is_empty() {
            return self.raise(marker.start, "Expected a selector in message send");
        }
        Ok(self.finish_node(
            marker,
            NodeKind::MessageSendExpression { object, super_object, selectors, arguments, parameters },
        ))
    }

    // === '@' literals ===

    pub(crate) fn parse_selector_literal(&mut self) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        self.next()?;
        self.expect(TokenType::ParenL)?;
        let selector_pos = self.tok_start;
        let mut selector = String::new();
        loop {
            match self.tok_type {
                TokenType::Colon => {
                    selector.push(':');
                    self.next()?;
                }
                TokenType::ParenR => break,
                _ if self.tok_name().is_some() => {
                    // A bare part must be first or follow a colon.
                    if !selector.is_empty() && !selector.ends_with(':') {
                        return self.unexpected();
                    }
                    selector.push_str(self.tok_name().unwrap());
                    self.next()?;
                }
                _ => return self.unexpected(),
            }
        }
        if selector.is_empty() {
            return self.raise(selector_pos, "Empty selector");
        }
        self.expect(TokenType::ParenR)?;
        Ok(self.finish_node(marker, NodeKind::SelectorLiteralExpression { selector }))
    }

    pub(crate) fn parse_protocol_literal(&mut self) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        self.next()?;
        self.expect(TokenType::ParenL)?;
        let id = self.parse_ident(false)?;
        self.expect(TokenType::ParenR)?;
        Ok(self.finish_node(marker, NodeKind::ProtocolLiteralExpression { id: Box::new(id) }))
    }

    pub(crate) fn parse_reference(&mut self) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        self.next()?;
        self.expect(TokenType::ParenL)?;
        let element = self.parse_ident(false)?;
        self.expect(TokenType::ParenR)?;
        Ok(self.finish_node(marker, NodeKind::Reference { element: Box::new(element) }))
    }

    pub(crate) fn parse_dereference(&mut self) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        self.next()?;
        self.expect(TokenType::ParenL)?;
        let expr = self.parse_expression(true, false)?;
        self.expect(TokenType::ParenR)?;
        Ok(self.finish_node(marker, NodeKind::Dereference { expr: Box::new(expr) }))
    }

    /// `@[...]` array literal.
    pub(crate) fn parse_objj_array_literal(&mut self) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        self.next()?;
        let elements =
            self.parse_expr_list(TokenType::BracketR, self.lex.options.allow_trailing_commas)?;
        Ok(self.finish_node(marker, NodeKind::ArrayLiteral { elements }))
    }

    /// `@{...}` dictionary literal.
    pub(crate) fn parse_objj_dictionary_literal(&mut self) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        self.next()?;
        let mut keys = Vec::new();
        let mut values = Vec::new();
        let mut first = true;
        while !self.eat(TokenType::BraceR)? {
            if !first {
                self.expect(TokenType::Comma)?;
                if self.lex.options.allow_trailing_commas && self.eat(TokenType::BraceR)? {
                    break;
                }
            }
            keys.push(self.parse_maybe_assign(false)?);
            self.expect(TokenType::Colon)?;
            values.push(self.parse_maybe_assign(false)?);
            first = false;
        }
        Ok(self.finish_node(marker, NodeKind::DictionaryLiteral { keys, values }))
    }
}
