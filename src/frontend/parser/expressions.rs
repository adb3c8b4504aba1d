//! Expression parsing: precedence climbing from sequence expressions down
//! to atoms.
//!
//! Binary operators are handled by a single climbing routine driven by the
//! `binop` precedence attribute on token types (1 loosest through 10
//! tightest); `&&`/`||` produce LogicalExpression nodes, everything else
//! BinaryExpression. The `no_in` flag excludes `in` while parsing a `for`
//! header initializer.

use crate::common::error::ParseError;
use crate::frontend::lexer::token::{
    is_reserved_word, is_strict_bad_id_word, is_strict_reserved_word, TokenType, TokenValue,
};
use crate::ReservedPolicy;

use super::ast::{LiteralValue, Node, NodeKind, PropertyKind};
use super::parser::{Parser, PendingMessageSend};

impl Parser {
    /// Parse a full expression; `no_comma` stops before sequence commas.
    pub(crate) fn parse_expression(
        &mut self,
        no_comma: bool,
        no_in: bool,
    ) -> Result<Node, ParseError> {
        let expr = self.parse_maybe_assign(no_in)?;
        if !no_comma && self.tok_type == TokenType::Comma {
            let marker = self.marker_from_node(&expr);
            let mut expressions = vec![expr];
            while self.eat(TokenType::Comma)? {
                expressions.push(self.parse_maybe_assign(no_in)?);
            }
            return Ok(self.finish_node(marker, NodeKind::SequenceExpression { expressions }));
        }
        Ok(expr)
    }

    pub(crate) fn parse_maybe_assign(&mut self, no_in: bool) -> Result<Node, ParseError> {
        let left = self.parse_maybe_conditional(no_in)?;
        if self.tok_type.is_assign() {
            let operator = self.tok_value.punct().unwrap_or("=").to_string();
            self.check_lval(&left)?;
            let marker = self.marker_from_node(&left);
            self.next()?;
            let right = self.parse_maybe_assign(no_in)?;
            return Ok(self.finish_node(
                marker,
                NodeKind::AssignmentExpression {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            ));
        }
        Ok(left)
    }

    fn parse_maybe_conditional(&mut self, no_in: bool) -> Result<Node, ParseError> {
        let expr = self.parse_expr_ops(no_in)?;
        self.parse_conditional_rest(expr, no_in)
    }

    /// `?:` continuation, shared with the latched message-send path.
    pub(crate) fn parse_conditional_rest(
        &mut self,
        expr: Node,
        no_in: bool,
    ) -> Result<Node, ParseError> {
        if self.eat(TokenType::Question)? {
            let marker = self.marker_from_node(&expr);
            let consequent = self.parse_maybe_assign(false)?;
            self.expect(TokenType::Colon)?;
            let alternate = self.parse_maybe_assign(no_in)?;
            return Ok(self.finish_node(
                marker,
                NodeKind::ConditionalExpression {
                    test: Box::new(expr),
                    consequent: Box::new(consequent),
                    alternate: Box::new(alternate),
                },
            ));
        }
        Ok(expr)
    }

    fn parse_expr_ops(&mut self, no_in: bool) -> Result<Node, ParseError> {
        let left = self.parse_maybe_unary()?;
        self.parse_expr_op(left, -1, no_in)
    }

    /// Left-associative precedence climbing over the `binop` table.
    pub(crate) fn parse_expr_op(
        &mut self,
        left: Node,
        min_prec: i32,
        no_in: bool,
    ) -> Result<Node, ParseError> {
        let Some(prec) = self.tok_type.binop() else { return Ok(left) };
        if (prec as i32) <= min_prec || (no_in && self.tok_type == TokenType::In) {
            return Ok(left);
        }
        let logical =
            matches!(self.tok_type, TokenType::LogicalAnd | TokenType::LogicalOr);
        let operator = match self.tok_type {
            TokenType::In => "in".to_string(),
            TokenType::Instanceof => "instanceof".to_string(),
            _ => self.tok_value.punct().unwrap_or("").to_string(),
        };
        let marker = self.marker_from_node(&left);
        self.next()?;
        let rhs = self.parse_maybe_unary()?;
        let right = self.parse_expr_op(rhs, prec as i32, no_in)?;
        let kind = if logical {
            NodeKind::LogicalExpression { operator, left: Box::new(left), right: Box::new(right) }
        } else {
            NodeKind::BinaryExpression { operator, left: Box::new(left), right: Box::new(right) }
        };
        let node = self.finish_node(marker, kind);
        self.parse_expr_op(node, min_prec, no_in)
    }

    fn parse_maybe_unary(&mut self) -> Result<Node, ParseError> {
        if self.tok_type.prefix() {
            let marker = self.start_marker();
            let update = self.tok_type.is_update();
            let operator = match self.tok_type.keyword() {
                Some(kw) => kw.to_string(),
                None => self.tok_value.punct().unwrap_or("").to_string(),
            };
            self.next()?;
            let argument = self.parse_maybe_unary()?;
            if update {
                self.check_lval(&argument)?;
            } else if self.strict
                && operator == "delete"
                && matches!(argument.kind, NodeKind::Identifier { .. })
            {
                return self.raise(marker.start, "Deleting local variable in strict mode");
            }
            let kind = if update {
                NodeKind::UpdateExpression { operator, prefix: true, argument: Box::new(argument) }
            } else {
                NodeKind::UnaryExpression { operator, prefix: true, argument: Box::new(argument) }
            };
            return Ok(self.finish_node(marker, kind));
        }
        let mut expr = self.parse_expr_subscripts()?;
        while self.tok_type.postfix() && !self.can_insert_semicolon() {
            let operator = self.tok_value.punct().unwrap_or("").to_string();
            self.check_lval(&expr)?;
            let marker = self.marker_from_node(&expr);
            self.next()?;
            expr = self.finish_node(
                marker,
                NodeKind::UpdateExpression { operator, prefix: false, argument: Box::new(expr) },
            );
        }
        Ok(expr)
    }

    fn parse_expr_subscripts(&mut self) -> Result<Node, ParseError> {
        let atom = self.parse_expr_atom()?;
        self.parse_subscripts(atom, false)
    }

    /// Member accesses, computed subscripts, and calls. A `[` that turns
    /// out not to be a subscript latches the bracketed expression as the
    /// receiver of a message send beginning a new statement, and the chain
    /// stops without consuming further.
    pub(crate) fn parse_subscripts(
        &mut self,
        mut base: Node,
        no_calls: bool,
    ) -> Result<Node, ParseError> {
        loop {
            if self.eat(TokenType::Dot)? {
                let marker = self.marker_from_node(&base);
                let property = self.parse_ident(true)?;
                base = self.finish_node(
                    marker,
                    NodeKind::MemberExpression {
                        object: Box::new(base),
                        property: Box::new(property),
                        computed: false,
                    },
                );
            } else if self.tok_type == TokenType::BracketL {
                let bracket_start = self.tok_start;
                let bracket_start_loc = self.tok_start_loc;
                let before_bracket = (self.last_start, self.last_end, self.last_start_loc, self.last_end_loc);
                self.next()?;
                let index = self.parse_expression(false, false)?;
                if self.tok_type == TokenType::BracketR {
                    let marker = self.marker_from_node(&base);
                    self.next()?;
                    base = self.finish_node(
                        marker,
                        NodeKind::MemberExpression {
                            object: Box::new(base),
                            property: Box::new(index),
                            computed: true,
                        },
                    );
                } else if self.lex.options.objj {
                    // Not a subscript after all: the bracket opens a message
                    // send that belongs to the next statement. Rewind the
                    // last-token trackers so the enclosing statement ends
                    // where it did before the bracket was consumed.
                    self.node_message_send_object_expression =
                        Some(Box::new(PendingMessageSend {
                            bracket_start,
                            bracket_start_loc,
                            object: index,
                        }));
                    self.last_start = before_bracket.0;
                    self.last_end = before_bracket.1;
                    self.last_start_loc = before_bracket.2;
                    self.last_end_loc = before_bracket.3;
                    return Ok(base);
                } else {
                    return self.unexpected();
                }
            } else if !no_calls && self.tok_type == TokenType::ParenL {
                let marker = self.marker_from_node(&base);
                self.next()?;
                let arguments =
                    self.parse_expr_list(TokenType::ParenR, self.lex.options.allow_trailing_commas)?;
                base = self.finish_node(
                    marker,
                    NodeKind::CallExpression {
                        callee: Box::new(base),
                        arguments,
                    },
                );
            } else {
                return Ok(base);
            }
        }
    }

    fn parse_expr_atom(&mut self) -> Result<Node, ParseError> {
        match self.tok_type {
            TokenType::This => {
                let marker = self.start_marker();
                self.next()?;
                Ok(self.finish_node(marker, NodeKind::ThisExpression))
            }
            TokenType::Name => self.parse_ident(false),
            TokenType::Num | TokenType::String | TokenType::Regexp => self.parse_literal(),
            TokenType::Null | TokenType::True | TokenType::False => {
                let marker = self.start_marker();
                let raw = self.tok_raw();
                let value = match self.tok_type {
                    TokenType::Null => LiteralValue::Null,
                    t => LiteralValue::Bool(t == TokenType::True),
                };
                self.next()?;
                Ok(self.finish_node(marker, NodeKind::Literal { value, raw }))
            }
            TokenType::ParenL => {
                self.next()?;
                let expr = self.parse_expression(false, false)?;
                self.expect(TokenType::ParenR)?;
                Ok(expr)
            }
            TokenType::BracketL => self.parse_array_or_message_send(),
            TokenType::BraceL => self.parse_object_literal(),
            TokenType::Function => {
                let marker = self.start_marker();
                self.next()?;
                self.parse_function(marker, false)
            }
            TokenType::New => self.parse_new(),
            TokenType::Selector => self.parse_selector_literal(),
            TokenType::Protocol => self.parse_protocol_literal(),
            TokenType::Ref => self.parse_reference(),
            TokenType::Deref => self.parse_dereference(),
            TokenType::ArrayLiteralStart => self.parse_objj_array_literal(),
            TokenType::DictionaryLiteralStart => self.parse_objj_dictionary_literal(),
            _ => self.unexpected(),
        }
    }

    pub(crate) fn parse_literal(&mut self) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        let raw = self.tok_raw();
        let value = match &self.tok_value {
            TokenValue::Num(n) => LiteralValue::Num(*n),
            TokenValue::Str(s) => LiteralValue::Str(s.clone()),
            TokenValue::Regex { pattern, flags } => {
                LiteralValue::Regex { pattern: pattern.clone(), flags: flags.clone() }
            }
            _ => return self.unexpected(),
        };
        self.next()?;
        Ok(self.finish_node(marker, NodeKind::Literal { value, raw }))
    }

    fn parse_new(&mut self) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        self.next()?;
        let atom = self.parse_expr_atom()?;
        let callee = self.parse_subscripts(atom, true)?;
        let arguments = if self.eat(TokenType::ParenL)? {
            self.parse_expr_list(TokenType::ParenR, self.lex.options.allow_trailing_commas)?
        } else {
            Vec::new()
        };
        Ok(self.finish_node(
            marker,
            NodeKind::NewExpression { callee: Box::new(callee), arguments },
        ))
    }

    /// Plain `[...]` array literal body (objj off, or after the message
    /// send possibility is excluded). The `[` has been consumed.
    pub(crate) fn parse_array_rest(
        &mut self,
        marker: super::parser::Marker,
        first: Option<Option<Node>>,
    ) -> Result<Node, ParseError> {
        let mut elements: Vec<Option<Node>> = Vec::new();
        let mut is_first = first.is_none();
        if let Some(elt) = first {
            elements.push(elt);
        }
        loop {
            if self.eat(TokenType::BracketR)? {
                break;
            }
            if !is_first {
                self.expect(TokenType::Comma)?;
                if self.eat(TokenType::BracketR)? {
                    break;
                }
            }
            if self.tok_type == TokenType::Comma {
                // Elision: a hole in the array.
                elements.push(None);
                is_first = false;
                continue;
            }
            elements.push(Some(self.parse_maybe_assign(false)?));
            is_first = false;
        }
        Ok(self.finish_node(marker, NodeKind::ArrayExpression { elements }))
    }

    fn parse_object_literal(&mut self) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        self.next()?;
        let mut properties: Vec<Node> = Vec::new();
        let mut first = true;
        // name -> claimed kinds, for ES5 clash checking
        let mut seen: rustc_hash::FxHashMap<String, u8> = rustc_hash::FxHashMap::default();
        const INIT: u8 = 1;
        const GET: u8 = 2;
        const SET: u8 = 4;
        while !self.eat(TokenType::BraceR)? {
            if !first {
                self.expect(TokenType::Comma)?;
                if self.lex.options.allow_trailing_commas && self.eat(TokenType::BraceR)? {
                    break;
                }
            }
            first = false;
            let pmarker = self.start_marker();
            let mut key = self.parse_property_name()?;
            let mut kind = PropertyKind::Init;
            let value;
            if self.tok_type != TokenType::Colon
                && self.lex.options.ecma_version >= 5
                && matches!(&key.kind, NodeKind::Identifier { name } if name == "get" || name == "set")
            {
                kind = if matches!(&key.kind, NodeKind::Identifier { name } if name == "get") {
                    PropertyKind::Get
                } else {
                    PropertyKind::Set
                };
                key = self.parse_property_name()?;
                let fmarker = self.marker_from_node(&key);
                value = self.parse_function(fmarker, false)?;
            } else {
                self.expect(TokenType::Colon)?;
                value = self.parse_maybe_assign(false)?;
            }
            let key_name = property_key_name(&key);
            let flag = match kind {
                PropertyKind::Init => INIT,
                PropertyKind::Get => GET,
                PropertyKind::Set => SET,
            };
            let prev = seen.entry(key_name).or_insert(0);
            let clash = match kind {
                PropertyKind::Init => (*prev & INIT != 0 && self.strict) || *prev & (GET | SET) != 0,
                PropertyKind::Get => *prev & (INIT | GET) != 0,
                PropertyKind::Set => *prev & (INIT | SET) != 0,
            };
            if clash {
                return self.raise(key.start, "Redefinition of property");
            }
            *prev |= flag;
            properties.push(self.finish_node(
                pmarker,
                NodeKind::Property { key: Box::new(key), value: Box::new(value), kind },
            ));
        }
        Ok(self.finish_node(marker, NodeKind::ObjectExpression { properties }))
    }

    fn parse_property_name(&mut self) -> Result<Node, ParseError> {
        match self.tok_type {
            TokenType::Num | TokenType::String => self.parse_literal(),
            _ => self.parse_ident(true),
        }
    }

    /// Comma-separated expressions up to `close` (call arguments and the
    /// like; no holes).
    pub(crate) fn parse_expr_list(
        &mut self,
        close: TokenType,
        allow_trailing_comma: bool,
    ) -> Result<Vec<Node>, ParseError> {
        let mut list = Vec::new();
        let mut first = true;
        while !self.eat(close)? {
            if !first {
                self.expect(TokenType::Comma)?;
                if allow_trailing_comma && self.eat(close)? {
                    break;
                }
            }
            list.push(self.parse_maybe_assign(false)?);
            first = false;
        }
        Ok(list)
    }

    /// Verify that a node can be assigned to, honoring strict-mode
    /// restrictions on `eval` and `arguments`.
    pub(crate) fn check_lval(&self, node: &Node) -> Result<(), ParseError> {
        match &node.kind {
            NodeKind::Identifier { name } => {
                if self.strict && is_strict_bad_id_word(name) {
                    return self.raise(
                        node.start,
                        format!("Assigning to {} in strict mode", name),
                    );
                }
                Ok(())
            }
            NodeKind::MemberExpression { .. } | NodeKind::Dereference { .. } => Ok(()),
            _ => self.raise(node.start, "Assigning to rvalue"),
        }
    }

    /// Parse an identifier. `liberal` admits keywords (member names,
    /// selector parts) unless reserved words are forbidden everywhere.
    pub(crate) fn parse_ident(&mut self, liberal: bool) -> Result<Node, ParseError> {
        let marker = self.start_marker();
        let liberal = liberal && self.lex.options.forbid_reserved != ReservedPolicy::Everywhere;
        let name = match self.tok_type {
            TokenType::Name => self.tok_name().unwrap_or("").to_string(),
            t if t.keyword().is_some() && liberal => t.keyword().unwrap().to_string(),
            _ => return self.unexpected(),
        };
        if !liberal {
            if self.lex.options.forbid_reserved != ReservedPolicy::Off
                && is_reserved_word(&name, self.lex.options.ecma_version)
            {
                return self.raise(marker.start, format!("The keyword '{}' is reserved", name));
            }
            if self.strict && is_strict_reserved_word(&name) {
                return self.raise(
                    marker.start,
                    format!("The keyword '{}' is reserved in strict mode", name),
                );
            }
        }
        self.next()?;
        Ok(self.finish_node(marker, NodeKind::Identifier { name }))
    }

    pub(crate) fn tok_raw(&self) -> String {
        self.lex.tok_input[self.tok_start..self.tok_end].to_string()
    }
}

/// The property name a key node contributes for clash checking.
fn property_key_name(key: &Node) -> String {
    match &key.kind {
        NodeKind::Identifier { name } => name.clone(),
        NodeKind::Literal { value: LiteralValue::Str(s), .. } => s.clone(),
        NodeKind::Literal { value: LiteralValue::Num(n), .. } => n.to_string(),
        _ => String::new(),
    }
}
