//! `#if` / `#elif` constant-expression evaluation.
//!
//! The controlling expression is collected to the end of the logical line,
//! macro-expanded (except operands of `defined`, which stay untouched, and
//! function-like macro names used without parentheses, which fold to `0`),
//! then parsed with the same precedence table the main expression parser
//! uses; only operators carrying the `preprocess` attribute are legal.
//! Parsing builds a small AST (including `DefinedExpression` nodes for the
//! `defined` operator) which is folded to a value.
//!
//! Atoms are integers, strings, `true`/`false`, and identifiers; an
//! identifier that is not a macro evaluates to 0. Strings may be compared
//! but never fed to arithmetic.

use std::rc::Rc;

use crate::common::error::ParseError;
use crate::frontend::lexer::lexer::Lexer;
use crate::frontend::lexer::token::{Token, TokenType, TokenValue};
use crate::frontend::parser::ast::{LiteralValue, Node, NodeKind};

/// The value of a folded preprocessor expression.
#[derive(Debug, Clone, PartialEq)]
enum PpValue {
    Int(i64),
    Str(String),
}

impl PpValue {
    fn truthy(&self) -> bool {
        match self {
            PpValue::Int(n) => *n != 0,
            PpValue::Str(s) => !s.is_empty(),
        }
    }
}

/// A synthesized `0` standing in for a function-like macro name used
/// without an argument list.
fn synthetic_zero() -> Token {
    let input: Rc<str> = Rc::from("0");
    Token {
        input,
        start: 0,
        end: 1,
        ttype: TokenType::Num,
        value: TokenValue::Num(0.0),
        regexp_allowed: false,
        first_on_line: false,
        start_loc: None,
        end_loc: None,
        comments_before: None,
        comments_after: None,
        spaces_before: None,
        spaces_after: None,
        macro_parameter: None,
    }
}

impl Lexer {
    /// Evaluate the controlling expression of `#if` or `#elif`. Consumes
    /// tokens through the end of the logical line.
    pub(crate) fn eval_if_expression(&mut self, dir: TokenType) -> Result<bool, ParseError> {
        let expr_pos = self.tok_start;
        let mut raw: Vec<Token> = Vec::new();
        loop {
            self.read_token(false)?;
            if self.tok_type == TokenType::Eol {
                break;
            }
            raw.push(self.current_token());
        }
        if raw.is_empty() {
            return self.raise(expr_pos, format!("{} with no expression", dir.label()));
        }
        let expanded = self.expand_if_tokens(raw)?;
        let node = {
            let mut parser = PpExprParser { lexer: &*self, tokens: &expanded, pos: 0 };
            let node = parser.parse_expression()?;
            if parser.pos < parser.tokens.len() {
                let tok = &parser.tokens[parser.pos];
                return Err(parser.error(tok, "Unexpected token in preprocessor expression"));
            }
            node
        };
        let value = self.fold(&node, expr_pos)?;
        Ok(value.truthy())
    }

    /// Macro-expand the raw expression tokens. `defined`'s operand is
    /// protected; a function-like macro name without `(` becomes `0`.
    fn expand_if_tokens(&mut self, tokens: Vec<Token>) -> Result<Vec<Token>, ParseError> {
        let mut out: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let tok = &tokens[i];
            match tok.ttype {
                TokenType::PreDefined => {
                    out.push(tok.clone());
                    i += 1;
                    if tokens.get(i).map(|t| t.ttype) == Some(TokenType::ParenL) {
                        out.push(tokens[i].clone());
                        i += 1;
                    }
                    if let Some(name_tok) = tokens.get(i) {
                        out.push(name_tok.clone());
                        i += 1;
                    }
                }
                TokenType::Name => {
                    let name = tok.value.as_name().unwrap_or("");
                    match self.macro_table.get(name) {
                        Some(mac) if mac.is_function => {
                            match self.collect_list_arguments(&tokens, i, &mac, name)? {
                                Some((args, next)) => {
                                    let expansion = self.expand_macro_call(&mac, args)?;
                                    out.extend(expansion);
                                    i = next;
                                }
                                None => {
                                    out.push(synthetic_zero());
                                    i += 1;
                                }
                            }
                        }
                        Some(mac) => {
                            let expansion = self.expand_macro_call(&mac, Vec::new())?;
                            out.extend(expansion);
                            i += 1;
                        }
                        None => {
                            out.push(tok.clone());
                            i += 1;
                        }
                    }
                }
                _ => {
                    out.push(tok.clone());
                    i += 1;
                }
            }
        }
        Ok(out)
    }

    /// Fold the parsed expression to a value.
    fn fold(&self, node: &Node, expr_pos: usize) -> Result<PpValue, ParseError> {
        let int_only = |value: PpValue| -> Result<i64, ParseError> {
            match value {
                PpValue::Int(n) => Ok(n),
                PpValue::Str(_) => {
                    self.raise(expr_pos, "Non-integer operand in preprocessor expression")
                }
            }
        };
        match &node.kind {
            NodeKind::Literal { value, .. } => Ok(match value {
                LiteralValue::Num(n) => PpValue::Int(*n as i64),
                LiteralValue::Str(s) => PpValue::Str(s.clone()),
                LiteralValue::Bool(b) => PpValue::Int(i64::from(*b)),
                _ => PpValue::Int(0),
            }),
            // An identifier that survives expansion is not a macro: 0.
            NodeKind::Identifier { .. } => Ok(PpValue::Int(0)),
            NodeKind::DefinedExpression { id } => {
                let name = match &id.kind {
                    NodeKind::Identifier { name } => name.as_str(),
                    _ => "",
                };
                Ok(PpValue::Int(i64::from(self.macro_table.is_defined(name))))
            }
            NodeKind::UnaryExpression { operator, argument, .. } => {
                let value = self.fold(argument, expr_pos)?;
                Ok(match operator.as_str() {
                    "!" => PpValue::Int(i64::from(!value.truthy())),
                    "-" => PpValue::Int(int_only(value)?.wrapping_neg()),
                    "+" => PpValue::Int(int_only(value)?),
                    "~" => PpValue::Int(!int_only(value)?),
                    _ => {
                        return self.raise(expr_pos, "Invalid preprocessor expression");
                    }
                })
            }
            NodeKind::LogicalExpression { operator, left, right } => {
                let l = self.fold(left, expr_pos)?;
                // Short-circuit: the right side of a decided && / || is
                // still folded for errors but cannot change the result.
                let result = match operator.as_str() {
                    "&&" => l.truthy() && self.fold(right, expr_pos)?.truthy(),
                    "||" => l.truthy() || self.fold(right, expr_pos)?.truthy(),
                    _ => return self.raise(expr_pos, "Invalid preprocessor expression"),
                };
                Ok(PpValue::Int(i64::from(result)))
            }
            NodeKind::BinaryExpression { operator, left, right } => {
                let l = self.fold(left, expr_pos)?;
                let r = self.fold(right, expr_pos)?;
                // String comparison is permitted; string arithmetic is not.
                if let (PpValue::Str(a), PpValue::Str(b)) = (&l, &r) {
                    let result = match operator.as_str() {
                        "==" | "===" => a == b,
                        "!=" | "!==" => a != b,
                        "<" => a < b,
                        "<=" => a <= b,
                        ">" => a > b,
                        ">=" => a >= b,
                        _ => {
                            return self.raise(
                                expr_pos,
                                "Non-integer operand in preprocessor expression",
                            );
                        }
                    };
                    return Ok(PpValue::Int(i64::from(result)));
                }
                let a = int_only(l)?;
                let b = int_only(r)?;
                Ok(PpValue::Int(match operator.as_str() {
                    "+" => a.wrapping_add(b),
                    "-" => a.wrapping_sub(b),
                    "*" => a.wrapping_mul(b),
                    "/" => {
                        if b == 0 { 0 } else { a.wrapping_div(b) }
                    }
                    "%" => {
                        if b == 0 { 0 } else { a.wrapping_rem(b) }
                    }
                    "<<" => a.wrapping_shl(b as u32),
                    ">>" => a.wrapping_shr(b as u32),
                    ">>>" => (a as u64).wrapping_shr(b as u32) as i64,
                    "<" => i64::from(a < b),
                    "<=" => i64::from(a <= b),
                    ">" => i64::from(a > b),
                    ">=" => i64::from(a >= b),
                    "==" | "===" => i64::from(a == b),
                    "!=" | "!==" => i64::from(a != b),
                    "&" => a & b,
                    "|" => a | b,
                    "^" => a ^ b,
                    _ => return self.raise(expr_pos, "Invalid preprocessor expression"),
                }))
            }
            _ => self.raise(expr_pos, "Invalid preprocessor expression"),
        }
    }
}

/// Recursive-descent parser over the expanded expression tokens, driven by
/// the shared `binop` precedence table restricted to `preprocess` operators.
struct PpExprParser<'a> {
    lexer: &'a Lexer,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> PpExprParser<'a> {
    fn error(&self, tok: &Token, message: impl Into<String>) -> ParseError {
        let pos = if Rc::ptr_eq(&tok.input, &self.lexer.input) {
            tok.start
        } else {
            self.lexer.macro_call_start
        };
        self.lexer.error_at(pos, message)
    }

    fn end_error(&self, message: impl Into<String>) -> ParseError {
        let pos = self
            .tokens
            .last()
            .filter(|t| Rc::ptr_eq(&t.input, &self.lexer.input))
            .map(|t| t.end)
            .unwrap_or(self.lexer.macro_call_start);
        self.lexer.error_at(pos, message)
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn parse_expression(&mut self) -> Result<Node, ParseError> {
        let left = self.parse_unary()?;
        self.parse_binary_ops(left, -1)
    }

    /// Precedence climbing over the `binop` levels, left-associative.
    fn parse_binary_ops(&mut self, left: Node, min_prec: i32) -> Result<Node, ParseError> {
        let Some(tok) = self.peek() else { return Ok(left) };
        let Some(prec) = tok.ttype.binop() else { return Ok(left) };
        if (prec as i32) <= min_prec {
            return Ok(left);
        }
        if !tok.ttype.preprocess() {
            return Err(self.error(
                tok,
                format!("Token '{}' is not allowed in preprocessor expressions", tok.text()),
            ));
        }
        let logical = matches!(tok.ttype, TokenType::LogicalAnd | TokenType::LogicalOr);
        let operator = tok.value.punct().unwrap_or("").to_string();
        self.advance();
        let right_start = self.parse_unary()?;
        let right = self.parse_binary_ops(right_start, prec as i32)?;
        let start = left.start;
        let end = right.end;
        let kind = if logical {
            NodeKind::LogicalExpression {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            }
        } else {
            NodeKind::BinaryExpression {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            }
        };
        let node = Node::new(start, end, kind);
        self.parse_binary_ops(node, min_prec)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        let Some(tok) = self.peek() else {
            return Err(self.end_error("Invalid preprocessor expression"));
        };
        if tok.ttype.prefix() {
            // Only `+ - ! ~` carry the preprocess attribute.
            if !tok.ttype.preprocess() {
                return Err(self.error(
                    tok,
                    format!("Token '{}' is not allowed in preprocessor expressions", tok.text()),
                ));
            }
            let operator = tok.value.punct().unwrap_or("").to_string();
            let start = tok.start;
            self.advance();
            let argument = self.parse_unary()?;
            let end = argument.end;
            return Ok(Node::new(
                start,
                end,
                NodeKind::UnaryExpression { operator, prefix: true, argument: Box::new(argument) },
            ));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Node, ParseError> {
        let Some(tok) = self.advance() else {
            return Err(self.end_error("Invalid preprocessor expression"));
        };
        match tok.ttype {
            TokenType::Num => {
                let value = match &tok.value {
                    TokenValue::Num(n) => *n,
                    _ => 0.0,
                };
                Ok(Node::new(
                    tok.start,
                    tok.end,
                    NodeKind::Literal {
                        value: LiteralValue::Num(value),
                        raw: tok.text().to_string(),
                    },
                ))
            }
            TokenType::String => {
                let value = tok.value.as_str().unwrap_or("").to_string();
                Ok(Node::new(
                    tok.start,
                    tok.end,
                    NodeKind::Literal {
                        value: LiteralValue::Str(value),
                        raw: tok.text().to_string(),
                    },
                ))
            }
            TokenType::True | TokenType::False => Ok(Node::new(
                tok.start,
                tok.end,
                NodeKind::Literal {
                    value: LiteralValue::Bool(tok.ttype == TokenType::True),
                    raw: tok.text().to_string(),
                },
            )),
            TokenType::Name => Ok(Node::new(
                tok.start,
                tok.end,
                NodeKind::Identifier { name: tok.value.as_name().unwrap_or("").to_string() },
            )),
            TokenType::PreDefined => self.parse_defined(tok),
            TokenType::ParenL => {
                let inner = self.parse_expression()?;
                match self.advance() {
                    Some(close) if close.ttype == TokenType::ParenR => {
                        Ok(Node::new(tok.start, close.end, inner.kind))
                    }
                    _ => Err(self.end_error("Expected ')' in preprocessor expression")),
                }
            }
            _ => Err(self.error(tok, "Invalid preprocessor expression")),
        }
    }

    /// `defined NAME` or `defined(NAME)`.
    fn parse_defined(&mut self, defined_tok: &Token) -> Result<Node, ParseError> {
        let parenthesized = self.peek().map(|t| t.ttype) == Some(TokenType::ParenL);
        if parenthesized {
            self.advance();
        }
        let name_tok = match self.advance() {
            Some(tok) if tok.value.as_name().is_some() => tok,
            Some(tok) => return Err(self.error(tok, "Expected identifier after 'defined'")),
            None => return Err(self.end_error("Expected identifier after 'defined'")),
        };
        let id = Node::new(
            name_tok.start,
            name_tok.end,
            NodeKind::Identifier { name: name_tok.value.as_name().unwrap().to_string() },
        );
        let mut end = name_tok.end;
        if parenthesized {
            match self.advance() {
                Some(close) if close.ttype == TokenType::ParenR => end = close.end,
                _ => return Err(self.end_error("Expected ')' after identifier")),
            }
        }
        Ok(Node::new(
            defined_tok.start,
            end,
            NodeKind::DefinedExpression { id: Box::new(id) },
        ))
    }
}
