//! Macro definition parsing and the expansion engine.
//!
//! Expansion at a call site runs in two phases. Phase A substitutes the
//! macro body: paste series (`a ## b`) are folded by concatenating the
//! texts of the adjoining tokens and re-lexing, stringification markers
//! produce synthetic string tokens from the raw argument text, and
//! parameter references are replaced with their fully expanded argument
//! tokens (the argument prescan). Phase B rescans the substituted body for
//! further macro invocations, with the currently-expanding names held on a
//! stack so no macro is expanded while it is already in progress.
//!
//! Arguments are collected unexpanded; each is expanded or stringified at
//! most once per call and cached on its [`Argument`].

use std::rc::Rc;

use smallvec::SmallVec;

use crate::common::error::ParseError;
use crate::frontend::lexer::lexer::{Lexer, Mode};
use crate::frontend::lexer::token::{Token, TokenType, TokenValue};
use crate::Options;

use super::macros::{Macro, Parameter, VA_ARGS};

/// One collected macro-call argument with lazily-filled caches.
pub(crate) struct Argument {
    pub tokens: Vec<Token>,
    expanded: Option<Vec<Token>>,
    stringified: Option<Token>,
}

impl Argument {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, expanded: None, stringified: None }
    }
}

/// A synthesized `,` used to join variadic arguments back together.
fn synthetic_comma() -> Token {
    let input: Rc<str> = Rc::from(",");
    Token {
        input,
        start: 0,
        end: 1,
        ttype: TokenType::Comma,
        value: TokenValue::None,
        regexp_allowed: true,
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
    // === #define / #undef ===

    /// Parse a `#define` directive. The current token is the directive
    /// keyword; on success the definition is installed and the logical line
    /// fully consumed.
    pub(crate) fn parse_define_directive(&mut self) -> Result<(), ParseError> {
        self.read_token(false)?;
        if self.tok_type == TokenType::Eol {
            return self.raise(self.tok_start, "Macro name missing");
        }
        let name_pos = self.tok_start;
        let name = match (self.tok_type, self.tok_value.as_name()) {
            (TokenType::Name, Some(word)) => word.to_string(),
            _ => return self.raise(name_pos, "Macro name must be an identifier"),
        };
        if name == "defined" {
            return self.raise(name_pos, "'defined' cannot be used as a macro name");
        }
        if self.macro_table.is_predefined(&name) {
            return self.raise(name_pos, format!("'{}' is a predefined macro name", name));
        }
        let name_end = self.tok_end;

        // `##` and `#param` only mean something inside the replacement list.
        self.mode.insert(Mode::MACRO_BODY);
        self.read_token(false)?;

        let mut parameters: SmallVec<[Parameter; 4]> = SmallVec::new();
        let mut is_function = false;
        let mut is_variadic = false;

        // A parameter list only when '(' immediately follows the name.
        if self.tok_type == TokenType::ParenL && self.tok_start == name_end {
            is_function = true;
            loop {
                self.read_token(false)?;
                match self.tok_type {
                    TokenType::ParenR => break,
                    TokenType::Eol => {
                        return self.raise(name_pos, "Expected ')' in macro parameter list");
                    }
                    TokenType::Dot => {
                        self.finish_ellipsis()?;
                        let index = parameters.len();
                        parameters.push(Parameter {
                            name: VA_ARGS.to_string(),
                            index,
                            variadic: true,
                        });
                        is_variadic = true;
                        self.read_token(false)?;
                        if self.tok_type != TokenType::ParenR {
                            return self.raise(self.tok_start, "Expected ')' after '...'");
                        }
                        break;
                    }
                    TokenType::Name => {
                        let pname = self.tok_value.as_name().unwrap().to_string();
                        if parameters.iter().any(|p| p.name == pname) {
                            return self.raise(
                                self.tok_start,
                                format!("Duplicate macro parameter '{}'", pname),
                            );
                        }
                        let index = parameters.len();
                        self.read_token(false)?;
                        match self.tok_type {
                            TokenType::Comma => {
                                parameters.push(Parameter { name: pname, index, variadic: false });
                            }
                            TokenType::ParenR => {
                                parameters.push(Parameter { name: pname, index, variadic: false });
                                break;
                            }
                            TokenType::Dot => {
                                self.finish_ellipsis()?;
                                parameters.push(Parameter { name: pname, index, variadic: true });
                                is_variadic = true;
                                self.read_token(false)?;
                                if self.tok_type != TokenType::ParenR {
                                    return self.raise(self.tok_start, "Expected ')' after '...'");
                                }
                                break;
                            }
                            _ => {
                                return self.raise(
                                    self.tok_start,
                                    "Expected ',' or ')' in macro parameter list",
                                );
                            }
                        }
                    }
                    _ => return self.raise(self.tok_start, "Invalid macro parameter"),
                }
            }
            self.read_token(false)?;
        }

        // Collect the replacement list up to the end of the logical line.
        let mut tokens: Vec<Token> = Vec::new();
        while self.tok_type != TokenType::Eol {
            let mut tok = self.current_token();
            match tok.ttype {
                TokenType::Name => {
                    if let Some(word) = tok.value.as_name() {
                        if word == VA_ARGS && !is_variadic {
                            return self.raise(
                                tok.start,
                                "__VA_ARGS__ can only appear in the expansion of a variadic macro",
                            );
                        }
                        if let Some(param) =
                            parameters.iter().find(|p| p.name == *word)
                        {
                            tok.macro_parameter = Some(param.index);
                        }
                    }
                }
                TokenType::StringifiedName => {
                    let word = tok.value.as_name().unwrap_or("").to_string();
                    match parameters.iter().find(|p| p.name == word) {
                        Some(param) => tok.macro_parameter = Some(param.index),
                        None => {
                            return self.raise(
                                tok.start,
                                "'#' is not followed by a macro parameter",
                            );
                        }
                    }
                }
                _ => {}
            }
            tokens.push(tok);
            self.read_token(false)?;
        }
        self.mode.remove(Mode::MACRO_BODY);

        if tokens.first().map(|t| t.ttype) == Some(TokenType::PreTokenPaste)
            || tokens.last().map(|t| t.ttype) == Some(TokenType::PreTokenPaste)
        {
            return self.raise(
                name_pos,
                "'##' cannot appear at either end of a macro expansion",
            );
        }

        let mac = Macro::new(name, parameters, is_function, is_variadic, tokens);
        if let Some(existing) = self.macro_table.get(&mac.name) {
            if !existing.is_equivalent(&mac) {
                self.warn(name_pos, format!("'{}' macro redefined", mac.name));
            }
        }
        self.macro_table.define(mac);
        Ok(())
    }

    /// `...` arrives as three adjacent `.` tokens; the first has been read.
    fn finish_ellipsis(&mut self) -> Result<(), ParseError> {
        let mut end = self.tok_end;
        for _ in 0..2 {
            self.read_token(false)?;
            if self.tok_type != TokenType::Dot || self.tok_start != end {
                return self.raise(self.tok_start, "Expected '...' in macro parameter list");
            }
            end = self.tok_end;
        }
        Ok(())
    }

    pub(crate) fn parse_undef_directive(&mut self) -> Result<(), ParseError> {
        self.read_token(false)?;
        let name = match (self.tok_type, self.tok_value.as_name()) {
            (TokenType::Name, Some(word)) => word.to_string(),
            _ => return self.raise(self.tok_start, "Macro name must be an identifier"),
        };
        if self.macro_table.is_predefined(&name) {
            return self.raise(self.tok_start, format!("'{}' is a predefined macro name", name));
        }
        self.macro_table.undefine(&name);
        self.skip_rest_of_directive()
    }

    // === Call-site expansion ===

    /// If the current (source-read) name token starts a macro invocation,
    /// expand it and splice the result into the token stream. Returns false
    /// when the name is not a macro, or is a function-like macro used
    /// without an argument list.
    pub(crate) fn maybe_expand_macro(&mut self) -> Result<bool, ParseError> {
        let Some(name) = self.tok_value.as_name().map(str::to_string) else {
            return Ok(false);
        };
        let Some(mac) = self.macro_table.get(&name) else { return Ok(false) };

        let call_start = self.tok_start;
        let call_start_loc = self.tok_start_loc;
        let first_on_line = self.tok_first_on_line;
        let comments = self.tok_comments_before.take();
        let spaces = self.tok_spaces_before.take();

        let args = if mac.is_function {
            let snap = self.save_state();
            self.read_token(false)?;
            if self.tok_type != TokenType::ParenL {
                self.restore_state(snap);
                self.tok_comments_before = comments;
                self.tok_spaces_before = spaces;
                return Ok(false);
            }
            self.collect_macro_arguments(&mac, &name, call_start)?
        } else {
            Vec::new()
        };

        let call_end = self.tok_end;
        let call_end_loc = self.tok_end_loc;
        let mut expansion = self.expand_macro_call(&mac, args)?;
        for tok in expansion.iter_mut() {
            tok.first_on_line = false;
        }
        if let Some(first) = expansion.first_mut() {
            first.first_on_line = first_on_line;
        }
        self.macro_call_start = call_start;
        self.macro_call_end = call_end;
        self.macro_call_start_loc = call_start_loc;
        self.macro_call_end_loc = call_end_loc;
        self.push_stream(expansion, comments, spaces);
        Ok(true)
    }

    /// Collect call arguments from the live token stream. The current token
    /// is the opening paren; on return it is the closing paren.
    fn collect_macro_arguments(
        &mut self,
        mac: &Macro,
        name: &str,
        call_start: usize,
    ) -> Result<Vec<Argument>, ParseError> {
        let mut args: Vec<Argument> = Vec::new();
        let mut current: Vec<Token> = Vec::new();
        let mut depth = 0usize;
        loop {
            self.read_token(false)?;
            match self.tok_type {
                TokenType::Eof | TokenType::Eol => {
                    return self.raise(
                        call_start,
                        format!("Unterminated arguments to macro '{}'", name),
                    );
                }
                TokenType::ParenR if depth == 0 => break,
                TokenType::ParenR => {
                    depth -= 1;
                    current.push(self.current_token());
                }
                TokenType::ParenL => {
                    depth += 1;
                    current.push(self.current_token());
                }
                TokenType::Comma if depth == 0 => {
                    args.push(Argument::new(std::mem::take(&mut current)));
                }
                _ => current.push(self.current_token()),
            }
        }
        if !(args.is_empty() && current.is_empty() && mac.parameters.is_empty()) {
            args.push(Argument::new(current));
        }
        self.check_arity(mac, name, args.len(), call_start)?;
        Ok(args)
    }

    fn check_arity(
        &self,
        mac: &Macro,
        name: &str,
        given: usize,
        call_start: usize,
    ) -> Result<(), ParseError> {
        let fixed = mac.fixed_parameter_count();
        if mac.is_variadic {
            if given < fixed {
                return self.raise(
                    call_start,
                    format!("Macro '{}' requires at least {} argument(s), but {} given", name, fixed, given),
                );
            }
        } else if given != mac.parameters.len() {
            return self.raise(
                call_start,
                format!(
                    "Macro '{}' requires exactly {} argument(s), but {} given",
                    name,
                    mac.parameters.len(),
                    given
                ),
            );
        }
        Ok(())
    }

    /// Expand one macro call: phase A substitution, then phase B rescan
    /// with this macro held on the expansion stack.
    pub(crate) fn expand_macro_call(
        &mut self,
        mac: &Macro,
        mut args: Vec<Argument>,
    ) -> Result<Vec<Token>, ParseError> {
        let substituted = self.substitute_body(mac, &mut args)?;
        self.expanding.push(mac.name.clone());
        let result = self.expand_token_list(substituted);
        self.expanding.pop();
        result
    }

    // === Phase A: substitution ===

    fn substitute_body(
        &mut self,
        mac: &Macro,
        args: &mut Vec<Argument>,
    ) -> Result<Vec<Token>, ParseError> {
        let body = &mac.tokens;
        let mut out: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < body.len() {
            if i + 1 < body.len() && body[i + 1].ttype == TokenType::PreTokenPaste {
                i = self.paste_series(mac, args, i, &mut out)?;
                continue;
            }
            let tok = &body[i];
            match tok.ttype {
                TokenType::StringifiedName => {
                    let idx = tok.macro_parameter.expect("stringified name resolved at definition");
                    let stringified = self.argument_stringified(mac, args, idx);
                    out.push(stringified);
                }
                _ => {
                    if let Some(idx) = tok.macro_parameter {
                        if mac.parameters[idx].variadic {
                            let variadic = self.expanded_variadic(mac, args)?;
                            out.extend(variadic);
                        } else {
                            let expanded = self.argument_expanded(args, idx)?;
                            out.extend(expanded);
                        }
                    } else {
                        out.push(tok.clone());
                    }
                }
            }
            i += 1;
        }
        Ok(out)
    }

    /// Fold a paste series starting at body index `i` (whose following
    /// token is `##`). Returns the body index after the series.
    fn paste_series(
        &mut self,
        mac: &Macro,
        args: &mut [Argument],
        mut i: usize,
        out: &mut Vec<Token>,
    ) -> Result<usize, ParseError> {
        let body = &mac.tokens;
        let mut series = self.paste_operand(mac, args, &body[i]);
        i += 1;
        while i < body.len() && body[i].ttype == TokenType::PreTokenPaste {
            i += 1; // the '##'
            let right_tok = &body[i];
            let right_is_variadic = right_tok
                .macro_parameter
                .map_or(false, |idx| mac.parameters[idx].variadic);
            let left_is_comma = series.last().map(|t| t.ttype) == Some(TokenType::Comma);
            if right_is_variadic && left_is_comma {
                // GNU `, ## __VA_ARGS__`: with no variadic arguments the
                // comma is deleted; otherwise no paste takes place and the
                // arguments follow the comma as-is.
                let variadic = self.raw_variadic(mac, args);
                if variadic.is_empty() {
                    series.pop();
                } else {
                    series.extend(variadic);
                }
            } else if right_is_variadic && self.raw_variadic(mac, args).is_empty() {
                // Pasting against an absent variadic list yields nothing.
            } else {
                let mut right = self.paste_operand(mac, args, right_tok);
                if right.is_empty() {
                    // Empty argument: nothing to paste onto.
                } else if series.is_empty() {
                    series = right;
                } else {
                    let left_last = series.pop().unwrap();
                    let right_first = right.remove(0);
                    match self.paste_tokens(&left_last, &right_first) {
                        Some(tok) => series.push(tok),
                        None => {
                            let text = format!("{}{}", left_last.text(), right_first.text());
                            let pos = if Rc::ptr_eq(&left_last.input, &self.input) {
                                left_last.start
                            } else {
                                self.macro_call_start
                            };
                            self.warn(
                                pos,
                                format!("pasting formed '{}', an invalid preprocessing token", text),
                            );
                            series.push(left_last);
                            series.push(right_first);
                        }
                    }
                    series.append(&mut right);
                }
            }
            i += 1;
        }
        out.append(&mut series);
        Ok(i)
    }

    /// The raw (unexpanded) tokens an operand of `##` stands for.
    fn paste_operand(&mut self, mac: &Macro, args: &mut [Argument], tok: &Token) -> Vec<Token> {
        if tok.ttype == TokenType::StringifiedName {
            let idx = tok.macro_parameter.expect("stringified name resolved at definition");
            return vec![self.argument_stringified(mac, args, idx)];
        }
        match tok.macro_parameter {
            Some(idx) if mac.parameters[idx].variadic => self.raw_variadic(mac, args),
            Some(idx) => args.get(idx).map(|a| a.tokens.clone()).unwrap_or_default(),
            None => vec![tok.clone()],
        }
    }

    /// Concatenate two tokens' texts and re-lex. `None` when the result is
    /// not exactly one token.
    fn paste_tokens(&mut self, left: &Token, right: &Token) -> Option<Token> {
        let text = format!("{}{}", left.text(), right.text());
        let mut options = Options::default();
        options.objj = self.options.objj;
        options.preprocess = false;
        options.quiet_warnings = true;
        let mut sub = Lexer::new(&text, options);
        if sub.next_token().is_err() || sub.tok_type == TokenType::Eof {
            return None;
        }
        let tok = sub.current_token();
        if sub.next_token().is_err() || sub.tok_type != TokenType::Eof {
            return None;
        }
        Some(tok)
    }

    // === Arguments ===

    fn argument_expanded(
        &mut self,
        args: &mut [Argument],
        idx: usize,
    ) -> Result<Vec<Token>, ParseError> {
        if args[idx].expanded.is_none() {
            let raw = args[idx].tokens.clone();
            let expanded = self.expand_token_list(raw)?;
            args[idx].expanded = Some(expanded);
        }
        Ok(args[idx].expanded.clone().unwrap())
    }

    fn argument_stringified(&mut self, mac: &Macro, args: &mut [Argument], idx: usize) -> Token {
        if mac.parameters[idx].variadic {
            let raw = self.raw_variadic(mac, args);
            return self.stringify_tokens(&raw);
        }
        if args[idx].stringified.is_none() {
            let tok = self.stringify_tokens(&args[idx].tokens);
            args[idx].stringified = Some(tok);
        }
        args[idx].stringified.clone().unwrap()
    }

    /// All trailing variadic arguments, unexpanded, re-joined with commas.
    fn raw_variadic(&self, mac: &Macro, args: &[Argument]) -> Vec<Token> {
        let fixed = mac.fixed_parameter_count();
        let mut out = Vec::new();
        for (k, arg) in args.iter().skip(fixed).enumerate() {
            if k > 0 {
                out.push(synthetic_comma());
            }
            out.extend(arg.tokens.iter().cloned());
        }
        out
    }

    /// All trailing variadic arguments, each expanded, re-joined with commas.
    fn expanded_variadic(
        &mut self,
        mac: &Macro,
        args: &mut [Argument],
    ) -> Result<Vec<Token>, ParseError> {
        let fixed = mac.fixed_parameter_count();
        let mut out = Vec::new();
        for idx in fixed..args.len() {
            if idx > fixed {
                out.push(synthetic_comma());
            }
            let expanded = self.argument_expanded(args, idx)?;
            out.extend(expanded);
        }
        Ok(out)
    }

    /// Render tokens as a string literal: leading/trailing whitespace
    /// dropped, interior whitespace collapsed to single spaces, quotes and
    /// non-printing characters backslash-escaped.
    fn stringify_tokens(&self, tokens: &[Token]) -> Token {
        let mut text = String::new();
        for (k, tok) in tokens.iter().enumerate() {
            if k > 0 {
                let prev = &tokens[k - 1];
                let adjacent = Rc::ptr_eq(&prev.input, &tok.input) && prev.end == tok.start;
                if !adjacent {
                    text.push(' ');
                }
            }
            text.push_str(tok.text());
        }

        let mut spelled = String::with_capacity(text.len() + 2);
        spelled.push('"');
        for c in text.chars() {
            match c {
                '"' => spelled.push_str("\\\""),
                '\\' => spelled.push_str("\\\\"),
                c if (c as u32) < 0x20 => {
                    spelled.push_str(&format!("\\x{:02x}", c as u32));
                }
                c => spelled.push(c),
            }
        }
        spelled.push('"');

        let input: Rc<str> = Rc::from(spelled);
        let end = input.len();
        Token {
            input,
            start: 0,
            end,
            ttype: TokenType::String,
            value: TokenValue::Str(text),
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

    // === Phase B: rescan ===

    /// Scan a token list for macro invocations and expand them in place.
    /// Function-like macro names whose `(` does not appear within the list
    /// are left alone.
    pub(crate) fn expand_token_list(
        &mut self,
        tokens: Vec<Token>,
    ) -> Result<Vec<Token>, ParseError> {
        let mut out: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let tok = &tokens[i];
            if tok.ttype == TokenType::Name {
                if let Some(name) = tok.value.as_name() {
                    if !self.expanding.iter().any(|n| n == name) {
                        if let Some(mac) = self.macro_table.get(name) {
                            if mac.is_function {
                                if let Some((args, next)) =
                                    self.collect_list_arguments(&tokens, i, &mac, name)?
                                {
                                    let expansion = self.expand_macro_call(&mac, args)?;
                                    out.extend(expansion);
                                    i = next;
                                    continue;
                                }
                            } else {
                                let expansion = self.expand_macro_call(&mac, Vec::new())?;
                                out.extend(expansion);
                                i += 1;
                                continue;
                            }
                        }
                    }
                }
            }
            out.push(tok.clone());
            i += 1;
        }
        Ok(out)
    }

    /// Collect arguments for a macro call inside a token list, where
    /// `tokens[name_idx]` is the macro name. Returns the arguments and the
    /// index after the closing paren, or `None` when no call is present.
    pub(crate) fn collect_list_arguments(
        &mut self,
        tokens: &[Token],
        name_idx: usize,
        mac: &Macro,
        name: &str,
    ) -> Result<Option<(Vec<Argument>, usize)>, ParseError> {
        let open = name_idx + 1;
        if tokens.get(open).map(|t| t.ttype) != Some(TokenType::ParenL) {
            return Ok(None);
        }
        let mut args: Vec<Argument> = Vec::new();
        let mut current: Vec<Token> = Vec::new();
        let mut depth = 0usize;
        let mut i = open + 1;
        loop {
            let Some(tok) = tokens.get(i) else { return Ok(None) };
            match tok.ttype {
                TokenType::ParenR if depth == 0 => {
                    i += 1;
                    break;
                }
                TokenType::ParenR => {
                    depth -= 1;
                    current.push(tok.clone());
                }
                TokenType::ParenL => {
                    depth += 1;
                    current.push(tok.clone());
                }
                TokenType::Comma if depth == 0 => {
                    args.push(Argument::new(std::mem::take(&mut current)));
                }
                _ => current.push(tok.clone()),
            }
            i += 1;
        }
        if !(args.is_empty() && current.is_empty() && mac.parameters.is_empty()) {
            args.push(Argument::new(current));
        }
        let call_start = if Rc::ptr_eq(&tokens[name_idx].input, &self.input) {
            tokens[name_idx].start
        } else {
            self.macro_call_start
        };
        self.check_arity(mac, name, args.len(), call_start)?;
        Ok(Some((args, i)))
    }
}
