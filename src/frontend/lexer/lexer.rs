//! The source lexer and token-stream multiplexer.
//!
//! `read_token` recognizes one lexeme from the input buffer; `next_token` is
//! the multiplexed read the parser consumes: it drains pending macro
//! expansion streams first, routes `#` lines into the directive driver, and
//! triggers macro expansion for names read from the source. The lexer also
//! owns trivia collection (comments and whitespace runs between tokens) and
//! the division/regex disambiguation flag.
//!
//! Modes are independent bits: `DIRECTIVE` makes a bare newline terminate
//! the logical line (emitting an end-of-line token) and allows
//! backslash-newline continuations; `MACRO_BODY` turns `##` into the paste
//! marker and `#name` into a stringification marker; `SKIPPING` is set while
//! a false conditional branch is being discarded.

use std::rc::Rc;

use bitflags::bitflags;

use crate::common::error::{DiagnosticEngine, ParseError};
use crate::common::source::{is_newline, line_info, Position};
use crate::frontend::preprocessor::directives::ConditionalFrame;
use crate::frontend::preprocessor::macros::MacroTable;
use crate::Options;

use super::ident::{is_identifier_char, is_identifier_start, is_space};
use super::token::{Comment, Token, TokenType, TokenValue};

bitflags! {
    /// Independent lexer modes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Mode: u8 {
        const DIRECTIVE = 1 << 0;
        const MACRO_BODY = 1 << 1;
        const SKIPPING = 1 << 2;
    }
}

/// A pre-built token list being replayed into the token stream, with the
/// call-site leading trivia waiting to be attached to its first token.
struct TokenStream {
    tokens: Vec<Token>,
    index: usize,
    pending_comments: Option<Vec<Comment>>,
    pending_spaces: Option<Vec<String>>,
}

/// Saved cursor state for one-token lookahead (function-macro `(` probing).
pub(crate) struct LexerSnapshot {
    pos: usize,
    cur_line: u32,
    line_start: usize,
    first_on_line: bool,
    tok_input: Rc<str>,
    tok_start: usize,
    tok_end: usize,
    tok_type: TokenType,
    tok_value: TokenValue,
    tok_start_loc: Option<Position>,
    tok_end_loc: Option<Position>,
    tok_regexp_allowed: bool,
    tok_first_on_line: bool,
    tok_macro_parameter: Option<usize>,
    tok_comments_before: Option<Vec<Comment>>,
    tok_spaces_before: Option<Vec<String>>,
    pending_comments: Vec<Comment>,
    pending_spaces: Vec<String>,
}

/// Lexer, preprocessor host, and token-source multiplexer in one state
/// machine. The preprocessor modules extend it with further `impl` blocks.
pub(crate) struct Lexer {
    pub input: Rc<str>,
    pub options: Options,
    pub diagnostics: DiagnosticEngine,

    // Cursor into `input`.
    pub(crate) pos: usize,
    pub(crate) cur_line: u32,
    pub(crate) line_start: usize,

    pub(crate) mode: Mode,
    /// Strict-mode flag, pushed down from the parser so string/number
    /// lexing can reject octal forms.
    pub strict: bool,

    // Current token.
    pub tok_input: Rc<str>,
    pub tok_start: usize,
    pub tok_end: usize,
    pub tok_type: TokenType,
    pub tok_value: TokenValue,
    pub tok_start_loc: Option<Position>,
    pub tok_end_loc: Option<Position>,
    pub tok_regexp_allowed: bool,
    pub tok_first_on_line: bool,
    /// True when the current token was produced by macro expansion rather
    /// than read from the source buffer.
    pub tok_from_macro: bool,
    pub tok_comments_before: Option<Vec<Comment>>,
    pub tok_spaces_before: Option<Vec<String>>,
    pub tok_macro_parameter: Option<usize>,

    // Trivia accumulated since the previous token.
    pending_comments: Vec<Comment>,
    pending_spaces: Vec<String>,
    first_on_line: bool,

    // Preprocessor state.
    pub macro_table: MacroTable,
    pub(crate) expanding: Vec<String>,
    pub(crate) cond_stack: Vec<ConditionalFrame>,

    // Call-site span of the macro expansion currently being replayed.
    pub(crate) macro_call_start: usize,
    pub(crate) macro_call_end: usize,
    pub(crate) macro_call_start_loc: Option<Position>,
    pub(crate) macro_call_end_loc: Option<Position>,

    streams: Vec<TokenStream>,
}

impl Lexer {
    pub fn new(input: &str, options: Options) -> Self {
        let input: Rc<str> = Rc::from(input);
        let mut diagnostics = DiagnosticEngine::new(
            options.source_file.clone().or_else(|| options.direct_source_file.clone()),
        );
        diagnostics.set_quiet(options.quiet_warnings);
        let macro_table = MacroTable::with_predefined(options.objj, options.browser);
        Lexer {
            tok_input: input.clone(),
            input,
            options,
            diagnostics,
            pos: 0,
            cur_line: 1,
            line_start: 0,
            mode: Mode::empty(),
            strict: false,
            tok_start: 0,
            tok_end: 0,
            tok_type: TokenType::Eof,
            tok_value: TokenValue::None,
            tok_start_loc: None,
            tok_end_loc: None,
            tok_regexp_allowed: true,
            tok_first_on_line: true,
            tok_from_macro: false,
            tok_comments_before: None,
            tok_spaces_before: None,
            tok_macro_parameter: None,
            pending_comments: Vec::new(),
            pending_spaces: Vec::new(),
            first_on_line: true,
            macro_table,
            expanding: Vec::new(),
            cond_stack: Vec::new(),
            macro_call_start: 0,
            macro_call_end: 0,
            macro_call_start_loc: None,
            macro_call_end_loc: None,
            streams: Vec::new(),
        }
    }

    // === Errors ===

    /// Build a fatal error at a byte offset in the main input.
    pub fn raise<T>(&self, pos: usize, message: impl Into<String>) -> Result<T, ParseError> {
        Err(self.error_at(pos, message))
    }

    pub fn error_at(&self, pos: usize, message: impl Into<String>) -> ParseError {
        ParseError::new(
            message,
            line_info(&self.input, pos),
            self.options
                .source_file
                .clone()
                .or_else(|| self.options.direct_source_file.clone()),
            self.options.line_no_in_error_message,
        )
    }

    pub fn unexpected<T>(&self) -> Result<T, ParseError> {
        let pos = if self.tok_from_macro { self.macro_call_start } else { self.tok_start };
        self.raise(pos, format!("Unexpected token '{}'", self.tok_type.label()))
    }

    /// Emit a warning at a byte offset in the main input.
    pub fn warn(&mut self, pos: usize, message: impl Into<String>) {
        let info = line_info(&self.input, pos);
        self.diagnostics.warning(message, info.line, info.column);
    }

    // === Character access ===

    fn char_at(&self, pos: usize) -> Option<char> {
        self.input.get(pos..).and_then(|s| s.chars().next())
    }

    fn starts_with(&self, pos: usize, pat: &str) -> bool {
        self.input.get(pos..).map_or(false, |s| s.starts_with(pat))
    }

    pub(crate) fn cur_pos(&self) -> Option<Position> {
        if !self.options.locations {
            return None;
        }
        let column = self.input[self.line_start..self.pos].chars().count() as u32;
        Some(Position::new(self.cur_line, column))
    }

    /// Consume a line terminator at `self.pos`, counting CRLF as one break.
    fn eat_newline(&mut self) {
        let c = self.char_at(self.pos).unwrap();
        self.pos += c.len_utf8();
        if c == '\r' && self.char_at(self.pos) == Some('\n') {
            self.pos += 1;
        }
        self.cur_line += 1;
        self.line_start = self.pos;
        self.first_on_line = true;
    }

    // === Whitespace and comments ===

    /// Skip whitespace and comments, honoring directive mode: a bare newline
    /// ends the logical line (left for `read_token` to turn into an
    /// end-of-line token) while a backslash-newline pair is plain
    /// whitespace. Collected trivia is buffered for the next token.
    fn skip_space(&mut self) -> Result<(), ParseError> {
        let mut space_run = String::new();
        loop {
            let Some(c) = self.char_at(self.pos) else { break };
            if is_newline(c) {
                if self.mode.contains(Mode::DIRECTIVE) {
                    break;
                }
                let nl_start = self.pos;
                self.eat_newline();
                if self.options.track_spaces {
                    space_run.push_str(&self.input[nl_start..self.pos]);
                }
            } else if is_space(c) {
                if self.options.track_spaces {
                    space_run.push(c);
                }
                self.pos += c.len_utf8();
            } else if c == '\\'
                && self.mode.contains(Mode::DIRECTIVE)
                && self.char_at(self.pos + 1).map_or(false, is_newline)
            {
                self.pos += 1;
                self.eat_newline();
                // A continuation keeps the logical line going.
                self.first_on_line = false;
            } else if c == '/' && self.starts_with(self.pos, "//") {
                self.flush_spaces(&mut space_run);
                self.read_line_comment(2)?;
            } else if c == '/' && self.starts_with(self.pos, "/*") {
                self.flush_spaces(&mut space_run);
                self.read_block_comment()?;
            } else if c == '<' && self.starts_with(self.pos, "<!--") {
                self.flush_spaces(&mut space_run);
                self.read_line_comment(4)?;
            } else if c == '-' && self.first_on_line && self.starts_with(self.pos, "-->") {
                self.flush_spaces(&mut space_run);
                self.read_line_comment(3)?;
            } else {
                break;
            }
        }
        self.flush_spaces(&mut space_run);
        Ok(())
    }

    fn flush_spaces(&mut self, run: &mut String) {
        if self.options.track_spaces && !run.is_empty() {
            self.pending_spaces.push(std::mem::take(run));
        } else {
            run.clear();
        }
    }

    fn read_line_comment(&mut self, opener_len: usize) -> Result<(), ParseError> {
        let mut start = self.pos;
        // Optionally fold the line break that introduced this comment into it.
        if self.options.track_comments_include_line_break
            && start > 0
            && self.input[..start].ends_with(|c| is_newline(c))
        {
            start -= self.input[..start].chars().next_back().unwrap().len_utf8();
        }
        let start_loc = self.cur_pos();
        self.pos += opener_len;
        while let Some(c) = self.char_at(self.pos) {
            if is_newline(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        self.record_comment(false, start, self.pos, start_loc);
        Ok(())
    }

    fn read_block_comment(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let start_loc = self.cur_pos();
        self.pos += 2;
        loop {
            if self.starts_with(self.pos, "*/") {
                self.pos += 2;
                break;
            }
            let Some(c) = self.char_at(self.pos) else {
                return self.raise(start, "Unterminated comment");
            };
            if is_newline(c) {
                // Line breaks inside a comment do not terminate a directive.
                let keep_first = self.first_on_line;
                self.eat_newline();
                self.first_on_line = keep_first;
            } else {
                self.pos += c.len_utf8();
            }
        }
        self.record_comment(true, start, self.pos, start_loc);
        Ok(())
    }

    fn record_comment(
        &mut self,
        block: bool,
        start: usize,
        end: usize,
        start_loc: Option<Position>,
    ) {
        let end_loc = self.cur_pos();
        let text = self.input[start..end].to_string();
        if let Some(on_comment) = self.options.on_comment.as_mut() {
            on_comment(block, &text, start, end, start_loc, end_loc);
        }
        if self.options.track_comments {
            self.pending_comments.push(Comment { block, text, start, end, start_loc, end_loc });
        }
    }

    // === Token finishing ===

    fn finish_token(&mut self, ttype: TokenType, value: TokenValue) {
        self.tok_end = self.pos;
        self.tok_end_loc = self.cur_pos();
        self.tok_type = ttype;
        self.tok_value = value;
        self.tok_regexp_allowed = ttype.before_expr();
        self.tok_first_on_line = self.first_on_line;
        self.first_on_line = false;
        self.tok_macro_parameter = None;
        self.tok_comments_before = if self.pending_comments.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending_comments))
        };
        self.tok_spaces_before = if self.pending_spaces.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending_spaces))
        };
    }

    /// Clone the current token state into a [`Token`] value.
    pub fn current_token(&self) -> Token {
        Token {
            input: self.tok_input.clone(),
            start: self.tok_start,
            end: self.tok_end,
            ttype: self.tok_type,
            value: self.tok_value.clone(),
            regexp_allowed: self.tok_regexp_allowed,
            first_on_line: self.tok_first_on_line,
            start_loc: self.tok_start_loc,
            end_loc: self.tok_end_loc,
            comments_before: self.tok_comments_before.clone(),
            comments_after: None,
            spaces_before: self.tok_spaces_before.clone(),
            spaces_after: None,
            macro_parameter: self.tok_macro_parameter,
        }
    }

    fn set_current_from(&mut self, tok: Token) {
        self.tok_input = tok.input;
        self.tok_start = tok.start;
        self.tok_end = tok.end;
        self.tok_regexp_allowed = tok.ttype.before_expr();
        self.tok_first_on_line = tok.first_on_line;
        self.tok_start_loc = tok.start_loc;
        self.tok_end_loc = tok.end_loc;
        self.tok_type = tok.ttype;
        self.tok_value = tok.value;
        self.tok_from_macro = true;
        self.tok_comments_before = tok.comments_before;
        self.tok_spaces_before = tok.spaces_before;
        self.tok_macro_parameter = tok.macro_parameter;
    }

    // === The multiplexed read ===

    /// Advance to the next token the parser should see: replayed macro
    /// expansion tokens first, then source tokens, with `#` directive lines
    /// processed in between and macro names expanded on the fly.
    pub fn next_token(&mut self) -> Result<(), ParseError> {
        loop {
            if let Some(tok) = self.next_stream_token() {
                self.set_current_from(tok);
                return Ok(());
            }
            self.read_token(false)?;
            if self.tok_type == TokenType::Hash && !self.mode.contains(Mode::MACRO_BODY) {
                self.process_directive()?;
                continue;
            }
            if self.options.preprocess
                && self.tok_type == TokenType::Name
                && !self.mode.contains(Mode::DIRECTIVE)
                && self.maybe_expand_macro()?
            {
                continue;
            }
            if self.tok_type == TokenType::Eof {
                if let Some(frame) = self.cond_stack.first() {
                    let label = frame.directive.label();
                    let origin = frame.origin;
                    return self.raise(origin, format!("Unterminated {}", label));
                }
            }
            return Ok(());
        }
    }

    fn next_stream_token(&mut self) -> Option<Token> {
        while let Some(stream) = self.streams.last_mut() {
            if stream.index < stream.tokens.len() {
                let mut tok = stream.tokens[stream.index].clone();
                stream.index += 1;
                // Trivia before the call site attaches to the first token
                // of the expansion.
                if let Some(comments) = stream.pending_comments.take() {
                    tok.comments_before = Some(match tok.comments_before.take() {
                        Some(mut own) => {
                            let mut all = comments;
                            all.append(&mut own);
                            all
                        }
                        None => comments,
                    });
                }
                if let Some(spaces) = stream.pending_spaces.take() {
                    tok.spaces_before = Some(spaces);
                }
                return Some(tok);
            }
            // Stream exhausted; unclaimed call-site trivia falls through to
            // the next real token.
            let stream = self.streams.pop().unwrap();
            if let Some(mut comments) = stream.pending_comments {
                comments.append(&mut self.pending_comments);
                self.pending_comments = comments;
            }
            if let Some(mut spaces) = stream.pending_spaces {
                spaces.append(&mut self.pending_spaces);
                self.pending_spaces = spaces;
            }
        }
        None
    }

    /// Splice a macro expansion into the token stream at the current
    /// position, carrying the call site's leading trivia.
    pub(crate) fn push_stream(
        &mut self,
        tokens: Vec<Token>,
        pending_comments: Option<Vec<Comment>>,
        pending_spaces: Option<Vec<String>>,
    ) {
        self.streams.push(TokenStream { tokens, index: 0, pending_comments, pending_spaces });
    }

    // === Raw token reading ===

    /// Read one token from the source buffer into the `tok_*` fields.
    pub(crate) fn read_token(&mut self, force_regexp: bool) -> Result<(), ParseError> {
        self.tok_input = self.input.clone();
        self.tok_from_macro = false;
        self.skip_space()?;
        self.tok_start = self.pos;
        self.tok_start_loc = self.cur_pos();

        if force_regexp {
            return self.read_regexp();
        }

        if self.mode.contains(Mode::DIRECTIVE) {
            match self.char_at(self.pos) {
                None => {
                    self.finish_token(TokenType::Eol, TokenValue::None);
                    return Ok(());
                }
                Some(c) if is_newline(c) => {
                    self.eat_newline();
                    self.finish_token(TokenType::Eol, TokenValue::None);
                    return Ok(());
                }
                _ => {}
            }
        }

        let Some(c) = self.char_at(self.pos) else {
            self.finish_token(TokenType::Eof, TokenValue::None);
            return Ok(());
        };

        match c {
            '0'..='9' => self.read_number(false),
            '.' => {
                if matches!(self.char_at(self.pos + 1), Some('0'..='9')) {
                    self.read_number(true)
                } else {
                    self.pos += 1;
                    self.finish_token(TokenType::Dot, TokenValue::None);
                    Ok(())
                }
            }
            '"' | '\'' => self.read_string(c),
            '@' => self.read_at(),
            '#' => self.read_hash(),
            '<' if self.tok_type == TokenType::Import => self.read_filename(),
            '/' => {
                if self.tok_regexp_allowed {
                    self.read_regexp()
                } else {
                    self.read_operator(c)
                }
            }
            c if is_identifier_start(c) => self.read_word(),
            '\\' if self.starts_with(self.pos, "\\u") => self.read_word(),
            c => self.read_operator(c),
        }
    }

    // === Words ===

    fn read_word(&mut self) -> Result<(), ParseError> {
        let mut word = String::new();
        let mut contains_esc = false;
        let mut first = true;
        loop {
            match self.char_at(self.pos) {
                Some(c) if is_identifier_char(c) => {
                    word.push(c);
                    self.pos += c.len_utf8();
                }
                Some('\\') if self.starts_with(self.pos, "\\u") => {
                    contains_esc = true;
                    let esc_start = self.pos;
                    self.pos += 2;
                    let code = self.read_hex_digits(4, esc_start)?;
                    let c = char::from_u32(code)
                        .filter(|&c| if first { is_identifier_start(c) } else { is_identifier_char(c) });
                    match c {
                        Some(c) => word.push(c),
                        None => return self.raise(esc_start, "Invalid Unicode escape"),
                    }
                }
                _ => break,
            }
            first = false;
        }
        if word.is_empty() {
            return self.raise(self.tok_start, format!("Unexpected character '{}'", self.char_at(self.pos).unwrap_or('\0')));
        }

        let ttype = if contains_esc {
            // Escaped words are never keywords.
            TokenType::Name
        } else if self.mode.contains(Mode::DIRECTIVE) && word == "defined" {
            TokenType::PreDefined
        } else {
            TokenType::from_keyword(&word, self.options.ecma_version).unwrap_or(TokenType::Name)
        };
        self.finish_token(ttype, TokenValue::Name(word));
        Ok(())
    }

    fn read_hex_digits(&mut self, count: usize, err_pos: usize) -> Result<u32, ParseError> {
        let mut value: u32 = 0;
        for _ in 0..count {
            let digit = self.char_at(self.pos).and_then(|c| c.to_digit(16));
            match digit {
                Some(d) => {
                    value = value.wrapping_mul(16).wrapping_add(d);
                    self.pos += 1;
                }
                None => return self.raise(err_pos, "Bad character escape sequence"),
            }
        }
        Ok(value)
    }

    // === Numbers ===

    fn read_number(&mut self, starts_with_dot: bool) -> Result<(), ParseError> {
        let start = self.pos;
        let mut is_float = starts_with_dot;

        if !starts_with_dot && self.char_at(self.pos) == Some('0')
            && matches!(self.char_at(self.pos + 1), Some('x') | Some('X'))
        {
            self.pos += 2;
            let hex_start = self.pos;
            let mut value: f64 = 0.0;
            while let Some(d) = self.char_at(self.pos).and_then(|c| c.to_digit(16)) {
                value = value * 16.0 + d as f64;
                self.pos += 1;
            }
            if self.pos == hex_start {
                return self.raise(start, "Expected hexadecimal number");
            }
            self.check_no_identifier_after_number()?;
            self.finish_token(TokenType::Num, TokenValue::Num(value));
            return Ok(());
        }

        while matches!(self.char_at(self.pos), Some('0'..='9')) {
            self.pos += 1;
        }
        if !is_float && self.char_at(self.pos) == Some('.') {
            // The fraction digits are optional: `5.` is a valid number.
            is_float = true;
            self.pos += 1;
            while matches!(self.char_at(self.pos), Some('0'..='9')) {
                self.pos += 1;
            }
        } else if starts_with_dot {
            self.pos += 1; // the '.'
            while matches!(self.char_at(self.pos), Some('0'..='9')) {
                self.pos += 1;
            }
        }
        if matches!(self.char_at(self.pos), Some('e') | Some('E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.char_at(self.pos), Some('+') | Some('-')) {
                self.pos += 1;
            }
            if !matches!(self.char_at(self.pos), Some('0'..='9')) {
                return self.raise(start, "Expected number after exponent");
            }
            while matches!(self.char_at(self.pos), Some('0'..='9')) {
                self.pos += 1;
            }
        }
        self.check_no_identifier_after_number()?;

        let text = &self.input[start..self.pos];
        let value = if !is_float && text.len() > 1 && text.starts_with('0') {
            // Legacy octal, unless a digit 8/9 forces decimal.
            if text.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
                if self.strict {
                    return self.raise(start, "Octal literal in strict mode");
                }
                i64::from_str_radix(&text[1..], 8).map(|v| v as f64).unwrap_or(0.0)
            } else {
                text.parse::<f64>().unwrap_or(0.0)
            }
        } else {
            text.parse::<f64>().unwrap_or(0.0)
        };
        self.finish_token(TokenType::Num, TokenValue::Num(value));
        Ok(())
    }

    fn check_no_identifier_after_number(&self) -> Result<(), ParseError> {
        if let Some(c) = self.char_at(self.pos) {
            if is_identifier_start(c) {
                return self.raise(self.pos, "Identifier directly after number");
            }
        }
        Ok(())
    }

    // === Strings ===

    fn read_string(&mut self, quote: char) -> Result<(), ParseError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.char_at(self.pos) else {
                return self.raise(self.tok_start, "Unterminated string constant");
            };
            if c == quote {
                self.pos += 1;
                break;
            }
            match c {
                '\\' => self.read_escape(&mut out)?,
                c if is_newline(c) => {
                    return self.raise(self.tok_start, "Unterminated string constant");
                }
                c => {
                    out.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
        self.finish_token(TokenType::String, TokenValue::Str(out));
        Ok(())
    }

    fn read_escape(&mut self, out: &mut String) -> Result<(), ParseError> {
        let esc_start = self.pos;
        self.pos += 1; // backslash
        let Some(c) = self.char_at(self.pos) else {
            return self.raise(esc_start, "Bad character escape sequence");
        };
        self.pos += c.len_utf8();
        match c {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'b' => out.push('\u{8}'),
            'v' => out.push('\u{B}'),
            'f' => out.push('\u{C}'),
            'x' => {
                let code = self.read_hex_digits(2, esc_start)?;
                out.push(char::from_u32(code).unwrap_or('\0'));
            }
            'u' => {
                let code = self.read_hex_digits(4, esc_start)?;
                out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
            }
            'U' => {
                let code = self.read_hex_digits(8, esc_start)?;
                out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
            }
            '0'..='7' => {
                let mut value = c.to_digit(8).unwrap();
                let mut digits = 1;
                while digits < 3 {
                    match self.char_at(self.pos).and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            self.pos += 1;
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if (value > 0 || digits > 1) && self.strict {
                    return self.raise(esc_start, "Octal literal in strict mode");
                }
                out.push(char::from_u32(value).unwrap_or('\0'));
            }
            c if is_newline(c) => {
                // Escaped line break: line continuation inside a string.
                self.pos -= c.len_utf8();
                self.eat_newline();
                self.first_on_line = false;
            }
            c => out.push(c),
        }
        Ok(())
    }

    // === Regular expressions ===

    fn read_regexp(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1; // '/'
        let mut escaped = false;
        let mut in_class = false;
        loop {
            let Some(c) = self.char_at(self.pos) else {
                return self.raise(start, "Unterminated regular expression");
            };
            if is_newline(c) {
                return self.raise(start, "Unterminated regular expression");
            }
            if !escaped {
                match c {
                    '[' => in_class = true,
                    ']' if in_class => in_class = false,
                    '/' if !in_class => break,
                    '\\' => {
                        escaped = true;
                        self.pos += 1;
                        continue;
                    }
                    _ => {}
                }
            } else {
                escaped = false;
            }
            self.pos += c.len_utf8();
        }
        let pattern = self.input[start + 1..self.pos].to_string();
        self.pos += 1; // closing '/'
        let flags_start = self.pos;
        while let Some(c) = self.char_at(self.pos) {
            if !is_identifier_char(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        let flags = self.input[flags_start..self.pos].to_string();
        let mut seen = [false; 3];
        for c in flags.chars() {
            let idx = match c {
                'g' => 0,
                'i' => 1,
                'm' => 2,
                _ => return self.raise(flags_start, "Invalid regular expression flag"),
            };
            if seen[idx] {
                return self.raise(flags_start, "Invalid regular expression flag");
            }
            seen[idx] = true;
        }
        self.finish_token(TokenType::Regexp, TokenValue::Regex { pattern, flags });
        Ok(())
    }

    // === Objective-J '@' forms ===

    fn read_at(&mut self) -> Result<(), ParseError> {
        if !self.options.objj {
            return self.raise(self.pos, "Unexpected character '@'");
        }
        self.pos += 1;
        match self.char_at(self.pos) {
            Some(q @ ('"' | '\'')) => {
                // @"..." is an Objective-J string literal; the token spans
                // from the '@'.
                self.read_string(q)?;
                Ok(())
            }
            Some('{') => {
                self.pos += 1;
                self.finish_token(TokenType::DictionaryLiteralStart, TokenValue::None);
                Ok(())
            }
            Some('[') => {
                self.pos += 1;
                self.finish_token(TokenType::ArrayLiteralStart, TokenValue::None);
                Ok(())
            }
            Some(c) if is_identifier_start(c) => {
                let word_start = self.pos;
                while let Some(c) = self.char_at(self.pos) {
                    if !is_identifier_char(c) {
                        break;
                    }
                    self.pos += c.len_utf8();
                }
                let word = &self.input[word_start..self.pos];
                match TokenType::from_objj_keyword(word) {
                    Some(ttype) => {
                        let value = TokenValue::Name(word.to_string());
                        self.finish_token(ttype, value);
                        Ok(())
                    }
                    None => self.raise(
                        self.tok_start,
                        format!("Unrecognized Objective-J keyword '@{}'", word),
                    ),
                }
            }
            _ => self.raise(self.tok_start, "Unexpected character '@'"),
        }
    }

    fn read_filename(&mut self) -> Result<(), ParseError> {
        self.pos += 1; // '<'
        let name_start = self.pos;
        loop {
            let Some(c) = self.char_at(self.pos) else {
                return self.raise(self.tok_start, "Unterminated import filename");
            };
            if c == '>' {
                break;
            }
            if is_newline(c) {
                return self.raise(self.tok_start, "Unterminated import filename");
            }
            self.pos += c.len_utf8();
        }
        let name = self.input[name_start..self.pos].to_string();
        self.pos += 1; // '>'
        self.finish_token(TokenType::Filename, TokenValue::Str(name));
        Ok(())
    }

    // === Preprocessor '#' forms ===

    fn read_hash(&mut self) -> Result<(), ParseError> {
        if !self.options.preprocess {
            return self.raise(self.pos, "Unexpected character '#'");
        }
        if self.mode.contains(Mode::MACRO_BODY) {
            self.pos += 1;
            if self.char_at(self.pos) == Some('#') {
                self.pos += 1;
                self.finish_token(TokenType::PreTokenPaste, TokenValue::None);
                return Ok(());
            }
            // Lone '#': a stringification marker naming a macro parameter.
            while matches!(self.char_at(self.pos), Some(' ') | Some('\t')) {
                self.pos += 1;
            }
            let name_start = self.pos;
            while let Some(c) = self.char_at(self.pos) {
                if !is_identifier_char(c) {
                    break;
                }
                self.pos += c.len_utf8();
            }
            if self.pos == name_start {
                return self.raise(self.tok_start, "'#' is not followed by a macro parameter");
            }
            let name = self.input[name_start..self.pos].to_string();
            self.finish_token(TokenType::StringifiedName, TokenValue::Name(name));
            return Ok(());
        }
        if !self.first_on_line && !self.mode.contains(Mode::SKIPPING) {
            return self.raise(
                self.pos,
                "Preprocessor directives may only be used at the beginning of a line",
            );
        }
        self.pos += 1;
        self.finish_token(TokenType::Hash, TokenValue::None);
        Ok(())
    }

    // === Operators ===

    fn read_operator(&mut self, c: char) -> Result<(), ParseError> {
        use TokenType::*;
        let rest = &self.input[self.pos..];
        // Longest match first within each family.
        let (len, ttype, value): (usize, TokenType, TokenValue) = match c {
            '(' => (1, ParenL, TokenValue::None),
            ')' => (1, ParenR, TokenValue::None),
            '{' => (1, BraceL, TokenValue::None),
            '}' => (1, BraceR, TokenValue::None),
            '[' => (1, BracketL, TokenValue::None),
            ']' => (1, BracketR, TokenValue::None),
            ';' => (1, Semi, TokenValue::None),
            ',' => (1, Comma, TokenValue::None),
            ':' => (1, Colon, TokenValue::None),
            '?' => (1, Question, TokenValue::None),
            '=' => {
                if rest.starts_with("===") {
                    (3, Equality, TokenValue::Punct("==="))
                } else if rest.starts_with("==") {
                    (2, Equality, TokenValue::Punct("=="))
                } else {
                    (1, Eq, TokenValue::Punct("="))
                }
            }
            '!' => {
                if rest.starts_with("!==") {
                    (3, Equality, TokenValue::Punct("!=="))
                } else if rest.starts_with("!=") {
                    (2, Equality, TokenValue::Punct("!="))
                } else {
                    (1, Prefix, TokenValue::Punct("!"))
                }
            }
            '~' => (1, Prefix, TokenValue::Punct("~")),
            '+' => {
                if rest.starts_with("++") {
                    (2, IncDec, TokenValue::Punct("++"))
                } else if rest.starts_with("+=") {
                    (2, Assign, TokenValue::Punct("+="))
                } else {
                    (1, PlusMin, TokenValue::Punct("+"))
                }
            }
            '-' => {
                if rest.starts_with("--") {
                    (2, IncDec, TokenValue::Punct("--"))
                } else if rest.starts_with("-=") {
                    (2, Assign, TokenValue::Punct("-="))
                } else {
                    (1, PlusMin, TokenValue::Punct("-"))
                }
            }
            '*' => {
                if rest.starts_with("*=") {
                    (2, Assign, TokenValue::Punct("*="))
                } else {
                    (1, Multiply, TokenValue::Punct("*"))
                }
            }
            '/' => {
                if rest.starts_with("/=") {
                    (2, Assign, TokenValue::Punct("/="))
                } else {
                    (1, Slash, TokenValue::Punct("/"))
                }
            }
            '%' => {
                if rest.starts_with("%=") {
                    (2, Assign, TokenValue::Punct("%="))
                } else {
                    (1, Modulo, TokenValue::Punct("%"))
                }
            }
            '&' => {
                if rest.starts_with("&&") {
                    (2, LogicalAnd, TokenValue::Punct("&&"))
                } else if rest.starts_with("&=") {
                    (2, Assign, TokenValue::Punct("&="))
                } else {
                    (1, BitwiseAnd, TokenValue::Punct("&"))
                }
            }
            '|' => {
                if rest.starts_with("||") {
                    (2, LogicalOr, TokenValue::Punct("||"))
                } else if rest.starts_with("|=") {
                    (2, Assign, TokenValue::Punct("|="))
                } else {
                    (1, BitwiseOr, TokenValue::Punct("|"))
                }
            }
            '^' => {
                if rest.starts_with("^=") {
                    (2, Assign, TokenValue::Punct("^="))
                } else {
                    (1, BitwiseXor, TokenValue::Punct("^"))
                }
            }
            '<' => {
                if rest.starts_with("<<=") {
                    (3, Assign, TokenValue::Punct("<<="))
                } else if rest.starts_with("<<") {
                    (2, BitShift, TokenValue::Punct("<<"))
                } else if rest.starts_with("<=") {
                    (2, Relational, TokenValue::Punct("<="))
                } else {
                    (1, Relational, TokenValue::Punct("<"))
                }
            }
            '>' => {
                if rest.starts_with(">>>=") {
                    (4, Assign, TokenValue::Punct(">>>="))
                } else if rest.starts_with(">>>") {
                    (3, BitShift, TokenValue::Punct(">>>"))
                } else if rest.starts_with(">>=") {
                    (3, Assign, TokenValue::Punct(">>="))
                } else if rest.starts_with(">>") {
                    (2, BitShift, TokenValue::Punct(">>"))
                } else if rest.starts_with(">=") {
                    (2, Relational, TokenValue::Punct(">="))
                } else {
                    (1, Relational, TokenValue::Punct(">"))
                }
            }
            c => {
                return self.raise(self.pos, format!("Unexpected character '{}'", c));
            }
        };
        self.pos += len;
        self.finish_token(ttype, value);
        Ok(())
    }

    // === Lookahead and repositioning ===

    pub(crate) fn save_state(&self) -> LexerSnapshot {
        LexerSnapshot {
            pos: self.pos,
            cur_line: self.cur_line,
            line_start: self.line_start,
            first_on_line: self.first_on_line,
            tok_input: self.tok_input.clone(),
            tok_start: self.tok_start,
            tok_end: self.tok_end,
            tok_type: self.tok_type,
            tok_value: self.tok_value.clone(),
            tok_start_loc: self.tok_start_loc,
            tok_end_loc: self.tok_end_loc,
            tok_regexp_allowed: self.tok_regexp_allowed,
            tok_first_on_line: self.tok_first_on_line,
            tok_macro_parameter: self.tok_macro_parameter,
            tok_comments_before: self.tok_comments_before.clone(),
            tok_spaces_before: self.tok_spaces_before.clone(),
            pending_comments: self.pending_comments.clone(),
            pending_spaces: self.pending_spaces.clone(),
        }
    }

    pub(crate) fn restore_state(&mut self, snap: LexerSnapshot) {
        self.pos = snap.pos;
        self.cur_line = snap.cur_line;
        self.line_start = snap.line_start;
        self.first_on_line = snap.first_on_line;
        self.tok_input = snap.tok_input;
        self.tok_start = snap.tok_start;
        self.tok_end = snap.tok_end;
        self.tok_type = snap.tok_type;
        self.tok_value = snap.tok_value;
        self.tok_start_loc = snap.tok_start_loc;
        self.tok_end_loc = snap.tok_end_loc;
        self.tok_regexp_allowed = snap.tok_regexp_allowed;
        self.tok_first_on_line = snap.tok_first_on_line;
        self.tok_macro_parameter = snap.tok_macro_parameter;
        self.tok_comments_before = snap.tok_comments_before;
        self.tok_spaces_before = snap.tok_spaces_before;
        self.pending_comments = snap.pending_comments;
        self.pending_spaces = snap.pending_spaces;
    }

    /// Seek to an arbitrary byte offset, discarding any active expansion
    /// streams. Used by the tokenizer API and by strict-mode re-lexing.
    pub fn jump_to(&mut self, pos: usize, regexp_allowed: bool) {
        self.streams.clear();
        self.pending_comments.clear();
        self.pending_spaces.clear();
        let info = line_info(&self.input, pos);
        self.pos = pos.min(self.input.len());
        self.cur_line = info.line;
        self.line_start = info.line_start;
        self.first_on_line = self.input[info.line_start..self.pos]
            .chars()
            .all(|c| is_space(c));
        self.tok_regexp_allowed = regexp_allowed;
        // Keep the previous token type from influencing context decisions.
        self.tok_type = TokenType::Eof;
        self.tok_from_macro = false;
    }

    /// Re-read the current token after a strict-mode switch, so octal
    /// rejection applies retroactively to the lookahead token.
    pub fn relex_current(&mut self) -> Result<(), ParseError> {
        if self.tok_from_macro {
            return Ok(());
        }
        let start = self.tok_start;
        let info = line_info(&self.input, start);
        self.pos = start;
        self.cur_line = info.line;
        self.line_start = info.line_start;
        let comments = self.tok_comments_before.take();
        let spaces = self.tok_spaces_before.take();
        let first = self.tok_first_on_line;
        self.read_token(false)?;
        self.tok_comments_before = comments;
        self.tok_spaces_before = spaces;
        self.tok_first_on_line = first;
        Ok(())
    }

    /// Hand trivia that was attached to a consumed directive line back to
    /// the stream, so it reaches the next real token instead of vanishing.
    pub(crate) fn requeue_orphaned_trivia(
        &mut self,
        comments: Option<Vec<Comment>>,
        spaces: Option<Vec<String>>,
    ) {
        if let Some(mut comments) = comments {
            comments.append(&mut self.pending_comments);
            self.pending_comments = comments;
        }
        if let Some(mut spaces) = spaces {
            spaces.append(&mut self.pending_spaces);
            self.pending_spaces = spaces;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;

    fn lex_all(src: &str) -> Vec<(TokenType, String)> {
        let mut options = Options::default();
        options.quiet_warnings = true;
        let mut lexer = Lexer::new(src, options);
        let mut out = Vec::new();
        loop {
            lexer.next_token().expect("lex error");
            if lexer.tok_type == TokenType::Eof {
                break;
            }
            let text = lexer.tok_input[lexer.tok_start..lexer.tok_end].to_string();
            out.push((lexer.tok_type, text));
        }
        out
    }

    #[test]
    fn basic_tokens() {
        let toks = lex_all("var x = 1.5;");
        let types: Vec<_> = toks.iter().map(|t| t.0).collect();
        assert_eq!(
            types,
            vec![TokenType::Var, TokenType::Name, TokenType::Eq, TokenType::Num, TokenType::Semi]
        );
    }

    #[test]
    fn regex_vs_division() {
        let toks = lex_all("a = b / c;");
        assert!(toks.iter().any(|t| t.0 == TokenType::Slash));
        let toks = lex_all("a = /b/g;");
        assert!(toks.iter().any(|t| t.0 == TokenType::Regexp));
    }

    #[test]
    fn regex_character_class_with_slash() {
        let toks = lex_all("x = /[/]/;");
        assert!(toks.iter().any(|t| t.0 == TokenType::Regexp && t.1 == "/[/]/"));
    }

    #[test]
    fn objj_at_keywords() {
        let toks = lex_all("@implementation Foo @end");
        assert_eq!(toks[0].0, TokenType::Implementation);
        assert_eq!(toks[1].0, TokenType::Name);
        assert_eq!(toks[2].0, TokenType::End);
    }

    #[test]
    fn at_literals() {
        let toks = lex_all("@[1] @{} @\"hi\"");
        assert_eq!(toks[0].0, TokenType::ArrayLiteralStart);
        assert!(toks.iter().any(|t| t.0 == TokenType::DictionaryLiteralStart));
        assert!(toks.iter().any(|t| t.0 == TokenType::String && t.1 == "@\"hi\""));
    }

    #[test]
    fn import_filename() {
        let toks = lex_all("@import <Foundation/Foundation.j>");
        assert_eq!(toks[0].0, TokenType::Import);
        assert_eq!(toks[1].0, TokenType::Filename);
        assert_eq!(toks[1].1, "<Foundation/Foundation.j>");
    }

    #[test]
    fn octal_number_value() {
        let toks = lex_all("x = 017;");
        assert!(toks.iter().any(|t| t.0 == TokenType::Num && t.1 == "017"));
        let mut options = Options::default();
        options.quiet_warnings = true;
        let mut lexer = Lexer::new("017", options);
        lexer.next_token().unwrap();
        assert_eq!(lexer.tok_value, TokenValue::Num(15.0));
    }

    #[test]
    fn identifier_after_number_is_error() {
        let mut options = Options::default();
        options.quiet_warnings = true;
        let mut lexer = Lexer::new("3foo", options);
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn unterminated_string() {
        let mut options = Options::default();
        options.quiet_warnings = true;
        let mut lexer = Lexer::new("\"abc\ndef\"", options);
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn string_escapes() {
        let mut options = Options::default();
        options.quiet_warnings = true;
        let mut lexer = Lexer::new(r#""a\n\x41B""#, options);
        lexer.next_token().unwrap();
        assert_eq!(lexer.tok_value, TokenValue::Str("a\nAB".into()));
    }

    #[test]
    fn html_comments() {
        let toks = lex_all("<!-- hidden\nx\n--> also hidden\ny");
        let names: Vec<_> = toks
            .iter()
            .filter(|t| t.0 == TokenType::Name)
            .map(|t| t.1.clone())
            .collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn first_on_line_flag() {
        let mut options = Options::default();
        options.quiet_warnings = true;
        let mut lexer = Lexer::new("a\nb c", options);
        lexer.next_token().unwrap();
        assert!(lexer.tok_first_on_line);
        lexer.next_token().unwrap();
        assert!(lexer.tok_first_on_line);
        lexer.next_token().unwrap();
        assert!(!lexer.tok_first_on_line);
    }

    #[test]
    fn directive_requires_line_start() {
        let mut options = Options::default();
        options.quiet_warnings = true;
        let mut lexer = Lexer::new("x #define Y 1", options);
        lexer.next_token().unwrap();
        assert!(lexer.next_token().is_err());
    }
}
