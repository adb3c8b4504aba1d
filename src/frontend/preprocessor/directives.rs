//! The preprocessor directive driver.
//!
//! Entered from the multiplexed token read whenever a `#` is lexed at the
//! start of a logical line. Macro expansion is off while a directive is
//! being consumed; `#if`/`#elif` expressions are the one place it is
//! selectively re-enabled (see `expr_eval`). Conditional compilation keeps
//! a stack of [`ConditionalFrame`]s; while the controlling value of a
//! branch is false, the skip engine reads and discards tokens until the
//! branch that re-activates the stream, checking `#else`/`#endif` balance
//! the whole way so nesting errors surface even in dead code.

use crate::common::error::ParseError;
use crate::frontend::lexer::lexer::{Lexer, Mode};
use crate::frontend::lexer::token::TokenType;

use super::macros::MacroSpec;

/// Which half of an `#if`-chain a frame is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondPhase {
    If,
    Else,
}

/// One entry of the conditional-compilation stack.
#[derive(Debug, Clone)]
pub struct ConditionalFrame {
    /// The directive that opened the frame (`#if`, `#ifdef`, `#ifndef`).
    pub directive: TokenType,
    /// Byte offset of the opening `#`, for unterminated-frame errors.
    pub origin: usize,
    pub phase: CondPhase,
    /// True while this frame's current branch is being discarded.
    pub skipping: bool,
    /// True once any branch of the chain has been entered.
    pub any_branch_taken: bool,
}

impl Lexer {
    /// Process one directive line. The current token is the `#`.
    pub(crate) fn process_directive(&mut self) -> Result<(), ParseError> {
        let hash_pos = self.tok_start;
        // Trivia collected in front of the '#' would die with the
        // directive; keep it for the next real token (or the prior node).
        let orphan_comments = self.tok_comments_before.take();
        let orphan_spaces = self.tok_spaces_before.take();
        self.mode.insert(Mode::DIRECTIVE);
        let result = self.dispatch_directive(hash_pos);
        self.mode.remove(Mode::DIRECTIVE | Mode::MACRO_BODY);
        self.requeue_orphaned_trivia(orphan_comments, orphan_spaces);
        result
    }

    fn dispatch_directive(&mut self, hash_pos: usize) -> Result<(), ParseError> {
        self.read_token(false)?;
        if self.tok_type == TokenType::Eol {
            // Null directive: a lone '#'.
            return Ok(());
        }
        let word = self.tok_value.as_name().unwrap_or("").to_string();
        let Some(dir) = TokenType::from_pre_keyword(&word) else {
            return self.raise(
                self.tok_start,
                format!("Invalid preprocessing directive '#{}'", word),
            );
        };

        match dir {
            TokenType::PreDefine => self.parse_define_directive()?,
            TokenType::PreUndef => self.parse_undef_directive()?,
            TokenType::PreIf => {
                let value = self.eval_if_expression(dir)?;
                self.push_conditional(dir, hash_pos, value);
            }
            TokenType::PreIfdef | TokenType::PreIfndef => {
                let defined = self.read_defined_name(dir)?;
                let value = if dir == TokenType::PreIfdef { defined } else { !defined };
                self.push_conditional(dir, hash_pos, value);
            }
            TokenType::PreElif => {
                let Some(frame) = self.cond_stack.last() else {
                    return self.raise(hash_pos, "#elif without #if");
                };
                if frame.phase == CondPhase::Else {
                    return self.raise(hash_pos, "#elif after #else");
                }
                // Reached in live code only when an earlier branch was
                // taken; the expression is consumed but not evaluated.
                self.skip_rest_of_directive()?;
                self.cond_stack.last_mut().unwrap().skipping = true;
            }
            TokenType::PreElse => {
                let Some(frame) = self.cond_stack.last() else {
                    return self.raise(hash_pos, "#else without #if");
                };
                if frame.phase == CondPhase::Else {
                    return self.raise(hash_pos, "#else after #else");
                }
                self.skip_rest_of_directive()?;
                let frame = self.cond_stack.last_mut().unwrap();
                frame.phase = CondPhase::Else;
                frame.skipping = true;
            }
            TokenType::PreEndif => {
                if self.cond_stack.pop().is_none() {
                    return self.raise(hash_pos, "#endif without #if");
                }
                self.skip_rest_of_directive()?;
            }
            TokenType::PrePragma => {
                self.skip_rest_of_directive()?;
            }
            TokenType::PreError => {
                let message = self.read_directive_message()?;
                return self.raise(hash_pos, format!("#error {}", message));
            }
            TokenType::PreWarning => {
                let message = self.read_directive_message()?;
                self.warn(hash_pos, format!("#warning {}", message));
            }
            _ => unreachable!("non-directive token from from_pre_keyword"),
        }

        if self.cond_stack.last().map_or(false, |f| f.skipping) {
            self.skip_conditional_group()?;
        }
        Ok(())
    }

    fn push_conditional(&mut self, directive: TokenType, origin: usize, value: bool) {
        self.cond_stack.push(ConditionalFrame {
            directive,
            origin,
            phase: CondPhase::If,
            skipping: !value,
            any_branch_taken: value,
        });
    }

    /// Read the name of an `#ifdef`/`#ifndef`/`#undef` and answer whether
    /// it is a defined macro.
    fn read_defined_name(&mut self, dir: TokenType) -> Result<bool, ParseError> {
        self.read_token(false)?;
        let Some(name) = self.tok_value.as_name().map(str::to_string) else {
            return self.raise(self.tok_start, "Macro name must be an identifier");
        };
        let defined = self.macro_table.is_defined(&name);
        self.read_token(false)?;
        if self.tok_type != TokenType::Eol {
            let pos = self.tok_start;
            self.warn(pos, format!("extra tokens at end of {} directive", dir.label()));
            self.skip_rest_of_directive()?;
        }
        Ok(defined)
    }

    /// Consume and discard tokens up to the end of the logical line.
    pub(crate) fn skip_rest_of_directive(&mut self) -> Result<(), ParseError> {
        while self.tok_type != TokenType::Eol {
            self.read_token(false)?;
        }
        Ok(())
    }

    /// The remainder of an `#error`/`#warning` line as message text: a lone
    /// string literal is used verbatim, anything else is joined spelling.
    fn read_directive_message(&mut self) -> Result<String, ParseError> {
        let mut parts: Vec<String> = Vec::new();
        let mut lone_string: Option<String> = None;
        loop {
            self.read_token(false)?;
            if self.tok_type == TokenType::Eol {
                break;
            }
            if self.tok_type == TokenType::String && parts.is_empty() && lone_string.is_none() {
                lone_string = Some(self.tok_value.as_str().unwrap_or("").to_string());
                continue;
            }
            if let Some(s) = lone_string.take() {
                parts.push(format!("\"{}\"", s));
            }
            parts.push(self.tok_input[self.tok_start..self.tok_end].to_string());
        }
        Ok(match lone_string {
            Some(s) => s,
            None => parts.join(" "),
        })
    }

    // === The skipping engine ===

    /// Discard tokens until the conditional branch that re-activates the
    /// stream (or the matching `#endif`). Nested conditionals push and pop
    /// frames so balance is still checked inside dead code.
    fn skip_conditional_group(&mut self) -> Result<(), ParseError> {
        let target_depth = self.cond_stack.len();
        self.mode.insert(Mode::SKIPPING);
        self.mode.remove(Mode::DIRECTIVE);
        let result = self.run_skip_loop(target_depth);
        self.mode.remove(Mode::SKIPPING);
        result
    }

    fn run_skip_loop(&mut self, target_depth: usize) -> Result<(), ParseError> {
        loop {
            self.read_token(false)?;
            match self.tok_type {
                TokenType::Eof => {
                    let frame = &self.cond_stack[0];
                    let (origin, label) = (frame.origin, frame.directive.label());
                    return self.raise(origin, format!("Unterminated {}", label));
                }
                TokenType::Hash if self.tok_first_on_line => {
                    self.mode.insert(Mode::DIRECTIVE);
                    let resumed = self.skip_directive_line(target_depth);
                    self.mode.remove(Mode::DIRECTIVE | Mode::MACRO_BODY);
                    if resumed? {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    /// Handle one directive line inside a skipped region. Returns true when
    /// the region ends and normal token flow resumes.
    fn skip_directive_line(&mut self, target_depth: usize) -> Result<bool, ParseError> {
        let hash_pos = self.tok_start;
        self.read_token(false)?;
        if self.tok_type == TokenType::Eol {
            return Ok(false);
        }
        let word = self.tok_value.as_name().unwrap_or("").to_string();
        match TokenType::from_pre_keyword(&word) {
            Some(dir @ (TokenType::PreIf | TokenType::PreIfdef | TokenType::PreIfndef)) => {
                // Nested conditional in dead code: track it, never evaluate.
                self.skip_rest_of_directive()?;
                self.cond_stack.push(ConditionalFrame {
                    directive: dir,
                    origin: hash_pos,
                    phase: CondPhase::If,
                    skipping: true,
                    any_branch_taken: true,
                });
                Ok(false)
            }
            Some(TokenType::PreElif) => {
                let frame = self.cond_stack.last().expect("frame while skipping");
                if frame.phase == CondPhase::Else {
                    return self.raise(hash_pos, "#elif after #else");
                }
                let live = self.cond_stack.len() == target_depth && !frame.any_branch_taken;
                if live {
                    let value = self.eval_if_expression(TokenType::PreElif)?;
                    if value {
                        let frame = self.cond_stack.last_mut().unwrap();
                        frame.any_branch_taken = true;
                        frame.skipping = false;
                        return Ok(true);
                    }
                } else {
                    self.skip_rest_of_directive()?;
                }
                Ok(false)
            }
            Some(TokenType::PreElse) => {
                let frame = self.cond_stack.last().expect("frame while skipping");
                if frame.phase == CondPhase::Else {
                    return self.raise(hash_pos, "#else after #else");
                }
                self.skip_rest_of_directive()?;
                let live = self.cond_stack.len() == target_depth;
                let frame = self.cond_stack.last_mut().unwrap();
                frame.phase = CondPhase::Else;
                if live && !frame.any_branch_taken {
                    frame.any_branch_taken = true;
                    frame.skipping = false;
                    return Ok(true);
                }
                Ok(false)
            }
            Some(TokenType::PreEndif) => {
                self.skip_rest_of_directive()?;
                self.cond_stack.pop();
                Ok(self.cond_stack.len() < target_depth)
            }
            _ => {
                // Other (and unknown) directives are inert in dead code.
                self.skip_rest_of_directive()?;
                Ok(false)
            }
        }
    }

    // === Macros supplied through the options ===

    /// Install macros handed in through the `macros` option: prebuilt
    /// [`super::macros::Macro`] values directly, textual specs by running
    /// them through a one-line `#define`.
    pub(crate) fn define_option_macros(&mut self) -> Result<(), ParseError> {
        let specs = std::mem::take(&mut self.options.macros);
        for spec in &specs {
            match spec {
                MacroSpec::Object(mac) => {
                    if self.macro_table.is_predefined(&mac.name) {
                        return Err(
                            self.error_at(0, format!("'{}' is a predefined macro name", mac.name))
                        );
                    }
                    self.macro_table.define(mac.clone());
                }
                MacroSpec::Text(text) => {
                    let (head, body) = match text.split_once('=') {
                        Some((head, body)) => (head, body),
                        None => (text.as_str(), "1"),
                    };
                    let source = format!("#define {} {}\n", head, body);
                    let mut options = crate::Options::default();
                    options.objj = self.options.objj;
                    options.browser = self.options.browser;
                    options.quiet_warnings = true;
                    let mut sub = Lexer::new(&source, options);
                    sub.next_token().map_err(|err| {
                        self.error_at(0, format!("Invalid macro definition '{}': {}", text, err.message))
                    })?;
                    for mac in sub.macro_table.user_macros() {
                        if self.macro_table.is_predefined(&mac.name) {
                            return Err(self.error_at(
                                0,
                                format!("'{}' is a predefined macro name", mac.name),
                            ));
                        }
                        self.macro_table.define(mac);
                    }
                }
            }
        }
        self.options.macros = specs;
        Ok(())
    }
}
