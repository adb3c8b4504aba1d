//! Core parser state and shared helpers.
//!
//! The parser is split into focused modules that all extend [`Parser`]:
//!   - expressions.rs: precedence climbing, subscripts, atoms
//!   - statements.rs: statement dispatch, ASI, functions
//!   - objj.rs: Objective-J declarations, message sends, `@`-literals
//!
//! This module owns token access, the node lifecycle (start markers and
//! `finish_node`), and comment/whitespace attribution, including the rescue
//! of trailing trivia claimed by an inner node when an enclosing node ends
//! at the same offset.

use std::rc::Rc;

use crate::common::error::ParseError;
use crate::common::source::Position;
use crate::frontend::lexer::lexer::Lexer;
use crate::frontend::lexer::token::{Comment, TokenType, TokenValue};
use crate::Options;

use super::ast::{Node, NodeKind, NodeLoc};

/// An active statement label.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Label {
    pub name: String,
    pub kind: Option<LabelKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LabelKind {
    Loop,
    Switch,
}

/// A bracketed expression waiting to be re-interpreted as the receiver of
/// an Objective-J message send once the enclosing statement closes.
pub(crate) struct PendingMessageSend {
    pub bracket_start: usize,
    pub bracket_start_loc: Option<Position>,
    pub object: Node,
}

/// A node-in-progress: where it started and the leading trivia it claimed.
pub(crate) struct Marker {
    pub start: usize,
    pub start_loc: Option<Position>,
    pub comments: Option<Vec<Comment>>,
    pub spaces: Option<Vec<String>>,
}

/// Recursive-descent parser over the preprocessed token stream.
pub(crate) struct Parser {
    pub lex: Lexer,

    // Mirror of the current token.
    pub tok_type: TokenType,
    pub tok_value: TokenValue,
    pub tok_start: usize,
    pub tok_end: usize,
    pub tok_start_loc: Option<Position>,
    pub tok_end_loc: Option<Position>,
    pub tok_first_on_line: bool,
    pub tok_from_macro: bool,
    pub tok_comments_before: Option<Vec<Comment>>,
    pub tok_spaces_before: Option<Vec<String>>,

    // End of the previous consumed token (macro calls collapse to their
    // call-site span so node offsets always reference the real source).
    pub last_start: usize,
    pub last_end: usize,
    pub last_start_loc: Option<Position>,
    pub last_end_loc: Option<Position>,

    pub in_function: bool,
    pub labels: Vec<Label>,
    pub strict: bool,
    pub node_message_send_object_expression: Option<Box<PendingMessageSend>>,

    /// End offset of the most recently finished node, for trailing-trivia
    /// ownership bubbling.
    last_finished_end: Option<usize>,

    source_file: Option<Rc<str>>,
    direct_source_file: Option<Rc<str>>,
}

impl Parser {
    pub fn new(input: &str, options: Options) -> Result<Self, ParseError> {
        let source_file: Option<Rc<str>> = options.source_file.as_deref().map(Rc::from);
        let direct_source_file: Option<Rc<str>> =
            options.direct_source_file.as_deref().map(Rc::from);
        let mut lex = Lexer::new(input, options);
        lex.define_option_macros()?;
        let mut parser = Parser {
            lex,
            tok_type: TokenType::Eof,
            tok_value: TokenValue::None,
            tok_start: 0,
            tok_end: 0,
            tok_start_loc: None,
            tok_end_loc: None,
            tok_first_on_line: true,
            tok_from_macro: false,
            tok_comments_before: None,
            tok_spaces_before: None,
            last_start: 0,
            last_end: 0,
            last_start_loc: None,
            last_end_loc: None,
            in_function: false,
            labels: Vec::new(),
            strict: false,
            node_message_send_object_expression: None,
            last_finished_end: None,
            source_file,
            direct_source_file,
        };
        // Prime the stream.
        parser.lex.next_token()?;
        parser.sync_token();
        Ok(parser)
    }

    /// User macros defined during the parse (`getMacros`).
    pub fn macros(&self) -> Vec<crate::frontend::preprocessor::macros::Macro> {
        self.lex.macro_table.user_macros()
    }

    fn sync_token(&mut self) {
        self.tok_type = self.lex.tok_type;
        self.tok_value = self.lex.tok_value.clone();
        self.tok_start = self.lex.tok_start;
        self.tok_end = self.lex.tok_end;
        self.tok_start_loc = self.lex.tok_start_loc;
        self.tok_end_loc = self.lex.tok_end_loc;
        self.tok_first_on_line = self.lex.tok_first_on_line;
        self.tok_from_macro = self.lex.tok_from_macro;
        self.tok_comments_before = self.lex.tok_comments_before.take();
        self.tok_spaces_before = self.lex.tok_spaces_before.take();
    }

    /// Consume the current token and read the next one.
    pub(crate) fn next(&mut self) -> Result<(), ParseError> {
        if self.tok_from_macro {
            self.last_start = self.lex.macro_call_start;
            self.last_end = self.lex.macro_call_end;
            self.last_start_loc = self.lex.macro_call_start_loc;
            self.last_end_loc = self.lex.macro_call_end_loc;
        } else {
            self.last_start = self.tok_start;
            self.last_end = self.tok_end;
            self.last_start_loc = self.tok_start_loc;
            self.last_end_loc = self.tok_end_loc;
        }
        self.lex.next_token()?;
        self.sync_token();
        Ok(())
    }

    // === Token predicates ===

    pub(crate) fn eat(&mut self, ttype: TokenType) -> Result<bool, ParseError> {
        if self.tok_type == ttype {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn expect(&mut self, ttype: TokenType) -> Result<(), ParseError> {
        if self.eat(ttype)? {
            Ok(())
        } else {
            self.unexpected()
        }
    }

    pub(crate) fn unexpected<T>(&self) -> Result<T, ParseError> {
        self.lex.unexpected()
    }

    pub(crate) fn raise<T>(&self, pos: usize, message: impl Into<String>) -> Result<T, ParseError> {
        self.lex.raise(pos, message)
    }

    /// Current token's name value, when it has one.
    pub(crate) fn tok_name(&self) -> Option<&str> {
        self.tok_value.as_name()
    }

    // === Automatic semicolon insertion ===

    pub(crate) fn can_insert_semicolon(&self) -> bool {
        !self.lex.options.strict_semicolons
            && (self.tok_type == TokenType::Eof
                || self.tok_type == TokenType::BraceR
                || self.tok_first_on_line
                || self.node_message_send_object_expression.is_some())
    }

    /// Consume an explicit `;` or insert one where the grammar allows.
    pub(crate) fn semicolon(&mut self) -> Result<(), ParseError> {
        if !self.eat(TokenType::Semi)? && !self.can_insert_semicolon() {
            return self.unexpected();
        }
        Ok(())
    }

    // === Strict mode ===

    /// Flip strict mode and re-lex the lookahead token so octal rejection
    /// applies to it as well.
    pub(crate) fn set_strict(&mut self, strict: bool) -> Result<(), ParseError> {
        self.strict = strict;
        self.lex.strict = strict;
        let comments = self.tok_comments_before.take();
        let spaces = self.tok_spaces_before.take();
        self.lex.relex_current()?;
        self.sync_token();
        self.tok_comments_before = comments;
        self.tok_spaces_before = spaces;
        Ok(())
    }

    // === Node lifecycle ===

    /// Where a node starting at the current token begins. Tokens replayed
    /// from a macro expansion collapse to the call site.
    fn node_start(&self) -> (usize, Option<Position>) {
        if self.tok_from_macro {
            (self.lex.macro_call_start, self.lex.macro_call_start_loc)
        } else {
            (self.tok_start, self.tok_start_loc)
        }
    }

    /// Begin a node at the current token, claiming its leading trivia.
    /// The outermost node starting at a token wins the trivia, since it is
    /// started first on the way down.
    pub(crate) fn start_marker(&mut self) -> Marker {
        let (start, start_loc) = self.node_start();
        Marker {
            start,
            start_loc,
            comments: self.tok_comments_before.take(),
            spaces: self.tok_spaces_before.take(),
        }
    }

    /// Begin a node that wraps an already-parsed node (binary operators,
    /// subscript chains). No trivia is claimed.
    pub(crate) fn marker_from_node(&self, node: &Node) -> Marker {
        Marker {
            start: node.start,
            start_loc: node.loc.as_ref().map(|l| l.start),
            comments: None,
            spaces: None,
        }
    }

    pub(crate) fn marker_at(&self, start: usize, start_loc: Option<Position>) -> Marker {
        Marker { start, start_loc, comments: None, spaces: None }
    }

    /// Complete a node: its end is the end of the last consumed token, and
    /// trailing trivia (the trivia in front of the lookahead token) is
    /// attached, stealing it back from a child that ends at the same offset.
    pub(crate) fn finish_node(&mut self, marker: Marker, kind: NodeKind) -> Node {
        let end = self.last_end.max(marker.start);
        let mut node = Node::new(marker.start, end, kind);
        if self.lex.options.locations {
            if let (Some(start), Some(end)) = (marker.start_loc, self.last_end_loc) {
                node.loc = Some(NodeLoc { start, end, source: self.source_file.clone() });
            }
        }
        if self.lex.options.ranges {
            node.range = Some((node.start, node.end));
        }
        node.source_file = self.direct_source_file.clone();
        if self.lex.options.track_comments {
            node.comments_before = marker.comments;
        }
        if self.lex.options.track_spaces {
            node.spaces_before = marker.spaces;
        }
        self.attach_trailing_trivia(&mut node);
        node
    }

    fn attach_trailing_trivia(&mut self, node: &mut Node) {
        let track_comments = self.lex.options.track_comments;
        let track_spaces = self.lex.options.track_spaces;
        if !track_comments && !track_spaces {
            return;
        }
        let comments = if track_comments { self.tok_comments_before.clone() } else { None };
        let spaces = if track_spaces { self.tok_spaces_before.clone() } else { None };
        if comments.is_none() && spaces.is_none() {
            self.last_finished_end = Some(node.end);
            return;
        }
        if self.last_finished_end == Some(node.end) {
            // A nested node ending here claimed the same trivia; ownership
            // bubbles up to the enclosing node.
            clear_trailing_trivia(&mut node.kind, node.end);
        }
        node.comments_after = comments;
        node.spaces_after = spaces;
        self.last_finished_end = Some(node.end);
    }
}

/// Walk the rightmost spine of a node's children and drop any trailing
/// trivia recorded at `end`.
fn clear_trailing_trivia(kind: &mut NodeKind, end: usize) {
    if let Some(child) = last_child_mut(kind) {
        if child.end == end {
            child.comments_after = None;
            child.spaces_after = None;
        }
        clear_trailing_trivia(&mut child.kind, end);
    }
}

/// The syntactically last child of a node, if any.
fn last_child_mut(kind: &mut NodeKind) -> Option<&mut Node> {
    use NodeKind::*;
    match kind {
        Program { body } | BlockStatement { body } => body.last_mut(),
        ExpressionStatement { expression } => Some(&mut **expression),
        IfStatement { consequent, alternate, .. } => {
            Some(alternate.as_deref_mut().unwrap_or(&mut **consequent))
        }
        LabeledStatement { body, .. } => Some(&mut **body),
        BreakStatement { label } | ContinueStatement { label } => label.as_deref_mut(),
        WithStatement { body, .. } => Some(&mut **body),
        SwitchStatement { cases, .. } => cases.last_mut(),
        SwitchCase { consequent, test } => consequent.last_mut().or(test.as_deref_mut()),
        ReturnStatement { argument } => argument.as_deref_mut(),
        ThrowStatement { argument } => Some(&mut **argument),
        TryStatement { block, handler, finalizer } => Some(
            finalizer
                .as_deref_mut()
                .or(handler.as_deref_mut())
                .unwrap_or(&mut **block),
        ),
        CatchClause { body, .. } => Some(&mut **body),
        WhileStatement { body, .. } => Some(&mut **body),
        DoWhileStatement { test, .. } => Some(&mut **test),
        ForStatement { body, .. } | ForInStatement { body, .. } => Some(&mut **body),
        FunctionDeclaration { body, .. } => Some(&mut **body),
        VariableDeclaration { declarations, .. } => declarations.last_mut(),
        VariableDeclarator { id, init } => Some(init.as_deref_mut().unwrap_or(&mut **id)),
        ArrayExpression { elements } => elements.last_mut().and_then(|e| e.as_mut()),
        ObjectExpression { properties } => properties.last_mut(),
        Property { value, .. } => Some(&mut **value),
        FunctionExpression { body, .. } => Some(&mut **body),
        SequenceExpression { expressions } => expressions.last_mut(),
        UnaryExpression { argument, .. } | UpdateExpression { argument, .. } => {
            Some(&mut **argument)
        }
        BinaryExpression { right, .. }
        | AssignmentExpression { right, .. }
        | LogicalExpression { right, .. } => Some(&mut **right),
        ConditionalExpression { alternate, .. } => Some(&mut **alternate),
        NewExpression { callee, arguments } | CallExpression { callee, arguments } => {
            match arguments.last_mut() {
                Some(last) => Some(last),
                None => Some(&mut **callee),
            }
        }
        MemberExpression { property, .. } => Some(&mut **property),
        ClassDeclarationStatement { body, ivardeclarations, .. }
        | InterfaceDeclarationStatement { body, ivardeclarations, .. } => {
            body.last_mut().or_else(|| ivardeclarations.last_mut())
        }
        ProtocolDeclarationStatement { optional, required, .. } => {
            optional.last_mut().or_else(|| required.last_mut())
        }
        MethodDeclarationStatement { body, .. } => body.as_deref_mut(),
        MessageSendExpression { parameters, arguments, object, .. } => {
            match parameters.last_mut() {
                Some(last) => Some(last),
                None => match arguments.last_mut() {
                    Some(last) => Some(last),
                    None => object.as_deref_mut(),
                },
            }
        }
        ProtocolLiteralExpression { id } => Some(&mut **id),
        Reference { element } => Some(&mut **element),
        Dereference { expr } => Some(&mut **expr),
        ImportStatement { filename, .. } => Some(&mut **filename),
        ArrayLiteral { elements } => elements.last_mut(),
        DictionaryLiteral { values, .. } => values.last_mut(),
        IvarDeclaration { id, .. } => Some(&mut **id),
        ObjectiveJType { protocols, .. } => protocols.last_mut(),
        ClassStatement { id } | GlobalStatement { id } | DefinedExpression { id } => {
            Some(&mut **id)
        }
        _ => None,
    }
}
