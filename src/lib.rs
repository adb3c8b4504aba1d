//! Lexer, GNU-style preprocessor, and recursive-descent parser for
//! Objective-J, a superset of ECMAScript 3/5 with Smalltalk-style message
//! sends, classes, protocols, and typed instance variables. Produces a
//! Mozilla Parser API AST.
//!
//! Source text flows through one synchronous pipeline: the lexer produces
//! tokens from the input buffer, the preprocessor intercepts `#` directives
//! and splices macro expansions into the token stream without disturbing
//! source offsets, and the parser consumes the multiplexed stream into AST
//! nodes decorated with comment and whitespace trivia.
//!
//! ```no_run
//! let program = objj_parser::parse("var x = 1;", objj_parser::Options::default())?;
//! assert_eq!(program.type_name(), "Program");
//! # Ok::<(), objj_parser::ParseError>(())
//! ```

pub(crate) mod common;
pub(crate) mod frontend;

use frontend::lexer::lexer::Lexer;
use frontend::parser::parser::Parser;

pub use common::error::{Diagnostic, DiagnosticEngine, ParseError};
pub use common::source::{LineInfo, Position};
pub use frontend::lexer::token::{Comment, Token, TokenType, TokenValue};
pub use frontend::parser::ast::{
    Accessors, LiteralValue, MethodArgument, Node, NodeKind, NodeLoc, PropertyKind,
};
pub use frontend::preprocessor::macros::{Macro, MacroSpec, Parameter};

/// Callback invoked for every skipped comment:
/// `(block, text, start, end, start_loc, end_loc)`.
pub type OnComment =
    Box<dyn FnMut(bool, &str, usize, usize, Option<Position>, Option<Position>)>;

/// Policy for reserved words used as identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReservedPolicy {
    /// Reserved words are accepted as identifiers.
    #[default]
    Off,
    /// Reserved words are rejected in binding and expression positions.
    On,
    /// Reserved words are rejected even as member and property names.
    Everywhere,
}

/// Parse configuration. Every field has a recognized effect; the defaults
/// parse Objective-J with the preprocessor on and no trivia capture.
pub struct Options {
    /// Reserved-word set: 3 or 5.
    pub ecma_version: u32,
    /// Disable automatic semicolon insertion.
    pub strict_semicolons: bool,
    /// Permit trailing commas in array/object/dictionary literals and
    /// argument lists.
    pub allow_trailing_commas: bool,
    pub forbid_reserved: ReservedPolicy,
    /// Capture comments onto tokens and nodes.
    pub track_comments: bool,
    /// Include the line break introducing a line comment in its text.
    pub track_comments_include_line_break: bool,
    /// Capture whitespace runs onto tokens and nodes.
    pub track_spaces: bool,
    /// Attach `{start, end}` line/column locations.
    pub locations: bool,
    /// Attach `[start, end]` offset ranges.
    pub ranges: bool,
    /// Sink called for every skipped comment.
    pub on_comment: Option<OnComment>,
    /// Seed `Program` node; new top-level statements are appended.
    pub program: Option<Node>,
    /// Source name recorded on node locations and in errors.
    pub source_file: Option<String>,
    /// Source name recorded directly on nodes.
    pub direct_source_file: Option<String>,
    /// Enable Objective-J syntax.
    pub objj: bool,
    /// Enable the preprocessor.
    pub preprocess: bool,
    /// Predefined macros: textual (`NAME`, `NAME=body`, `NAME(a,b)=body`)
    /// or `Macro` values from a previous parse.
    pub macros: Vec<MacroSpec>,
    /// Suffix error messages with ` (line:column)`.
    pub line_no_in_error_message: bool,
    /// Host flag backing the predefined `__BROWSER__` macro.
    pub browser: bool,
    /// Keep warnings off stderr (they are still collected).
    pub quiet_warnings: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            ecma_version: 5,
            strict_semicolons: false,
            allow_trailing_commas: false,
            forbid_reserved: ReservedPolicy::Off,
            track_comments: false,
            track_comments_include_line_break: false,
            track_spaces: false,
            locations: false,
            ranges: false,
            on_comment: None,
            program: None,
            source_file: None,
            direct_source_file: None,
            objj: true,
            preprocess: true,
            macros: Vec::new(),
            line_no_in_error_message: false,
            browser: false,
            quiet_warnings: false,
        }
    }
}

/// Parse a complete program. Single-shot: returns the `Program` node or the
/// first fatal error.
pub fn parse(input: &str, options: Options) -> Result<Node, ParseError> {
    parse_with_macros(input, options).map(|(node, _)| node)
}

/// Parse a complete program and also return the user macros defined during
/// the parse, suitable for feeding into another parse's `macros` option.
pub fn parse_with_macros(
    input: &str,
    mut options: Options,
) -> Result<(Node, Vec<Macro>), ParseError> {
    let program = options.program.take();
    let mut parser = Parser::new(input, options)?;
    let node = parser.parse_top_level(program)?;
    let macros = parser.macros();
    Ok((node, macros))
}

/// Resolve a byte offset to line, column, and containing-line bounds.
pub fn get_line_info(input: &str, offset: usize) -> LineInfo {
    common::source::line_info(input, offset)
}

/// Create a token iterator over `input`. Tokens pass through the
/// preprocessor exactly as the parser would see them.
pub fn tokenize(input: &str, options: Options) -> Result<Tokenizer, ParseError> {
    let mut lex = Lexer::new(input, options);
    lex.define_option_macros()?;
    Ok(Tokenizer { lex, done: false })
}

/// Pull-based token reader with a `jump_to` seek. Invalidated by starting
/// another parse or tokenizer over the same session.
pub struct Tokenizer {
    lex: Lexer,
    done: bool,
}

impl Tokenizer {
    /// Read the next token. `force_regexp` makes a leading `/` parse as a
    /// regular expression regardless of context.
    pub fn next_token(&mut self, force_regexp: bool) -> Result<Token, ParseError> {
        if force_regexp {
            self.lex.read_token(true)?;
        } else {
            self.lex.next_token()?;
        }
        Ok(self.lex.current_token())
    }

    /// Seek to a byte offset and set whether a regular expression may
    /// start there.
    pub fn jump_to(&mut self, pos: usize, regexp_allowed: bool) {
        self.lex.jump_to(pos, regexp_allowed);
    }

    /// Warnings collected while tokenizing.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.lex.diagnostics.diagnostics()
    }
}

impl Iterator for Tokenizer {
    type Item = Result<Token, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_token(false) {
            Ok(tok) => {
                if tok.ttype == TokenType::Eof {
                    self.done = true;
                    None
                } else {
                    Some(Ok(tok))
                }
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> Options {
        let mut options = Options::default();
        options.quiet_warnings = true;
        options
    }

    fn parse_ok(src: &str) -> Node {
        parse(src, opts()).expect("parse failed")
    }

    fn body(node: &Node) -> &[Node] {
        match &node.kind {
            NodeKind::Program { body } => body,
            _ => panic!("not a program"),
        }
    }

    // === Plain JavaScript ===

    #[test]
    fn simple_var_declaration() {
        let program = parse_ok("var x = 1;");
        let stmts = body(&program);
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].type_name(), "VariableDeclaration");
        assert_eq!(stmts[0].start, 0);
        assert_eq!(stmts[0].end, 10);
    }

    #[test]
    fn operator_precedence() {
        let program = parse_ok("x = 1 + 2 * 3;");
        let NodeKind::ExpressionStatement { expression } = &body(&program)[0].kind else {
            panic!("expected expression statement");
        };
        let NodeKind::AssignmentExpression { right, .. } = &expression.kind else {
            panic!("expected assignment");
        };
        let NodeKind::BinaryExpression { operator, right: mul, .. } = &right.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(operator, "+");
        assert!(matches!(
            &mul.kind,
            NodeKind::BinaryExpression { operator, .. } if operator == "*"
        ));
    }

    #[test]
    fn logical_vs_binary_nodes() {
        let program = parse_ok("a && b | c;");
        let NodeKind::ExpressionStatement { expression } = &body(&program)[0].kind else {
            panic!();
        };
        assert!(matches!(
            &expression.kind,
            NodeKind::LogicalExpression { operator, .. } if operator == "&&"
        ));
    }

    #[test]
    fn for_in_and_labels() {
        parse_ok("outer: for (var k in o) { if (k) continue outer; break outer; }");
    }

    #[test]
    fn unsyntactic_break_rejected() {
        assert!(parse("break;", opts()).is_err());
    }

    #[test]
    fn return_outside_function_rejected() {
        assert!(parse("return 1;", opts()).is_err());
    }

    #[test]
    fn asi_soundness() {
        assert!(parse("x = 1\ny = 2\n", opts()).is_ok());
        let mut strict = opts();
        strict.strict_semicolons = true;
        assert!(parse("x = 1\ny = 2\n", strict).is_err());
        let mut strict = opts();
        strict.strict_semicolons = true;
        assert!(parse("x = 1; y = 2;", strict).is_ok());
    }

    #[test]
    fn strict_mode_rules() {
        assert!(parse("'use strict'; x = 010;", opts()).is_err());
        assert!(parse("'use strict'; with (o) {}", opts()).is_err());
        assert!(parse("'use strict'; eval = 1;", opts()).is_err());
        assert!(parse("'use strict'; function f(a, a) {}", opts()).is_err());
        assert!(parse("x = 010;", opts()).is_ok());
    }

    #[test]
    fn object_literal_accessors() {
        let program = parse_ok("o = { a: 1, get b() { return 2; }, set b(v) {} };");
        let NodeKind::ExpressionStatement { expression } = &body(&program)[0].kind else {
            panic!();
        };
        let NodeKind::AssignmentExpression { right, .. } = &expression.kind else { panic!() };
        let NodeKind::ObjectExpression { properties } = &right.kind else { panic!() };
        assert_eq!(properties.len(), 3);
    }

    #[test]
    fn duplicate_strict_properties_rejected() {
        assert!(parse("'use strict'; o = { a: 1, a: 2 };", opts()).is_err());
        assert!(parse("o = { a: 1, a: 2 };", opts()).is_ok());
    }

    #[test]
    fn round_trip_statement_offsets() {
        let src = "if (a) { b(); } else { c(); }\nvar q = [1, 2, 3];\n";
        let program = parse_ok(src);
        for stmt in body(&program) {
            let slice = &src[stmt.start..stmt.end];
            let reparsed = parse_ok(slice);
            assert_eq!(body(&reparsed)[0].type_name(), stmt.type_name());
        }
    }

    // === Preprocessor scenarios ===

    #[test]
    fn object_macro_spans_call_site() {
        let src = "#define X 4\nfoo = X;";
        let program = parse_ok(src);
        let stmts = body(&program);
        assert_eq!(stmts.len(), 1);
        let stmt = &stmts[0];
        assert_eq!(stmt.type_name(), "ExpressionStatement");
        assert_eq!(&src[stmt.start..stmt.end], "foo = X;");
        let NodeKind::ExpressionStatement { expression } = &stmt.kind else { panic!() };
        let NodeKind::AssignmentExpression { right, .. } = &expression.kind else { panic!() };
        assert!(matches!(
            &right.kind,
            NodeKind::Literal { value: LiteralValue::Num(n), .. } if *n == 4.0
        ));
    }

    #[test]
    fn token_paste_forms_identifier() {
        let src = "#define CAT(a,b) a ## b\nvar CAT(foo,bar) = 1;";
        let program = parse_ok(src);
        let NodeKind::VariableDeclaration { declarations, .. } = &body(&program)[0].kind else {
            panic!("expected var declaration");
        };
        let NodeKind::VariableDeclarator { id, .. } = &declarations[0].kind else { panic!() };
        assert!(matches!(&id.kind, NodeKind::Identifier { name } if name == "foobar"));
    }

    #[test]
    fn stringify_with_and_without_rescan() {
        let src = "#define str(s) #s\n#define xstr(s) str(s)\n#define V 4\nx = xstr(V);\ny = str(V);";
        let program = parse_ok(src);
        let get_str = |stmt: &Node| -> String {
            let NodeKind::ExpressionStatement { expression } = &stmt.kind else { panic!() };
            let NodeKind::AssignmentExpression { right, .. } = &expression.kind else { panic!() };
            let NodeKind::Literal { value: LiteralValue::Str(s), .. } = &right.kind else {
                panic!("expected string literal");
            };
            s.clone()
        };
        assert_eq!(get_str(&body(&program)[0]), "4");
        assert_eq!(get_str(&body(&program)[1]), "V");
    }

    #[test]
    fn variadic_comma_deletion() {
        let src = "#define L(fmt, ...) f(fmt, ##__VA_ARGS__)\nL(\"hi\");\nL(\"hi\", 1);";
        let program = parse_ok(src);
        let arg_count = |stmt: &Node| -> usize {
            let NodeKind::ExpressionStatement { expression } = &stmt.kind else { panic!() };
            let NodeKind::CallExpression { arguments, .. } = &expression.kind else {
                panic!("expected call");
            };
            arguments.len()
        };
        assert_eq!(arg_count(&body(&program)[0]), 1);
        assert_eq!(arg_count(&body(&program)[1]), 2);
    }

    #[test]
    fn conditional_skip() {
        let src = "#if 0\nvar x = 1;\n#else\nvar x = 2;\n#endif";
        let program = parse_ok(src);
        let stmts = body(&program);
        assert_eq!(stmts.len(), 1);
        let NodeKind::VariableDeclaration { declarations, .. } = &stmts[0].kind else { panic!() };
        let NodeKind::VariableDeclarator { init, .. } = &declarations[0].kind else { panic!() };
        let init = init.as_ref().expect("initializer");
        assert!(matches!(
            &init.kind,
            NodeKind::Literal { value: LiteralValue::Num(n), .. } if *n == 2.0
        ));
    }

    #[test]
    fn nested_conditionals_balance() {
        let src = "#if 0\n#if 1\nbad();\n#endif\n#else\ngood();\n#endif\n";
        let program = parse_ok(src);
        assert_eq!(body(&program).len(), 1);
        assert!(parse("#if 1\nx;\n", opts()).is_err());
        assert!(parse("#endif\n", opts()).is_err());
        assert!(parse("#if 0\n#else\n#else\n#endif\n", opts()).is_err());
    }

    #[test]
    fn if_expression_features() {
        // defined, function-like macro without parens, short-circuit.
        let src = "#define F(x) x\n#if defined(F) && F(1) + 1 == 2 && !UNDEFINED\nok();\n#endif";
        let program = parse_ok(src);
        assert_eq!(body(&program).len(), 1);
        let src = "#if F\nbad();\n#endif\n#define F(x) x\n#if F\nbad();\n#endif";
        let program = parse_ok(src);
        assert!(body(&program).is_empty());
    }

    #[test]
    fn if_string_atoms() {
        let src = "#define PLATFORM \"mac\"\n#if PLATFORM == \"mac\"\nok();\n#endif";
        let program = parse_ok(src);
        assert_eq!(body(&program).len(), 1);
        assert!(parse("#if \"a\" + 1\nx;\n#endif", opts()).is_err());
    }

    #[test]
    fn self_referential_macro_terminates() {
        let src = "#define FOO FOO + 1\nx = FOO;";
        let program = parse_ok(src);
        assert_eq!(body(&program).len(), 1);
    }

    #[test]
    fn undef_and_redefinition_warning() {
        let src = "#define A 1\n#undef A\n#define A 2\nx = A;";
        let (program, macros) = parse_with_macros(src, opts()).expect("parse");
        assert_eq!(body(&program).len(), 1);
        assert_eq!(macros.len(), 1);
        assert_eq!(macros[0].name, "A");
    }

    #[test]
    fn predefined_macros() {
        let program = parse_ok("#if __OBJJ__\nok();\n#endif");
        assert_eq!(body(&program).len(), 1);
        assert!(parse("#define __OBJJ__ 2\n", opts()).is_err());
        let mut no_browser = opts();
        no_browser.browser = false;
        let program = parse("#if __BROWSER__\nbad();\n#endif", no_browser).unwrap();
        assert!(body(&program).is_empty());
        let mut browser = opts();
        browser.browser = true;
        let program = parse("#if __BROWSER__\nok();\n#endif", browser).unwrap();
        assert_eq!(body(&program).len(), 1);
    }

    #[test]
    fn macros_option_and_idempotence() {
        let mut options = opts();
        options.macros.push(MacroSpec::Text("DEBUG".into()));
        options.macros.push(MacroSpec::Text("SQ(x)=((x)*(x))".into()));
        let (_, macros) =
            parse_with_macros("#if DEBUG\ny = SQ(3);\n#endif", options).expect("parse");
        let names: Vec<_> = macros.iter().map(|m| m.name.clone()).collect();
        assert_eq!(names, vec!["DEBUG", "SQ"]);

        // Feed the captured macros into a fresh parse.
        let mut options = opts();
        options.macros = macros.into_iter().map(MacroSpec::Object).collect();
        let (program, macros) = parse_with_macros("z = SQ(4);", options).expect("parse");
        assert_eq!(body(&program).len(), 1);
        let names: Vec<_> = macros.iter().map(|m| m.name.clone()).collect();
        assert_eq!(names, vec!["DEBUG", "SQ"]);
    }

    #[test]
    fn error_and_warning_directives() {
        let err = parse("#error \"broken build\"\n", opts()).unwrap_err();
        assert!(err.message.contains("broken build"));
        assert_eq!(err.line, 1);
        assert!(parse("#warning \"will continue\"\nx = 1;", opts()).is_ok());
    }

    #[test]
    fn wrong_argument_count() {
        assert!(parse("#define TWO(a, b) a + b\nTWO(1);", opts()).is_err());
        assert!(parse("#define TWO(a, b) a + b\nx = TWO(1, 2);", opts()).is_ok());
    }

    #[test]
    fn unterminated_macro_call() {
        assert!(parse("#define F(x) x\nF(1", opts()).is_err());
    }

    #[test]
    fn line_continuation_in_define() {
        let src = "#define SUM(a, b) \\\n    ((a) + (b))\nx = SUM(1, 2);";
        assert_eq!(body(&parse_ok(src)).len(), 1);
    }

    // === Objective-J ===

    #[test]
    fn message_send_after_asi() {
        let src = "var a = 1\n[self doThing]";
        let program = parse_ok(src);
        let stmts = body(&program);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].type_name(), "VariableDeclaration");
        let NodeKind::ExpressionStatement { expression } = &stmts[1].kind else {
            panic!("expected expression statement");
        };
        let NodeKind::MessageSendExpression { object, selectors, .. } = &expression.kind else {
            panic!("expected message send, got {}", expression.type_name());
        };
        assert!(matches!(
            object.as_deref().map(|o| &o.kind),
            Some(NodeKind::Identifier { name }) if name == "self"
        ));
        assert!(matches!(
            selectors[0].as_ref().map(|s| &s.kind),
            Some(NodeKind::Identifier { name }) if name == "doThing"
        ));
    }

    #[test]
    fn keyword_selector_with_variadic() {
        let src = "[obj setX: 1 y: 2, 3, 4];";
        let program = parse_ok(src);
        let NodeKind::ExpressionStatement { expression } = &body(&program)[0].kind else {
            panic!();
        };
        let NodeKind::MessageSendExpression { selectors, arguments, parameters, .. } =
            &expression.kind
        else {
            panic!("expected message send");
        };
        assert_eq!(selectors.len(), 2);
        assert_eq!(arguments.len(), 2);
        assert_eq!(parameters.len(), 2);
    }

    #[test]
    fn super_receiver() {
        let src = "[super init];";
        let program = parse_ok(src);
        let NodeKind::ExpressionStatement { expression } = &body(&program)[0].kind else {
            panic!();
        };
        let NodeKind::MessageSendExpression { object, super_object, .. } = &expression.kind
        else {
            panic!();
        };
        assert!(super_object);
        assert!(object.is_none());
    }

    #[test]
    fn array_literal_vs_message_send() {
        let program = parse_ok("x = [1, 2];\ny = [a b];");
        let kind_of = |stmt: &Node| -> &'static str {
            let NodeKind::ExpressionStatement { expression } = &stmt.kind else { panic!() };
            let NodeKind::AssignmentExpression { right, .. } = &expression.kind else { panic!() };
            right.type_name()
        };
        assert_eq!(kind_of(&body(&program)[0]), "ArrayExpression");
        assert_eq!(kind_of(&body(&program)[1]), "MessageSendExpression");
    }

    #[test]
    fn subscript_still_works() {
        let program = parse_ok("y = x[i];");
        let NodeKind::ExpressionStatement { expression } = &body(&program)[0].kind else {
            panic!();
        };
        let NodeKind::AssignmentExpression { right, .. } = &expression.kind else { panic!() };
        assert!(matches!(&right.kind, NodeKind::MemberExpression { computed: true, .. }));
    }

    #[test]
    fn class_declaration_full() {
        let src = "@implementation Person : CPObject <Printable, Encodable>\n{\n    CPString _name @accessors(property=name, readonly);\n    @outlet CPView _view;\n    unsigned int _age;\n}\n+ (id)personWithName:(CPString)aName\n{\n    return [[self alloc] initWithName: aName];\n}\n- (void)print\n{\n}\n@end";
        let program = parse_ok(src);
        let NodeKind::ClassDeclarationStatement {
            classname,
            superclassname,
            protocols,
            ivardeclarations,
            body: class_body,
            ..
        } = &body(&program)[0].kind
        else {
            panic!("expected class declaration");
        };
        assert!(matches!(&classname.kind, NodeKind::Identifier { name } if name == "Person"));
        assert!(superclassname.is_some());
        assert_eq!(protocols.len(), 2);
        assert_eq!(ivardeclarations.len(), 3);
        assert_eq!(class_body.len(), 2);

        let NodeKind::IvarDeclaration { accessors, .. } = &ivardeclarations[0].kind else {
            panic!();
        };
        let accessors = accessors.as_ref().expect("accessors");
        assert!(accessors.readonly);
        assert!(accessors.property.is_some());
        let NodeKind::IvarDeclaration { outlet, .. } = &ivardeclarations[1].kind else { panic!() };
        assert!(outlet);
        let NodeKind::IvarDeclaration { ivartype, .. } = &ivardeclarations[2].kind else {
            panic!();
        };
        assert!(matches!(
            &ivartype.kind,
            NodeKind::ObjectiveJType { name, typeisclass: false, .. } if name == "unsigned int"
        ));

        let NodeKind::MethodDeclarationStatement { methodtype, selectors, arguments, .. } =
            &class_body[0].kind
        else {
            panic!("expected method");
        };
        assert_eq!(*methodtype, '+');
        assert_eq!(selectors.len(), 1);
        assert_eq!(arguments.len(), 1);
    }

    #[test]
    fn category_declaration() {
        let src = "@implementation Person (Printing)\n- (void)print { }\n@end";
        let program = parse_ok(src);
        let NodeKind::ClassDeclarationStatement { categoryname, .. } = &body(&program)[0].kind
        else {
            panic!();
        };
        assert!(categoryname.is_some());
    }

    #[test]
    fn protocol_declaration_with_sections() {
        let src = "@protocol Printable <CPObject>\n- (void)print;\n@optional\n- (CPString)fancyDescription;\n@end";
        let program = parse_ok(src);
        let NodeKind::ProtocolDeclarationStatement { required, optional, .. } =
            &body(&program)[0].kind
        else {
            panic!("expected protocol declaration");
        };
        assert_eq!(required.len(), 1);
        assert_eq!(optional.len(), 1);
    }

    #[test]
    fn variadic_method_declaration() {
        let src = "@implementation Foo\n- (void)log:(id)first, ...\n{\n}\n@end";
        let program = parse_ok(src);
        let NodeKind::ClassDeclarationStatement { body: class_body, .. } = &body(&program)[0].kind
        else {
            panic!();
        };
        let NodeKind::MethodDeclarationStatement { variadic, .. } = &class_body[0].kind else {
            panic!();
        };
        assert!(variadic);
    }

    #[test]
    fn import_statements() {
        let src = "@import <Foundation/Foundation.j>\n@import \"Person.j\"";
        let program = parse_ok(src);
        let stmts = body(&program);
        let NodeKind::ImportStatement { local, .. } = &stmts[0].kind else { panic!() };
        assert!(!local);
        let NodeKind::ImportStatement { local, .. } = &stmts[1].kind else { panic!() };
        assert!(local);
    }

    #[test]
    fn at_literals() {
        let src = "a = @selector(initWithName:age:);\nb = @protocol(Printable);\nc = @ref(x);\nd = @deref(y);\ne = @[1, 2];\nf = @{\"k\": 1};\ng = @\"str\";";
        let program = parse_ok(src);
        let kinds: Vec<&'static str> = body(&program)
            .iter()
            .map(|stmt| {
                let NodeKind::ExpressionStatement { expression } = &stmt.kind else { panic!() };
                let NodeKind::AssignmentExpression { right, .. } = &expression.kind else {
                    panic!()
                };
                right.type_name()
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "SelectorLiteralExpression",
                "ProtocolLiteralExpression",
                "Reference",
                "Dereference",
                "ArrayLiteral",
                "DictionaryLiteral",
                "Literal",
            ]
        );
    }

    #[test]
    fn selector_literal_text() {
        let src = "s = @selector(setName:withAge:);";
        let program = parse_ok(src);
        let NodeKind::ExpressionStatement { expression } = &body(&program)[0].kind else {
            panic!();
        };
        let NodeKind::AssignmentExpression { right, .. } = &expression.kind else { panic!() };
        let NodeKind::SelectorLiteralExpression { selector } = &right.kind else { panic!() };
        assert_eq!(selector, "setName:withAge:");
    }

    #[test]
    fn class_and_global_statements() {
        let program = parse_ok("@class Person;\n@global CPApp;");
        assert_eq!(body(&program)[0].type_name(), "ClassStatement");
        assert_eq!(body(&program)[1].type_name(), "GlobalStatement");
    }

    #[test]
    fn objj_off_rejects_at() {
        let mut options = opts();
        options.objj = false;
        assert!(parse("@implementation Foo\n@end", options).is_err());
    }

    // === Trivia ===

    #[test]
    fn comments_attach_to_nodes() {
        let mut options = opts();
        options.track_comments = true;
        let src = "// leading\nvar x = 1;\n// trailing\nvar y = 2;";
        let program = parse(src, options).expect("parse");
        let stmts = body(&program);
        let leading = stmts[0].comments_before.as_ref().expect("leading comment");
        assert_eq!(leading[0].text, "// leading");
        let between = stmts[1].comments_before.as_ref().expect("between comment");
        assert_eq!(between[0].text, "// trailing");
        // The same comment is the first statement's trailing trivia.
        let trailing = stmts[0].comments_after.as_ref().expect("trailing comment");
        assert_eq!(trailing[0].text, "// trailing");
    }

    #[test]
    fn comment_disjointness() {
        let mut options = opts();
        options.track_comments = true;
        let src = "/* a */ x = 1; /* b */ y = 2;";
        let program = parse(src, options).expect("parse");
        let stmts = body(&program);
        let first = stmts[0].comments_before.as_ref().expect("first comment");
        assert_eq!(first.len(), 1);
        // The inner expression nodes must not also claim the comment.
        let NodeKind::ExpressionStatement { expression } = &stmts[0].kind else { panic!() };
        assert!(expression.comments_before.is_none());
        let second = stmts[1].comments_before.as_ref().expect("second comment");
        assert_eq!(second[0].text, "/* b */");
    }

    #[test]
    fn on_comment_callback() {
        use std::cell::RefCell;
        use std::rc::Rc;
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut options = opts();
        options.on_comment = Some(Box::new(move |_block, text, _s, _e, _sl, _el| {
            sink.borrow_mut().push(text.to_string());
        }));
        parse("// one\nx = 1; /* two */", options).expect("parse");
        assert_eq!(*seen.borrow(), vec!["// one".to_string(), "/* two */".to_string()]);
    }

    #[test]
    fn comments_survive_directives() {
        let mut options = opts();
        options.track_comments = true;
        let src = "// banner\n#define N 1\nvar x = N;";
        let program = parse(src, options).expect("parse");
        let stmts = body(&program);
        let comments = stmts[0].comments_before.as_ref().expect("rescued comment");
        assert_eq!(comments[0].text, "// banner");
    }

    // === Locations and ranges ===

    #[test]
    fn locations_and_ranges() {
        let mut options = opts();
        options.locations = true;
        options.ranges = true;
        options.source_file = Some("test.j".into());
        let program = parse("var x = 1;\nvar y = 2;", options).expect("parse");
        let stmts = body(&program);
        let loc = stmts[1].loc.as_ref().expect("loc");
        assert_eq!(loc.start.line, 2);
        assert_eq!(loc.start.column, 0);
        assert_eq!(loc.source.as_deref(), Some("test.j"));
        assert_eq!(stmts[1].range, Some((stmts[1].start, stmts[1].end)));
    }

    #[test]
    fn get_line_info_matches_errors() {
        let src = "var x = 1;\nvar y = @;\n";
        let err = parse(src, opts()).unwrap_err();
        assert_eq!(err.line, 2);
        let info = get_line_info(src, src.find('@').unwrap());
        assert_eq!(info.line, 2);
        assert_eq!(info.column, 8);
    }

    #[test]
    fn error_position_suffix_option() {
        let mut options = opts();
        options.line_no_in_error_message = true;
        let err = parse("var = 1;", options).unwrap_err();
        assert!(err.message.ends_with("(1:4)"), "message: {}", err.message);
    }

    // === Tokenizer API ===

    #[test]
    fn tokenize_iterator() {
        let toks: Result<Vec<Token>, ParseError> =
            tokenize("var x = 1;", opts()).expect("tokenizer").collect();
        let toks = toks.expect("tokens");
        let types: Vec<TokenType> = toks.iter().map(|t| t.ttype).collect();
        assert_eq!(
            types,
            vec![TokenType::Var, TokenType::Name, TokenType::Eq, TokenType::Num, TokenType::Semi]
        );
    }

    #[test]
    fn tokenize_sees_expansions() {
        let toks: Result<Vec<Token>, ParseError> =
            tokenize("#define X 42\nX;", opts()).expect("tokenizer").collect();
        let toks = toks.expect("tokens");
        assert!(toks.iter().any(|t| t.ttype == TokenType::Num));
        assert!(!toks.iter().any(|t| t.ttype == TokenType::Hash));
    }

    #[test]
    fn tokenizer_jump_to() {
        let src = "a /b/ c";
        let mut toks = tokenize(src, opts()).expect("tokenizer");
        let first = toks.next_token(false).expect("token");
        assert_eq!(first.ttype, TokenType::Name);
        toks.jump_to(2, true);
        let regex = toks.next_token(false).expect("token");
        assert_eq!(regex.ttype, TokenType::Regexp);
        toks.jump_to(2, false);
        let div = toks.next_token(false).expect("token");
        assert_eq!(div.ttype, TokenType::Slash);
    }

    #[test]
    fn program_seed_appends() {
        let first = parse_ok("var a = 1;");
        let mut options = opts();
        options.program = Some(first);
        let combined = parse("var b = 2;", options).expect("parse");
        assert_eq!(body(&combined).len(), 2);
    }
}
