//! Macro definitions and the two-tier macro table.
//!
//! A [`Macro`] stores its replacement body as a token list captured at
//! definition time; names that match a parameter are tagged with the
//! parameter index so substitution does not re-resolve them. The table is
//! partitioned into predefined and user macros: predefined names
//! (`__OBJJ__`, `__BROWSER__`) can never be redefined, and only user macros
//! are reported back to the caller after a parse.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::frontend::lexer::token::{Token, TokenType, TokenValue};

/// The default name of the variadic parameter.
pub const VA_ARGS: &str = "__VA_ARGS__";

/// One formal parameter of a function-like macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub index: usize,
    pub variadic: bool,
}

/// A preprocessor macro: object-like, function-like, or variadic.
#[derive(Debug, Clone)]
pub struct Macro {
    pub name: String,
    pub parameters: SmallVec<[Parameter; 4]>,
    parameter_map: FxHashMap<String, usize>,
    pub is_function: bool,
    pub is_variadic: bool,
    pub tokens: Vec<Token>,
}

impl Macro {
    pub fn new(
        name: String,
        parameters: SmallVec<[Parameter; 4]>,
        is_function: bool,
        is_variadic: bool,
        tokens: Vec<Token>,
    ) -> Self {
        let parameter_map = parameters
            .iter()
            .map(|p| (p.name.clone(), p.index))
            .collect();
        Self { name, parameters, parameter_map, is_function, is_variadic, tokens }
    }

    /// Build an object-like macro whose body is a single synthesized token.
    fn flag(name: &str) -> Self {
        let input: Rc<str> = Rc::from("1");
        let token = Token {
            input: input.clone(),
            start: 0,
            end: 1,
            ttype: TokenType::Num,
            value: TokenValue::Num(1.0),
            regexp_allowed: false,
            first_on_line: false,
            start_loc: None,
            end_loc: None,
            comments_before: None,
            comments_after: None,
            spaces_before: None,
            spaces_after: None,
            macro_parameter: None,
        };
        Macro::new(name.to_string(), SmallVec::new(), false, false, vec![token])
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameter_map.get(name).map(|&i| &self.parameters[i])
    }

    /// The variadic parameter, when the macro has one (always last).
    pub fn variadic_parameter(&self) -> Option<&Parameter> {
        if self.is_variadic {
            self.parameters.last()
        } else {
            None
        }
    }

    /// Number of fixed (non-variadic) parameters.
    pub fn fixed_parameter_count(&self) -> usize {
        self.parameters.len() - usize::from(self.is_variadic)
    }

    /// GNU-style macro equivalence: same kind, same variadicity, same
    /// parameter spellings, same body token sequence. Redefining an
    /// equivalent macro is silent; anything else warns.
    pub fn is_equivalent(&self, other: &Macro) -> bool {
        if self.is_function != other.is_function
            || self.is_variadic != other.is_variadic
            || self.parameters.len() != other.parameters.len()
            || self.tokens.len() != other.tokens.len()
        {
            return false;
        }
        if self
            .parameters
            .iter()
            .zip(other.parameters.iter())
            .any(|(a, b)| a.name != b.name || a.variadic != b.variadic)
        {
            return false;
        }
        self.tokens
            .iter()
            .zip(other.tokens.iter())
            .all(|(a, b)| a.ttype == b.ttype && a.value == b.value)
    }
}

/// A predefined-or-textual macro handed in through the `macros` option.
pub enum MacroSpec {
    /// `NAME`, `NAME=body`, or `NAME(a, b)=body`.
    Text(String),
    /// A macro captured from a previous parse.
    Object(Macro),
}

/// Two-tier macro storage.
#[derive(Debug, Default)]
pub struct MacroTable {
    predefined: FxHashMap<String, Rc<Macro>>,
    user: FxHashMap<String, Rc<Macro>>,
}

impl MacroTable {
    /// Create a table seeded with the predefined flag macros.
    pub fn with_predefined(objj: bool, browser: bool) -> Self {
        let mut table = MacroTable::default();
        if objj {
            table
                .predefined
                .insert("__OBJJ__".to_string(), Rc::new(Macro::flag("__OBJJ__")));
        }
        if browser {
            table
                .predefined
                .insert("__BROWSER__".to_string(), Rc::new(Macro::flag("__BROWSER__")));
        }
        table
    }

    pub fn is_predefined(&self, name: &str) -> bool {
        self.predefined.contains_key(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.predefined.contains_key(name) || self.user.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Rc<Macro>> {
        self.user
            .get(name)
            .or_else(|| self.predefined.get(name))
            .cloned()
    }

    /// Install a user macro, replacing any previous definition.
    /// Predefined names must be rejected by the caller beforehand.
    pub fn define(&mut self, mac: Macro) {
        self.user.insert(mac.name.clone(), Rc::new(mac));
    }

    /// Remove a user macro; a no-op when the name is not defined.
    pub fn undefine(&mut self, name: &str) {
        self.user.remove(name);
    }

    /// All user-defined macros, sorted by name for stable output.
    pub fn user_macros(&self) -> Vec<Macro> {
        let mut macros: Vec<Macro> = self.user.values().map(|m| (**m).clone()).collect();
        macros.sort_by(|a, b| a.name.cmp(&b.name));
        macros
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_token(word: &str) -> Token {
        let input: Rc<str> = Rc::from(word);
        Token {
            input: input.clone(),
            start: 0,
            end: word.len(),
            ttype: TokenType::Name,
            value: TokenValue::Name(word.to_string()),
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

    fn simple_macro(name: &str, body_word: &str) -> Macro {
        Macro::new(name.to_string(), SmallVec::new(), false, false, vec![name_token(body_word)])
    }

    #[test]
    fn predefined_partition() {
        let table = MacroTable::with_predefined(true, false);
        assert!(table.is_predefined("__OBJJ__"));
        assert!(!table.is_defined("__BROWSER__"));
        assert!(table.get("__OBJJ__").is_some());
        assert!(table.user_macros().is_empty());
    }

    #[test]
    fn user_macros_excludes_predefined() {
        let mut table = MacroTable::with_predefined(true, true);
        table.define(simple_macro("FOO", "bar"));
        let names: Vec<_> = table.user_macros().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["FOO"]);
    }

    #[test]
    fn undefine_is_noop_for_missing() {
        let mut table = MacroTable::default();
        table.undefine("NOPE");
        table.define(simple_macro("A", "b"));
        table.undefine("A");
        assert!(!table.is_defined("A"));
    }

    #[test]
    fn equivalence_same_body() {
        let a = simple_macro("X", "y");
        let b = simple_macro("X", "y");
        let c = simple_macro("X", "z");
        assert!(a.is_equivalent(&b));
        assert!(!a.is_equivalent(&c));
    }

    #[test]
    fn equivalence_parameter_names_matter() {
        let params = |names: &[&str]| -> SmallVec<[Parameter; 4]> {
            names
                .iter()
                .enumerate()
                .map(|(i, n)| Parameter { name: n.to_string(), index: i, variadic: false })
                .collect()
        };
        let a = Macro::new("M".into(), params(&["a"]), true, false, vec![name_token("a")]);
        let b = Macro::new("M".into(), params(&["b"]), true, false, vec![name_token("a")]);
        assert!(!a.is_equivalent(&b));
    }
}
