//! Macro definition and expansion.
//!
//! A macro is declared with `.macro NAME [%p1 %p2 ...]` and closed with
//! `.end_macro`; its body is stored verbatim as token lines. A call is a line
//! whose leading identifier names a defined macro with a matching argument
//! count (macros are overloaded by arity). Expansion substitutes the caller's
//! argument tokens for the parameter tokens and hands the resulting lines
//! back to the first pass, where they may define data, call other macros, or
//! emit statements like any other source.
//!
//! Labels whose names begin with two underscores are made unique per
//! invocation by suffixing a monotonically increasing counter, so a macro
//! with internal branch targets can be called more than once.

use std::collections::HashMap;

use crate::parse::lex::{Token, TokenKind};
use crate::parse::SourceLine;

/// A defined macro: its name token, parameter names, and body lines.
#[derive(Debug, Clone)]
pub struct MacroDefinition {
    /// The token naming the macro at its definition site.
    pub name: Token,
    /// Parameter names, each including the `%` prefix.
    pub parameters: Vec<String>,
    /// The body, stored verbatim.
    pub body: Vec<SourceLine>,
}

impl MacroDefinition {
    /// Expands the macro for one invocation.
    ///
    /// `arguments` supplies one token per parameter, in order. `counter` is
    /// the invocation's unique number, used to rename `__`-prefixed labels.
    pub fn expand(&self, arguments: &[Token], counter: usize) -> Vec<SourceLine> {
        debug_assert_eq!(arguments.len(), self.parameters.len());

        self.body
            .iter()
            .map(|line| {
                let tokens: Vec<Token> = line
                    .tokens
                    .iter()
                    .map(|token| self.substitute(token, arguments, counter))
                    .collect();
                let content: Vec<&str> = tokens.iter().map(|t| t.literal.as_str()).collect();
                SourceLine {
                    filename: line.filename.clone(),
                    line_index: line.line_index,
                    content: content.join(" "),
                    tokens,
                    processed: None,
                }
            })
            .collect()
    }

    fn substitute(&self, token: &Token, arguments: &[Token], counter: usize) -> Token {
        match &token.kind {
            TokenKind::MacroParameter => {
                match self.parameters.iter().position(|p| *p == token.literal) {
                    Some(index) => Token {
                        kind: arguments[index].kind.clone(),
                        literal: arguments[index].literal.clone(),
                        // Diagnostics should point into the macro body.
                        location: token.location.clone(),
                    },
                    None => token.clone(),
                }
            }
            TokenKind::Identifier if token.literal.starts_with("__") => Token {
                kind: TokenKind::Identifier,
                literal: format!("{}_M{}", token.literal, counter),
                location: token.location.clone(),
            },
            _ => token.clone(),
        }
    }
}

/// The table of defined macros, keyed by name and arity.
#[derive(Debug, Default)]
pub struct MacroTable {
    definitions: HashMap<(String, usize), MacroDefinition>,
    counter: usize,
}

impl MacroTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a definition, returning the previous one for the same name and
    /// arity if it existed.
    pub fn define(&mut self, definition: MacroDefinition) -> Option<MacroDefinition> {
        let key = (definition.name.literal.clone(), definition.parameters.len());
        self.definitions.insert(key, definition)
    }

    /// Looks up a macro by name and argument count.
    pub fn get(&self, name: &str, argument_count: usize) -> Option<&MacroDefinition> {
        self.definitions.get(&(name.to_string(), argument_count))
    }

    /// Whether any macro with this name is defined, regardless of arity.
    pub fn has_name(&self, name: &str) -> bool {
        self.definitions.keys().any(|(n, _)| n == name)
    }

    /// Hands out the next invocation counter.
    pub fn next_counter(&mut self) -> usize {
        let counter = self.counter;
        self.counter += 1;
        counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::ErrorList;
    use crate::parse::tokenize_source;

    fn line_of(text: &str) -> SourceLine {
        let mut errors = ErrorList::new();
        tokenize_source("macro.asm", text, &mut errors).lines.remove(0)
    }

    fn token_of(text: &str) -> Token {
        line_of(text).tokens.remove(0)
    }

    fn definition(params: &[&str], body: &[&str]) -> MacroDefinition {
        MacroDefinition {
            name: token_of("mymacro"),
            parameters: params.iter().map(|p| p.to_string()).collect(),
            body: body.iter().map(|l| line_of(l)).collect(),
        }
    }

    #[test]
    fn test_parameter_substitution() {
        let def = definition(&["%x", "%y"], &["add %x, %x, %y"]);
        let expanded = def.expand(&[token_of("$t0"), token_of("$t1")], 0);
        assert_eq!(expanded.len(), 1);
        let literals: Vec<_> =
            expanded[0].tokens.iter().map(|t| t.literal.as_str()).collect();
        assert_eq!(literals, vec!["add", "$t0", ",", "$t0", ",", "$t1"]);
        assert_eq!(expanded[0].tokens[1].kind, TokenKind::RegisterName(8));
    }

    #[test]
    fn test_double_underscore_labels_are_uniqued() {
        let def = definition(&[], &["__loop:", "b __loop"]);
        let first = def.expand(&[], 3);
        let second = def.expand(&[], 4);
        assert_eq!(first[0].tokens[0].literal, "__loop_M3");
        assert_eq!(first[1].tokens[1].literal, "__loop_M3");
        assert_eq!(second[0].tokens[0].literal, "__loop_M4");
    }

    #[test]
    fn test_plain_labels_are_untouched() {
        let def = definition(&[], &["loop: b loop"]);
        let expanded = def.expand(&[], 9);
        assert_eq!(expanded[0].tokens[0].literal, "loop");
    }

    #[test]
    fn test_table_is_keyed_by_arity() {
        let mut table = MacroTable::new();
        table.define(definition(&["%x"], &["add %x, %x, %x"]));
        table.define(definition(&[], &["nop"]));

        assert!(table.get("mymacro", 1).is_some());
        assert!(table.get("mymacro", 0).is_some());
        assert!(table.get("mymacro", 2).is_none());
        assert!(table.has_name("mymacro"));
        assert!(!table.has_name("other"));
    }

    #[test]
    fn test_counter_is_monotonic() {
        let mut table = MacroTable::new();
        assert_eq!(table.next_counter(), 0);
        assert_eq!(table.next_counter(), 1);
        assert_eq!(table.next_counter(), 2);
    }
}
