//! Turning source text into token lines.
//!
//! This module wraps the lexer in [`lex`] with the file-level machinery the
//! assembler needs:
//! - [`SourceFile`]: a tokenized file, one [`SourceLine`] per input line.
//! - [`Tokenizer`]: the driver that reads files, splices `.include`d files in
//!   place, and applies `.eqv` token substitutions.
//!
//! Both `.include` and `.eqv` are resolved here, before the assembler's first
//! pass: an included file's lines appear exactly as if they had been written
//! at the point of inclusion, and bare occurrences of an `.eqv` name are
//! replaced by the stored token stream before any further processing.

pub mod lex;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::err::{Diagnostic, ErrorList};
use crate::isa::InstructionSet;

use self::lex::{Token, TokenKind};
use crate::asm::directives::Directive;

/// One line of a source file, tokenized.
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// Name of the file the line came from.
    pub filename: Arc<str>,
    /// Zero-based line index within that file.
    pub line_index: usize,
    /// The original source text of the line.
    pub content: String,
    /// The line's tokens, in order. Empty for blank or comment-only lines.
    pub tokens: Vec<Token>,
    /// The line text after `.eqv` substitution, when a substitution applied.
    pub processed: Option<String>,
}

impl SourceLine {
    /// The line's tokens with any trailing comment removed.
    pub fn significant_tokens(&self) -> &[Token] {
        match self.tokens.last() {
            Some(token) if token.kind == TokenKind::Comment => {
                &self.tokens[..self.tokens.len() - 1]
            }
            _ => &self.tokens,
        }
    }
}

/// A tokenized source file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// The file's name as given to the tokenizer.
    pub filename: Arc<str>,
    /// The file's lines, including any spliced `.include` content.
    pub lines: Vec<SourceLine>,
}

/// Reads and tokenizes source files, resolving `.include` and `.eqv`.
pub struct Tokenizer<'e> {
    set: &'static InstructionSet,
    errors: &'e mut ErrorList,
    equivalences: HashMap<String, Vec<Token>>,
    include_stack: Vec<PathBuf>,
}

impl<'e> Tokenizer<'e> {
    /// Creates a tokenizer that records problems in `errors`.
    pub fn new(set: &'static InstructionSet, errors: &'e mut ErrorList) -> Self {
        Self { set, errors, equivalences: HashMap::new(), include_stack: Vec::new() }
    }

    /// Tokenizes the file at `path`.
    ///
    /// Read failures are recorded as diagnostics and yield an empty file.
    pub fn tokenize_file(&mut self, path: &Path) -> SourceFile {
        let filename: Arc<str> = Arc::from(path.to_string_lossy().as_ref());
        match std::fs::read_to_string(path) {
            Ok(text) => {
                self.include_stack.push(path.to_path_buf());
                let file = self.tokenize_text(filename, &text);
                self.include_stack.pop();
                file
            }
            Err(error) => {
                self.errors.add(Diagnostic::error_nowhere(format!(
                    "Could not read {}: {error}",
                    path.display()
                )));
                SourceFile { filename, lines: Vec::new() }
            }
        }
    }

    /// Tokenizes in-memory source text under the given filename.
    pub fn tokenize_text(&mut self, filename: Arc<str>, text: &str) -> SourceFile {
        let mut lines = Vec::new();
        for (line_index, content) in text.lines().enumerate() {
            let (tokens, diagnostics) =
                lex::tokenize_line(&filename, line_index, content, self.set);
            for diagnostic in diagnostics {
                self.errors.add(diagnostic);
            }

            let mut line = SourceLine {
                filename: filename.clone(),
                line_index,
                content: content.to_string(),
                tokens,
                processed: None,
            };

            if self.record_equivalence(&line) {
                lines.push(line);
                continue;
            }
            self.apply_equivalences(&mut line);

            if let Some(include_path) = self.include_target(&line) {
                let mut included = self.resolve_include(&include_path, &line);
                lines.append(&mut included);
                continue;
            }

            lines.push(line);
        }
        SourceFile { filename, lines }
    }

    /// Handles an `.eqv NAME TOKENS` line, returning true if one was recorded.
    fn record_equivalence(&mut self, line: &SourceLine) -> bool {
        let tokens = line.significant_tokens();
        let is_eqv = matches!(tokens.first(), Some(t) if t.kind == TokenKind::Directive(Directive::Eqv));
        if !is_eqv {
            return false;
        }
        match tokens.get(1) {
            Some(name) if name.kind == TokenKind::Identifier => {
                if tokens.len() < 3 {
                    self.errors.add(Diagnostic::error(
                        name.location.clone(),
                        "Expected substitution tokens after .eqv name",
                    ));
                } else {
                    self.equivalences.insert(name.literal.clone(), tokens[2..].to_vec());
                }
            }
            _ => {
                let location = tokens[0].location.clone();
                self.errors.add(Diagnostic::error(location, "Expected identifier after .eqv"));
            }
        }
        true
    }

    /// Replaces bare identifiers matching an `.eqv` name with the stored
    /// token stream.
    fn apply_equivalences(&mut self, line: &mut SourceLine) {
        if self.equivalences.is_empty() {
            return;
        }
        let mut substituted = false;
        let mut result = Vec::with_capacity(line.tokens.len());
        for token in line.tokens.drain(..) {
            match (&token.kind, self.equivalences.get(&token.literal)) {
                (TokenKind::Identifier, Some(replacement)) => {
                    substituted = true;
                    // Substituted tokens point at the use site.
                    result.extend(replacement.iter().map(|t| Token {
                        kind: t.kind.clone(),
                        literal: t.literal.clone(),
                        location: token.location.clone(),
                    }));
                }
                _ => result.push(token),
            }
        }
        line.tokens = result;
        if substituted {
            let rendered: Vec<&str> = line.tokens.iter().map(|t| t.literal.as_str()).collect();
            line.processed = Some(rendered.join(" "));
        }
    }

    /// If the line is `.include "path"`, returns the path.
    fn include_target(&mut self, line: &SourceLine) -> Option<String> {
        let tokens = line.significant_tokens();
        let first = tokens.first()?;
        if first.kind != TokenKind::Directive(Directive::Include) {
            return None;
        }
        match tokens.get(1).map(|t| &t.kind) {
            Some(TokenKind::String(path)) if tokens.len() == 2 => Some(path.clone()),
            _ => {
                self.errors.add(Diagnostic::error(
                    first.location.clone(),
                    "Expected quoted filename after .include",
                ));
                None
            }
        }
    }

    fn resolve_include(&mut self, include: &str, line: &SourceLine) -> Vec<SourceLine> {
        // Relative includes resolve against the including file's directory.
        let mut path = PathBuf::from(include);
        if path.is_relative() {
            if let Some(parent) = self.include_stack.last().and_then(|p| p.parent()) {
                path = parent.join(path);
            }
        }

        if self.include_stack.iter().any(|entry| entry == &path) {
            self.errors.add(Diagnostic::error(
                line.tokens[0].location.clone(),
                format!("Recursive include of {}", path.display()),
            ));
            return Vec::new();
        }

        self.tokenize_file(&path).lines
    }
}

/// Tokenizes in-memory source text with a fresh tokenizer. Convenience for
/// tests and library callers assembling a single string.
pub fn tokenize_source(filename: &str, text: &str, errors: &mut ErrorList) -> SourceFile {
    Tokenizer::new(InstructionSet::global(), errors).tokenize_text(Arc::from(filename), text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_and_comment_lines_have_no_significant_tokens() {
        let mut errors = ErrorList::new();
        let file = tokenize_source("test.asm", "\n# just a comment\nadd $t0,$t1,$t2\n", &mut errors);
        assert_eq!(file.lines.len(), 3);
        assert!(file.lines[0].significant_tokens().is_empty());
        assert!(file.lines[1].significant_tokens().is_empty());
        assert_eq!(file.lines[2].significant_tokens().len(), 6);
    }

    #[test]
    fn test_eqv_substitution() {
        let mut errors = ErrorList::new();
        let source = ".eqv LIMIT 42\nli $t0, LIMIT\n";
        let file = tokenize_source("test.asm", source, &mut errors);
        assert!(!errors.errors_occurred());

        let tokens = file.lines[1].significant_tokens();
        let values: Vec<_> = tokens.iter().map(|t| t.literal.as_str()).collect();
        assert_eq!(values, vec!["li", "$t0", ",", "42"]);
        assert!(tokens[3].kind.is_integer());
        assert!(file.lines[1].processed.is_some());
    }

    #[test]
    fn test_eqv_multi_token_substitution() {
        let mut errors = ErrorList::new();
        let source = ".eqv PTR 0($sp)\nlw $t0, PTR\n";
        let file = tokenize_source("test.asm", source, &mut errors);
        let kinds: Vec<_> =
            file.lines[1].significant_tokens().iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Operator,
                TokenKind::RegisterName(8),
                TokenKind::Delimiter,
                TokenKind::Integer5(0),
                TokenKind::LeftParen,
                TokenKind::RegisterName(29),
                TokenKind::RightParen,
            ]
        );
    }

    #[test]
    fn test_eqv_requires_tokens() {
        let mut errors = ErrorList::new();
        tokenize_source("test.asm", ".eqv NOTHING\n", &mut errors);
        assert!(errors.errors_occurred());
    }

    #[test]
    fn test_include_splices_lines() {
        let dir = std::env::temp_dir().join("mips_ensemble_include_test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("helper.asm"), "add $t0,$t0,$t1\n").unwrap();
        std::fs::write(dir.join("main.asm"), ".include \"helper.asm\"\nsyscall\n").unwrap();

        let mut errors = ErrorList::new();
        let mut tokenizer = Tokenizer::new(InstructionSet::global(), &mut errors);
        let file = tokenizer.tokenize_file(&dir.join("main.asm"));

        assert!(!errors.errors_occurred());
        assert_eq!(file.lines.len(), 2);
        assert_eq!(file.lines[0].significant_tokens()[0].literal, "add");
        assert_eq!(file.lines[1].significant_tokens()[0].literal, "syscall");
        // Spliced lines keep their own filename for diagnostics.
        assert!(file.lines[0].filename.contains("helper.asm"));
    }

    #[test]
    fn test_recursive_include_is_an_error() {
        let dir = std::env::temp_dir().join("mips_ensemble_recursive_include_test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.asm"), ".include \"a.asm\"\n").unwrap();

        let mut errors = ErrorList::new();
        let mut tokenizer = Tokenizer::new(InstructionSet::global(), &mut errors);
        tokenizer.tokenize_file(&dir.join("a.asm"));
        assert!(errors.errors_occurred());
    }
}
