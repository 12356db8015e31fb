//! Tokenizing MIPS assembly.
//!
//! The raw scan is driven by a [`logos`] lexer which splits a source line into
//! lexemes: punctuation, string and character literals, comments, and "words".
//! Words are then classified by the ordered rules of the assembly language —
//! macro parameter, register, floating-point register, integer, real number,
//! instruction mnemonic, directive, identifier — with the first match winning.
//! Classification consults the instruction registry, so a word like `b` can be
//! a mnemonic while `bb` is an identifier.
//!
//! Well-formed character literals are converted to their integer value during
//! the raw scan and classified like integer literals; a malformed character
//! literal becomes an [`TokenKind::Error`] token.

use logos::{Lexer, Logos};

use crate::asm::directives::Directive;
use crate::bits;
use crate::err::{Diagnostic, SourceLocation};
use crate::isa::InstructionSet;
use crate::sim::registers;

/// A classified token with its source text and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The token's classification (and value, where applicable).
    pub kind: TokenKind,
    /// The token's source text.
    pub literal: String,
    /// Where the token starts in source.
    pub location: SourceLocation,
}

impl Token {
    /// The integer value of this token, if it is one of the integer kinds.
    pub fn integer_value(&self) -> Option<i32> {
        match self.kind {
            TokenKind::Integer5(v)
            | TokenKind::Integer16(v)
            | TokenKind::Integer16U(v)
            | TokenKind::Integer32(v)
            | TokenKind::Character(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.literal)
    }
}

/// The kinds of tokens found in MIPS assembly source.
///
/// The integer kinds encode the narrowest signed or unsigned range the
/// literal's value fits: 5-bit unsigned, signed 16-bit, unsigned 16-bit, or
/// full 32-bit. Hex literals are always interpreted as their 32-bit bit
/// pattern, never sign-extended from a shorter width.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A lexeme matching no rule.
    Error,
    /// A `#` comment running to end of line.
    Comment,
    /// An assembler directive such as `.word`.
    Directive(Directive),
    /// An instruction mnemonic.
    Operator,
    /// A comma between operands.
    Delimiter,
    /// A register written symbolically (`$t0`).
    RegisterName(u8),
    /// A register written numerically (`$8`).
    RegisterNumber(u8),
    /// A floating-point register (`$f2`).
    FpRegisterName(u8),
    /// A label or other identifier.
    Identifier,
    #[allow(missing_docs)]
    LeftParen,
    #[allow(missing_docs)]
    RightParen,
    /// An integer in 0..32.
    Integer5(i32),
    /// An integer fitting signed 16 bits.
    Integer16(i32),
    /// An integer fitting unsigned 16 bits.
    Integer16U(i32),
    /// Any other 32-bit integer.
    Integer32(i32),
    /// A real-number literal.
    RealNumber(f64),
    /// A character literal, already converted to its integer value.
    Character(i32),
    /// A string literal with escapes processed.
    String(String),
    #[allow(missing_docs)]
    Plus,
    #[allow(missing_docs)]
    Minus,
    #[allow(missing_docs)]
    Colon,
    /// A macro parameter (`%name`).
    MacroParameter,
}

impl TokenKind {
    /// Whether this kind is one of the integer classifications.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            TokenKind::Integer5(_)
                | TokenKind::Integer16(_)
                | TokenKind::Integer16U(_)
                | TokenKind::Integer32(_)
                | TokenKind::Character(_)
        )
    }
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\r]+")]
enum RawToken {
    #[regex(r"#[^\n]*")]
    Comment,

    #[token("(")]
    LeftParen,

    #[token(")")]
    RightParen,

    #[token(":")]
    Colon,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token(",")]
    Comma,

    #[token("\"", lex_string_literal)]
    Str(String),

    #[token("'", lex_char_literal)]
    Char(i32),

    // One "word": an identifier, register, directive, mnemonic, or numeric
    // literal. The regexes deliberately span malformed forms (e.g. `3Q`);
    // classification decides what each word actually is.
    #[regex(r"-?(\d+\.\d*|\.\d+)([eE][+-]?\d+)?")]
    #[regex(r"-?\d+[eE][+-]?\d+")]
    #[regex(r"-?\d[0-9A-Za-z_.$]*")]
    #[regex(r"[A-Za-z_.$%][0-9A-Za-z_.$]*")]
    Word,
}

fn lex_string_literal(lx: &mut Lexer<'_, RawToken>) -> Option<String> {
    let rest = lx.remainder();
    let mut result = String::new();
    let mut chars = rest.char_indices();
    loop {
        let (index, c) = chars.next()?;
        match c {
            '"' => {
                lx.bump(index + 1);
                return Some(result);
            }
            '\n' => return None,
            '\\' => {
                let (_, escaped) = chars.next()?;
                result.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' => '\\',
                    '\'' => '\'',
                    '"' => '"',
                    'b' => '\u{8}',
                    'f' => '\u{c}',
                    '0' => '\0',
                    other => other,
                });
            }
            other => result.push(other),
        }
    }
}

fn lex_char_literal(lx: &mut Lexer<'_, RawToken>) -> Option<i32> {
    let rest = lx.remainder();
    let mut chars = rest.char_indices();
    let (_, first) = chars.next()?;
    let value = match first {
        '\'' | '\n' => return None,
        '\\' => {
            let (_, escaped) = chars.next()?;
            match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '\\' => '\\',
                '\'' => '\'',
                '"' => '"',
                'b' => '\u{8}',
                'f' => '\u{c}',
                '0' => '\0',
                _ => return None,
            }
        }
        other => other,
    };
    let (index, closing) = chars.next()?;
    if closing != '\'' {
        return None;
    }
    lx.bump(index + 1);
    Some(value as i32)
}

/// Classifies one word, trying each rule in language order.
fn classify_word(word: &str, set: &InstructionSet) -> TokenKind {
    if word.starts_with('%') && word.len() > 1 {
        return TokenKind::MacroParameter;
    }
    if let Some((number, symbolic)) = registers::lookup_register(word) {
        return if symbolic {
            TokenKind::RegisterName(number)
        } else {
            TokenKind::RegisterNumber(number)
        };
    }
    if let Some(number) = registers::lookup_fp_register(word) {
        return TokenKind::FpRegisterName(number);
    }
    if let Some(value) = bits::decode_integer(word) {
        return classify_integer(value);
    }
    if word.parse::<f64>().is_ok() {
        return TokenKind::RealNumber(word.parse().unwrap());
    }
    if set.is_mnemonic(word) {
        return TokenKind::Operator;
    }
    if word.starts_with('.') {
        if let Some(directive) = Directive::from_name(word) {
            return TokenKind::Directive(directive);
        }
    }
    if is_valid_identifier(word) {
        return TokenKind::Identifier;
    }
    TokenKind::Error
}

/// Classifies an integer value into the narrowest-range integer kind.
pub fn classify_integer(value: i32) -> TokenKind {
    if (0..32).contains(&value) {
        TokenKind::Integer5(value)
    } else if (0..=0xffff).contains(&value) {
        TokenKind::Integer16U(value)
    } else if (i32::from(i16::MIN)..0).contains(&value) {
        TokenKind::Integer16(value)
    } else {
        TokenKind::Integer32(value)
    }
}

/// Identifiers are sequences of letters, digits, `_`, `.`, and `$` that do not
/// begin with a digit. `$` is permitted so GCC-style local labels assemble.
pub fn is_valid_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    let valid = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$';
    match chars.next() {
        Some(first) if valid(first) && !first.is_ascii_digit() => chars.all(valid),
        _ => false,
    }
}

/// Tokenizes one source line.
///
/// Lexemes that match no rule produce a diagnostic and are discarded; the
/// rest of the line is still tokenized.
pub fn tokenize_line(
    filename: &std::sync::Arc<str>,
    line_index: usize,
    text: &str,
    set: &InstructionSet,
) -> (Vec<Token>, Vec<Diagnostic>) {
    let mut tokens = Vec::new();
    let mut diagnostics = Vec::new();

    let mut lexer = RawToken::lexer(text);
    while let Some(raw) = lexer.next() {
        let literal = lexer.slice().to_string();
        let location = SourceLocation::new(filename.clone(), line_index, lexer.span().start);
        let kind = match raw {
            Ok(RawToken::Comment) => TokenKind::Comment,
            Ok(RawToken::LeftParen) => TokenKind::LeftParen,
            Ok(RawToken::RightParen) => TokenKind::RightParen,
            Ok(RawToken::Colon) => TokenKind::Colon,
            Ok(RawToken::Plus) => TokenKind::Plus,
            Ok(RawToken::Minus) => TokenKind::Minus,
            Ok(RawToken::Comma) => TokenKind::Delimiter,
            Ok(RawToken::Str(contents)) => TokenKind::String(contents),
            // A well-formed character literal reads as its integer value.
            Ok(RawToken::Char(value)) => classify_integer(value),
            Ok(RawToken::Word) => classify_word(&literal, set),
            Err(()) => TokenKind::Error,
        };
        match kind {
            TokenKind::Error => {
                diagnostics.push(Diagnostic::error(
                    location,
                    format!("Unrecognized token '{literal}'"),
                ));
            }
            kind => tokens.push(Token { kind, literal, location }),
        }
    }

    (tokens, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let (tokens, _) = tokenize_line(&Arc::from("test.asm"), 0, text, InstructionSet::global());
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_registers() {
        assert_eq!(
            kinds("$t0 $zero $ra $8 $31 $f0 $f31"),
            vec![
                TokenKind::RegisterName(8),
                TokenKind::RegisterName(0),
                TokenKind::RegisterName(31),
                TokenKind::RegisterNumber(8),
                TokenKind::RegisterNumber(31),
                TokenKind::FpRegisterName(0),
                TokenKind::FpRegisterName(31),
            ]
        );
    }

    #[test]
    fn test_integer_narrowing() {
        assert_eq!(
            kinds("0 31 32 65535 -1 -32768 65536 -32769"),
            vec![
                TokenKind::Integer5(0),
                TokenKind::Integer5(31),
                TokenKind::Integer16U(32),
                TokenKind::Integer16U(65535),
                TokenKind::Integer16(-1),
                TokenKind::Integer16(-32768),
                TokenKind::Integer32(65536),
                TokenKind::Integer32(-32769),
            ]
        );
    }

    #[test]
    fn test_hex_is_32_bit_pattern() {
        // 0xFFFF is 65535 (16-bit unsigned), never -1.
        assert_eq!(kinds("0xFFFF"), vec![TokenKind::Integer16U(65535)]);
        assert_eq!(kinds("0xffffffff"), vec![TokenKind::Integer16(-1)]);
        assert_eq!(kinds("0x10"), vec![TokenKind::Integer5(16)]);
    }

    #[test]
    fn test_operators_and_identifiers() {
        assert_eq!(kinds("add"), vec![TokenKind::Operator]);
        assert_eq!(kinds("ADD"), vec![TokenKind::Operator]);
        assert_eq!(kinds("main"), vec![TokenKind::Identifier]);
        assert_eq!(kinds("loop_1.x"), vec![TokenKind::Identifier]);
        // Labels may contain '$'.
        assert_eq!(kinds("$L1"), vec![TokenKind::Identifier]);
    }

    #[test]
    fn test_directives() {
        assert_eq!(kinds(".word"), vec![TokenKind::Directive(Directive::Word)]);
        assert_eq!(kinds(".asciiz"), vec![TokenKind::Directive(Directive::Asciiz)]);
        // Unknown directives are identifiers (they start with '.').
        assert_eq!(kinds(".wibble"), vec![TokenKind::Identifier]);
    }

    #[test]
    fn test_comment_runs_to_end_of_line() {
        assert_eq!(kinds("add # $t0, whatever"), vec![TokenKind::Operator, TokenKind::Comment]);
    }

    #[test]
    fn test_strings() {
        assert_eq!(kinds(r#""hi there""#), vec![TokenKind::String("hi there".into())]);
        assert_eq!(kinds(r#""a\tb\n""#), vec![TokenKind::String("a\tb\n".into())]);
        assert_eq!(kinds(r#""q\"q""#), vec![TokenKind::String("q\"q".into())]);
    }

    #[test]
    fn test_char_literals_become_integers() {
        assert_eq!(kinds("'A'"), vec![TokenKind::Integer16U(65)]);
        assert_eq!(kinds(r"'\n'"), vec![TokenKind::Integer5(10)]);
        assert_eq!(kinds(r"'\0'"), vec![TokenKind::Integer5(0)]);
    }

    #[test]
    fn test_malformed_char_is_error() {
        let (tokens, diagnostics) =
            tokenize_line(&Arc::from("test.asm"), 0, "'unclosed", InstructionSet::global());
        assert!(!diagnostics.is_empty());
        // The offending token is discarded but the line continues.
        assert!(tokens.iter().all(|t| t.kind != TokenKind::Error));
    }

    #[test]
    fn test_punctuation_and_memory_operand() {
        assert_eq!(
            kinds("lw $t1, -100($t2)"),
            vec![
                TokenKind::Operator,
                TokenKind::RegisterName(9),
                TokenKind::Delimiter,
                TokenKind::Integer16(-100),
                TokenKind::LeftParen,
                TokenKind::RegisterName(10),
                TokenKind::RightParen,
            ]
        );
    }

    #[test]
    fn test_label_definition_tokens() {
        assert_eq!(
            kinds("main: li $v0, 4"),
            vec![
                TokenKind::Identifier,
                TokenKind::Colon,
                TokenKind::Operator,
                TokenKind::RegisterName(2),
                TokenKind::Delimiter,
                TokenKind::Integer5(4),
            ]
        );
    }

    #[test]
    fn test_macro_parameter() {
        assert_eq!(kinds("%value"), vec![TokenKind::MacroParameter]);
    }

    #[test]
    fn test_real_numbers() {
        assert_eq!(kinds("3.5"), vec![TokenKind::RealNumber(3.5)]);
        assert_eq!(kinds("-0.25"), vec![TokenKind::RealNumber(-0.25)]);
        assert_eq!(kinds("1e3"), vec![TokenKind::RealNumber(1000.0)]);
    }

    #[test]
    fn test_locations() {
        let (tokens, _) =
            tokenize_line(&Arc::from("test.asm"), 7, "  add $t0", InstructionSet::global());
        assert_eq!(tokens[0].location.line, 7);
        assert_eq!(tokens[0].location.column, 2);
        assert_eq!(tokens[1].location.column, 6);
    }
}
