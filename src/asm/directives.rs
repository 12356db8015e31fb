//! Assembler directives and their first-pass processing.
//!
//! Data directives write their operands into memory immediately during the
//! first pass, at the active data segment's cursor; label operands park a
//! forward-reference patch instead. Segment directives switch the active
//! segment (re-enabling auto-alignment), and `.align 0` suppresses automatic
//! alignment until the next explicit alignment or segment switch.
//!
//! `.include` and `.eqv` never reach this module in effectful form; the
//! tokenizer resolves them while reading source.

use crate::err::Diagnostic;
use crate::parse::lex::{Token, TokenKind};
use crate::sim::mem::{self, Memory};

use super::symbols::ForwardReferencePatch;
use super::{Assembler, MacroCollector, SegmentId};

/// The assembler directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// `.data [addr]` — select the user data segment.
    Data,
    /// `.text [addr]` — select the user text segment.
    Text,
    /// `.kdata [addr]` — select the kernel data segment.
    KData,
    /// `.ktext [addr]` — select the kernel text segment.
    KText,
    /// `.word v, ...` — emit 32-bit values.
    Word,
    /// `.half v, ...` — emit 16-bit values.
    Half,
    /// `.byte v, ...` — emit 8-bit values.
    Byte,
    /// `.float v, ...` — emit IEEE-754 binary32 values.
    Float,
    /// `.double v, ...` — emit IEEE-754 binary64 values.
    Double,
    /// `.ascii "..."` — emit raw string bytes.
    Ascii,
    /// `.asciiz "..."` — emit string bytes with a trailing NUL.
    Asciiz,
    /// `.align k` — align the cursor to 2^k (`.align 0` disables
    /// auto-alignment).
    Align,
    /// `.space n` — advance the cursor by n bytes.
    Space,
    /// `.globl name, ...` — promote symbols to the global table.
    Globl,
    /// `.extern name size` — allocate in the extern segment and define
    /// globally.
    Extern,
    /// `.eqv NAME tokens` — token-level substitution (handled while
    /// tokenizing).
    Eqv,
    /// `.macro NAME [%p ...]` — begin a macro definition.
    Macro,
    /// `.end_macro` — end a macro definition.
    EndMacro,
    /// `.include "file"` — splice a file (handled while tokenizing).
    Include,
    /// `.set` — recognized and ignored, with a warning.
    Set,
}

impl Directive {
    /// Looks a directive up by its source spelling, including the leading
    /// dot. Case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            ".data" => Some(Self::Data),
            ".text" => Some(Self::Text),
            ".kdata" => Some(Self::KData),
            ".ktext" => Some(Self::KText),
            ".word" => Some(Self::Word),
            ".half" => Some(Self::Half),
            ".byte" => Some(Self::Byte),
            ".float" => Some(Self::Float),
            ".double" => Some(Self::Double),
            ".ascii" => Some(Self::Ascii),
            ".asciiz" => Some(Self::Asciiz),
            ".align" => Some(Self::Align),
            ".space" => Some(Self::Space),
            ".globl" => Some(Self::Globl),
            ".extern" => Some(Self::Extern),
            ".eqv" => Some(Self::Eqv),
            ".macro" => Some(Self::Macro),
            ".end_macro" => Some(Self::EndMacro),
            ".include" => Some(Self::Include),
            ".set" => Some(Self::Set),
            _ => None,
        }
    }

    /// The directive's source spelling.
    pub fn name(self) -> &'static str {
        match self {
            Self::Data => ".data",
            Self::Text => ".text",
            Self::KData => ".kdata",
            Self::KText => ".ktext",
            Self::Word => ".word",
            Self::Half => ".half",
            Self::Byte => ".byte",
            Self::Float => ".float",
            Self::Double => ".double",
            Self::Ascii => ".ascii",
            Self::Asciiz => ".asciiz",
            Self::Align => ".align",
            Self::Space => ".space",
            Self::Globl => ".globl",
            Self::Extern => ".extern",
            Self::Eqv => ".eqv",
            Self::Macro => ".macro",
            Self::EndMacro => ".end_macro",
            Self::Include => ".include",
            Self::Set => ".set",
        }
    }
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Assembler {
    /// Processes a directive line during the first pass. `tokens[0]` is the
    /// directive token itself.
    pub(crate) fn process_directive(
        &mut self,
        directive: Directive,
        tokens: &[Token],
        memory: &mut Memory,
    ) {
        match directive {
            Directive::Data => self.select_segment(SegmentId::Data, tokens, memory),
            Directive::KData => self.select_segment(SegmentId::KernelData, tokens, memory),
            Directive::Text => self.select_segment(SegmentId::Text, tokens, memory),
            Directive::KText => self.select_segment(SegmentId::KernelText, tokens, memory),
            Directive::Word => self.emit_numeric(4, tokens, memory),
            Directive::Half => self.emit_numeric(2, tokens, memory),
            Directive::Byte => self.emit_numeric(1, tokens, memory),
            Directive::Float => self.emit_real(4, tokens, memory),
            Directive::Double => self.emit_real(8, tokens, memory),
            Directive::Ascii => self.emit_strings(false, tokens, memory),
            Directive::Asciiz => self.emit_strings(true, tokens, memory),
            Directive::Align => self.process_align(tokens),
            Directive::Space => self.process_space(tokens),
            Directive::Globl => self.process_globl(tokens),
            Directive::Extern => self.process_extern(tokens),
            Directive::Macro => self.begin_macro(tokens),
            Directive::EndMacro => {
                // A matched .end_macro is consumed while collecting the body.
                self.errors.add(Diagnostic::error(
                    tokens[0].location.clone(),
                    ".end_macro without a matching .macro",
                ));
            }
            Directive::Eqv | Directive::Include => {
                // Already resolved by the tokenizer.
            }
            Directive::Set => {
                self.errors.add(Diagnostic::warning(
                    tokens[0].location.clone(),
                    ".set is recognized but ignored",
                ));
            }
        }
    }

    fn select_segment(&mut self, id: SegmentId, tokens: &[Token], _memory: &mut Memory) {
        self.set_active_segment(id);
        match tokens.get(1) {
            None => {}
            Some(token) => match token.integer_value() {
                Some(address) if address >= 0 => {
                    let address = address as u32;
                    if !self.segment().is_data && address % 4 != 0 {
                        self.errors.add(Diagnostic::error(
                            token.location.clone(),
                            format!("Text segment address {address:#x} is not word-aligned"),
                        ));
                        return;
                    }
                    self.segment_mut().address = address;
                }
                _ => {
                    self.errors.add(Diagnostic::error(
                        token.location.clone(),
                        format!("Invalid address operand for {}", tokens[0].literal),
                    ));
                }
            },
        }
    }

    fn require_data_segment(&mut self, token: &Token) -> bool {
        if self.segment().is_data {
            true
        } else {
            self.errors.add(Diagnostic::error(
                token.location.clone(),
                format!("{} may only appear in a data segment", token.literal),
            ));
            false
        }
    }

    /// Aligns the cursor, dragging along any label defined at the unaligned
    /// address.
    pub(crate) fn align_cursor(&mut self, alignment: u32) {
        let current = self.segment().address;
        let aligned = mem::align_to_next(current, alignment);
        if aligned != current {
            self.local_symbols.realign(current, aligned);
            self.segment_mut().address = aligned;
        }
    }

    fn emit_numeric(&mut self, size: u32, tokens: &[Token], memory: &mut Memory) {
        if !self.require_data_segment(&tokens[0]) {
            return;
        }
        if self.auto_align && size > 1 {
            self.align_cursor(size);
        }

        let mut iter = tokens[1..].iter().peekable();
        while let Some(token) = iter.next() {
            if token.kind == TokenKind::Delimiter {
                continue;
            }
            if let Some(value) = token.integer_value() {
                // `value : count` replicates the value.
                let mut count = 1;
                if iter.peek().is_some_and(|t| t.kind == TokenKind::Colon) {
                    iter.next();
                    match iter.next().and_then(|t| t.integer_value()) {
                        Some(n) if n >= 0 => count = n,
                        _ => {
                            self.errors.add(Diagnostic::error(
                                token.location.clone(),
                                "Expected non-negative repetition count after ':'",
                            ));
                            continue;
                        }
                    }
                }
                self.check_numeric_range(value, size, token);
                for _ in 0..count {
                    self.write_data(value, size, token, memory);
                }
            } else if matches!(token.kind, TokenKind::Identifier | TokenKind::Operator) {
                // A label operand: emit zero now, patch when resolved.
                let address = self.segment().address;
                self.current_file_patches.push(ForwardReferencePatch {
                    address,
                    length: size,
                    identifier: token.clone(),
                });
                self.write_data(0, size, token, memory);
            } else {
                self.errors.add(Diagnostic::error(
                    token.location.clone(),
                    format!("Invalid operand '{}' for {}", token.literal, tokens[0].literal),
                ));
            }
        }
    }

    fn check_numeric_range(&mut self, value: i32, size: u32, token: &Token) {
        let in_range = match size {
            1 => (-0x80..=0xff).contains(&value),
            2 => (-0x8000..=0xffff).contains(&value),
            _ => true,
        };
        if !in_range {
            self.errors.add(Diagnostic::warning(
                token.location.clone(),
                format!("Value {value} is out of range and will be truncated"),
            ));
        }
    }

    fn write_data(&mut self, value: i32, size: u32, token: &Token, memory: &mut Memory) {
        let address = self.segment().address;
        if let Err(error) = memory.store_sized(address, value, size, false) {
            self.errors.add(Diagnostic::error(
                token.location.clone(),
                format!("Could not store to data segment: {error}"),
            ));
        }
        self.segment_mut().increment(size);
    }

    fn emit_real(&mut self, size: u32, tokens: &[Token], memory: &mut Memory) {
        if !self.require_data_segment(&tokens[0]) {
            return;
        }
        if self.auto_align {
            // Doubles align on word boundaries like the reference assembler.
            self.align_cursor(if size == 8 { 4 } else { size });
        }
        for token in &tokens[1..] {
            let value = match &token.kind {
                TokenKind::Delimiter => continue,
                TokenKind::RealNumber(value) => *value,
                kind if kind.is_integer() => f64::from(token.integer_value().unwrap()),
                _ => {
                    self.errors.add(Diagnostic::error(
                        token.location.clone(),
                        format!("Invalid operand '{}' for {}", token.literal, tokens[0].literal),
                    ));
                    continue;
                }
            };
            let address = self.segment().address;
            let result = if size == 4 {
                memory.store_sized(address, (value as f32).to_bits() as i32, 4, false).map(|_| ())
            } else {
                memory.store_doubleword(address, value.to_bits() as i64, false).map(|_| ())
            };
            if let Err(error) = result {
                self.errors.add(Diagnostic::error(
                    token.location.clone(),
                    format!("Could not store to data segment: {error}"),
                ));
            }
            self.segment_mut().increment(size);
        }
    }

    fn emit_strings(&mut self, null_terminated: bool, tokens: &[Token], memory: &mut Memory) {
        if !self.require_data_segment(&tokens[0]) {
            return;
        }
        for token in &tokens[1..] {
            match &token.kind {
                TokenKind::Delimiter => continue,
                TokenKind::String(text) => {
                    let mut bytes: Vec<u8> = text.bytes().collect();
                    if null_terminated {
                        bytes.push(0);
                    }
                    for byte in bytes {
                        self.write_data(i32::from(byte), 1, token, memory);
                    }
                }
                _ => {
                    self.errors.add(Diagnostic::error(
                        token.location.clone(),
                        format!("Expected string literal operand for {}", tokens[0].literal),
                    ));
                }
            }
        }
    }

    fn process_align(&mut self, tokens: &[Token]) {
        let Some(exponent) = tokens.get(1).and_then(|t| t.integer_value()) else {
            self.errors.add(Diagnostic::error(
                tokens[0].location.clone(),
                "Expected alignment exponent operand for .align",
            ));
            return;
        };
        if !(0..=3).contains(&exponent) {
            self.errors.add(Diagnostic::error(
                tokens[1].location.clone(),
                format!("Alignment exponent must be 0..3, got {exponent}"),
            ));
            return;
        }
        if exponent == 0 {
            // Suppress auto-alignment until re-enabled.
            self.auto_align = false;
        } else {
            self.auto_align = true;
            self.align_cursor(1 << exponent);
        }
    }

    fn process_space(&mut self, tokens: &[Token]) {
        if !self.require_data_segment(&tokens[0]) {
            return;
        }
        match tokens.get(1).and_then(|t| t.integer_value()) {
            Some(count) if count >= 0 => self.segment_mut().increment(count as u32),
            _ => self.errors.add(Diagnostic::error(
                tokens[0].location.clone(),
                "Expected non-negative byte count operand for .space",
            )),
        }
    }

    fn process_globl(&mut self, tokens: &[Token]) {
        let mut any = false;
        for token in &tokens[1..] {
            match token.kind {
                TokenKind::Delimiter => continue,
                TokenKind::Identifier => {
                    any = true;
                    if let Some(previous) =
                        self.globalize.insert(token.literal.clone(), token.clone())
                    {
                        self.errors.add(Diagnostic::error(
                            token.location.clone(),
                            format!(
                                "Symbol '{}' was already declared global on line {}",
                                token.literal,
                                previous.location.line + 1
                            ),
                        ));
                    }
                }
                _ => self.errors.add(Diagnostic::error(
                    token.location.clone(),
                    "Expected symbol name operand for .globl",
                )),
            }
        }
        if !any {
            self.errors.add(Diagnostic::error(
                tokens[0].location.clone(),
                "Expected at least one symbol operand for .globl",
            ));
        }
    }

    fn process_extern(&mut self, tokens: &[Token]) {
        let name = tokens.get(1);
        let size = tokens.get(2).and_then(|t| t.integer_value());
        match (name, size) {
            (Some(name), Some(size)) if name.kind == TokenKind::Identifier && size > 0 => {
                // Only define if no global of this name exists yet.
                if self.global_symbols.get(&name.literal).is_none() {
                    let address = self.extern_segment.address;
                    self.global_symbols.define(name.literal.clone(), address, true);
                    self.extern_segment.increment(size as u32);
                }
            }
            _ => self.errors.add(Diagnostic::error(
                tokens[0].location.clone(),
                "Expected symbol name and positive size operands for .extern",
            )),
        }
    }

    fn begin_macro(&mut self, tokens: &[Token]) {
        let Some(name) = tokens.get(1).filter(|t| t.kind == TokenKind::Identifier) else {
            self.errors.add(Diagnostic::error(
                tokens[0].location.clone(),
                "Expected macro name after .macro",
            ));
            return;
        };
        let mut parameters = Vec::new();
        for token in &tokens[2..] {
            match token.kind {
                TokenKind::MacroParameter => parameters.push(token.literal.clone()),
                // SPIM permits commas and parentheses around the list.
                TokenKind::Delimiter | TokenKind::LeftParen | TokenKind::RightParen => {}
                _ => {
                    self.errors.add(Diagnostic::error(
                        token.location.clone(),
                        format!("Invalid macro parameter '{}'", token.literal),
                    ));
                }
            }
        }
        self.macro_collector =
            Some(MacroCollector { name: name.clone(), parameters, body: Vec::new() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::tests::{assemble_text, assemble_text_with};
    use crate::asm::AssemblerFlags;
    use crate::sim::mem::MemoryConfiguration;

    #[test]
    fn test_from_name_is_case_insensitive() {
        assert_eq!(Directive::from_name(".WORD"), Some(Directive::Word));
        assert_eq!(Directive::from_name(".word"), Some(Directive::Word));
        assert_eq!(Directive::from_name(".wordy"), None);
        assert_eq!(Directive::from_name("word"), None);
    }

    #[test]
    fn test_half_and_byte_ranges_warn() {
        let flags = AssemblerFlags { warnings_are_errors: true, ..Default::default() };
        let errors = assemble_text_with(
            ".data\n.byte 300\n",
            flags,
            MemoryConfiguration::default_layout(),
        )
        .unwrap_err();
        assert!(errors.warnings_occurred());

        // Truncation still stores the low bits.
        let (mut memory, _) = assemble_text(".data\n.byte 300\n").unwrap();
        assert_eq!(memory.get_byte(0x1001_0000, false).unwrap(), 300 & 0xff);
    }

    #[test]
    fn test_align_directive() {
        let source = ".data\n.byte 1\n.align 3\n.byte 2\n";
        let (mut memory, _) = assemble_text(source).unwrap();
        assert_eq!(memory.get_byte(0x1001_0008, false).unwrap(), 2);
    }

    #[test]
    fn test_align_zero_suppresses_auto_alignment() {
        let source = ".data\n.byte 1\n.align 0\n.word 2\n";
        let (mut memory, _) = assemble_text(source).unwrap();
        // The word lands at the unaligned cursor: its low byte is at 0x1001_0001.
        assert_eq!(memory.get_byte(0x1001_0001, false).unwrap(), 2);
    }

    #[test]
    fn test_space_advances_without_writing() {
        let source = ".data\n.byte 1\n.space 7\n.byte 2\n";
        let (mut memory, _) = assemble_text(source).unwrap();
        assert_eq!(memory.get_byte(0x1001_0008, false).unwrap(), 2);
        assert_eq!(memory.get_byte(0x1001_0004, false).unwrap(), 0);
    }

    #[test]
    fn test_float_and_double() {
        let source = ".data\n.float 1.5\n.double 2.25\n";
        let (mut memory, _) = assemble_text(source).unwrap();
        assert_eq!(memory.get_word(0x1001_0000, false).unwrap() as u32, 1.5f32.to_bits());
        let low = memory.get_word(0x1001_0004, false).unwrap();
        let high = memory.get_word(0x1001_0008, false).unwrap();
        assert_eq!(crate::bits::two_ints_to_long(high, low) as u64, 2.25f64.to_bits());
    }

    #[test]
    fn test_ascii_vs_asciiz() {
        let (mut memory, _) = assemble_text(".data\n.ascii \"ab\"\n.asciiz \"cd\"\n").unwrap();
        assert_eq!(memory.get_byte(0x1001_0000, false).unwrap(), b'a' as i32);
        assert_eq!(memory.get_byte(0x1001_0001, false).unwrap(), b'b' as i32);
        assert_eq!(memory.get_byte(0x1001_0002, false).unwrap(), b'c' as i32);
        assert_eq!(memory.get_byte(0x1001_0003, false).unwrap(), b'd' as i32);
        assert_eq!(memory.get_byte(0x1001_0004, false).unwrap(), 0);
    }

    #[test]
    fn test_extern_allocates_globally() {
        let source = ".extern shared 8\n.data\nptr: .word shared\n";
        let (mut memory, program) = assemble_text(source).unwrap();
        let symbol = program.globals.get("shared").unwrap();
        assert_eq!(symbol.address, 0x1000_0000);
        assert_eq!(memory.get_word(0x1001_0000, false).unwrap() as u32, 0x1000_0000);
    }

    #[test]
    fn test_set_warns() {
        let (_, _) = assemble_text(".text\n.set noreorder\nnop\n").unwrap();
        let flags = AssemblerFlags { warnings_are_errors: true, ..Default::default() };
        let errors = assemble_text_with(
            ".text\n.set noreorder\nnop\n",
            flags,
            MemoryConfiguration::default_layout(),
        )
        .unwrap_err();
        assert!(errors.warnings_occurred());
    }

    #[test]
    fn test_data_directive_in_text_is_error() {
        let errors = assemble_text(".text\n.word 4\n").unwrap_err();
        assert!(errors.errors_occurred());
    }

    #[test]
    fn test_segment_address_operands() {
        let source = ".data 0x10020000\n.word 1\n.text 0x400100\nnop\n";
        let (mut memory, program) = assemble_text(source).unwrap();
        assert_eq!(memory.get_word(0x1002_0000, false).unwrap(), 1);
        assert!(program.statements.contains_key(&0x0040_0100));
    }
}
