//! The MIPS32 instruction table.
//!
//! This module consists of:
//! - [`BasicInstruction`]: an instruction with a one-to-one machine encoding
//!   and an `execute` function that performs its state transition.
//! - [`ExtendedInstruction`]: a pseudo-instruction defined by an expansion
//!   template of basic-instruction-shaped lines.
//! - [`InstructionSet`]: the registry of all declared instructions, with
//!   lookup by mnemonic and a binary match index for decoding.
//! - [`BasicStatement`]: a fully assembled instruction bound to an address.
//!
//! The declarative tables themselves live in [`basic`] and [`pseudo`].

pub mod basic;
pub mod encoding;
pub mod pseudo;

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::err::SourceLocation;
use crate::sim::{Interrupt, Simulator};

use self::encoding::Encoding;

/// The operand shapes an instruction can declare, in the syntax of the
/// instruction's example statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// A general-purpose register (`$t1` or `$9`).
    Register,
    /// A floating-point register (`$f2`).
    FpRegister,
    /// An unsigned integer below 8 (condition flag numbers).
    Integer3Unsigned,
    /// An unsigned integer below 32 (shift amounts).
    Integer5Unsigned,
    /// A signed 16-bit integer.
    Integer16Signed,
    /// An unsigned 16-bit integer.
    Integer16Unsigned,
    /// Any 32-bit integer.
    Integer32,
    /// A label (optionally `label+offset`), or a raw integer target.
    Label,
    /// A base register in parentheses (`($t2)`).
    ParenRegister,
}

impl OperandType {
    /// Whether this type is one of the integer immediates.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            OperandType::Integer3Unsigned
                | OperandType::Integer5Unsigned
                | OperandType::Integer16Signed
                | OperandType::Integer16Unsigned
                | OperandType::Integer32
        )
    }

    /// Whether `value` is representable by this integer type.
    pub fn fits(self, value: i32) -> bool {
        match self {
            OperandType::Integer3Unsigned => (0..8).contains(&value),
            OperandType::Integer5Unsigned => (0..32).contains(&value),
            OperandType::Integer16Signed => i32::from(i16::MIN) <= value && value <= i32::from(i16::MAX),
            OperandType::Integer16Unsigned => (0..=0xffff).contains(&value),
            OperandType::Integer32 => true,
            _ => false,
        }
    }

    /// A rank used by operand matching: wider integer types rank higher, so
    /// the match cost penalizes widening a narrow literal into a wide slot.
    pub fn widening_rank(self) -> Option<u32> {
        match self {
            OperandType::Integer3Unsigned => Some(0),
            OperandType::Integer5Unsigned => Some(1),
            OperandType::Integer16Signed | OperandType::Integer16Unsigned => Some(2),
            OperandType::Integer32 => Some(3),
            _ => None,
        }
    }
}

/// The hardware format of a basic instruction, which decides how label
/// operands resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionFormat {
    /// Register format.
    R,
    /// Immediate format; label operands resolve to absolute values.
    I,
    /// Immediate branch format; label operands resolve to PC-relative word
    /// offsets.
    IBranch,
    /// Jump format; label operands resolve to `address >> 2`.
    J,
}

/// The function a basic instruction runs against the simulator state.
pub type ExecFn = fn(&mut Simulator, &BasicStatement) -> Result<(), Interrupt>;

/// A basic instruction: one-to-one with a MIPS machine word.
pub struct BasicInstruction {
    /// The instruction mnemonic, lowercase.
    pub mnemonic: &'static str,
    /// An example statement, used for operand-type declaration and help text.
    pub example: &'static str,
    /// A short description of the instruction's effect.
    pub description: &'static str,
    /// The hardware format.
    pub format: InstructionFormat,
    /// The declared operand types, derived from the example.
    pub operand_types: Vec<OperandType>,
    /// The parsed encoding pattern.
    pub encoding: Encoding,
    /// The state transition.
    pub execute: ExecFn,
}

impl std::fmt::Debug for BasicInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicInstruction")
            .field("example", &self.example)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// An extended (pseudo) instruction: expanded by template into one or more
/// basic instructions during the second assembler pass.
#[derive(Debug)]
pub struct ExtendedInstruction {
    /// The instruction mnemonic, lowercase.
    pub mnemonic: &'static str,
    /// An example statement, used for operand-type declaration and help text.
    pub example: &'static str,
    /// A short description of the instruction's effect.
    pub description: &'static str,
    /// The declared operand types, derived from the example.
    pub operand_types: Vec<OperandType>,
    /// The standard expansion template, one basic-statement line per entry.
    pub standard_template: Vec<&'static str>,
    /// The expansion used when the memory configuration is a 16-bit address
    /// space, if the instruction declares one.
    pub compact_template: Option<Vec<&'static str>>,
}

impl ExtendedInstruction {
    /// The template active under the given address-space mode.
    pub fn template(&self, compact_space: bool) -> &[&'static str] {
        match (&self.compact_template, compact_space) {
            (Some(compact), true) => compact,
            _ => &self.standard_template,
        }
    }

    /// Size in bytes of this instruction's expansion. Template lines that
    /// expand to a lone `nop` only count when delayed branching is enabled.
    pub fn size_bytes(&self, delayed_branching: bool, compact_space: bool) -> u32 {
        let lines = self
            .template(compact_space)
            .iter()
            .filter(|&&line| delayed_branching || line != pseudo::DB_NOP)
            .count();
        lines as u32 * 4
    }
}

/// A declared instruction: basic or extended.
#[derive(Debug)]
pub enum Instruction {
    /// A basic instruction.
    Basic(BasicInstruction),
    /// An extended (pseudo) instruction.
    Extended(ExtendedInstruction),
}

impl Instruction {
    /// The instruction mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Basic(b) => b.mnemonic,
            Instruction::Extended(e) => e.mnemonic,
        }
    }

    /// The declared operand types.
    pub fn operand_types(&self) -> &[OperandType] {
        match self {
            Instruction::Basic(b) => &b.operand_types,
            Instruction::Extended(e) => &e.operand_types,
        }
    }

    /// The example statement.
    pub fn example(&self) -> &'static str {
        match self {
            Instruction::Basic(b) => b.example,
            Instruction::Extended(e) => e.example,
        }
    }

    /// Size in bytes this instruction occupies once assembled.
    pub fn size_bytes(&self, delayed_branching: bool, compact_space: bool) -> u32 {
        match self {
            Instruction::Basic(_) => 4,
            Instruction::Extended(e) => e.size_bytes(delayed_branching, compact_space),
        }
    }
}

/// Where an assembled statement came from in source, for diagnostics and
/// listings.
#[derive(Debug, Clone)]
pub struct StatementSource {
    /// Location of the statement's first token.
    pub location: SourceLocation,
    /// The source line text.
    pub line: String,
}

/// A fully assembled instruction: the basic instruction, its resolved
/// operands, the machine word, and the address it occupies.
#[derive(Debug, Clone)]
pub struct BasicStatement {
    /// The instruction this statement executes.
    pub instruction: &'static BasicInstruction,
    /// Resolved operand values, in example order.
    pub operands: Vec<i32>,
    /// The encoded machine word.
    pub binary: u32,
    /// The word-aligned address the statement occupies.
    pub address: u32,
    /// The originating source line, if the statement came from assembly
    /// rather than binary decoding.
    pub source: Option<StatementSource>,
}

impl BasicStatement {
    /// Reads operand `index`, defaulting to 0 when absent.
    pub fn operand(&self, index: usize) -> i32 {
        self.operands.get(index).copied().unwrap_or(0)
    }
}

impl std::fmt::Display for BasicStatement {
    /// Renders the statement in disassembled form with numeric registers,
    /// e.g. `add $9,$10,$11`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.instruction.mnemonic)?;
        for (index, (&value, ty)) in
            self.operands.iter().zip(&self.instruction.operand_types).enumerate()
        {
            let separator = if index == 0 { " " } else { "," };
            match ty {
                OperandType::Register => write!(f, "{separator}${value}")?,
                OperandType::FpRegister => write!(f, "{separator}$f{value}")?,
                OperandType::ParenRegister => write!(f, "{separator}(${value})")?,
                _ => write!(f, "{separator}{value}")?,
            }
        }
        Ok(())
    }
}

/// The registry of declared instructions.
///
/// Lookup by mnemonic returns every declaration sharing that mnemonic (operand
/// matching then selects among them). The binary match index maps a machine
/// word back to its basic instruction for decoding.
#[derive(Debug)]
pub struct InstructionSet {
    instructions: Vec<Instruction>,
    by_mnemonic: HashMap<&'static str, Vec<usize>>,
    // One map per distinct fixed-bit mask, most specific mask first.
    match_maps: Vec<(u32, HashMap<u32, usize>)>,
}

static INSTRUCTION_SET: OnceLock<InstructionSet> = OnceLock::new();

impl InstructionSet {
    /// Builds the full instruction set.
    pub fn new() -> Self {
        let mut set = Self {
            instructions: Vec::new(),
            by_mnemonic: HashMap::new(),
            match_maps: Vec::new(),
        };
        basic::populate(&mut set);
        pseudo::populate(&mut set);
        set.build_match_index();
        set
    }

    /// The process-wide instruction set, built on first use.
    pub fn global() -> &'static InstructionSet {
        INSTRUCTION_SET.get_or_init(InstructionSet::new)
    }

    pub(crate) fn add_basic(
        &mut self,
        example: &'static str,
        description: &'static str,
        format: InstructionFormat,
        pattern: &'static str,
        execute: ExecFn,
    ) {
        let (mnemonic, operand_types) = parse_example(example);
        let encoding = Encoding::parse(pattern);
        assert!(
            encoding.operand_count() <= operand_types.len(),
            "encoding for {example:?} references more operands than the example declares"
        );
        self.push(Instruction::Basic(BasicInstruction {
            mnemonic,
            example,
            description,
            format,
            operand_types,
            encoding,
            execute,
        }));
    }

    pub(crate) fn add_extended(
        &mut self,
        example: &'static str,
        description: &'static str,
        standard: &[&'static str],
    ) {
        let (mnemonic, operand_types) = parse_example(example);
        self.push(Instruction::Extended(ExtendedInstruction {
            mnemonic,
            example,
            description,
            operand_types,
            standard_template: standard.to_vec(),
            compact_template: None,
        }));
    }

    pub(crate) fn add_extended_with_compact(
        &mut self,
        example: &'static str,
        description: &'static str,
        standard: &[&'static str],
        compact: &[&'static str],
    ) {
        let (mnemonic, operand_types) = parse_example(example);
        self.push(Instruction::Extended(ExtendedInstruction {
            mnemonic,
            example,
            description,
            operand_types,
            standard_template: standard.to_vec(),
            compact_template: Some(compact.to_vec()),
        }));
    }

    fn push(&mut self, instruction: Instruction) {
        let mnemonic = instruction.mnemonic();
        let index = self.instructions.len();
        self.instructions.push(instruction);
        self.by_mnemonic.entry(mnemonic).or_default().push(index);
    }

    fn build_match_index(&mut self) {
        let mut by_mask: HashMap<u32, HashMap<u32, usize>> = HashMap::new();
        for (index, instruction) in self.instructions.iter().enumerate() {
            if let Instruction::Basic(basic) = instruction {
                by_mask
                    .entry(basic.encoding.mask)
                    .or_default()
                    .insert(basic.encoding.template, index);
            }
        }
        let mut maps: Vec<_> = by_mask.into_iter().collect();
        // Most specific mask first, so fully fixed encodings (syscall, nop)
        // win over field-bearing ones.
        maps.sort_by_key(|(mask, _)| std::cmp::Reverse(mask.count_ones()));
        self.match_maps = maps;
    }

    /// All instruction declarations sharing a mnemonic (case-insensitive).
    pub fn match_mnemonic(&self, mnemonic: &str) -> Vec<&Instruction> {
        let lowered = mnemonic.to_lowercase();
        match self.by_mnemonic.get(lowered.as_str()) {
            Some(indices) => indices.iter().map(|&i| &self.instructions[i]).collect(),
            None => Vec::new(),
        }
    }

    /// Whether the given word is a declared instruction mnemonic.
    pub fn is_mnemonic(&self, word: &str) -> bool {
        self.by_mnemonic.contains_key(word.to_lowercase().as_str())
    }

    /// All declared instructions, in declaration order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Finds the basic instruction a machine word encodes, if any.
    pub fn decode(&self, word: u32) -> Option<&BasicInstruction> {
        for (mask, map) in &self.match_maps {
            if let Some(&index) = map.get(&(word & mask)) {
                if let Instruction::Basic(basic) = &self.instructions[index] {
                    return Some(basic);
                }
            }
        }
        None
    }

    /// Decodes a machine word into a full statement at the given address.
    ///
    /// The raw field values are re-signed according to the instruction's
    /// operand types, so `decode_statement(encode(...))` reproduces the
    /// original operand list.
    pub fn decode_statement(&'static self, word: u32, address: u32) -> Option<BasicStatement> {
        let instruction = self.decode(word)?;
        let mut operands = instruction.encoding.decode_raw(word);
        for (index, operand) in operands.iter_mut().enumerate() {
            let ty = instruction.operand_types.get(index).copied();
            let width = instruction.encoding.field_width(index);
            let signed = matches!(ty, Some(OperandType::Integer16Signed))
                || (matches!(ty, Some(OperandType::Label))
                    && instruction.format == InstructionFormat::IBranch);
            if signed && width > 0 && width < 32 {
                *operand = crate::bits::sign_extend(*operand, width);
            }
        }
        Some(BasicStatement { instruction, operands, binary: word, address, source: None })
    }
}

impl Default for InstructionSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives an instruction's mnemonic and operand types from its example
/// statement, e.g. `"lw $t1,-100($t2)"` yields
/// `("lw", [Register, Integer16Signed, ParenRegister])`.
fn parse_example(example: &'static str) -> (&'static str, Vec<OperandType>) {
    let (mnemonic, rest) = match example.split_once(char::is_whitespace) {
        Some((m, rest)) => (m, rest),
        None => (example, ""),
    };

    let mut types = Vec::new();
    for raw in rest.split([',', ' ']).filter(|s| !s.is_empty()) {
        let mut piece = raw;
        // A trailing parenthesized register may be glued to an immediate,
        // as in `-100($t2)`.
        if let Some(open) = piece.find('(') {
            let (head, paren) = piece.split_at(open);
            debug_assert!(paren.ends_with(')'), "unclosed paren in example {example:?}");
            if !head.is_empty() {
                types.push(example_operand_type(head));
            }
            types.push(OperandType::ParenRegister);
            piece = "";
            debug_assert!(
                crate::sim::registers::lookup_register(&paren[1..paren.len() - 1]).is_some(),
                "example {example:?} parenthesizes a non-register"
            );
        }
        if !piece.is_empty() {
            types.push(example_operand_type(piece));
        }
    }
    (mnemonic, types)
}

fn example_operand_type(piece: &str) -> OperandType {
    if piece.starts_with("$f") {
        OperandType::FpRegister
    } else if piece.starts_with('$') {
        OperandType::Register
    } else if let Ok(value) = piece.parse::<i64>() {
        if (0..8).contains(&value) {
            OperandType::Integer3Unsigned
        } else if (0..32).contains(&value) {
            OperandType::Integer5Unsigned
        } else if (0..65536).contains(&value) {
            OperandType::Integer16Unsigned
        } else if (-32768..0).contains(&value) {
            OperandType::Integer16Signed
        } else {
            OperandType::Integer32
        }
    } else {
        OperandType::Label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_example() {
        let (mnemonic, types) = parse_example("add $t1,$t2,$t3");
        assert_eq!(mnemonic, "add");
        assert_eq!(types, vec![OperandType::Register, OperandType::Register, OperandType::Register]);

        let (mnemonic, types) = parse_example("lw $t1,-100($t2)");
        assert_eq!(mnemonic, "lw");
        assert_eq!(
            types,
            vec![OperandType::Register, OperandType::Integer16Signed, OperandType::ParenRegister]
        );

        let (_, types) = parse_example("sll $t1,$t2,10");
        assert_eq!(types[2], OperandType::Integer5Unsigned);

        let (_, types) = parse_example("movf $t1,$t2,1");
        assert_eq!(types[2], OperandType::Integer3Unsigned);

        let (_, types) = parse_example("beq $t1,$t2,label");
        assert_eq!(types[2], OperandType::Label);

        let (_, types) = parse_example("add.s $f0,$f1,$f2");
        assert_eq!(types, vec![OperandType::FpRegister; 3]);

        let (mnemonic, types) = parse_example("syscall");
        assert_eq!(mnemonic, "syscall");
        assert!(types.is_empty());
    }

    #[test]
    fn test_mnemonic_lookup() {
        let set = InstructionSet::global();
        assert!(set.is_mnemonic("add"));
        assert!(set.is_mnemonic("ADD"));
        assert!(!set.is_mnemonic("frobnicate"));
        assert!(!set.match_mnemonic("li").is_empty());
    }

    #[test]
    fn test_decode_roundtrip() {
        let set = InstructionSet::global();
        // add $9,$10,$11
        let add = set
            .match_mnemonic("add")
            .into_iter()
            .find_map(|i| match i {
                Instruction::Basic(b) => Some(b.encoding.clone()),
                _ => None,
            })
            .unwrap();
        let word = add.encode(&[9, 10, 11]);
        let statement = set.decode_statement(word, 0x0040_0000).unwrap();
        assert_eq!(statement.instruction.mnemonic, "add");
        assert_eq!(statement.operands, vec![9, 10, 11]);
        assert_eq!(statement.binary, word);
    }

    #[test]
    fn test_decode_sign_extends_immediates() {
        let set = InstructionSet::global();
        let addi = set
            .match_mnemonic("addi")
            .into_iter()
            .find_map(|i| match i {
                Instruction::Basic(b) => Some(b.encoding.clone()),
                _ => None,
            })
            .unwrap();
        let word = addi.encode(&[9, 10, -100]);
        let statement = set.decode_statement(word, 0x0040_0000).unwrap();
        assert_eq!(statement.operands, vec![9, 10, -100]);
    }

    #[test]
    fn test_decode_unknown_word() {
        // An opcode no MIPS32 instruction uses.
        assert!(InstructionSet::global().decode(0xffff_ffff).is_none());
    }

    #[test]
    fn test_statement_display() {
        let set = InstructionSet::global();
        let statement = set.decode_statement(0x014b_4820, 0x0040_0000).unwrap();
        assert_eq!(statement.to_string(), "add $9,$10,$11");
    }
}
