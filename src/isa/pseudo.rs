//! The declarative table of extended (pseudo) instructions and their
//! expansion template language.
//!
//! Each template is an ordered list of basic-instruction-shaped lines with
//! substitution markers:
//!
//! - `{n}` — operand `n`, rendered as a register (`$9`, `$f2`) or integer
//!   according to the instruction's operand types.
//! - `{n:L}` / `{n:AL}` — low 16 bits of the operand, rendered unsigned (for
//!   `ori`) or signed (for `addi`-family consumers).
//! - `{n:H}` / `{n:AH}` — high 16 bits, logical or arithmetic (carry-adjusted
//!   so `lui`+`addi` reconstructs the full value).
//! - `{n:+m}` — operand plus a small constant (the odd register of a pair).
//! - `{n:-}` — operand negated.
//! - `{n:B}` — the operand treated as a branch target address, rendered as
//!   the PC-relative word offset from this template line.
//! - `{DB:a:b}` — `a` when delayed branching is enabled, `b` otherwise. The
//!   line `{DB:nop:}` therefore expands to a `nop` only under delayed
//!   branching and is omitted entirely without it.
//!
//! During the second assembler pass each substituted line is re-tokenized and
//! matched against the basic instruction set like ordinary source.

use super::{InstructionSet, OperandType};

/// The template line that is a `nop` under delayed branching and omitted
/// otherwise.
pub const DB_NOP: &str = "{DB:nop:}";

/// The values a template line is expanded against.
#[derive(Debug, Clone, Copy)]
pub struct ExpansionContext<'a> {
    /// The pseudo-instruction's resolved operand values (labels already
    /// resolved to addresses).
    pub operands: &'a [i32],
    /// The pseudo-instruction's operand types, used for rendering.
    pub operand_types: &'a [OperandType],
    /// The address the current template line will occupy.
    pub line_address: u32,
    /// Whether delayed branching is enabled.
    pub delayed_branching: bool,
}

/// Expands one template line, returning `None` when the line is omitted
/// under the current settings.
pub fn substitute(line: &str, ctx: &ExpansionContext<'_>) -> Option<String> {
    if line == DB_NOP {
        return ctx.delayed_branching.then(|| "nop".to_string());
    }

    let mut result = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let close = rest[open..]
            .find('}')
            .unwrap_or_else(|| panic!("unterminated marker in template line {line:?}"));
        result.push_str(&render_marker(&rest[open + 1..open + close], ctx, line));
        rest = &rest[open + close + 1..];
    }
    result.push_str(rest);
    Some(result)
}

fn render_marker(marker: &str, ctx: &ExpansionContext<'_>, line: &str) -> String {
    if let Some(choices) = marker.strip_prefix("DB:") {
        let (enabled, disabled) = choices
            .split_once(':')
            .unwrap_or_else(|| panic!("malformed DB marker in template line {line:?}"));
        return if ctx.delayed_branching { enabled } else { disabled }.to_string();
    }

    let (index_text, modifiers) = match marker.split_once(':') {
        Some((index, modifiers)) => (index, modifiers),
        None => (marker, ""),
    };
    let index: usize = index_text
        .parse()
        .unwrap_or_else(|_| panic!("bad operand index in template line {line:?}"));
    let mut value = ctx.operands[index];
    let mut as_register = true;

    for modifier in modifiers.split(',').filter(|m| !m.is_empty()) {
        match modifier {
            "L" => {
                value &= 0xffff;
                as_register = false;
            }
            "AL" => {
                value = crate::bits::sign_extend(value & 0xffff, 16);
                as_register = false;
            }
            "H" => {
                value = (((value as u32) >> 16) & 0xffff) as i32;
                as_register = false;
            }
            "AH" => {
                // Add the carry the sign-extended low half will subtract.
                let unsigned = value as u32;
                value = (((unsigned >> 16) + ((unsigned >> 15) & 1)) & 0xffff) as i32;
                as_register = false;
            }
            "B" => {
                let target = value as i64;
                value = ((target - i64::from(ctx.line_address + 4)) >> 2) as i32;
                as_register = false;
            }
            "-" => value = value.wrapping_neg(),
            plus if plus.starts_with('+') => {
                let addend: i32 = plus[1..]
                    .parse()
                    .unwrap_or_else(|_| panic!("bad modifier {plus:?} in template line {line:?}"));
                value = value.wrapping_add(addend);
            }
            other => panic!("unknown modifier {other:?} in template line {line:?}"),
        }
    }

    match ctx.operand_types.get(index) {
        Some(OperandType::Register | OperandType::ParenRegister) if as_register => {
            format!("${value}")
        }
        Some(OperandType::FpRegister) if as_register => format!("$f{value}"),
        _ => value.to_string(),
    }
}

/// Populates the registry with the extended instructions.
///
/// Declaration order matters when several forms share a mnemonic: operand
/// matching breaks cost ties in favor of the earlier declaration, so the
/// unsigned-immediate `li` precedes the signed one.
pub(super) fn populate(set: &mut InstructionSet) {
    set.add_extended(
        "li $t1,100",
        "Load immediate; set $t1 to the zero-extended 16-bit immediate",
        &["ori {0}, $zero, {1}"],
    );
    set.add_extended(
        "li $t1,-100",
        "Load immediate; set $t1 to the sign-extended 16-bit immediate",
        &["addiu {0}, $zero, {1}"],
    );
    set.add_extended(
        "li $t1,100000",
        "Load immediate; set $t1 to the 32-bit immediate",
        &["lui {0}, {1:H}", "ori {0}, {0}, {1:L}"],
    );
    set.add_extended_with_compact(
        "la $t1,label",
        "Load address; set $t1 to the label's address",
        &["lui $at, {1:H}", "ori {0}, $at, {1:L}"],
        &["ori {0}, $zero, {1}"],
    );
    set.add_extended_with_compact(
        "la $t1,100000",
        "Load address; set $t1 to the 32-bit address",
        &["lui $at, {1:H}", "ori {0}, $at, {1:L}"],
        &["ori {0}, $zero, {1}"],
    );
    set.add_extended(
        "move $t1,$t2",
        "Move; set $t1 to $t2",
        &["addu {0}, $zero, {1}"],
    );
    set.add_extended(
        "neg $t1,$t2",
        "Negate; set $t1 to the negation of $t2, with overflow",
        &["sub {0}, $zero, {1}"],
    );
    set.add_extended(
        "negu $t1,$t2",
        "Negate unsigned; set $t1 to the negation of $t2, without overflow",
        &["subu {0}, $zero, {1}"],
    );
    set.add_extended(
        "not $t1,$t2",
        "Bitwise NOT; set $t1 to the one's complement of $t2",
        &["nor {0}, {1}, $zero"],
    );
    set.add_extended(
        "abs $t1,$t2",
        "Absolute value; set $t1 to the absolute value of $t2",
        &["sra $at, {1}, 31", "xor {0}, {1}, $at", "subu {0}, {0}, $at"],
    );

    // Branch family. Every expansion ends with a delay-slot nop that exists
    // only when delayed branching is enabled.
    set.add_extended(
        "b label",
        "Branch unconditionally",
        &["bgez $zero, {0:B}", DB_NOP],
    );
    set.add_extended(
        "beqz $t1,label",
        "Branch if equal to zero",
        &["beq {0}, $zero, {1:B}", DB_NOP],
    );
    set.add_extended(
        "bnez $t1,label",
        "Branch if not equal to zero",
        &["bne {0}, $zero, {1:B}", DB_NOP],
    );
    set.add_extended(
        "bgt $t1,$t2,label",
        "Branch if greater than",
        &["slt $at, {1}, {0}", "bne $at, $zero, {2:B}", DB_NOP],
    );
    set.add_extended(
        "bgtu $t1,$t2,label",
        "Branch if greater than unsigned",
        &["sltu $at, {1}, {0}", "bne $at, $zero, {2:B}", DB_NOP],
    );
    set.add_extended(
        "blt $t1,$t2,label",
        "Branch if less than",
        &["slt $at, {0}, {1}", "bne $at, $zero, {2:B}", DB_NOP],
    );
    set.add_extended(
        "bltu $t1,$t2,label",
        "Branch if less than unsigned",
        &["sltu $at, {0}, {1}", "bne $at, $zero, {2:B}", DB_NOP],
    );
    set.add_extended(
        "bge $t1,$t2,label",
        "Branch if greater than or equal",
        &["slt $at, {0}, {1}", "beq $at, $zero, {2:B}", DB_NOP],
    );
    set.add_extended(
        "bgeu $t1,$t2,label",
        "Branch if greater than or equal unsigned",
        &["sltu $at, {0}, {1}", "beq $at, $zero, {2:B}", DB_NOP],
    );
    set.add_extended(
        "ble $t1,$t2,label",
        "Branch if less than or equal",
        &["slt $at, {1}, {0}", "beq $at, $zero, {2:B}", DB_NOP],
    );
    set.add_extended(
        "bleu $t1,$t2,label",
        "Branch if less than or equal unsigned",
        &["sltu $at, {1}, {0}", "beq $at, $zero, {2:B}", DB_NOP],
    );

    // Set-on-comparison family.
    set.add_extended(
        "seq $t1,$t2,$t3",
        "Set equal; set $t1 to 1 if $t2 equals $t3",
        &["subu {0}, {1}, {2}", "ori $at, $zero, 1", "sltu {0}, {0}, $at"],
    );
    set.add_extended(
        "sne $t1,$t2,$t3",
        "Set not equal; set $t1 to 1 if $t2 differs from $t3",
        &["subu {0}, {1}, {2}", "sltu {0}, $zero, {0}"],
    );
    set.add_extended(
        "sge $t1,$t2,$t3",
        "Set greater than or equal",
        &["slt {0}, {1}, {2}", "xori {0}, {0}, 1"],
    );
    set.add_extended(
        "sgt $t1,$t2,$t3",
        "Set greater than",
        &["slt {0}, {2}, {1}"],
    );
    set.add_extended(
        "sle $t1,$t2,$t3",
        "Set less than or equal",
        &["slt {0}, {2}, {1}", "xori {0}, {0}, 1"],
    );

    // Three-operand multiply/divide forms over HI/LO.
    set.add_extended(
        "mul $t1,$t2,-100",
        "Multiplication by an immediate",
        &["addiu $at, $zero, {2}", "mul {0}, {1}, $at"],
    );
    set.add_extended(
        "div $t1,$t2,$t3",
        "Division; set $t1 to the quotient of $t2 over $t3",
        &["div {1}, {2}", "mflo {0}"],
    );
    set.add_extended(
        "rem $t1,$t2,$t3",
        "Remainder; set $t1 to the remainder of $t2 over $t3",
        &["div {1}, {2}", "mfhi {0}"],
    );

    // Immediate-too-wide forms of the arithmetic/logic immediates.
    set.add_extended(
        "addi $t1,$t2,100000",
        "Addition immediate with a 32-bit immediate",
        &["lui $at, {2:H}", "ori $at, $at, {2:L}", "add {0}, {1}, $at"],
    );
    set.add_extended(
        "addiu $t1,$t2,100000",
        "Addition immediate unsigned with a 32-bit immediate",
        &["lui $at, {2:H}", "ori $at, $at, {2:L}", "addu {0}, {1}, $at"],
    );
    set.add_extended(
        "andi $t1,$t2,100000",
        "Bitwise AND immediate with a 32-bit immediate",
        &["lui $at, {2:H}", "ori $at, $at, {2:L}", "and {0}, {1}, $at"],
    );
    set.add_extended(
        "ori $t1,$t2,100000",
        "Bitwise OR immediate with a 32-bit immediate",
        &["lui $at, {2:H}", "ori $at, $at, {2:L}", "or {0}, {1}, $at"],
    );
    set.add_extended(
        "xori $t1,$t2,100000",
        "Bitwise XOR immediate with a 32-bit immediate",
        &["lui $at, {2:H}", "ori $at, $at, {2:L}", "xor {0}, {1}, $at"],
    );
    set.add_extended(
        "subi $t1,$t2,-100",
        "Subtraction immediate with overflow",
        &["addi {0}, {1}, {2:-}"],
    );
    set.add_extended(
        "subiu $t1,$t2,-100",
        "Subtraction immediate without overflow",
        &["addiu {0}, {1}, {2:-}"],
    );

    // Label-addressed loads and stores.
    memory_label_form(set, "lw", "Load word at the label's address");
    memory_label_form(set, "sw", "Store word at the label's address");
    memory_label_form(set, "lb", "Load byte at the label's address");
    memory_label_form(set, "lbu", "Load byte unsigned at the label's address");
    memory_label_form(set, "lh", "Load halfword at the label's address");
    memory_label_form(set, "lhu", "Load halfword unsigned at the label's address");
    memory_label_form(set, "sb", "Store byte at the label's address");
    memory_label_form(set, "sh", "Store halfword at the label's address");
}

/// Declares the `op $t1,label` form of a load or store: the label's address
/// is materialized through `$at` (or used directly in compact space).
fn memory_label_form(set: &mut InstructionSet, mnemonic: &str, description: &'static str) {
    // Templates are interned as 'static strings; the table is built once per
    // process so the leak is bounded.
    let example: &'static str = Box::leak(format!("{mnemonic} $t1,label").into_boxed_str());
    let standard_line: &'static str =
        Box::leak(format!("{mnemonic} {{0}}, {{1:AL}}($at)").into_boxed_str());
    let compact_line: &'static str =
        Box::leak(format!("{mnemonic} {{0}}, {{1}}($zero)").into_boxed_str());
    set.add_extended_with_compact(
        example,
        description,
        &["lui $at, {1:AH}", standard_line],
        &[compact_line],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Instruction;

    fn context<'a>(
        operands: &'a [i32],
        operand_types: &'a [OperandType],
        line_address: u32,
        delayed_branching: bool,
    ) -> ExpansionContext<'a> {
        ExpansionContext { operands, operand_types, line_address, delayed_branching }
    }

    const REG3: [OperandType; 3] =
        [OperandType::Register, OperandType::Register, OperandType::Label];

    #[test]
    fn test_register_rendering() {
        let ctx = context(&[9, 10], &[OperandType::Register, OperandType::Register], 0, false);
        assert_eq!(substitute("addu {0}, $zero, {1}", &ctx).unwrap(), "addu $9, $zero, $10");
    }

    #[test]
    fn test_halves_reconstruct_value() {
        // 0x1234_8765: the low half is negative as an i16, so the arithmetic
        // high half carries.
        let value = 0x1234_8765u32 as i32;
        let types = [OperandType::Register, OperandType::Integer32];
        let values = [9, value];
        let ctx = context(&values, &types, 0, false);
        assert_eq!(substitute("lui $at, {1:H}", &ctx).unwrap(), "lui $at, 4660");
        assert_eq!(substitute("lui $at, {1:AH}", &ctx).unwrap(), "lui $at, 4661");
        assert_eq!(substitute("ori {0}, $at, {1:L}", &ctx).unwrap(), "ori $9, $at, 34661");
        assert_eq!(substitute("addi {0}, $at, {1:AL}", &ctx).unwrap(), "addi $9, $at, -30875");
        // (AH << 16) + AL == value
        assert_eq!((4661 << 16) + (-30875), value);
        // (H << 16) | L == value
        assert_eq!((4660 << 16) | 34661, value);
    }

    #[test]
    fn test_branch_offset_marker() {
        // Target 0x0040_0010 from a branch line at 0x0040_0004: offset in
        // words from the following instruction.
        let ctx = context(&[9, 10, 0x0040_0010], &REG3, 0x0040_0004, false);
        assert_eq!(substitute("bne $at, $zero, {2:B}", &ctx).unwrap(), "bne $at, $zero, 2");

        // Backward branch yields a negative offset.
        let ctx = context(&[9, 10, 0x0040_0000], &REG3, 0x0040_0008, false);
        assert_eq!(substitute("bne $at, $zero, {2:B}", &ctx).unwrap(), "bne $at, $zero, -3");
    }

    #[test]
    fn test_db_nop_line() {
        let types = [OperandType::Label];
        let ctx = context(&[0], &types, 0, false);
        assert_eq!(substitute(DB_NOP, &ctx), None);
        let ctx = context(&[0], &types, 0, true);
        assert_eq!(substitute(DB_NOP, &ctx).unwrap(), "nop");
    }

    #[test]
    fn test_negate_modifier() {
        let types = [OperandType::Register, OperandType::Register, OperandType::Integer16Signed];
        let ctx = context(&[9, 10, -100], &types, 0, false);
        assert_eq!(substitute("addi {0}, {1}, {2:-}", &ctx).unwrap(), "addi $9, $10, 100");
    }

    #[test]
    fn test_plus_modifier_names_odd_register() {
        let types = [OperandType::FpRegister];
        let ctx = context(&[2], &types, 0, false);
        assert_eq!(substitute("mtc1 $zero, {0:+1}", &ctx).unwrap(), "mtc1 $zero, $f3");
    }

    #[test]
    fn test_templates_reference_declared_operands() {
        // Every marker in every template must name an operand that exists and
        // every line must stay non-empty after substitution.
        let set = InstructionSet::new();
        for instruction in set.instructions() {
            let Instruction::Extended(extended) = instruction else { continue };
            let operands: Vec<i32> = (0..extended.operand_types.len() as i32).collect();
            for compact in [false, true] {
                for db in [false, true] {
                    let ctx = ExpansionContext {
                        operands: &operands,
                        operand_types: &extended.operand_types,
                        line_address: 0x0040_0000,
                        delayed_branching: db,
                    };
                    for line in extended.template(compact) {
                        if let Some(expanded) = substitute(line, &ctx) {
                            assert!(!expanded.trim().is_empty());
                        }
                    }
                }
            }
        }
    }
}
