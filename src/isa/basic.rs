//! The declarative table of basic MIPS32 instructions.
//!
//! Each entry declares the instruction's example syntax (from which its
//! operand types are derived), a one-line description, the hardware format,
//! the 32-bit encoding pattern, and the function that performs its state
//! transition. The table is the single source of truth: the assembler
//! encodes from it, the decoder matches against it, and the simulator
//! dispatches through it.

use crate::bits;
use crate::sim::registers::{EPC, RA, STATUS};
use crate::sim::syscall;
use crate::sim::{ExceptionCause, Interrupt, ProcessorException, Simulator};

use super::InstructionFormat::{IBranch, I, J, R};
use super::{BasicStatement, InstructionSet};

/// Reads the register named by operand `index`.
fn reg(sim: &Simulator, statement: &BasicStatement, index: usize) -> i32 {
    sim.registers.get(statement.operand(index) as u8)
}

/// The register number in operand `index`.
fn rnum(statement: &BasicStatement, index: usize) -> u8 {
    statement.operand(index) as u8
}

/// Effective address for loads/stores: base register plus signed offset.
fn effective_address(sim: &Simulator, statement: &BasicStatement, offset: usize, base: usize) -> u32 {
    (reg(sim, statement, base) as u32).wrapping_add(statement.operand(offset) as u32)
}

fn overflow(statement: &BasicStatement) -> Interrupt {
    Interrupt::Exception(ProcessorException::new(
        ExceptionCause::ArithmeticOverflow,
        format!("arithmetic overflow at 0x{:08x}", statement.address),
    ))
}

fn trap(statement: &BasicStatement) -> Interrupt {
    Interrupt::Exception(ProcessorException::new(
        ExceptionCause::Trap,
        format!("trap at 0x{:08x}", statement.address),
    ))
}

/// Converts a double to a word the way the FPU does without an FCSR: values
/// outside the 32-bit range become `i32::MAX`.
fn double_to_word(value: f64, round: fn(f64) -> f64) -> i32 {
    let rounded = round(value);
    if rounded >= i32::MIN as f64 && rounded <= i32::MAX as f64 {
        rounded as i32
    } else {
        i32::MAX
    }
}

/// Java-style rounding: floor(x + 0.5).
fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Requires an even FP register for a double-precision operand.
fn require_even(register: u8) -> Result<(), Interrupt> {
    if register % 2 == 0 {
        Ok(())
    } else {
        Err(Interrupt::Exception(ProcessorException::new(
            ExceptionCause::ReservedInstruction,
            format!("double-precision access requires an even register, got $f{register}"),
        )))
    }
}

/// Populates the registry with every basic instruction.
pub(super) fn populate(set: &mut InstructionSet) {
    arithmetic(set);
    logic_and_shifts(set);
    multiply_divide(set);
    memory_access(set);
    branches_and_jumps(set);
    comparisons_and_moves(set);
    traps_and_system(set);
    coprocessor0(set);
    floating_point(set);
}

fn arithmetic(set: &mut InstructionSet) {
    set.add_basic(
        "nop",
        "Null operation; machine code is all zeroes",
        R,
        "000000 00000 00000 00000 00000 000000",
        |_, _| Ok(()),
    );
    set.add_basic(
        "add $t1,$t2,$t3",
        "Addition with overflow; set $t1 to ($t2 plus $t3)",
        R,
        "000000 sssss ttttt fffff 00000 100000",
        |sim, stmt| {
            let (sum, overflowed) = reg(sim, stmt, 1).overflowing_add(reg(sim, stmt, 2));
            if overflowed {
                return Err(overflow(stmt));
            }
            sim.update_register(rnum(stmt, 0), sum);
            Ok(())
        },
    );
    set.add_basic(
        "sub $t1,$t2,$t3",
        "Subtraction with overflow; set $t1 to ($t2 minus $t3)",
        R,
        "000000 sssss ttttt fffff 00000 100010",
        |sim, stmt| {
            let (difference, overflowed) = reg(sim, stmt, 1).overflowing_sub(reg(sim, stmt, 2));
            if overflowed {
                return Err(overflow(stmt));
            }
            sim.update_register(rnum(stmt, 0), difference);
            Ok(())
        },
    );
    set.add_basic(
        "addi $t1,$t2,-100",
        "Addition immediate with overflow; set $t1 to ($t2 plus signed 16-bit immediate)",
        I,
        "001000 sssss fffff tttttttttttttttt",
        |sim, stmt| {
            let (sum, overflowed) = reg(sim, stmt, 1).overflowing_add(stmt.operand(2));
            if overflowed {
                return Err(overflow(stmt));
            }
            sim.update_register(rnum(stmt, 0), sum);
            Ok(())
        },
    );
    set.add_basic(
        "addu $t1,$t2,$t3",
        "Addition unsigned without overflow; set $t1 to ($t2 plus $t3)",
        R,
        "000000 sssss ttttt fffff 00000 100001",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1).wrapping_add(reg(sim, stmt, 2)));
            Ok(())
        },
    );
    set.add_basic(
        "subu $t1,$t2,$t3",
        "Subtraction unsigned without overflow; set $t1 to ($t2 minus $t3)",
        R,
        "000000 sssss ttttt fffff 00000 100011",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1).wrapping_sub(reg(sim, stmt, 2)));
            Ok(())
        },
    );
    set.add_basic(
        "addiu $t1,$t2,-100",
        "Addition immediate unsigned without overflow; set $t1 to ($t2 plus signed 16-bit immediate)",
        I,
        "001001 sssss fffff tttttttttttttttt",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1).wrapping_add(stmt.operand(2)));
            Ok(())
        },
    );
    set.add_basic(
        "clo $t1,$t2",
        "Count number of leading ones in $t2",
        R,
        "011100 sssss 00000 fffff 00000 100001",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1).leading_ones() as i32);
            Ok(())
        },
    );
    set.add_basic(
        "clz $t1,$t2",
        "Count number of leading zeroes in $t2",
        R,
        "011100 sssss 00000 fffff 00000 100000",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1).leading_zeros() as i32);
            Ok(())
        },
    );
    set.add_basic(
        "lui $t1,100",
        "Load upper immediate; set high-order 16 bits of $t1 to immediate, low-order to 0",
        I,
        "001111 00000 fffff ssssssssssssssss",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), stmt.operand(1) << 16);
            Ok(())
        },
    );
}

fn logic_and_shifts(set: &mut InstructionSet) {
    set.add_basic(
        "and $t1,$t2,$t3",
        "Bitwise AND; set $t1 to bitwise AND of $t2 and $t3",
        R,
        "000000 sssss ttttt fffff 00000 100100",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1) & reg(sim, stmt, 2));
            Ok(())
        },
    );
    set.add_basic(
        "or $t1,$t2,$t3",
        "Bitwise OR; set $t1 to bitwise OR of $t2 and $t3",
        R,
        "000000 sssss ttttt fffff 00000 100101",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1) | reg(sim, stmt, 2));
            Ok(())
        },
    );
    set.add_basic(
        "xor $t1,$t2,$t3",
        "Bitwise XOR; set $t1 to bitwise XOR of $t2 and $t3",
        R,
        "000000 sssss ttttt fffff 00000 100110",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1) ^ reg(sim, stmt, 2));
            Ok(())
        },
    );
    set.add_basic(
        "nor $t1,$t2,$t3",
        "Bitwise NOR; set $t1 to bitwise NOR of $t2 and $t3",
        R,
        "000000 sssss ttttt fffff 00000 100111",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), !(reg(sim, stmt, 1) | reg(sim, stmt, 2)));
            Ok(())
        },
    );
    // The 16-bit immediate of the bitwise-immediate group is zero-extended.
    set.add_basic(
        "andi $t1,$t2,100",
        "Bitwise AND immediate; set $t1 to bitwise AND of $t2 and zero-extended immediate",
        I,
        "001100 sssss fffff tttttttttttttttt",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1) & (stmt.operand(2) & 0xffff));
            Ok(())
        },
    );
    set.add_basic(
        "ori $t1,$t2,100",
        "Bitwise OR immediate; set $t1 to bitwise OR of $t2 and zero-extended immediate",
        I,
        "001101 sssss fffff tttttttttttttttt",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1) | (stmt.operand(2) & 0xffff));
            Ok(())
        },
    );
    set.add_basic(
        "xori $t1,$t2,100",
        "Bitwise XOR immediate; set $t1 to bitwise XOR of $t2 and zero-extended immediate",
        I,
        "001110 sssss fffff tttttttttttttttt",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1) ^ (stmt.operand(2) & 0xffff));
            Ok(())
        },
    );
    set.add_basic(
        "sll $t1,$t2,10",
        "Shift left logical; set $t1 to $t2 shifted left by the immediate",
        R,
        "000000 00000 sssss fffff ttttt 000000",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1) << stmt.operand(2));
            Ok(())
        },
    );
    set.add_basic(
        "srl $t1,$t2,10",
        "Shift right logical; set $t1 to $t2 shifted right (zero-filled) by the immediate",
        R,
        "000000 00000 sssss fffff ttttt 000010",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), ((reg(sim, stmt, 1) as u32) >> stmt.operand(2)) as i32);
            Ok(())
        },
    );
    set.add_basic(
        "sra $t1,$t2,10",
        "Shift right arithmetic; set $t1 to $t2 shifted right (sign-filled) by the immediate",
        R,
        "000000 00000 sssss fffff ttttt 000011",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1) >> stmt.operand(2));
            Ok(())
        },
    );
    set.add_basic(
        "sllv $t1,$t2,$t3",
        "Shift left logical variable; shift amount is the low 5 bits of $t3",
        R,
        "000000 ttttt sssss fffff 00000 000100",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1) << (reg(sim, stmt, 2) & 0x1f));
            Ok(())
        },
    );
    set.add_basic(
        "srlv $t1,$t2,$t3",
        "Shift right logical variable; shift amount is the low 5 bits of $t3",
        R,
        "000000 ttttt sssss fffff 00000 000110",
        |sim, stmt| {
            let shift = reg(sim, stmt, 2) & 0x1f;
            sim.update_register(rnum(stmt, 0), ((reg(sim, stmt, 1) as u32) >> shift) as i32);
            Ok(())
        },
    );
    set.add_basic(
        "srav $t1,$t2,$t3",
        "Shift right arithmetic variable; shift amount is the low 5 bits of $t3",
        R,
        "000000 ttttt sssss fffff 00000 000111",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1) >> (reg(sim, stmt, 2) & 0x1f));
            Ok(())
        },
    );
}

fn multiply_divide(set: &mut InstructionSet) {
    set.add_basic(
        "mult $t1,$t2",
        "Multiplication; set HI to high-order 32 bits, LO to low-order 32 bits of $t1 times $t2",
        R,
        "000000 fffff sssss 00000 00000 011000",
        |sim, stmt| {
            let product = i64::from(reg(sim, stmt, 0)) * i64::from(reg(sim, stmt, 1));
            sim.update_hi(bits::high_order_long_to_int(product));
            sim.update_lo(bits::low_order_long_to_int(product));
            Ok(())
        },
    );
    set.add_basic(
        "multu $t1,$t2",
        "Multiplication unsigned; set HI and LO to the 64-bit unsigned product of $t1 and $t2",
        R,
        "000000 fffff sssss 00000 00000 011001",
        |sim, stmt| {
            let product =
                (u64::from(reg(sim, stmt, 0) as u32) * u64::from(reg(sim, stmt, 1) as u32)) as i64;
            sim.update_hi(bits::high_order_long_to_int(product));
            sim.update_lo(bits::low_order_long_to_int(product));
            Ok(())
        },
    );
    set.add_basic(
        "mul $t1,$t2,$t3",
        "Multiplication without overflow; set $t1 (and HI/LO) to the product of $t2 and $t3",
        R,
        "011100 sssss ttttt fffff 00000 000010",
        |sim, stmt| {
            let product = i64::from(reg(sim, stmt, 1)) * i64::from(reg(sim, stmt, 2));
            sim.update_register(rnum(stmt, 0), bits::low_order_long_to_int(product));
            // Not required by MIPS32, but SPIM sets HI/LO as well.
            sim.update_hi(bits::high_order_long_to_int(product));
            sim.update_lo(bits::low_order_long_to_int(product));
            Ok(())
        },
    );
    set.add_basic(
        "madd $t1,$t2",
        "Multiply add; increment the HI/LO accumulator by the product of $t1 and $t2",
        R,
        "011100 fffff sssss 00000 00000 000000",
        |sim, stmt| {
            let product = i64::from(reg(sim, stmt, 0)) * i64::from(reg(sim, stmt, 1));
            let sum = bits::two_ints_to_long(sim.registers.hi(), sim.registers.lo()) + product;
            sim.update_hi(bits::high_order_long_to_int(sum));
            sim.update_lo(bits::low_order_long_to_int(sum));
            Ok(())
        },
    );
    set.add_basic(
        "maddu $t1,$t2",
        "Multiply add unsigned; increment the HI/LO accumulator by the unsigned product",
        R,
        "011100 fffff sssss 00000 00000 000001",
        |sim, stmt| {
            let product =
                (u64::from(reg(sim, stmt, 0) as u32) * u64::from(reg(sim, stmt, 1) as u32)) as i64;
            let sum = bits::two_ints_to_long(sim.registers.hi(), sim.registers.lo()) + product;
            sim.update_hi(bits::high_order_long_to_int(sum));
            sim.update_lo(bits::low_order_long_to_int(sum));
            Ok(())
        },
    );
    set.add_basic(
        "msub $t1,$t2",
        "Multiply subtract; decrement the HI/LO accumulator by the product of $t1 and $t2",
        R,
        "011100 fffff sssss 00000 00000 000100",
        |sim, stmt| {
            let product = i64::from(reg(sim, stmt, 0)) * i64::from(reg(sim, stmt, 1));
            let difference = bits::two_ints_to_long(sim.registers.hi(), sim.registers.lo()) - product;
            sim.update_hi(bits::high_order_long_to_int(difference));
            sim.update_lo(bits::low_order_long_to_int(difference));
            Ok(())
        },
    );
    set.add_basic(
        "msubu $t1,$t2",
        "Multiply subtract unsigned; decrement the HI/LO accumulator by the unsigned product",
        R,
        "011100 fffff sssss 00000 00000 000101",
        |sim, stmt| {
            let product =
                (u64::from(reg(sim, stmt, 0) as u32) * u64::from(reg(sim, stmt, 1) as u32)) as i64;
            let difference = bits::two_ints_to_long(sim.registers.hi(), sim.registers.lo()) - product;
            sim.update_hi(bits::high_order_long_to_int(difference));
            sim.update_lo(bits::low_order_long_to_int(difference));
            Ok(())
        },
    );
    set.add_basic(
        "div $t1,$t2",
        "Division; set LO to quotient and HI to remainder of $t1 divided by $t2",
        R,
        "000000 fffff sssss 00000 00000 011010",
        |sim, stmt| {
            let divisor = reg(sim, stmt, 1);
            if divisor == 0 {
                // No exception and undefined result for divide by zero; the
                // MIPS32 specification calls for no arithmetic exception
                // under any circumstances.
                return Ok(());
            }
            let dividend = reg(sim, stmt, 0);
            sim.update_hi(dividend.wrapping_rem(divisor));
            sim.update_lo(dividend.wrapping_div(divisor));
            Ok(())
        },
    );
    set.add_basic(
        "divu $t1,$t2",
        "Division unsigned; set LO to quotient and HI to remainder of unsigned $t1 over $t2",
        R,
        "000000 fffff sssss 00000 00000 011011",
        |sim, stmt| {
            let divisor = reg(sim, stmt, 1) as u32;
            if divisor == 0 {
                return Ok(());
            }
            let dividend = reg(sim, stmt, 0) as u32;
            sim.update_hi((dividend % divisor) as i32);
            sim.update_lo((dividend / divisor) as i32);
            Ok(())
        },
    );
    set.add_basic(
        "mfhi $t1",
        "Move from HI register",
        R,
        "000000 00000 00000 fffff 00000 010000",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), sim.registers.hi());
            Ok(())
        },
    );
    set.add_basic(
        "mflo $t1",
        "Move from LO register",
        R,
        "000000 00000 00000 fffff 00000 010010",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), sim.registers.lo());
            Ok(())
        },
    );
    set.add_basic(
        "mthi $t1",
        "Move to HI register",
        R,
        "000000 fffff 00000 00000 00000 010001",
        |sim, stmt| {
            sim.update_hi(reg(sim, stmt, 0));
            Ok(())
        },
    );
    set.add_basic(
        "mtlo $t1",
        "Move to LO register",
        R,
        "000000 fffff 00000 00000 00000 010011",
        |sim, stmt| {
            sim.update_lo(reg(sim, stmt, 0));
            Ok(())
        },
    );
}

fn memory_access(set: &mut InstructionSet) {
    set.add_basic(
        "lw $t1,-100($t2)",
        "Load word; set $t1 to the word at the effective address",
        I,
        "100011 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            let value = sim.load_word(address)?;
            sim.update_register(rnum(stmt, 0), value);
            Ok(())
        },
    );
    // Load linked is treated as load word: with a single simulated processor
    // the paired store conditional always succeeds.
    set.add_basic(
        "ll $t1,-100($t2)",
        "Load linked; treated as load word since only one processor is simulated",
        I,
        "110000 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            let value = sim.load_word(address)?;
            sim.update_register(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "sw $t1,-100($t2)",
        "Store word; store $t1 at the effective address",
        I,
        "101011 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            sim.store_word(address, reg(sim, stmt, 0))
        },
    );
    set.add_basic(
        "sc $t1,-100($t2)",
        "Store conditional; stores like sw then sets $t1 to 1, since the store always succeeds",
        I,
        "111000 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            sim.store_word(address, reg(sim, stmt, 0))?;
            sim.update_register(rnum(stmt, 0), 1);
            Ok(())
        },
    );
    set.add_basic(
        "lh $t1,-100($t2)",
        "Load halfword; set $t1 to the sign-extended halfword at the effective address",
        I,
        "100001 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            let value = sim.load_halfword(address)?;
            sim.update_register(rnum(stmt, 0), bits::sign_extend(value, 16));
            Ok(())
        },
    );
    set.add_basic(
        "lhu $t1,-100($t2)",
        "Load halfword unsigned; set $t1 to the zero-extended halfword at the effective address",
        I,
        "100101 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            let value = sim.load_halfword(address)?;
            sim.update_register(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "sh $t1,-100($t2)",
        "Store halfword; store the low 16 bits of $t1 at the effective address",
        I,
        "101001 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            sim.store_halfword(address, reg(sim, stmt, 0))
        },
    );
    set.add_basic(
        "lb $t1,-100($t2)",
        "Load byte; set $t1 to the sign-extended byte at the effective address",
        I,
        "100000 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            let value = sim.load_byte(address)?;
            sim.update_register(rnum(stmt, 0), bits::sign_extend(value, 8));
            Ok(())
        },
    );
    set.add_basic(
        "lbu $t1,-100($t2)",
        "Load byte unsigned; set $t1 to the zero-extended byte at the effective address",
        I,
        "100100 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            let value = sim.load_byte(address)?;
            sim.update_register(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "sb $t1,-100($t2)",
        "Store byte; store the low 8 bits of $t1 at the effective address",
        I,
        "101000 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            sim.store_byte(address, reg(sim, stmt, 0))
        },
    );
    set.add_basic(
        "lwl $t1,-100($t2)",
        "Load word left; load 1 to 4 bytes left-justified into $t1 starting at the effective byte address",
        I,
        "100010 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            let mut result = reg(sim, stmt, 0);
            for i in 0..=(address % 4) {
                let byte = sim.load_byte(address - i)?;
                result = bits::set_byte(result, 3 - i as usize, byte);
            }
            sim.update_register(rnum(stmt, 0), result);
            Ok(())
        },
    );
    set.add_basic(
        "lwr $t1,-100($t2)",
        "Load word right; load 1 to 4 bytes right-justified into $t1 starting at the effective byte address",
        I,
        "100110 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            let mut result = reg(sim, stmt, 0);
            for i in 0..=(3 - address % 4) {
                let byte = sim.load_byte(address + i)?;
                result = bits::set_byte(result, i as usize, byte);
            }
            sim.update_register(rnum(stmt, 0), result);
            Ok(())
        },
    );
    set.add_basic(
        "swl $t1,-100($t2)",
        "Store word left; store the high-order 1 to 4 bytes of $t1 starting at the effective byte address",
        I,
        "101010 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            let source = reg(sim, stmt, 0);
            for i in 0..=(address % 4) {
                sim.store_byte(address - i, bits::get_byte(source, 3 - i as usize))?;
            }
            Ok(())
        },
    );
    set.add_basic(
        "swr $t1,-100($t2)",
        "Store word right; store the low-order 1 to 4 bytes of $t1 ending at the effective byte address",
        I,
        "101110 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            let source = reg(sim, stmt, 0);
            for i in 0..=(3 - address % 4) {
                sim.store_byte(address + i, bits::get_byte(source, i as usize))?;
            }
            Ok(())
        },
    );
}

fn branches_and_jumps(set: &mut InstructionSet) {
    set.add_basic(
        "beq $t1,$t2,label",
        "Branch if equal; branch to the label if $t1 equals $t2",
        IBranch,
        "000100 fffff sssss tttttttttttttttt",
        |sim, stmt| {
            if reg(sim, stmt, 0) == reg(sim, stmt, 1) {
                sim.process_branch(stmt.operand(2));
            }
            Ok(())
        },
    );
    set.add_basic(
        "bne $t1,$t2,label",
        "Branch if not equal; branch to the label if $t1 differs from $t2",
        IBranch,
        "000101 fffff sssss tttttttttttttttt",
        |sim, stmt| {
            if reg(sim, stmt, 0) != reg(sim, stmt, 1) {
                sim.process_branch(stmt.operand(2));
            }
            Ok(())
        },
    );
    set.add_basic(
        "bgez $t1,label",
        "Branch if greater than or equal to zero",
        IBranch,
        "000001 fffff 00001 ssssssssssssssss",
        |sim, stmt| {
            if reg(sim, stmt, 0) >= 0 {
                sim.process_branch(stmt.operand(1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "bgezal $t1,label",
        "Branch if greater than or equal to zero and link; set $ra and branch if $t1 >= 0",
        IBranch,
        "000001 fffff 10001 ssssssssssssssss",
        |sim, stmt| {
            if reg(sim, stmt, 0) >= 0 {
                sim.process_return_address(RA);
                sim.process_branch(stmt.operand(1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "bgtz $t1,label",
        "Branch if greater than zero",
        IBranch,
        "000111 fffff 00000 ssssssssssssssss",
        |sim, stmt| {
            if reg(sim, stmt, 0) > 0 {
                sim.process_branch(stmt.operand(1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "blez $t1,label",
        "Branch if less than or equal to zero",
        IBranch,
        "000110 fffff 00000 ssssssssssssssss",
        |sim, stmt| {
            if reg(sim, stmt, 0) <= 0 {
                sim.process_branch(stmt.operand(1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "bltz $t1,label",
        "Branch if less than zero",
        IBranch,
        "000001 fffff 00000 ssssssssssssssss",
        |sim, stmt| {
            if reg(sim, stmt, 0) < 0 {
                sim.process_branch(stmt.operand(1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "bltzal $t1,label",
        "Branch if less than zero and link; set $ra and branch if $t1 < 0",
        IBranch,
        "000001 fffff 10000 ssssssssssssssss",
        |sim, stmt| {
            if reg(sim, stmt, 0) < 0 {
                sim.process_return_address(RA);
                sim.process_branch(stmt.operand(1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "j target",
        "Jump unconditionally",
        J,
        "000010 ffffffffffffffffffffffffff",
        |sim, stmt| {
            let target = (sim.registers.pc() & 0xf000_0000) | ((stmt.operand(0) as u32) << 2);
            sim.process_jump(target);
            Ok(())
        },
    );
    set.add_basic(
        "jr $t1",
        "Jump register; jump to the address in $t1",
        R,
        "000000 fffff 00000 00000 00000 001000",
        |sim, stmt| {
            sim.process_jump(reg(sim, stmt, 0) as u32);
            Ok(())
        },
    );
    set.add_basic(
        "jal target",
        "Jump and link; set $ra to the return address and jump",
        J,
        "000011 ffffffffffffffffffffffffff",
        |sim, stmt| {
            sim.process_return_address(RA);
            let target = (sim.registers.pc() & 0xf000_0000) | ((stmt.operand(0) as u32) << 2);
            sim.process_jump(target);
            Ok(())
        },
    );
    set.add_basic(
        "jalr $t1,$t2",
        "Jump and link register; set $t1 to the return address and jump to the address in $t2",
        R,
        "000000 sssss 00000 fffff 00000 001001",
        |sim, stmt| {
            sim.process_return_address(rnum(stmt, 0));
            sim.process_jump(reg(sim, stmt, 1) as u32);
            Ok(())
        },
    );
    set.add_basic(
        "jalr $t1",
        "Jump and link register; set $ra to the return address and jump to the address in $t1",
        R,
        "000000 fffff 00000 11111 00000 001001",
        |sim, stmt| {
            sim.process_return_address(RA);
            sim.process_jump(reg(sim, stmt, 0) as u32);
            Ok(())
        },
    );
}

fn comparisons_and_moves(set: &mut InstructionSet) {
    set.add_basic(
        "slt $t1,$t2,$t3",
        "Set less than; set $t1 to 1 if $t2 is less than $t3, else 0",
        R,
        "000000 sssss ttttt fffff 00000 101010",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), i32::from(reg(sim, stmt, 1) < reg(sim, stmt, 2)));
            Ok(())
        },
    );
    set.add_basic(
        "sltu $t1,$t2,$t3",
        "Set less than unsigned; set $t1 to 1 if unsigned $t2 is less than unsigned $t3, else 0",
        R,
        "000000 sssss ttttt fffff 00000 101011",
        |sim, stmt| {
            let less = (reg(sim, stmt, 1) as u32) < (reg(sim, stmt, 2) as u32);
            sim.update_register(rnum(stmt, 0), i32::from(less));
            Ok(())
        },
    );
    set.add_basic(
        "slti $t1,$t2,-100",
        "Set less than immediate; set $t1 to 1 if $t2 is less than the sign-extended immediate",
        I,
        "001010 sssss fffff tttttttttttttttt",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), i32::from(reg(sim, stmt, 1) < stmt.operand(2)));
            Ok(())
        },
    );
    set.add_basic(
        "sltiu $t1,$t2,-100",
        "Set less than immediate unsigned; unsigned compare against the sign-extended immediate",
        I,
        "001011 sssss fffff tttttttttttttttt",
        |sim, stmt| {
            let less = (reg(sim, stmt, 1) as u32) < (stmt.operand(2) as u32);
            sim.update_register(rnum(stmt, 0), i32::from(less));
            Ok(())
        },
    );
    set.add_basic(
        "movn $t1,$t2,$t3",
        "Move conditional not zero; set $t1 to $t2 if $t3 is not zero",
        R,
        "000000 sssss ttttt fffff 00000 001011",
        |sim, stmt| {
            if reg(sim, stmt, 2) != 0 {
                sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "movz $t1,$t2,$t3",
        "Move conditional zero; set $t1 to $t2 if $t3 is zero",
        R,
        "000000 sssss ttttt fffff 00000 001010",
        |sim, stmt| {
            if reg(sim, stmt, 2) == 0 {
                sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "movf $t1,$t2",
        "Move if FP condition flag 0 is false",
        R,
        "000000 sssss 000 00 fffff 00000 000001",
        |sim, stmt| {
            if sim.cop1.get_condition_flag(0) == 0 {
                sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "movf $t1,$t2,1",
        "Move if the specified FP condition flag is false",
        R,
        "000000 sssss ttt 00 fffff 00000 000001",
        |sim, stmt| {
            if sim.cop1.get_condition_flag(rnum(stmt, 2)) == 0 {
                sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "movt $t1,$t2",
        "Move if FP condition flag 0 is true",
        R,
        "000000 sssss 000 01 fffff 00000 000001",
        |sim, stmt| {
            if sim.cop1.get_condition_flag(0) == 1 {
                sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "movt $t1,$t2,1",
        "Move if the specified FP condition flag is true",
        R,
        "000000 sssss ttt 01 fffff 00000 000001",
        |sim, stmt| {
            if sim.cop1.get_condition_flag(rnum(stmt, 2)) == 1 {
                sim.update_register(rnum(stmt, 0), reg(sim, stmt, 1));
            }
            Ok(())
        },
    );
}

fn traps_and_system(set: &mut InstructionSet) {
    set.add_basic(
        "syscall",
        "Issue a system call; execute the service selected by $v0",
        R,
        "000000 00000 00000 00000 00000 001100",
        |sim, stmt| syscall::handle(sim, stmt),
    );
    set.add_basic(
        "break",
        "Break execution with a breakpoint exception",
        R,
        "000000 00000 00000 00000 00000 001101",
        |_, stmt| {
            Err(Interrupt::Exception(ProcessorException::new(
                ExceptionCause::Breakpoint,
                format!("break instruction executed at 0x{:08x}", stmt.address),
            )))
        },
    );
    set.add_basic(
        "break 100",
        "Break execution with a breakpoint exception carrying a code",
        R,
        "000000 ffffffffffffffffffff 001101",
        |_, stmt| {
            Err(Interrupt::Exception(ProcessorException::new(
                ExceptionCause::Breakpoint,
                format!("break instruction executed; code = {}", stmt.operand(0)),
            )))
        },
    );
    set.add_basic(
        "teq $t1,$t2",
        "Trap if equal",
        R,
        "000000 fffff sssss 00000 00000 110100",
        |sim, stmt| {
            if reg(sim, stmt, 0) == reg(sim, stmt, 1) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
    set.add_basic(
        "teqi $t1,-100",
        "Trap if equal to the sign-extended immediate",
        I,
        "000001 fffff 01100 ssssssssssssssss",
        |sim, stmt| {
            if reg(sim, stmt, 0) == stmt.operand(1) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
    set.add_basic(
        "tne $t1,$t2",
        "Trap if not equal",
        R,
        "000000 fffff sssss 00000 00000 110110",
        |sim, stmt| {
            if reg(sim, stmt, 0) != reg(sim, stmt, 1) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
    set.add_basic(
        "tnei $t1,-100",
        "Trap if not equal to the sign-extended immediate",
        I,
        "000001 fffff 01110 ssssssssssssssss",
        |sim, stmt| {
            if reg(sim, stmt, 0) != stmt.operand(1) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
    set.add_basic(
        "tge $t1,$t2",
        "Trap if greater than or equal",
        R,
        "000000 fffff sssss 00000 00000 110000",
        |sim, stmt| {
            if reg(sim, stmt, 0) >= reg(sim, stmt, 1) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
    set.add_basic(
        "tgeu $t1,$t2",
        "Trap if greater than or equal unsigned",
        R,
        "000000 fffff sssss 00000 00000 110001",
        |sim, stmt| {
            if (reg(sim, stmt, 0) as u32) >= (reg(sim, stmt, 1) as u32) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
    set.add_basic(
        "tgei $t1,-100",
        "Trap if greater than or equal to the sign-extended immediate",
        I,
        "000001 fffff 01000 ssssssssssssssss",
        |sim, stmt| {
            if reg(sim, stmt, 0) >= stmt.operand(1) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
    set.add_basic(
        "tgeiu $t1,-100",
        "Trap if greater than or equal unsigned to the sign-extended immediate",
        I,
        "000001 fffff 01001 ssssssssssssssss",
        |sim, stmt| {
            if (reg(sim, stmt, 0) as u32) >= (stmt.operand(1) as u32) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
    set.add_basic(
        "tlt $t1,$t2",
        "Trap if less than",
        R,
        "000000 fffff sssss 00000 00000 110010",
        |sim, stmt| {
            if reg(sim, stmt, 0) < reg(sim, stmt, 1) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
    set.add_basic(
        "tltu $t1,$t2",
        "Trap if less than unsigned",
        R,
        "000000 fffff sssss 00000 00000 110011",
        |sim, stmt| {
            if (reg(sim, stmt, 0) as u32) < (reg(sim, stmt, 1) as u32) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
    set.add_basic(
        "tlti $t1,-100",
        "Trap if less than the sign-extended immediate",
        I,
        "000001 fffff 01010 ssssssssssssssss",
        |sim, stmt| {
            if reg(sim, stmt, 0) < stmt.operand(1) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
    set.add_basic(
        "tltiu $t1,-100",
        "Trap if less than unsigned the sign-extended immediate",
        I,
        "000001 fffff 01011 ssssssssssssssss",
        |sim, stmt| {
            if (reg(sim, stmt, 0) as u32) < (stmt.operand(1) as u32) {
                return Err(trap(stmt));
            }
            Ok(())
        },
    );
}

fn coprocessor0(set: &mut InstructionSet) {
    set.add_basic(
        "mfc0 $t1,$8",
        "Move from Coprocessor 0; set $t1 to the value of Coprocessor 0 register $8",
        R,
        "010000 00000 fffff sssss 00000 000000",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), sim.cop0.get(rnum(stmt, 1)));
            Ok(())
        },
    );
    set.add_basic(
        "mtc0 $t1,$8",
        "Move to Coprocessor 0; set Coprocessor 0 register $8 to the value of $t1",
        R,
        "010000 00100 fffff sssss 00000 000000",
        |sim, stmt| {
            sim.update_cop0(rnum(stmt, 1), reg(sim, stmt, 0));
            Ok(())
        },
    );
    set.add_basic(
        "eret",
        "Exception return; restore the PC from EPC and clear the Status EXL bit",
        R,
        "010000 1 0000000000000000000 011000",
        |sim, stmt| {
            let status = sim.cop0.get(STATUS);
            sim.update_cop0(STATUS, status & !0b10);
            sim.backstep.add_pc_restore(stmt.address);
            let target = sim.cop0.get(EPC) as u32;
            sim.registers.set_pc(target);
            Ok(())
        },
    );
}

fn floating_point(set: &mut InstructionSet) {
    set.add_basic(
        "add.s $f0,$f1,$f2",
        "Floating point addition single precision",
        R,
        "010001 10000 ttttt sssss fffff 000000",
        |sim, stmt| {
            let result = sim.cop1.get_float(rnum(stmt, 1)) + sim.cop1.get_float(rnum(stmt, 2));
            sim.update_cop1_float(rnum(stmt, 0), result);
            Ok(())
        },
    );
    set.add_basic(
        "sub.s $f0,$f1,$f2",
        "Floating point subtraction single precision",
        R,
        "010001 10000 ttttt sssss fffff 000001",
        |sim, stmt| {
            let result = sim.cop1.get_float(rnum(stmt, 1)) - sim.cop1.get_float(rnum(stmt, 2));
            sim.update_cop1_float(rnum(stmt, 0), result);
            Ok(())
        },
    );
    set.add_basic(
        "mul.s $f0,$f1,$f2",
        "Floating point multiplication single precision",
        R,
        "010001 10000 ttttt sssss fffff 000010",
        |sim, stmt| {
            let result = sim.cop1.get_float(rnum(stmt, 1)) * sim.cop1.get_float(rnum(stmt, 2));
            sim.update_cop1_float(rnum(stmt, 0), result);
            Ok(())
        },
    );
    set.add_basic(
        "div.s $f0,$f1,$f2",
        "Floating point division single precision",
        R,
        "010001 10000 ttttt sssss fffff 000011",
        |sim, stmt| {
            let result = sim.cop1.get_float(rnum(stmt, 1)) / sim.cop1.get_float(rnum(stmt, 2));
            sim.update_cop1_float(rnum(stmt, 0), result);
            Ok(())
        },
    );
    set.add_basic(
        "sqrt.s $f0,$f1",
        "Square root single precision",
        R,
        "010001 10000 00000 sssss fffff 000100",
        |sim, stmt| {
            sim.update_cop1_float(rnum(stmt, 0), sim.cop1.get_float(rnum(stmt, 1)).sqrt());
            Ok(())
        },
    );
    set.add_basic(
        "abs.s $f0,$f1",
        "Absolute value single precision",
        R,
        "010001 10000 00000 sssss fffff 000101",
        |sim, stmt| {
            sim.update_cop1_float(rnum(stmt, 0), sim.cop1.get_float(rnum(stmt, 1)).abs());
            Ok(())
        },
    );
    set.add_basic(
        "mov.s $f0,$f1",
        "Move floating point single precision",
        R,
        "010001 10000 00000 sssss fffff 000110",
        |sim, stmt| {
            sim.update_cop1(rnum(stmt, 0), sim.cop1.get(rnum(stmt, 1)));
            Ok(())
        },
    );
    set.add_basic(
        "neg.s $f0,$f1",
        "Negate single precision",
        R,
        "010001 10000 00000 sssss fffff 000111",
        |sim, stmt| {
            sim.update_cop1_float(rnum(stmt, 0), -sim.cop1.get_float(rnum(stmt, 1)));
            Ok(())
        },
    );
    set.add_basic(
        "add.d $f2,$f4,$f6",
        "Floating point addition double precision",
        R,
        "010001 10001 ttttt sssss fffff 000000",
        |sim, stmt| {
            let result = sim.cop1_double(rnum(stmt, 1))? + sim.cop1_double(rnum(stmt, 2))?;
            sim.update_cop1_double(rnum(stmt, 0), result)
        },
    );
    set.add_basic(
        "sub.d $f2,$f4,$f6",
        "Floating point subtraction double precision",
        R,
        "010001 10001 ttttt sssss fffff 000001",
        |sim, stmt| {
            let result = sim.cop1_double(rnum(stmt, 1))? - sim.cop1_double(rnum(stmt, 2))?;
            sim.update_cop1_double(rnum(stmt, 0), result)
        },
    );
    set.add_basic(
        "mul.d $f2,$f4,$f6",
        "Floating point multiplication double precision",
        R,
        "010001 10001 ttttt sssss fffff 000010",
        |sim, stmt| {
            let result = sim.cop1_double(rnum(stmt, 1))? * sim.cop1_double(rnum(stmt, 2))?;
            sim.update_cop1_double(rnum(stmt, 0), result)
        },
    );
    set.add_basic(
        "div.d $f2,$f4,$f6",
        "Floating point division double precision",
        R,
        "010001 10001 ttttt sssss fffff 000011",
        |sim, stmt| {
            let result = sim.cop1_double(rnum(stmt, 1))? / sim.cop1_double(rnum(stmt, 2))?;
            sim.update_cop1_double(rnum(stmt, 0), result)
        },
    );
    set.add_basic(
        "sqrt.d $f2,$f4",
        "Square root double precision",
        R,
        "010001 10001 00000 sssss fffff 000100",
        |sim, stmt| {
            let result = sim.cop1_double(rnum(stmt, 1))?.sqrt();
            sim.update_cop1_double(rnum(stmt, 0), result)
        },
    );
    set.add_basic(
        "abs.d $f2,$f4",
        "Absolute value double precision",
        R,
        "010001 10001 00000 sssss fffff 000101",
        |sim, stmt| {
            let result = sim.cop1_double(rnum(stmt, 1))?.abs();
            sim.update_cop1_double(rnum(stmt, 0), result)
        },
    );
    set.add_basic(
        "mov.d $f2,$f4",
        "Move floating point double precision",
        R,
        "010001 10001 00000 sssss fffff 000110",
        |sim, stmt| {
            require_even(rnum(stmt, 0))?;
            require_even(rnum(stmt, 1))?;
            sim.update_cop1(rnum(stmt, 0), sim.cop1.get(rnum(stmt, 1)));
            sim.update_cop1(rnum(stmt, 0) + 1, sim.cop1.get(rnum(stmt, 1) + 1));
            Ok(())
        },
    );
    set.add_basic(
        "neg.d $f2,$f4",
        "Negate double precision",
        R,
        "010001 10001 00000 sssss fffff 000111",
        |sim, stmt| {
            let result = -sim.cop1_double(rnum(stmt, 1))?;
            sim.update_cop1_double(rnum(stmt, 0), result)
        },
    );

    // Conversions. Word results saturate to i32::MAX when the value is out of
    // range, matching the behavior without a modeled FCSR.
    set.add_basic(
        "cvt.s.d $f1,$f2",
        "Convert from double precision to single precision",
        R,
        "010001 10001 00000 sssss fffff 100000",
        |sim, stmt| {
            let value = sim.cop1_double(rnum(stmt, 1))? as f32;
            sim.update_cop1_float(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "cvt.d.s $f2,$f1",
        "Convert from single precision to double precision",
        R,
        "010001 10000 00000 sssss fffff 100001",
        |sim, stmt| {
            let value = f64::from(sim.cop1.get_float(rnum(stmt, 1)));
            sim.update_cop1_double(rnum(stmt, 0), value)
        },
    );
    set.add_basic(
        "cvt.w.s $f0,$f1",
        "Convert from single precision to word (truncating)",
        R,
        "010001 10000 00000 sssss fffff 100100",
        |sim, stmt| {
            let value = double_to_word(f64::from(sim.cop1.get_float(rnum(stmt, 1))), f64::trunc);
            sim.update_cop1(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "cvt.w.d $f1,$f2",
        "Convert from double precision to word (truncating)",
        R,
        "010001 10001 00000 sssss fffff 100100",
        |sim, stmt| {
            let value = double_to_word(sim.cop1_double(rnum(stmt, 1))?, f64::trunc);
            sim.update_cop1(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "cvt.s.w $f0,$f1",
        "Convert from word to single precision",
        R,
        "010001 10100 00000 sssss fffff 100000",
        |sim, stmt| {
            sim.update_cop1_float(rnum(stmt, 0), sim.cop1.get(rnum(stmt, 1)) as f32);
            Ok(())
        },
    );
    set.add_basic(
        "cvt.d.w $f2,$f1",
        "Convert from word to double precision",
        R,
        "010001 10100 00000 sssss fffff 100001",
        |sim, stmt| {
            let value = f64::from(sim.cop1.get(rnum(stmt, 1)));
            sim.update_cop1_double(rnum(stmt, 0), value)
        },
    );

    set.add_basic(
        "round.w.s $f0,$f1",
        "Round single precision to word",
        R,
        "010001 10000 00000 sssss fffff 001100",
        |sim, stmt| {
            let value =
                double_to_word(f64::from(sim.cop1.get_float(rnum(stmt, 1))), round_half_up);
            sim.update_cop1(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "round.w.d $f1,$f2",
        "Round double precision to word",
        R,
        "010001 10001 00000 sssss fffff 001100",
        |sim, stmt| {
            let value = double_to_word(sim.cop1_double(rnum(stmt, 1))?, round_half_up);
            sim.update_cop1(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "trunc.w.s $f0,$f1",
        "Truncate single precision to word",
        R,
        "010001 10000 00000 sssss fffff 001101",
        |sim, stmt| {
            let value = double_to_word(f64::from(sim.cop1.get_float(rnum(stmt, 1))), f64::trunc);
            sim.update_cop1(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "trunc.w.d $f1,$f2",
        "Truncate double precision to word",
        R,
        "010001 10001 00000 sssss fffff 001101",
        |sim, stmt| {
            let value = double_to_word(sim.cop1_double(rnum(stmt, 1))?, f64::trunc);
            sim.update_cop1(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "ceil.w.s $f0,$f1",
        "Ceiling single precision to word",
        R,
        "010001 10000 00000 sssss fffff 001110",
        |sim, stmt| {
            let value = double_to_word(f64::from(sim.cop1.get_float(rnum(stmt, 1))), f64::ceil);
            sim.update_cop1(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "ceil.w.d $f1,$f2",
        "Ceiling double precision to word",
        R,
        "010001 10001 00000 sssss fffff 001110",
        |sim, stmt| {
            let value = double_to_word(sim.cop1_double(rnum(stmt, 1))?, f64::ceil);
            sim.update_cop1(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "floor.w.s $f0,$f1",
        "Floor single precision to word",
        R,
        "010001 10000 00000 sssss fffff 001111",
        |sim, stmt| {
            let value = double_to_word(f64::from(sim.cop1.get_float(rnum(stmt, 1))), f64::floor);
            sim.update_cop1(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "floor.w.d $f1,$f2",
        "Floor double precision to word",
        R,
        "010001 10001 00000 sssss fffff 001111",
        |sim, stmt| {
            let value = double_to_word(sim.cop1_double(rnum(stmt, 1))?, f64::floor);
            sim.update_cop1(rnum(stmt, 0), value);
            Ok(())
        },
    );

    // Comparisons set a coprocessor 1 condition flag (flag 0 when the
    // two-operand form is used).
    set.add_basic(
        "c.eq.s $f0,$f1",
        "Compare equal single precision; set condition flag 0",
        R,
        "010001 10000 sssss fffff 00000 110010",
        |sim, stmt| {
            if sim.cop1.get_float(rnum(stmt, 0)) == sim.cop1.get_float(rnum(stmt, 1)) {
                sim.set_condition_flag(0);
            } else {
                sim.clear_condition_flag(0);
            }
            Ok(())
        },
    );
    set.add_basic(
        "c.eq.s 1,$f0,$f1",
        "Compare equal single precision; set the specified condition flag",
        R,
        "010001 10000 ttttt sssss fff 00 110010",
        |sim, stmt| {
            if sim.cop1.get_float(rnum(stmt, 1)) == sim.cop1.get_float(rnum(stmt, 2)) {
                sim.set_condition_flag(rnum(stmt, 0));
            } else {
                sim.clear_condition_flag(rnum(stmt, 0));
            }
            Ok(())
        },
    );
    set.add_basic(
        "c.lt.s $f0,$f1",
        "Compare less than single precision; set condition flag 0",
        R,
        "010001 10000 sssss fffff 00000 111100",
        |sim, stmt| {
            if sim.cop1.get_float(rnum(stmt, 0)) < sim.cop1.get_float(rnum(stmt, 1)) {
                sim.set_condition_flag(0);
            } else {
                sim.clear_condition_flag(0);
            }
            Ok(())
        },
    );
    set.add_basic(
        "c.lt.s 1,$f0,$f1",
        "Compare less than single precision; set the specified condition flag",
        R,
        "010001 10000 ttttt sssss fff 00 111100",
        |sim, stmt| {
            if sim.cop1.get_float(rnum(stmt, 1)) < sim.cop1.get_float(rnum(stmt, 2)) {
                sim.set_condition_flag(rnum(stmt, 0));
            } else {
                sim.clear_condition_flag(rnum(stmt, 0));
            }
            Ok(())
        },
    );
    set.add_basic(
        "c.le.s $f0,$f1",
        "Compare less than or equal single precision; set condition flag 0",
        R,
        "010001 10000 sssss fffff 00000 111110",
        |sim, stmt| {
            if sim.cop1.get_float(rnum(stmt, 0)) <= sim.cop1.get_float(rnum(stmt, 1)) {
                sim.set_condition_flag(0);
            } else {
                sim.clear_condition_flag(0);
            }
            Ok(())
        },
    );
    set.add_basic(
        "c.le.s 1,$f0,$f1",
        "Compare less than or equal single precision; set the specified condition flag",
        R,
        "010001 10000 ttttt sssss fff 00 111110",
        |sim, stmt| {
            if sim.cop1.get_float(rnum(stmt, 1)) <= sim.cop1.get_float(rnum(stmt, 2)) {
                sim.set_condition_flag(rnum(stmt, 0));
            } else {
                sim.clear_condition_flag(rnum(stmt, 0));
            }
            Ok(())
        },
    );
    set.add_basic(
        "c.eq.d $f2,$f4",
        "Compare equal double precision; set condition flag 0",
        R,
        "010001 10001 sssss fffff 00000 110010",
        |sim, stmt| {
            if sim.cop1_double(rnum(stmt, 0))? == sim.cop1_double(rnum(stmt, 1))? {
                sim.set_condition_flag(0);
            } else {
                sim.clear_condition_flag(0);
            }
            Ok(())
        },
    );
    set.add_basic(
        "c.eq.d 1,$f2,$f4",
        "Compare equal double precision; set the specified condition flag",
        R,
        "010001 10001 ttttt sssss fff 00 110010",
        |sim, stmt| {
            if sim.cop1_double(rnum(stmt, 1))? == sim.cop1_double(rnum(stmt, 2))? {
                sim.set_condition_flag(rnum(stmt, 0));
            } else {
                sim.clear_condition_flag(rnum(stmt, 0));
            }
            Ok(())
        },
    );
    set.add_basic(
        "c.lt.d $f2,$f4",
        "Compare less than double precision; set condition flag 0",
        R,
        "010001 10001 sssss fffff 00000 111100",
        |sim, stmt| {
            if sim.cop1_double(rnum(stmt, 0))? < sim.cop1_double(rnum(stmt, 1))? {
                sim.set_condition_flag(0);
            } else {
                sim.clear_condition_flag(0);
            }
            Ok(())
        },
    );
    set.add_basic(
        "c.lt.d 1,$f2,$f4",
        "Compare less than double precision; set the specified condition flag",
        R,
        "010001 10001 ttttt sssss fff 00 111100",
        |sim, stmt| {
            if sim.cop1_double(rnum(stmt, 1))? < sim.cop1_double(rnum(stmt, 2))? {
                sim.set_condition_flag(rnum(stmt, 0));
            } else {
                sim.clear_condition_flag(rnum(stmt, 0));
            }
            Ok(())
        },
    );
    set.add_basic(
        "c.le.d $f2,$f4",
        "Compare less than or equal double precision; set condition flag 0",
        R,
        "010001 10001 sssss fffff 00000 111110",
        |sim, stmt| {
            if sim.cop1_double(rnum(stmt, 0))? <= sim.cop1_double(rnum(stmt, 1))? {
                sim.set_condition_flag(0);
            } else {
                sim.clear_condition_flag(0);
            }
            Ok(())
        },
    );
    set.add_basic(
        "c.le.d 1,$f2,$f4",
        "Compare less than or equal double precision; set the specified condition flag",
        R,
        "010001 10001 ttttt sssss fff 00 111110",
        |sim, stmt| {
            if sim.cop1_double(rnum(stmt, 1))? <= sim.cop1_double(rnum(stmt, 2))? {
                sim.set_condition_flag(rnum(stmt, 0));
            } else {
                sim.clear_condition_flag(rnum(stmt, 0));
            }
            Ok(())
        },
    );
    set.add_basic(
        "bc1t label",
        "Branch if FP condition flag 0 is true",
        IBranch,
        "010001 01000 00001 ffffffffffffffff",
        |sim, stmt| {
            if sim.cop1.get_condition_flag(0) == 1 {
                sim.process_branch(stmt.operand(0));
            }
            Ok(())
        },
    );
    set.add_basic(
        "bc1t 1,label",
        "Branch if the specified FP condition flag is true",
        IBranch,
        "010001 01000 fff 01 ssssssssssssssss",
        |sim, stmt| {
            if sim.cop1.get_condition_flag(rnum(stmt, 0)) == 1 {
                sim.process_branch(stmt.operand(1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "bc1f label",
        "Branch if FP condition flag 0 is false",
        IBranch,
        "010001 01000 00000 ffffffffffffffff",
        |sim, stmt| {
            if sim.cop1.get_condition_flag(0) == 0 {
                sim.process_branch(stmt.operand(0));
            }
            Ok(())
        },
    );
    set.add_basic(
        "bc1f 1,label",
        "Branch if the specified FP condition flag is false",
        IBranch,
        "010001 01000 fff 00 ssssssssssssssss",
        |sim, stmt| {
            if sim.cop1.get_condition_flag(rnum(stmt, 0)) == 0 {
                sim.process_branch(stmt.operand(1));
            }
            Ok(())
        },
    );
    set.add_basic(
        "mfc1 $t1,$f1",
        "Move from Coprocessor 1; set $t1 to the raw bits of $f1",
        R,
        "010001 00000 fffff sssss 00000 000000",
        |sim, stmt| {
            sim.update_register(rnum(stmt, 0), sim.cop1.get(rnum(stmt, 1)));
            Ok(())
        },
    );
    set.add_basic(
        "mtc1 $t1,$f1",
        "Move to Coprocessor 1; set the raw bits of $f1 to $t1",
        R,
        "010001 00100 fffff sssss 00000 000000",
        |sim, stmt| {
            sim.update_cop1(rnum(stmt, 1), reg(sim, stmt, 0));
            Ok(())
        },
    );
    set.add_basic(
        "lwc1 $f1,-100($t2)",
        "Load word into Coprocessor 1",
        I,
        "110001 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            let value = sim.load_word(address)?;
            sim.update_cop1(rnum(stmt, 0), value);
            Ok(())
        },
    );
    set.add_basic(
        "swc1 $f1,-100($t2)",
        "Store word from Coprocessor 1",
        I,
        "111001 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            let address = effective_address(sim, stmt, 1, 2);
            sim.store_word(address, sim.cop1.get(rnum(stmt, 0)))
        },
    );
    set.add_basic(
        "ldc1 $f2,-100($t2)",
        "Load doubleword into an even/odd Coprocessor 1 pair",
        I,
        "110101 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            require_even(rnum(stmt, 0))?;
            let address = effective_address(sim, stmt, 1, 2);
            let low = sim.load_word(address)?;
            let high = sim.load_word(address.wrapping_add(4))?;
            sim.update_cop1(rnum(stmt, 0), low);
            sim.update_cop1(rnum(stmt, 0) + 1, high);
            Ok(())
        },
    );
    set.add_basic(
        "sdc1 $f2,-100($t2)",
        "Store doubleword from an even/odd Coprocessor 1 pair",
        I,
        "111101 ttttt fffff ssssssssssssssss",
        |sim, stmt| {
            require_even(rnum(stmt, 0))?;
            let address = effective_address(sim, stmt, 1, 2);
            sim.store_word(address, sim.cop1.get(rnum(stmt, 0)))?;
            sim.store_word(address.wrapping_add(4), sim.cop1.get(rnum(stmt, 0) + 1))
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::mem::MemoryConfiguration;
    use crate::sim::{FinishReason, RunResult, SimulatorOptions};
    use std::sync::Arc;

    fn simulator() -> Simulator {
        Simulator::new(MemoryConfiguration::default_layout(), SimulatorOptions::default())
    }

    /// Places raw machine words in the text segment as decoded statements.
    fn load_words(sim: &mut Simulator, words: &[u32]) {
        let base = sim.memory.config().text_low;
        for (i, &word) in words.iter().enumerate() {
            let statement = InstructionSet::global()
                .decode_statement(word, base + 4 * i as u32)
                .unwrap_or_else(|| panic!("word 0x{word:08x} failed to decode"));
            sim.memory.store_statement(base + 4 * i as u32, Arc::new(statement), false).unwrap();
        }
    }

    fn encode(mnemonic: &str, operands: &[i32]) -> u32 {
        let set = InstructionSet::global();
        set.match_mnemonic(mnemonic)
            .into_iter()
            .find_map(|i| match i {
                super::super::Instruction::Basic(b)
                    if b.operand_types.len() == operands.len() =>
                {
                    Some(b.encoding.encode(operands))
                }
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_add_and_overflow() {
        let mut sim = simulator();
        sim.registers.set(10, i32::MAX);
        sim.registers.set(11, 1);
        load_words(&mut sim, &[encode("add", &[9, 10, 11])]);

        match sim.run(None) {
            RunResult::Finished(FinishReason::Exception(e)) => {
                assert_eq!(e.cause, ExceptionCause::ArithmeticOverflow);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
        // EPC holds the faulting instruction's address.
        assert_eq!(sim.cop0.get(EPC) as u32, sim.memory.config().text_low);
    }

    #[test]
    fn test_addu_wraps_silently() {
        let mut sim = simulator();
        sim.registers.set(10, i32::MAX);
        sim.registers.set(11, 1);
        load_words(&mut sim, &[encode("addu", &[9, 10, 11])]);
        sim.run(Some(1));
        assert_eq!(sim.registers.get(9), i32::MIN);
    }

    #[test]
    fn test_division_by_zero_is_silent() {
        let mut sim = simulator();
        sim.registers.set(9, 42);
        sim.registers.set(10, 0);
        load_words(&mut sim, &[encode("div", &[9, 10])]);
        match sim.run(Some(1)) {
            RunResult::Paused(_) => {}
            other => panic!("expected pause after one step, got {other:?}"),
        }
    }

    #[test]
    fn test_mult_sets_hi_lo() {
        let mut sim = simulator();
        sim.registers.set(9, 0x10000);
        sim.registers.set(10, 0x10000);
        load_words(&mut sim, &[encode("mult", &[9, 10])]);
        sim.run(Some(1));
        assert_eq!(sim.registers.hi(), 1);
        assert_eq!(sim.registers.lo(), 0);
    }

    #[test]
    fn test_loads_and_stores() {
        let mut sim = simulator();
        sim.registers.set(10, 0x1001_0000);
        sim.registers.set(9, -2);
        load_words(
            &mut sim,
            &[
                encode("sw", &[9, 0, 10]),
                encode("lb", &[11, 0, 10]),
                encode("lbu", &[12, 0, 10]),
                encode("lh", &[13, 0, 10]),
                encode("lhu", &[14, 0, 10]),
            ],
        );
        sim.run(Some(5));
        assert_eq!(sim.registers.get(11), -2);
        assert_eq!(sim.registers.get(12), 0xfe);
        assert_eq!(sim.registers.get(13), -2);
        assert_eq!(sim.registers.get(14), 0xfffe);
    }

    #[test]
    fn test_slt_family() {
        let mut sim = simulator();
        sim.registers.set(10, -5);
        sim.registers.set(11, 3);
        load_words(
            &mut sim,
            &[encode("slt", &[9, 10, 11]), encode("sltu", &[12, 10, 11])],
        );
        sim.run(Some(2));
        assert_eq!(sim.registers.get(9), 1);
        // -5 as unsigned is huge.
        assert_eq!(sim.registers.get(12), 0);
    }

    #[test]
    fn test_trap_raises() {
        let mut sim = simulator();
        sim.registers.set(9, 7);
        load_words(&mut sim, &[encode("teqi", &[9, 7])]);
        match sim.run(None) {
            RunResult::Finished(FinishReason::Exception(e)) => {
                assert_eq!(e.cause, ExceptionCause::Trap);
            }
            other => panic!("expected trap, got {other:?}"),
        }
    }

    #[test]
    fn test_fp_single_arithmetic_and_compare() {
        let mut sim = simulator();
        sim.cop1.set_float(1, 1.5);
        sim.cop1.set_float(2, 2.25);
        load_words(
            &mut sim,
            &[encode("add.s", &[0, 1, 2]), encode("c.lt.s", &[1, 2])],
        );
        sim.run(Some(2));
        assert_eq!(sim.cop1.get_float(0), 3.75);
        assert_eq!(sim.cop1.get_condition_flag(0), 1);
    }

    #[test]
    fn test_fp_invalid_conversion_saturates() {
        let mut sim = simulator();
        sim.cop1.set_float(1, 1e20);
        load_words(&mut sim, &[encode("cvt.w.s", &[0, 1])]);
        sim.run(Some(1));
        assert_eq!(sim.cop1.get(0), i32::MAX);
    }

    #[test]
    fn test_jump_and_link() {
        let mut sim = simulator();
        let base = sim.memory.config().text_low;
        load_words(
            &mut sim,
            &[
                encode("jal", &[(base >> 2) as i32 + 3]),
                encode("addu", &[9, 0, 0]),
                encode("addu", &[9, 0, 0]),
                encode("addu", &[10, 0, 0]),
            ],
        );
        sim.run(Some(2));
        // After jal (step 1), PC is at base+12; $ra holds base+4.
        assert_eq!(sim.registers.get(31) as u32, base + 4);
        assert_eq!(sim.registers.get(10), 0);
    }
}
