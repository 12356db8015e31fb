//! Stepping backward through execution, undoing one instruction at a time.
//!
//! Every observable state mutation the simulator performs first records its
//! inverse here. The records live in a fixed-capacity circular stack of
//! preallocated entries: pushing never allocates, and once the stack is full
//! the oldest entry is silently overwritten.
//!
//! One executed instruction may have recorded several entries (`div` writes
//! both HI and LO). Entries produced by the same statement share its
//! [`BasicStatement`] reference, and a single [`BackStepper::back_step`] call
//! pops and applies inverses until that reference changes, so multi-effect
//! instructions reverse as one logical step.

use std::sync::Arc;

use crate::isa::BasicStatement;
use crate::sim::mem::Memory;
use crate::sim::registers::{Coprocessor0, Coprocessor1, RegisterFile};

/// Capacity of the back-step stack.
pub const MAXIMUM_BACKSTEPS: usize = 2000;

/// The kinds of inverse operations a back-step entry can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Action {
    MemoryRestoreWord,
    MemoryRestoreHalf,
    MemoryRestoreByte,
    RegisterRestore,
    PcRestore,
    HiRestore,
    LoRestore,
    Coprocessor0Restore,
    Coprocessor1Restore,
    Coprocessor1ConditionSet,
    Coprocessor1ConditionClear,
    #[default]
    DoNothing,
}

/// One recorded inverse operation.
#[derive(Debug, Clone, Default)]
struct BackStep {
    action: Action,
    /// PC at the time of the original action, restored on undo.
    program_counter: Option<u32>,
    param1: u32,
    param2: i32,
    /// The statement whose effect this entry undoes. Entries sharing a
    /// statement reference are popped together.
    statement: Option<Arc<BasicStatement>>,
    in_delay_slot: bool,
}

fn same_statement(a: &Option<Arc<BasicStatement>>, b: &Option<Arc<BasicStatement>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// The bounded, reversible log of state mutations.
#[derive(Debug)]
pub struct BackStepper {
    enabled: bool,
    stack: Vec<BackStep>,
    size: usize,
    top: usize,
    /// Context captured at the top of each simulator step: the PC and
    /// statement about to execute, and whether it sits in a delay slot.
    context_pc: u32,
    context_statement: Option<Arc<BasicStatement>>,
    context_in_delay_slot: bool,
}

impl BackStepper {
    /// Creates an enabled back-stepper with all records preallocated.
    pub fn new() -> Self {
        Self {
            enabled: true,
            stack: vec![BackStep::default(); MAXIMUM_BACKSTEPS],
            size: 0,
            top: 0,
            context_pc: 0,
            context_statement: None,
            context_in_delay_slot: false,
        }
    }

    /// Discards all recorded steps.
    pub fn reset(&mut self) {
        self.size = 0;
        self.top = 0;
    }

    /// Whether undo steps are currently being recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Starts or stops recording of undo steps.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether there is nothing to undo.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether the next back-step would undo an instruction that executed in
    /// a delay slot.
    pub fn is_in_delay_slot(&self) -> bool {
        self.size > 0 && self.stack[self.top].in_delay_slot
    }

    /// Captures the statement about to execute. All records pushed until the
    /// next call are attributed to it.
    pub fn set_context(
        &mut self,
        pc: u32,
        statement: Option<Arc<BasicStatement>>,
        in_delay_slot: bool,
    ) {
        self.context_pc = pc;
        self.context_statement = statement;
        self.context_in_delay_slot = in_delay_slot;
    }

    fn push(&mut self, action: Action, program_counter: Option<u32>, param1: u32, param2: i32) {
        if !self.enabled {
            return;
        }
        if self.size == 0 {
            self.top = 0;
            self.size = 1;
        } else if self.size < MAXIMUM_BACKSTEPS {
            self.top = (self.top + 1) % MAXIMUM_BACKSTEPS;
            self.size += 1;
        } else {
            // Full: the new entry replaces the oldest one.
            self.top = (self.top + 1) % MAXIMUM_BACKSTEPS;
        }
        // Overwrite the preallocated record in place.
        let record = &mut self.stack[self.top];
        record.action = action;
        record.program_counter = program_counter;
        record.param1 = param1;
        record.param2 = param2;
        record.statement = self.context_statement.clone();
        record.in_delay_slot = self.context_in_delay_slot;
    }

    fn pop(&mut self) -> BackStep {
        debug_assert!(self.size > 0);
        let record = self.stack[self.top].clone();
        if self.size > 1 {
            self.top = (self.top + MAXIMUM_BACKSTEPS - 1) % MAXIMUM_BACKSTEPS;
        }
        self.size -= 1;
        record
    }

    /// Records that undoing the current statement restores `value` to the
    /// memory word at `address`.
    pub fn add_memory_restore_word(&mut self, address: u32, value: i32) {
        self.push(Action::MemoryRestoreWord, Some(self.context_pc), address, value);
    }

    /// Records a halfword restore.
    pub fn add_memory_restore_half(&mut self, address: u32, value: i32) {
        self.push(Action::MemoryRestoreHalf, Some(self.context_pc), address, value);
    }

    /// Records a byte restore.
    pub fn add_memory_restore_byte(&mut self, address: u32, value: i32) {
        self.push(Action::MemoryRestoreByte, Some(self.context_pc), address, value);
    }

    /// Records a general-purpose register restore.
    pub fn add_register_restore(&mut self, register: u8, value: i32) {
        self.push(Action::RegisterRestore, Some(self.context_pc), u32::from(register), value);
    }

    /// Records a PC restore (for jumps and branches).
    pub fn add_pc_restore(&mut self, value: u32) {
        self.push(Action::PcRestore, Some(value), value, 0);
    }

    /// Records a HI register restore.
    pub fn add_hi_restore(&mut self, value: i32) {
        self.push(Action::HiRestore, Some(self.context_pc), 0, value);
    }

    /// Records a LO register restore.
    pub fn add_lo_restore(&mut self, value: i32) {
        self.push(Action::LoRestore, Some(self.context_pc), 0, value);
    }

    /// Records a coprocessor 0 register restore.
    pub fn add_coprocessor0_restore(&mut self, register: u8, value: i32) {
        self.push(Action::Coprocessor0Restore, Some(self.context_pc), u32::from(register), value);
    }

    /// Records a coprocessor 1 register restore.
    pub fn add_coprocessor1_restore(&mut self, register: u8, value: i32) {
        self.push(Action::Coprocessor1Restore, Some(self.context_pc), u32::from(register), value);
    }

    /// Records that undo must set condition flag `flag`.
    pub fn add_condition_flag_set(&mut self, flag: u8) {
        self.push(Action::Coprocessor1ConditionSet, Some(self.context_pc), u32::from(flag), 0);
    }

    /// Records that undo must clear condition flag `flag`.
    pub fn add_condition_flag_clear(&mut self, flag: u8) {
        self.push(Action::Coprocessor1ConditionClear, Some(self.context_pc), u32::from(flag), 0);
    }

    /// Records a placeholder so instructions with no state effect (like `nop`)
    /// still consume one back-step. Skipped if the top record already belongs
    /// to this PC.
    pub fn add_do_nothing(&mut self, program_counter: u32) {
        if self.is_empty() || self.stack[self.top].program_counter != Some(program_counter) {
            self.push(Action::DoNothing, Some(program_counter), 0, 0);
        }
    }

    /// Undoes the most recent logical step.
    ///
    /// Pops records and applies their inverses while they share the top
    /// record's statement reference, so an instruction that touched several
    /// pieces of state reverses atomically. No-op when disabled or empty.
    pub fn back_step(
        &mut self,
        memory: &mut Memory,
        registers: &mut RegisterFile,
        cop0: &mut Coprocessor0,
        cop1: &mut Coprocessor1,
    ) {
        if !self.enabled || self.is_empty() {
            return;
        }
        let statement = self.stack[self.top].statement.clone();
        // Applying inverses must not record new undo actions.
        self.enabled = false;
        loop {
            let step = self.pop();
            if let Some(pc) = step.program_counter {
                registers.set_pc(pc);
            }
            // The original action succeeded, so the inverse cannot fault.
            let applied = match step.action {
                Action::MemoryRestoreWord => {
                    memory.store_word(step.param1, step.param2, true).map(|_| ())
                }
                Action::MemoryRestoreHalf => {
                    memory.store_halfword(step.param1, step.param2, true).map(|_| ())
                }
                Action::MemoryRestoreByte => {
                    memory.store_byte(step.param1, step.param2, true).map(|_| ())
                }
                Action::RegisterRestore => {
                    registers.set(step.param1 as u8, step.param2);
                    Ok(())
                }
                Action::PcRestore => {
                    registers.set_pc(step.param1);
                    Ok(())
                }
                Action::HiRestore => {
                    registers.set_hi(step.param2);
                    Ok(())
                }
                Action::LoRestore => {
                    registers.set_lo(step.param2);
                    Ok(())
                }
                Action::Coprocessor0Restore => {
                    cop0.set(step.param1 as u8, step.param2);
                    Ok(())
                }
                Action::Coprocessor1Restore => {
                    cop1.set(step.param1 as u8, step.param2);
                    Ok(())
                }
                Action::Coprocessor1ConditionSet => {
                    cop1.set_condition_flag(step.param1 as u8);
                    Ok(())
                }
                Action::Coprocessor1ConditionClear => {
                    cop1.clear_condition_flag(step.param1 as u8);
                    Ok(())
                }
                Action::DoNothing => Ok(()),
            };
            if let Err(error) = applied {
                panic!("accessed invalid memory address while backstepping: {error}");
            }
            if self.is_empty() || !same_statement(&self.stack[self.top].statement, &statement) {
                break;
            }
        }
        self.enabled = true;
    }
}

impl Default for BackStepper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::InstructionSet;
    use crate::sim::mem::MemoryConfiguration;

    fn machine() -> (Memory, RegisterFile, Coprocessor0, Coprocessor1) {
        let config = MemoryConfiguration::default_layout();
        (Memory::new(config.clone()), RegisterFile::new(&config), Coprocessor0::new(), Coprocessor1::new())
    }

    fn statement(word: u32) -> Arc<BasicStatement> {
        Arc::new(InstructionSet::global().decode_statement(word, 0x0040_0000).unwrap())
    }

    #[test]
    fn test_empty_back_step_is_noop() {
        let (mut mem, mut regs, mut cop0, mut cop1) = machine();
        let mut stepper = BackStepper::new();
        stepper.back_step(&mut mem, &mut regs, &mut cop0, &mut cop1);
    }

    #[test]
    fn test_register_restore() {
        let (mut mem, mut regs, mut cop0, mut cop1) = machine();
        let mut stepper = BackStepper::new();

        // add $9,$10,$11 overwrites $9.
        stepper.set_context(0x0040_0000, Some(statement(0x014b_4820)), false);
        regs.set(9, 5);
        stepper.add_register_restore(9, 5);
        regs.set(9, 99);

        stepper.back_step(&mut mem, &mut regs, &mut cop0, &mut cop1);
        assert_eq!(regs.get(9), 5);
        assert_eq!(regs.pc(), 0x0040_0000);
        assert!(stepper.is_empty());
    }

    #[test]
    fn test_multi_effect_collapses_to_one_step() {
        let (mut mem, mut regs, mut cop0, mut cop1) = machine();
        let mut stepper = BackStepper::new();

        // mult $9,$10 writes HI and LO; both records share the statement.
        let mult = statement(0x012a_0018);
        stepper.set_context(0x0040_0000, Some(mult), false);
        stepper.add_hi_restore(1);
        stepper.add_lo_restore(2);
        regs.set_hi(77);
        regs.set_lo(88);

        // A later, unrelated statement.
        stepper.set_context(0x0040_0004, Some(statement(0x014b_4820)), false);
        stepper.add_register_restore(9, 3);
        regs.set(9, 4);

        stepper.back_step(&mut mem, &mut regs, &mut cop0, &mut cop1);
        assert_eq!(regs.get(9), 3);
        // HI/LO untouched so far.
        assert_eq!(regs.hi(), 77);

        stepper.back_step(&mut mem, &mut regs, &mut cop0, &mut cop1);
        assert_eq!(regs.hi(), 1);
        assert_eq!(regs.lo(), 2);
        assert!(stepper.is_empty());
    }

    #[test]
    fn test_disabled_records_nothing() {
        let (mut mem, mut regs, mut cop0, mut cop1) = machine();
        let mut stepper = BackStepper::new();
        stepper.set_enabled(false);
        stepper.add_register_restore(9, 5);
        assert!(stepper.is_empty());
        stepper.back_step(&mut mem, &mut regs, &mut cop0, &mut cop1);
    }

    #[test]
    fn test_capacity_wraps() {
        let (mut mem, mut regs, mut cop0, mut cop1) = machine();
        let mut stepper = BackStepper::new();
        let stmt = statement(0x014b_4820);
        for i in 0..(MAXIMUM_BACKSTEPS + 10) {
            // Distinct statement references, so each record is its own step.
            let own = Arc::new((*stmt).clone());
            stepper.set_context(0x0040_0000 + 4 * i as u32, Some(own), false);
            stepper.add_register_restore(9, i as i32);
        }
        // Still bounded and still usable.
        stepper.back_step(&mut mem, &mut regs, &mut cop0, &mut cop1);
        assert_eq!(regs.get(9), (MAXIMUM_BACKSTEPS + 9) as i32);
    }

    #[test]
    fn test_memory_restore() {
        let (mut mem, mut regs, mut cop0, mut cop1) = machine();
        let mut stepper = BackStepper::new();
        mem.store_word(0x1001_0000, 11, false).unwrap();

        stepper.set_context(0x0040_0000, Some(statement(0x014b_4820)), false);
        let old = mem.store_word(0x1001_0000, 22, false).unwrap();
        stepper.add_memory_restore_word(0x1001_0000, old);

        stepper.back_step(&mut mem, &mut regs, &mut cop0, &mut cop1);
        assert_eq!(mem.get_word(0x1001_0000, false).unwrap(), 11);
    }
}
