//! Simulating execution of assembled MIPS32 programs.
//!
//! This module consists of:
//! - [`Simulator`]: the interpreter that fetches, decodes, and executes
//!   assembled statements against the modeled processor state.
//! - [`mem`]: the segmented memory model.
//! - [`registers`]: the general-purpose and coprocessor register files.
//! - [`backstep`]: the reversible log that powers stepping backward.
//! - [`syscall`]: the syscall service handlers.
//! - [`io`]: console and file I/O for syscalls.
//! - [`debug`]: breakpoints.
//! - [`observer`]: lifecycle events and listener channels.
//!
//! The interpreter loop is meant to run on a dedicated worker task
//! ([`Simulator::run_in_thread`]); control requests (pause, stop, external
//! interrupts, queued state changes) are read at the safe point at the top of
//! each step, never mid-instruction.

pub mod backstep;
pub mod debug;
pub mod io;
pub mod mem;
pub mod observer;
pub mod registers;
pub mod syscall;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam_channel as cbc;
use rand::rngs::StdRng;
use rand::SeedableRng;

use self::backstep::BackStepper;
use self::debug::BreakpointList;
use self::io::SystemIO;
use self::mem::{AddressError, Memory, MemoryConfiguration, StatementFetch};
use self::observer::{EventBus, SimulatorEvent};
use self::registers::{Coprocessor0, Coprocessor1, RegisterFile};

/// Run speed meaning "no throttling".
pub const UNLIMITED_SPEED: f64 = f64::INFINITY;

/// MIPS exception cause codes, stored in bits 2..6 of Coprocessor 0's Cause
/// register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCause {
    /// Address error on load or instruction fetch.
    AddressFetch = 4,
    /// Address error on store.
    AddressStore = 5,
    /// Syscall exception (unknown service).
    Syscall = 8,
    /// Breakpoint (`break` instruction).
    Breakpoint = 9,
    /// Reserved or undecodable instruction.
    ReservedInstruction = 10,
    /// Arithmetic overflow.
    ArithmeticOverflow = 12,
    /// Trap instruction condition met.
    Trap = 13,
}

/// A runtime exception raised during simulation, routed through the MIPS
/// exception vector when a handler is installed.
#[derive(Debug, Clone)]
pub struct ProcessorException {
    /// The MIPS cause code.
    pub cause: ExceptionCause,
    /// The faulting address, for address errors.
    pub bad_address: Option<u32>,
    /// Human-readable description.
    pub message: String,
}

impl ProcessorException {
    /// Creates an exception with no associated address.
    pub fn new(cause: ExceptionCause, message: impl Into<String>) -> Self {
        Self { cause, bad_address: None, message: message.into() }
    }
}

impl From<AddressError> for ProcessorException {
    fn from(error: AddressError) -> Self {
        Self {
            cause: if error.is_store {
                ExceptionCause::AddressStore
            } else {
                ExceptionCause::AddressFetch
            },
            bad_address: Some(error.address),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ProcessorException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProcessorException {}

/// Why an instruction's execute function stopped the normal flow.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// A runtime exception to dispatch through the exception vector.
    Exception(ProcessorException),
    /// The program exited via syscall with the given code.
    Exit(i32),
}

impl From<ProcessorException> for Interrupt {
    fn from(exception: ProcessorException) -> Self {
        Interrupt::Exception(exception)
    }
}

impl From<AddressError> for Interrupt {
    fn from(error: AddressError) -> Self {
        Interrupt::Exception(error.into())
    }
}

/// The simulator's lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    /// No program has run yet.
    Idle,
    /// The interpreter loop is executing.
    Running,
    /// Execution paused; it can be resumed.
    Paused,
    /// Execution has terminated.
    Terminated,
}

/// Why a run paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// A breakpoint matched.
    Breakpoint,
    /// The step budget was exhausted.
    StepLimit,
    /// A pause request arrived.
    User,
}

/// Why a run terminated.
#[derive(Debug, Clone)]
pub enum FinishReason {
    /// The program exited via syscall; carries the exit code.
    Exit(i32),
    /// Execution ran past the end of the text segment or jumped to address 0.
    RanOffEnd,
    /// An exception had no handler installed.
    Exception(ProcessorException),
    /// A stop request arrived.
    Stopped,
}

impl FinishReason {
    /// The process exit status this outcome maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            FinishReason::Exit(code) => *code,
            FinishReason::RanOffEnd | FinishReason::Stopped => 0,
            FinishReason::Exception(_) => 1,
        }
    }
}

/// The outcome of a [`Simulator::run`] call.
#[derive(Debug, Clone)]
pub enum RunResult {
    /// The run paused and can be resumed.
    Paused(PauseReason),
    /// The run terminated.
    Finished(FinishReason),
}

/// Cross-thread control handle for a running simulator.
///
/// Requests are read by the worker at the safe point at the top of each step;
/// there is no asynchronous abort of an instruction in flight. Stop and pause
/// are idempotent. The external-interrupt cell holds at most one pending
/// device id; the worker takes and clears it with acquire/release ordering.
#[derive(Debug)]
pub struct SimulatorControl {
    stop: AtomicBool,
    pause: AtomicBool,
    external_interrupt: AtomicI64,
}

const NO_DEVICE: i64 = -1;

impl SimulatorControl {
    fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            pause: AtomicBool::new(false),
            external_interrupt: AtomicI64::new(NO_DEVICE),
        }
    }

    /// Requests a clean termination at the next safe point.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Requests a pause at the next safe point.
    pub fn pause(&self) {
        self.pause.store(true, Ordering::Release);
    }

    /// Flags an external interrupt from a memory-mapped device. The value is
    /// the device's cause bits, typically derived from its control register
    /// address. May be called from any thread.
    pub fn raise_external_interrupt(&self, device: u32) {
        self.external_interrupt.store(i64::from(device), Ordering::Release);
    }

    fn take_stop(&self) -> bool {
        self.stop.swap(false, Ordering::Acquire)
    }

    fn take_pause(&self) -> bool {
        self.pause.swap(false, Ordering::Acquire)
    }

    fn take_external_interrupt(&self) -> Option<u32> {
        let device = self.external_interrupt.swap(NO_DEVICE, Ordering::AcqRel);
        (device != NO_DEVICE).then_some(device as u32)
    }
}

/// Configuration for the interpreter loop.
#[derive(Debug, Clone, Copy)]
pub struct SimulatorOptions {
    /// Whether branches and jumps take effect after a one-instruction delay
    /// slot.
    pub delayed_branching: bool,
    /// Instructions per second, or [`UNLIMITED_SPEED`]. Throttling happens at
    /// the step safe point; at unlimited speed, step events are not
    /// dispatched.
    pub run_speed: f64,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self { delayed_branching: false, run_speed: UNLIMITED_SPEED }
    }
}

/// A deferred mutation of simulator state, applied at the next safe point.
pub type StateChange = Box<dyn FnOnce(&mut Simulator) + Send>;

/// Executes assembled programs against the modeled processor state.
pub struct Simulator {
    /// The address space the program was assembled into.
    pub memory: Memory,
    /// The general-purpose register file.
    pub registers: RegisterFile,
    /// Coprocessor 0 (exception handling).
    pub cop0: Coprocessor0,
    /// Coprocessor 1 (floating point).
    pub cop1: Coprocessor1,
    /// The reversible log of state mutations.
    pub backstep: BackStepper,
    /// Console and file I/O for syscalls.
    pub io: SystemIO,
    /// Breakpoints checked at each step boundary.
    pub breakpoints: BreakpointList,
    /// Event listeners.
    pub events: EventBus,
    /// Loop configuration.
    pub options: SimulatorOptions,

    control: Arc<SimulatorControl>,
    state: SystemState,
    delayed_jump: Option<u32>,
    /// Address of the statement currently executing; used when recording
    /// PC restores and when installing EPC.
    current_pc: u32,
    heap_address: u32,
    rngs: HashMap<i32, StdRng>,
    state_change_tx: cbc::Sender<StateChange>,
    state_change_rx: cbc::Receiver<StateChange>,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("state", &self.state)
            .field("pc", &self.registers.pc())
            .finish_non_exhaustive()
    }
}

impl Simulator {
    /// Creates a simulator over a fresh memory with the given configuration.
    pub fn new(config: MemoryConfiguration, options: SimulatorOptions) -> Self {
        let (state_change_tx, state_change_rx) = cbc::unbounded();
        let registers = RegisterFile::new(&config);
        let heap_address = config.heap_base;
        Self {
            memory: Memory::new(config),
            registers,
            cop0: Coprocessor0::new(),
            cop1: Coprocessor1::new(),
            backstep: BackStepper::new(),
            io: SystemIO::new(),
            breakpoints: BreakpointList::new(),
            events: EventBus::new(),
            options,
            control: Arc::new(SimulatorControl::new()),
            state: SystemState::Idle,
            delayed_jump: None,
            current_pc: 0,
            heap_address,
            rngs: HashMap::new(),
            state_change_tx,
            state_change_rx,
        }
    }

    /// The cross-thread control handle.
    pub fn control(&self) -> Arc<SimulatorControl> {
        Arc::clone(&self.control)
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SystemState {
        self.state
    }

    /// A sender for deferred state changes, applied at the next safe point.
    pub fn state_change_sender(&self) -> cbc::Sender<StateChange> {
        self.state_change_tx.clone()
    }

    /// Resets processor state: registers, coprocessors, the back-step log,
    /// open files, the heap, and the delayed jump. Memory contents are left
    /// to the assembler, which rewrites them.
    pub fn reset(&mut self) {
        let config = self.memory.config().clone();
        self.registers.reset(&config);
        self.cop0.reset();
        self.cop1.reset();
        self.backstep.reset();
        self.io.reset_files();
        self.delayed_jump = None;
        self.heap_address = config.heap_base;
        self.rngs.clear();
        self.state = SystemState::Idle;
    }

    /// Whether the instruction about to execute sits in a delay slot.
    pub fn in_delay_slot(&self) -> bool {
        self.delayed_jump.is_some()
    }

    // ------------------------------------------------------------------
    // State mutation helpers used by instruction semantics. Each records
    // the inverse operation in the back-step log before mutating.
    // ------------------------------------------------------------------

    /// Writes a general-purpose register, recording the undo.
    pub fn update_register(&mut self, register: u8, value: i32) {
        let previous = self.registers.set(register, value);
        if register != 0 {
            self.backstep.add_register_restore(register, previous);
        }
    }

    /// Writes the HI register, recording the undo.
    pub fn update_hi(&mut self, value: i32) {
        let previous = self.registers.set_hi(value);
        self.backstep.add_hi_restore(previous);
    }

    /// Writes the LO register, recording the undo.
    pub fn update_lo(&mut self, value: i32) {
        let previous = self.registers.set_lo(value);
        self.backstep.add_lo_restore(previous);
    }

    /// Writes a coprocessor 0 register, recording the undo.
    pub fn update_cop0(&mut self, register: u8, value: i32) {
        let previous = self.cop0.set(register, value);
        self.backstep.add_coprocessor0_restore(register, previous);
    }

    /// Writes the raw bits of a coprocessor 1 register, recording the undo.
    pub fn update_cop1(&mut self, register: u8, value: i32) {
        let previous = self.cop1.set(register, value);
        self.backstep.add_coprocessor1_restore(register, previous);
    }

    /// Writes a single-precision value to coprocessor 1, recording the undo.
    pub fn update_cop1_float(&mut self, register: u8, value: f32) {
        self.update_cop1(register, value.to_bits() as i32);
    }

    /// Writes a double-precision value to an even/odd coprocessor 1 pair,
    /// recording the undo of both registers.
    pub fn update_cop1_double(&mut self, register: u8, value: f64) -> Result<(), Interrupt> {
        if register % 2 != 0 {
            return Err(Interrupt::Exception(ProcessorException::new(
                ExceptionCause::ReservedInstruction,
                format!("double-precision access requires an even register, got $f{register}"),
            )));
        }
        let bits = value.to_bits() as i64;
        self.update_cop1(register, crate::bits::low_order_long_to_int(bits));
        self.update_cop1(register + 1, crate::bits::high_order_long_to_int(bits));
        Ok(())
    }

    /// Reads a double from coprocessor 1, raising a reserved-instruction
    /// exception for an odd register number.
    pub fn cop1_double(&self, register: u8) -> Result<f64, Interrupt> {
        self.cop1.get_double(register).map_err(|error| {
            Interrupt::Exception(ProcessorException::new(
                ExceptionCause::ReservedInstruction,
                error.to_string(),
            ))
        })
    }

    /// Sets a coprocessor 1 condition flag, recording the undo.
    pub fn set_condition_flag(&mut self, flag: u8) {
        if self.cop1.get_condition_flag(flag) == 0 {
            self.backstep.add_condition_flag_clear(flag);
        }
        self.cop1.set_condition_flag(flag);
    }

    /// Clears a coprocessor 1 condition flag, recording the undo.
    pub fn clear_condition_flag(&mut self, flag: u8) {
        if self.cop1.get_condition_flag(flag) == 1 {
            self.backstep.add_condition_flag_set(flag);
        }
        self.cop1.clear_condition_flag(flag);
    }

    /// Loads a word, converting address errors into exceptions.
    pub fn load_word(&mut self, address: u32) -> Result<i32, Interrupt> {
        Ok(self.memory.get_word(address, true)?)
    }

    /// Loads a halfword (zero-extended), converting address errors.
    pub fn load_halfword(&mut self, address: u32) -> Result<i32, Interrupt> {
        Ok(self.memory.get_halfword(address, true)?)
    }

    /// Loads a byte (zero-extended), converting address errors.
    pub fn load_byte(&mut self, address: u32) -> Result<i32, Interrupt> {
        Ok(self.memory.get_byte(address, true)?)
    }

    /// Stores a word, recording the undo.
    pub fn store_word(&mut self, address: u32, value: i32) -> Result<(), Interrupt> {
        let previous = self.memory.store_word(address, value, true)?;
        self.backstep.add_memory_restore_word(address, previous);
        Ok(())
    }

    /// Stores a halfword, recording the undo.
    pub fn store_halfword(&mut self, address: u32, value: i32) -> Result<(), Interrupt> {
        let previous = self.memory.store_halfword(address, value, true)?;
        self.backstep.add_memory_restore_half(address, previous);
        Ok(())
    }

    /// Stores a byte, recording the undo.
    pub fn store_byte(&mut self, address: u32, value: i32) -> Result<(), Interrupt> {
        let previous = self.memory.store_byte(address, value, true)?;
        self.backstep.add_memory_restore_byte(address, previous);
        Ok(())
    }

    /// Stores a doubleword as two word stores, each recording its undo.
    pub fn store_doubleword(&mut self, address: u32, value: i64) -> Result<(), Interrupt> {
        self.store_word(address, crate::bits::low_order_long_to_int(value))?;
        self.store_word(address + 4, crate::bits::high_order_long_to_int(value))?;
        Ok(())
    }

    /// Schedules a jump to `target`: immediately when delayed branching is
    /// off, after the next instruction when it is on.
    pub fn process_jump(&mut self, target: u32) {
        self.backstep.add_pc_restore(self.current_pc);
        if self.options.delayed_branching {
            self.delayed_jump = Some(target);
        } else {
            self.registers.set_pc(target);
        }
    }

    /// Takes a branch with the given word offset, relative to the address of
    /// the instruction after the branch (the PC has already advanced).
    pub fn process_branch(&mut self, offset: i32) {
        let target = self.registers.pc().wrapping_add((offset as u32) << 2);
        self.process_jump(target);
    }

    /// Writes the return address for a link instruction: the next
    /// instruction, or past the delay slot when delayed branching is on.
    pub fn process_return_address(&mut self, register: u8) {
        let skip = if self.options.delayed_branching { 4 } else { 0 };
        self.update_register(register, (self.registers.pc() + skip) as i32);
    }

    /// Allocates heap memory for `sbrk`, returning the previous break. The
    /// break advances in word-aligned units.
    pub fn allocate_heap(&mut self, bytes: i32) -> u32 {
        let previous = self.heap_address;
        if bytes > 0 {
            self.heap_address = mem::align_to_next(self.heap_address + bytes as u32, 4);
        }
        previous
    }

    /// The random stream for the given id, creating it unseeded on first use.
    pub fn rng(&mut self, id: i32) -> &mut StdRng {
        self.rngs.entry(id).or_insert_with(StdRng::from_entropy)
    }

    /// Seeds (or reseeds) the random stream with the given id.
    pub fn seed_rng(&mut self, id: i32, seed: i32) {
        self.rngs.insert(id, StdRng::seed_from_u64(seed as u64));
    }

    /// Undoes the most recent logical execution step, if any.
    pub fn back_step(&mut self) {
        let Self { backstep, memory, registers, cop0, cop1, .. } = self;
        backstep.back_step(memory, registers, cop0, cop1);
        if self.state == SystemState::Terminated {
            self.state = SystemState::Paused;
        }
    }

    // ------------------------------------------------------------------
    // The interpreter loop.
    // ------------------------------------------------------------------

    /// Runs until termination, a pause request, a breakpoint, or the step
    /// budget (if any) is exhausted.
    ///
    /// A `run` call on a terminated simulator is rejected by returning the
    /// terminated result again; `reset` starts a fresh lifecycle.
    pub fn run(&mut self, max_steps: Option<u64>) -> RunResult {
        if self.state == SystemState::Terminated {
            return RunResult::Finished(FinishReason::Stopped);
        }
        self.state = SystemState::Running;
        self.events.dispatch(SimulatorEvent::Started { pc: self.registers.pc() });

        let mut steps: u64 = 0;
        loop {
            // Safe point: control requests, queued changes, throttling.
            if self.control.take_stop() {
                return self.finish(FinishReason::Stopped);
            }
            if self.control.take_pause() {
                return self.pause(PauseReason::User);
            }
            self.apply_queued_changes();
            if self.options.run_speed != UNLIMITED_SPEED {
                std::thread::sleep(std::time::Duration::from_secs_f64(
                    1.0 / self.options.run_speed,
                ));
            }

            if let Err(reason) = self.step_once() {
                return self.finish(reason);
            }
            steps += 1;

            if self.options.run_speed != UNLIMITED_SPEED {
                self.events.dispatch(SimulatorEvent::Stepped);
            }

            if self.breakpoints.values().any(|bp| bp.check(self)) {
                return self.pause(PauseReason::Breakpoint);
            }
            if max_steps.is_some_and(|max| steps >= max) {
                return self.pause(PauseReason::StepLimit);
            }
        }
    }

    /// Executes exactly one instruction (or dispatches one pending external
    /// interrupt). Convenience for steppers and tests.
    pub fn step(&mut self) -> RunResult {
        self.run(Some(1))
    }

    /// Moves the simulator and the run onto a dedicated worker thread,
    /// returning the join handle. The caller keeps the control handle and any
    /// deferred event receivers.
    pub fn run_in_thread(
        mut self,
        max_steps: Option<u64>,
    ) -> std::thread::JoinHandle<(Simulator, RunResult)> {
        std::thread::spawn(move || {
            let result = self.run(max_steps);
            (self, result)
        })
    }

    fn pause(&mut self, reason: PauseReason) -> RunResult {
        self.state = SystemState::Paused;
        self.events.dispatch(SimulatorEvent::Paused { pc: self.registers.pc(), reason });
        RunResult::Paused(reason)
    }

    fn finish(&mut self, reason: FinishReason) -> RunResult {
        self.state = SystemState::Terminated;
        self.events
            .dispatch(SimulatorEvent::Finished { pc: self.registers.pc(), reason: reason.clone() });
        RunResult::Finished(reason)
    }

    fn apply_queued_changes(&mut self) {
        while let Ok(change) = self.state_change_rx.try_recv() {
            change(self);
        }
    }

    /// One execution step: external-interrupt dispatch, fetch, delayed-branch
    /// handling, execute, and PC update.
    fn step_once(&mut self) -> Result<(), FinishReason> {
        // 1. Pending external interrupt takes priority over the next fetch.
        if let Some(device) = self.control.take_external_interrupt() {
            let pc = self.registers.pc();
            self.cop0.set(registers::CAUSE, device as i32);
            self.cop0.set_exception_level(true);
            self.cop0.set(registers::EPC, pc as i32);
            self.delayed_jump = None;
            self.registers.set_pc(self.memory.config().exception_handler);
            return Ok(());
        }

        // 2. Fetch.
        let pc = self.registers.pc();
        self.current_pc = pc;
        let statement = match self.memory.fetch_statement(pc, true) {
            Ok(StatementFetch::Statement(statement)) => statement,
            Ok(StatementFetch::Empty) => {
                // Reached the end of assembled text: normal termination.
                return Err(FinishReason::RanOffEnd);
            }
            Ok(StatementFetch::Undecodable(word)) => {
                let exception = ProcessorException::new(
                    ExceptionCause::ReservedInstruction,
                    format!("undecodable instruction word 0x{word:08x} at 0x{pc:08x}"),
                );
                return self.raise_or_finish(exception, pc);
            }
            Err(error) => {
                let exception: ProcessorException = error.into();
                return self.raise_or_finish(exception, pc);
            }
        };

        // 3. Delayed-branch bookkeeping: a jump scheduled by the previous
        // instruction fires after this one (the delay slot) executes.
        let pending_jump = self.delayed_jump.take();
        self.backstep.set_context(pc, Some(Arc::clone(&statement)), pending_jump.is_some());
        self.registers.increment_pc();

        // 4. Execute.
        let outcome = (statement.instruction.execute)(self, &statement);

        // 5. Deferred state changes requested by observers.
        self.apply_queued_changes();

        match outcome {
            Ok(()) => {
                // Ensure even effect-free instructions consume one back-step.
                self.backstep.add_do_nothing(pc);
            }
            Err(Interrupt::Exit(code)) => return Err(FinishReason::Exit(code)),
            Err(Interrupt::Exception(exception)) => {
                // The scheduled jump is abandoned; the handler owns the PC.
                return self.raise_or_finish(exception, pc);
            }
        }

        // 6. A jump scheduled before this (delay slot) instruction now fires.
        if let Some(target) = pending_jump {
            self.registers.set_pc(target);
        }
        if self.registers.pc() == 0 {
            // Convention: returning to address 0 ends the program.
            return Err(FinishReason::RanOffEnd);
        }
        Ok(())
    }

    fn raise_or_finish(
        &mut self,
        exception: ProcessorException,
        faulting_pc: u32,
    ) -> Result<(), FinishReason> {
        match self.dispatch_exception(exception.clone(), faulting_pc) {
            true => Ok(()),
            false => Err(FinishReason::Exception(exception)),
        }
    }

    /// Installs an exception into Coprocessor 0 and redirects to the
    /// exception vector. Returns false when no handler is installed there.
    fn dispatch_exception(&mut self, exception: ProcessorException, faulting_pc: u32) -> bool {
        self.cop0.set_exception_level(true);
        let cause = (self.cop0.get(registers::CAUSE) & !0x7c) | ((exception.cause as i32) << 2);
        self.cop0.set(registers::CAUSE, cause);
        self.cop0.set(registers::EPC, faulting_pc as i32);
        if let Some(address) = exception.bad_address {
            self.cop0.set(registers::BAD_V_ADDR, address as i32);
        }
        self.delayed_jump = None;

        let handler = self.memory.config().exception_handler;
        let installed = matches!(
            self.memory.fetch_statement(handler, false),
            Ok(StatementFetch::Statement(_))
        );
        if installed {
            self.registers.set_pc(handler);
        }
        installed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_flags_are_single_shot() {
        let control = SimulatorControl::new();
        control.stop();
        assert!(control.take_stop());
        assert!(!control.take_stop());

        control.raise_external_interrupt(0xffff_0000);
        assert_eq!(control.take_external_interrupt(), Some(0xffff_0000));
        assert_eq!(control.take_external_interrupt(), None);
    }

    #[test]
    fn test_heap_allocation_is_word_aligned() {
        let mut sim = Simulator::new(MemoryConfiguration::default_layout(), Default::default());
        let base = sim.memory.config().heap_base;
        assert_eq!(sim.allocate_heap(3), base);
        assert_eq!(sim.allocate_heap(4), base + 4);
        assert_eq!(sim.allocate_heap(0), base + 8);
    }

    #[test]
    fn test_update_register_is_reversible() {
        let mut sim = Simulator::new(MemoryConfiguration::default_layout(), Default::default());
        let statement = Arc::new(
            crate::isa::InstructionSet::global()
                .decode_statement(0x014b_4820, 0x0040_0000)
                .unwrap(),
        );
        sim.backstep.set_context(0x0040_0000, Some(statement), false);
        sim.registers.set(9, 5);
        sim.update_register(9, 42);
        assert_eq!(sim.registers.get(9), 42);
        sim.back_step();
        assert_eq!(sim.registers.get(9), 5);
    }

    #[test]
    fn test_run_on_empty_program_ends_cleanly() {
        let mut sim = Simulator::new(MemoryConfiguration::default_layout(), Default::default());
        match sim.run(None) {
            RunResult::Finished(FinishReason::RanOffEnd) => {}
            other => panic!("expected clean end, got {other:?}"),
        }
        assert_eq!(sim.state(), SystemState::Terminated);
    }

    #[test]
    fn test_stop_request_terminates() {
        let mut sim = Simulator::new(MemoryConfiguration::default_layout(), Default::default());
        sim.control().stop();
        match sim.run(None) {
            RunResult::Finished(FinishReason::Stopped) => {}
            other => panic!("expected stop, got {other:?}"),
        }
        // A second stop on a terminated simulator is ignored.
        sim.control().stop();
        match sim.run(None) {
            RunResult::Finished(FinishReason::Stopped) => {}
            other => panic!("expected stop, got {other:?}"),
        }
    }

    // ------------------------------------------------------------------
    // End-to-end programs: assemble source, then run it.
    // ------------------------------------------------------------------

    fn assemble_into_simulator(source: &str, delayed_branching: bool) -> Simulator {
        use crate::asm::{self, AssemblerFlags};
        use crate::err::ErrorList;
        use crate::parse::tokenize_source;

        let mut errors = ErrorList::new();
        let file = tokenize_source("test.asm", source, &mut errors);
        assert!(!errors.errors_occurred(), "tokenize failed: {errors}");

        let options = SimulatorOptions { delayed_branching, ..Default::default() };
        let mut sim = Simulator::new(MemoryConfiguration::default_layout(), options);
        sim.io = io::SystemIO::with_input("");
        let flags = AssemblerFlags { delayed_branching, ..Default::default() };
        let program = asm::assemble(&[file], &mut sim.memory, flags)
            .unwrap_or_else(|errors| panic!("assembly failed: {errors}"));
        sim.registers.set_pc(program.entry_point);
        sim
    }

    #[test]
    fn test_hello_program_prints_and_exits() {
        let source = "
        .data
msg:    .asciiz \"hi\"
        .text
main:   li $v0, 4
        la $a0, msg
        syscall
        li $v0, 10
        syscall
";
        let mut sim = assemble_into_simulator(source, false);
        assert_eq!(sim.memory.get_byte(0x1001_0000, false).unwrap(), 0x68);
        assert_eq!(sim.memory.get_byte(0x1001_0001, false).unwrap(), 0x69);
        assert_eq!(sim.memory.get_byte(0x1001_0002, false).unwrap(), 0x00);

        match sim.run(None) {
            RunResult::Finished(FinishReason::Exit(0)) => {}
            other => panic!("expected clean exit, got {other:?}"),
        }
        assert_eq!(sim.io.captured_output().unwrap(), b"hi");
    }

    #[test]
    fn test_overflow_without_handler_terminates_with_faulting_pc() {
        let source = "
        .text
main:   addi $t0, $zero, 0x7fffffff
        addi $t0, $t0, 1
        teqi $t0, 0
";
        let mut sim = assemble_into_simulator(source, false);
        // The 32-bit li-style first addi expands to three words, so the
        // faulting second addi sits at +12.
        match sim.run(None) {
            RunResult::Finished(FinishReason::Exception(e)) => {
                assert_eq!(e.cause, ExceptionCause::ArithmeticOverflow);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
        assert_eq!(sim.cop0.get(registers::EPC) as u32, 0x0040_000c);
        assert_eq!(sim.cop0.get(registers::CAUSE) >> 2 & 0x1f, 12);
        assert!(sim.cop0.in_exception_level());
    }

    #[test]
    fn test_overflow_with_handler_resumes_past_fault() {
        let source = "
        .text
main:   addi $t0, $zero, 0x7fffffff
        addi $t0, $t0, 1
        teqi $t0, 0

        .ktext 0x80000180
        mfc0 $k0, $14
        addi $k0, $k0, 4
        mtc0 $k0, $14
        eret
";
        let mut sim = assemble_into_simulator(source, false);
        match sim.run(None) {
            // The handler skips the faulting addi; teqi's condition is false
            // ($t0 is still i32::MAX), and execution runs off the end.
            RunResult::Finished(FinishReason::RanOffEnd) => {}
            other => panic!("expected clean end, got {other:?}"),
        }
        assert_eq!(sim.registers.get(8), i32::MAX);
        assert!(!sim.cop0.in_exception_level());
    }

    #[test]
    fn test_delayed_branching_executes_delay_slot() {
        let source = "
        .text
main:   li $t0, 1
        beq $t0, $t0, skip
        addi $t0, $t0, 9
skip:   teqi $t0, -1
";
        // With delayed branching off, the addi is skipped.
        let mut sim = assemble_into_simulator(source, false);
        sim.run(None);
        assert_eq!(sim.registers.get(8), 1);

        // With delayed branching on, the addi executes in the delay slot.
        let mut sim = assemble_into_simulator(source, true);
        sim.run(None);
        assert_eq!(sim.registers.get(8), 10);
    }

    #[test]
    fn test_back_step_collapses_multi_effect_instructions() {
        let source = "
        .text
main:   li $t0, 3
        li $t1, 5
        mult $t0, $t1
        mflo $t2
";
        let mut sim = assemble_into_simulator(source, false);
        sim.run(Some(4));
        assert_eq!(sim.registers.get(10), 15);
        assert_eq!(sim.registers.lo(), 15);

        // One back-step reverses only the mflo write...
        sim.back_step();
        assert_eq!(sim.registers.get(10), 0);
        assert_eq!(sim.registers.lo(), 15);

        // ...and the next reverses HI and LO together.
        sim.back_step();
        assert_eq!(sim.registers.lo(), 0);
        assert_eq!(sim.registers.hi(), 0);
    }

    #[test]
    fn test_back_step_restores_initial_state() {
        let source = "
        .text
main:   li $t0, 7
        addi $t0, $t0, 1
        sw $t0, 0($gp)
";
        let mut sim = assemble_into_simulator(source, false);
        let gp = sim.registers.get(registers::GP) as u32;
        sim.run(Some(3));
        assert_eq!(sim.memory.get_word(gp, false).unwrap(), 8);

        sim.back_step();
        assert_eq!(sim.memory.get_word(gp, false).unwrap(), 0);
        sim.back_step();
        sim.back_step();
        assert_eq!(sim.registers.get(8), 0);
        assert_eq!(sim.registers.pc(), 0x0040_0000);
    }

    #[test]
    fn test_self_modifying_write_is_refetched() {
        let source = "
        .text
main:   nop
        nop
";
        let mut sim = assemble_into_simulator(source, false);
        sim.memory.set_self_modifying_code(true);

        // Overwrite the second nop with `ori $9, $0, 7`.
        let ori = crate::isa::InstructionSet::global()
            .match_mnemonic("ori")
            .into_iter()
            .find_map(|i| match i {
                crate::isa::Instruction::Basic(b) if b.operand_types.len() == 3 => {
                    Some(b.encoding.encode(&[9, 0, 7]))
                }
                _ => None,
            })
            .unwrap();
        sim.memory.store_word(0x0040_0004, ori as i32, false).unwrap();

        sim.run(Some(2));
        assert_eq!(sim.registers.get(9), 7);
    }

    #[test]
    fn test_breakpoint_pauses_before_target_executes() {
        let source = "
        .text
main:   li $t0, 1
        li $t1, 2
        li $t2, 3
";
        let mut sim = assemble_into_simulator(source, false);
        sim.breakpoints.add(debug::Breakpoint::Pc(0x0040_0008));

        match sim.run(None) {
            RunResult::Paused(PauseReason::Breakpoint) => {}
            other => panic!("expected breakpoint pause, got {other:?}"),
        }
        assert_eq!(sim.registers.get(9), 2);
        assert_eq!(sim.registers.get(10), 0);

        // Resuming executes the instruction at the breakpoint.
        sim.run(Some(1));
        assert_eq!(sim.registers.get(10), 3);
    }

    #[test]
    fn test_external_interrupt_redirects_to_handler() {
        let source = "
        .text
main:   li $t0, 1
        li $t0, 2
        .ktext 0x80000180
        li $t1, 99
";
        let mut sim = assemble_into_simulator(source, false);
        sim.control().raise_external_interrupt(0xffff_0000);
        sim.run(Some(2));

        // Step one dispatched the interrupt; step two executed the handler's
        // first instruction.
        assert_eq!(sim.registers.get(9), 99);
        assert_eq!(sim.cop0.get(registers::CAUSE) as u32, 0xffff_0000);
        assert!(sim.cop0.in_exception_level());
        assert_eq!(sim.cop0.get(registers::EPC) as u32, 0x0040_0000);
    }
}
