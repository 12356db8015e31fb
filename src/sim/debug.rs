//! Breakpoints for the simulator.
//!
//! The key type here is [`Breakpoint`], which can be added to the
//! [`Simulator`]'s breakpoint list to pause a run. Breakpoints are stored in
//! a slotmap so each one gets a stable key that can later remove it.

use slotmap::{new_key_type, SlotMap};

use super::Simulator;

new_key_type! {
    /// Key identifying a breakpoint in a [`BreakpointList`].
    pub struct BreakpointKey;
}

/// A comparison a register or memory breakpoint applies to the watched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    #[allow(missing_docs)]
    Equal(i32),
    #[allow(missing_docs)]
    NotEqual(i32),
    #[allow(missing_docs)]
    LessThan(i32),
    #[allow(missing_docs)]
    GreaterThan(i32),
}

impl Comparator {
    /// Checks the watched value against this comparison.
    pub fn check(self, value: i32) -> bool {
        match self {
            Comparator::Equal(expected) => value == expected,
            Comparator::NotEqual(expected) => value != expected,
            Comparator::LessThan(bound) => value < bound,
            Comparator::GreaterThan(bound) => value > bound,
        }
    }
}

type BreakpointFn = Box<dyn Fn(&Simulator) -> bool + Send + Sync>;

/// Conditions that pause the simulator when they match at a step boundary.
pub enum Breakpoint {
    /// Break when the PC reaches the given address.
    Pc(u32),
    /// Break when the given register's value satisfies the comparator.
    Register {
        /// Register to watch.
        register: u8,
        /// Condition on its value.
        value: Comparator,
    },
    /// Break when the word at the given address satisfies the comparator.
    Memory {
        /// Word-aligned address to watch.
        address: u32,
        /// Condition on the stored word.
        value: Comparator,
    },
    /// Break when an arbitrary predicate over the simulator state holds.
    Generic(BreakpointFn),
}

impl Breakpoint {
    /// Creates a breakpoint out of a function.
    pub fn generic(f: impl Fn(&Simulator) -> bool + Send + Sync + 'static) -> Self {
        Breakpoint::Generic(Box::new(f))
    }

    /// Whether the breakpoint matches the current simulator state.
    pub fn check(&self, sim: &Simulator) -> bool {
        match self {
            Breakpoint::Pc(address) => sim.registers.pc() == *address,
            Breakpoint::Register { register, value } => value.check(sim.registers.get(*register)),
            // Peek at backing memory directly so the check cannot trigger a
            // memory-mapped device.
            Breakpoint::Memory { address, value } => {
                value.check(sim.memory.word_if_present(*address).unwrap_or(0))
            }
            Breakpoint::Generic(predicate) => predicate(sim),
        }
    }
}

impl std::fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Breakpoint::Pc(address) => write!(f, "Breakpoint(PC == 0x{address:08x})"),
            Breakpoint::Register { register, value } => {
                write!(f, "Breakpoint(${register} {value:?})")
            }
            Breakpoint::Memory { address, value } => {
                write!(f, "Breakpoint(mem[0x{address:08x}] {value:?})")
            }
            Breakpoint::Generic(_) => f.write_str("Breakpoint(generic)"),
        }
    }
}

/// The simulator's collection of breakpoints.
#[derive(Debug, Default)]
pub struct BreakpointList {
    breakpoints: SlotMap<BreakpointKey, Breakpoint>,
}

impl BreakpointList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a breakpoint, returning the key that removes it.
    pub fn add(&mut self, breakpoint: Breakpoint) -> BreakpointKey {
        self.breakpoints.insert(breakpoint)
    }

    /// Removes a breakpoint by key, returning it if present.
    pub fn remove(&mut self, key: BreakpointKey) -> Option<Breakpoint> {
        self.breakpoints.remove(key)
    }

    /// Removes every breakpoint.
    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }

    /// Number of registered breakpoints.
    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    /// Whether no breakpoints are registered.
    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// Iterates over the registered breakpoints.
    pub fn values(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparators() {
        assert!(Comparator::Equal(4).check(4));
        assert!(!Comparator::Equal(4).check(5));
        assert!(Comparator::NotEqual(4).check(5));
        assert!(Comparator::LessThan(4).check(3));
        assert!(Comparator::GreaterThan(4).check(5));
    }

    #[test]
    fn test_list_keys_remove() {
        let mut list = BreakpointList::new();
        let key = list.add(Breakpoint::Pc(0x0040_0000));
        list.add(Breakpoint::Pc(0x0040_0008));
        assert_eq!(list.len(), 2);
        assert!(list.remove(key).is_some());
        assert_eq!(list.len(), 1);
        assert!(list.remove(key).is_none());
    }
}
