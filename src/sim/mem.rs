//! Memory handling for the MIPS32 simulator.
//!
//! This module consists of:
//! - [`Memory`]: the segmented, sparsely-backed 32-bit address space.
//! - [`MemoryConfiguration`]: the named segment layouts (default, compact).
//! - [`MmioDevice`]: the interface memory-mapped devices implement.
//! - [`ChangeObserver`]: a tracker of addresses written since last cleared.
//!
//! Words are aligned on 4-byte boundaries and halfwords on 2-byte boundaries.
//! Endianness is configurable and defaults to little-endian. The text segments
//! additionally cache the assembled [`BasicStatement`] at each word address so
//! an instruction fetch returns both the machine word and its high-level form.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::isa::{BasicStatement, InstructionSet};

const PAGE_SIZE: usize = 4096;

/// A named memory layout: the five segment ranges plus the heap, stack,
/// global pointer, MMIO range, and exception handler address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfiguration {
    /// Short identifier used by the CLI (`default`, `compact`).
    pub identifier: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Lowest address of the user text segment; also the initial PC.
    pub text_low: u32,
    /// Highest address of the user text segment.
    pub text_high: u32,
    /// Lowest address of the user data segment.
    pub data_low: u32,
    /// Highest address of the user data segment.
    pub data_high: u32,
    /// Lowest address of the kernel text segment.
    pub ktext_low: u32,
    /// Highest address of the kernel text segment.
    pub ktext_high: u32,
    /// Lowest address of the kernel data segment.
    pub kdata_low: u32,
    /// Highest address of the kernel data segment.
    pub kdata_high: u32,
    /// Lowest address of the `.extern` segment.
    pub extern_low: u32,
    /// Highest address of the `.extern` segment.
    pub extern_high: u32,
    /// Lowest address of the combined user data range (extern through stack).
    pub data_range_low: u32,
    /// Highest address of the combined user data range.
    pub data_range_high: u32,
    /// First address handed out by the `sbrk` heap.
    pub heap_base: u32,
    /// Initial value of `$sp`.
    pub stack_pointer: u32,
    /// Initial value of `$gp`.
    pub global_pointer: u32,
    /// Lowest memory-mapped I/O address.
    pub mmio_low: u32,
    /// Highest memory-mapped I/O address.
    pub mmio_high: u32,
    /// Address of the exception handler entry in kernel text.
    pub exception_handler: u32,
}

impl MemoryConfiguration {
    /// The default 32-bit memory layout.
    pub fn default_layout() -> Self {
        Self {
            identifier: "default",
            name: "Default",
            text_low: 0x0040_0000,
            text_high: 0x0fff_ffff,
            data_low: 0x1001_0000,
            data_high: 0x1003_ffff,
            ktext_low: 0x8000_0000,
            ktext_high: 0x8fff_ffff,
            kdata_low: 0x9000_0000,
            kdata_high: 0xfffe_ffff,
            extern_low: 0x1000_0000,
            extern_high: 0x1000_ffff,
            data_range_low: 0x1000_0000,
            data_range_high: 0x7fff_ffff,
            heap_base: 0x1004_0000,
            stack_pointer: 0x7fff_effc,
            global_pointer: 0x1000_8000,
            mmio_low: 0xffff_0000,
            mmio_high: 0xffff_ffff,
            exception_handler: 0x8000_0180,
        }
    }

    /// The compact 16-bit memory layout. All addresses fit in 16 bits, which
    /// also enables the compact pseudo-instruction expansions.
    pub fn compact_layout() -> Self {
        Self {
            identifier: "compact",
            name: "Compact, data at address 0",
            text_low: 0x3000,
            text_high: 0x3ffc,
            data_low: 0x0000,
            data_high: 0x0fff,
            ktext_low: 0x4000,
            ktext_high: 0x4ffc,
            kdata_low: 0x5000,
            kdata_high: 0x7eff,
            extern_low: 0x1000,
            extern_high: 0x1fff,
            data_range_low: 0x0000,
            data_range_high: 0x2fff,
            heap_base: 0x2000,
            stack_pointer: 0x2ffc,
            global_pointer: 0x1800,
            mmio_low: 0x7f00,
            mmio_high: 0x7fff,
            exception_handler: 0x4180,
        }
    }

    /// Looks up a configuration by its CLI identifier.
    pub fn by_identifier(identifier: &str) -> Option<Self> {
        match identifier {
            "default" => Some(Self::default_layout()),
            "compact" => Some(Self::compact_layout()),
            _ => None,
        }
    }

    /// Whether all addresses in this layout fit in 16 bits. When true, the
    /// assembler uses compact pseudo-instruction expansions.
    pub fn is_using_compact_address_space(&self) -> bool {
        self.mmio_high <= 0xffff
    }

    /// Whether the address falls in the user text segment.
    pub fn is_in_text_segment(&self, address: u32) -> bool {
        (self.text_low..=self.text_high).contains(&address)
    }

    /// Whether the address falls in the kernel text segment.
    pub fn is_in_kernel_text_segment(&self, address: u32) -> bool {
        (self.ktext_low..=self.ktext_high).contains(&address)
    }

    /// Whether the address falls in the user data range (extern segment, data
    /// segment, heap, or stack).
    pub fn is_in_data_segment(&self, address: u32) -> bool {
        (self.data_range_low..=self.data_range_high).contains(&address)
    }

    /// Whether the address falls in the kernel data segment.
    pub fn is_in_kernel_data_segment(&self, address: u32) -> bool {
        (self.kdata_low..=self.kdata_high).contains(&address)
    }

    /// Whether the address falls in the memory-mapped I/O range.
    pub fn is_in_mmio(&self, address: u32) -> bool {
        (self.mmio_low..=self.mmio_high).contains(&address)
    }

    fn is_mapped(&self, address: u32) -> bool {
        self.is_in_text_segment(address)
            || self.is_in_kernel_text_segment(address)
            || self.is_in_data_segment(address)
            || self.is_in_kernel_data_segment(address)
            || self.is_in_mmio(address)
    }
}

impl Default for MemoryConfiguration {
    fn default() -> Self {
        Self::default_layout()
    }
}

/// Byte order for multi-byte memory accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    /// Least significant byte at the lowest address (the default).
    #[default]
    Little,
    /// Most significant byte at the lowest address.
    Big,
}

/// The ways a memory access can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressErrorKind {
    /// The address is not inside any mapped segment.
    OutOfRange,
    /// A word or halfword access was not aligned to its size.
    Misaligned,
    /// A write targeted the text segment while self-modifying code is disabled.
    TextSegmentWrite,
    /// A memory-mapped device rejected the access.
    DeviceRejected,
}

/// A failed memory access: the kind of failure, the offending address, and
/// whether the access was a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressError {
    /// What went wrong.
    pub kind: AddressErrorKind,
    /// The address of the failed access.
    pub address: u32,
    /// True for stores, false for loads and fetches.
    pub is_store: bool,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self.kind {
            AddressErrorKind::OutOfRange => "address out of range",
            AddressErrorKind::Misaligned => "address not aligned on boundary",
            AddressErrorKind::TextSegmentWrite => {
                "cannot write to text segment unless self-modifying code is enabled"
            }
            AddressErrorKind::DeviceRejected => "memory-mapped device rejected access",
        };
        write!(f, "{} 0x{:08x}", what, self.address)
    }
}

impl std::error::Error for AddressError {}

/// A memory-mapped I/O device. Reads and writes to a registered address range
/// are routed here instead of to backing memory.
pub trait MmioDevice: Send {
    /// Handles a read of `bytes` bytes at `address`. Returning `None` rejects
    /// the access.
    fn read(&mut self, address: u32, bytes: usize) -> Option<i32>;

    /// Handles a write of the low `bytes` bytes of `value` at `address`.
    /// Returning `false` rejects the access.
    fn write(&mut self, address: u32, value: i32, bytes: usize) -> bool;
}

struct MmioRange {
    low: u32,
    high: u32,
    device: Box<dyn MmioDevice>,
}

impl std::fmt::Debug for MmioRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmioRange")
            .field("low", &self.low)
            .field("high", &self.high)
            .finish_non_exhaustive()
    }
}

/// Tracks which memory addresses have been written since the last clear.
///
/// Writes performed with `notify == false` bypass the observer, so resets and
/// back-stepping do not pollute the change set.
#[derive(Debug, Default)]
pub struct ChangeObserver {
    changed: BTreeSet<u32>,
}

impl ChangeObserver {
    /// Marks an address as changed.
    pub fn set_changed(&mut self, address: u32) {
        self.changed.insert(address);
    }

    /// Whether the address has changed since the last clear.
    pub fn changed(&self, address: u32) -> bool {
        self.changed.contains(&address)
    }

    /// Takes all changes recorded since the last clear, in address order,
    /// clearing the set.
    pub fn take_changes(&mut self) -> impl Iterator<Item = u32> {
        std::mem::take(&mut self.changed).into_iter()
    }
}

/// What an instruction fetch found at an address.
#[derive(Debug, Clone)]
pub enum StatementFetch {
    /// An assembled statement (cached from assembly, or re-decoded after a
    /// self-modifying write).
    Statement(Arc<BasicStatement>),
    /// A word is present but does not decode to any known instruction.
    Undecodable(u32),
    /// Nothing has been placed at this address.
    Empty,
}

/// The segmented MIPS32 address space.
///
/// Backing storage is sparse: 4 KiB pages are allocated on first write, and
/// untouched memory reads as zero. Accesses outside every mapped segment, or
/// misaligned word/halfword accesses, fail with an [`AddressError`].
#[derive(Debug)]
pub struct Memory {
    config: MemoryConfiguration,
    endianness: Endianness,
    self_modifying_code: bool,
    pages: HashMap<u32, Box<[u8; PAGE_SIZE]>>,
    statements: HashMap<u32, Arc<BasicStatement>>,
    devices: Vec<MmioRange>,
    /// Tracks written addresses for anyone refreshing a view of memory.
    pub observer: ChangeObserver,
}

/// Rounds `address` up to the next multiple of `alignment` (no change if
/// already aligned).
pub fn align_to_next(address: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (address + alignment - 1) & !(alignment - 1)
}

impl Memory {
    /// Creates an empty memory with the given configuration.
    pub fn new(config: MemoryConfiguration) -> Self {
        Self {
            config,
            endianness: Endianness::Little,
            self_modifying_code: false,
            pages: HashMap::new(),
            statements: HashMap::new(),
            devices: Vec::new(),
            observer: ChangeObserver::default(),
        }
    }

    /// The active memory configuration.
    pub fn config(&self) -> &MemoryConfiguration {
        &self.config
    }

    /// The current byte order.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Sets the byte order. Takes effect for subsequent accesses only, so this
    /// should be set before assembly.
    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }

    /// Whether writes into the text segments are permitted.
    pub fn is_self_modifying_code_enabled(&self) -> bool {
        self.self_modifying_code
    }

    /// Enables or disables writes into the text segments.
    pub fn set_self_modifying_code(&mut self, enabled: bool) {
        self.self_modifying_code = enabled;
    }

    /// Clears all memory contents and cached statements. Device registrations
    /// and configuration are preserved.
    pub fn reset(&mut self) {
        self.pages.clear();
        self.statements.clear();
        self.observer = ChangeObserver::default();
    }

    /// Registers a memory-mapped device over the given inclusive address range.
    pub fn register_mmio(&mut self, low: u32, high: u32, device: Box<dyn MmioDevice>) {
        self.devices.push(MmioRange { low, high, device });
    }

    fn check_access(&self, address: u32, bytes: u32, is_store: bool) -> Result<(), AddressError> {
        if bytes > 1 && address % bytes != 0 {
            return Err(AddressError { kind: AddressErrorKind::Misaligned, address, is_store });
        }
        if !self.config.is_mapped(address) {
            return Err(AddressError { kind: AddressErrorKind::OutOfRange, address, is_store });
        }
        Ok(())
    }

    fn device_for(&mut self, address: u32) -> Option<&mut MmioRange> {
        self.devices.iter_mut().find(|range| (range.low..=range.high).contains(&address))
    }

    fn byte_offsets(&self, bytes: u32) -> impl Iterator<Item = u32> {
        // Index k of the value maps to address offset k in little-endian order
        // and offset (bytes - 1 - k) in big-endian order.
        let big = self.endianness == Endianness::Big;
        (0..bytes).map(move |k| if big { bytes - 1 - k } else { k })
    }

    fn read_raw_byte(&self, address: u32) -> u8 {
        match self.pages.get(&(address / PAGE_SIZE as u32)) {
            Some(page) => page[address as usize % PAGE_SIZE],
            None => 0,
        }
    }

    fn write_raw_byte(&mut self, address: u32, value: u8) {
        let page = self
            .pages
            .entry(address / PAGE_SIZE as u32)
            .or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
        page[address as usize % PAGE_SIZE] = value;
    }

    fn read_value(&self, address: u32, bytes: u32) -> i32 {
        let mut value: u32 = 0;
        for (k, offset) in self.byte_offsets(bytes).enumerate() {
            value |= u32::from(self.read_raw_byte(address + offset)) << (8 * k);
        }
        value as i32
    }

    fn write_value(&mut self, address: u32, value: i32, bytes: u32) {
        for (k, offset) in self.byte_offsets(bytes).enumerate() {
            self.write_raw_byte(address + offset, ((value as u32) >> (8 * k)) as u8);
        }
    }

    fn load(&mut self, address: u32, bytes: u32, notify: bool) -> Result<i32, AddressError> {
        self.check_access(address, bytes, false)?;
        if self.config.is_in_mmio(address) {
            if let Some(range) = self.device_for(address) {
                return range.device.read(address, bytes as usize).ok_or(AddressError {
                    kind: AddressErrorKind::DeviceRejected,
                    address,
                    is_store: false,
                });
            }
        }
        let _ = notify;
        Ok(self.read_value(address, bytes))
    }

    fn store(&mut self, address: u32, value: i32, bytes: u32, notify: bool) -> Result<i32, AddressError> {
        self.check_access(address, bytes, true)?;
        if self.config.is_in_text_segment(address) || self.config.is_in_kernel_text_segment(address) {
            if !self.self_modifying_code {
                return Err(AddressError {
                    kind: AddressErrorKind::TextSegmentWrite,
                    address,
                    is_store: true,
                });
            }
            // The cached statement no longer matches the stored word; the next
            // fetch re-decodes it from the instruction table.
            self.statements.remove(&(address & !3));
        }
        if self.config.is_in_mmio(address) {
            if let Some(range) = self.device_for(address) {
                let accepted = range.device.write(address, value, bytes as usize);
                return if accepted {
                    Ok(0)
                } else {
                    Err(AddressError {
                        kind: AddressErrorKind::DeviceRejected,
                        address,
                        is_store: true,
                    })
                };
            }
        }
        let previous = self.read_value(address, bytes);
        self.write_value(address, value, bytes);
        if notify {
            self.observer.set_changed(address);
        }
        Ok(previous)
    }

    /// Reads the word at a 4-byte-aligned address.
    pub fn get_word(&mut self, address: u32, notify: bool) -> Result<i32, AddressError> {
        self.load(address, 4, notify)
    }

    /// Reads the halfword at a 2-byte-aligned address, zero-extended.
    pub fn get_halfword(&mut self, address: u32, notify: bool) -> Result<i32, AddressError> {
        self.load(address, 2, notify)
    }

    /// Reads the byte at an address, zero-extended.
    pub fn get_byte(&mut self, address: u32, notify: bool) -> Result<i32, AddressError> {
        self.load(address, 1, notify)
    }

    /// Stores a word at a 4-byte-aligned address, returning the previous word.
    pub fn store_word(&mut self, address: u32, value: i32, notify: bool) -> Result<i32, AddressError> {
        self.store(address, value, 4, notify)
    }

    /// Stores the low 16 bits of `value` at a 2-byte-aligned address,
    /// returning the previous halfword.
    pub fn store_halfword(&mut self, address: u32, value: i32, notify: bool) -> Result<i32, AddressError> {
        self.store(address, value, 2, notify)
    }

    /// Stores the low 8 bits of `value` at an address, returning the previous byte.
    pub fn store_byte(&mut self, address: u32, value: i32, notify: bool) -> Result<i32, AddressError> {
        self.store(address, value, 1, notify)
    }

    /// Stores a doubleword as two adjacent words, returning the previous value.
    pub fn store_doubleword(&mut self, address: u32, value: i64, notify: bool) -> Result<i64, AddressError> {
        let old_low = self.store(address, crate::bits::low_order_long_to_int(value), 4, notify)?;
        let old_high = self.store(address + 4, crate::bits::high_order_long_to_int(value), 4, notify)?;
        Ok(crate::bits::two_ints_to_long(old_high, old_low))
    }

    /// Stores `value` using `length` bytes (1, 2, or 4), byte by byte with no
    /// alignment requirement. Used by data directives (which may emit at an
    /// unaligned cursor under `.align 0`) and forward-reference patching.
    pub fn store_sized(&mut self, address: u32, value: i32, length: u32, notify: bool) -> Result<i32, AddressError> {
        self.check_access(address, 1, true)?;
        self.check_access(address + length - 1, 1, true)?;
        let previous = self.read_value(address, length);
        self.write_value(address, value, length);
        if notify {
            self.observer.set_changed(address);
        }
        Ok(previous)
    }

    /// Reads the word at an address without any range or device checks,
    /// returning `None` if no page backs it. Used by dump writers and tests.
    pub fn word_if_present(&self, address: u32) -> Option<i32> {
        self.pages.contains_key(&(address / PAGE_SIZE as u32)).then(|| self.read_value(address, 4))
    }

    /// Fetches the statement at a word-aligned text address.
    ///
    /// If self-modifying code is enabled and the cached statement was
    /// invalidated by a write, the stored word is re-decoded through the
    /// instruction table's binary match index.
    pub fn fetch_statement(&mut self, address: u32, notify: bool) -> Result<StatementFetch, AddressError> {
        if address % 4 != 0 {
            return Err(AddressError { kind: AddressErrorKind::Misaligned, address, is_store: false });
        }
        if !self.config.is_in_text_segment(address) && !self.config.is_in_kernel_text_segment(address) {
            return Err(AddressError { kind: AddressErrorKind::OutOfRange, address, is_store: false });
        }
        let _ = notify;
        if let Some(statement) = self.statements.get(&address) {
            return Ok(StatementFetch::Statement(Arc::clone(statement)));
        }
        if self.self_modifying_code && self.pages.contains_key(&(address / PAGE_SIZE as u32)) {
            let word = self.read_value(address, 4) as u32;
            return match InstructionSet::global().decode_statement(word, address) {
                Some(statement) => {
                    let statement = Arc::new(statement);
                    self.statements.insert(address, Arc::clone(&statement));
                    Ok(StatementFetch::Statement(statement))
                }
                None => Ok(StatementFetch::Undecodable(word)),
            };
        }
        Ok(StatementFetch::Empty)
    }

    /// Stores an assembled statement (and its machine word) at a word-aligned
    /// text address.
    pub fn store_statement(
        &mut self,
        address: u32,
        statement: Arc<BasicStatement>,
        notify: bool,
    ) -> Result<(), AddressError> {
        if address % 4 != 0 {
            return Err(AddressError { kind: AddressErrorKind::Misaligned, address, is_store: true });
        }
        if !self.config.is_in_text_segment(address) && !self.config.is_in_kernel_text_segment(address) {
            return Err(AddressError { kind: AddressErrorKind::OutOfRange, address, is_store: true });
        }
        self.write_value(address, statement.binary as i32, 4);
        self.statements.insert(address, statement);
        if notify {
            self.observer.set_changed(address);
        }
        Ok(())
    }

    /// Reads a NUL-terminated ASCII string starting at an address.
    pub fn get_null_terminated_string(&mut self, address: u32) -> Result<String, AddressError> {
        let mut result = String::new();
        let mut cursor = address;
        loop {
            let byte = self.get_byte(cursor, false)? as u8;
            if byte == 0 {
                return Ok(result);
            }
            result.push(char::from(byte));
            cursor = cursor.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Memory {
        Memory::new(MemoryConfiguration::default_layout())
    }

    #[test]
    fn test_untouched_memory_reads_zero() {
        let mut mem = memory();
        assert_eq!(mem.get_word(0x1001_0000, false).unwrap(), 0);
        assert_eq!(mem.get_byte(0x1001_0003, false).unwrap(), 0);
    }

    #[test]
    fn test_word_roundtrip() {
        let mut mem = memory();
        mem.store_word(0x1001_0000, 0x1234_5678, false).unwrap();
        assert_eq!(mem.get_word(0x1001_0000, false).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_little_endian_byte_order() {
        let mut mem = memory();
        mem.store_word(0x1001_0000, 0x1234_5678, false).unwrap();
        assert_eq!(mem.get_byte(0x1001_0000, false).unwrap(), 0x78);
        assert_eq!(mem.get_byte(0x1001_0001, false).unwrap(), 0x56);
        assert_eq!(mem.get_byte(0x1001_0002, false).unwrap(), 0x34);
        assert_eq!(mem.get_byte(0x1001_0003, false).unwrap(), 0x12);
    }

    #[test]
    fn test_big_endian_byte_order() {
        let mut mem = memory();
        mem.set_endianness(Endianness::Big);
        mem.store_word(0x1001_0000, 0x1234_5678, false).unwrap();
        assert_eq!(mem.get_byte(0x1001_0000, false).unwrap(), 0x12);
        assert_eq!(mem.get_byte(0x1001_0003, false).unwrap(), 0x78);
        assert_eq!(mem.get_word(0x1001_0000, false).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_misaligned_access() {
        let mut mem = memory();
        let err = mem.get_word(0x1001_0002, false).unwrap_err();
        assert_eq!(err.kind, AddressErrorKind::Misaligned);
        assert!(!err.is_store);

        let err = mem.store_halfword(0x1001_0001, 1, false).unwrap_err();
        assert_eq!(err.kind, AddressErrorKind::Misaligned);
        assert!(err.is_store);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut mem = memory();
        let err = mem.get_word(0x0000_1000, false).unwrap_err();
        assert_eq!(err.kind, AddressErrorKind::OutOfRange);
    }

    #[test]
    fn test_text_write_requires_self_modifying() {
        let mut mem = memory();
        let err = mem.store_word(0x0040_0000, 5, false).unwrap_err();
        assert_eq!(err.kind, AddressErrorKind::TextSegmentWrite);

        mem.set_self_modifying_code(true);
        mem.store_word(0x0040_0000, 5, false).unwrap();
        assert_eq!(mem.get_word(0x0040_0000, false).unwrap(), 5);
    }

    #[test]
    fn test_store_returns_previous() {
        let mut mem = memory();
        assert_eq!(mem.store_word(0x1001_0000, 1, false).unwrap(), 0);
        assert_eq!(mem.store_word(0x1001_0000, 2, false).unwrap(), 1);
    }

    #[test]
    fn test_doubleword_is_two_words() {
        let mut mem = memory();
        mem.store_doubleword(0x1001_0000, 0x1122_3344_5566_7788, false).unwrap();
        assert_eq!(mem.get_word(0x1001_0000, false).unwrap(), 0x5566_7788);
        assert_eq!(mem.get_word(0x1001_0004, false).unwrap(), 0x1122_3344);
    }

    #[test]
    fn test_null_terminated_string() {
        let mut mem = memory();
        for (i, b) in b"hi\0".iter().enumerate() {
            mem.store_byte(0x1001_0000 + i as u32, *b as i32, false).unwrap();
        }
        assert_eq!(mem.get_null_terminated_string(0x1001_0000).unwrap(), "hi");
    }

    #[test]
    fn test_align_to_next() {
        assert_eq!(align_to_next(0x1001_0001, 4), 0x1001_0004);
        assert_eq!(align_to_next(0x1001_0004, 4), 0x1001_0004);
        assert_eq!(align_to_next(0x1001_0001, 2), 0x1001_0002);
        assert_eq!(align_to_next(7, 8), 8);
    }

    #[test]
    fn test_observer_tracks_notified_writes() {
        let mut mem = memory();
        mem.store_word(0x1001_0000, 1, true).unwrap();
        mem.store_word(0x1001_0004, 1, false).unwrap();
        let changed: Vec<_> = mem.observer.take_changes().collect();
        assert_eq!(changed, vec![0x1001_0000]);
    }

    struct ConstDevice(i32);
    impl MmioDevice for ConstDevice {
        fn read(&mut self, _address: u32, _bytes: usize) -> Option<i32> {
            Some(self.0)
        }
        fn write(&mut self, _address: u32, value: i32, _bytes: usize) -> bool {
            self.0 = value;
            true
        }
    }

    #[test]
    fn test_mmio_routing() {
        let mut mem = memory();
        mem.register_mmio(0xffff_0000, 0xffff_000f, Box::new(ConstDevice(7)));
        assert_eq!(mem.get_word(0xffff_0000, true).unwrap(), 7);
        mem.store_word(0xffff_0004, 99, true).unwrap();
        assert_eq!(mem.get_word(0xffff_0008, true).unwrap(), 99);
        // Addresses in the MMIO range with no device behave as plain memory.
        mem.store_word(0xffff_0100, 3, false).unwrap();
        assert_eq!(mem.get_word(0xffff_0100, false).unwrap(), 3);
    }

    #[test]
    fn test_compact_configuration_is_compact() {
        assert!(!MemoryConfiguration::default_layout().is_using_compact_address_space());
        assert!(MemoryConfiguration::compact_layout().is_using_compact_address_space());
        assert!(MemoryConfiguration::by_identifier("compact").is_some());
        assert!(MemoryConfiguration::by_identifier("weird").is_none());
    }
}
