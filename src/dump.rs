//! Memory dump writers for the CLI's `--dump` option.
//!
//! A dump walks one segment of assembled memory from its base address to the
//! last word actually backed by storage and writes each word in the selected
//! format. Three formats exist: raw binary bytes, hexadecimal text (one word
//! per line), and binary text (32 `0`/`1` characters per line).

use std::io::Write;

use crate::sim::mem::{Endianness, Memory};

/// The supported dump output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    /// Raw bytes in the memory's byte order.
    Binary,
    /// One `0x`-prefixed hexadecimal word per line.
    Hex,
    /// One 32-character binary word per line.
    BinaryText,
}

impl DumpFormat {
    /// Looks up a format by its CLI identifier.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        match identifier {
            "binary" => Some(Self::Binary),
            "hex" => Some(Self::Hex),
            "bintext" => Some(Self::BinaryText),
            _ => None,
        }
    }
}

/// Resolves a CLI segment name (`.text`, `text`, `.data`, ...) to its address
/// range in the given memory's configuration.
pub fn segment_range(memory: &Memory, segment: &str) -> Option<(u32, u32)> {
    let config = memory.config();
    match segment.trim_start_matches('.') {
        "text" => Some((config.text_low, config.text_high)),
        "data" => Some((config.data_low, config.data_high)),
        "ktext" => Some((config.ktext_low, config.ktext_high)),
        "kdata" => Some((config.kdata_low, config.kdata_high)),
        "extern" => Some((config.extern_low, config.extern_high)),
        _ => None,
    }
}

/// Writes the words of `[low, high]` that are backed by storage, stopping
/// after the last present word.
pub fn dump_range(
    memory: &Memory,
    low: u32,
    high: u32,
    format: DumpFormat,
    writer: &mut impl Write,
) -> std::io::Result<()> {
    // Find the end of the populated prefix so dumps don't trail zeros for
    // the whole segment. Absent backing pages are skipped wholesale.
    const PAGE: u32 = 4096;
    let mut last_present = None;
    let mut address = low & !3;
    while address <= high {
        match memory.word_if_present(address) {
            None => {
                // Nothing backs this page; jump to the next one.
                let Some(next) = (address & !(PAGE - 1)).checked_add(PAGE) else { break };
                address = next;
                continue;
            }
            Some(0) => {}
            Some(_) => last_present = Some(address),
        }
        match address.checked_add(4) {
            Some(next) => address = next,
            None => break,
        }
    }
    let Some(end) = last_present else { return Ok(()) };

    let mut address = low;
    while address <= end {
        let word = memory.word_if_present(address).unwrap_or(0) as u32;
        match format {
            DumpFormat::Binary => {
                let bytes = match memory.endianness() {
                    Endianness::Little => word.to_le_bytes(),
                    Endianness::Big => word.to_be_bytes(),
                };
                writer.write_all(&bytes)?;
            }
            DumpFormat::Hex => writeln!(writer, "0x{word:08x}")?,
            DumpFormat::BinaryText => writeln!(writer, "{word:032b}")?,
        }
        address += 4;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::mem::MemoryConfiguration;

    fn memory_with_words(words: &[i32]) -> Memory {
        let mut memory = Memory::new(MemoryConfiguration::default_layout());
        for (i, &word) in words.iter().enumerate() {
            memory.store_word(0x1001_0000 + 4 * i as u32, word, false).unwrap();
        }
        memory
    }

    #[test]
    fn test_hex_dump() {
        let memory = memory_with_words(&[1, 0x1234_5678]);
        let mut output = Vec::new();
        dump_range(&memory, 0x1001_0000, 0x1001_00ff, DumpFormat::Hex, &mut output).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "0x00000001\n0x12345678\n");
    }

    #[test]
    fn test_binary_dump_little_endian() {
        let memory = memory_with_words(&[0x1234_5678]);
        let mut output = Vec::new();
        dump_range(&memory, 0x1001_0000, 0x1001_00ff, DumpFormat::Binary, &mut output).unwrap();
        assert_eq!(output, vec![0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_bintext_dump() {
        let memory = memory_with_words(&[5]);
        let mut output = Vec::new();
        dump_range(&memory, 0x1001_0000, 0x1001_00ff, DumpFormat::BinaryText, &mut output)
            .unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), format!("{:032b}\n", 5));
    }

    #[test]
    fn test_empty_range_writes_nothing() {
        let memory = Memory::new(MemoryConfiguration::default_layout());
        let mut output = Vec::new();
        dump_range(&memory, 0x1001_0000, 0x1001_00ff, DumpFormat::Hex, &mut output).unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn test_format_and_segment_lookup() {
        assert_eq!(DumpFormat::from_identifier("hex"), Some(DumpFormat::Hex));
        assert_eq!(DumpFormat::from_identifier("binary"), Some(DumpFormat::Binary));
        assert_eq!(DumpFormat::from_identifier("bintext"), Some(DumpFormat::BinaryText));
        assert_eq!(DumpFormat::from_identifier("elf"), None);

        let memory = Memory::new(MemoryConfiguration::default_layout());
        assert_eq!(segment_range(&memory, ".text"), Some((0x0040_0000, 0x0fff_ffff)));
        assert_eq!(segment_range(&memory, "data"), Some((0x1001_0000, 0x1003_ffff)));
        assert_eq!(segment_range(&memory, "bss"), None);
    }
}
