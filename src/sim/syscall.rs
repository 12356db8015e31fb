//! Syscall services.
//!
//! The `syscall` instruction selects a service by the number in `$v0` and
//! dispatches here. Arguments arrive in `$a0`..`$a2` (or `$f12` for
//! floating-point values) and results are returned in `$v0`/`$a0`/`$f0`,
//! following the SPIM service table. An unknown service number raises a
//! syscall exception.
//!
//! Services that mutate simulator state go through the recording helpers on
//! [`Simulator`], so syscall effects are reversible like any other
//! instruction effect.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::bits;
use crate::isa::BasicStatement;
use crate::sim::registers::{A0, A1, A2, V0};
use crate::sim::{ExceptionCause, Interrupt, ProcessorException, Simulator};

fn syscall_error(message: impl Into<String>) -> Interrupt {
    Interrupt::Exception(ProcessorException::new(ExceptionCause::Syscall, message))
}

/// Dispatches the syscall selected by `$v0`.
pub fn handle(sim: &mut Simulator, statement: &BasicStatement) -> Result<(), Interrupt> {
    let service = sim.registers.get(V0);
    match service {
        // print integer
        1 => {
            let value = sim.registers.get(A0);
            sim.io.print_string(&value.to_string());
            Ok(())
        }
        // print float
        2 => {
            let value = sim.cop1.get_float(12);
            sim.io.print_string(&value.to_string());
            Ok(())
        }
        // print double
        3 => {
            let value = sim.cop1_double(12)?;
            sim.io.print_string(&value.to_string());
            Ok(())
        }
        // print string
        4 => {
            let address = sim.registers.get(A0) as u32;
            let text = sim.memory.get_null_terminated_string(address)?;
            sim.io.print_string(&text);
            Ok(())
        }
        // read integer
        5 => match sim.io.read_integer() {
            Some(value) => {
                sim.update_register(V0, value);
                Ok(())
            }
            None => Err(syscall_error("invalid integer input (syscall 5)")),
        },
        // read float
        6 => match sim.io.read_double() {
            Some(value) => {
                sim.update_cop1_float(0, value as f32);
                Ok(())
            }
            None => Err(syscall_error("invalid float input (syscall 6)")),
        },
        // read double
        7 => match sim.io.read_double() {
            Some(value) => sim.update_cop1_double(0, value),
            None => Err(syscall_error("invalid double input (syscall 7)")),
        },
        // read string: fgets semantics, at most max-1 characters plus NUL
        8 => {
            let buffer = sim.registers.get(A0) as u32;
            let max_length = sim.registers.get(A1);
            if max_length > 0 {
                let line = sim.io.read_line();
                let capacity = (max_length - 1) as usize;
                let mut cursor = buffer;
                for byte in line.bytes().take(capacity) {
                    sim.store_byte(cursor, i32::from(byte))?;
                    cursor += 1;
                }
                sim.store_byte(cursor, 0)?;
            }
            Ok(())
        }
        // sbrk
        9 => {
            let bytes = sim.registers.get(A0);
            let address = sim.allocate_heap(bytes);
            sim.update_register(V0, address as i32);
            Ok(())
        }
        // exit
        10 => Err(Interrupt::Exit(0)),
        // print character
        11 => {
            let byte = (sim.registers.get(A0) & 0xff) as u8;
            sim.io.print_string(&char::from(byte).to_string());
            Ok(())
        }
        // read character
        12 => match sim.io.read_char() {
            Some(c) => {
                sim.update_register(V0, c as i32);
                Ok(())
            }
            None => Err(syscall_error("end of input (syscall 12)")),
        },
        // open file
        13 => {
            let path_address = sim.registers.get(A0) as u32;
            let flags = sim.registers.get(A1);
            let path = sim.memory.get_null_terminated_string(path_address)?;
            let descriptor = sim.io.open_file(&path, flags);
            sim.update_register(V0, descriptor);
            Ok(())
        }
        // read from descriptor
        14 => {
            let descriptor = sim.registers.get(A0);
            let buffer = sim.registers.get(A1) as u32;
            let length = sim.registers.get(A2).max(0) as usize;
            let mut bytes = vec![0u8; length];
            let count = sim.io.read_from_descriptor(descriptor, &mut bytes);
            for (offset, byte) in bytes.iter().take(count.max(0) as usize).enumerate() {
                sim.store_byte(buffer + offset as u32, i32::from(*byte))?;
            }
            sim.update_register(V0, count);
            Ok(())
        }
        // write to descriptor
        15 => {
            let descriptor = sim.registers.get(A0);
            let buffer = sim.registers.get(A1) as u32;
            let length = sim.registers.get(A2).max(0) as usize;
            let mut bytes = Vec::with_capacity(length);
            for offset in 0..length {
                bytes.push(sim.load_byte(buffer + offset as u32)? as u8);
            }
            let count = sim.io.write_to_descriptor(descriptor, &bytes);
            sim.update_register(V0, count);
            Ok(())
        }
        // close descriptor
        16 => {
            let descriptor = sim.registers.get(A0);
            sim.io.close_descriptor(descriptor);
            Ok(())
        }
        // exit with code
        17 => Err(Interrupt::Exit(sim.registers.get(A0))),
        // system time in milliseconds
        30 => {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            sim.update_register(A0, bits::low_order_long_to_int(millis));
            sim.update_register(A1, bits::high_order_long_to_int(millis));
            Ok(())
        }
        // sleep
        32 => {
            let millis = sim.registers.get(A0).max(0) as u64;
            std::thread::sleep(std::time::Duration::from_millis(millis));
            Ok(())
        }
        // print integer as hex
        34 => {
            let value = sim.registers.get(A0);
            sim.io.print_string(&bits::to_hex_string(value));
            Ok(())
        }
        // print integer as binary
        35 => {
            let value = sim.registers.get(A0);
            sim.io.print_string(&format!("{:032b}", value as u32));
            Ok(())
        }
        // print integer as unsigned
        36 => {
            let value = sim.registers.get(A0) as u32;
            sim.io.print_string(&value.to_string());
            Ok(())
        }
        // seed random stream
        40 => {
            let id = sim.registers.get(A0);
            let seed = sim.registers.get(A1);
            sim.seed_rng(id, seed);
            Ok(())
        }
        // random integer
        41 => {
            let id = sim.registers.get(A0);
            let value: i32 = sim.rng(id).gen();
            sim.update_register(A0, value);
            Ok(())
        }
        // random integer in [0, upper)
        42 => {
            let id = sim.registers.get(A0);
            let upper = sim.registers.get(A1);
            if upper <= 0 {
                return Err(syscall_error("upper bound of range must be positive (syscall 42)"));
            }
            let value = sim.rng(id).gen_range(0..upper);
            sim.update_register(A0, value);
            Ok(())
        }
        // random float in [0, 1)
        43 => {
            let id = sim.registers.get(A0);
            let value: f32 = sim.rng(id).gen();
            sim.update_cop1_float(0, value);
            Ok(())
        }
        // random double in [0, 1)
        44 => {
            let id = sim.registers.get(A0);
            let value: f64 = sim.rng(id).gen();
            sim.update_cop1_double(0, value)
        }
        other => Err(syscall_error(format!(
            "unknown syscall service {other} at 0x{:08x}",
            statement.address
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::InstructionSet;
    use crate::sim::io::SystemIO;
    use crate::sim::mem::MemoryConfiguration;

    fn simulator_with_input(input: &str) -> (Simulator, BasicStatement) {
        let mut sim = Simulator::new(MemoryConfiguration::default_layout(), Default::default());
        sim.io = SystemIO::with_input(input);
        // The syscall instruction word.
        let statement =
            InstructionSet::global().decode_statement(0x0000_000c, 0x0040_0000).unwrap();
        (sim, statement)
    }

    #[test]
    fn test_print_and_read_integer() {
        let (mut sim, statement) = simulator_with_input("123\n");
        sim.registers.set(V0, 1);
        sim.registers.set(A0, -42);
        handle(&mut sim, &statement).unwrap();
        assert_eq!(sim.io.captured_output().unwrap(), b"-42");

        sim.registers.set(V0, 5);
        handle(&mut sim, &statement).unwrap();
        assert_eq!(sim.registers.get(V0), 123);
    }

    #[test]
    fn test_print_string_reads_until_nul() {
        let (mut sim, statement) = simulator_with_input("");
        for (i, byte) in b"ok\0junk".iter().enumerate() {
            sim.memory.store_byte(0x1001_0000 + i as u32, *byte as i32, false).unwrap();
        }
        sim.registers.set(V0, 4);
        sim.registers.set(A0, 0x1001_0000);
        handle(&mut sim, &statement).unwrap();
        assert_eq!(sim.io.captured_output().unwrap(), b"ok");
    }

    #[test]
    fn test_read_string_fgets_semantics() {
        let (mut sim, statement) = simulator_with_input("abcdefgh\n");
        sim.registers.set(V0, 8);
        sim.registers.set(A0, 0x1001_0000);
        sim.registers.set(A1, 5);
        handle(&mut sim, &statement).unwrap();
        assert_eq!(sim.memory.get_null_terminated_string(0x1001_0000).unwrap(), "abcd");
    }

    #[test]
    fn test_sbrk_returns_sequential_blocks() {
        let (mut sim, statement) = simulator_with_input("");
        let heap = sim.memory.config().heap_base;
        sim.registers.set(V0, 9);
        sim.registers.set(A0, 10);
        handle(&mut sim, &statement).unwrap();
        assert_eq!(sim.registers.get(V0) as u32, heap);

        sim.registers.set(V0, 9);
        sim.registers.set(A0, 4);
        handle(&mut sim, &statement).unwrap();
        assert_eq!(sim.registers.get(V0) as u32, heap + 12);
    }

    #[test]
    fn test_exit_services() {
        let (mut sim, statement) = simulator_with_input("");
        sim.registers.set(V0, 10);
        match handle(&mut sim, &statement) {
            Err(Interrupt::Exit(0)) => {}
            other => panic!("expected exit 0, got {other:?}"),
        }

        sim.registers.set(V0, 17);
        sim.registers.set(A0, 3);
        match handle(&mut sim, &statement) {
            Err(Interrupt::Exit(3)) => {}
            other => panic!("expected exit 3, got {other:?}"),
        }
    }

    #[test]
    fn test_seeded_random_is_deterministic() {
        let (mut sim, statement) = simulator_with_input("");
        sim.registers.set(V0, 40);
        sim.registers.set(A0, 0);
        sim.registers.set(A1, 12345);
        handle(&mut sim, &statement).unwrap();

        sim.registers.set(V0, 42);
        sim.registers.set(A0, 0);
        sim.registers.set(A1, 100);
        handle(&mut sim, &statement).unwrap();
        let first = sim.registers.get(A0);
        assert!((0..100).contains(&first));

        // Reseeding with the same seed reproduces the draw.
        sim.registers.set(V0, 40);
        sim.registers.set(A0, 0);
        sim.registers.set(A1, 12345);
        handle(&mut sim, &statement).unwrap();
        sim.registers.set(V0, 42);
        sim.registers.set(A0, 0);
        sim.registers.set(A1, 100);
        handle(&mut sim, &statement).unwrap();
        assert_eq!(sim.registers.get(A0), first);
    }

    #[test]
    fn test_unknown_service_raises_syscall_exception() {
        let (mut sim, statement) = simulator_with_input("");
        sim.registers.set(V0, 999);
        match handle(&mut sim, &statement) {
            Err(Interrupt::Exception(e)) => assert_eq!(e.cause, ExceptionCause::Syscall),
            other => panic!("expected syscall exception, got {other:?}"),
        }
    }

    #[test]
    fn test_print_formats() {
        let (mut sim, statement) = simulator_with_input("");
        sim.registers.set(A0, -1);

        sim.registers.set(V0, 34);
        handle(&mut sim, &statement).unwrap();
        sim.registers.set(V0, 36);
        handle(&mut sim, &statement).unwrap();

        let output = String::from_utf8_lossy(sim.io.captured_output().unwrap()).into_owned();
        assert_eq!(output, "0xffffffff4294967295");
    }
}
