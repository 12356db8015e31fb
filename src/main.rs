//! Command-line driver: assemble MIPS source files, optionally dump memory
//! segments, and run the program in the simulator.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{debug, error};

use mips_ensemble::asm::{self, AssemblerFlags};
use mips_ensemble::dump::{self, DumpFormat};
use mips_ensemble::isa::InstructionSet;
use mips_ensemble::parse::Tokenizer;
use mips_ensemble::sim::mem::{Endianness, MemoryConfiguration};
use mips_ensemble::sim::{FinishReason, RunResult, Simulator, SimulatorOptions};

#[derive(Parser)]
#[command(name = "mips-ensemble", version, about = "MIPS32 assembler and simulator")]
struct Cli {
    /// MIPS assembly source files, assembled together in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Enable delayed branching.
    #[arg(long)]
    db: bool,

    /// Assemble and simulate big-endian.
    #[arg(long)]
    be: bool,

    /// Permit extended (pseudo) instructions. This is the default.
    #[arg(long)]
    pseudo: bool,

    /// Forbid extended (pseudo) instructions.
    #[arg(long, conflicts_with = "pseudo")]
    np: bool,

    /// Treat assembler warnings as errors.
    #[arg(long)]
    ae: bool,

    /// Assemble only; do not simulate.
    #[arg(short = 'a', long)]
    assemble_only: bool,

    /// Permit programs to write into the text segment.
    #[arg(long)]
    smc: bool,

    /// Memory configuration: default or compact.
    #[arg(long, default_value = "default")]
    mc: String,

    /// Maximum number of instructions to simulate.
    #[arg(long)]
    limit: Option<u64>,

    /// Dump a segment after assembly: SEG FMT FILE (e.g. .text hex out.txt).
    /// May be repeated.
    #[arg(long, num_args = 3, value_names = ["SEG", "FMT", "FILE"], action = clap::ArgAction::Append)]
    dump: Vec<String>,
}

const EXIT_ASSEMBLY_FAILED: u8 = 1;
const EXIT_BAD_USAGE: u8 = 2;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let Some(config) = MemoryConfiguration::by_identifier(&cli.mc) else {
        error!("unknown memory configuration '{}'", cli.mc);
        return ExitCode::from(EXIT_BAD_USAGE);
    };

    let options = SimulatorOptions { delayed_branching: cli.db, ..Default::default() };
    let mut sim = Simulator::new(config, options);
    if cli.be {
        sim.memory.set_endianness(Endianness::Big);
    }
    sim.memory.set_self_modifying_code(cli.smc);

    // Tokenize every file up front so all lexical diagnostics are gathered.
    let mut errors = mips_ensemble::err::ErrorList::new();
    let mut tokenizer = Tokenizer::new(InstructionSet::global(), &mut errors);
    let files: Vec<_> = cli.files.iter().map(|path| tokenizer.tokenize_file(path)).collect();
    if errors.errors_occurred() {
        eprint!("{errors}");
        return ExitCode::from(EXIT_ASSEMBLY_FAILED);
    }

    let flags = AssemblerFlags {
        extended_mode: !cli.np,
        delayed_branching: cli.db,
        warnings_are_errors: cli.ae,
    };
    let program = match asm::assemble(&files, &mut sim.memory, flags) {
        Ok(program) => program,
        Err(errors) => {
            eprint!("{errors}");
            return ExitCode::from(EXIT_ASSEMBLY_FAILED);
        }
    };
    debug!("assembled {} statements", program.statements.len());

    for request in cli.dump.chunks(3) {
        let [segment, format, path] = request else { unreachable!("clap enforces groups of 3") };
        if let Err(message) = write_dump(&sim.memory, segment, format, path) {
            error!("{message}");
            return ExitCode::from(EXIT_BAD_USAGE);
        }
    }

    if cli.assemble_only {
        return ExitCode::SUCCESS;
    }

    sim.registers.set_pc(program.entry_point);

    // The interpreter loop runs on its own worker thread; the CLI just waits
    // for it, which also leaves the control handle usable from signal
    // handlers or other threads.
    let handle = sim.run_in_thread(cli.limit);
    let (_, result) = handle.join().expect("simulator thread panicked");

    match result {
        RunResult::Finished(FinishReason::Exception(exception)) => {
            eprintln!("Runtime exception: {exception}");
            ExitCode::from(FinishReason::Exception(exception).exit_code() as u8)
        }
        RunResult::Finished(reason) => ExitCode::from(reason.exit_code() as u8),
        RunResult::Paused(_) => {
            // Step budget exhausted counts as a clean stop for the CLI.
            ExitCode::SUCCESS
        }
    }
}

fn write_dump(
    memory: &mips_ensemble::sim::mem::Memory,
    segment: &str,
    format: &str,
    path: &str,
) -> Result<(), String> {
    let Some((low, high)) = dump::segment_range(memory, segment) else {
        return Err(format!("unknown dump segment '{segment}'"));
    };
    let Some(format) = DumpFormat::from_identifier(format) else {
        return Err(format!("unknown dump format '{format}'"));
    };
    let file = std::fs::File::create(path).map_err(|e| format!("cannot create {path}: {e}"))?;
    let mut writer = std::io::BufWriter::new(file);
    dump::dump_range(memory, low, high, format, &mut writer)
        .map_err(|e| format!("cannot write {path}: {e}"))
}
