use clap::Parser;
use ferrite_core::board::{Board, Config};
use goblin::elf::program_header::PT_LOAD;
use std::fs::File;
use std::io::Read;
use std::process::ExitCode;

/// Address the riscv-tests binaries report their result to: `1` means pass, any other odd value
/// encodes the number of the failing test case.
const SENTINEL_ADDRESS: u32 = 0x8000_1000;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    // Elf file to run (an rv32ui-p-* test binary)
    elf: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut buf = Vec::new();

    let mut file = match File::open(&args.elf) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("cannot open {}: {err}", args.elf);
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = file.read_to_end(&mut buf) {
        eprintln!("cannot read {}: {err}", args.elf);
        return ExitCode::FAILURE;
    }

    let elf_header = match goblin::elf::Elf::parse(&buf) {
        Ok(elf_header) => elf_header,
        Err(err) => {
            eprintln!("failed to parse elf file: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut board = Board::new(Config::default()).expect("default board config is valid");

    let segments = elf_header
        .program_headers
        .iter()
        .filter(|h| h.p_type == PT_LOAD);
    for h in segments {
        board.load_physical(h.p_paddr as u32, &buf[h.file_range()]);
    }

    // Run until the test binary reports its verdict, powers the board off, or dies.
    loop {
        if let Err(err) = board.step() {
            eprintln!("fatal: {err}");
            return ExitCode::from(err.exit_code());
        }
        let sentinel = board.read_physical_word(SENTINEL_ADDRESS);
        if sentinel != 0 {
            return report(sentinel);
        }
        if board.is_powered_down() {
            let sentinel = board.read_physical_word(SENTINEL_ADDRESS);
            return report(sentinel);
        }
    }
}

fn report(sentinel: u32) -> ExitCode {
    match sentinel {
        1 => {
            println!("ok");
            ExitCode::SUCCESS
        }
        0 => {
            eprintln!("powered down without reporting a result");
            ExitCode::FAILURE
        }
        value => {
            eprintln!("test {} failed (sentinel {value:#010x})", value >> 1);
            ExitCode::FAILURE
        }
    }
}
