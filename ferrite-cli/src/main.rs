use clap::Parser;
use ferrite_core::board::{Board, BoardError, Config};
use ferrite_core::core::FatalError;
use ferrite_core::resources::syscon::PowerState;
use log::{error, info, LevelFilter};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "emulator", version, about, long_about = None)]
struct Args {
    /// Flat kernel (or bare-metal) image, loaded at the page offset.
    executable: PathBuf,
    /// RAM size in bytes.
    #[arg(short, long, default_value_t = 64 * 1024 * 1024)]
    memory_size: usize,
    /// Device tree blob, placed at the end of RAM and passed to the kernel in a1.
    #[arg(short, long)]
    dtb: Option<PathBuf>,
    /// Guest physical address of the first RAM byte.
    #[arg(short = 'o', long, default_value_t = 0x8000_0000)]
    page_offset: u32,
    /// Enable debug logging.
    #[arg(short = 'e', long)]
    debug: bool,
}

#[derive(Error, Debug)]
enum RunError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("device tree blob does not fit in RAM")]
    DtbTooLarge,
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl RunError {
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Fatal(fatal) => ExitCode::from(fatal.exit_code()),
            _ => ExitCode::FAILURE,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(match args.debug {
            true => LevelFilter::Debug,
            false => LevelFilter::Warn,
        })
        .init();

    match run(&args) {
        Ok(state) => {
            info!("guest requested {state:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            err.exit_code()
        }
    }
}

fn run(args: &Args) -> Result<PowerState, RunError> {
    let image = read_file(&args.executable)?;

    let mut board = Board::new(Config {
        mem_size: args.memory_size,
        page_offset: args.page_offset,
    })?;
    board.load_physical(args.page_offset, &image);
    info!(
        "loaded {} bytes of executable at {:#010x}",
        image.len(),
        args.page_offset
    );

    match &args.dtb {
        Some(path) => {
            let dtb = read_file(path)?;
            board.load_dtb(&dtb).ok_or(RunError::DtbTooLarge)?;
        }
        None => board.set_boot_registers(None),
    }

    while !board.is_powered_down() {
        board.step()?;
    }
    Ok(board.power_state())
}

fn read_file(path: &Path) -> Result<Vec<u8>, std::io::Error> {
    let mut buf = Vec::new();
    let mut file = File::open(path)?;
    file.read_to_end(&mut buf)?;
    Ok(buf)
}
