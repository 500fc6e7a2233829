use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use clap_num::maybe_hex;

use mmflash::catalog::Catalog;
use mmflash::flashing::Options;
use mmflash::progress::ConsoleReporter;
use mmflash::{config, driver, flashing};

/// System-wide configuration file, tried before the working-directory one.
const SYSTEM_CONFIG: &str = "/etc/mmflash.conf";
const LOCAL_CONFIG: &str = "./mmflash.conf";

#[derive(clap::Parser)]
#[command(
    name = "mmflash",
    version,
    about = "Identify and reflash a memory-mapped flash chip"
)]
struct Cli {
    /// Program the flash with the given image file
    #[arg(short, long, value_name = "FILE")]
    program: Option<PathBuf>,

    /// Read the whole flash back into the given file
    #[arg(short, long, value_name = "FILE")]
    readback: Option<PathBuf>,

    /// Start offset in the flash (decimal, or hex with 0x prefix)
    #[arg(
        short = 'a',
        long = "offset",
        value_name = "OFFSET",
        value_parser = maybe_hex::<u32>,
        default_value = "0"
    )]
    start_offset: u32,

    /// Verbose informational messages
    #[arg(short, long)]
    verbose: bool,

    /// Use the given flash types configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Programming backend to drive
    #[arg(long, value_name = "NAME", default_value = "dummy")]
    programmer: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = simplelog::TermLogger::init(
        if cli.verbose {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let mut catalog = Catalog::builtin();
    match read_config(cli.config.as_deref()) {
        Some((path, raw)) => {
            let added = config::merge_config(&mut catalog, &raw);
            log::info!("{} flash types added from {}", added, path.display());
        }
        None => log::info!("no configuration file found, using built-in list"),
    }
    log::info!("total known flash types: {}", catalog.len());
    for signature in catalog.iter() {
        log::debug!("  {}", signature);
    }

    let mut driver = driver::open(&cli.programmer)?;
    let mut reporter = ConsoleReporter::new();
    let opts = Options {
        program: cli.program,
        readback: cli.readback,
        start_offset: cli.start_offset,
    };
    flashing::run(driver.as_mut(), &catalog, &opts, &mut reporter)
}

/// The explicit path only if `-c` was given; otherwise the system-wide file
/// first, the working-directory file second. A missing file is not an
/// error.
fn read_config(explicit: Option<&Path>) -> Option<(PathBuf, Vec<u8>)> {
    let candidates: Vec<PathBuf> = match explicit {
        Some(path) => vec![path.to_path_buf()],
        None => vec![PathBuf::from(SYSTEM_CONFIG), PathBuf::from(LOCAL_CONFIG)],
    };
    for path in candidates {
        match fs::read(&path) {
            Ok(raw) => return Some((path, raw)),
            Err(error) => log::debug!("cannot read {}: {}", path.display(), error),
        }
    }
    None
}
