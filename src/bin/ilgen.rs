//! Generate IL for one of the built-in kernels.
//!
//! Prints the program text to stdout. With `--cache-dir` the text is also
//! pushed through the program cache, and the cache key and lookup source are
//! reported on stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ilgen::driver::{self, Device, ProgramCache, TextImageCompiler};
use ilgen::il::GeneratorOptions;
use ilgen::kernels::{self, KERNELS};

/// ilgen: IL source generator for compute kernels
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Kernel to generate
    #[arg(required_unless_present = "list")]
    kernel: Option<String>,

    /// Target device preset (rv770, cypress, cayman); portable defaults when omitted
    #[arg(short, long, value_parser = parse_device)]
    device: Option<Device>,

    /// Threads per group (default: the device wavefront width)
    #[arg(short, long)]
    threads: Option<u32>,

    /// Print only the declaration header
    #[arg(long, conflicts_with = "code_only")]
    header_only: bool,

    /// Print only the instruction stream
    #[arg(long)]
    code_only: bool,

    /// Print unit statistics to stderr
    #[arg(long)]
    stats: bool,

    /// Mirror compiled programs into this directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// List the built-in kernels and exit
    #[arg(long)]
    list: bool,
}

fn parse_device(s: &str) -> Result<Device, String> {
    Device::by_name(s).ok_or_else(|| {
        let known: Vec<_> = Device::ALL.iter().map(|d| d.name).collect();
        format!("unknown device '{s}' (available: {})", known.join(", "))
    })
}

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.list {
        for kernel in &KERNELS {
            println!("{:<14} {}", kernel.name, kernel.description);
        }
        return Ok(());
    }

    let name = cli.kernel.as_deref().unwrap_or_default();
    let kernel = kernels::find(name).ok_or_else(|| {
        let known: Vec<_> = KERNELS.iter().map(|k| k.name).collect();
        format!("unknown kernel '{name}' (available: {})", known.join(", "))
    })?;

    let options = GeneratorOptions {
        threads_per_group: cli.threads,
    };
    let generated = kernels::generate(kernel, cli.device.map(|d| d.query()), &options)?;

    if !cli.code_only {
        print!("{}", generated.program.header);
    }
    if !cli.header_only {
        print!("{}", generated.program.code);
    }

    if cli.stats {
        eprint!("{}", generated.stats);
    }

    if let Some(dir) = &cli.cache_dir {
        let device = cli.device.unwrap_or(Device::CYPRESS);
        let cache = ProgramCache::with_dir(TextImageCompiler, dir)?;
        let lookup = driver::compile_kernel(&cache, kernel, &device, &options)?;
        eprintln!(
            "cache: {} {:?} ({} bytes) for {}",
            lookup.key,
            lookup.source,
            lookup.binary.len(),
            device
        );
    }

    Ok(())
}
