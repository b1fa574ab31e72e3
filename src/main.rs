use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use nuclide_lift::{decoder::DecoderRegistry, format::OutputFormat, translate::Translator, DebugInfo};

/// Inputs of this size or larger are rejected before translation
const MAX_INPUT_SIZE: u64 = 10 * 1024 * 1024;

/// Lift raw machine code into a target-independent IR.
#[derive(Parser, Debug)]
#[command(name = "nuclide-lift", version, about, long_about = None)]
struct Cli {
    /// Input architecture (x86, x86_64, arm, thumb, aarch64, mips32, riscv32, riscv64, ppc32)
    #[arg(short, long)]
    architecture: String,

    /// Offset in the input where translation starts (decimal or 0x-prefixed)
    #[arg(short, long, default_value = "0", value_parser = parse_offset)]
    offset: usize,

    /// Debug information to attach to the emitted IR
    #[arg(short = 'g', long = "debug", value_enum, default_value_t = DebugInfo::None)]
    debug_info: DebugInfo,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Log every block as it is translated
    #[arg(short, long)]
    verbose: bool,

    /// Input file, standard input when missing
    input: Option<PathBuf>,

    /// Output file, standard output when missing
    output: Option<PathBuf>,
}

fn parse_offset(s: &str) -> Result<usize, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid offset {:?}: {}", s, e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    // Configuration errors are reported before any input is read
    let decoder = DecoderRegistry::with_builtin()
        .resolve(&cli.architecture)
        .context("Couldn't get the decoder")?;

    let code = read_input(cli.input.as_ref())?;
    let region = nuclide_lift::region(&code, cli.offset, code.len().saturating_sub(cli.offset))
        .context("Invalid offset")?;
    log::info!("Lifting {} bytes for {}", region.len(), cli.architecture);

    let function = Translator::new(decoder.as_ref())
        .with_debug_info(cli.debug_info)
        .translate(region, 0);
    if function.is_partial() {
        log::warn!("Part of the input could not be decoded");
    }

    let rendered = cli
        .format
        .render(&function)
        .with_context(|| format!("Couldn't render the {} output", cli.format))?;
    write_output(cli.output.as_ref(), &rendered)
}

fn read_input(path: Option<&PathBuf>) -> Result<Vec<u8>> {
    let mut code = Vec::new();
    match path {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("Couldn't open {}", path.display()))?;
            file.take(MAX_INPUT_SIZE + 1)
                .read_to_end(&mut code)
                .with_context(|| format!("Couldn't read {}", path.display()))?;
        }
        None => {
            io::stdin()
                .lock()
                .take(MAX_INPUT_SIZE + 1)
                .read_to_end(&mut code)
                .context("Couldn't read standard input")?;
        }
    }

    if code.len() as u64 >= MAX_INPUT_SIZE {
        bail!("Input too large");
    }
    Ok(code)
}

fn write_output(path: Option<&PathBuf>, rendered: &str) -> Result<()> {
    match path {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("Couldn't write {}", path.display())),
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(rendered.as_bytes())
                .and_then(|_| stdout.flush())
                .context("Couldn't write standard output")
        }
    }
}
