use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use ucode_cpio::firmware::{HOST_UCODE_DIR_AMD, HOST_UCODE_DIR_INTEL};
use ucode_cpio::output::SOURCE_DATE_EPOCH;
use ucode_cpio::{Config, HostLayout, Mode, Signature};

/// Build an early-load microcode CPIO image for the initramfs.
#[derive(Debug, Parser)]
#[command(name = "ucode-cpio", version)]
struct Cli {
    /// Output image file
    #[arg(short, long, default_value = "ucode.img")]
    output: PathBuf,

    /// Include all available microcode files into the image
    #[arg(long, conflicts_with = "cpu")]
    universal: bool,

    /// Build for this CPU instead of the running one, e.g. intel:06-8e-0a
    #[arg(long, value_name = "VENDOR:FF-MM-SS")]
    cpu: Option<Signature>,

    /// Directory holding Intel microcode files
    #[arg(long, env = "UCODE_INTEL_DIR", default_value = HOST_UCODE_DIR_INTEL)]
    intel_dir: PathBuf,

    /// Directory holding AMD microcode files
    #[arg(long, env = "UCODE_AMD_DIR", default_value = HOST_UCODE_DIR_AMD)]
    amd_dir: PathBuf,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ucode_cpio={level}")));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(cli: Cli) -> Result<()> {
    let mode = if cli.universal {
        Mode::Universal
    } else {
        Mode::Host(cli.cpu)
    };
    let config = Config {
        output: cli.output,
        mode,
        layout: HostLayout {
            intel_dir: cli.intel_dir,
            amd_dir: cli.amd_dir,
        },
        source_date_epoch: env::var(SOURCE_DATE_EPOCH).ok(),
    };

    ucode_cpio::generate(&config)
        .with_context(|| format!("failed to generate {}", config.output.display()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
