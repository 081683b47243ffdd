#![forbid(unsafe_code)]
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use rsdelta::{
    hash_algorithm, rolling_checksum, DeltaApplier, DeltaBuilder, ProgressReport, SignatureBuilder,
    DEFAULT_CHUNK_SIZE,
};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "rsdelta",
    version,
    about = "rsync-style signature, delta and patch tool",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the signature of a basis file
    Signature {
        /// basis file
        #[arg(value_name = "BASIS")]
        basis_path: PathBuf,

        /// signature file to write
        #[arg(value_name = "SIGNATURE")]
        signature_path: PathBuf,

        /// chunk size in bytes
        #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// strong hash algorithm
        #[arg(long, value_name = "NAME", default_value = "XXH64")]
        hash: String,

        /// rolling checksum algorithm
        #[arg(long, value_name = "NAME", default_value = "Adler32")]
        rolling_checksum: String,

        /// print progress to stderr
        #[arg(long)]
        progress: bool,
    },

    /// Build a delta from a signature and a new file
    Delta {
        /// signature of the basis file
        #[arg(value_name = "SIGNATURE")]
        signature_path: PathBuf,

        /// new file
        #[arg(value_name = "NEW")]
        new_path: PathBuf,

        /// delta file to write
        #[arg(value_name = "DELTA")]
        delta_path: PathBuf,

        /// do not record the basis fingerprint
        #[arg(long)]
        no_basis_check: bool,

        /// print progress to stderr
        #[arg(long)]
        progress: bool,
    },

    /// Rebuild a new file from a basis file and a delta
    Patch {
        /// basis file
        #[arg(value_name = "BASIS")]
        basis_path: PathBuf,

        /// delta file
        #[arg(value_name = "DELTA")]
        delta_path: PathBuf,

        /// new file to write
        #[arg(value_name = "NEW")]
        new_path: PathBuf,

        /// print progress to stderr
        #[arg(long)]
        progress: bool,

        /// apply even if the basis file does not match the delta
        #[arg(long)]
        skip_verification: bool,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Delta(#[from] rsdelta::Error),
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = execute(cli.command) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn execute(command: Command) -> Result<(), CliError> {
    match command {
        Command::Signature {
            basis_path,
            signature_path,
            chunk_size,
            hash,
            rolling_checksum: rolling,
            progress,
        } => {
            let hash = hash_algorithm(&hash).ok_or(rsdelta::Error::UnknownHashAlgorithm(hash))?;
            let rolling =
                rolling_checksum(&rolling).ok_or(rsdelta::Error::UnknownRollingChecksum(rolling))?;
            let (basis, basis_len) = open_input(&basis_path)?;
            let signature = create_output(&signature_path)?;

            let mut builder = SignatureBuilder::new()
                .chunk_size(chunk_size)
                .hash_algorithm(hash)
                .rolling_checksum(rolling)
                .input_len(basis_len);
            if progress {
                builder = builder.progress(print_progress);
            }
            builder.build(basis, signature)?;
        }

        Command::Delta {
            signature_path,
            new_path,
            delta_path,
            no_basis_check,
            progress,
        } => {
            let (signature, _) = open_input(&signature_path)?;
            let (target, target_len) = open_input(&new_path)?;
            let delta = create_output(&delta_path)?;

            let mut builder = DeltaBuilder::new()
                .basis_check(!no_basis_check)
                .input_len(target_len);
            if progress {
                builder = builder.progress(print_progress);
            }
            builder.build(target, signature, delta)?;
        }

        Command::Patch {
            basis_path,
            delta_path,
            new_path,
            progress,
            skip_verification,
        } => {
            let (basis, _) = open_input(&basis_path)?;
            let (delta, delta_len) = open_input(&delta_path)?;
            let target = create_output(&new_path)?;

            let mut applier = DeltaApplier::new()
                .skip_verification(skip_verification)
                .input_len(delta_len);
            if progress {
                applier = applier.progress(print_progress);
            }
            applier.apply(basis, delta, target)?;
        }
    }
    Ok(())
}

fn print_progress(report: ProgressReport) {
    match report.percentage() {
        Some(percent) => eprintln!("{}: {}%", report.operation, percent),
        None => eprintln!("{}: {} bytes", report.operation, report.processed),
    }
}

fn open_input(path: &Path) -> Result<(BufReader<fs::File>, u64), CliError> {
    if !path.is_file() {
        return Err(CliError::NotFound(path.to_owned()));
    }
    let file = fs::File::open(path)?;
    let len = file.metadata()?.len();
    Ok((BufReader::new(file), len))
}

fn create_output(path: &Path) -> Result<BufWriter<fs::File>, CliError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    Ok(BufWriter::new(fs::File::create(path)?))
}
