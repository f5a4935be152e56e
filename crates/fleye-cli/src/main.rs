//! fleye - Convert raw FlEye sensor captures into canonical records
//!
//! This tool finds the recording sessions in a raw capture, validates every
//! frame inside them and writes the accepted frames as fixed-size records
//! tagged with their session id.

mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fleye_core::{CaptureConfig, ExtractionSummary, Extractor, Session};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Convert raw FlEye sensor captures into canonical fixed-width records
#[derive(Parser, Debug)]
#[command(name = "fleye")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Raw capture file to read
    #[arg(short, long)]
    input: PathBuf,

    /// File to write the reformatted records to
    #[arg(short, long, required_unless_present = "detect_only")]
    output: Option<PathBuf>,

    /// TOML configuration file (defaults to ./fleye.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of blocks read per chunk
    #[arg(long, env = "FLEYE_BLOCKS_PER_CHUNK")]
    blocks_per_chunk: Option<usize>,

    /// Number of blocks shared by consecutive chunks
    #[arg(long)]
    overlap_blocks: Option<usize>,

    /// Skip auxiliary checksum verification
    #[arg(long)]
    no_checksum: bool,

    /// Only list the detected sessions, don't extract frames
    #[arg(long)]
    detect_only: bool,

    /// Write log events to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Process exit codes
mod exit {
    pub(crate) const FAILURE: u8 = 1;
    pub(crate) const NO_SESSION: u8 = 2;
    pub(crate) const OPEN_FAILED: u8 = 3;
    pub(crate) const BAD_CONFIG: u8 = 4;
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(exit::FAILURE);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Initialize tracing, to stderr or to `--log-file`
fn init_logging(cli: &Cli) -> Result<()> {
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    match cli.log_file {
        Some(ref path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    if cli.input.exists() && !cli.input.is_file() {
        bail!("Input path is not a file: {}", cli.input.display());
    }

    let config = resolve_config(cli)?;
    let extractor = Extractor::new(config).context("Invalid capture configuration")?;

    if cli.detect_only {
        let sessions = extractor
            .detect(&cli.input)
            .with_context(|| format!("Failed to scan capture: {}", cli.input.display()))?;
        print_sessions(&sessions, extractor.config());
        return Ok(());
    }

    let Some(ref output) = cli.output else {
        bail!("--output is required unless --detect-only is given");
    };
    let summary = extractor
        .run(&cli.input, output)
        .with_context(|| format!("Failed to extract capture: {}", cli.input.display()))?;

    print_summary(&summary, output);
    Ok(())
}

/// Load the configuration file and apply command-line overrides
fn resolve_config(cli: &Cli) -> Result<CaptureConfig> {
    let mut config = config::load_config_or_default(cli.config.as_deref())?;

    if let Some(blocks) = cli.blocks_per_chunk {
        config.chunk.blocks_per_chunk = blocks;
    }
    if let Some(overlap) = cli.overlap_blocks {
        config.chunk.overlap_blocks = overlap;
    }
    if cli.no_checksum {
        config.validate_checksum = false;
    }

    info!(
        blocks_per_chunk = config.chunk.blocks_per_chunk,
        overlap_blocks = config.chunk.overlap_blocks,
        validate_checksum = config.validate_checksum,
        "Resolved configuration"
    );
    Ok(config)
}

fn print_sessions(sessions: &[Session], config: &CaptureConfig) {
    if sessions.is_empty() {
        println!("No valid session found");
        return;
    }
    for (id, session) in sessions.iter().enumerate() {
        let body = session.len().saturating_sub(config.run_start.len() as u64);
        println!(
            "session {}: {} ({} bytes, room for {} frames)",
            id,
            session,
            session.len(),
            body / config.frame_length as u64
        );
    }
}

fn print_summary(summary: &ExtractionSummary, output: &Path) {
    println!(
        "Wrote {} records from {} sessions to {}",
        summary.written,
        summary.sessions.len(),
        output.display()
    );
    println!(
        "  {} rejected, {} outside sessions, {} advisories, {} write failures",
        summary.rejected, summary.outside_session, summary.advisories, summary.write_failures
    );
}

/// Map a failure onto the process exit code
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(core) = cause.downcast_ref::<fleye_core::Error>() {
            return match core {
                fleye_core::Error::NoValidSession => exit::NO_SESSION,
                fleye_core::Error::FileOpen { .. } => exit::OPEN_FAILED,
                fleye_core::Error::InvalidConfig(_) => exit::BAD_CONFIG,
                _ => exit::FAILURE,
            };
        }
        if cause.downcast_ref::<toml::de::Error>().is_some() {
            return exit::BAD_CONFIG;
        }
    }
    exit::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_output_required_unless_detect_only() {
        assert!(Cli::try_parse_from(["fleye", "-i", "capture.bin"]).is_err());
        assert!(Cli::try_parse_from(["fleye", "-i", "capture.bin", "--detect-only"]).is_ok());
        assert!(Cli::try_parse_from(["fleye", "-i", "capture.bin", "-o", "out.bin"]).is_ok());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "fleye",
            "-i",
            "capture.bin",
            "-o",
            "out.bin",
            "--blocks-per-chunk",
            "20",
            "--overlap-blocks",
            "4",
            "--no-checksum",
        ])
        .unwrap();

        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.chunk.blocks_per_chunk, 20);
        assert_eq!(config.chunk.overlap_blocks, 4);
        assert!(!config.validate_checksum);
    }

    #[test]
    fn test_exit_codes() {
        let err = anyhow::Error::new(fleye_core::Error::NoValidSession).context("extracting");
        assert_eq!(exit_code(&err), exit::NO_SESSION);

        let err = anyhow::Error::new(fleye_core::Error::invalid_config("overlap"));
        assert_eq!(exit_code(&err), exit::BAD_CONFIG);

        let err = anyhow::anyhow!("something else");
        assert_eq!(exit_code(&err), exit::FAILURE);
    }

    #[test]
    fn test_missing_input_maps_to_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.bin");
        let cli = Cli::try_parse_from([
            "fleye",
            "-i",
            input.to_str().unwrap(),
            "--detect-only",
        ])
        .unwrap();

        let err = run(&cli).unwrap_err();
        assert_eq!(exit_code(&err), exit::OPEN_FAILED);
    }

    #[test]
    fn test_extract_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("capture.bin");
        let output = dir.path().join("frames.bin");
        // A single empty session
        let mut data = vec![0xBB; 512];
        data.extend(vec![0xEB; 512]);
        std::fs::write(&input, data).unwrap();

        let cli = Cli::try_parse_from([
            "fleye",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .unwrap();

        run(&cli).unwrap();
        assert_eq!(std::fs::read(&output).unwrap().len(), 0);
    }
}
