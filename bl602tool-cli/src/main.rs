//! bl602tool CLI - Command-line tool for flashing BL602 chips.
//!
//! ## Features
//!
//! - Inspect and validate boot images offline
//! - Query the boot ROM
//! - Upload the RAM loader, then erase, write, read and self-test flash
//! - Environment variable and config file support

use anyhow::{Context, Result};
use bl602tool::port::BOOTROM_BAUD;
use clap::{CommandFactory, Parser};
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

mod commands;
mod config;

use commands::device::{ReadRequest, SessionPlan};
use config::{Config, Framing};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Errors with a dedicated exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Invalid combination or value of arguments.
    #[error("{0}")]
    Usage(String),
    /// Missing or unusable configuration.
    #[error("{0}")]
    Config(String),
    /// The serial port could not be opened.
    #[error("Cannot open serial port {0}")]
    PortOpen(String),
    /// An input file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(String),
    /// Stopped by Ctrl-C.
    #[error("Cancelled during: {0}")]
    Cancelled(String),
}

impl CliError {
    /// Process exit code for this error.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::PortOpen(_) => 4,
            Self::FileNotFound(_) => 1,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map any error escaping `run` to an exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<bl602tool::Error>() {
        Some(bl602tool::Error::Interrupted) => 130,
        _ => 1,
    }
}

/// bl602tool - Flash BL602 chips through the boot ROM UART protocol.
///
/// Environment variables:
///   BL602TOOL_PORT    - Default serial port
///   BL602TOOL_BAUD    - Requested baud rate (the boot ROM always runs at 115200)
///   BL602TOOL_LOADER  - Default RAM loader image
#[derive(Parser, Debug)]
#[command(name = "bl602tool")]
#[command(author, version, about, long_about = None)]
#[command(
    after_help = "Operations run in this order: image info, sync, boot info, loader upload, erase, write, read, self-test."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use.
    #[arg(short, long, env = "BL602TOOL_PORT")]
    port: Option<String>,

    /// Requested baud rate.
    #[arg(short, long, env = "BL602TOOL_BAUD")]
    baud: Option<u32>,

    /// Second-stage RAM loader image (needed for flash operations).
    #[arg(short, long, env = "BL602TOOL_LOADER")]
    loader: Option<PathBuf>,

    /// Write FILE to flash at --address.
    #[arg(short = 'w', long, alias = "wf", value_name = "FILE")]
    write_flash: Option<PathBuf>,

    /// Flash start address (hex).
    #[arg(short, long, value_parser = parse_hex_u32)]
    address: Option<u32>,

    /// Erase the whole flash.
    #[arg(short, long, alias = "ef")]
    erase_flash: bool,

    /// Erase, write a test pattern, read it back and compare.
    #[arg(short = 't', long)]
    self_test: bool,

    /// Self-test length in bytes.
    #[arg(long, alias = "tl", default_value_t = 4096)]
    test_length: u32,

    /// Print and validate the boot header of FILE.
    #[arg(short, long, value_name = "FILE")]
    image_info: Option<PathBuf>,

    /// Output image info as JSON on stdout.
    #[arg(long, requires = "image_info")]
    json: bool,

    /// Read SIZE bytes of flash at --address into OUTFILE.
    #[arg(
        short,
        long,
        alias = "rf",
        num_args = 2,
        value_names = ["SIZE", "OUTFILE"]
    )]
    read_flash: Option<Vec<String>>,

    /// Query the boot ROM version and OTP info.
    #[arg(long)]
    boot_info: bool,

    /// Reply framing policy.
    #[arg(long, value_enum)]
    framing: Option<Framing>,

    /// Verbose output (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (warnings and errors only).
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to config file (replaces the global and local files).
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
}

impl Cli {
    /// Whether any operation was requested.
    fn has_operation(&self) -> bool {
        self.image_info.is_some()
            || self.boot_info
            || self.erase_flash
            || self.write_flash.is_some()
            || self.read_flash.is_some()
            || self.self_test
    }

    /// The `--write-flash` file, if it was given but does not exist.
    fn missing_write_file(&self) -> Option<&Path> {
        self.write_flash.as_deref().filter(|path| !path.is_file())
    }
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Parse a byte count, decimal or `0x` hex.
fn parse_size(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if s.starts_with("0x") || s.starts_with("0X") {
        return parse_hex_u32(s);
    }
    s.parse::<u32>()
        .map_err(|e| format!("Invalid size '{s}': {e}"))
}

/// Split the two `--read-flash` values.
fn parse_read_args(args: &[String]) -> Result<ReadRequest, CliError> {
    let [size, output] = args else {
        return Err(CliError::Usage(
            "--read-flash expects <SIZE> <OUTFILE>".to_string(),
        ));
    };
    let size = parse_size(size).map_err(CliError::Usage)?;
    Ok(ReadRequest {
        size,
        output: PathBuf::from(output),
    })
}

fn main() {
    if env::args().len() <= 1 {
        let _ = Cli::command().print_help();
        std::process::exit(0);
    }

    let cli = Cli::parse();

    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code_for(&err)
        },
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "bl602tool v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    if !cli.has_operation() {
        return Err(CliError::Usage(
            "nothing to do; pass an operation such as --image-info or --write-flash (see --help)"
                .to_string(),
        )
        .into());
    }

    let mut failures = 0;

    if let Some(path) = &cli.image_info {
        match commands::image::cmd_image_info(path, cli.json) {
            Ok(true) => {},
            Ok(false) => failures += 1,
            Err(e) => {
                eprintln!("{} {e:#}", style("Error:").red().bold());
                failures += 1;
            },
        }
    }

    if let Some(path) = cli.missing_write_file() {
        eprintln!(
            "{} Write {}: {}",
            style("✗").red(),
            path.display(),
            CliError::FileNotFound(path.display().to_string())
        );
        failures += 1;
    }

    if let Some(plan) = build_plan(cli, &config)? {
        failures += commands::device::run_session(&plan, cli.quiet)?;
    }

    if failures > 0 {
        if !cli.quiet {
            eprintln!(
                "\n{} {failures} operation(s) failed",
                style("✗").red().bold()
            );
        }
        return Ok(1);
    }
    Ok(0)
}

/// Route Ctrl-C into the library's interruption hook.
fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    bl602tool::set_interrupt_checker(was_interrupted);
}

/// Resolve device operations against flags, environment and config.
///
/// Returns `None` when nothing needs the device. All input files are read
/// here, before the port is opened. A missing write file drops the write
/// from the plan.
fn build_plan(cli: &Cli, config: &Config) -> Result<Option<SessionPlan>> {
    let mut plan = SessionPlan {
        boot_info: cli.boot_info,
        erase: cli.erase_flash,
        self_test: cli.self_test.then_some(cli.test_length),
        ..Default::default()
    };

    if let Some(args) = &cli.read_flash {
        plan.read = Some(parse_read_args(args)?);
    }

    // A missing write file is reported by `run`; the rest still runs.
    if let Some(path) = cli.write_flash.as_ref().filter(|path| path.is_file()) {
        let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        plan.write = Some((path.clone(), data));
    }

    if !plan.needs_device() {
        return Ok(None);
    }

    plan.port = cli
        .port
        .clone()
        .or_else(|| config.connection.port.clone())
        .ok_or_else(|| {
            CliError::Config(
                "no serial port given; use --port, BL602TOOL_PORT or [connection] port".to_string(),
            )
        })?;
    plan.baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(BOOTROM_BAUD);
    plan.framing = cli
        .framing
        .or(config.flash.framing)
        .unwrap_or_default()
        .into();
    plan.address = cli
        .address
        .or(config.flash.start_address)
        .unwrap_or(0);

    if plan.needs_loader() {
        let path = cli
            .loader
            .clone()
            .or_else(|| config.loader.path.clone())
            .ok_or_else(|| {
                CliError::Config(
                    "flash operations need a RAM loader; use --loader, BL602TOOL_LOADER or [loader] path"
                        .to_string(),
                )
            })?;
        if !path.is_file() {
            return Err(CliError::FileNotFound(path.display().to_string()).into());
        }
        let loader = fs::read(&path)
            .with_context(|| format!("Failed to read loader {}", path.display()))?;
        debug!("Loaded RAM loader {} ({} bytes)", path.display(), loader.len());
        plan.loader = Some(loader);
    }

    Ok(Some(plan))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bl602tool::ReplyFraming;
    use std::ffi::OsStr;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("bl602tool").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_write_flash() {
        let cli = parse(&["-p", "/dev/ttyUSB0", "-l", "loader.bin", "-w", "fw.bin", "-a", "0x2000"]);
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.loader, Some(PathBuf::from("loader.bin")));
        assert_eq!(cli.write_flash, Some(PathBuf::from("fw.bin")));
        assert_eq!(cli.address, Some(0x2000));
    }

    #[test]
    fn test_cli_parse_aliases() {
        let cli = parse(&["--wf", "fw.bin", "--ef", "--tl", "512", "--rf", "16", "out.bin"]);
        assert_eq!(cli.write_flash, Some(PathBuf::from("fw.bin")));
        assert!(cli.erase_flash);
        assert_eq!(cli.test_length, 512);
        assert_eq!(
            cli.read_flash,
            Some(vec!["16".to_string(), "out.bin".to_string()])
        );
    }

    #[test]
    fn test_cli_parse_read_flash_needs_two_values() {
        assert!(Cli::try_parse_from(["bl602tool", "-r", "16"]).is_err());
    }

    #[test]
    fn test_cli_parse_image_info_json() {
        let cli = parse(&["-i", "fw.bin", "--json"]);
        assert_eq!(cli.image_info, Some(PathBuf::from("fw.bin")));
        assert!(cli.json);
    }

    #[test]
    fn test_cli_json_requires_image_info() {
        assert!(Cli::try_parse_from(["bl602tool", "--json"]).is_err());
    }

    #[test]
    fn test_cli_parse_framing() {
        let cli = parse(&["--boot-info", "--framing", "length-prefixed"]);
        assert_eq!(cli.framing, Some(Framing::LengthPrefixed));
        assert!(Cli::try_parse_from(["bl602tool", "--framing", "bogus"]).is_err());
    }

    #[test]
    fn test_cli_default_values() {
        let cli = parse(&["--boot-info"]);
        assert_eq!(cli.test_length, 4096);
        assert!(cli.address.is_none());
        assert!(cli.framing.is_none());
        assert!(!cli.self_test);
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_cli_verbose_and_quiet_conflict() {
        let cli = parse(&["-vv", "--boot-info"]);
        assert_eq!(cli.verbose, 2);
        assert!(Cli::try_parse_from(["bl602tool", "-v", "-q"]).is_err());
    }

    #[test]
    fn test_cli_has_operation() {
        assert!(!parse(&["-p", "COM3"]).has_operation());
        assert!(parse(&["-t"]).has_operation());
        assert!(parse(&["-e"]).has_operation());
    }

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32("0x00800000"), Ok(0x0080_0000));
        assert_eq!(parse_hex_u32("2000"), Ok(0x2000));
        assert_eq!(parse_hex_u32("0x00_80_00_00"), Ok(0x0080_0000));
        assert_eq!(parse_hex_u32(" 0X10 "), Ok(0x10));
        assert!(parse_hex_u32("0xZZ").is_err());
        assert!(parse_hex_u32("0x100000000").is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("0x1000"), Ok(4096));
        assert!(parse_size("-1").is_err());
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_parse_read_args() {
        let read = parse_read_args(&["0x200".to_string(), "dump.bin".to_string()]).unwrap();
        assert_eq!(read.size, 0x200);
        assert_eq!(read.output, PathBuf::from("dump.bin"));

        let err = parse_read_args(&["ten".to_string(), "dump.bin".to_string()]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Usage(String::new()).exit_code(), 2);
        assert_eq!(CliError::Config(String::new()).exit_code(), 3);
        assert_eq!(CliError::PortOpen(String::new()).exit_code(), 4);
        assert_eq!(CliError::FileNotFound(String::new()).exit_code(), 1);
        assert_eq!(CliError::Cancelled(String::new()).exit_code(), 130);
    }

    #[test]
    fn test_exit_code_for_wrapped_errors() {
        let err = anyhow::Error::from(CliError::PortOpen("COM9".to_string())).context("opening");
        assert_eq!(exit_code_for(&err), 4);

        let err = anyhow::Error::from(bl602tool::Error::Interrupted);
        assert_eq!(exit_code_for(&err), 130);

        let err = anyhow::Error::from(bl602tool::Error::NoReply);
        assert_eq!(exit_code_for(&err), 1);
    }

    #[test]
    fn test_build_plan_offline_only() {
        let cli = parse(&["-i", "fw.bin"]);
        assert!(build_plan(&cli, &Config::default()).unwrap().is_none());
    }

    #[test]
    fn test_build_plan_requires_port() {
        let cli = parse(&["--boot-info"]);
        let err = build_plan(&cli, &Config::default()).unwrap_err();
        assert_eq!(exit_code_for(&err), 3);
    }

    #[test]
    fn test_build_plan_requires_loader_for_flash() {
        let cli = parse(&["-p", "COM3", "-e"]);
        let err = build_plan(&cli, &Config::default()).unwrap_err();
        assert_eq!(exit_code_for(&err), 3);
    }

    #[test]
    fn test_build_plan_missing_write_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.bin");
        let cli = Cli::try_parse_from([
            OsStr::new("bl602tool"),
            OsStr::new("-w"),
            missing.as_os_str(),
        ])
        .unwrap();
        assert_eq!(cli.missing_write_file(), Some(missing.as_path()));
        assert!(build_plan(&cli, &Config::default()).unwrap().is_none());
    }

    #[test]
    fn test_build_plan_missing_write_file_keeps_other_operations() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.bin");
        let loader = dir.path().join("loader.bin");
        fs::write(&loader, [0u8; 200]).unwrap();
        let cli = Cli::try_parse_from([
            OsStr::new("bl602tool"),
            OsStr::new("-p"),
            OsStr::new("COM3"),
            OsStr::new("-e"),
            OsStr::new("-w"),
            missing.as_os_str(),
            OsStr::new("-l"),
            loader.as_os_str(),
        ])
        .unwrap();

        let plan = build_plan(&cli, &Config::default()).unwrap().unwrap();
        assert!(plan.erase);
        assert!(plan.write.is_none());
        assert!(plan.loader.is_some());
    }

    #[test]
    fn test_build_plan_uses_config_fallbacks() {
        let dir = tempdir().unwrap();
        let loader = dir.path().join("loader.bin");
        fs::write(&loader, [0u8; 200]).unwrap();

        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyUSB1".to_string());
        config.connection.baud = Some(230_400);
        config.loader.path = Some(loader);
        config.flash.start_address = Some(0x1000);
        config.flash.framing = Some(Framing::LengthPrefixed);

        let cli = parse(&["-t"]);
        let plan = build_plan(&cli, &config).unwrap().unwrap();
        assert_eq!(plan.port, "/dev/ttyUSB1");
        assert_eq!(plan.baud, 230_400);
        assert_eq!(plan.address, 0x1000);
        assert_eq!(plan.framing, ReplyFraming::LengthPrefixed);
        assert_eq!(plan.self_test, Some(4096));
        assert_eq!(plan.loader.as_ref().map(Vec::len), Some(200));
    }

    #[test]
    fn test_build_plan_flags_override_config() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyUSB1".to_string());
        config.flash.framing = Some(Framing::LengthPrefixed);

        let cli = parse(&["-p", "COM3", "--framing", "settle", "--boot-info"]);
        let plan = build_plan(&cli, &config).unwrap().unwrap();
        assert_eq!(plan.port, "COM3");
        assert_eq!(plan.baud, BOOTROM_BAUD);
        assert_eq!(plan.framing, ReplyFraming::SettleDelay);
        assert!(plan.loader.is_none());
    }
}
