//! Serial session: sync, boot info, loader upload and flash operations.

use anyhow::{Context, Result, anyhow};
use bl602tool::{Bl602Flasher, NativePort, ReplyFraming};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::fs;
use std::path::PathBuf;

use crate::{CliError, use_fancy_output, was_interrupted};

/// Flash region to dump into a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReadRequest {
    /// Bytes to read.
    pub size: u32,
    /// Destination file.
    pub output: PathBuf,
}

/// Everything one invocation asks of the device, resolved before the port
/// is opened.
#[derive(Debug, Default)]
pub(crate) struct SessionPlan {
    pub port: String,
    pub baud: u32,
    pub framing: ReplyFraming,
    pub address: u32,
    pub boot_info: bool,
    pub loader: Option<Vec<u8>>,
    pub erase: bool,
    pub write: Option<(PathBuf, Vec<u8>)>,
    pub read: Option<ReadRequest>,
    pub self_test: Option<u32>,
}

impl SessionPlan {
    /// Whether any operation runs on the RAM loader.
    pub(crate) fn needs_loader(&self) -> bool {
        self.erase || self.write.is_some() || self.read.is_some() || self.self_test.is_some()
    }

    /// Whether the plan touches the device at all.
    pub(crate) fn needs_device(&self) -> bool {
        self.boot_info || self.needs_loader()
    }
}

/// Run the session and return the number of failed operations.
///
/// Opening the port is the only fatal step. Every later failure is reported
/// and counted; operations that depend on a failed stage are skipped.
pub(crate) fn run_session(plan: &SessionPlan, quiet: bool) -> Result<usize> {
    if !quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            plan.port,
            plan.baud
        );
    }

    let mut flasher = Bl602Flasher::open(&plan.port, plan.baud)
        .map_err(|e| CliError::PortOpen(format!("{}: {e}", plan.port)))?
        .with_framing(plan.framing);
    debug!("Reply framing: {:?}", flasher.framing());

    let mut failures = 0;

    if !quiet {
        eprintln!("{} Waiting for boot ROM...", style("⏳").yellow());
    }
    let synced = step(quiet, "Sync with boot ROM", || Ok(flasher.connect()?))?;
    if !synced {
        failures += 1;
    }

    if plan.boot_info {
        let ok = if synced {
            step(quiet, "Get boot info", || {
                let info = flasher.get_boot_info()?;
                if !quiet {
                    for line in info.to_string().lines() {
                        eprintln!("    {line}");
                    }
                }
                Ok(())
            })?
        } else {
            skipped(quiet, "Get boot info", "no sync");
            false
        };
        if !ok {
            failures += 1;
        }
    }

    if !plan.needs_loader() {
        close(flasher);
        return Ok(failures);
    }

    let loader_running = match (&plan.loader, synced) {
        (Some(loader), true) => step(quiet, "Upload RAM loader", || {
            let pb = progress_bar(quiet, loader.len(), "loader");
            flasher.load_and_run_with_progress(loader, |current, total| {
                pb.set_length(total as u64);
                pb.set_position(current as u64);
            })?;
            pb.finish_and_clear();
            flasher.connect()?;
            Ok(())
        })?,
        (Some(_), false) => {
            skipped(quiet, "Upload RAM loader", "no sync");
            false
        },
        (None, _) => {
            skipped(quiet, "Upload RAM loader", "no loader image");
            false
        },
    };
    if !loader_running {
        failures += 1 + skip_flash_operations(plan, quiet);
        close(flasher);
        return Ok(failures);
    }

    if plan.erase && !step(quiet, "Erase flash", || Ok(flasher.erase_all()?))? {
        failures += 1;
    }

    if let Some((path, data)) = &plan.write {
        let name = format!("Write {} at 0x{:08X}", path.display(), plan.address);
        let ok = step(quiet, &name, || {
            let pb = progress_bar(quiet, data.len(), "write");
            flasher.write_flash_with_progress(data, plan.address, |current, total| {
                pb.set_length(total as u64);
                pb.set_position(current as u64);
            })?;
            pb.finish_and_clear();
            Ok(())
        })?;
        if !ok {
            failures += 1;
        }
    }

    if let Some(read) = &plan.read {
        let name = format!(
            "Read {} bytes at 0x{:08X} into {}",
            read.size,
            plan.address,
            read.output.display()
        );
        let ok = step(quiet, &name, || {
            let pb = progress_bar(quiet, read.size as usize, "read");
            let data = flasher.read_flash_with_progress(plan.address, read.size, |current, total| {
                pb.set_length(total as u64);
                pb.set_position(current as u64);
            })?;
            pb.finish_and_clear();
            fs::write(&read.output, &data)
                .with_context(|| format!("Failed to write {}", read.output.display()))
        })?;
        if !ok {
            failures += 1;
        }
    }

    if let Some(len) = plan.self_test {
        let name = format!("Self-test {len} bytes at 0x{:08X}", plan.address);
        let ok = step(quiet, &name, || match flasher.self_test(plan.address, len)? {
            None => Ok(()),
            Some(offset) => Err(anyhow!("read-back differs at offset 0x{offset:X}")),
        })?;
        if !ok {
            failures += 1;
        }
    }

    close(flasher);
    Ok(failures)
}

/// Mark every flash operation in `plan` as skipped.
fn skip_flash_operations(plan: &SessionPlan, quiet: bool) -> usize {
    let pending = [
        ("Erase flash", plan.erase),
        ("Write flash", plan.write.is_some()),
        ("Read flash", plan.read.is_some()),
        ("Self-test", plan.self_test.is_some()),
    ];
    let mut count = 0;
    for (name, requested) in pending {
        if requested {
            skipped(quiet, name, "RAM loader not running");
            count += 1;
        }
    }
    count
}

/// Run one operation and report its outcome.
///
/// Returns `Ok(false)` for a failed operation. Interruption is the only
/// failure that is propagated.
fn step<F>(quiet: bool, name: &str, op: F) -> Result<bool>
where
    F: FnOnce() -> Result<()>,
{
    ensure_not_interrupted()?;

    match op() {
        Ok(()) => {
            if !quiet {
                eprintln!("{} {name}", style("✓").green());
            }
            Ok(true)
        },
        Err(e) if is_interruption(&e) => Err(CliError::Cancelled(name.to_string()).into()),
        Err(e) => {
            eprintln!("{} {name}: {e:#}", style("✗").red());
            Ok(false)
        },
    }
}

fn skipped(quiet: bool, name: &str, reason: &str) {
    if !quiet {
        eprintln!("{} {name}: skipped ({reason})", style("⚠").yellow());
    }
}

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

fn is_interruption(err: &anyhow::Error) -> bool {
    was_interrupted()
        || matches!(
            err.downcast_ref::<bl602tool::Error>(),
            Some(bl602tool::Error::Interrupted)
        )
}

fn close(flasher: Bl602Flasher<NativePort>) {
    if let Err(e) = flasher.close() {
        warn!("Failed to close port: {e}");
    }
}

fn progress_bar(quiet: bool, total: usize, msg: &'static str) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_message(msg);
    pb
}
