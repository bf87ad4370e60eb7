//! Offline boot image inspection (`--image-info`).

use anyhow::{Context, Result};
use bl602tool::image::boot_header::hex;
use bl602tool::image::{BlockReport, BlockStatus, HashStatus, ImageReport, ValidationReport};
use console::style;
use std::path::Path;

/// Print the validation report of `path`.
///
/// Returns whether the image is valid. Format defects are reported, not
/// raised; only an unreadable file is an error.
pub(crate) fn cmd_image_info(path: &Path, json: bool) -> Result<bool> {
    let report = bl602tool::validate_file(path)
        .with_context(|| format!("Failed to read image {}", path.display()))?;

    if json {
        print_json(path, &report)?;
    } else {
        print_text(path, &report);
    }

    Ok(report.is_valid())
}

/// `--json` output: structured JSON to stdout.
fn print_json(path: &Path, report: &ValidationReport) -> Result<()> {
    let info = serde_json::json!({
        "file": path.display().to_string(),
        "valid": report.is_valid(),
        "report": report,
    });
    let text = serde_json::to_string_pretty(&info).context("Failed to serialize report")?;
    println!("{text}");
    Ok(())
}

fn print_text(path: &Path, report: &ValidationReport) {
    eprintln!("{} {}", style("📦").cyan(), path.display());

    let image = match report {
        ValidationReport::TooShort { required, actual } => {
            eprintln!(
                "  {} image is {actual} bytes, a boot header needs {required}",
                style("✗").red()
            );
            return;
        },
        ValidationReport::Checked(image) => image,
    };

    print_header(image);

    eprintln!("\n{}", style("Checks").bold().underlined());
    print_block("Boot header", &image.boot_header);
    print_block("Flash config", &image.flash_config);
    print_block("Clock config", &image.clock_config);
    match image.hash {
        HashStatus::Ok => eprintln!("  {} SHA-256 matches", style("✓").green()),
        HashStatus::Mismatch { expected, actual } => {
            eprintln!("  {} SHA-256 mismatch", style("✗").red());
            eprintln!("      header:  {}", hex(&expected));
            eprintln!("      payload: {}", hex(&actual));
        },
    }

    let verdict = if report.is_valid() {
        style("Image is valid").green().bold()
    } else {
        style("Image is NOT valid").red().bold()
    };
    eprintln!("\n{verdict}");
}

fn print_header(image: &ImageReport) {
    let header = &image.header;

    eprintln!("\n{}", style("Boot header").bold().underlined());
    eprintln!("  Magic:        {}", header.magic.escape_ascii());
    eprintln!("  Revision:     {}", header.revision);
    eprintln!("  Boot config:  0x{:08X}", header.boot_config);
    eprintln!("  Segments:     {}", header.segment_info);
    eprintln!("  Entry point:  0x{:08X}", header.entry_point);
    eprintln!("  Image start:  0x{:08X}", header.image_start);
    eprintln!("  Payload:      {} bytes", image.payload_len);
    eprintln!("  SHA-256:      {}", hex(&header.hash));
    eprintln!("  CRC32:        0x{:08X}", header.crc32);

    eprintln!("\n{}", style("Flash config").bold().underlined());
    for (name, value) in header.flash_config.fields() {
        eprintln!("  {name:<36} {value}");
    }

    eprintln!("\n{}", style("Clock config").bold().underlined());
    for (name, value) in header.clock_config.fields() {
        eprintln!("  {name:<36} {value}");
    }
}

fn print_block(name: &str, block: &BlockReport) {
    match block.status() {
        BlockStatus::Valid => eprintln!("  {} {name}", style("✓").green()),
        _ => {
            eprintln!("  {} {name}", style("✗").red());
            for check in [block.magic, block.crc] {
                if check != BlockStatus::Valid {
                    eprintln!("      {check}");
                }
            }
        },
    }
}
