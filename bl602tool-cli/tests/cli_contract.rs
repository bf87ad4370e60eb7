//! Integration tests for core CLI contract behavior.

use bl602tool::image::boot_header::sha256;
use bl602tool::protocol::crc32;
use {predicates::prelude::*, std::fs, std::path::Path, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bl602tool");
    cmd.env_remove("BL602TOOL_PORT")
        .env_remove("BL602TOOL_BAUD")
        .env_remove("BL602TOOL_LOADER")
        .env("NO_COLOR", "1");
    cmd
}

/// A boot image with valid magics, CRCs and digest around `payload`.
fn boot_image(payload: &[u8]) -> Vec<u8> {
    let mut image = Vec::new();
    image.extend_from_slice(b"BFNP");
    image.extend_from_slice(&1u32.to_le_bytes());

    let flash_body = [0u8; 84];
    image.extend_from_slice(b"FCFG");
    image.extend_from_slice(&flash_body);
    image.extend_from_slice(&crc32(&flash_body).to_le_bytes());

    let clock_body = [4u8, 4, 0, 1, 2, 1, 0, 0];
    image.extend_from_slice(b"PCFG");
    image.extend_from_slice(&clock_body);
    image.extend_from_slice(&crc32(&clock_body).to_le_bytes());

    for word in [0x100u32, 1, 0x2200_0000, 0x2000] {
        image.extend_from_slice(&word.to_le_bytes());
    }
    image.extend_from_slice(&sha256(payload));
    image.extend_from_slice(&[0u8; 8]);
    let crc = crc32(&image);
    image.extend_from_slice(&crc.to_le_bytes());
    assert_eq!(image.len(), 176);

    image.extend_from_slice(payload);
    image
}

fn write_image(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).expect("write image");
    path
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bl602tool"))
        .stdout(predicate::str::contains("--write-flash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn no_arguments_prints_help() {
    let mut cmd = cli_cmd();
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bl602tool"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn image_info_valid_image_exits_zero() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(dir.path(), "fw.bin", &boot_image(&[0xA5; 64]));

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("-i")
        .arg(&image)
        .assert()
        .success()
        .code(0)
        .stderr(predicate::str::contains("Image is valid"));
}

#[test]
fn image_info_json_is_valid_json_on_stdout() {
    let dir = tempdir().expect("tempdir should be created");
    let image = write_image(dir.path(), "fw.bin", &boot_image(&[1, 2, 3]));

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("--image-info")
        .arg(&image)
        .arg("--json")
        .output()
        .expect("command should execute");

    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["valid"], serde_json::Value::Bool(true));
    assert_eq!(parsed["report"]["result"], "checked");
    assert_eq!(parsed["report"]["payload_len"], 3);
}

#[test]
fn image_info_corrupted_image_exits_one() {
    let dir = tempdir().expect("tempdir should be created");
    let mut data = boot_image(&[0xA5; 64]);
    data[200] ^= 0xFF;
    let image = write_image(dir.path(), "bad.bin", &data);

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("-i")
        .arg(&image)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("SHA-256 mismatch"));
}

#[test]
fn image_info_short_file_reports_too_short() {
    let dir = tempdir().expect("tempdir should be created");
    write_image(dir.path(), "short.bin", &[0u8; 10]);

    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["-i", "short.bin", "--json"])
        .output()
        .expect("command should execute");

    assert_eq!(output.status.code(), Some(1));
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["report"]["result"], "too_short");
    assert_eq!(parsed["report"]["actual"], 10);
}

#[test]
fn image_info_missing_file_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir.path().join("missing.bin");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("-i")
        .arg(&missing)
        .arg("--json")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

// ============================================================================
// Exit Code Tests
// ============================================================================

/// Exit code 2: usage error (unknown flag, bad value, nothing to do)
#[test]
fn exit_code_two_for_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_bad_address() {
    let mut cmd = cli_cmd();
    cmd.args(["-a", "0xNOPE", "-e"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_no_operation() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "/dev/null"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("nothing to do"));
}

#[test]
fn exit_code_two_for_bad_read_size() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-r", "lots", "out.bin"])
        .assert()
        .failure()
        .code(2);
}

/// Exit code 3: configuration error
#[test]
fn exit_code_three_without_port() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--boot-info")
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("serial port"));
}

#[test]
fn invalid_config_file_is_warned_and_ignored() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("bl602tool.toml"), "invalid toml [[[").expect("write config");
    let image = write_image(dir.path(), "fw.bin", &boot_image(&[]));

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("-i")
        .arg(&image)
        .output()
        .expect("command should execute");

    assert!(output.status.success(), "command should succeed despite config warning");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn config_file_supplies_port() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("custom.toml");
    fs::write(&config, "[connection]\nport = \"INVALID_PORT_NAME_XYZ\"\n").expect("write config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("--boot-info")
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("INVALID_PORT_NAME_XYZ"));
}

/// Exit code 4: the serial port cannot be opened
#[test]
fn exit_code_four_for_port_open_failure() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "--boot-info"])
        .assert()
        .failure()
        .code(4);
}

/// Exit code 1: a write file that does not exist fails without touching the port
#[test]
fn missing_write_file_alone_fails_without_opening_port() {
    let dir = tempdir().expect("tempdir should be created");
    let loader = write_image(dir.path(), "loader.bin", &boot_image(&[0; 64]));

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "-w", "missing.bin"])
        .arg("-l")
        .arg(&loader)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("File not found"))
        .stderr(predicate::str::contains("Cannot open serial port").not());
}

/// A missing write file is reported and the remaining operations still run
#[test]
fn missing_write_file_does_not_drop_other_operations() {
    let dir = tempdir().expect("tempdir should be created");
    let loader = write_image(dir.path(), "loader.bin", &boot_image(&[0; 64]));

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "--boot-info", "-e", "-w", "missing.bin"])
        .arg("-l")
        .arg(&loader)
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("File not found"))
        .stderr(predicate::str::contains("INVALID_PORT_NAME_XYZ"));
}
