mod common;

use std::path::{Path, PathBuf};
use std::process::Command;

const TARGET: &str = "riscv32i-unknown-none-elf";

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn target_installed(root: &Path) -> bool {
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let Ok(output) = Command::new(rustc)
        .args(["--print", "sysroot"])
        .current_dir(root)
        .output()
    else {
        return false;
    };
    if !output.status.success() {
        return false;
    }
    let sysroot = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Path::new(&sysroot)
        .join("lib/rustlib")
        .join(TARGET)
        .exists()
}

/// Build `rvsum-firmware` for the demo board. Uses its own target dir so it
/// does not contend with the `cargo test` that is running us.
fn build_firmware() -> Option<PathBuf> {
    let root = workspace_root();
    if !target_installed(&root) {
        eprintln!(
            "skipping: rust-std for {} is not installed (rustup target add {})",
            TARGET, TARGET
        );
        return None;
    }

    let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let target_dir = root.join("target/firmware-image");
    let status = Command::new(&cargo)
        .args(["build", "--release", "-p", "rvsum-firmware", "--target", TARGET])
        .arg("--target-dir")
        .arg(&target_dir)
        .current_dir(&root)
        .status()
        .expect("Failed to execute cargo");
    assert!(status.success(), "Failed to build rvsum-firmware");

    let elf = target_dir.join(TARGET).join("release/rvsum-firmware");
    assert!(elf.exists(), "Firmware not found at {:?}", elf);
    Some(elf)
}

#[test]
fn test_firmware_image_prints_and_stores_sum() {
    let Some(firmware) = build_firmware() else {
        return;
    };

    let dir = common::scratch_dir("firmware-image");
    let script = dir.join("script.yaml");
    std::fs::write(
        &script,
        format!(
            r#"
schema_version: "1.0"
inputs:
  firmware: "{}"
limits:
  max_steps: 200000
assertions:
  - uart_equals: "RES=12\n"
  - result_cell: 12
  - expected_stop_reason: halt
"#,
            firmware.display()
        ),
    )
    .unwrap();

    let out_dir = dir.join("out");
    let output = Command::new(env!("CARGO_BIN_EXE_rvsum"))
        .args([
            "test",
            "--script",
            script.to_str().unwrap(),
            "--no-uart-stdout",
            "--output-dir",
            out_dir.to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let result: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("result.json")).unwrap())
            .unwrap();
    assert_eq!(result["status"], "pass");
    assert_eq!(result["uart"], "RES=12\n");
    assert_eq!(result["result_cell"], 12);
    assert_eq!(result["result_cell_stores"], 1);
    assert_eq!(result["stop_reason"], "halt");
    assert_eq!(result["traps"], 0);
}
