mod common;

use std::process::Command;

#[test]
fn test_run_echoes_uart_and_writes_snapshot() {
    let dir = common::scratch_dir("run-snapshot");
    let firmware = common::write_demo_firmware(&dir);
    let snapshot_path = dir.join("snapshot.json");

    let output = Command::new(env!("CARGO_BIN_EXE_rvsum"))
        .args([
            "run",
            "--firmware",
            firmware.to_str().unwrap(),
            "--max-steps",
            "1000",
            "--snapshot",
            snapshot_path.to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout), "RES=12\n");

    let snapshot: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&snapshot_path).unwrap()).unwrap();
    assert_eq!(snapshot["cpu"]["parked"], true);
    assert_eq!(snapshot["peripherals"]["result_cell"]["word"], 12);
    assert_eq!(snapshot["peripherals"]["uart0"]["tx_count"], 7);
}

#[test]
fn test_run_missing_firmware_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_rvsum"))
        .args(["run", "--firmware", "/nonexistent/fw.elf"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_run_reports_bad_opcode() {
    let dir = common::scratch_dir("bad-opcode");
    let firmware = dir.join("bad.elf");
    std::fs::write(&firmware, common::elf32(&[0xFFFF_FFFF])).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_rvsum"))
        .args(["run", "--firmware", firmware.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}
