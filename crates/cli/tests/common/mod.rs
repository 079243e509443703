#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ROM: u32 = 0x8000_0000;

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(prefix: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir()
        .join("rvsum-tests")
        .join(format!("{}-{}", prefix, nonce));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn i_type(imm: i32, rs1: u32, f3: u32, rd: u32, op: u32) -> u32 {
    (((imm as u32) & 0xFFF) << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

fn s_type(imm: i32, rs2: u32, rs1: u32, f3: u32) -> u32 {
    let imm = imm as u32;
    (((imm >> 5) & 0x7F) << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | ((imm & 0x1F) << 7) | 0x23
}

/// Straight-line program printing `text` on the UART, storing `value` in
/// the result cell and parking in `wfi`.
pub fn print_and_store(text: &[u8], value: i32) -> Vec<u32> {
    const T0: u32 = 5;
    const S0: u32 = 8;
    const T3: u32 = 28;

    let mut words = vec![(0x10000 << 12) | (T0 << 7) | 0x37]; // lui t0, 0x10000
    for &c in text {
        words.push(i_type(c as i32, 0, 0, T3, 0x13)); // addi t3, zero, c
        words.push(s_type(0, T3, T0, 0)); // sb t3, 0(t0)
    }
    words.push(i_type(value, 0, 0, S0, 0x13)); // addi s0, zero, value
    words.push(s_type(0x200, S0, 0, 2)); // sw s0, 0x200(zero)
    words.push(0x1050_0073); // wfi
    words.push(0xFFDF_F06F); // jal zero, -4
    words
}

/// Minimal RV32 ELF executable with one PT_LOAD segment at [`ROM`].
pub fn elf32(words: &[u32]) -> Vec<u8> {
    let code: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let mut out = Vec::new();
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0]);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out.extend_from_slice(&243u16.to_le_bytes()); // EM_RISCV
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&ROM.to_le_bytes());
    out.extend_from_slice(&52u32.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&52u16.to_le_bytes()); // e_ehsize
    out.extend_from_slice(&32u16.to_le_bytes()); // e_phentsize
    out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&40u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    for field in [1u32, 84, ROM, ROM, code.len() as u32, code.len() as u32, 5, 4] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(&code);
    out
}

pub fn write_demo_firmware(dir: &Path) -> PathBuf {
    let path = dir.join("demo.elf");
    std::fs::write(&path, elf32(&print_and_store(b"RES=12\n", 12))).unwrap();
    path
}
