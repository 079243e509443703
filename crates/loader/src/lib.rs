use anyhow::{anyhow, bail, Context, Result};
use goblin::elf::header::EM_RISCV;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use rvsum_core::memory::ProgramImage;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

pub fn load_elf(path: &Path) -> Result<ProgramImage> {
    let buffer = fs::read(path).with_context(|| format!("Failed to read ELF file: {:?}", path))?;
    parse_elf(&buffer)
}

/// Collect the loadable segments of a little-endian RV32 executable.
pub fn parse_elf(buffer: &[u8]) -> Result<ProgramImage> {
    let elf = Elf::parse(buffer).context("Failed to parse ELF binary")?;

    if elf.is_64 {
        bail!("Expected a 32-bit ELF, found ELF64");
    }
    if !elf.little_endian {
        bail!("Expected a little-endian ELF");
    }
    if elf.header.e_machine != EM_RISCV {
        bail!(
            "Expected a RISC-V ELF (e_machine {}), found e_machine {}",
            EM_RISCV,
            elf.header.e_machine
        );
    }

    info!("ELF Entry Point: {:#x}", elf.entry);

    let mut program_image = ProgramImage::new(elf.entry);

    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD {
            continue;
        }

        // Physical address (LMA): initialised .data is loaded next to .text
        // and copied out by the runtime.
        let start_addr = ph.p_paddr;
        let size = ph.p_filesz as usize;
        let offset = ph.p_offset as usize;

        if size == 0 {
            continue;
        }

        debug!(
            "Found Loadable Segment: Addr={:#x}, Size={} bytes, Offset={:#x}",
            start_addr, size, offset
        );

        let segment_data = buffer
            .get(offset..offset + size)
            .ok_or_else(|| anyhow!("Segment out of bounds in ELF file"))?;
        program_image.add_segment(start_addr, segment_data.to_vec());
    }

    if program_image.segments.is_empty() {
        warn!("No loadable segments found in ELF file");
    }

    Ok(program_image)
}
