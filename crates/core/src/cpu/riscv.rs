// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::decoder::{decode_rv32, Instruction};
use crate::snapshot::CpuSnapshot;
use crate::{Bus, Cpu, SimResult, SimulationObserver};
use std::sync::Arc;

const MSTATUS_MIE: u32 = 1 << 3;
const MSTATUS_MPIE: u32 = 1 << 7;

/// MXL = 32, extensions I and M.
const MISA: u32 = 0x4000_0000 | (1 << 8) | (1 << 12);

const CAUSE_BREAKPOINT: u32 = 3;
const CAUSE_ECALL_M: u32 = 11;

#[derive(Debug, Default)]
pub struct RiscV {
    pub x: [u32; 32], // x0..x31. x0 is hardwired to 0 in read_reg/write_reg.
    pub pc: u32,

    // Machine-mode CSRs
    pub mstatus: u32,
    pub mie: u32,
    pub mip: u32,
    pub mtvec: u32,
    pub mscratch: u32,
    pub mepc: u32,
    pub mcause: u32,
    pub mtval: u32,
    pub minstret: u64,

    /// Set by `wfi`; cleared when an enabled interrupt is pending.
    pub parked: bool,
}

impl RiscV {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_reg(&self, n: u8) -> u32 {
        if n == 0 {
            0
        } else {
            self.x[n as usize]
        }
    }

    pub fn write_reg(&mut self, n: u8, val: u32) {
        if n != 0 {
            self.x[n as usize] = val;
        }
    }

    fn read_csr(&self, csr: u16) -> u32 {
        match csr {
            0x300 => self.mstatus,
            0x301 => MISA,
            0x304 => self.mie,
            0x305 => self.mtvec,
            0x340 => self.mscratch,
            0x341 => self.mepc,
            0x342 => self.mcause,
            0x343 => self.mtval,
            0x344 => self.mip,
            0xB02 | 0xC02 | 0xB00 | 0xC00 => self.minstret as u32,
            0xB82 | 0xC82 | 0xB80 | 0xC80 => (self.minstret >> 32) as u32,
            // mvendorid, marchid, mimpid, mhartid: single hart 0
            _ => 0,
        }
    }

    fn write_csr(&mut self, csr: u16, val: u32) {
        match csr {
            0x300 => self.mstatus = val & 0x0000_1888, // MIE, MPIE, MPP
            0x304 => self.mie = val,
            0x305 => self.mtvec = val,
            0x340 => self.mscratch = val,
            0x341 => self.mepc = val & !1,
            0x342 => self.mcause = val,
            0x343 => self.mtval = val,
            0x344 => self.mip = val,
            _ => {}
        }
    }

    fn handle_trap(&mut self, cause: u32, epc: u32) {
        self.mepc = epc;
        self.mcause = cause;
        let base = self.mtvec & !3;
        if self.mtvec & 3 == 1 && (cause & 0x8000_0000) != 0 {
            // Vectored interrupt
            self.pc = base + (cause & 0x7FFF_FFFF) * 4;
        } else {
            self.pc = base;
        }
        if self.mstatus & MSTATUS_MIE != 0 {
            self.mstatus |= MSTATUS_MPIE;
        } else {
            self.mstatus &= !MSTATUS_MPIE;
        }
        self.mstatus &= !MSTATUS_MIE;
    }

    /// An interrupt that is both pending and enabled in `mie`. `wfi` resumes
    /// on this whatever `mstatus.MIE` says.
    fn wake_pending(&self) -> bool {
        self.mip & self.mie != 0
    }

    fn branch(&mut self, taken: bool, imm: i32, next_pc: &mut u32) {
        if taken {
            *next_pc = self.pc.wrapping_add(imm as u32);
        }
    }
}

impl Cpu for RiscV {
    fn reset(&mut self, entry: u32) {
        *self = Self::default();
        self.pc = entry;
    }

    fn step(
        &mut self,
        bus: &mut dyn Bus,
        observers: &[Arc<dyn SimulationObserver>],
    ) -> SimResult<()> {
        if self.parked {
            if !self.wake_pending() {
                // Nothing to wake up for: no fetch, no side effects.
                for observer in observers {
                    observer.on_idle_step();
                }
                return Ok(());
            }
            self.parked = false;
        }

        let opcode = bus.read_u32(self.pc as u64)?;

        for observer in observers {
            observer.on_step_start(self.pc, opcode);
        }

        let instruction = decode_rv32(opcode);
        tracing::debug!(
            "PC={:#x}, Op={:#010x}, Instr={:?}",
            self.pc,
            opcode,
            instruction
        );

        let mut next_pc = self.pc.wrapping_add(4);

        match instruction {
            Instruction::Lui { rd, imm } => {
                self.write_reg(rd, imm);
            }
            Instruction::Auipc { rd, imm } => {
                let val = self.pc.wrapping_add(imm);
                self.write_reg(rd, val);
            }
            Instruction::Jal { rd, imm } => {
                let target = self.pc.wrapping_add(imm as u32);
                self.write_reg(rd, self.pc.wrapping_add(4));
                next_pc = target;
            }
            Instruction::Jalr { rd, rs1, imm } => {
                let base = self.read_reg(rs1);
                let target = base.wrapping_add(imm as u32) & !1;
                self.write_reg(rd, self.pc.wrapping_add(4));
                next_pc = target;
            }
            Instruction::Beq { rs1, rs2, imm } => {
                let taken = self.read_reg(rs1) == self.read_reg(rs2);
                self.branch(taken, imm, &mut next_pc);
            }
            Instruction::Bne { rs1, rs2, imm } => {
                let taken = self.read_reg(rs1) != self.read_reg(rs2);
                self.branch(taken, imm, &mut next_pc);
            }
            Instruction::Blt { rs1, rs2, imm } => {
                let taken = (self.read_reg(rs1) as i32) < (self.read_reg(rs2) as i32);
                self.branch(taken, imm, &mut next_pc);
            }
            Instruction::Bge { rs1, rs2, imm } => {
                let taken = (self.read_reg(rs1) as i32) >= (self.read_reg(rs2) as i32);
                self.branch(taken, imm, &mut next_pc);
            }
            Instruction::Bltu { rs1, rs2, imm } => {
                let taken = self.read_reg(rs1) < self.read_reg(rs2);
                self.branch(taken, imm, &mut next_pc);
            }
            Instruction::Bgeu { rs1, rs2, imm } => {
                let taken = self.read_reg(rs1) >= self.read_reg(rs2);
                self.branch(taken, imm, &mut next_pc);
            }
            Instruction::Lb { rd, rs1, imm } => {
                let addr = self.read_reg(rs1).wrapping_add(imm as u32);
                let val = bus.read_u8(addr as u64)? as i8;
                self.write_reg(rd, val as i32 as u32);
            }
            Instruction::Lh { rd, rs1, imm } => {
                let addr = self.read_reg(rs1).wrapping_add(imm as u32);
                let val = bus.read_u16(addr as u64)? as i16;
                self.write_reg(rd, val as i32 as u32);
            }
            Instruction::Lw { rd, rs1, imm } => {
                let addr = self.read_reg(rs1).wrapping_add(imm as u32);
                let val = bus.read_u32(addr as u64)?;
                self.write_reg(rd, val);
            }
            Instruction::Lbu { rd, rs1, imm } => {
                let addr = self.read_reg(rs1).wrapping_add(imm as u32);
                let val = bus.read_u8(addr as u64)?;
                self.write_reg(rd, val as u32);
            }
            Instruction::Lhu { rd, rs1, imm } => {
                let addr = self.read_reg(rs1).wrapping_add(imm as u32);
                let val = bus.read_u16(addr as u64)?;
                self.write_reg(rd, val as u32);
            }
            Instruction::Sb { rs1, rs2, imm } => {
                let addr = self.read_reg(rs1).wrapping_add(imm as u32);
                let val = self.read_reg(rs2) as u8;
                bus.write_u8(addr as u64, val)?;
            }
            Instruction::Sh { rs1, rs2, imm } => {
                let addr = self.read_reg(rs1).wrapping_add(imm as u32);
                let val = self.read_reg(rs2) as u16;
                bus.write_u16(addr as u64, val)?;
            }
            Instruction::Sw { rs1, rs2, imm } => {
                let addr = self.read_reg(rs1).wrapping_add(imm as u32);
                let val = self.read_reg(rs2);
                bus.write_u32(addr as u64, val)?;
            }
            Instruction::Addi { rd, rs1, imm } => {
                let res = self.read_reg(rs1).wrapping_add(imm as u32);
                self.write_reg(rd, res);
            }
            Instruction::Slti { rd, rs1, imm } => {
                let val = ((self.read_reg(rs1) as i32) < imm) as u32;
                self.write_reg(rd, val);
            }
            Instruction::Sltiu { rd, rs1, imm } => {
                let val = (self.read_reg(rs1) < (imm as u32)) as u32;
                self.write_reg(rd, val);
            }
            Instruction::Xori { rd, rs1, imm } => {
                let res = self.read_reg(rs1) ^ (imm as u32);
                self.write_reg(rd, res);
            }
            Instruction::Ori { rd, rs1, imm } => {
                let res = self.read_reg(rs1) | (imm as u32);
                self.write_reg(rd, res);
            }
            Instruction::Andi { rd, rs1, imm } => {
                let res = self.read_reg(rs1) & (imm as u32);
                self.write_reg(rd, res);
            }
            Instruction::Slli { rd, rs1, shamt } => {
                let res = self.read_reg(rs1) << shamt;
                self.write_reg(rd, res);
            }
            Instruction::Srli { rd, rs1, shamt } => {
                let res = self.read_reg(rs1) >> shamt;
                self.write_reg(rd, res);
            }
            Instruction::Srai { rd, rs1, shamt } => {
                let res = (self.read_reg(rs1) as i32) >> shamt;
                self.write_reg(rd, res as u32);
            }
            Instruction::Add { rd, rs1, rs2 } => {
                let res = self.read_reg(rs1).wrapping_add(self.read_reg(rs2));
                self.write_reg(rd, res);
            }
            Instruction::Sub { rd, rs1, rs2 } => {
                let res = self.read_reg(rs1).wrapping_sub(self.read_reg(rs2));
                self.write_reg(rd, res);
            }
            Instruction::Sll { rd, rs1, rs2 } => {
                let shamt = self.read_reg(rs2) & 0x1F;
                let res = self.read_reg(rs1) << shamt;
                self.write_reg(rd, res);
            }
            Instruction::Slt { rd, rs1, rs2 } => {
                let val = ((self.read_reg(rs1) as i32) < (self.read_reg(rs2) as i32)) as u32;
                self.write_reg(rd, val);
            }
            Instruction::Sltu { rd, rs1, rs2 } => {
                let val = (self.read_reg(rs1) < self.read_reg(rs2)) as u32;
                self.write_reg(rd, val);
            }
            Instruction::Xor { rd, rs1, rs2 } => {
                let res = self.read_reg(rs1) ^ self.read_reg(rs2);
                self.write_reg(rd, res);
            }
            Instruction::Srl { rd, rs1, rs2 } => {
                let shamt = self.read_reg(rs2) & 0x1F;
                let res = self.read_reg(rs1) >> shamt;
                self.write_reg(rd, res);
            }
            Instruction::Sra { rd, rs1, rs2 } => {
                let shamt = self.read_reg(rs2) & 0x1F;
                let res = (self.read_reg(rs1) as i32) >> shamt;
                self.write_reg(rd, res as u32);
            }
            Instruction::Or { rd, rs1, rs2 } => {
                let res = self.read_reg(rs1) | self.read_reg(rs2);
                self.write_reg(rd, res);
            }
            Instruction::And { rd, rs1, rs2 } => {
                let res = self.read_reg(rs1) & self.read_reg(rs2);
                self.write_reg(rd, res);
            }
            Instruction::Mul { rd, rs1, rs2 } => {
                let res = self.read_reg(rs1).wrapping_mul(self.read_reg(rs2));
                self.write_reg(rd, res);
            }
            Instruction::Mulh { rd, rs1, rs2 } => {
                let a = self.read_reg(rs1) as i32 as i64;
                let b = self.read_reg(rs2) as i32 as i64;
                self.write_reg(rd, (a.wrapping_mul(b) >> 32) as u32);
            }
            Instruction::Mulhsu { rd, rs1, rs2 } => {
                let a = self.read_reg(rs1) as i32 as i64;
                let b = self.read_reg(rs2) as u64 as i64;
                self.write_reg(rd, (a.wrapping_mul(b) >> 32) as u32);
            }
            Instruction::Mulhu { rd, rs1, rs2 } => {
                let a = self.read_reg(rs1) as u64;
                let b = self.read_reg(rs2) as u64;
                self.write_reg(rd, ((a * b) >> 32) as u32);
            }
            Instruction::Div { rd, rs1, rs2 } => {
                let a = self.read_reg(rs1) as i32;
                let b = self.read_reg(rs2) as i32;
                // Division by zero yields all ones; MIN / -1 wraps to MIN.
                let res = if b == 0 { -1 } else { a.wrapping_div(b) };
                self.write_reg(rd, res as u32);
            }
            Instruction::Divu { rd, rs1, rs2 } => {
                let a = self.read_reg(rs1);
                let b = self.read_reg(rs2);
                let res = a.checked_div(b).unwrap_or(u32::MAX);
                self.write_reg(rd, res);
            }
            Instruction::Rem { rd, rs1, rs2 } => {
                let a = self.read_reg(rs1) as i32;
                let b = self.read_reg(rs2) as i32;
                let res = if b == 0 { a } else { a.wrapping_rem(b) };
                self.write_reg(rd, res as u32);
            }
            Instruction::Remu { rd, rs1, rs2 } => {
                let a = self.read_reg(rs1);
                let b = self.read_reg(rs2);
                let res = a.checked_rem(b).unwrap_or(a);
                self.write_reg(rd, res);
            }
            Instruction::Fence => {
                // Single hart, in-order: nothing to order.
            }
            Instruction::Ecall | Instruction::Ebreak => {
                let cause = if instruction == Instruction::Ecall {
                    CAUSE_ECALL_M
                } else {
                    CAUSE_BREAKPOINT
                };
                tracing::warn!("{:?} at {:#x}, trapping to {:#x}", instruction, self.pc, self.mtvec);
                let epc = self.pc;
                self.handle_trap(cause, epc);
                next_pc = self.pc;
                for observer in observers {
                    observer.on_trap(cause, epc);
                }
            }
            Instruction::Mret => {
                next_pc = self.mepc;
                if self.mstatus & MSTATUS_MPIE != 0 {
                    self.mstatus |= MSTATUS_MIE;
                } else {
                    self.mstatus &= !MSTATUS_MIE;
                }
                self.mstatus |= MSTATUS_MPIE;
            }
            Instruction::Wfi => {
                tracing::debug!("WFI at {:#x}, hart parked", self.pc);
                self.parked = true;
            }
            Instruction::Csrrw { rd, rs1, csr } => {
                let old = self.read_csr(csr);
                let val = self.read_reg(rs1);
                self.write_csr(csr, val);
                self.write_reg(rd, old);
            }
            Instruction::Csrrs { rd, rs1, csr } => {
                let old = self.read_csr(csr);
                if rs1 != 0 {
                    let val = self.read_reg(rs1);
                    self.write_csr(csr, old | val);
                }
                self.write_reg(rd, old);
            }
            Instruction::Csrrc { rd, rs1, csr } => {
                let old = self.read_csr(csr);
                if rs1 != 0 {
                    let val = self.read_reg(rs1);
                    self.write_csr(csr, old & !val);
                }
                self.write_reg(rd, old);
            }
            Instruction::Csrrwi { rd, imm, csr } => {
                let old = self.read_csr(csr);
                self.write_csr(csr, imm as u32);
                self.write_reg(rd, old);
            }
            Instruction::Csrrsi { rd, imm, csr } => {
                let old = self.read_csr(csr);
                if imm != 0 {
                    self.write_csr(csr, old | (imm as u32));
                }
                self.write_reg(rd, old);
            }
            Instruction::Csrrci { rd, imm, csr } => {
                let old = self.read_csr(csr);
                if imm != 0 {
                    self.write_csr(csr, old & !(imm as u32));
                }
                self.write_reg(rd, old);
            }
            Instruction::Unknown(inst) => {
                tracing::error!("Unknown instruction {:#x} at {:#x}", inst, self.pc);
                return Err(crate::SimulationError::DecodeError(self.pc as u64));
            }
        }

        self.minstret += 1;
        self.pc = next_pc;

        for observer in observers {
            observer.on_step_end(1);
        }
        Ok(())
    }

    fn set_pc(&mut self, val: u32) {
        self.pc = val;
    }
    fn get_pc(&self) -> u32 {
        self.pc
    }
    fn set_sp(&mut self, val: u32) {
        self.write_reg(2, val); // x2 is SP
    }
    fn is_parked(&self) -> bool {
        self.parked
    }
    fn can_wake(&self) -> bool {
        self.wake_pending() || (self.mstatus & MSTATUS_MIE != 0 && self.mie != 0)
    }

    fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            registers: self.x.to_vec(),
            pc: self.pc,
            mstatus: self.mstatus,
            mepc: self.mepc,
            mcause: self.mcause,
            parked: self.parked,
        }
    }
}
