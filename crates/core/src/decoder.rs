/// RISC-V RV32I base integer set, the M extension, and the machine-mode
/// system instructions the runtime startup code uses.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Instruction {
    Lui { rd: u8, imm: u32 },
    Auipc { rd: u8, imm: u32 },
    Jal { rd: u8, imm: i32 },
    Jalr { rd: u8, rs1: u8, imm: i32 },
    Beq { rs1: u8, rs2: u8, imm: i32 },
    Bne { rs1: u8, rs2: u8, imm: i32 },
    Blt { rs1: u8, rs2: u8, imm: i32 },
    Bge { rs1: u8, rs2: u8, imm: i32 },
    Bltu { rs1: u8, rs2: u8, imm: i32 },
    Bgeu { rs1: u8, rs2: u8, imm: i32 },
    Lb { rd: u8, rs1: u8, imm: i32 },
    Lh { rd: u8, rs1: u8, imm: i32 },
    Lw { rd: u8, rs1: u8, imm: i32 },
    Lbu { rd: u8, rs1: u8, imm: i32 },
    Lhu { rd: u8, rs1: u8, imm: i32 },
    Sb { rs1: u8, rs2: u8, imm: i32 },
    Sh { rs1: u8, rs2: u8, imm: i32 },
    Sw { rs1: u8, rs2: u8, imm: i32 },
    Addi { rd: u8, rs1: u8, imm: i32 },
    Slti { rd: u8, rs1: u8, imm: i32 },
    Sltiu { rd: u8, rs1: u8, imm: i32 },
    Xori { rd: u8, rs1: u8, imm: i32 },
    Ori { rd: u8, rs1: u8, imm: i32 },
    Andi { rd: u8, rs1: u8, imm: i32 },
    Slli { rd: u8, rs1: u8, shamt: u8 },
    Srli { rd: u8, rs1: u8, shamt: u8 },
    Srai { rd: u8, rs1: u8, shamt: u8 },
    Add { rd: u8, rs1: u8, rs2: u8 },
    Sub { rd: u8, rs1: u8, rs2: u8 },
    Sll { rd: u8, rs1: u8, rs2: u8 },
    Slt { rd: u8, rs1: u8, rs2: u8 },
    Sltu { rd: u8, rs1: u8, rs2: u8 },
    Xor { rd: u8, rs1: u8, rs2: u8 },
    Srl { rd: u8, rs1: u8, rs2: u8 },
    Sra { rd: u8, rs1: u8, rs2: u8 },
    Or { rd: u8, rs1: u8, rs2: u8 },
    And { rd: u8, rs1: u8, rs2: u8 },
    Mul { rd: u8, rs1: u8, rs2: u8 },
    Mulh { rd: u8, rs1: u8, rs2: u8 },
    Mulhsu { rd: u8, rs1: u8, rs2: u8 },
    Mulhu { rd: u8, rs1: u8, rs2: u8 },
    Div { rd: u8, rs1: u8, rs2: u8 },
    Divu { rd: u8, rs1: u8, rs2: u8 },
    Rem { rd: u8, rs1: u8, rs2: u8 },
    Remu { rd: u8, rs1: u8, rs2: u8 },
    Fence,
    Ecall,
    Ebreak,
    Mret,
    Wfi,
    Csrrw { rd: u8, rs1: u8, csr: u16 },
    Csrrs { rd: u8, rs1: u8, csr: u16 },
    Csrrc { rd: u8, rs1: u8, csr: u16 },
    Csrrwi { rd: u8, imm: u8, csr: u16 },
    Csrrsi { rd: u8, imm: u8, csr: u16 },
    Csrrci { rd: u8, imm: u8, csr: u16 },
    Unknown(u32),
}

/// Sign-extend the low `bits` bits of `value`.
fn sext(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

pub fn decode_rv32(inst: u32) -> Instruction {
    let opcode = inst & 0x7F;
    let rd = ((inst >> 7) & 0x1F) as u8;
    let funct3 = ((inst >> 12) & 0x7) as u8;
    let rs1 = ((inst >> 15) & 0x1F) as u8;
    let rs2 = ((inst >> 20) & 0x1F) as u8;
    let funct7 = ((inst >> 25) & 0x7F) as u8;
    let imm_i = (inst as i32) >> 20;

    match opcode {
        0x37 => Instruction::Lui {
            rd,
            imm: inst & 0xFFFF_F000,
        },
        0x17 => Instruction::Auipc {
            rd,
            imm: inst & 0xFFFF_F000,
        },
        0x6F => {
            // imm[20|10:1|11|19:12]
            let imm20 = (inst >> 31) & 1;
            let imm10_1 = (inst >> 21) & 0x3FF;
            let imm11 = (inst >> 20) & 1;
            let imm19_12 = (inst >> 12) & 0xFF;
            let offset = (imm20 << 20) | (imm19_12 << 12) | (imm11 << 11) | (imm10_1 << 1);
            Instruction::Jal {
                rd,
                imm: sext(offset, 21),
            }
        }
        0x67 if funct3 == 0 => Instruction::Jalr { rd, rs1, imm: imm_i },
        0x63 => {
            // imm[12|10:5|4:1|11]
            let imm12 = (inst >> 31) & 1;
            let imm10_5 = (inst >> 25) & 0x3F;
            let imm4_1 = (inst >> 8) & 0xF;
            let imm11 = (inst >> 7) & 1;
            let offset = (imm12 << 12) | (imm11 << 11) | (imm10_5 << 5) | (imm4_1 << 1);
            let imm = sext(offset, 13);

            match funct3 {
                0 => Instruction::Beq { rs1, rs2, imm },
                1 => Instruction::Bne { rs1, rs2, imm },
                4 => Instruction::Blt { rs1, rs2, imm },
                5 => Instruction::Bge { rs1, rs2, imm },
                6 => Instruction::Bltu { rs1, rs2, imm },
                7 => Instruction::Bgeu { rs1, rs2, imm },
                _ => Instruction::Unknown(inst),
            }
        }
        0x03 => match funct3 {
            0 => Instruction::Lb { rd, rs1, imm: imm_i },
            1 => Instruction::Lh { rd, rs1, imm: imm_i },
            2 => Instruction::Lw { rd, rs1, imm: imm_i },
            4 => Instruction::Lbu { rd, rs1, imm: imm_i },
            5 => Instruction::Lhu { rd, rs1, imm: imm_i },
            _ => Instruction::Unknown(inst),
        },
        0x23 => {
            // imm[11:5|4:0]
            let offset = ((inst >> 25) << 5) | ((inst >> 7) & 0x1F);
            let imm = sext(offset, 12);
            match funct3 {
                0 => Instruction::Sb { rs1, rs2, imm },
                1 => Instruction::Sh { rs1, rs2, imm },
                2 => Instruction::Sw { rs1, rs2, imm },
                _ => Instruction::Unknown(inst),
            }
        }
        0x13 => {
            let shamt = rs2;
            match (funct3, funct7) {
                (0, _) => Instruction::Addi { rd, rs1, imm: imm_i },
                (2, _) => Instruction::Slti { rd, rs1, imm: imm_i },
                // Immediate is sign-extended even for the unsigned compare.
                (3, _) => Instruction::Sltiu { rd, rs1, imm: imm_i },
                (4, _) => Instruction::Xori { rd, rs1, imm: imm_i },
                (6, _) => Instruction::Ori { rd, rs1, imm: imm_i },
                (7, _) => Instruction::Andi { rd, rs1, imm: imm_i },
                (1, 0x00) => Instruction::Slli { rd, rs1, shamt },
                (5, 0x00) => Instruction::Srli { rd, rs1, shamt },
                (5, 0x20) => Instruction::Srai { rd, rs1, shamt },
                _ => Instruction::Unknown(inst),
            }
        }
        0x33 => match (funct3, funct7) {
            (0, 0x00) => Instruction::Add { rd, rs1, rs2 },
            (0, 0x20) => Instruction::Sub { rd, rs1, rs2 },
            (1, 0x00) => Instruction::Sll { rd, rs1, rs2 },
            (2, 0x00) => Instruction::Slt { rd, rs1, rs2 },
            (3, 0x00) => Instruction::Sltu { rd, rs1, rs2 },
            (4, 0x00) => Instruction::Xor { rd, rs1, rs2 },
            (5, 0x00) => Instruction::Srl { rd, rs1, rs2 },
            (5, 0x20) => Instruction::Sra { rd, rs1, rs2 },
            (6, 0x00) => Instruction::Or { rd, rs1, rs2 },
            (7, 0x00) => Instruction::And { rd, rs1, rs2 },
            (0, 0x01) => Instruction::Mul { rd, rs1, rs2 },
            (1, 0x01) => Instruction::Mulh { rd, rs1, rs2 },
            (2, 0x01) => Instruction::Mulhsu { rd, rs1, rs2 },
            (3, 0x01) => Instruction::Mulhu { rd, rs1, rs2 },
            (4, 0x01) => Instruction::Div { rd, rs1, rs2 },
            (5, 0x01) => Instruction::Divu { rd, rs1, rs2 },
            (6, 0x01) => Instruction::Rem { rd, rs1, rs2 },
            (7, 0x01) => Instruction::Remu { rd, rs1, rs2 },
            _ => Instruction::Unknown(inst),
        },
        // FENCE and FENCE.I
        0x0F => Instruction::Fence,
        0x73 => {
            let csr = (inst >> 20) as u16;
            match funct3 {
                0 => match inst {
                    0x0000_0073 => Instruction::Ecall,
                    0x0010_0073 => Instruction::Ebreak,
                    0x3020_0073 => Instruction::Mret,
                    0x1050_0073 => Instruction::Wfi,
                    _ => Instruction::Unknown(inst),
                },
                1 => Instruction::Csrrw { rd, rs1, csr },
                2 => Instruction::Csrrs { rd, rs1, csr },
                3 => Instruction::Csrrc { rd, rs1, csr },
                5 => Instruction::Csrrwi { rd, imm: rs1, csr },
                6 => Instruction::Csrrsi { rd, imm: rs1, csr },
                7 => Instruction::Csrrci { rd, imm: rs1, csr },
                _ => Instruction::Unknown(inst),
            }
        }
        _ => Instruction::Unknown(inst),
    }
}
