pub mod riscv;

pub use riscv::RiscV;
