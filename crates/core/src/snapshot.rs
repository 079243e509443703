use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MachineSnapshot {
    pub cpu: CpuSnapshot,
    pub peripherals: HashMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CpuSnapshot {
    /// x0..x31
    pub registers: Vec<u32>,
    pub pc: u32,
    pub mstatus: u32,
    pub mepc: u32,
    pub mcause: u32,
    pub parked: bool,
}
