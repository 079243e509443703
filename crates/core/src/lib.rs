pub mod bus;
pub mod cpu;
pub mod decoder;
pub mod hosted;
pub mod memory;
pub mod metrics;
pub mod peripherals;
pub mod snapshot;

use std::any::Any;
use std::sync::Arc;

pub use rvsum_config::StopReason;


#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u64),
    #[error("Instruction decoding error at {0:#x}")]
    DecodeError(u64),
}

impl SimulationError {
    pub fn stop_reason(&self) -> StopReason {
        match self {
            SimulationError::MemoryViolation(_) => StopReason::MemoryViolation,
            SimulationError::DecodeError(_) => StopReason::DecodeError,
        }
    }
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Trait for observing simulation events in a modular way.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_simulation_stop(&self) {}
    fn on_step_start(&self, _pc: u32, _opcode: u32) {}
    fn on_step_end(&self, _cycles: u32) {}
    /// A parked hart was stepped without fetching.
    fn on_idle_step(&self) {}
    /// `ecall`/`ebreak` at `epc` trapped with `cause`. The instruction still
    /// retires, so `on_step_end` follows.
    fn on_trap(&self, _cause: u32, _epc: u32) {}
}

/// Trait representing a CPU architecture
pub trait Cpu {
    fn reset(&mut self, entry: u32);
    fn step(
        &mut self,
        bus: &mut dyn Bus,
        observers: &[Arc<dyn SimulationObserver>],
    ) -> SimResult<()>;
    fn set_pc(&mut self, val: u32);
    fn get_pc(&self) -> u32;
    fn set_sp(&mut self, val: u32);
    /// Stopped in a wait-for-interrupt.
    fn is_parked(&self) -> bool;
    /// Something could still end a wait-for-interrupt: an enabled interrupt
    /// is already pending, or interrupts are globally enabled.
    fn can_wake(&self) -> bool;
    fn snapshot(&self) -> snapshot::CpuSnapshot;
}

/// Trait representing a memory-mapped peripheral
pub trait Peripheral: std::fmt::Debug + Send {
    fn read(&self, offset: u64) -> SimResult<u8>;
    fn write(&mut self, offset: u64, value: u8) -> SimResult<()>;

    /// Word store. Devices that latch whole words override this; the default
    /// splits it into little-endian byte writes.
    fn write_u32(&mut self, offset: u64, value: u32) -> SimResult<()> {
        for (i, b) in value.to_le_bytes().into_iter().enumerate() {
            self.write(offset + i as u64, b)?;
        }
        Ok(())
    }

    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Trait representing the system bus
pub trait Bus {
    fn read_u8(&self, addr: u64) -> SimResult<u8>;
    fn write_u8(&mut self, addr: u64, value: u8) -> SimResult<()>;

    fn read_u16(&self, addr: u64) -> SimResult<u16> {
        let b0 = self.read_u8(addr)? as u16;
        let b1 = self.read_u8(addr + 1)? as u16;
        // Little Endian
        Ok(b0 | (b1 << 8))
    }

    fn read_u32(&self, addr: u64) -> SimResult<u32> {
        let b0 = self.read_u8(addr)? as u32;
        let b1 = self.read_u8(addr + 1)? as u32;
        let b2 = self.read_u8(addr + 2)? as u32;
        let b3 = self.read_u8(addr + 3)? as u32;
        Ok(b0 | (b1 << 8) | (b2 << 16) | (b3 << 24))
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()> {
        self.write_u8(addr, (value & 0xFF) as u8)?;
        self.write_u8(addr + 1, ((value >> 8) & 0xFF) as u8)?;
        self.write_u8(addr + 2, ((value >> 16) & 0xFF) as u8)?;
        self.write_u8(addr + 3, ((value >> 24) & 0xFF) as u8)?;
        Ok(())
    }

    fn write_u16(&mut self, addr: u64, value: u16) -> SimResult<()> {
        self.write_u8(addr, (value & 0xFF) as u8)?;
        self.write_u8(addr + 1, ((value >> 8) & 0xFF) as u8)?;
        Ok(())
    }
}

pub struct Machine<C: Cpu> {
    pub cpu: C,
    pub bus: bus::SystemBus,
    pub observers: Vec<Arc<dyn SimulationObserver>>,
}

impl<C: Cpu + Default> Machine<C> {
    pub fn new() -> Self {
        Self::with_bus(bus::SystemBus::new())
    }

    pub fn with_bus(bus: bus::SystemBus) -> Self {
        Self {
            cpu: C::default(),
            bus,
            observers: Vec::new(),
        }
    }
}

impl<C: Cpu + Default> Default for Machine<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Cpu> Machine<C> {
    pub fn load_firmware(&mut self, image: &memory::ProgramImage) -> SimResult<()> {
        for segment in &image.segments {
            if !self.bus.load_segment(segment) {
                tracing::warn!(
                    "Failed to load segment at {:#x} - outside of memory map",
                    segment.start_addr
                );
            }
        }

        for observer in &self.observers {
            observer.on_simulation_start();
        }

        self.cpu.reset(image.entry_point as u32);
        // riscv-rt sets up its own stack; park sp at the top of RAM so
        // hand-written images have one too.
        self.cpu.set_sp(self.bus.ram.end_addr() as u32);

        Ok(())
    }

    pub fn step(&mut self) -> SimResult<()> {
        self.cpu.step(&mut self.bus, &self.observers)
    }

    /// A parked hart that nothing can wake never runs again.
    pub fn is_halted(&self) -> bool {
        self.cpu.is_parked() && !self.cpu.can_wake()
    }

    /// Step until the hart halts, an error occurs, or `max_steps` runs out.
    pub fn run(&mut self, max_steps: u64) -> RunOutcome {
        let mut steps = 0;
        let stop_reason = loop {
            if self.is_halted() {
                break StopReason::Halt;
            }
            if steps >= max_steps {
                break StopReason::MaxSteps;
            }
            if let Err(e) = self.step() {
                tracing::info!("Simulation Error at step {}: {}", steps, e);
                break e.stop_reason();
            }
            steps += 1;
        };

        for observer in &self.observers {
            observer.on_simulation_stop();
        }

        tracing::debug!(?stop_reason, steps, pc = self.cpu.get_pc(), "run finished");
        RunOutcome {
            stop_reason,
            steps,
            pc: self.cpu.get_pc(),
        }
    }

    pub fn snapshot(&self) -> snapshot::MachineSnapshot {
        snapshot::MachineSnapshot {
            cpu: self.cpu.snapshot(),
            peripherals: self.bus.snapshot_peripherals(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub stop_reason: StopReason,
    pub steps: u64,
    pub pc: u32,
}
