use crate::SimulationObserver;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Run statistics gathered from the hart's observer hooks.
///
/// Every `Machine::step` is either a retired instruction or an idle step of
/// a parked hart, so the two always add up to the steps taken. Trapping
/// `ecall`/`ebreak` instructions count as retired and as traps.
#[derive(Debug)]
pub struct PerformanceMetrics {
    retired: AtomicU64,
    idle_steps: AtomicU64,
    traps: AtomicU64,
    started: Mutex<Instant>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            retired: AtomicU64::new(0),
            idle_steps: AtomicU64::new(0),
            traps: AtomicU64::new(0),
            started: Mutex::new(Instant::now()),
        }
    }

    pub fn reset(&self) {
        self.retired.store(0, Ordering::SeqCst);
        self.idle_steps.store(0, Ordering::SeqCst);
        self.traps.store(0, Ordering::SeqCst);
        if let Ok(mut started) = self.started.lock() {
            *started = Instant::now();
        }
    }

    pub fn get_instructions(&self) -> u64 {
        self.retired.load(Ordering::SeqCst)
    }

    pub fn get_idle_steps(&self) -> u64 {
        self.idle_steps.load(Ordering::SeqCst)
    }

    pub fn get_traps(&self) -> u64 {
        self.traps.load(Ordering::SeqCst)
    }

    pub fn get_steps(&self) -> u64 {
        self.get_instructions() + self.get_idle_steps()
    }

    /// Retired instructions per wall-clock second since the last reset.
    pub fn get_ips(&self) -> f64 {
        let elapsed = match self.started.lock() {
            Ok(started) => started.elapsed().as_secs_f64(),
            Err(_) => return 0.0,
        };
        if elapsed > 0.0 {
            self.get_instructions() as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl SimulationObserver for PerformanceMetrics {
    fn on_simulation_start(&self) {
        self.reset();
    }

    fn on_step_end(&self, _cycles: u32) {
        self.retired.fetch_add(1, Ordering::SeqCst);
    }

    fn on_idle_step(&self) {
        self.idle_steps.fetch_add(1, Ordering::SeqCst);
    }

    fn on_trap(&self, cause: u32, epc: u32) {
        tracing::debug!(cause, epc = format_args!("{:#x}", epc), "trap");
        self.traps.fetch_add(1, Ordering::SeqCst);
    }
}
