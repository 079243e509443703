//! Run the demo routine natively against a simulated bus.
//!
//! [`BusUart`] and [`BusCell`] implement the program's device traits by
//! issuing bus transactions, so the routine sees the same UART and result
//! cell the firmware would, without an instruction-level run.

use crate::bus::SystemBus;
use crate::peripherals::uart::{LineStatus, LSR};
use crate::{Bus, SimulationError};
use rvsum_config::SystemManifest;
use rvsum_program::{report, Operands, Platform, ResultCell, UartTx};
use std::cell::RefCell;

/// Upper bound on status polls for one byte before the UART is declared stuck.
pub const READY_POLL_LIMIT: u32 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum HostedError {
    #[error(transparent)]
    Bus(#[from] SimulationError),
    #[error("UART status register at {addr:#x} never reported ready")]
    UartNotReady { addr: u64 },
}

/// Device addresses from a manifest, in the form the program consumes.
pub fn platform_from_manifest(manifest: &SystemManifest) -> Platform {
    Platform {
        uart_base: manifest.uart.base as usize,
        uart_status: manifest
            .uart
            .status_offset
            .map(|off| (manifest.uart.base.saturating_add(off) as usize, LineStatus::THRE.bits())),
        result_cell: manifest.result_cell.base as usize,
    }
}

pub fn operands_from_manifest(manifest: &SystemManifest) -> Operands {
    Operands {
        a: manifest.operands.a,
        b: manifest.operands.b,
    }
}

/// Shared access to the bus plus the first fault any handle ran into.
/// The device traits are infallible, so faults are parked here and surfaced
/// once the routine returns.
struct Port<'a> {
    bus: RefCell<&'a mut SystemBus>,
    fault: RefCell<Option<HostedError>>,
}

impl Port<'_> {
    fn faulted(&self) -> bool {
        self.fault.borrow().is_some()
    }

    fn record(&self, err: HostedError) {
        let mut fault = self.fault.borrow_mut();
        if fault.is_none() {
            tracing::warn!("hosted run fault: {}", err);
            *fault = Some(err);
        }
    }
}

pub struct BusUart<'p, 'a> {
    port: &'p Port<'a>,
    data: u64,
    status: Option<(u64, u8)>,
}

impl BusUart<'_, '_> {
    fn wait_ready(&self, addr: u64, mask: u8) -> Result<(), HostedError> {
        let bus = self.port.bus.borrow();
        for _ in 0..READY_POLL_LIMIT {
            if bus.read_u8(addr)? & mask != 0 {
                return Ok(());
            }
        }
        Err(HostedError::UartNotReady { addr })
    }
}

impl UartTx for BusUart<'_, '_> {
    fn write_byte(&mut self, byte: u8) {
        if self.port.faulted() {
            return;
        }
        if let Some((addr, mask)) = self.status {
            if let Err(e) = self.wait_ready(addr, mask) {
                self.port.record(e);
                return;
            }
        }
        let res = self.port.bus.borrow_mut().write_u8(self.data, byte);
        if let Err(e) = res {
            self.port.record(e.into());
        }
    }
}

pub struct BusCell<'p, 'a> {
    port: &'p Port<'a>,
    addr: u64,
}

impl ResultCell for BusCell<'_, '_> {
    fn store(&mut self, value: u32) {
        if self.port.faulted() {
            return;
        }
        let res = self.port.bus.borrow_mut().write_u32(self.addr, value);
        if let Err(e) = res {
            self.port.record(e.into());
        }
    }
}

/// Run `report` against `bus` using the addresses in `platform`.
///
/// Returns the sum once every device access succeeded. This is the hosted
/// stand-in for the firmware's idle loop: control comes back to the caller
/// only after the last device write.
pub fn run_report(
    bus: &mut SystemBus,
    platform: &Platform,
    operands: Operands,
) -> Result<u32, HostedError> {
    let port = Port {
        bus: RefCell::new(bus),
        fault: RefCell::new(None),
    };
    let mut uart = BusUart {
        port: &port,
        data: platform.uart_base as u64,
        status: platform
            .uart_status
            .map(|(addr, mask)| (addr as u64, mask)),
    };
    let mut cell = BusCell {
        port: &port,
        addr: platform.result_cell as u64,
    };

    let sum = report(operands, &mut uart, &mut cell);

    match port.fault.into_inner() {
        Some(err) => Err(err),
        None => Ok(sum),
    }
}

/// Poll the UART line status directly, for callers that want to check the
/// device before a run.
pub fn uart_ready(bus: &SystemBus, uart_base: u64) -> Result<bool, SimulationError> {
    let addr = uart_base
        .checked_add(LSR)
        .ok_or(SimulationError::MemoryViolation(uart_base))?;
    let lsr = LineStatus::from_bits_truncate(bus.read_u8(addr)?);
    Ok(lsr.contains(LineStatus::THRE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn quiet_bus() -> (SystemBus, Arc<Mutex<Vec<u8>>>) {
        let mut bus = SystemBus::new();
        let sink = Arc::new(Mutex::new(Vec::new()));
        bus.attach_uart_tx_sink(sink.clone(), false);
        (bus, sink)
    }

    #[test]
    fn test_demo_run_against_simulated_devices() {
        let (mut bus, sink) = quiet_bus();
        let sum = run_report(&mut bus, &Platform::DEMO, Operands::DEMO).unwrap();

        assert_eq!(sum, 12);
        assert_eq!(*sink.lock().unwrap(), b"RES=12\n");
        let cell = bus.result_cell().unwrap();
        assert_eq!(cell.value(), Some(12));
        assert_eq!(cell.stores(), 1);
    }

    #[test]
    fn test_ready_polling_against_simulated_lsr() {
        let (mut bus, sink) = quiet_bus();
        let mut manifest = SystemManifest::default();
        manifest.uart.status_offset = Some(LSR);
        let platform = platform_from_manifest(&manifest);
        assert_eq!(platform.uart_status, Some((0x1000_0005, 0x20)));

        run_report(&mut bus, &platform, Operands { a: 40, b: 2 }).unwrap();
        assert_eq!(*sink.lock().unwrap(), b"RES=42\n");
        assert!(uart_ready(&bus, 0x1000_0000).unwrap());
    }

    #[test]
    fn test_status_register_that_never_reports_ready() {
        let (mut bus, sink) = quiet_bus();
        let platform = Platform {
            // THR reads back as zero, so the THRE bit is never set.
            uart_status: Some((0x1000_0000, 0x20)),
            ..Platform::DEMO
        };
        let err = run_report(&mut bus, &platform, Operands::DEMO).unwrap_err();
        assert!(matches!(err, HostedError::UartNotReady { addr: 0x1000_0000 }));
        assert!(sink.lock().unwrap().is_empty());
        assert_eq!(bus.result_cell().unwrap().value(), None);
    }

    #[test]
    fn test_unmapped_uart_is_a_bus_fault() {
        let (mut bus, _sink) = quiet_bus();
        let platform = Platform {
            uart_base: 0x4000_0000,
            ..Platform::DEMO
        };
        let err = run_report(&mut bus, &platform, Operands::DEMO).unwrap_err();
        assert!(matches!(
            err,
            HostedError::Bus(SimulationError::MemoryViolation(0x4000_0000))
        ));
        // Nothing after the first fault reaches the bus.
        assert_eq!(bus.result_cell().unwrap().stores(), 0);
    }

    #[test]
    fn test_operands_from_manifest() {
        let mut manifest = SystemManifest::default();
        assert_eq!(operands_from_manifest(&manifest), Operands::DEMO);
        manifest.operands.a = 1;
        assert_eq!(operands_from_manifest(&manifest).sum(), 8);
    }
}
