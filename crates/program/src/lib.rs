//! The RES demo routine: add two operands, print `RES=<sum>\n` over a UART and
//! leave the sum in a debug cell.
//!
//! Everything here is `no_std` and written against two small traits,
//! [`UartTx`] and [`ResultCell`], so the same routine runs on the bare-metal
//! target through MMIO handles and on the host against a simulated bus.
#![cfg_attr(not(test), no_std)]

pub mod format;
pub mod report;
pub mod store;
pub mod uart;

pub use format::{format_u32, DecimalBuf};
pub use report::{report, Operands};
pub use store::{MmioCell, ResultCell};
pub use uart::{write_cstr, write_decimal, write_str, MmioUart, UartTx};

/// Data register of the UART on the demo board.
pub const UART_BASE: usize = 0x1000_0000;

/// Word the demo writes its result to for a debugger or simulator to inspect.
pub const RESULT_CELL: usize = 0x200;

/// Memory-mapped resources the routine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub uart_base: usize,
    /// Status register and ready mask. `None` means the UART is treated as
    /// always ready.
    pub uart_status: Option<(usize, u8)>,
    pub result_cell: usize,
}

impl Platform {
    pub const DEMO: Platform = Platform {
        uart_base: UART_BASE,
        uart_status: None,
        result_cell: RESULT_CELL,
    };

    /// Build the MMIO handles for this platform.
    ///
    /// # Safety
    ///
    /// The addresses must be valid device registers (or RAM) for the whole
    /// program lifetime, and nothing else may write to them concurrently.
    pub unsafe fn handles(&self) -> (MmioUart, MmioCell) {
        let uart = match self.uart_status {
            Some((status, mask)) => MmioUart::new(self.uart_base).with_ready_poll(status, mask),
            None => MmioUart::new(self.uart_base),
        };
        (uart, MmioCell::new(self.result_cell))
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::DEMO
    }
}
