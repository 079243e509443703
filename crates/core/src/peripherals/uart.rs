use crate::SimResult;
use bitflags::bitflags;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Transmit holding register.
pub const THR: u64 = 0x00;
/// Line status register.
pub const LSR: u64 = 0x05;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LineStatus: u8 {
        const DATA_READY = 1 << 0;
        /// Transmit holding register empty.
        const THRE = 1 << 5;
        /// Transmitter empty.
        const TEMT = 1 << 6;
    }
}

/// 16550-style UART, transmit side only.
///
/// Writes to THR are captured into an optional sink and echoed to stdout.
/// The transmitter never backs up, so LSR always reports THRE | TEMT.
#[derive(Debug, serde::Serialize)]
pub struct Uart {
    #[serde(skip)]
    sink: Option<Arc<Mutex<Vec<u8>>>>,
    echo_stdout: bool,
    tx_count: u64,
}

impl Default for Uart {
    fn default() -> Self {
        Self::new()
    }
}

impl Uart {
    pub fn new() -> Self {
        Self {
            sink: None,
            echo_stdout: true,
            tx_count: 0,
        }
    }

    pub fn line_status(&self) -> LineStatus {
        LineStatus::THRE | LineStatus::TEMT
    }

    pub fn tx_count(&self) -> u64 {
        self.tx_count
    }

    fn push_tx(&mut self, value: u8) {
        self.tx_count += 1;

        if let Some(sink) = &self.sink {
            if let Ok(mut guard) = sink.lock() {
                guard.push(value);
            }
        }

        if self.echo_stdout {
            #[allow(unused_must_use)]
            {
                print!("{}", value as char);
                io::stdout().flush();
            }
        }
    }

    pub fn set_sink(&mut self, sink: Option<Arc<Mutex<Vec<u8>>>>, echo_stdout: bool) {
        self.sink = sink;
        self.echo_stdout = echo_stdout;
    }

    pub fn set_echo(&mut self, echo_stdout: bool) {
        self.echo_stdout = echo_stdout;
    }
}

impl crate::Peripheral for Uart {
    fn read(&self, offset: u64) -> SimResult<u8> {
        match offset {
            LSR => Ok(self.line_status().bits()),
            _ => Ok(0),
        }
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        if offset == THR {
            self.push_tx(value);
        }
        Ok(())
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Peripheral;

    #[test]
    fn test_uart_thr_transmits() {
        let mut uart = Uart::new();
        let sink = Arc::new(Mutex::new(Vec::new()));
        uart.set_sink(Some(sink.clone()), false);

        uart.write(THR, b'A').unwrap();
        // Other registers swallow writes.
        uart.write(0x03, b'X').unwrap();
        uart.write(THR, b'B').unwrap();

        assert_eq!(*sink.lock().unwrap(), vec![b'A', b'B']);
        assert_eq!(uart.tx_count(), 2);
    }

    #[test]
    fn test_uart_always_ready() {
        let uart = Uart::new();
        let lsr = LineStatus::from_bits_truncate(uart.read(LSR).unwrap());
        assert!(lsr.contains(LineStatus::THRE));
        assert!(lsr.contains(LineStatus::TEMT));
        assert!(!lsr.contains(LineStatus::DATA_READY));
        assert_eq!(uart.read(THR).unwrap(), 0);
    }
}
