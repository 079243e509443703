use core::ffi::CStr;

use crate::format::DecimalBuf;

/// Byte-wide transmit side of a UART.
///
/// Every call puts exactly one byte on the wire. There is no failure path:
/// implementations either assume an always-ready device or block until the
/// device accepts the byte.
pub trait UartTx {
    fn write_byte(&mut self, byte: u8);
}

impl<T: UartTx + ?Sized> UartTx for &mut T {
    fn write_byte(&mut self, byte: u8) {
        (**self).write_byte(byte)
    }
}

/// UART driven through a single memory-mapped data register.
#[derive(Debug)]
pub struct MmioUart {
    data: *mut u8,
    ready: Option<(*const u8, u8)>,
}

impl MmioUart {
    /// # Safety
    ///
    /// `data_register` must be the address of a writable byte-wide UART
    /// transmit register that stays mapped for the lifetime of the handle.
    pub const unsafe fn new(data_register: usize) -> Self {
        Self {
            data: data_register as *mut u8,
            ready: None,
        }
    }

    /// Spin on `status_register` until `status & mask != 0` before every write.
    ///
    /// # Safety
    ///
    /// `status_register` must be a readable device register for the lifetime
    /// of the handle.
    pub const unsafe fn with_ready_poll(mut self, status_register: usize, mask: u8) -> Self {
        self.ready = Some((status_register as *const u8, mask));
        self
    }

    pub fn polls_ready(&self) -> bool {
        self.ready.is_some()
    }
}

impl UartTx for MmioUart {
    #[inline]
    fn write_byte(&mut self, byte: u8) {
        // SAFETY: addresses were vouched for in `new`/`with_ready_poll`.
        unsafe {
            if let Some((status, mask)) = self.ready {
                while core::ptr::read_volatile(status) & mask == 0 {
                    core::hint::spin_loop();
                }
            }
            core::ptr::write_volatile(self.data, byte);
        }
    }
}

/// Write `bytes` up to (not including) the first NUL, or the whole slice if
/// it has none.
pub fn write_str<U: UartTx + ?Sized>(uart: &mut U, bytes: &[u8]) {
    for &b in bytes.iter().take_while(|&&b| b != 0) {
        uart.write_byte(b);
    }
}

pub fn write_cstr<U: UartTx + ?Sized>(uart: &mut U, s: &CStr) {
    write_str(uart, s.to_bytes());
}

pub fn write_decimal<U: UartTx + ?Sized>(uart: &mut U, value: u32) {
    let digits = DecimalBuf::new(value);
    write_str(uart, digits.as_bytes());
}
