/// Destination for the computed result, read back by a debugger or simulator.
pub trait ResultCell {
    fn store(&mut self, value: u32);
}

impl<T: ResultCell + ?Sized> ResultCell for &mut T {
    fn store(&mut self, value: u32) {
        (**self).store(value)
    }
}

/// A 32-bit word at a fixed address.
#[derive(Debug)]
pub struct MmioCell {
    addr: *mut u32,
}

impl MmioCell {
    /// # Safety
    ///
    /// `addr` must be a writable, 4-byte aligned word that nothing else uses.
    pub const unsafe fn new(addr: usize) -> Self {
        Self {
            addr: addr as *mut u32,
        }
    }
}

impl ResultCell for MmioCell {
    #[inline]
    fn store(&mut self, value: u32) {
        // SAFETY: see `MmioCell::new`.
        unsafe { core::ptr::write_volatile(self.addr, value) }
    }
}
