use crate::store::ResultCell;
use crate::uart::{write_decimal, write_str, UartTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operands {
    pub a: u32,
    pub b: u32,
}

impl Operands {
    pub const DEMO: Operands = Operands { a: 5, b: 7 };

    pub const fn sum(&self) -> u32 {
        self.a.wrapping_add(self.b)
    }
}

impl Default for Operands {
    fn default() -> Self {
        Self::DEMO
    }
}

/// Print `RES=<sum>\n`, then store the sum in `cell`.
///
/// This is the only place the routine touches either device; once it returns
/// the caller is expected to park.
pub fn report<U, C>(operands: Operands, uart: &mut U, cell: &mut C) -> u32
where
    U: UartTx + ?Sized,
    C: ResultCell + ?Sized,
{
    let sum = operands.sum();

    write_str(uart, b"RES=");
    write_decimal(uart, sum);
    uart.write_byte(b'\n');

    cell.store(sum);

    #[cfg(feature = "trace")]
    tracing::debug!(a = operands.a, b = operands.b, sum, "result reported");

    sum
}
