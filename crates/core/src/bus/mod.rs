use crate::memory::{LinearMemory, Segment};
use crate::peripherals::debug_cell::DebugCell;
use crate::peripherals::uart::Uart;
use crate::{Peripheral, SimResult, SimulationError};
use rvsum_config::SystemManifest;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const UART_WINDOW: u64 = 0x100;
pub const RESULT_CELL_WINDOW: u64 = 4;

pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub dev: Box<dyn Peripheral>,
}

/// ROM, RAM and the two demo devices.
///
/// ROM is only writable through [`SystemBus::load_segment`]; CPU stores to it
/// are memory violations.
pub struct SystemBus {
    pub rom: LinearMemory,
    pub ram: LinearMemory,
    pub peripherals: Vec<PeripheralEntry>,
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemBus {
    /// The demo board: ROM at `0x8000_0000`, RAM right after it, UART at
    /// `0x1000_0000`, result cell at `0x200`.
    pub fn new() -> Self {
        let m = SystemManifest::default();
        Self::with_layout(&m, 64 * 1024, 64 * 1024)
    }

    pub fn from_config(manifest: &SystemManifest) -> anyhow::Result<Self> {
        let rom_size = manifest.rom_size()?;
        let ram_size = manifest.ram_size()?;
        if let Some(offset) = manifest.uart.status_offset {
            if offset >= UART_WINDOW {
                anyhow::bail!(
                    "UART status_offset {:#x} is outside the {:#x}-byte UART window",
                    offset,
                    UART_WINDOW
                );
            }
        }
        check_layout(&[
            ("rom", manifest.rom.base, rom_size as u64),
            ("ram", manifest.ram.base, ram_size as u64),
            ("uart0", manifest.uart.base, UART_WINDOW),
            ("result_cell", manifest.result_cell.base, RESULT_CELL_WINDOW),
        ])?;
        Ok(Self::with_layout(manifest, rom_size, ram_size))
    }

    fn with_layout(manifest: &SystemManifest, rom_size: usize, ram_size: usize) -> Self {
        let mut uart = Uart::new();
        uart.set_echo(manifest.uart.echo);

        Self {
            rom: LinearMemory::new(rom_size, manifest.rom.base),
            ram: LinearMemory::new(ram_size, manifest.ram.base),
            peripherals: vec![
                PeripheralEntry {
                    name: "uart0".to_string(),
                    base: manifest.uart.base,
                    size: UART_WINDOW,
                    dev: Box::new(uart),
                },
                PeripheralEntry {
                    name: "result_cell".to_string(),
                    base: manifest.result_cell.base,
                    size: RESULT_CELL_WINDOW,
                    dev: Box::new(DebugCell::new()),
                },
            ],
        }
    }

    /// Copy a program segment into ROM, or RAM if it does not fit in ROM.
    pub fn load_segment(&mut self, segment: &Segment) -> bool {
        self.rom.load_from_segment(segment) || self.ram.load_from_segment(segment)
    }

    fn find_peripheral(&self, addr: u64) -> Option<usize> {
        self.peripherals
            .iter()
            .position(|p| addr >= p.base && addr - p.base < p.size)
    }

    pub fn peripheral_base(&self, name: &str) -> Option<u64> {
        self.peripherals
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.base)
    }

    fn device<T: 'static>(&self) -> Option<&T> {
        self.peripherals
            .iter()
            .find_map(|p| p.dev.as_any().and_then(|any| any.downcast_ref::<T>()))
    }

    fn device_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.peripherals
            .iter_mut()
            .find_map(|p| p.dev.as_any_mut().and_then(|any| any.downcast_mut::<T>()))
    }

    pub fn uart(&self) -> Option<&Uart> {
        self.device::<Uart>()
    }

    pub fn result_cell(&self) -> Option<&DebugCell> {
        self.device::<DebugCell>()
    }

    /// Attach a UART TX capture sink to the UART on this bus.
    ///
    /// When `echo_stdout` is false, UART writes will no longer be printed to stdout.
    pub fn attach_uart_tx_sink(&mut self, sink: Arc<Mutex<Vec<u8>>>, echo_stdout: bool) {
        if let Some(uart) = self.device_mut::<Uart>() {
            uart.set_sink(Some(sink), echo_stdout);
        }
    }

    pub fn snapshot_peripherals(&self) -> HashMap<String, serde_json::Value> {
        self.peripherals
            .iter()
            .map(|p| (p.name.clone(), p.dev.snapshot()))
            .collect()
    }
}

/// Reject regions that wrap past the end of the address space or overlap.
fn check_layout(regions: &[(&str, u64, u64)]) -> anyhow::Result<()> {
    let mut spans = Vec::with_capacity(regions.len());
    for &(name, base, size) in regions {
        let Some(end) = base.checked_add(size) else {
            anyhow::bail!(
                "Region '{}' at {:#x} (size {:#x}) overflows the address space",
                name,
                base,
                size
            );
        };
        spans.push((name, base, end));
    }
    spans.sort_by_key(|r| r.1);
    for pair in spans.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if b.1 < a.2 {
            anyhow::bail!(
                "Region '{}' at {:#x} overlaps '{}' ending at {:#x}",
                b.0,
                b.1,
                a.0,
                a.2
            );
        }
    }
    Ok(())
}

impl crate::Bus for SystemBus {
    fn read_u8(&self, addr: u64) -> SimResult<u8> {
        if let Some(val) = self.ram.read_u8(addr) {
            return Ok(val);
        }
        if let Some(val) = self.rom.read_u8(addr) {
            return Ok(val);
        }
        if let Some(i) = self.find_peripheral(addr) {
            let p = &self.peripherals[i];
            return p.dev.read(addr - p.base);
        }

        Err(SimulationError::MemoryViolation(addr))
    }

    fn write_u8(&mut self, addr: u64, value: u8) -> SimResult<()> {
        if self.ram.write_u8(addr, value) {
            return Ok(());
        }
        if let Some(i) = self.find_peripheral(addr) {
            let p = &mut self.peripherals[i];
            return p.dev.write(addr - p.base, value);
        }

        Err(SimulationError::MemoryViolation(addr))
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()> {
        // Word stores that land fully inside one device go to it as a word.
        if let Some(i) = self.find_peripheral(addr) {
            let p = &mut self.peripherals[i];
            if p.size - (addr - p.base) >= 4 {
                return p.dev.write_u32(addr - p.base, value);
            }
        }
        for (i, b) in value.to_le_bytes().into_iter().enumerate() {
            self.write_u8(addr + i as u64, b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bus;

    #[test]
    fn test_default_map() {
        let bus = SystemBus::new();
        assert_eq!(bus.rom.base_addr, 0x8000_0000);
        assert_eq!(bus.ram.base_addr, 0x8001_0000);
        assert_eq!(bus.peripheral_base("uart0"), Some(0x1000_0000));
        assert_eq!(bus.peripheral_base("result_cell"), Some(0x200));
    }

    #[test]
    fn test_rom_is_read_only_to_cpu() {
        let mut bus = SystemBus::new();
        assert!(bus.load_segment(&Segment {
            start_addr: 0x8000_0000,
            data: vec![1, 2, 3, 4],
        }));
        assert_eq!(bus.read_u32(0x8000_0000).unwrap(), 0x0403_0201);
        assert!(matches!(
            bus.write_u8(0x8000_0000, 0),
            Err(SimulationError::MemoryViolation(0x8000_0000))
        ));
    }

    #[test]
    fn test_unmapped_access_is_violation() {
        let mut bus = SystemBus::new();
        assert!(bus.read_u8(0x0).is_err());
        assert!(bus.write_u32(0x4000_0000, 1).is_err());
    }

    #[test]
    fn test_word_store_reaches_result_cell() {
        let mut bus = SystemBus::new();
        bus.write_u32(0x200, 12).unwrap();
        let cell = bus.result_cell().unwrap();
        assert_eq!(cell.value(), Some(12));
        assert_eq!(cell.stores(), 1);
        assert_eq!(bus.read_u32(0x200).unwrap(), 12);
    }

    #[test]
    fn test_uart_sink_capture() {
        let mut bus = SystemBus::new();
        let sink = Arc::new(Mutex::new(Vec::new()));
        bus.attach_uart_tx_sink(sink.clone(), false);
        bus.write_u8(0x1000_0000, b'O').unwrap();
        bus.write_u8(0x1000_0000, b'K').unwrap();
        assert_eq!(*sink.lock().unwrap(), b"OK");
    }

    #[test]
    fn test_from_config_moves_devices() {
        let mut m = SystemManifest::default();
        m.uart.base = 0x4000_1000;
        m.result_cell.base = 0x300;
        let bus = SystemBus::from_config(&m).unwrap();
        assert_eq!(bus.peripheral_base("uart0"), Some(0x4000_1000));
        assert_eq!(bus.peripheral_base("result_cell"), Some(0x300));
    }

    #[test]
    fn test_from_config_rejects_overlap() {
        let mut m = SystemManifest::default();
        m.result_cell.base = 0x1000_0010;
        let err = SystemBus::from_config(&m).err().unwrap();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_from_config_rejects_wrapping_region() {
        let mut m = SystemManifest::default();
        m.uart.base = u64::MAX - 0x10;
        let err = SystemBus::from_config(&m).err().unwrap();
        assert!(err.to_string().contains("'uart0'"));
        assert!(err.to_string().contains("overflows the address space"));

        let mut m = SystemManifest::default();
        m.rom.base = u64::MAX - 0x100;
        let err = SystemBus::from_config(&m).err().unwrap();
        assert!(err.to_string().contains("'rom'"));
    }

    #[test]
    fn test_from_config_rejects_status_outside_uart() {
        let mut m = SystemManifest::default();
        m.uart.status_offset = Some(UART_WINDOW);
        let err = SystemBus::from_config(&m).err().unwrap();
        assert!(err.to_string().contains("status_offset"));
    }

    #[test]
    fn test_device_at_top_of_address_space() {
        let mut m = SystemManifest::default();
        m.result_cell.base = u64::MAX - 4;
        let mut bus = SystemBus::from_config(&m).unwrap();
        bus.write_u32(u64::MAX - 4, 12).unwrap();
        assert_eq!(bus.result_cell().unwrap().value(), Some(12));
        assert!(bus.read_u8(u64::MAX - 5).is_err());
        assert!(bus.read_u8(u64::MAX).is_err());
    }
}
