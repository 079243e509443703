use crate::SimResult;

/// A single 32-bit word the program leaves its result in.
///
/// Reads back like RAM, but also remembers whether it was ever written and
/// how many stores hit it, so a run can be checked for exactly one result.
#[derive(Debug, Default, serde::Serialize)]
pub struct DebugCell {
    word: u32,
    stores: u32,
}

impl DebugCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the first store.
    pub fn value(&self) -> Option<u32> {
        (self.stores > 0).then_some(self.word)
    }

    /// Number of store transactions (a word store counts once, a byte store
    /// once per byte).
    pub fn stores(&self) -> u32 {
        self.stores
    }
}

impl crate::Peripheral for DebugCell {
    fn read(&self, offset: u64) -> SimResult<u8> {
        Ok(self.word.to_le_bytes()[(offset & 3) as usize])
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        let mut bytes = self.word.to_le_bytes();
        bytes[(offset & 3) as usize] = value;
        self.word = u32::from_le_bytes(bytes);
        self.stores += 1;
        Ok(())
    }

    fn write_u32(&mut self, _offset: u64, value: u32) -> SimResult<()> {
        self.word = value;
        self.stores += 1;
        tracing::debug!("result cell <- {} ({:#x})", value, value);
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
