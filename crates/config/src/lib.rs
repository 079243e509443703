use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MemoryRange {
    pub base: u64,
    pub size: String, // e.g. "64KiB"
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UartConfig {
    pub base: u64,
    /// Offset of the line status register. When set, hosted runs poll its
    /// THRE bit before each byte.
    #[serde(default)]
    pub status_offset: Option<u64>,
    /// Mirror transmitted bytes to stdout.
    #[serde(default = "default_true")]
    pub echo: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResultCellConfig {
    pub base: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OperandsConfig {
    pub a: u32,
    pub b: u32,
}

impl Default for OperandsConfig {
    fn default() -> Self {
        Self { a: 5, b: 7 }
    }
}

fn default_true() -> bool {
    true
}

fn default_rom() -> MemoryRange {
    MemoryRange {
        base: 0x8000_0000,
        size: "64KiB".to_string(),
    }
}

fn default_ram() -> MemoryRange {
    MemoryRange {
        base: 0x8001_0000,
        size: "64KiB".to_string(),
    }
}

fn default_uart() -> UartConfig {
    UartConfig {
        base: 0x1000_0000,
        status_offset: None,
        echo: true,
    }
}

fn default_result_cell() -> ResultCellConfig {
    ResultCellConfig { base: 0x200 }
}

/// Board description: where the program's devices and memories live.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SystemManifest {
    pub name: String,
    #[serde(default = "default_rom")]
    pub rom: MemoryRange,
    #[serde(default = "default_ram")]
    pub ram: MemoryRange,
    #[serde(default = "default_uart")]
    pub uart: UartConfig,
    #[serde(default = "default_result_cell")]
    pub result_cell: ResultCellConfig,
    #[serde(default)]
    pub operands: OperandsConfig,
}

impl Default for SystemManifest {
    fn default() -> Self {
        Self {
            name: "rvsum-demo".to_string(),
            rom: default_rom(),
            ram: default_ram(),
            uart: default_uart(),
            result_cell: default_result_cell(),
            operands: OperandsConfig::default(),
        }
    }
}

impl SystemManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open system manifest at {:?}", path.as_ref()))?;
        serde_yaml::from_reader(f).context("Failed to parse System Manifest")
    }

    pub fn rom_size(&self) -> Result<usize> {
        parse_size(&self.rom.size).map(|s| s as usize)
    }

    pub fn ram_size(&self) -> Result<usize> {
        parse_size(&self.ram.size).map(|s| s as usize)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestInputs {
    pub firmware: String,
    pub system: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestLimits {
    pub max_steps: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxSteps,
    MemoryViolation,
    DecodeError,
    /// Hart parked in `wfi` with interrupts disabled.
    Halt,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct UartContainsAssertion {
    pub uart_contains: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct UartEqualsAssertion {
    pub uart_equals: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ResultCellAssertion {
    pub result_cell: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StopReasonAssertion {
    pub expected_stop_reason: StopReason,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TestAssertion {
    UartContains(UartContainsAssertion),
    UartEquals(UartEqualsAssertion),
    ResultCell(ResultCellAssertion),
    ExpectedStopReason(StopReasonAssertion),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestScript {
    pub schema_version: String,
    pub inputs: TestInputs,
    pub limits: TestLimits,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

impl TestScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open test script at {:?}", path.as_ref()))?;
        let script: Self =
            serde_yaml::from_reader(f).context("Failed to parse Test Script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        if self.inputs.firmware.trim().is_empty() {
            anyhow::bail!("Input 'firmware' path cannot be empty");
        }

        if self.limits.max_steps == 0 {
            anyhow::bail!("Limit 'max_steps' must be greater than zero");
        }

        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
