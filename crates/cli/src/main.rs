use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rvsum_config::{StopReason, SystemManifest, TestAssertion, TestScript};
use rvsum_core::bus::SystemBus;
use rvsum_core::cpu::RiscV;
use rvsum_core::metrics::PerformanceMetrics;
use rvsum_core::{hosted, Machine};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

const EXIT_PASS: u8 = 0;
const EXIT_ASSERT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

/// Hard ceiling for `--max-steps` and `limits.max_steps`.
const MAX_ALLOWED_STEPS: u64 = 50_000_000;

#[derive(Parser, Debug)]
#[command(
    name = "rvsum",
    author,
    version,
    about = "Run the RES sum demo on a simulated RV32 board",
    long_about = None
)]
struct Cli {
    /// Enable instruction-level execution tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a firmware ELF on the simulated board.
    Run(RunArgs),
    /// Run the demo routine natively against the simulated UART and result cell.
    Host(HostArgs),
    /// Deterministic, CI-friendly runner driven by a test script (YAML).
    Test(TestArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the firmware ELF file
    #[arg(short, long)]
    firmware: PathBuf,

    /// Path to the system manifest (YAML)
    #[arg(short, long)]
    system: Option<PathBuf>,

    /// Maximum number of steps to execute
    #[arg(long, default_value_t = 20_000)]
    max_steps: u64,

    /// Write a JSON machine snapshot here after the run
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct HostArgs {
    /// Path to the system manifest (YAML)
    #[arg(short, long)]
    system: Option<PathBuf>,

    /// First operand (overrides the manifest)
    #[arg(short = 'a', long)]
    a: Option<u32>,

    /// Second operand (overrides the manifest)
    #[arg(short = 'b', long)]
    b: Option<u32>,
}

#[derive(Args, Debug)]
struct TestArgs {
    /// Path to the test script (YAML)
    #[arg(short = 'c', long)]
    script: PathBuf,

    /// Override `limits.max_steps` from the script
    #[arg(long)]
    max_steps: Option<u64>,

    /// Do not echo UART output to stdout
    #[arg(long)]
    no_uart_stdout: bool,

    /// Write `result.json` and `uart.log` into this directory
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries nothing but UART output.
    let level = if cli.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Run(args) => run_firmware(args),
        Commands::Host(args) => run_hosted(args),
        Commands::Test(args) => run_test(args),
    };
    ExitCode::from(code)
}

fn load_manifest(path: Option<&Path>) -> anyhow::Result<SystemManifest> {
    match path {
        Some(path) => {
            info!("Loading system manifest: {:?}", path);
            SystemManifest::from_file(path)
        }
        None => {
            info!("Using default hardware configuration");
            Ok(SystemManifest::default())
        }
    }
}

fn build_bus(manifest: &SystemManifest) -> Option<SystemBus> {
    match SystemBus::from_config(manifest) {
        Ok(bus) => Some(bus),
        Err(e) => {
            error!("Invalid system manifest: {:#}", e);
            None
        }
    }
}

fn build_machine(
    bus: SystemBus,
    firmware: &Path,
) -> anyhow::Result<(Machine<RiscV>, Arc<PerformanceMetrics>)> {
    info!("Loading firmware: {:?}", firmware);
    let program = rvsum_loader::load_elf(firmware)?;

    let metrics = Arc::new(PerformanceMetrics::new());
    let mut machine = Machine::<RiscV>::with_bus(bus);
    machine.observers.push(metrics.clone());
    machine
        .load_firmware(&program)
        .context("Failed to load firmware into memory")?;

    info!(
        "Entry Point: {:#x}, initial PC: {:#x}",
        program.entry_point, machine.cpu.pc
    );
    Ok((machine, metrics))
}

fn run_firmware(args: RunArgs) -> u8 {
    if args.max_steps > MAX_ALLOWED_STEPS {
        error!(
            "--max-steps {} exceeds the allowed maximum of {}",
            args.max_steps, MAX_ALLOWED_STEPS
        );
        return EXIT_CONFIG_ERROR;
    }

    let manifest = match load_manifest(args.system.as_deref()) {
        Ok(m) => m,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let Some(bus) = build_bus(&manifest) else {
        return EXIT_CONFIG_ERROR;
    };
    let (mut machine, metrics) = match build_machine(bus, &args.firmware) {
        Ok(v) => v,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_RUNTIME_ERROR;
        }
    };

    let sink = Arc::new(Mutex::new(Vec::new()));
    machine
        .bus
        .attach_uart_tx_sink(sink.clone(), manifest.uart.echo);

    info!("Running for at most {} steps...", args.max_steps);
    let outcome = machine.run(args.max_steps);

    info!(
        "Stopped: {:?} after {} steps, PC {:#x}",
        outcome.stop_reason, outcome.steps, outcome.pc
    );
    info!(
        "Instructions: {}, traps: {}, IPS: {:.0}",
        metrics.get_instructions(),
        metrics.get_traps(),
        metrics.get_ips()
    );
    if let Some(cell) = machine.bus.result_cell() {
        match cell.value() {
            Some(v) => info!("Result cell: {} ({} store(s))", v, cell.stores()),
            None => info!("Result cell: never written"),
        }
    }

    if let Some(path) = &args.snapshot {
        if let Err(e) = write_json(path, &machine.snapshot()) {
            error!("{:#}", e);
            return EXIT_RUNTIME_ERROR;
        }
        info!("Snapshot written to {:?}", path);
    }

    match outcome.stop_reason {
        StopReason::Halt | StopReason::MaxSteps => EXIT_PASS,
        StopReason::MemoryViolation | StopReason::DecodeError => EXIT_RUNTIME_ERROR,
    }
}

fn run_hosted(args: HostArgs) -> u8 {
    let manifest = match load_manifest(args.system.as_deref()) {
        Ok(m) => m,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_CONFIG_ERROR;
        }
    };
    let Some(mut bus) = build_bus(&manifest) else {
        return EXIT_CONFIG_ERROR;
    };

    let platform = hosted::platform_from_manifest(&manifest);
    let mut operands = hosted::operands_from_manifest(&manifest);
    if let Some(a) = args.a {
        operands.a = a;
    }
    if let Some(b) = args.b {
        operands.b = b;
    }
    info!("Hosted run: {} + {}", operands.a, operands.b);

    match hosted::run_report(&mut bus, &platform, operands) {
        Ok(sum) => {
            info!("Result cell: {}", sum);
            EXIT_PASS
        }
        Err(e) => {
            error!("Hosted run failed: {}", e);
            EXIT_RUNTIME_ERROR
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionResult {
    assertion: TestAssertion,
    passed: bool,
}

#[derive(Debug, Serialize)]
struct TestResult {
    status: String,
    steps_executed: u64,
    instructions: u64,
    traps: u64,
    stop_reason: StopReason,
    pc: u32,
    uart: String,
    result_cell: Option<u32>,
    result_cell_stores: u32,
    assertions: Vec<AssertionResult>,
    firmware_hash: String,
    config: TestConfig,
}

#[derive(Debug, Serialize)]
struct TestConfig {
    firmware: PathBuf,
    system: Option<PathBuf>,
    max_steps: u64,
}

/// Script inputs are resolved relative to the script's own directory.
fn resolve_script_path(script: &Path, input: &str) -> PathBuf {
    let input = Path::new(input);
    if input.is_absolute() {
        return input.to_path_buf();
    }
    script
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(input)
}

fn firmware_hash(path: &Path) -> anyhow::Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read firmware {:?}", path))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
}

fn check_assertion(
    assertion: &TestAssertion,
    uart: &str,
    result_cell: Option<u32>,
    stop_reason: StopReason,
) -> bool {
    match assertion {
        TestAssertion::UartContains(a) => uart.contains(&a.uart_contains),
        TestAssertion::UartEquals(a) => uart == a.uart_equals,
        TestAssertion::ResultCell(a) => result_cell == Some(a.result_cell),
        TestAssertion::ExpectedStopReason(a) => stop_reason == a.expected_stop_reason,
    }
}

fn run_test(args: TestArgs) -> u8 {
    let script = match TestScript::from_file(&args.script) {
        Ok(s) => s,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let max_steps = args.max_steps.unwrap_or(script.limits.max_steps);
    if max_steps == 0 || max_steps > MAX_ALLOWED_STEPS {
        error!(
            "max_steps {} must be between 1 and {}",
            max_steps, MAX_ALLOWED_STEPS
        );
        return EXIT_CONFIG_ERROR;
    }

    let firmware = resolve_script_path(&args.script, &script.inputs.firmware);
    let system = script
        .inputs
        .system
        .as_deref()
        .map(|s| resolve_script_path(&args.script, s));

    let manifest = match load_manifest(system.as_deref()) {
        Ok(m) => m,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let hash = match firmware_hash(&firmware) {
        Ok(h) => h,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let Some(bus) = build_bus(&manifest) else {
        return EXIT_CONFIG_ERROR;
    };
    let (mut machine, metrics) = match build_machine(bus, &firmware) {
        Ok(v) => v,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_RUNTIME_ERROR;
        }
    };

    let sink = Arc::new(Mutex::new(Vec::new()));
    let echo = manifest.uart.echo && !args.no_uart_stdout;
    machine.bus.attach_uart_tx_sink(sink.clone(), echo);

    let outcome = machine.run(max_steps);
    info!(
        "Stopped: {:?} after {} steps",
        outcome.stop_reason, outcome.steps
    );

    let uart_bytes = match sink.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    let uart = String::from_utf8_lossy(&uart_bytes).into_owned();
    let (result_cell, result_cell_stores) = machine
        .bus
        .result_cell()
        .map(|c| (c.value(), c.stores()))
        .unwrap_or((None, 0));

    let assertions: Vec<AssertionResult> = script
        .assertions
        .iter()
        .map(|a| {
            let passed = check_assertion(a, &uart, result_cell, outcome.stop_reason);
            if !passed {
                warn!("Assertion failed: {:?}", a);
            }
            AssertionResult {
                assertion: a.clone(),
                passed,
            }
        })
        .collect();
    let passed = assertions.iter().all(|a| a.passed);

    let result = TestResult {
        status: if passed { "pass" } else { "fail" }.to_string(),
        steps_executed: outcome.steps,
        instructions: metrics.get_instructions(),
        traps: metrics.get_traps(),
        stop_reason: outcome.stop_reason,
        pc: outcome.pc,
        uart,
        result_cell,
        result_cell_stores,
        assertions,
        firmware_hash: hash,
        config: TestConfig {
            firmware,
            system,
            max_steps,
        },
    };

    if let Some(dir) = &args.output_dir {
        let written = std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))
            .and_then(|_| write_json(&dir.join("result.json"), &result))
            .and_then(|_| {
                std::fs::write(dir.join("uart.log"), &uart_bytes)
                    .with_context(|| format!("Failed to write uart.log in {:?}", dir))
            });
        if let Err(e) = written {
            error!("{:#}", e);
            return EXIT_RUNTIME_ERROR;
        }
    }

    if passed {
        info!("Test passed");
        EXIT_PASS
    } else {
        error!("Test failed");
        EXIT_ASSERT_FAIL
    }
}
