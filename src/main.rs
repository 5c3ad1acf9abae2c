//! Oxidized-Xenon - PowerPC (Xenon) emulator
//!
//! Command-line entry point: wires memory, bus, devices and CPU, loads an
//! ELF or raw image and interprets it.

use ox_core::config::Config;
use ox_cpu::{Interpreter, RunExit};
use ox_memory::{Bus, Console, FrameBuffer, Ram};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

const CONSOLE_BASE: u64 = 0x0FFF_0000;
const CONSOLE_END: u64 = 0x0FFF_000F;
const FRAMEBUFFER_BASE: u64 = 0x1000_0000;
const FRAMEBUFFER_END: u64 = 0x1025_7FFF;
const FRAMEBUFFER_CTRL_BASE: u64 = 0xC800_0000;
const FRAMEBUFFER_CTRL_END: u64 = 0xC800_1FFF;

struct Args {
    image: String,
    raw: bool,
    max_cycles: Option<u64>,
}

fn parse_args() -> Option<Args> {
    let mut image = None;
    let mut raw = false;
    let mut max_cycles = None;
    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--raw" => raw = true,
            "--max-cycles" => {
                max_cycles = Some(argv.next()?.parse().ok()?);
            }
            _ => image = Some(arg),
        }
    }
    Some(Args {
        image: image?,
        raw,
        max_cycles,
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let Some(args) = parse_args() else {
        eprintln!("usage: oxidized-xenon [--raw] [--max-cycles N] <image>");
        return ExitCode::FAILURE;
    };

    let mut config = Config::default();
    if let Some(max) = args.max_cycles {
        config.cpu.max_cycles = max;
    }

    let ram = match Ram::new(config.memory.size) {
        Ok(ram) => ram,
        Err(e) => {
            error!("Failed to allocate memory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let console = Arc::new(Console::new());
    let framebuffer = Arc::new(FrameBuffer::new(config.video.width, config.video.height));

    let mut bus = Bus::new(ram);
    bus.attach_device(console.clone(), CONSOLE_BASE, CONSOLE_END);
    bus.attach_device(framebuffer.clone(), FRAMEBUFFER_BASE, FRAMEBUFFER_END);
    bus.attach_device(framebuffer, FRAMEBUFFER_CTRL_BASE, FRAMEBUFFER_CTRL_END);

    let data = match std::fs::read(&args.image) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to read {}: {}", args.image, e);
            return ExitCode::FAILURE;
        }
    };

    let entry = if args.raw {
        match ox_loader::load_raw(bus.ram_mut(), &data) {
            Ok(entry) => entry,
            Err(e) => {
                error!("Failed to load raw image: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        match ox_loader::load_elf(bus.ram_mut(), &data) {
            Ok(image) => {
                for symbol in image.symbols.iter().take(16) {
                    info!("symbol {} = 0x{:08x}", symbol.name, symbol.value);
                }
                image.entry
            }
            Err(e) => {
                error!("Failed to load ELF: {}", e);
                return ExitCode::FAILURE;
            }
        }
    };

    let mut cpu = Interpreter::new(bus, &config.cpu);
    cpu.state.pc = entry;

    info!("Starting execution at 0x{:08x}", entry);
    let exit = cpu.run();

    let output = console.take_output();
    if !output.is_empty() {
        info!("Console output:\n{}", output);
    }
    info!(
        "Execution finished ({:?}) after {} cycles, PC=0x{:08x}",
        exit,
        cpu.cycles(),
        cpu.state.pc
    );
    for reg in (0..32u8).step_by(4) {
        info!(
            "r{:<2}=0x{:016x} r{:<2}=0x{:016x} r{:<2}=0x{:016x} r{:<2}=0x{:016x}",
            reg,
            cpu.state.gpr(reg),
            reg + 1,
            cpu.state.gpr(reg + 1),
            reg + 2,
            cpu.state.gpr(reg + 2),
            reg + 3,
            cpu.state.gpr(reg + 3)
        );
    }

    match exit {
        RunExit::MaxCycles | RunExit::Stopped => ExitCode::SUCCESS,
        RunExit::Fatal => ExitCode::FAILURE,
    }
}
