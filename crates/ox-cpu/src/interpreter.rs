//! Fetch-decode-execute loop
//!
//! The interpreter owns the architectural state and the memory subsystem as
//! sibling values and threads them explicitly into the instruction executors;
//! nothing holds a back-pointer. Executors return `Result<(), Exception>` and
//! delivery happens here, in exactly one place.

use crate::decoder::{self, Format, Instr};
use crate::exceptions::{Exception, ProgramCause, DSISR_PROTECTION};
use crate::instructions::{branch, float, integer, load_store, logical, paired, rotate, spe, system, vector};
use crate::mmu::{Access, Mmu};
use crate::state::{CpuState, Msr};
use ox_core::config::CpuConfig;
use ox_core::error::CpuError;
use ox_memory::{Bus, CacheController, WritePolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Why `run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Configured cycle budget exhausted
    MaxCycles,
    /// External stop flag observed between instructions
    Stopped,
    /// Unrecoverable: a Program exception occurred with interrupts already
    /// in flight; the diagnostic was logged
    Fatal,
}

pub struct Interpreter {
    pub state: CpuState,
    pub mmu: Mmu,
    pub cache: CacheController,
    pub bus: Bus,
    cycles: u64,
    max_cycles: u64,
    stop: Arc<AtomicBool>,
    fatal: Option<CpuError>,
}

impl Interpreter {
    pub fn new(bus: Bus, config: &CpuConfig) -> Self {
        let policy = if config.write_through {
            WritePolicy::WriteThrough
        } else {
            WritePolicy::WriteBack
        };
        Self {
            state: CpuState::new(),
            mmu: Mmu::new(),
            cache: CacheController::new(policy),
            bus,
            cycles: 0,
            max_cycles: config.max_cycles,
            stop: Arc::new(AtomicBool::new(false)),
            fatal: None,
        }
    }

    /// Clone of the stop flag for an embedder to request cancellation;
    /// checked between instructions only.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run until the cycle budget, an unrecoverable error, or until the stop
    /// flag is raised.
    pub fn run(&mut self) -> RunExit {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return RunExit::Stopped;
            }
            if self.cycles >= self.max_cycles {
                warn!("Emulation halted: max cycles reached");
                return RunExit::MaxCycles;
            }
            self.step();
            if let Some(err) = self.fatal.take() {
                error!("Emulation halted: {}", err);
                return RunExit::Fatal;
            }
        }
    }

    /// Execute exactly one instruction, including interrupt checks.
    pub fn step(&mut self) {
        self.tick();
        let pc = self.state.pc;

        match self.fetch() {
            Ok(word) => match decoder::decode(word) {
                Ok(instr) => {
                    if let Err(exception) = self.execute(&instr) {
                        self.log_exception(pc, word, exception);
                        if !self.deliver(exception) {
                            self.flag_fatal(pc, word, exception);
                        }
                    }
                }
                Err(unsupported) => {
                    warn!(
                        "Unsupported opcode at 0x{:08x}: word=0x{:08x} op={} xo={}",
                        pc, word, unsupported.op, unsupported.xo
                    );
                    let exception = Exception::Program(ProgramCause::UnsupportedOpcode {
                        op: unsupported.op,
                        xo: unsupported.xo,
                    });
                    if !self.deliver(exception) {
                        self.flag_fatal(pc, word, exception);
                    }
                }
            },
            Err(exception) => {
                self.deliver(exception);
            }
        }

        if self.state.pc == pc {
            self.state.pc = pc.wrapping_add(4);
        }

        self.check_interrupts();
        self.cycles += 1;
    }

    fn log_exception(&self, pc: u64, word: u32, exception: Exception) {
        match exception {
            Exception::Program(cause) => warn!(
                "Program exception at PC=0x{:08x} word=0x{:08x}: {:?}",
                pc, word, cause
            ),
            Exception::SystemCall => debug!("System call at PC=0x{:08x}", pc),
            _ => debug!(
                "{} exception at PC=0x{:08x} word=0x{:08x}",
                exception.name(),
                pc,
                word
            ),
        }
    }

    /// Advance the time base and the decrementer.
    fn tick(&mut self) {
        self.state.time_base = self.state.time_base.wrapping_add(1);
        if self.state.dec > 0 {
            self.state.dec -= 1;
            if self.state.dec == 0 {
                self.state.dec_pending = true;
            }
        }
    }

    /// Once per instruction: deliver a pending decrementer or external
    /// interrupt if MSR[EE] allows it.
    fn check_interrupts(&mut self) {
        if !self.state.msr.contains(Msr::EE) || self.state.interrupt_mode {
            return;
        }
        if self.state.dec_pending {
            self.state.dec_pending = false;
            self.deliver(Exception::Decrementer);
        } else if self.state.external_pending {
            self.state.external_pending = false;
            self.deliver(Exception::External);
        }
    }

    /// A Program exception that cannot be delivered (handler faulted) halts
    /// the run loop with a diagnostic.
    fn flag_fatal(&mut self, pc: u64, word: u32, exception: Exception) {
        if let Exception::Program(cause) = exception {
            self.fatal = Some(match cause {
                ProgramCause::UnsupportedOpcode { op, xo } => CpuError::UnsupportedOpcode {
                    addr: pc,
                    word,
                    op,
                    xo,
                },
                ProgramCause::InvalidFormat => CpuError::InvalidFormat {
                    addr: pc,
                    handler: "executor",
                },
                _ => return,
            });
        }
    }

    /// Apply exception side effects and jump to the vector. Nested delivery
    /// while already in interrupt mode is logged and dropped; returns whether
    /// the exception was actually delivered.
    pub fn deliver(&mut self, exception: Exception) -> bool {
        if self.state.interrupt_mode {
            warn!(
                "Nested {} exception at PC=0x{:08x} dropped",
                exception.name(),
                self.state.pc
            );
            return false;
        }

        match exception {
            Exception::Dsi { ea } | Exception::Alignment { ea } => {
                self.state.dar = ea;
                self.state.dsisr = DSISR_PROTECTION;
            }
            _ => {}
        }

        // sc saves the address of the next instruction; everything else
        // restarts at the faulting one
        self.state.srr0 = if exception == Exception::SystemCall {
            self.state.pc.wrapping_add(4)
        } else {
            self.state.pc
        };
        self.state.srr1 = self.state.msr.bits();
        self.state.msr.remove(Msr::EE | Msr::IR | Msr::DR);
        if exception == Exception::SystemCall {
            self.state.msr.remove(Msr::PR);
        }
        self.state.pc = exception.vector();
        self.state.interrupt_mode = true;
        true
    }

    /// Instruction fetch goes through translation but bypasses the cache.
    fn fetch(&mut self) -> Result<u32, Exception> {
        let pa = self.mmu.translate(
            self.state.msr,
            &self.state.sr,
            self.state.pc,
            Access::InstructionFetch,
        )?;
        Ok(self.bus.read_word(pa))
    }

    // ----- data-side memory helpers -----------------------------------

    #[inline]
    pub(crate) fn check_alignment(ea: u64, bytes: u64) -> Result<(), Exception> {
        if ea & (bytes - 1) != 0 {
            Err(Exception::Alignment { ea })
        } else {
            Ok(())
        }
    }

    fn translate_data(&self, ea: u64, write: bool) -> Result<u64, Exception> {
        let access = if write {
            Access::DataWrite
        } else {
            Access::DataRead
        };
        self.mmu.translate(self.state.msr, &self.state.sr, ea, access)
    }

    #[inline]
    fn cacheable(&self, pa: u64) -> bool {
        pa < self.bus.memory_size() && !self.bus.is_mmio(pa)
    }

    /// A store through the cache to the reserved 64-byte line kills the
    /// reservation.
    fn clobber_reservation(&mut self, pa: u64) {
        if let Some(reserved) = self.state.reservation {
            if reserved & !0x3F == pa & !0x3F {
                self.state.reservation = None;
            }
        }
    }

    pub(crate) fn read_data8(&mut self, ea: u64) -> Result<u8, Exception> {
        let pa = self.translate_data(ea, false)?;
        if self.cacheable(pa) {
            let word = self.cache.read_word(&mut self.bus, pa & !3);
            Ok((word >> (24 - 8 * (pa & 3))) as u8)
        } else {
            Ok(self.bus.read8(pa))
        }
    }

    pub(crate) fn write_data8(&mut self, ea: u64, value: u8) -> Result<(), Exception> {
        let pa = self.translate_data(ea, true)?;
        self.clobber_reservation(pa);
        if self.cacheable(pa) {
            let shift = 24 - 8 * (pa & 3) as u32;
            let word = self.cache.read_word(&mut self.bus, pa & !3);
            let word = (word & !(0xFF << shift)) | ((value as u32) << shift);
            self.cache.write_word(&mut self.bus, pa & !3, word);
        } else {
            self.bus.write8(pa, value);
        }
        Ok(())
    }

    pub(crate) fn read_data16(&mut self, ea: u64) -> Result<u16, Exception> {
        Self::check_alignment(ea, 2)?;
        let pa = self.translate_data(ea, false)?;
        if self.cacheable(pa) {
            let word = self.cache.read_word(&mut self.bus, pa & !3);
            Ok((word >> (16 - 8 * (pa & 2))) as u16)
        } else {
            Ok(((self.bus.read8(pa) as u16) << 8) | self.bus.read8(pa + 1) as u16)
        }
    }

    pub(crate) fn write_data16(&mut self, ea: u64, value: u16) -> Result<(), Exception> {
        Self::check_alignment(ea, 2)?;
        let pa = self.translate_data(ea, true)?;
        self.clobber_reservation(pa);
        if self.cacheable(pa) {
            let shift = 16 - 8 * (pa & 2) as u32;
            let word = self.cache.read_word(&mut self.bus, pa & !3);
            let word = (word & !(0xFFFF << shift)) | ((value as u32) << shift);
            self.cache.write_word(&mut self.bus, pa & !3, word);
        } else {
            self.bus.write8(pa, (value >> 8) as u8);
            self.bus.write8(pa + 1, value as u8);
        }
        Ok(())
    }

    pub(crate) fn read_data32(&mut self, ea: u64) -> Result<u32, Exception> {
        Self::check_alignment(ea, 4)?;
        let pa = self.translate_data(ea, false)?;
        Ok(self.cache.read_word(&mut self.bus, pa))
    }

    pub(crate) fn write_data32(&mut self, ea: u64, value: u32) -> Result<(), Exception> {
        Self::check_alignment(ea, 4)?;
        let pa = self.translate_data(ea, true)?;
        self.clobber_reservation(pa);
        self.cache.write_word(&mut self.bus, pa, value);
        Ok(())
    }

    pub(crate) fn read_data64(&mut self, ea: u64) -> Result<u64, Exception> {
        Self::check_alignment(ea, 8)?;
        let hi = self.read_data32(ea)? as u64;
        let lo = self.read_data32(ea + 4)? as u64;
        Ok((hi << 32) | lo)
    }

    pub(crate) fn write_data64(&mut self, ea: u64, value: u64) -> Result<(), Exception> {
        Self::check_alignment(ea, 8)?;
        self.write_data32(ea, (value >> 32) as u32)?;
        self.write_data32(ea + 4, value as u32)
    }

    /// Physical address for the reservation bookkeeping of lwarx/stwcx.
    pub(crate) fn reservation_address(&self, ea: u64, write: bool) -> Result<u64, Exception> {
        self.translate_data(ea, write)
    }

    // ----- dispatch ----------------------------------------------------

    fn execute(&mut self, i: &Instr) -> Result<(), Exception> {
        match i.op {
            // tdi / twi
            2 => branch::tdi(self, i),
            3 => branch::twi(self, i),

            // SPE vs paired-single split on the 11-bit opcode field
            4 => {
                if spe::is_spe_opcode((i.raw & 0x7FF) as u16) {
                    spe::execute(self, i)
                } else {
                    paired::execute(self, i)
                }
            }

            5 | 6 => vector::execute(self, i),

            7 | 8 | 12 | 13 | 14 | 15 => integer::execute_d(self, i),
            10 => branch::cmpli(self, i),
            11 => branch::cmpi(self, i),

            // icbt: instruction cache block touch, a hint
            9 => Ok(()),

            16 => branch::bc(self, i),
            17 => branch::sc(self, i),
            18 => branch::b(self, i),
            19 => branch::execute_xl(self, i),

            20..=23 => rotate::execute_m(self, i),
            24..=29 => logical::execute_imm(self, i),
            30 => rotate::execute_md(self, i),

            31 => self.execute_31(i),

            32..=47 => load_store::execute_d(self, i),
            48..=56 | 60 => float::execute_d(self, i),
            57 | 61 => float::execute_pair_indexed(self, i),
            58 => load_store::execute_ds_load(self, i),
            59 => float::execute_single(self, i),
            62 => {
                if i.format == Format::X {
                    vector::execute(self, i)
                } else {
                    load_store::execute_ds_store(self, i)
                }
            }
            63 => float::execute_double(self, i),

            op => Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                op,
                xo: i.xo,
            })),
        }
    }

    /// Primary 31 splits across every unit
    fn execute_31(&mut self, i: &Instr) -> Result<(), Exception> {
        match i.format {
            Format::Xo => return integer::execute_xo(self, i),
            Format::Xfx => return system::execute_xfx(self, i),
            Format::A => return system::isel(self, i),
            _ => {}
        }
        match i.xo {
            0 => branch::cmp(self, i),
            32 => branch::cmpl(self, i),
            4 => branch::tw(self, i),

            // Register-register logical and shifts
            24 | 26 | 27 | 28 | 58 | 60 | 124 | 284 | 316 | 412 | 444 | 476 | 536 | 539 | 792
            | 794 | 824 | 922 | 954 | 986 => logical::execute_x(self, i),

            // Loads, stores, reservations, strings, cache ops, fences
            20 | 21 | 23 | 54 | 55 | 84 | 86 | 87 | 119 | 149 | 150 | 151 | 183 | 214 | 215
            | 246 | 247 | 278 | 279 | 310 | 311 | 341 | 343 | 375 | 407 | 438 | 439 | 533
            | 534 | 597 | 598 | 661 | 662 | 725 | 790 | 854 | 918 | 982 | 1014 => {
                load_store::execute_x(self, i)
            }

            // FP indexed loads/stores live under 31 as well
            535 | 567 | 599 | 631 | 663 | 695 | 727 | 759 => float::execute_indexed(self, i),

            // System: CR/MSR/SR moves, TLB maintenance
            19 | 83 | 146 | 210 | 242 | 306 | 370 | 498 | 566 | 595 => {
                system::execute_x(self, i)
            }

            xo => Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                op: 31,
                xo,
            })),
        }
    }
}
