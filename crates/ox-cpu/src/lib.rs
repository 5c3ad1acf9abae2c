//! PowerPC (Xenon-class) CPU emulation
//!
//! Implements the fetch-decode-execute interpreter with precise architectural
//! state, the instruction decoder, the BAT/TLB MMU, and the exception model.
//! The instruction set covers the 32/64-bit integer base, rotates, branches,
//! floating point, AltiVec-style vectors, SPE integer SIMD and the
//! paired-single graphics operations.

pub mod decoder;
pub mod exceptions;
pub mod instructions;
pub mod interpreter;
pub mod mmu;
pub mod state;

pub use decoder::{decode, Format, Instr};
pub use exceptions::{Exception, ProgramCause};
pub use interpreter::{Interpreter, RunExit};
pub use mmu::{Access, Mmu};
pub use state::{CpuState, Fpscr, Msr};
