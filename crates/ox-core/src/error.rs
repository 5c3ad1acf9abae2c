//! Error types for the oxidized-xenon emulator

use thiserror::Error;

/// Main error type for the emulator
#[derive(Error, Debug)]
pub enum EmuError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("CPU error: {0}")]
    Cpu(#[from] CpuError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

/// Memory-related errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Block write out of bounds: address 0x{addr:08x}, length {len}")]
    OutOfBounds { addr: u64, len: usize },

    #[error("Memory size 0x{0:x} is not a power of two")]
    InvalidSize(u64),
}

/// CPU-related errors surfaced to the embedder
#[derive(Error, Debug)]
pub enum CpuError {
    #[error("Unsupported opcode at 0x{addr:08x}: op={op} xo={xo} (word 0x{word:08x})")]
    UnsupportedOpcode { addr: u64, word: u32, op: u8, xo: u16 },

    #[error("Executor for {handler} received wrong format at 0x{addr:08x}")]
    InvalidFormat { addr: u64, handler: &'static str },
}

/// Loader errors
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Invalid ELF: {0}")]
    InvalidElf(String),

    #[error("Segment out of memory bounds: paddr=0x{paddr:08x}, size=0x{size:x}")]
    SegmentOutOfBounds { paddr: u64, size: u64 },

    #[error("Segment misaligned: paddr=0x{paddr:08x}, align=0x{align:x}")]
    Misaligned { paddr: u64, align: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MemoryError::OutOfBounds {
            addr: 0x1234_5678,
            len: 16,
        };
        assert_eq!(
            format!("{}", err),
            "Block write out of bounds: address 0x12345678, length 16"
        );
    }

    #[test]
    fn test_error_conversion() {
        let mem_err = MemoryError::InvalidSize(3);
        let emu_err: EmuError = mem_err.into();
        assert!(matches!(emu_err, EmuError::Memory(_)));
    }
}
