//! Program image loading
//!
//! Places ELF PT_LOAD segments (or a raw binary) into physical memory and
//! reports the initial program counter. The ELF path also harvests the
//! symbol table for diagnostics.

pub mod elf;

pub use elf::{load_elf, ElfImage, Symbol, EM_PPC, EM_PPC64};

use ox_core::error::LoaderError;
use ox_memory::Ram;

/// Load a raw binary at physical address 0; execution starts at 0.
pub fn load_raw(ram: &mut Ram, data: &[u8]) -> Result<u64, LoaderError> {
    ram.write_block(0, data)
        .map_err(|_| LoaderError::SegmentOutOfBounds {
            paddr: 0,
            size: data.len() as u64,
        })?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_raw() {
        let mut ram = Ram::new(0x1000).unwrap();
        let entry = load_raw(&mut ram, &[0x48, 0x00, 0x00, 0x08]).unwrap();
        assert_eq!(entry, 0);
        assert_eq!(ram.read_word(0), 0x4800_0008);
    }
}
