//! ELF parser and segment loader
//!
//! Accepts 32- and 64-bit images in either byte order, machine PPC or PPC64.
//! PT_LOAD segments are copied to their physical address (masked into the
//! backing range) and zero-filled out to their memory size; `.symtab` and
//! `.strtab` feed the symbol list used for disassembly labels.

use ox_core::error::LoaderError;
use ox_memory::Ram;
use tracing::{debug, info};

pub const EM_PPC: u16 = 20;
pub const EM_PPC64: u16 = 21;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

/// Program header types
mod pt {
    pub const LOAD: u32 = 1;
}

/// Section header types
mod sht {
    pub const SYMTAB: u32 = 2;
    pub const STRTAB: u32 = 3;
}

/// Parsed symbol
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub value: u64,
    pub size: u64,
}

/// Result of loading an ELF image
#[derive(Debug)]
pub struct ElfImage {
    /// Entry point already masked into the backing range
    pub entry: u64,
    pub machine: u16,
    pub is_64bit: bool,
    pub big_endian: bool,
    pub symbols: Vec<Symbol>,
}

struct Reader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> Reader<'a> {
    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], LoaderError> {
        self.data
            .get(offset..offset + len)
            .ok_or_else(|| LoaderError::InvalidElf(format!("truncated at offset 0x{:x}", offset)))
    }

    fn u16_at(&self, offset: usize) -> Result<u16, LoaderError> {
        let b = self.bytes(offset, 2)?;
        Ok(if self.big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    }

    fn u32_at(&self, offset: usize) -> Result<u32, LoaderError> {
        let b = self.bytes(offset, 4)?;
        Ok(if self.big_endian {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })
    }

    fn u64_at(&self, offset: usize) -> Result<u64, LoaderError> {
        let b = self.bytes(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(if self.big_endian {
            u64::from_be_bytes(raw)
        } else {
            u64::from_le_bytes(raw)
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    file_offset: u64,
    paddr: u64,
    file_size: u64,
    mem_size: u64,
    align: u64,
}

#[derive(Debug, Clone, Copy)]
struct Section {
    sh_type: u32,
    offset: u64,
    size: u64,
    link: u32,
    entsize: u64,
}

/// Parse an ELF image and place its PT_LOAD segments into memory
pub fn load_elf(ram: &mut Ram, data: &[u8]) -> Result<ElfImage, LoaderError> {
    if data.len() < 52 || data[0..4] != ELF_MAGIC {
        return Err(LoaderError::InvalidElf("bad magic".into()));
    }
    let is_64bit = match data[4] {
        ELFCLASS32 => false,
        ELFCLASS64 => true,
        class => return Err(LoaderError::InvalidElf(format!("bad class {}", class))),
    };
    let big_endian = match data[5] {
        ELFDATA2LSB => false,
        ELFDATA2MSB => true,
        enc => return Err(LoaderError::InvalidElf(format!("bad encoding {}", enc))),
    };
    if data[6] != 1 {
        return Err(LoaderError::InvalidElf("unsupported ELF version".into()));
    }

    let r = Reader { data, big_endian };
    let machine = r.u16_at(18)?;
    if machine != EM_PPC && machine != EM_PPC64 {
        return Err(LoaderError::InvalidElf(format!(
            "unsupported machine {}",
            machine
        )));
    }
    if (machine == EM_PPC64) != is_64bit {
        return Err(LoaderError::InvalidElf("class/machine mismatch".into()));
    }

    let entry = if is_64bit {
        r.u64_at(24)?
    } else {
        r.u32_at(24)? as u64
    };

    let segments = parse_segments(&r, is_64bit)?;
    for segment in &segments {
        place_segment(ram, data, segment)?;
    }

    let symbols = parse_symbols(&r, is_64bit).unwrap_or_default();

    let entry = entry & (ram.size() - 1);
    info!(
        "ELF loaded: machine={} entry=0x{:08x} segments={} symbols={}",
        machine,
        entry,
        segments.len(),
        symbols.len()
    );

    Ok(ElfImage {
        entry,
        machine,
        is_64bit,
        big_endian,
        symbols,
    })
}

fn parse_segments(r: &Reader<'_>, is_64bit: bool) -> Result<Vec<Segment>, LoaderError> {
    let (phoff, phentsize, phnum) = if is_64bit {
        (r.u64_at(32)? as usize, r.u16_at(54)? as usize, r.u16_at(56)? as usize)
    } else {
        (r.u32_at(28)? as usize, r.u16_at(42)? as usize, r.u16_at(44)? as usize)
    };

    let mut segments = Vec::new();
    for n in 0..phnum {
        let base = phoff + n * phentsize;
        let p_type = r.u32_at(base)?;
        if p_type != pt::LOAD {
            debug!("Skipping non-loadable segment type 0x{:x}", p_type);
            continue;
        }
        let segment = if is_64bit {
            Segment {
                file_offset: r.u64_at(base + 8)?,
                paddr: r.u64_at(base + 24)?,
                file_size: r.u64_at(base + 32)?,
                mem_size: r.u64_at(base + 40)?,
                align: r.u64_at(base + 48)?,
            }
        } else {
            Segment {
                file_offset: r.u32_at(base + 4)? as u64,
                paddr: r.u32_at(base + 12)? as u64,
                file_size: r.u32_at(base + 16)? as u64,
                mem_size: r.u32_at(base + 20)? as u64,
                align: r.u32_at(base + 28)? as u64,
            }
        };
        segments.push(segment);
    }
    Ok(segments)
}

fn place_segment(ram: &mut Ram, data: &[u8], segment: &Segment) -> Result<(), LoaderError> {
    if segment.file_size == 0 && segment.mem_size == 0 {
        return Ok(());
    }
    if segment.align > 1 && segment.paddr % segment.align != segment.file_offset % segment.align {
        return Err(LoaderError::Misaligned {
            paddr: segment.paddr,
            align: segment.align,
        });
    }
    let start = segment.file_offset as usize;
    let end = start
        .checked_add(segment.file_size as usize)
        .filter(|&e| e <= data.len())
        .ok_or_else(|| LoaderError::InvalidElf("segment outside file".into()))?;

    let paddr = segment.paddr & (ram.size() - 1);
    if paddr + segment.mem_size > ram.size() {
        return Err(LoaderError::SegmentOutOfBounds {
            paddr: segment.paddr,
            size: segment.mem_size,
        });
    }

    debug!(
        "Placing segment: paddr=0x{:08x} filesz=0x{:x} memsz=0x{:x}",
        paddr, segment.file_size, segment.mem_size
    );
    ram.write_block(paddr, &data[start..end])
        .map_err(|_| LoaderError::SegmentOutOfBounds {
            paddr: segment.paddr,
            size: segment.mem_size,
        })?;
    // Zero-fill the BSS tail
    if segment.mem_size > segment.file_size {
        let zeros = vec![0u8; (segment.mem_size - segment.file_size) as usize];
        ram.write_block(paddr + segment.file_size, &zeros)
            .map_err(|_| LoaderError::SegmentOutOfBounds {
                paddr: segment.paddr,
                size: segment.mem_size,
            })?;
    }
    Ok(())
}

fn parse_symbols(r: &Reader<'_>, is_64bit: bool) -> Result<Vec<Symbol>, LoaderError> {
    let (shoff, shentsize, shnum) = if is_64bit {
        (r.u64_at(40)? as usize, r.u16_at(58)? as usize, r.u16_at(60)? as usize)
    } else {
        (r.u32_at(32)? as usize, r.u16_at(46)? as usize, r.u16_at(48)? as usize)
    };

    let mut sections = Vec::with_capacity(shnum);
    for n in 0..shnum {
        let base = shoff + n * shentsize;
        let section = if is_64bit {
            Section {
                sh_type: r.u32_at(base + 4)?,
                offset: r.u64_at(base + 24)?,
                size: r.u64_at(base + 32)?,
                link: r.u32_at(base + 40)?,
                entsize: r.u64_at(base + 56)?,
            }
        } else {
            Section {
                sh_type: r.u32_at(base + 4)?,
                offset: r.u32_at(base + 16)? as u64,
                size: r.u32_at(base + 20)? as u64,
                link: r.u32_at(base + 24)?,
                entsize: r.u32_at(base + 36)? as u64,
            }
        };
        sections.push(section);
    }

    let mut symbols = Vec::new();
    for section in sections.iter().filter(|s| s.sh_type == sht::SYMTAB) {
        let strtab = sections
            .get(section.link as usize)
            .filter(|s| s.sh_type == sht::STRTAB);
        let entsize = if section.entsize != 0 {
            section.entsize as usize
        } else if is_64bit {
            24
        } else {
            16
        };
        let count = (section.size as usize) / entsize;
        for n in 0..count {
            let base = section.offset as usize + n * entsize;
            let (name_off, value, size) = if is_64bit {
                (
                    r.u32_at(base)? as usize,
                    r.u64_at(base + 8)?,
                    r.u64_at(base + 16)?,
                )
            } else {
                (
                    r.u32_at(base)? as usize,
                    r.u32_at(base + 4)? as u64,
                    r.u32_at(base + 8)? as u64,
                )
            };
            let name = strtab
                .and_then(|s| read_string(r.data, s.offset as usize + name_off))
                .unwrap_or_default();
            if !name.is_empty() {
                symbols.push(Symbol { name, value, size });
            }
        }
    }
    Ok(symbols)
}

fn read_string(data: &[u8], offset: usize) -> Option<String> {
    let tail = data.get(offset..)?;
    let end = tail.iter().position(|&b| b == 0)?;
    String::from_utf8(tail[..end].to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal 32-bit big-endian PPC ELF with one PT_LOAD segment
    fn build_elf(paddr: u32, payload: &[u8], memsz: u32, entry: u32) -> Vec<u8> {
        let mut image = vec![0u8; 0x54];
        image[0..4].copy_from_slice(&ELF_MAGIC);
        image[4] = ELFCLASS32;
        image[5] = ELFDATA2MSB;
        image[6] = 1;
        image[18..20].copy_from_slice(&EM_PPC.to_be_bytes());
        image[24..28].copy_from_slice(&entry.to_be_bytes());
        image[28..32].copy_from_slice(&52u32.to_be_bytes()); // phoff
        image[42..44].copy_from_slice(&32u16.to_be_bytes()); // phentsize
        image[44..46].copy_from_slice(&1u16.to_be_bytes()); // phnum

        let file_offset = 0x54u32;
        let ph = &mut image[52..];
        ph[0..4].copy_from_slice(&pt::LOAD.to_be_bytes());
        ph[4..8].copy_from_slice(&file_offset.to_be_bytes());
        ph[12..16].copy_from_slice(&paddr.to_be_bytes());
        ph[16..20].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        ph[20..24].copy_from_slice(&memsz.to_be_bytes());
        ph[28..32].copy_from_slice(&1u32.to_be_bytes()); // align

        image.extend_from_slice(payload);
        image
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut ram = Ram::new(0x1000).unwrap();
        assert!(matches!(
            load_elf(&mut ram, &[0u8; 64]),
            Err(LoaderError::InvalidElf(_))
        ));
    }

    #[test]
    fn test_rejects_wrong_machine() {
        let mut ram = Ram::new(0x1000).unwrap();
        let mut image = build_elf(0, &[1, 2, 3, 4], 4, 0);
        image[18..20].copy_from_slice(&3u16.to_be_bytes()); // EM_386
        assert!(load_elf(&mut ram, &image).is_err());
    }

    #[test]
    fn test_places_segment_and_zero_fills() {
        let mut ram = Ram::new(0x1000).unwrap();
        ram.fill(0xFF);
        let image = build_elf(0x200, &[0xAA, 0xBB], 8, 0x200);
        let loaded = load_elf(&mut ram, &image).unwrap();
        assert_eq!(loaded.entry, 0x200);
        assert_eq!(ram.read8(0x200), 0xAA);
        assert_eq!(ram.read8(0x201), 0xBB);
        // Zero-filled out to mem_size, untouched beyond
        for addr in 0x202..0x208 {
            assert_eq!(ram.read8(addr), 0);
        }
        assert_eq!(ram.read8(0x208), 0xFF);
    }

    #[test]
    fn test_entry_masked_into_memory() {
        let mut ram = Ram::new(0x1000).unwrap();
        let image = build_elf(0x100, &[0; 4], 4, 0x8000_0100u32 as u32);
        let loaded = load_elf(&mut ram, &image).unwrap();
        assert_eq!(loaded.entry, 0x100);
    }

    #[test]
    fn test_segment_too_large_fails() {
        let mut ram = Ram::new(0x100).unwrap();
        let image = build_elf(0x80, &[0; 4], 0x200, 0);
        assert!(matches!(
            load_elf(&mut ram, &image),
            Err(LoaderError::SegmentOutOfBounds { .. })
        ));
    }
}
