//! Rotate-and-mask operations
//!
//! The 32-bit M-forms rotate the low word and mask with wrap semantics over
//! bit range [MB..ME]; the 64-bit MD/MDS forms use 6-bit shift and mask
//! boundaries. The insert variants merge under the mask, preserving the rest
//! of RA.

use crate::decoder::Instr;
use crate::exceptions::{Exception, ProgramCause};
use crate::interpreter::Interpreter;

/// 64-bit mask covering [mb..me] with wrap when mb > me; bit 0 is the MSB.
/// The 32-bit forms use the same mask shifted into the low word.
pub fn mask64(mb: u8, me: u8) -> u64 {
    let head = u64::MAX >> mb;
    let tail = !0u64 << (63 - me as u32);
    if mb <= me {
        head & tail
    } else {
        head | tail
    }
}

fn record(cpu: &mut Interpreter, value: u64) {
    cpu.state.update_cr0(value as i32 as i64);
}

/// M-form: rlwimi (20), rlwinm (21), rlmi (22), rlwnm (23)
pub fn execute_m(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    use crate::decoder::Format;
    if i.format != Format::M {
        return Err(Exception::Program(ProgramCause::InvalidFormat));
    }
    let source = cpu.state.gpr(i.rt) as u32;
    let shift = match i.op {
        // rlwnm takes the rotate count from RB
        23 => (cpu.state.gpr(i.rb) & 0x1F) as u32,
        _ => i.sh as u32 & 0x1F,
    };
    let rotated = source.rotate_left(shift);
    let mask = mask64(i.mb + 32, i.me + 32) as u32;

    let result = match i.op {
        // Insert forms preserve RA outside the mask
        20 | 22 => {
            let current = cpu.state.gpr(i.ra) as u32;
            (rotated & mask) | (current & !mask)
        }
        21 | 23 => rotated & mask,
        op => {
            return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                op,
                xo: i.xo,
            }))
        }
    };

    cpu.state.set_gpr(i.ra, result as u64);
    if i.rc {
        record(cpu, result as u64);
    }
    Ok(())
}

/// MD/MDS-form 64-bit rotates under primary 30
pub fn execute_md(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    use crate::decoder::Format;
    if i.format != Format::Md && i.format != Format::Mds {
        return Err(Exception::Program(ProgramCause::InvalidFormat));
    }

    let source = cpu.state.gpr(i.rt);
    let result = if i.format == Format::Md {
        let rotated = source.rotate_left(i.sh as u32);
        match i.xo {
            // rldicl: clear left, mask [mb..63]
            0 => rotated & mask64(i.mb, 63),
            // rldicr: clear right, mask [0..me]
            1 => rotated & mask64(0, i.me),
            // rldic: mask [mb..63-sh]
            2 => rotated & mask64(i.mb, 63 - i.sh),
            // rldimi: insert under mask [mb..63-sh]
            3 => {
                let mask = mask64(i.mb, 63 - i.sh);
                (rotated & mask) | (cpu.state.gpr(i.ra) & !mask)
            }
            xo => {
                return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                    op: 30,
                    xo,
                }))
            }
        }
    } else {
        let shift = (cpu.state.gpr(i.rb) & 0x3F) as u32;
        let rotated = source.rotate_left(shift);
        match i.xo {
            // rldcl
            0 => rotated & mask64(i.mb, 63),
            // rldcr
            1 => rotated & mask64(0, i.me),
            xo => {
                return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                    op: 30,
                    xo,
                }))
            }
        }
    };

    cpu.state.set_gpr(i.ra, result);
    if i.rc {
        cpu.state.update_cr0(result as i64);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use ox_core::config::CpuConfig;
    use ox_memory::{Bus, Ram};

    fn cpu() -> Interpreter {
        Interpreter::new(
            Bus::new(Ram::new(0x10000).unwrap()),
            &CpuConfig::default(),
        )
    }

    fn m_form(op: u32, rs: u32, ra: u32, sh: u32, mb: u32, me: u32) -> Instr {
        decode((op << 26) | (rs << 21) | (ra << 16) | (sh << 11) | (mb << 6) | (me << 1)).unwrap()
    }

    #[test]
    fn test_mask64_plain_and_wrapped() {
        assert_eq!(mask64(32, 63), 0xFFFF_FFFF);
        assert_eq!(mask64(0, 0), 0x8000_0000_0000_0000);
        assert_eq!(mask64(0, 63), u64::MAX);
        // Wrapped: complement of [33..62]
        assert_eq!(mask64(63, 32), !mask64(33, 62));
    }

    #[test]
    fn test_rlwinm_is_rotate_then_mask() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0x8000_0001);
        // rlwinm r4, r3, 1, 0, 31
        execute_m(&mut cpu, &m_form(21, 3, 4, 1, 0, 31)).unwrap();
        assert_eq!(cpu.state.gpr(4), 0x0000_0003);
        // rlwinm r4, r3, 0, 31, 31 extracts the low bit
        execute_m(&mut cpu, &m_form(21, 3, 4, 0, 31, 31)).unwrap();
        assert_eq!(cpu.state.gpr(4), 1);
    }

    #[test]
    fn test_rlwimi_preserves_outside_mask() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0x0000_00FF);
        cpu.state.set_gpr(4, 0xFFFF_0000);
        // rlwimi r4, r3, 8, 16, 23: insert byte into bits [16..23]
        execute_m(&mut cpu, &m_form(20, 3, 4, 8, 16, 23)).unwrap();
        assert_eq!(cpu.state.gpr(4), 0xFFFF_FF00);
    }

    #[test]
    fn test_rlwnm_uses_register_count() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 1);
        cpu.state.set_gpr(5, 34); // counts mod 32
        execute_m(&mut cpu, &m_form(23, 3, 4, 5, 0, 31)).unwrap();
        assert_eq!(cpu.state.gpr(4), 4);
    }

    #[test]
    fn test_rldicl_clears_left() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0xFFFF_FFFF_0000_0001);
        // rldicl r4, r3, 0, 32 keeps the low word; the 6-bit MB field is
        // encoded as mb[0:4] || mb[5]
        let mb_field = ((32 & 0x1F) << 1) | (32 >> 5);
        let raw = (30u32 << 26) | (3 << 21) | (4 << 16) | (mb_field << 5);
        let i = decode(raw).unwrap();
        execute_md(&mut cpu, &i).unwrap();
        assert_eq!(cpu.state.gpr(4), 1);
    }

    #[test]
    fn test_rotate_round_trip_property() {
        let mut cpu = cpu();
        // rlwinm(v, sh, mb, me) == rotl32(v, sh) & mask for straight ranges
        let v = 0x1234_5678u32;
        for &(sh, mb, me) in &[(0u32, 0u32, 31u32), (5, 4, 27), (31, 16, 31)] {
            cpu.state.set_gpr(3, v as u64);
            execute_m(&mut cpu, &m_form(21, 3, 4, sh, mb, me)).unwrap();
            let expected = v.rotate_left(sh) & (mask64(mb as u8 + 32, me as u8 + 32) as u32);
            assert_eq!(cpu.state.gpr(4), expected as u64);
        }
    }
}
