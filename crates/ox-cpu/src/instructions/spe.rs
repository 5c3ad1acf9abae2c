//! SPE integer SIMD
//!
//! Operates on the 64-bit view of a GPR as two 32-bit lanes (lane 0 in the
//! upper half) or four 16-bit lanes. The fractional multiplies shift their
//! products right by 15 (halfword) or 31 (word); the accumulator variants add
//! lane results into ACC. Compares write two bits per lane into CR6 and evsel
//! reads them back.

use crate::decoder::Instr;
use crate::exceptions::{Exception, ProgramCause};
use crate::interpreter::Interpreter;

/// Every SPE opcode in the 11-bit opcode field of primary 4
const SPE_OPCODES: [u16; 35] = [
    512, // evaddw
    513, // evsubfw
    516, // evmra
    519, // evmhessf
    520, // evmheumi
    523, // evmhessfs
    527, // evmhogsmfaa
    528, // evslw
    529, // evand
    530, // evsrw
    531, // evsrwu
    534, // evxor
    535, // evor
    536, // evnand
    537, // eveqv
    538, // evnor
    543, // evmwsmfaa
    544, // evcmpgts
    545, // evcmplts
    546, // evcmpeq
    552, // evslwi
    556, // evmergehi
    557, // evmergelo
    560, // evsel
    562, // evsrwi
    563, // evsraw
    567, // evmwhssf
    568, // evmwlumi
    569, // evmwhumi
    769, // evldd
    770, // evldw
    772, // evlhh
    801, // evstdd
    802, // evstdw
    804, // evsth
];

pub fn is_spe_opcode(xo11: u16) -> bool {
    SPE_OPCODES.contains(&xo11)
}

#[inline]
fn unpack_words(value: u64) -> [u32; 2] {
    [(value >> 32) as u32, value as u32]
}

#[inline]
fn pack_words(lanes: [u32; 2]) -> u64 {
    ((lanes[0] as u64) << 32) | lanes[1] as u64
}

#[inline]
fn unpack_halfwords(value: u64) -> [u16; 4] {
    [
        (value >> 48) as u16,
        (value >> 32) as u16,
        (value >> 16) as u16,
        value as u16,
    ]
}

fn map_words(a: u64, b: u64, f: impl Fn(u32, u32) -> u32) -> u64 {
    let a = unpack_words(a);
    let b = unpack_words(b);
    pack_words([f(a[0], b[0]), f(a[1], b[1])])
}

pub fn execute(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let ra = cpu.state.gpr(i.ra);
    let rb = cpu.state.gpr(i.rb);

    match i.xo {
        // evaddw: lane adds with overflow folded into XER
        512 => {
            let a = unpack_words(ra);
            let b = unpack_words(rb);
            let mut overflow = false;
            let mut out = [0u32; 2];
            for lane in 0..2 {
                let (sum, ov) = (a[lane] as i32).overflowing_add(b[lane] as i32);
                out[lane] = sum as u32;
                overflow |= ov;
            }
            cpu.state.set_gpr(i.rt, pack_words(out));
            cpu.state.set_ov(overflow);
        }
        // evsubfw
        513 => {
            let a = unpack_words(ra);
            let b = unpack_words(rb);
            let mut overflow = false;
            let mut out = [0u32; 2];
            for lane in 0..2 {
                let (diff, ov) = (a[lane] as i32).overflowing_sub(b[lane] as i32);
                out[lane] = diff as u32;
                overflow |= ov;
            }
            cpu.state.set_gpr(i.rt, pack_words(out));
            cpu.state.set_ov(overflow);
        }
        // evmra: per-lane square-high, accumulated
        516 => {
            let a = unpack_words(ra);
            let acc = unpack_words(cpu.state.acc);
            let mut out = [0u32; 2];
            let mut new_acc = [0u32; 2];
            for lane in 0..2 {
                let product = (a[lane] as i32 as i64) * (a[lane] as i32 as i64);
                out[lane] = (product >> 32) as u32;
                new_acc[lane] = acc[lane].wrapping_add(out[lane]);
            }
            cpu.state.set_gpr(i.rt, pack_words(out));
            cpu.state.acc = pack_words(new_acc);
        }
        // evmhessf: even halfwords, signed fractional
        519 => {
            let a = unpack_halfwords(ra);
            let b = unpack_halfwords(rb);
            let mut out = [0u32; 2];
            for lane in 0..2 {
                let product = (a[lane * 2] as i16 as i32) * (b[lane * 2] as i16 as i32);
                out[lane] = (product >> 15) as u32;
            }
            cpu.state.set_gpr(i.rt, pack_words(out));
        }
        // evmheumi: even halfwords, unsigned modulo
        520 => {
            let a = unpack_halfwords(ra);
            let b = unpack_halfwords(rb);
            let mut out = [0u32; 2];
            for lane in 0..2 {
                out[lane] = (a[lane * 2] as u32).wrapping_mul(b[lane * 2] as u32);
            }
            cpu.state.set_gpr(i.rt, pack_words(out));
        }
        // evmhessfs: fractional with saturation
        523 => {
            let a = unpack_halfwords(ra);
            let b = unpack_halfwords(rb);
            let mut out = [0u32; 2];
            for lane in 0..2 {
                let product = (a[lane * 2] as i16 as i64) * (b[lane * 2] as i16 as i64);
                let shifted = product >> 15;
                out[lane] = shifted.clamp(i32::MIN as i64, i32::MAX as i64) as i32 as u32;
            }
            cpu.state.set_gpr(i.rt, pack_words(out));
        }
        // evmhogsmfaa: odd halfwords, fractional, accumulate
        527 => {
            let a = unpack_halfwords(ra);
            let b = unpack_halfwords(rb);
            let acc = unpack_words(cpu.state.acc);
            let mut out = [0u32; 2];
            let mut new_acc = [0u32; 2];
            for lane in 0..2 {
                let product = (a[lane * 2 + 1] as i16 as i32) * (b[lane * 2 + 1] as i16 as i32);
                out[lane] = (product >> 15) as u32;
                new_acc[lane] = acc[lane].wrapping_add(out[lane]);
            }
            cpu.state.set_gpr(i.rt, pack_words(out));
            cpu.state.acc = pack_words(new_acc);
        }
        // evslw
        528 => {
            let out = map_words(ra, rb, |a, b| a.wrapping_shl(b & 0x1F));
            cpu.state.set_gpr(i.rt, out);
        }
        // evand / evxor / evor / evnand / eveqv / evnor
        529 => cpu.state.set_gpr(i.rt, ra & rb),
        534 => cpu.state.set_gpr(i.rt, ra ^ rb),
        535 => cpu.state.set_gpr(i.rt, ra | rb),
        536 => cpu.state.set_gpr(i.rt, !(ra & rb)),
        537 => cpu.state.set_gpr(i.rt, !(ra ^ rb)),
        538 => cpu.state.set_gpr(i.rt, !(ra | rb)),
        // evsrw / evsrwu: logical right shift per lane
        530 | 531 => {
            let out = map_words(ra, rb, |a, b| a.wrapping_shr(b & 0x1F));
            cpu.state.set_gpr(i.rt, out);
        }
        // evmwsmfaa: signed word fractional, accumulate
        543 => {
            let a = unpack_words(ra);
            let b = unpack_words(rb);
            let acc = unpack_words(cpu.state.acc);
            let mut out = [0u32; 2];
            let mut new_acc = [0u32; 2];
            for lane in 0..2 {
                let product = (a[lane] as i32 as i64) * (b[lane] as i32 as i64);
                out[lane] = (product >> 31) as u32;
                new_acc[lane] = acc[lane].wrapping_add(out[lane]);
            }
            cpu.state.set_gpr(i.rt, pack_words(out));
            cpu.state.acc = pack_words(new_acc);
        }
        // evcmpgts / evcmplts / evcmpeq: two bits per lane into CR6
        544 | 545 | 546 => {
            let a = unpack_words(ra);
            let b = unpack_words(rb);
            let mut field = 0u32;
            for lane in 0..2 {
                let x = a[lane] as i32;
                let y = b[lane] as i32;
                let hit = match i.xo {
                    544 => x > y,
                    545 => x < y,
                    _ => x == y,
                };
                if hit {
                    field |= if lane == 0 { 0x8 } else { 0x2 };
                }
            }
            cpu.state.set_cr_field(6, field);
        }
        // evslwi: immediate count in the rb field
        552 => {
            let n = (i.rb & 0x1F) as u32;
            let out = map_words(ra, 0, |a, _| a.wrapping_shl(n));
            cpu.state.set_gpr(i.rt, out);
        }
        // evmergehi / evmergelo
        556 => {
            let a = unpack_words(ra);
            let b = unpack_words(rb);
            cpu.state.set_gpr(i.rt, pack_words([a[0], b[0]]));
        }
        557 => {
            let a = unpack_words(ra);
            let b = unpack_words(rb);
            cpu.state.set_gpr(i.rt, pack_words([a[1], b[1]]));
        }
        // evsel: CR6 lane bits choose between a and b
        560 => {
            let a = unpack_words(ra);
            let b = unpack_words(rb);
            let cr6 = cpu.state.cr_field(6);
            let out = [
                if cr6 & 0x8 != 0 { a[0] } else { b[0] },
                if cr6 & 0x2 != 0 { a[1] } else { b[1] },
            ];
            cpu.state.set_gpr(i.rt, pack_words(out));
        }
        // evsrwi
        562 => {
            let n = (i.rb & 0x1F) as u32;
            let out = map_words(ra, 0, |a, _| a.wrapping_shr(n));
            cpu.state.set_gpr(i.rt, out);
        }
        // evsraw
        563 => {
            let out = map_words(ra, rb, |a, b| ((a as i32) >> (b & 0x1F)) as u32);
            cpu.state.set_gpr(i.rt, out);
        }
        // evmwhssf: word fractional high
        567 => {
            let out = map_words(ra, rb, |a, b| {
                (((a as i32 as i64) * (b as i32 as i64)) >> 31) as u32
            });
            cpu.state.set_gpr(i.rt, out);
        }
        // evmwlumi: unsigned low
        568 => {
            let out = map_words(ra, rb, |a, b| a.wrapping_mul(b));
            cpu.state.set_gpr(i.rt, out);
        }
        // evmwhumi: unsigned high
        569 => {
            let out = map_words(ra, rb, |a, b| (((a as u64) * (b as u64)) >> 32) as u32);
            cpu.state.set_gpr(i.rt, out);
        }
        // evldd: UI * 8 displacement, 8-byte aligned doubleword
        769 => {
            let ea = cpu.state.gpr_or_zero(i.ra).wrapping_add(i.rb as u64 * 8);
            Interpreter::check_alignment(ea, 8)?;
            let value = cpu.read_data64(ea)?;
            cpu.state.set_gpr(i.rt, value);
        }
        // evldw: same doubleword, word alignment suffices
        770 => {
            let ea = cpu.state.gpr_or_zero(i.ra).wrapping_add(i.rb as u64 * 8);
            Interpreter::check_alignment(ea, 4)?;
            let hi = cpu.read_data32(ea)? as u64;
            let lo = cpu.read_data32(ea + 4)? as u64;
            cpu.state.set_gpr(i.rt, (hi << 32) | lo);
        }
        // evlhh: halfword splat into the even halfword of each lane
        772 => {
            let ea = cpu.state.gpr_or_zero(i.ra).wrapping_add(i.rb as u64 * 2);
            let h = cpu.read_data16(ea)? as u64;
            cpu.state.set_gpr(i.rt, (h << 48) | (h << 16));
        }
        // evstdd
        801 => {
            let ea = cpu.state.gpr_or_zero(i.ra).wrapping_add(i.rb as u64 * 8);
            Interpreter::check_alignment(ea, 8)?;
            cpu.write_data64(ea, cpu.state.gpr(i.rt))?;
        }
        // evstdw
        802 => {
            let ea = cpu.state.gpr_or_zero(i.ra).wrapping_add(i.rb as u64 * 8);
            Interpreter::check_alignment(ea, 4)?;
            let value = cpu.state.gpr(i.rt);
            cpu.write_data32(ea, (value >> 32) as u32)?;
            cpu.write_data32(ea + 4, value as u32)?;
        }
        // evsth: even halfword of lane 0
        804 => {
            let ea = cpu.state.gpr_or_zero(i.ra).wrapping_add(i.rb as u64 * 2);
            cpu.write_data16(ea, (cpu.state.gpr(i.rt) >> 48) as u16)?;
        }
        xo => {
            return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                op: 4,
                xo,
            }))
        }
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

    fn spe(rt: u32, ra: u32, rb: u32, xo: u32) -> Instr {
        decode((4u32 << 26) | (rt << 21) | (ra << 16) | (rb << 11) | xo).unwrap()
    }

    #[test]
    fn test_lane_packing() {
        let v = pack_words([0x1111_2222, 0x3333_4444]);
        assert_eq!(v, 0x1111_2222_3333_4444);
        assert_eq!(unpack_words(v), [0x1111_2222, 0x3333_4444]);
        assert_eq!(
            unpack_halfwords(v),
            [0x1111, 0x2222, 0x3333, 0x4444]
        );
    }

    #[test]
    fn test_evaddw_lane_overflow_sets_xer() {
        let mut cpu = cpu();
        cpu.state.set_gpr(1, pack_words([0x7FFF_FFFF, 1]));
        cpu.state.set_gpr(2, pack_words([1, 1]));
        execute(&mut cpu, &spe(3, 1, 2, 512)).unwrap();
        assert_eq!(unpack_words(cpu.state.gpr(3)), [0x8000_0000, 2]);
        assert!(cpu.state.xer_ov());
        assert!(cpu.state.xer_so());
    }

    #[test]
    fn test_evmergehi_lo() {
        let mut cpu = cpu();
        cpu.state.set_gpr(1, 0x1111_1111_2222_2222);
        cpu.state.set_gpr(2, 0x3333_3333_4444_4444);
        execute(&mut cpu, &spe(3, 1, 2, 556)).unwrap();
        assert_eq!(cpu.state.gpr(3), 0x1111_1111_3333_3333);
        execute(&mut cpu, &spe(3, 1, 2, 557)).unwrap();
        assert_eq!(cpu.state.gpr(3), 0x2222_2222_4444_4444);
    }

    #[test]
    fn test_evcmp_and_evsel() {
        let mut cpu = cpu();
        cpu.state.set_gpr(1, pack_words([5, 1]));
        cpu.state.set_gpr(2, pack_words([3, 9]));
        // lane0: 5 > 3, lane1: 1 > 9 fails
        execute(&mut cpu, &spe(0, 1, 2, 544)).unwrap();
        assert_eq!(cpu.state.cr_field(6), 0x8);
        // evsel picks a for lane0, b for lane1
        execute(&mut cpu, &spe(3, 1, 2, 560)).unwrap();
        assert_eq!(unpack_words(cpu.state.gpr(3)), [5, 9]);
    }

    #[test]
    fn test_evmwhumi_high_word() {
        let mut cpu = cpu();
        cpu.state.set_gpr(1, pack_words([0xFFFF_FFFF, 2]));
        cpu.state.set_gpr(2, pack_words([0xFFFF_FFFF, 3]));
        execute(&mut cpu, &spe(3, 1, 2, 569)).unwrap();
        assert_eq!(unpack_words(cpu.state.gpr(3)), [0xFFFF_FFFE, 0]);
    }

    #[test]
    fn test_evmwsmfaa_accumulates() {
        let mut cpu = cpu();
        // 0.5 * 0.5 in Q31 is 0.25
        let half = 0x4000_0000u32;
        cpu.state.set_gpr(1, pack_words([half, 0]));
        cpu.state.set_gpr(2, pack_words([half, 0]));
        execute(&mut cpu, &spe(3, 1, 2, 543)).unwrap();
        assert_eq!(unpack_words(cpu.state.gpr(3))[0], 0x2000_0000);
        assert_eq!(unpack_words(cpu.state.acc)[0], 0x2000_0000);
        execute(&mut cpu, &spe(3, 1, 2, 543)).unwrap();
        assert_eq!(unpack_words(cpu.state.acc)[0], 0x4000_0000);
    }

    #[test]
    fn test_evldd_evstdd_round_trip() {
        let mut cpu = cpu();
        cpu.state.set_gpr(1, 0x100);
        cpu.state.set_gpr(3, 0xAABB_CCDD_1122_3344);
        // evstdd r3, 8(r1): UI = 1 scaled by 8
        execute(&mut cpu, &spe(3, 1, 1, 801)).unwrap();
        cpu.state.set_gpr(4, 0);
        execute(&mut cpu, &spe(4, 1, 1, 769)).unwrap();
        assert_eq!(cpu.state.gpr(4), 0xAABB_CCDD_1122_3344);
        assert_eq!(cpu.bus.ram().read_word(0x108), 0xAABB_CCDD);
    }

    #[test]
    fn test_evldd_alignment() {
        let mut cpu = cpu();
        cpu.state.set_gpr(1, 0x104);
        assert!(matches!(
            execute(&mut cpu, &spe(4, 1, 0, 769)),
            Err(Exception::Alignment { ea: 0x104 })
        ));
    }
}
