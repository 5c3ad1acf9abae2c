//! Loads, stores, strings, reservations and cache operations
//!
//! Effective addresses follow the D/DS/X conventions: RA == 0 in the base
//! position reads as literal zero, update forms require RA != 0 (and, for
//! loads, RA != RT) and write the effective address back on success.
//! Halfword and wider accesses fault on misalignment before translation.

use crate::decoder::Instr;
use crate::exceptions::{Exception, ProgramCause};
use crate::interpreter::Interpreter;

#[inline]
fn ea_d(cpu: &Interpreter, i: &Instr) -> u64 {
    cpu.state.gpr_or_zero(i.ra).wrapping_add(i.si as i64 as u64)
}

#[inline]
fn ea_x(cpu: &Interpreter, i: &Instr) -> u64 {
    cpu.state
        .gpr_or_zero(i.ra)
        .wrapping_add(cpu.state.gpr(i.rb))
}

#[inline]
fn ea_update_d(cpu: &Interpreter, i: &Instr, is_load: bool) -> Result<u64, Exception> {
    if i.ra == 0 || (is_load && i.ra == i.rt) {
        return Err(Exception::Program(ProgramCause::InvalidUpdate));
    }
    Ok(cpu.state.gpr(i.ra).wrapping_add(i.si as i64 as u64))
}

#[inline]
fn ea_update_x(cpu: &Interpreter, i: &Instr, is_load: bool) -> Result<u64, Exception> {
    if i.ra == 0 || (is_load && i.ra == i.rt) {
        return Err(Exception::Program(ProgramCause::InvalidUpdate));
    }
    Ok(cpu.state.gpr(i.ra).wrapping_add(cpu.state.gpr(i.rb)))
}

/// D-form loads and stores, primaries 32-47
pub fn execute_d(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    match i.op {
        // lwz
        32 => {
            let ea = ea_d(cpu, i);
            let value = cpu.read_data32(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
        }
        // lwzu
        33 => {
            let ea = ea_update_d(cpu, i, true)?;
            let value = cpu.read_data32(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
            cpu.state.set_gpr(i.ra, ea);
        }
        // lbz
        34 => {
            let ea = ea_d(cpu, i);
            let value = cpu.read_data8(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
        }
        // lbzu
        35 => {
            let ea = ea_update_d(cpu, i, true)?;
            let value = cpu.read_data8(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
            cpu.state.set_gpr(i.ra, ea);
        }
        // stw
        36 => {
            let ea = ea_d(cpu, i);
            cpu.write_data32(ea, cpu.state.gpr(i.rt) as u32)?;
        }
        // stwu
        37 => {
            let ea = ea_update_d(cpu, i, false)?;
            cpu.write_data32(ea, cpu.state.gpr(i.rt) as u32)?;
            cpu.state.set_gpr(i.ra, ea);
        }
        // stb
        38 => {
            let ea = ea_d(cpu, i);
            cpu.write_data8(ea, cpu.state.gpr(i.rt) as u8)?;
        }
        // stbu
        39 => {
            let ea = ea_update_d(cpu, i, false)?;
            cpu.write_data8(ea, cpu.state.gpr(i.rt) as u8)?;
            cpu.state.set_gpr(i.ra, ea);
        }
        // lhz
        40 => {
            let ea = ea_d(cpu, i);
            let value = cpu.read_data16(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
        }
        // lhzu
        41 => {
            let ea = ea_update_d(cpu, i, true)?;
            let value = cpu.read_data16(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
            cpu.state.set_gpr(i.ra, ea);
        }
        // lha
        42 => {
            let ea = ea_d(cpu, i);
            let value = cpu.read_data16(ea)?;
            cpu.state.set_gpr(i.rt, value as i16 as i64 as u64);
        }
        // lhau
        43 => {
            let ea = ea_update_d(cpu, i, true)?;
            let value = cpu.read_data16(ea)?;
            cpu.state.set_gpr(i.rt, value as i16 as i64 as u64);
            cpu.state.set_gpr(i.ra, ea);
        }
        // sth
        44 => {
            let ea = ea_d(cpu, i);
            cpu.write_data16(ea, cpu.state.gpr(i.rt) as u16)?;
        }
        // sthu
        45 => {
            let ea = ea_update_d(cpu, i, false)?;
            cpu.write_data16(ea, cpu.state.gpr(i.rt) as u16)?;
            cpu.state.set_gpr(i.ra, ea);
        }
        // lmw
        46 => {
            let mut ea = ea_d(cpu, i);
            for reg in i.rt..32 {
                let value = cpu.read_data32(ea)?;
                cpu.state.set_gpr(reg, value as u64);
                ea = ea.wrapping_add(4);
            }
        }
        // stmw
        47 => {
            let mut ea = ea_d(cpu, i);
            for reg in i.rt..32 {
                cpu.write_data32(ea, cpu.state.gpr(reg) as u32)?;
                ea = ea.wrapping_add(4);
            }
        }
        op => {
            return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                op,
                xo: i.xo,
            }))
        }
    }
    Ok(())
}

/// DS-form under primary 58: ld, ldu, ldarx
pub fn execute_ds_load(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    match i.xo {
        // ld
        0 => {
            let ea = ea_d(cpu, i);
            let value = cpu.read_data64(ea)?;
            cpu.state.set_gpr(i.rt, value);
        }
        // ldu
        1 => {
            let ea = ea_update_d(cpu, i, true)?;
            let value = cpu.read_data64(ea)?;
            cpu.state.set_gpr(i.rt, value);
            cpu.state.set_gpr(i.ra, ea);
        }
        // ldarx
        2 => {
            let ea = ea_x(cpu, i);
            Interpreter::check_alignment(ea, 8)?;
            let pa = cpu.reservation_address(ea, false)?;
            let value = cpu.read_data64(ea)?;
            cpu.state.set_gpr(i.rt, value);
            cpu.state.reservation = Some(pa);
        }
        xo => {
            return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                op: 58,
                xo,
            }))
        }
    }
    Ok(())
}

/// DS-form under primary 62: std, stdu
pub fn execute_ds_store(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    match i.xo {
        0 => {
            let ea = ea_d(cpu, i);
            cpu.write_data64(ea, cpu.state.gpr(i.rt))?;
        }
        1 => {
            let ea = ea_update_d(cpu, i, false)?;
            cpu.write_data64(ea, cpu.state.gpr(i.rt))?;
            cpu.state.set_gpr(i.ra, ea);
        }
        xo => {
            return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                op: 62,
                xo,
            }))
        }
    }
    Ok(())
}

/// X-form memory operations under primary 31
pub fn execute_x(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    match i.xo {
        // lwarx
        20 => {
            let ea = ea_x(cpu, i);
            Interpreter::check_alignment(ea, 4)?;
            let pa = cpu.reservation_address(ea, false)?;
            let value = cpu.read_data32(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
            cpu.state.reservation = Some(pa);
        }
        // ldx
        21 => {
            let ea = ea_x(cpu, i);
            let value = cpu.read_data64(ea)?;
            cpu.state.set_gpr(i.rt, value);
        }
        // lwzx
        23 => {
            let ea = ea_x(cpu, i);
            let value = cpu.read_data32(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
        }
        // lwzux
        55 => {
            let ea = ea_update_x(cpu, i, true)?;
            let value = cpu.read_data32(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
            cpu.state.set_gpr(i.ra, ea);
        }
        // ldarx (also reachable as 58/2)
        84 => {
            let ea = ea_x(cpu, i);
            Interpreter::check_alignment(ea, 8)?;
            let pa = cpu.reservation_address(ea, false)?;
            let value = cpu.read_data64(ea)?;
            cpu.state.set_gpr(i.rt, value);
            cpu.state.reservation = Some(pa);
        }
        // lbzx
        87 => {
            let ea = ea_x(cpu, i);
            let value = cpu.read_data8(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
        }
        // lbzux
        119 => {
            let ea = ea_update_x(cpu, i, true)?;
            let value = cpu.read_data8(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
            cpu.state.set_gpr(i.ra, ea);
        }
        // stdx
        149 => {
            let ea = ea_x(cpu, i);
            cpu.write_data64(ea, cpu.state.gpr(i.rt))?;
        }
        // stwcx.
        150 => {
            let ea = ea_x(cpu, i);
            Interpreter::check_alignment(ea, 4)?;
            let pa = cpu.reservation_address(ea, true)?;
            let success = cpu.state.reservation == Some(pa);
            if success {
                cpu.write_data32(ea, cpu.state.gpr(i.rt) as u32)?;
            }
            cpu.state.reservation = None;
            let field = if success { 0b0010 } else { 0 } | cpu.state.xer_so() as u32;
            cpu.state.set_cr_field(0, field);
        }
        // stwx
        151 => {
            let ea = ea_x(cpu, i);
            cpu.write_data32(ea, cpu.state.gpr(i.rt) as u32)?;
        }
        // stwux
        183 => {
            let ea = ea_update_x(cpu, i, false)?;
            cpu.write_data32(ea, cpu.state.gpr(i.rt) as u32)?;
            cpu.state.set_gpr(i.ra, ea);
        }
        // stdcx.
        214 => {
            let ea = ea_x(cpu, i);
            Interpreter::check_alignment(ea, 8)?;
            let pa = cpu.reservation_address(ea, true)?;
            let success = cpu.state.reservation == Some(pa);
            if success {
                cpu.write_data64(ea, cpu.state.gpr(i.rt))?;
            }
            cpu.state.reservation = None;
            let field = if success { 0b0010 } else { 0 } | cpu.state.xer_so() as u32;
            cpu.state.set_cr_field(0, field);
        }
        // stbx
        215 => {
            let ea = ea_x(cpu, i);
            cpu.write_data8(ea, cpu.state.gpr(i.rt) as u8)?;
        }
        // stbux
        247 => {
            let ea = ea_update_x(cpu, i, false)?;
            cpu.write_data8(ea, cpu.state.gpr(i.rt) as u8)?;
            cpu.state.set_gpr(i.ra, ea);
        }
        // lhzx
        279 => {
            let ea = ea_x(cpu, i);
            let value = cpu.read_data16(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
        }
        // lhzux
        311 => {
            let ea = ea_update_x(cpu, i, true)?;
            let value = cpu.read_data16(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
            cpu.state.set_gpr(i.ra, ea);
        }
        // eciwx: external access gated by EAR, a plain bus word here
        310 => {
            let ea = ea_x(cpu, i);
            let value = cpu.read_data32(ea)?;
            cpu.state.set_gpr(i.rt, value as u64);
        }
        // lwax
        341 => {
            let ea = ea_x(cpu, i);
            let value = cpu.read_data32(ea)?;
            cpu.state.set_gpr(i.rt, value as i32 as i64 as u64);
        }
        // lhax
        343 => {
            let ea = ea_x(cpu, i);
            let value = cpu.read_data16(ea)?;
            cpu.state.set_gpr(i.rt, value as i16 as i64 as u64);
        }
        // lhaux
        375 => {
            let ea = ea_update_x(cpu, i, true)?;
            let value = cpu.read_data16(ea)?;
            cpu.state.set_gpr(i.rt, value as i16 as i64 as u64);
            cpu.state.set_gpr(i.ra, ea);
        }
        // sthx
        407 => {
            let ea = ea_x(cpu, i);
            cpu.write_data16(ea, cpu.state.gpr(i.rt) as u16)?;
        }
        // ecowx
        438 => {
            let ea = ea_x(cpu, i);
            cpu.write_data32(ea, cpu.state.gpr(i.rt) as u32)?;
        }
        // sthux
        439 => {
            let ea = ea_update_x(cpu, i, false)?;
            cpu.write_data16(ea, cpu.state.gpr(i.rt) as u16)?;
            cpu.state.set_gpr(i.ra, ea);
        }
        // lswx: count from XER[25:31]
        533 => {
            let ea = ea_x(cpu, i);
            let count = (cpu.state.xer & 0x7F) as u32;
            load_string(cpu, i.rt, ea, count)?;
        }
        // lwbrx
        534 => {
            let ea = ea_x(cpu, i);
            let value = cpu.read_data32(ea)?;
            cpu.state.set_gpr(i.rt, value.swap_bytes() as u64);
        }
        // lswi: NB == 0 means 32 bytes; the count rides in the rb field
        597 => {
            let ea = cpu.state.gpr_or_zero(i.ra);
            let count = if i.rb == 0 { 32 } else { i.rb as u32 };
            load_string(cpu, i.rt, ea, count)?;
        }
        // sync
        598 => std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst),
        // stswx
        661 => {
            let ea = ea_x(cpu, i);
            let count = (cpu.state.xer & 0x7F) as u32;
            store_string(cpu, i.rt, ea, count)?;
        }
        // stwbrx
        662 => {
            let ea = ea_x(cpu, i);
            cpu.write_data32(ea, (cpu.state.gpr(i.rt) as u32).swap_bytes())?;
        }
        // stswi
        725 => {
            let ea = cpu.state.gpr_or_zero(i.ra);
            let count = if i.rb == 0 { 32 } else { i.rb as u32 };
            store_string(cpu, i.rt, ea, count)?;
        }
        // lhbrx
        790 => {
            let ea = ea_x(cpu, i);
            let value = cpu.read_data16(ea)?;
            cpu.state.set_gpr(i.rt, value.swap_bytes() as u64);
        }
        // eieio
        854 => std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst),
        // sthbrx
        918 => {
            let ea = ea_x(cpu, i);
            cpu.write_data16(ea, (cpu.state.gpr(i.rt) as u16).swap_bytes())?;
        }
        // dcbt / dcbtst / dcbst / dcbf / icbi: hints and maintenance, no-ops
        278 | 246 | 54 | 86 | 982 => {}
        // dcbz: zero a 32-byte block, 32-byte aligned
        1014 => {
            let ea = ea_x(cpu, i);
            if ea & 0x1F != 0 {
                return Err(Exception::Alignment { ea });
            }
            for off in (0..32).step_by(4) {
                cpu.write_data32(ea + off, 0)?;
            }
        }
        xo => {
            return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                op: 31,
                xo,
            }))
        }
    }
    Ok(())
}

/// String load: bytes pack big-endian into successive registers, the last
/// partial word left-justified, register numbers wrapping past r31.
fn load_string(cpu: &mut Interpreter, rt: u8, ea: u64, count: u32) -> Result<(), Exception> {
    let mut reg = rt as u32;
    let mut addr = ea;
    let mut remaining = count;
    while remaining > 0 {
        let take = remaining.min(4);
        let mut word = 0u32;
        for k in 0..take {
            word = (word << 8) | cpu.read_data8(addr.wrapping_add(k as u64))? as u32;
        }
        word <<= 8 * (4 - take);
        cpu.state.set_gpr(reg as u8, word as u64);
        reg = (reg + 1) % 32;
        addr = addr.wrapping_add(take as u64);
        remaining -= take;
    }
    Ok(())
}

fn store_string(cpu: &mut Interpreter, rs: u8, ea: u64, count: u32) -> Result<(), Exception> {
    let mut reg = rs as u32;
    let mut addr = ea;
    let mut remaining = count;
    while remaining > 0 {
        let take = remaining.min(4);
        let word = cpu.state.gpr(reg as u8) as u32;
        for k in 0..take {
            cpu.write_data8(addr.wrapping_add(k as u64), (word >> (24 - 8 * k)) as u8)?;
        }
        reg = (reg + 1) % 32;
        addr = addr.wrapping_add(take as u64);
        remaining -= take;
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

    fn d_form(op: u32, rt: u32, ra: u32, d: u32) -> Instr {
        decode((op << 26) | (rt << 21) | (ra << 16) | (d & 0xFFFF)).unwrap()
    }

    fn x_form(rt: u32, ra: u32, rb: u32, xo: u32) -> Instr {
        decode((31u32 << 26) | (rt << 21) | (ra << 16) | (rb << 11) | (xo << 1)).unwrap()
    }

    #[test]
    fn test_lwz_big_endian() {
        let mut cpu = cpu();
        cpu.bus.ram_mut().write_block(0x100, &[0x00, 0x11, 0x22, 0x33]).unwrap();
        cpu.state.set_gpr(3, 0x100);
        execute_d(&mut cpu, &d_form(32, 4, 3, 0)).unwrap();
        assert_eq!(cpu.state.gpr(4), 0x0011_2233);
    }

    #[test]
    fn test_ra_zero_base_is_literal_zero() {
        let mut cpu = cpu();
        cpu.state.set_gpr(0, 0x5000);
        cpu.bus.ram_mut().write_word(0x40, 0xAABB_CCDD);
        // lwz r4, 0x40(r0): base ignores r0 contents
        execute_d(&mut cpu, &d_form(32, 4, 0, 0x40)).unwrap();
        assert_eq!(cpu.state.gpr(4), 0xAABB_CCDD);
    }

    #[test]
    fn test_update_form_writes_ea() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0x100);
        cpu.bus.ram_mut().write_word(0x104, 0x1234_5678);
        execute_d(&mut cpu, &d_form(33, 4, 3, 4)).unwrap();
        assert_eq!(cpu.state.gpr(4), 0x1234_5678);
        assert_eq!(cpu.state.gpr(3), 0x104);
    }

    #[test]
    fn test_update_form_ra_zero_rejected() {
        let mut cpu = cpu();
        let err = execute_d(&mut cpu, &d_form(33, 4, 0, 4)).unwrap_err();
        assert_eq!(err, Exception::Program(ProgramCause::InvalidUpdate));
    }

    #[test]
    fn test_unaligned_word_faults() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0x101);
        let err = execute_d(&mut cpu, &d_form(32, 4, 3, 0)).unwrap_err();
        assert_eq!(err, Exception::Alignment { ea: 0x101 });
    }

    #[test]
    fn test_lha_sign_extends() {
        let mut cpu = cpu();
        cpu.bus.ram_mut().write_block(0x100, &[0xFF, 0xFE]).unwrap();
        cpu.state.set_gpr(3, 0x100);
        execute_d(&mut cpu, &d_form(42, 4, 3, 0)).unwrap();
        assert_eq!(cpu.state.gpr(4), (-2i64) as u64);
    }

    #[test]
    fn test_lmw_stmw_round_trip() {
        let mut cpu = cpu();
        for r in 29..32 {
            cpu.state.set_gpr(r, 0x1000 + r as u64);
        }
        cpu.state.set_gpr(1, 0x200);
        execute_d(&mut cpu, &d_form(47, 29, 1, 0)).unwrap();
        for r in 29..32 {
            cpu.state.set_gpr(r, 0);
        }
        execute_d(&mut cpu, &d_form(46, 29, 1, 0)).unwrap();
        for r in 29..32u8 {
            assert_eq!(cpu.state.gpr(r), 0x1000 + r as u64);
        }
    }

    #[test]
    fn test_stwcx_without_reservation_fails() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0x100);
        cpu.state.set_gpr(5, 0xDEAD);
        execute_x(&mut cpu, &x_form(5, 0, 3, 150)).unwrap();
        assert_eq!(cpu.state.cr_field(0), 0);
        assert_eq!(cpu.bus.ram().read_word(0x100), 0);
    }

    #[test]
    fn test_lwarx_stwcx_pair_succeeds() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0x100);
        execute_x(&mut cpu, &x_form(4, 0, 3, 20)).unwrap();
        assert_eq!(cpu.state.reservation, Some(0x100));
        cpu.state.set_gpr(5, 0xCAFE);
        execute_x(&mut cpu, &x_form(5, 0, 3, 150)).unwrap();
        assert_eq!(cpu.state.cr_field(0), 0b0010);
        assert_eq!(cpu.bus.ram().read_word(0x100), 0xCAFE);
        assert_eq!(cpu.state.reservation, None);
    }

    #[test]
    fn test_plain_store_clears_reservation_on_line() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0x100);
        execute_x(&mut cpu, &x_form(4, 0, 3, 20)).unwrap();
        // Store to a different word in the same 64-byte line
        cpu.state.set_gpr(6, 0x120);
        execute_x(&mut cpu, &x_form(5, 0, 6, 151)).unwrap();
        assert_eq!(cpu.state.reservation, None);
    }

    #[test]
    fn test_byte_reverse_round_trip() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0x100);
        cpu.state.set_gpr(5, 0x1122_3344);
        execute_x(&mut cpu, &x_form(5, 0, 3, 662)).unwrap();
        // Memory holds the reversed image
        assert_eq!(cpu.bus.ram().read_word(0x100), 0x4433_2211);
        execute_x(&mut cpu, &x_form(6, 0, 3, 534)).unwrap();
        assert_eq!(cpu.state.gpr(6), 0x1122_3344);
        // A normal load sees the reversed value
        execute_x(&mut cpu, &x_form(7, 0, 3, 23)).unwrap();
        assert_eq!(cpu.state.gpr(7), 0x4433_2211);
    }

    #[test]
    fn test_lswi_left_justifies_tail() {
        let mut cpu = cpu();
        cpu.bus
            .ram_mut()
            .write_block(0x100, &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE])
            .unwrap();
        cpu.state.set_gpr(3, 0x100);
        // lswi r4, r3, 5
        execute_x(&mut cpu, &x_form(4, 3, 5, 597)).unwrap();
        assert_eq!(cpu.state.gpr(4), 0xAABB_CCDD);
        assert_eq!(cpu.state.gpr(5), 0xEE00_0000);
    }

    #[test]
    fn test_dcbz_requires_32_byte_alignment() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0x110);
        assert!(matches!(
            execute_x(&mut cpu, &x_form(0, 0, 3, 1014)),
            Err(Exception::Alignment { ea: 0x110 })
        ));
        cpu.bus.ram_mut().write_word(0x120, 0xFFFF_FFFF);
        cpu.state.set_gpr(3, 0x120);
        execute_x(&mut cpu, &x_form(0, 0, 3, 1014)).unwrap();
        assert_eq!(cpu.bus.ram().read_word(0x120), 0);
    }
}
