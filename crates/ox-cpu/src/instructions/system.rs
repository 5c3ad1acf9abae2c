//! System instructions: SPR file, MSR and segment-register moves, CR field
//! moves, isel, rfi and TLB maintenance
//!
//! The 10-bit SPR number arrives with its halves swapped in the encoding; the
//! decoder already swapped them back.

use crate::decoder::Instr;
use crate::exceptions::{Exception, ProgramCause};
use crate::interpreter::Interpreter;
use crate::state::Msr;
use tracing::warn;

mod spr {
    pub const MQ: u16 = 0;
    pub const XER: u16 = 1;
    pub const RTCU: u16 = 4;
    pub const RTCL: u16 = 5;
    pub const DEC_USER: u16 = 6;
    pub const LR: u16 = 8;
    pub const CTR: u16 = 9;
    pub const DSISR: u16 = 18;
    pub const DAR: u16 = 19;
    pub const DEC: u16 = 22;
    pub const SDR1: u16 = 25;
    pub const SRR0: u16 = 26;
    pub const SRR1: u16 = 27;
    pub const SPRG0: u16 = 272;
    pub const SPRG3: u16 = 275;
    pub const EAR: u16 = 282;
    pub const TBL: u16 = 284;
    pub const TBU: u16 = 285;
    pub const PVR: u16 = 287;
    pub const IBAT0U: u16 = 528;
    pub const DBAT3L: u16 = 543;
}

fn read_spr(cpu: &mut Interpreter, number: u16) -> u64 {
    match number {
        spr::MQ => cpu.state.mq as u64,
        spr::XER => cpu.state.xer,
        spr::RTCU => cpu.state.rtcu as u64,
        spr::RTCL => cpu.state.rtcl as u64,
        spr::DEC_USER | spr::DEC => cpu.state.dec as u64,
        spr::LR => cpu.state.lr,
        spr::CTR => cpu.state.ctr,
        spr::DSISR => cpu.state.dsisr as u64,
        spr::DAR => cpu.state.dar,
        spr::SDR1 => cpu.state.sdr1 as u64,
        spr::SRR0 => cpu.state.srr0,
        spr::SRR1 => cpu.state.srr1,
        spr::SPRG0..=spr::SPRG3 => cpu.state.sprg[(number - spr::SPRG0) as usize],
        spr::EAR => cpu.state.ear as u64,
        spr::TBL => cpu.state.tbl() as u64,
        spr::TBU => cpu.state.tbu() as u64,
        spr::PVR => cpu.state.pvr as u64,
        spr::IBAT0U..=spr::DBAT3L => cpu.mmu.bat((number - spr::IBAT0U) as usize) as u64,
        _ => {
            warn!("mfspr from unimplemented SPR {}", number);
            0
        }
    }
}

fn write_spr(cpu: &mut Interpreter, number: u16, value: u64) {
    match number {
        spr::MQ => cpu.state.mq = value as u32,
        spr::XER => cpu.state.xer = value,
        spr::RTCU => cpu.state.rtcu = value as u32,
        spr::RTCL => cpu.state.rtcl = value as u32,
        spr::DEC_USER | spr::DEC => cpu.state.dec = value as u32,
        spr::LR => cpu.state.lr = value,
        spr::CTR => cpu.state.ctr = value,
        spr::DSISR => cpu.state.dsisr = value as u32,
        spr::DAR => cpu.state.dar = value,
        spr::SDR1 => cpu.state.sdr1 = value as u32,
        spr::SRR0 => cpu.state.srr0 = value,
        spr::SRR1 => cpu.state.srr1 = value,
        spr::SPRG0..=spr::SPRG3 => cpu.state.sprg[(number - spr::SPRG0) as usize] = value,
        spr::EAR => cpu.state.ear = value as u32,
        spr::TBL => {
            cpu.state.time_base =
                ((cpu.state.tbu() as u64) << 32) | (value as u32 as u64);
        }
        spr::TBU => {
            cpu.state.time_base = ((value as u32 as u64) << 32) | cpu.state.tbl() as u64;
        }
        spr::PVR => cpu.state.pvr = value as u32,
        spr::IBAT0U..=spr::DBAT3L => {
            cpu.mmu.set_bat((number - spr::IBAT0U) as usize, value as u32)
        }
        _ => warn!("mtspr to unimplemented SPR {}", number),
    }
}

/// XFX-form: mfspr, mtspr, mftb, mtcrf
pub fn execute_xfx(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    match i.xo {
        // mfspr
        339 => {
            let value = read_spr(cpu, i.spr);
            cpu.state.set_gpr(i.rt, value);
        }
        // mftb
        371 => {
            let value = match i.spr {
                268 => cpu.state.tbl() as u64,
                269 => cpu.state.tbu() as u64,
                tbr => {
                    warn!("mftb from unknown TBR {}", tbr);
                    0
                }
            };
            cpu.state.set_gpr(i.rt, value);
        }
        // mtspr
        467 => {
            let value = cpu.state.gpr(i.rt);
            write_spr(cpu, i.spr, value);
        }
        // mtcrf
        144 => {
            let fxm = ((i.raw >> 12) & 0xFF) as u32;
            let value = cpu.state.gpr(i.rt) as u32;
            for field in 0..8 {
                if fxm & (0x80 >> field) != 0 {
                    cpu.state
                        .set_cr_field(field as u8, (value >> (28 - field * 4)) & 0xF);
                }
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

/// isel: pick RA (literal zero when RA == 0) or RB by a CR bit
pub fn isel(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let value = if cpu.state.cr_bit(i.frc) {
        cpu.state.gpr_or_zero(i.ra)
    } else {
        cpu.state.gpr(i.rb)
    };
    cpu.state.set_gpr(i.rt, value);
    Ok(())
}

/// rfi: restore PC and MSR atomically and leave interrupt mode
pub fn rfi(cpu: &mut Interpreter) {
    cpu.state.pc = cpu.state.srr0;
    cpu.state.msr = Msr::from_bits_retain(cpu.state.srr1);
    cpu.state.interrupt_mode = false;
}

/// X-form system operations under primary 31
pub fn execute_x(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    match i.xo {
        // mfcr
        19 => {
            cpu.state.set_gpr(i.rt, cpu.state.cr as u64);
        }
        // mfmsr
        83 => {
            cpu.state.set_gpr(i.rt, cpu.state.msr.bits());
        }
        // mtmsr
        146 => {
            cpu.state.msr = Msr::from_bits_retain(cpu.state.gpr(i.rt));
        }
        // mtsr
        210 => {
            cpu.state.sr[(i.ra & 0xF) as usize] = cpu.state.gpr(i.rt) as u32;
        }
        // mtsrin
        242 => {
            let index = (cpu.state.gpr(i.rb) >> 28) & 0xF;
            cpu.state.sr[index as usize] = cpu.state.gpr(i.rt) as u32;
        }
        // tlbie
        306 => {
            let ea = cpu.state.gpr(i.rb);
            cpu.mmu.invalidate_page(ea);
        }
        // tlbia
        370 => cpu.mmu.invalidate_all(),
        // slbia / tlbsync: single-core no-ops
        498 | 566 => {}
        // mfsr
        595 => {
            let value = cpu.state.sr[(i.ra & 0xF) as usize];
            cpu.state.set_gpr(i.rt, value as u64);
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

    fn spr_encoding(number: u16) -> u32 {
        // The instruction carries SPR[0:4] in the high position
        (((number & 0x1F) as u32) << 16) | (((number >> 5) as u32) << 11)
    }

    fn mfspr(rt: u32, number: u16) -> Instr {
        decode((31u32 << 26) | (rt << 21) | spr_encoding(number) | (339 << 1)).unwrap()
    }

    fn mtspr(rs: u32, number: u16) -> Instr {
        decode((31u32 << 26) | (rs << 21) | spr_encoding(number) | (467 << 1)).unwrap()
    }

    #[test]
    fn test_spr_round_trip() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0x1234_5678);
        execute_xfx(&mut cpu, &mtspr(3, spr::LR)).unwrap();
        assert_eq!(cpu.state.lr, 0x1234_5678);
        execute_xfx(&mut cpu, &mfspr(4, spr::LR)).unwrap();
        assert_eq!(cpu.state.gpr(4), 0x1234_5678);
    }

    #[test]
    fn test_xer_write_clears_sticky_so() {
        let mut cpu = cpu();
        cpu.state.set_ov(true);
        assert!(cpu.state.xer_so());
        cpu.state.set_gpr(3, 0);
        execute_xfx(&mut cpu, &mtspr(3, spr::XER)).unwrap();
        assert!(!cpu.state.xer_so());
    }

    #[test]
    fn test_bat_sprs_reach_the_mmu() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0xDEAD_0003);
        execute_xfx(&mut cpu, &mtspr(3, 528)).unwrap();
        assert_eq!(cpu.mmu.bat(0), 0xDEAD_0003);
        execute_xfx(&mut cpu, &mfspr(4, 543)).unwrap();
        assert_eq!(cpu.state.gpr(4), 0);
    }

    #[test]
    fn test_time_base_halves() {
        let mut cpu = cpu();
        cpu.state.time_base = 0x1111_2222_3333_4444;
        execute_xfx(&mut cpu, &mfspr(3, spr::TBL)).unwrap();
        assert_eq!(cpu.state.gpr(3), 0x3333_4444);
        execute_xfx(&mut cpu, &mfspr(3, spr::TBU)).unwrap();
        assert_eq!(cpu.state.gpr(3), 0x1111_2222);
        cpu.state.set_gpr(5, 0x5555_6666);
        execute_xfx(&mut cpu, &mtspr(5, spr::TBU)).unwrap();
        assert_eq!(cpu.state.time_base, 0x5555_6666_3333_4444);
    }

    #[test]
    fn test_mtcrf_masked_fields() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0xA000_0005);
        // FXM selects fields 0 and 7
        let raw = (31u32 << 26) | (3 << 21) | (0x81 << 12) | (144 << 1);
        execute_xfx(&mut cpu, &decode(raw).unwrap()).unwrap();
        assert_eq!(cpu.state.cr_field(0), 0xA);
        assert_eq!(cpu.state.cr_field(7), 0x5);
        assert_eq!(cpu.state.cr_field(3), 0);
    }

    #[test]
    fn test_isel() {
        let mut cpu = cpu();
        cpu.state.set_gpr(4, 111);
        cpu.state.set_gpr(5, 222);
        // isel r3, r4, r5, bit 2
        let raw = (31u32 << 26) | (3 << 21) | (4 << 16) | (5 << 11) | (2 << 6) | (15 << 1);
        let i = decode(raw).unwrap();
        isel(&mut cpu, &i).unwrap();
        assert_eq!(cpu.state.gpr(3), 222);
        cpu.state.set_cr_bit(2, true);
        isel(&mut cpu, &i).unwrap();
        assert_eq!(cpu.state.gpr(3), 111);
    }

    #[test]
    fn test_segment_register_moves() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0x42);
        // mtsr 7, r3
        let raw = (31u32 << 26) | (3 << 21) | (7 << 16) | (210 << 1);
        execute_x(&mut cpu, &decode(raw).unwrap()).unwrap();
        assert_eq!(cpu.state.sr[7], 0x42);
        // mtsrin picks the segment from RB bits [0:3]
        cpu.state.set_gpr(5, 0x99);
        cpu.state.set_gpr(6, 0xA000_0000);
        let raw = (31u32 << 26) | (5 << 21) | (6 << 11) | (242 << 1);
        execute_x(&mut cpu, &decode(raw).unwrap()).unwrap();
        assert_eq!(cpu.state.sr[0xA], 0x99);
    }
}
