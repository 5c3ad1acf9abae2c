//! Scalar floating point
//!
//! Double-precision arithmetic with single-precision variants that round the
//! result through f32. FPSCR status flags follow the architectural taxonomy
//! (VXSNAN, VXISI, VXZDZ, ZX, OX, UX, XX, VXSQRT); rounding uses the host
//! default and only the status bits are modeled. Rc records the FPSCR summary
//! nibble into CR1.

use crate::decoder::{Format, Instr};
use crate::exceptions::{Exception, ProgramCause};
use crate::interpreter::Interpreter;
use crate::state::Fpscr;

fn unsupported(op: u8, xo: u16) -> Exception {
    Exception::Program(ProgramCause::UnsupportedOpcode { op, xo })
}

/// Flag overflow/underflow/inexact on a finished result; `inexact` reports
/// whether a representation error was detected for the operation.
fn flag_result(cpu: &mut Interpreter, result: f64, inexact: bool) {
    if result.is_infinite() {
        cpu.state.raise_fpscr(Fpscr::OX);
        cpu.state.raise_fpscr(Fpscr::XX);
    } else if result != 0.0 && result.abs() < f64::MIN_POSITIVE {
        cpu.state.raise_fpscr(Fpscr::UX);
        cpu.state.raise_fpscr(Fpscr::XX);
    } else if inexact {
        cpu.state.raise_fpscr(Fpscr::XX);
    }
}

fn add_sub(cpu: &mut Interpreter, a: f64, b: f64, negate_b: bool) -> f64 {
    let b = if negate_b { -b } else { b };
    if a.is_nan() || b.is_nan() {
        cpu.state.raise_fpscr(Fpscr::VXSNAN);
        return f64::NAN;
    }
    if a.is_infinite() && b.is_infinite() && a.signum() != b.signum() {
        cpu.state.raise_fpscr(Fpscr::VXISI);
        return f64::NAN;
    }
    let sum = a + b;
    // Kahan error term detects a rounded sum
    let err = b - (sum - a);
    flag_result(cpu, sum, err != 0.0);
    sum
}

fn mul(cpu: &mut Interpreter, a: f64, c: f64) -> f64 {
    if a.is_nan() || c.is_nan() {
        cpu.state.raise_fpscr(Fpscr::VXSNAN);
        return f64::NAN;
    }
    if (a == 0.0 && c.is_infinite()) || (c == 0.0 && a.is_infinite()) {
        cpu.state.raise_fpscr(Fpscr::VXIMZ);
        return f64::NAN;
    }
    let product = a * c;
    let err = a.mul_add(c, -product);
    flag_result(cpu, product, err != 0.0);
    product
}

fn div(cpu: &mut Interpreter, a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        cpu.state.raise_fpscr(Fpscr::VXSNAN);
        return f64::NAN;
    }
    if b == 0.0 {
        if a == 0.0 {
            cpu.state.raise_fpscr(Fpscr::VXZDZ);
            return f64::NAN;
        }
        cpu.state.raise_fpscr(Fpscr::ZX);
        return a / b;
    }
    if a.is_infinite() && b.is_infinite() {
        cpu.state.raise_fpscr(Fpscr::VXIDI);
        return f64::NAN;
    }
    let quotient = a / b;
    let err = b.mul_add(quotient, -a);
    flag_result(cpu, quotient, err != 0.0);
    quotient
}

fn sqrt(cpu: &mut Interpreter, b: f64) -> f64 {
    if b.is_nan() {
        cpu.state.raise_fpscr(Fpscr::VXSNAN);
        return f64::NAN;
    }
    if b < 0.0 {
        cpu.state.raise_fpscr(Fpscr::VXSQRT);
        return f64::NAN;
    }
    let root = b.sqrt();
    flag_result(cpu, root, root * root != b);
    root
}

fn madd(cpu: &mut Interpreter, a: f64, c: f64, b: f64, negate_b: bool, negate_all: bool) -> f64 {
    let b = if negate_b { -b } else { b };
    if a.is_nan() || b.is_nan() || c.is_nan() {
        cpu.state.raise_fpscr(Fpscr::VXSNAN);
        return f64::NAN;
    }
    if (a == 0.0 && c.is_infinite()) || (c == 0.0 && a.is_infinite()) {
        cpu.state.raise_fpscr(Fpscr::VXIMZ);
        return f64::NAN;
    }
    let product = a * c;
    if product.is_infinite() && b.is_infinite() && product.signum() != b.signum() {
        cpu.state.raise_fpscr(Fpscr::VXISI);
        return f64::NAN;
    }
    let result = a.mul_add(c, b);
    flag_result(cpu, result, result != product + b);
    if negate_all {
        -result
    } else {
        result
    }
}

#[inline]
fn round_single(value: f64) -> f64 {
    value as f32 as f64
}

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

fn ea_update_d(cpu: &Interpreter, i: &Instr) -> Result<u64, Exception> {
    if i.ra == 0 {
        return Err(Exception::Program(ProgramCause::InvalidUpdate));
    }
    Ok(cpu.state.gpr(i.ra).wrapping_add(i.si as i64 as u64))
}

fn ea_update_x(cpu: &Interpreter, i: &Instr) -> Result<u64, Exception> {
    if i.ra == 0 {
        return Err(Exception::Program(ProgramCause::InvalidUpdate));
    }
    Ok(cpu.state.gpr(i.ra).wrapping_add(cpu.state.gpr(i.rb)))
}

/// D-form FP loads and stores (48-55) plus the pair forms lfdp/stfdp
pub fn execute_d(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    match i.op {
        // lfs
        48 => {
            let bits = cpu.read_data32(ea_d(cpu, i))?;
            cpu.state.set_fpr(i.rt, f32::from_bits(bits) as f64);
        }
        // lfsu
        49 => {
            let ea = ea_update_d(cpu, i)?;
            let bits = cpu.read_data32(ea)?;
            cpu.state.set_fpr(i.rt, f32::from_bits(bits) as f64);
            cpu.state.set_gpr(i.ra, ea);
        }
        // lfd
        50 => {
            let bits = cpu.read_data64(ea_d(cpu, i))?;
            cpu.state.set_fpr_bits(i.rt, bits);
        }
        // lfdu
        51 => {
            let ea = ea_update_d(cpu, i)?;
            let bits = cpu.read_data64(ea)?;
            cpu.state.set_fpr_bits(i.rt, bits);
            cpu.state.set_gpr(i.ra, ea);
        }
        // stfs
        52 => {
            let bits = (cpu.state.fpr(i.rt) as f32).to_bits();
            cpu.write_data32(ea_d(cpu, i), bits)?;
        }
        // stfsu
        53 => {
            let ea = ea_update_d(cpu, i)?;
            let bits = (cpu.state.fpr(i.rt) as f32).to_bits();
            cpu.write_data32(ea, bits)?;
            cpu.state.set_gpr(i.ra, ea);
        }
        // stfd
        54 => {
            cpu.write_data64(ea_d(cpu, i), cpu.state.fpr_bits(i.rt))?;
        }
        // stfdu
        55 => {
            let ea = ea_update_d(cpu, i)?;
            cpu.write_data64(ea, cpu.state.fpr_bits(i.rt))?;
            cpu.state.set_gpr(i.ra, ea);
        }
        // lfdp: two consecutive doubles into an even/odd register pair
        56 => {
            let ea = ea_d(cpu, i);
            load_pair(cpu, i, ea)?;
        }
        // stfdp
        60 => {
            let ea = ea_d(cpu, i);
            store_pair(cpu, i, ea)?;
        }
        op => return Err(unsupported(op, i.xo)),
    }
    Ok(())
}

/// lfdpx (57) and stfdpx (61)
pub fn execute_pair_indexed(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let ea = ea_x(cpu, i);
    match i.op {
        57 => load_pair(cpu, i, ea),
        61 => store_pair(cpu, i, ea),
        op => Err(unsupported(op, i.xo)),
    }
}

fn load_pair(cpu: &mut Interpreter, i: &Instr, ea: u64) -> Result<(), Exception> {
    if i.rt & 1 != 0 {
        return Err(unsupported(i.op, i.xo));
    }
    Interpreter::check_alignment(ea, 8)?;
    let first = cpu.read_data64(ea)?;
    let second = cpu.read_data64(ea + 8)?;
    cpu.state.set_fpr_bits(i.rt, first);
    cpu.state.set_fpr_bits(i.rt + 1, second);
    Ok(())
}

fn store_pair(cpu: &mut Interpreter, i: &Instr, ea: u64) -> Result<(), Exception> {
    if i.rt & 1 != 0 {
        return Err(unsupported(i.op, i.xo));
    }
    Interpreter::check_alignment(ea, 8)?;
    cpu.write_data64(ea, cpu.state.fpr_bits(i.rt))?;
    cpu.write_data64(ea + 8, cpu.state.fpr_bits(i.rt + 1))?;
    Ok(())
}

/// Indexed FP loads and stores under primary 31
pub fn execute_indexed(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    match i.xo {
        // lfsx
        535 => {
            let bits = cpu.read_data32(ea_x(cpu, i))?;
            cpu.state.set_fpr(i.rt, f32::from_bits(bits) as f64);
        }
        // lfsux
        567 => {
            let ea = ea_update_x(cpu, i)?;
            let bits = cpu.read_data32(ea)?;
            cpu.state.set_fpr(i.rt, f32::from_bits(bits) as f64);
            cpu.state.set_gpr(i.ra, ea);
        }
        // lfdx
        599 => {
            let bits = cpu.read_data64(ea_x(cpu, i))?;
            cpu.state.set_fpr_bits(i.rt, bits);
        }
        // lfdux
        631 => {
            let ea = ea_update_x(cpu, i)?;
            let bits = cpu.read_data64(ea)?;
            cpu.state.set_fpr_bits(i.rt, bits);
            cpu.state.set_gpr(i.ra, ea);
        }
        // stfsx
        663 => {
            let bits = (cpu.state.fpr(i.rt) as f32).to_bits();
            cpu.write_data32(ea_x(cpu, i), bits)?;
        }
        // stfsux
        695 => {
            let ea = ea_update_x(cpu, i)?;
            let bits = (cpu.state.fpr(i.rt) as f32).to_bits();
            cpu.write_data32(ea, bits)?;
            cpu.state.set_gpr(i.ra, ea);
        }
        // stfdx
        727 => {
            cpu.write_data64(ea_x(cpu, i), cpu.state.fpr_bits(i.rt))?;
        }
        // stfdux
        759 => {
            let ea = ea_update_x(cpu, i)?;
            cpu.write_data64(ea, cpu.state.fpr_bits(i.rt))?;
            cpu.state.set_gpr(i.ra, ea);
        }
        xo => return Err(unsupported(31, xo)),
    }
    Ok(())
}

/// Primary 59: single-precision arithmetic
pub fn execute_single(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let a = cpu.state.fpr(i.ra);
    let b = cpu.state.fpr(i.rb);
    let c = cpu.state.fpr(i.frc);

    let result = match i.xo {
        18 => div(cpu, a, b),
        20 => add_sub(cpu, a, b, true),
        21 => add_sub(cpu, a, b, false),
        22 => sqrt(cpu, b),
        // fres
        24 => div(cpu, 1.0, b),
        25 => mul(cpu, a, c),
        // frsqrtes
        26 => {
            let root = sqrt(cpu, b);
            1.0 / root
        }
        28 => madd(cpu, a, c, b, true, false),
        29 => madd(cpu, a, c, b, false, false),
        30 => madd(cpu, a, c, b, true, true),
        31 => madd(cpu, a, c, b, false, true),
        xo => return Err(unsupported(59, xo)),
    };

    cpu.state.set_fpr(i.rt, round_single(result));
    if i.rc {
        cpu.state.update_cr1();
    }
    Ok(())
}

/// Primary 63: double-precision arithmetic, compares, conversions, FPSCR
pub fn execute_double(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    if i.format == Format::A {
        let a = cpu.state.fpr(i.ra);
        let b = cpu.state.fpr(i.rb);
        let c = cpu.state.fpr(i.frc);
        let result = match i.xo {
            18 => div(cpu, a, b),
            20 => add_sub(cpu, a, b, true),
            21 => add_sub(cpu, a, b, false),
            22 => sqrt(cpu, b),
            // fsel: select FRC when FRA >= 0
            23 => {
                if a >= 0.0 {
                    c
                } else {
                    b
                }
            }
            // fre
            24 => div(cpu, 1.0, b),
            25 => mul(cpu, a, c),
            // frsqrte
            26 => {
                let root = sqrt(cpu, b);
                1.0 / root
            }
            28 => madd(cpu, a, c, b, true, false),
            29 => madd(cpu, a, c, b, false, false),
            30 => madd(cpu, a, c, b, true, true),
            31 => madd(cpu, a, c, b, false, true),
            xo => return Err(unsupported(63, xo)),
        };
        cpu.state.set_fpr(i.rt, result);
        if i.rc {
            cpu.state.update_cr1();
        }
        return Ok(());
    }

    match i.xo {
        // fcmpu
        0 => {
            let a = cpu.state.fpr(i.ra);
            let b = cpu.state.fpr(i.rb);
            fp_compare(cpu, i.rt >> 2, a, b);
        }
        // fcmpo: an unordered comparison is a program-class FP exception
        32 => {
            let a = cpu.state.fpr(i.ra);
            let b = cpu.state.fpr(i.rb);
            fp_compare(cpu, i.rt >> 2, a, b);
            if a.is_nan() || b.is_nan() {
                return Err(Exception::Program(ProgramCause::FpCompare));
            }
        }
        // frsp
        12 => {
            let value = cpu.state.fpr(i.rb);
            let rounded = round_single(value);
            flag_result(cpu, rounded, rounded != value);
            cpu.state.set_fpr(i.rt, rounded);
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // fctiw / fctiwz
        14 | 15 => {
            let value = cpu.state.fpr(i.rb);
            let int = convert_to_word(cpu, value, i.xo == 14);
            cpu.state.set_fpr_bits(i.rt, int as u64);
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // mtfsb1
        38 => {
            let mask = Fpscr::from_bits_retain(0x8000_0000u32 >> i.rt);
            cpu.state.fpscr |= mask;
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // fneg
        40 => {
            cpu.state.set_fpr(i.rt, -cpu.state.fpr(i.rb));
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // mtfsb0
        70 => {
            let mask = Fpscr::from_bits_retain(0x8000_0000u32 >> i.rt);
            cpu.state.fpscr &= !mask;
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // fmr
        72 => {
            let bits = cpu.state.fpr_bits(i.rb);
            cpu.state.set_fpr_bits(i.rt, bits);
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // mtfsfi
        134 => {
            let bf = (i.rt >> 2) as u32;
            let imm = ((i.raw >> 12) & 0xF) as u32;
            let shift = 28 - bf * 4;
            let bits = (cpu.state.fpscr.bits() & !(0xF << shift)) | (imm << shift);
            cpu.state.fpscr = Fpscr::from_bits_retain(bits);
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // fnabs
        136 => {
            cpu.state.set_fpr(i.rt, -cpu.state.fpr(i.rb).abs());
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // fabs
        264 => {
            cpu.state.set_fpr(i.rt, cpu.state.fpr(i.rb).abs());
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // mffs: FPSCR into the low word of FRT
        583 => {
            cpu.state.set_fpr_bits(i.rt, cpu.state.fpscr.bits() as u64);
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // mtfsf
        711 => {
            let fm = ((i.raw >> 17) & 0xFF) as u32;
            let source = cpu.state.fpr_bits(i.rb) as u32;
            let mut bits = cpu.state.fpscr.bits();
            for field in 0..8 {
                if fm & (0x80 >> field) != 0 {
                    let shift = 28 - field * 4;
                    bits = (bits & !(0xF << shift)) | (source & (0xF << shift));
                }
            }
            cpu.state.fpscr = Fpscr::from_bits_retain(bits);
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // fctid / fctidz
        814 | 815 => {
            let value = cpu.state.fpr(i.rb);
            let int = convert_to_doubleword(cpu, value, i.xo == 814);
            cpu.state.set_fpr_bits(i.rt, int);
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // fcfid
        846 => {
            let bits = cpu.state.fpr_bits(i.rb);
            let result = bits as i64 as f64;
            flag_result(cpu, result, result as i64 != bits as i64);
            cpu.state.set_fpr(i.rt, result);
            if i.rc {
                cpu.state.update_cr1();
            }
        }
        // stfiwx
        983 => {
            let bits = cpu.state.fpr_bits(i.rt) as u32;
            cpu.write_data32(ea_x(cpu, i), bits)?;
        }
        xo => return Err(unsupported(63, xo)),
    }
    Ok(())
}

fn fp_compare(cpu: &mut Interpreter, bf: u8, a: f64, b: f64) {
    let field = if a.is_nan() || b.is_nan() {
        cpu.state.raise_fpscr(Fpscr::VXSNAN);
        0b0001
    } else if a < b {
        0b1000
    } else if a > b {
        0b0100
    } else {
        0b0010
    };
    cpu.state.set_cr_field(bf, field);
}

fn convert_to_word(cpu: &mut Interpreter, value: f64, round: bool) -> u32 {
    if value.is_nan() {
        cpu.state.raise_fpscr(Fpscr::VXCVI);
        return 0x8000_0000;
    }
    let rounded = if round {
        value.round_ties_even()
    } else {
        value.trunc()
    };
    if rounded > i32::MAX as f64 {
        cpu.state.raise_fpscr(Fpscr::VXCVI);
        0x7FFF_FFFF
    } else if rounded < i32::MIN as f64 {
        cpu.state.raise_fpscr(Fpscr::VXCVI);
        0x8000_0000
    } else {
        if rounded != value {
            cpu.state.raise_fpscr(Fpscr::XX);
        }
        rounded as i32 as u32
    }
}

fn convert_to_doubleword(cpu: &mut Interpreter, value: f64, round: bool) -> u64 {
    if value.is_nan() {
        cpu.state.raise_fpscr(Fpscr::VXCVI);
        return 0x8000_0000_0000_0000;
    }
    let rounded = if round {
        value.round_ties_even()
    } else {
        value.trunc()
    };
    if rounded >= i64::MAX as f64 {
        cpu.state.raise_fpscr(Fpscr::VXCVI);
        0x7FFF_FFFF_FFFF_FFFF
    } else if rounded < i64::MIN as f64 {
        cpu.state.raise_fpscr(Fpscr::VXCVI);
        0x8000_0000_0000_0000
    } else {
        if rounded != value {
            cpu.state.raise_fpscr(Fpscr::XX);
        }
        rounded as i64 as u64
    }
}
