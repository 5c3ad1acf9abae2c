//! Integer arithmetic
//!
//! Registers are 64 bits wide; the word-sized operations compute their carry
//! and overflow from the 32-bit view of the operands, and Rc records CR0 from
//! the signed 32-bit result with XER[SO] mirrored in.

use crate::decoder::Instr;
use crate::exceptions::{Exception, ProgramCause};
use crate::interpreter::Interpreter;

/// Carry out of a + b + cin in 32 bits
#[inline]
fn carry32(a: u32, b: u32, cin: u32) -> bool {
    (a as u64 + b as u64 + cin as u64) >> 32 != 0
}

/// Signed overflow of a + b + cin in 32 bits
#[inline]
fn overflow32(a: u32, b: u32, cin: u32) -> bool {
    let r = a.wrapping_add(b).wrapping_add(cin);
    ((a ^ r) & (b ^ r)) & 0x8000_0000 != 0
}

/// Record CR0 from the low word of a result
#[inline]
fn record32(cpu: &mut Interpreter, value: u64) {
    cpu.state.update_cr0(value as i32 as i64);
}

/// D-form arithmetic: mulli, subfic, addic(.), addi, addis
pub fn execute_d(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let si = i.si as i64;
    match i.op {
        // mulli
        7 => {
            let a = cpu.state.gpr(i.ra) as i64;
            cpu.state.set_gpr(i.rt, a.wrapping_mul(si) as u64);
        }
        // subfic
        8 => {
            let a = cpu.state.gpr(i.ra);
            let result = (si as u64).wrapping_sub(a);
            cpu.state.set_gpr(i.rt, result);
            cpu.state
                .set_ca(carry32(!(a as u32), si as u32, 1));
        }
        // addic / addic.
        12 | 13 => {
            let a = cpu.state.gpr(i.ra);
            let result = a.wrapping_add(si as u64);
            cpu.state.set_gpr(i.rt, result);
            cpu.state.set_ca(carry32(a as u32, si as u32, 0));
            if i.op == 13 {
                record32(cpu, result);
            }
        }
        // addi
        14 => {
            let base = cpu.state.gpr_or_zero(i.ra);
            cpu.state.set_gpr(i.rt, base.wrapping_add(si as u64));
        }
        // addis
        15 => {
            let base = cpu.state.gpr_or_zero(i.ra);
            cpu.state.set_gpr(i.rt, base.wrapping_add((si << 16) as u64));
        }
        _ => {
            return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                op: i.op,
                xo: i.xo,
            }))
        }
    }
    Ok(())
}

/// XO-form arithmetic under primary 31
pub fn execute_xo(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    if i.format != crate::decoder::Format::Xo {
        return Err(Exception::Program(ProgramCause::InvalidFormat));
    }
    let a = cpu.state.gpr(i.ra);
    let b = cpu.state.gpr(i.rb);
    let a32 = a as u32;
    let b32 = b as u32;

    match i.xo {
        // subfc
        8 => {
            let result = b.wrapping_sub(a);
            cpu.state.set_gpr(i.rt, result);
            cpu.state.set_ca(carry32(!a32, b32, 1));
            if i.oe {
                cpu.state.set_ov(overflow32(!a32, b32, 1));
            }
            if i.rc {
                record32(cpu, result);
            }
        }
        // addc
        10 => {
            let result = a.wrapping_add(b);
            cpu.state.set_gpr(i.rt, result);
            cpu.state.set_ca(carry32(a32, b32, 0));
            if i.oe {
                cpu.state.set_ov(overflow32(a32, b32, 0));
            }
            if i.rc {
                record32(cpu, result);
            }
        }
        // mulhwu
        11 => {
            let product = (a32 as u64) * (b32 as u64);
            let high = (product >> 32) as u32;
            cpu.state.set_gpr(i.rt, high as i32 as i64 as u64);
            if i.rc {
                record32(cpu, high as u64);
            }
        }
        // subf
        40 => {
            let result = b.wrapping_sub(a);
            cpu.state.set_gpr(i.rt, result);
            if i.oe {
                cpu.state.set_ov(overflow32(!a32, b32, 1));
            }
            if i.rc {
                record32(cpu, result);
            }
        }
        // mulhw
        75 => {
            let product = (a32 as i32 as i64) * (b32 as i32 as i64);
            let high = (product >> 32) as u32;
            cpu.state.set_gpr(i.rt, high as i32 as i64 as u64);
            if i.rc {
                record32(cpu, high as u64);
            }
        }
        // neg
        104 => {
            let result = (a as i64).wrapping_neg() as u64;
            cpu.state.set_gpr(i.rt, result);
            if i.oe {
                cpu.state.set_ov(a32 == 0x8000_0000);
            }
            if i.rc {
                record32(cpu, result);
            }
        }
        // subfe
        136 => {
            let cin = cpu.state.xer_ca() as u32;
            let result = b
                .wrapping_add(!a)
                .wrapping_add(cin as u64);
            cpu.state.set_gpr(i.rt, result);
            cpu.state.set_ca(carry32(!a32, b32, cin));
            if i.oe {
                cpu.state.set_ov(overflow32(!a32, b32, cin));
            }
            if i.rc {
                record32(cpu, result);
            }
        }
        // adde
        138 => {
            let cin = cpu.state.xer_ca() as u32;
            let result = a.wrapping_add(b).wrapping_add(cin as u64);
            cpu.state.set_gpr(i.rt, result);
            cpu.state.set_ca(carry32(a32, b32, cin));
            if i.oe {
                cpu.state.set_ov(overflow32(a32, b32, cin));
            }
            if i.rc {
                record32(cpu, result);
            }
        }
        // subfze
        200 => {
            let cin = cpu.state.xer_ca() as u32;
            let result = (!a).wrapping_add(cin as u64);
            cpu.state.set_gpr(i.rt, result);
            cpu.state.set_ca(carry32(!a32, 0, cin));
            if i.oe {
                cpu.state.set_ov(overflow32(!a32, 0, cin));
            }
            if i.rc {
                record32(cpu, result);
            }
        }
        // addze
        202 => {
            let cin = cpu.state.xer_ca() as u32;
            let result = a.wrapping_add(cin as u64);
            cpu.state.set_gpr(i.rt, result);
            cpu.state.set_ca(carry32(a32, 0, cin));
            if i.oe {
                cpu.state.set_ov(overflow32(a32, 0, cin));
            }
            if i.rc {
                record32(cpu, result);
            }
        }
        // subfme
        232 => {
            let cin = cpu.state.xer_ca() as u32;
            let result = (!a).wrapping_add(u64::MAX).wrapping_add(cin as u64);
            cpu.state.set_gpr(i.rt, result);
            cpu.state.set_ca(carry32(!a32, 0xFFFF_FFFF, cin));
            if i.oe {
                cpu.state.set_ov(overflow32(!a32, 0xFFFF_FFFF, cin));
            }
            if i.rc {
                record32(cpu, result);
            }
        }
        // addme
        234 => {
            let cin = cpu.state.xer_ca() as u32;
            let result = a.wrapping_add(u64::MAX).wrapping_add(cin as u64);
            cpu.state.set_gpr(i.rt, result);
            cpu.state.set_ca(carry32(a32, 0xFFFF_FFFF, cin));
            if i.oe {
                cpu.state.set_ov(overflow32(a32, 0xFFFF_FFFF, cin));
            }
            if i.rc {
                record32(cpu, result);
            }
        }
        // mullw
        235 => {
            let product = (a32 as i32 as i64).wrapping_mul(b32 as i32 as i64);
            cpu.state.set_gpr(i.rt, product as u64);
            if i.oe {
                cpu.state.set_ov(product != product as i32 as i64);
            }
            if i.rc {
                record32(cpu, product as u64);
            }
        }
        // add
        266 => {
            let result = a.wrapping_add(b);
            cpu.state.set_gpr(i.rt, result);
            if i.oe {
                cpu.state.set_ov(overflow32(a32, b32, 0));
            }
            if i.rc {
                record32(cpu, result);
            }
        }
        // divwu
        459 => {
            if b32 == 0 {
                if i.oe {
                    cpu.state.set_ov(true);
                }
            } else {
                let quotient = a32 / b32;
                cpu.state.set_gpr(i.rt, quotient as u64);
                if i.oe {
                    cpu.state.set_ov(false);
                }
                if i.rc {
                    record32(cpu, quotient as u64);
                }
            }
        }
        // divw
        491 => {
            let sa = a32 as i32;
            let sb = b32 as i32;
            if sb == 0 || (sa == i32::MIN && sb == -1) {
                if i.oe {
                    cpu.state.set_ov(true);
                }
            } else {
                let quotient = sa / sb;
                cpu.state.set_gpr(i.rt, quotient as i64 as u64);
                if i.oe {
                    cpu.state.set_ov(false);
                }
                if i.rc {
                    record32(cpu, quotient as u32 as u64);
                }
            }
        }
        // 64-bit multiply high variants
        9 | 73 => {
            let product = ((a as i128) * (b as i128)) >> 64;
            let high = if i.xo == 9 {
                (((a as u128) * (b as u128)) >> 64) as u64
            } else {
                product as u64
            };
            cpu.state.set_gpr(i.rt, high);
            if i.rc {
                cpu.state.update_cr0(high as i64);
            }
        }
        // divdu / divd
        457 | 489 => {
            if b == 0 || (i.xo == 489 && a as i64 == i64::MIN && b as i64 == -1) {
                if i.oe {
                    cpu.state.set_ov(true);
                }
            } else {
                let quotient = if i.xo == 457 {
                    a / b
                } else {
                    ((a as i64) / (b as i64)) as u64
                };
                cpu.state.set_gpr(i.rt, quotient);
                if i.oe {
                    cpu.state.set_ov(false);
                }
                if i.rc {
                    cpu.state.update_cr0(quotient as i64);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carry32() {
        assert!(carry32(0xFFFF_FFFF, 1, 0));
        assert!(!carry32(0x7FFF_FFFF, 1, 0));
        assert!(carry32(0xFFFF_FFFF, 0, 1));
    }

    #[test]
    fn test_overflow32() {
        assert!(overflow32(0x7FFF_FFFF, 1, 0));
        assert!(overflow32(0x8000_0000, 0x8000_0000, 0));
        assert!(!overflow32(0x7FFF_FFFF, 0xFFFF_FFFF, 0));
    }

    #[test]
    fn test_subtraction_carry_means_no_borrow() {
        // b - a with b >= a carries out
        assert!(carry32(!5u32, 7, 1));
        assert!(!carry32(!7u32, 5, 1));
    }
}
