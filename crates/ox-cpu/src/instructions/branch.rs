//! Branches, condition-register logic, compares and traps

use crate::decoder::Instr;
use crate::exceptions::{Exception, ProgramCause};
use crate::interpreter::Interpreter;
use crate::state::CpuState;

/// Evaluate the BO/BI condition. BO bit 4 skips the CR test, bit 2 skips the
/// CTR decrement-and-test; bit 3 gives the CR polarity and bit 1 selects
/// CTR == 0 versus CTR != 0.
fn branch_condition(state: &mut CpuState, bo: u8, bi: u8) -> bool {
    let ctr_ok = if bo & 0x04 != 0 {
        true
    } else {
        state.ctr = state.ctr.wrapping_sub(1);
        (state.ctr != 0) != (bo & 0x02 != 0)
    };
    let cond_ok = if bo & 0x10 != 0 {
        true
    } else {
        state.cr_bit(bi) == (bo & 0x08 != 0)
    };
    ctr_ok && cond_ok
}

/// b / bl / ba / bla
pub fn b(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    if i.format != crate::decoder::Format::I {
        return Err(Exception::Program(ProgramCause::InvalidFormat));
    }
    let pc = cpu.state.pc;
    if i.lk {
        cpu.state.lr = pc.wrapping_add(4);
    }
    cpu.state.pc = if i.aa {
        i.li as i64 as u64
    } else {
        pc.wrapping_add(i.li as i64 as u64)
    };
    Ok(())
}

/// bc / bcl / bca / bcla
pub fn bc(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    if i.format != crate::decoder::Format::B {
        return Err(Exception::Program(ProgramCause::InvalidFormat));
    }
    let pc = cpu.state.pc;
    if i.lk {
        cpu.state.lr = pc.wrapping_add(4);
    }
    if branch_condition(&mut cpu.state, i.rt, i.ra) {
        cpu.state.pc = if i.aa {
            i.bd as i64 as u64
        } else {
            pc.wrapping_add(i.bd as i64 as u64)
        };
    }
    Ok(())
}

/// sc: the fetch loop delivers the vectored transfer
pub fn sc(_cpu: &mut Interpreter, _i: &Instr) -> Result<(), Exception> {
    Err(Exception::SystemCall)
}

/// XL-form under primary 19: indirect branches, CR bit ops, rfi, isync
pub fn execute_xl(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    match i.xo {
        // mcrf
        0 => {
            let value = cpu.state.cr_field(i.ra >> 2);
            cpu.state.set_cr_field(i.rt >> 2, value);
        }
        // bclr / bclrl
        16 => {
            let target = cpu.state.lr & !3;
            let pc = cpu.state.pc;
            if i.lk {
                cpu.state.lr = pc.wrapping_add(4);
            }
            if branch_condition(&mut cpu.state, i.rt, i.ra) {
                cpu.state.pc = target;
            }
        }
        // bcctr / bcctrl
        528 => {
            let target = cpu.state.ctr & !3;
            let pc = cpu.state.pc;
            if i.lk {
                cpu.state.lr = pc.wrapping_add(4);
            }
            if branch_condition(&mut cpu.state, i.rt, i.ra) {
                cpu.state.pc = target;
            }
        }
        // rfi
        50 => crate::instructions::system::rfi(cpu),
        // isync
        150 => {}
        // CR bit operations: BT = rt, BA = ra, BB = rb
        33 | 129 | 193 | 225 | 257 | 289 | 417 | 449 => {
            let a = cpu.state.cr_bit(i.ra);
            let b = cpu.state.cr_bit(i.rb);
            let result = match i.xo {
                33 => !(a | b),
                129 => a & !b,
                193 => a ^ b,
                225 => !(a & b),
                257 => a & b,
                289 => a == b,
                417 => a | !b,
                449 => a | b,
                _ => unreachable!(),
            };
            cpu.state.set_cr_bit(i.rt, result);
        }
        xo => {
            return Err(Exception::Program(ProgramCause::UnsupportedOpcode {
                op: 19,
                xo,
            }))
        }
    }
    Ok(())
}

fn compare_and_record(state: &mut CpuState, bf: u8, lt: bool, gt: bool) {
    let mut field = if lt {
        0b1000
    } else if gt {
        0b0100
    } else {
        0b0010
    };
    if state.xer_so() {
        field |= 1;
    }
    state.set_cr_field(bf, field);
}

/// cmpi
pub fn cmpi(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let bf = i.rt >> 2;
    let wide = i.rt & 1 != 0;
    let a = cpu.state.gpr(i.ra);
    let (lt, gt) = if wide {
        ((a as i64) < i.si as i64, (a as i64) > i.si as i64)
    } else {
        ((a as i32) < i.si, (a as i32) > i.si)
    };
    compare_and_record(&mut cpu.state, bf, lt, gt);
    Ok(())
}

/// cmpli: the immediate is zero-extended
pub fn cmpli(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let bf = i.rt >> 2;
    let wide = i.rt & 1 != 0;
    let a = cpu.state.gpr(i.ra);
    let b = i.ui as u64;
    let (lt, gt) = if wide {
        (a < b, a > b)
    } else {
        ((a as u32) < b as u32, (a as u32) > b as u32)
    };
    compare_and_record(&mut cpu.state, bf, lt, gt);
    Ok(())
}

/// cmp
pub fn cmp(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let bf = i.rt >> 2;
    let wide = i.rt & 1 != 0;
    let a = cpu.state.gpr(i.ra);
    let b = cpu.state.gpr(i.rb);
    let (lt, gt) = if wide {
        ((a as i64) < b as i64, (a as i64) > b as i64)
    } else {
        ((a as i32) < b as i32, (a as i32) > b as i32)
    };
    compare_and_record(&mut cpu.state, bf, lt, gt);
    Ok(())
}

/// cmpl
pub fn cmpl(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let bf = i.rt >> 2;
    let wide = i.rt & 1 != 0;
    let a = cpu.state.gpr(i.ra);
    let b = cpu.state.gpr(i.rb);
    let (lt, gt) = if wide {
        (a < b, a > b)
    } else {
        ((a as u32) < b as u32, (a as u32) > b as u32)
    };
    compare_and_record(&mut cpu.state, bf, lt, gt);
    Ok(())
}

/// TO-mask evaluation shared by the trap instructions
fn trap_condition(to: u8, a: i64, b: i64) -> bool {
    (to & 0x10 != 0 && a < b)
        || (to & 0x08 != 0 && a > b)
        || (to & 0x04 != 0 && a == b)
        || (to & 0x02 != 0 && (a as u64) < b as u64)
        || (to & 0x01 != 0 && (a as u64) > b as u64)
}

/// tw
pub fn tw(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let a = cpu.state.gpr(i.ra) as i32 as i64;
    let b = cpu.state.gpr(i.rb) as i32 as i64;
    if trap_condition(i.rt, a, b) {
        return Err(Exception::Program(ProgramCause::Trap));
    }
    Ok(())
}

/// twi
pub fn twi(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let a = cpu.state.gpr(i.ra) as i32 as i64;
    if trap_condition(i.rt, a, i.si as i64) {
        return Err(Exception::Program(ProgramCause::Trap));
    }
    Ok(())
}

/// tdi: the doubleword trap compares the full register
pub fn tdi(cpu: &mut Interpreter, i: &Instr) -> Result<(), Exception> {
    let a = cpu.state.gpr(i.ra) as i64;
    if trap_condition(i.rt, a, i.si as i64) {
        return Err(Exception::Program(ProgramCause::Trap));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ox_core::config::CpuConfig;
    use ox_memory::{Bus, Ram};

    fn cpu() -> Interpreter {
        Interpreter::new(
            Bus::new(Ram::new(0x10000).unwrap()),
            &CpuConfig::default(),
        )
    }

    #[test]
    fn test_branch_always() {
        let mut state = CpuState::new();
        // BO = 0b10100: no CR test, no CTR test
        assert!(branch_condition(&mut state, 0b10100, 0));
    }

    #[test]
    fn test_branch_decrement_both_conditions() {
        let mut state = CpuState::new();
        state.ctr = 2;
        // BO = 0: decrement, branch if CTR != 0 and CR bit clear
        assert!(branch_condition(&mut state, 0, 0));
        assert_eq!(state.ctr, 1);
        // CR bit set now blocks the branch
        state.set_cr_bit(0, true);
        assert!(!branch_condition(&mut state, 0, 0));
        assert_eq!(state.ctr, 0);
    }

    #[test]
    fn test_bdnz_loops_until_zero() {
        let mut state = CpuState::new();
        state.ctr = 3;
        // BO = 0b10000: decrement, branch while CTR != 0, ignore CR
        let mut taken = 0;
        while branch_condition(&mut state, 0b10000, 0) {
            taken += 1;
        }
        assert_eq!(taken, 2);
        assert_eq!(state.ctr, 0);
    }

    #[test]
    fn test_trap_condition_masks() {
        assert!(trap_condition(0x10, -1, 0)); // lt
        assert!(trap_condition(0x08, 1, 0)); // gt
        assert!(trap_condition(0x04, 5, 5)); // eq
        assert!(trap_condition(0x02, 1, -1)); // ltu: 1 < 0xFFFF...
        assert!(trap_condition(0x01, -1, 1)); // gtu
        assert!(!trap_condition(0, -1, 1));
    }

    #[test]
    fn test_cmpi_records_eq_and_so() {
        let mut cpu = cpu();
        cpu.state.set_gpr(3, 0);
        let i = crate::decoder::decode((11u32 << 26) | (3 << 16)).unwrap();
        cmpi(&mut cpu, &i).unwrap();
        assert_eq!(cpu.state.cr_field(0), 0b0010);
        cpu.state.set_ov(true);
        cmpi(&mut cpu, &i).unwrap();
        assert_eq!(cpu.state.cr_field(0), 0b0011);
    }

    #[test]
    fn test_cr_bit_ops() {
        let mut cpu = cpu();
        cpu.state.set_cr_bit(4, true);
        cpu.state.set_cr_bit(5, false);
        // crand 0, 4, 5
        let raw = (19u32 << 26) | (0 << 21) | (4 << 16) | (5 << 11) | (257 << 1);
        let i = crate::decoder::decode(raw).unwrap();
        execute_xl(&mut cpu, &i).unwrap();
        assert!(!cpu.state.cr_bit(0));
        // cror 0, 4, 5
        let raw = (19u32 << 26) | (0 << 21) | (4 << 16) | (5 << 11) | (449 << 1);
        let i = crate::decoder::decode(raw).unwrap();
        execute_xl(&mut cpu, &i).unwrap();
        assert!(cpu.state.cr_bit(0));
    }
}
