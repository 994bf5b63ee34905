use std::fmt;

use crate::error::Fault;
use crate::symbol::{RegRef, Register, Width, GP_REGISTERS};

/// Condition flags. Only N and Z are modelled; there is no carry or overflow.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Flags {
    /// Negative
    pub n: bool,
    /// Zero
    pub z: bool,
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N={} Z={}", self.n as u8, self.z as u8)
    }
}

/// CPU-visible register state: X0-X30, SP, PC and the N/Z flags.
///
/// The zero register has no storage, it reads 0 and swallows writes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RegisterFile {
    x: [u64; GP_REGISTERS],
    sp: u64,
    pc: u64,
    flags: Flags,
}

impl RegisterFile {
    pub fn new(sp: u64, zero_flag: bool) -> Self {
        RegisterFile {
            x: [0; GP_REGISTERS],
            sp,
            pc: 0,
            flags: Flags {
                n: false,
                z: zero_flag,
            },
        }
    }

    /// Read at the width of `reg`. W-form reads return the low 32 bits.
    pub fn read(&self, reg: RegRef) -> u64 {
        let value = match reg.reg {
            Register::X(n) => self.x[n as usize],
            Register::Zr => 0,
            Register::Sp => self.sp,
            Register::Pc => self.pc,
        };
        value & reg.width.mask()
    }

    /// Write at the width of `reg`. W-form writes clear the upper 32 bits.
    pub fn write(&mut self, reg: RegRef, value: u64) -> Result<(), Fault> {
        let value = value & reg.width.mask();
        match reg.reg {
            Register::X(n) => self.x[n as usize] = value,
            Register::Zr => (),
            Register::Sp => self.sp = value,
            Register::Pc => {
                return Err(Fault::ProtectedRegister {
                    name: reg.to_string(),
                })
            }
        }
        Ok(())
    }

    pub fn read_named(&self, name: &str) -> Result<u64, Fault> {
        Ok(self.read(resolve(name)?))
    }

    pub fn write_named(&mut self, name: &str, value: u64) -> Result<(), Fault> {
        self.write(resolve(name)?, value)
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Set N and Z from `result`, truncated to `width`.
    pub fn set_flags_from(&mut self, result: i128, width: Width) {
        let masked = (result as u64) & width.mask();
        self.flags = Flags {
            n: (masked >> (width.bits() - 1)) & 1 == 1,
            z: masked == 0,
        };
    }

    /// Value of X`n`, for `n` in 0..=30.
    pub fn x(&self, n: usize) -> u64 {
        self.x[n]
    }

    pub fn sp(&self) -> u64 {
        self.sp
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// Only the execution engine moves PC.
    pub(crate) fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }
}

fn resolve(name: &str) -> Result<RegRef, Fault> {
    name.parse().map_err(|_| Fault::UnknownRegister {
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_register_discards_writes() {
        let mut regs = RegisterFile::new(0, false);
        for value in [0, 1, 0xDEAD_BEEF, u64::MAX] {
            regs.write_named("XZR", value).unwrap();
            assert_eq!(regs.read_named("XZR"), Ok(0));
            regs.write_named("wzr", value).unwrap();
            assert_eq!(regs.read_named("WZR"), Ok(0));
        }
        assert!(regs.x.iter().all(|&x| x == 0));
    }

    #[test]
    fn w_writes_zero_extend() {
        let mut regs = RegisterFile::new(0, false);
        for value in [0, 0xFFFF_FFFF, 0x1234_5678_9ABC_DEF0, u64::MAX] {
            regs.write(RegRef::x(4), u64::MAX).unwrap();
            regs.write(RegRef::w(4), value).unwrap();
            assert_eq!(regs.x(4) >> 32, 0);
            assert_eq!(regs.x(4), value & 0xFFFF_FFFF);
        }
    }

    #[test]
    fn w_reads_low_half() {
        let mut regs = RegisterFile::new(0, false);
        regs.write(RegRef::x(2), 0x1111_2222_3333_4444).unwrap();
        assert_eq!(regs.read(RegRef::w(2)), 0x3333_4444);
        assert_eq!(regs.read(RegRef::x(2)), 0x1111_2222_3333_4444);
    }

    #[test]
    fn sp_and_pc() {
        let mut regs = RegisterFile::new(0x100, false);
        assert_eq!(regs.read_named("SP"), Ok(0x100));
        regs.write_named("sp", 0xF0).unwrap();
        assert_eq!(regs.sp(), 0xF0);

        regs.set_pc(8);
        assert_eq!(regs.read_named("PC"), Ok(8));
        assert!(matches!(
            regs.write_named("PC", 0),
            Err(Fault::ProtectedRegister { .. })
        ));
        assert_eq!(regs.pc(), 8);
    }

    #[test]
    fn unknown_register_names() {
        let mut regs = RegisterFile::new(0, false);
        assert!(matches!(
            regs.read_named("X31"),
            Err(Fault::UnknownRegister { .. })
        ));
        assert!(matches!(
            regs.write_named("R0", 1),
            Err(Fault::UnknownRegister { .. })
        ));
    }

    #[test]
    fn flags_use_given_width() {
        let mut regs = RegisterFile::new(0, true);
        assert_eq!(regs.flags(), Flags { n: false, z: true });

        regs.set_flags_from(-1, Width::W64);
        assert_eq!(regs.flags(), Flags { n: true, z: false });

        regs.set_flags_from(0x8000_0000, Width::W32);
        assert_eq!(regs.flags(), Flags { n: true, z: false });
        regs.set_flags_from(0x8000_0000, Width::W64);
        assert_eq!(regs.flags(), Flags { n: false, z: false });

        // Only the low 32 bits count at W32
        regs.set_flags_from(0x1_0000_0000, Width::W32);
        assert_eq!(regs.flags(), Flags { n: false, z: true });
        regs.set_flags_from(1 << 64, Width::W64);
        assert_eq!(regs.flags(), Flags { n: false, z: true });
    }

    #[test]
    fn display_flags() {
        assert_eq!(Flags { n: true, z: false }.to_string(), "N=1 Z=0");
    }
}
