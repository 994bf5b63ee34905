use crate::error::ParseErrorKind;
use crate::operand::{MemRef, Operand};
use crate::state::Flags;
use crate::symbol::{RegRef, Register, Width};

/// Every instruction the engine understands, with operands already classified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// `dest = lhs <op> rhs`, sets flags at the width of `dest`.
    Alu {
        op: AluOp,
        dest: RegRef,
        lhs: RegRef,
        rhs: Source,
    },
    Mov {
        dest: RegRef,
        src: Source,
    },
    /// Sets flags from `lhs - rhs` at the width of `lhs`.
    Cmp {
        lhs: RegRef,
        rhs: Source,
    },
    Load {
        size: AccessSize,
        dest: RegRef,
        addr: MemRef,
    },
    Store {
        size: AccessSize,
        src: RegRef,
        addr: MemRef,
    },
    Branch {
        cond: Cond,
        target: String,
    },
    Nop,
    Ret,
    /// Well-formed line with a mnemonic the engine does not execute.
    Unimplemented,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Eor,
    Mul,
}

impl AluOp {
    /// Result before truncation. Inputs are at most 64 bits wide, so only `Mul` can wrap,
    /// and only above bit 127.
    pub fn apply(self, lhs: i128, rhs: i128) -> i128 {
        match self {
            AluOp::Add => lhs + rhs,
            AluOp::Sub => lhs - rhs,
            AluOp::And => lhs & rhs,
            AluOp::Eor => lhs ^ rhs,
            AluOp::Mul => lhs.wrapping_mul(rhs),
        }
    }
}

/// Second operand of arithmetic, `MOV` and `CMP`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Reg(RegRef),
    Imm(i64),
}

/// Branch condition.
///
/// Only N and Z are tracked, so `Gt` and `Le` are approximations of the real signed
/// conditions: they ignore the overflow flag. They are still exact complements of each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    Always,
    /// `Z == 0 && N == 0`
    Gt,
    /// `Z == 1 || N == 1`
    Le,
}

impl Cond {
    pub fn holds(self, flags: Flags) -> bool {
        match self {
            Cond::Always => true,
            Cond::Gt => !flags.z && !flags.n,
            Cond::Le => flags.z || flags.n,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessSize {
    Byte,
    Doubleword,
}

impl AccessSize {
    pub fn bytes(self) -> usize {
        match self {
            AccessSize::Byte => 1,
            AccessSize::Doubleword => 8,
        }
    }
}

/// Decoding failure, optionally pointing at the operand (by index) responsible.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeError {
    pub kind: ParseErrorKind,
    pub operand: Option<usize>,
}

/// Build an [`Op`] from a mnemonic and its classified operands.
///
/// `raw` holds the operand texts, in the same order as `operands`.
pub fn decode(mnemonic: &str, operands: &[Operand], raw: &[&str]) -> Result<Op, DecodeError> {
    let upper = mnemonic.to_ascii_uppercase();
    let d = Decoder {
        mnemonic: &upper,
        operands,
        raw,
    };

    let alu = |op| -> Result<Op, DecodeError> {
        d.count(3)?;
        Ok(Op::Alu {
            op,
            dest: d.dest(0)?,
            lhs: d.reg(1)?,
            rhs: d.source(2)?,
        })
    };
    let branch = |cond| -> Result<Op, DecodeError> {
        d.count(1)?;
        Ok(Op::Branch {
            cond,
            target: d.target(0)?,
        })
    };

    match upper.as_str() {
        "ADD" => alu(AluOp::Add),
        "SUB" => alu(AluOp::Sub),
        "AND" => alu(AluOp::And),
        "EOR" => alu(AluOp::Eor),
        "MUL" => alu(AluOp::Mul),
        "MOV" => {
            d.count(2)?;
            Ok(Op::Mov {
                dest: d.dest(0)?,
                src: d.source(1)?,
            })
        }
        "CMP" => {
            d.count(2)?;
            Ok(Op::Cmp {
                lhs: d.reg(0)?,
                rhs: d.source(1)?,
            })
        }
        "LDR" | "LDRB" => {
            d.count(2)?;
            Ok(Op::Load {
                size: size_of(&upper),
                dest: d.dest(0)?,
                addr: d.mem(1)?,
            })
        }
        "STR" | "STRB" => {
            d.count(2)?;
            Ok(Op::Store {
                size: size_of(&upper),
                src: d.reg(0)?,
                addr: d.mem(1)?,
            })
        }
        "B" => branch(Cond::Always),
        "B.GT" => branch(Cond::Gt),
        "B.LE" => branch(Cond::Le),
        "NOP" => {
            d.count(0)?;
            Ok(Op::Nop)
        }
        "RET" => {
            // `RET` and `RET X30` both end the program
            if operands.len() == 1 {
                d.reg(0)?;
            } else {
                d.count(0)?;
            }
            Ok(Op::Ret)
        }
        _ => Ok(Op::Unimplemented),
    }
}

fn size_of(mnemonic: &str) -> AccessSize {
    if mnemonic.ends_with('B') {
        AccessSize::Byte
    } else {
        AccessSize::Doubleword
    }
}

struct Decoder<'a> {
    mnemonic: &'a str,
    operands: &'a [Operand],
    raw: &'a [&'a str],
}

impl Decoder<'_> {
    fn count(&self, expected: usize) -> Result<(), DecodeError> {
        if self.operands.len() != expected {
            return Err(DecodeError {
                kind: ParseErrorKind::OperandCount {
                    mnemonic: self.mnemonic.to_string(),
                    expected,
                    found: self.operands.len(),
                },
                operand: None,
            });
        }
        Ok(())
    }

    fn shape(&self, i: usize, expected: &'static str) -> DecodeError {
        DecodeError {
            kind: ParseErrorKind::OperandShape {
                mnemonic: self.mnemonic.to_string(),
                position: i + 1,
                expected,
            },
            operand: Some(i),
        }
    }

    fn reg(&self, i: usize) -> Result<RegRef, DecodeError> {
        match &self.operands[i] {
            Operand::Reg(reg) => Ok(*reg),
            // Identifier-shaped but not a register
            Operand::Label(name) => Err(DecodeError {
                kind: ParseErrorKind::UnknownRegister { name: name.clone() },
                operand: Some(i),
            }),
            _ => Err(self.shape(i, "a register")),
        }
    }

    fn dest(&self, i: usize) -> Result<RegRef, DecodeError> {
        let reg = self.reg(i)?;
        if reg.reg == Register::Pc {
            return Err(self.shape(i, "a writable register"));
        }
        Ok(reg)
    }

    fn source(&self, i: usize) -> Result<Source, DecodeError> {
        match &self.operands[i] {
            Operand::Imm(imm) => Ok(Source::Imm(*imm)),
            Operand::Mem(_) => Err(self.shape(i, "a register or an immediate")),
            _ => self.reg(i).map(Source::Reg),
        }
    }

    fn mem(&self, i: usize) -> Result<MemRef, DecodeError> {
        match &self.operands[i] {
            Operand::Mem(mem)
                if mem.base.width == Width::W64 && mem.base.reg != Register::Pc =>
            {
                Ok(*mem)
            }
            _ => Err(self.shape(
                i,
                "a memory reference with an X-form or SP base, eg. `[SP, #8]`",
            )),
        }
    }

    /// Branch targets are taken verbatim, so a label may share a name with a register.
    fn target(&self, i: usize) -> Result<String, DecodeError> {
        match &self.operands[i] {
            Operand::Label(_) | Operand::Reg(_) => Ok(self.raw[i].to_string()),
            _ => Err(self.shape(i, "a label")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::parse_operand;

    fn decode_str(line: &str) -> Result<Op, DecodeError> {
        let (mnemonic, rest) = line.split_once(' ').unwrap_or((line, ""));
        let raw: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(';').map(str::trim).collect()
        };
        let operands: Vec<Operand> = raw.iter().map(|t| parse_operand(t).unwrap()).collect();
        decode(mnemonic, &operands, &raw)
    }

    #[test]
    fn decode_arithmetic() {
        assert_eq!(
            decode_str("add X2; X0; X1"),
            Ok(Op::Alu {
                op: AluOp::Add,
                dest: RegRef::x(2),
                lhs: RegRef::x(0),
                rhs: Source::Reg(RegRef::x(1)),
            })
        );
        assert_eq!(
            decode_str("SUB W0; W0; #1"),
            Ok(Op::Alu {
                op: AluOp::Sub,
                dest: RegRef::w(0),
                lhs: RegRef::w(0),
                rhs: Source::Imm(1),
            })
        );
    }

    #[test]
    fn decode_memory_and_branches() {
        assert_eq!(
            decode_str("STRB W1; [SP, #3]"),
            Ok(Op::Store {
                size: AccessSize::Byte,
                src: RegRef::w(1),
                addr: MemRef {
                    base: RegRef::sp(),
                    offset: 3
                },
            })
        );
        assert_eq!(
            decode_str("B.GT loop"),
            Ok(Op::Branch {
                cond: Cond::Gt,
                target: "loop".into()
            })
        );
        assert_eq!(decode_str("RET"), Ok(Op::Ret));
        assert_eq!(decode_str("RET X30"), Ok(Op::Ret));
        assert_eq!(decode_str("nop"), Ok(Op::Nop));
        assert_eq!(decode_str("SVC #0"), Ok(Op::Unimplemented));
    }

    #[test]
    fn decode_errors() {
        let err = decode_str("MOV X0").unwrap_err();
        assert!(matches!(
            err.kind,
            ParseErrorKind::OperandCount {
                expected: 2,
                found: 1,
                ..
            }
        ));
        assert_eq!(decode_str("ADD #1; X0; X1").unwrap_err().operand, Some(0));
        assert!(matches!(
            decode_str("ADD X32; X0; X1").unwrap_err().kind,
            ParseErrorKind::UnknownRegister { .. }
        ));
        assert!(decode_str("MOV PC; #4").is_err());
        assert!(decode_str("LDR X0; [W1, #0]").is_err());
        assert!(decode_str("LDR X0; X1").is_err());
        assert!(decode_str("B #8").is_err());
        assert!(decode_str("MOV X0; [SP]").is_err());
    }

    #[test]
    fn conditions_are_complements() {
        for n in [false, true] {
            for z in [false, true] {
                let flags = Flags { n, z };
                assert_ne!(Cond::Gt.holds(flags), Cond::Le.holds(flags));
                assert!(Cond::Always.holds(flags));
            }
        }
        assert!(Cond::Gt.holds(Flags { n: false, z: false }));
        assert!(Cond::Le.holds(Flags { n: false, z: true }));
    }
}
