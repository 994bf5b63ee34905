use std::{error::Error, fmt};

use miette::{miette, LabeledSpan, Report, Severity};

use crate::span::Span;

/// Error produced while loading a program. Loading stops at the first one.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseError {
    /// 1-based source line.
    pub line: usize,
    /// Location of the offending text within the whole source.
    pub span: Span,
    pub kind: ParseErrorKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParseErrorKind {
    MalformedLine,
    BadMnemonic {
        mnemonic: String,
    },
    UnbalancedBrackets {
        operand: String,
    },
    BadImmediate {
        text: String,
    },
    BadMemoryOperand {
        operand: String,
    },
    UnknownRegister {
        name: String,
    },
    OperandCount {
        mnemonic: String,
        expected: usize,
        found: usize,
    },
    OperandShape {
        mnemonic: String,
        position: usize,
        expected: &'static str,
    },
    BadLabel {
        label: String,
    },
    DuplicateLabel {
        label: String,
        first_line: usize,
    },
}

/// Execution-time failure. Halts the engine without applying the instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Fault {
    UnknownRegister { name: String },
    UnresolvedLabel { label: String },
    MemoryBounds { addr: u64, len: usize },
    UnimplementedInstruction { mnemonic: String },
    StepLimitExceeded { limit: u64 },
    PcOutOfBounds { pc: u64 },
    ProtectedRegister { name: String },
}

impl Error for ParseError {}
impl Error for Fault {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedLine => write!(f, "Malformed line"),
            Self::BadMnemonic { mnemonic } => write!(f, "Not a valid mnemonic: `{}`", mnemonic),
            Self::UnbalancedBrackets { operand } => {
                write!(f, "Unbalanced brackets in operand `{}`", operand)
            }
            Self::BadImmediate { text } => write!(f, "Malformed immediate `{}`", text),
            Self::BadMemoryOperand { operand } => {
                write!(f, "Malformed memory reference `{}`", operand)
            }
            Self::UnknownRegister { name } => write!(f, "Unknown register `{}`", name),
            Self::OperandCount {
                mnemonic,
                expected,
                found,
            } => write!(
                f,
                "`{}` takes {} operand(s), found {}",
                mnemonic, expected, found
            ),
            Self::OperandShape {
                mnemonic,
                position,
                expected,
            } => write!(
                f,
                "Operand {} of `{}` must be {}",
                position, mnemonic, expected
            ),
            Self::BadLabel { label } => write!(f, "Invalid label name `{}`", label),
            Self::DuplicateLabel { label, first_line } => write!(
                f,
                "Label `{}` already defined on line {}",
                label, first_line
            ),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRegister { name } => write!(f, "Unknown register `{}`", name),
            Self::UnresolvedLabel { label } => write!(f, "Branch to undefined label `{}`", label),
            Self::MemoryBounds { addr, len } => write!(
                f,
                "Access of {} byte(s) at 0x{:x} is outside stack memory",
                len, addr
            ),
            Self::UnimplementedInstruction { mnemonic } => {
                write!(f, "Instruction `{}` is not implemented", mnemonic)
            }
            Self::StepLimitExceeded { limit } => {
                write!(f, "Step limit of {} instructions exceeded", limit)
            }
            Self::PcOutOfBounds { pc } => {
                write!(f, "No instruction at PC 0x{:x}", pc)
            }
            Self::ProtectedRegister { name } => {
                write!(f, "Register `{}` cannot be written by an instruction", name)
            }
        }
    }
}

impl ParseError {
    fn code(&self) -> &'static str {
        match self.kind {
            ParseErrorKind::MalformedLine => "parse::line",
            ParseErrorKind::BadMnemonic { .. } => "parse::mnemonic",
            ParseErrorKind::UnbalancedBrackets { .. } => "parse::brackets",
            ParseErrorKind::BadImmediate { .. } => "parse::bad_imm",
            ParseErrorKind::BadMemoryOperand { .. } => "parse::memory",
            ParseErrorKind::UnknownRegister { .. } => "parse::register",
            ParseErrorKind::OperandCount { .. } => "parse::operand_count",
            ParseErrorKind::OperandShape { .. } => "parse::operand",
            ParseErrorKind::BadLabel { .. } => "parse::label",
            ParseErrorKind::DuplicateLabel { .. } => "parse::duplicate_label",
        }
    }

    fn help(&self) -> &'static str {
        match self.kind {
            ParseErrorKind::MalformedLine => "lines look like `[label:] MNEMONIC op, op, ...`",
            ParseErrorKind::BadMnemonic { .. } => "mnemonics start with a letter, eg. `ADD` or `B.GT`",
            ParseErrorKind::UnbalancedBrackets { .. } | ParseErrorKind::BadMemoryOperand { .. } => {
                "memory operands look like `[SP]` or `[X1, #8]`"
            }
            ParseErrorKind::BadImmediate { .. } => {
                "immediates are decimal or 0x-prefixed hex, eg. `#42`, `#-1` or `#0x2a`"
            }
            ParseErrorKind::UnknownRegister { .. } => {
                "available registers are X0-X30, W0-W30, XZR, WZR, SP and PC"
            }
            ParseErrorKind::OperandCount { .. } | ParseErrorKind::OperandShape { .. } => {
                "check the operands for this instruction"
            }
            ParseErrorKind::BadLabel { .. } => {
                "labels start with a letter, `_` or `.` and contain no whitespace"
            }
            ParseErrorKind::DuplicateLabel { .. } => {
                "labels may only be defined once, unless duplicates are explicitly allowed"
            }
        }
    }

    /// Render as a diagnostic pointing into `src`.
    pub fn report(&self, src: &str) -> Report {
        miette!(
            severity = Severity::Error,
            code = self.code(),
            help = self.help(),
            labels = vec![LabeledSpan::at(self.span, "here")],
            "{}",
            self.kind,
        )
        .with_source_code(src.to_string())
    }
}
