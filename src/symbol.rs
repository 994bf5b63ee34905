use std::fmt;
use std::str::FromStr;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

/// Insertion-ordered map, used for the label table.
pub type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Label table of label -> instruction address.
pub type LabelTable = FxMap<String, u64>;

/// Number of general-purpose registers (X0 to X30).
pub const GP_REGISTERS: usize = 31;

/// Architectural register, independent of the width it is accessed at.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Register {
    /// General-purpose register, index 0..=30.
    X(u8),
    /// Always reads 0, writes are discarded.
    Zr,
    /// Stack pointer.
    Sp,
    /// Program counter. Readable, only the engine may write it.
    Pc,
}

/// Access width, chosen by the register form (`X` or `W`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Width {
    W32,
    W64,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Width::W32 => 32,
            Width::W64 => 64,
        }
    }

    pub fn mask(self) -> u64 {
        match self {
            Width::W32 => 0xFFFF_FFFF,
            Width::W64 => u64::MAX,
        }
    }
}

/// A register operand: which register, and at which width.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RegRef {
    pub reg: Register,
    pub width: Width,
}

impl RegRef {
    pub const fn x(n: u8) -> Self {
        RegRef {
            reg: Register::X(n),
            width: Width::W64,
        }
    }

    pub const fn w(n: u8) -> Self {
        RegRef {
            reg: Register::X(n),
            width: Width::W32,
        }
    }

    pub const fn sp() -> Self {
        RegRef {
            reg: Register::Sp,
            width: Width::W64,
        }
    }

    pub const fn xzr() -> Self {
        RegRef {
            reg: Register::Zr,
            width: Width::W64,
        }
    }
}

impl FromStr for RegRef {
    type Err = ();

    /// Case-insensitive. Accepts `X0`-`X30`, `W0`-`W30`, `XZR`, `WZR`, `SP`, `WSP` and `PC`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let (reg, width) = match upper.as_str() {
            "XZR" => (Register::Zr, Width::W64),
            "WZR" => (Register::Zr, Width::W32),
            "SP" => (Register::Sp, Width::W64),
            "WSP" => (Register::Sp, Width::W32),
            "PC" => (Register::Pc, Width::W64),
            _ => {
                let width = match upper.as_bytes().first() {
                    Some(b'X') => Width::W64,
                    Some(b'W') => Width::W32,
                    _ => return Err(()),
                };
                let digits = &upper[1..];
                // Reject signs, leading zeros and empty indices
                if digits.is_empty()
                    || !digits.bytes().all(|b| b.is_ascii_digit())
                    || (digits.len() > 1 && digits.starts_with('0'))
                {
                    return Err(());
                }
                let index: u8 = digits.parse().map_err(|_| ())?;
                if index as usize >= GP_REGISTERS {
                    return Err(());
                }
                (Register::X(index), width)
            }
        };
        Ok(RegRef { reg, width })
    }
}

impl fmt::Display for RegRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.reg, self.width) {
            (Register::X(n), Width::W64) => write!(f, "X{n}"),
            (Register::X(n), Width::W32) => write!(f, "W{n}"),
            (Register::Zr, Width::W64) => write!(f, "XZR"),
            (Register::Zr, Width::W32) => write!(f, "WZR"),
            (Register::Sp, Width::W64) => write!(f, "SP"),
            (Register::Sp, Width::W32) => write!(f, "WSP"),
            (Register::Pc, _) => write!(f, "PC"),
        }
    }
}

/// Returns `true` if the given character can appear at the start of a label.
pub fn can_start_label(ch: char) -> bool {
    matches!(ch, 'a'..='z' | 'A'..='Z' | '_' | '.')
}

/// Returns `true` if the given character can appear as a subsequent character of a label.
pub fn can_contain_label(ch: char) -> bool {
    matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.' | '$')
}

pub fn is_label(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(can_start_label) && chars.all(can_contain_label)
}
