use std::ops::Range;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ParseErrorKind;
use crate::symbol::{is_label, RegRef};

lazy_static! {
    static ref MNEMONIC: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9]*(\.[A-Za-z0-9]+)?$").unwrap();
    static ref IMMEDIATE: Regex =
        Regex::new(r"^([+-])?(?:0[xX]([0-9a-fA-F]+)|0[bB]([01]+)|([0-9]+))$").unwrap();
}

/// A piece of a line, with its byte range relative to the start of that line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub range: Range<usize>,
}

/// Instruction text split into mnemonic and operand tokens, not yet classified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitLine<'a> {
    pub mnemonic: Token<'a>,
    pub operands: Vec<Token<'a>>,
}

/// Parse failure located within a line.
#[derive(Clone, Debug, PartialEq)]
pub struct LineError {
    pub kind: ParseErrorKind,
    pub range: Range<usize>,
}

/// A classified operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(RegRef),
    Imm(i64),
    Mem(MemRef),
    /// Bare identifier that is not a register name. Only valid as a branch target.
    Label(String),
}

/// `[base, #offset]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemRef {
    pub base: RegRef,
    pub offset: i64,
}

impl Operand {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operand::Reg(_) => "register",
            Operand::Imm(_) => "immediate",
            Operand::Mem(_) => "memory reference",
            Operand::Label(_) => "label",
        }
    }
}

/// Split instruction text (comments and labels already removed) into mnemonic and operands.
///
/// Returns `Ok(None)` for a blank line.
pub fn split_line(line: &str) -> Result<Option<SplitLine<'_>>, LineError> {
    let start = line.len() - line.trim_start().len();
    let body = line.trim_end();
    if start >= body.len() {
        return Ok(None);
    }

    // Mnemonic ends at the first whitespace run
    let mnemonic_end = body[start..]
        .find(char::is_whitespace)
        .map_or(body.len(), |i| start + i);
    let mnemonic = Token {
        text: &body[start..mnemonic_end],
        range: start..mnemonic_end,
    };
    if !MNEMONIC.is_match(mnemonic.text) {
        return Err(LineError {
            kind: ParseErrorKind::BadMnemonic {
                mnemonic: mnemonic.text.to_string(),
            },
            range: mnemonic.range,
        });
    }

    let operands = split_operands(&body[mnemonic_end..], mnemonic_end)?;
    Ok(Some(SplitLine { mnemonic, operands }))
}

/// Split on commas that are not enclosed in square brackets, trimming each token.
///
/// `offs` is the position of `rest` within its line, used to locate tokens.
pub fn split_operands(rest: &str, offs: usize) -> Result<Vec<Token<'_>>, LineError> {
    let mut tokens = Vec::new();
    if rest.trim().is_empty() {
        return Ok(tokens);
    }

    let mut depth = 0u32;
    let mut token_start = 0;
    for (i, ch) in rest.char_indices() {
        match ch {
            '[' => {
                if depth > 0 {
                    return Err(unbalanced(rest, offs, token_start, i + 1));
                }
                depth += 1;
            }
            ']' => {
                if depth == 0 {
                    return Err(unbalanced(rest, offs, token_start, i + 1));
                }
                depth -= 1;
            }
            ',' if depth == 0 => {
                push_token(rest, offs, token_start..i, &mut tokens)?;
                token_start = i + 1;
            }
            _ => (),
        }
    }
    if depth != 0 {
        return Err(unbalanced(rest, offs, token_start, rest.len()));
    }
    push_token(rest, offs, token_start..rest.len(), &mut tokens)?;
    Ok(tokens)
}

fn push_token<'a>(
    rest: &'a str,
    offs: usize,
    span: Range<usize>,
    tokens: &mut Vec<Token<'a>>,
) -> Result<(), LineError> {
    let raw = &rest[span.clone()];
    let text = raw.trim();
    if text.is_empty() {
        return Err(LineError {
            kind: ParseErrorKind::MalformedLine,
            range: offs + span.start..offs + span.end,
        });
    }
    let start = offs + span.start + (raw.len() - raw.trim_start().len());
    tokens.push(Token {
        text,
        range: start..start + text.len(),
    });
    Ok(())
}

fn unbalanced(rest: &str, offs: usize, from: usize, to: usize) -> LineError {
    LineError {
        kind: ParseErrorKind::UnbalancedBrackets {
            operand: rest[from..to].trim().to_string(),
        },
        range: offs + from..offs + to,
    }
}

/// Classify a single trimmed operand token.
pub fn parse_operand(token: &str) -> Result<Operand, ParseErrorKind> {
    if let Some(imm) = token.strip_prefix('#') {
        // Report the whole token, marker included
        return parse_immediate(imm)
            .map(Operand::Imm)
            .map_err(|_| ParseErrorKind::BadImmediate {
                text: token.to_string(),
            });
    }
    if token.starts_with('[') || token.ends_with(']') {
        return parse_memory(token).map(Operand::Mem);
    }
    if let Ok(reg) = token.parse::<RegRef>() {
        return Ok(Operand::Reg(reg));
    }
    if is_label(token) {
        return Ok(Operand::Label(token.to_string()));
    }
    Err(ParseErrorKind::UnknownRegister {
        name: token.to_string(),
    })
}

fn parse_memory(token: &str) -> Result<MemRef, ParseErrorKind> {
    let inner = token
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| ParseErrorKind::UnbalancedBrackets {
            operand: token.to_string(),
        })?;

    let mut parts = inner.split(',').map(str::trim);
    let base = parts.next().unwrap_or_default();
    let offset = parts.next();
    if parts.next().is_some() {
        return Err(ParseErrorKind::BadMemoryOperand {
            operand: token.to_string(),
        });
    }

    let base = base
        .parse::<RegRef>()
        .map_err(|_| ParseErrorKind::UnknownRegister {
            name: base.to_string(),
        })?;
    let offset = match offset {
        Some(text) => parse_immediate(text.strip_prefix('#').unwrap_or(text))?,
        None => 0,
    };
    Ok(MemRef { base, offset })
}

/// Parse the text of an immediate, after its `#` marker.
///
/// Accepts an optional sign followed by decimal, `0x` hex or `0b` binary digits. Values up to
/// `u64::MAX` are accepted and reinterpreted as two's complement.
pub fn parse_immediate(text: &str) -> Result<i64, ParseErrorKind> {
    let bad = || ParseErrorKind::BadImmediate {
        text: text.to_string(),
    };
    let caps = IMMEDIATE.captures(text.trim()).ok_or_else(bad)?;
    let negative = caps.get(1).is_some_and(|sign| sign.as_str() == "-");

    let magnitude = if let Some(hex) = caps.get(2) {
        u64::from_str_radix(hex.as_str(), 16)
    } else if let Some(bin) = caps.get(3) {
        u64::from_str_radix(bin.as_str(), 2)
    } else {
        caps[4].parse::<u64>()
    }
    .map_err(|_| bad())?;

    if negative {
        if magnitude > 1 << 63 {
            return Err(bad());
        }
        Ok((magnitude as i64).wrapping_neg())
    } else {
        Ok(magnitude as i64)
    }
}
