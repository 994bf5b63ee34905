use std::ops::Range;

use crate::config::{Config, LabelPolicy};
use crate::error::{ParseError, ParseErrorKind};
use crate::operand::{parse_operand, split_line, LineError, Operand};
use crate::ops::{decode, Op};
use crate::span::Span;
use crate::symbol::{is_label, FxMap, LabelTable};

/// Size of every instruction, in bytes.
pub const INSTRUCTION_SIZE: u64 = 4;

/// One loaded instruction. Never changes after loading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// Byte address, `4 * index`.
    pub addr: u64,
    /// 1-based source line.
    pub line: usize,
    /// Location of `text` within the source.
    pub span: Span,
    /// Instruction text without labels, comments or surrounding whitespace.
    pub text: String,
    pub mnemonic: String,
    pub operands: Vec<String>,
    pub op: Op,
}

/// Ordered instruction list and label table, produced once by [`Program::load`].
#[derive(Clone, Debug, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: LabelTable,
}

impl Program {
    /// Load source text, failing on the first malformed construct.
    pub fn load(src: &str, config: &Config) -> Result<Program, ParseError> {
        let mut loader = Loader {
            config,
            program: Program::default(),
            label_lines: FxMap::default(),
        };
        let mut line_start = 0;
        for (i, line) in src.split('\n').enumerate() {
            loader.line(line.strip_suffix('\r').unwrap_or(line), i + 1, line_start)?;
            line_start += line.len() + 1;
        }
        Ok(loader.program)
    }

    /// Load a sequence of lines, as if joined by newlines.
    pub fn from_lines<I, S>(lines: I, config: &Config) -> Result<Program, ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let src = lines
            .into_iter()
            .map(|line| line.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        Program::load(&src, config)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Instruction at byte address `addr`, if any.
    pub fn get(&self, addr: u64) -> Option<&Instruction> {
        if addr % INSTRUCTION_SIZE != 0 {
            return None;
        }
        let index = usize::try_from(addr / INSTRUCTION_SIZE).ok()?;
        self.instructions.get(index)
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn label(&self, name: &str) -> Option<u64> {
        self.labels.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Branches whose target label is never defined, with that target.
    pub fn unresolved_labels(&self) -> impl Iterator<Item = (&Instruction, &str)> + '_ {
        self.instructions.iter().filter_map(|instr| match &instr.op {
            Op::Branch { target, .. } if !self.labels.contains_key(target) => {
                Some((instr, target.as_str()))
            }
            _ => None,
        })
    }

    /// Instructions the engine would fault on, because their mnemonic is not implemented.
    pub fn unimplemented(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.instructions
            .iter()
            .filter(|instr| instr.op == Op::Unimplemented)
    }
}

struct Loader<'a> {
    config: &'a Config,
    program: Program,
    /// Line of definition, for duplicate reporting.
    label_lines: FxMap<String, usize>,
}

impl Loader<'_> {
    fn line(&mut self, raw: &str, line: usize, line_start: usize) -> Result<(), ParseError> {
        let code = self.config.comments.strip(raw);
        let error = |kind, range: Range<usize>| ParseError {
            line,
            span: Span::within(line_start, range),
            kind,
        };

        // Leading `label:` definitions, possibly several
        let mut rest_start = 0;
        while let Some(colon) = code[rest_start..].find(':') {
            let colon = rest_start + colon;
            let raw_label = &code[rest_start..colon];
            let label = raw_label.trim();
            let label_start = rest_start + (raw_label.len() - raw_label.trim_start().len());
            let label_range = label_start..label_start + label.len();
            if !is_label(label) {
                return Err(error(
                    ParseErrorKind::BadLabel {
                        label: label.to_string(),
                    },
                    label_range,
                ));
            }
            self.define(label, line)
                .map_err(|kind| error(kind, label_range))?;
            rest_start = colon + 1;
        }

        let rest = &code[rest_start..];
        let located = |err: LineError| {
            error(
                err.kind,
                rest_start + err.range.start..rest_start + err.range.end,
            )
        };
        let Some(split) = split_line(rest).map_err(located)? else {
            return Ok(());
        };

        let mut operands = Vec::with_capacity(split.operands.len());
        for token in &split.operands {
            let operand: Operand = parse_operand(token.text).map_err(|kind| {
                located(LineError {
                    kind,
                    range: token.range.clone(),
                })
            })?;
            operands.push(operand);
        }
        let raw_operands: Vec<&str> = split.operands.iter().map(|t| t.text).collect();

        let text_range = split.mnemonic.range.start
            ..split
                .operands
                .last()
                .map_or(split.mnemonic.range.end, |t| t.range.end);

        let op = decode(split.mnemonic.text, &operands, &raw_operands).map_err(|err| {
            let range = match err.operand {
                Some(i) => split.operands[i].range.clone(),
                None => text_range.clone(),
            };
            located(LineError {
                kind: err.kind,
                range,
            })
        })?;

        let addr = self.next_addr();
        self.program.instructions.push(Instruction {
            addr,
            line,
            span: Span::within(line_start + rest_start, text_range.clone()),
            text: rest[text_range].to_string(),
            mnemonic: split.mnemonic.text.to_ascii_uppercase(),
            operands: raw_operands.iter().map(|s| s.to_string()).collect(),
            op,
        });
        Ok(())
    }

    /// Bind `label` to the address of the next instruction.
    fn define(&mut self, label: &str, line: usize) -> Result<(), ParseErrorKind> {
        if let Some(&first_line) = self.label_lines.get(label) {
            match self.config.labels {
                LabelPolicy::Reject => {
                    return Err(ParseErrorKind::DuplicateLabel {
                        label: label.to_string(),
                        first_line,
                    })
                }
                LabelPolicy::LastWins => (),
            }
        }
        let addr = self.next_addr();
        self.program.labels.insert(label.to_string(), addr);
        self.label_lines.insert(label.to_string(), line);
        Ok(())
    }

    fn next_addr(&self) -> u64 {
        self.program.instructions.len() as u64 * INSTRUCTION_SIZE
    }
}
