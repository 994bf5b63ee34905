use std::cell::RefCell;
use std::fmt::Write as _;
use std::str::Chars;

use colored::Colorize;

use crate::operand::{parse_operand, Operand};
use crate::program::Program;
use crate::runtime::{Emulator, FaultReport, TraceEntry};
use crate::state::RegisterFile;
use crate::symbol::GP_REGISTERS;

/// Renders read-only views of emulator state for the terminal.
///
/// Everything is built as a string first, so it can be tested and so `--minimal` can strip
/// colour in one place.
#[derive(Clone, Copy, Debug)]
pub struct Output;

struct Decolored<'a> {
    chars: Chars<'a>,
}

impl Output {
    thread_local! {
        static IS_MINIMAL: RefCell<bool> = const { RefCell::new(false) };
    }

    pub fn set_minimal(new_value: bool) -> bool {
        Self::IS_MINIMAL.with(|value| value.replace(new_value))
    }
    pub fn is_minimal() -> bool {
        Self::IS_MINIMAL.with(|value| *value.borrow())
    }

    pub fn print_str(string: &str) {
        if Self::is_minimal() {
            print!("{}", Decolored::new(string).collect::<String>());
        } else {
            print!("{}", string);
        }
    }

    pub fn print_registers(regs: &RegisterFile) {
        Self::print_str(&registers(regs, Self::is_minimal()));
    }

    pub fn print_stack(emu: &Emulator) {
        Self::print_str(&stack(emu, Self::is_minimal()));
    }

    pub fn print_listing(program: &Program) {
        Self::print_str(&listing(program));
    }

    pub fn print_trace(trace: &[TraceEntry]) {
        Self::print_str(&self::trace(trace));
    }

    pub fn print_fault(report: &FaultReport) {
        Self::print_str(&fault(report));
    }
}

pub fn registers(regs: &RegisterFile, minimal: bool) -> String {
    let mut out = String::new();
    if minimal {
        for i in 0..GP_REGISTERS {
            let _ = writeln!(out, "X{} 0x{:016x}", i, regs.x(i));
        }
        let _ = writeln!(out, "SP 0x{:016x}", regs.sp());
        let _ = writeln!(out, "PC 0x{:016x}", regs.pc());
        let flags = regs.flags();
        let _ = writeln!(out, "NZ {}{}", flags.n as u8, flags.z as u8);
        return out;
    }

    let rule = "─".repeat(74);
    let _ = writeln!(out, "\x1b[2m┌{rule}┐\x1b[0m");
    // Three columns: X0-X9, X10-X19, X20-X29
    for row in 0..10 {
        out.push_str("\x1b[2m│\x1b[0m");
        for col in 0..3 {
            let i = row + col * 10;
            let _ = write!(out, " \x1b[1m{:<4}\x1b[0m0x{:016x}  ", format!("X{i}"), regs.x(i));
        }
        out.push_str("\x1b[2m│\x1b[0m\n");
    }
    out.push_str("\x1b[2m│\x1b[0m");
    let _ = write!(out, " \x1b[1m{:<4}\x1b[0m0x{:016x}  ", "X30", regs.x(30));
    let _ = write!(out, " \x1b[1m{:<4}\x1b[0m0x{:016x}  ", "SP", regs.sp());
    let _ = write!(out, " \x1b[1m{:<4}\x1b[0m0x{:016x}  ", "PC", regs.pc());
    out.push_str("\x1b[2m│\x1b[0m\n");
    let flags = regs.flags();
    out.push_str("\x1b[2m│\x1b[0m");
    let _ = write!(
        out,
        " \x1b[1mN\x1b[0m {}   \x1b[1mZ\x1b[0m {}{:64}",
        flags.n as u8, flags.z as u8, ""
    );
    out.push_str("\x1b[2m│\x1b[0m\n");
    let _ = writeln!(out, "\x1b[2m└{rule}┘\x1b[0m");
    out
}

pub fn stack(emu: &Emulator, minimal: bool) -> String {
    let mut out = String::new();
    let sp = emu.registers().sp();
    for row in emu.stack().hexdump() {
        let holds_sp = (row.addr..row.addr + row.bytes.len() as u64).contains(&sp);
        if holds_sp && !minimal {
            let _ = writeln!(out, "{}  {}", row, "<- SP".cyan());
        } else {
            let _ = writeln!(out, "{}", row);
        }
    }
    out
}

/// Loaded instructions with their operands, followed by the label table.
pub fn listing(program: &Program) -> String {
    let mut out = String::new();
    for instr in program.instructions() {
        let _ = writeln!(
            out,
            "{}  {}",
            format!("0x{:08x}", instr.addr).bold(),
            instr.text
        );
        for (i, operand) in instr.operands.iter().enumerate() {
            let _ = write!(out, "{:12}operand {}: {}", "", i + 1, operand);
            if let Ok(Operand::Mem(mem)) = parse_operand(operand) {
                let sign = if mem.offset < 0 { "-" } else { "+" };
                let _ = write!(
                    out,
                    " --> {} {} 0x{:x}",
                    mem.base,
                    sign,
                    mem.offset.unsigned_abs()
                );
            }
            out.push('\n');
        }
    }
    if !program.labels().is_empty() {
        let _ = writeln!(out, "\n{}", "Labels".bold());
        for (label, addr) in program.labels() {
            let _ = writeln!(out, "  {} -> 0x{:08x}", label, addr);
        }
    }
    out
}

pub fn trace(trace: &[TraceEntry]) -> String {
    let mut out = String::new();
    for entry in trace {
        let _ = writeln!(out, "{:08x}: {}", entry.addr, entry.text);
    }
    out
}

pub fn fault(report: &FaultReport) -> String {
    let location = if report.text.is_empty() {
        format!("at 0x{:08x}", report.addr)
    } else {
        format!("at 0x{:08x} `{}`", report.addr, report.text)
    };
    format!("{} {}\n", report.fault.to_string().red(), location)
}

impl<'a> Decolored<'a> {
    pub fn new(string: &'a str) -> Self {
        Self {
            chars: string.chars(),
        }
    }
}

impl Iterator for Decolored<'_> {
    type Item = char;
    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ch) = self.chars.next() {
            // Skip everything between '\x1b' and 'm' (inclusive)
            if ch == '\x1b' {
                while self.chars.next().is_some_and(|ch| ch != 'm') {}
                continue;
            }
            return Some(ch);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn run(src: &str) -> Emulator {
        let config = Config {
            stack_size: 32,
            trace: true,
            ..Config::default()
        };
        let mut emu = Emulator::new(Program::load(src, &config).unwrap(), &config);
        emu.run();
        emu
    }

    #[test]
    fn decolored() {
        assert_eq!(Decolored::new("abcdef").collect::<String>(), "abcdef");
        assert_eq!(
            Decolored::new("abc\x1b[0;2mdef\x1b[0m").collect::<String>(),
            "abcdef"
        );
        assert_eq!(Decolored::new("abc\x1b[0xyz").collect::<String>(), "abc");
    }

    #[test]
    fn minimal_registers() {
        let emu = run("MOV X3, #0x2a\nCMP X3, #0x2a\nRET");
        let out = registers(emu.registers(), true);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 34);
        assert_eq!(lines[3], "X3 0x000000000000002a");
        assert_eq!(lines[31], "SP 0x0000000000000020");
        assert_eq!(lines[32], "PC 0x000000000000000c");
        assert_eq!(lines[33], "NZ 01");
    }

    #[test]
    fn full_registers_contain_every_register() {
        let emu = run("MOV X29, #7\nRET");
        let out: String = Decolored::new(&registers(emu.registers(), false)).collect();
        for i in 0..31 {
            assert!(out.contains(&format!("X{i} ")), "missing X{i}");
        }
        assert!(out.contains("X29 0x0000000000000007"));
        assert!(out.contains("SP  0x0000000000000020"));
    }

    #[test]
    fn stack_rows() {
        let emu = run("MOV X0, #0x41\nSTRB W0, [SP, #-1]\nRET");
        let out = stack(&emu, true);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("00000010  00 00"));
        assert!(lines[1].ends_with("|...............A|"));
    }

    #[test]
    fn listing_expands_memory_operands() {
        colored::control::set_override(false);
        let program = Program::load(
            "start: LDR X1, [SP, #0x10]\nSTR X1, [X2, #-8]\nRET",
            &Config::default(),
        )
        .unwrap();
        let out = listing(&program);
        assert!(out.contains("0x00000000  LDR X1, [SP, #0x10]"));
        assert!(out.contains("operand 2: [SP, #0x10] --> SP + 0x10"));
        assert!(out.contains("operand 2: [X2, #-8] --> X2 - 0x8"));
        assert!(out.contains("start -> 0x00000000"));
    }

    #[test]
    fn trace_lines() {
        let emu = run("NOP\nRET");
        assert_eq!(trace(emu.trace()), "00000000: NOP\n00000004: RET\n");
    }
}
