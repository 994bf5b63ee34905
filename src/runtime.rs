use crate::config::Config;
use crate::error::Fault;
use crate::memory::StackMemory;
use crate::operand::MemRef;
use crate::ops::{AccessSize, Op, Source};
use crate::program::{Instruction, Program, INSTRUCTION_SIZE};
use crate::state::{Flags, RegisterFile};
use crate::symbol::RegRef;

/// Where the engine is in its lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub enum Status {
    /// Loaded, PC at 0, nothing executed yet.
    Ready,
    Running,
    Halted(Halt),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Halt {
    /// Reached `RET`.
    Normal,
    Fault(FaultReport),
}

/// Why and where execution stopped abnormally.
#[derive(Clone, Debug, PartialEq)]
pub struct FaultReport {
    pub fault: Fault,
    /// Address of the faulting instruction, or the bad PC.
    pub addr: u64,
    /// Text of the faulting instruction. Empty when there was none.
    pub text: String,
}

/// One executed instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    pub addr: u64,
    pub text: String,
}

/// CPU-visible state: registers, flags and stack memory.
#[derive(Clone, Debug)]
struct Cpu {
    regs: RegisterFile,
    stack: StackMemory,
}

/// Single-threaded fetch-decode-execute engine. Owns all CPU state.
pub struct Emulator {
    program: Program,
    cpu: Cpu,
    status: Status,
    steps: u64,
    max_steps: u64,
    zero_flag_on_reset: bool,
    trace: Option<Vec<TraceEntry>>,
}

impl Emulator {
    pub fn new(program: Program, config: &Config) -> Self {
        Emulator {
            program,
            cpu: Cpu::new(config.stack_base, config.stack_size, config.zero_flag_on_reset),
            status: Status::Ready,
            steps: 0,
            max_steps: config.max_steps,
            zero_flag_on_reset: config.zero_flag_on_reset,
            trace: config.trace.then(Vec::new),
        }
    }

    /// Back to [`Status::Ready`] with zeroed registers and memory. The program is kept.
    pub fn reset(&mut self) {
        let (base, size) = (self.cpu.stack.base(), self.cpu.stack.len());
        self.cpu = Cpu::new(base, size, self.zero_flag_on_reset);
        self.status = Status::Ready;
        self.steps = 0;
        if let Some(trace) = &mut self.trace {
            trace.clear();
        }
    }

    /// Run until halted. Does nothing if already halted.
    pub fn run(&mut self) -> &Status {
        while !self.is_halted() {
            self.step();
        }
        &self.status
    }

    /// Execute a single instruction, unless halted.
    pub fn step(&mut self) -> &Status {
        if self.is_halted() {
            return &self.status;
        }
        self.status = Status::Running;

        let pc = self.cpu.regs.pc();
        let Some(instr) = self.program.get(pc) else {
            return self.fault(Fault::PcOutOfBounds { pc }, pc, String::new());
        };
        if self.steps >= self.max_steps {
            let fault = Fault::StepLimitExceeded {
                limit: self.max_steps,
            };
            let text = instr.text.clone();
            return self.fault(fault, pc, text);
        }

        self.steps += 1;
        if let Some(trace) = &mut self.trace {
            trace.push(TraceEntry {
                addr: pc,
                text: instr.text.clone(),
            });
        }

        // Branches overwrite this default advance. A `PC` source operand sees the advanced value.
        self.cpu.regs.set_pc(pc.wrapping_add(INSTRUCTION_SIZE));
        match self.cpu.execute(instr, &self.program) {
            Ok(Flow::Continue) => (),
            Ok(Flow::Halt) => self.status = Status::Halted(Halt::Normal),
            Err(fault) => {
                // Leave the machine as it was before this instruction
                self.cpu.regs.set_pc(pc);
                let text = instr.text.clone();
                return self.fault(fault, pc, text);
            }
        }
        &self.status
    }

    fn fault(&mut self, fault: Fault, addr: u64, text: String) -> &Status {
        self.status = Status::Halted(Halt::Fault(FaultReport { fault, addr, text }));
        &self.status
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.status, Status::Halted(_))
    }

    /// Fault that halted execution, if any.
    pub fn fault_report(&self) -> Option<&FaultReport> {
        match &self.status {
            Status::Halted(Halt::Fault(report)) => Some(report),
            _ => None,
        }
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.cpu.regs
    }

    /// Read a register by name, eg. `"W1"`.
    pub fn reg(&self, name: &str) -> Result<u64, Fault> {
        self.cpu.regs.read_named(name)
    }

    pub fn read(&self, reg: RegRef) -> u64 {
        self.cpu.regs.read(reg)
    }

    pub fn flags(&self) -> Flags {
        self.cpu.regs.flags()
    }

    pub fn pc(&self) -> u64 {
        self.cpu.regs.pc()
    }

    pub fn stack(&self) -> &StackMemory {
        &self.cpu.stack
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Executed instructions, in order. Empty unless tracing is enabled.
    pub fn trace(&self) -> &[TraceEntry] {
        self.trace.as_deref().unwrap_or_default()
    }
}

impl Cpu {
    fn new(stack_base: u64, stack_size: usize, zero_flag: bool) -> Self {
        let stack = StackMemory::new(stack_base, stack_size);
        Cpu {
            regs: RegisterFile::new(stack.top(), zero_flag),
            stack,
        }
    }

    /// Every handler validates before it mutates, so an `Err` means nothing changed.
    fn execute(&mut self, instr: &Instruction, program: &Program) -> Result<Flow, Fault> {
        match &instr.op {
            Op::Alu { op, dest, lhs, rhs } => {
                let lhs = self.regs.read(*lhs) as i128;
                let result = op.apply(lhs, self.source(*rhs));
                self.regs.write(*dest, result as u64)?;
                self.regs.set_flags_from(result, dest.width);
            }
            Op::Mov { dest, src } => {
                let value = self.source(*src);
                self.regs.write(*dest, value as u64)?;
            }
            Op::Cmp { lhs, rhs } => {
                let result = self.regs.read(*lhs) as i128 - self.source(*rhs);
                self.regs.set_flags_from(result, lhs.width);
            }
            Op::Load { size, dest, addr } => {
                let addr = self.effective_addr(*addr);
                let value = match size {
                    AccessSize::Byte => self.stack.read_u8(addr)? as u64,
                    AccessSize::Doubleword => self.stack.read_u64(addr)?,
                };
                self.regs.write(*dest, value)?;
            }
            Op::Store { size, src, addr } => {
                let addr = self.effective_addr(*addr);
                let value = self.regs.read(*src);
                match size {
                    AccessSize::Byte => self.stack.write_u8(addr, value as u8)?,
                    AccessSize::Doubleword => self.stack.write_u64(addr, value)?,
                }
            }
            Op::Branch { cond, target } => {
                // Resolved even when not taken
                let dest = program
                    .label(target)
                    .ok_or_else(|| Fault::UnresolvedLabel {
                        label: target.clone(),
                    })?;
                if cond.holds(self.regs.flags()) {
                    self.regs.set_pc(dest);
                }
            }
            Op::Nop => (),
            Op::Ret => return Ok(Flow::Halt),
            Op::Unimplemented => {
                return Err(Fault::UnimplementedInstruction {
                    mnemonic: instr.mnemonic.clone(),
                })
            }
        }
        Ok(Flow::Continue)
    }

    fn source(&self, src: Source) -> i128 {
        match src {
            Source::Reg(reg) => self.regs.read(reg) as i128,
            Source::Imm(imm) => imm as i128,
        }
    }

    fn effective_addr(&self, mem: MemRef) -> u64 {
        self.regs.read(mem.base).wrapping_add(mem.offset as u64)
    }
}

enum Flow {
    Continue,
    Halt,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulator(src: &str) -> Emulator {
        let config = Config::default();
        Emulator::new(Program::load(src, &config).unwrap(), &config)
    }

    #[test]
    fn starts_ready() {
        let emu = emulator("RET");
        assert_eq!(emu.status(), &Status::Ready);
        assert_eq!(emu.pc(), 0);
        assert_eq!(emu.registers().sp(), 256);
        assert_eq!(emu.flags(), Flags::default());
    }

    #[test]
    fn step_by_step() {
        let mut emu = emulator("MOV X0, #1\nRET");
        assert_eq!(emu.step(), &Status::Running);
        assert_eq!(emu.reg("X0"), Ok(1));
        assert_eq!(emu.pc(), 4);
        assert_eq!(emu.step(), &Status::Halted(Halt::Normal));
        assert_eq!(emu.steps(), 2);
        // Halted engines stay halted
        assert_eq!(emu.step(), &Status::Halted(Halt::Normal));
        assert_eq!(emu.steps(), 2);
    }

    #[test]
    fn alu_truncates_to_destination_width() {
        let mut emu = emulator(
            "MOV X0, #0xFFFFFFFF\n\
             ADD W1, W0, #1\n\
             ADD X2, X0, #1\n\
             SUB X3, XZR, #1\n\
             MOV X4, #-1\n\
             RET",
        );
        emu.run();
        assert_eq!(emu.reg("X1"), Ok(0));
        assert_eq!(emu.reg("X2"), Ok(0x1_0000_0000));
        assert_eq!(emu.reg("X3"), Ok(u64::MAX));
        assert_eq!(emu.reg("X4"), Ok(u64::MAX));
        // Last flag-setting instruction was the SUB
        assert_eq!(emu.flags(), Flags { n: true, z: false });
    }

    #[test]
    fn w_flags_follow_destination() {
        let mut emu = emulator("MOV X0, #0xFFFFFFFF\nADD W1, W0, #1\nRET");
        emu.run();
        assert_eq!(emu.flags(), Flags { n: false, z: true });
    }

    #[test]
    fn logic_ops() {
        let mut emu = emulator(
            "MOV X0, #0b1100\n\
             AND X1, X0, #0b1010\n\
             EOR X2, X0, #0b1010\n\
             EOR X3, X0, X0\n\
             RET",
        );
        emu.run();
        assert_eq!(emu.reg("X1"), Ok(0b1000));
        assert_eq!(emu.reg("X2"), Ok(0b0110));
        assert_eq!(emu.reg("X3"), Ok(0));
        assert_eq!(emu.flags(), Flags { n: false, z: true });
    }

    #[test]
    fn mov_leaves_flags() {
        let mut emu = emulator("MOV X0, #3\nCMP X0, #5\nMOV X1, #0\nRET");
        emu.run();
        assert_eq!(emu.flags(), Flags { n: true, z: false });
    }

    #[test]
    fn cmp_uses_lhs_width() {
        let mut emu = emulator("MOV X0, #0x100000000\nCMP W0, #0\nRET");
        emu.run();
        assert_eq!(emu.flags(), Flags { n: false, z: true });
        let mut emu = emulator("MOV X0, #0x100000000\nCMP X0, #0\nRET");
        emu.run();
        assert_eq!(emu.flags(), Flags { n: false, z: false });
    }

    #[test]
    fn branches() {
        let mut emu = emulator(
            "MOV X0, #1\n\
             CMP X0, #0\n\
             B.LE skip\n\
             MOV X1, #7\n\
             skip: B end\n\
             MOV X2, #9\n\
             end: RET",
        );
        assert_eq!(emu.run(), &Status::Halted(Halt::Normal));
        assert_eq!(emu.reg("X1"), Ok(7));
        assert_eq!(emu.reg("X2"), Ok(0));
    }

    #[test]
    fn unresolved_label_faults() {
        let mut emu = emulator("NOP\nB missing\nRET");
        emu.run();
        let report = emu.fault_report().unwrap();
        assert_eq!(
            report.fault,
            Fault::UnresolvedLabel {
                label: "missing".into()
            }
        );
        assert_eq!(report.addr, 4);
        assert_eq!(report.text, "B missing");
        assert_eq!(emu.pc(), 4);
    }

    #[test]
    fn unimplemented_faults() {
        let mut emu = emulator("MOV X0, #1\nsvc #0\nRET");
        emu.run();
        let report = emu.fault_report().unwrap();
        assert_eq!(
            report.fault,
            Fault::UnimplementedInstruction {
                mnemonic: "SVC".into()
            }
        );
        assert_eq!(report.addr, 4);
        assert_eq!(emu.reg("X0"), Ok(1));
    }

    #[test]
    fn untaken_branch_to_missing_label_faults() {
        let mut emu = emulator("MOV X0, #1\nCMP X0, #0\nB.LE nowhere\nRET");
        emu.run();
        let report = emu.fault_report().unwrap();
        assert_eq!(
            report.fault,
            Fault::UnresolvedLabel {
                label: "nowhere".into()
            }
        );
        assert_eq!(report.addr, 8);
    }

    #[test]
    fn pc_source_reads_next_address() {
        let mut emu = emulator("NOP\nADD X0, PC, #0\nMOV X1, PC\nRET");
        emu.run();
        assert_eq!(emu.reg("X0"), Ok(8));
        assert_eq!(emu.reg("X1"), Ok(12));
    }

    #[test]
    fn running_off_the_end_faults() {
        let mut emu = emulator("NOP");
        emu.run();
        assert_eq!(
            emu.fault_report().map(|r| &r.fault),
            Some(&Fault::PcOutOfBounds { pc: 4 })
        );
    }

    #[test]
    fn step_limit() {
        let config = Config {
            max_steps: 50,
            ..Config::default()
        };
        let program = Program::load("spin: B spin", &config).unwrap();
        let mut emu = Emulator::new(program, &config);
        emu.run();
        assert_eq!(
            emu.fault_report().map(|r| &r.fault),
            Some(&Fault::StepLimitExceeded { limit: 50 })
        );
        assert_eq!(emu.steps(), 50);
    }

    #[test]
    fn byte_access() {
        let mut emu = emulator(
            "MOV X0, #0x1FF\n\
             STRB W0, [SP, #-1]\n\
             MOV X1, #-1\n\
             LDRB W1, [SP, #-1]\n\
             RET",
        );
        emu.run();
        assert_eq!(emu.reg("X1"), Ok(0xFF));
        assert_eq!(emu.stack().bytes()[255], 0xFF);
        assert_eq!(emu.stack().bytes()[254], 0);
    }

    #[test]
    fn store_out_of_bounds_changes_nothing() {
        let mut emu = emulator("MOV X0, #5\nSTR X0, [SP, #0]\nRET");
        emu.run();
        let report = emu.fault_report().unwrap();
        assert!(matches!(report.fault, Fault::MemoryBounds { addr: 256, len: 8 }));
        assert!(emu.stack().bytes().iter().all(|&b| b == 0));
        assert_eq!(emu.pc(), 4);
    }

    #[test]
    fn trace_and_reset() {
        let config = Config {
            trace: true,
            zero_flag_on_reset: true,
            ..Config::default()
        };
        let program = Program::load("MOV X0, #2\nSUB X0, X0, #1\nRET", &config).unwrap();
        let mut emu = Emulator::new(program, &config);
        assert_eq!(emu.flags(), Flags { n: false, z: true });
        emu.run();
        let addrs: Vec<u64> = emu.trace().iter().map(|t| t.addr).collect();
        assert_eq!(addrs, [0, 4, 8]);
        assert_eq!(emu.trace()[1].text, "SUB X0, X0, #1");

        emu.reset();
        assert_eq!(emu.status(), &Status::Ready);
        assert_eq!(emu.reg("X0"), Ok(0));
        assert!(emu.trace().is_empty());
        assert_eq!(emu.flags(), Flags { n: false, z: true });
        emu.run();
        assert_eq!(emu.reg("X0"), Ok(1));
    }
}
