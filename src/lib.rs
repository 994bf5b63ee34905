// Loading
mod config;
pub use config::{CommentStyle, Config, LabelPolicy, DEFAULT_MAX_STEPS, DEFAULT_STACK_SIZE};
pub mod operand;
pub mod ops;
mod program;
pub use program::{Instruction, Program, INSTRUCTION_SIZE};

// Running
mod memory;
pub use memory::{HexRow, StackMemory, HEXDUMP_WIDTH};
mod state;
pub use state::{Flags, RegisterFile};
mod runtime;
pub use runtime::{Emulator, FaultReport, Halt, Status, TraceEntry};
pub mod output;

mod symbol;
pub use symbol::{LabelTable, RegRef, Register, Width};

mod error;
pub use error::{Fault, ParseError, ParseErrorKind};
mod span;
pub use span::Span;

pub mod env;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;
