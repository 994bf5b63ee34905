use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hotwatch::notify::Event;
use hotwatch::{
    blocking::{Flow, Hotwatch},
    EventKind,
};
use miette::{bail, IntoDiagnostic, Result};

use armlet::output::Output;
use armlet::{env, operand::parse_immediate};
use armlet::{CommentStyle, Config, Emulator, Halt, LabelPolicy, Program, Status};
use armlet::{DEFAULT_MAX_STEPS, DEFAULT_STACK_SIZE};

/// Armlet is a small interpreter for a teaching subset of ARM64 assembly.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.s` file to run with default options
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Load and run a `.s` file, then print registers and stack
    Run {
        /// `.s` file to run
        name: PathBuf,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Check a `.s` file without running it
    Check {
        /// File to check
        name: PathBuf,
        #[command(flatten)]
        options: LoadOptions,
    },
    /// Print the loaded instructions and label table
    List {
        /// File to list
        name: PathBuf,
        #[command(flatten)]
        options: LoadOptions,
    },
    /// Place a watch on a `.s` file to re-check it on every change
    Watch {
        /// `.s` file to watch
        name: PathBuf,
        #[command(flatten)]
        options: LoadOptions,
    },
}

#[derive(clap::Args, Clone, Copy, Default)]
struct LoadOptions {
    /// Comment markers, eg. `slash,semicolon,hash,at`
    #[arg(long, default_value_t = CommentStyle::default())]
    comments: CommentStyle,
    /// Let a repeated label replace the earlier definition
    #[arg(long)]
    allow_duplicate_labels: bool,
}

#[derive(clap::Args, Clone, Copy)]
struct RunOptions {
    #[command(flatten)]
    load: LoadOptions,
    /// Produce minimal output, suited for blackbox tests
    #[arg(short, long)]
    minimal: bool,
    /// Print every executed instruction
    #[arg(short, long)]
    trace: bool,
    /// Stack size in bytes
    #[arg(long, default_value_t = DEFAULT_STACK_SIZE)]
    stack_size: usize,
    /// Address of the lowest stack byte, eg. `0x1000`
    #[arg(long, default_value = "0", value_parser = parse_address)]
    stack_base: u64,
    /// Give up after this many instructions
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: u64,
    /// Start with the Z flag set
    #[arg(long)]
    z_on_reset: bool,
}

impl LoadOptions {
    fn config(&self) -> Config {
        Config {
            comments: self.comments,
            labels: if self.allow_duplicate_labels {
                LabelPolicy::LastWins
            } else {
                LabelPolicy::Reject
            },
            ..Config::default()
        }
    }
}

impl RunOptions {
    fn config(&self) -> Config {
        Config {
            stack_size: self.stack_size,
            stack_base: self.stack_base,
            max_steps: self.max_steps,
            zero_flag_on_reset: self.z_on_reset,
            trace: self.trace || env::is_trace_enabled(),
            ..self.load.config()
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            load: LoadOptions::default(),
            minimal: false,
            trace: false,
            stack_size: DEFAULT_STACK_SIZE,
            stack_base: 0,
            max_steps: DEFAULT_MAX_STEPS,
            z_on_reset: false,
        }
    }
}

fn parse_address(s: &str) -> std::result::Result<u64, String> {
    match parse_immediate(s) {
        Ok(value) if value >= 0 => Ok(value as u64),
        Ok(_) => Err("address cannot be negative".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(armlet::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    if let Some(command) = args.command {
        match command {
            Command::Run { name, options } => run(&name, &options),
            Command::Check { name, options } => {
                file_message(Green, "Checking", &name);
                let src = fs::read_to_string(&name).into_diagnostic()?;
                check(&src, &options.config())
            }
            Command::List { name, options } => {
                Output::set_minimal(env::is_minimal_forced());
                file_message(Green, "Loading", &name);
                let src = fs::read_to_string(&name).into_diagnostic()?;
                let program = load(&src, &options.config())?;
                Output::print_listing(&program);
                Ok(())
            }
            Command::Watch { name, options } => {
                if !name.exists() {
                    bail!("File does not exist. Exiting...")
                }
                // Editors often replace the file rather than modify it
                let folder_path = match name.parent() {
                    Some(pth) if pth.is_dir() => pth.to_path_buf(),
                    _ => Path::new(".").to_path_buf(),
                };
                let config = options.config();

                // Clear screen and move cursor to top left
                print!("\x1B[2J\x1B[2;1H");
                file_message(Green, "Watching", &name);
                message(Cyan, "Help", "press CTRL+C to exit");

                let mut watcher = Hotwatch::new_with_custom_delay(Duration::from_millis(500))
                    .into_diagnostic()?;

                watcher
                    .watch(folder_path, move |event: Event| match event.kind {
                        EventKind::Modify(_) | EventKind::Remove(_) => {
                            print!("\x1B[2J\x1B[2;1H");
                            file_message(Green, "Watching", &name);
                            message(Green, "Re-checking", "file change detected");
                            message(Cyan, "Help", "press CTRL+C to exit");

                            sleep(Duration::from_millis(50));

                            let src = match fs::read_to_string(&name) {
                                Ok(src) => src,
                                Err(e) => {
                                    eprintln!("{e}. Exiting...");
                                    std::process::exit(1)
                                }
                            };
                            if let Err(e) = check(&src, &config) {
                                println!("\n{:?}", e);
                            }
                            Flow::Continue
                        }
                        _ => Flow::Continue,
                    })
                    .into_diagnostic()?;
                watcher.run();
                Ok(())
            }
        }
    } else if let Some(path) = args.path {
        run(&path, &RunOptions::default())
    } else {
        println!("\n~ armlet v{VERSION} ~");
        println!("{}", LOGO.truecolor(122, 199, 214).bold());
        println!("{SHORT_INFO}");
        std::process::exit(0);
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Yellow,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Yellow => left.yellow(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn run(name: &Path, options: &RunOptions) -> Result<()> {
    Output::set_minimal(options.minimal || env::is_minimal_forced());
    let config = options.config();

    file_message(MsgColor::Green, "Loading", name);
    let src = fs::read_to_string(name).into_diagnostic()?;
    let program = load(&src, &config)?;

    message(
        MsgColor::Green,
        "Running",
        &format!("{} instruction(s)", program.len()),
    );
    let mut emulator = Emulator::new(program, &config);
    emulator.run();

    if config.trace {
        Output::print_trace(emulator.trace());
    }
    Output::print_registers(emulator.registers());
    Output::print_stack(&emulator);

    match emulator.status() {
        Status::Halted(Halt::Fault(report)) => {
            message(
                MsgColor::Red,
                "Faulted",
                &format!("after {} step(s)", emulator.steps()),
            );
            Output::print_fault(report);
            std::process::exit(1);
        }
        _ => {
            file_message(MsgColor::Green, "Completed", name);
            Ok(())
        }
    }
}

/// Load `src`, then warn about anything that would fault once executed.
fn check(src: &str, config: &Config) -> Result<()> {
    let program = load(src, config)?;
    let mut warnings = 0;
    for (instr, label) in program.unresolved_labels() {
        let right = format!("line {}: label `{}` is never defined", instr.line, label);
        message(MsgColor::Yellow, "Warning", &right);
        warnings += 1;
    }
    for instr in program.unimplemented() {
        let right = format!(
            "line {}: `{}` is not implemented",
            instr.line, instr.mnemonic
        );
        message(MsgColor::Yellow, "Warning", &right);
        warnings += 1;
    }
    if warnings == 0 {
        message(MsgColor::Green, "Success", "no errors found!");
    } else {
        message(
            MsgColor::Green,
            "Success",
            &format!("no errors found, {warnings} warning(s)"),
        );
    }
    Ok(())
}

fn load(src: &str, config: &Config) -> Result<Program> {
    Program::load(src, config).map_err(|err| err.report(src))
}

const LOGO: &str = r#"
                      _      _
  __ _ _ __ _ __ ___ | | ___| |_
 / _` | '__| '_ ` _ \| |/ _ \ __|
| (_| | |  | | | | | | |  __/ |_
 \__,_|_|  |_| |_| |_|_|\___|\__|"#;

const SHORT_INFO: &str = r"
Welcome to armlet, an interpreter for a small subset of ARM64 assembly.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
