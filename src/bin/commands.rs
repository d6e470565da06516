//! Parses one line of the command surface (§6) into a [`Command`] and
//! dispatches it against a [`Simulator`], printing formatted results.
//! Grounded in the original `riscv_sim.cpp` command loop: same subcommand
//! vocabulary and "Invalid Command, Expected: ..." error style.

use rvsim::assembler::numeric::parse_unsigned;
use rvsim::simulator::{CacheEnableError, CommandError, LoadError, RunStatus, Simulator, StepOutcome};

use crate::formatting;

pub enum Command {
    Load(String),
    Run,
    Step,
    Regs,
    Mem(i64, usize),
    ShowStack,
    Break(usize),
    DelBreak(usize),
    CacheEnable(String),
    CacheDisable,
    CacheStatus,
    CacheStats,
    CacheInvalidate,
    CacheDump(String),
    Exit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let command = match tokens.as_slice() {
        ["load", path] => Command::Load(path.to_string()),
        ["run"] => Command::Run,
        ["step"] => Command::Step,
        ["regs"] => Command::Regs,
        ["mem", addr, count] => {
            let addr = parse_unsigned(addr, 20).map_err(|e| e.to_string())?;
            let count: usize = count.parse().map_err(|_| format!("invalid count '{count}'"))?;
            Command::Mem(addr as i64, count)
        }
        ["show-stack"] => Command::ShowStack,
        ["break", line] => {
            let line: usize = line.parse().map_err(|_| format!("invalid line '{line}'"))?;
            Command::Break(line)
        }
        ["del", "break", line] => {
            let line: usize = line.parse().map_err(|_| format!("invalid line '{line}'"))?;
            Command::DelBreak(line)
        }
        ["cache_sim", "enable", path] => Command::CacheEnable(path.to_string()),
        ["cache_sim", "disable"] => Command::CacheDisable,
        ["cache_sim", "status"] => Command::CacheStatus,
        ["cache_sim", "stats"] => Command::CacheStats,
        ["cache_sim", "invalidate"] => Command::CacheInvalidate,
        ["cache_sim", "dump", path] => Command::CacheDump(path.to_string()),
        ["exit"] => Command::Exit,
        _ => return Err(format!("Invalid Command: '{line}'")),
    };
    Ok(command)
}

/// Runs `command` against `sim`, printing output or an error message.
/// Returns `true` iff the caller should keep reading commands.
pub fn dispatch(sim: &mut Simulator, command: Command) -> bool {
    match command {
        Command::Load(path) => match sim.load(&path) {
            Ok(()) => println!("Loaded '{path}'"),
            Err(LoadError::Io(e)) => eprintln!("ERROR: {e}"),
            Err(LoadError::Assemble(errors)) => {
                for e in errors {
                    eprintln!("{e}");
                }
            }
        },
        Command::Run => match sim.run() {
            Ok(RunStatus::Breakpoint) => println!("Stopped at breakpoint (line {})", sim.line_counter()),
            Ok(RunStatus::Ended) => println!("Program terminated"),
            Err(e) => eprintln!("ERROR: {e}"),
        },
        Command::Step => match sim.step() {
            Ok(StepOutcome::Executed) => println!("Stepped to line {}", sim.line_counter()),
            Ok(StepOutcome::HaltedAtBreakpoint) => {
                println!("Stopped at breakpoint (line {})", sim.line_counter())
            }
            Ok(StepOutcome::ProgramEnded) => println!("Program terminated"),
            Err(e) => eprintln!("ERROR: {e}"),
        },
        Command::Regs => print!("{}", formatting::format_registers(sim.registers(), sim.pc())),
        Command::Mem(addr, count) => match sim.mem(addr, count) {
            Ok(bytes) => print!("{}", formatting::format_memory(bytes, addr)),
            Err(e) => eprintln!("ERROR: {e}"),
        },
        Command::ShowStack => print!("{}", formatting::format_stack(sim.call_stack())),
        Command::Break(line) => {
            sim.add_breakpoint(line);
            println!("Breakpoint set at line {line}");
        }
        Command::DelBreak(line) => {
            if sim.del_breakpoint(line) {
                println!("Breakpoint removed at line {line}");
            } else {
                println!("No breakpoint at line {line}");
            }
        }
        Command::CacheEnable(path) => match sim.cache_enable(&path) {
            Ok(()) => println!("Cache enabled"),
            Err(CacheEnableError::AlreadyLoaded) => {
                eprintln!("ERROR: cache_sim enable must precede load")
            }
            Err(e) => eprintln!("ERROR: {e}"),
        },
        Command::CacheDisable => match sim.cache_disable() {
            Ok(()) => println!("Cache disabled"),
            Err(e) => eprintln!("ERROR: {e}"),
        },
        Command::CacheStatus => match sim.cache_status() {
            Some(config) => print!("{}", formatting::format_cache_status(config)),
            None => println!("Cache is not enabled"),
        },
        Command::CacheStats => match sim.cache_stats() {
            Some(stats) => print!("{}", formatting::format_cache_stats(stats)),
            None => println!("Cache is not enabled"),
        },
        Command::CacheInvalidate => {
            if let Err(e) = sim.cache_invalidate() {
                eprintln!("ERROR: {e}");
            }
        }
        Command::CacheDump(path) => {
            if let Err(e) = sim.cache_dump(&path) {
                eprintln!("ERROR: {e}");
            }
        }
        Command::Exit => {
            return false;
        }
    }

    if !sim.warnings.is_empty() {
        for warning in sim.warnings.drain(..) {
            eprintln!("WARNING: {warning}");
        }
    }

    true
}
