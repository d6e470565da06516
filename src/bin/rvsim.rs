use std::fs;
use std::io::{self, BufRead};

use clap::Parser;
use rvsim::simulator::Simulator;

mod cli;
mod commands;
mod formatting;

use cli::Cli;

fn main() -> io::Result<()> {
    let args = Cli::parse();
    let mut sim = Simulator::new();

    if !args.quiet {
        println!("rvsim: an RV64I-like instruction set simulator");
    }

    match args.script {
        Some(path) => run_script(&mut sim, &path),
        None => run_stdin(&mut sim),
    }
}

fn run_script(sim: &mut Simulator, path: &str) -> io::Result<()> {
    let contents = fs::read_to_string(path)?;
    for line in contents.lines() {
        if !run_line(sim, line) {
            break;
        }
    }
    Ok(())
}

fn run_stdin(sim: &mut Simulator) -> io::Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        if !run_line(sim, &line?) {
            break;
        }
    }
    Ok(())
}

/// Parses and dispatches one command line. Returns `false` on `exit` or a
/// line the caller should stop after.
fn run_line(sim: &mut Simulator, line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }

    match commands::parse_command(trimmed) {
        Ok(command) => commands::dispatch(sim, command),
        Err(message) => {
            eprintln!("ERROR: {message}");
            true
        }
    }
}
