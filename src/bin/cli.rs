//! Command-line arguments for the `rvsim` binary.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "rvsim")]
#[command(about = "An interactive RV64I-like instruction set simulator", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Read commands from a script file instead of standard input.
    #[arg(short = 's', long = "script")]
    pub script: Option<String>,

    /// Suppress the startup banner.
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}
