//! recurrente CLI
//!
//! # Usage
//!
//! ```bash
//! # Forward a synthetic batch and report loss/perplexity
//! recurrente demo --vocab 100 --layers 2 --cutoffs 20,60 --smoothing 0.1
//!
//! # Greedy generation through the incremental step path
//! recurrente generate --vocab 100 --start 1 --len 20
//! ```

use clap::Parser;
use recurrente::cli::{run_command, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
