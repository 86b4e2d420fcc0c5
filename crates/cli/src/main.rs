//! Runahead simulator CLI.
//!
//! This binary provides a single entry point for running stimulus programs
//! on the runahead core. It performs:
//! 1. **Program run:** Parse an assembly-like program file and simulate it.
//! 2. **Configuration:** Built-in defaults or a JSON config file.
//! 3. **Reporting:** Statistics dump at exit.

use clap::{Parser, Subcommand};
use std::{fs, process};

use runahead_core::config::Config;
use runahead_core::sim::{Program, Simulator};

#[derive(Parser, Debug)]
#[command(
    name = "runahead-sim",
    author,
    version,
    about = "Cycle-accurate out-of-order CPU simulator with runahead execution",
    long_about = "Run a stimulus program on the runahead core.\n\nExamples:\n  runahead-sim run -f demos/pointer_chase.asm\n  runahead-sim run -f prog.asm --config config.json --trace"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a stimulus program to completion.
    Run {
        /// Program file to execute.
        #[arg(short, long)]
        file: String,

        /// JSON configuration file (defaults used when omitted).
        #[arg(long)]
        config: Option<String>,

        /// Emit per-stage trace lines to stderr.
        #[arg(long)]
        trace: bool,

        /// Cycle limit.
        #[arg(long, default_value_t = 1_000_000)]
        max_cycles: u64,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { file, config, trace, max_cycles } => cmd_run(file, config, trace, max_cycles),
    }
}

fn cmd_run(file: String, config_path: Option<String>, trace: bool, max_cycles: u64) {
    let mut config = match config_path {
        Some(path) => {
            let text = fs::read_to_string(&path).unwrap_or_else(|e| {
                eprintln!("Error reading config {}: {}", path, e);
                process::exit(1);
            });
            serde_json::from_str::<Config>(&text).unwrap_or_else(|e| {
                eprintln!("Error parsing config {}: {}", path, e);
                process::exit(1);
            })
        }
        None => Config::default(),
    };
    config.trace = config.trace || trace;

    let text = fs::read_to_string(&file).unwrap_or_else(|e| {
        eprintln!("Error reading program {}: {}", file, e);
        process::exit(1);
    });
    let program: Program = text.parse().unwrap_or_else(|e| {
        eprintln!("Error parsing program {}: {}", file, e);
        process::exit(1);
    });

    println!(
        "[*] Running {} ({} ops), runahead {}",
        file,
        program.len(),
        if config.runahead.enable_runahead { "enabled" } else { "disabled" }
    );

    let mut sim = Simulator::new(&config, program);
    let cycles = sim.run(max_cycles);

    if !sim.cpu.halted {
        eprintln!("[!] Cycle limit reached ({}) without halting", cycles);
        sim.cpu.stats.print();
        process::exit(1);
    }

    println!("[*] Halted after {} cycles", cycles);
    sim.cpu.stats.print();
}
