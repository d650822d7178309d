//! SCOM CLI: assemble, inspect, verify, and run script modules.
//!
//! Exit codes:
//! - 0: Success
//! - 1: Input/format/assembly/link error
//! - 2: Verification failure
//! - 3: Runtime fault

mod commands;
mod host;

use std::process;

use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "assemble" => commands::assemble(&args[2..]),
        "disassemble" => commands::disassemble(&args[2..]),
        "verify" => commands::verify(&args[2..]),
        "exports" => commands::exports(&args[2..]),
        "run" => commands::run(&args[2..]),
        "--help" | "-h" | "help" => {
            print_usage();
            process::exit(0);
        }
        other => {
            eprintln!("error: unknown command '{other}'");
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    if let Err(code) = result {
        process::exit(code);
    }
}

/// Log to stderr. `RUST_LOG` overrides the default `warn` filter.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    eprintln!("Usage: scom <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  assemble <input.sasm> [-o output.scom]   Assemble text to a binary module");
    eprintln!("  disassemble <input.scom>                 Print canonical assembly text");
    eprintln!("  verify <input.scom>                      Run the static checks");
    eprintln!("  exports <input.scom>                     List exported functions and data");
    eprintln!("  run <input.scom> [export] [int args...]  Verify, link, and call an export");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  SCOM_LINK_POLICY=strict|lenient          Unresolved import handling (default strict)");
    eprintln!("  SCOM_MAX_LOOP_ITERATIONS=N               Backward jumps per call, 0 disables");
    eprintln!("  RUST_LOG=filter                          Log filter (default warn)");
}
