//! # mmtable CLI Entry Point
//!
//! Operator tool for table files.
//!
//! ## Usage
//!
//! ```bash
//! # Print the header of a table file
//! mmtable info ./quotes.mmt
//!
//! # Remove the lock file left by a dead writer
//! mmtable break-lock ./quotes.mmt
//!
//! # Show version
//! mmtable --version
//! ```

use eyre::{bail, Result, WrapErr};
use std::env;
use std::path::{Path, PathBuf};

use mmtable::storage::read_header_info;
use mmtable::{HeaderInfo, StaleLock, TableLock};

enum Command {
    Info(PathBuf),
    BreakLock(PathBuf),
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let mut command: Option<&str> = None;
    let mut path: Option<PathBuf> = None;

    for arg in &args[1..] {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("mmtable {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            arg if arg.starts_with('-') => {
                bail!("Unknown option: {}", arg);
            }
            word if command.is_none() => command = Some(word),
            word => {
                if path.is_some() {
                    bail!("Multiple table paths specified");
                }
                path = Some(PathBuf::from(word));
            }
        }
    }

    let (Some(command), Some(path)) = (command, path) else {
        print_usage();
        return Ok(());
    };
    let command = match command {
        "info" => Command::Info(path),
        "break-lock" => Command::BreakLock(path),
        other => bail!("Unknown command: {}", other),
    };

    match command {
        Command::Info(path) => {
            let info = read_header_info(&path)
                .wrap_err_with(|| format!("failed to read header of {:?}", path))?;
            print_info(&path, &info);
        }
        Command::BreakLock(path) => {
            match TableLock::break_stale(&path)
                .wrap_err_with(|| format!("failed to break lock of {:?}", path))?
            {
                StaleLock::NotHeld => println!("lock of {:?} is not held", path),
                StaleLock::Broken { pid } => {
                    println!("removed lock of {:?} (was held by pid {})", path, pid)
                }
            }
        }
    }

    Ok(())
}

fn print_info(path: &Path, info: &HeaderInfo) {
    println!("table:        {}", path.display());
    println!("version:      {}", info.version);
    println!("record width: {} bytes", info.record_width);
    println!("fingerprint:  {:016x}", info.fingerprint);
    println!("count:        {}", info.count);
    println!("capacity:     {}", info.capacity);
    println!("mtime:        {:.6}", info.mtime);
    match info.minchgid {
        Some(id) => println!("minchgid:     {}", id),
        None => println!("minchgid:     none"),
    }
    println!(
        "index:        {}",
        match (info.has_index, info.index_valid) {
            (false, _) => "none",
            (true, true) => "valid",
            (true, false) => "invalid",
        }
    );
    println!("rebuilds:     {}", info.generation);
}

fn print_usage() {
    println!("mmtable - shared memory-mapped record tables");
    println!();
    println!("USAGE:");
    println!("    mmtable <COMMAND> <TABLE_PATH>");
    println!();
    println!("COMMANDS:");
    println!("    info          Print the table header");
    println!("    break-lock    Remove the lock file if its owner is no longer running");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Print help information");
    println!("    -v, --version    Print version information");
}
