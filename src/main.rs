//! kvquery CLI entry point
//!
//! Parses arguments and dispatches through `cli::run`. Failures are written
//! as a JSON error object and exit non-zero.

use kvquery::cli;

fn main() {
    if let Err(e) = cli::run() {
        if cli::write_error(e.code(), &e.to_string()).is_err() {
            eprintln!("{}: {}", e.code(), e);
        }
        std::process::exit(1);
    }
}
