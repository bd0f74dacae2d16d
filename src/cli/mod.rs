//! Command-line interface
//!
//! - explain: compile a query and print its plan
//! - query: compile and execute a query against the configured dataset

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{
    execute_request, explain, explain_request, query, run, run_command, JoinRequest, QueryRequest,
};
pub use errors::{CliError, CliResult};
pub use io::{read_request, write_error, write_response};
