pub mod block;
pub mod config;
pub mod todo;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Print a record as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
