//! Output formatting for CLI commands.
//!
//! Results go to stdout as pretty JSON; logs and metrics go to stderr.

use anyhow::Result;
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_metrics(text: &str) {
    eprint!("{}", text);
    if !text.ends_with('\n') {
        eprintln!();
    }
}
