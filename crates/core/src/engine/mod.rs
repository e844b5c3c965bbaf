//! Engine abstraction
//!
//! The addon tools never touch pixel or geometry data. Every operation is a
//! call into the engine's module namespace: a [`ModuleCall`] is handed to an
//! [`Engine`], which executes it and either discards, captures, or feeds
//! standard streams. `GrassSession` runs modules as subprocesses inside an
//! active session; `mock::MockSession` replays scripted responses for tests.

use std::collections::HashMap;

use crate::error::Result;

mod call;
mod grass;
pub mod mock;

pub use call::{mapcalc, ModuleCall};
pub use grass::GrassSession;

/// Executes engine module calls.
///
/// Implementations must treat a non-zero module exit as an error; tools rely
/// on the first failing call aborting the pipeline.
pub trait Engine {
    /// Execute a module, discarding its output.
    fn run(&self, call: &ModuleCall) -> Result<()>;

    /// Execute a module and capture its stdout.
    fn read(&self, call: &ModuleCall) -> Result<String>;

    /// Execute a module, feeding `stdin` to its standard input.
    fn write(&self, call: &ModuleCall, stdin: &str) -> Result<()>;
}

/// Parse `key=value` lines, as produced by modules run with the `-g` flag.
///
/// Lines without a `=` are skipped; later keys win.
pub fn parse_key_val(output: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in output.lines() {
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_val_lines() {
        let parsed = parse_key_val("nsres=10\newres=10.5\nrows=200\n\ngarbage line\n");
        assert_eq!(parsed.get("nsres").map(String::as_str), Some("10"));
        assert_eq!(parsed.get("ewres").map(String::as_str), Some("10.5"));
        assert_eq!(parsed.get("rows").map(String::as_str), Some("200"));
        assert!(!parsed.contains_key("garbage line"));
    }
}
