//! Error types for GrassKit

use thiserror::Error;

/// Main error type for GrassKit operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Precondition(String),

    #[error("Module failed: {command}{}", render_stderr(.stderr))]
    Module { command: String, stderr: String },

    #[error("{program}: {detail}")]
    External { program: String, detail: String },

    #[error("Cannot parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

fn render_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{trimmed}")
    }
}

/// Result type alias for GrassKit operations
pub type Result<T> = std::result::Result<T, Error>;
