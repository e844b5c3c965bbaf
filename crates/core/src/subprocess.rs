//! External process invocation with streamed diagnostics
//!
//! Long-running external programs (the Maxent predictor) have their output
//! forwarded line by line into the logging channel while they run. A set of
//! (pattern, diagnostic) rules is scanned against each stderr line so a
//! known failure signature can be reported as a clearer message than the
//! raw Java traceback. The scan is a pure function over lines, independent
//! of process execution.

use std::io::{BufRead, BufReader};
use std::process::{Command, ExitStatus, Stdio};

use regex::Regex;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// A known stderr signature and the diagnostic to report when it appears.
#[derive(Debug, Clone)]
pub struct DiagnosticRule {
    pattern: Regex,
    diagnostic: String,
}

impl DiagnosticRule {
    pub fn new(pattern: &str, diagnostic: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| Error::Config(format!(
            "invalid diagnostic pattern '{pattern}': {e}"
        )))?;
        Ok(Self {
            pattern,
            diagnostic: diagnostic.into(),
        })
    }
}

/// First diagnostic whose pattern matches the line, if any.
pub fn scan_line<'r>(rules: &'r [DiagnosticRule], line: &str) -> Option<&'r str> {
    rules
        .iter()
        .find(|rule| rule.pattern.is_match(line))
        .map(|rule| rule.diagnostic.as_str())
}

/// Outcome of a streamed subprocess run.
#[derive(Debug)]
pub struct StreamOutcome {
    pub status: ExitStatus,
    /// Diagnostics triggered by stderr lines, in order of first appearance.
    pub diagnostics: Vec<String>,
}

impl StreamOutcome {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Builder for one streamed external command.
pub struct StreamedCommand {
    program: String,
    args: Vec<String>,
    rules: Vec<DiagnosticRule>,
}

impl StreamedCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I: IntoIterator<Item = S>, S: Into<String>>(mut self, args: I) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn rule(mut self, rule: DiagnosticRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The full command line, for `-p` style reporting.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Spawn the process, forward stdout to `info!` and stderr to `warn!`
    /// line by line, and collect any triggered diagnostics. The exit status
    /// is returned, not interpreted; callers decide what failure means.
    pub fn run(&self) -> Result<StreamOutcome> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::External {
                program: self.program.clone(),
                detail: format!("failed to spawn: {e}"),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| Error::External {
            program: self.program.clone(),
            detail: "stdout handle unavailable".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| Error::External {
            program: self.program.clone(),
            detail: "stderr handle unavailable".to_string(),
        })?;

        let stdout_thread = std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                info!("{line}");
            }
        });

        let mut diagnostics: Vec<String> = Vec::new();
        for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
            warn!("{line}");
            if let Some(diagnostic) = scan_line(&self.rules, &line) {
                if !diagnostics.iter().any(|d| d == diagnostic) {
                    diagnostics.push(diagnostic.to_string());
                }
            }
        }
        let _ = stdout_thread.join();

        let status = child.wait()?;
        Ok(StreamOutcome {
            status,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<DiagnosticRule> {
        vec![
            DiagnosticRule::new(
                r"java\.util\.NoSuchElementException",
                "check variable names and the path and names of the input files",
            )
            .unwrap(),
            DiagnosticRule::new(r"OutOfMemoryError", "increase the memory option").unwrap(),
        ]
    }

    #[test]
    fn matching_line_yields_its_diagnostic() {
        let rules = rules();
        let line = "Exception in thread \"main\" java.util.NoSuchElementException";
        assert_eq!(
            scan_line(&rules, line),
            Some("check variable names and the path and names of the input files")
        );
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = rules();
        assert_eq!(
            scan_line(&rules, "java.lang.OutOfMemoryError: Java heap space"),
            Some("increase the memory option")
        );
    }

    #[test]
    fn non_matching_lines_yield_nothing() {
        let rules = rules();
        assert_eq!(scan_line(&rules, "Projecting, please wait..."), None);
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        assert!(DiagnosticRule::new("(unclosed", "x").is_err());
    }

    #[test]
    fn command_line_renders_all_args() {
        let cmd = StreamedCommand::new("java")
            .arg("-mx512m")
            .args(["-cp", "maxent.jar", "density.Project"]);
        assert_eq!(cmd.command_line(), "java -mx512m -cp maxent.jar density.Project");
    }
}
