//! Subprocess-backed engine session
//!
//! Modules are spawned as child processes, exactly as the engine's own
//! scripting layer does: the module name is the executable, options are
//! passed as `key=value` arguments and flags as a trailing `-abc` argument.
//! The session requires an already-initialized environment (`GISRC` set by
//! the host session); it does not bootstrap one.

use std::io::Write as _;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::engine::{Engine, ModuleCall};
use crate::error::{Error, Result};

/// An engine session backed by module subprocesses.
pub struct GrassSession {
    _private: (),
}

impl GrassSession {
    /// Attach to the active session.
    ///
    /// Fails when no session environment is present; the tools are meant to
    /// be run from within the host GIS shell, like any other addon.
    pub fn from_env() -> Result<Self> {
        if std::env::var_os("GISRC").is_none() {
            return Err(Error::Precondition(
                "no active session found (GISRC is not set); \
                 run this tool from within a GRASS session"
                    .to_string(),
            ));
        }
        Ok(Self { _private: () })
    }

    fn spawn(&self, call: &ModuleCall, stdin: Option<&str>) -> Result<std::process::Output> {
        debug!(command = %call, "running module");
        let mut command = Command::new(call.module());
        command
            .args(call.to_args())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn().map_err(|e| Error::Module {
            command: call.to_string(),
            stderr: format!("failed to spawn: {e}"),
        })?;
        if let Some(text) = stdin {
            // The handle is dropped after writing so the module sees EOF.
            let mut handle = child.stdin.take().ok_or_else(|| Error::Module {
                command: call.to_string(),
                stderr: "stdin handle unavailable".to_string(),
            })?;
            handle.write_all(text.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::Module {
                command: call.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output)
    }
}

impl Engine for GrassSession {
    fn run(&self, call: &ModuleCall) -> Result<()> {
        self.spawn(call, None).map(|_| ())
    }

    fn read(&self, call: &ModuleCall) -> Result<String> {
        let output = self.spawn(call, None)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn write(&self, call: &ModuleCall, stdin: &str) -> Result<()> {
        self.spawn(call, Some(stdin)).map(|_| ())
    }
}
