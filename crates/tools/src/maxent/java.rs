//! Java runtime discovery
//!
//! The predictor needs a runnable `java`. Resolution order: an explicitly
//! given path, the path cached by the setup tool under the addon base
//! directory, then whatever `java` the system lookup finds. Every candidate
//! is probed with `java -version` before it is accepted.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use grasskit_core::{Error, Result};
use tracing::warn;

/// Environment variable locating the addon base directory.
pub const ADDON_BASE_ENV: &str = "GRASSKIT_ADDON_BASE";

/// One-line file under `<addon base>/scripts` caching the java path.
pub const JAVA_PATH_FILE: &str = "maxent_java_path.txt";

/// The addon base directory from the environment.
pub fn addon_base() -> Result<PathBuf> {
    std::env::var_os(ADDON_BASE_ENV)
        .map(PathBuf::from)
        .ok_or_else(|| {
            Error::Precondition(format!("the {ADDON_BASE_ENV} environment variable is not set"))
        })
}

pub(crate) fn scripts_dir() -> Result<PathBuf> {
    Ok(addon_base()?.join("scripts"))
}

/// Whether `java -version` runs successfully at the given path.
pub fn java_functional(java: &Path) -> bool {
    Command::new(java)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// The java path cached by the setup tool, if present and usable.
fn cached_java_path() -> Option<PathBuf> {
    let file = scripts_dir().ok()?.join(JAVA_PATH_FILE);
    if !file.is_file() {
        return None;
    }
    let line = match std::fs::read_to_string(&file) {
        Ok(content) => content.lines().next().unwrap_or("").trim().to_string(),
        Err(e) => {
            warn!("the cached java path file exists but cannot be read: {e}");
            return None;
        }
    };
    if line.is_empty() {
        warn!("the cached java path file {} is empty", file.display());
        return None;
    }
    let path = PathBuf::from(line);
    if !path.exists() || !java_functional(&path) {
        warn!(
            "the cached java path {} does not exist or is not functional",
            path.display()
        );
        return None;
    }
    Some(path)
}

/// Locate a runnable java: explicit path, cached path, system lookup.
pub fn resolve_java(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(Error::Config(format!(
                "the given java executable {} cannot be found",
                path.display()
            )));
        }
        if !java_functional(path) {
            return Err(Error::Config(format!(
                "the given java executable {} is not functional",
                path.display()
            )));
        }
        return Ok(path.to_path_buf());
    }
    if let Some(path) = cached_java_path() {
        return Ok(path);
    }
    let system = PathBuf::from("java");
    if java_functional(&system) {
        return Ok(system);
    }
    Err(Error::Config(
        "java cannot be found; ensure it is installed and accessible, pass the \
         java option, or cache its location with the maxent-setup tool"
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_explicit_path_is_a_config_error() {
        let err = resolve_java(Some(Path::new("/nonexistent/bin/java"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn probe_rejects_a_non_executable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(!java_functional(file.path()));
    }
}
