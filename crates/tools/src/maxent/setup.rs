//! One-time Maxent setup
//!
//! Copies the Maxent JAR into the addon base directory and caches the path
//! to a working java executable there, so the predictor can run without
//! either being passed explicitly. The cached java path is the only durable
//! state this toolkit writes outside the engine's namespace.

use std::path::Path;

use grasskit_core::{Error, Result};
use tracing::{info, warn};

use super::java::{java_functional, scripts_dir, JAVA_PATH_FILE};

#[derive(Debug, Clone, Default)]
pub struct SetupParams {
    /// Path to the Maxent JAR to install.
    pub maxent: Option<std::path::PathBuf>,
    /// Path to the java executable to cache.
    pub java: Option<std::path::PathBuf>,
    /// Probe whether java is reachable from the system lookup.
    pub check_java: bool,
    /// Overwrite an existing installed JAR or cached path.
    pub overwrite: bool,
}

pub fn run(params: &SetupParams) -> Result<()> {
    if params.check_java {
        if java_functional(Path::new("java")) {
            info!("java is accessible from the session");
        } else {
            warn!(
                "java cannot be found from the session; ensure it is installed \
                 or cache its location here with the java option"
            );
        }
    }
    if let Some(java) = &params.java {
        store_java_path(java, params.overwrite)?;
    }
    if let Some(maxent) = &params.maxent {
        install_maxent(maxent, params.overwrite)?;
    }
    Ok(())
}

fn install_maxent(jar: &Path, overwrite: bool) -> Result<()> {
    if !jar.is_file() {
        return Err(Error::Config(
            "the maxent.jar file was not found at the given location".to_string(),
        ));
    }
    let file_name = jar
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if file_name != "maxent.jar" {
        return Err(Error::Config(format!(
            "the Maxent program file must be named 'maxent.jar', not '{file_name}'"
        )));
    }
    let scripts = scripts_dir()?;
    std::fs::create_dir_all(&scripts)?;
    let destination = scripts.join("maxent.jar");
    if destination.is_file() && !overwrite {
        return Err(Error::Precondition(format!(
            "there is already a maxent.jar at {}; pass the overwrite flag to replace it",
            destination.display()
        )));
    }
    std::fs::copy(jar, &destination)?;
    info!("installed maxent.jar at {}", destination.display());
    Ok(())
}

fn store_java_path(java: &Path, overwrite: bool) -> Result<()> {
    if !java.is_file() {
        return Err(Error::Config(
            "the java executable was not found at the given location".to_string(),
        ));
    }
    let scripts = scripts_dir()?;
    std::fs::create_dir_all(&scripts)?;
    let destination = scripts.join(JAVA_PATH_FILE);
    if destination.is_file() && !overwrite {
        return Err(Error::Precondition(format!(
            "the cached java path {} already exists; pass the overwrite flag to replace it",
            destination.display()
        )));
    }
    std::fs::write(&destination, format!("{}\n", java.display()))?;
    info!(
        "cached the java path {} at {}",
        java.display(),
        destination.display()
    );
    Ok(())
}
