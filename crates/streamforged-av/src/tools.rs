//! Engine binary resolution.
//!
//! The transcoding engine is located from an explicit configured path or by
//! searching `PATH`. Failing to resolve it is a configuration problem and is
//! reported immediately instead of at first playback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use streamforged_common::{Error, Result};

use crate::command::ToolCommand;

/// Default engine program name searched on `PATH`.
pub const ENGINE_NAME: &str = "ffmpeg";

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Availability information for a tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// First line of the tool's version output, if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Require that a tool is on `PATH`, returning its location.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| {
        Error::configuration(format!("{name} not found; is it installed and in PATH?"))
    })
}

/// Resolve the engine binary, preferring a configured path over `PATH`.
///
/// A configured path that does not exist is an error rather than a silent
/// fallback: the operator asked for a specific binary.
///
/// # Example
///
/// ```no_run
/// use streamforged_av::tools::resolve_engine;
///
/// let ffmpeg = resolve_engine(None)?;
/// println!("using {}", ffmpeg.display());
/// # Ok::<(), streamforged_common::Error>(())
/// ```
pub fn resolve_engine(configured: Option<&Path>) -> Result<PathBuf> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) if path.components().count() == 1 => require_tool(&path.to_string_lossy()),
        Some(path) => Err(Error::configuration(format!(
            "configured engine {} does not exist",
            path.display()
        ))),
        None => require_tool(ENGINE_NAME),
    }
}

/// Check the engine and report its version.
pub async fn check_engine(configured: Option<&Path>) -> ToolInfo {
    let name = configured
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| ENGINE_NAME.to_string());

    let Ok(path) = resolve_engine(configured) else {
        return ToolInfo {
            name,
            available: false,
            version: None,
            path: None,
        };
    };

    let version = ToolCommand::new(path.clone())
        .arg("-version")
        .timeout(VERSION_PROBE_TIMEOUT)
        .execute()
        .await
        .ok()
        .and_then(|out| out.stdout.lines().next().map(str::to_string));

    ToolInfo {
        name,
        available: version.is_some(),
        version,
        path: Some(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_missing_tool_is_configuration_error() {
        let result = require_tool("nonexistent_tool_xyz_12345");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_configured_missing_path_is_error() {
        let result = resolve_engine(Some(Path::new("/nonexistent/bin/ffmpeg")));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_configured_existing_path_is_used() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let resolved = resolve_engine(Some(file.path())).unwrap();
        assert_eq!(resolved, file.path());
    }

    #[tokio::test]
    async fn test_check_missing_engine() {
        let info = check_engine(Some(Path::new("/nonexistent/bin/ffmpeg"))).await;
        assert!(!info.available);
        assert!(info.version.is_none());
        assert!(info.path.is_none());
        assert_eq!(info.name, "ffmpeg");
    }
}
