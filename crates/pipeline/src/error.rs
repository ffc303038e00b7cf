//! Error type shared by every pipeline stage.
//!
//! Nothing here is retried. Every variant is fatal for the invocation that
//! produced it; the caller decides how to report it.

use std::fmt;
use std::path::PathBuf;

/// Hint printed alongside [`BuildError::NoUploadPort`].
pub const UPLOAD_PORT_HINT: &str = "run: vega upload --upload-port COM3";

/// Failure of a build or upload step.
#[derive(Debug)]
pub enum BuildError {
    /// A required option was not set.
    ConfigurationMissing {
        /// Option name as the user spells it.
        option: &'static str,
    },
    /// An option points at a path that does not exist.
    PathNotFound {
        /// Option name as the user spells it.
        option: &'static str,
        /// The resolved path that was checked.
        path: PathBuf,
    },
    /// An external tool ran and exited unsuccessfully.
    ToolFailed {
        /// Short tool name (`gcc`, `objcopy`, ...).
        tool: String,
        /// Exit code, `None` if the process was killed by a signal.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// An external tool could not be started.
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },
    /// A filesystem operation failed.
    Io {
        /// Path the operation was acting on.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },
    /// Upload requested without a configured or environment-provided port.
    NoUploadPort,
    /// Upload requested before the image it needs was produced.
    ImageMissing {
        /// Where the image was expected.
        path: PathBuf,
    },
    /// An action name was looked up in the action table and not found.
    UnknownAction {
        /// The requested action.
        name: String,
    },
}

impl BuildError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for errors raised before any external tool ran.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationMissing { .. } | Self::PathNotFound { .. }
        )
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigurationMissing { option } => {
                write!(f, "'{option}' is not set")
            }
            Self::PathNotFound { option, path } => {
                write!(f, "path '{}' for '{option}' does not exist", path.display())
            }
            Self::ToolFailed {
                tool,
                status: Some(code),
                ..
            } => write!(f, "{tool} exited with status {code}"),
            Self::ToolFailed {
                tool, status: None, ..
            } => write!(f, "{tool} was terminated by a signal"),
            Self::Spawn { program, source } => {
                write!(f, "failed to start '{}': {source}", program.display())
            }
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::NoUploadPort => {
                write!(f, "no upload port specified ({UPLOAD_PORT_HINT})")
            }
            Self::ImageMissing { path } => write!(
                f,
                "image '{}' not found, run `vega build` first",
                path.display()
            ),
            Self::UnknownAction { name } => write!(f, "no action registered as '{name}'"),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } | Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_reports_status() {
        let err = BuildError::ToolFailed {
            tool: "gcc".into(),
            status: Some(1),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "gcc exited with status 1");
    }

    #[test]
    fn missing_port_carries_hint() {
        assert!(BuildError::NoUploadPort
            .to_string()
            .contains("--upload-port"));
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert!(BuildError::ConfigurationMissing {
            option: "vega_sdk_path"
        }
        .is_configuration());
        assert!(!BuildError::NoUploadPort.is_configuration());
    }
}
