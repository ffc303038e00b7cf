//! Upload dispatch to the external flasher.
//!
//! ```text
//! Idle ──request──▶ PortResolving ──port──▶ Dispatching ──exit 0──▶ Succeeded
//!                        │                       └──────exit ≠ 0──▶ Failed
//!                        └──no port──────────────────────────────▶ Failed
//! ```
//!
//! The port comes from the project configuration, falling back to the
//! environment-provided value. It is never guessed. The image is always
//! re-resolved from the build directory rather than taken from a build that
//! may have run earlier in the same process.

use std::path::{Path, PathBuf};

use crate::config::Layout;
use crate::error::{BuildError, UPLOAD_PORT_HINT};
use crate::process::{Invocation, ToolRunner};

/// Environment variable consulted when no port is configured.
pub const UPLOAD_PORT_ENV: &str = "UPLOAD_PORT";

/// Status reported when the flasher was killed by a signal and has no
/// exit code of its own.
pub const SIGNALLED_STATUS: i32 = -1;

/// Dispatcher state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    /// No upload requested yet.
    Idle,
    /// Looking up the port.
    PortResolving,
    /// Flasher running.
    Dispatching(UploadRequest),
    /// Flasher exited 0.
    Succeeded,
    /// Precondition failed, or flasher exited with this non-zero status.
    Failed(Option<i32>),
}

/// One upload: where to flash and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Serial/USB port identifier, e.g. `COM3` or `/dev/ttyUSB0`.
    pub port: String,
    /// Image handed to the flasher.
    pub image: PathBuf,
}

/// Pick the configured port, else the environment one. Blank values count
/// as absent.
pub fn resolve_port(configured: Option<&str>, environment: Option<&str>) -> Option<String> {
    [configured, environment]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|p| !p.is_empty())
        .map(str::to_owned)
}

/// Command interpreter call running `script` with exactly `port` and `image`.
pub fn flasher_invocation(script: &Path, port: &str, image: &Path) -> Invocation {
    let shell = if cfg!(windows) {
        Invocation::new("cmd").arg("/c")
    } else {
        Invocation::new("sh")
    };
    shell.arg(script).arg(port).arg(image)
}

/// Runs one upload through the flasher script.
#[derive(Debug)]
pub struct UploadDispatcher<'a> {
    layout: &'a Layout,
    env_port: Option<String>,
    state: UploadState,
}

impl<'a> UploadDispatcher<'a> {
    /// Dispatcher for `layout`; `env_port` is the value of [`UPLOAD_PORT_ENV`]
    /// as read by the caller.
    pub fn new(layout: &'a Layout, env_port: Option<String>) -> Self {
        Self {
            layout,
            env_port,
            state: UploadState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Resolve the port and image, then run the flasher.
    ///
    /// Returns the flasher's exit status unchanged, zero or not. Errors are
    /// reserved for failures before the flasher was started: no port, no
    /// flasher script, no image.
    pub fn dispatch<R: ToolRunner + ?Sized>(&mut self, runner: &R) -> Result<i32, BuildError> {
        self.state = UploadState::PortResolving;
        let (request, script) = match self.prepare() {
            Ok(prepared) => prepared,
            Err(e) => {
                self.state = UploadState::Failed(None);
                return Err(e);
            }
        };

        tracing::info!(
            "Uploading to {}: {}",
            request.port,
            request.image.display()
        );
        let inv = flasher_invocation(&script, &request.port, &request.image);
        self.state = UploadState::Dispatching(request);

        let output = match runner.run_attached(&inv) {
            Ok(output) => output,
            Err(e) => {
                self.state = UploadState::Failed(None);
                return Err(e);
            }
        };
        let status = output.status.unwrap_or(SIGNALLED_STATUS);
        self.state = if status == 0 {
            UploadState::Succeeded
        } else {
            tracing::warn!(status, "flasher reported failure");
            UploadState::Failed(Some(status))
        };
        Ok(status)
    }

    fn prepare(&self) -> Result<(UploadRequest, PathBuf), BuildError> {
        let port = resolve_port(self.layout.upload_port(), self.env_port.as_deref())
            .ok_or_else(|| {
                tracing::error!("No upload port specified. {UPLOAD_PORT_HINT}");
                BuildError::NoUploadPort
            })?;
        let script = self.layout.flasher_script()?;
        let image = self.layout.flash_image_path();
        if !image.is_file() {
            return Err(BuildError::ImageMissing { path: image });
        }
        Ok((UploadRequest { port, image }, script))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use crate::config::{flasher_script_name, ProjectConfig};
    use crate::process::ToolOutput;
    use std::fs;
    use tempfile::TempDir;

    /// Flasher terminated by a signal: no exit code.
    struct Killed;

    impl ToolRunner for Killed {
        fn run(&self, _: &Invocation) -> Result<ToolOutput, BuildError> {
            Ok(ToolOutput::default())
        }
    }

    fn flashable(tmp: &TempDir) -> Layout {
        let root = tmp.path();
        for dir in ["sdk/bsp", "tools", "src", "flasher", "build"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(root.join("flasher").join(flasher_script_name()), "").unwrap();
        let layout = ProjectConfig {
            sdk_path: Some(root.join("sdk")),
            tools_path: Some(root.join("tools")),
            src_dir: root.join("src"),
            build_dir: root.join("build"),
            flasher_dir: Some(root.join("flasher")),
            upload_port: Some("COM3".into()),
            ..ProjectConfig::default()
        }
        .validate()
        .unwrap();
        fs::write(layout.binary_path(), "bin").unwrap();
        layout
    }

    #[test]
    fn signalled_flasher_reports_minus_one() {
        let tmp = TempDir::new().unwrap();
        let layout = flashable(&tmp);
        let mut dispatcher = UploadDispatcher::new(&layout, None);

        assert_eq!(dispatcher.dispatch(&Killed).unwrap(), SIGNALLED_STATUS);
        assert_eq!(
            dispatcher.state(),
            &UploadState::Failed(Some(SIGNALLED_STATUS))
        );
    }

    #[test]
    fn configured_port_wins_over_environment() {
        assert_eq!(
            resolve_port(Some("COM3"), Some("COM7")).as_deref(),
            Some("COM3")
        );
    }

    #[test]
    fn environment_port_is_the_fallback() {
        assert_eq!(resolve_port(None, Some("COM7")).as_deref(), Some("COM7"));
        assert_eq!(resolve_port(Some(""), Some("COM7")).as_deref(), Some("COM7"));
    }

    #[test]
    fn no_port_is_never_guessed() {
        assert_eq!(resolve_port(None, None), None);
        assert_eq!(resolve_port(Some(" "), Some("")), None);
    }

    #[test]
    fn flasher_gets_port_then_image_last() {
        let inv = flasher_invocation(
            Path::new("/opt/flasher/flasher.sh"),
            "/dev/ttyUSB0",
            Path::new("/build/firmware.bin"),
        );
        let args = inv.arguments();
        let n = args.len();
        assert_eq!(args[n - 2], "/dev/ttyUSB0");
        assert_eq!(args[n - 1], "/build/firmware.bin");
        assert_eq!(args[n - 3], "/opt/flasher/flasher.sh");
    }
}
