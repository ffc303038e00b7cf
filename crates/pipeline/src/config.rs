//! Project configuration and the SDK/toolchain path layout derived from it.
//!
//! [`ProjectConfig`] is what the user supplies. [`ProjectConfig::validate`]
//! checks it against the filesystem and produces a [`Layout`], the immutable
//! set of paths every other component is constructed from.

use std::path::{Path, PathBuf};

use crate::error::BuildError;

/// Target triple prefix of the VEGA cross toolchain.
pub const TOOL_PREFIX: &str = "riscv64-vega-elf-";

/// Program name of the linked image, without suffix.
pub const PROGNAME: &str = "firmware";

/// Subdirectory of the build directory holding object files.
pub const OBJ_DIR_NAME: &str = "vega_objs";

/// Which produced artifact the flasher is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashImage {
    /// Raw binary from `objcopy -O binary`.
    #[default]
    Binary,
    /// Linked ELF image.
    Elf,
}

/// User-supplied options. Paths may be relative; they are resolved by
/// [`ProjectConfig::validate`].
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    /// `vega_sdk_path`: root of the VEGA SDK (contains `bsp/`).
    pub sdk_path: Option<PathBuf>,
    /// `vega_tools_path`: directory holding the cross toolchain binaries.
    pub tools_path: Option<PathBuf>,
    /// Project source directory (user `*.c` files).
    pub src_dir: PathBuf,
    /// Build output directory.
    pub build_dir: PathBuf,
    /// `vega_flasher_dir`: directory holding the flasher script.
    pub flasher_dir: Option<PathBuf>,
    /// `upload_port`: configured serial port, takes precedence over the environment.
    pub upload_port: Option<String>,
    /// Artifact handed to the flasher.
    pub flash_image: FlashImage,
}

impl ProjectConfig {
    /// Resolve and check every path needed for a build.
    ///
    /// The flasher directory is not checked here; an upload checks it through
    /// [`Layout::flasher_script`].
    pub fn validate(&self) -> Result<Layout, BuildError> {
        let sdk = required_path("vega_sdk_path", self.sdk_path.as_deref())?;
        let tools = required_path("vega_tools_path", self.tools_path.as_deref())?;
        let src = existing_path("project_src_dir", &self.src_dir)?;
        let build = absolute(&self.build_dir)?;
        let flasher_dir = match &self.flasher_dir {
            Some(dir) => Some(absolute(dir)?),
            None => None,
        };

        Ok(Layout {
            sdk,
            tools,
            src,
            build,
            flasher_dir,
            upload_port: self.upload_port.clone().filter(|p| !p.trim().is_empty()),
            flash_image: self.flash_image,
        })
    }
}

/// Validated, absolute paths for one project.
#[derive(Debug, Clone)]
pub struct Layout {
    sdk: PathBuf,
    tools: PathBuf,
    src: PathBuf,
    build: PathBuf,
    flasher_dir: Option<PathBuf>,
    upload_port: Option<String>,
    flash_image: FlashImage,
}

impl Layout {
    /// SDK root.
    pub fn sdk(&self) -> &Path {
        &self.sdk
    }

    /// Project source directory.
    pub fn src_dir(&self) -> &Path {
        &self.src
    }

    /// Build output directory.
    pub fn build_dir(&self) -> &Path {
        &self.build
    }

    /// Configured upload port, if any.
    pub fn upload_port(&self) -> Option<&str> {
        self.upload_port.as_deref()
    }

    /// Artifact handed to the flasher.
    pub fn flash_image(&self) -> FlashImage {
        self.flash_image
    }

    /// Path of a toolchain binary, e.g. `tool("gcc")`.
    pub fn tool(&self, name: &str) -> PathBuf {
        self.tools.join(format!(
            "{TOOL_PREFIX}{name}{}",
            std::env::consts::EXE_SUFFIX
        ))
    }

    /// Cross compiler, also used as the linker driver.
    pub fn gcc(&self) -> PathBuf {
        self.tool("gcc")
    }

    /// Archiver.
    pub fn ar(&self) -> PathBuf {
        self.tool("ar")
    }

    /// Object copy, used for the raw binary conversion.
    pub fn objcopy(&self) -> PathBuf {
        self.tool("objcopy")
    }

    /// `<sdk>/bsp`.
    pub fn bsp_dir(&self) -> PathBuf {
        self.sdk.join("bsp")
    }

    /// `<sdk>/bsp/include`.
    pub fn include_dir(&self) -> PathBuf {
        self.bsp_dir().join("include")
    }

    /// `<sdk>/bsp/common`.
    pub fn common_dir(&self) -> PathBuf {
        self.bsp_dir().join("common")
    }

    /// `<sdk>/bsp/drivers`, walked recursively for `*.c`.
    pub fn drivers_dir(&self) -> PathBuf {
        self.bsp_dir().join("drivers")
    }

    /// Linker script.
    pub fn linker_script(&self) -> PathBuf {
        self.common_dir().join("mbl.lds")
    }

    /// Runtime start-up assembly.
    pub fn startup_source(&self) -> PathBuf {
        self.common_dir().join("crt.S")
    }

    /// The two fixed BSP support sources: the stdlib shim and the
    /// floating-point shim, in that order.
    pub fn support_sources(&self) -> [PathBuf; 2] {
        let common = self.common_dir();
        [common.join("stdlib.c"), common.join("rawfloat.c")]
    }

    /// Header force-included into every ordinary compile.
    pub fn forced_include(&self) -> PathBuf {
        self.include_dir().join("stdlib.h")
    }

    /// `<build>/vega_objs`.
    pub fn obj_dir(&self) -> PathBuf {
        self.build.join(OBJ_DIR_NAME)
    }

    /// Output directory for start-up and board-support objects.
    pub fn bsp_obj_dir(&self) -> PathBuf {
        self.obj_dir().join("bsp")
    }

    /// Output directory for user objects.
    pub fn user_obj_dir(&self) -> PathBuf {
        self.obj_dir().join("user")
    }

    /// Linked image, `<build>/firmware.elf`.
    pub fn image_path(&self) -> PathBuf {
        self.build.join(format!("{PROGNAME}.elf"))
    }

    /// Command line the current image was linked with, `<image>.cmd`.
    pub fn link_signature_path(&self) -> PathBuf {
        self.build.join(format!("{PROGNAME}.elf.cmd"))
    }

    /// Raw binary, a sibling of the image with the same stem.
    pub fn binary_path(&self) -> PathBuf {
        self.image_path().with_extension("bin")
    }

    /// The artifact an upload sends, always re-resolved from the build directory.
    pub fn flash_image_path(&self) -> PathBuf {
        match self.flash_image {
            FlashImage::Binary => self.binary_path(),
            FlashImage::Elf => self.image_path(),
        }
    }

    /// Flasher script for the host, checked for existence.
    pub fn flasher_script(&self) -> Result<PathBuf, BuildError> {
        let dir = self.flasher_dir.as_ref().ok_or(BuildError::ConfigurationMissing {
            option: "vega_flasher_dir",
        })?;
        let script = dir.join(flasher_script_name());
        if !script.exists() {
            return Err(BuildError::PathNotFound {
                option: "vega_flasher_dir",
                path: script,
            });
        }
        Ok(script)
    }
}

/// Flasher script file name on this host.
pub fn flasher_script_name() -> &'static str {
    if cfg!(windows) {
        "flasher.bat"
    } else {
        "flasher.sh"
    }
}

fn required_path(option: &'static str, value: Option<&Path>) -> Result<PathBuf, BuildError> {
    match value {
        Some(p) if !p.as_os_str().is_empty() => existing_path(option, p),
        _ => Err(BuildError::ConfigurationMissing { option }),
    }
}

fn existing_path(option: &'static str, path: &Path) -> Result<PathBuf, BuildError> {
    let path = absolute(path)?;
    if !path.exists() {
        return Err(BuildError::PathNotFound { option, path });
    }
    Ok(path)
}

fn absolute(path: &Path) -> Result<PathBuf, BuildError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| BuildError::io(path, e))?;
    Ok(cwd.join(path))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(tmp: &TempDir) -> ProjectConfig {
        let root = tmp.path();
        fs::create_dir_all(root.join("sdk/bsp")).unwrap();
        fs::create_dir_all(root.join("tools")).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        ProjectConfig {
            sdk_path: Some(root.join("sdk")),
            tools_path: Some(root.join("tools")),
            src_dir: root.join("src"),
            build_dir: root.join("build"),
            ..ProjectConfig::default()
        }
    }

    #[test]
    fn missing_sdk_is_reported_by_option_name() {
        let tmp = TempDir::new().unwrap();
        let cfg = ProjectConfig {
            sdk_path: None,
            ..config_in(&tmp)
        };
        match cfg.validate() {
            Err(BuildError::ConfigurationMissing { option }) => {
                assert_eq!(option, "vega_sdk_path");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn nonexistent_tools_dir_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let cfg = ProjectConfig {
            tools_path: Some(tmp.path().join("nope")),
            ..config_in(&tmp)
        };
        assert!(matches!(
            cfg.validate(),
            Err(BuildError::PathNotFound {
                option: "vega_tools_path",
                ..
            })
        ));
    }

    #[test]
    fn build_dir_need_not_exist_yet() {
        let tmp = TempDir::new().unwrap();
        let layout = config_in(&tmp).validate().unwrap();
        assert_eq!(layout.image_path(), tmp.path().join("build/firmware.elf"));
        assert_eq!(layout.binary_path(), tmp.path().join("build/firmware.bin"));
        assert_eq!(
            layout.link_signature_path(),
            tmp.path().join("build/firmware.elf.cmd")
        );
    }

    #[test]
    fn tool_names_carry_the_vega_prefix() {
        let tmp = TempDir::new().unwrap();
        let layout = config_in(&tmp).validate().unwrap();
        let gcc = layout.gcc();
        let name = gcc.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("riscv64-vega-elf-gcc"));
    }

    #[test]
    fn blank_upload_port_counts_as_unset() {
        let tmp = TempDir::new().unwrap();
        let cfg = ProjectConfig {
            upload_port: Some("  ".into()),
            ..config_in(&tmp)
        };
        assert_eq!(cfg.validate().unwrap().upload_port(), None);
    }

    #[test]
    fn flasher_script_requires_configured_dir() {
        let tmp = TempDir::new().unwrap();
        let layout = config_in(&tmp).validate().unwrap();
        assert!(matches!(
            layout.flasher_script(),
            Err(BuildError::ConfigurationMissing {
                option: "vega_flasher_dir"
            })
        ));
    }
}
