//! Command-line options shared by every subcommand.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use pipeline::{ContentHashCache, FlashImage, Layout, ProjectConfig, StalenessOracle, TimestampCache};

/// Where the SDK, toolchain, flasher and project live.
#[derive(Debug, Clone, Args)]
pub struct ProjectArgs {
    /// VEGA SDK root (contains bsp/)
    #[arg(long, global = true, env = "VEGA_SDK_PATH")]
    pub sdk_path: Option<PathBuf>,

    /// Directory holding riscv64-vega-elf-* binaries
    #[arg(long, global = true, env = "VEGA_TOOLS_PATH")]
    pub tools_path: Option<PathBuf>,

    /// Directory holding the flasher script
    #[arg(long, global = true, env = "VEGA_FLASHER_DIR")]
    pub flasher_dir: Option<PathBuf>,

    /// Project source directory (top-level *.c files are compiled)
    #[arg(long, global = true, env = "VEGA_PROJECT_SRC", default_value = "src")]
    pub src_dir: PathBuf,

    /// Build output directory
    #[arg(long, global = true, env = "VEGA_BUILD_DIR", default_value = ".pio/build/vega")]
    pub build_dir: PathBuf,
}

impl ProjectArgs {
    /// Project configuration with the given upload options.
    pub fn config(&self, upload_port: Option<String>, image: ImageKind) -> ProjectConfig {
        ProjectConfig {
            sdk_path: self.sdk_path.clone(),
            tools_path: self.tools_path.clone(),
            src_dir: self.src_dir.clone(),
            build_dir: self.build_dir.clone(),
            flasher_dir: self.flasher_dir.clone(),
            upload_port,
            flash_image: image.into(),
        }
    }

    /// Validated layout for building (no upload options).
    pub fn layout(&self) -> Result<Layout> {
        self.config(None, ImageKind::Bin)
            .validate()
            .context("invalid project configuration")
    }
}

/// `--cache` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheKind {
    /// Rebuild when the source is newer than its object
    Mtime,
    /// Rebuild when the source contents changed (CRC-32 sidecar)
    Hash,
}

impl CacheKind {
    pub fn oracle(self) -> &'static dyn StalenessOracle {
        match self {
            Self::Mtime => &TimestampCache,
            Self::Hash => &ContentHashCache,
        }
    }
}

/// `--image` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImageKind {
    /// firmware.bin (objcopy -O binary)
    Bin,
    /// firmware.elf
    Elf,
}

impl From<ImageKind> for FlashImage {
    fn from(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Bin => FlashImage::Binary,
            ImageKind::Elf => FlashImage::Elf,
        }
    }
}
