//! Incremental build and flash pipeline for VEGA THEJAS32 (RISC-V) firmware.
//!
//! The pipeline compiles the board-support package and the project sources
//! with the `riscv64-vega-elf` cross toolchain, links them into
//! `firmware.elf`, converts that to `firmware.bin`, and hands the binary to
//! the board's flasher script.
//!
//! # Modules
//!
//! - [`config`]: user options and the derived SDK/toolchain [`Layout`]
//! - [`cache`]: staleness oracles (timestamp and content hash)
//! - [`process`]: [`ToolRunner`] abstraction over external processes
//! - [`toolchain`]: single-file compile commands
//! - [`stages`]: start-up / board-support / user stage sequencing
//! - [`link`]: link and `objcopy -O binary` conversion
//! - [`build`]: the end-to-end [`Pipeline`]
//! - [`upload`]: flasher dispatch
//! - [`actions`]: named host actions and the upload override
//!
//! # Example
//!
//! ```no_run
//! use pipeline::{Pipeline, ProjectConfig, SystemRunner, TimestampCache};
//!
//! let layout = ProjectConfig {
//!     sdk_path: Some("C:/vega/sdk".into()),
//!     tools_path: Some("C:/vega/toolchain/bin".into()),
//!     src_dir: "src".into(),
//!     build_dir: ".pio/build/vega".into(),
//!     ..ProjectConfig::default()
//! }
//! .validate()?;
//! let report = Pipeline::new(&layout, &SystemRunner, &TimestampCache).build()?;
//! println!("compiled {} files", report.compiled());
//! # Ok::<(), pipeline::BuildError>(())
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::print_stdout)] // prefer tracing over println! in lib code
#![allow(clippy::module_name_repetitions)]

pub mod actions;
pub mod build;
pub mod cache;
pub mod config;
pub mod error;
pub mod link;
pub mod process;
pub mod stages;
pub mod toolchain;
pub mod upload;

// Top-level re-exports for convenience
pub use actions::{install_flasher, Action, ActionContext, ActionTable, FlashUpload, RunNative};
pub use build::{clean, BuildReport, Pipeline};
pub use cache::{ContentHashCache, StalenessOracle, TimestampCache};
pub use config::{FlashImage, Layout, ProjectConfig};
pub use error::BuildError;
pub use link::{BinaryImage, Image, LinkSpec, Linker};
pub use process::{Invocation, SystemRunner, ToolOutput, ToolRunner};
pub use stages::{BuildStage, CompileUnit, Sequencer, Stage, StageReport};
pub use toolchain::{CompileProfile, ObjectArtifact, Toolchain};
pub use upload::{UploadDispatcher, UploadRequest, UploadState};
