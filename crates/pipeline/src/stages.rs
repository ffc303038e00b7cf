//! Build stage sequencing.
//!
//! Sources are grouped into three stages that always run in the same order:
//!
//! 1. [`Stage::Startup`]: `bsp/common/crt.S`, compiled with the reduced
//!    [`CompileProfile::Startup`] flag set.
//! 2. [`Stage::BoardSupport`]: every `*.c` under `bsp/drivers` (recursive),
//!    then `bsp/common/stdlib.c` and `bsp/common/rawfloat.c`.
//! 3. [`Stage::User`]: every `*.c` directly inside the project source
//!    directory. Subdirectories are not searched.
//!
//! A stage finishes completely before the next starts, and the resulting
//! [`LinkSpec`] lists objects in stage order, so the start-up object is
//! always first.
//!
//! Objects are named after the source stem. Two sources with the same stem
//! in one stage write the same object; the one compiled last wins.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::cache::StalenessOracle;
use crate::config::Layout;
use crate::error::BuildError;
use crate::link::LinkSpec;
use crate::process::ToolRunner;
use crate::toolchain::{CompileProfile, ObjectArtifact, Toolchain};

/// Extension of compiled C sources.
pub const C_EXTENSION: &str = "c";

/// Compilation stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Runtime start-up object.
    Startup,
    /// Board-support package drivers and shims.
    BoardSupport,
    /// Project sources.
    User,
}

impl Stage {
    /// Human-readable stage name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Startup => "runtime start-up",
            Self::BoardSupport => "board-support",
            Self::User => "user",
        }
    }
}

/// One source file and the object it compiles to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileUnit {
    /// Absolute source path.
    pub source: PathBuf,
    /// Absolute object path.
    pub object: PathBuf,
    /// Flag set to compile with.
    pub profile: CompileProfile,
}

/// An ordered group of compile units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStage {
    /// Which stage this is.
    pub stage: Stage,
    /// Units in discovery order.
    pub units: Vec<CompileUnit>,
}

/// What one stage did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// Which stage.
    pub stage: Stage,
    /// Sources seen.
    pub sources: usize,
    /// Objects compiled in this run.
    pub compiled: usize,
    /// Objects found up to date.
    pub reused: usize,
}

/// Result of [`Sequencer::build_all`].
#[derive(Debug, Clone)]
pub struct CompiledObjects {
    /// Objects in link order.
    pub spec: LinkSpec,
    /// One report per stage, in stage order.
    pub stages: Vec<StageReport>,
}

impl CompiledObjects {
    /// Total compiler invocations across all stages.
    pub fn compiled(&self) -> usize {
        self.stages
            .iter()
            .fold(0, |n, s| n.saturating_add(s.compiled))
    }
}

/// Drives the object cache and toolchain over every stage.
pub struct Sequencer<'a, R: ?Sized, C: ?Sized> {
    layout: &'a Layout,
    toolchain: Toolchain,
    runner: &'a R,
    cache: &'a C,
}

impl<'a, R, C> Sequencer<'a, R, C>
where
    R: ToolRunner + ?Sized,
    C: StalenessOracle + ?Sized,
{
    /// Sequencer for `layout`.
    pub fn new(layout: &'a Layout, runner: &'a R, cache: &'a C) -> Self {
        Self {
            layout,
            toolchain: Toolchain::new(layout),
            runner,
            cache,
        }
    }

    /// Discover every source and decide its object path, without compiling.
    pub fn plan(&self) -> Result<Vec<BuildStage>, BuildError> {
        let bsp_obj = self.layout.bsp_obj_dir();
        let user_obj = self.layout.user_obj_dir();

        let startup = BuildStage {
            stage: Stage::Startup,
            units: vec![CompileUnit {
                source: self.layout.startup_source(),
                object: bsp_obj.join("crt.o"),
                profile: CompileProfile::Startup,
            }],
        };

        let mut bsp_sources = discover_sources(&self.layout.drivers_dir(), true)?;
        bsp_sources.extend(self.layout.support_sources());
        let board_support = BuildStage {
            stage: Stage::BoardSupport,
            units: units_for(bsp_sources, &bsp_obj),
        };

        let user = BuildStage {
            stage: Stage::User,
            units: units_for(discover_sources(self.layout.src_dir(), false)?, &user_obj),
        };

        Ok(vec![startup, board_support, user])
    }

    /// Compile every stale unit, stage by stage, and collect the link order.
    ///
    /// The first compiler failure aborts the build; later units and stages
    /// are not attempted.
    pub fn build_all(&self) -> Result<CompiledObjects, BuildError> {
        let mut objects = Vec::new();
        let mut stages = Vec::new();
        for stage in self.plan()? {
            let (artifacts, report) = self.run_stage(&stage)?;
            tracing::debug!(
                stage = stage.stage.name(),
                compiled = report.compiled,
                reused = report.reused,
                "stage complete"
            );
            objects.extend(artifacts);
            stages.push(report);
        }
        Ok(CompiledObjects {
            spec: LinkSpec::new(objects, self.layout),
            stages,
        })
    }

    fn run_stage(
        &self,
        stage: &BuildStage,
    ) -> Result<(Vec<ObjectArtifact>, StageReport), BuildError> {
        let mut report = StageReport {
            stage: stage.stage,
            sources: stage.units.len(),
            compiled: 0,
            reused: 0,
        };
        let mut artifacts = Vec::with_capacity(stage.units.len());

        for unit in &stage.units {
            let artifact = if self.cache.needs_rebuild(&unit.source, &unit.object)? {
                let artifact =
                    self.toolchain
                        .compile(self.runner, &unit.source, &unit.object, unit.profile)?;
                self.cache.record(&unit.source, &unit.object)?;
                report.compiled = report.compiled.saturating_add(1);
                artifact
            } else {
                tracing::trace!("{} is up to date", unit.object.display());
                report.reused = report.reused.saturating_add(1);
                ObjectArtifact {
                    path: unit.object.clone(),
                    source: unit.source.clone(),
                }
            };
            artifacts.push(artifact);
        }
        Ok((artifacts, report))
    }
}

fn units_for(sources: Vec<PathBuf>, obj_dir: &Path) -> Vec<CompileUnit> {
    sources
        .into_iter()
        .map(|source| {
            let stem = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            CompileUnit {
                object: obj_dir.join(format!("{stem}.o")),
                source,
                profile: CompileProfile::Full,
            }
        })
        .collect()
}

/// Collect `*.c` files under `dir`, sorted by file name within each
/// directory. A missing directory yields no sources.
pub fn discover_sources(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, BuildError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut walker = WalkDir::new(dir).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop"));
            BuildError::io(path, source)
        })?;
        let is_c = entry.path().extension().and_then(|e| e.to_str()) == Some(C_EXTENSION);
        if entry.file_type().is_file() && is_c {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn driver_discovery_is_recursive_and_sorted() {
        let tmp = TempDir::new().unwrap();
        let drivers = tmp.path().join("drivers");
        touch(&drivers.join("uart/uart.c"));
        touch(&drivers.join("gpio.c"));
        touch(&drivers.join("gpio.h"));
        touch(&drivers.join("adc.c"));

        let found = discover_sources(&drivers, true).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(&drivers).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            [
                PathBuf::from("adc.c"),
                PathBuf::from("gpio.c"),
                PathBuf::from("uart/uart.c")
            ]
        );
    }

    #[test]
    fn user_discovery_skips_subdirectories() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("main.c"));
        touch(&tmp.path().join("lib/helper.c"));
        let found = discover_sources(tmp.path(), false).unwrap();
        assert_eq!(found, [tmp.path().join("main.c")]);
    }

    #[test]
    fn missing_directory_has_no_sources() {
        let tmp = TempDir::new().unwrap();
        assert!(discover_sources(&tmp.path().join("nope"), true)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn objects_are_named_after_source_stem() {
        let units = units_for(
            vec![PathBuf::from("/sdk/bsp/drivers/i2c/i2c.c")],
            Path::new("/build/vega_objs/bsp"),
        );
        assert_eq!(
            units.first().unwrap().object,
            Path::new("/build/vega_objs/bsp/i2c.o")
        );
    }

    #[test]
    fn stages_sort_in_execution_order() {
        assert!(Stage::Startup < Stage::BoardSupport);
        assert!(Stage::BoardSupport < Stage::User);
    }
}
