//! End-to-end incremental build: compile stages, link, convert.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cache::StalenessOracle;
use crate::config::Layout;
use crate::error::BuildError;
use crate::link::{Image, Linker};
use crate::process::ToolRunner;
use crate::stages::{Sequencer, StageReport};

/// Summary of one build invocation.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Per-stage compile counts, in stage order.
    pub stages: Vec<StageReport>,
    /// Objects in link order.
    pub objects: Vec<PathBuf>,
    /// Whether the linker ran.
    pub linked: bool,
    /// Whether objcopy ran.
    pub converted: bool,
    /// Linked ELF image.
    pub image: PathBuf,
    /// Raw binary image.
    pub binary: PathBuf,
}

impl BuildReport {
    /// Compiler invocations across all stages.
    pub fn compiled(&self) -> usize {
        self.stages
            .iter()
            .fold(0, |n, s| n.saturating_add(s.compiled))
    }

    /// `true` when nothing had to be rebuilt.
    pub fn up_to_date(&self) -> bool {
        self.compiled() == 0 && !self.linked && !self.converted
    }
}

/// The whole build for one project layout.
pub struct Pipeline<'a, R: ?Sized, C: ?Sized> {
    layout: &'a Layout,
    runner: &'a R,
    cache: &'a C,
}

impl<'a, R, C> Pipeline<'a, R, C>
where
    R: ToolRunner + ?Sized,
    C: StalenessOracle + ?Sized,
{
    /// Pipeline over `layout`, running tools through `runner` and deciding
    /// staleness with `cache`.
    pub fn new(layout: &'a Layout, runner: &'a R, cache: &'a C) -> Self {
        Self {
            layout,
            runner,
            cache,
        }
    }

    /// Bring the image and binary up to date.
    ///
    /// Stages run to completion in order, then the link, then the
    /// conversion. Any failure stops the pipeline at that step.
    pub fn build(&self) -> Result<BuildReport, BuildError> {
        let compiled = Sequencer::new(self.layout, self.runner, self.cache).build_all()?;
        let linker = Linker::new(self.layout);

        let linked = compiled.compiled() > 0 || linker.needs_link(&compiled.spec)?;
        let image = if linked {
            linker.link(self.runner, &compiled.spec)?
        } else {
            tracing::debug!("{} is up to date", linker.image_path().display());
            Image {
                path: linker.image_path().to_path_buf(),
            }
        };

        let converted = linked || linker.needs_convert()?;
        if converted {
            remove_if_exists(&linker.binary_path())?;
            linker.convert(self.runner, &image)?;
        }

        Ok(BuildReport {
            stages: compiled.stages,
            objects: compiled
                .spec
                .objects()
                .iter()
                .map(|o| o.path.clone())
                .collect(),
            linked,
            converted,
            binary: linker.binary_path(),
            image: image.path,
        })
    }
}

/// Remove the object directory, both images and the link record. Returns
/// how many of the directory and the two images existed.
pub fn clean(layout: &Layout) -> Result<usize, BuildError> {
    let mut removed = 0usize;
    let obj_dir = layout.obj_dir();
    match fs::remove_dir_all(&obj_dir) {
        Ok(()) => removed = removed.saturating_add(1),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(BuildError::io(obj_dir, e)),
    }
    for path in [layout.image_path(), layout.binary_path()] {
        if remove_if_exists(&path)? {
            removed = removed.saturating_add(1);
        }
    }
    remove_if_exists(&layout.link_signature_path())?;
    Ok(removed)
}

fn remove_if_exists(path: &Path) -> Result<bool, BuildError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BuildError::io(path, e)),
    }
}
