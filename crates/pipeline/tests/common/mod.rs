//! Shared fixtures: a scratch SDK/project tree and a recording tool runner.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use pipeline::{BuildError, Invocation, Layout, ProjectConfig, ToolOutput, ToolRunner};
use tempfile::TempDir;

/// Fake toolchain. Records every call and creates the file each call would
/// produce, so timestamps behave like a real build.
#[derive(Default)]
pub struct FakeRunner {
    calls: RefCell<Vec<Invocation>>,
    attached: RefCell<Vec<Invocation>>,
    fail_on: Option<String>,
    flasher_status: i32,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit 1 for any call with an argument or program containing `needle`.
    pub fn failing_on(needle: &str) -> Self {
        Self {
            fail_on: Some(needle.to_owned()),
            ..Self::default()
        }
    }

    /// Attached (flasher) calls exit with `status`.
    pub fn with_flasher_status(status: i32) -> Self {
        Self {
            flasher_status: status,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn attached_calls(&self) -> Vec<Invocation> {
        self.attached.borrow().clone()
    }

    pub fn reset(&self) {
        self.calls.borrow_mut().clear();
        self.attached.borrow_mut().clear();
    }

    pub fn compiles(&self) -> Vec<Invocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| is_gcc(c) && has_arg(c, "-c"))
            .cloned()
            .collect()
    }

    pub fn links(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| is_gcc(c) && !has_arg(c, "-c"))
            .count()
    }

    pub fn converts(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.tool_name().ends_with("objcopy"))
            .count()
    }

    /// File names of compiled sources, in call order.
    pub fn compiled_names(&self) -> Vec<String> {
        self.compiles()
            .iter()
            .filter_map(|c| c.value_after("-c"))
            .map(|s| {
                Path::new(s)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    fn should_fail(&self, inv: &Invocation) -> bool {
        let Some(needle) = &self.fail_on else {
            return false;
        };
        inv.program().to_string_lossy().contains(needle.as_str())
            || inv
                .arguments()
                .iter()
                .any(|a| a.to_string_lossy().contains(needle.as_str()))
    }
}

impl ToolRunner for FakeRunner {
    fn run(&self, inv: &Invocation) -> Result<ToolOutput, BuildError> {
        self.calls.borrow_mut().push(inv.clone());
        if self.should_fail(inv) {
            return Ok(ToolOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: "error: simulated failure".into(),
            });
        }
        let output = if inv.tool_name().ends_with("objcopy") {
            inv.arguments().last().map(PathBuf::from)
        } else {
            inv.value_after("-o").map(PathBuf::from)
        };
        if let Some(path) = output {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "artifact").unwrap();
        }
        Ok(ToolOutput::exited(0))
    }

    fn run_attached(&self, inv: &Invocation) -> Result<ToolOutput, BuildError> {
        self.attached.borrow_mut().push(inv.clone());
        Ok(ToolOutput::exited(self.flasher_status))
    }
}

fn is_gcc(inv: &Invocation) -> bool {
    inv.tool_name().ends_with("gcc")
}

fn has_arg(inv: &Invocation, arg: &str) -> bool {
    inv.arguments().iter().any(|a| a == arg)
}

/// A scratch SDK, toolchain directory, flasher directory and project.
pub struct Project {
    pub tmp: TempDir,
}

impl Project {
    /// SDK with the given driver sources (relative to `bsp/drivers`) and a
    /// project with the given user sources (relative to `src`).
    pub fn new(drivers: &[&str], user: &[&str]) -> Self {
        let tmp = TempDir::new().unwrap();
        let project = Self { tmp };
        let bsp = project.root().join("sdk/bsp");
        for file in ["common/crt.S", "common/stdlib.c", "common/rawfloat.c", "common/mbl.lds", "include/stdlib.h"] {
            project.write(&bsp.join(file));
        }
        fs::create_dir_all(bsp.join("drivers")).unwrap();
        for file in drivers {
            project.write(&bsp.join("drivers").join(file));
        }
        fs::create_dir_all(project.root().join("tools")).unwrap();
        fs::create_dir_all(project.root().join("src")).unwrap();
        for file in user {
            project.add_user_source(file);
        }
        let flasher = project.root().join("flasher");
        project.write(&flasher.join("flasher.sh"));
        project.write(&flasher.join("flasher.bat"));
        project
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn config(&self) -> ProjectConfig {
        ProjectConfig {
            sdk_path: Some(self.root().join("sdk")),
            tools_path: Some(self.root().join("tools")),
            src_dir: self.root().join("src"),
            build_dir: self.root().join("build"),
            flasher_dir: Some(self.root().join("flasher")),
            ..ProjectConfig::default()
        }
    }

    pub fn layout(&self) -> Layout {
        self.config().validate().unwrap()
    }

    pub fn add_user_source(&self, name: &str) -> PathBuf {
        let path = self.root().join("src").join(name);
        self.write(&path);
        path
    }

    fn write(&self, path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("/* {} */\n", path.display())).unwrap();
    }
}

/// Set a file's modification time `secs` seconds into the past.
pub fn backdate(path: &Path, secs: u64) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(secs))
        .unwrap();
}

pub fn mtime(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}
