//! Single-file compile commands for the VEGA cross compiler.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Layout;
use crate::error::BuildError;
use crate::process::{Invocation, ToolRunner};

/// Architecture and ABI flags shared by every compile and the link.
pub const ARCH_FLAGS: &[&str] = &["-march=rv32im", "-mabi=ilp32", "-mcmodel=medany"];

/// Preprocessor definitions for ordinary sources.
pub const DEFINES: &[&str] = &["-DTHEJAS32"];

/// Optimisation and diagnostic flags for ordinary sources.
pub const OPT_FLAGS: &[&str] = &[
    "-O0",
    "-g",
    "-fno-builtin-printf",
    "-fno-builtin-puts",
    "-fno-builtin-memcmp",
    "-fno-common",
    "-fno-pic",
    "-ffunction-sections",
    "-fdata-sections",
];

/// Flag set a source is compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileProfile {
    /// Arch/ABI, includes, defines, optimisation flags and the forced
    /// stdlib include.
    Full,
    /// Arch/ABI and includes only, for the hand-written start-up assembly.
    Startup,
}

/// A compiled object and the source it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectArtifact {
    /// Absolute output path.
    pub path: PathBuf,
    /// Absolute path of the parent source.
    pub source: PathBuf,
}

/// Compiler front end bound to one project layout.
#[derive(Debug, Clone)]
pub struct Toolchain {
    gcc: PathBuf,
    includes: Vec<String>,
    forced_include: PathBuf,
}

impl Toolchain {
    /// Toolchain for `layout`.
    pub fn new(layout: &Layout) -> Self {
        let includes = [layout.include_dir(), layout.bsp_dir(), layout.src_dir().to_path_buf()]
            .iter()
            .map(|dir| format!("-I{}", forward_slashes(dir)))
            .collect();
        Self {
            gcc: layout.gcc(),
            includes,
            forced_include: layout.forced_include(),
        }
    }

    /// Path of the compiler driver.
    pub fn gcc(&self) -> &Path {
        &self.gcc
    }

    /// Command line compiling `source` into `object`.
    pub fn compile_invocation(
        &self,
        source: &Path,
        object: &Path,
        profile: CompileProfile,
    ) -> Invocation {
        let inv = Invocation::new(&self.gcc)
            .args(ARCH_FLAGS)
            .args(&self.includes);
        let inv = match profile {
            CompileProfile::Full => inv
                .args(DEFINES)
                .args(OPT_FLAGS)
                .arg("-include")
                .arg(forward_slashes(&self.forced_include)),
            CompileProfile::Startup => inv,
        };
        inv.arg("-c").arg(source).arg("-o").arg(object)
    }

    /// Compile `source` into `object`, creating the output directory first.
    ///
    /// Blocks until the compiler exits. A non-zero exit is returned as
    /// [`BuildError::ToolFailed`] and must abort the build.
    pub fn compile<R: ToolRunner + ?Sized>(
        &self,
        runner: &R,
        source: &Path,
        object: &Path,
        profile: CompileProfile,
    ) -> Result<ObjectArtifact, BuildError> {
        if let Some(dir) = object.parent() {
            fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
        }
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        tracing::info!("Compiling {name}...");

        let inv = self.compile_invocation(source, object, profile);
        runner.run(&inv)?.check(&inv)?;

        Ok(ObjectArtifact {
            path: object.to_path_buf(),
            source: source.to_path_buf(),
        })
    }
}

/// Render a path with `/` separators; the toolchain accepts them on every
/// host and they survive being embedded in `-I`/`-T` flags.
pub fn forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::process::ToolOutput;
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct Recorder {
        calls: RefCell<Vec<Invocation>>,
        status: i32,
    }

    impl ToolRunner for Recorder {
        fn run(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
            self.calls.borrow_mut().push(invocation.clone());
            Ok(ToolOutput::exited(self.status))
        }
    }

    fn layout(tmp: &TempDir) -> Layout {
        let root = tmp.path();
        for dir in ["sdk/bsp", "tools", "src"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        ProjectConfig {
            sdk_path: Some(root.join("sdk")),
            tools_path: Some(root.join("tools")),
            src_dir: root.join("src"),
            build_dir: root.join("build"),
            ..ProjectConfig::default()
        }
        .validate()
        .unwrap()
    }

    fn args(inv: &Invocation) -> Vec<String> {
        inv.arguments()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn full_profile_orders_flag_groups() {
        let tmp = TempDir::new().unwrap();
        let tc = Toolchain::new(&layout(&tmp));
        let inv = tc.compile_invocation(Path::new("a.c"), Path::new("a.o"), CompileProfile::Full);
        let args = args(&inv);

        assert_eq!(args.get(..3).unwrap(), ARCH_FLAGS);
        let pos = |needle: &str| args.iter().position(|a| a == needle).unwrap();
        assert!(pos("-DTHEJAS32") > pos("-mcmodel=medany"));
        assert!(pos("-O0") > pos("-DTHEJAS32"));
        assert!(pos("-include") > pos("-fdata-sections"));
        assert_eq!(args.get(args.len() - 4..).unwrap(), ["-c", "a.c", "-o", "a.o"]);
    }

    #[test]
    fn startup_profile_omits_optimisation_and_library_flags() {
        let tmp = TempDir::new().unwrap();
        let tc = Toolchain::new(&layout(&tmp));
        let inv = tc.compile_invocation(
            Path::new("crt.S"),
            Path::new("crt.o"),
            CompileProfile::Startup,
        );
        let args = args(&inv);
        assert!(!args.iter().any(|a| a == "-O0" || a == "-include" || a == "-DTHEJAS32"));
        assert_eq!(args.iter().filter(|a| a.starts_with("-I")).count(), 3);
    }

    #[test]
    fn compile_creates_output_directory() {
        let tmp = TempDir::new().unwrap();
        let tc = Toolchain::new(&layout(&tmp));
        let runner = Recorder {
            calls: RefCell::default(),
            status: 0,
        };
        let obj = tmp.path().join("build/vega_objs/user/main.o");
        let artifact = tc
            .compile(&runner, &tmp.path().join("src/main.c"), &obj, CompileProfile::Full)
            .unwrap();
        assert!(obj.parent().unwrap().is_dir());
        assert_eq!(artifact.path, obj);
        assert_eq!(runner.calls.borrow().len(), 1);
    }

    #[test]
    fn compiler_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let tc = Toolchain::new(&layout(&tmp));
        let runner = Recorder {
            calls: RefCell::default(),
            status: 1,
        };
        let err = tc
            .compile(
                &runner,
                &tmp.path().join("src/main.c"),
                &tmp.path().join("main.o"),
                CompileProfile::Full,
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::ToolFailed { status: Some(1), .. }));
    }
}
