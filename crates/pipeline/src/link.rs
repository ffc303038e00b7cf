//! Link and post-link binary conversion.
//!
//! The link runs the compiler driver over the ordered [`LinkSpec`] and the
//! BSP static libraries. Once the ELF image exists, `objcopy -O binary`
//! writes the raw flashable image next to it. A failed conversion leaves the
//! ELF on disk without a `.bin`, which counts as a failed build.
//!
//! A successful link records its full command line in `firmware.elf.cmd`.
//! The image is relinked when that record is missing or differs, which
//! catches sources that were added or removed since the last link.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::cache::modified;
use crate::config::Layout;
use crate::error::BuildError;
use crate::process::{Invocation, ToolRunner};
use crate::toolchain::{forward_slashes, ObjectArtifact, ARCH_FLAGS};

/// Static libraries linked inside one `--start-group`/`--end-group` so that
/// circular references between them resolve.
pub const GROUP_LIBS: &[&str] = &["vega", "c", "gcc", "m"];

/// Link flags between the arch flags and the output path.
pub const LDFLAGS_PRE_SCRIPT: &[&str] = &["-nostartfiles"];

/// Link flags following the linker script.
pub const LDFLAGS_POST_SCRIPT: &[&str] = &[
    "--specs=nano.specs",
    "-specs=nosys.specs",
    "-Wl,--gc-sections",
];

/// Ordered objects and library tokens handed to the linker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    objects: Vec<ObjectArtifact>,
    lib_dir: PathBuf,
    libs: Vec<&'static str>,
}

impl LinkSpec {
    /// Spec over `objects`, searching the BSP directory for libraries.
    pub fn new(objects: Vec<ObjectArtifact>, layout: &Layout) -> Self {
        Self {
            objects,
            lib_dir: layout.bsp_dir(),
            libs: GROUP_LIBS.to_vec(),
        }
    }

    /// Objects in link order.
    pub fn objects(&self) -> &[ObjectArtifact] {
        &self.objects
    }

    /// Library search directory.
    pub fn lib_dir(&self) -> &Path {
        &self.lib_dir
    }

    /// Trailing library tokens, `-L<dir> -Wl,--start-group -l... -Wl,--end-group`.
    pub fn library_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.libs.len().saturating_add(3));
        args.push(format!("-L{}", forward_slashes(&self.lib_dir)));
        args.push("-Wl,--start-group".to_owned());
        args.extend(self.libs.iter().map(|l| format!("-l{l}")));
        args.push("-Wl,--end-group".to_owned());
        args
    }

    /// Archives from the search directory that exist on disk, e.g.
    /// `<sdk>/bsp/libvega.a`. Libraries resolved from the toolchain's own
    /// sysroot are not listed.
    pub fn library_files(&self) -> Vec<PathBuf> {
        self.libs
            .iter()
            .map(|l| self.lib_dir.join(format!("lib{l}.a")))
            .filter(|p| p.is_file())
            .collect()
    }
}

/// ELF image produced by the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Path of the `.elf`.
    pub path: PathBuf,
}

/// Raw binary produced from an [`Image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    /// Path of the `.bin`.
    pub path: PathBuf,
}

/// Synthesises and runs the link and conversion commands.
#[derive(Debug, Clone)]
pub struct Linker {
    gcc: PathBuf,
    objcopy: PathBuf,
    script: PathBuf,
    image: PathBuf,
    signature: PathBuf,
}

impl Linker {
    /// Linker for `layout`.
    pub fn new(layout: &Layout) -> Self {
        Self {
            gcc: layout.gcc(),
            objcopy: layout.objcopy(),
            script: layout.linker_script(),
            image: layout.image_path(),
            signature: layout.link_signature_path(),
        }
    }

    /// Path the image is linked to.
    pub fn image_path(&self) -> &Path {
        &self.image
    }

    /// Path the raw binary is written to: the image path with `.bin`.
    pub fn binary_path(&self) -> PathBuf {
        self.image.with_extension("bin")
    }

    /// Link command line for `spec`.
    pub fn link_invocation(&self, spec: &LinkSpec) -> Invocation {
        Invocation::new(&self.gcc)
            .args(ARCH_FLAGS)
            .args(LDFLAGS_PRE_SCRIPT)
            .arg(format!("-T{}", forward_slashes(&self.script)))
            .args(LDFLAGS_POST_SCRIPT)
            .arg("-o")
            .arg(&self.image)
            .args(spec.objects().iter().map(|o| &o.path))
            .args(spec.library_args())
    }

    /// Conversion command line from `image` to its sibling `.bin`.
    pub fn convert_invocation(&self, image: &Image) -> Invocation {
        Invocation::new(&self.objcopy)
            .args(["-O", "binary"])
            .arg(&image.path)
            .arg(image.path.with_extension("bin"))
    }

    /// Record of the last successful link command.
    pub fn signature_path(&self) -> &Path {
        &self.signature
    }

    /// Link `spec` into the image. Fatal on non-zero exit.
    pub fn link<R: ToolRunner + ?Sized>(
        &self,
        runner: &R,
        spec: &LinkSpec,
    ) -> Result<Image, BuildError> {
        if let Some(dir) = self.image.parent() {
            fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
        }
        tracing::info!(
            objects = spec.objects().len(),
            "Linking {}...",
            self.image.display()
        );
        let inv = self.link_invocation(spec);
        remove_file_if_exists(&self.signature)?;
        runner.run(&inv)?.check(&inv)?;
        fs::write(&self.signature, signature(&inv))
            .map_err(|e| BuildError::io(&self.signature, e))?;
        Ok(Image {
            path: self.image.clone(),
        })
    }

    /// Convert `image` to a raw binary. Fatal on non-zero exit.
    pub fn convert<R: ToolRunner + ?Sized>(
        &self,
        runner: &R,
        image: &Image,
    ) -> Result<BinaryImage, BuildError> {
        let inv = self.convert_invocation(image);
        runner.run(&inv)?.check(&inv)?;
        let path = image.path.with_extension("bin");
        tracing::info!("Binary generated: {}", path.display());
        Ok(BinaryImage { path })
    }

    /// `true` when the image is missing, was linked with a different command
    /// line, or is older than any object, the linker script or a BSP archive.
    pub fn needs_link(&self, spec: &LinkSpec) -> Result<bool, BuildError> {
        let Some(image_time) = modified(&self.image)? else {
            return Ok(true);
        };

        let expected = signature(&self.link_invocation(spec));
        let recorded = match fs::read_to_string(&self.signature) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(BuildError::io(&self.signature, e)),
        };
        if recorded.as_deref() != Some(expected.as_str()) {
            tracing::debug!("link command changed since {}", self.image.display());
            return Ok(true);
        }

        let inputs = spec
            .objects()
            .iter()
            .map(|o| o.path.clone())
            .chain(std::iter::once(self.script.clone()))
            .chain(spec.library_files());
        for input in inputs {
            match modified(&input)? {
                Some(t) if t <= image_time => {}
                _ => return Ok(true),
            }
        }
        Ok(false)
    }

    /// `true` when the binary is missing or older than the image.
    pub fn needs_convert(&self) -> Result<bool, BuildError> {
        let bin = self.binary_path();
        match (modified(&self.image)?, modified(&bin)?) {
            (Some(image), Some(bin)) => Ok(image > bin),
            _ => Ok(true),
        }
    }
}

fn signature(inv: &Invocation) -> String {
    format!("{inv}\n")
}

fn remove_file_if_exists(path: &Path) -> Result<(), BuildError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildError::io(path, e)),
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
    use crate::config::ProjectConfig;
    use tempfile::TempDir;

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

    fn artifact(path: &str) -> ObjectArtifact {
        ObjectArtifact {
            path: PathBuf::from(path),
            source: PathBuf::new(),
        }
    }

    fn strings(inv: &Invocation) -> Vec<String> {
        inv.arguments()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn link_command_keeps_object_order_and_groups_libraries() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let spec = LinkSpec::new(vec![artifact("crt.o"), artifact("uart.o"), artifact("main.o")], &layout);
        let args = strings(&Linker::new(&layout).link_invocation(&spec));

        let pos = |needle: &str| args.iter().position(|a| a == needle).unwrap();
        assert!(pos("crt.o") < pos("uart.o"));
        assert!(pos("uart.o") < pos("main.o"));
        assert!(pos("-nostartfiles") < pos("--specs=nano.specs"));
        assert!(args.iter().any(|a| a.starts_with("-T") && a.ends_with("bsp/common/mbl.lds")));
        assert!(pos("-Wl,--gc-sections") < pos("-o"));

        let tail: Vec<_> = args[pos("-Wl,--start-group")..].to_vec();
        assert_eq!(
            tail,
            ["-Wl,--start-group", "-lvega", "-lc", "-lgcc", "-lm", "-Wl,--end-group"]
        );
        assert!(pos("main.o") < pos("-Wl,--start-group"));
    }

    #[test]
    fn convert_writes_sibling_binary() {
        let tmp = TempDir::new().unwrap();
        let linker = Linker::new(&layout(&tmp));
        let image = Image {
            path: linker.image_path().to_path_buf(),
        };
        let args = strings(&linker.convert_invocation(&image));
        assert_eq!(args[..2], ["-O", "binary"]);
        assert!(args[2].ends_with("firmware.elf"));
        assert!(args[3].ends_with("firmware.bin"));
    }

    /// Writes the `-o` target of every call.
    struct Writer;

    impl ToolRunner for Writer {
        fn run(&self, inv: &Invocation) -> Result<crate::process::ToolOutput, BuildError> {
            if let Some(out) = inv.value_after("-o") {
                fs::write(out, "elf").unwrap();
            }
            Ok(crate::process::ToolOutput::exited(0))
        }
    }

    fn with_script(tmp: &TempDir) -> Layout {
        let layout = layout(tmp);
        fs::create_dir_all(layout.common_dir()).unwrap();
        fs::write(layout.linker_script(), "SECTIONS {}").unwrap();
        layout
    }

    #[test]
    fn link_records_its_command_line() {
        let tmp = TempDir::new().unwrap();
        let layout = with_script(&tmp);
        let linker = Linker::new(&layout);
        let spec = LinkSpec::new(Vec::new(), &layout);

        linker.link(&Writer, &spec).unwrap();

        let recorded = fs::read_to_string(linker.signature_path()).unwrap();
        assert!(recorded.contains("-nostartfiles"));
        assert!(!linker.needs_link(&spec).unwrap());
    }

    #[test]
    fn changed_object_set_needs_link() {
        let tmp = TempDir::new().unwrap();
        let layout = with_script(&tmp);
        let linker = Linker::new(&layout);
        let obj = tmp.path().join("main.o");
        fs::write(&obj, "o").unwrap();
        let with_main = LinkSpec::new(vec![artifact(obj.to_str().unwrap())], &layout);
        linker.link(&Writer, &with_main).unwrap();
        assert!(!linker.needs_link(&with_main).unwrap());

        let none = LinkSpec::new(Vec::new(), &layout);
        assert!(linker.needs_link(&none).unwrap());
    }

    #[test]
    fn newer_bsp_archive_needs_link() {
        let tmp = TempDir::new().unwrap();
        let layout = with_script(&tmp);
        let linker = Linker::new(&layout);
        let archive = layout.bsp_dir().join("libvega.a");
        fs::write(&archive, "!<arch>").unwrap();
        let spec = LinkSpec::new(Vec::new(), &layout);
        assert_eq!(spec.library_files(), [archive.clone()]);

        linker.link(&Writer, &spec).unwrap();
        assert!(!linker.needs_link(&spec).unwrap());

        fs::write(&archive, "!<arch>\nnew").unwrap();
        fs::File::options()
            .write(true)
            .open(&archive)
            .unwrap()
            .set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(60))
            .unwrap();
        assert!(linker.needs_link(&spec).unwrap());
    }

    #[test]
    fn missing_image_needs_link_and_convert() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let linker = Linker::new(&layout);
        let spec = LinkSpec::new(Vec::new(), &layout);
        assert!(linker.needs_link(&spec).unwrap());
        assert!(linker.needs_convert().unwrap());
    }
}
