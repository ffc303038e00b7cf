use anyhow::{Context, Result};
use colored::Colorize;
use pipeline::actions::UPLOAD;
use pipeline::upload::{resolve_port, UPLOAD_PORT_ENV};
use pipeline::{install_flasher, ActionContext, ActionTable, BuildError, SystemRunner};
use std::time::Instant;

use crate::options::{CacheKind, ImageKind, ProjectArgs};

/// Build, then run the `upload` action. Returns the flasher's exit status.
pub fn run(
    project: &ProjectArgs,
    upload_port: Option<String>,
    image: ImageKind,
    cache: CacheKind,
) -> Result<i32> {
    let env_port = std::env::var(UPLOAD_PORT_ENV).ok();
    upload(project, upload_port, env_port, image, cache)
}

fn upload(
    project: &ProjectArgs,
    upload_port: Option<String>,
    env_port: Option<String>,
    image: ImageKind,
    cache: CacheKind,
) -> Result<i32> {
    // Upload preconditions are checked before anything is compiled.
    if resolve_port(upload_port.as_deref(), env_port.as_deref()).is_none() {
        return Ok(no_port());
    }

    let layout = project
        .config(upload_port, image)
        .validate()
        .context("invalid project configuration")?;
    layout
        .flasher_script()
        .context("invalid project configuration")?;

    crate::build::build(&layout, cache, true)?;

    let mut actions = ActionTable::host_defaults();
    install_flasher(&mut actions, env_port);

    println!("{}", "📡 Flashing VEGA board...".cyan().bold());
    let start = Instant::now();
    let ctx = ActionContext {
        layout: &layout,
        runner: &SystemRunner,
    };

    let status = match actions.run(UPLOAD, &ctx) {
        Ok(status) => status,
        Err(BuildError::NoUploadPort) => return Ok(no_port()),
        Err(e) => return Err(e).context("upload failed"),
    };

    if status == 0 {
        println!(
            "{}",
            format!("✓ Flash successful in {:.2}s", start.elapsed().as_secs_f64()).green()
        );
    } else {
        eprintln!(
            "{}",
            format!("✗ Flasher exited with status {status}").red().bold()
        );
    }
    println!();
    Ok(status)
}

fn no_port() -> i32 {
    eprintln!("{}", "✗ No upload port specified.".red().bold());
    eprintln!(
        "   {}",
        "Run: vega upload --upload-port COM3 (or set UPLOAD_PORT)".dimmed()
    );
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn project(root: &Path, flasher_dir: Option<&Path>) -> ProjectArgs {
        for dir in ["sdk/bsp/common", "tools", "src"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(root.join("sdk/bsp/common/crt.S"), "").unwrap();
        fs::write(root.join("src/main.c"), "int main(void){return 0;}").unwrap();
        ProjectArgs {
            sdk_path: Some(root.join("sdk")),
            tools_path: Some(root.join("tools")),
            flasher_dir: flasher_dir.map(Path::to_path_buf),
            src_dir: root.join("src"),
            build_dir: root.join("build"),
        }
    }

    #[test]
    fn missing_port_exits_1_before_building() {
        let tmp = TempDir::new().unwrap();
        let args = project(tmp.path(), Some(tmp.path()));

        let status = upload(&args, None, None, ImageKind::Bin, CacheKind::Mtime).unwrap();

        assert_eq!(status, 1);
        assert!(!tmp.path().join("build").exists());
    }

    #[test]
    fn missing_flasher_dir_fails_before_building() {
        let tmp = TempDir::new().unwrap();
        let args = project(tmp.path(), None);

        let err = upload(
            &args,
            Some("COM3".into()),
            None,
            ImageKind::Bin,
            CacheKind::Mtime,
        )
        .unwrap_err();

        assert!(matches!(
            err.root_cause().downcast_ref::<BuildError>(),
            Some(BuildError::ConfigurationMissing {
                option: "vega_flasher_dir"
            })
        ));
        assert!(!tmp.path().join("build").exists());
    }

    #[test]
    fn missing_flasher_script_fails_before_building() {
        let tmp = TempDir::new().unwrap();
        let flasher = tmp.path().join("flasher");
        fs::create_dir_all(&flasher).unwrap();
        let args = project(tmp.path(), Some(&flasher));

        let err = upload(&args, None, Some("COM3".into()), ImageKind::Bin, CacheKind::Mtime)
            .unwrap_err();

        assert!(matches!(
            err.root_cause().downcast_ref::<BuildError>(),
            Some(BuildError::PathNotFound { .. })
        ));
        assert!(!tmp.path().join("build").exists());
    }
}
