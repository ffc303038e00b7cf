use anyhow::Result;
use colored::Colorize;
use pipeline::config::flasher_script_name;
use pipeline::{Layout, Toolchain};
use std::path::Path;

use crate::options::ProjectArgs;

pub fn run(project: &ProjectArgs) -> Result<()> {
    let layout = project.layout()?;
    print_layout(&layout, project.flasher_dir.as_deref());
    Ok(())
}

fn print_layout(layout: &Layout, flasher_dir: Option<&Path>) {
    println!();
    println!("{}", "VEGA project".cyan().bold());
    row("SDK", layout.sdk());
    row("Sources", layout.src_dir());
    row("Build output", layout.build_dir());
    println!();
    println!("{}", "Toolchain".cyan().bold());
    row("gcc", Toolchain::new(layout).gcc());
    row("ar", &layout.ar());
    row("objcopy", &layout.objcopy());
    row("Linker script", &layout.linker_script());
    println!();
    println!("{}", "Upload".cyan().bold());
    match flasher_dir {
        Some(dir) => row("Flasher", &dir.join(flasher_script_name())),
        None => println!("   {:<14} {}", "Flasher", "not configured".yellow()),
    }
    row("Image", &layout.flash_image_path());
    println!();
}

fn row(label: &str, path: &Path) {
    let exists = if path.exists() {
        "✓".green()
    } else {
        "✗".red()
    };
    println!("   {label:<14} {exists} {}", path.display().to_string().dimmed());
}
