use anyhow::{Context, Result};
use colored::Colorize;

use crate::options::ProjectArgs;

pub fn run(project: &ProjectArgs) -> Result<()> {
    let layout = project.layout()?;
    let removed = pipeline::clean(&layout).context("clean failed")?;

    if removed == 0 {
        println!("{}", "Nothing to clean".dimmed());
    } else {
        println!(
            "{}",
            format!("✓ Removed build artifacts from {}", layout.build_dir().display()).green()
        );
    }
    Ok(())
}
