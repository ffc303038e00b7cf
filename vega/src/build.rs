use anyhow::{Context, Result};
use colored::Colorize;
use pipeline::{BuildReport, Layout, Pipeline, SystemRunner};
use std::time::Instant;

use crate::options::{CacheKind, ProjectArgs};

pub fn run(project: &ProjectArgs, cache: CacheKind, json: bool) -> Result<BuildReport> {
    let layout = project.layout()?;
    let report = build(&layout, cache, !json)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(report)
}

/// Run the pipeline for `layout`, printing progress when `verbose`.
pub fn build(layout: &Layout, cache: CacheKind, verbose: bool) -> Result<BuildReport> {
    if verbose {
        println!();
        println!("{}", "🔨 Building firmware...".cyan().bold());
        println!("   {}", layout.src_dir().display().to_string().dimmed());
        println!();
    }

    let start = Instant::now();
    let report = match Pipeline::new(layout, &SystemRunner, cache.oracle()).build() {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", "✗ Build failed".red().bold());
            if let pipeline::BuildError::ToolFailed { stderr, .. } = &e {
                eprintln!();
                eprintln!("{stderr}");
            }
            return Err(e).context("build failed");
        }
    };

    if verbose {
        for stage in &report.stages {
            println!(
                "   {:<18} {} compiled, {} up to date",
                stage.stage.name(),
                stage.compiled,
                stage.reused
            );
        }
        println!();
        if report.up_to_date() {
            println!("{}", "✓ Firmware is up to date".green());
        } else {
            println!(
                "{}",
                format!("✓ Build successful in {:.2}s", start.elapsed().as_secs_f64()).green()
            );
        }
        println!("   {}", report.image.display().to_string().dimmed());
        println!("   {}", report.binary.display().to_string().dimmed());
        println!();
    }
    Ok(report)
}
