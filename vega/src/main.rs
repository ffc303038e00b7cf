// Tooling crate: unwrap/expect/panic acceptable outside the library.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod build;
mod clean;
mod info;
mod options;
mod upload;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use options::{CacheKind, ImageKind, ProjectArgs};

#[derive(Parser)]
#[command(name = "vega")]
#[command(about = "Build and flash VEGA THEJAS32 firmware", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    project: ProjectArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile stale sources, link firmware.elf and convert it to firmware.bin
    Build {
        /// Print the build report as JSON on stdout
        #[arg(long)]
        json: bool,
        /// Staleness check for object files
        #[arg(long, value_enum, default_value_t = CacheKind::Mtime)]
        cache: CacheKind,
    },
    /// Build, then flash the image through flasher <PORT> <IMAGE>
    Upload {
        /// Serial port of the board (falls back to UPLOAD_PORT)
        #[arg(long)]
        upload_port: Option<String>,
        /// Which image to hand to the flasher
        #[arg(long, value_enum, default_value_t = ImageKind::Bin)]
        image: ImageKind,
        /// Staleness check for object files
        #[arg(long, value_enum, default_value_t = CacheKind::Mtime)]
        cache: CacheKind,
    },
    /// Remove object files and firmware images
    Clean,
    /// Show resolved SDK, toolchain and output paths
    Info,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Build { json, cache } => build::run(&cli.project, cache, json).map(|_| 0),
        Commands::Upload {
            upload_port,
            image,
            cache,
        } => upload::run(&cli.project, upload_port, image, cache),
        Commands::Clean => clean::run(&cli.project).map(|()| 0),
        Commands::Info => info::run(&cli.project).map(|()| 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn project_options_are_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "vega",
            "upload",
            "--sdk-path",
            "/opt/vega/sdk",
            "--upload-port",
            "COM3",
            "--image",
            "elf",
        ])
        .unwrap();
        assert_eq!(
            cli.project.sdk_path.as_deref(),
            Some(std::path::Path::new("/opt/vega/sdk"))
        );
        match cli.command {
            Commands::Upload {
                upload_port, image, ..
            } => {
                assert_eq!(upload_port.as_deref(), Some("COM3"));
                assert_eq!(image, ImageKind::Elf);
            }
            _ => panic!("expected upload"),
        }
    }

    #[test]
    fn build_defaults_to_timestamp_cache() {
        let cli = Cli::try_parse_from(["vega", "build"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Build {
                json: false,
                cache: CacheKind::Mtime
            }
        ));
    }
}
