// file: src/cli/args.rs
// version: 1.2.0
// guid: f8a05c31-29d7-4e84-b6f0-17c3d94ae52b

//! Command line argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ubuntu-image-builder")]
#[command(about = "Build bootable Ubuntu disk images from declarative image definitions")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug output (prints the calculated states and command output)
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a classic (deb-based) Ubuntu image from an image definition
    Classic {
        /// Path to the image definition YAML file
        image_definition: PathBuf,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Build an Ubuntu Core image from a model assertion
    Snap {
        /// Path to the model assertion
        model_assertion: PathBuf,

        #[command(flatten)]
        build: BuildArgs,
    },
}

#[derive(Args)]
pub struct BuildArgs {
    /// Working directory to use; kept after the build for inspection
    #[arg(short = 'w', long)]
    pub workdir: Option<PathBuf>,

    /// Directory the finished images are written to
    #[arg(short = 'O', long)]
    pub output_dir: Option<PathBuf>,

    /// Run up to, but not including, the named step
    #[arg(short = 'u', long, value_name = "STEP")]
    pub until: Option<String>,

    /// Run through the named step, inclusive
    #[arg(short = 't', long, value_name = "STEP")]
    pub thru: Option<String>,

    /// Continue an interrupted build in an existing workdir
    #[arg(short = 'r', long)]
    pub resume: bool,

    /// Logical/physical sector size of the image (512 or 4096)
    #[arg(long, default_value_t = 512)]
    pub sector_size: u64,

    /// Extra snap to preseed, as NAME or NAME=CHANNEL (repeatable)
    #[arg(long = "snap", value_name = "NAME[=CHANNEL]")]
    pub snaps: Vec<String>,

    /// File to install as .disk/info in the image rootfs
    #[arg(long, value_name = "FILE")]
    pub disk_info: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_args_parse() {
        let cli = Cli::try_parse_from([
            "ubuntu-image-builder",
            "--debug",
            "classic",
            "definition.yaml",
            "--workdir",
            "/tmp/work",
            "--snap",
            "lxd",
            "--snap",
            "hello=candidate",
            "--sector-size",
            "4096",
        ])
        .unwrap();
        assert!(cli.debug);
        match cli.command {
            Commands::Classic {
                image_definition,
                build,
            } => {
                assert_eq!(image_definition, PathBuf::from("definition.yaml"));
                assert_eq!(build.workdir, Some(PathBuf::from("/tmp/work")));
                assert_eq!(build.snaps, vec!["lxd", "hello=candidate"]);
                assert_eq!(build.sector_size, 4096);
            }
            _ => panic!("expected classic subcommand"),
        }
    }

    #[test]
    fn test_snap_args_parse() {
        let cli = Cli::try_parse_from([
            "ubuntu-image-builder",
            "snap",
            "model.assertion",
            "--until",
            "make_disk",
        ])
        .unwrap();
        match cli.command {
            Commands::Snap {
                model_assertion,
                build,
            } => {
                assert_eq!(model_assertion, PathBuf::from("model.assertion"));
                assert_eq!(build.until.as_deref(), Some("make_disk"));
                assert_eq!(build.sector_size, 512);
            }
            _ => panic!("expected snap subcommand"),
        }
    }

    #[test]
    fn test_missing_positional_rejected() {
        assert!(Cli::try_parse_from(["ubuntu-image-builder", "classic"]).is_err());
    }
}
