//! CLI surface: `list`, `version`, `reboot`, `flash`, `dump`, `extract`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kbl-flash")]
#[command(author, version, about = "Firmware flashing tool for Holtek/CYKB-family keyboard bootloaders")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List connected devices this tool recognizes
    #[command(visible_alias = "ls")]
    List,

    /// Read the firmware version string from a device
    #[command(visible_aliases = ["ver", "v"])]
    Version {
        /// Index into `list` output, when more than one device is connected
        #[arg(long)]
        index: Option<usize>,
    },

    /// Reboot a device into or out of bootloader mode
    Reboot {
        #[arg(long)]
        index: Option<usize>,
        /// Reboot into bootloader mode instead of application mode
        #[arg(long)]
        bootloader: bool,
    },

    /// Flash a firmware image to a device
    Flash {
        #[arg(long)]
        index: Option<usize>,
        /// Path to the plaintext firmware image
        file: PathBuf,
        /// Version string to record alongside the flashed image
        #[arg(long)]
        version: String,
    },

    /// Dump a device's application flash region to a file
    Dump {
        #[arg(long)]
        index: Option<usize>,
        /// Output file path
        file: PathBuf,
    },

    /// Extract firmware sections from a vendor installer package
    Extract {
        /// Installer trailer format: maajonsn, maav101, maav102, maav105, maav106, kbp_cykb
        format: String,
        /// Path to the installer executable or its outer wrapper
        file: PathBuf,
        /// Output directory for extracted sections (defaults to the input file's directory)
        dir: Option<PathBuf>,
    },
}
