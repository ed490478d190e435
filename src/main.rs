//! kbl-flash CLI entry point.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use hidapi::HidApi;
use tracing::{error, info};

mod cli;
use cli::{Cli, Commands};

use kbl_flash::error::DriverError;
use kbl_flash::extract::TrailerFormat;
use kbl_flash::firmware::FirmwareImage;
use kbl_flash::{orchestrate, SilentProgress};

fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "kbl_flash=info",
        1 => "kbl_flash=debug",
        _ => "kbl_flash=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            exit_code_for(&err)
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if let Some(DriverError::DeviceMissing) = err.downcast_ref::<DriverError>() {
        return ExitCode::from(2);
    }
    if let Some(DriverError::DeviceAmbiguous(_)) = err.downcast_ref::<DriverError>() {
        return ExitCode::from(3);
    }
    ExitCode::FAILURE
}

fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::List => {
            let api = HidApi::new()?;
            for device in orchestrate::list(&api) {
                println!(
                    "[{}] {} ({:04x}:{:04x}) family={:?} bootloader={}",
                    device.index, device.name, device.vid, device.pid, device.family, device.in_bootloader
                );
            }
            Ok(())
        }

        Commands::Version { index } => {
            let api = HidApi::new()?;
            let version = orchestrate::version(&api, index)?;
            println!("{version}");
            Ok(())
        }

        Commands::Reboot { index, bootloader } => {
            let api = HidApi::new()?;
            orchestrate::reboot(&api, index, bootloader)?;
            info!("reboot requested");
            Ok(())
        }

        Commands::Flash { index, file, version } => {
            let api = HidApi::new()?;
            let image = FirmwareImage::load(&file)?;
            let mut progress = SilentProgress;
            orchestrate::flash(&api, index, &image, &version, &mut progress)?;
            info!("flash complete");
            Ok(())
        }

        Commands::Dump { index, file } => {
            let api = HidApi::new()?;
            let data = orchestrate::dump(&api, index)?;
            std::fs::write(&file, data)?;
            info!(path = %file.display(), "dump written");
            Ok(())
        }

        Commands::Extract { format, file, dir } => {
            let trailer_format = TrailerFormat::from_cli_name(&format)
                .ok_or_else(|| anyhow::anyhow!("unknown installer format: {format}"))?;
            let result = orchestrate::extract_package(&file, trailer_format)?;
            let out_dir = dir.unwrap_or_else(|| {
                Path::new(&file).parent().map(Path::to_path_buf).unwrap_or_default()
            });
            std::fs::create_dir_all(&out_dir)?;
            for section in &result.sections {
                let out_path = out_dir.join(format!("{}.bin", section.name));
                std::fs::write(&out_path, &section.data)?;
                info!(path = %out_path.display(), bytes = section.data.len(), "extracted section");
            }
            println!(
                "{} {} v{}",
                result.metadata.company, result.metadata.product, result.metadata.version
            );
            Ok(())
        }
    }
}
