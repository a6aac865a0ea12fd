use anyhow::Result;
use clap::{Parser, Subcommand};
use tracking::{TrackCliArgs, TrackingConfig};

/// Follow a detected target with the turret camera servos.
#[derive(Debug, Parser)]
#[command(name = "turret", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Track a target from a camera and stream pan/tilt commands to the controller.
    Track(TrackCliArgs),
    /// Print the effective configuration without starting capture.
    CheckConfig(TrackCliArgs),
}

pub fn handle_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Track(args) => {
            let config = TrackingConfig::try_from(args)?;
            tracking::run(config)
        }
        Command::CheckConfig(args) => {
            let config = TrackingConfig::try_from(args)?;
            println!("{config:#?}");
            Ok(())
        }
    }
}
