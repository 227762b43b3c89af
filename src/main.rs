//! Insteon PowerLinc Modem CLI
//!
//! A command-line interface for PowerLinc serial modems and the devices
//! linked to them.

use clap::Parser;
use insteon_driver::DriverConfig;
use tracing::debug;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;
use commands::set::ConfigChanges;
use commands::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(DriverConfig::default_path);
    debug!("Loading config from {:?}", config_path);
    let config = DriverConfig::load(&config_path)?;

    // Create monitor config if monitoring is enabled
    let monitor =
        commands::create_monitor_config(cli.monitor, cli.hex, cli.json, cli.filter.as_deref())?;

    let session = Session {
        config,
        port: cli.port.clone(),
        monitor,
        json: cli.json,
    };

    match cli.command {
        None => {
            // Default: show modem info
            commands::query::info(&session).await?;
        }

        // === Query Commands ===
        Some(Commands::Info) => {
            commands::query::info(&session).await?;
        }
        Some(Commands::Config) => {
            commands::query::config(&session).await?;
        }
        Some(Commands::Links { grouped }) => {
            commands::query::links(&session, grouped).await?;
        }

        // === Modem Settings ===
        Some(Commands::SetConfig {
            auto_linking,
            monitor_mode,
            auto_led,
            deadman,
        }) => {
            let changes = ConfigChanges {
                auto_linking,
                monitor_mode,
                auto_led,
                deadman,
            };
            commands::set::set_config(&session, changes).await?;
        }
        Some(Commands::Led { state }) => {
            commands::set::led(&session, state.is_on()).await?;
        }
        Some(Commands::Reset { yes }) => {
            commands::set::reset(&session, yes).await?;
        }

        // === Device Commands ===
        Some(Commands::Device { address, refresh }) => {
            commands::device::device(&session, address, refresh).await?;
        }
        Some(Commands::DeviceLinks {
            address,
            start,
            count,
        }) => {
            commands::device::device_links(&session, address, start, count).await?;
        }
        Some(Commands::Ping { address }) => {
            commands::device::ping(&session, address).await?;
        }
        Some(Commands::Send {
            address,
            cmd1,
            cmd2,
            data,
        }) => {
            let data = data.as_ref().map(|d| d.0.as_slice());
            commands::device::send(&session, address, cmd1, cmd2, data).await?;
        }
        Some(Commands::Flags { address }) => {
            commands::device::flags(&session, address).await?;
        }
        Some(Commands::On {
            address,
            level,
            fast,
        }) => {
            commands::device::on(&session, address, level, fast).await?;
        }
        Some(Commands::Off { address, fast }) => {
            commands::device::off(&session, address, fast).await?;
        }
        Some(Commands::Status { address }) => {
            commands::device::status(&session, address).await?;
        }
        Some(Commands::Beep { address }) => {
            commands::device::beep(&session, address).await?;
        }
        Some(Commands::Relay { address, state }) => {
            commands::device::relay(&session, address, state.is_on()).await?;
        }

        // === Link Commands ===
        Some(Commands::AllLink { group, cmd1, cmd2 }) => {
            commands::links::all_link(&session, group, cmd1, cmd2).await?;
        }
        Some(Commands::Link {
            address,
            group,
            device_controls,
        }) => {
            commands::links::link(&session, address, group, device_controls).await?;
        }
        Some(Commands::Unlink {
            address,
            group,
            device_controls,
        }) => {
            commands::links::unlink(&session, address, group, device_controls).await?;
        }
        Some(Commands::AddLink {
            address,
            group,
            role,
            data,
        }) => {
            let data = data.as_ref().map(|d| d.0.as_slice());
            commands::links::add_link(&session, address, group, role, data).await?;
        }
        Some(Commands::DeleteLink {
            address,
            group,
            role,
        }) => {
            commands::links::delete_link(&session, address, group, role).await?;
        }

        // === Utility Commands ===
        Some(Commands::Monitor) => {
            let config = commands::monitor_config(cli.hex, cli.json, cli.filter.as_deref())?;
            commands::utility::monitor(&session, config).await?;
        }
        Some(Commands::Ports { all }) => {
            commands::utility::ports(&session, all)?;
        }
        Some(Commands::Catalog) => {
            commands::utility::catalog(&session)?;
        }
    }

    Ok(())
}
