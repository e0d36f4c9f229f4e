//! esploader - a serial flasher for Espressif ROM bootloaders
//!
//! Connects to the ROM serial bootloader of a supported chip, detects
//! the family from its security info, optionally uploads the flasher
//! stub and hands the session over to it, and programs SPI flash
//! through whichever loader tier is active.

mod cli;
mod commands;
mod ports;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match (cli.trace, cli.verbose) {
        (true, _) => log::set_max_level(log::LevelFilter::Trace),
        (false, 0) => {} // default (info)
        (false, 1) => log::set_max_level(log::LevelFilter::Debug),
        (false, _) => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::Info { connect } => {
            let mut loader = commands::connect(&connect, cli.trace)?;
            commands::info::run(&mut loader)
        }
        Commands::ReadReg { connect, address } => {
            let mut loader = commands::connect(&connect, cli.trace)?;
            commands::regs::read(&mut loader, address)
        }
        Commands::WriteReg {
            connect,
            address,
            value,
        } => {
            let mut loader = commands::connect(&connect, cli.trace)?;
            commands::regs::write(&mut loader, address, value)
        }
        Commands::WriteFlash {
            connect,
            stub,
            address,
            file,
            spi_connection,
            no_verify,
            no_reset_after,
        } => {
            let loader = commands::connect(&connect, cli.trace)?;
            let mut loader = commands::maybe_run_stub(loader, &stub)?;
            commands::flash::write(
                &mut loader,
                address,
                &file,
                spi_connection,
                !no_verify,
                !no_reset_after,
            )
        }
        Commands::EraseFlash { connect, stub } => {
            let loader = commands::connect(&connect, cli.trace)?;
            let mut loader = commands::maybe_run_stub(loader, &stub)?;
            commands::flash::erase(&mut loader)
        }
    }
}
