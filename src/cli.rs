//! CLI argument parsing

use clap::{Parser, Subcommand};
use esploader_loader::SpiPins;
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
pub fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "esploader")]
#[command(author, version, about = "Serial flasher for Espressif ROM bootloaders", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log every frame on the wire (implies -vvv)
    #[arg(long, global = true)]
    pub trace: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Connection options shared across commands
#[derive(clap::Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Port: a serial device, "tcp:host:port", or "dummy:<chip>"
    #[arg(short, long)]
    pub port: String,

    /// Baud rate for the initial connection
    #[arg(short, long, default_value_t = 115_200)]
    pub baud: u32,

    /// Do not toggle DTR/RTS to enter the bootloader
    #[arg(long)]
    pub no_reset: bool,
}

/// Stub options shared by commands that can run the flasher stub
#[derive(clap::Args, Debug, Clone)]
pub struct StubArgs {
    /// Talk to the ROM loader directly, without uploading the stub
    #[arg(long)]
    pub no_stub: bool,

    /// Stub image file (RON); defaults to stubs/<chip>.ron
    #[arg(long)]
    pub stub_file: Option<PathBuf>,

    /// Baud rate to switch to once the stub is running
    #[arg(long)]
    pub stub_baud: Option<u32>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Identify the connected chip and show its capabilities
    Info {
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Read a 32-bit register
    ReadReg {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Register address (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        address: u32,
    },

    /// Write a 32-bit register
    WriteReg {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Register address (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Value to write (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        value: u32,
    },

    /// Write a binary file to flash
    WriteFlash {
        #[command(flatten)]
        connect: ConnectArgs,

        #[command(flatten)]
        stub: StubArgs,

        /// Flash address to write at (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// File with the data to write
        file: PathBuf,

        /// Alternate SPI flash pins as CLK,Q,D,HD,CS
        #[arg(long)]
        spi_connection: Option<SpiPins>,

        /// Skip the MD5 check after writing
        #[arg(long)]
        no_verify: bool,

        /// Stay in the bootloader instead of resetting afterwards
        #[arg(long)]
        no_reset_after: bool,
    },

    /// Erase the entire flash (requires the stub)
    EraseFlash {
        #[command(flatten)]
        connect: ConnectArgs,

        #[command(flatten)]
        stub: StubArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_decimal_values() {
        assert_eq!(parse_hex_u32("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_hex_u32("0X10").unwrap(), 16);
        assert_eq!(parse_hex_u32("4096").unwrap(), 4096);
        assert!(parse_hex_u32("0xZZ").is_err());
        assert!(parse_hex_u32("nope").is_err());
    }

    #[test]
    fn cli_parses_write_flash() {
        let cli = Cli::try_parse_from([
            "esploader",
            "write-flash",
            "--port",
            "/dev/ttyUSB0",
            "--spi-connection",
            "6,17,8,11,16",
            "0x10000",
            "app.bin",
        ])
        .unwrap();
        match cli.command {
            Commands::WriteFlash {
                address,
                spi_connection,
                ..
            } => {
                assert_eq!(address, 0x10000);
                assert!(spi_connection.is_some());
            }
            _ => panic!("parsed the wrong subcommand"),
        }
    }
}
