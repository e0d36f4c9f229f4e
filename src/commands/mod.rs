//! Subcommand implementations

pub mod flash;
pub mod info;
pub mod regs;

use std::path::PathBuf;

use esploader_loader::{ConnectOptions, Loader, StubImage};

use crate::cli::{ConnectArgs, StubArgs};
use crate::ports::open_port;

/// Open the port and establish a ROM session
pub fn connect(args: &ConnectArgs, trace: bool) -> Result<Loader, Box<dyn std::error::Error>> {
    let transport = open_port(&args.port, args.baud)?;
    let options = ConnectOptions {
        trace,
        enter_bootloader: !args.no_reset,
        ..ConnectOptions::default()
    };
    Ok(Loader::connect(transport, &options)?)
}

/// Upgrade a ROM session to the stub, honoring the stub options
pub fn maybe_run_stub(
    loader: Loader,
    args: &StubArgs,
) -> Result<Loader, Box<dyn std::error::Error>> {
    if args.no_stub {
        return Ok(loader);
    }

    let path = match &args.stub_file {
        Some(path) => path.clone(),
        None => default_stub_path(loader.chip().name),
    };
    if !path.is_file() {
        return Err(format!(
            "No stub image at {} (use --stub-file, or --no-stub for ROM-only operation)",
            path.display()
        )
        .into());
    }
    let image = StubImage::from_ron_file(&path)?;
    let mut stub = loader.run_stub(&image)?;

    if let Some(baud) = args.stub_baud {
        stub.change_baud(baud)?;
    }
    Ok(stub)
}

/// Where the stub image for a chip is looked for by default
fn default_stub_path(chip_name: &str) -> PathBuf {
    PathBuf::from("stubs").join(format!("{}.ron", chip_name.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stub_paths_follow_the_chip_name() {
        assert_eq!(
            default_stub_path("ESP32-H21"),
            PathBuf::from("stubs/esp32-h21.ron")
        );
    }
}
