//! Port opening and the port-spec registry

use esploader_core::{chip, Transport};
use esploader_dummy::DummyRom;
use esploader_serial::{PortSpec, SerialTransport, TcpTransport};

/// Open a transport from a port string
///
/// Formats:
/// - a serial device path (`/dev/ttyUSB0`, `COM3`, ...)
/// - `tcp:host:port` for a serial-over-network bridge
/// - `dummy:<chip>` for the in-memory bootloader emulation
pub fn open_port(spec: &str, baud: u32) -> Result<Box<dyn Transport>, Box<dyn std::error::Error>> {
    if let Some(chip_name) = spec.strip_prefix("dummy:") {
        let chip = chip::find_by_name(chip_name)
            .ok_or_else(|| format!("Unknown chip for dummy port: {}", chip_name))?;
        log::info!("Using an emulated {} bootloader", chip.name);
        return Ok(Box::new(DummyRom::new(chip.image_chip_id)));
    }

    match PortSpec::parse(spec)? {
        PortSpec::Serial { device } => Ok(Box::new(SerialTransport::open(&device, baud)?)),
        PortSpec::Tcp { host, port } => Ok(Box::new(TcpTransport::connect(&host, port)?)),
    }
}
