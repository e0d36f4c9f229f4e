//! esploader-serial - Transport implementations for esploader
//!
//! Provides the hardware byte streams the loader session runs over:
//!
//! - Serial port: `/dev/ttyUSB0`, `/dev/ttyACM0`, `COM3`, ...
//! - TCP socket: `tcp:host:port` (serial-over-network bridges)
//!
//! The serial transport also owns the DTR/RTS sequencing that puts a
//! chip into its ROM bootloader and resets it back into the
//! application.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod transport;

pub use transport::{SerialTransport, TcpTransport};

/// Parsed port specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    /// Local serial device
    Serial {
        /// Device path (e.g. "/dev/ttyUSB0" or "COM3")
        device: String,
    },
    /// TCP connection to a serial bridge
    Tcp {
        /// Hostname or IP address
        host: String,
        /// Port number
        port: u16,
    },
}

impl PortSpec {
    /// Parse a port string
    ///
    /// Formats:
    /// - `/dev/ttyUSB0` (or any other device path) - serial port
    /// - `tcp:host:port` - TCP connection
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        if let Some(rest) = s.strip_prefix("tcp:") {
            let (host, port_str) = rest
                .rsplit_once(':')
                .ok_or_else(|| format!("missing port in tcp port spec: {}", s))?;
            if host.is_empty() {
                return Err(format!("missing host in tcp port spec: {}", s));
            }
            let port = port_str
                .parse()
                .map_err(|_| format!("invalid tcp port number: {}", port_str))?;
            Ok(PortSpec::Tcp {
                host: host.to_string(),
                port,
            })
        } else if s.is_empty() {
            Err("empty port spec".to_string())
        } else {
            Ok(PortSpec::Serial {
                device: s.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serial_device() {
        assert_eq!(
            PortSpec::parse("/dev/ttyUSB0").unwrap(),
            PortSpec::Serial {
                device: "/dev/ttyUSB0".to_string()
            }
        );
    }

    #[test]
    fn parses_tcp_spec() {
        assert_eq!(
            PortSpec::parse("tcp:bridge.local:5555").unwrap(),
            PortSpec::Tcp {
                host: "bridge.local".to_string(),
                port: 5555
            }
        );
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(PortSpec::parse("").is_err());
        assert!(PortSpec::parse("tcp:nohost").is_err());
        assert!(PortSpec::parse("tcp::123").is_err());
        assert!(PortSpec::parse("tcp:host:notaport").is_err());
    }
}
