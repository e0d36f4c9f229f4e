//! Serial and TCP transport implementations

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use esploader_core::error::{Error, Result};
use esploader_core::Transport;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

/// Espressif's USB vendor id
const ESPRESSIF_VID: u16 = 0x303A;
/// Product id of the on-chip USB-Serial/JTAG peripheral
const USB_JTAG_SERIAL_PID: u16 = 0x1001;

/// Serial port transport
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    usb_jtag_serial: bool,
}

impl SerialTransport {
    /// Open a serial port at the given baud rate
    pub fn open(device: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_secs(3))
            .open()
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", device, e)))?;

        let usb_jtag_serial = port_is_usb_jtag_serial(device);
        log::info!("Opened serial port {} at {} baud", device, baud);
        if usb_jtag_serial {
            log::debug!("{} is a USB-Serial/JTAG peripheral", device);
        }

        Ok(Self {
            port,
            usb_jtag_serial,
        })
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(|e| Error::ConnectionFailed(e.to_string()))
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.port
            .write_request_to_send(level)
            .map_err(|e| Error::ConnectionFailed(e.to_string()))
    }
}

/// Check whether a device path belongs to an on-chip USB-Serial/JTAG port
fn port_is_usb_jtag_serial(device: &str) -> bool {
    let Ok(ports) = serialport::available_ports() else {
        return false;
    };
    ports.iter().any(|p| {
        p.port_name == device
            && matches!(
                &p.port_type,
                serialport::SerialPortType::UsbPort(usb)
                    if usb.vid == ESPRESSIF_VID && usb.pid == USB_JTAG_SERIAL_PID
            )
    })
}

impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        // A zero timeout means "no wait", not "wait forever"
        let timeout = timeout.max(Duration::from_millis(1));
        self.port
            .set_timeout(timeout)
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_input_buffer(&mut self) -> Result<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| Error::Io(e.to_string()))
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.port
            .set_baud_rate(baud)
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        log::debug!("Serial baud rate changed to {}", baud);
        Ok(())
    }

    fn baud_rate(&self) -> Option<u32> {
        self.port.baud_rate().ok()
    }

    fn enter_bootloader(&mut self) -> Result<()> {
        // Classic auto-reset: EN and IO0 are wired to RTS and DTR.
        // Hold the chip in reset with IO0 low, then release reset.
        log::debug!("Entering bootloader via DTR/RTS");
        self.set_dtr(false)?;
        self.set_rts(true)?;
        std::thread::sleep(Duration::from_millis(100));
        self.set_dtr(true)?;
        self.set_rts(false)?;
        std::thread::sleep(Duration::from_millis(50));
        self.set_dtr(false)?;
        Ok(())
    }

    fn hard_reset(&mut self) -> Result<()> {
        log::debug!("Hard resetting via RTS");
        self.set_rts(true)?;
        std::thread::sleep(Duration::from_millis(100));
        self.set_rts(false)?;
        Ok(())
    }

    fn uses_usb_jtag_serial(&self) -> bool {
        self.usb_jtag_serial
    }
}

/// TCP socket transport for serial-over-network bridges
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to a serial bridge at the specified host and port
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr)
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        log::info!("Connected to serial bridge at {}", addr);
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        // TcpStream rejects a zero read timeout
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_input_buffer(&mut self) -> Result<()> {
        // No kernel buffer to clear; drain whatever the bridge has sent
        let mut scratch = [0u8; 512];
        loop {
            match self.read(&mut scratch, Duration::from_millis(10))? {
                0 => return Ok(()),
                _ => continue,
            }
        }
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        // The bridge owns the physical UART rate
        log::warn!("Ignoring baud rate change to {} on a TCP transport", baud);
        Ok(())
    }
}
