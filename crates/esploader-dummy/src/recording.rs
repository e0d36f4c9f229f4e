//! Transport wrapper that records the operations issued through it

use std::sync::{Arc, Mutex};
use std::time::Duration;

use esploader_core::error::Result;
use esploader_core::Transport;

/// One operation a session issued against the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A frame (or part of one) was written
    Write,
    /// Bytes were read (only recorded when something arrived)
    Read,
    /// The input buffer was flushed
    Flush,
    /// The baud rate was changed
    SetBaud(u32),
}

/// Wraps another transport and records every operation, in order
///
/// The event log lives behind an `Arc` so it stays readable after the
/// transport has been boxed into a session.
pub struct Recording<T: Transport> {
    inner: T,
    events: Arc<Mutex<Vec<Event>>>,
}

impl<T: Transport> Recording<T> {
    /// Wrap `inner`, returning the transport and a handle to its log
    pub fn new(inner: T) -> (Self, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner,
                events: Arc::clone(&events),
            },
            events,
        )
    }
}

impl<T: Transport> Transport for Recording<T> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.events.lock().unwrap().push(Event::Write);
        self.inner.write_all(data)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let n = self.inner.read(buf, timeout)?;
        if n > 0 {
            self.events.lock().unwrap().push(Event::Read);
        }
        Ok(n)
    }

    fn reset_input_buffer(&mut self) -> Result<()> {
        self.events.lock().unwrap().push(Event::Flush);
        self.inner.reset_input_buffer()
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.events.lock().unwrap().push(Event::SetBaud(baud));
        self.inner.set_baud_rate(baud)
    }

    fn baud_rate(&self) -> Option<u32> {
        self.inner.baud_rate()
    }

    fn uses_usb_jtag_serial(&self) -> bool {
        self.inner.uses_usb_jtag_serial()
    }
}
