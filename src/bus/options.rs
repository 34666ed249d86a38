//! Options for configuring and opening a bus.

use super::{link::Timing, Bus};
use crate::{
    backend::{Backend, Serial},
    error::Error,
};
use serialport as sp;
use std::{
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

/// Options for configuring and opening a [`Bus`].
///
/// ## Example
///
/// ```rust
/// # use gsioc::bus::BusOptions;
/// # use std::time::Duration;
/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = BusOptions::new()
///     .read_timeout(Some(Duration::from_millis(500)))
///     .max_retries(3)
///     .open_serial("/dev/ttyUSB0")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BusOptions {
    /// The custom baud rate
    baud_rate: u32,
    /// The timeout for reading a single byte
    read_timeout: Option<Duration>,
    /// The pause after every wire operation
    settle_delay: Duration,
    /// The pause after the disconnect byte
    disconnect_delay: Duration,
    /// The number of handshake attempts
    max_retries: usize,
}

impl BusOptions {
    /// The default baud rate for GSIOC devices: 19,200.
    pub const DEFAULT_BAUD_RATE: u32 = 19_200;

    /// The default number of handshake attempts: 10.
    pub const DEFAULT_MAX_RETRIES: usize = 10;

    /// Create a blank set of options ready for configuration.
    ///
    /// The defaults are a baud rate of 19,200, a read timeout of 1 second, a
    /// settle delay of 50 ms, a disconnect delay of 100 ms and 10 handshake
    /// attempts.
    ///
    /// Equivalent to [`default`](BusOptions::default).
    pub fn new() -> Self {
        BusOptions {
            baud_rate: BusOptions::DEFAULT_BAUD_RATE,
            read_timeout: Some(Duration::from_secs(1)),
            settle_delay: Duration::from_millis(50),
            disconnect_delay: Duration::from_millis(100),
            max_retries: BusOptions::DEFAULT_MAX_RETRIES,
        }
    }

    /// Set a custom baud rate.
    ///
    /// The default is 19,200.
    pub fn baud_rate(&mut self, baud_rate: u32) -> &mut Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set a custom timeout for reading a single byte.
    ///
    /// If duration is `None`, reads will block indefinitely. The default is 1 second.
    pub fn read_timeout(&mut self, duration: Option<Duration>) -> &mut Self {
        self.read_timeout = duration;
        self
    }

    /// Set the pause inserted after every wire operation.
    ///
    /// The default is 50 ms.
    pub fn settle_delay(&mut self, duration: Duration) -> &mut Self {
        self.settle_delay = duration;
        self
    }

    /// Set the pause inserted after the disconnect byte.
    ///
    /// The default is 100 ms.
    pub fn disconnect_delay(&mut self, duration: Duration) -> &mut Self {
        self.disconnect_delay = duration;
        self
    }

    /// Set how many disconnect+connect sequences are attempted before a
    /// device is reported as not responding.
    ///
    /// The default is 10.
    pub fn max_retries(&mut self, retries: usize) -> &mut Self {
        self.max_retries = retries;
        self
    }

    pub(crate) fn timing(&self) -> Timing {
        Timing {
            settle_delay: self.settle_delay,
            disconnect_delay: self.disconnect_delay,
            max_retries: self.max_retries,
        }
    }

    /// Open the serial port at `path` (19,200 baud by default, even parity,
    /// 8 data bits, 1 stop bit) and start the bus worker.
    pub fn open_serial(&self, path: &str) -> Result<Bus, Error> {
        let port = sp::new(path, self.baud_rate)
            .data_bits(sp::DataBits::Eight)
            .parity(sp::Parity::Even)
            .stop_bits(sp::StopBits::One)
            .flow_control(sp::FlowControl::None)
            .timeout(self.read_timeout.unwrap_or(Duration::MAX))
            .open_native()
            .map(Serial)?;
        self.open_backend(port)
    }

    /// Connect to a serial bridge at `address` over TCP and start the bus
    /// worker.
    pub fn open_tcp<A: ToSocketAddrs>(&self, address: A) -> Result<Bus, Error> {
        self.open_backend(TcpStream::connect(address)?)
    }

    /// Start the bus worker on an arbitrary backend.
    pub fn open_backend<B: Backend + 'static>(&self, mut backend: B) -> Result<Bus, Error> {
        backend.set_read_timeout(self.read_timeout)?;
        Ok(Bus::spawn(backend, self.timing())?)
    }
}

impl Default for BusOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::Mock;

    #[test]
    fn defaults() {
        let timing = BusOptions::new().timing();
        assert_eq!(timing.settle_delay, Duration::from_millis(50));
        assert_eq!(timing.disconnect_delay, Duration::from_millis(100));
        assert_eq!(timing.max_retries, 10);
    }

    #[test]
    fn open_backend_applies_read_timeout() {
        let mock = Mock::new();
        let _bus = BusOptions::new()
            .read_timeout(Some(Duration::from_millis(5)))
            .open_backend(mock.clone())
            .unwrap();
        assert_eq!(
            mock.read_timeout().unwrap(),
            Some(Duration::from_millis(5))
        );
    }
}
