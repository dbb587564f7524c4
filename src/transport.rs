//! Byte transports.

use core::fmt::Debug;
use core::marker::PhantomData;
use std::time::Duration;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

/// Byte level duplex channel to a device
pub trait Transport {
    type Error: Debug;

    /// Send all bytes
    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receive up to `max_len` bytes, returning whatever arrived once
    /// `timeout` expires. An empty result means nothing arrived.
    fn receive(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, Self::Error>;

    /// Release the channel
    fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Transport over an `embedded-hal` serial port, polling for received bytes
pub struct SerialTransport<P, D, E> {
    port: P,
    delay: D,
    poll_delay_ms: u32,
    _err: PhantomData<E>,
}

impl<P, D, E> SerialTransport<P, D, E>
where
    P: Write<u8, Error = E> + Read<u8, Error = E>,
    D: DelayMs<u32>,
    E: Debug,
{
    /// Create a new serial transport, polling every `poll_delay_ms` while
    /// waiting for bytes
    pub fn new(port: P, delay: D, poll_delay_ms: u32) -> Self {
        Self {
            port,
            delay,
            poll_delay_ms: poll_delay_ms.max(1),
            _err: PhantomData,
        }
    }

    /// Release the underlying port and delay
    pub fn into_inner(self) -> (P, D) {
        (self.port, self.delay)
    }
}

impl<P, D, E> Transport for SerialTransport<P, D, E>
where
    P: Write<u8, Error = E> + Read<u8, Error = E>,
    D: DelayMs<u32>,
    E: Debug,
{
    type Error = E;

    fn send(&mut self, data: &[u8]) -> Result<(), E> {
        trace!("TX: {:02x?}", data);

        for b in data {
            block!(self.port.write(*b))?;
        }
        block!(self.port.flush())?;

        Ok(())
    }

    fn receive(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, E> {
        let timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        let mut data = Vec::with_capacity(max_len);
        let mut t = 0;

        while data.len() < max_len {
            // Attempt to read from serial port
            match self.port.read() {
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(e),
                Ok(v) => {
                    data.push(v);
                    continue;
                }
            };

            if t >= timeout_ms {
                break;
            }

            // Wait for delay period
            self.delay.delay_ms(self.poll_delay_ms);
            t += self.poll_delay_ms;
        }

        if !data.is_empty() {
            trace!("RX: {:02x?}", data);
        }

        Ok(data)
    }
}
