//! MCU ROM bootloader (MCUboot / mboot) serial protocol.
//!
//! Host side engine for the NXP Kinetis / i.MX RT / LPC ROM bootloader: frames
//! are exchanged with the device over a byte [`Transport`], command packets are
//! sequenced through a [`Session`] and the [`Programmer`] exposes the
//! bootloader operations.
//!
//! ```ignore
//! use mboot_uart_loader::{Options, Programmer, Property};
//!
//! let mut p = Programmer::linux("/dev/ttyUSB0", 57600, Options::default())?;
//! p.init()?;
//!
//! let v = p.get_property(Property::CurrentVersion.into(), 0)?;
//! println!("Bootloader: {:?}", v.version());
//! ```

use std::time::{Duration, Instant};

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

#[cfg(feature = "linux")]
pub mod linux;

pub mod error;
pub mod frame;
pub mod packet;
pub mod property;
pub mod protocol;
pub mod session;
pub mod status;
pub mod transport;

pub use error::{CodecError, Error, FramingError, ProtocolError};
pub use property::{Property, PropertyValue, Version};
pub use protocol::{Command, Response};
pub use session::{PingResponse, Session, State};
pub use transport::{SerialTransport, Transport};

use packet::CommandPacket;
use protocol::MAX_CHUNK;
use session::{Completion, Direction, PendingExchange};

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Do not ping the bootloader on connection
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub no_ping: bool,

    /// Timeout to wait for each bootloader frame
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "5000"))]
    pub response_timeout_ms: u32,

    /// Period to poll for received bytes
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Attempts per exchange step before giving up
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "3"))]
    pub retries: u32,

    /// Data frame payload size, replaced by the device maximum when negotiated
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "32"))]
    pub max_packet_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            no_ping: false,
            response_timeout_ms: 5000,
            poll_delay_ms: 1,
            retries: 3,
            max_packet_size: MAX_CHUNK,
        }
    }
}

/// Bootloader device handle
pub struct Programmer<T> {
    session: Session<T>,
    options: Options,
}

impl<T> Programmer<T>
where
    T: Transport,
{
    /// Create a new programmer instance over the provided transport
    pub fn new(transport: T, options: Options) -> Self {
        let session = Session::new(
            transport,
            Duration::from_millis(options.response_timeout_ms as u64),
            options.retries,
            options.max_packet_size,
        );

        Self { session, options }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn transport(&self) -> &T {
        self.session.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.session.transport_mut()
    }

    /// Connect to the bootloader, pinging unless disabled in the options
    pub fn init(&mut self) -> Result<Option<PingResponse>, Error<T::Error>> {
        if self.options.no_ping {
            debug!("Skipping bootloader ping");
            return Ok(None);
        }

        debug!("Pinging bootloader");
        let p = self.ping()?;
        info!("Bootloader protocol {} (options 0x{:04x})", p.version, p.options);

        Ok(Some(p))
    }

    /// Check the link and fetch the protocol version
    pub fn ping(&mut self) -> Result<PingResponse, Error<T::Error>> {
        self.session.ping()
    }

    /// Abort waits once `deadline` passes, leaving the link to be resynchronised
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.session.set_deadline(deadline);
    }

    /// Install a callback for data phase progress, (transferred, total) bytes
    pub fn set_progress<F>(&mut self, progress: F)
    where
        F: FnMut(usize, usize) + Send + 'static,
    {
        self.session.set_progress(Some(Box::new(progress)));
    }

    pub fn clear_progress(&mut self) {
        self.session.set_progress(None);
    }

    /// Fetch a property, `index` selects the memory or peripheral where the
    /// property has several instances
    pub fn get_property(&mut self, tag: u32, index: u32) -> Result<PropertyValue, Error<T::Error>> {
        let c = self.command(Command::GetProperty, vec![tag, index])?;

        Ok(PropertyValue {
            tag,
            words: c.response.words,
        })
    }

    pub fn set_property(&mut self, tag: u32, value: u32) -> Result<(), Error<T::Error>> {
        self.command(Command::SetProperty, vec![tag, value])?;
        Ok(())
    }

    /// Erase all flash of the selected memory
    pub fn flash_erase_all(&mut self, memory_id: u32) -> Result<(), Error<T::Error>> {
        self.command(Command::FlashEraseAll, vec![memory_id])?;
        Ok(())
    }

    /// Erase all internal flash and recover flash security
    pub fn flash_erase_all_unsecure(&mut self) -> Result<(), Error<T::Error>> {
        self.command(Command::FlashEraseAllUnsecure, vec![])?;
        Ok(())
    }

    pub fn flash_erase_region(
        &mut self,
        address: u32,
        length: u32,
        memory_id: u32,
    ) -> Result<(), Error<T::Error>> {
        self.command(Command::FlashEraseRegion, vec![address, length, memory_id])?;
        Ok(())
    }

    /// Fill `length` bytes from `address` with a repeated 32-bit pattern
    pub fn fill_memory(&mut self, address: u32, length: u32, pattern: u32) -> Result<(), Error<T::Error>> {
        self.command(Command::FillMemory, vec![address, length, pattern])?;
        Ok(())
    }

    /// Write `data` to memory starting at `address`
    pub fn write_memory(&mut self, address: u32, memory_id: u32, data: &[u8]) -> Result<(), Error<T::Error>> {
        debug!("Writing {} bytes to 0x{:08x} (memory {})", data.len(), address, memory_id);

        let packet = CommandPacket::with_data_phase(
            Command::WriteMemory,
            vec![address, data.len() as u32, memory_id],
        );
        let c = self.exchange(PendingExchange::new(packet, Response::Generic, Direction::Out(data)))?;

        check(c).map(|_| ())
    }

    /// Read `length` bytes of memory starting at `address`.
    ///
    /// Reads of erased pages on devices that disallow them still return the
    /// full buffer.
    pub fn read_memory(&mut self, address: u32, length: u32, memory_id: u32) -> Result<Vec<u8>, Error<T::Error>> {
        debug!("Reading {} bytes from 0x{:08x} (memory {})", length, address, memory_id);

        let packet = CommandPacket::new(Command::ReadMemory, vec![address, length, memory_id]);
        let c = self.exchange(PendingExchange::new(
            packet,
            Response::ReadMemory,
            Direction::In(length as usize),
        ))?;

        let complete = c.data.len() == length as usize;

        match c.response.status {
            status::MEMORY_BLANK_PAGE_READ_DISALLOWED if complete => {
                warn!("Read of blank page at 0x{:08x}", address);
                Ok(c.data)
            }
            status::SUCCESS if !complete => {
                // Success with a short data phase leaves nothing usable
                error!("Read returned {} of {} bytes", c.data.len(), length);
                Err(ProtocolError::Rejected.into())
            }
            _ => check(c).map(|c| c.data),
        }
    }

    /// Stream a secure binary image to the bootloader for processing
    pub fn receive_sb_file(&mut self, data: &[u8]) -> Result<(), Error<T::Error>> {
        debug!("Sending {} byte SB file", data.len());

        let packet = CommandPacket::with_data_phase(Command::ReceiveSbFile, vec![data.len() as u32]);
        let c = self.exchange(PendingExchange::new(packet, Response::Generic, Direction::Out(data)))?;

        check(c).map(|_| ())
    }

    /// Call the function at `address` with `argument`, returning to the
    /// bootloader afterwards
    pub fn call(&mut self, address: u32, argument: u32) -> Result<(), Error<T::Error>> {
        self.command(Command::Call, vec![address, argument])?;
        Ok(())
    }

    /// Jump to `address` with `argument` and a new stack pointer
    pub fn execute(&mut self, address: u32, argument: u32, stack_pointer: u32) -> Result<(), Error<T::Error>> {
        self.command(Command::Execute, vec![address, argument, stack_pointer])?;
        Ok(())
    }

    /// Configure external memory `memory_id` from the configuration block at
    /// `address`
    pub fn configure_memory(&mut self, memory_id: u32, address: u32) -> Result<(), Error<T::Error>> {
        self.command(Command::ConfigureMemory, vec![memory_id, address])?;
        Ok(())
    }

    /// Read a program-once (eFuse / OTP) word
    pub fn flash_read_once(&mut self, index: u32, count: u32) -> Result<u32, Error<T::Error>> {
        let c = self.command(Command::FlashReadOnce, vec![index, count])?;

        // Words are the byte count followed by the value
        match c.response.words.get(1) {
            Some(v) => Ok(*v),
            None => Err(ProtocolError::Rejected.into()),
        }
    }

    /// Program a program-once (eFuse / OTP) word, optionally reading it back.
    ///
    /// Bits already set are left alone so verification only checks that every
    /// bit of `data` reads as set.
    pub fn flash_program_once(
        &mut self,
        index: u32,
        count: u32,
        data: u32,
        verify: bool,
    ) -> Result<(), Error<T::Error>> {
        self.command(Command::FlashProgramOnce, vec![index, count, data])?;

        if verify {
            let v = self.flash_read_once(index & 0x00FF_FFFF, count)?;
            if v & data != data {
                error!("OTP index {} read back 0x{:08x}, expected 0x{:08x}", index, v, data);
                return Err(Error::Device {
                    code: status::OTP_VERIFY_FAIL,
                });
            }
        }

        Ok(())
    }

    /// Reset the device, the bootloader will not answer until re-initialised
    pub fn reset(&mut self) -> Result<(), Error<T::Error>> {
        self.command(Command::Reset, vec![])?;
        Ok(())
    }

    /// Adopt the device's maximum packet size for data frames
    pub fn negotiate_packet_size(&mut self) -> Result<usize, Error<T::Error>> {
        let v = self.get_property(Property::MaxPacketSize.into(), 0)?;

        match v.value() {
            Some(size) if size > 0 => {
                debug!("Using device packet size {}", size);
                self.session.set_chunk_size(size as usize);
            }
            _ => warn!("Device reported no packet size, keeping {}", self.session.chunk_size()),
        }

        Ok(self.session.chunk_size())
    }

    /// Release the transport
    pub fn close(mut self) -> Result<T, Error<T::Error>> {
        self.session.transport_mut().close().map_err(Error::Io)?;
        Ok(self.session.into_inner())
    }

    pub fn into_inner(self) -> T {
        self.session.into_inner()
    }

    fn command(&mut self, command: Command, params: Vec<u32>) -> Result<Completion, Error<T::Error>> {
        let packet = CommandPacket::new(command, params);
        let c = self.exchange(PendingExchange::new(packet, command.response(), Direction::None))?;

        check(c)
    }

    fn exchange(&mut self, ex: PendingExchange) -> Result<Completion, Error<T::Error>> {
        if self.session.needs_resync() {
            info!("Resynchronising link");
            self.session.ping()?;
        }

        self.session.execute(ex)
    }
}

// Device status to result
fn check<E: core::fmt::Debug>(c: Completion) -> Result<Completion, Error<E>> {
    match c.response.status {
        status::SUCCESS => Ok(c),
        code => {
            warn!("Device returned status {}: {}", code, status::describe(code));
            Err(Error::Device { code })
        }
    }
}
