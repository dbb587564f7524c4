//! Command / response exchange state machine.
//!
//! One [`PendingExchange`] is driven through
//! `Idle -> AwaitingAck -> [AwaitingDataPhase -> DataPhaseOut | DataPhaseIn] -> AwaitingResponse -> Completed`
//! by repeated calls to [`Session::advance`]. Faults (nak, corrupt frames,
//! timeouts) retry the current sub-step until the retry budget is spent, at
//! which point the exchange moves to `Failed`.

use core::fmt::Debug;
use std::time::{Duration, Instant};

use crate::error::{CodecError, Error, FramingError, ProtocolError};
use crate::frame::{self, Frame, FrameBuffer};
use crate::packet::{CommandPacket, ResponsePacket};
use crate::property::Version;
use crate::protocol::{Response, MAX_FRAME_PAYLOAD};
use crate::status;
use crate::transport::Transport;

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Idle,
    AwaitingAck,
    /// Waiting for the response that opens (or refuses) a data phase
    AwaitingDataPhase,
    DataPhaseOut,
    DataPhaseIn,
    AwaitingResponse,
    Completed,
    Failed,
}

/// Data phase of an exchange
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Direction<'a> {
    None,
    /// Bytes streamed to the device, borrowed for the exchange
    Out(&'a [u8]),
    /// Number of bytes requested from the device
    In(usize),
}

/// State of the single in-flight exchange
#[derive(Debug)]
pub struct PendingExchange<'a> {
    command: CommandPacket,
    expected: Response,
    direction: Direction<'a>,
    state: State,
    attempts: u32,
    /// Bytes acknowledged so far in an outbound data phase
    sent: usize,
    /// Bytes the device announced for an inbound data phase
    announced: usize,
    received: Vec<u8>,
    response: Option<ResponsePacket>,
}

impl<'a> PendingExchange<'a> {
    pub fn new(command: CommandPacket, expected: Response, direction: Direction<'a>) -> Self {
        Self {
            command,
            expected,
            direction,
            state: State::Idle,
            attempts: 0,
            sent: 0,
            announced: 0,
            received: Vec::new(),
            response: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Failed attempts in the current sub-step
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Bytes still outstanding in the data phase
    pub fn remaining(&self) -> usize {
        match self.direction {
            Direction::None => 0,
            Direction::Out(data) => data.len() - self.sent,
            Direction::In(_) => self.announced.saturating_sub(self.received.len()),
        }
    }

    // Tag of the response opening a data phase
    fn opening_tag(&self) -> Response {
        match self.direction {
            Direction::In(_) => self.expected,
            _ => Response::Generic,
        }
    }

    // Tag of the response closing the exchange
    fn final_tag(&self) -> Response {
        match self.direction {
            Direction::None => self.expected,
            _ => Response::Generic,
        }
    }
}

/// Result of a completed exchange
#[derive(Clone, PartialEq, Debug)]
pub struct Completion {
    pub response: ResponsePacket,
    /// Bytes received in an inbound data phase
    pub data: Vec<u8>,
}

/// Response to a link level ping
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct PingResponse {
    /// Protocol version, mark is `'P'`
    pub version: Version,
    pub options: u16,
}

#[derive(Copy, Clone, PartialEq, Debug)]
enum Fault {
    Timeout,
    Framing(FramingError),
    Codec(CodecError),
    Nak,
    Unexpected,
}

impl Fault {
    fn exhausted(&self) -> ProtocolError {
        match self {
            Fault::Timeout | Fault::Framing(FramingError::Incomplete) => ProtocolError::Timeout,
            _ => ProtocolError::Rejected,
        }
    }
}

enum Interrupt<E: Debug> {
    /// Recoverable by retrying the sub-step
    Fault(Fault),
    /// Ends the exchange
    Abort(Error<E>),
}

impl<E: Debug> From<Fault> for Interrupt<E> {
    fn from(f: Fault) -> Self {
        Interrupt::Fault(f)
    }
}

impl<E: Debug> From<Error<E>> for Interrupt<E> {
    fn from(e: Error<E>) -> Self {
        Interrupt::Abort(e)
    }
}

enum Ack {
    Accepted,
    Aborted,
}

/// Progress callback, called with (bytes transferred, total bytes)
pub type Progress = Box<dyn FnMut(usize, usize) + Send>;

/// Runs exchanges over a transport, one at a time
pub struct Session<T> {
    transport: T,
    rx: FrameBuffer,
    timeout: Duration,
    retries: u32,
    chunk_size: usize,
    deadline: Option<Instant>,
    resync: bool,
    progress: Option<Progress>,
}

impl<T> Session<T>
where
    T: Transport,
{
    /// Create a session allowing `retries` attempts per sub-step, each bounded
    /// by `timeout`, sending data frames of at most `chunk_size` bytes
    pub fn new(transport: T, timeout: Duration, retries: u32, chunk_size: usize) -> Self {
        Self {
            transport,
            rx: FrameBuffer::default(),
            timeout,
            retries: retries.max(1),
            chunk_size: chunk_size.max(1).min(MAX_FRAME_PAYLOAD),
            deadline: None,
            resync: false,
            progress: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size.max(1).min(MAX_FRAME_PAYLOAD);
    }

    /// Abort any wait once `deadline` passes
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn set_progress(&mut self, progress: Option<Progress>) {
        self.progress = progress;
    }

    /// Whether the link state is unknown following a failed exchange
    pub fn needs_resync(&self) -> bool {
        self.resync
    }

    /// Run an exchange to completion
    pub fn execute(&mut self, mut exchange: PendingExchange) -> Result<Completion, Error<T::Error>> {
        while self.advance(&mut exchange)? != State::Completed {}

        match exchange.response.take() {
            Some(response) => Ok(Completion {
                response,
                data: exchange.received,
            }),
            None => Err(ProtocolError::Rejected.into()),
        }
    }

    /// Perform a single transition of the exchange, returning the new state
    pub fn advance(&mut self, ex: &mut PendingExchange) -> Result<State, Error<T::Error>> {
        let step = match ex.state {
            State::Idle => self.start(ex),
            State::AwaitingAck => self.await_command_ack(ex),
            State::AwaitingDataPhase => self.open_data_phase(ex),
            State::DataPhaseOut => self.send_chunk(ex),
            State::DataPhaseIn => self.receive_chunk(ex),
            State::AwaitingResponse => self.finish(ex),
            State::Completed | State::Failed => return Ok(ex.state),
        };

        match step {
            Ok(next) => {
                if next != ex.state {
                    debug!("Exchange 0x{:02x}: {:?} -> {:?}", ex.command.tag, ex.state, next);
                    ex.attempts = 0;
                }
                ex.state = next;
                Ok(next)
            }
            Err(Interrupt::Fault(fault)) => self.retry(ex, fault),
            Err(Interrupt::Abort(e)) => {
                error!("Exchange 0x{:02x} aborted in {:?}: {:?}", ex.command.tag, ex.state, e);
                self.fail(ex);
                Err(e)
            }
        }
    }

    /// Check the link, resynchronising the receive stream
    pub fn ping(&mut self) -> Result<PingResponse, Error<T::Error>> {
        let mut fault = Fault::Timeout;

        for attempt in 1..=self.retries {
            self.rx.clear();
            self.send_frame(&Frame::Ping)?;

            match self.receive_frame() {
                Ok(Frame::PingResponse { version, options }) => {
                    self.resync = false;
                    let version = Version::from(version);
                    debug!("Ping response: protocol {} options 0x{:04x}", version, options);
                    return Ok(PingResponse { version, options });
                }
                Ok(other) => {
                    debug!("Expected ping response, received {:?}", other.frame_type());
                    fault = Fault::Unexpected;
                }
                Err(Interrupt::Fault(f)) => fault = f,
                Err(Interrupt::Abort(e)) => {
                    self.resync = true;
                    return Err(e);
                }
            }

            warn!("Ping attempt {} failed: {:?}", attempt, fault);
        }

        error!("No ping response after {} attempts", self.retries);
        self.resync = true;
        Err(fault.exhausted().into())
    }

    fn retry(&mut self, ex: &mut PendingExchange, fault: Fault) -> Result<State, Error<T::Error>> {
        ex.attempts += 1;

        if ex.attempts >= self.retries {
            error!(
                "Exchange 0x{:02x} failed in {:?} after {} attempts: {:?}",
                ex.command.tag, ex.state, ex.attempts, fault
            );
            self.fail(ex);
            return Err(fault.exhausted().into());
        }

        warn!(
            "Exchange 0x{:02x} attempt {} in {:?} failed: {:?}",
            ex.command.tag, ex.attempts, ex.state, fault
        );

        // Other sub-steps resend (or simply wait again) when re-run
        if ex.state == State::AwaitingAck {
            if let Err(e) = self.send_command(ex) {
                self.fail(ex);
                return Err(e);
            }
        }

        Ok(ex.state)
    }

    fn fail(&mut self, ex: &mut PendingExchange) {
        ex.state = State::Failed;
        self.resync = true;
        self.rx.clear();
    }

    fn start(&mut self, ex: &mut PendingExchange) -> Result<State, Interrupt<T::Error>> {
        // Anything still buffered belongs to an earlier exchange
        self.rx.clear();
        self.send_command(ex)?;
        Ok(State::AwaitingAck)
    }

    fn await_command_ack(&mut self, ex: &mut PendingExchange) -> Result<State, Interrupt<T::Error>> {
        match self.await_ack()? {
            Ack::Accepted => (),
            Ack::Aborted => return Err(Fault::Nak.into()),
        }

        match ex.direction {
            Direction::None => Ok(State::AwaitingResponse),
            _ => Ok(State::AwaitingDataPhase),
        }
    }

    fn open_data_phase(&mut self, ex: &mut PendingExchange) -> Result<State, Interrupt<T::Error>> {
        let response = self.receive_response(ex, ex.opening_tag())?;

        match ex.direction {
            Direction::Out(_) if response.status == status::SUCCESS => Ok(State::DataPhaseOut),
            Direction::In(requested) if response.has_data_phase() => {
                let announced = response.words.first().copied().unwrap_or(0) as usize;
                if announced != requested {
                    warn!("Requested {} bytes, device announced {}", requested, announced);
                }

                ex.announced = announced;
                ex.received.reserve(announced);
                Ok(State::DataPhaseIn)
            }
            _ => {
                debug!(
                    "Device refused data phase: {} ({})",
                    response.status,
                    status::describe(response.status)
                );
                ex.response = Some(response);
                Ok(State::Completed)
            }
        }
    }

    fn send_chunk(&mut self, ex: &mut PendingExchange) -> Result<State, Interrupt<T::Error>> {
        let data = match ex.direction {
            Direction::Out(data) => data,
            _ => return Ok(State::AwaitingResponse),
        };
        if ex.sent >= data.len() {
            return Ok(State::AwaitingResponse);
        }

        let end = (ex.sent + self.chunk_size).min(data.len());
        self.send_frame(&Frame::Data(data[ex.sent..end].to_vec()))?;

        match self.await_ack()? {
            Ack::Accepted => {
                ex.sent = end;
                ex.attempts = 0;
                self.report(end, data.len());

                if end == data.len() {
                    Ok(State::AwaitingResponse)
                } else {
                    Ok(State::DataPhaseOut)
                }
            }
            Ack::Aborted => {
                warn!("Device aborted data phase after {} of {} bytes", ex.sent, data.len());
                Ok(State::AwaitingResponse)
            }
        }
    }

    fn receive_chunk(&mut self, ex: &mut PendingExchange) -> Result<State, Interrupt<T::Error>> {
        if ex.remaining() == 0 {
            return Ok(State::AwaitingResponse);
        }

        let payload = match self.receive_packet()? {
            Frame::Data(payload) => payload,
            other => {
                debug!("Expected data frame, received {:?}", other.frame_type());
                self.send_frame(&Frame::Nak)?;
                return Err(Fault::Unexpected.into());
            }
        };
        self.send_frame(&Frame::Ack)?;

        if payload.is_empty() {
            warn!(
                "Device aborted data phase after {} of {} bytes",
                ex.received.len(),
                ex.announced
            );
            return Ok(State::AwaitingResponse);
        }

        ex.received.extend_from_slice(&payload);
        ex.attempts = 0;
        self.report(ex.received.len().min(ex.announced), ex.announced);

        if ex.received.len() >= ex.announced {
            ex.received.truncate(ex.announced);
            Ok(State::AwaitingResponse)
        } else {
            Ok(State::DataPhaseIn)
        }
    }

    fn finish(&mut self, ex: &mut PendingExchange) -> Result<State, Interrupt<T::Error>> {
        let response = self.receive_response(ex, ex.final_tag())?;
        ex.response = Some(response);
        Ok(State::Completed)
    }

    fn report(&mut self, done: usize, total: usize) {
        if let Some(progress) = self.progress.as_mut() {
            progress(done, total);
        }
    }

    fn send_command(&mut self, ex: &PendingExchange) -> Result<(), Error<T::Error>> {
        debug!(
            "Sending command 0x{:02x} flags 0x{:02x} params {:x?}",
            ex.command.tag, ex.command.flags, ex.command.params
        );
        self.send_frame(&Frame::Command(ex.command.encode()))
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), Error<T::Error>> {
        trace!("Sending {:?} frame", frame.frame_type());
        self.transport.send(&frame::encode(frame)).map_err(Error::Io)
    }

    fn await_ack(&mut self) -> Result<Ack, Interrupt<T::Error>> {
        match self.receive_frame()? {
            Frame::Ack => Ok(Ack::Accepted),
            Frame::AckAbort => Ok(Ack::Aborted),
            Frame::Nak => {
                debug!("Received nak");
                Err(Fault::Nak.into())
            }
            other => {
                debug!("Expected ack, received {:?}", other.frame_type());
                Err(Fault::Unexpected.into())
            }
        }
    }

    // Receive a checksummed frame, asking the device to resend on corruption
    fn receive_packet(&mut self) -> Result<Frame, Interrupt<T::Error>> {
        match self.receive_frame() {
            Err(Interrupt::Fault(Fault::Framing(FramingError::Corrupt))) => {
                self.send_frame(&Frame::Nak)?;
                Err(Fault::Framing(FramingError::Corrupt).into())
            }
            r => r,
        }
    }

    fn receive_response(
        &mut self,
        ex: &PendingExchange,
        expected: Response,
    ) -> Result<ResponsePacket, Interrupt<T::Error>> {
        let payload = match self.receive_packet()? {
            Frame::Command(payload) => payload,
            other => {
                debug!("Expected response, received {:?}", other.frame_type());
                return Err(Fault::Unexpected.into());
            }
        };

        let response = ResponsePacket::decode(&payload)
            .and_then(|r| check_response(r, ex.command.tag, expected));

        match response {
            Ok(r) => {
                self.send_frame(&Frame::Ack)?;
                debug!(
                    "Response 0x{:02x} status {} words {:x?}",
                    r.tag, r.status, r.words
                );
                Ok(r)
            }
            Err(e) => {
                debug!("Invalid response {:02x?}: {}", payload, e);
                self.send_frame(&Frame::Nak)?;
                Err(Fault::Codec(e).into())
            }
        }
    }

    fn receive_frame(&mut self) -> Result<Frame, Interrupt<T::Error>> {
        let now = Instant::now();
        let mut until = now + self.timeout;

        if let Some(deadline) = self.deadline {
            if deadline <= now {
                return Err(Interrupt::Abort(ProtocolError::Cancelled.into()));
            }
            until = until.min(deadline);
        }

        let mut first = true;
        loop {
            match self.rx.next_frame() {
                Ok(frame) => return Ok(frame),
                Err(FramingError::Corrupt) => return Err(Fault::Framing(FramingError::Corrupt).into()),
                Err(FramingError::Incomplete) => (),
            }

            let remaining = until.saturating_duration_since(Instant::now());
            let data = if remaining.as_nanos() == 0 && !first {
                Vec::new()
            } else {
                self.transport
                    .receive(self.rx.wanted(), remaining)
                    .map_err(Error::Io)?
            };
            first = false;

            if !data.is_empty() {
                self.rx.push(&data);
                continue;
            }

            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(Interrupt::Abort(ProtocolError::Cancelled.into()));
                }
            }

            // A partial frame cannot be completed after a timeout
            let fault = if self.rx.is_empty() {
                Fault::Timeout
            } else {
                Fault::Framing(FramingError::Incomplete)
            };
            self.rx.clear();
            return Err(fault.into());
        }
    }
}

fn check_response(
    response: ResponsePacket,
    command: u8,
    expected: Response,
) -> Result<ResponsePacket, CodecError> {
    let matches = if response.tag == Response::Generic as u8 {
        // Generic responses echo the command they answer
        response.words.first().map_or(true, |t| *t == command as u32)
    } else {
        response.tag == expected as u8
    };

    if matches {
        Ok(response)
    } else {
        Err(CodecError::UnexpectedTag(response.tag))
    }
}
