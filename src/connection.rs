use crate::consumer::RecordQueue;
use crate::defs::MAX_LINE_BYTES;
use crate::errors::ServerError;
use crate::protocol::{Line, Record};
use crate::shutdown::{ParticipantId, ShutdownCoordinator, ShutdownParticipant};

use std::io::{BufRead, BufReader, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Why a connection handler stopped reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The client closed its side of the connection.
    Disconnected,
    /// The client sent a line that is neither a record nor a command.
    InvalidInput,
    /// The client sent `terminate`.
    Terminated,
    /// The server-wide shutdown closed the connection.
    Shutdown,
    /// Reading from the socket failed.
    IoError,
}

/// Reads records from one client connection and pushes them onto the
/// shared queue.
///
/// The handler registers itself with the [`ShutdownCoordinator`] on creation
/// so the shutdown broadcast can close its socket and unblock a pending read.
/// Dropping the handler closes the socket and unregisters it, whichever way
/// the connection ended.
pub struct ConnectionHandler {
    stream: TcpStream,
    peer: SocketAddr,
    queue: Arc<RecordQueue>,
    max_record: Record,
    coordinator: Arc<ShutdownCoordinator>,
    control: Arc<ConnectionControl>,
    participant_id: ParticipantId,
}

/// Shutdown-side view of a connection: a second handle on the socket and the
/// flag the reader checks before enqueuing.
struct ConnectionControl {
    peer: SocketAddr,
    stream: TcpStream,
    active: AtomicBool,
}

impl ConnectionControl {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        // The peer may already be gone; nothing left to do in that case.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl ShutdownParticipant for ConnectionControl {
    fn on_terminate(&self) {
        log::debug!("Closing connection {} for shutdown", self.peer);
        self.close();
    }

    fn name(&self) -> String {
        format!("connection {}", self.peer)
    }
}

impl ConnectionHandler {
    /// Wraps an accepted connection and registers it with `coordinator`.
    ///
    /// Records above `max_record` are treated as invalid input.
    ///
    /// # Errors
    /// Returns [`ServerError::ClientIoError`] if the socket cannot be
    /// inspected or cloned; the caller drops (and so closes) the stream.
    pub fn new(
        stream: TcpStream,
        queue: Arc<RecordQueue>,
        max_record: Record,
        coordinator: Arc<ShutdownCoordinator>,
    ) -> Result<Self, ServerError> {
        let peer = stream
            .peer_addr()
            .map_err(|e| ServerError::ClientIoError(e.to_string()))?;
        let control_stream = stream
            .try_clone()
            .map_err(|e| ServerError::ClientIoError(e.to_string()))?;

        let control = Arc::new(ConnectionControl {
            peer,
            stream: control_stream,
            active: AtomicBool::new(true),
        });
        let participant_id = coordinator.register(control.clone());

        Ok(Self {
            stream,
            peer,
            queue,
            max_record,
            coordinator,
            control,
            participant_id,
        })
    }

    /// Address of the connected client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Reads lines until the client disconnects, misbehaves, sends
    /// `terminate`, or the server shuts down.
    ///
    /// Invalid input gets no reply: the connection is simply closed.
    pub fn run(self) -> ConnectionOutcome {
        let mut reader = BufReader::new(&self.stream);
        let mut line = String::new();
        let mut records = 0u64;

        let outcome = loop {
            if !self.control.is_active() {
                break ConnectionOutcome::Shutdown;
            }

            line.clear();
            let read = (&mut reader).take(MAX_LINE_BYTES).read_line(&mut line);

            // A shutdown may have raced with the read; drop whatever it returned.
            if !self.control.is_active() {
                break ConnectionOutcome::Shutdown;
            }

            match read {
                Ok(0) => {
                    log::debug!("Client {} closed connection", self.peer);
                    break ConnectionOutcome::Disconnected;
                }
                Ok(_) => match Line::parse_bounded(&line, self.max_record) {
                    Line::Record(value) => {
                        self.queue.push(value);
                        records += 1;
                    }
                    Line::Terminate => {
                        log::info!("Terminate command received from {}", self.peer);
                        self.coordinator.signal_stop();
                        break ConnectionOutcome::Terminated;
                    }
                    Line::Invalid => {
                        log::debug!(
                            "Invalid input from {}: {:?}, disconnecting",
                            self.peer,
                            line.trim_end()
                        );
                        break ConnectionOutcome::InvalidInput;
                    }
                },
                Err(e) => {
                    log::warn!("Connection failed for {}: {}", self.peer, e);
                    break ConnectionOutcome::IoError;
                }
            }
        };

        log::debug!(
            "Handler for {} finished ({:?}) after {} records",
            self.peer,
            outcome,
            records
        );
        outcome
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.control.close();
        self.coordinator.unregister(self.participant_id);
        log::trace!("Connection {} released", self.peer);
    }
}
