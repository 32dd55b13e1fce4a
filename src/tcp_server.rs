use crate::connection::ConnectionHandler;
use crate::consumer::RecordQueue;
use crate::defs::WAKEUP_CONNECT_TIMEOUT_MSEC;
use crate::errors::ServerError;
use crate::protocol::Record;
use crate::shutdown::{ParticipantId, ShutdownCoordinator, ShutdownParticipant};

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Lifecycle of the accept loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptorState {
    /// Accepting connections.
    Listening,
    /// Listener closed; waiting for in-flight handlers to finish.
    Draining,
    /// Grace period over, acceptor done.
    Stopped,
}

/// What the accept loop did before it stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcceptSummary {
    /// Connections handed to the worker pool.
    pub accepted: u64,
    /// Handlers still running when the grace period expired.
    pub stragglers: usize,
}

/// Accepts client connections and serves each one on a fixed-size worker pool.
///
/// Connections accepted while every worker is busy wait in the pool's
/// unbounded backlog, so the accept loop never blocks on submission.
pub struct ConnectionAcceptor {
    /// TCP listener socket
    listener: TcpListener,

    /// Worker pool running one [`ConnectionHandler`] per task
    pool: rayon::ThreadPool,

    queue: Arc<RecordQueue>,
    max_record: Record,
    coordinator: Arc<ShutdownCoordinator>,
    control: Arc<AcceptorControl>,
    participant_id: ParticipantId,
    in_flight: Arc<InFlight>,
    grace: Duration,
}

/// Shutdown-side handle on the acceptor.
struct AcceptorControl {
    stopping: AtomicBool,
    wake_addr: SocketAddr,
    state: Mutex<AcceptorState>,
}

impl AcceptorControl {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: AcceptorState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        log::info!("Acceptor state {:?} -> {:?}", *state, next);
        *state = next;
    }
}

impl ShutdownParticipant for AcceptorControl {
    /// Flags the loop and wakes a blocked `accept()` with a throwaway
    /// loopback connection. The loop drops that connection and the listener.
    fn on_terminate(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Stopping connection acceptor");
        let timeout = Duration::from_millis(WAKEUP_CONNECT_TIMEOUT_MSEC);
        if let Err(e) = TcpStream::connect_timeout(&self.wake_addr, timeout) {
            log::debug!("Acceptor wake-up connection failed: {}", e);
        }
    }

    fn name(&self) -> String {
        "connection acceptor".to_string()
    }
}

/// Counts handlers that have been submitted and not yet finished.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

struct InFlightGuard(Arc<InFlight>);

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        InFlightGuard(self.clone())
    }

    fn current(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits up to `timeout` for the count to reach zero; returns what is left.
    fn wait_idle(&self, timeout: Duration) -> usize {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let (count, _) = self
            .idle
            .wait_timeout_while(count, timeout, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *count
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl ConnectionAcceptor {
    /// Binds the listener and builds a pool of `workers` threads.
    ///
    /// The acceptor registers itself with `coordinator` so the shutdown
    /// broadcast can stop the accept loop. Every connection rejects records
    /// above `max_record`.
    ///
    /// # Errors
    /// * [`ServerError::BindError`] if the address is unavailable.
    /// * [`ServerError::PoolError`] if the worker threads cannot be created.
    pub fn bind(
        addr: &str,
        workers: usize,
        grace: Duration,
        queue: Arc<RecordQueue>,
        max_record: Record,
        coordinator: Arc<ShutdownCoordinator>,
    ) -> Result<Self, ServerError> {
        log::info!("Binding TCP server to address: {}", addr);
        let listener =
            TcpListener::bind(addr).map_err(|e| ServerError::BindError(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(e.to_string()))?;
        log::info!("TCP server successfully bound to: {}", local_addr);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("connection-worker-{}", i))
            .panic_handler(|_| log::error!("Connection handler panicked"))
            .build()
            .map_err(|e| ServerError::PoolError(e.to_string()))?;
        log::info!("Worker pool ready with {} threads", workers);

        let control = Arc::new(AcceptorControl {
            stopping: AtomicBool::new(false),
            wake_addr: wake_addr(local_addr),
            state: Mutex::new(AcceptorState::Listening),
        });
        let participant_id = coordinator.register(control.clone());

        Ok(Self {
            listener,
            pool,
            queue,
            max_record,
            coordinator,
            control,
            participant_id,
            in_flight: Arc::new(InFlight::default()),
            grace,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AcceptorState {
        *self
            .control
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the accept loop until the shutdown broadcast arrives or the
    /// listener fails, then closes the listener and gives in-flight handlers
    /// the grace period to finish.
    ///
    /// An unrecoverable accept error also requests a server-wide stop, so
    /// both exits lead through the same shutdown path.
    pub fn listen_for_clients(self) -> AcceptSummary {
        log::info!("TCP server starting main loop");
        let mut accepted = 0u64;

        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.control.is_stopping() {
                        log::debug!("Dropping connection from {} during shutdown", addr);
                        break;
                    }
                    log::info!("New TCP connection from: {}", addr);
                    if self.dispatch(stream) {
                        accepted += 1;
                    }
                }
                Err(e) => {
                    if !self.keep_accepting_after(&e) {
                        break;
                    }
                }
            }
        }

        self.drain(accepted)
    }

    /// Decides whether the loop survives an accept error. An unrecoverable
    /// error requests a server-wide stop before the loop exits.
    fn keep_accepting_after(&self, e: &io::Error) -> bool {
        if self.control.is_stopping() {
            return false;
        }
        if is_transient(e) {
            log::warn!("Transient accept error: {}", e);
            return true;
        }
        log::error!("Failed to accept TCP connection: {}", e);
        self.coordinator.signal_stop();
        false
    }

    /// Hands a connection to the pool. On failure the stream is dropped,
    /// which closes it without touching any other connection.
    fn dispatch(&self, stream: TcpStream) -> bool {
        let handler =
            match ConnectionHandler::new(
                stream,
                self.queue.clone(),
                self.max_record,
                self.coordinator.clone(),
            ) {
                Ok(handler) => handler,
                Err(e) => {
                    log::warn!("Rejecting connection: {}", e);
                    return false;
                }
            };

        let guard = self.in_flight.enter();
        log::debug!(
            "Submitting handler for {} ({} in flight)",
            handler.peer_addr(),
            self.in_flight.current()
        );
        self.pool.spawn(move || {
            let _guard = guard;
            handler.run();
        });
        true
    }

    fn drain(self, accepted: u64) -> AcceptSummary {
        let ConnectionAcceptor {
            listener,
            pool,
            coordinator,
            control,
            participant_id,
            in_flight,
            grace,
            ..
        } = self;

        drop(listener);
        control.set_state(AcceptorState::Draining);

        let stragglers = in_flight.wait_idle(grace);
        if stragglers > 0 {
            log::warn!(
                "{} connection handlers still running after {:?}, proceeding without them",
                stragglers,
                grace
            );
        }

        // Dropping the pool does not wait for stragglers.
        drop(pool);
        control.set_state(AcceptorState::Stopped);
        coordinator.unregister(participant_id);
        log::info!("Connection acceptor stopped after {} connections", accepted);

        AcceptSummary {
            accepted,
            stragglers,
        }
    }
}

/// Loopback address that reaches a listener bound to `local`.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
