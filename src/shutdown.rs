//! Broadcast of the server-wide stop signal.
//!
//! Components that must react to shutdown implement [`ShutdownParticipant`]
//! and register with the [`ShutdownCoordinator`]. A dedicated thread sleeps
//! until [`ShutdownCoordinator::signal_stop`] is called, then invokes every
//! registered participant's [`on_terminate`](ShutdownParticipant::on_terminate)
//! in registration order while holding the registry lock.
//!
//! Callbacks run on the coordinator thread and must not call back into the
//! coordinator (register/unregister would deadlock on the registry lock).

use crate::errors::ServerError;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// A component that must be told when the server is terminating.
pub trait ShutdownParticipant: Send + Sync {
    /// Stops the component's work and unblocks any pending I/O.
    ///
    /// Must return promptly: it runs on the coordinator thread, one
    /// participant after another.
    fn on_terminate(&self);

    /// Label used in log messages.
    fn name(&self) -> String {
        "participant".to_string()
    }
}

/// Handle returned by [`ShutdownCoordinator::register`].
pub type ParticipantId = u64;

/// Owns the participant registry and the coordination thread.
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    registry: Mutex<Registry>,
    stop_requested: Mutex<bool>,
    stop_signal: Condvar,
}

#[derive(Default)]
struct Registry {
    next_id: ParticipantId,
    participants: Vec<(ParticipantId, Arc<dyn ShutdownParticipant>)>,
    broadcast_done: bool,
}

impl ShutdownCoordinator {
    /// Creates the coordinator and starts its coordination thread.
    pub fn start() -> Result<Self, ServerError> {
        let inner = Arc::new(Inner {
            registry: Mutex::new(Registry::default()),
            stop_requested: Mutex::new(false),
            stop_signal: Condvar::new(),
        });

        let thread_inner = inner.clone();
        let handle = thread::Builder::new()
            .name("shutdown-coordinator".into())
            .spawn(move || thread_inner.wait_and_broadcast())
            .map_err(|e| ServerError::ThreadError(e.to_string()))?;

        log::debug!("Shutdown coordinator thread started");

        Ok(Self {
            inner,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Adds a participant to the registry.
    ///
    /// A participant registered after the broadcast has already run is
    /// terminated immediately, on the calling thread.
    pub fn register(&self, participant: Arc<dyn ShutdownParticipant>) -> ParticipantId {
        let mut registry = self.inner.lock_registry();
        let id = registry.next_id;
        registry.next_id += 1;

        if registry.broadcast_done {
            drop(registry);
            log::debug!(
                "Late registration of {} after shutdown, terminating it now",
                participant.name()
            );
            participant.on_terminate();
            return id;
        }

        log::trace!("Registered {} as participant {}", participant.name(), id);
        registry.participants.push((id, participant));
        id
    }

    /// Removes a participant. Unknown ids are ignored.
    pub fn unregister(&self, id: ParticipantId) {
        let mut registry = self.inner.lock_registry();
        if let Some(pos) = registry.participants.iter().position(|(pid, _)| *pid == id) {
            let (_, participant) = registry.participants.remove(pos);
            log::trace!("Unregistered {} (participant {})", participant.name(), id);
        }
    }

    /// Number of currently registered participants.
    pub fn registered(&self) -> usize {
        self.inner.lock_registry().participants.len()
    }

    /// Requests the broadcast. Safe to call from any thread, any number of times.
    pub fn signal_stop(&self) {
        self.inner.signal_stop();
    }

    /// Returns `true` once a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        *self
            .inner
            .stop_requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Tears the coordinator down: drops every registration, wakes the
    /// coordination thread and waits for it to exit.
    ///
    /// Participants still registered at this point do not receive
    /// `on_terminate`; they are expected to have been notified already.
    pub fn shutdown_self(&self) {
        self.inner.lock_registry().participants.clear();
        self.inner.signal_stop();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Shutdown coordinator thread panicked");
            } else {
                log::debug!("Shutdown coordinator thread joined");
            }
        }
    }
}

impl Inner {
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn signal_stop(&self) {
        let mut requested = self
            .stop_requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !*requested {
            log::info!("Stop requested, waking shutdown coordinator");
        }
        *requested = true;
        self.stop_signal.notify_all();
    }

    fn wait_and_broadcast(&self) {
        {
            let requested = self
                .stop_requested
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // Spurious wakeups loop back into the wait.
            let _requested = self
                .stop_signal
                .wait_while(requested, |requested| !*requested)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let mut registry = self.lock_registry();
        registry.broadcast_done = true;
        log::info!(
            "Broadcasting shutdown to {} participants",
            registry.participants.len()
        );
        for (id, participant) in registry.participants.iter() {
            log::debug!("Terminating {} (participant {})", participant.name(), id);
            participant.on_terminate();
        }
    }
}

impl Drop for ShutdownCoordinator {
    fn drop(&mut self) {
        log::debug!("ShutdownCoordinator drop called, stopping coordination thread");
        self.shutdown_self();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Records the order in which participants were terminated.
    struct Recorder {
        id: usize,
        log: Arc<Mutex<Vec<usize>>>,
    }

    impl ShutdownParticipant for Recorder {
        fn on_terminate(&self) {
            self.log.lock().unwrap().push(self.id);
        }
    }

    struct Counter(AtomicUsize);

    impl ShutdownParticipant for Counter {
        fn on_terminate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_broadcast_in_registration_order() {
        let coordinator = ShutdownCoordinator::start().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for id in 0..4 {
            coordinator.register(Arc::new(Recorder {
                id,
                log: log.clone(),
            }));
        }

        coordinator.signal_stop();
        assert!(wait_until(|| log.lock().unwrap().len() == 4));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_unregistered_participant_is_skipped() {
        let coordinator = ShutdownCoordinator::start().unwrap();
        let kept = Arc::new(Counter(AtomicUsize::new(0)));
        let removed = Arc::new(Counter(AtomicUsize::new(0)));

        coordinator.register(kept.clone());
        let id = coordinator.register(removed.clone());
        assert_eq!(coordinator.registered(), 2);
        coordinator.unregister(id);
        coordinator.unregister(id);
        assert_eq!(coordinator.registered(), 1);

        coordinator.signal_stop();
        assert!(wait_until(|| kept.0.load(Ordering::SeqCst) == 1));
        assert_eq!(removed.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_broadcast_without_signal() {
        let coordinator = ShutdownCoordinator::start().unwrap();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        coordinator.register(counter.clone());

        // A notify without the predicate set must not trigger the broadcast.
        coordinator.inner.stop_signal.notify_all();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        assert!(!coordinator.is_stop_requested());
    }

    #[test]
    fn test_signal_stop_is_idempotent() {
        let coordinator = ShutdownCoordinator::start().unwrap();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        coordinator.register(counter.clone());

        coordinator.signal_stop();
        coordinator.signal_stop();
        coordinator.signal_stop();
        assert!(wait_until(|| counter.0.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(coordinator.is_stop_requested());
    }

    #[test]
    fn test_late_registration_is_terminated_immediately() {
        let coordinator = ShutdownCoordinator::start().unwrap();
        coordinator.signal_stop();
        assert!(wait_until(|| coordinator.inner.lock_registry().broadcast_done));

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        coordinator.register(counter.clone());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.registered(), 0);
    }

    #[test]
    fn test_shutdown_self_skips_registered_participants() {
        let coordinator = ShutdownCoordinator::start().unwrap();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        coordinator.register(counter.clone());

        coordinator.shutdown_self();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        assert!(coordinator.thread.lock().unwrap().is_none());

        // Second call is a no-op.
        coordinator.shutdown_self();
    }
}
