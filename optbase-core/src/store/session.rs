use super::{Store, StoreError};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Explicit connection handle. Calls on one session run sequentially; each
/// is bounded by `timeout`.
///
/// A call that times out keeps running on its own thread. Until it finishes,
/// the session starts no other call: the next call first waits up to
/// `timeout` for it and fails with [`StoreError::Timeout`] if it is still
/// running. A retried delete therefore never overlaps, or lands after, the
/// writes that follow it. Clones share this state; [`Connector::connect`]
/// hands out a fresh session.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn Store>,
    timeout: Duration,
    in_flight: Arc<Mutex<Option<mpsc::Receiver<()>>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store.describe())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Session {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            timeout: DEFAULT_TIMEOUT,
            in_flight: Arc::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn describe(&self) -> String {
        self.store.describe()
    }

    /// True while a timed-out call is still running.
    pub fn is_busy(&self) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        Self::settle(&mut in_flight, Duration::ZERO).is_err()
    }

    /// Wait up to `wait` for an earlier timed-out call to finish.
    fn settle(in_flight: &mut Option<mpsc::Receiver<()>>, wait: Duration) -> Result<(), StoreError> {
        let Some(done) = in_flight.as_ref() else {
            return Ok(());
        };
        match done.recv_timeout(wait) {
            // The worker drops its sender on exit, panicking or not.
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                *in_flight = None;
                Ok(())
            }
            Err(mpsc::RecvTimeoutError::Timeout) => Err(StoreError::Timeout(wait)),
        }
    }

    /// Run `op` against the store, failing with [`StoreError::Timeout`] if it
    /// does not finish in time. A timed-out call keeps running in the
    /// background; its result is discarded and the session stays busy until
    /// it ends.
    pub fn call<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = Self::settle(&mut in_flight, self.timeout) {
            warn!(timeout = ?self.timeout, store = %self.store.describe(), "earlier store call still running");
            return Err(e);
        }

        let store = Arc::clone(&self.store);
        let (tx, rx) = mpsc::sync_channel(1);
        let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);
        thread::Builder::new()
            .name("optbase-store-call".into())
            .spawn(move || {
                let _done = done_tx;
                let _ = tx.send(op(store.as_ref()));
            })
            .map_err(|e| StoreError::Transient(format!("cannot spawn store call: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.timeout, store = %self.store.describe(), "store call timed out");
                *in_flight = Some(done_rx);
                Err(StoreError::Timeout(self.timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(StoreError::Transient("store call panicked".into()))
            }
        }
    }
}

/// Hands out sessions; parallel import gives each worker its own.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Session, StoreError>;
}

/// Every session shares one store instance; each connection tracks its own
/// in-flight call.
impl Connector for Session {
    fn connect(&self) -> Result<Session, StoreError> {
        Ok(Session::new(Arc::clone(&self.store)).with_timeout(self.timeout))
    }
}
