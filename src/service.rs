//! The host side: a session service handing out readers, and readers handing out
//! logical channels to the ISD-R.

use crate::transceiver::Channel;
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::{debug, trace};

/// One hardware reader (a physical SIM slot).
pub trait Reader {
    type Channel: Channel;

    /// Stable identity, used as the key for persisted per-reader state.
    fn name(&self) -> &str;

    /// Opens a logical channel to the applet with the given AID. A channel that the
    /// platform refuses for access-control reasons is [`Error::ChannelUnavailable`].
    fn open_channel(&mut self, aid: &[u8]) -> Result<Self::Channel>;
}

/// A connected session service.
pub trait SeService {
    type Reader: Reader;

    /// The readers, in enumeration order.
    fn readers(&self) -> Result<Vec<Self::Reader>>;
}

/// Where the shared service connection stands.
#[derive(Debug)]
pub enum ConnectionState<S> {
    Disconnected,
    /// Someone is connecting; everyone else waits for them.
    Connecting,
    Connected(Arc<S>),
}

/// The single, shared connection to a session service.
///
/// Concurrent callers of [`ServiceHandle::get_or_connect`] never open two
/// connections: the first one in connects, the rest block until it's done, and
/// then reuse its connection until it's [invalidated](ServiceHandle::invalidate).
#[derive(Debug)]
pub struct ServiceHandle<S> {
    state: Mutex<ConnectionState<S>>,
    changed: Condvar,
}

impl<S> Default for ServiceHandle<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ServiceHandle<S> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            changed: Condvar::new(),
        }
    }

    /// Returns the current connection, or connects with `connect` if there is none.
    ///
    /// The connection attempt runs without holding the lock. If it fails, the handle
    /// goes back to disconnected and one of the waiters gets to try.
    pub fn get_or_connect<F>(&self, connect: F) -> Result<Arc<S>>
    where
        F: FnOnce() -> Result<S>,
    {
        let mut state = self.state.lock();
        loop {
            if let ConnectionState::Connected(service) = &*state {
                return Ok(service.clone());
            }
            if !matches!(*state, ConnectionState::Connecting) {
                break;
            }
            trace!("Waiting for another caller to connect");
            self.changed.wait(&mut state);
        }
        *state = ConnectionState::Connecting;
        drop(state);

        debug!("Connecting to the session service");
        let attempt = Attempt { handle: self };
        let result = connect();
        std::mem::forget(attempt);

        let mut state = self.state.lock();
        let result = match result {
            Ok(service) => {
                let service = Arc::new(service);
                *state = ConnectionState::Connected(service.clone());
                Ok(service)
            }
            Err(err) => {
                *state = ConnectionState::Disconnected;
                Err(match err {
                    err @ Error::ConnectionFailed(_) => err,
                    err => Error::ConnectionFailed(err.to_string()),
                })
            }
        };
        self.changed.notify_all();
        result
    }

    /// Drops the current connection; the next caller reconnects.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        if let ConnectionState::Connected(_) = &*state {
            debug!("Session service connection invalidated");
            *state = ConnectionState::Disconnected;
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(&*self.state.lock(), ConnectionState::Connected(_))
    }
}

/// Puts a handle back to disconnected if a connection attempt unwinds.
struct Attempt<'a, S> {
    handle: &'a ServiceHandle<S>,
}

impl<S> Drop for Attempt<'_, S> {
    fn drop(&mut self) {
        debug!("Connection attempt abandoned");
        *self.handle.state.lock() = ConnectionState::Disconnected;
        self.handle.changed.notify_all();
    }
}
