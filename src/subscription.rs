use crate::error::{MatrioError, Result};
use crate::types::{ConnectionState, DeviceInfo, InputId, ZoneField, ZoneId};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// Fields of one zone that changed in a single update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneChange {
    pub zone: ZoneId,
    pub fields: Vec<ZoneField>,
}

/// State update from a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    /// Visible fields of a zone changed
    Zone(ZoneChange),

    /// Input names changed (shared by all zones)
    InputNames(BTreeMap<InputId, String>),

    /// Device identity changed
    Device(Box<DeviceInfo>),

    /// Cache became stale (`true`) or was resynchronized (`false`)
    Staleness(bool),
}

/// Connectivity notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection moved to a new state
    State(ConnectionState),

    /// Repeated connection attempts have failed; the client keeps retrying
    Fault { attempts: u32, reason: String },
}

/// Receiver for state updates
pub struct StateReceiver {
    rx: broadcast::Receiver<StateUpdate>,
}

impl StateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<StateUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next state update
    ///
    /// Fails with [`MatrioError::NotConnected`] once the client has been dropped,
    /// or [`MatrioError::ChannelError`] if this receiver fell behind.
    pub async fn recv(&mut self) -> Result<StateUpdate> {
        self.rx.recv().await.map_err(map_recv_error)
    }

    /// Try to receive a state update without blocking
    ///
    /// Returns `None` if no update is available.
    pub fn try_recv(&mut self) -> Result<Option<StateUpdate>> {
        try_recv(&mut self.rx)
    }
}

/// Receiver for connectivity notifications
pub struct ConnectionReceiver {
    rx: broadcast::Receiver<ConnectionEvent>,
}

impl ConnectionReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<ConnectionEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next connectivity notification
    pub async fn recv(&mut self) -> Result<ConnectionEvent> {
        self.rx.recv().await.map_err(map_recv_error)
    }

    /// Try to receive a notification without blocking
    pub fn try_recv(&mut self) -> Result<Option<ConnectionEvent>> {
        try_recv(&mut self.rx)
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> MatrioError {
    match e {
        broadcast::error::RecvError::Closed => MatrioError::NotConnected,
        broadcast::error::RecvError::Lagged(n) => {
            MatrioError::ChannelError(format!("Lagged by {} messages", n))
        }
    }
}

fn try_recv<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Result<Option<T>> {
    match rx.try_recv() {
        Ok(update) => Ok(Some(update)),
        Err(broadcast::error::TryRecvError::Empty) => Ok(None),
        Err(broadcast::error::TryRecvError::Closed) => Err(MatrioError::NotConnected),
        Err(broadcast::error::TryRecvError::Lagged(n)) => {
            Err(MatrioError::ChannelError(format!("Lagged by {} messages", n)))
        }
    }
}
