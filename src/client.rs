use crate::commands::CommandDispatcher;
use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::error::{MatrioError, Result};
use crate::state::StateCache;
use crate::subscription::{ConnectionReceiver, StateReceiver};
use crate::types::{ConnectionState, DeviceInfo, DeviceSnapshot, ZoneId};
use crate::zone::Zone;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Client for one Matrio Control amplifier
///
/// The `MatrioClient` owns the connection to the device, keeps it alive
/// across drops, and provides access to the cached zone state, change
/// subscriptions and commands. Dropping the client shuts the connection down.
pub struct MatrioClient {
    config: ClientConfig,
    cache: Arc<StateCache>,
    manager: Arc<ConnectionManager>,
    commands: CommandDispatcher,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MatrioClient {
    /// Start managing the connection without waiting for it
    ///
    /// The client keeps retrying in the background until [`shutdown`] is
    /// called. Must be called from within a tokio runtime.
    ///
    /// [`shutdown`]: MatrioClient::shutdown
    pub fn start(config: ClientConfig) -> Self {
        let cache = Arc::new(StateCache::new(
            config.zone_count,
            config.input_count,
            DeviceInfo::new(config.display_name.clone(), config.address()),
        ));
        let manager = ConnectionManager::new(config.clone(), cache.clone());
        let commands = CommandDispatcher::new(manager.clone(), cache.clone());
        let handle = manager.start();

        tracing::info!(addr = %config.address(), "Matrio client started");

        Self {
            config,
            cache,
            manager,
            commands,
            task_handle: Mutex::new(Some(handle)),
        }
    }

    /// Connect to an amplifier, waiting up to `connect_timeout` for the link
    ///
    /// # Example
    ///
    /// ```no_run
    /// use matrio_control::{ClientConfig, MatrioClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = MatrioClient::connect(ClientConfig::new("192.168.1.50")).await?;
    ///     client.commands().set_volume([3], 20)?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let wait = config.connect_timeout;
        let client = Self::start(config);
        match client.wait_for_connection(wait).await {
            Ok(()) => Ok(client),
            Err(e) => {
                client.shutdown().await;
                Err(e)
            }
        }
    }

    /// Wait until the connection is established
    pub async fn wait_for_connection(&self, limit: Duration) -> Result<()> {
        let mut rx = self.manager.subscribe_state();
        timeout(limit, rx.wait_for(|state| *state == ConnectionState::Connected))
            .await
            .map_err(|_| MatrioError::Timeout)?
            .map_err(|_| MatrioError::NotConnected)?;
        Ok(())
    }

    /// Stop the connection manager
    ///
    /// Closes the socket, cancels any pending reconnect and leaves the client in
    /// [`ConnectionState::Disconnected`]. Unsent commands are dropped.
    pub async fn shutdown(&self) {
        self.manager.shutdown();
        let handle = self
            .task_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // Give it a moment to stop gracefully
            let _ = timeout(SHUTDOWN_GRACE, handle).await;
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Get a copy of everything known about the device
    pub fn current_state(&self) -> DeviceSnapshot {
        self.cache.snapshot()
    }

    /// Subscribe to state changes
    ///
    /// Returns a receiver that yields an update for each zone whose visible
    /// fields changed, plus name, identity and staleness changes. Multiple
    /// subscriptions can be active simultaneously.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use matrio_control::{ClientConfig, MatrioClient, StateUpdate};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = MatrioClient::connect(ClientConfig::new("192.168.1.50")).await?;
    ///     let mut rx = client.subscribe_state();
    ///
    ///     while let Ok(update) = rx.recv().await {
    ///         if let StateUpdate::Zone(change) = update {
    ///             println!("Zone {} changed: {:?}", change.zone, change.fields);
    ///         }
    ///     }
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe_state(&self) -> StateReceiver {
        StateReceiver::new(self.cache.subscribe())
    }

    /// Subscribe to connection state changes and connectivity faults
    pub fn subscribe_connection(&self) -> ConnectionReceiver {
        ConnectionReceiver::new(self.manager.subscribe_events())
    }

    /// Command dispatcher for multi-zone commands
    pub fn commands(&self) -> CommandDispatcher {
        self.commands.clone()
    }

    /// Handle for a single zone
    pub fn zone(&self, id: ZoneId) -> Result<Zone> {
        if id == 0 || id > self.config.zone_count {
            return Err(MatrioError::InvalidZone(id));
        }
        Ok(Zone::new(id, self.commands.clone(), self.cache.clone()))
    }

    /// Handles for every zone on the device
    pub fn zones(&self) -> Vec<Zone> {
        (1..=self.config.zone_count)
            .map(|id| Zone::new(id, self.commands.clone(), self.cache.clone()))
            .collect()
    }
}

impl Drop for MatrioClient {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}
