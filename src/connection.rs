use crate::config::ClientConfig;
use crate::error::{MatrioError, Result};
use crate::protocol::{decode, encode, DecodeResult, Frame, FrameLayout};
use crate::state::StateCache;
use crate::subscription::ConnectionEvent;
use crate::types::ConnectionState;
use bytes::{Buf, Bytes, BytesMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep, sleep_until, timeout, Instant, MissedTickBehavior};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const READ_BUFFER_SIZE: usize = 4096;

/// Longest keepalive period; larger settings are treated as this
const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How a session ended without an I/O error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Shutdown was requested
    Shutdown,
    /// The device closed the connection
    Closed,
}

/// Owns the link to one amplifier
///
/// A supervisor task connects, runs a session until the link drops, then
/// reconnects with exponential backoff until shutdown. Within a session one
/// reader loop feeds decoded frames to the state cache and a single writer task
/// serializes outbound frames.
pub(crate) struct ConnectionManager {
    config: ClientConfig,
    layout: FrameLayout,
    cache: Arc<StateCache>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// Channel for sending outgoing frames; `None` while no session is live
    writer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionManager {
    pub(crate) fn new(config: ClientConfig, cache: Arc<StateCache>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            layout: config.layout(),
            config,
            cache,
            state_tx,
            event_tx,
            writer: Mutex::new(None),
            shutdown_tx,
        })
    }

    /// Spawn the supervisor task
    pub(crate) fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move { manager.run().await })
    }

    /// Request shutdown; the supervisor closes the socket and stops retrying
    pub(crate) fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Queue a frame for the writer task
    ///
    /// Fails with [`MatrioError::NotConnected`] unless a session is live.
    pub(crate) fn send(&self, frame: &Frame) -> Result<()> {
        self.send_with(frame, || {})
    }

    /// Queue a frame, running `before_send` once the session is known to be
    /// live and before the frame reaches the writer task.
    ///
    /// Any reply to the frame is decoded after `before_send` has returned, so
    /// local updates made there cannot overwrite the device's answer.
    pub(crate) fn send_with(&self, frame: &Frame, before_send: impl FnOnce()) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(MatrioError::NotConnected);
        }
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = writer.as_ref().ok_or(MatrioError::NotConnected)?;

        before_send();
        tracing::debug!(opcode = frame.opcode(), "Sending frame");
        tx.send(encode(frame))
            .map_err(|_| MatrioError::NotConnected)
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::info!(addr = %self.config.address(), %state, "Connection state changed");
            let _ = self.event_tx.send(ConnectionEvent::State(state));
        }
    }

    fn attach_writer(&self, tx: Option<mpsc::UnboundedSender<Bytes>>) {
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = tx;
    }

    /// Supervisor loop: connect, run the session, back off, repeat
    async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut backoff = Duration::ZERO;
        let mut failures = 0u32;
        let mut faulted = false;

        loop {
            if backoff > Duration::ZERO {
                tracing::info!(addr = %self.config.address(), "Reconnecting in {:?}", backoff);
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown_rx) => break,
                    _ = sleep(backoff) => {}
                }
            }

            self.set_state(ConnectionState::Connecting);

            let attempt = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
                result = self.connect() => result,
            };

            match attempt {
                Ok(stream) => {
                    failures = 0;
                    faulted = false;

                    let end = self.run_session(stream, &mut shutdown_rx).await;
                    self.cache.mark_stale();

                    match end {
                        Ok(SessionEnd::Shutdown) => break,
                        Ok(SessionEnd::Closed) => {
                            tracing::warn!(
                                addr = %self.config.address(),
                                "Connection closed by device"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(addr = %self.config.address(), "Connection lost: {}", e);
                        }
                    }
                    backoff = self.config.next_backoff(Duration::ZERO);
                }
                Err(e) => {
                    failures += 1;
                    tracing::error!(
                        addr = %self.config.address(),
                        attempt = failures,
                        "Connect failed: {}",
                        e
                    );

                    if failures >= self.config.fault_threshold && !faulted {
                        faulted = true;
                        tracing::warn!(
                            addr = %self.config.address(),
                            attempts = failures,
                            "Device unreachable, still retrying"
                        );
                        let _ = self.event_tx.send(ConnectionEvent::Fault {
                            attempts: failures,
                            reason: e.to_string(),
                        });
                    }
                    backoff = self.config.next_backoff(backoff);
                }
            }

            self.set_state(ConnectionState::Reconnecting);
        }

        self.attach_writer(None);
        self.cache.mark_stale();
        self.set_state(ConnectionState::Disconnected);
        tracing::info!(addr = %self.config.address(), "Connection manager stopped");
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = self.config.address();
        tracing::info!(addr = %addr, "Connecting");

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| MatrioError::Timeout)??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Run one session over an established stream until it ends
    ///
    /// Marks the connection Connected, sends the initial status query, then
    /// reads and applies frames while sending a keepalive query every
    /// `heartbeat_interval`. Silence longer than `heartbeat_timeout` ends the
    /// session with [`MatrioError::Timeout`].
    async fn run_session<S>(
        &self,
        stream: S,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        // Spawn task to forward outgoing frames to the socket
        let mut write_handle = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    tracing::error!("Failed to send frame: {}", e);
                    return Err(e);
                }
            }
            writer.shutdown().await
        });

        let query = encode(&Frame::StatusQuery);
        let _ = tx.send(query.clone());
        self.attach_writer(Some(tx.clone()));
        self.set_state(ConnectionState::Connected);

        let interval = self
            .config
            .heartbeat_interval
            .clamp(Duration::from_millis(1), MAX_HEARTBEAT_INTERVAL);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut last_inbound = Instant::now();

        let end = loop {
            // None when the timeout is too large to ever expire
            let deadline = last_inbound.checked_add(self.config.heartbeat_timeout);

            tokio::select! {
                _ = wait_for_shutdown(shutdown_rx) => break Ok(SessionEnd::Shutdown),
                read = reader.read_buf(&mut buf) => match read {
                    Ok(0) => break Ok(SessionEnd::Closed),
                    Ok(n) => {
                        tracing::trace!(bytes = n, "Received data");
                        last_inbound = Instant::now();
                        self.process_buffer(&mut buf);
                    }
                    Err(e) => break Err(e.into()),
                },
                _ = heartbeat.tick() => {
                    tracing::debug!("Sending keepalive status query");
                    let _ = tx.send(query.clone());
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    tracing::warn!("No data from device for {:?}", self.config.heartbeat_timeout);
                    break Err(MatrioError::Timeout);
                }
                result = &mut write_handle => break match result {
                    Ok(Err(e)) => Err(e.into()),
                    _ => Err(MatrioError::ChannelError("Writer task stopped".to_string())),
                },
            }
        };

        self.attach_writer(None);
        if !write_handle.is_finished() {
            write_handle.abort();
        }
        end
    }

    /// Decode and apply every complete frame in the buffer
    fn process_buffer(&self, buf: &mut BytesMut) {
        loop {
            match decode(buf, &self.layout) {
                DecodeResult::Frame(frame, consumed) => {
                    buf.advance(consumed);
                    tracing::debug!(opcode = frame.opcode(), "Received frame");
                    let changed = self.cache.apply_broadcast(&frame);
                    if !changed.is_empty() {
                        tracing::trace!(?changed, "Zones updated");
                    }
                }
                DecodeResult::Invalid(skip) => {
                    tracing::trace!(skip, "Discarding unframed bytes");
                    buf.advance(skip);
                }
                DecodeResult::Incomplete => break,
            }
        }
    }
}

/// Resolve once shutdown has been requested or the sender is gone
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
