use crate::protocol::FrameLayout;
use crate::types::{DEFAULT_INPUT_COUNT, DEFAULT_ZONE_COUNT};
use crate::zones::MAX_ZONES;
use std::time::Duration;

/// TCP port the amplifier listens on for Matrio Control traffic
pub const DEFAULT_PORT: u16 = 8899;

/// Shortest delay between reconnect attempts
const MIN_BACKOFF: Duration = Duration::from_millis(10);

/// Connection settings for a single amplifier
///
/// # Example
///
/// ```
/// use matrio_control::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("192.168.1.50")
///     .with_display_name("Whole House Audio")
///     .with_max_backoff(Duration::from_secs(30));
/// assert_eq!(config.port, 8899);
/// assert_eq!(config.address(), "192.168.1.50:8899");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,

    /// Name the presentation layer shows for the device
    pub display_name: String,

    pub zone_count: u8,
    pub input_count: u8,

    /// Maximum time to wait for the TCP handshake
    pub connect_timeout: Duration,

    /// How often a status query is sent as a keepalive
    pub heartbeat_interval: Duration,

    /// Connection is considered lost after this long without inbound bytes
    pub heartbeat_timeout: Duration,

    /// First reconnect delay; doubles on each failure
    pub initial_backoff: Duration,
    pub max_backoff: Duration,

    /// Consecutive failed attempts before a connectivity fault is reported
    pub fault_threshold: u32,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            display_name: host.clone(),
            host,
            port: DEFAULT_PORT,
            zone_count: DEFAULT_ZONE_COUNT,
            input_count: DEFAULT_INPUT_COUNT,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            fault_threshold: 5,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_zone_count(mut self, zones: u8) -> Self {
        self.zone_count = zones.clamp(1, MAX_ZONES);
        self
    }

    pub fn with_input_count(mut self, inputs: u8) -> Self {
        self.input_count = inputs.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the keepalive interval and the silence threshold that counts as a lost link
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn with_fault_threshold(mut self, attempts: u32) -> Self {
        self.fault_threshold = attempts.max(1);
        self
    }

    /// `host:port` string used to connect
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn layout(&self) -> FrameLayout {
        FrameLayout {
            zone_count: self.zone_count,
            input_count: self.input_count,
        }
    }

    /// Delay before the next attempt after `previous`
    ///
    /// Exponential backoff: initial, 2x, 4x ... capped at `max_backoff`.
    /// Never shorter than 10 ms, whatever the configured values.
    pub(crate) fn next_backoff(&self, previous: Duration) -> Duration {
        let cap = self.max_backoff.max(MIN_BACKOFF);
        let next = if previous.is_zero() {
            self.initial_backoff
        } else {
            previous.saturating_mul(2)
        };
        next.clamp(MIN_BACKOFF, cap)
    }
}
