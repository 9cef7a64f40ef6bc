use thiserror::Error;

/// Result type for Matrio operations
pub type Result<T> = std::result::Result<T, MatrioError>;

/// Errors that can occur when controlling a Matrio amplifier
#[derive(Error, Debug)]
pub enum MatrioError {
    /// Command value outside the documented range for its field
    #[error("{field} value {value} out of range ({min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },

    /// Zone id not present on this device
    #[error("Invalid zone: {0}")]
    InvalidZone(u8),

    /// Input id not present on this device
    #[error("Invalid input: {0}")]
    InvalidInput(u8),

    /// A zone selection must address at least one zone
    #[error("Zone selection is empty")]
    EmptyZoneSelection,

    /// Zone or input name cannot be sent to the device
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// No input with the given name is known
    #[error("Unknown input: {0}")]
    UnknownInput(String),

    /// Command issued while the connection is not established
    #[error("Not connected")]
    NotConnected,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out
    #[error("Timeout")]
    Timeout,

    /// Notification channel error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl MatrioError {
    pub(crate) fn out_of_range(field: &'static str, value: i32, range: (i32, i32)) -> Self {
        Self::OutOfRange {
            field,
            value,
            min: range.0,
            max: range.1,
        }
    }
}
