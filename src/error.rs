/// Error types for the OTA uploader
use thiserror::Error;

/// Result type alias using `OtaError`
pub type Result<T> = std::result::Result<T, OtaError>;

/// Everything that can end a connection attempt or a transfer.
///
/// None of these are fatal to the process; after any of them the link
/// manager is back in `Disconnected` and a new attempt may be started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    /// No peripheral was chosen during discovery
    #[error("No peripheral selected")]
    SelectionCancelled,

    /// Transport-level connect failure
    #[error("Failed to connect: {0}")]
    LinkFailed(String),

    #[error("Device does not have the OTA service")]
    ServiceNotFound,

    #[error("OTA data characteristic not found")]
    CharacteristicNotFound,

    /// Write or read failure during transfer
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Link lost while a session was live
    #[error("Peripheral disconnected unexpectedly")]
    UnexpectedDisconnect,

    /// `disconnect()` was called while the attempt was still connecting
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// A radio operation exceeded its configured timeout
    #[error("{0} timed out")]
    TimedOut(&'static str),

    /// A connection attempt or session is already in progress
    #[error("A connection attempt is already in progress")]
    Busy,

    /// Radio adapter unavailable or failed to scan
    #[error("Bluetooth adapter error: {0}")]
    Adapter(String),

    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),

    #[error("Settings error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for OtaError {
    fn from(err: std::io::Error) -> Self {
        OtaError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OtaError {
    fn from(err: serde_json::Error) -> Self {
        OtaError::Config(err.to_string())
    }
}
