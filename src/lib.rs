#[macro_use]
pub mod logging;

pub mod ble;
pub mod ble_common;
#[cfg(feature = "cli")]
pub mod cli;
pub mod error;
pub mod events;
pub mod image;
pub mod link;
pub mod settings;
pub mod transfer;
pub mod transport;
pub mod updater;

#[cfg(test)]
mod testing;

pub use error::{OtaError, Result};
pub use events::{CancelSignal, LinkEvent, LinkObserver, Progress, ProgressObserver};
pub use image::{FirmwareImage, ImageFormat};
pub use link::{Connection, DisconnectCause, Endpoint, LinkManager, LinkState};
pub use logging::{ConsoleLog, LogSink, NoopLog};
pub use settings::Settings;
pub use transfer::{AbortReason, FirmwareUploader, SessionState, TransferSession};
pub use transport::{Advertisement, Central, Peripheral, SelectionFilter};
pub use updater::OtaUpdater;
