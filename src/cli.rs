// Command-line front end: load settings and image, run one update over the
// system BLE adapter, report progress on stderr.

use crate::ble::BleCentral;
use crate::ble_common::MAX_CHUNK_LEN;
use crate::error::Result;
use crate::events::{LinkObserver, Progress, ProgressObserver};
use crate::image::{FirmwareImage, ImageFormat};
use crate::link::LinkManager;
use crate::logging::{self, ConsoleLog, LogSink};
use crate::settings::{self, Settings};
use crate::transfer::FirmwareUploader;
use crate::transport::SelectionFilter;
use crate::updater::OtaUpdater;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Upload firmware to a BLE smart watch over its OTA service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Firmware file
    pub firmware: PathBuf,

    /// Firmware file layout
    #[arg(long, value_enum, default_value_t = ImageFormat::Raw)]
    pub format: ImageFormat,

    /// Bytes per chunk for raw images
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Only consider peripherals whose name starts with this
    #[arg(long)]
    pub name_prefix: Option<String>,

    /// Platform id of the peripheral to update
    #[arg(long)]
    pub device: Option<String>,

    /// Scan duration in seconds
    #[arg(long)]
    pub scan_secs: Option<u64>,

    /// Settings file (defaults to the user config dir)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Also write the log to this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    /// Layer command-line overrides on top of the loaded settings.
    fn apply(&self, settings: &mut Settings) {
        if let Some(prefix) = &self.name_prefix {
            settings.name_prefix = Some(prefix.clone());
        }
        if let Some(size) = self.chunk_size {
            settings.chunk_size = size;
        }
        if let Some(secs) = self.scan_secs {
            settings.scan_duration_ms = secs.saturating_mul(1000);
        }
        if let Some(dir) = &self.log_dir {
            settings.log_dir = Some(dir.clone());
        }
    }
}

/// Prints the lifecycle and progress lines the user watches.
struct Reporter;

impl LinkObserver for Reporter {
    fn on_connecting(&self) {
        tlog!("[watch-ota] CONNECTING...");
    }

    fn on_connect(&self) {
        tlog!("[watch-ota] CONNECTED");
    }

    fn on_disconnect(&self) {
        tlog!("[watch-ota] DISCONNECTED");
    }
}

impl ProgressObserver for Reporter {
    fn on_progress(&self, progress: Progress) {
        tlog!("[watch-ota] Uploading... ({}%)", progress.percent);
    }

    fn on_complete(&self, device_name: &str) {
        tlog!("[watch-ota] DONE {device_name}");
    }
}

pub async fn run(args: Args) -> Result<()> {
    let settings_path = match &args.settings {
        Some(path) => path.clone(),
        None => settings::default_settings_path()?,
    };
    let mut settings = settings::load_settings(&settings_path)?;
    settings.apply_env();
    args.apply(&mut settings);

    if let Some(dir) = &settings.log_dir {
        if let Err(e) = logging::init_file_logging(dir) {
            tlog!("[watch-ota] {e}");
        }
    }

    let result = update(&args, &settings).await;
    logging::stop_file_logging();
    result
}

/// Load the firmware file and check it fits the OTA characteristic.
fn load_image(args: &Args, settings: &Settings) -> Result<FirmwareImage> {
    let image = FirmwareImage::load(&args.firmware, args.format, settings.chunk_size)?;
    image.validate(MAX_CHUNK_LEN)?;
    tlog!(
        "[watch-ota] Loaded {} ({} chunks, {} bytes)",
        args.firmware.display(),
        image.len(),
        image.total_bytes()
    );
    Ok(image)
}

async fn update(args: &Args, settings: &Settings) -> Result<()> {
    let image = load_image(args, settings)?;

    let filter = SelectionFilter {
        name_prefix: settings.name_prefix.clone(),
        device_id: args.device.clone(),
    };
    let reporter = Arc::new(Reporter);
    let logger: Arc<dyn LogSink> = Arc::new(ConsoleLog::default());

    let central = BleCentral::new(settings).await?;
    let link = LinkManager::new(Arc::new(central))
        .with_filter(filter)
        .with_timeouts(settings.timeouts())
        .with_observer(reporter.clone())
        .with_logger(logger.clone());
    let uploader = FirmwareUploader::new()
        .with_logger(logger)
        .with_progress(reporter);

    let session = OtaUpdater::new(link, uploader).run(&image).await?;
    session.result()
}
