// Firmware transfer engine
//
// Streams a firmware image to the OTA endpoint one chunk at a time:
// write (acknowledged), a pacing read every ACK_INTERVAL chunks, progress
// every progress_step chunks. The link manager's cancel signal is checked
// before each chunk.

use crate::error::{OtaError, Result};
use crate::events::{CancelSignal, NoopObserver, Progress, ProgressObserver};
use crate::image::FirmwareImage;
use crate::link::Endpoint;
use crate::logging::{LogSink, NoopLog};
use std::sync::Arc;

/// A pacing read follows every chunk whose index is a multiple of this.
pub const ACK_INTERVAL: usize = 64;

/// Chunks per reported percent. Never zero, so images under 100 chunks
/// report on every chunk.
pub fn progress_step(total_chunks: usize) -> usize {
    (total_chunks / 100).max(1)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    Disconnected,
    TransportError(String),
    TimedOut(&'static str),
}

impl From<OtaError> for AbortReason {
    fn from(err: OtaError) -> Self {
        match err {
            OtaError::UnexpectedDisconnect => AbortReason::Disconnected,
            OtaError::TimedOut(op) => AbortReason::TimedOut(op),
            OtaError::TransportError(cause) => AbortReason::TransportError(cause),
            other => AbortReason::TransportError(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Transferring,
    Completed,
    Aborted(AbortReason),
}

/// Counters and state of one upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferSession {
    pub total_chunks: usize,
    /// Index of the next chunk to write
    pub next_index: usize,
    pub ack_interval: usize,
    pub progress_step: usize,
    pub state: SessionState,
    pub writes: usize,
    pub acks: usize,
}

impl TransferSession {
    pub fn new(total_chunks: usize) -> Self {
        Self {
            total_chunks,
            next_index: 0,
            ack_interval: ACK_INTERVAL,
            progress_step: progress_step(total_chunks),
            state: SessionState::Idle,
            writes: 0,
            acks: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// Map the final state onto the crate error type.
    pub fn result(&self) -> Result<()> {
        match &self.state {
            SessionState::Completed => Ok(()),
            SessionState::Aborted(AbortReason::Disconnected) => Err(OtaError::UnexpectedDisconnect),
            SessionState::Aborted(AbortReason::TimedOut(op)) => Err(OtaError::TimedOut(*op)),
            SessionState::Aborted(AbortReason::TransportError(cause)) => {
                Err(OtaError::TransportError(cause.clone()))
            }
            SessionState::Idle | SessionState::Transferring => Err(OtaError::TransportError(
                "transfer did not run to an end".to_string(),
            )),
        }
    }
}

pub struct FirmwareUploader {
    logger: Arc<dyn LogSink>,
    progress: Arc<dyn ProgressObserver>,
}

impl Default for FirmwareUploader {
    fn default() -> Self {
        Self::new()
    }
}

impl FirmwareUploader {
    pub fn new() -> Self {
        Self {
            logger: Arc::new(NoopLog),
            progress: Arc::new(NoopObserver),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn LogSink>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    /// Upload `image` over `endpoint`. Never retries; the returned session
    /// records how far it got and why it stopped.
    pub async fn upload_firmware(
        &self,
        endpoint: &Endpoint,
        image: &FirmwareImage,
        cancel: &CancelSignal,
    ) -> TransferSession {
        let mut session = TransferSession::new(image.len());
        let device_name = endpoint.device_name();

        if image.is_empty() {
            session.state = SessionState::Completed;
            self.logger.info("Firmware image is empty, nothing to send.");
            self.progress.on_complete(&device_name);
            return session;
        }

        self.logger.info("Starting OTA update.");
        tlog!(
            "[transfer] {} chunks, {} bytes, sha256 {}",
            image.len(),
            image.total_bytes(),
            image.sha256_hex()
        );
        session.state = SessionState::Transferring;

        for (index, chunk) in image.chunks().iter().enumerate() {
            if cancel.is_raised() {
                tlog!("[transfer] Link lost before chunk {index}, stopping");
                self.logger
                    .error(&format!("Transfer aborted at chunk {index}: link lost"));
                session.state = SessionState::Aborted(AbortReason::Disconnected);
                return session;
            }

            if let Err(err) = self.send_chunk(endpoint, &mut session, index, chunk).await {
                self.logger
                    .error(&format!("Transfer aborted at chunk {index}: {err}"));
                session.state = SessionState::Aborted(err.into());
                return session;
            }

            if index % session.progress_step == 0 {
                self.progress.on_progress(Progress {
                    index,
                    total_chunks: session.total_chunks,
                    percent: index / session.progress_step,
                });
            }
        }

        session.state = SessionState::Completed;
        tlog!("[transfer] Upload complete ({} chunks)", session.writes);
        self.logger
            .info(&format!("OTA update done for {device_name}."));
        self.progress.on_complete(&device_name);
        session
    }

    async fn send_chunk(
        &self,
        endpoint: &Endpoint,
        session: &mut TransferSession,
        index: usize,
        chunk: &[u8],
    ) -> Result<()> {
        endpoint.write(chunk).await?;
        session.writes += 1;
        session.next_index = index + 1;

        if index % session.ack_interval == 0 {
            // Content is not checked, the read only paces the peripheral
            endpoint.read().await?;
            session.acks += 1;
        }
        Ok(())
    }
}
