// One complete update attempt: connect, upload, release the link.

use crate::error::Result;
use crate::image::FirmwareImage;
use crate::link::LinkManager;
use crate::transfer::{FirmwareUploader, TransferSession};

pub struct OtaUpdater {
    link: LinkManager,
    uploader: FirmwareUploader,
}

impl OtaUpdater {
    pub fn new(link: LinkManager, uploader: FirmwareUploader) -> Self {
        Self { link, uploader }
    }

    pub fn link(&self) -> &LinkManager {
        &self.link
    }

    /// Connect to the watch and stream `image` to it.
    ///
    /// Connection-phase failures come back as `Err`. Once connected, the
    /// session is returned whatever its outcome; use
    /// [`TransferSession::result`] to turn it into an error. The link is
    /// always released before returning, so `run` may be called again.
    pub async fn run(&self, image: &FirmwareImage) -> Result<TransferSession> {
        let connection = self.link.discover_and_connect().await?;
        tlog!(
            "[updater] Connected to {} ({}), sending {} chunks",
            connection.name,
            connection.peripheral_id,
            image.len()
        );

        let session = self
            .uploader
            .upload_firmware(&connection.endpoint, image, &connection.cancel)
            .await;

        self.link.disconnect().await;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OtaError;
    use crate::events::{LinkEvent, LinkObserver};
    use crate::link::{DisconnectCause, LinkState};
    use crate::testing::{MockCentral, MockPeripheral, RecordingLog, RecordingProgress};
    use crate::transfer::{AbortReason, SessionState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct HookCounts {
        connecting: AtomicUsize,
        connect: AtomicUsize,
        disconnect: AtomicUsize,
    }

    impl HookCounts {
        fn get(&self) -> (usize, usize, usize) {
            (
                self.connecting.load(Ordering::SeqCst),
                self.connect.load(Ordering::SeqCst),
                self.disconnect.load(Ordering::SeqCst),
            )
        }
    }

    impl LinkObserver for HookCounts {
        fn on_connecting(&self) {
            self.connecting.fetch_add(1, Ordering::SeqCst);
        }
        fn on_connect(&self) {
            self.connect.fetch_add(1, Ordering::SeqCst);
        }
        fn on_disconnect(&self) {
            self.disconnect.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        updater: OtaUpdater,
        hooks: Arc<HookCounts>,
        log: Arc<RecordingLog>,
        progress: Arc<RecordingProgress>,
    }

    fn harness(watch: Option<Arc<MockPeripheral>>) -> Harness {
        let hooks = Arc::new(HookCounts::default());
        let log = Arc::new(RecordingLog::default());
        let progress = Arc::new(RecordingProgress::default());
        let link = LinkManager::new(Arc::new(MockCentral::new(watch)))
            .with_observer(hooks.clone())
            .with_logger(log.clone());
        let uploader = FirmwareUploader::new()
            .with_logger(log.clone())
            .with_progress(progress.clone());
        Harness {
            updater: OtaUpdater::new(link, uploader),
            hooks,
            log,
            progress,
        }
    }

    fn image(chunks: usize) -> FirmwareImage {
        FirmwareImage::new((0..chunks).map(|i| vec![(i % 256) as u8; 16]).collect())
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_empty_image_completes_immediately() {
        let watch = MockPeripheral::watch("SBWatch");
        let h = harness(Some(watch.clone()));

        let session = h.updater.run(&FirmwareImage::default()).await.unwrap();

        assert_eq!(session.state, SessionState::Completed);
        assert!(watch.written().is_empty());
        assert!(watch.reads_after_writes().is_empty());
        assert!(h.log.infos().iter().any(|m| m.contains("empty")));
    }

    #[tokio::test]
    async fn test_150_chunks_complete() {
        let watch = MockPeripheral::watch("SBWatch");
        let h = harness(Some(watch.clone()));

        let session = h.updater.run(&image(150)).await.unwrap();
        settle().await;

        assert_eq!(session.state, SessionState::Completed);
        assert!(session.result().is_ok());
        assert_eq!(watch.written().len(), 150);
        assert_eq!(watch.reads_after_writes(), vec![1, 65, 129]);

        let updates = h.progress.updates();
        assert_eq!(session.progress_step, 1);
        assert_eq!(updates.len(), 150);
        assert_eq!(
            updates.iter().take(3).map(|p| (p.index, p.percent)).collect::<Vec<_>>(),
            vec![(0, 0), (1, 1), (2, 2)]
        );
        assert_eq!(h.progress.completions(), vec!["SBWatch".to_string()]);
        assert!(h.log.infos().iter().any(|m| m == "OTA update done for SBWatch."));
        assert_eq!(h.hooks.get(), (1, 1, 1));
        assert_eq!(
            h.updater.link().state(),
            LinkState::Disconnected(Some(DisconnectCause::UserOrRemoteInitiated))
        );
    }

    #[tokio::test]
    async fn test_disconnect_after_chunk_63_aborts_at_64_writes() {
        let watch = MockPeripheral::watch("SBWatch").dropping_link_after(64);
        let h = harness(Some(watch.clone()));

        let session = h.updater.run(&image(200)).await.unwrap();
        settle().await;

        assert_eq!(watch.written().len(), 64);
        assert_eq!(session.writes, 64);
        assert_eq!(session.next_index, 64);
        assert_eq!(session.state, SessionState::Aborted(AbortReason::Disconnected));
        assert_eq!(session.result(), Err(OtaError::UnexpectedDisconnect));
        assert!(h.progress.completions().is_empty());
        assert_eq!(h.hooks.get(), (1, 1, 1));
        // Link was already gone, the updater must not disconnect again
        assert_eq!(watch.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn test_service_not_found_after_link() {
        let watch = MockPeripheral::watch("SBWatch").without_ota_service();
        let h = harness(Some(watch));

        let err = h.updater.run(&image(10)).await.unwrap_err();
        settle().await;

        assert_eq!(err, OtaError::ServiceNotFound);
        assert_eq!(h.hooks.get(), (1, 0, 1));
        assert_eq!(h.log.errors(), vec![OtaError::ServiceNotFound.to_string()]);
    }

    #[tokio::test]
    async fn test_reconnect_after_abort_gets_fresh_session() {
        let watch = MockPeripheral::watch("SBWatch").dropping_link_after(10);
        let h = harness(Some(watch.clone()));

        let aborted = h.updater.run(&image(100)).await.unwrap();
        assert!(!aborted.is_completed());
        assert_eq!(aborted.next_index, 10);

        let retried = h.updater.run(&image(100)).await.unwrap();
        settle().await;

        assert!(retried.is_completed());
        assert_eq!(retried.writes, 100);
        assert_eq!(watch.written().len(), 100);
        assert_eq!(h.hooks.get(), (2, 2, 2));
    }

    #[tokio::test]
    async fn test_channel_observer_sees_lifecycle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watch = MockPeripheral::watch("SBWatch");
        let link = LinkManager::new(Arc::new(MockCentral::new(Some(watch))))
            .with_observer(Arc::new(tx));
        let updater = OtaUpdater::new(link, FirmwareUploader::new());

        updater.run(&image(3)).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![LinkEvent::Connecting, LinkEvent::Connected, LinkEvent::Disconnected]
        );
    }
}
