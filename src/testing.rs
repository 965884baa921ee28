// In-memory radio and recording sinks for unit tests.

use crate::ble_common::{MAIN_SERVICE_UUID, OTA_CHARACTERISTIC_UUID, OTA_SERVICE_UUID};
use crate::events::{Progress, ProgressObserver};
use crate::logging::LogSink;
use crate::transport::{Advertisement, Central, Peripheral, SelectionFilter};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

// ============================================================================
// Radio
// ============================================================================

pub struct MockCentral {
    peripheral: Option<Arc<MockPeripheral>>,
}

impl MockCentral {
    pub fn new(peripheral: Option<Arc<MockPeripheral>>) -> Self {
        Self { peripheral }
    }
}

#[async_trait]
impl Central for MockCentral {
    async fn select_peripheral(
        &self,
        filter: &SelectionFilter,
    ) -> Result<Option<Arc<dyn Peripheral>>, String> {
        Ok(self
            .peripheral
            .as_ref()
            .filter(|p| filter.accepts(&p.advertisement))
            .map(|p| p.clone() as Arc<dyn Peripheral>))
    }
}

#[derive(Default)]
struct Activity {
    written: Vec<Vec<u8>>,
    write_attempts: usize,
    /// Number of completed writes at the time of each read
    reads_after_writes: Vec<usize>,
}

pub struct MockPeripheral {
    advertisement: Advertisement,
    services: Vec<Uuid>,
    has_ota_characteristic: bool,
    connect_error: Option<String>,
    connect_delay: Option<Duration>,
    write_delay: Option<Duration>,
    fail_write_at: Option<usize>,
    fail_reads: bool,
    /// Drop the link right after this many writes (once)
    drop_after_writes: Mutex<Option<usize>>,
    activity: Mutex<Activity>,
    disconnects: AtomicUsize,
    lost: watch::Sender<bool>,
}

impl MockPeripheral {
    /// A healthy watch exposing the OTA service and characteristic.
    pub fn watch(name: &str) -> Arc<Self> {
        Arc::new(Self::healthy(name))
    }

    fn healthy(name: &str) -> Self {
        let (lost, _) = watch::channel(false);
        Self {
            advertisement: Advertisement {
                id: format!("mock:{name}"),
                name: Some(name.to_string()),
                rssi: Some(-50),
                services: vec![MAIN_SERVICE_UUID],
            },
            services: vec![MAIN_SERVICE_UUID, OTA_SERVICE_UUID],
            has_ota_characteristic: true,
            connect_error: None,
            connect_delay: None,
            write_delay: None,
            fail_write_at: None,
            fail_reads: false,
            drop_after_writes: Mutex::new(None),
            activity: Mutex::new(Activity::default()),
            disconnects: AtomicUsize::new(0),
            lost,
        }
    }

    fn rebuild(self: Arc<Self>, edit: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut inner = Arc::try_unwrap(self)
            .unwrap_or_else(|_| panic!("configure the mock before sharing it"));
        edit(&mut inner);
        Arc::new(inner)
    }

    pub fn without_ota_service(self: Arc<Self>) -> Arc<Self> {
        self.rebuild(|p| p.services = vec![MAIN_SERVICE_UUID])
    }

    pub fn without_ota_characteristic(self: Arc<Self>) -> Arc<Self> {
        self.rebuild(|p| p.has_ota_characteristic = false)
    }

    pub fn failing_connect(self: Arc<Self>, cause: &str) -> Arc<Self> {
        let cause = cause.to_string();
        self.rebuild(|p| p.connect_error = Some(cause))
    }

    pub fn with_connect_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        self.rebuild(|p| p.connect_delay = Some(delay))
    }

    /// Hold every write this long before acknowledging it.
    pub fn with_write_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        self.rebuild(|p| p.write_delay = Some(delay))
    }

    /// Fail the write attempt with this 0-based index.
    pub fn failing_write_at(self: Arc<Self>, index: usize) -> Arc<Self> {
        self.rebuild(|p| p.fail_write_at = Some(index))
    }

    pub fn failing_reads(self: Arc<Self>) -> Arc<Self> {
        self.rebuild(|p| p.fail_reads = true)
    }

    pub fn dropping_link_after(self: Arc<Self>, writes: usize) -> Arc<Self> {
        self.rebuild(|p| p.drop_after_writes = Mutex::new(Some(writes)))
    }

    /// Simulate the peripheral going out of range.
    pub fn sever(&self) {
        self.lost.send_replace(true);
    }

    pub fn is_severed(&self) -> bool {
        *self.lost.borrow()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.activity.lock().unwrap().written.clone()
    }

    pub fn write_attempts(&self) -> usize {
        self.activity.lock().unwrap().write_attempts
    }

    pub fn reads_after_writes(&self) -> Vec<usize> {
        self.activity.lock().unwrap().reads_after_writes.clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    fn id(&self) -> String {
        self.advertisement.id.clone()
    }

    fn name(&self) -> String {
        self.advertisement
            .name
            .clone()
            .unwrap_or_else(|| self.id())
    }

    async fn connect(&self) -> Result<(), String> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(cause) = &self.connect_error {
            return Err(cause.clone());
        }
        *self.activity.lock().unwrap() = Activity::default();
        self.lost.send_replace(false);
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>, String> {
        Ok(self.services.clone())
    }

    async fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.has_ota_characteristic
            && service == OTA_SERVICE_UUID
            && characteristic == OTA_CHARACTERISTIC_UUID
    }

    async fn write(&self, _service: Uuid, _characteristic: Uuid, data: &[u8]) -> Result<(), String> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        let drop_now = {
            let mut activity = self.activity.lock().unwrap();
            let attempt = activity.write_attempts;
            activity.write_attempts += 1;
            if self.fail_write_at == Some(attempt) {
                return Err("GATT write rejected".to_string());
            }
            activity.written.push(data.to_vec());

            let mut drop_after = self.drop_after_writes.lock().unwrap();
            if *drop_after == Some(activity.written.len()) {
                drop_after.take();
                true
            } else {
                false
            }
        };

        if drop_now {
            self.sever();
            // Let the link manager's watchdog observe the loss before the
            // caller moves on, as a real radio event would.
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    async fn read(&self, _service: Uuid, _characteristic: Uuid) -> Result<Vec<u8>, String> {
        if self.fail_reads {
            return Err("GATT read failed".to_string());
        }
        let mut activity = self.activity.lock().unwrap();
        let writes = activity.written.len();
        activity.reads_after_writes.push(writes);
        Ok(vec![0x00])
    }

    async fn disconnect(&self) -> Result<(), String> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.sever();
        Ok(())
    }

    async fn wait_disconnected(&self) {
        let mut rx = self.lost.subscribe();
        let _ = rx.wait_for(|lost| *lost).await;
    }
}

// ============================================================================
// Sinks
// ============================================================================

#[derive(Default)]
pub struct RecordingLog {
    infos: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingLog {
    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl LogSink for RecordingLog {
    fn info(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<Progress>>,
    completions: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn updates(&self) -> Vec<Progress> {
        self.updates.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<String> {
        self.completions.lock().unwrap().clone()
    }
}

impl ProgressObserver for RecordingProgress {
    fn on_progress(&self, progress: Progress) {
        self.updates.lock().unwrap().push(progress);
    }

    fn on_complete(&self, device_name: &str) {
        self.completions.lock().unwrap().push(device_name.to_string());
    }
}
