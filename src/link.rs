// Link manager
//
// Owns the connection state machine for the watch: pick a peripheral,
// connect, resolve the OTA service and data characteristic, and hand the
// resulting Endpoint to the transfer engine. A watchdog task per session
// turns an unsolicited link loss into teardown plus a raised cancel signal.

use crate::ble_common::{OTA_CHARACTERISTIC_UUID, OTA_SERVICE_UUID};
use crate::error::{OtaError, Result};
use crate::events::{CancelSignal, LinkObserver, NoopObserver};
use crate::logging::{LogSink, NoopLog};
use crate::settings::Timeouts;
use crate::transport::{Central, Peripheral, SelectionFilter};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectCause {
    /// A connection attempt failed before reaching `Ready`
    Failed,
    UserOrRemoteInitiated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// `None` before the first attempt
    Disconnected(Option<DisconnectCause>),
    Discovering,
    Connecting,
    ResolvingService,
    ResolvingCharacteristic,
    Ready,
}

/// The OTA data characteristic of a connected peripheral.
///
/// Clones share a liveness flag that the link manager clears on teardown;
/// any write or read after that fails with `UnexpectedDisconnect` without
/// reaching the radio.
#[derive(Clone)]
pub struct Endpoint {
    peripheral: Arc<dyn Peripheral>,
    service: Uuid,
    characteristic: Uuid,
    io_timeout: Option<Duration>,
    live: Arc<AtomicBool>,
}

impl Endpoint {
    fn new(
        peripheral: Arc<dyn Peripheral>,
        service: Uuid,
        characteristic: Uuid,
        io_timeout: Option<Duration>,
    ) -> Self {
        Self {
            peripheral,
            service,
            characteristic,
            io_timeout,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn device_name(&self) -> String {
        self.peripheral.name()
    }

    fn invalidate(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(OtaError::UnexpectedDisconnect)
        }
    }

    /// Write one chunk; returns once the peripheral acknowledged it.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.ensure_live()?;
        with_timeout(
            self.io_timeout,
            "Chunk write",
            self.peripheral.write(self.service, self.characteristic, data),
        )
        .await?
        .map_err(OtaError::TransportError)
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        self.ensure_live()?;
        with_timeout(
            self.io_timeout,
            "Pacing read",
            self.peripheral.read(self.service, self.characteristic),
        )
        .await?
        .map_err(OtaError::TransportError)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("peripheral", &self.peripheral.id())
            .field("characteristic", &self.characteristic)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Result of a successful `discover_and_connect`.
#[derive(Debug, Clone)]
pub struct Connection {
    pub peripheral_id: String,
    pub name: String,
    pub endpoint: Endpoint,
    /// Raised when this session's link goes away
    pub cancel: CancelSignal,
}

#[derive(Default)]
struct HookLatch {
    connecting: bool,
    disconnected: bool,
}

struct LinkInner {
    state: LinkState,
    /// Bumped per attempt so stale watchdogs can tell they are stale
    attempt: u64,
    peripheral: Option<Arc<dyn Peripheral>>,
    endpoint: Option<Endpoint>,
    cancel: CancelSignal,
    hooks: HookLatch,
    /// Set when `disconnect()` ended the attempt before it reached `Ready`
    user_cancelled: bool,
}

fn lock(inner: &Mutex<LinkInner>) -> MutexGuard<'_, LinkInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `fut` under an optional deadline.
pub(crate) async fn with_timeout<F: Future>(
    limit: Option<Duration>,
    op: &'static str,
    fut: F,
) -> Result<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| OtaError::TimedOut(op)),
        None => Ok(fut.await),
    }
}

/// Move the session of `attempt` to `Disconnected`. Returns the released
/// peripheral if this call performed the teardown, `None` if the attempt
/// was already torn down or superseded.
fn teardown(
    inner: &Mutex<LinkInner>,
    observer: &dyn LinkObserver,
    logger: &dyn LogSink,
    attempt: u64,
    cause: DisconnectCause,
) -> Option<Arc<dyn Peripheral>> {
    let (peripheral, fire_hook) = {
        let mut inner = lock(inner);
        if inner.attempt != attempt || matches!(inner.state, LinkState::Disconnected(_)) {
            return None;
        }
        inner.state = LinkState::Disconnected(Some(cause));
        if let Some(endpoint) = inner.endpoint.take() {
            endpoint.invalidate();
        }
        inner.cancel.raise();
        let fire_hook = inner.hooks.connecting && !inner.hooks.disconnected;
        if fire_hook {
            inner.hooks.disconnected = true;
        }
        (inner.peripheral.take(), fire_hook)
    };

    if peripheral.is_some() {
        logger.info("Peripheral disconnected.");
    }
    if fire_hook {
        observer.on_disconnect();
    }
    peripheral
}

// ============================================================================
// Link manager
// ============================================================================

pub struct LinkManager {
    central: Arc<dyn Central>,
    filter: SelectionFilter,
    timeouts: Timeouts,
    observer: Arc<dyn LinkObserver>,
    logger: Arc<dyn LogSink>,
    inner: Arc<Mutex<LinkInner>>,
}

impl LinkManager {
    pub fn new(central: Arc<dyn Central>) -> Self {
        Self {
            central,
            filter: SelectionFilter::default(),
            timeouts: Timeouts::default(),
            observer: Arc::new(NoopObserver),
            logger: Arc::new(NoopLog),
            inner: Arc::new(Mutex::new(LinkInner {
                state: LinkState::Disconnected(None),
                attempt: 0,
                peripheral: None,
                endpoint: None,
                cancel: CancelSignal::new(),
                hooks: HookLatch::default(),
                user_cancelled: false,
            })),
        }
    }

    pub fn with_filter(mut self, filter: SelectionFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LinkObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn LogSink>) -> Self {
        self.logger = logger;
        self
    }

    pub fn state(&self) -> LinkState {
        lock(&self.inner).state
    }

    /// The Endpoint of the current session, if it reached `Ready`.
    pub fn endpoint(&self) -> Option<Endpoint> {
        lock(&self.inner).endpoint.clone()
    }

    /// Select, connect and resolve the OTA endpoint.
    ///
    /// On failure the attempt is torn down, the error is logged, and
    /// `on_disconnect` fires if `on_connecting` did. Rejected with `Busy`
    /// while another attempt or session is live.
    pub async fn discover_and_connect(&self) -> Result<Connection> {
        let (attempt, cancel) = {
            let mut inner = lock(&self.inner);
            if !matches!(inner.state, LinkState::Disconnected(_)) {
                return Err(OtaError::Busy);
            }
            inner.attempt += 1;
            inner.state = LinkState::Discovering;
            inner.peripheral = None;
            inner.endpoint = None;
            inner.cancel = CancelSignal::new();
            inner.hooks = HookLatch::default();
            inner.user_cancelled = false;
            (inner.attempt, inner.cancel.clone())
        };

        match self.establish(attempt, &cancel).await {
            Ok(connection) => Ok(connection),
            Err(err) => {
                tlog!("[link] Attempt {attempt} failed: {err}");
                if err == OtaError::Cancelled {
                    self.logger.info(&format!("{err}."));
                } else {
                    self.logger.error(&err.to_string());
                }
                let released = teardown(
                    &self.inner,
                    self.observer.as_ref(),
                    self.logger.as_ref(),
                    attempt,
                    DisconnectCause::Failed,
                );
                if let Some(peripheral) = released {
                    let _ = peripheral.disconnect().await;
                }
                Err(err)
            }
        }
    }

    /// User-initiated teardown. No-op when already disconnected. An attempt
    /// still in progress ends with `Cancelled`.
    pub async fn disconnect(&self) {
        let attempt = {
            let mut inner = lock(&self.inner);
            if !matches!(inner.state, LinkState::Disconnected(_) | LinkState::Ready) {
                inner.user_cancelled = true;
            }
            inner.attempt
        };
        let released = teardown(
            &self.inner,
            self.observer.as_ref(),
            self.logger.as_ref(),
            attempt,
            DisconnectCause::UserOrRemoteInitiated,
        );
        if let Some(peripheral) = released {
            tlog!("[link] Disconnecting from {}", peripheral.id());
            // Best-effort, the peripheral may already be gone
            let _ = peripheral.disconnect().await;
        }
    }

    async fn establish(&self, attempt: u64, cancel: &CancelSignal) -> Result<Connection> {
        let peripheral = self
            .central
            .select_peripheral(&self.filter)
            .await
            .map_err(OtaError::Adapter)?
            .ok_or(OtaError::SelectionCancelled)?;
        let name = peripheral.name();

        {
            let mut inner = self.current(attempt)?;
            inner.peripheral = Some(peripheral.clone());
            inner.state = LinkState::Connecting;
            inner.hooks.connecting = true;
        }
        self.observer.on_connecting();
        self.logger.info(&format!("Connecting to {name}"));
        tlog!("[link] Connecting to {} ({})", name, peripheral.id());

        with_timeout(self.timeouts.connect, "Connect", peripheral.connect())
            .await?
            .map_err(OtaError::LinkFailed)?;
        if let Err(err) = self.advance(attempt, LinkState::ResolvingService) {
            // Torn down while connect() was pending: the link that just came
            // up belongs to no session.
            tlog!("[link] Dropping link to {} established after teardown", peripheral.id());
            let _ = peripheral.disconnect().await;
            return Err(err);
        }
        self.spawn_watchdog(attempt, peripheral.clone());
        self.logger.info("Link established.");

        let services = with_timeout(
            self.timeouts.discovery,
            "Service discovery",
            peripheral.discover_services(),
        )
        .await?
        .map_err(OtaError::LinkFailed)?;
        if !services.contains(&OTA_SERVICE_UUID) {
            return Err(OtaError::ServiceNotFound);
        }
        self.advance(attempt, LinkState::ResolvingCharacteristic)?;
        self.logger.info("OTA service found.");

        if !peripheral
            .has_characteristic(OTA_SERVICE_UUID, OTA_CHARACTERISTIC_UUID)
            .await
        {
            return Err(OtaError::CharacteristicNotFound);
        }
        let endpoint = Endpoint::new(
            peripheral.clone(),
            OTA_SERVICE_UUID,
            OTA_CHARACTERISTIC_UUID,
            self.timeouts.io,
        );

        {
            let mut inner = self.current(attempt)?;
            inner.state = LinkState::Ready;
            inner.endpoint = Some(endpoint.clone());
        }
        self.logger.info("Ready for the update.");
        self.observer.on_connect();

        Ok(Connection {
            peripheral_id: peripheral.id(),
            name,
            endpoint,
            cancel: cancel.clone(),
        })
    }

    /// Lock the state, failing if `attempt` was torn down meanwhile.
    fn current(&self, attempt: u64) -> Result<MutexGuard<'_, LinkInner>> {
        let inner = lock(&self.inner);
        if inner.attempt != attempt || matches!(inner.state, LinkState::Disconnected(_)) {
            if inner.attempt == attempt && inner.user_cancelled {
                return Err(OtaError::Cancelled);
            }
            return Err(OtaError::UnexpectedDisconnect);
        }
        Ok(inner)
    }

    fn advance(&self, attempt: u64, state: LinkState) -> Result<()> {
        self.current(attempt)?.state = state;
        Ok(())
    }

    /// Watch for link loss for the lifetime of `attempt`.
    fn spawn_watchdog(&self, attempt: u64, peripheral: Arc<dyn Peripheral>) {
        let inner = self.inner.clone();
        let observer = self.observer.clone();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            peripheral.wait_disconnected().await;
            let released = teardown(
                &inner,
                observer.as_ref(),
                logger.as_ref(),
                attempt,
                DisconnectCause::UserOrRemoteInitiated,
            );
            if released.is_some() {
                tlog!(
                    "[link] Watchdog: peripheral {} disconnected unexpectedly",
                    peripheral.id()
                );
            }
        });
    }
}
