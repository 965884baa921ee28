// Lifecycle and progress plumbing shared by the link manager and the
// transfer engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

// ============================================================================
// Cancellation
// ============================================================================

/// One-way flag raised by the link manager when the link drops.
/// The transfer engine polls it between chunks.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Link lifecycle
// ============================================================================

/// Hooks fired by the link manager. Each fires at most once per
/// connection attempt; `on_connecting` is always followed by exactly one
/// of the other two.
pub trait LinkObserver: Send + Sync {
    fn on_connecting(&self) {}
    fn on_connect(&self) {}
    fn on_disconnect(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LinkObserver for NoopObserver {}

/// Channel form of the lifecycle hooks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Connecting,
    Connected,
    Disconnected,
}

impl LinkObserver for UnboundedSender<LinkEvent> {
    fn on_connecting(&self) {
        let _ = self.send(LinkEvent::Connecting);
    }

    fn on_connect(&self) {
        let _ = self.send(LinkEvent::Connected);
    }

    fn on_disconnect(&self) {
        let _ = self.send(LinkEvent::Disconnected);
    }
}

// ============================================================================
// Transfer progress
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    /// Index of the chunk just written
    pub index: usize,
    pub total_chunks: usize,
    /// `index / progress_step`; may exceed 100 on the last few chunks
    pub percent: usize,
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, _progress: Progress) {}

    /// Terminal indicator, only after every chunk was written.
    fn on_complete(&self, _device_name: &str) {}
}

impl ProgressObserver for NoopObserver {}
