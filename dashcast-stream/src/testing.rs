//! In-memory capture backend for unit tests

use async_trait::async_trait;
use dashcast_core::config::ScreenConfig;
use dashcast_core::RoomId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureBackend, CaptureProvider, TargetId};
use crate::error::CaptureError;

#[derive(Default)]
pub(crate) struct FakeProvider {
    opened: AtomicUsize,
    closed_targets: AtomicUsize,
    captures: AtomicUsize,
    capture_failures: AtomicUsize,
    rooms: Mutex<Vec<RoomId>>,
    browser_gone: CancellationToken,
    shut_down: CancellationToken,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_captures(&self, times: usize) {
        self.capture_failures.store(times, Ordering::SeqCst);
    }

    pub(crate) fn opened_targets(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn closed_targets(&self) -> usize {
        self.closed_targets.load(Ordering::SeqCst)
    }

    /// Every start_capture call, failed ones included
    pub(crate) fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub(crate) fn captured_rooms(&self) -> Vec<RoomId> {
        self.rooms.lock().clone()
    }

    pub(crate) fn crash(&self) {
        self.browser_gone.cancel();
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.is_cancelled()
    }
}

#[async_trait]
impl CaptureProvider for FakeProvider {
    async fn open_target(&self, screen: &ScreenConfig) -> Result<TargetId, CaptureError> {
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(TargetId::new(format!("{}-{n}", screen.name)))
    }

    async fn start_capture(&self, _target: &TargetId, room: &RoomId, _zoom: f64) -> Result<(), CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .capture_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CaptureError::NoTarget("page crashed".to_string()));
        }
        self.rooms.lock().push(room.clone());
        Ok(())
    }

    async fn close_target(&self, _target: &TargetId) {
        self.closed_targets.fetch_add(1, Ordering::SeqCst);
    }

    async fn closed(&self) {
        self.browser_gone.cancelled().await;
    }

    async fn shutdown(&self) {
        self.shut_down.cancel();
    }
}

/// Hands out a fresh provider per launch, optionally failing the first launches
#[derive(Default)]
pub(crate) struct FakeBackend {
    launch_failures: AtomicUsize,
    launches: Mutex<Vec<Arc<FakeProvider>>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_launches(&self, times: usize) {
        self.launch_failures.store(times, Ordering::SeqCst);
    }

    pub(crate) fn providers(&self) -> Vec<Arc<FakeProvider>> {
        self.launches.lock().clone()
    }
}

#[async_trait]
impl CaptureBackend for FakeBackend {
    async fn launch(&self) -> Result<Arc<dyn CaptureProvider>, CaptureError> {
        let failing = self
            .launch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CaptureError::Browser("executable not found".to_string()));
        }
        let provider = Arc::new(FakeProvider::new());
        self.launches.lock().push(Arc::clone(&provider));
        Ok(provider)
    }
}
