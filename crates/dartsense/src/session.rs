//! Background detection session with a thread-safe consumer surface.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use dartsense_core::{RigConfig, Throw};
use dartsense_vision::FrameSource;
use log::{info, warn};

use crate::coordinator::Coordinator;
use crate::error::SessionError;
use crate::shutdown::ShutdownToken;

/// Flags the detection loop publishes for the game-state consumer.
#[derive(Debug, Default)]
pub struct SessionStatus {
    ready: AtomicBool,
    takeout: AtomicBool,
    throws: AtomicU64,
}

impl SessionStatus {
    /// Ready for the next dart: warmed up and not inside a takeout.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.takeout_in_progress()
    }

    pub fn takeout_in_progress(&self) -> bool {
        self.takeout.load(Ordering::SeqCst)
    }

    /// Throws emitted since the session started.
    pub fn throws_emitted(&self) -> u64 {
        self.throws.load(Ordering::SeqCst)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub(crate) fn set_takeout(&self, active: bool) {
        self.takeout.store(active, Ordering::SeqCst);
    }

    pub(crate) fn record_throw(&self) {
        self.throws.fetch_add(1, Ordering::SeqCst);
    }
}

/// Owns the detection loop thread.
///
/// Throws are queued in emission order; stopping (or dropping) the session
/// cancels the loop at its next cycle boundary and joins the thread.
#[derive(Debug)]
pub struct DartSession {
    throws: Receiver<Throw>,
    status: Arc<SessionStatus>,
    token: ShutdownToken,
    handle: Option<JoinHandle<u64>>,
}

impl DartSession {
    /// Prime every camera and start the loop on a background thread.
    ///
    /// `sources` are matched to `config.cameras` by position.
    pub fn start(
        config: &RigConfig,
        sources: Vec<Box<dyn FrameSource>>,
    ) -> Result<Self, SessionError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let status = Arc::new(SessionStatus::default());
        let mut coordinator = Coordinator::new(config, sources)?
            .with_status(Arc::clone(&status))
            .with_throw_sink(tx);
        coordinator.prime()?;

        let token = ShutdownToken::new();
        let loop_token = token.clone();
        let handle = std::thread::Builder::new()
            .name("dartsense-loop".to_string())
            .spawn(move || {
                let throws = coordinator.run(&loop_token);
                info!("detection loop finished after {throws} throw(s)");
                throws
            })
            .map_err(SessionError::Spawn)?;

        info!(
            "detection session started with {} camera(s)",
            config.cameras.len()
        );
        Ok(Self {
            throws: rx,
            status,
            token,
            handle: Some(handle),
        })
    }

    /// Next queued throw, if any. Never blocks.
    pub fn next_throw(&self) -> Option<Throw> {
        self.throws.try_recv().ok()
    }

    /// Wait up to `timeout` for the next throw.
    pub fn wait_throw(&self, timeout: Duration) -> Option<Throw> {
        match self.throws.recv_timeout(timeout) {
            Ok(t) => Some(t),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    pub fn takeout_in_progress(&self) -> bool {
        self.status.takeout_in_progress()
    }

    pub fn status(&self) -> &Arc<SessionStatus> {
        &self.status
    }

    /// `false` once the loop thread has returned.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the loop and wait for it. Returns the number of throws the
    /// loop emitted, or `None` if it was already stopped.
    pub fn stop(&mut self) -> Option<u64> {
        self.token.cancel();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!("detection loop panicked");
                None
            }
        }
    }
}

impl Drop for DartSession {
    fn drop(&mut self) {
        self.stop();
    }
}
