//! Cross-camera control loop.
//!
//! One cycle is a fan-out of one capture+classify task per camera on a
//! bounded worker pool, followed by a barrier. Every cross-camera decision
//! (takeout, motion priority, stability, resolution) is made after the
//! barrier, while no camera task is running, so detectors need no locks.

use std::sync::Arc;

use crossbeam_channel::Sender;
use dartsense_core::{CycleSnapshot, DetectionParams, RigConfig, Throw, TriangulationEngine};
use dartsense_vision::{
    CameraReport, ContourResolver, FrameSource, MotionDetector, MotionOutcome, ResetReason,
};
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::SessionError;
use crate::session::SessionStatus;
use crate::shutdown::ShutdownToken;

/// What one control cycle did.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    Cancelled,
    /// Nothing to act on.
    Idle,
    /// Some camera saw motion; `first_camera` leads the next cycle.
    Motion {
        first_camera: usize,
    },
    /// A takeout was detected and every camera has been reset.
    Takeout {
        trigger_camera: usize,
    },
    Resolved(Throw),
    /// Resolution ran but produced no throw.
    NoDetection {
        resolved: usize,
    },
    /// Every frame source has ended.
    Exhausted,
}

/// Drives all motion detectors and turns stable motion into throws.
pub struct Coordinator {
    cameras: Vec<MotionDetector>,
    resolver: ContourResolver,
    engine: TriangulationEngine,
    params: DetectionParams,
    pool: ThreadPool,
    status: Arc<SessionStatus>,
    throws: Option<Sender<Throw>>,
    priority: usize,
    cycle: u64,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("cameras", &self.cameras)
            .field("priority", &self.priority)
            .field("cycle", &self.cycle)
            .finish()
    }
}

/// Run `task` on every detector in the pool, starting from `first`.
///
/// Results come back in rotated camera order once all tasks finished.
fn fan_out<R, F>(
    pool: &ThreadPool,
    cameras: &mut [MotionDetector],
    first: usize,
    task: F,
) -> Vec<R>
where
    R: Send,
    F: Fn(&mut MotionDetector) -> R + Send + Sync,
{
    let (head, tail) = cameras.split_at_mut(first.min(cameras.len()));
    pool.install(|| {
        tail.par_iter_mut()
            .chain(head.par_iter_mut())
            .map(&task)
            .collect()
    })
}

impl Coordinator {
    /// Pair every calibrated camera with its frame source, in camera order.
    pub fn new(
        config: &RigConfig,
        sources: Vec<Box<dyn FrameSource>>,
    ) -> Result<Self, SessionError> {
        if sources.is_empty() {
            return Err(SessionError::ZeroCameras);
        }
        if sources.len() != config.cameras.len() {
            return Err(SessionError::CameraCountMismatch {
                expected: config.cameras.len(),
                actual: sources.len(),
            });
        }

        let cameras: Vec<MotionDetector> = sources
            .into_iter()
            .zip(config.cameras.iter())
            .map(|(source, profile)| {
                if source.camera_id() != profile.camera_id {
                    warn!(
                        "source for camera {} reports id {}",
                        profile.camera_id,
                        source.camera_id()
                    );
                }
                MotionDetector::new(source, profile.clone(), config.detection.clone())
            })
            .collect();

        let threads = config
            .detection
            .worker_threads
            .unwrap_or(cameras.len())
            .max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("dartsense-cam-{i}"))
            .build()?;

        Ok(Self {
            resolver: ContourResolver::new(&config.detection),
            engine: TriangulationEngine::new(
                config.board,
                config.triangulation.clone(),
                &config.cameras,
            ),
            params: config.detection.clone(),
            pool,
            status: Arc::new(SessionStatus::default()),
            throws: None,
            priority: 0,
            cycle: 0,
            cameras,
        })
    }

    /// Share `status` with whoever gates throws on it.
    pub fn with_status(mut self, status: Arc<SessionStatus>) -> Self {
        self.status = status;
        self
    }

    /// Send every emitted throw to `sink`.
    pub fn with_throw_sink(mut self, sink: Sender<Throw>) -> Self {
        self.throws = Some(sink);
        self
    }

    pub fn cameras(&self) -> &[MotionDetector] {
        &self.cameras
    }

    pub fn engine(&self) -> &TriangulationEngine {
        &self.engine
    }

    pub fn status(&self) -> &Arc<SessionStatus> {
        &self.status
    }

    /// Camera polled first in the next cycle.
    pub fn priority(&self) -> usize {
        self.priority
    }

    /// Capture the initial reference frame of every camera.
    ///
    /// A camera that cannot deliver a frame here is a fatal startup error.
    pub fn prime(&mut self) -> Result<(), SessionError> {
        let results = fan_out(&self.pool, &mut self.cameras, 0, |d| {
            (d.camera_id(), d.prime())
        });
        for (camera, res) in results {
            res.map_err(|source| SessionError::Prime { camera, source })?;
        }
        Ok(())
    }

    /// Let the scene settle for the warm-up window, then re-capture the
    /// references. Returns `false` if cancelled.
    pub fn stabilize(&mut self, token: &ShutdownToken) -> bool {
        self.status.set_ready(false);
        if !token.sleep(self.params.warmup) {
            return false;
        }
        let results = fan_out(&self.pool, &mut self.cameras, 0, |d| {
            (d.camera_id(), d.prime())
        });
        for (camera, res) in results {
            if let Err(e) = res {
                warn!("camera {camera}: warm-up capture failed: {e}");
            }
        }
        info!("background stabilised, ready for darts");
        self.status.set_ready(true);
        true
    }

    /// Run one control cycle.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, token), fields(cycle = self.cycle + 1))
    )]
    pub fn poll_cycle(&mut self, token: &ShutdownToken) -> CycleOutcome {
        if token.is_cancelled() || !token.sleep(self.params.poll_interval) {
            return CycleOutcome::Cancelled;
        }
        self.cycle += 1;

        // run_takeout never polls, so this is false unless a caller drives
        // poll_cycle while the takeout flag is held
        let takeout_in_progress = self.status.takeout_in_progress();
        let reports: Vec<CameraReport> = fan_out(&self.pool, &mut self.cameras, self.priority, |d| {
            d.poll(takeout_in_progress)
        });

        if self.cameras.iter().all(|d| d.is_exhausted()) {
            return CycleOutcome::Exhausted;
        }

        if let Some(trigger) = reports.iter().find(|r| r.is_takeout()) {
            let trigger_camera = trigger.camera_id;
            self.run_takeout(trigger_camera, token);
            return CycleOutcome::Takeout { trigger_camera };
        }

        // reports are in rotated order, so the first hit is the earliest camera
        if let Some(first) = reports.iter().find(|r| r.saw_motion()) {
            let first_camera = first.camera_id;
            self.priority = first_camera;
            debug!("motion first seen by camera {first_camera}");
            token.sleep(self.params.post_motion_delay);
            return CycleOutcome::Motion { first_camera };
        }

        if self.is_stable() {
            return self.resolve_dart(token);
        }

        let refresh = self.params.reference_refresh_cycles;
        if refresh > 0 && self.cycle % refresh as u64 == 0 {
            debug!("periodic reference refresh");
            for d in &mut self.cameras {
                d.refresh_references();
            }
        }

        if reports
            .iter()
            .any(|r| r.outcome == MotionOutcome::CaptureFailed)
        {
            debug!("cycle {} had capture failures", self.cycle);
        }
        CycleOutcome::Idle
    }

    /// All cameras still for `K` frames and at least `N - 1` holding motion
    /// history.
    pub fn is_stable(&self) -> bool {
        let n = self.cameras.len();
        let k = self.params.still_frames_required;
        let all_still = self.cameras.iter().all(|d| d.still_frames() >= k);
        let with_history = self.cameras.iter().filter(|d| d.has_history()).count();
        all_still && with_history >= n.saturating_sub(1).max(1)
    }

    fn resolve_dart(&mut self, token: &ShutdownToken) -> CycleOutcome {
        let resolver = &self.resolver;
        let tips = fan_out(&self.pool, &mut self.cameras, 0, |d| {
            (d.camera_id(), d.resolve_contour(resolver))
        });

        let mut readings = vec![None; self.cameras.len()];
        for (camera, tip) in tips {
            if let Some(slot) = readings.get_mut(camera) {
                *slot = tip;
            }
        }
        let snapshot = CycleSnapshot::new(readings);
        let resolved = snapshot.resolved_count();

        let dart = if resolved >= 2 {
            self.engine.resolve(&snapshot)
        } else {
            None
        };

        let Some(dart) = dart else {
            info!("no detection: {resolved} camera(s) resolved a tip");
            self.reset_all(ResetReason::Unresolved);
            return CycleOutcome::NoDetection { resolved };
        };

        let throw = Throw::from_resolved(&dart);
        info!(
            "dart {}: {} at ({:.1}, {:.1}) mm from {} line(s)",
            dart.dart_in_turn,
            dart.score,
            dart.impact.position.x,
            dart.impact.position.y,
            dart.impact.lines
        );
        if let Some(sink) = &self.throws {
            if sink.send(throw.clone()).is_err() {
                debug!("throw consumer disconnected");
            }
        }
        self.status.record_throw();
        self.reset_all(ResetReason::DartResolved);
        token.sleep(self.params.post_throw_delay);
        CycleOutcome::Resolved(throw)
    }

    fn reset_all(&mut self, reason: ResetReason) {
        for d in &mut self.cameras {
            d.reset(reason);
        }
    }

    /// Hold every camera, then let each settle in turn on fresh references.
    fn run_takeout(&mut self, trigger_camera: usize, token: &ShutdownToken) {
        info!("takeout triggered by camera {trigger_camera}");
        self.status.set_takeout(true);
        for d in &mut self.cameras {
            d.begin_takeout();
        }
        self.engine.new_turn();

        let mut live = token.sleep(self.params.takeout_initial_delay);
        let samples = self.params.takeout_settle_samples();
        for d in &mut self.cameras {
            for _ in 0..samples {
                if !live {
                    break;
                }
                d.settle_sample();
                live = token.sleep(self.params.takeout_settle_interval);
            }
            d.finish_takeout();
            debug!("camera {} settled", d.camera_id());
        }
        if live {
            token.sleep(self.params.takeout_tail_delay);
        }

        self.priority = 0;
        self.status.set_takeout(false);
        info!("takeout complete");
    }

    /// Warm up, then cycle until cancelled or out of frames.
    ///
    /// Returns the number of throws emitted.
    pub fn run(&mut self, token: &ShutdownToken) -> u64 {
        if !self.stabilize(token) {
            return 0;
        }
        let mut throws = 0;
        loop {
            match self.poll_cycle(token) {
                CycleOutcome::Cancelled | CycleOutcome::Exhausted => break,
                CycleOutcome::Resolved(_) => throws += 1,
                _ => {}
            }
        }
        self.status.set_ready(false);
        throws
    }
}
