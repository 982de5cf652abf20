//! Per-camera motion state machine.
//!
//! Each poll captures one frame and compares it against two references: a
//! static background and a movement reference that follows the last frame
//! with motion. The ROI foreground count drives the transitions:
//!
//! | count                               | outcome              |
//! |-------------------------------------|----------------------|
//! | `[min, max)`, no takeout            | motion observed      |
//! | `> max`                             | takeout candidate    |
//! | `0`                                 | still                |
//! | anything else                       | noise                |
//!
//! Two safety valves force a reset: armed for longer than
//! `max_movement_frames`, or `false_trigger_limit` motion observations
//! without a resolution.

use std::collections::VecDeque;

use dartsense_core::{CalibrationProfile, DetectionParams, PixelReading, Roi};
use image::GrayImage;
use log::{debug, info, warn};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::contour::ContourResolver;
use crate::error::CaptureError;
use crate::mask::{count_foreground, crop_roi, foreground_mask, MaskSettings};
use crate::source::FrameSource;

/// Tracking state of one camera.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MotionState {
    /// Nothing tracked.
    #[default]
    Idle,
    /// Motion seen; masks are accumulating in the history.
    Armed,
    /// Held by the coordinator during a takeout.
    Resetting,
}

/// What a single poll observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionOutcome {
    /// First frame captured; references initialised.
    Primed,
    MotionObserved {
        count: usize,
    },
    /// Foreground above the takeout threshold.
    TakeoutCandidate {
        count: usize,
    },
    Still,
    /// Foreground too small to be a dart.
    Noise {
        count: usize,
    },
    /// Motion-sized foreground ignored because a takeout is running.
    Suspended {
        count: usize,
    },
    CaptureFailed,
    EndOfStream,
}

/// Why a camera's tracking was reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetReason {
    FalseTriggerLimit,
    MovementTimeout,
    Takeout,
    DartResolved,
    Unresolved,
}

/// Result of one camera task, handed back across the cycle barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraReport {
    pub camera_id: usize,
    pub outcome: MotionOutcome,
    pub reset: Option<ResetReason>,
}

impl CameraReport {
    #[inline]
    pub fn saw_motion(&self) -> bool {
        matches!(self.outcome, MotionOutcome::MotionObserved { .. })
    }

    #[inline]
    pub fn is_takeout(&self) -> bool {
        matches!(self.outcome, MotionOutcome::TakeoutCandidate { .. })
    }
}

/// Motion tracker of one camera. Owns its frame source.
pub struct MotionDetector {
    source: Box<dyn FrameSource>,
    profile: CalibrationProfile,
    params: DetectionParams,
    state: MotionState,
    still_frames: u32,
    false_triggers: u32,
    movement_duration: u32,
    history: VecDeque<GrayImage>,
    static_ref: Option<GrayImage>,
    movement_ref: Option<GrayImage>,
    last_frame: Option<GrayImage>,
    exhausted: bool,
}

impl std::fmt::Debug for MotionDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionDetector")
            .field("camera_id", &self.profile.camera_id)
            .field("state", &self.state)
            .field("still_frames", &self.still_frames)
            .field("false_triggers", &self.false_triggers)
            .field("movement_duration", &self.movement_duration)
            .field("history", &self.history.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl MotionDetector {
    pub fn new(
        source: Box<dyn FrameSource>,
        profile: CalibrationProfile,
        params: DetectionParams,
    ) -> Self {
        Self {
            source,
            profile,
            params,
            state: MotionState::Idle,
            still_frames: 0,
            false_triggers: 0,
            movement_duration: 0,
            history: VecDeque::new(),
            static_ref: None,
            movement_ref: None,
            last_frame: None,
            exhausted: false,
        }
    }

    pub fn camera_id(&self) -> usize {
        self.profile.camera_id
    }

    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn still_frames(&self) -> u32 {
        self.still_frames
    }

    pub fn false_triggers(&self) -> u32 {
        self.false_triggers
    }

    pub fn movement_duration(&self) -> u32 {
        self.movement_duration
    }

    pub fn history(&self) -> &VecDeque<GrayImage> {
        &self.history
    }

    pub fn has_history(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn report(&self, outcome: MotionOutcome, reset: Option<ResetReason>) -> CameraReport {
        CameraReport {
            camera_id: self.camera_id(),
            outcome,
            reset,
        }
    }

    fn mask_settings(&self) -> MaskSettings {
        MaskSettings {
            threshold: self.profile.binary_threshold,
            blur_sigma: self.params.blur_sigma,
        }
    }

    /// Profile ROI clamped to `frame`. History masks are crops of it.
    fn roi_in(&self, frame: &GrayImage) -> Roi {
        self.profile.roi.clamp_to(frame.width(), frame.height())
    }

    fn set_references(&mut self, frame: &GrayImage) {
        self.static_ref = Some(frame.clone());
        self.movement_ref = Some(frame.clone());
    }

    /// Capture a frame and make it both references.
    pub fn prime(&mut self) -> Result<(), CaptureError> {
        let frame = self.capture()?;
        self.set_references(&frame);
        self.last_frame = Some(frame);
        Ok(())
    }

    fn capture(&mut self) -> Result<GrayImage, CaptureError> {
        if self.exhausted {
            return Err(CaptureError::EndOfStream);
        }
        let res = self.source.capture();
        if matches!(res, Err(CaptureError::EndOfStream)) {
            info!("camera {}: frame stream ended", self.camera_id());
            self.exhausted = true;
        }
        res
    }

    /// Capture and classify one frame.
    ///
    /// Capture failures leave the state untouched and are reported as
    /// [`MotionOutcome::CaptureFailed`]. `takeout_in_progress` is for callers
    /// that keep polling while a takeout holds the rig; motion-sized changes
    /// then come back as [`MotionOutcome::Suspended`].
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(camera = self.profile.camera_id))
    )]
    pub fn poll(&mut self, takeout_in_progress: bool) -> CameraReport {
        match self.capture() {
            Ok(frame) => self.classify(frame, takeout_in_progress),
            Err(CaptureError::EndOfStream) => self.report(MotionOutcome::EndOfStream, None),
            Err(e) => {
                warn!("camera {}: capture failed: {e}", self.camera_id());
                self.report(MotionOutcome::CaptureFailed, None)
            }
        }
    }

    /// Run the state machine on an already captured frame.
    pub fn classify(&mut self, frame: GrayImage, takeout_in_progress: bool) -> CameraReport {
        let (Some(static_ref), Some(movement_ref)) = (&self.static_ref, &self.movement_ref) else {
            self.set_references(&frame);
            self.last_frame = Some(frame);
            return self.report(MotionOutcome::Primed, None);
        };

        let roi = self.roi_in(&frame);
        let settings = self.mask_settings();
        let static_mask = match foreground_mask(&frame, static_ref, settings) {
            Ok(m) => m,
            Err(e) => {
                warn!("camera {}: {e}", self.camera_id());
                return self.report(MotionOutcome::CaptureFailed, None);
            }
        };
        let count = if self.state == MotionState::Armed {
            let movement_settings = MaskSettings {
                blur_sigma: 0.0,
                ..settings
            };
            match foreground_mask(&frame, movement_ref, movement_settings) {
                Ok(m) => count_foreground(&m, &roi),
                Err(e) => {
                    warn!("camera {}: {e}", self.camera_id());
                    return self.report(MotionOutcome::CaptureFailed, None);
                }
            }
        } else {
            count_foreground(&static_mask, &roi)
        };

        let p = &self.params;
        let in_motion_band = count >= p.min_threshold && count < p.max_threshold;
        let outcome = if in_motion_band && !takeout_in_progress {
            if self.history.len() >= p.history_capacity.max(1) {
                self.history.pop_front();
            }
            self.history.push_back(crop_roi(&static_mask, &roi));
            self.still_frames = 0;
            self.movement_ref = Some(frame.clone());
            self.false_triggers += 1;
            self.state = MotionState::Armed;
            MotionOutcome::MotionObserved { count }
        } else if count > p.max_threshold {
            MotionOutcome::TakeoutCandidate { count }
        } else if count == 0 {
            self.still_frames += 1;
            MotionOutcome::Still
        } else if in_motion_band {
            MotionOutcome::Suspended { count }
        } else {
            self.still_frames = 0;
            self.movement_ref = Some(frame.clone());
            // the static background keeps the dart while armed
            if self.state == MotionState::Idle {
                self.static_ref = Some(frame.clone());
            }
            MotionOutcome::Noise { count }
        };
        debug!(
            "camera {}: {outcome:?} state={:?} still={} triggers={}",
            self.camera_id(),
            self.state,
            self.still_frames,
            self.false_triggers
        );
        self.last_frame = Some(frame);

        if self.state == MotionState::Armed {
            self.movement_duration += 1;
        } else {
            self.movement_duration = 0;
        }

        let reset = if self.state == MotionState::Armed
            && self.movement_duration > self.params.max_movement_frames
        {
            Some(ResetReason::MovementTimeout)
        } else if self.false_triggers >= self.params.false_trigger_limit {
            Some(ResetReason::FalseTriggerLimit)
        } else {
            None
        };
        if let Some(reason) = reset {
            self.reset(reason);
        }

        self.report(outcome, reset)
    }

    /// Drop all tracking and rebase both references on the latest frame.
    pub fn reset(&mut self, reason: ResetReason) {
        match reason {
            ResetReason::FalseTriggerLimit | ResetReason::MovementTimeout => warn!(
                "camera {}: reset ({reason:?}) after {} triggers, {} armed cycles",
                self.camera_id(),
                self.false_triggers,
                self.movement_duration
            ),
            _ => debug!("camera {}: reset ({reason:?})", self.camera_id()),
        }
        self.state = MotionState::Idle;
        self.history.clear();
        self.still_frames = 0;
        self.false_triggers = 0;
        self.movement_duration = 0;
        if let Some(frame) = self.last_frame.take() {
            self.set_references(&frame);
            self.last_frame = Some(frame);
        }
    }

    /// Rebase the references on the latest frame if nothing is tracked.
    pub fn refresh_references(&mut self) {
        if self.state != MotionState::Idle {
            return;
        }
        if let Some(frame) = self.last_frame.take() {
            self.set_references(&frame);
            self.last_frame = Some(frame);
        }
    }

    /// Enter the takeout hold: tracking is dropped until
    /// [`MotionDetector::finish_takeout`].
    pub fn begin_takeout(&mut self) {
        self.state = MotionState::Resetting;
        self.history.clear();
        self.false_triggers = 0;
        self.movement_duration = 0;
    }

    /// Capture one settle frame and adopt it as both references.
    pub fn settle_sample(&mut self) -> bool {
        match self.capture() {
            Ok(frame) => {
                self.set_references(&frame);
                self.last_frame = Some(frame);
                true
            }
            Err(CaptureError::EndOfStream) => false,
            Err(e) => {
                warn!("camera {}: settle capture failed: {e}", self.camera_id());
                false
            }
        }
    }

    pub fn finish_takeout(&mut self) {
        self.reset(ResetReason::Takeout);
    }

    /// Try to extract a tip from the history.
    ///
    /// Success clears the trigger and duration counters; failure clears the
    /// history so the next cycle starts clean.
    pub fn resolve_contour(&mut self, resolver: &ContourResolver) -> Option<PixelReading> {
        let roi = match &self.last_frame {
            Some(frame) => self.roi_in(frame),
            None => self.profile.roi,
        };
        match resolver.resolve(&self.history, &roi, &self.profile) {
            Some(candidate) => {
                debug!(
                    "camera {}: tip ({:.1}, {:.1}) area {:.0}",
                    self.camera_id(),
                    candidate.tip.x,
                    candidate.tip.y,
                    candidate.area
                );
                self.false_triggers = 0;
                self.movement_duration = 0;
                Some(candidate.tip)
            }
            None => {
                debug!("camera {}: no qualifying contour", self.camera_id());
                self.history.clear();
                self.state = MotionState::Idle;
                None
            }
        }
    }
}
