//! Per-camera image processing for dart detection.
//!
//! This crate focuses on:
//! - the [`FrameSource`] seam and two implementations (image-file replay and
//!   an in-memory script),
//! - foreground masks from frame differencing,
//! - the [`MotionDetector`] state machine with its self-healing resets,
//! - dart-tip extraction by the [`ContourResolver`].
//!
//! It does **not** coordinate cameras or triangulate; see the `dartsense`
//! crate for that.

mod contour;
mod detector;
mod error;
pub mod mask;
mod source;

pub use contour::{ContourCandidate, ContourResolver};
pub use detector::{CameraReport, MotionDetector, MotionOutcome, MotionState, ResetReason};
pub use error::{CaptureError, SourceError};
pub use source::{FrameSource, ImageSequenceSource, ScriptedSource};
