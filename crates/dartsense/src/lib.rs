//! High-level facade of the `dartsense-*` workspace.
//!
//! This crate provides:
//! - re-exports of the geometry core (`dartsense_core`) and the per-camera
//!   vision crate (`dartsense_vision`),
//! - the [`Coordinator`] that polls every camera concurrently, handles
//!   takeouts and turns stable motion into scored throws,
//! - a [`DartSession`] that runs the coordinator on a background thread and
//!   hands throws to a game-state consumer.
//!
//! ## Quickstart
//!
//! ```no_run
//! use dartsense::{DartSession, FrameSource, ImageSequenceSource, RigConfig};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RigConfig::load_dir("rig");
//! let mut sources: Vec<Box<dyn FrameSource>> = Vec::new();
//! for id in 0..config.cameras.len() {
//!     sources.push(Box::new(ImageSequenceSource::open(id, format!("frames/cam{id}"))?));
//! }
//!
//! let session = DartSession::start(&config, sources)?;
//! while let Some(throw) = session.wait_throw(Duration::from_secs(30)) {
//!     println!("{throw}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `dartsense::core`: board, calibration, triangulation, throw records.
//! - `dartsense::vision`: frame sources, masks, motion detector, contour resolver.
//! - [`Coordinator`] / [`CycleOutcome`]: one control cycle at a time.
//! - [`DartSession`] / [`SessionStatus`]: the threaded consumer surface.

mod coordinator;
mod error;
mod session;
mod shutdown;

pub use dartsense_core as core;
pub use dartsense_vision as vision;

pub use dartsense_core::{
    init_with_level, BoardGeometry, CalibrationProfile, CalibrationStore, DetectionParams,
    PixelReading, RigConfig, Score, Throw, TriangulationEngine, TriangulationParams,
};
pub use dartsense_vision::{FrameSource, ImageSequenceSource, ScriptedSource};

pub use coordinator::{Coordinator, CycleOutcome};
pub use error::SessionError;
pub use session::{DartSession, SessionStatus};
pub use shutdown::ShutdownToken;

#[cfg(feature = "tracing")]
pub use dartsense_core::init_tracing;
