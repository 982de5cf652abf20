//! Geometry core of the dart detection engine.
//!
//! This crate is IO-light and image-free: board layout and scoring, camera
//! calibration profiles, triangulation of per-camera pixel readings, and the
//! throw records produced for the game-state consumer.
//!
//! ```
//! use dartsense_core::{BoardGeometry, Score};
//!
//! let board = BoardGeometry::default();
//! assert_eq!(board.score_xy(0.0, 103.0), Score::new(20, 3));
//! ```

mod board;
mod calibration;
mod logger;
mod params;
mod throw;
mod triangulation;

pub use board::{BoardGeometry, Score, BULL_VALUE, SEGMENT_ORDER, SEGMENT_SPAN_DEG};
pub use calibration::{
    CalibrationError, CalibrationProfile, CalibrationStore, PixelBounds, RigConfig, Roi,
    DEFAULT_CAMERA_COUNT,
};
pub use params::DetectionParams;
pub use throw::Throw;
pub use triangulation::{
    CycleSnapshot, DartImpact, PixelReading, ResolvedDart, TriangulationEngine, TriangulationLine,
    TriangulationParams, TurnTracker, DARTS_PER_TURN,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
