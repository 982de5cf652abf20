//! Detection tuning shared by the motion detectors and the coordinator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of the per-camera motion state machine, the contour resolver
/// and the coordinator timing.
///
/// Every field has a default reproducing the stock rig, so a JSON object with
/// any subset of keys deserializes. Durations are written in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Smallest ROI foreground pixel count that counts as motion.
    pub min_threshold: usize,
    /// Counts above this are treated as a takeout.
    pub max_threshold: usize,
    /// Convex hull area a contour must exceed to be a dart candidate.
    pub min_contour_area: f64,
    /// Upper bound (inclusive) on the hull area of a candidate.
    pub max_contour_area: f64,
    /// Consecutive empty frames each camera needs before resolution (K).
    pub still_frames_required: u32,
    /// Motion observations tolerated before a camera is force-reset.
    pub false_trigger_limit: u32,
    /// Cycles a camera may stay armed before it is force-reset.
    pub max_movement_frames: u32,
    /// Bounded length of the per-camera mask history.
    pub history_capacity: usize,
    /// Gaussian sigma applied to the static-reference diff; `0` disables.
    pub blur_sigma: f32,
    /// Contours whose y standard deviation is below this are rejected.
    pub min_vertical_spread: f64,
    /// Project the visible dart shaft onto the surface scan line instead of
    /// trusting the lowest visible pixel.
    pub intersect_mode: bool,

    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Extra pause after a cycle in which some camera saw motion.
    #[serde(with = "millis")]
    pub post_motion_delay: Duration,
    #[serde(with = "millis")]
    pub warmup: Duration,
    #[serde(with = "millis")]
    pub takeout_initial_delay: Duration,
    /// Settle window granted to each camera in turn during a takeout.
    #[serde(with = "millis")]
    pub takeout_settle_per_camera: Duration,
    #[serde(with = "millis")]
    pub takeout_settle_interval: Duration,
    #[serde(with = "millis")]
    pub takeout_tail_delay: Duration,
    #[serde(with = "millis")]
    pub post_throw_delay: Duration,

    /// Idle cameras re-capture their references every this many cycles;
    /// `0` disables the refresh.
    pub reference_refresh_cycles: u32,
    /// Worker pool size; defaults to one thread per camera.
    pub worker_threads: Option<usize>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            min_threshold: 100,
            max_threshold: 30_000,
            min_contour_area: 30.0,
            max_contour_area: 30_000.0,
            still_frames_required: 2,
            false_trigger_limit: 5,
            max_movement_frames: 35,
            history_capacity: 32,
            blur_sigma: 1.1,
            min_vertical_spread: 1.0,
            intersect_mode: true,
            poll_interval: Duration::from_millis(200),
            post_motion_delay: Duration::from_millis(200),
            warmup: Duration::from_secs(5),
            takeout_initial_delay: Duration::from_secs(3),
            takeout_settle_per_camera: Duration::from_secs(1),
            takeout_settle_interval: Duration::from_millis(100),
            takeout_tail_delay: Duration::from_secs(1),
            post_throw_delay: Duration::from_millis(500),
            reference_refresh_cycles: 15,
            worker_threads: None,
        }
    }
}

impl DetectionParams {
    /// Same thresholds with every wait set to zero, for replay and tests.
    pub fn with_zero_delays(mut self) -> Self {
        self.poll_interval = Duration::ZERO;
        self.post_motion_delay = Duration::ZERO;
        self.warmup = Duration::ZERO;
        self.takeout_initial_delay = Duration::ZERO;
        self.takeout_settle_per_camera = Duration::ZERO;
        self.takeout_settle_interval = Duration::ZERO;
        self.takeout_tail_delay = Duration::ZERO;
        self.post_throw_delay = Duration::ZERO;
        self
    }

    /// Number of settle samples taken per camera during a takeout.
    pub fn takeout_settle_samples(&self) -> u32 {
        if self.takeout_settle_interval.is_zero() {
            return 1;
        }
        let n = self.takeout_settle_per_camera.as_nanos() / self.takeout_settle_interval.as_nanos();
        n.clamp(1, u32::MAX as u128) as u32
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
