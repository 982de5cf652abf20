//! Board-plane triangulation of per-camera pixel readings.
//!
//! Each camera that saw the dart contributes a viewing line through its
//! board-plane location. Pairwise intersections inside the board are averaged
//! and the averaged radius is scaled by an empirical correction factor.

use log::debug;
use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::board::{BoardGeometry, Score};
use crate::calibration::{CalibrationProfile, CalibrationStore};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Darts thrown per turn.
pub const DARTS_PER_TURN: u8 = 3;

/// Triangulation tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationParams {
    /// Scale applied to the averaged impact radius; angle is preserved.
    /// Tuned per installation.
    pub radial_correction: f64,
    /// Line pairs whose determinant magnitude is below this are skipped.
    pub parallel_epsilon: f64,
    /// Fewest viewing lines that may produce an impact.
    pub min_lines: usize,
    /// Reuse a camera's reading from an earlier dart of the same turn when
    /// it does not report for the current dart.
    pub carry_over_readings: bool,
}

impl Default for TriangulationParams {
    fn default() -> Self {
        Self {
            radial_correction: 1.066,
            parallel_epsilon: 1e-9,
            min_lines: 2,
            carry_over_readings: true,
        }
    }
}

/// Tip position of a dart as seen by one camera, frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PixelReading {
    pub x: f64,
    pub y: f64,
}

impl PixelReading {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Readings of every camera for one resolution cycle, indexed by camera id.
///
/// Built once after all camera tasks of the cycle finished and never
/// modified afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleSnapshot {
    readings: Vec<Option<PixelReading>>,
}

impl CycleSnapshot {
    pub fn new(readings: Vec<Option<PixelReading>>) -> Self {
        Self { readings }
    }

    #[inline]
    pub fn get(&self, camera_id: usize) -> Option<PixelReading> {
        self.readings.get(camera_id).copied().flatten()
    }

    pub fn camera_count(&self) -> usize {
        self.readings.len()
    }

    /// Cameras that produced a reading this cycle.
    pub fn resolved_count(&self) -> usize {
        self.readings.iter().filter(|r| r.is_some()).count()
    }

    pub fn readings(&self) -> &[Option<PixelReading>] {
        &self.readings
    }
}

/// A camera's viewing line `a*x + b*y + c = 0` in board millimetres, with
/// `(a, b)` a unit normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangulationLine {
    pub camera_id: usize,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl TriangulationLine {
    /// Line seen by `profile` for a reading normalized to `[0, 1]`.
    ///
    /// A reading of `0.5` looks straight at the board centre; the extremes
    /// deviate by the camera's critical angle.
    pub fn from_normalized(profile: &CalibrationProfile, normalized: f64) -> Self {
        let towards_centre = profile.placement_angle_deg - 180.0;
        let angle =
            (-(normalized - 0.5) * 2.0 * profile.critical_angle_deg + towards_centre).to_radians();
        let (sin, cos) = angle.sin_cos();
        let (a, b) = (sin, -cos);
        let origin = profile.board_plane_location;
        Self {
            camera_id: profile.camera_id,
            a,
            b,
            c: -(a * origin.x + b * origin.y),
        }
    }

    /// Viewing angle of the line, degrees.
    pub fn angle_deg(&self) -> f64 {
        self.a.atan2(-self.b).to_degrees()
    }

    /// Signed distance of `p` from the line.
    #[inline]
    pub fn distance(&self, p: Point2<f64>) -> f64 {
        self.a * p.x + self.b * p.y + self.c
    }

    /// Intersection with `other`, or `None` when the lines are (nearly)
    /// parallel.
    pub fn intersect(&self, other: &TriangulationLine, epsilon: f64) -> Option<Point2<f64>> {
        let m = Matrix2::new(self.a, self.b, other.a, other.b);
        if m.determinant().abs() < epsilon {
            return None;
        }
        let solution = m.try_inverse()? * Vector2::new(-self.c, -other.c);
        Some(Point2::from(solution))
    }
}

/// Triangulated impact point.
#[derive(Clone, Debug, PartialEq)]
pub struct DartImpact {
    /// Board-plane position after radial correction, mm.
    pub position: Point2<f64>,
    /// Distance from the bullseye, mm.
    pub r: f64,
    /// `atan2(y, x)` in degrees, `(-180, 180]`.
    pub theta_deg: f64,
    /// Intersections that contributed to the average.
    pub intersections: usize,
    /// Viewing lines used.
    pub lines: usize,
}

impl DartImpact {
    fn from_position(position: Point2<f64>, intersections: usize, lines: usize) -> Self {
        Self {
            r: position.coords.norm(),
            theta_deg: position.y.atan2(position.x).to_degrees(),
            position,
            intersections,
            lines,
        }
    }
}

/// Dart counting and reading carry-over within a turn.
///
/// Carry-over assumes a camera that loses sight of dart 2 or 3 is blocked by
/// an earlier dart, so the earlier reading is still roughly on the new dart's
/// viewing line. This is an approximation, not a guarantee.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnTracker {
    darts_thrown: u8,
    carried: Vec<Option<PixelReading>>,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of the next dart within the turn, `1..=3`.
    pub fn next_dart(&self) -> u8 {
        self.darts_thrown % DARTS_PER_TURN + 1
    }

    pub fn darts_thrown(&self) -> u8 {
        self.darts_thrown
    }

    /// Readings for the next dart: the cycle's own readings, filled in from
    /// earlier darts of the turn when `carry_over` is set.
    pub fn effective_readings(
        &self,
        snapshot: &CycleSnapshot,
        carry_over: bool,
    ) -> Vec<Option<PixelReading>> {
        let use_carried = carry_over && self.darts_thrown > 0;
        snapshot
            .readings()
            .iter()
            .enumerate()
            .map(|(i, r)| match r {
                Some(r) => Some(*r),
                None if use_carried => self.carried.get(i).copied().flatten(),
                None => None,
            })
            .collect()
    }

    /// Record a resolved dart; the turn restarts after the third.
    pub fn commit(&mut self, readings: Vec<Option<PixelReading>>) {
        self.darts_thrown += 1;
        if self.darts_thrown >= DARTS_PER_TURN {
            self.new_turn();
        } else {
            self.carried = readings;
        }
    }

    pub fn new_turn(&mut self) {
        self.darts_thrown = 0;
        self.carried.clear();
    }
}

/// A triangulated and scored dart.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedDart {
    /// Position within the turn, `1..=3`.
    pub dart_in_turn: u8,
    pub impact: DartImpact,
    pub score: Score,
}

/// Converts per-camera readings into impact points and scores.
#[derive(Clone, Debug)]
pub struct TriangulationEngine {
    board: BoardGeometry,
    params: TriangulationParams,
    cameras: Vec<CalibrationProfile>,
    turn: TurnTracker,
}

impl TriangulationEngine {
    pub fn new(
        board: BoardGeometry,
        params: TriangulationParams,
        cameras: &CalibrationStore,
    ) -> Self {
        Self {
            board,
            params,
            cameras: cameras.as_slice().to_vec(),
            turn: TurnTracker::new(),
        }
    }

    pub fn board(&self) -> &BoardGeometry {
        &self.board
    }

    pub fn params(&self) -> &TriangulationParams {
        &self.params
    }

    pub fn turn(&self) -> &TurnTracker {
        &self.turn
    }

    /// Start a new turn; carried readings are dropped.
    pub fn new_turn(&mut self) {
        self.turn.new_turn();
    }

    /// Viewing lines for every camera with a reading.
    pub fn lines(&self, readings: &[Option<PixelReading>]) -> Vec<TriangulationLine> {
        self.cameras
            .iter()
            .zip(readings)
            .filter_map(|(profile, reading)| {
                let reading = (*reading)?;
                let n = profile.normalize_x(reading.x);
                Some(TriangulationLine::from_normalized(profile, n))
            })
            .collect()
    }

    /// Triangulate one set of readings without touching turn state.
    ///
    /// `None` means a non-detection: too few lines, or no pairwise
    /// intersection inside the board.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, readings),
            fields(readings = readings.len())
        )
    )]
    pub fn locate(&self, readings: &[Option<PixelReading>]) -> Option<DartImpact> {
        let lines = self.lines(readings);
        if lines.len() < self.params.min_lines.max(2) {
            debug!(
                "{} viewing line(s), need {}",
                lines.len(),
                self.params.min_lines.max(2)
            );
            return None;
        }

        let mut sum = Vector2::zeros();
        let mut count = 0usize;
        for (i, li) in lines.iter().enumerate() {
            for lj in &lines[i + 1..] {
                match li.intersect(lj, self.params.parallel_epsilon) {
                    Some(p) if self.board.contains(p) => {
                        sum += p.coords;
                        count += 1;
                    }
                    Some(p) => debug!(
                        "cameras {}/{} intersect off the board at ({:.1}, {:.1})",
                        li.camera_id, lj.camera_id, p.x, p.y
                    ),
                    None => debug!("cameras {}/{} are parallel", li.camera_id, lj.camera_id),
                }
            }
        }
        if count == 0 {
            return None;
        }

        let mean = Point2::from(sum / count as f64);
        let corrected = Point2::from(mean.coords * self.params.radial_correction);
        Some(DartImpact::from_position(corrected, count, lines.len()))
    }

    /// Triangulate and score the next dart of the turn.
    ///
    /// Turn state advances only when an impact is produced.
    pub fn resolve(&mut self, snapshot: &CycleSnapshot) -> Option<ResolvedDart> {
        let dart_in_turn = self.turn.next_dart();
        let readings = self
            .turn
            .effective_readings(snapshot, self.params.carry_over_readings);
        let impact = self.locate(&readings)?;
        let score = self.board.score(impact.position);
        self.turn.commit(readings);
        Some(ResolvedDart {
            dart_in_turn,
            impact,
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn engine(correction: f64) -> TriangulationEngine {
        let board = BoardGeometry::default();
        let params = TriangulationParams {
            radial_correction: correction,
            ..Default::default()
        };
        TriangulationEngine::new(board, params, &CalibrationStore::defaults(4, &board))
    }

    /// Pixel column that normalizes to `n` with the stock `[0, 640]` bounds.
    fn px(n: f64) -> Option<PixelReading> {
        Some(PixelReading::new(n * 640.0, 300.0))
    }

    #[test]
    fn centre_readings_meet_at_the_bullseye() {
        let e = engine(1.066);
        let impact = e.locate(&[px(0.5), None, None, px(0.5)]).unwrap();
        assert_relative_eq!(impact.position.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(impact.position.y, 0.0, epsilon = 1e-9);
        assert_eq!(impact.intersections, 1);
        assert_eq!(e.board().score(impact.position), Score::new(25, 2));
    }

    #[test]
    fn line_passes_through_camera_location() {
        let board = BoardGeometry::default();
        let store = CalibrationStore::defaults(4, &board);
        for profile in store.iter() {
            for n in [0.0, 0.3, 0.5, 1.0] {
                let line = TriangulationLine::from_normalized(profile, n);
                assert_relative_eq!(
                    line.distance(profile.board_plane_location),
                    0.0,
                    epsilon = 1e-9
                );
                assert_relative_eq!(line.a.hypot(line.b), 1.0, epsilon = 1e-12);
            }
            let centre = TriangulationLine::from_normalized(profile, 0.5);
            assert_relative_eq!(centre.distance(Point2::origin()), 0.0, epsilon = 1e-9);
            assert_relative_eq!(
                centre.angle_deg(),
                profile.placement_angle_deg - 180.0,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn extreme_reading_deviates_by_the_critical_angle() {
        let board = BoardGeometry::default();
        let store = CalibrationStore::defaults(4, &board);
        let profile = store.get(1).unwrap();
        let edge = TriangulationLine::from_normalized(profile, 1.0);
        assert_relative_eq!(
            edge.distance(Point2::origin()).abs(),
            profile.camera_distance_mm * profile.critical_angle_deg.to_radians().sin(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn all_cameras_agree_on_an_off_centre_point() {
        let board = BoardGeometry::default();
        let store = CalibrationStore::defaults(4, &board);
        let target = Point2::new(40.0, 95.0);

        // invert the line model: find the normalized reading whose line hits the target
        let readings: Vec<Option<PixelReading>> = store
            .iter()
            .map(|p| {
                let to_target = target - p.board_plane_location;
                let angle = to_target.y.atan2(to_target.x).to_degrees();
                let mut delta = angle - (p.placement_angle_deg - 180.0);
                delta = (delta + 180.0).rem_euclid(360.0) - 180.0;
                let n = 0.5 - delta / (2.0 * p.critical_angle_deg);
                px(n)
            })
            .collect();

        let e = engine(1.0);
        let impact = e.locate(&readings).unwrap();
        assert_eq!(impact.lines, 4);
        assert_eq!(impact.intersections, 6);
        assert_relative_eq!(impact.position.x, target.x, epsilon = 1e-6);
        assert_relative_eq!(impact.position.y, target.y, epsilon = 1e-6);
    }

    #[test]
    fn radial_correction_scales_radius_and_keeps_angle() {
        let readings = [px(0.42), px(0.55), None, None];
        let raw = engine(1.0).locate(&readings).unwrap();
        let corrected = engine(1.066).locate(&readings).unwrap();
        assert_relative_eq!(corrected.r, raw.r * 1.066, epsilon = 1e-9);
        assert_relative_eq!(corrected.theta_deg, raw.theta_deg, epsilon = 1e-9);
    }

    #[test]
    fn fewer_than_two_lines_is_a_non_detection() {
        let e = engine(1.066);
        assert!(e.locate(&[None, None, None, None]).is_none());
        assert!(e.locate(&[px(0.5), None, None, None]).is_none());
    }

    #[test]
    fn parallel_lines_do_not_intersect() {
        let l1 = TriangulationLine {
            camera_id: 0,
            a: 0.0,
            b: 1.0,
            c: -5.0,
        };
        let l2 = TriangulationLine {
            camera_id: 1,
            a: 0.0,
            b: 1.0,
            c: 3.0,
        };
        assert!(l1.intersect(&l2, 1e-9).is_none());
        let vertical = TriangulationLine {
            camera_id: 2,
            a: 1.0,
            b: 0.0,
            c: -2.0,
        };
        let p = l1.intersect(&vertical, 1e-9).unwrap();
        assert_relative_eq!(p.x, 2.0);
        assert_relative_eq!(p.y, 5.0);
    }

    #[test]
    fn turn_carries_readings_for_silent_cameras() {
        let mut e = engine(1.0);
        let first = CycleSnapshot::new(vec![px(0.5), px(0.5), None, None]);
        let dart1 = e.resolve(&first).unwrap();
        assert_eq!(dart1.dart_in_turn, 1);

        // only one camera reports dart 2; camera 1 falls back to its dart-1 reading
        let second = CycleSnapshot::new(vec![px(0.45), None, None, None]);
        let dart2 = e.resolve(&second).unwrap();
        assert_eq!(dart2.dart_in_turn, 2);
        assert_eq!(dart2.impact.lines, 2);

        e.new_turn();
        assert!(e.resolve(&second).is_none());
        assert_eq!(e.turn().next_dart(), 1);
    }

    #[test]
    fn turn_wraps_after_three_darts() {
        let mut e = engine(1.0);
        let snap = CycleSnapshot::new(vec![px(0.5), None, px(0.5), None]);
        let darts: Vec<u8> = (0..4)
            .map(|_| e.resolve(&snap).unwrap().dart_in_turn)
            .collect();
        assert_eq!(darts, vec![1, 2, 3, 1]);
    }

    #[test]
    fn failed_resolution_keeps_turn_state() {
        let mut e = engine(1.0);
        let empty = CycleSnapshot::new(vec![None; 4]);
        assert!(e.resolve(&empty).is_none());
        assert_eq!(e.turn().darts_thrown(), 0);
    }
}
