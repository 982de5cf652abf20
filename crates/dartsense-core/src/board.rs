//! Dartboard geometry and the point-to-score mapping.
//!
//! Board-plane coordinates are millimetres with the origin at the bullseye,
//! `+x` to the right and `+y` towards the 20 segment.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Segment numbers clockwise from the top wire.
pub const SEGMENT_ORDER: [u8; 20] = [
    20, 1, 18, 4, 13, 6, 10, 15, 2, 17, 3, 19, 7, 16, 8, 11, 14, 9, 12, 5,
];

/// Angular width of a single segment, degrees.
pub const SEGMENT_SPAN_DEG: f64 = 18.0;

/// Rotation that puts the wire between 5 and 20 at 0 degrees.
const SEGMENT_WIRE_OFFSET_DEG: f64 = 9.0;

/// Score value of both bull rings.
pub const BULL_VALUE: u8 = 25;

/// Physical ring radii of a standard board, millimetres.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardGeometry {
    /// Outer edge of the board body (not the scoring area).
    pub board_radius_mm: f64,
    pub double_bull_radius_mm: f64,
    pub bull_radius_mm: f64,
    pub triple_inner_radius_mm: f64,
    pub triple_outer_radius_mm: f64,
    pub double_inner_radius_mm: f64,
    /// Outer edge of the scoring area; anything beyond is a miss.
    pub double_outer_radius_mm: f64,
}

impl Default for BoardGeometry {
    fn default() -> Self {
        Self {
            board_radius_mm: 225.5,
            double_bull_radius_mm: 6.35,
            bull_radius_mm: 16.0,
            triple_inner_radius_mm: 99.0,
            triple_outer_radius_mm: 107.0,
            double_inner_radius_mm: 162.0,
            double_outer_radius_mm: 170.0,
        }
    }
}

/// A scored board position: segment value and ring multiplier.
///
/// A miss is `(0, 0)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Score {
    pub value: u8,
    pub multiplier: u8,
}

impl Score {
    pub const MISS: Score = Score {
        value: 0,
        multiplier: 0,
    };

    pub fn new(value: u8, multiplier: u8) -> Self {
        Self { value, multiplier }
    }

    #[inline]
    pub fn is_miss(&self) -> bool {
        self.multiplier == 0
    }

    /// Points awarded for the throw.
    #[inline]
    pub fn total(&self) -> u16 {
        self.value as u16 * self.multiplier as u16
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.value, self.multiplier) {
            (_, 0) => write!(f, "MISS"),
            (BULL_VALUE, 2) => write!(f, "DOUBLE BULL"),
            (BULL_VALUE, _) => write!(f, "BULL"),
            (v, 3) => write!(f, "TRIPLE {v}"),
            (v, 2) => write!(f, "DOUBLE {v}"),
            (v, _) => write!(f, "{v}"),
        }
    }
}

impl BoardGeometry {
    /// `true` if the point lies on the physical board body.
    #[inline]
    pub fn contains(&self, p: Point2<f64>) -> bool {
        p.coords.norm() <= self.board_radius_mm
    }

    /// Segment number for a board-plane direction, ignoring the radius.
    pub fn segment_at(&self, p: Point2<f64>) -> u8 {
        let angle = (p.x.atan2(p.y).to_degrees() + SEGMENT_WIRE_OFFSET_DEG).rem_euclid(360.0);
        // rem_euclid can round up to exactly 360.0 for tiny negative inputs
        let idx = (angle / SEGMENT_SPAN_DEG).floor() as usize % SEGMENT_ORDER.len();
        SEGMENT_ORDER[idx]
    }

    /// Map a board-plane point (mm) to its score.
    ///
    /// Pure and deterministic: the same point always yields the same score.
    pub fn score(&self, p: Point2<f64>) -> Score {
        let distance = p.x.hypot(p.y);

        if distance > self.double_outer_radius_mm {
            return Score::MISS;
        }
        if distance <= self.double_bull_radius_mm {
            return Score::new(BULL_VALUE, 2);
        }
        if distance <= self.bull_radius_mm {
            return Score::new(BULL_VALUE, 1);
        }

        let triple = self.triple_inner_radius_mm..=self.triple_outer_radius_mm;
        let multiplier = if triple.contains(&distance) {
            3
        } else if distance >= self.double_inner_radius_mm {
            2
        } else {
            1
        };

        Score::new(self.segment_at(p), multiplier)
    }

    /// Convenience overload of [`BoardGeometry::score`] for raw coordinates.
    #[inline]
    pub fn score_xy(&self, x: f64, y: f64) -> Score {
        self.score(Point2::new(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polar(r: f64, deg_from_top_clockwise: f64) -> Point2<f64> {
        let a = deg_from_top_clockwise.to_radians();
        Point2::new(r * a.sin(), r * a.cos())
    }

    #[test]
    fn centre_is_double_bull() {
        let board = BoardGeometry::default();
        assert_eq!(board.score_xy(0.0, 0.0), Score::new(25, 2));
        assert_eq!(board.score_xy(6.35, 0.0), Score::new(25, 2));
        assert_eq!(board.score_xy(0.0, -6.4), Score::new(25, 1));
        assert_eq!(board.score_xy(16.0, 0.0), Score::new(25, 1));
    }

    #[test]
    fn top_segment_is_twenty() {
        let board = BoardGeometry::default();
        assert_eq!(board.score_xy(0.0, 50.0), Score::new(20, 1));
        assert_eq!(board.score_xy(0.0, 103.0), Score::new(20, 3));
        assert_eq!(board.score_xy(0.0, 166.0), Score::new(20, 2));
    }

    #[test]
    fn segments_follow_clockwise_order() {
        let board = BoardGeometry::default();
        for (i, &expected) in SEGMENT_ORDER.iter().enumerate() {
            let p = polar(60.0, i as f64 * SEGMENT_SPAN_DEG);
            assert_eq!(board.score(p).value, expected, "segment index {i}");
        }
        assert_eq!(board.score_xy(60.0, 0.0).value, 6);
        assert_eq!(board.score_xy(0.0, -60.0).value, 3);
        assert_eq!(board.score_xy(-60.0, 0.0).value, 11);
    }

    #[test]
    fn wire_offset_splits_twenty_and_one() {
        let board = BoardGeometry::default();
        assert_eq!(board.score(polar(60.0, 8.9)).value, 20);
        assert_eq!(board.score(polar(60.0, 9.1)).value, 1);
        assert_eq!(board.score(polar(60.0, -8.9)).value, 20);
        assert_eq!(board.score(polar(60.0, -9.1)).value, 5);
    }

    #[test]
    fn outside_double_ring_is_miss_at_every_angle() {
        let board = BoardGeometry::default();
        for step in 0..720 {
            let deg = step as f64 * 0.5;
            for r in [170.01, 180.0, 225.5, 400.0] {
                let s = board.score(polar(r, deg));
                assert_eq!(s.multiplier, 0, "r={r} deg={deg}");
                assert!(s.is_miss());
            }
        }
    }

    #[test]
    fn scoring_is_idempotent() {
        let board = BoardGeometry::default();
        for &(x, y) in &[(12.5, -80.0), (101.0, 3.0), (-150.0, -70.0), (0.0, 170.0)] {
            assert_eq!(board.score_xy(x, y), board.score_xy(x, y));
        }
    }

    #[test]
    fn score_display_names_rings() {
        assert_eq!(Score::MISS.to_string(), "MISS");
        assert_eq!(Score::new(25, 2).to_string(), "DOUBLE BULL");
        assert_eq!(Score::new(19, 3).to_string(), "TRIPLE 19");
        assert_eq!(Score::new(19, 3).total(), 57);
    }
}
