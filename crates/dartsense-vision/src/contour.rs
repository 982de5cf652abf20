//! Dart-tip extraction from a camera's mask history.

use std::collections::VecDeque;

use dartsense_core::{CalibrationProfile, DetectionParams, PixelReading, Roi};
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use log::debug;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Qualifying contour of one resolution attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct ContourCandidate {
    /// Tip position in frame pixels.
    pub tip: PixelReading,
    /// Convex hull area, px².
    pub area: f64,
}

/// Finds the most plausible dart tip in a history of ROI masks.
#[derive(Clone, Debug, PartialEq)]
pub struct ContourResolver {
    pub min_area: f64,
    pub max_area: f64,
    pub min_vertical_spread: f64,
    pub intersect_mode: bool,
}

impl ContourResolver {
    pub fn new(params: &DetectionParams) -> Self {
        Self {
            min_area: params.min_contour_area,
            max_area: params.max_contour_area,
            min_vertical_spread: params.min_vertical_spread,
            intersect_mode: params.intersect_mode,
        }
    }

    /// Walk `history` newest-first and return the tip of the first contour
    /// that qualifies. Masks are crops of `roi`, which must already be
    /// clamped to the frame.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, history, roi, profile),
            fields(camera = profile.camera_id, frames = history.len())
        )
    )]
    pub fn resolve(
        &self,
        history: &VecDeque<GrayImage>,
        roi: &Roi,
        profile: &CalibrationProfile,
    ) -> Option<ContourCandidate> {
        for (age, mask) in history.iter().rev().enumerate() {
            for (hull, area) in hulls_by_area(mask) {
                if area <= self.min_area || area > self.max_area {
                    debug!(
                        "camera {}: frame -{age} hull area {area:.1} outside ({}, {}]",
                        profile.camera_id, self.min_area, self.max_area
                    );
                    continue;
                }
                if y_std_dev(&hull) < self.min_vertical_spread {
                    debug!("camera {}: flat contour skipped", profile.camera_id);
                    continue;
                }
                let tip = self.tip_of(&hull, roi, profile.surface_line_y as f64);
                return Some(ContourCandidate { tip, area });
            }
        }
        None
    }

    /// Tip of a hull given in ROI-local coordinates.
    fn tip_of(&self, hull: &[Point<i32>], roi: &Roi, surface_y: f64) -> PixelReading {
        let y_min = hull.iter().map(|p| p.y).min().unwrap_or(0);
        let y_max = hull.iter().map(|p| p.y).max().unwrap_or(0);

        // the ROI's last row is the lowest point a tip may be reported at
        let y_bot = (y_max + roi.y as i32).max(roi.bottom() as i32) as f64;
        let x_bot = mean_x_at(hull, y_max);

        let x = if self.intersect_mode {
            let y_top = (y_min + roi.y as i32).min(roi.y as i32) as f64;
            let x_top = mean_x_at(hull, y_min);
            project_to_row(x_bot, y_bot, x_top, y_top, surface_y)
        } else {
            x_bot
        };

        let y = if self.intersect_mode { surface_y } else { y_bot };
        PixelReading::new(x + roi.x as f64, y)
    }
}

/// Outer contours of `mask` as convex hulls, largest first.
fn hulls_by_area(mask: &GrayImage) -> Vec<(Vec<Point<i32>>, f64)> {
    let mut hulls: Vec<(Vec<Point<i32>>, f64)> = find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| {
            let hull = convex_hull(c.points.as_slice());
            let area = polygon_area(&hull);
            (hull, area)
        })
        .collect();
    hulls.sort_by(|a, b| b.1.total_cmp(&a.1));
    hulls
}

/// Shoelace area of a closed polygon.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(p, q)| p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

fn y_std_dev(points: &[Point<i32>]) -> f64 {
    let n = points.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean = points.iter().map(|p| p.y as f64).sum::<f64>() / n;
    let var = points
        .iter()
        .map(|p| (p.y as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    var.sqrt()
}

fn mean_x_at(points: &[Point<i32>], y: i32) -> f64 {
    let (sum, n) = points
        .iter()
        .filter(|p| p.y == y)
        .fold((0i64, 0i64), |(s, n), p| (s + p.x as i64, n + 1));
    if n == 0 {
        return 0.0;
    }
    sum as f64 / n as f64
}

/// X where the line through the bottom and top points crosses row `y`.
fn project_to_row(x_bot: f64, y_bot: f64, x_top: f64, y_top: f64, y: f64) -> f64 {
    if x_bot == x_top || y_bot == y_top {
        return x_bot;
    }
    let slope = (y_bot - y_top) / (x_bot - x_top);
    let intercept = y_top - slope * x_top;
    (y - intercept) / slope
}
