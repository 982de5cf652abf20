//! Per-camera calibration profiles and the rig configuration file.
//!
//! Loading is forgiving: a missing file, a missing key or an invalid value is
//! reported with `warn!` and replaced by the built-in default for that key.
//! [`RigConfig::load_strict`] is the tooling variant that surfaces errors.

use std::fs;
use std::path::Path;

use log::{debug, warn};
use nalgebra::Point2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::board::BoardGeometry;
use crate::params::DetectionParams;
use crate::triangulation::TriangulationParams;

/// Number of cameras on the stock rig.
pub const DEFAULT_CAMERA_COUNT: usize = 4;

/// Distance from each stock camera to the board edge, millimetres.
const STOCK_EDGE_DISTANCE_MM: [f64; DEFAULT_CAMERA_COUNT] = [516.0, 510.0, 506.0, 505.0];
const FALLBACK_EDGE_DISTANCE_MM: f64 = 508.0;

/// Placement of the stock cameras around the board, degrees from `+x`.
const STOCK_PLACEMENT_DEG: [f64; DEFAULT_CAMERA_COUNT] = [144.0, 108.0, 72.0, 36.0];
const PLACEMENT_STEP_DEG: f64 = 36.0;

const DEFAULT_THRESHOLD: u8 = 110;
const DEFAULT_ROI: Roi = Roi {
    x: 0,
    y: 250,
    width: 640,
    height: 100,
};
const DEFAULT_SURFACE_Y: u32 = 320;
const DEFAULT_PIXEL_BOUNDS: PixelBounds = PixelBounds { lo: 0.0, hi: 640.0 };

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("camera {camera}: {reason}")]
    InvalidCamera { camera: usize, reason: String },
}

/// Axis-aligned region of interest in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Last pixel row inside the region.
    #[inline]
    pub fn bottom(&self) -> u32 {
        (self.y + self.height).saturating_sub(1)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection with a `width x height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Roi {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Roi {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }
}

/// Pixel interval that maps onto the normalized range `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct PixelBounds {
    pub lo: f64,
    pub hi: f64,
}

impl From<[f64; 2]> for PixelBounds {
    fn from([lo, hi]: [f64; 2]) -> Self {
        Self { lo, hi }
    }
}

impl From<PixelBounds> for [f64; 2] {
    fn from(b: PixelBounds) -> Self {
        [b.lo, b.hi]
    }
}

impl PixelBounds {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn is_valid(&self) -> bool {
        self.lo.is_finite() && self.hi.is_finite() && self.hi > self.lo
    }

    /// Position of `x` inside the interval, clamped to `[0, 1]`.
    #[inline]
    pub fn normalize(&self, x: f64) -> f64 {
        ((x - self.lo) / (self.hi - self.lo)).clamp(0.0, 1.0)
    }
}

/// Immutable calibration of one camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub camera_id: usize,
    /// Grey-level difference that marks a pixel as foreground.
    #[serde(rename = "threshold")]
    pub binary_threshold: u8,
    pub roi: Roi,
    /// Image row where the board surface meets the camera's view.
    #[serde(rename = "surface_y")]
    pub surface_line_y: u32,
    /// Distance from the lens to the board centre.
    pub camera_distance_mm: f64,
    /// Direction of the camera seen from the board centre, degrees from `+x`.
    pub placement_angle_deg: f64,
    /// Half of the angle the board subtends in this camera's view.
    pub critical_angle_deg: f64,
    #[serde(rename = "board_plane_location_mm")]
    pub board_plane_location: Point2<f64>,
    pub pixel_bounds: PixelBounds,
}

fn critical_angle_deg(board: &BoardGeometry, distance_mm: f64) -> f64 {
    (board.board_radius_mm / distance_mm).atan().to_degrees()
}

fn location_from_polar(distance_mm: f64, placement_deg: f64) -> Point2<f64> {
    let a = placement_deg.to_radians();
    Point2::new(distance_mm * a.cos(), distance_mm * a.sin())
}

impl CalibrationProfile {
    /// Built-in profile for `camera_id`, reproducing the stock rig for the
    /// first four cameras and extending the ring evenly beyond that.
    pub fn default_for(camera_id: usize, board: &BoardGeometry) -> Self {
        let edge = STOCK_EDGE_DISTANCE_MM
            .get(camera_id)
            .copied()
            .unwrap_or(FALLBACK_EDGE_DISTANCE_MM);
        let step = PLACEMENT_STEP_DEG * camera_id as f64;
        let placement = STOCK_PLACEMENT_DEG
            .get(camera_id)
            .copied()
            .unwrap_or_else(|| (STOCK_PLACEMENT_DEG[0] - step).rem_euclid(360.0));
        Self::from_geometry(camera_id, board, edge + board.board_radius_mm, placement)
    }

    /// Profile with stock image parameters and geometry derived from the
    /// camera's distance and placement.
    pub fn from_geometry(
        camera_id: usize,
        board: &BoardGeometry,
        camera_distance_mm: f64,
        placement_angle_deg: f64,
    ) -> Self {
        Self {
            camera_id,
            binary_threshold: DEFAULT_THRESHOLD,
            roi: DEFAULT_ROI,
            surface_line_y: DEFAULT_SURFACE_Y,
            camera_distance_mm,
            placement_angle_deg,
            critical_angle_deg: critical_angle_deg(board, camera_distance_mm),
            board_plane_location: location_from_polar(camera_distance_mm, placement_angle_deg),
            pixel_bounds: DEFAULT_PIXEL_BOUNDS,
        }
    }

    /// Normalized reading of pixel column `x` for this camera.
    #[inline]
    pub fn normalize_x(&self, x: f64) -> f64 {
        self.pixel_bounds.normalize(x)
    }
}

/// Read-only profile lookup indexed by camera id.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CalibrationStore {
    profiles: Vec<CalibrationProfile>,
}

impl CalibrationStore {
    /// Build a store from profiles; ids are reassigned to match positions.
    pub fn new(mut profiles: Vec<CalibrationProfile>) -> Self {
        for (i, p) in profiles.iter_mut().enumerate() {
            if p.camera_id != i {
                warn!(
                    "profile at position {i} had camera_id {}, renumbered",
                    p.camera_id
                );
                p.camera_id = i;
            }
        }
        Self { profiles }
    }

    pub fn defaults(count: usize, board: &BoardGeometry) -> Self {
        Self {
            profiles: (0..count)
                .map(|id| CalibrationProfile::default_for(id, board))
                .collect(),
        }
    }

    /// Cameras of the rig file at `path`, with per-key fallbacks.
    pub fn load(path: impl AsRef<Path>) -> Self {
        RigConfig::load(path).cameras
    }

    /// Like [`CalibrationStore::load`], but unreadable files, malformed JSON
    /// and invalid values are errors.
    pub fn load_strict(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        RigConfig::load_strict(path).map(|cfg| cfg.cameras)
    }

    /// Load `camera_<id>.json` files from `dir`, starting at id 0 and stopping
    /// at the first missing file.
    pub fn load_dir(dir: impl AsRef<Path>, board: &BoardGeometry) -> Self {
        let dir = dir.as_ref();
        let mut profiles = Vec::new();
        loop {
            let id = profiles.len();
            let path = dir.join(format!("camera_{id}.json"));
            if !path.is_file() {
                break;
            }
            let entry = match read_json(&path) {
                Ok(v) => v,
                Err(e) => {
                    warn!("{}: {e}; using defaults for camera {id}", path.display());
                    Value::Null
                }
            };
            // lenient mode never returns Err
            match parse_camera(id, &entry, board, false) {
                Ok(p) => profiles.push(p),
                Err(_) => profiles.push(CalibrationProfile::default_for(id, board)),
            }
        }
        if profiles.is_empty() {
            warn!(
                "no camera_<id>.json files in {}, using {DEFAULT_CAMERA_COUNT} default cameras",
                dir.display()
            );
            return Self::defaults(DEFAULT_CAMERA_COUNT, board);
        }
        Self { profiles }
    }

    #[inline]
    pub fn get(&self, camera_id: usize) -> Option<&CalibrationProfile> {
        self.profiles.get(camera_id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalibrationProfile> {
        self.profiles.iter()
    }

    pub fn as_slice(&self) -> &[CalibrationProfile] {
        &self.profiles
    }
}

/// Complete configuration of a rig: board, triangulation, detection tuning
/// and the per-camera profiles.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RigConfig {
    pub board: BoardGeometry,
    pub triangulation: TriangulationParams,
    pub detection: DetectionParams,
    pub cameras: CalibrationStore,
}

impl Default for RigConfig {
    fn default() -> Self {
        let board = BoardGeometry::default();
        Self {
            cameras: CalibrationStore::defaults(DEFAULT_CAMERA_COUNT, &board),
            board,
            triangulation: TriangulationParams::default(),
            detection: DetectionParams::default(),
        }
    }
}

impl RigConfig {
    /// Load a rig file; never fails.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match read_json(path) {
            Ok(root) => match Self::from_value(&root, false) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("{}: {e}; using default configuration", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                warn!("{}: {e}; using default configuration", path.display());
                Self::default()
            }
        }
    }

    /// Load a rig file, failing on unreadable files, malformed JSON and
    /// invalid values. Missing keys still take their defaults.
    pub fn load_strict(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let root = read_json(path.as_ref())?;
        Self::from_value(&root, true)
    }

    /// Load a directory holding an optional `rig.json` (board, triangulation
    /// and detection sections) and one `camera_<id>.json` per camera.
    pub fn load_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let rig_path = dir.join("rig.json");
        let root = if rig_path.is_file() {
            read_json(&rig_path).unwrap_or_else(|e| {
                warn!("{}: {e}; using default sections", rig_path.display());
                Value::Null
            })
        } else {
            Value::Null
        };
        let empty = Map::new();
        let map = root.as_object().unwrap_or(&empty);
        let board: BoardGeometry = section(map, "board");
        Self {
            cameras: CalibrationStore::load_dir(dir, &board),
            triangulation: section(map, "triangulation"),
            detection: section(map, "detection"),
            board,
        }
    }

    /// Parse an in-memory JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, CalibrationError> {
        let root: Value = serde_json::from_str(raw)?;
        Self::from_value(&root, false)
    }

    /// Write this configuration as pretty JSON in the format `load` reads.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    fn from_value(root: &Value, strict: bool) -> Result<Self, CalibrationError> {
        let empty = Map::new();
        let map = match root {
            Value::Object(m) => m,
            _ => {
                if strict {
                    return Err(CalibrationError::Json(serde::de::Error::custom(
                        "rig configuration must be a JSON object",
                    )));
                }
                warn!("rig configuration is not a JSON object, using defaults");
                &empty
            }
        };

        let board: BoardGeometry = strict_section(map, "board", strict)?;
        let triangulation: TriangulationParams = strict_section(map, "triangulation", strict)?;
        let detection: DetectionParams = strict_section(map, "detection", strict)?;

        let cameras = match map.get("cameras") {
            Some(Value::Array(entries)) if !entries.is_empty() => {
                let mut profiles = Vec::with_capacity(entries.len());
                for (id, entry) in entries.iter().enumerate() {
                    profiles.push(parse_camera(id, entry, &board, strict)?);
                }
                CalibrationStore { profiles }
            }
            Some(other) if !other.is_null() && !matches!(other, Value::Array(_)) => {
                if strict {
                    return Err(CalibrationError::Json(serde::de::Error::custom(
                        "`cameras` must be an array",
                    )));
                }
                warn!("`cameras` is not an array, using {DEFAULT_CAMERA_COUNT} default cameras");
                CalibrationStore::defaults(DEFAULT_CAMERA_COUNT, &board)
            }
            _ => {
                warn!("no camera entries, using {DEFAULT_CAMERA_COUNT} default cameras");
                CalibrationStore::defaults(DEFAULT_CAMERA_COUNT, &board)
            }
        };

        Ok(Self {
            board,
            triangulation,
            detection,
            cameras,
        })
    }
}

fn read_json(path: &Path) -> Result<Value, CalibrationError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn section<T: DeserializeOwned + Default>(map: &Map<String, Value>, key: &str) -> T {
    // lenient mode never returns Err
    strict_section(map, key, false).unwrap_or_default()
}

fn strict_section<T: DeserializeOwned + Default>(
    map: &Map<String, Value>,
    key: &str,
    strict: bool,
) -> Result<T, CalibrationError> {
    match map.get(key) {
        None | Some(Value::Null) => {
            debug!("no `{key}` section, using defaults");
            Ok(T::default())
        }
        Some(v) => match T::deserialize(v) {
            Ok(t) => Ok(t),
            Err(e) if strict => Err(CalibrationError::Json(e)),
            Err(e) => {
                warn!("invalid `{key}` section ({e}), using defaults");
                Ok(T::default())
            }
        },
    }
}

/// Key-by-key reader for one camera entry.
struct EntryReader<'a> {
    camera: usize,
    map: &'a Map<String, Value>,
    strict: bool,
}

impl EntryReader<'_> {
    fn required<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, CalibrationError> {
        match self.map.get(key) {
            None | Some(Value::Null) => {
                warn!("camera {}: missing `{key}`, using default", self.camera);
                Ok(default)
            }
            Some(v) => match T::deserialize(v) {
                Ok(t) => Ok(t),
                Err(e) => self.invalid(key, &e.to_string(), default),
            },
        }
    }

    fn optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CalibrationError> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => match T::deserialize(v) {
                Ok(t) => Ok(Some(t)),
                Err(e) => self.invalid(key, &e.to_string(), None),
            },
        }
    }

    fn invalid<T>(&self, key: &str, reason: &str, default: T) -> Result<T, CalibrationError> {
        if self.strict {
            return Err(CalibrationError::InvalidCamera {
                camera: self.camera,
                reason: format!("`{key}`: {reason}"),
            });
        }
        warn!(
            "camera {}: invalid `{key}` ({reason}), using default",
            self.camera
        );
        Ok(default)
    }
}

fn parse_camera(
    id: usize,
    entry: &Value,
    board: &BoardGeometry,
    strict: bool,
) -> Result<CalibrationProfile, CalibrationError> {
    let defaults = CalibrationProfile::default_for(id, board);
    let map = match entry {
        Value::Object(m) => m,
        _ => {
            if strict {
                return Err(CalibrationError::InvalidCamera {
                    camera: id,
                    reason: "entry is not a JSON object".into(),
                });
            }
            warn!("camera {id}: no usable entry, using defaults");
            return Ok(defaults);
        }
    };
    let r = EntryReader {
        camera: id,
        map,
        strict,
    };

    if let Some(declared) = r.optional::<usize>("camera_id")? {
        if declared != id {
            warn!("camera entry {id} declares camera_id {declared}; entries are positional");
        }
    }

    let binary_threshold = r.required("threshold", defaults.binary_threshold)?;

    let mut roi = r.required("roi", defaults.roi)?;
    if roi.is_empty() {
        roi = r.invalid("roi", "zero width or height", defaults.roi)?;
    }

    let surface_line_y = r.required("surface_y", defaults.surface_line_y)?;

    let mut distance = r.required("camera_distance_mm", defaults.camera_distance_mm)?;
    if !(distance.is_finite() && distance > board.board_radius_mm) {
        distance = r.invalid(
            "camera_distance_mm",
            "must exceed the board radius",
            defaults.camera_distance_mm,
        )?;
    }

    let mut placement = r.required("placement_angle_deg", defaults.placement_angle_deg)?;
    if !placement.is_finite() {
        placement = r.invalid(
            "placement_angle_deg",
            "not finite",
            defaults.placement_angle_deg,
        )?;
    }

    let mut pixel_bounds = r.required("pixel_bounds", defaults.pixel_bounds)?;
    if !pixel_bounds.is_valid() {
        pixel_bounds = r.invalid("pixel_bounds", "need lo < hi", defaults.pixel_bounds)?;
    }

    let critical_angle_deg = match r.optional::<f64>("critical_angle_deg")? {
        Some(a) if a.is_finite() && a > 0.0 && a < 90.0 => a,
        Some(_) => r.invalid(
            "critical_angle_deg",
            "must be in (0, 90)",
            critical_angle_deg(board, distance),
        )?,
        None => critical_angle_deg(board, distance),
    };

    let board_plane_location = match r.optional::<Point2<f64>>("board_plane_location_mm")? {
        Some(p) if p.x.is_finite() && p.y.is_finite() => p,
        Some(_) => r.invalid(
            "board_plane_location_mm",
            "not finite",
            location_from_polar(distance, placement),
        )?,
        None => location_from_polar(distance, placement),
    };

    Ok(CalibrationProfile {
        camera_id: id,
        binary_threshold,
        roi,
        surface_line_y,
        camera_distance_mm: distance,
        placement_angle_deg: placement,
        critical_angle_deg,
        board_plane_location,
        pixel_bounds,
    })
}
