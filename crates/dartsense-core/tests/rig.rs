use approx::assert_relative_eq;
use dartsense_core::{
    BoardGeometry, CycleSnapshot, PixelReading, RigConfig, Score, Throw, TriangulationEngine,
};
use nalgebra::Point2;

fn engine_from(cfg: &RigConfig) -> TriangulationEngine {
    TriangulationEngine::new(cfg.board, cfg.triangulation.clone(), &cfg.cameras)
}

#[test]
fn config_file_drives_triangulation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rig.json");
    std::fs::write(
        &path,
        r#"{
            "triangulation": { "radial_correction": 1.0 },
            "cameras": [
                { "camera_id": 0, "pixel_bounds": [100, 500] },
                { "camera_id": 1 },
                { "camera_id": 2, "pixel_bounds": [100, 500] },
                { "camera_id": 3 }
            ]
        }"#,
    )
    .expect("write config");

    let cfg = RigConfig::load(&path);
    let mut engine = engine_from(&cfg);

    // column 300 is the middle of [100, 500]
    let snapshot = CycleSnapshot::new(vec![
        Some(PixelReading::new(300.0, 310.0)),
        None,
        Some(PixelReading::new(300.0, 305.0)),
        None,
    ]);
    let dart = engine.resolve(&snapshot).expect("two lines meet");
    assert_relative_eq!(dart.impact.r, 0.0, epsilon = 1e-9);
    assert_eq!(dart.score, Score::new(25, 2));

    let throw = Throw::from_resolved(&dart);
    assert_eq!(throw.score(), 25);
    assert_eq!(throw.multiplier(), 2);
    assert_eq!(throw.dart_in_turn(), 1);
}

#[test]
fn single_reading_never_produces_a_throw() {
    let cfg = RigConfig::default();
    let mut engine = engine_from(&cfg);
    for cam in 0..cfg.cameras.len() {
        let mut readings = vec![None; cfg.cameras.len()];
        readings[cam] = Some(PixelReading::new(320.0, 300.0));
        assert!(engine.resolve(&CycleSnapshot::new(readings)).is_none());
    }
    assert_eq!(engine.turn().darts_thrown(), 0);
}

#[test]
fn out_of_range_pixels_are_clamped() {
    let cfg = RigConfig::default();
    let engine = engine_from(&cfg);
    let board = BoardGeometry::default();
    let past_edge = [
        Some(PixelReading::new(-80.0, 0.0)),
        Some(PixelReading::new(320.0, 0.0)),
        None,
        None,
    ];
    let at_edge = [
        Some(PixelReading::new(0.0, 0.0)),
        Some(PixelReading::new(320.0, 0.0)),
        None,
        None,
    ];
    let a = engine.locate(&past_edge).map(|i| i.position);
    let b = engine.locate(&at_edge).map(|i| i.position);
    assert_eq!(a, b);
    if let Some(p) = a {
        let raw = Point2::from(p.coords / cfg.triangulation.radial_correction);
        assert!(board.contains(raw));
    }
}

#[test]
fn store_loaders_differ_on_bad_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rig.json");
    std::fs::write(
        &path,
        r#"{ "cameras": [ { "camera_id": 0, "camera_distance_mm": -3 }, { "camera_id": 1 } ] }"#,
    )
    .expect("write config");

    let lenient = dartsense_core::CalibrationStore::load(&path);
    assert_eq!(lenient.len(), 2);
    assert!(lenient.get(0).expect("camera 0").camera_distance_mm > 0.0);
    let strict = dartsense_core::CalibrationStore::load_strict(&path);
    assert!(strict.is_err());
}
