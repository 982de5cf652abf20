use std::time::Duration;

use approx::assert_relative_eq;
use dartsense::core::PixelBounds;
use dartsense::vision::{CaptureError, MotionState};
use dartsense::{
    BoardGeometry, CalibrationProfile, CalibrationStore, Coordinator, CycleOutcome, DartSession,
    DetectionParams, FrameSource, RigConfig, Score, ScriptedSource, ShutdownToken,
};
use image::{GrayImage, Luma};

const W: u32 = 640;
const H: u32 = 480;

fn background() -> GrayImage {
    GrayImage::new(W, H)
}

/// Vertical bar centred on column 319.5 once the mask is dilated.
fn dart_frame() -> GrayImage {
    GrayImage::from_fn(W, H, |x, y| {
        let on = (317..323).contains(&x) && (270..330).contains(&y);
        Luma([if on { 255 } else { 0 }])
    })
}

/// Motion without a qualifying contour: small square specks only.
fn speck_frame() -> GrayImage {
    GrayImage::from_fn(W, H, |x, y| {
        let on = (0..4).any(|i| {
            let x0 = 100 + 20 * i;
            (x0..x0 + 3).contains(&x) && (290..293).contains(&y)
        });
        Luma([if on { 255 } else { 0 }])
    })
}

fn takeout_frame() -> GrayImage {
    GrayImage::from_pixel(W, H, Luma([255]))
}

/// Stock four-camera rig whose bounds map the bar column to the centre of
/// every camera's view, so any two viewing lines meet at the bullseye.
fn rig() -> RigConfig {
    let board = BoardGeometry::default();
    let cameras = (0..4)
        .map(|id| {
            let mut p = CalibrationProfile::default_for(id, &board);
            p.pixel_bounds = PixelBounds::new(-0.5, 639.5);
            p
        })
        .collect();
    let mut detection = DetectionParams {
        min_threshold: 50,
        max_threshold: 20_000,
        blur_sigma: 0.0,
        reference_refresh_cycles: 0,
        ..DetectionParams::default()
    }
    .with_zero_delays();
    detection.worker_threads = Some(2);
    RigConfig {
        board,
        cameras: CalibrationStore::new(cameras),
        detection,
        ..RigConfig::default()
    }
}

/// Two background frames (prime and warm-up), then `after` forever.
fn scripted(id: usize, after: GrayImage) -> Box<dyn FrameSource> {
    Box::new(ScriptedSource::new(id, [background(), background(), after]))
}

fn coordinator(after: [GrayImage; 4]) -> Coordinator {
    let sources = after
        .into_iter()
        .enumerate()
        .map(|(id, f)| scripted(id, f))
        .collect();
    let mut c = Coordinator::new(&rig(), sources).expect("coordinator");
    c.prime().expect("prime");
    assert!(c.stabilize(&ShutdownToken::new()));
    c
}

#[test]
fn still_dart_seen_by_all_cameras_scores_double_bull() {
    let mut c = coordinator([dart_frame(), dart_frame(), dart_frame(), dart_frame()]);
    let token = ShutdownToken::new();
    assert!(c.status().is_ready());

    assert_eq!(
        c.poll_cycle(&token),
        CycleOutcome::Motion { first_camera: 0 }
    );
    assert_eq!(c.poll_cycle(&token), CycleOutcome::Idle);
    let CycleOutcome::Resolved(throw) = c.poll_cycle(&token) else {
        panic!("expected a throw on the third cycle");
    };
    assert_eq!(throw.as_score(), Score::new(25, 2));
    assert_eq!(throw.dart_in_turn(), 1);
    assert_relative_eq!(throw.r(), 0.0, epsilon = 1e-6);

    assert_eq!(c.status().throws_emitted(), 1);
    assert!(c.cameras().iter().all(|d| !d.has_history()));
    assert_eq!(c.engine().turn().darts_thrown(), 1);

    // the dart is now part of the background
    assert_eq!(c.poll_cycle(&token), CycleOutcome::Idle);
}

#[test]
fn two_resolving_cameras_are_enough() {
    let mut c = coordinator([dart_frame(), speck_frame(), dart_frame(), background()]);
    let token = ShutdownToken::new();
    assert!(matches!(c.poll_cycle(&token), CycleOutcome::Motion { .. }));
    assert_eq!(c.poll_cycle(&token), CycleOutcome::Idle);
    let outcome = c.poll_cycle(&token);
    let CycleOutcome::Resolved(throw) = outcome else {
        panic!("expected a throw, got {outcome:?}");
    };
    assert_eq!(throw.as_score(), Score::new(25, 2));
}

#[test]
fn single_resolving_camera_yields_no_detection() {
    let mut c = coordinator([dart_frame(), speck_frame(), speck_frame(), background()]);
    let token = ShutdownToken::new();
    assert!(matches!(c.poll_cycle(&token), CycleOutcome::Motion { .. }));
    assert_eq!(c.poll_cycle(&token), CycleOutcome::Idle);
    assert_eq!(
        c.poll_cycle(&token),
        CycleOutcome::NoDetection { resolved: 1 }
    );
    assert!(c.cameras().iter().all(|d| d.state() == MotionState::Idle));
    assert_eq!(c.status().throws_emitted(), 0);
    assert_eq!(c.engine().turn().darts_thrown(), 0);
}

/// Replays queued capture results, then repeats the last good frame.
struct DroppingSource {
    camera_id: usize,
    results: Vec<Result<GrayImage, CaptureError>>,
    last: GrayImage,
}

impl FrameSource for DroppingSource {
    fn camera_id(&self) -> usize {
        self.camera_id
    }

    fn capture(&mut self) -> Result<GrayImage, CaptureError> {
        if self.results.is_empty() {
            return Ok(self.last.clone());
        }
        let next = self.results.remove(0);
        if let Ok(frame) = &next {
            self.last = frame.clone();
        }
        next
    }
}

#[test]
fn dropped_capture_delays_but_does_not_lose_the_throw() {
    let sources = (0..4)
        .map(|id| {
            if id != 3 {
                return scripted(id, dart_frame());
            }
            let src = DroppingSource {
                camera_id: id,
                results: vec![
                    Ok(background()),
                    Ok(background()),
                    Ok(dart_frame()),
                    Err(CaptureError::Unavailable("frame grab timed out".to_string())),
                ],
                last: background(),
            };
            Box::new(src) as Box<dyn FrameSource>
        })
        .collect();
    let mut c = Coordinator::new(&rig(), sources).expect("coordinator");
    c.prime().expect("prime");
    assert!(c.stabilize(&ShutdownToken::new()));
    let token = ShutdownToken::new();

    assert_eq!(
        c.poll_cycle(&token),
        CycleOutcome::Motion { first_camera: 0 }
    );
    // camera 3 skips this cycle and keeps its armed state
    assert_eq!(c.poll_cycle(&token), CycleOutcome::Idle);
    let stills: Vec<u32> = c.cameras().iter().map(|d| d.still_frames()).collect();
    assert_eq!(stills, vec![1, 1, 1, 0]);
    assert_eq!(c.cameras()[3].state(), MotionState::Armed);
    assert_eq!(c.cameras()[3].history().len(), 1);

    // the lagging camera holds back stability for one more cycle
    assert_eq!(c.poll_cycle(&token), CycleOutcome::Idle);
    let outcome = c.poll_cycle(&token);
    let CycleOutcome::Resolved(throw) = outcome else {
        panic!("expected a throw, got {outcome:?}");
    };
    assert_eq!(throw.as_score(), Score::new(25, 2));
    assert_eq!(c.status().throws_emitted(), 1);
}

#[test]
fn motion_priority_follows_first_moving_camera() {
    let mut c = coordinator([background(), background(), dart_frame(), dart_frame()]);
    let token = ShutdownToken::new();
    assert_eq!(
        c.poll_cycle(&token),
        CycleOutcome::Motion { first_camera: 2 }
    );
    assert_eq!(c.priority(), 2);
}

#[test]
fn takeout_resets_every_camera_and_starts_a_new_turn() {
    let sources = (0..4)
        .map(|id| {
            let mut frames = vec![background(), background(), dart_frame()];
            if id == 1 {
                frames.extend([dart_frame(), dart_frame(), takeout_frame()]);
            }
            Box::new(ScriptedSource::new(id, frames)) as Box<dyn FrameSource>
        })
        .collect();
    let mut c = Coordinator::new(&rig(), sources).expect("coordinator");
    let token = ShutdownToken::new();
    c.prime().expect("prime");
    assert!(c.stabilize(&token));

    c.poll_cycle(&token);
    c.poll_cycle(&token);
    assert!(matches!(c.poll_cycle(&token), CycleOutcome::Resolved(_)));
    assert_eq!(c.engine().turn().darts_thrown(), 1);

    assert_eq!(
        c.poll_cycle(&token),
        CycleOutcome::Takeout { trigger_camera: 1 }
    );
    assert!(!c.status().takeout_in_progress());
    assert!(c.status().is_ready());
    assert_eq!(c.engine().turn().darts_thrown(), 0);
    for d in c.cameras() {
        assert_eq!(d.state(), MotionState::Idle);
        assert!(!d.has_history());
        assert_eq!(d.false_triggers(), 0);
    }
    // the settle frame became the reference, so the white frame is background now
    assert_eq!(c.poll_cycle(&token), CycleOutcome::Idle);
}

#[test]
fn finite_sources_end_the_loop() {
    let sources: Vec<Box<dyn FrameSource>> = (0..4)
        .map(|id| {
            let frames = [background(), background(), background()];
            Box::new(ScriptedSource::finite(id, frames)) as Box<dyn FrameSource>
        })
        .collect();
    let mut c = Coordinator::new(&rig(), sources).expect("coordinator");
    c.prime().expect("prime");
    assert_eq!(c.run(&ShutdownToken::new()), 0);
    assert!(c.cameras().iter().all(|d| d.is_exhausted()));
    assert!(!c.status().is_ready());
}

#[test]
fn cancelled_token_stops_the_cycle() {
    let mut c = coordinator([dart_frame(), dart_frame(), dart_frame(), dart_frame()]);
    let token = ShutdownToken::new();
    token.cancel();
    assert_eq!(c.poll_cycle(&token), CycleOutcome::Cancelled);
}

#[test]
fn source_count_must_match_calibration() {
    let sources = vec![scripted(0, background())];
    let err = Coordinator::new(&rig(), sources).unwrap_err();
    assert!(err.to_string().contains("1 frame sources for 4"), "{err}");
    assert!(Coordinator::new(&rig(), Vec::new()).is_err());
}

#[test]
fn silent_camera_fails_at_startup() {
    let mut sources: Vec<Box<dyn FrameSource>> =
        (0..3).map(|id| scripted(id, background())).collect();
    sources.push(Box::new(ScriptedSource::new(3, Vec::<GrayImage>::new())));
    let err = DartSession::start(&rig(), sources).unwrap_err();
    assert!(err.to_string().contains("camera 3"), "{err}");
}

#[test]
fn session_delivers_throws_to_the_consumer() {
    let sources = (0..4).map(|id| scripted(id, dart_frame())).collect();
    let mut session = DartSession::start(&rig(), sources).expect("session");

    let throw = session
        .wait_throw(Duration::from_secs(10))
        .expect("a throw within the timeout");
    assert_eq!(throw.score(), 25);
    assert_eq!(throw.multiplier(), 2);
    assert!(session.next_throw().is_none());

    assert_eq!(session.stop(), Some(1));
    assert!(!session.is_running());
    assert_eq!(session.status().throws_emitted(), 1);
    assert!(session.stop().is_none());
}
