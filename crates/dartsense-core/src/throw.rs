//! Scored throw records handed to the game-state consumer.

use chrono::{DateTime, Local, SubsecRound};
use serde::{Deserialize, Serialize};

use crate::board::Score;
use crate::triangulation::ResolvedDart;

/// One resolved dart. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Throw {
    timestamp: DateTime<Local>,
    score: u8,
    multiplier: u8,
    r: f64,
    theta: f64,
    dart_in_turn: u8,
    x: f64,
    y: f64,
}

impl Throw {
    /// Build a throw stamped with the current wall-clock second.
    pub fn from_resolved(dart: &ResolvedDart) -> Self {
        Self::at(dart, Local::now())
    }

    /// Build a throw with an explicit timestamp; sub-second precision is
    /// dropped.
    pub fn at(dart: &ResolvedDart, timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(0),
            score: dart.score.value,
            multiplier: dart.score.multiplier,
            r: dart.impact.r,
            theta: dart.impact.theta_deg,
            dart_in_turn: dart.dart_in_turn,
            x: dart.impact.position.x,
            y: dart.impact.position.y,
        }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Segment value; 25 for the bull, 0 for a miss.
    pub fn score(&self) -> u8 {
        self.score
    }

    /// 0 for a miss, otherwise 1..=3.
    pub fn multiplier(&self) -> u8 {
        self.multiplier
    }

    pub fn as_score(&self) -> Score {
        Score::new(self.score, self.multiplier)
    }

    /// Distance from the bullseye, mm.
    pub fn r(&self) -> f64 {
        self.r
    }

    /// Polar angle of the impact, degrees.
    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn dart_in_turn(&self) -> u8 {
        self.dart_in_turn
    }

    /// Board-plane position, mm.
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl std::fmt::Display for Throw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} dart {}: {} ({} pts) r={:.1}mm theta={:.1}deg",
            self.timestamp.format("%H:%M:%S"),
            self.dart_in_turn,
            self.as_score(),
            self.as_score().total(),
            self.r,
            self.theta
        )
    }
}
