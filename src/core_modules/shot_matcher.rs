// THEORY:
// The `shot_matcher` is the oracle for recorded-session checks. A recording is
// annotated with the shots that *must* be found (required) and the places where
// a detection is tolerated but not demanded (optional: reflections, a pacing
// person). A detector run passes when:
// 1.  every required expectation is matched by exactly one detected shot, and
// 2.  every detected shot not used by a required expectation is covered by an
//     optional one.
//
// Matching is greedy nearest-first inside a pixel tolerance, so two detections
// can never both claim the same required expectation.

use crate::core_modules::shot::{Shot, ShotColor};
use std::fmt;

/// Where a shot is expected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpectedShot {
    pub color: ShotColor,
    pub x: f64,
    pub y: f64,
}

impl ExpectedShot {
    pub fn new(color: ShotColor, x: f64, y: f64) -> Self {
        Self { color, x, y }
    }

    fn accepts(&self, shot: &Shot, tolerance: f64, check_color: bool) -> Option<f64> {
        if check_color && shot.color != self.color {
            return None;
        }
        let distance = shot.distance_to(self.x, self.y);
        (distance <= tolerance).then_some(distance)
    }
}

/// What did not line up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchReport {
    pub missing: Vec<ExpectedShot>,
    pub unexpected: Vec<Shot>,
}

impl MatchReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

impl fmt::Display for MatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for expected in &self.missing {
            writeln!(
                f,
                "missing {} shot near ({:.1}, {:.1})",
                expected.color, expected.x, expected.y
            )?;
        }
        for shot in &self.unexpected {
            writeln!(f, "unexpected {shot}")?;
        }
        Ok(())
    }
}

/// Matches `detected` against required and optional expectations.
pub fn match_shots(
    detected: &[Shot],
    required: &[ExpectedShot],
    optional: &[ExpectedShot],
    tolerance: f64,
    check_color: bool,
) -> MatchReport {
    let mut used = vec![false; detected.len()];
    let mut report = MatchReport::default();

    for expected in required {
        let best = detected
            .iter()
            .enumerate()
            .filter(|(i, _)| !used[*i])
            .filter_map(|(i, shot)| {
                expected
                    .accepts(shot, tolerance, check_color)
                    .map(|d| (i, d))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));
        match best {
            Some((i, _)) => used[i] = true,
            None => report.missing.push(*expected),
        }
    }

    for (shot, _) in detected.iter().zip(&used).filter(|(_, used)| !**used) {
        let covered = optional
            .iter()
            .any(|expected| expected.accepts(shot, tolerance, check_color).is_some());
        if !covered {
            report.unexpected.push(shot.clone());
        }
    }

    report
}
