// THEORY:
// The `deduplicator` module is the memory of the shot detector. A laser pulse
// usually stays lit across one to three camera frames, and every one of those
// frames produces a `ShotCandidate`. This module stitches those per-frame
// snapshots together so that one pulse becomes exactly one `Shot`.
//
// Key architectural principles:
// 1.  **Object Persistence**: a `TrackedFlash` represents one pulse *over time*.
//     It keeps the centroid, frame and timestamp of its first sighting, because
//     that is when and where the trigger was pulled. Later sightings only
//     extend its duration.
// 2.  **Data Association**: each open track takes the nearest unclaimed
//     candidate of the same color within `radius` of where it was last seen.
//     Tracks are matched in birth order, so older pulses win ties.
// 3.  **Lifecycle Management**:
//     - **Birth**: an unmatched candidate opens a new track.
//     - **Continuation**: a match resets the quiet counter.
//     - **Finalization**: a track unseen for `window` frames becomes a `Shot`.
// 4.  **Ordered Release**: a finalized shot is held back while any open track
//     started before it. Released shots therefore never go back in time, even
//     when a long pulse finishes after a short one that began later.
// 5.  **Rate Limit**: with a minimum shot interval, a shot too close in time to
//     the previously released one is dropped.

use crate::core_modules::shot::{Shot, ShotColor};
use crate::core_modules::shot_candidate::ShotCandidate;
use std::collections::HashSet;
use std::time::Duration;

/// One flash followed across consecutive frames.
#[derive(Debug, Clone)]
pub struct TrackedFlash {
    /// Birth order within the deduplicator.
    pub id: u64,
    /// The candidate that opened the track.
    pub first: ShotCandidate,
    /// Centroid of the most recent sighting.
    pub last_position: (f64, f64),
    pub last_seen_frame: u64,
    /// Frames in which the flash was actually seen.
    pub sightings: u32,
}

impl TrackedFlash {
    fn new(id: u64, candidate: ShotCandidate) -> Self {
        Self {
            id,
            last_position: (candidate.x, candidate.y),
            last_seen_frame: candidate.frame_index,
            sightings: 1,
            first: candidate,
        }
    }

    fn color(&self) -> ShotColor {
        self.first.color
    }

    fn extend(&mut self, candidate: &ShotCandidate) {
        self.last_position = (candidate.x, candidate.y);
        self.last_seen_frame = candidate.frame_index;
        self.sightings += 1;
    }

    /// Frames spanned from first to last sighting, gaps included.
    pub fn duration_frames(&self) -> u32 {
        (self.last_seen_frame - self.first.frame_index + 1) as u32
    }

    fn distance_to(&self, candidate: &ShotCandidate) -> f64 {
        candidate.distance_to(self.last_position.0, self.last_position.1)
    }

    fn into_shot(self, marker_radius: u32) -> Shot {
        Shot {
            duration_frames: self.duration_frames(),
            x: self.first.x,
            y: self.first.y,
            color: self.first.color,
            frame_index: self.first.frame_index,
            timestamp: self.first.timestamp,
            marker_radius,
        }
    }
}

/// Collapses multi-frame flashes into single shots.
#[derive(Debug)]
pub struct Deduplicator {
    radius: f64,
    window: u64,
    min_shot_interval: Duration,
    marker_radius: u32,
    tracks: Vec<TrackedFlash>,
    /// Finalized shots waiting for every earlier track to close, keyed by track id.
    held: Vec<(u64, Shot)>,
    last_released: Option<Duration>,
    next_id: u64,
}

impl Deduplicator {
    pub fn new(radius: f64, window: u64, min_shot_interval: Duration, marker_radius: u32) -> Self {
        Self {
            radius,
            window: window.max(1),
            min_shot_interval,
            marker_radius,
            tracks: Vec::new(),
            held: Vec::new(),
            last_released: None,
            next_id: 0,
        }
    }

    /// Flashes still open.
    pub fn active_tracks(&self) -> &[TrackedFlash] {
        &self.tracks
    }

    /// Feeds one frame's candidates and returns the shots released by it.
    pub fn observe(&mut self, frame_index: u64, candidates: Vec<ShotCandidate>) -> Vec<Shot> {
        let mut claimed: HashSet<usize> = HashSet::new();

        // --- 1. Matching ---
        for track in self.tracks.iter_mut() {
            if frame_index.saturating_sub(track.last_seen_frame) > self.window {
                continue;
            }
            let mut best: Option<(usize, f64)> = None;
            for (j, candidate) in candidates.iter().enumerate() {
                if claimed.contains(&j) || candidate.color != track.color() {
                    continue;
                }
                let distance = track.distance_to(candidate);
                if distance <= self.radius && best.is_none_or(|(_, d)| distance < d) {
                    best = Some((j, distance));
                }
            }
            if let Some((j, _)) = best {
                track.extend(&candidates[j]);
                claimed.insert(j);
            }
        }

        // --- 2. Birth ---
        for (j, candidate) in candidates.into_iter().enumerate() {
            if !claimed.contains(&j) {
                log::trace!(
                    "flash {} opened at ({:.1}, {:.1}) frame {}",
                    self.next_id,
                    candidate.x,
                    candidate.y,
                    candidate.frame_index
                );
                self.tracks.push(TrackedFlash::new(self.next_id, candidate));
                self.next_id += 1;
            }
        }

        // --- 3. Finalization ---
        let window = self.window;
        let (quiet, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tracks)
            .into_iter()
            .partition(|t| frame_index.saturating_sub(t.last_seen_frame) >= window);
        self.tracks = open;
        for track in quiet {
            self.hold(track);
        }

        self.release(false)
    }

    /// Finalizes every open track, e.g. at the end of a recorded source.
    pub fn flush(&mut self) -> Vec<Shot> {
        for track in std::mem::take(&mut self.tracks) {
            self.hold(track);
        }
        self.release(true)
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.held.clear();
        self.last_released = None;
        self.next_id = 0;
    }

    fn hold(&mut self, track: TrackedFlash) {
        let id = track.id;
        self.held.push((id, track.into_shot(self.marker_radius)));
    }

    fn release(&mut self, everything: bool) -> Vec<Shot> {
        self.held
            .sort_by(|(a_id, a), (b_id, b)| (a.frame_index, a_id).cmp(&(b.frame_index, b_id)));

        let horizon = if everything {
            None
        } else {
            self.tracks.iter().map(|t| t.first.frame_index).min()
        };
        let split = self
            .held
            .iter()
            .position(|(_, shot)| horizon.is_some_and(|h| shot.frame_index > h))
            .unwrap_or(self.held.len());

        let mut released = Vec::with_capacity(split);
        for (_, shot) in self.held.drain(..split) {
            if let Some(previous) = self.last_released {
                if !self.min_shot_interval.is_zero()
                    && shot.timestamp.saturating_sub(previous) < self.min_shot_interval
                {
                    log::debug!("suppressed {shot}: inside the minimum shot interval");
                    continue;
                }
            }
            self.last_released = Some(shot.timestamp);
            released.push(shot);
        }
        released
    }
}
