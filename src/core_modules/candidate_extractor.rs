// THEORY:
// The `CandidateExtractor` is the engine of the spatial grouping layer. It turns
// the per-pixel `CandidateMap` from the background model into a short list of
// `ShotCandidate`s, one per plausible laser flash in the frame.
//
// Algorithm steps:
// 1.  **Connected components**: a row-major scan seeds a flood fill at every
//     unvisited candidate pixel. The fill uses 8-connectivity because a flash's
//     halo is often only diagonally connected to its core.
// 2.  **Aggregation**: while filling, each cluster accumulates its pixel count,
//     bounding box, brightness-weighted coordinate sums and red/green energy.
// 3.  **Heuristics**: clusters that are too small (sensor noise), too large (a
//     hand or a person moving through the view) or too elongated for a round
//     spot are rejected.
// 4.  **Color**: red and green energy are compared with a relative margin. A
//     cluster that neither color wins is `Unknown`.
// 5.  **Containment**: a centroid in a disabled sector, or outside the
//     calibrated projection area when that is requested, is dropped.
//
// Stateless: `find_candidates` sees exactly one frame.

use crate::config::CalibrationBounds;
use crate::core_modules::background::CandidateMap;
use crate::core_modules::sector_grid::SectorMask;
use crate::core_modules::shot::{LaserColor, ShotColor};
use crate::core_modules::shot_candidate::{Point, ShotCandidate};
use std::time::Duration;

/// Size, shape and color rules for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractorParams {
    pub min_blob_pixels: usize,
    pub max_blob_pixels: usize,
    pub max_aspect_ratio: f64,
    pub color_margin: f64,
    pub report_unknown_color: bool,
    pub ignore_laser_color: Option<LaserColor>,
    pub calibration: Option<CalibrationBounds>,
}

/// Why a cluster did not become a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooSmall,
    TooLarge,
    Elongated,
    UnknownColor,
    IgnoredColor,
    DisabledSector,
    OutsideCalibration,
}

/// Red wins when its energy exceeds green's by `margin` (relative), and vice versa.
pub fn classify_color(red_energy: f64, green_energy: f64, margin: f64) -> ShotColor {
    if red_energy > green_energy * (1.0 + margin) {
        ShotColor::Red
    } else if green_energy > red_energy * (1.0 + margin) {
        ShotColor::Green
    } else {
        ShotColor::Unknown
    }
}

pub mod candidate_extractor {
    use super::*;

    /// Running totals for one connected cluster.
    struct Cluster {
        pixel_count: usize,
        min: Point,
        max: Point,
        weight: f64,
        weighted_x: f64,
        weighted_y: f64,
        red_energy: f64,
        green_energy: f64,
    }

    impl Cluster {
        fn new(seed: Point) -> Self {
            Self {
                pixel_count: 0,
                min: seed,
                max: seed,
                weight: 0.0,
                weighted_x: 0.0,
                weighted_y: 0.0,
                red_energy: 0.0,
                green_energy: 0.0,
            }
        }
    }

    /// Finds every flash candidate in `map`, in row-major order of first pixel.
    pub fn find_candidates(
        map: &CandidateMap,
        frame_index: u64,
        timestamp: Duration,
        sectors: &SectorMask,
        params: &ExtractorParams,
    ) -> Vec<ShotCandidate> {
        let (width, height) = (map.width(), map.height());
        let mut candidates = Vec::new();
        if map.is_empty() {
            return candidates;
        }

        let mut visited = vec![false; width as usize * height as usize];
        let mut next_id = 0;

        for y in 0..height {
            for x in 0..width {
                let index = (y * width + x) as usize;
                if visited[index] || map.get(x, y).is_none() {
                    continue;
                }
                let cluster = grow_cluster(map, Point { x, y }, &mut visited);
                let context = (frame_index, timestamp, next_id);
                match judge(cluster, context, width, height, sectors, params) {
                    Ok(candidate) => {
                        candidates.push(candidate);
                        next_id += 1;
                    }
                    Err((rejection, cx, cy, pixels)) => {
                        log::trace!(
                            "frame {frame_index}: rejected {pixels}-pixel cluster at ({cx:.1}, {cy:.1}): {rejection:?}"
                        );
                    }
                }
            }
        }

        candidates
    }

    /// Depth-first flood fill over 8-connected candidate pixels.
    fn grow_cluster(map: &CandidateMap, seed: Point, visited: &mut [bool]) -> Cluster {
        let (width, height) = (map.width() as i64, map.height() as i64);
        let mut cluster = Cluster::new(seed);
        let mut stack = vec![seed];
        visited[(seed.y as i64 * width + seed.x as i64) as usize] = true;

        while let Some(current) = stack.pop() {
            if let Some(deviation) = map.get(current.x, current.y) {
                let weight = deviation.brightness.max(f32::EPSILON) as f64;
                cluster.pixel_count += 1;
                cluster.weight += weight;
                cluster.weighted_x += current.x as f64 * weight;
                cluster.weighted_y += current.y as f64 * weight;
                cluster.red_energy += deviation.red_energy as f64;
                cluster.green_energy += deviation.green_energy as f64;
                cluster.min.x = cluster.min.x.min(current.x);
                cluster.min.y = cluster.min.y.min(current.y);
                cluster.max.x = cluster.max.x.max(current.x);
                cluster.max.y = cluster.max.y.max(current.y);
            }

            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = current.x as i64 + dx;
                    let ny = current.y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= width || ny >= height {
                        continue;
                    }
                    let index = (ny * width + nx) as usize;
                    if !visited[index] && map.get(nx as u32, ny as u32).is_some() {
                        visited[index] = true;
                        stack.push(Point {
                            x: nx as u32,
                            y: ny as u32,
                        });
                    }
                }
            }
        }

        cluster
    }

    type Judged = Result<ShotCandidate, (Rejection, f64, f64, usize)>;

    fn judge(
        cluster: Cluster,
        (frame_index, timestamp, id): (u64, Duration, u64),
        width: u32,
        height: u32,
        sectors: &SectorMask,
        params: &ExtractorParams,
    ) -> Judged {
        let cx = cluster.weighted_x / cluster.weight;
        let cy = cluster.weighted_y / cluster.weight;
        let reject = |rejection| Err((rejection, cx, cy, cluster.pixel_count));

        if cluster.pixel_count < params.min_blob_pixels {
            return reject(Rejection::TooSmall);
        }
        if cluster.pixel_count > params.max_blob_pixels {
            return reject(Rejection::TooLarge);
        }
        let color = classify_color(cluster.red_energy, cluster.green_energy, params.color_margin);
        let candidate = ShotCandidate {
            id,
            x: cx,
            y: cy,
            pixel_count: cluster.pixel_count,
            bounding_box: (cluster.min, cluster.max),
            color,
            red_energy: cluster.red_energy,
            green_energy: cluster.green_energy,
            frame_index,
            timestamp,
        };
        if candidate.aspect_ratio() > params.max_aspect_ratio {
            return reject(Rejection::Elongated);
        }

        if color == ShotColor::Unknown && !params.report_unknown_color {
            return reject(Rejection::UnknownColor);
        }
        if let (Some(ignored), Some(laser)) = (params.ignore_laser_color, color.laser()) {
            if ignored == laser {
                return reject(Rejection::IgnoredColor);
            }
        }
        if !sectors.admits(cx, cy, width, height) {
            return reject(Rejection::DisabledSector);
        }
        if let Some(bounds) = &params.calibration {
            if !bounds.admits(cx, cy) {
                return reject(Rejection::OutsideCalibration);
            }
        }

        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::candidate_extractor::find_candidates;
    use super::*;
    use crate::config::CalibrationOption;
    use crate::core_modules::smart_pixel::smart_pixel::Deviation;
    use approx::assert_abs_diff_eq;

    fn params() -> ExtractorParams {
        ExtractorParams {
            min_blob_pixels: 4,
            max_blob_pixels: 900,
            max_aspect_ratio: 3.0,
            color_margin: 0.2,
            report_unknown_color: false,
            ignore_laser_color: None,
            calibration: None,
        }
    }

    fn red() -> Deviation {
        Deviation {
            brightness: 200.0,
            red_energy: 200.0,
            green_energy: 0.0,
        }
    }

    fn green() -> Deviation {
        Deviation {
            brightness: 200.0,
            red_energy: 0.0,
            green_energy: 200.0,
        }
    }

    fn stamp(map: &mut CandidateMap, x0: u32, y0: u32, w: u32, h: u32, deviation: Deviation) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                map.insert(x, y, deviation);
            }
        }
    }

    fn run(map: &CandidateMap, sectors: &SectorMask, params: &ExtractorParams) -> Vec<ShotCandidate> {
        find_candidates(map, 3, Duration::from_millis(100), sectors, params)
    }

    #[test]
    fn empty_map_has_no_candidates() {
        let map = CandidateMap::empty(64, 48);
        assert!(run(&map, &SectorMask::all_enabled(3, 3), &params()).is_empty());
    }

    #[test]
    fn centroid_is_the_weighted_mean() {
        let mut map = CandidateMap::empty(64, 48);
        stamp(&mut map, 10, 20, 4, 3, red());
        // A brighter column pulls the centroid right.
        for y in 20..23 {
            map.insert(
                13,
                y,
                Deviation {
                    brightness: 400.0,
                    ..red()
                },
            );
        }

        let found = run(&map, &SectorMask::all_enabled(3, 3), &params());
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_abs_diff_eq!(c.x, (10.0 + 11.0 + 12.0 + 2.0 * 13.0) / 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(c.y, 21.0, epsilon = 1e-9);
        assert_eq!(c.pixel_count, 12);
        assert_eq!(c.color, ShotColor::Red);
        assert_eq!(c.frame_index, 3);
        assert_eq!((c.width(), c.height()), (4, 3));
        assert_abs_diff_eq!(c.aspect_ratio(), 4.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn diagonal_pixels_join_one_cluster() {
        let mut map = CandidateMap::empty(20, 20);
        for i in 0..3 {
            stamp(&mut map, 5 + 2 * i, 5 + 2 * i, 2, 2, green());
        }
        let found = run(&map, &SectorMask::all_enabled(1, 1), &params());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pixel_count, 12);
        assert_eq!(found[0].color, ShotColor::Green);
    }

    #[test]
    fn size_and_shape_heuristics() {
        let mut map = CandidateMap::empty(120, 90);
        stamp(&mut map, 2, 2, 1, 2, red()); // noise
        stamp(&mut map, 10, 10, 40, 40, red()); // a hand
        stamp(&mut map, 60, 60, 12, 2, red()); // a streak
        stamp(&mut map, 90, 70, 3, 3, red()); // a flash

        let found = run(&map, &SectorMask::all_enabled(1, 1), &params());
        assert_eq!(found.len(), 1);
        assert_abs_diff_eq!(found[0].x, 91.0);
        assert_abs_diff_eq!(found[0].y, 71.0);
    }

    #[test]
    fn ambiguous_color_is_dropped_unless_requested() {
        let mut map = CandidateMap::empty(40, 40);
        stamp(
            &mut map,
            10,
            10,
            3,
            3,
            Deviation {
                brightness: 200.0,
                red_energy: 150.0,
                green_energy: 140.0,
            },
        );
        let sectors = SectorMask::all_enabled(1, 1);
        assert!(run(&map, &sectors, &params()).is_empty());

        let mut p = params();
        p.report_unknown_color = true;
        let found = run(&map, &sectors, &p);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].color, ShotColor::Unknown);
    }

    #[test]
    fn ignored_color_clusters_are_dropped() {
        let mut map = CandidateMap::empty(40, 40);
        stamp(&mut map, 5, 5, 3, 3, red());
        stamp(&mut map, 25, 25, 3, 3, green());
        let mut p = params();
        p.ignore_laser_color = Some(LaserColor::Red);

        let found = run(&map, &SectorMask::all_enabled(1, 1), &p);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].color, ShotColor::Green);
    }

    #[test]
    fn centroid_in_disabled_sector_is_dropped() {
        let mut map = CandidateMap::empty(90, 90);
        stamp(&mut map, 10, 10, 3, 3, red());
        stamp(&mut map, 70, 70, 3, 3, red());
        let grid = crate::core_modules::sector_grid::SectorGrid::new(3, 3).unwrap();
        grid.set_enabled(0, 0, false).unwrap();

        let found = run(&map, &grid.snapshot(), &params());
        assert_eq!(found.len(), 1);
        assert_abs_diff_eq!(found[0].x, 71.0);
    }

    #[test]
    fn calibration_bounds_filter_when_requested() {
        let mut map = CandidateMap::empty(90, 90);
        stamp(&mut map, 10, 10, 3, 3, red());
        stamp(&mut map, 50, 50, 3, 3, red());
        let sectors = SectorMask::all_enabled(3, 3);

        let mut p = params();
        p.calibration = Some(CalibrationBounds::new(
            30.0,
            30.0,
            40.0,
            40.0,
            CalibrationOption::OnlyInBounds,
        ));
        assert_eq!(run(&map, &sectors, &p).len(), 1);

        p.calibration = p.calibration.map(|b| CalibrationBounds {
            option: CalibrationOption::Everywhere,
            ..b
        });
        assert_eq!(run(&map, &sectors, &p).len(), 2);
    }

    #[test]
    fn classification_margin() {
        assert_eq!(classify_color(130.0, 100.0, 0.2), ShotColor::Red);
        assert_eq!(classify_color(100.0, 130.0, 0.2), ShotColor::Green);
        assert_eq!(classify_color(110.0, 100.0, 0.2), ShotColor::Unknown);
        assert_eq!(classify_color(0.0, 0.0, 0.2), ShotColor::Unknown);
    }
}
