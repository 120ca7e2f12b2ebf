// THEORY:
// The `BackgroundModel` is the temporal layer of the shot detector. It keeps a
// slowly moving per-pixel estimate of what the scene "normally" looks like and
// flags the pixels that just jumped above it with a laser-like color balance.
//
// Key architectural principles:
// 1.  **Read, then update**: `evaluate` borrows the model immutably and may fan
//     out across pixel rows on a rayon pool; `update` needs `&mut self`
//     and therefore cannot start until every band has finished reading. The
//     borrow checker is the per-frame barrier.
// 2.  **Slow decay**: a flash lasts one to three frames. With a blend rate of a
//     few percent a single bright frame barely moves the baseline, while a lamp
//     switched on (or a person who stopped in front of the camera) fades into
//     the background within a second or two.
// 3.  **Sector awareness**: only enabled sectors are evaluated. Disabled ones
//     still feed the model so that re-enabling a sector does not produce a
//     burst of stale differences.
// 4.  **Rich output**: the `CandidateMap` keeps each candidate pixel's
//     brightness rise (its weight for the centroid) and its red/green energy
//     (for color classification downstream).

use crate::core_modules::frame::Frame;
use crate::core_modules::pixel::pixel::Pixel;
use crate::core_modules::sector_grid::SectorMask;
use crate::core_modules::shot::LaserColor;
use crate::core_modules::smart_pixel::smart_pixel::{BackgroundPixel, Deviation, SmartPixel};
use rayon::prelude::*;

/// Per-frame knobs for the candidate-pixel test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferenceParams {
    pub detection_threshold: f32,
    pub dominance_margin: u8,
    pub saturation_level: u8,
    pub ignore_laser_color: Option<LaserColor>,
}

/// Candidate pixels of one frame, row-major. `None` means "not a candidate".
#[derive(Debug, Clone)]
pub struct CandidateMap {
    width: u32,
    height: u32,
    cells: Vec<Option<Deviation>>,
    count: usize,
}

impl CandidateMap {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![None; width as usize * height as usize],
            count: 0,
        }
    }

    fn from_cells(width: u32, height: u32, cells: Vec<Option<Deviation>>) -> Self {
        let count = cells.iter().filter(|c| c.is_some()).count();
        Self {
            width,
            height,
            cells,
            count,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, x: u32, y: u32) -> Option<&Deviation> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells[(y * self.width + x) as usize].as_ref()
    }

    /// Drops every candidate, e.g. when the whole frame moved.
    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = None);
        self.count = 0;
    }

    /// Marks a pixel by hand. Used by tests and offline tools.
    pub fn insert(&mut self, x: u32, y: u32, deviation: Deviation) {
        let cell = &mut self.cells[(y * self.width + x) as usize];
        if cell.is_none() {
            self.count += 1;
        }
        *cell = Some(deviation);
    }
}

/// Rolling per-pixel baseline and the difference pass run against it.
pub struct BackgroundModel {
    width: u32,
    height: u32,
    pixels: Vec<BackgroundPixel>,
    frames_seen: u64,
    /// `None` evaluates on the calling thread.
    pool: Option<rayon::ThreadPool>,
}

impl BackgroundModel {
    /// `worker_threads == 0` uses one thread per CPU. The pool is built once
    /// and reused for every frame.
    pub fn new(worker_threads: usize) -> Self {
        let threads = if worker_threads == 0 {
            num_cpus::get()
        } else {
            worker_threads
        };
        let pool = if threads > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("difference-{i}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(err) => {
                    log::warn!("could not build a {threads}-thread pool, evaluating serially: {err}");
                    None
                }
            }
        } else {
            None
        };
        Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
            frames_seen: 0,
            pool,
        }
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.as_ref().map_or(1, rayon::ThreadPool::current_num_threads)
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn reset(&mut self) {
        self.pixels.clear();
        self.width = 0;
        self.height = 0;
        self.frames_seen = 0;
    }

    pub fn estimate(&self, x: u32, y: u32) -> Option<BackgroundPixel> {
        (x < self.width && y < self.height).then(|| self.pixels[(y * self.width + x) as usize])
    }

    /// One full frame step: evaluate against the current model, then decay it.
    /// Frames inside the warm-up period only seed the model.
    pub fn process(
        &mut self,
        frame: &Frame,
        sectors: &SectorMask,
        params: &DifferenceParams,
        decay: f32,
        warmup_frames: u32,
    ) -> CandidateMap {
        if self.width != frame.width() || self.height != frame.height() {
            if self.frames_seen > 0 {
                log::warn!(
                    "frame size changed from {}x{} to {}x{}, reseeding background",
                    self.width,
                    self.height,
                    frame.width(),
                    frame.height()
                );
            }
            self.seed(frame);
            return CandidateMap::empty(frame.width(), frame.height());
        }

        let map = if self.frames_seen < warmup_frames as u64 {
            CandidateMap::empty(frame.width(), frame.height())
        } else {
            self.evaluate(frame, sectors, params)
        };
        self.update(frame, decay);
        map
    }

    fn seed(&mut self, frame: &Frame) {
        self.width = frame.width();
        self.height = frame.height();
        self.pixels = frame
            .data()
            .chunks_exact(3)
            .map(|px| BackgroundPixel::from(Pixel::from(px)))
            .collect();
        self.frames_seen = 1;
    }

    /// Read phase. Rows are spread over the pool; each row only visits the
    /// enabled sectors of its band.
    pub fn evaluate(
        &self,
        frame: &Frame,
        sectors: &SectorMask,
        params: &DifferenceParams,
    ) -> CandidateMap {
        let (width, height) = (frame.width(), frame.height());
        let mut cells = vec![None; width as usize * height as usize];
        if !sectors.any_enabled() || width == 0 {
            return CandidateMap::from_cells(width, height, cells);
        }

        let bands = sectors.row_bands(height);
        let evaluate_row = |(y, row): (usize, &mut [Option<Deviation>])| {
            self.evaluate_row(frame, sectors, &bands, params, y as u32, row)
        };
        match &self.pool {
            Some(pool) => pool.install(|| {
                cells
                    .par_chunks_mut(width as usize)
                    .enumerate()
                    .for_each(evaluate_row)
            }),
            None => cells
                .chunks_mut(width as usize)
                .enumerate()
                .for_each(evaluate_row),
        }
        CandidateMap::from_cells(width, height, cells)
    }

    fn evaluate_row(
        &self,
        frame: &Frame,
        sectors: &SectorMask,
        bands: &[(u32, u32)],
        params: &DifferenceParams,
        y: u32,
        out: &mut [Option<Deviation>],
    ) {
        let (width, height) = (frame.width(), frame.height());
        let Some(sector_row) = bands.iter().position(|&(y0, y1)| (y0..y1).contains(&y)) else {
            return;
        };
        for column in 0..sectors.columns() {
            if !sectors.is_enabled(sector_row, column) {
                continue;
            }
            let bounds = sectors.bounds(sector_row, column, width, height);
            for x in bounds.x0..bounds.x1 {
                let background = &self.pixels[(y * width + x) as usize];
                out[x as usize] = self.candidate(frame, background, x, y, params);
            }
        }
    }

    #[inline]
    fn candidate(
        &self,
        frame: &Frame,
        background: &BackgroundPixel,
        x: u32,
        y: u32,
        params: &DifferenceParams,
    ) -> Option<Deviation> {
        let smart = SmartPixel::new(frame.pixel(x, y));
        let deviation = smart.deviation_from(background);
        if deviation.brightness <= params.detection_threshold {
            return None;
        }
        let hue = smart.laser_hue(params.dominance_margin, params.saturation_level)?;
        if params
            .ignore_laser_color
            .is_some_and(|ignored| hue.matches(ignored))
        {
            return None;
        }
        Some(deviation)
    }

    /// Write phase. Only callable once no evaluation borrows the model.
    pub fn update(&mut self, frame: &Frame, decay: f32) {
        for (background, px) in self.pixels.iter_mut().zip(frame.data().chunks_exact(3)) {
            background.blend_toward(px.into(), decay);
        }
        self.frames_seen += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    fn params() -> DifferenceParams {
        DifferenceParams {
            detection_threshold: 45.0,
            dominance_margin: 25,
            saturation_level: 235,
            ignore_laser_color: None,
        }
    }

    fn frame_with(index: u64, spots: &[(u32, u32, [u8; 3])]) -> Frame {
        let mut image = RgbImage::from_pixel(60, 30, Rgb([50, 50, 50]));
        for &(x, y, color) in spots {
            image.put_pixel(x, y, Rgb(color));
        }
        Frame::from_image(image, index, Duration::from_millis(index * 33))
    }

    #[test]
    fn first_frame_only_seeds() {
        let mut model = BackgroundModel::new(1);
        let map = model.process(
            &frame_with(0, &[(5, 5, [255, 30, 30])]),
            &SectorMask::all_enabled(3, 3),
            &params(),
            0.05,
            1,
        );
        assert!(map.is_empty());
        assert_eq!(model.frames_seen(), 1);
    }

    #[test]
    fn flags_laser_colored_rises_only() {
        let mut model = BackgroundModel::new(1);
        let mask = SectorMask::all_enabled(3, 3);
        model.process(&frame_with(0, &[]), &mask, &params(), 0.05, 1);

        let map = model.process(
            &frame_with(
                1,
                &[
                    (5, 5, [255, 30, 30]),
                    (10, 5, [30, 255, 30]),
                    (15, 5, [255, 255, 255]),
                    (20, 5, [200, 200, 30]),
                    (25, 5, [60, 60, 60]),
                ],
            ),
            &mask,
            &params(),
            0.05,
            1,
        );

        assert_eq!(map.count(), 3);
        assert!(map.get(5, 5).is_some());
        assert!(map.get(10, 5).is_some());
        assert!(map.get(15, 5).is_some());
        assert!(map.get(20, 5).is_none());
        assert!(map.get(25, 5).is_none());
    }

    #[test]
    fn brightest_channel_rise_decides_not_luminance() {
        // On a 100-grey wall this red dot raises luminance by about 18 but
        // the red channel by 155.
        let wall = |index: u64, dot: bool| {
            let mut image = RgbImage::from_pixel(30, 30, Rgb([100, 100, 100]));
            if dot {
                image.put_pixel(7, 7, Rgb([255, 60, 60]));
            }
            Frame::from_image(image, index, Duration::from_millis(index * 33))
        };
        let mut model = BackgroundModel::new(1);
        let mask = SectorMask::all_enabled(3, 3);
        model.process(&wall(0, false), &mask, &params(), 0.05, 1);

        let map = model.process(&wall(1, true), &mask, &params(), 0.05, 1);
        assert!((wall(1, true).pixel(7, 7).luminance() - 118.3).abs() < 0.5);
        assert!(map.get(7, 7).is_some());
    }

    #[test]
    fn ignored_color_is_not_a_candidate() {
        let mut model = BackgroundModel::new(1);
        let mask = SectorMask::all_enabled(3, 3);
        let mut p = params();
        p.ignore_laser_color = Some(LaserColor::Green);
        model.process(&frame_with(0, &[]), &mask, &p, 0.05, 1);

        let map = model.process(
            &frame_with(1, &[(5, 5, [255, 30, 30]), (10, 5, [30, 255, 30])]),
            &mask,
            &p,
            0.05,
            1,
        );
        assert!(map.get(5, 5).is_some());
        assert!(map.get(10, 5).is_none());
    }

    #[test]
    fn disabled_sectors_are_skipped() {
        let grid = crate::core_modules::sector_grid::SectorGrid::new(1, 3).unwrap();
        grid.set_enabled(0, 0, false).unwrap();
        let mask = grid.snapshot();
        let mut model = BackgroundModel::new(1);
        model.process(&frame_with(0, &[]), &mask, &params(), 0.05, 1);

        let map = model.process(
            &frame_with(1, &[(5, 5, [255, 30, 30]), (45, 5, [255, 30, 30])]),
            &mask,
            &params(),
            0.05,
            1,
        );
        assert!(map.get(5, 5).is_none());
        assert!(map.get(45, 5).is_some());
    }

    #[test]
    fn parallel_and_serial_passes_agree() {
        let spots = [(3, 2, [255, 20, 20]), (31, 14, [20, 255, 20]), (55, 27, [255, 255, 255])];
        let mask = SectorMask::all_enabled(3, 3);

        let mut serial = BackgroundModel::new(1);
        let mut parallel = BackgroundModel::new(4);
        serial.process(&frame_with(0, &[]), &mask, &params(), 0.05, 1);
        parallel.process(&frame_with(0, &[]), &mask, &params(), 0.05, 1);

        let a = serial.process(&frame_with(1, &spots), &mask, &params(), 0.05, 1);
        let b = parallel.process(&frame_with(1, &spots), &mask, &params(), 0.05, 1);
        assert_eq!(serial.worker_threads(), 1);
        assert_eq!(parallel.worker_threads(), 4);
        assert_eq!(a.count(), 3);
        assert_eq!(a.cells, b.cells);
    }

    #[test]
    fn steady_change_fades_into_background() {
        let mut model = BackgroundModel::new(1);
        let mask = SectorMask::all_enabled(3, 3);
        model.process(&frame_with(0, &[]), &mask, &params(), 0.05, 1);

        let lit = [(5, 5, [255, 30, 30])];
        let mut flagged = 0;
        for index in 1..200 {
            let map = model.process(&frame_with(index, &lit), &mask, &params(), 0.05, 1);
            if map.get(5, 5).is_some() {
                flagged += 1;
            }
        }
        assert!(flagged > 3, "a short flash must survive several frames");
        assert!(flagged < 199, "a permanent change must be absorbed");
        assert!(model.estimate(5, 5).unwrap().red > 200.0);
    }
}
