// THEORY:
// The frame source layer is the only place that knows where pictures come from.
// Everything behind it sees a `Frame` with a sequence index and a monotonic
// timestamp and never asks whether that frame was decoded from a file, handed
// over by a capture driver or built in memory by a test.
//
// Key architectural principles:
// 1.  **Poll, don't push**: a source answers `next_frame` with a frame, with
//     `Pending` (a live device had nothing new within its poll interval) or with
//     `Finished` (a recorded source ran out). The session loop stays in charge
//     of pacing and of checking its stop flag between polls.
// 2.  **Recoverable vs. fatal**: an undecodable unit is a `CorruptFrame` and the
//     stream continues past it. A device that vanished or is held by another
//     process is fatal for the session.
// 3.  **Normalization at the edge**: `FrameStream` assigns indices and
//     timestamps once, so every later stage agrees on "when" a frame happened.

use crate::core_modules::frame::Frame;
use crate::error::{DetectionError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use image::RgbImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Whether a source ends on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// A recorded source: the session completes at end of stream.
    Bounded,
    /// A live source: the session runs until stopped.
    Continuous,
}

/// What a source reports about itself once opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub name: String,
    pub mode: SessionMode,
    /// Number of units, when known up front.
    pub frame_count: Option<usize>,
}

/// Outcome of one poll.
#[derive(Debug)]
pub enum SourcePoll {
    /// A decoded picture and, if the source knows it, its capture offset.
    Frame(RgbImage, Option<Duration>),
    Pending,
    Finished,
}

/// Anything that can supply pictures to a session.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    fn mode(&self) -> SessionMode;

    /// Acquires the device or input. Called once before the first poll.
    fn open(&mut self) -> Result<SourceInfo>;

    fn next_frame(&mut self) -> Result<SourcePoll>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn mode(&self) -> SessionMode {
        (**self).mode()
    }

    fn open(&mut self) -> Result<SourceInfo> {
        (**self).open()
    }

    fn next_frame(&mut self) -> Result<SourcePoll> {
        (**self).next_frame()
    }
}

/// A normalized poll: frames carry their index and session timestamp.
#[derive(Debug)]
pub enum StreamPoll {
    Frame(Frame),
    Pending,
    Finished,
}

/// Wraps a source and turns its pictures into indexed, timestamped `Frame`s.
pub struct FrameStream<S: FrameSource> {
    source: S,
    expected_fps: f64,
    next_index: u64,
    /// Units consumed, corrupt ones included. Drives synthesized timestamps.
    position: u64,
    last_timestamp: Duration,
    opened_at: Option<Instant>,
}

impl<S: FrameSource> FrameStream<S> {
    pub fn new(source: S, expected_fps: f64) -> Self {
        Self {
            source,
            expected_fps: if expected_fps > 0.0 { expected_fps } else { 30.0 },
            next_index: 0,
            position: 0,
            last_timestamp: Duration::ZERO,
            opened_at: None,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn mode(&self) -> SessionMode {
        self.source.mode()
    }

    pub fn open(&mut self) -> Result<SourceInfo> {
        let info = self.source.open()?;
        self.opened_at = Some(Instant::now());
        log::info!(
            "opened {:?} source '{}'{}",
            info.mode,
            info.name,
            info.frame_count
                .map(|n| format!(" with {n} frames"))
                .unwrap_or_default()
        );
        Ok(info)
    }

    /// Frames handed out so far.
    pub fn frames_delivered(&self) -> u64 {
        self.next_index
    }

    pub fn next(&mut self) -> Result<StreamPoll> {
        let poll = match self.source.next_frame() {
            Ok(poll) => poll,
            Err(err @ DetectionError::CorruptFrame { .. }) => {
                self.position += 1;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        match poll {
            SourcePoll::Frame(image, source_timestamp) => {
                let timestamp = self.timestamp_for(source_timestamp);
                let frame = Frame::from_image(image, self.next_index, timestamp);
                self.next_index += 1;
                self.position += 1;
                Ok(StreamPoll::Frame(frame))
            }
            SourcePoll::Pending => Ok(StreamPoll::Pending),
            SourcePoll::Finished => Ok(StreamPoll::Finished),
        }
    }

    fn timestamp_for(&mut self, source_timestamp: Option<Duration>) -> Duration {
        let raw = match (source_timestamp, self.source.mode()) {
            (Some(timestamp), _) => timestamp,
            (None, SessionMode::Continuous) => self
                .opened_at
                .map(|opened| opened.elapsed())
                .unwrap_or_default(),
            (None, SessionMode::Bounded) => {
                Duration::from_secs_f64(self.position as f64 / self.expected_fps)
            }
        };
        // Never let a clock hiccup send a frame back in time.
        self.last_timestamp = self.last_timestamp.max(raw);
        self.last_timestamp
    }
}

fn is_image_file(path: &Path) -> bool {
    path.is_file() && image::ImageFormat::from_path(path).is_ok()
}

/// A directory of still images played back in file-name order.
pub struct ImageSequenceSource {
    name: String,
    directory: PathBuf,
    files: VecDeque<PathBuf>,
}

impl ImageSequenceSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        Self {
            name: directory.display().to_string(),
            directory,
            files: VecDeque::new(),
        }
    }
}

impl FrameSource for ImageSequenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SessionMode {
        SessionMode::Bounded
    }

    fn open(&mut self) -> Result<SourceInfo> {
        let entries = std::fs::read_dir(&self.directory)
            .map_err(|err| DetectionError::unavailable(&self.name, err.to_string()))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        if files.is_empty() {
            return Err(DetectionError::unavailable(&self.name, "no image files found"));
        }
        files.sort();
        self.files = files.into();
        Ok(SourceInfo {
            name: self.name.clone(),
            mode: SessionMode::Bounded,
            frame_count: Some(self.files.len()),
        })
    }

    fn next_frame(&mut self) -> Result<SourcePoll> {
        let Some(path) = self.files.pop_front() else {
            return Ok(SourcePoll::Finished);
        };
        match image::open(&path) {
            Ok(decoded) => Ok(SourcePoll::Frame(decoded.to_rgb8(), None)),
            Err(err) => Err(DetectionError::corrupt(
                &self.name,
                format!("{}: {err}", path.display()),
            )),
        }
    }
}

/// Pre-decoded pictures. `None` entries stand for units that failed to decode.
pub struct MemorySource {
    name: String,
    units: VecDeque<Option<RgbImage>>,
    frame_interval: Option<Duration>,
    emitted: u32,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, images: Vec<RgbImage>) -> Self {
        Self::with_units(name, images.into_iter().map(Some).collect())
    }

    pub fn with_units(name: impl Into<String>, units: Vec<Option<RgbImage>>) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            frame_interval: None,
            emitted: 0,
        }
    }

    /// Stamps unit `n` with `n * interval` instead of leaving timing to the stream.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }
}

impl FrameSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SessionMode {
        SessionMode::Bounded
    }

    fn open(&mut self) -> Result<SourceInfo> {
        Ok(SourceInfo {
            name: self.name.clone(),
            mode: SessionMode::Bounded,
            frame_count: Some(self.units.len()),
        })
    }

    fn next_frame(&mut self) -> Result<SourcePoll> {
        let Some(unit) = self.units.pop_front() else {
            return Ok(SourcePoll::Finished);
        };
        let timestamp = self.frame_interval.map(|interval| interval * self.emitted);
        self.emitted += 1;
        match unit {
            Some(image) => Ok(SourcePoll::Frame(image, timestamp)),
            None => Err(DetectionError::corrupt(
                &self.name,
                format!("unit {} could not be decoded", self.emitted - 1),
            )),
        }
    }
}

#[derive(Debug, Default)]
struct FeedState {
    locked: AtomicBool,
    connected: AtomicBool,
}

/// A continuous source fed over a channel by an external capture driver.
pub struct LiveFeed {
    name: String,
    receiver: Receiver<(RgbImage, Option<Duration>)>,
    poll_interval: Duration,
    state: Arc<FeedState>,
}

/// The driver's end of a `LiveFeed`. Dropping it unplugs the camera.
pub struct FeedSender {
    sender: Sender<(RgbImage, Option<Duration>)>,
    state: Arc<FeedState>,
}

impl LiveFeed {
    /// A feed buffering up to `capacity` frames; a full buffer drops new frames.
    pub fn channel(
        name: impl Into<String>,
        capacity: usize,
        poll_interval: Duration,
    ) -> (LiveFeed, FeedSender) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        let state = Arc::new(FeedState {
            locked: AtomicBool::new(false),
            connected: AtomicBool::new(true),
        });
        (
            LiveFeed {
                name: name.into(),
                receiver,
                poll_interval,
                state: state.clone(),
            },
            FeedSender { sender, state },
        )
    }
}

impl FrameSource for LiveFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SessionMode {
        SessionMode::Continuous
    }

    fn open(&mut self) -> Result<SourceInfo> {
        if self.state.locked.load(Ordering::Acquire) {
            return Err(DetectionError::DeviceLocked {
                source_name: self.name.clone(),
            });
        }
        if !self.state.connected.load(Ordering::Acquire) && self.receiver.is_empty() {
            return Err(DetectionError::unavailable(&self.name, "camera is not connected"));
        }
        Ok(SourceInfo {
            name: self.name.clone(),
            mode: SessionMode::Continuous,
            frame_count: None,
        })
    }

    fn next_frame(&mut self) -> Result<SourcePoll> {
        match self.receiver.recv_timeout(self.poll_interval) {
            Ok((image, timestamp)) => Ok(SourcePoll::Frame(image, timestamp)),
            Err(RecvTimeoutError::Timeout) => Ok(SourcePoll::Pending),
            Err(RecvTimeoutError::Disconnected) => Err(DetectionError::unavailable(
                &self.name,
                "camera disconnected",
            )),
        }
    }
}

impl FeedSender {
    /// Queues a frame. Returns `false` when the buffer was full and the frame was dropped.
    pub fn send(&self, image: RgbImage) -> Result<bool> {
        self.send_at(image, None)
    }

    pub fn send_at(&self, image: RgbImage, timestamp: Option<Duration>) -> Result<bool> {
        match self.sender.try_send((image, timestamp)) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(DetectionError::unavailable(
                "live feed",
                "no session is consuming this feed",
            )),
        }
    }

    /// Marks the camera as held by another process; opening the feed fails.
    pub fn set_locked(&self, locked: bool) {
        self.state.locked.store(locked, Ordering::Release);
    }
}

impl Drop for FeedSender {
    fn drop(&mut self) {
        self.state.connected.store(false, Ordering::Release);
    }
}
