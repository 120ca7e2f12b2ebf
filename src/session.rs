// THEORY:
// A `Session` is one camera's processing loop. It owns a `FrameStream` and a
// `ShotPipeline`, runs on a blocking worker (tokio's blocking pool when a
// runtime is available, a plain thread otherwise) and talks to the rest of the
// world through three narrow channels:
//
// 1.  **Shots** go to the `ShotListener`, in the order the pipeline releases
//     them, which is non-decreasing in timestamp.
// 2.  **Problems** go to the `ErrorReporter` as `CameraEvent`s, including
//     runtime configuration updates that were rejected.
// 3.  **Lifecycle** is published on a `tokio::sync::watch` channel. Waiters
//     await (or block on) any status other than `Running`.
//
// Key architectural principles:
// - The pipeline and the listener sit behind one lock together with an `open`
//   flag. Whoever ends the session (end of stream, lost device, `stop()`)
//   takes the lock, flushes the flashes still held by the deduplicator,
//   closes delivery and only then publishes the terminal status. Every shot is
//   therefore delivered before any waiter wakes, and none after.
// - The lock is never held while polling the source, so `stop()` waits for at
//   most the frame currently being processed, even if the source is stuck.
// - `reset()` is a request: the loop clears the background model and open
//   flashes at the next frame boundary, never in the middle of a frame.

use crate::config::{CalibrationBounds, SharedConfig};
use crate::core_modules::frame::Frame;
use crate::core_modules::frame_source::{FrameSource, FrameStream, SessionMode, StreamPoll};
use crate::core_modules::health_monitor::{HealthLimits, HealthMonitor};
use crate::core_modules::sector_grid::SectorGrid;
use crate::error::{DetectionError, Result};
use crate::pipeline::{FrameReport, ShotPipeline};
use crate::reporter::{CameraEvent, ErrorReporter, ShotListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::watch;

/// Lifecycle of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    /// A bounded source reached its end and every shot was dispatched.
    Completed,
    /// `stop()` was called.
    Stopped,
    /// The source failed mid-stream.
    Failed(String),
}

impl SessionStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Running)
    }
}

fn publish(status: &watch::Sender<SessionStatus>, next: SessionStatus) -> bool {
    status.send_if_modified(|current| {
        if current.is_running() {
            *current = next;
            true
        } else {
            false
        }
    })
}

fn report_rejection(reporter: &dyn ErrorReporter, err: &DetectionError) {
    if let DetectionError::ConfigurationRejected { field, reason } = err {
        reporter.report(CameraEvent::ConfigurationRejected {
            field: field.clone(),
            reason: reason.clone(),
        });
    }
}

/// The pipeline and its listener. Shots only flow while `open`.
struct Detector {
    pipeline: ShotPipeline,
    listener: Arc<dyn ShotListener>,
    open: bool,
}

impl Detector {
    /// `None` once delivery has been closed.
    fn process(&mut self, frame: &Frame) -> Option<FrameReport> {
        if !self.open {
            return None;
        }
        let mut report = self.pipeline.process_frame(frame);
        for shot in std::mem::take(&mut report.shots) {
            self.listener.on_shot(shot);
        }
        Some(report)
    }

    /// Delivers every held flash, closes delivery and publishes `next`.
    /// Returns `false` when the session had already ended.
    fn close(&mut self, status: &watch::Sender<SessionStatus>, next: SessionStatus) -> bool {
        if !self.open {
            return false;
        }
        for shot in self.pipeline.finish() {
            self.listener.on_shot(shot);
        }
        self.open = false;
        publish(status, next)
    }
}

fn lock(detector: &Mutex<Detector>) -> MutexGuard<'_, Detector> {
    detector.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the loop needs, moved onto the worker.
struct SessionLoop<S: FrameSource> {
    stream: FrameStream<S>,
    detector: Arc<Mutex<Detector>>,
    monitor: HealthMonitor,
    reporter: Arc<dyn ErrorReporter>,
    running: Arc<AtomicBool>,
    reset_requested: Arc<AtomicBool>,
    frames_processed: Arc<AtomicU64>,
    status: Arc<watch::Sender<SessionStatus>>,
}

impl<S: FrameSource> SessionLoop<S> {
    fn run(mut self) {
        let camera = self.stream.name().to_string();

        while self.running.load(Ordering::SeqCst) {
            if self.reset_requested.swap(false, Ordering::SeqCst) {
                lock(&self.detector).pipeline.reset();
                self.monitor.reset();
                log::info!("session '{camera}' reset");
            }

            match self.stream.next() {
                Ok(StreamPoll::Frame(frame)) => {
                    let Some(report) = lock(&self.detector).process(&frame) else {
                        break;
                    };
                    self.frames_processed.fetch_add(1, Ordering::SeqCst);
                    for event in self.monitor.record_frame(Instant::now(), report.mean_luminance) {
                        self.reporter.report(event);
                    }
                }
                Ok(StreamPoll::Pending) => {}
                Ok(StreamPoll::Finished) => {
                    if lock(&self.detector).close(&self.status, SessionStatus::Completed) {
                        log::info!(
                            "session '{camera}' completed after {} frames",
                            self.stream.frames_delivered()
                        );
                    }
                    return;
                }
                Err(err) if !err.is_fatal() => {
                    log::debug!("skipping frame: {err}");
                    for event in self.monitor.record_corrupt() {
                        self.reporter.report(event);
                    }
                }
                Err(err) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    log::error!("session '{camera}' lost its source: {err}");
                    self.reporter.report(source_event(&camera, &err, false));
                    lock(&self.detector).close(&self.status, SessionStatus::Failed(err.to_string()));
                    return;
                }
            }
        }

        // Reached through `stop()` (already closed) or a dropped `Session`.
        lock(&self.detector).close(&self.status, SessionStatus::Stopped);
        log::info!("session '{camera}' stopped");
    }
}

fn source_event(camera: &str, err: &DetectionError, only_camera: bool) -> CameraEvent {
    match err {
        DetectionError::DeviceLocked { .. } => CameraEvent::DeviceLocked {
            camera: camera.to_string(),
            all_cameras_failed: only_camera,
        },
        _ => CameraEvent::DeviceMissing {
            camera: camera.to_string(),
        },
    }
}

/// A running (or finished) detection session for one camera.
pub struct Session {
    name: String,
    mode: SessionMode,
    config: Arc<SharedConfig>,
    grid: Arc<SectorGrid>,
    reporter: Arc<dyn ErrorReporter>,
    detector: Arc<Mutex<Detector>>,
    running: Arc<AtomicBool>,
    reset_requested: Arc<AtomicBool>,
    frames_processed: Arc<AtomicU64>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    status_rx: watch::Receiver<SessionStatus>,
}

impl Session {
    /// Opens `source` and starts processing it in the background.
    ///
    /// A source that cannot be opened is reported and returned as the error.
    pub fn start<S>(
        source: S,
        config: Arc<SharedConfig>,
        grid: Arc<SectorGrid>,
        listener: Arc<dyn ShotListener>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Session>
    where
        S: FrameSource + 'static,
    {
        Self::launch(source, config, grid, listener, reporter, false, None)
    }

    /// Like [`Session::start`], also writing candidate maps into `directory`
    /// (created if missing) while debug mode is on.
    pub fn start_with_debug_dump<S>(
        source: S,
        config: Arc<SharedConfig>,
        grid: Arc<SectorGrid>,
        listener: Arc<dyn ShotListener>,
        reporter: Arc<dyn ErrorReporter>,
        directory: impl Into<PathBuf>,
    ) -> Result<Session>
    where
        S: FrameSource + 'static,
    {
        Self::launch(
            source,
            config,
            grid,
            listener,
            reporter,
            false,
            Some(directory.into()),
        )
    }

    fn launch<S>(
        source: S,
        config: Arc<SharedConfig>,
        grid: Arc<SectorGrid>,
        listener: Arc<dyn ShotListener>,
        reporter: Arc<dyn ErrorReporter>,
        only_camera: bool,
        debug_dump: Option<PathBuf>,
    ) -> Result<Session>
    where
        S: FrameSource + 'static,
    {
        let pipeline = match ShotPipeline::new(config.clone(), grid.clone()) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                report_rejection(reporter.as_ref(), &err);
                return Err(err);
            }
        };
        let pipeline = match debug_dump {
            Some(directory) => {
                std::fs::create_dir_all(&directory)?;
                pipeline.with_debug_dump(directory)
            }
            None => pipeline,
        };
        let base = config.base();

        let mut stream = FrameStream::new(source, base.expected_fps);
        let name = stream.name().to_string();
        let mode = stream.mode();
        if let Err(err) = stream.open() {
            log::error!("could not open '{name}': {err}");
            reporter.report(source_event(&name, &err, only_camera));
            return Err(err);
        }

        let monitor = HealthMonitor::new(
            name.clone(),
            mode,
            HealthLimits {
                min_fps: base.min_fps,
                min_average_luminance: base.min_average_luminance,
                max_corrupt_ratio: base.max_corrupt_ratio,
                window: base.health_window,
            },
        );

        let detector = Arc::new(Mutex::new(Detector {
            pipeline,
            listener,
            open: true,
        }));
        let running = Arc::new(AtomicBool::new(true));
        let reset_requested = Arc::new(AtomicBool::new(false));
        let frames_processed = Arc::new(AtomicU64::new(0));
        let (status_tx, status_rx) = watch::channel(SessionStatus::Running);
        let status_tx = Arc::new(status_tx);

        let worker = SessionLoop {
            stream,
            detector: detector.clone(),
            monitor,
            reporter: reporter.clone(),
            running: running.clone(),
            reset_requested: reset_requested.clone(),
            frames_processed: frames_processed.clone(),
            status: status_tx.clone(),
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || worker.run());
            }
            Err(_) => {
                std::thread::Builder::new()
                    .name(format!("session-{name}"))
                    .spawn(move || worker.run())?;
            }
        }
        log::info!("session '{name}' started ({mode:?})");

        Ok(Session {
            name,
            mode,
            config,
            grid,
            reporter,
            detector,
            running,
            reset_requested,
            frames_processed,
            status_tx,
            status_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// The sector flags this session reads every frame.
    pub fn grid(&self) -> &Arc<SectorGrid> {
        &self.grid
    }

    pub fn config(&self) -> &Arc<SharedConfig> {
        &self.config
    }

    /// Frames that went through the pipeline so far.
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        !self.status().is_running()
    }

    /// Ends the session. Flashes still being tracked are delivered before this
    /// returns; nothing is delivered afterwards. Waits for at most the frame
    /// in progress. Must not be called from inside a `ShotListener`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if lock(&self.detector).close(&self.status_tx, SessionStatus::Stopped) {
            log::info!("session '{}' stop requested", self.name);
        }
    }

    /// Clears background and open flashes at the next frame boundary.
    pub fn reset(&self) {
        self.reset_requested.store(true, Ordering::SeqCst);
        log::info!("session '{}' reset requested", self.name);
    }

    /// Rejected values are reported and leave the previous threshold in place.
    pub fn set_detection_threshold(&self, value: f32) -> Result<()> {
        self.reported(self.config.set_detection_threshold(value))
    }

    pub fn set_calibration(&self, bounds: Option<CalibrationBounds>) -> Result<()> {
        self.reported(self.config.set_calibration(bounds))
    }

    pub fn set_sector_enabled(&self, row: usize, column: usize, enabled: bool) -> Result<()> {
        self.reported(self.grid.set_enabled(row, column, enabled))
    }

    pub fn apply_sector_mask(&self, mask: &[Vec<bool>]) -> Result<()> {
        self.reported(self.grid.apply_mask(mask))
    }

    fn reported<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            log::warn!("session '{}' rejected an update: {err}", self.name);
            report_rejection(self.reporter.as_ref(), err);
        }
        result
    }

    /// Resolves once the session is no longer running.
    pub async fn wait_for_completion(&self) -> SessionStatus {
        let mut rx = self.status_rx.clone();
        rx.wait_for(|status| !status.is_running())
            .await
            .map(|status| status.clone())
            .unwrap_or_else(|_| SessionStatus::Failed("status channel closed".to_string()))
    }

    /// Blocking form of [`Session::wait_for_completion`] for synchronous callers.
    /// Do not call from inside an async task.
    pub fn blocking_wait(&self) -> SessionStatus {
        futures::executor::block_on(self.wait_for_completion())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Runs one session per camera and fans control calls out to all of them.
pub struct SessionSupervisor {
    config: Arc<SharedConfig>,
    listener: Arc<dyn ShotListener>,
    reporter: Arc<dyn ErrorReporter>,
    sessions: Vec<Session>,
}

impl SessionSupervisor {
    pub fn new(
        config: Arc<SharedConfig>,
        listener: Arc<dyn ShotListener>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            config,
            listener,
            reporter,
            sessions: Vec::new(),
        }
    }

    /// Starts a session per source, each with its own sector grid. Returns how
    /// many started; fails only when none did.
    pub fn start_all(&mut self, sources: Vec<Box<dyn FrameSource>>) -> Result<usize> {
        let only_camera = sources.len() == 1;
        let mut started = 0;
        let mut last_error = None;
        for source in sources {
            let base = self.config.base();
            let grid = Arc::new(SectorGrid::new(base.sector_rows, base.sector_columns)?);
            match Session::launch(
                source,
                self.config.clone(),
                grid,
                self.listener.clone(),
                self.reporter.clone(),
                only_camera,
                None,
            ) {
                Ok(session) => {
                    self.sessions.push(session);
                    started += 1;
                }
                Err(err) => last_error = Some(err),
            }
        }
        match (started, last_error) {
            (0, Some(err)) => Err(err),
            _ => Ok(started),
        }
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn stop_all(&self) {
        self.sessions.iter().for_each(Session::stop);
    }

    pub fn reset_all(&self) {
        self.sessions.iter().for_each(Session::reset);
    }

    /// Waits for every session, returning their final statuses in start order.
    pub async fn wait_all(&self) -> Vec<SessionStatus> {
        futures::future::join_all(self.sessions.iter().map(|session| session.wait_for_completion())).await
    }
}
