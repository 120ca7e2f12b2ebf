// THEORY:
// This file is the main entry point for the `laser_vision` library crate, the
// shot-detection engine of a laser dry-fire trainer. It turns a stream of
// camera frames into discrete shot events: where a laser pulse landed, in what
// color, and when.
//
// The public surface is deliberately small:
// - `Session` / `SessionSupervisor` run detection for one or more cameras.
// - `FrameSource` is how frames come in; `ShotListener` and `ErrorReporter`
//   are how shots and camera problems go out.
// - `DetectionConfig` / `SharedConfig` and `SectorGrid` tune the detector,
//   the latter two while a session is running.
// - `ShotPipeline` exposes the per-frame stages for embedders that drive their
//   own loop.
//
// The stage internals live in `core_modules` and are public for tooling and
// tests, but embedders should not need them.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod reporter;
pub mod session;

pub use config::{CalibrationBounds, CalibrationOption, DetectionConfig, SharedConfig};
pub use core_modules::frame::Frame;
pub use core_modules::frame_source::{
    FeedSender, FrameSource, ImageSequenceSource, LiveFeed, MemorySource, SessionMode, SourceInfo,
    SourcePoll,
};
pub use core_modules::sector_grid::SectorGrid;
pub use core_modules::shot::{LaserColor, Shot, ShotColor};
pub use error::{DetectionError, Result};
pub use pipeline::{FrameReport, ShotPipeline};
pub use reporter::{
    CameraEvent, ErrorReporter, EventRecorder, LogReporter, ShotCollector, ShotListener,
};
pub use session::{Session, SessionStatus, SessionSupervisor};
