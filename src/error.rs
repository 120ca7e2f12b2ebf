//! Error taxonomy for the shot-detection engine.
//!
//! Only source-level failures end a session. Everything else is either skipped
//! (`CorruptFrame`) or rejected at the configuration boundary
//! (`ConfigurationRejected`) while the previous value stays in effect.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, DetectionError>;

#[derive(Debug, Error)]
pub enum DetectionError {
    /// The camera or recorded source could not be opened, or vanished mid-stream.
    #[error("frame source `{source_name}` is unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// The device exists but another program (or another session) holds it.
    #[error("frame source `{source_name}` is locked by another consumer")]
    DeviceLocked { source_name: String },

    /// A single unit of video data failed to decode. The frame is skipped.
    #[error("corrupt frame in `{source_name}`: {reason}")]
    CorruptFrame { source_name: String, reason: String },

    /// An invalid threshold, grid or calibration update.
    #[error("configuration rejected for `{field}`: {reason}")]
    ConfigurationRejected { field: String, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("could not parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl DetectionError {
    pub fn unavailable(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptFrame {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn rejected(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigurationRejected {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for failures that end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::DeviceLocked { .. } | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_frames_are_not_fatal() {
        assert!(!DetectionError::corrupt("cam0", "bad header").is_fatal());
        assert!(!DetectionError::rejected("detection_threshold", "NaN").is_fatal());
        assert!(DetectionError::unavailable("cam0", "no device").is_fatal());
        assert!(
            DetectionError::DeviceLocked {
                source_name: "cam0".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn messages_name_the_source() {
        let err = DetectionError::unavailable("lifecam", "not plugged in");
        assert_eq!(
            err.to_string(),
            "frame source `lifecam` is unavailable: not plugged in"
        );
    }
}
