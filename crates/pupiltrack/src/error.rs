//! Error taxonomy shared by the tracker stages.
//!
//! Configuration and structural errors are fatal and surface before (or at)
//! the first frame. Detection errors are recoverable: the frame pipeline turns
//! them into a "not found" record and the stream keeps going.

use crate::conic::ConicError;

/// Errors produced by configuration resolution, region handling and fitting.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// Malformed configuration (bounding box arity, unknown prefilter, bad numbers).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A bounding box reaches outside the frame it is applied to.
    #[error(
        "bounding box [xmin={xmin}, xmax={xmax}, ymin={ymin}, ymax={ymax}] exceeds {width}x{height} frame"
    )]
    Bounds {
        xmin: u32,
        xmax: u32,
        ymin: u32,
        ymax: u32,
        width: u32,
        height: u32,
    },

    /// The region to search is empty.
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// The starburst sampler found too few boundary points to fit an ellipse.
    #[error("insufficient boundary points: need {needed}, found {found}")]
    InsufficientPoints { needed: usize, found: usize },

    /// RANSAC could not reach consensus.
    #[error("ellipse fit failed: {0}")]
    FitFailed(#[from] ConicError),

    /// A frame does not match the declared stream shape.
    #[error("frame {index} is {got_height}x{got_width} (h x w), stream shape is {height}x{width}")]
    FrameShape {
        index: usize,
        got_height: u32,
        got_width: u32,
        height: u32,
        width: u32,
    },

    /// The upstream frame source failed to deliver a frame.
    #[error("frame source error: {0}")]
    FrameSource(String),

    /// A stream accumulator was used after it handed out its results.
    #[error("stream accumulator is already finalized")]
    Finalized,
}

impl TrackError {
    /// `true` for per-frame detection failures that degrade a record to
    /// "not found" instead of aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientPoints { .. } | Self::FitFailed(_))
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TrackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_errors_are_recoverable() {
        assert!(TrackError::InsufficientPoints {
            needed: 5,
            found: 2
        }
        .is_recoverable());
        assert!(TrackError::FitFailed(ConicError::TooFewPoints { needed: 5, got: 0 })
            .is_recoverable());
        assert!(!TrackError::config("bad box").is_recoverable());
        assert!(!TrackError::InvalidRegion("empty".into()).is_recoverable());
    }

    #[test]
    fn bounds_message_names_the_frame() {
        let err = TrackError::Bounds {
            xmin: 0,
            xmax: 700,
            ymin: 0,
            ymax: 10,
            width: 640,
            height: 480,
        };
        assert!(err.to_string().contains("640x480"));
    }
}
