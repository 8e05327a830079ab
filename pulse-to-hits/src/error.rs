use crate::{Real, calibration::CalibrationError};
use thiserror::Error;
use tpc_common::{ChannelId, metrics::failures::FailureKind};

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures that abort the processing of a single channel.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Calibration: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("Transform of length {length} failed: {message}")]
    Transform { length: usize, message: String },
    #[error("Pulse on channel {0} has no samples")]
    EmptyPulse(ChannelId),
    #[error("Pulse on channel {channel} has invalid time bounds {first}..{last}")]
    InvalidTimeBounds {
        channel: ChannelId,
        first: Real,
        last: Real,
    },
}

impl PipelineError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Calibration(CalibrationError::UnknownChannelType(_)) => {
                FailureKind::UnknownChannelType
            }
            Self::Calibration(CalibrationError::MissingConstant { .. }) => {
                FailureKind::MissingConstant
            }
            Self::Transform { .. } => FailureKind::Transform,
            Self::EmptyPulse(_) => FailureKind::EmptyPulse,
            Self::InvalidTimeBounds { .. } => FailureKind::InvalidTimeBounds,
        }
    }
}

/// Invalid tunables, reported before any pulse is processed.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be strictly positive, got {value}")]
    NotPositive { name: &'static str, value: Real },
    #[error("{name} must be non-negative, got {value}")]
    Negative { name: &'static str, value: Real },
    #[error("Nyquist fraction must be inside (0,1), got {0}")]
    NyquistFraction(Real),
    #[error("Coherence zone must be at least one sample")]
    EmptyCoherenceZone,
    #[error("Coherence cut {cut} cannot exceed the coherence zone {zone}")]
    CoherenceCut { cut: usize, zone: usize },
    #[error("Integration threshold must be inside (0,1], got {0}")]
    IntegrationThreshold(Real),
}
