//! Turns calibrated wire-chamber pulses into reconstructed charge hits.
//!
//! A pulse is unfolded from the electronics and sensor response in the
//! frequency domain, its baseline is removed, and the result is searched for
//! peaks which are integrated into [Hit]s.
pub mod calibration;
pub mod deconvolution;
pub mod error;
pub mod event;
pub mod hits;
pub mod parameters;
pub mod peak_search;
pub mod processing;
pub mod pulse;
pub mod save_to_file;

pub type Real = f64;

pub use calibration::{CalibrationStore, CalibrationTable, ChannelCalibration};
pub use error::{ConfigError, PipelineError, PipelineResult};
pub use event::{Event, EventHits};
pub use parameters::PipelineParameters;
pub use processing::{EventProcessor, PulseProcessor};
pub use pulse::{CalibratedPulse, DeconvolvedPulse, Hit, HitSelection};
