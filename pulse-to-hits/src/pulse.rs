use crate::{
    Real,
    error::{PipelineError, PipelineResult},
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tpc_common::{ChannelId, DigitRef, GeometryId};

/// The time between samples, failing for bounds that give no positive step.
fn checked_step(channel: ChannelId, first: Real, last: Real, count: usize) -> PipelineResult<Real> {
    let step = (last - first) / count.max(1) as Real;
    if step.is_finite() && step > 0.0 {
        Ok(step)
    } else {
        Err(PipelineError::InvalidTimeBounds {
            channel,
            first,
            last,
        })
    }
}

/// A pedestal-subtracted, sign-normalized waveform for one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibratedPulse {
    pub channel: ChannelId,
    pub digit: DigitRef,
    pub first_sample_time: Real,
    pub last_sample_time: Real,
    pub samples: Vec<Real>,
}

impl CalibratedPulse {
    pub fn new(
        channel: ChannelId,
        digit: DigitRef,
        first_sample_time: Real,
        digit_step: Real,
        samples: Vec<Real>,
    ) -> Self {
        Self {
            channel,
            digit,
            first_sample_time,
            last_sample_time: first_sample_time + digit_step * samples.len() as Real,
            samples,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// The time between samples, derived from the time bounds.
    pub fn digit_step(&self) -> Real {
        (self.last_sample_time - self.first_sample_time) / self.samples.len().max(1) as Real
    }

    pub fn checked_digit_step(&self) -> PipelineResult<Real> {
        checked_step(
            self.channel,
            self.first_sample_time,
            self.last_sample_time,
            self.samples.len(),
        )
    }
}

/// A pulse after the response has been divided out and the baseline removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeconvolvedPulse {
    pub channel: ChannelId,
    pub digit: DigitRef,
    pub first_sample_time: Real,
    pub last_sample_time: Real,
    pub samples: Vec<Real>,
    /// Scatter of the subtracted baseline trace.
    pub baseline_sigma: Real,
    /// Sample-to-sample noise scale.
    pub sample_sigma: Real,
}

impl DeconvolvedPulse {
    /// Takes the shape of `source` with new sample values.
    pub fn with_samples(source: &CalibratedPulse, samples: Vec<Real>) -> Self {
        Self {
            channel: source.channel,
            digit: source.digit,
            first_sample_time: source.first_sample_time,
            last_sample_time: source.last_sample_time,
            samples,
            baseline_sigma: 0.0,
            sample_sigma: 0.0,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn digit_step(&self) -> Real {
        (self.last_sample_time - self.first_sample_time) / self.samples.len().max(1) as Real
    }

    pub fn checked_digit_step(&self) -> PipelineResult<Real> {
        checked_step(
            self.channel,
            self.first_sample_time,
            self.last_sample_time,
            self.samples.len(),
        )
    }

    pub fn sample_time(&self, index: Real) -> Real {
        self.first_sample_time + index * self.digit_step()
    }
}

/// A reconstructed charge deposition on one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    pub geometry: GeometryId,
    pub digit: DigitRef,
    pub charge: Real,
    pub charge_uncertainty: Real,
    pub time: Real,
    pub time_rms: Real,
    pub time_uncertainty: Real,
}

impl Display for Hit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{0},{1},{2},{3},{4}",
            self.time, self.time_rms, self.time_uncertainty, self.charge, self.charge_uncertainty
        ))
    }
}

/// A named, time-ordered collection of hits (e.g. "drift" or "pmt").
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HitSelection {
    pub name: String,
    pub hits: Vec<Hit>,
}

impl HitSelection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            hits: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
