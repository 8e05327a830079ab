//! Removes the readout response from a calibrated pulse.
mod baseline;
mod response;
mod transform;

pub use baseline::{BaselineRemover, BaselineSigmas};
pub(crate) use baseline::percentile;
pub use response::{
    ElectronicsShape, RESPONSE_FLOOR, ResponseModel, electronics_kernel, floor_response,
    sensor_kernel, shift_response,
};
pub(crate) use transform::FrequencyTransform;

use crate::{
    Real,
    calibration::ChannelCalibration,
    error::{PipelineError, PipelineResult},
    parameters::{DeconvolutionParameters, PipelineParameters},
    pulse::{CalibratedPulse, DeconvolvedPulse},
};
use num::Complex;
use realfft::RealFftPlanner;
use std::sync::Arc;
use tpc_common::{ChannelId, EventContext};
use tracing::{error, info};

/// Samples at the start of a pulse that are ramped up from zero.
const TAPER_LENGTH: Real = 10.001;

/// Decay length (samples) of the tail appended after the last sample.
const PAD_DECAY: Real = 10.0;

/// The appended tail is zero once the squared decay exponent reaches this.
const PAD_CUTOFF: Real = 40.0;

/// The transform length used for pulses of `sample_count` samples.
pub fn transform_size(sample_count: usize) -> usize {
    2 * (1 + sample_count / 2)
}

/// A high-frequency noise suppression applied after the response division.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseNotch {
    pub power: Real,
    pub nyquist_fraction: Real,
    pub size: usize,
}

impl NoiseNotch {
    pub fn from_parameters(parameters: &DeconvolutionParameters, size: usize) -> Option<Self> {
        (parameters.noise_power > 0.0).then_some(Self {
            power: parameters.noise_power,
            nyquist_fraction: parameters.nyquist_fraction,
            size,
        })
    }

    /// Wiener-like weight for `bin`, given the electronics response magnitude there.
    pub fn weight(&self, bin: usize, response: Real) -> Real {
        let half = (self.size / 2) as Real;
        let distance = (half - bin as Real) / ((1.0 - self.nyquist_fraction) * half);
        let noise = self.power * (-0.5 * distance * distance).exp();
        let signal = response * response;
        if signal + noise * noise > 0.0 {
            signal / (signal + noise * noise)
        } else {
            1.0
        }
    }
}

/// Divides the electronics and sensor responses out of `spectrum`.
pub fn divide_response(
    spectrum: &mut [Complex<Real>],
    electronics: &[Complex<Real>],
    sensor: &[Complex<Real>],
    notch: Option<NoiseNotch>,
) {
    for (bin, ((value, electronics), sensor)) in spectrum
        .iter_mut()
        .zip(electronics.iter())
        .zip(sensor.iter())
        .enumerate()
    {
        *value /= *electronics;
        *value /= *sensor;
        if let Some(notch) = notch {
            *value *= notch.weight(bin, electronics.norm());
        }
    }
}

/// Copies `samples` into `input`, smoothed with a triangular window of
/// `window` samples half-width over the in-range samples only, with the first
/// samples tapered up from zero
/// and the remainder of `input` filled by a decaying continuation of the
/// last sample.
pub fn prepare_input(channel: ChannelId, samples: &[Real], input: &mut [Real], window: usize) {
    let count = samples.len().min(input.len());
    let Some(last) = count.checked_sub(1) else {
        input.fill(0.0);
        return;
    };
    for (i, sample) in samples.iter().take(count).enumerate() {
        if !sample.is_finite() {
            error!("Channel {channel} has invalid sample {i}: {sample}");
        }
    }

    for i in 0..count {
        let mut sum = window as Real * samples[i];
        let mut weight = window as Real;
        for j in 1..window {
            let w = (window - j) as Real;
            if let Some(before) = i.checked_sub(j) {
                sum += w * samples[before];
                weight += w;
            }
            if i + j <= last {
                sum += w * samples[i + j];
                weight += w;
            }
        }
        let mut value = sum / weight;
        let position = i as Real;
        if position < TAPER_LENGTH {
            value *= position / TAPER_LENGTH;
        }
        input[i] = value;
    }

    let last_value = input[last];
    for (i, value) in input.iter_mut().enumerate().skip(count) {
        let delta = ((i - last) as Real / PAD_DECAY).powi(2);
        *value = if delta < PAD_CUTOFF {
            last_value * (-delta).exp()
        } else {
            0.0
        };
    }
}

/// Unfolds pulses from the readout response and removes their baseline.
///
/// The transform length is set from the nominal pulse and response lengths
/// and only ever grows, when a longer pulse is seen.
pub struct Deconvolver<C> {
    parameters: DeconvolutionParameters,
    calibration: Arc<C>,
    transform: FrequencyTransform,
    response: ResponseModel<C>,
    baseline: BaselineRemover,
    input: Vec<Real>,
    spectrum: Vec<Complex<Real>>,
    output: Vec<Real>,
}

impl<C: ChannelCalibration> Deconvolver<C> {
    pub fn new(calibration: Arc<C>, parameters: &PipelineParameters) -> Self {
        let size = transform_size(parameters.digitization.sample_count());
        let transform = FrequencyTransform::new(&mut RealFftPlanner::new(), size);
        Self {
            parameters: parameters.deconvolution.clone(),
            response: ResponseModel::new(calibration.clone(), parameters.response.clone()),
            baseline: BaselineRemover::new(&parameters.deconvolution),
            calibration,
            transform,
            input: Vec::new(),
            spectrum: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn transform_size(&self) -> usize {
        self.transform.size()
    }

    fn ensure_capacity(&mut self, sample_count: usize) {
        if sample_count > self.transform.size() {
            let size = transform_size(sample_count);
            info!(
                "Growing transform from {0} to {size} samples",
                self.transform.size()
            );
            self.transform = FrequencyTransform::new(&mut RealFftPlanner::new(), size);
        }
    }

    /// Divides the responses out of `pulse` without touching its baseline.
    pub fn unfold(
        &mut self,
        context: &EventContext,
        pulse: &CalibratedPulse,
    ) -> PipelineResult<DeconvolvedPulse> {
        let count = pulse.sample_count();
        if count == 0 {
            return Err(PipelineError::EmptyPulse(pulse.channel));
        }
        let step = pulse.checked_digit_step()?;
        self.ensure_capacity(count);
        self.response
            .update(context, pulse.channel, step, &mut self.transform)?;

        let size = self.transform.size();
        self.input.resize(size, 0.0);
        self.spectrum
            .resize(self.transform.spectrum_len(), Complex::default());
        self.output.resize(size, 0.0);

        prepare_input(
            pulse.channel,
            &pulse.samples,
            &mut self.input,
            self.parameters.smoothing_window(),
        );
        self.transform.forward(&mut self.input, &mut self.spectrum)?;
        divide_response(
            &mut self.spectrum,
            self.response.electronics(),
            self.response.sensor(),
            NoiseNotch::from_parameters(&self.parameters, size),
        );
        self.transform.inverse(&mut self.spectrum, &mut self.output)?;

        let scale = size as Real;
        let samples = self.output[..count].iter().map(|v| v / scale).collect();
        Ok(DeconvolvedPulse::with_samples(pulse, samples))
    }

    /// Unfolds `pulse` and subtracts its baseline.
    pub fn deconvolve(
        &mut self,
        context: &EventContext,
        pulse: &CalibratedPulse,
    ) -> PipelineResult<DeconvolvedPulse> {
        let shape = self.calibration.signal_shape(context, pulse.channel)?;
        let mut deconvolved = self.unfold(context, pulse)?;
        let sigmas = self.baseline.remove(&mut deconvolved.samples, shape);
        deconvolved.baseline_sigma = sigmas.baseline_sigma;
        deconvolved.sample_sigma = sigmas.sample_sigma;
        Ok(deconvolved)
    }
}
