//! Frequency-domain response of the readout chain.
//!
//! A channel's pulse is modelled as the deposited charge convolved with a
//! sensor response (how the drifting charge induces current on the wire)
//! and an electronics response (the shaping amplifier and digitizer).
//! Both are sampled at the digitization step and transformed to
//! `size/2 + 1` frequency bins so they can be divided out of a pulse.
use super::transform::FrequencyTransform;
use crate::{
    Real,
    calibration::{CalibrationError, ChannelCalibration, ChannelCategory},
    error::PipelineResult,
    parameters::ResponseParameters,
};
use num::Complex;
use std::{f64::consts::PI, sync::Arc};
use tpc_common::{ChannelId, EventContext, EventNumber, RunNumber};
use tracing::debug;

/// Response bins below this fraction of the largest bin are raised to it.
pub const RESPONSE_FLOOR: Real = 1e-3;

/// Beyond this many decay constants a kernel is treated as zero.
const KERNEL_CUTOFF: Real = 50.0;

/// Electronics constants that shape the amplifier response.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElectronicsShape {
    /// Overall scale, gain times digitizer slope.
    pub scale: Real,
    /// Time offset of the response (ns).
    pub time_offset: Real,
}

impl ElectronicsShape {
    pub fn for_channel<C: ChannelCalibration>(
        calibration: &C,
        context: &EventContext,
        channel: ChannelId,
    ) -> PipelineResult<Self> {
        let gain = calibration.gain_constant(context, channel, 1)?;
        let slope = calibration.digitizer_constant(context, channel, 1)?;
        let time_offset = calibration.time_constant(context, channel, 0)?;
        let scale = gain * slope;
        if scale == 0.0 || !scale.is_finite() {
            return Err(CalibrationError::MissingConstant {
                channel,
                name: "gain",
            }
            .into());
        }
        Ok(Self { scale, time_offset })
    }
}

/// Fills `kernel` with the CR-(RC)^2 impulse response, normalised to unit sum.
pub fn electronics_kernel(kernel: &mut [Real], shaping_time: Real, digit_step: Real) {
    for (i, value) in kernel.iter_mut().enumerate() {
        let x = i as Real * digit_step / shaping_time;
        *value = if x < KERNEL_CUTOFF {
            x * x * (-x).exp()
        } else {
            0.0
        };
    }
    normalise(kernel);
}

/// Fills `kernel` with the current induced on a wire by a point charge.
///
/// Collection wires see a one-sided exponential with unit sum. Induction
/// wires see a positive lobe followed by an equal negative lobe, scaled so
/// the positive lobe has unit area. Photomultipliers are an identity.
pub fn sensor_kernel(
    kernel: &mut [Real],
    category: ChannelCategory,
    parameters: &ResponseParameters,
    digit_step: Real,
) {
    kernel.fill(0.0);
    match category {
        ChannelCategory::XWire => {
            for (i, value) in kernel.iter_mut().enumerate() {
                let x = i as Real * digit_step / parameters.collection_time;
                if x >= KERNEL_CUTOFF {
                    break;
                }
                *value = (-x).exp();
            }
            normalise(kernel);
        }
        ChannelCategory::VWire | ChannelCategory::UWire => {
            let lobe = ((parameters.induction_time / digit_step).round() as usize)
                .clamp(1, (kernel.len() / 2).max(1));
            let mut positive = 0.0;
            for (i, value) in kernel.iter_mut().take(2 * lobe).enumerate() {
                *value = (PI * (i as Real + 0.5) / lobe as Real).sin();
                if i < lobe {
                    positive += *value;
                }
            }
            if positive > 0.0 {
                kernel.iter_mut().for_each(|v| *v /= positive);
            }
        }
        ChannelCategory::Pmt => {
            if let Some(first) = kernel.first_mut() {
                *first = 1.0;
            }
        }
    }
}

fn normalise(kernel: &mut [Real]) {
    let sum: Real = kernel.iter().sum();
    if sum > 0.0 {
        kernel.iter_mut().for_each(|v| *v /= sum);
    }
}

/// Raises every bin below `RESPONSE_FLOOR` of the largest magnitude to that
/// level, keeping its phase.
pub fn floor_response(response: &mut [Complex<Real>]) {
    let largest = response.iter().map(|c| c.norm()).fold(0.0, Real::max);
    let floor = largest * RESPONSE_FLOOR;
    if floor <= 0.0 {
        response.fill(Complex::new(1.0, 0.0));
        return;
    }
    for value in response.iter_mut() {
        let magnitude = value.norm();
        if magnitude < floor {
            *value = if magnitude > 0.0 {
                *value * (floor / magnitude)
            } else {
                Complex::new(floor, 0.0)
            };
        }
    }
}

/// Delays a spectrum by `shift` samples (which may be fractional or negative).
pub fn shift_response(response: &mut [Complex<Real>], shift: Real, size: usize) {
    if shift == 0.0 {
        return;
    }
    for (k, value) in response.iter_mut().enumerate() {
        let phase = -2.0 * PI * k as Real * shift / size as Real;
        *value *= Complex::from_polar(1.0, phase);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct ResponseKey {
    channel: ChannelId,
    run: RunNumber,
    event: EventNumber,
    size: usize,
    digit_step: Real,
}

/// Computes, and caches for reuse, the response functions of one channel.
///
/// The cache is keyed on channel, acquisition and transform geometry so a
/// response is never reused for a different channel or calibration snapshot.
pub struct ResponseModel<C> {
    calibration: Arc<C>,
    parameters: ResponseParameters,
    key: Option<ResponseKey>,
    kernel: Vec<Real>,
    electronics: Vec<Complex<Real>>,
    sensor: Vec<Complex<Real>>,
}

impl<C: ChannelCalibration> ResponseModel<C> {
    pub fn new(calibration: Arc<C>, parameters: ResponseParameters) -> Self {
        Self {
            calibration,
            parameters,
            key: None,
            kernel: Vec::new(),
            electronics: Vec::new(),
            sensor: Vec::new(),
        }
    }

    pub fn electronics(&self) -> &[Complex<Real>] {
        &self.electronics
    }

    pub fn sensor(&self) -> &[Complex<Real>] {
        &self.sensor
    }

    /// Makes the stored responses valid for `channel` in `context`.
    pub(crate) fn update(
        &mut self,
        context: &EventContext,
        channel: ChannelId,
        digit_step: Real,
        transform: &mut FrequencyTransform,
    ) -> PipelineResult<()> {
        let key = ResponseKey {
            channel,
            run: context.run,
            event: context.event,
            size: transform.size(),
            digit_step,
        };
        if self.key == Some(key) {
            return Ok(());
        }
        // Unset until both responses are complete.
        self.key = None;

        let category = ChannelCategory::classify(channel)?;
        let shape = ElectronicsShape::for_channel(self.calibration.as_ref(), context, channel)?;
        debug!("Computing response for channel {channel} in {context}");

        let size = transform.size();
        let bins = transform.spectrum_len();
        self.kernel.resize(size, 0.0);
        self.electronics.resize(bins, Complex::default());
        self.sensor.resize(bins, Complex::default());

        electronics_kernel(&mut self.kernel, self.parameters.shaping_time, digit_step);
        transform.forward(&mut self.kernel, &mut self.electronics)?;
        self.electronics.iter_mut().for_each(|c| *c *= shape.scale);
        shift_response(&mut self.electronics, shape.time_offset / digit_step, size);
        floor_response(&mut self.electronics);

        sensor_kernel(&mut self.kernel, category, &self.parameters, digit_step);
        transform.forward(&mut self.kernel, &mut self.sensor)?;
        floor_response(&mut self.sensor);

        self.key = Some(key);
        Ok(())
    }
}
