//! Builds calibrated pulses by passing Gaussian charge deposits through the
//! same response model the hit pipeline divides out.
use crate::json::{Template, TemplateError};
use num::Complex;
use pulse_to_hits::{
    CalibratedPulse, ChannelCalibration, Event, PipelineError,
    calibration::{CalibrationError, ChannelCategory},
    deconvolution::{ElectronicsShape, electronics_kernel, sensor_kernel, shift_response},
    parameters::ResponseParameters,
};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use realfft::{ComplexToReal, FftError, RealFftPlanner, RealToComplex};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use thiserror::Error;
use tpc_common::{ChannelId, DigitRef, EventContext, WireNumber};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub(crate) enum SimulationError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Transform failed: {0}")]
    Transform(#[from] FftError),
}

pub(crate) struct Simulator {
    template: Template,
    parameters: ResponseParameters,
    size: usize,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
    responses: HashMap<ChannelCategory, Vec<Complex<f64>>>,
    buffer: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
}

impl Simulator {
    pub(crate) fn new(template: Template, parameters: ResponseParameters) -> Self {
        // Twice the pulse length so the convolution does not wrap.
        let size = 2 * template.samples.max(1);
        let mut planner = RealFftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        Self {
            spectrum: forward.make_output_vec(),
            buffer: forward.make_input_vec(),
            template,
            parameters,
            size,
            forward,
            inverse,
            responses: HashMap::new(),
        }
    }

    /// The combined sensor and electronics spectrum of a channel's category.
    fn response(
        &mut self,
        context: &EventContext,
        channel: ChannelId,
    ) -> Result<&[Complex<f64>], SimulationError> {
        let category = ChannelCategory::classify(channel)?;
        if !self.responses.contains_key(&category) {
            let step = self.template.digit_step;
            let shape =
                ElectronicsShape::for_channel(&self.template.calibration, context, channel)?;

            electronics_kernel(&mut self.buffer, self.parameters.shaping_time, step);
            let mut electronics = self.forward.make_output_vec();
            self.forward.process(&mut self.buffer, &mut electronics)?;
            electronics.iter_mut().for_each(|c| *c *= shape.scale);
            shift_response(&mut electronics, shape.time_offset / step, self.size);

            sensor_kernel(&mut self.buffer, category, &self.parameters, step);
            let mut sensor = self.forward.make_output_vec();
            self.forward.process(&mut self.buffer, &mut sensor)?;

            let response = electronics.iter().zip(&sensor).map(|(e, s)| e * s).collect();
            debug!("Computed response for {category:?}");
            self.responses.insert(category, response);
        }
        Ok(self
            .responses
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    /// Convolves the arriving charge with the channel response and adds noise.
    fn pulse<R: Rng + ?Sized>(
        &mut self,
        context: &EventContext,
        channel: ChannelId,
        digit: DigitRef,
        charge: &[f64],
        rng: &mut R,
    ) -> Result<CalibratedPulse, SimulationError> {
        let samples = self.template.samples;
        let noise = Normal::new(0.0, self.template.noise).map_err(TemplateError::from)?;
        let response = self.response(context, channel)?.to_vec();

        self.buffer.fill(0.0);
        self.buffer[..samples].copy_from_slice(charge);
        self.forward.process(&mut self.buffer, &mut self.spectrum)?;
        for (value, response) in self.spectrum.iter_mut().zip(&response) {
            *value *= response;
        }
        if let Some(first) = self.spectrum.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = self.spectrum.last_mut() {
            last.im = 0.0;
        }
        self.inverse.process(&mut self.spectrum, &mut self.buffer)?;

        let scale = self.size as f64;
        let values = self.buffer[..samples]
            .iter()
            .map(|v| v / scale + noise.sample(rng))
            .collect();
        Ok(CalibratedPulse::new(
            channel,
            digit,
            0.0,
            self.template.digit_step,
            values,
        ))
    }

    /// Spreads `charge` over the samples as a Gaussian centred on `time`.
    fn deposit(&self, charge: &mut [f64], time: f64, sd: f64, amount: f64) {
        let step = self.template.digit_step;
        let sd = sd.max(f64::EPSILON);
        let weights: Vec<f64> = (0..charge.len())
            .map(|i| {
                let x = ((i as f64 + 0.5) * step - time) / sd;
                (-0.5 * x * x).exp()
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            for (sample, weight) in charge.iter_mut().zip(weights) {
                *sample += amount * weight / total;
            }
        }
    }

    pub(crate) fn event<R: Rng + ?Sized>(
        &mut self,
        index: usize,
        rng: &mut R,
    ) -> Result<Event, SimulationError> {
        let template = &self.template;
        let context = EventContext {
            run: template.run,
            event: template.first_event + index as u32,
            t0: template.t0,
        };

        let mut charges: BTreeMap<(u8, WireNumber), Vec<f64>> = template
            .wires
            .iter()
            .flat_map(|range| (range.first..range.first + range.count).map(|w| (range.plane, w)))
            .map(|key| (key, vec![0.0; template.samples]))
            .collect();

        let count = template.num_deposits.sample(rng)?.round().max(0.0) as usize;
        if count > 0 && !template.deposits.is_empty() {
            let chooser = template.deposit_index()?;
            for _ in 0..count {
                let deposit = &template.deposits[chooser.sample(rng)];
                let wire = deposit.wire.sample(rng)?.round();
                let key = (deposit.plane, wire.max(0.0) as WireNumber);
                if wire < 0.0 || !template.wires.iter().any(|r| r.contains(key.0, key.1)) {
                    warn!("Deposit on unread wire {0}:{wire} dropped", deposit.plane);
                    continue;
                }
                let time = deposit.time.sample(rng)?;
                let sd = deposit.sd.sample(rng)?;
                let amount = deposit.charge.sample(rng)?
                    * self.attenuation(&context, ChannelId::wire(key.0, key.1), time)?;
                if let Some(charge) = charges.get_mut(&key) {
                    self.deposit(charge, time, sd, amount);
                }
            }
        }

        let mut drift = Vec::with_capacity(charges.len());
        for (digit, ((plane, wire), charge)) in charges.iter().enumerate() {
            let channel = ChannelId::wire(*plane, *wire);
            drift.push(self.pulse(&context, channel, DigitRef(digit), charge, rng)?);
        }
        let quiet = vec![0.0; self.template.samples];
        let mut pmt = Vec::new();
        for number in 0..self.template.pmts {
            let digit = DigitRef(drift.len() + pmt.len());
            pmt.push(self.pulse(&context, ChannelId::pmt(number), digit, &quiet, rng)?);
        }

        Ok(Event {
            context,
            calibration: Some(self.template.calibration.clone()),
            drift,
            pmt,
        })
    }

    /// The fraction of a deposit's charge that reaches the wire.
    fn attenuation(
        &self,
        context: &EventContext,
        channel: ChannelId,
        time: f64,
    ) -> Result<f64, SimulationError> {
        let calibration = &self.template.calibration;
        let lifetime = calibration.electron_lifetime(context);
        let survival = if lifetime > 0.0 {
            (-(time - context.t0).max(0.0) / lifetime).exp()
        } else {
            1.0
        };
        Ok(survival * calibration.collection_efficiency(context, channel)?)
    }
}
