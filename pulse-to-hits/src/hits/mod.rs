//! Turns a baseline-removed wire pulse into hits.
mod extent;

pub use extent::{CHARGE_FLOOR, HitMoments, clip_to_neighbours, hit_extent, split_range};

use crate::{
    Real,
    calibration::ChannelCalibration,
    error::PipelineResult,
    parameters::{CorrectionParameters, PeakSearchParameters},
    peak_search::{NoiseLevel, PeakFinder, PeakSearchSettings},
    pulse::{DeconvolvedPulse, Hit},
};
use std::sync::Arc;
use tpc_common::{EventContext, GeometryId, metrics::rejections::RejectionKind};
use tracing::{debug, error, info};

/// What came of searching one pulse for hits.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WireCharge {
    /// Total corrected charge of the hits made.
    pub charge: Real,
    pub hits: usize,
    /// Set when the pulse was not searched for hits or yielded none.
    pub rejection: Option<RejectionKind>,
}

impl WireCharge {
    fn rejected(kind: RejectionKind) -> Self {
        Self {
            rejection: Some(kind),
            ..Default::default()
        }
    }
}

/// Finds, integrates and calibrates the hits on deconvolved wire pulses.
pub struct WireHitMaker<C> {
    calibration: Arc<C>,
    parameters: PeakSearchParameters,
    corrections: CorrectionParameters,
    finder: PeakFinder,
    claimed: Vec<bool>,
    sorted: Vec<Real>,
    peaks: Vec<Real>,
    ranges: Vec<(usize, usize)>,
}

impl<C: ChannelCalibration> WireHitMaker<C> {
    pub fn new(
        calibration: Arc<C>,
        parameters: PeakSearchParameters,
        corrections: CorrectionParameters,
    ) -> Self {
        Self {
            calibration,
            parameters,
            corrections,
            finder: PeakFinder::default(),
            claimed: Vec::new(),
            sorted: Vec::new(),
            peaks: Vec::new(),
            ranges: Vec::new(),
        }
    }

    /// Appends the hits found on `pulse` to `hits`, in time order.
    pub fn make_hits(
        &mut self,
        context: &EventContext,
        pulse: &DeconvolvedPulse,
        hits: &mut Vec<Hit>,
    ) -> PipelineResult<WireCharge> {
        let channel = pulse.channel;
        let shape = self.calibration.signal_shape(context, channel)?;
        let cuts = self.parameters.cuts_for(shape);
        let samples = &pulse.samples;
        let n = samples.len();
        let digit_step = pulse.checked_digit_step()?;
        let skip = self.parameters.end_skip;
        if n <= 2 * skip + 2 {
            debug!("Channel {channel} has too few samples ({n}) to search");
            return Ok(WireCharge::rejected(RejectionKind::NoPeaks));
        }
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            error!("Channel {channel} has invalid deconvolved sample {index}");
        }

        let settings = PeakSearchSettings {
            width: cuts.width / digit_step,
            threshold: self.parameters.threshold,
            iterations: self.parameters.iterations,
            smoothing_window: self.parameters.smoothing_window,
            max_candidates: self.parameters.max_candidates,
        };
        self.finder.search(samples, &settings);

        let spectrum = self.finder.spectrum();
        let level = NoiseLevel::estimate(&spectrum[skip..n - skip], &mut self.sorted);
        if level.noise < self.parameters.dead_noise {
            info!("Channel {channel} has no signal, noise: {0}", level.noise);
            return Ok(WireCharge::rejected(RejectionKind::Dead));
        }
        if level.noise > cuts.area {
            info!(
                "Channel {channel} has large peak noise: {0}, base: {1}",
                level.noise, level.baseline
            );
            return Ok(WireCharge::rejected(RejectionKind::Noisy));
        }

        self.claimed.clear();
        self.claimed.resize(n, false);
        self.peaks.clear();
        let noise_cut = level.threshold(self.parameters.noise);
        let threshold = self.parameters.integration_threshold;
        let noise_floor = self.parameters.integration_noise_threshold
            * pulse.baseline_sigma.hypot(pulse.sample_sigma);
        for candidate in self.finder.candidates() {
            let index = candidate.index();
            if index < skip || index >= n - skip {
                continue;
            }
            if samples[index] < cuts.maximum
                || spectrum[index] < noise_cut
                || self.claimed[index]
                || candidate.area < cuts.area
            {
                continue;
            }
            let (begin, end) = hit_extent(samples, index, threshold, noise_floor);
            self.claimed[begin..end].fill(true);
            self.peaks.push(candidate.position);
            if self.parameters.max_peaks > 0 && self.peaks.len() >= self.parameters.max_peaks {
                break;
            }
        }
        if self.peaks.is_empty() {
            debug!("Channel {channel} has no accepted peaks");
            return Ok(WireCharge::rejected(RejectionKind::NoPeaks));
        }
        self.peaks.sort_by(Real::total_cmp);

        let mut result = WireCharge::default();
        for (index, position) in self.peaks.iter().enumerate() {
            let peak = (position + 0.5) as usize;
            let extent = hit_extent(samples, peak, threshold, noise_floor);
            let range = clip_to_neighbours(&self.peaks, index, extent);
            self.ranges.clear();
            split_range(
                samples,
                range,
                digit_step,
                self.parameters.rms_limit,
                &mut self.ranges,
            );
            for &(from, to) in &self.ranges {
                let hit = self.make_hit(context, pulse, from, to)?;
                result.charge += hit.charge;
                result.hits += 1;
                hits.push(hit);
            }
        }
        Ok(result)
    }

    /// Integrates `[begin, end)` of `pulse` into a calibrated hit.
    pub fn make_hit(
        &self,
        context: &EventContext,
        pulse: &DeconvolvedPulse,
        begin: usize,
        end: usize,
    ) -> PipelineResult<Hit> {
        let digit_step = pulse.checked_digit_step()?;
        let moments = HitMoments::new(&pulse.samples, begin, end);
        let time = (moments.mean + 0.5) * digit_step + pulse.first_sample_time;
        let time_rms = moments.rms(digit_step);

        let mut charge = moments.charge;
        if !self.corrections.skip_lifetime_correction {
            let velocity = self.calibration.electron_drift_velocity(context);
            let lifetime = self.calibration.electron_lifetime(context);
            if velocity > 0.0 && lifetime > 0.0 {
                let distance = velocity * (time - context.t0).max(0.0);
                charge /= (-distance / (velocity * lifetime)).exp();
            }
        }
        if !self.corrections.skip_efficiency_correction {
            let efficiency = self.calibration.collection_efficiency(context, pulse.channel)?;
            if efficiency > 0.0 {
                charge /= efficiency;
            }
        }

        Ok(Hit {
            geometry: GeometryId::from(pulse.channel),
            digit: pulse.digit,
            charge,
            charge_uncertainty: charge.max(0.0).sqrt(),
            time,
            time_rms,
            time_uncertainty: time_rms / (moments.count.max(1) as Real).sqrt(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{calibration::CalibrationTable, error::PipelineError, pulse::CalibratedPulse};
    use rand::{SeedableRng, rngs::StdRng};
    use rand_distr::{Distribution, Normal};
    use tpc_common::{ChannelId, DigitRef};

    const STEP: Real = 500.0;

    fn parameters() -> PeakSearchParameters {
        PeakSearchParameters {
            width_collection: 3.0 * STEP,
            width_induction: 3.0 * STEP,
            dead_noise: 0.01,
            ..Default::default()
        }
    }

    fn calibrated_maker(
        table: CalibrationTable,
        corrections: CorrectionParameters,
    ) -> WireHitMaker<CalibrationTable> {
        WireHitMaker::new(Arc::new(table), parameters(), corrections)
    }

    fn maker() -> WireHitMaker<CalibrationTable> {
        calibrated_maker(CalibrationTable::default(), CorrectionParameters::default())
    }

    fn noisy_pulse(count: usize, sigma: Real, seed: u64) -> DeconvolvedPulse {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, sigma).unwrap();
        let samples = (0..count).map(|_| normal.sample(&mut rng)).collect();
        let calibrated = CalibratedPulse::new(
            ChannelId::wire(0, 17),
            DigitRef(4),
            0.0,
            STEP,
            vec![0.0; count],
        );
        DeconvolvedPulse::with_samples(&calibrated, samples)
    }

    /// Adds a Gaussian deposit and returns its area.
    fn deposit(pulse: &mut DeconvolvedPulse, centre: Real, sigma: Real, amplitude: Real) -> Real {
        for (i, sample) in pulse.samples.iter_mut().enumerate() {
            let x = (i as Real - centre) / sigma;
            *sample += amplitude * (-0.5 * x * x).exp();
        }
        amplitude * sigma * (2.0 * std::f64::consts::PI).sqrt()
    }

    #[test]
    fn single_peak_gives_one_hit() {
        let mut pulse = noisy_pulse(400, 2.0, 1);
        let area = deposit(&mut pulse, 200.0, 3.0, 3000.0);
        let mut hits = Vec::new();
        let result = maker()
            .make_hits(&EventContext::default(), &pulse, &mut hits)
            .unwrap();

        assert_eq!(result.rejection, None);
        assert_eq!(hits.len(), 1);
        let hit = &hits[0];
        assert!((hit.charge - area).abs() < 0.01 * area, "charge {0}", hit.charge);
        assert!((hit.time - pulse.sample_time(200.0)).abs() < hit.time_rms);
        assert_eq!(hit.geometry, GeometryId::from(pulse.channel));
        assert_eq!(hit.digit, DigitRef(4));
        assert_eq!(result.charge, hit.charge);
    }

    #[test]
    fn close_peaks_split_at_midpoint() {
        // The smaller peak's extent reaches across the larger one, so only
        // the midpoint keeps the larger peak's charge out of its hit.
        let mut pulse = noisy_pulse(400, 2.0, 2);
        let first = deposit(&mut pulse, 190.0, 3.0, 3000.0);
        let second = deposit(&mut pulse, 205.0, 3.0, 1000.0);
        let mut maker = maker();
        maker.parameters.integration_threshold = 0.1;
        let mut hits = Vec::new();
        maker
            .make_hits(&EventContext::default(), &pulse, &mut hits)
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits[0].time < hits[1].time);
        assert!(hits[0].charge > 0.9 * first);
        assert!(hits[1].charge < 1.2 * second);
        let total: Real = hits.iter().map(|h| h.charge).sum();
        assert!(total <= 1.01 * (first + second));
    }

    #[test]
    fn wide_peak_is_split_into_narrow_hits() {
        let mut pulse = noisy_pulse(400, 2.0, 3);
        let area = deposit(&mut pulse, 200.0, 10.0, 3000.0);
        let mut hits = Vec::new();
        let mut maker = maker();
        maker
            .make_hits(&EventContext::default(), &pulse, &mut hits)
            .unwrap();

        assert!(hits.len() > 1);
        for hit in &hits {
            assert!(hit.time_rms <= maker.parameters.rms_limit);
        }
        for pair in hits.windows(2) {
            assert!(pair[0].time < pair[1].time);
        }
        let total: Real = hits.iter().map(|h| h.charge).sum();
        assert!((total - area).abs() < 0.01 * area);
    }

    #[test]
    fn quiet_channel_is_dead() {
        let pulse = noisy_pulse(400, 0.01, 4);
        let mut maker = maker();
        maker.parameters.dead_noise = 10.0;
        let mut hits = Vec::new();
        let result = maker
            .make_hits(&EventContext::default(), &pulse, &mut hits)
            .unwrap();
        assert_eq!(result.rejection, Some(RejectionKind::Dead));
        assert!(hits.is_empty());
    }

    #[test]
    fn loud_channel_is_noisy() {
        let pulse = noisy_pulse(400, 500.0, 5);
        let mut maker = maker();
        maker.parameters.area_collection = 10.0;
        let mut hits = Vec::new();
        let result = maker
            .make_hits(&EventContext::default(), &pulse, &mut hits)
            .unwrap();
        assert_eq!(result.rejection, Some(RejectionKind::Noisy));
        assert!(hits.is_empty());
    }

    #[test]
    fn corrections_can_be_skipped() {
        let mut table = CalibrationTable::default();
        table.collection_efficiency.x = 0.5;
        table.electron_lifetime = 20_000.0;
        let context = EventContext {
            run: 1,
            event: 1,
            t0: 0.0,
        };
        let mut pulse = noisy_pulse(400, 2.0, 6);
        deposit(&mut pulse, 200.0, 3.0, 3000.0);

        let raw = calibrated_maker(
            table.clone(),
            CorrectionParameters {
                skip_lifetime_correction: true,
                skip_efficiency_correction: true,
            },
        )
        .make_hit(&context, &pulse, 180, 220)
        .unwrap();
        assert_eq!(raw.charge, HitMoments::new(&pulse.samples, 180, 220).charge);

        let corrected = calibrated_maker(table.clone(), CorrectionParameters::default())
            .make_hit(&context, &pulse, 180, 220)
            .unwrap();
        let drift_time = raw.time - context.t0;
        let expected = raw.charge / 0.5 / (-drift_time / table.electron_lifetime).exp();
        assert!((corrected.charge - expected).abs() < 1e-6 * expected);
        assert!(corrected.charge_uncertainty > raw.charge_uncertainty);
    }

    #[test]
    fn unknown_channel_is_an_error() {
        let mut pulse = noisy_pulse(400, 2.0, 7);
        pulse.channel = ChannelId::wire(9, 1);
        let mut hits = Vec::new();
        assert!(
            maker()
                .make_hits(&EventContext::default(), &pulse, &mut hits)
                .is_err()
        );
    }

    #[test]
    fn zero_time_span_fails_the_channel() {
        let mut pulse = noisy_pulse(100, 2.0, 8);
        pulse.last_sample_time = pulse.first_sample_time;
        let mut hits = Vec::new();
        assert!(matches!(
            maker().make_hits(&EventContext::default(), &pulse, &mut hits),
            Err(PipelineError::InvalidTimeBounds { .. })
        ));
        assert!(hits.is_empty());
    }

    #[test]
    fn noise_sigmas_bound_the_integration() {
        let mut pulse = noisy_pulse(400, 2.0, 9);
        let area = deposit(&mut pulse, 200.0, 3.0, 3000.0);
        let mut hits = Vec::new();
        maker()
            .make_hits(&EventContext::default(), &pulse, &mut hits)
            .unwrap();
        let quiet = hits[0].clone();

        // A floor of 0.5·hypot(300, 400) = 250 stops the walk near 2.6 sigma.
        pulse.baseline_sigma = 300.0;
        pulse.sample_sigma = 400.0;
        let mut maker = maker();
        maker.parameters.integration_noise_threshold = 0.5;
        let mut hits = Vec::new();
        maker
            .make_hits(&EventContext::default(), &pulse, &mut hits)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].charge < quiet.charge);
        assert!(hits[0].charge > 0.9 * area);
        assert!(hits[0].time_rms < quiet.time_rms);
    }
}
