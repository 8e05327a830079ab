//! Candidate peak search on a baseline-removed waveform.
//!
//! The waveform is lifted above zero, smoothed, and a clipped background is
//! subtracted. The remaining peaks are sharpened by deconvolving the expected
//! peak shape, and the local maxima of the sharpened spectrum become
//! candidates.
mod background;
mod gold;
mod markov;

use crate::{Real, deconvolution::percentile};
use background::snip_background;
use gold::gold_deconvolve;
use markov::markov_smooth;

/// Added on top of the largest magnitude when lifting a waveform above zero.
const OFFSET_MARGIN: Real = 100.0;

/// Extra samples either side of the expected width summed into a candidate's area.
const AREA_MARGIN: Real = 5.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakSearchSettings {
    /// Expected peak width (samples).
    pub width: Real,
    /// Candidate threshold in units of the search noise.
    pub threshold: Real,
    pub iterations: usize,
    pub smoothing_window: usize,
    pub max_candidates: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakCandidate {
    /// Sub-sample position of the peak.
    pub position: Real,
    /// Height of the sharpened spectrum at the peak.
    pub height: Real,
    /// Sum of the waveform around the peak.
    pub area: Real,
}

impl PeakCandidate {
    /// Index of the nearest sample.
    pub fn index(&self) -> usize {
        (self.position + 0.5).max(0.0) as usize
    }
}

/// Median and spread of a slice of the search spectrum.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoiseLevel {
    pub baseline: Real,
    pub noise: Real,
}

impl NoiseLevel {
    /// The median of `values`, and the 70th percentile of the absolute
    /// deviations from it.
    pub fn estimate(values: &[Real], sorted: &mut Vec<Real>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        sorted.clear();
        sorted.extend_from_slice(values);
        sorted.sort_by(Real::total_cmp);
        let baseline = percentile(sorted, 0.5);
        sorted.iter_mut().for_each(|v| *v = (*v - baseline).abs());
        sorted.sort_by(Real::total_cmp);
        Self {
            baseline,
            noise: percentile(sorted, 0.7),
        }
    }

    /// The level a peak must reach to stand `cut` noise units above the baseline.
    pub fn threshold(&self, cut: Real) -> Real {
        self.baseline + cut * self.noise
    }
}

/// Finds candidate peaks, reusing its work buffers between pulses.
#[derive(Default)]
pub struct PeakFinder {
    lifted: Vec<Real>,
    smoothed: Vec<Real>,
    background: Vec<Real>,
    residual: Vec<Real>,
    sharpened: Vec<Real>,
    work: Vec<Real>,
    candidates: Vec<PeakCandidate>,
}

impl PeakFinder {
    /// The background-subtracted spectrum of the last search, in sample units.
    pub fn spectrum(&self) -> &[Real] {
        &self.residual
    }

    pub fn candidates(&self) -> &[PeakCandidate] {
        &self.candidates
    }

    /// Searches `samples` and returns the candidates, strongest first.
    pub fn search(&mut self, samples: &[Real], settings: &PeakSearchSettings) -> &[PeakCandidate] {
        let n = samples.len();
        self.candidates.clear();
        self.residual.clear();
        self.background.clear();
        if n < 3 {
            return &self.candidates;
        }

        let offset = samples.iter().map(|s| s.abs()).fold(0.0, Real::max) + OFFSET_MARGIN;
        self.lifted.clear();
        self.lifted.extend(samples.iter().map(|s| s + offset));

        markov_smooth(&self.lifted, settings.smoothing_window, &mut self.smoothed);
        snip_background(
            &self.smoothed,
            settings.iterations,
            &mut self.background,
            &mut self.work,
        );
        self.residual.extend(
            self.smoothed
                .iter()
                .zip(self.background.iter())
                .map(|(s, b)| s - b),
        );
        gold_deconvolve(
            &self.residual,
            settings.width,
            settings.iterations,
            &mut self.sharpened,
        );

        let cut =
            NoiseLevel::estimate(&self.residual, &mut self.work).threshold(settings.threshold);
        let range = (2.0 * (settings.width + AREA_MARGIN)) as usize;
        for i in 1..n - 1 {
            let height = self.sharpened[i];
            let is_maximum = height > self.sharpened[i - 1] && height >= self.sharpened[i + 1];
            if !is_maximum || height <= 0.0 || self.residual[i] <= cut {
                continue;
            }
            let around = &self.sharpened[i - 1..=i + 1];
            let weight: Real = around.iter().sum();
            let position = (i - 1) as Real
                + around
                    .iter()
                    .enumerate()
                    .map(|(k, v)| k as Real * v)
                    .sum::<Real>()
                    / weight;
            let area = samples[i.saturating_sub(range)..(i + range + 1).min(n)]
                .iter()
                .sum();
            self.candidates.push(PeakCandidate {
                position,
                height,
                area,
            });
        }

        self.candidates
            .sort_by(|a, b| b.height.total_cmp(&a.height));
        self.candidates.truncate(settings.max_candidates);
        &self.candidates
    }
}
