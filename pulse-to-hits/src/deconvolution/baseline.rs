use crate::{Real, calibration::SignalShape, parameters::DeconvolutionParameters};
use itertools::Itertools;

/// Radius of the triangular smoothing applied to the marked baseline samples.
const SMOOTHING_RADIUS: usize = 5;

/// Dips shorter than this are treated as noise rather than baseline.
const MINIMUM_DIP_LENGTH: usize = 3;

#[derive(Default, Clone, Copy, Debug, PartialEq)]
pub struct BaselineSigmas {
    /// Scatter of the subtracted baseline trace.
    pub baseline_sigma: Real,
    /// Robust sample-to-sample noise scale.
    pub sample_sigma: Real,
}

/// The value at `fraction` of the way through an ascending slice.
pub(crate) fn percentile(sorted: &[Real], fraction: Real) -> Real {
    let index = ((fraction * sorted.len() as Real) as usize).min(sorted.len().saturating_sub(1));
    sorted.get(index).copied().unwrap_or_default()
}

/// Fills each unmarked entry by linear interpolation between its marked
/// neighbours. Entries before the first (or after the last) mark take the
/// value of that mark. With no marks at all, nothing is filled.
fn interpolate(marks: &[Option<Real>], output: &mut Vec<Option<Real>>) {
    output.clear();
    output.extend_from_slice(marks);
    let mut previous: Option<(usize, Real)> = None;
    for (index, mark) in marks.iter().enumerate() {
        let Some(value) = *mark else {
            continue;
        };
        match previous {
            None => output[..index].fill(Some(value)),
            Some((start, start_value)) => {
                let span = (index - start) as Real;
                for (offset, out) in output[start + 1..index].iter_mut().enumerate() {
                    let fraction = (offset + 1) as Real / span;
                    *out = Some(start_value + fraction * (value - start_value));
                }
            }
        }
        previous = Some((index, value));
    }
    if let Some((last, value)) = previous {
        output[last + 1..].fill(Some(value));
    }
}

/// Estimates and subtracts a slowly varying baseline from a deconvolved pulse.
///
/// A sample is taken as baseline when it is not too far above the median,
/// when the surrounding samples do not drift too much, and when enough of
/// the recent sample-to-sample changes are small. Gaps are filled by
/// interpolation, sustained dips below the interpolation are taken into the
/// baseline, and the result is smoothed before subtraction.
pub struct BaselineRemover {
    fluctuation_cut: Real,
    baseline_cut: Real,
    coherence_zone: usize,
    coherence_cut: usize,
    sorted: Vec<Real>,
    differences: Vec<Real>,
    drift: Vec<Real>,
    marks: Vec<Option<Real>>,
    filled: Vec<Option<Real>>,
    smoothed: Vec<Option<Real>>,
    baseline: Vec<Real>,
}

impl BaselineRemover {
    pub fn new(parameters: &DeconvolutionParameters) -> Self {
        Self {
            fluctuation_cut: parameters.fluctuation_cut,
            baseline_cut: parameters.baseline_cut,
            coherence_zone: parameters.coherence_zone.max(1),
            coherence_cut: parameters.coherence_cut,
            sorted: Vec::new(),
            differences: Vec::new(),
            drift: Vec::new(),
            marks: Vec::new(),
            filled: Vec::new(),
            smoothed: Vec::new(),
            baseline: Vec::new(),
        }
    }

    /// The baseline subtracted by the last call to [Self::remove].
    pub fn baseline(&self) -> &[Real] {
        &self.baseline
    }

    pub fn remove(&mut self, samples: &mut [Real], shape: SignalShape) -> BaselineSigmas {
        let n = samples.len();
        if n == 0 {
            self.baseline.clear();
            return BaselineSigmas::default();
        }

        self.sorted.clear();
        self.sorted.extend_from_slice(samples);
        self.sorted.sort_by(Real::total_cmp);
        let median = percentile(&self.sorted, 0.5);
        let robust_sigma = (percentile(&self.sorted, 0.16) - median).abs();

        self.differences.clear();
        self.differences.push(0.0);
        self.differences
            .extend(samples.iter().tuple_windows().map(|(a, b)| (b - a).abs()));
        self.sorted.clear();
        self.sorted.extend_from_slice(&self.differences[1..]);
        self.sorted.sort_by(Real::total_cmp);
        let sample_sigma = percentile(&self.sorted, 0.52);

        let zone = self.coherence_zone;
        let delta_cut = sample_sigma * self.fluctuation_cut;
        let baseline_cut = median + self.baseline_cut * robust_sigma;
        let drift_sigma = match shape {
            SignalShape::Unipolar => sample_sigma,
            SignalShape::Bipolar => sample_sigma * (zone as Real).sqrt(),
        };
        let drift_cut = self.fluctuation_cut * drift_sigma;

        self.find_drift(samples);
        self.mark_quiet_samples(samples, delta_cut, baseline_cut, drift_cut);
        self.add_dips(samples);
        self.smooth_marks();

        interpolate(&self.smoothed, &mut self.filled);
        self.baseline.clear();
        self.baseline
            .extend(self.filled.iter().map(|value| value.unwrap_or_default()));

        for (sample, baseline) in samples.iter_mut().zip(self.baseline.iter()) {
            *sample -= baseline;
        }

        let mean = self.baseline.iter().sum::<Real>() / n as Real;
        let mean_square = self.baseline.iter().map(|b| b * b).sum::<Real>() / n as Real;
        BaselineSigmas {
            baseline_sigma: (mean_square - mean * mean).max(0.0).sqrt(),
            sample_sigma,
        }
    }

    /// Largest excursion from each sample within one coherence zone on either side.
    fn find_drift(&mut self, samples: &[Real]) {
        let n = samples.len();
        let zone = self.coherence_zone;
        self.drift.clear();
        self.drift.resize(n, 0.0);
        for (i, drift) in self.drift.iter_mut().enumerate() {
            let window = &samples[i.saturating_sub(zone)..(i + zone + 1).min(n)];
            *drift = window
                .iter()
                .map(|other| (samples[i] - other).abs())
                .fold(0.0, Real::max);
        }
    }

    /// Marks baseline samples with a forward and a backward sliding window.
    ///
    /// The cuts are evaluated for the sample entering the window, but the
    /// sample marked is the one half a zone behind it. Samples within one
    /// zone of either end are always marked.
    fn mark_quiet_samples(
        &mut self,
        samples: &[Real],
        delta_cut: Real,
        baseline_cut: Real,
        drift_cut: Real,
    ) {
        let n = samples.len();
        let zone = self.coherence_zone;
        let offset = zone / 2;
        self.marks.clear();
        self.marks.resize(n, None);

        let is_quiet = |i: usize| samples[i] <= baseline_cut && self.drift[i] <= drift_cut;

        let mut coherence: isize = 0;
        for i in 0..n {
            if self.differences[i] < delta_cut {
                coherence += 1;
            }
            if i < zone {
                self.marks[i] = Some(samples[i]);
                continue;
            }
            if self.differences[i - zone] < delta_cut {
                coherence -= 1;
            }
            if is_quiet(i) && coherence >= self.coherence_cut as isize {
                self.marks[i - offset] = Some(samples[i - offset]);
            }
        }

        let mut coherence: isize = 0;
        for i in (0..n).rev() {
            if self.differences[i] < delta_cut {
                coherence += 1;
            }
            if i + zone >= n {
                self.marks[i] = Some(samples[i]);
                continue;
            }
            if self.differences[i + zone] < delta_cut {
                coherence -= 1;
            }
            if is_quiet(i) && coherence >= self.coherence_cut as isize {
                self.marks[i + offset] = Some(samples[i + offset]);
            }
        }
    }

    /// Takes runs of unmarked samples that sit below the interpolated
    /// baseline into the baseline, ignoring runs that are too short.
    fn add_dips(&mut self, samples: &[Real]) {
        interpolate(&self.marks, &mut self.filled);
        let mut run_start = None;
        for i in 0..=samples.len() {
            let is_dip = i < samples.len()
                && self.marks[i].is_none()
                && self.filled[i].is_some_and(|level| samples[i] < level);
            match (is_dip, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    if i - start >= MINIMUM_DIP_LENGTH {
                        for j in start..i {
                            self.marks[j] = Some(samples[j]);
                        }
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    /// Triangular smoothing over the marked samples only.
    fn smooth_marks(&mut self) {
        let n = self.marks.len();
        self.smoothed.clear();
        self.smoothed.resize(n, None);
        for i in 0..n {
            let Some(centre) = self.marks[i] else {
                continue;
            };
            let mut sum = SMOOTHING_RADIUS as Real * centre;
            let mut weight = SMOOTHING_RADIUS as Real;
            for j in 1..SMOOTHING_RADIUS {
                let w = (SMOOTHING_RADIUS - j) as Real;
                let neighbours = [i.checked_sub(j), Some(i + j).filter(|k| *k < n)];
                for value in neighbours.into_iter().flatten().filter_map(|k| self.marks[k]) {
                    sum += w * value;
                    weight += w;
                }
            }
            self.smoothed[i] = Some(sum / weight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::{SeedableRng, rngs::StdRng};
    use rand_distr::{Distribution, Normal};

    fn noise(count: usize, offset: Real, sigma: Real, seed: u64) -> Vec<Real> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, sigma).unwrap();
        (0..count).map(|_| offset + normal.sample(&mut rng)).collect()
    }

    #[test]
    fn interpolate_between_marks() {
        let marks = vec![None, Some(1.0), None, None, Some(4.0), None];
        let mut output = Vec::new();
        interpolate(&marks, &mut output);
        let output: Vec<Real> = output.into_iter().map(Option::unwrap).collect();
        assert_eq!(output, vec![1.0, 1.0, 2.0, 3.0, 4.0, 4.0]);

        let mut output = Vec::new();
        interpolate(&[None, None], &mut output);
        assert_eq!(output, vec![None, None]);
    }

    #[test]
    fn flat_input_is_removed_entirely() {
        let mut remover = BaselineRemover::new(&DeconvolutionParameters::default());
        let mut samples = vec![5.0; 200];
        let sigmas = remover.remove(&mut samples, SignalShape::Unipolar);
        assert!(samples.iter().all(|s| s.abs() < 1e-9));
        assert_approx_eq!(sigmas.baseline_sigma, 0.0);
        assert_approx_eq!(sigmas.sample_sigma, 0.0);
    }

    #[test]
    fn noisy_pedestal_is_removed() {
        let mut remover = BaselineRemover::new(&DeconvolutionParameters::default());
        let mut samples = noise(500, 20.0, 1.0, 7);
        let sigmas = remover.remove(&mut samples, SignalShape::Unipolar);
        let mean = samples.iter().sum::<Real>() / samples.len() as Real;
        assert!(mean.abs() < 0.5, "residual mean {mean}");
        assert!(sigmas.baseline_sigma < 1.0);
        assert!(sigmas.sample_sigma > 0.5 && sigmas.sample_sigma < 1.5);
    }

    #[test]
    fn peak_survives_baseline_removal() {
        let mut remover = BaselineRemover::new(&DeconvolutionParameters::default());
        let mut samples = noise(500, 50.0, 1.0, 11);
        for (i, sample) in samples.iter_mut().enumerate() {
            let x = (i as Real - 250.0) / 3.0;
            *sample += 500.0 * (-0.5 * x * x).exp();
        }
        remover.remove(&mut samples, SignalShape::Unipolar);
        assert!((samples[250] - 500.0).abs() < 10.0, "peak {}", samples[250]);
        assert!((remover.baseline()[250] - 50.0).abs() < 10.0);
        assert!(samples[50].abs() < 5.0);
    }

    /// Noise with a slow positive swing, as left on an induction wire by a
    /// long, shallow track segment.
    fn swinging_pedestal(seed: u64) -> Vec<Real> {
        let mut samples = noise(500, 0.0, 1.0, seed);
        for (i, sample) in samples.iter_mut().enumerate().take(260).skip(200) {
            *sample += 15.0 * (std::f64::consts::PI * (i - 200) as Real / 60.0).sin();
        }
        samples
    }

    fn mean_over(samples: &[Real], from: usize, to: usize) -> Real {
        samples[from..to].iter().sum::<Real>() / (to - from) as Real
    }

    #[test]
    fn bipolar_drift_allowance_follows_slow_swings() {
        let parameters = DeconvolutionParameters {
            baseline_cut: 40.0,
            ..Default::default()
        };
        let mut remover = BaselineRemover::new(&parameters);

        let mut bipolar = swinging_pedestal(13);
        remover.remove(&mut bipolar, SignalShape::Bipolar);
        let followed = mean_over(&bipolar, 215, 245);
        assert!(followed.abs() < 3.0, "bipolar residual {followed}");
        assert!(mean_over(remover.baseline(), 215, 245) > 8.0);

        let mut unipolar = swinging_pedestal(13);
        remover.remove(&mut unipolar, SignalShape::Unipolar);
        let kept = mean_over(&unipolar, 215, 245);
        assert!(kept > 8.0, "unipolar residual {kept}");

        // Away from the swing both agree.
        assert!(mean_over(&bipolar, 20, 150).abs() < 0.5);
        assert!(mean_over(&unipolar, 20, 150).abs() < 0.5);
    }

    #[test]
    fn empty_pulse_has_no_baseline() {
        let mut remover = BaselineRemover::new(&DeconvolutionParameters::default());
        let sigmas = remover.remove(&mut [], SignalShape::Bipolar);
        assert_eq!(sigmas, BaselineSigmas::default());
        assert!(remover.baseline().is_empty());
    }
}
