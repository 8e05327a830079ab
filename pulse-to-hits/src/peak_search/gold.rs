use crate::Real;

/// Below this width (samples) the response is treated as a delta function.
const MINIMUM_SIGMA: Real = 0.5;

/// A symmetric Gaussian kernel with unit sum, indexed from `-reach` to `reach`.
fn gaussian_kernel(sigma: Real) -> Vec<Real> {
    let reach = (3.0 * sigma).ceil() as isize;
    let mut kernel: Vec<Real> = (-reach..=reach)
        .map(|m| {
            let x = m as Real / sigma;
            (-0.5 * x * x).exp()
        })
        .collect();
    let sum: Real = kernel.iter().sum();
    kernel.iter_mut().for_each(|v| *v /= sum);
    kernel
}

/// Correlates `source` with a symmetric kernel, treating samples outside
/// the spectrum as zero.
fn correlate(source: &[Real], kernel: &[Real], output: &mut [Real]) {
    let reach = (kernel.len() / 2) as isize;
    let n = source.len() as isize;
    for (i, out) in output.iter_mut().enumerate() {
        *out = kernel
            .iter()
            .enumerate()
            .filter_map(|(k, weight)| {
                let j = i as isize + k as isize - reach;
                (0..n).contains(&j).then(|| weight * source[j as usize])
            })
            .sum();
    }
}

/// Sharpens a non-negative spectrum by Gold deconvolution with a Gaussian
/// response of width `sigma` samples.
///
/// Each iteration multiplies the estimate by the ratio of the folded data to
/// the folded estimate, so a non-negative input stays non-negative.
pub(crate) fn gold_deconvolve(
    source: &[Real],
    sigma: Real,
    iterations: usize,
    output: &mut Vec<Real>,
) {
    output.clear();
    output.extend(source.iter().map(|v| v.max(0.0)));
    if sigma < MINIMUM_SIGMA || iterations == 0 || source.is_empty() {
        return;
    }
    let kernel = gaussian_kernel(sigma);
    // The Gram kernel (H^T H) of a symmetric kernel is its self-correlation.
    let reach = kernel.len() - 1;
    let mut gram = vec![0.0; 2 * reach + 1];
    for (m, value) in gram.iter_mut().enumerate() {
        let lag = m as isize - reach as isize;
        *value = kernel
            .iter()
            .enumerate()
            .filter_map(|(k, a)| {
                let j = k as isize + lag;
                (0..kernel.len() as isize)
                    .contains(&j)
                    .then(|| a * kernel[j as usize])
            })
            .sum();
    }

    let mut folded_source = vec![0.0; source.len()];
    correlate(output, &kernel, &mut folded_source);
    let mut folded_estimate = vec![0.0; source.len()];
    for _ in 0..iterations {
        correlate(output, &gram, &mut folded_estimate);
        for ((estimate, data), model) in output
            .iter_mut()
            .zip(&folded_source)
            .zip(&folded_estimate)
        {
            *estimate = if *model > 0.0 {
                *estimate * data / model
            } else {
                0.0
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn kernel_has_unit_sum() {
        let kernel = gaussian_kernel(2.0);
        assert_eq!(kernel.len(), 13);
        assert_approx_eq!(kernel.iter().sum::<Real>(), 1.0);
        assert_approx_eq!(kernel[0], kernel[12]);
    }

    #[test]
    fn deconvolution_sharpens_a_peak() {
        let source: Vec<Real> = (0..60)
            .map(|i| {
                let x = (i as Real - 30.0) / 2.0;
                100.0 * (-0.5 * x * x).exp()
            })
            .collect();
        let mut output = Vec::new();
        gold_deconvolve(&source, 2.0, 20, &mut output);
        assert!(output.iter().all(|v| *v >= 0.0));
        assert!(output[30] > source[30]);
        let peak = output
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(30));
    }

    #[test]
    fn narrow_response_is_identity() {
        let source = vec![1.0, -2.0, 3.0];
        let mut output = Vec::new();
        gold_deconvolve(&source, 0.1, 10, &mut output);
        assert_eq!(output, vec![1.0, 0.0, 3.0]);
    }
}
