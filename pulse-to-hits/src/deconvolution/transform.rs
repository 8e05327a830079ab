use crate::{
    Real,
    error::{PipelineError, PipelineResult},
};
use num::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// A forward and inverse real FFT pair of one fixed, even length.
pub(crate) struct FrequencyTransform {
    size: usize,
    forward: Arc<dyn RealToComplex<Real>>,
    inverse: Arc<dyn ComplexToReal<Real>>,
    forward_scratch: Vec<Complex<Real>>,
    inverse_scratch: Vec<Complex<Real>>,
}

impl FrequencyTransform {
    pub(crate) fn new(planner: &mut RealFftPlanner<Real>, size: usize) -> Self {
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let forward_scratch = forward.make_scratch_vec();
        let inverse_scratch = inverse.make_scratch_vec();
        Self {
            size,
            forward,
            inverse,
            forward_scratch,
            inverse_scratch,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Number of frequency bins, `size/2 + 1`.
    pub(crate) fn spectrum_len(&self) -> usize {
        self.size / 2 + 1
    }

    /// The input buffer is used as workspace and left in an unspecified state.
    pub(crate) fn forward(
        &mut self,
        input: &mut [Real],
        output: &mut [Complex<Real>],
    ) -> PipelineResult<()> {
        self.forward
            .process_with_scratch(input, output, &mut self.forward_scratch)
            .map_err(|e| PipelineError::Transform {
                length: self.size,
                message: e.to_string(),
            })
    }

    /// The result is not normalised: a forward/inverse pair scales by `size`.
    pub(crate) fn inverse(
        &mut self,
        input: &mut [Complex<Real>],
        output: &mut [Real],
    ) -> PipelineResult<()> {
        // A real signal has no imaginary DC or Nyquist component.
        if let Some(first) = input.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = input.last_mut() {
            last.im = 0.0;
        }
        self.inverse
            .process_with_scratch(input, output, &mut self.inverse_scratch)
            .map_err(|e| PipelineError::Transform {
                length: self.size,
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn forward_then_inverse_scales_by_size() {
        let mut planner = RealFftPlanner::<Real>::new();
        let mut transform = FrequencyTransform::new(&mut planner, 16);
        assert_eq!(transform.spectrum_len(), 9);

        let signal: Vec<Real> = (0..16).map(|i| (i as Real * 0.7).sin() + 0.25).collect();
        let mut input = signal.clone();
        let mut spectrum = vec![Complex::default(); transform.spectrum_len()];
        transform.forward(&mut input, &mut spectrum).unwrap();
        assert_approx_eq!(spectrum[0].re, signal.iter().sum::<Real>());

        let mut output = vec![0.0; 16];
        transform.inverse(&mut spectrum, &mut output).unwrap();
        for (out, sig) in output.iter().zip(signal.iter()) {
            assert_approx_eq!(out / 16.0, sig);
        }
    }
}
