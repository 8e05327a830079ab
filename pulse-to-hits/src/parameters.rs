use crate::{Real, calibration::SignalShape, error::ConfigError};
use clap::Parser;

fn positive(name: &'static str, value: Real) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

fn non_negative(name: &'static str, value: Real) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Negative { name, value })
    }
}

#[derive(Debug, Clone, Parser)]
pub struct DigitizationParameters {
    /// Nominal time between samples (ns).
    #[clap(long = "digitization-step", default_value = "500")]
    pub step: Real,

    /// Nominal length of a digitized pulse (ns).
    #[clap(long = "digitization-pulse", default_value = "2000000")]
    pub pulse: Real,

    /// Length of the response tail appended to the transform (ns).
    #[clap(long = "digitization-response", default_value = "50000")]
    pub response: Real,
}

impl Default for DigitizationParameters {
    fn default() -> Self {
        Self {
            step: 500.0,
            pulse: 2_000_000.0,
            response: 50_000.0,
        }
    }
}

impl DigitizationParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("digitization.step", self.step)?;
        positive("digitization.pulse", self.pulse)?;
        non_negative("digitization.response", self.response)
    }

    /// Number of samples needed to hold a pulse and its response tail.
    pub fn sample_count(&self) -> usize {
        ((self.pulse + self.response) / self.step) as usize
    }
}

#[derive(Debug, Clone, Parser)]
pub struct DeconvolutionParameters {
    /// Half width of the triangular input smoothing; zero disables it.
    #[clap(long = "deconvolution-smoothing", default_value = "0")]
    pub smoothing: usize,

    /// Maximum sample-to-sample change (in sample sigma) for quiet samples.
    #[clap(long = "deconvolution-fluctuation-cut", default_value = "5.0")]
    pub fluctuation_cut: Real,

    /// One-sided ceiling (in baseline sigma above the median) for baseline samples.
    #[clap(long = "deconvolution-baseline-cut", default_value = "3.0")]
    pub baseline_cut: Real,

    /// Width of the sliding window used to judge coherence (samples).
    #[clap(long = "deconvolution-coherence-zone", default_value = "20")]
    pub coherence_zone: usize,

    /// Number of quiet differences required within the coherence zone.
    #[clap(long = "deconvolution-coherence-cut", default_value = "15")]
    pub coherence_cut: usize,

    /// Fraction of the Nyquist frequency where the noise notch starts.
    #[clap(long = "deconvolution-nyquist-fraction", default_value = "0.8")]
    pub nyquist_fraction: Real,

    /// Strength of the noise notch; zero disables it.
    #[clap(long = "deconvolution-noise-power", default_value = "0.0")]
    pub noise_power: Real,
}

impl Default for DeconvolutionParameters {
    fn default() -> Self {
        Self {
            smoothing: 0,
            fluctuation_cut: 5.0,
            baseline_cut: 3.0,
            coherence_zone: 20,
            coherence_cut: 15,
            nyquist_fraction: 0.8,
            noise_power: 0.0,
        }
    }
}

impl DeconvolutionParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("deconvolution.fluctuationCut", self.fluctuation_cut)?;
        non_negative("deconvolution.baselineCut", self.baseline_cut)?;
        if self.coherence_zone == 0 {
            return Err(ConfigError::EmptyCoherenceZone);
        }
        if self.coherence_cut > self.coherence_zone {
            return Err(ConfigError::CoherenceCut {
                cut: self.coherence_cut,
                zone: self.coherence_zone,
            });
        }
        if !(self.nyquist_fraction > 0.0 && self.nyquist_fraction < 1.0) {
            return Err(ConfigError::NyquistFraction(self.nyquist_fraction));
        }
        non_negative("deconvolution.noisePower", self.noise_power)
    }

    /// The smoothing window, always at least one sample.
    pub fn smoothing_window(&self) -> usize {
        self.smoothing + 1
    }
}

#[derive(Debug, Clone, Parser)]
pub struct ResponseParameters {
    /// Shaping time of the CR-(RC)^2 amplifier (ns).
    #[clap(long = "response-shaping-time", default_value = "1000")]
    pub shaping_time: Real,

    /// Decay time of the current on a collection wire (ns).
    #[clap(long = "response-collection-time", default_value = "500")]
    pub collection_time: Real,

    /// Width of each lobe of the current on an induction wire (ns).
    #[clap(long = "response-induction-time", default_value = "1500")]
    pub induction_time: Real,
}

impl Default for ResponseParameters {
    fn default() -> Self {
        Self {
            shaping_time: 1000.0,
            collection_time: 500.0,
            induction_time: 1500.0,
        }
    }
}

impl ResponseParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("response.shapingTime", self.shaping_time)?;
        positive("response.collectionTime", self.collection_time)?;
        positive("response.inductionTime", self.induction_time)
    }
}

/// Cuts that differ between collection (unipolar) and induction (bipolar) planes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassCuts {
    pub maximum: Real,
    pub area: Real,
    pub width: Real,
}

#[derive(Debug, Clone, Parser)]
pub struct PeakSearchParameters {
    /// Minimum peak height on collection wires.
    #[clap(long = "peak-search-charge-collection", default_value = "200")]
    pub charge_collection: Real,

    /// Minimum peak height on induction wires.
    #[clap(long = "peak-search-charge-induction", default_value = "200")]
    pub charge_induction: Real,

    /// Minimum peak area on collection wires; also the noise ceiling.
    #[clap(long = "peak-search-area-collection", default_value = "1000")]
    pub area_collection: Real,

    /// Minimum peak area on induction wires; also the noise ceiling.
    #[clap(long = "peak-search-area-induction", default_value = "1000")]
    pub area_induction: Real,

    /// Expected peak width on collection wires (ns).
    #[clap(long = "peak-search-width-collection", default_value = "1000")]
    pub width_collection: Real,

    /// Expected peak width on induction wires (ns).
    #[clap(long = "peak-search-width-induction", default_value = "1000")]
    pub width_induction: Real,

    /// Peak-search threshold in units of the peak-search noise.
    #[clap(long = "peak-search-noise", default_value = "2.0")]
    pub noise: Real,

    /// Maximum time RMS of a single hit (ns); wider peaks are split.
    #[clap(long = "peak-search-rms-limit", default_value = "3000")]
    pub rms_limit: Real,

    /// Samples ignored at both ends of a pulse.
    #[clap(long = "peak-search-end-skip", default_value = "10")]
    pub end_skip: usize,

    /// Peak-search noise below which a channel is considered dead.
    #[clap(long = "peak-search-dead-noise", default_value = "10.0")]
    pub dead_noise: Real,

    /// Maximum number of accepted peaks per pulse; zero is unlimited.
    #[clap(long = "peak-search-max-peaks", default_value = "50")]
    pub max_peaks: usize,

    /// Maximum number of candidates reported by the peak finder.
    #[clap(long = "peak-search-max-candidates", default_value = "1000")]
    pub max_candidates: usize,

    /// Background clipping and deconvolution iterations.
    #[clap(long = "peak-search-iterations", default_value = "15")]
    pub iterations: usize,

    /// Window of the Markov smoothing applied before the search.
    #[clap(long = "peak-search-smoothing-window", default_value = "3")]
    pub smoothing_window: usize,

    /// Candidate threshold in standard-deviation-like units.
    #[clap(long = "peak-search-threshold", default_value = "1.0")]
    pub threshold: Real,

    /// Fraction of the peak height that bounds the integration extent.
    #[clap(long = "peak-search-integration-threshold", default_value = "0.001")]
    pub integration_threshold: Real,

    /// Multiple of the combined baseline and sample sigma that bounds the
    /// integration extent.
    #[clap(long = "peak-search-integration-noise-threshold", default_value = "0.001")]
    pub integration_noise_threshold: Real,
}

impl Default for PeakSearchParameters {
    fn default() -> Self {
        Self {
            charge_collection: 200.0,
            charge_induction: 200.0,
            area_collection: 1000.0,
            area_induction: 1000.0,
            width_collection: 1000.0,
            width_induction: 1000.0,
            noise: 2.0,
            rms_limit: 3000.0,
            end_skip: 10,
            dead_noise: 10.0,
            max_peaks: 50,
            max_candidates: 1000,
            iterations: 15,
            smoothing_window: 3,
            threshold: 1.0,
            integration_threshold: 0.001,
            integration_noise_threshold: 0.001,
        }
    }
}

impl PeakSearchParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("peakSearch.charge.collection", self.charge_collection)?;
        non_negative("peakSearch.charge.induction", self.charge_induction)?;
        non_negative("peakSearch.area.collection", self.area_collection)?;
        non_negative("peakSearch.area.induction", self.area_induction)?;
        positive("peakSearch.width.collection", self.width_collection)?;
        positive("peakSearch.width.induction", self.width_induction)?;
        non_negative("peakSearch.noise", self.noise)?;
        positive("peakSearch.rmsLimit", self.rms_limit)?;
        non_negative("peakSearch.deadNoise", self.dead_noise)?;
        positive("peakSearch.maxCandidates", self.max_candidates as Real)?;
        non_negative("peakSearch.threshold", self.threshold)?;
        non_negative(
            "peakSearch.integrationNoiseThreshold",
            self.integration_noise_threshold,
        )?;
        if !(self.integration_threshold > 0.0 && self.integration_threshold <= 1.0) {
            return Err(ConfigError::IntegrationThreshold(self.integration_threshold));
        }
        Ok(())
    }

    pub fn cuts_for(&self, shape: SignalShape) -> ClassCuts {
        match shape {
            SignalShape::Unipolar => ClassCuts {
                maximum: self.charge_collection,
                area: self.area_collection,
                width: self.width_collection,
            },
            SignalShape::Bipolar => ClassCuts {
                maximum: self.charge_induction,
                area: self.area_induction,
                width: self.width_induction,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Parser)]
pub struct CorrectionParameters {
    /// Calibration mode: do not correct charge for electron attachment.
    #[clap(long)]
    pub skip_lifetime_correction: bool,

    /// Calibration mode: do not correct charge for collection efficiency.
    #[clap(long)]
    pub skip_efficiency_correction: bool,
}

/// Every tunable of the hit pipeline.
#[derive(Debug, Clone, Default, Parser)]
pub struct PipelineParameters {
    #[command(flatten)]
    pub digitization: DigitizationParameters,

    #[command(flatten)]
    pub deconvolution: DeconvolutionParameters,

    #[command(flatten)]
    pub response: ResponseParameters,

    #[command(flatten)]
    pub peak_search: PeakSearchParameters,

    #[command(flatten)]
    pub corrections: CorrectionParameters,
}

impl PipelineParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.digitization.validate()?;
        self.deconvolution.validate()?;
        self.response.validate()?;
        self.peak_search.validate()
    }
}
