use crate::{
    Real,
    calibration::ChannelCalibration,
    deconvolution::Deconvolver,
    error::PipelineResult,
    event::{Event, EventHits},
    hits::{WireCharge, WireHitMaker},
    parameters::PipelineParameters,
    pulse::{CalibratedPulse, DeconvolvedPulse, Hit, HitSelection},
};
use metrics::counter;
use rayon::{
    ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder,
    iter::{IntoParallelRefIterator, ParallelIterator},
};
use std::sync::{Arc, Mutex, PoisonError};
use tpc_common::{
    EventContext,
    metrics::{
        failures,
        names::{CHANNELS_REJECTED, FAILURES, HITS_MADE, PULSES_PROCESSED},
        rejections,
    },
};
use tracing::{debug, error};

/// Name of the hit selection wire hits are stored under.
pub const DRIFT_SELECTION: &str = "drift";

/// The result of running one pulse through the pipeline.
pub struct PulseOutput {
    pub hits: Vec<Hit>,
    pub deconvolved: DeconvolvedPulse,
    pub charge: WireCharge,
}

/// The complete per-pulse pipeline, owning every scratch buffer it uses.
pub struct PulseProcessor<C> {
    deconvolver: Deconvolver<C>,
    hit_maker: WireHitMaker<C>,
}

impl<C: ChannelCalibration> PulseProcessor<C> {
    pub fn new(calibration: Arc<C>, parameters: &PipelineParameters) -> Self {
        Self {
            deconvolver: Deconvolver::new(calibration.clone(), parameters),
            hit_maker: WireHitMaker::new(
                calibration,
                parameters.peak_search.clone(),
                parameters.corrections.clone(),
            ),
        }
    }

    #[tracing::instrument(skip_all, fields(channel = %pulse.channel, num_hits))]
    pub fn process(
        &mut self,
        context: &EventContext,
        pulse: &CalibratedPulse,
    ) -> PipelineResult<PulseOutput> {
        let deconvolved = self.deconvolver.deconvolve(context, pulse)?;
        let mut hits = Vec::new();
        let charge = self.hit_maker.make_hits(context, &deconvolved, &mut hits)?;
        tracing::Span::current().record("num_hits", hits.len());
        Ok(PulseOutput {
            hits,
            deconvolved,
            charge,
        })
    }
}

/// Runs every drift pulse of an event through a [PulseProcessor].
///
/// A failure on one channel is logged and counted, and that channel
/// contributes no hits. Processors, and the transforms and responses they
/// hold, live for as long as the [EventProcessor].
pub struct EventProcessor<C> {
    calibration: Arc<C>,
    parameters: PipelineParameters,
    processor: PulseProcessor<C>,
    pool: Option<ThreadPool>,
    /// One processor per pool thread, indexed by the rayon thread index.
    workers: Vec<Mutex<PulseProcessor<C>>>,
    keep_deconvolved: bool,
}

impl<C: ChannelCalibration + Send + Sync> EventProcessor<C> {
    pub fn new(calibration: Arc<C>, parameters: PipelineParameters) -> Self {
        Self {
            processor: PulseProcessor::new(calibration.clone(), &parameters),
            calibration,
            parameters,
            pool: None,
            workers: Vec::new(),
            keep_deconvolved: false,
        }
    }

    /// Spreads the channels of each event over `threads` workers, each with
    /// its own [PulseProcessor]. Zero keeps processing on the calling thread.
    pub fn with_threads(mut self, threads: usize) -> Result<Self, ThreadPoolBuildError> {
        self.pool = match threads {
            0 => None,
            threads => Some(ThreadPoolBuilder::new().num_threads(threads).build()?),
        };
        self.workers = (0..threads)
            .map(|_| Mutex::new(PulseProcessor::new(self.calibration.clone(), &self.parameters)))
            .collect();
        Ok(self)
    }

    /// Also returns the deconvolved pulses with each event's hits.
    pub fn keep_deconvolved(mut self, keep: bool) -> Self {
        self.keep_deconvolved = keep;
        self
    }

    fn process_pulses(&mut self, event: &Event) -> Vec<PipelineResult<PulseOutput>> {
        let context = &event.context;
        match &self.pool {
            None => event
                .drift
                .iter()
                .map(|pulse| self.processor.process(context, pulse))
                .collect(),
            Some(pool) => {
                let workers = &self.workers;
                pool.install(|| {
                    event
                        .drift
                        .par_iter()
                        .map(|pulse| {
                            let index = rayon::current_thread_index().unwrap_or_default();
                            // Never held across pulses.
                            workers[index % workers.len()]
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .process(context, pulse)
                        })
                        .collect()
                })
            }
        }
    }

    #[tracing::instrument(skip_all, fields(
        run = event.context.run,
        event = event.context.event,
        num_hits,
    ))]
    pub fn process_event(&mut self, event: &Event) -> EventHits {
        if !event.pmt.is_empty() {
            debug!("Skipping {0} photon sensor pulses", event.pmt.len());
        }

        let results = self.process_pulses(event);
        let mut output = EventHits::new(event.context);
        let mut selection = HitSelection::new(DRIFT_SELECTION);
        let mut charge: Real = 0.0;
        for (pulse, result) in event.drift.iter().zip(results) {
            counter!(PULSES_PROCESSED).increment(1);
            match result {
                Ok(processed) => {
                    if let Some(kind) = processed.charge.rejection {
                        counter!(CHANNELS_REJECTED, &[rejections::get_label(kind)]).increment(1);
                    }
                    counter!(HITS_MADE).increment(processed.hits.len() as u64);
                    charge += processed.charge.charge;
                    selection.hits.extend(processed.hits);
                    if self.keep_deconvolved {
                        output.deconvolved.push(processed.deconvolved);
                    }
                }
                Err(e) => {
                    error!("Channel {0} failed: {e}", pulse.channel);
                    counter!(FAILURES, &[failures::get_label(e.failure_kind())]).increment(1);
                }
            }
        }

        tracing::Span::current().record("num_hits", selection.len());
        output.charge = charge;
        output.insert(selection);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        calibration::{CalibrationTable, ChannelCategory},
        deconvolution::{ElectronicsShape, electronics_kernel, sensor_kernel},
        parameters::{DigitizationParameters, PeakSearchParameters},
    };
    use rand::{SeedableRng, rngs::StdRng};
    use rand_distr::{Distribution, Normal};
    use tpc_common::{ChannelId, DigitRef};

    const STEP: Real = 500.0;
    const SAMPLES: usize = 512;

    fn parameters() -> PipelineParameters {
        PipelineParameters {
            digitization: DigitizationParameters {
                step: STEP,
                pulse: STEP * (SAMPLES - 1) as Real,
                response: 0.0,
            },
            peak_search: PeakSearchParameters {
                width_collection: 3.0 * STEP,
                width_induction: 3.0 * STEP,
                dead_noise: 0.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// A collection wire pulse for a Gaussian deposit at `centre`, built by
    /// convolving with the same kernels the deconvolver divides out.
    fn collection_pulse(number: u32, centre: Real, area: Real, seed: u64) -> CalibratedPulse {
        let params = parameters();
        let table = CalibrationTable::default();
        let channel = ChannelId::wire(0, number);
        let shape =
            ElectronicsShape::for_channel(&table, &EventContext::default(), channel).unwrap();
        let mut electronics = vec![0.0; SAMPLES];
        electronics_kernel(&mut electronics, params.response.shaping_time, STEP);
        let mut sensor = vec![0.0; SAMPLES];
        sensor_kernel(&mut sensor, ChannelCategory::XWire, &params.response, STEP);

        let sigma = 3.0;
        let deposit: Vec<Real> = (0..SAMPLES)
            .map(|i| {
                let x = (i as Real - centre) / sigma;
                area / (sigma * (2.0 * std::f64::consts::PI).sqrt()) * (-0.5 * x * x).exp()
            })
            .collect();
        let convolve = |signal: &[Real], kernel: &[Real]| -> Vec<Real> {
            (0..SAMPLES)
                .map(|i| (0..=i).map(|j| signal[j] * kernel[i - j]).sum())
                .collect()
        };
        let response = convolve(&convolve(&deposit, &sensor), &electronics);

        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.01).unwrap();
        let samples = response
            .iter()
            .map(|v| shape.scale * v + noise.sample(&mut rng))
            .collect();
        CalibratedPulse::new(channel, DigitRef(number as usize), 0.0, STEP, samples)
    }

    fn event(drift: Vec<CalibratedPulse>) -> Event {
        Event {
            context: EventContext {
                run: 1,
                event: 1,
                t0: 0.0,
            },
            drift,
            ..Default::default()
        }
    }

    #[test]
    fn pulse_processor_finds_the_deposit() {
        let pulse = collection_pulse(5, 200.0, 20_000.0, 1);
        let calibration = Arc::new(CalibrationTable::default());
        let mut processor = PulseProcessor::new(calibration, &parameters());
        let output = processor
            .process(&EventContext::default(), &pulse)
            .unwrap();

        assert_eq!(output.charge.rejection, None);
        assert!(!output.hits.is_empty());
        let total: Real = output.hits.iter().map(|h| h.charge).sum();
        assert!((total - 20_000.0).abs() < 0.05 * 20_000.0, "charge {total}");
        let strongest = output
            .hits
            .iter()
            .max_by(|a, b| a.charge.total_cmp(&b.charge))
            .unwrap();
        assert!((strongest.time - 200.5 * STEP).abs() < 4.0 * STEP);
        assert_eq!(output.deconvolved.sample_count(), SAMPLES);
    }

    #[test]
    fn failed_channel_does_not_stop_the_event() {
        let mut unknown = collection_pulse(6, 150.0, 10_000.0, 2);
        unknown.channel = ChannelId::wire(5, 6);
        let good = collection_pulse(7, 300.0, 10_000.0, 3);
        let calibration = Arc::new(CalibrationTable::default());
        let mut processor = EventProcessor::new(calibration, parameters());

        let hits = processor.process_event(&event(vec![unknown, good]));
        let drift = hits.selection(DRIFT_SELECTION).unwrap();
        assert!(!drift.is_empty());
        assert!(drift.iter().all(|hit| hit.digit == DigitRef(7)));
        assert!(hits.deconvolved.is_empty());
        assert!((hits.charge - drift.iter().map(|h| h.charge).sum::<Real>()).abs() < 1e-6);
    }

    #[test]
    fn threaded_processing_matches_sequential() {
        let pulses: Vec<_> = (0..6)
            .map(|n| collection_pulse(n, 100.0 + 40.0 * n as Real, 10_000.0, n as u64))
            .collect();
        let event = event(pulses);

        let calibration = Arc::new(CalibrationTable::default());
        let mut sequential = EventProcessor::new(calibration.clone(), parameters());
        let mut threaded = EventProcessor::new(calibration, parameters())
            .with_threads(3)
            .unwrap()
            .keep_deconvolved(true);

        let expected = sequential.process_event(&event);
        let actual = threaded.process_event(&event);
        assert_eq!(expected.hits, actual.hits);
        assert_eq!(threaded.workers.len(), 3);

        // The worker processors are reused for the next event.
        let again = threaded.process_event(&event);
        assert_eq!(expected.hits, again.hits);
        assert_eq!(threaded.workers.len(), 3);
        assert_eq!(actual.deconvolved.len(), 6);
        let channels: Vec<_> = actual.deconvolved.iter().map(|p| p.channel).collect();
        let inputs: Vec<_> = event.drift.iter().map(|p| p.channel).collect();
        assert_eq!(channels, inputs);
    }

    #[test]
    fn empty_event_has_an_empty_drift_selection() {
        let calibration = Arc::new(CalibrationTable::default());
        let mut processor = EventProcessor::new(calibration, parameters());
        let hits = processor.process_event(&event(Vec::new()));
        assert_eq!(hits.selection(DRIFT_SELECTION), Some(&[][..]));
        assert_eq!(hits.charge, 0.0);
    }
}
