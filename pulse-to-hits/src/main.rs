use anyhow::{Context, Result};
use clap::Parser;
use pulse_to_hits::{
    CalibrationStore, CalibrationTable, EventProcessor, PipelineParameters,
    event::{load_calibration, load_events, save_hits},
    save_to_file::{SaveToFileFilter, get_save_file_name, timed_samples},
};
use std::{path::PathBuf, sync::Arc};
use tpc_common::{
    init_tracer,
    metrics::{component_info_metric, describe_pipeline_metrics},
    tracer::TracerOptions,
};
use tracing::{info, level_filters::LevelFilter};

// cargo run --bin pulse-to-hits -- --input events.json --output hits.json --threads 4

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// JSON file of calibrated events.
    #[clap(long)]
    input: PathBuf,

    /// Where to write the hits, as JSON.
    #[clap(long)]
    output: PathBuf,

    /// Calibration used for events that carry none of their own.
    #[clap(long)]
    calibration: Option<PathBuf>,

    /// Directory to write each deconvolved pulse to, as CSV.
    #[clap(long)]
    save_deconvolved: Option<PathBuf>,

    /// Include the deconvolved pulses in the output.
    #[clap(long)]
    keep_deconvolved: bool,

    /// Worker threads for channel processing, 0 processes on the main thread.
    #[clap(long, default_value = "0")]
    threads: usize,

    /// Log span entry and exit.
    #[clap(long)]
    trace_spans: bool,

    #[command(flatten)]
    parameters: PipelineParameters,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let _tracer = init_tracer!(TracerOptions {
        default_level: LevelFilter::INFO,
        with_span_events: args.trace_spans,
    });
    component_info_metric("pulse-to-hits");
    describe_pipeline_metrics();

    args.parameters.validate()?;

    let fallback = match &args.calibration {
        Some(path) => load_calibration(path)?,
        None => CalibrationTable::default(),
    };
    let events = load_events(&args.input)?;
    info!("Loaded {0} events from {1}", events.len(), args.input.display());

    let mut store = CalibrationStore::new(fallback);
    for event in &events {
        if let Some(table) = &event.calibration {
            store.insert(&event.context, table.clone());
        }
    }

    let keep_deconvolved = args.keep_deconvolved || args.save_deconvolved.is_some();
    let mut processor = EventProcessor::new(Arc::new(store), args.parameters)
        .with_threads(args.threads)?
        .keep_deconvolved(keep_deconvolved);

    let mut output = Vec::with_capacity(events.len());
    for event in &events {
        let mut hits = processor.process_event(event);
        info!(
            "{0}: {1} hits, charge {2}",
            event.context,
            hits.hit_count(),
            hits.charge
        );
        if let Some(dir) = &args.save_deconvolved {
            for pulse in &hits.deconvolved {
                let path = get_save_file_name(dir, &event.context, pulse.channel, "deconv");
                timed_samples(pulse)
                    .save_to_file(&path)
                    .with_context(|| format!("Cannot write {}", path.display()))?;
            }
            if !args.keep_deconvolved {
                hits.deconvolved.clear();
            }
        }
        output.push(hits);
    }

    save_hits(&args.output, &output)?;
    info!("Wrote {0} events to {1}", output.len(), args.output.display());
    Ok(())
}
