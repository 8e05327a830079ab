mod json;
mod simulation;

use anyhow::{Context, Result};
use clap::Parser;
use json::Template;
use pulse_to_hits::{event::save_events, parameters::ResponseParameters};
use rand::{SeedableRng, rngs::StdRng};
use simulation::Simulator;
use std::{fs::File, io::BufReader, path::PathBuf};
use tpc_common::{init_tracer, tracer::TracerOptions};
use tracing::info;

// cargo run --bin pulse-simulator -- --template template.json --output events.json --seed 1

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// JSON template describing the events to simulate.
    #[clap(long)]
    template: PathBuf,

    /// Where to write the simulated events.
    #[clap(long)]
    output: PathBuf,

    /// Seed for the random number generator, drawn from the OS if not given.
    #[clap(long)]
    seed: Option<u64>,

    #[command(flatten)]
    response: ResponseParameters,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let _tracer = init_tracer!(TracerOptions::default());

    args.response.validate()?;

    let file = File::open(&args.template)
        .with_context(|| format!("Cannot open {}", args.template.display()))?;
    let template: Template = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Cannot parse {}", args.template.display()))?;
    let count = template.events;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut simulator = Simulator::new(template, args.response);
    let events = (0..count)
        .map(|index| simulator.event(index, &mut rng))
        .collect::<Result<Vec<_>, _>>()?;

    save_events(&args.output, &events)?;
    info!("Wrote {count} events to {0}", args.output.display());
    Ok(())
}
