use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt};

pub struct TracerOptions {
    /// Level used when `RUST_LOG` is not set.
    pub default_level: LevelFilter,
    /// Emit span enter/exit events as well as log lines.
    pub with_span_events: bool,
}

impl Default for TracerOptions {
    fn default() -> Self {
        Self {
            default_level: LevelFilter::INFO,
            with_span_events: false,
        }
    }
}

/// This object initialises the stdout tracer, given a TracerOptions struct.
pub struct TracerEngine;

impl TracerEngine {
    /// Initialises the stdout tracer for the crate
    /// #Arguments
    /// * `options` - The caller-specified instance of TracerOptions.
    /// * `service_name` - The name of the binary the tracer is attached to.
    /// * `module_name` - The name of the current module.
    /// #Returns
    /// An instance of TracerEngine
    pub fn new(options: TracerOptions, service_name: &str, module_name: &str) -> Self {
        let span_events = if options.with_span_events {
            tracing_subscriber::fmt::format::FmtSpan::NEW
                | tracing_subscriber::fmt::format::FmtSpan::CLOSE
        } else {
            tracing_subscriber::fmt::format::FmtSpan::NONE
        };
        let stdout_tracer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_span_events(span_events);

        // This filter is applied to the stdout tracer
        let log_filter = EnvFilter::builder()
            .with_default_directive(options.default_level.into())
            .from_env_lossy();

        let subscriber =
            tracing_subscriber::Registry::default().with(stdout_tracer.with_filter(log_filter));

        // A second initialisation (e.g. in tests) keeps the existing subscriber.
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            tracing::warn!("Global tracing subscriber already set, keeping existing one");
        }
        tracing::debug!("Tracer initialised for {service_name} in {module_name}");

        Self
    }
}
