mod tracer_engine;

pub use tracer_engine::{TracerEngine, TracerOptions};

/// Should be called once at the start of each binary.
/// The macro passes the binary and module names to the tracer's startup log.
#[macro_export]
macro_rules! init_tracer {
    ($options:expr) => {{
        $crate::tracer::TracerEngine::new($options, env!("CARGO_BIN_NAME"), module_path!())
    }};
}
