use metrics::{describe_counter, describe_gauge, gauge};

pub fn component_info_metric(name: &'static str) {
    static NAME: &str = "tpc_hit_pipeline_component_info";

    describe_gauge!(NAME, "Basic information about the component");

    let git_rev = option_env!("GIT_VERSION").unwrap_or("unknown");
    gauge!(NAME, "component" => name, "git_version" => git_rev).set(1);
}

pub fn describe_pipeline_metrics() {
    describe_counter!(names::PULSES_PROCESSED, "Pulses run through the hit pipeline");
    describe_counter!(names::HITS_MADE, "Hits produced from drift pulses");
    describe_counter!(
        names::CHANNELS_REJECTED,
        "Channels that produced no hits, by reason"
    );
    describe_counter!(names::FAILURES, "Channel failures by type");
}

pub mod names {
    use const_format::concatcp;

    pub const METRIC_NAME_PREFIX: &str = "tpc_hit_pipeline_";

    pub const FAILURES: &str = concatcp!(METRIC_NAME_PREFIX, "failures");
    pub const PULSES_PROCESSED: &str = concatcp!(METRIC_NAME_PREFIX, "pulses_processed");
    pub const HITS_MADE: &str = concatcp!(METRIC_NAME_PREFIX, "hits_made");
    pub const CHANNELS_REJECTED: &str = concatcp!(METRIC_NAME_PREFIX, "channels_rejected");
}

pub mod rejections {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq, strum::Display)]
    pub enum RejectionKind {
        #[strum(to_string = "dead")]
        Dead,
        #[strum(to_string = "noisy")]
        Noisy,
        #[strum(to_string = "no_peaks")]
        NoPeaks,
    }

    // Label building function
    pub fn get_label(kind: RejectionKind) -> (&'static str, String) {
        ("reason", kind.to_string())
    }
}

pub mod failures {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum FailureKind {
        UnknownChannelType,
        MissingConstant,
        Transform,
        EmptyPulse,
        InvalidTimeBounds,
    }

    // Label building function
    pub fn get_label(failure_kind: FailureKind) -> (&'static str, &'static str) {
        (
            "failure_kind",
            match failure_kind {
                FailureKind::UnknownChannelType => "unknown_channel_type",
                FailureKind::MissingConstant => "missing_constant",
                FailureKind::Transform => "transform",
                FailureKind::EmptyPulse => "empty_pulse",
                FailureKind::InvalidTimeBounds => "invalid_time_bounds",
            },
        )
    }
}
