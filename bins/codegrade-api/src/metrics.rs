// Prometheus metrics for the grading pipeline

use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Run submissions by how they ended: completed, queued, rejected,
    /// unreachable or failed
    pub static ref RUN_OUTCOMES: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new("codegrade_runs_total", "Run submissions by outcome"),
            &["status"],
        )
        .expect("valid metric definition")
    );

    pub static ref GRADE_SCORES: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new("codegrade_scores_total", "Graded runs by score"),
            &["score"],
        )
        .expect("valid metric definition")
    );

    pub static ref STAGING_RESULTS: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new("codegrade_staging_total", "File staging attempts by result"),
            &["result"],
        )
        .expect("valid metric definition")
    );

    pub static ref BACKGROUND_FAILURES: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new("codegrade_background_failures_total", "Failed background jobs by kind"),
            &["job"],
        )
        .expect("valid metric definition")
    );

    pub static ref SANDBOX_RUN_SECONDS: Histogram = register(
        Histogram::with_opts(
            HistogramOpts::new("codegrade_sandbox_run_seconds", "Time spent waiting on the sandbox")
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .expect("valid metric definition")
    );
}

fn register<C: Collector + Clone + 'static>(collector: C) -> C {
    REGISTRY
        .register(Box::new(collector.clone()))
        .expect("metric registered once");
    collector
}

/// Render every registered metric in the text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
