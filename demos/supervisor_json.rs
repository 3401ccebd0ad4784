use task_log_pipeline::{
    bind_contextvars, configure_logging, enter_error, CapturedError, LoggingConfigurator,
    OutputStream, PipelineConfig,
};
use tracing::{error, info, warn};

#[derive(Debug)]
struct UpstreamUnavailable;

impl std::fmt::Display for UpstreamUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("upstream API returned 503")
    }
}

impl std::error::Error for UpstreamUnavailable {}

fn main() {
    // JSON lines on stdout, the way a supervising process reads them;
    // `log` crate records are framed onto the same stream.
    configure_logging(
        PipelineConfig::default()
            .pretty(false)
            .level("debug")
            .output(OutputStream::binary(std::io::stdout()))
            .sending_to_supervisor(true),
    )
    .expect("valid logging configuration");

    bind_contextvars([("dag_id", "example_etl"), ("task_id", "extract")]);

    info!(try_number = 1, "task started");
    log::info!(target: "task_sdk::execution", "heartbeat sent");
    log::debug!(target: "hyper::client", "this one is filtered out");
    warn!(token = "eyJhbGciOiJIUzI1NiJ9.payload.sig", "credentials are redacted");
    task_log_pipeline::warnings::warn("`schedule_interval` is deprecated", "DeprecationWarning");

    let logger = LoggingConfigurator::global().logger().bind([("attempt", 1i64)]);
    {
        let _active = enter_error(CapturedError::from_error(&UpstreamUnavailable));
        logger.exception("extract failed");
    }
    error!("giving up");
}
