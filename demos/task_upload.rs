use std::error::Error;
use task_log_pipeline::env::EnvConfigSource;
use task_log_pipeline::settings::{LOGGING_SECTION, BASE_LOG_FOLDER_KEY};
use task_log_pipeline::{
    init_log_file, ConfigSource, ExternalLogging, HandlerKind, LogFileSettings, LogSink,
    LoggingConfigurator, MapConfigSource, PipelineConfig, RemoteLogHandler, RemoteLogUploader,
    UploadHandoff,
};

type BoxError = Box<dyn Error + Send + Sync>;

/// Prints the handoff instead of talking to remote storage.
struct PrintingHandler {
    handoff: Option<UploadHandoff>,
}

impl RemoteLogHandler for PrintingHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::FileTask
    }

    fn attach(&mut self, handoff: UploadHandoff) {
        self.handoff = Some(handoff);
    }

    fn close(self: Box<Self>) -> Result<(), BoxError> {
        let handoff = serde_json::to_string_pretty(&self.handoff)?;
        println!("uploading:\n{}", handoff);
        Ok(())
    }
}

struct LocalPlatform;

impl ExternalLogging for LocalPlatform {
    fn configure(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn task_log_handler(&self) -> Option<Box<dyn RemoteLogHandler>> {
        Some(Box::new(PrintingHandler { handoff: None }))
    }
}

fn main() -> Result<(), BoxError> {
    // Base folder from TASK_LOG__LOGGING__BASE_LOG_FOLDER, or a temp dir.
    let fallback = std::env::temp_dir().join("task-logs");
    let settings = match EnvConfigSource.get(LOGGING_SECTION, BASE_LOG_FOLDER_KEY) {
        Some(_) => LogFileSettings::from_source(&EnvConfigSource)?,
        None => LogFileSettings::from_source(
            &MapConfigSource::new().with(LOGGING_SECTION, BASE_LOG_FOLDER_KEY, fallback.display().to_string()),
        )?,
    };

    let configurator = LoggingConfigurator::global();
    configurator.configure(PipelineConfig::default().pretty(false).level("info"))?;

    let path = init_log_file("dag_id=demo/run_id=manual/task_id=hello/attempt=1.log", &settings)?;
    let logger = configurator.logger_for(LogSink::open_file(&path)?);
    logger.info("hello from the task");
    logger.info("task finished");

    let mut metadata = serde_json::Map::new();
    metadata.insert("dag_id".into(), "demo".into());
    let outcome = RemoteLogUploader::new(configurator, &LocalPlatform, settings).upload_to_remote(&logger, metadata);
    println!("{:?}", outcome);
    Ok(())
}
