use crate::chain::{ChainCache, ProcessorChain};
use crate::env::TASK_LOG_TEST_HARNESS_ENV;
use crate::error::{ConfigurationError, EmitError};
use crate::handler::{BinaryStreamHandler, ErrorReporter, Handler, ProcessorFormatter, StreamHandler};
use crate::layer::PipelineLayer;
use crate::level::LogLevel;
use crate::logger::TaskLogger;
use crate::output::{OutputStream, SharedWriter};
use crate::processors::{AddLogLevel, DropPositionalArgs, MergeContextVars, Processor, RedactJwt};
use crate::record::EventDict;
use crate::sink::{LogSink, StreamSink};
use crate::warnings::WarningCapture;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, Once, OnceLock, PoisonError, RwLock};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Namespace whose bridged records follow the configured level.
pub const DEFAULT_NAMESPACE: &str = "task_sdk";

/// Targets too chatty to pass below `WARN`, whatever the configured level.
pub const NOISY_TARGETS: &[&str] = &["hyper", "reqwest", "h2", "sqlx"];

/// Arguments of one pipeline configuration.
///
/// **Fields**
/// - `pretty`: console rendering when `true`, line-delimited JSON otherwise.
/// - `level`: minimum level name, parsed case-insensitively.
/// - `output`: destination of records; `None` means stdout.
/// - `cache_on_first_use`: loggers keep the pipeline they first used, and
///   identical configurations are memoized.
/// - `sending_to_supervisor`: bridged `log` records are framed onto `output`
///   instead of being written to stderr.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub pretty: bool,
    pub level: String,
    pub output: Option<OutputStream>,
    pub cache_on_first_use: bool,
    pub sending_to_supervisor: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            level: "debug".to_string(),
            output: None,
            cache_on_first_use: true,
            sending_to_supervisor: false,
        }
    }
}

impl PipelineConfig {
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn output(mut self, output: OutputStream) -> Self {
        self.output = Some(output);
        self
    }

    pub fn cache_on_first_use(mut self, cache: bool) -> Self {
        self.cache_on_first_use = cache;
        self
    }

    pub fn sending_to_supervisor(mut self, sending: bool) -> Self {
        self.sending_to_supervisor = sending;
        self
    }
}

/// Memo key: the argument tuple, with the output compared by identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ConfigKey {
    pretty: bool,
    level: String,
    output: Option<OutputKey>,
    cache_on_first_use: bool,
    sending_to_supervisor: bool,
}

/// Holds the output itself so its address stays taken while memoized.
#[derive(Clone, Debug)]
struct OutputKey(OutputStream);

impl PartialEq for OutputKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.id() == other.0.id()
    }
}

impl Eq for OutputKey {}

impl Hash for OutputKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id().hash(state);
    }
}

impl ConfigKey {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            pretty: config.pretty,
            level: config.level.to_ascii_lowercase(),
            output: config.output.clone().map(OutputKey),
            cache_on_first_use: config.cache_on_first_use,
            sending_to_supervisor: config.sending_to_supervisor,
        }
    }
}

/// Slot holding the pipeline every front end currently logs through.
#[derive(Clone, Default)]
pub struct ActivePipeline(Arc<RwLock<Option<Arc<Pipeline>>>>);

impl ActivePipeline {
    pub fn get(&self) -> Option<Arc<Pipeline>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, pipeline: Option<Arc<Pipeline>>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = pipeline;
    }
}

/// Route for records arriving through the `log` facade.
pub struct LogBridge {
    formatter: Arc<ProcessorFormatter>,
    handler: Arc<dyn Handler>,
    targets: Targets,
}

impl LogBridge {
    pub fn formatter(&self) -> &ProcessorFormatter {
        &self.formatter
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }

    /// Whether a record from `target` at `level` reaches the handler.
    pub fn would_emit(&self, target: &str, level: LogLevel) -> bool {
        self.targets.would_enable(target, &level.as_tracing()) && self.handler.level().allows(level)
    }
}

/// A fully built configuration: chain, output and `log` bridge.
pub struct Pipeline {
    level: LogLevel,
    noisy: Targets,
    chain: Arc<ProcessorChain>,
    output: LogSink,
    bridge: LogBridge,
    cache_on_first_use: bool,
    errors: ErrorReporter,
}

impl Pipeline {
    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn chain(&self) -> &Arc<ProcessorChain> {
        &self.chain
    }

    /// Where records from native loggers go unless a logger has its own sink.
    pub fn output_sink(&self) -> &LogSink {
        &self.output
    }

    pub fn bridge(&self) -> &LogBridge {
        &self.bridge
    }

    pub fn cache_on_first_use(&self) -> bool {
        self.cache_on_first_use
    }

    /// Records dropped because writing them failed.
    pub fn dropped_records(&self) -> u64 {
        self.errors.dropped()
    }

    /// Whether a native record at `level` passes the configured filter.
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.level.allows(level)
    }

    /// Like [`enabled`](Self::enabled), with [`NOISY_TARGETS`] held at `WARN`.
    pub fn enabled_for(&self, target: &str, level: LogLevel) -> bool {
        self.enabled(level) && self.noisy.would_enable(target, &level.as_tracing())
    }

    /// Run `event` through the chain and write it to `sink`.
    pub fn emit_to(&self, sink: &LogSink, event: EventDict) -> Result<(), EmitError> {
        self.errors.guarded("pipeline", || {
            let mut frame = self.chain.run(event)?.into_bytes();
            frame.push(b'\n');
            sink.write_frame(&frame)?;
            Ok(())
        })
    }

    pub fn emit_native(&self, event: EventDict) -> Result<(), EmitError> {
        self.emit_to(&self.output, event)
    }

    /// Hand a record bridged from the `log` facade to the configured handler.
    pub fn emit_foreign(&self, target: &str, mut event: EventDict) -> Result<(), EmitError> {
        if !self.bridge.would_emit(target, event.method_level()) {
            return Ok(());
        }
        event.set_default("logger", target);
        self.bridge.handler.emit(event)
    }
}

#[derive(Default)]
struct ConfiguratorState {
    memo: HashMap<ConfigKey, Arc<Pipeline>>,
    last: Option<PipelineConfig>,
}

/// Owns pipeline configuration for a process.
///
/// `configure` builds (or reuses) a [`Pipeline`] and makes it active for
/// every front end created from this configurator. `reset` forgets memoized
/// pipelines and gives the warning display handler back.
pub struct LoggingConfigurator {
    state: Mutex<ConfiguratorState>,
    active: ActivePipeline,
    chains: ChainCache,
    warnings: &'static WarningCapture,
    harness_env: String,
    namespace: String,
    local_stream: SharedWriter,
}

impl Default for LoggingConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingConfigurator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConfiguratorState::default()),
            active: ActivePipeline::default(),
            chains: ChainCache::new(),
            warnings: WarningCapture::global(),
            harness_env: TASK_LOG_TEST_HARNESS_ENV.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            local_stream: SharedWriter::stderr(),
        }
    }

    /// Process-wide configurator used by [`configure_logging`].
    pub fn global() -> &'static LoggingConfigurator {
        static GLOBAL: OnceLock<LoggingConfigurator> = OnceLock::new();
        GLOBAL.get_or_init(LoggingConfigurator::new)
    }

    /// Bridged records under `namespace` follow the configured level.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Env variable whose presence disables memoization and logger caching.
    pub fn with_harness_marker(mut self, name: impl Into<String>) -> Self {
        self.harness_env = name.into();
        self
    }

    /// Stream used by the `default` handler route (stderr unless set).
    pub fn with_local_stream(mut self, stream: SharedWriter) -> Self {
        self.local_stream = stream;
        self
    }

    pub fn active(&self) -> &ActivePipeline {
        &self.active
    }

    /// Build and activate a pipeline for `config`.
    ///
    /// **Errors**
    /// - [`ConfigurationError::UnknownLevel`] for an unrecognised level name.
    /// - [`ConfigurationError::OutputNotBinary`] when structured output is
    ///   requested on a text stream with no byte buffer.
    pub fn configure(&self, mut config: PipelineConfig) -> Result<Arc<Pipeline>, ConfigurationError> {
        if std::env::var_os(&self.harness_env).is_some() {
            config.cache_on_first_use = false;
        }
        let key = ConfigKey::new(&config);
        let mut state = self.lock_state();

        if config.cache_on_first_use {
            if let Some(pipeline) = state.memo.get(&key).cloned() {
                self.active.set(Some(pipeline.clone()));
                state.last = Some(config);
                return Ok(pipeline);
            }
        }

        let pipeline = Arc::new(self.build(&config)?);
        if config.cache_on_first_use {
            state.memo.insert(key, pipeline.clone());
        }
        self.active.set(Some(pipeline.clone()));
        state.last = Some(config);
        self.warnings.install();
        Ok(pipeline)
    }

    /// Give back the warning display handler and forget memoized pipelines.
    ///
    /// Safe to call any number of times, with or without a prior `configure`.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        self.warnings.uninstall();
        state.memo.clear();
    }

    /// Re-activate this configurator's pipeline after something else
    /// reconfigured logging; uses the last configuration, or the default.
    pub fn restore(&self) -> Result<Arc<Pipeline>, ConfigurationError> {
        let last = self.lock_state().last.clone().unwrap_or_default();
        self.configure(last)
    }

    /// `tracing` layer that feeds events into the active pipeline.
    pub fn layer(&self) -> PipelineLayer {
        PipelineLayer::new(self.active.clone())
    }

    pub fn logger(&self) -> TaskLogger {
        TaskLogger::new(self.active.clone())
    }

    /// Logger writing to `sink` instead of the pipeline output.
    pub fn logger_for(&self, sink: LogSink) -> TaskLogger {
        TaskLogger::new(self.active.clone()).with_sink(sink)
    }

    fn lock_state(&self) -> MutexGuard<'_, ConfiguratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build(&self, config: &PipelineConfig) -> Result<Pipeline, ConfigurationError> {
        let level: LogLevel = config.level.parse()?;
        let chain = self.chains.get(config.pretty);

        let output = match &config.output {
            None => LogSink::stdout(),
            Some(stream) if config.pretty => {
                LogSink::Stream(StreamSink::new(stream.clone().into_text_writer()))
            }
            Some(stream) => LogSink::Stream(StreamSink::new(stream.clone().into_binary_writer()?)),
        };

        let named = chain.named();
        let mut pre_chain: Vec<Arc<dyn Processor>> = vec![
            Arc::new(AddLogLevel),
            named.timestamper.clone(),
            Arc::new(MergeContextVars),
            Arc::new(RedactJwt),
        ];
        if let Some(exc_group) = &named.exc_group {
            pre_chain.push(exc_group.clone());
        }
        if let Some(dict_tracebacks) = &named.dict_tracebacks {
            pre_chain.push(dict_tracebacks.clone());
        }
        let formatter = Arc::new(ProcessorFormatter::new(
            if config.pretty { "colored" } else { "plain" },
            pre_chain,
            vec![Arc::new(DropPositionalArgs)],
            chain.renderer().clone(),
        ));

        let handler: Arc<dyn Handler> = if config.sending_to_supervisor {
            Arc::new(BinaryStreamHandler::new(
                "to_supervisor",
                level,
                formatter.clone(),
                supervisor_stream(config.output.as_ref()),
            ))
        } else {
            Arc::new(StreamHandler::new(
                "default",
                level,
                formatter.clone(),
                self.local_stream.clone(),
            ))
        };

        let targets = Targets::new()
            .with_default(LevelFilter::INFO)
            .with_target(self.namespace.clone(), level.as_level_filter())
            .with_targets(noisy_floor());
        let noisy = Targets::new()
            .with_default(LevelFilter::TRACE)
            .with_targets(noisy_floor());

        Ok(Pipeline {
            level,
            noisy,
            chain,
            output,
            bridge: LogBridge {
                formatter,
                handler,
                targets,
            },
            cache_on_first_use: config.cache_on_first_use,
            errors: ErrorReporter::default(),
        })
    }
}

fn noisy_floor() -> impl Iterator<Item = (&'static str, LevelFilter)> {
    NOISY_TARGETS.iter().map(|target| (*target, LevelFilter::WARN))
}

/// Byte stream the supervisor reads: the output itself, or stdout.
fn supervisor_stream(output: Option<&OutputStream>) -> SharedWriter {
    match output {
        None => SharedWriter::stdout(),
        Some(stream) => stream
            .clone()
            .into_binary_writer()
            .unwrap_or_else(|_| stream.clone().into_text_writer()),
    }
}

/// Configure the process-wide pipeline and install it as the global
/// `tracing` subscriber, bridging the `log` facade.
///
/// The subscriber is installed on the first successful call only; later
/// calls swap the active pipeline underneath it.
pub fn configure_logging(config: PipelineConfig) -> Result<Arc<Pipeline>, ConfigurationError> {
    static SUBSCRIBER: Once = Once::new();

    let configurator = LoggingConfigurator::global();
    let pipeline = configurator.configure(config)?;
    SUBSCRIBER.call_once(|| {
        let _ = tracing_log::LogTracer::builder()
            .with_max_level(log::LevelFilter::Trace)
            .init();
        let subscriber = Registry::default().with(configurator.layer());
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("a global tracing subscriber is already set; task logs use TaskLogger only");
        }
    });
    Ok(pipeline)
}

/// [`LoggingConfigurator::reset`] on the process-wide configurator.
pub fn reset_logging() {
    LoggingConfigurator::global().reset();
}
