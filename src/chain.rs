//! Processor chains for the two rendering modes.

use crate::error::SinkEmitError;
use crate::exception::{
    ExceptionDictTransformer, ExceptionGroupProcessor, ExceptionRenderer, FrameListFormatter,
    SUPPRESSED_MODULES,
};
use crate::processors::{
    AddLogLevel, MergeContextVars, PositionalArgumentsFormatter, Processor, RedactJwt,
    RenameLoggerField, StackInfoRenderer, TimestampFormat, Timestamper, UnicodeDecoder,
};
use crate::record::EventDict;
use crate::render::{ConsoleRenderer, JsonRenderer, Rendered, Renderer};
use std::sync::{Arc, OnceLock};

/// Pieces of a chain that the configurator reuses for bridged `log` records.
#[derive(Clone)]
pub struct NamedProcessors {
    pub timestamper: Arc<Timestamper>,
    pub console: Option<Arc<ConsoleRenderer>>,
    pub exc_group: Option<Arc<ExceptionGroupProcessor>>,
    pub dict_tracebacks: Option<Arc<ExceptionRenderer>>,
    pub json: Option<Arc<JsonRenderer>>,
}

/// Ordered processors plus the terminal renderer.
pub struct ProcessorChain {
    pretty: bool,
    processors: Vec<Arc<dyn Processor>>,
    renderer: Arc<dyn Renderer>,
    named: NamedProcessors,
}

impl ProcessorChain {
    /// Build the chain for pretty (console) or structured (JSON) output.
    pub fn build(pretty: bool) -> Self {
        let timestamper = Arc::new(Timestamper::new(if pretty {
            TimestampFormat::Pretty
        } else {
            TimestampFormat::Iso
        }));

        let mut processors: Vec<Arc<dyn Processor>> = vec![
            timestamper.clone(),
            Arc::new(MergeContextVars),
            Arc::new(AddLogLevel),
            Arc::new(PositionalArgumentsFormatter),
            Arc::new(RenameLoggerField),
            Arc::new(RedactJwt),
            Arc::new(StackInfoRenderer),
        ];

        if pretty {
            let console = Arc::new(ConsoleRenderer::default());
            return Self {
                pretty,
                processors,
                renderer: console.clone(),
                named: NamedProcessors {
                    timestamper,
                    console: Some(console),
                    exc_group: None,
                    dict_tracebacks: None,
                    json: None,
                },
            };
        }

        let formatter: Arc<dyn FrameListFormatter> =
            Arc::new(ExceptionDictTransformer::new(SUPPRESSED_MODULES));
        let exc_group = Arc::new(ExceptionGroupProcessor::new(formatter.clone()));
        let dict_tracebacks = Arc::new(ExceptionRenderer::new(formatter));
        let json = Arc::new(JsonRenderer);

        processors.push(exc_group.clone());
        processors.push(dict_tracebacks.clone());
        processors.push(Arc::new(UnicodeDecoder));

        Self {
            pretty,
            processors,
            renderer: json.clone(),
            named: NamedProcessors {
                timestamper,
                console: None,
                exc_group: Some(exc_group),
                dict_tracebacks: Some(dict_tracebacks),
                json: Some(json),
            },
        }
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    pub fn processors(&self) -> &[Arc<dyn Processor>] {
        &self.processors
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    pub fn named(&self) -> &NamedProcessors {
        &self.named
    }

    /// Run every processor, then the renderer.
    pub fn run(&self, mut event: EventDict) -> Result<Rendered, SinkEmitError> {
        for processor in &self.processors {
            processor.process(&mut event);
        }
        self.renderer.render(event)
    }
}

/// Memo table of built chains, one slot per rendering mode.
#[derive(Default)]
pub struct ChainCache {
    slots: [OnceLock<Arc<ProcessorChain>>; 2],
}

impl ChainCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build on first request; later calls return the same `Arc`.
    pub fn get(&self, pretty: bool) -> Arc<ProcessorChain> {
        self.slots[usize::from(pretty)]
            .get_or_init(|| Arc::new(ProcessorChain::build(pretty)))
            .clone()
    }
}
