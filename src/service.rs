use crate::{
    config::Config,
    dispatcher::{self, Analyzer, OpenAiAnalyzer},
    error::ServiceError,
    session::{LogSession, SessionBuilder, SourceLocation},
    throttle::ThrottleRegistry,
};
use std::sync::Arc;
use tokio::runtime::Handle;

struct ServiceInner {
    config: Config,
    registry: Arc<ThrottleRegistry>,
    analyzer: Arc<dyn Analyzer>,
    runtime: Handle,
}

/// Shared context sessions are opened from.
///
/// Build one per process and clone it into handlers; every clone shares the
/// same throttle registry, analyzer and runtime.
#[derive(Clone)]
pub struct AnalysisService {
    inner: Arc<ServiceInner>,
}

impl AnalysisService {
    /// Service backed by the configured OpenAI-compatible provider.
    /// Must be called from inside a tokio runtime.
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> AnalysisServiceBuilder {
        AnalysisServiceBuilder {
            config,
            registry: None,
            analyzer: None,
            runtime: None,
        }
    }

    /// Open a session with default options
    pub fn session(&self, source: SourceLocation) -> LogSession {
        self.session_builder(source).build()
    }

    pub fn session_builder(&self, source: SourceLocation) -> SessionBuilder {
        SessionBuilder::new(self.clone(), source)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ThrottleRegistry> {
        &self.inner.registry
    }

    pub fn has_credential(&self) -> bool {
        self.inner.config.provider.has_credential()
    }

    /// Fire-and-forget: the join handle is dropped on purpose
    pub(crate) fn spawn_analysis(&self, session: LogSession) {
        let analyzer = self.inner.analyzer.clone();
        let max_source_bytes = self.inner.config.prompt.max_source_bytes;
        self.inner
            .runtime
            .spawn(dispatcher::run(session, analyzer, max_source_bytes));
    }
}

pub struct AnalysisServiceBuilder {
    config: Config,
    registry: Option<Arc<ThrottleRegistry>>,
    analyzer: Option<Arc<dyn Analyzer>>,
    runtime: Option<Handle>,
}

impl AnalysisServiceBuilder {
    /// Share an existing registry instead of creating one from the config
    pub fn registry(mut self, registry: Arc<ThrottleRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Runtime detached analyses are spawned on. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<AnalysisService, ServiceError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| ServiceError::NoRuntime)?,
        };

        let analyzer: Arc<dyn Analyzer> = match self.analyzer {
            Some(analyzer) => analyzer,
            None => Arc::new(OpenAiAnalyzer::new(self.config.provider.clone())?),
        };

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ThrottleRegistry::new(self.config.throttle.max_entries)));

        Ok(AnalysisService {
            inner: Arc::new(ServiceInner {
                config: self.config,
                registry,
                analyzer,
                runtime,
            }),
        })
    }
}
