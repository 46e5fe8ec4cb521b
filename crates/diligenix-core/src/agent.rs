//! Run orchestration: plan, research, synthesize.

use crate::config::PipelineConfig;
use crate::events::{EventSink, RunEvent};
use crate::planner::plan_queries;
use crate::research::{research_vectors, ResearchTools};
use crate::run::{RunFailure, RunPhase, RunState};
use crate::synthesis::{synthesis_context, synthesize_sections};
use crate::{Error, LanguageModel, Result, SearchProvider, TextExtractor};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Drives one or more independent runs against a fixed set of collaborators.
#[derive(Clone)]
pub struct Agent {
    llm: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchProvider>,
    extractor: Arc<dyn TextExtractor>,
    config: PipelineConfig,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchProvider>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            llm,
            search,
            extractor,
            config: PipelineConfig::default(),
        }
    }

    /// Replace the pipeline configuration. Rejected configs never start a run.
    pub fn with_config(mut self, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute a full run on the current task and return its final state.
    ///
    /// The returned state is terminal: `Completed`, `Failed` or `Cancelled`.
    pub async fn run(&self, target: &str, sink: &EventSink, cancel: &CancellationToken) -> RunState {
        let mut state = RunState::new(target);
        match self.drive(&mut state, sink, cancel).await {
            Ok(()) => {
                let before = state.progress();
                let p = state.raise_progress(100);
                if p != before {
                    sink.emit(RunEvent::ProgressUpdated { progress: p });
                }
                enter(&mut state, sink, RunPhase::Completed);
                tracing::info!(
                    target_subject = target,
                    vectors = state.vectors().len(),
                    sources = state.sources().len(),
                    sections = state.sections().len(),
                    "run finished"
                );
                sink.emit(RunEvent::RunFinished);
            }
            Err(Error::Cancelled) => {
                enter(&mut state, sink, RunPhase::Cancelled);
                tracing::info!(target_subject = target, "run cancelled");
                sink.emit(RunEvent::RunCancelled);
            }
            Err(e) => {
                let failure = RunFailure {
                    message: e.to_string(),
                    kind: e.failure_kind(),
                };
                tracing::error!(target_subject = target, error = %e, "run failed");
                state.fail(failure.clone());
                sink.emit(RunEvent::PhaseChanged {
                    phase: RunPhase::Failed,
                });
                sink.emit(RunEvent::RunFailed {
                    message: failure.message,
                    kind: failure.kind,
                });
            }
        }
        state
    }

    /// Start a run on a dedicated tokio task. Must be called inside a runtime.
    pub fn spawn(&self, target: impl Into<String>) -> RunHandle {
        let (sink, events) = EventSink::channel();
        let cancel = CancellationToken::new();
        let agent = self.clone();
        let target = target.into();
        let token = cancel.clone();
        let join = tokio::spawn(async move { agent.run(&target, &sink, &token).await });
        RunHandle {
            events,
            cancel,
            join,
        }
    }

    async fn drive(
        &self,
        state: &mut RunState,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        enter(state, sink, RunPhase::Planning);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let target = state.target().to_string();
        let queries = plan_queries(self.llm.as_ref(), &target, self.config.query_count).await?;
        state.set_queries(queries.clone());
        sink.emit(RunEvent::QueryPlanned { queries });

        enter(state, sink, RunPhase::Researching);
        let tools = ResearchTools {
            llm: self.llm.as_ref(),
            search: self.search.as_ref(),
            extractor: self.extractor.as_ref(),
        };
        research_vectors(tools, &self.config, state, sink, cancel).await?;

        enter(state, sink, RunPhase::Synthesizing);
        let context = synthesis_context(state, self.config.context_char_limit);
        synthesize_sections(
            self.llm.as_ref(),
            &self.config.sections,
            &context,
            state,
            sink,
            cancel,
        )
        .await
    }
}

fn enter(state: &mut RunState, sink: &EventSink, phase: RunPhase) {
    state.advance(phase);
    sink.emit(RunEvent::PhaseChanged { phase });
}

/// Consumer side of a spawned run.
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<RunEvent>,
    cancel: CancellationToken,
    join: JoinHandle<RunState>,
}

impl RunHandle {
    /// Next event in emission order; `None` once the worker is done and drained.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Ask the worker to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the worker and take ownership of the final state.
    pub async fn wait(self) -> Result<RunState> {
        self.join.await.map_err(|e| Error::Worker(e.to_string()))
    }
}
