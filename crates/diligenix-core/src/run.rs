//! Accumulated state of one pipeline run.

use crate::events::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Planning,
    Researching,
    Synthesizing,
    Completed,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Failed | RunPhase::Cancelled
        )
    }

    /// Legal edges of the run state machine.
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (Idle, Planning) => true,
            (Planning, Researching) => true,
            (Researching, Synthesizing) => true,
            (Synthesizing, Completed) => true,
            (Planning | Researching | Synthesizing, Failed | Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Planning => "planning",
            RunPhase::Researching => "researching",
            RunPhase::Synthesizing => "synthesizing",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
            RunPhase::Cancelled => "cancelled",
        }
    }
}

/// One link discovered while researching a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRecord {
    pub query: String,
    pub url: String,
    pub retrieved_at: DateTime<Utc>,
}

/// The condensed intelligence for one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorSummary {
    pub query: String,
    pub summary_text: String,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSection {
    pub title: String,
    pub content: String,
    pub word_count: usize,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunFailure {
    pub message: String,
    pub kind: FailureKind,
}

/// Everything a run has produced so far.
///
/// Sequences are append-only and progress never decreases. Mutation is
/// restricted to the pipeline; callers receive the value once the run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    target: String,
    phase: RunPhase,
    progress: u8,
    queries: Vec<String>,
    sources: Vec<SourceRecord>,
    vectors: Vec<VectorSummary>,
    sections: Vec<ReportSection>,
    failure: Option<RunFailure>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            phase: RunPhase::Idle,
            progress: 0,
            queries: Vec::new(),
            sources: Vec::new(),
            vectors: Vec::new(),
            sections: Vec::new(),
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    pub fn sources(&self) -> &[SourceRecord] {
        &self.sources
    }

    pub fn vectors(&self) -> &[VectorSummary] {
        &self.vectors
    }

    pub fn sections(&self) -> &[ReportSection] {
        &self.sections
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// True only for a run that reached `Completed`.
    pub fn is_complete(&self) -> bool {
        self.phase == RunPhase::Completed
    }

    /// Vector summaries in production order, each tagged with its query.
    pub fn intelligence_context(&self) -> String {
        self.vectors
            .iter()
            .map(|v| format!("RESEARCH DATA FOR {}: {}", v.query, v.summary_text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub(crate) fn advance(&mut self, next: RunPhase) {
        if !self.phase.can_advance_to(next) {
            tracing::warn!(
                from = self.phase.as_str(),
                to = next.as_str(),
                "illegal run transition ignored"
            );
            return;
        }
        tracing::debug!(from = self.phase.as_str(), to = next.as_str(), "run transition");
        self.phase = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    pub(crate) fn set_queries(&mut self, queries: Vec<String>) {
        debug_assert!(self.queries.is_empty(), "queries are planned once per run");
        self.queries = queries;
    }

    /// Raise progress to `p` (clamped to 100). Lower values are ignored.
    pub(crate) fn raise_progress(&mut self, p: u8) -> u8 {
        self.progress = self.progress.max(p.min(100));
        self.progress
    }

    pub(crate) fn push_source(&mut self, query: &str, url: &str) {
        self.sources.push(SourceRecord {
            query: query.to_string(),
            url: url.to_string(),
            retrieved_at: Utc::now(),
        });
    }

    pub(crate) fn push_vector(&mut self, query: &str, summary_text: &str) {
        self.vectors.push(VectorSummary {
            query: query.to_string(),
            summary_text: summary_text.to_string(),
            retrieved_at: Utc::now(),
        });
    }

    pub(crate) fn push_section(&mut self, title: &str, content: &str) {
        self.sections.push(ReportSection {
            title: title.to_string(),
            content: content.to_string(),
            word_count: content.split_whitespace().count(),
            produced_at: Utc::now(),
        });
    }

    pub(crate) fn fail(&mut self, failure: RunFailure) {
        self.failure = Some(failure);
        self.advance(RunPhase::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_edges() {
        use RunPhase::*;
        assert!(Idle.can_advance_to(Planning));
        assert!(Planning.can_advance_to(Researching));
        assert!(Researching.can_advance_to(Synthesizing));
        assert!(Synthesizing.can_advance_to(Completed));
        for p in [Planning, Researching, Synthesizing] {
            assert!(p.can_advance_to(Failed));
            assert!(p.can_advance_to(Cancelled));
        }
        assert!(!Idle.can_advance_to(Failed));
        assert!(!Idle.can_advance_to(Researching));
        assert!(!Researching.can_advance_to(Completed));
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Planning));
        assert!(!Cancelled.can_advance_to(Synthesizing));
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let mut s = RunState::new("Acme Corp");
        assert_eq!(s.raise_progress(30), 30);
        assert_eq!(s.raise_progress(10), 30);
        assert_eq!(s.raise_progress(250), 100);
        assert_eq!(s.progress(), 100);
    }

    #[test]
    fn section_word_count_uses_whitespace_tokens() {
        let mut s = RunState::new("Acme Corp");
        s.push_section("SWOT Analysis", "## SWOT\n\n- strong  brand\t- thin margins\n");
        assert_eq!(s.sections()[0].word_count, 8);
        s.push_section("Empty", "   ");
        assert_eq!(s.sections()[1].word_count, 0);
    }

    #[test]
    fn intelligence_context_tags_summaries_in_production_order() {
        let mut s = RunState::new("Acme Corp");
        assert_eq!(s.intelligence_context(), "");
        s.push_vector("acme revenue", "grew 10%");
        s.push_vector("acme rivals", "Globex leads");
        assert_eq!(
            s.intelligence_context(),
            "RESEARCH DATA FOR acme revenue: grew 10%\n\nRESEARCH DATA FOR acme rivals: Globex leads"
        );
    }

    #[test]
    fn terminal_transition_stamps_finish_time() {
        let mut s = RunState::new("Acme Corp");
        s.advance(RunPhase::Planning);
        assert!(s.finished_at().is_none());
        s.fail(RunFailure {
            message: "model unavailable: connection refused".to_string(),
            kind: FailureKind::ModelUnavailable,
        });
        assert_eq!(s.phase(), RunPhase::Failed);
        assert!(s.finished_at().is_some());
        assert!(!s.is_complete());
    }

    #[test]
    fn illegal_transitions_are_ignored_without_panicking() {
        let mut s = RunState::new("Acme Corp");
        s.advance(RunPhase::Completed);
        assert_eq!(s.phase(), RunPhase::Idle);
        s.advance(RunPhase::Planning);
        s.advance(RunPhase::Synthesizing);
        assert_eq!(s.phase(), RunPhase::Planning);
        assert!(s.finished_at().is_none());
    }
}
