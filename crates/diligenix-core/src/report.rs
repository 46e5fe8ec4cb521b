//! Markdown rendering of a run's accumulated state.

use crate::run::{RunPhase, RunState};
use std::fmt::Write;

/// Render the report: sections in catalog order, then a sources appendix.
///
/// Runs that did not complete carry a notice naming the terminal phase.
pub fn render_markdown(state: &RunState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Intelligence Report: {}\n", state.target());
    let _ = writeln!(
        out,
        "_Generated {} from {} research vectors and {} sources._\n",
        state
            .finished_at()
            .unwrap_or_else(|| state.started_at())
            .format("%Y-%m-%d %H:%M UTC"),
        state.vectors().len(),
        state.sources().len()
    );

    if state.phase() != RunPhase::Completed {
        let _ = write!(
            out,
            "> **Incomplete run** (state: {}, progress: {}%).",
            state.phase().as_str(),
            state.progress()
        );
        if let Some(f) = state.failure() {
            let _ = write!(out, " {}", f.message);
        }
        out.push_str("\n\n");
    }

    for s in state.sections() {
        let _ = writeln!(out, "## {}\n", s.title);
        out.push_str(s.content.trim_end());
        out.push_str("\n\n---\n\n");
    }

    if !state.sources().is_empty() {
        out.push_str("## Sources\n");
        for q in state.queries() {
            let urls: Vec<&str> = state
                .sources()
                .iter()
                .filter(|s| &s.query == q)
                .map(|s| s.url.as_str())
                .collect();
            if urls.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n### {q}\n");
            for u in urls {
                let _ = writeln!(out, "- <{u}>");
            }
        }
    }
    out
}
