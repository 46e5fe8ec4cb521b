//! Section-by-section report synthesis over a frozen intelligence context.

use crate::config::SectionSpec;
use crate::events::{EventSink, RunEvent};
use crate::research::truncate_chars;
use crate::run::RunState;
use crate::{ChatTurn, Error, LanguageModel, Result};
use tokio_util::sync::CancellationToken;

const PERSONA: &str = "You are the lead partner of an independent due-diligence research firm. \
You write precise, professional intelligence reports for investment committees, and you only \
state what the supplied research data supports.";

/// The research context every section is written against, capped to `max_chars`.
pub fn synthesis_context(state: &RunState, max_chars: usize) -> String {
    truncate_chars(&state.intelligence_context(), max_chars).to_string()
}

/// Deterministic request for one section: same inputs, same turns.
pub fn section_turns(section: &SectionSpec, target: &str, context: &str) -> Vec<ChatTurn> {
    vec![
        ChatTurn::system(PERSONA),
        ChatTurn::user(format!(
            "Using ONLY the following research data, write the '{title}' section of a report \
             on {target}. {instruction} Use Markdown headers and structure, and do not truncate: \
             provide the full text for this section.\n\nRESEARCH DATA:\n{context}",
            title = section.title,
            instruction = section.instruction,
        )),
    ]
}

/// Synthesis-phase progress after finishing section `index` of `total`.
pub fn synthesis_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    50 + (((index + 1) * 50) / total).min(50) as u8
}

/// Write every catalog section in order. `context` is fixed for the whole phase.
pub async fn synthesize_sections(
    llm: &dyn LanguageModel,
    sections: &[SectionSpec],
    context: &str,
    state: &mut RunState,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Result<()> {
    let target = state.target().to_string();
    let total = sections.len();
    for (j, section) in sections.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tracing::info!(section = %section.title, "synthesizing section");
        let content = llm
            .generate(&section_turns(section, &target, context))
            .await?;
        sink.emit(RunEvent::SectionProduced {
            title: section.title.clone(),
            content: content.clone(),
        });
        state.push_section(&section.title, &content);
        let p = state.raise_progress(synthesis_progress(j, total));
        sink.emit(RunEvent::ProgressUpdated { progress: p });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_progress_fills_second_half() {
        assert_eq!(synthesis_progress(0, 5), 60);
        assert_eq!(synthesis_progress(2, 5), 80);
        assert_eq!(synthesis_progress(4, 5), 100);
        assert_eq!(synthesis_progress(0, 3), 66);
        assert_eq!(synthesis_progress(2, 3), 100);
    }

    #[test]
    fn section_turns_are_deterministic_and_complete() {
        let s = SectionSpec::new("SWOT Analysis", "Break it down.");
        let a = section_turns(&s, "Acme Corp", "RESEARCH DATA FOR q: x");
        let b = section_turns(&s, "Acme Corp", "RESEARCH DATA FOR q: x");
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        let user = &a[1].content;
        assert!(user.contains("'SWOT Analysis'"));
        assert!(user.contains("Acme Corp"));
        assert!(user.contains("Break it down."));
        assert!(user.contains("Markdown"));
        assert!(user.ends_with("RESEARCH DATA:\nRESEARCH DATA FOR q: x"));
    }

    #[test]
    fn context_is_capped() {
        let mut st = RunState::new("Acme");
        st.push_vector("q", &"x".repeat(50));
        let c = synthesis_context(&st, 10);
        assert_eq!(c.chars().count(), 10);
        assert!(c.starts_with("RESEARCH D"));
    }
}
