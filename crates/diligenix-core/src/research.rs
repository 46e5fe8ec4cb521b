//! Per-query research: search, extract, summarize.
//!
//! Every query is isolated: a failed search, an unextractable link or a query
//! with no usable text only shrinks what that query contributes. A model
//! failure while summarizing is the one error that escapes.

use crate::config::PipelineConfig;
use crate::events::{EventSink, RunEvent};
use crate::run::RunState;
use crate::{ChatTurn, Error, LanguageModel, Result, SearchProvider, SearchQuery, TextExtractor};
use tokio_util::sync::CancellationToken;

/// The three external collaborators the research loop drives.
#[derive(Clone, Copy)]
pub struct ResearchTools<'a> {
    pub llm: &'a dyn LanguageModel,
    pub search: &'a dyn SearchProvider,
    pub extractor: &'a dyn TextExtractor,
}

/// Longest prefix of `s` with at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}

pub fn summary_turns(query: &str, texts: &[String]) -> Vec<ChatTurn> {
    vec![ChatTurn::user(format!(
        "Summarize the core intelligence for the query '{query}' based on these sources:\n{}",
        texts.join("\n")
    ))]
}

/// Research-phase progress after finishing query `index` of `total`.
pub fn research_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 50;
    }
    (((index + 1) * 50) / total).min(50) as u8
}

/// Run every planned query in order, appending sources and summaries to `state`.
pub async fn research_vectors(
    tools: ResearchTools<'_>,
    config: &PipelineConfig,
    state: &mut RunState,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Result<()> {
    let queries = state.queries().to_vec();
    let total = queries.len();
    for (i, query) in queries.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        research_vector(tools, config, query, state, sink).await?;
        let p = state.raise_progress(research_progress(i, total));
        sink.emit(RunEvent::ProgressUpdated { progress: p });
    }
    Ok(())
}

async fn research_vector(
    tools: ResearchTools<'_>,
    config: &PipelineConfig,
    query: &str,
    state: &mut RunState,
    sink: &EventSink,
) -> Result<()> {
    sink.emit(RunEvent::QueryDiscovered {
        query: query.to_string(),
    });
    tracing::info!(query, "mining vector");

    let sq = SearchQuery::new(query, config.max_results_per_query);
    let links: Vec<String> = match tools.search.search(&sq).await {
        Ok(resp) => resp
            .results
            .into_iter()
            .take(config.max_results_per_query)
            .map(|r| r.url)
            .collect(),
        Err(e) => {
            tracing::warn!(query, provider = tools.search.name(), error = %e, "search failed; treating as no results");
            Vec::new()
        }
    };

    let mut texts: Vec<String> = Vec::new();
    for link in &links {
        sink.emit(RunEvent::SourceDiscovered {
            query: query.to_string(),
            url: link.clone(),
        });
        state.push_source(query, link);
        match tools.extractor.extract(link).await {
            Some(text) if !text.trim().is_empty() => {
                texts.push(truncate_chars(&text, config.source_char_limit).to_string());
            }
            _ => tracing::debug!(query, url = %link, "no extractable text"),
        }
    }

    if texts.is_empty() {
        tracing::info!(query, sources = links.len(), "no usable text; skipping summary");
        return Ok(());
    }

    let summary = tools.llm.generate(&summary_turns(query, &texts)).await?;
    sink.emit(RunEvent::VectorSummarized {
        query: query.to_string(),
        summary: summary.clone(),
    });
    state.push_vector(query, &summary);
    Ok(())
}
