//! Pipeline bounds and the built-in report section catalog.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One entry of the report catalog: a section title and how to write it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionSpec {
    pub title: String,
    pub instruction: String,
}

impl SectionSpec {
    pub fn new(title: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            instruction: instruction.into(),
        }
    }
}

/// The five-section due-diligence report, in output order.
pub fn default_section_catalog() -> Vec<SectionSpec> {
    vec![
        SectionSpec::new(
            "Executive Summary",
            "Synthesize a high-level overview of the subject and its market standing.",
        ),
        SectionSpec::new(
            "SWOT Analysis",
            "Provide a detailed breakdown of Strengths, Weaknesses, Opportunities, and Threats.",
        ),
        SectionSpec::new(
            "PESTLE Analysis",
            "Analyze Political, Economic, Social, Technological, Legal, and Environmental factors.",
        ),
        SectionSpec::new(
            "Competitive Landscape",
            "Analyze market share and the positioning of direct competitors.",
        ),
        SectionSpec::new(
            "Strategic Outlook",
            "Provide five-year projections and final recommendations.",
        ),
    ]
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of research queries requested from the planner.
    pub query_count: usize,
    /// Search results fetched per query.
    pub max_results_per_query: usize,
    /// Per-source cap (chars) on extracted text fed to summarization.
    pub source_char_limit: usize,
    /// Cap (chars) on the aggregated intelligence context used for synthesis.
    pub context_char_limit: usize,
    pub sections: Vec<SectionSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            query_count: 7,
            max_results_per_query: 3,
            source_char_limit: 2_000,
            context_char_limit: 10_000,
            sections: default_section_catalog(),
        }
    }
}

impl PipelineConfig {
    pub fn query_count(mut self, n: usize) -> Self {
        self.query_count = n;
        self
    }

    pub fn max_results_per_query(mut self, n: usize) -> Self {
        self.max_results_per_query = n;
        self
    }

    pub fn source_char_limit(mut self, n: usize) -> Self {
        self.source_char_limit = n;
        self
    }

    pub fn context_char_limit(mut self, n: usize) -> Self {
        self.context_char_limit = n;
        self
    }

    pub fn sections(mut self, sections: Vec<SectionSpec>) -> Self {
        self.sections = sections;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.query_count == 0 {
            return Err(Error::InvalidConfig("query_count must be >= 1".to_string()));
        }
        if self.sections.is_empty() {
            return Err(Error::InvalidConfig(
                "section catalog must not be empty".to_string(),
            ));
        }
        if let Some(s) = self.sections.iter().find(|s| s.title.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "section with empty title (instruction: {:?})",
                s.instruction
            )));
        }
        Ok(())
    }
}
