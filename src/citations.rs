//! Citation panel projection
//!
//! Pure functions over the citations of the latest reply: free-text search,
//! a three-bucket confidence filter, and grouping by source for display.

use std::fmt;
use std::str::FromStr;

use crate::chat::Citation;

pub const HIGH_CONFIDENCE: f64 = 0.8;
pub const MEDIUM_CONFIDENCE: f64 = 0.6;

/// Confidence band of a single citation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn of(score: f64) -> Self {
        if score >= HIGH_CONFIDENCE {
            ConfidenceLevel::High
        } else if score >= MEDIUM_CONFIDENCE {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        };
        f.write_str(label)
    }
}

/// Confidence selector shown above the panel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfidenceFilter {
    #[default]
    All,
    High,
    Medium,
    Low,
}

impl ConfidenceFilter {
    pub fn accepts(&self, score: f64) -> bool {
        match self {
            ConfidenceFilter::All => true,
            ConfidenceFilter::High => ConfidenceLevel::of(score) == ConfidenceLevel::High,
            ConfidenceFilter::Medium => ConfidenceLevel::of(score) == ConfidenceLevel::Medium,
            ConfidenceFilter::Low => ConfidenceLevel::of(score) == ConfidenceLevel::Low,
        }
    }
}

impl FromStr for ConfidenceFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(ConfidenceFilter::All),
            "high" => Ok(ConfidenceFilter::High),
            "medium" => Ok(ConfidenceFilter::Medium),
            "low" => Ok(ConfidenceFilter::Low),
            other => Err(format!(
                "unknown confidence filter '{}' (expected all, high, medium or low)",
                other
            )),
        }
    }
}

/// Search text plus confidence band
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CitationFilter {
    pub search: String,
    pub confidence: ConfidenceFilter,
}

impl CitationFilter {
    pub fn new(search: impl Into<String>, confidence: ConfidenceFilter) -> Self {
        Self {
            search: search.into(),
            confidence,
        }
    }

    /// Case-insensitive substring match over title, author and snippet
    pub fn matches(&self, citation: &Citation) -> bool {
        if !self.confidence.accepts(citation.confidence_score) {
            return false;
        }

        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }

        std::iter::once(citation.source_title.as_str())
            .chain(citation.source_author.as_deref())
            .chain(citation.context_snippet.as_deref())
            .any(|field| field.to_lowercase().contains(&needle))
    }

    pub fn apply<'a>(&self, citations: &'a [Citation]) -> Vec<&'a Citation> {
        citations.iter().filter(|c| self.matches(c)).collect()
    }
}

/// Citations sharing a source title
#[derive(Debug, Clone, PartialEq)]
pub struct CitationGroup<'a> {
    pub source_title: &'a str,
    pub citations: Vec<&'a Citation>,
}

/// Group by `source_title`. Groups keep first-appearance order and members
/// keep arrival order.
pub fn group_by_source<'a, I>(citations: I) -> Vec<CitationGroup<'a>>
where
    I: IntoIterator<Item = &'a Citation>,
{
    let mut groups: Vec<CitationGroup<'a>> = Vec::new();
    for citation in citations {
        match groups
            .iter_mut()
            .find(|g| g.source_title == citation.source_title)
        {
            Some(group) => group.citations.push(citation),
            None => groups.push(CitationGroup {
                source_title: &citation.source_title,
                citations: vec![citation],
            }),
        }
    }
    groups
}

/// Filter then group, as the panel displays it
pub fn project<'a>(citations: &'a [Citation], filter: &CitationFilter) -> Vec<CitationGroup<'a>> {
    group_by_source(filter.apply(citations))
}
