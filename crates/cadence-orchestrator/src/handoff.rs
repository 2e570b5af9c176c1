//! Persona handoff for chain mode
//!
//! A handoff decides what accumulated context the next persona receives.
//! Sequential passes only the previous persona's contributions, cumulative
//! passes everything, selective filters to what the destination persona
//! cares about. Every handoff is recorded with a context-fidelity score.

use cadence_core::{CadenceError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How context moves from one chain link to the next
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStrategy {
    /// Only the immediately preceding link's contributions
    Sequential,
    /// The full accumulated context
    #[default]
    Cumulative,
    /// Accumulated context filtered to persona-relevant categories
    Selective,
}

impl fmt::Display for HandoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Cumulative => write!(f, "cumulative"),
            Self::Selective => write!(f, "selective"),
        }
    }
}

impl FromStr for HandoffStrategy {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "cumulative" => Ok(Self::Cumulative),
            "selective" => Ok(Self::Selective),
            other => Err(CadenceError::Handoff(format!(
                "Unknown handoff strategy: {}",
                other
            ))),
        }
    }
}

/// One persona's contribution to the accumulated context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub persona: String,
    pub content: String,
}

impl Contribution {
    pub fn new(persona: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            content: content.into(),
        }
    }
}

/// Categories of accumulated context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextCategory {
    Insights,
    Decisions,
    Recommendations,
    Artifacts,
    Expertise,
}

const ALL_CATEGORIES: [ContextCategory; 5] = [
    ContextCategory::Insights,
    ContextCategory::Decisions,
    ContextCategory::Recommendations,
    ContextCategory::Artifacts,
    ContextCategory::Expertise,
];

/// Context accumulated across a persona chain.
///
/// Merges deduplicate by `(persona, content)` so repeated contributions
/// never grow the context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccumulatedContext {
    pub insights: Vec<Contribution>,
    pub decisions: Vec<Contribution>,
    pub recommendations: Vec<Contribution>,
    pub artifacts: Vec<Contribution>,
    pub expertise: Vec<Contribution>,
}

impl AccumulatedContext {
    fn bucket(&self, category: ContextCategory) -> &Vec<Contribution> {
        match category {
            ContextCategory::Insights => &self.insights,
            ContextCategory::Decisions => &self.decisions,
            ContextCategory::Recommendations => &self.recommendations,
            ContextCategory::Artifacts => &self.artifacts,
            ContextCategory::Expertise => &self.expertise,
        }
    }

    fn bucket_mut(&mut self, category: ContextCategory) -> &mut Vec<Contribution> {
        match category {
            ContextCategory::Insights => &mut self.insights,
            ContextCategory::Decisions => &mut self.decisions,
            ContextCategory::Recommendations => &mut self.recommendations,
            ContextCategory::Artifacts => &mut self.artifacts,
            ContextCategory::Expertise => &mut self.expertise,
        }
    }

    /// Add one contribution, deduplicated by `(persona, content)`
    pub fn add(&mut self, category: ContextCategory, contribution: Contribution) {
        let bucket = self.bucket_mut(category);
        if !bucket.contains(&contribution) {
            bucket.push(contribution);
        }
    }

    /// Merge another accumulated context into this one
    pub fn merge(&mut self, other: &AccumulatedContext) {
        for category in ALL_CATEGORIES {
            for contribution in other.bucket(category) {
                self.add(category, contribution.clone());
            }
        }
    }

    pub fn total_elements(&self) -> usize {
        ALL_CATEGORIES.iter().map(|c| self.bucket(*c).len()).sum()
    }

    /// Keep only contributions matching the predicate
    fn filtered(&self, keep: impl Fn(ContextCategory, &Contribution) -> bool) -> Self {
        let mut out = Self::default();
        for category in ALL_CATEGORIES {
            for contribution in self.bucket(category) {
                if keep(category, contribution) {
                    out.add(category, contribution.clone());
                }
            }
        }
        out
    }
}

/// Audit record of one handoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub from_persona: String,
    pub to_persona: String,
    pub strategy: HandoffStrategy,
    /// Human-readable description of how the context changed shape
    pub context_transformation: String,
    pub preserved_elements: usize,
    pub transformed_elements: usize,
    /// preserved / total, 1.0 when the source context was empty
    pub fidelity: f64,
}

/// Context categories a destination persona is interested in.
///
/// Unknown personas receive everything; filtering only narrows for
/// personas with a known focus.
fn relevant_categories(persona: &str) -> Vec<ContextCategory> {
    let p = persona.to_lowercase();
    if p.contains("architect") {
        vec![
            ContextCategory::Insights,
            ContextCategory::Decisions,
            ContextCategory::Expertise,
        ]
    } else if p.contains("qa") || p.contains("test") {
        vec![
            ContextCategory::Insights,
            ContextCategory::Recommendations,
            ContextCategory::Artifacts,
        ]
    } else if p.contains("security") {
        vec![
            ContextCategory::Insights,
            ContextCategory::Recommendations,
            ContextCategory::Decisions,
        ]
    } else {
        ALL_CATEGORIES.to_vec()
    }
}

/// Build the context payload for the next persona and the audit record.
///
/// The payload is what the destination link executes against; the
/// accumulated context itself is never shrunk by a handoff.
pub fn perform_handoff(
    strategy: HandoffStrategy,
    from_persona: &str,
    to_persona: &str,
    accumulated: &AccumulatedContext,
) -> (AccumulatedContext, HandoffRecord) {
    let total = accumulated.total_elements();
    let (payload, transformation) = match strategy {
        HandoffStrategy::Sequential => (
            accumulated.filtered(|_, c| c.persona == from_persona),
            format!("kept only {} contributions", from_persona),
        ),
        HandoffStrategy::Cumulative => (
            accumulated.clone(),
            "passed full accumulated context".to_string(),
        ),
        HandoffStrategy::Selective => {
            let categories = relevant_categories(to_persona);
            (
                accumulated.filtered(|cat, _| categories.contains(&cat)),
                format!("filtered to {} categories for {}", categories.len(), to_persona),
            )
        }
    };

    let preserved = payload.total_elements();
    let record = HandoffRecord {
        from_persona: from_persona.to_string(),
        to_persona: to_persona.to_string(),
        strategy,
        context_transformation: transformation,
        preserved_elements: preserved,
        transformed_elements: total.saturating_sub(preserved),
        fidelity: if total == 0 {
            1.0
        } else {
            preserved as f64 / total as f64
        },
    };
    (payload, record)
}
