//! Context assembly: merge live statistics, retrieved segments, and
//! conversation history into one budgeted [`ContextBundle`].
//!
//! # Ordering
//!
//! The rendered context lists live statistics first, then retrieved
//! segments by ascending distance, then conversation history with the
//! most recent turn last (closest to the question in the final prompt).
//!
//! # Budget
//!
//! The budget counts Unicode scalar values of [`ContextBundle::render`].
//! While over budget, items are dropped lowest priority first:
//!
//! 1. the oldest conversation turn,
//! 2. the farthest retrieved segment,
//! 3. the last statistic; a single remaining statistic is truncated.
//!
//! Assembly never fails. If the query cannot be embedded or the index
//! rejects it, the bundle is built from statistics and history alone and
//! [`ContextBundle::degraded`] carries the reason.

use serde::Serialize;
use tracing::{debug, warn};

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::index::{SearchHit, VectorIndex};
use crate::models::{ConversationTurn, SourceType};

const STATISTICS_HEADING: &str = "## Live data statistics";
const DOCUMENTS_HEADING: &str = "## Retrieved documents";
const HISTORY_HEADING: &str = "## Conversation history";

/// One line of live statistics, e.g. `Total sales: 12,345`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatSnippet {
    pub label: String,
    pub text: String,
}

impl StatSnippet {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

/// A segment selected for the context, with the provenance shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedSegment {
    pub segment_id: String,
    pub document_id: String,
    pub source_type: SourceType,
    pub ordinal: usize,
    pub offset: usize,
    pub distance: f32,
    pub text: String,
}

impl From<SearchHit> for RetrievedSegment {
    fn from(hit: SearchHit) -> Self {
        Self {
            segment_id: hit.segment.id,
            document_id: hit.segment.document_id,
            source_type: hit.segment.source_type,
            ordinal: hit.segment.ordinal,
            offset: hit.segment.offset,
            distance: hit.distance,
            text: hit.segment.text,
        }
    }
}

/// Counts of items removed to fit the budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Trimmed {
    pub history: usize,
    pub segments: usize,
    pub statistics: usize,
    /// Whether the last remaining statistic was shortened.
    pub truncated_statistic: bool,
}

impl Trimmed {
    pub fn any(&self) -> bool {
        self.history + self.segments + self.statistics > 0 || self.truncated_statistic
    }
}

/// The merged context handed to the answer generator for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBundle {
    pub statistics: Vec<StatSnippet>,
    pub segments: Vec<RetrievedSegment>,
    /// Oldest first.
    pub history: Vec<ConversationTurn>,
    pub budget: usize,
    pub trimmed: Trimmed,
    /// Why retrieval was skipped, if it was.
    pub degraded: Option<String>,
}

impl ContextBundle {
    /// Merge the three sources and trim the result to `budget` characters.
    pub fn merge(
        statistics: Vec<StatSnippet>,
        segments: Vec<RetrievedSegment>,
        history: Vec<ConversationTurn>,
        budget: usize,
    ) -> Self {
        let mut bundle = Self {
            statistics,
            segments,
            history,
            budget,
            trimmed: Trimmed::default(),
            degraded: None,
        };
        bundle.trim_to_budget();
        bundle
    }

    /// Render the context as prompt text. Empty sections are omitted.
    pub fn render(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        if !self.statistics.is_empty() {
            let mut s = String::from(STATISTICS_HEADING);
            for stat in &self.statistics {
                s.push_str(&format!("\n- {}: {}", stat.label, stat.text));
            }
            sections.push(s);
        }

        if !self.segments.is_empty() {
            let mut s = String::from(DOCUMENTS_HEADING);
            for (i, seg) in self.segments.iter().enumerate() {
                s.push_str(&format!(
                    "\n[{}] (source: {}, segment {}, offset {})\n{}",
                    i + 1,
                    seg.document_id,
                    seg.ordinal,
                    seg.offset,
                    seg.text
                ));
            }
            sections.push(s);
        }

        if !self.history.is_empty() {
            let mut s = String::from(HISTORY_HEADING);
            for turn in &self.history {
                s.push_str(&format!("\nUser: {}\nAssistant: {}", turn.query, turn.answer));
            }
            sections.push(s);
        }

        sections.join("\n\n")
    }

    /// Length of [`render`](Self::render) in characters.
    pub fn char_len(&self) -> usize {
        self.render().chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.statistics.is_empty() && self.segments.is_empty() && self.history.is_empty()
    }

    /// Documents cited by the retrieved segments, in rank order, without repeats.
    pub fn citations(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for seg in &self.segments {
            if !out.contains(&seg.document_id) {
                out.push(seg.document_id.clone());
            }
        }
        out
    }

    fn trim_to_budget(&mut self) {
        loop {
            let len = self.char_len();
            if len <= self.budget {
                return;
            }

            if !self.history.is_empty() {
                self.history.remove(0);
                self.trimmed.history += 1;
            } else if !self.segments.is_empty() {
                self.segments.pop();
                self.trimmed.segments += 1;
            } else if self.statistics.len() > 1 {
                self.statistics.pop();
                self.trimmed.statistics += 1;
            } else if let Some(stat) = self.statistics.first_mut() {
                let excess = len - self.budget;
                let text_len = stat.text.chars().count();
                if excess < text_len {
                    stat.text = stat.text.chars().take(text_len - excess).collect();
                    self.trimmed.truncated_statistic = true;
                } else {
                    self.statistics.clear();
                    self.trimmed.statistics += 1;
                }
            } else {
                return;
            }
        }
    }
}

/// Retrieval and budget parameters for [`ContextAssembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblySettings {
    pub top_k: usize,
    pub budget_chars: usize,
    pub conversation_window: usize,
}

/// Builds a [`ContextBundle`] for a query against a shared index.
pub struct ContextAssembler<'a> {
    embedder: &'a dyn EmbeddingProvider,
    index: &'a VectorIndex,
    settings: AssemblySettings,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(
        embedder: &'a dyn EmbeddingProvider,
        index: &'a VectorIndex,
        settings: AssemblySettings,
    ) -> Self {
        Self {
            embedder,
            index,
            settings,
        }
    }

    pub fn settings(&self) -> &AssemblySettings {
        &self.settings
    }

    /// Assemble the context for `query`.
    ///
    /// `history` is the session's history, oldest first; only the last
    /// `conversation_window` turns are considered.
    pub async fn assemble(
        &self,
        query: &str,
        statistics: Vec<StatSnippet>,
        history: &[ConversationTurn],
    ) -> ContextBundle {
        let (segments, degraded) = match self.retrieve(query).await {
            Ok(hits) => (hits.into_iter().map(RetrievedSegment::from).collect(), None),
            Err(e) => {
                warn!(error = %e, "retrieval failed, assembling context without documents");
                (Vec::new(), Some(e.to_string()))
            }
        };

        let start = history.len().saturating_sub(self.settings.conversation_window);
        let recent = history[start..].to_vec();

        let mut bundle =
            ContextBundle::merge(statistics, segments, recent, self.settings.budget_chars);
        bundle.degraded = degraded;

        if bundle.trimmed.any() {
            debug!(
                budget = bundle.budget,
                history = bundle.trimmed.history,
                segments = bundle.trimmed.segments,
                statistics = bundle.trimmed.statistics,
                "trimmed context to budget"
            );
        }
        bundle
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<SearchHit>> {
        if self.settings.top_k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = embed_query(self.embedder, query)
            .await
            .map_err(|e| Error::Embedding(format!("{:#}", e)))?;
        self.index.search(&vector, self.settings.top_k)
    }
}
