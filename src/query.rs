//! Question answering: assemble context, generate, cite.
//!
//! [`QueryEngine`] is the query boundary. One call to [`QueryEngine::ask`]
//! runs embed → search → assemble → generate for one session and always
//! returns a [`QueryResponse`], degraded or not.

use ainsights_core::assemble::{AssemblySettings, ContextAssembler, StatSnippet};
use ainsights_core::embedding::{embed_query, EmbeddingProvider};
use ainsights_core::index::VectorIndex;
use ainsights_core::models::ConversationTurn;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::generate::{
    build_prompt, create_generator, generate_with_policy, AnswerGenerator, GenerationOutcome,
    GenerationPolicy,
};
use crate::session::SessionStore;
use crate::stats::{Dataset, Filter};
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerStatus {
    Answered,
    Unavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Latency {
    pub retrieval_ms: u64,
    pub generation_ms: u64,
    pub total_ms: u64,
    /// Generation attempts, including retries.
    pub attempts: u32,
}

/// What the user gets back for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub status: AnswerStatus,
    /// Document ids of the segments in the context, best match first.
    pub citations: Vec<String>,
    /// Set when the context was assembled without documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
    pub context_chars: usize,
    pub latency: Latency,
}

/// Shared, long-lived pipeline state. Safe to use from many sessions at once.
pub struct QueryEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    generator: Arc<dyn AnswerGenerator>,
    sessions: SessionStore,
    settings: AssemblySettings,
    policy: GenerationPolicy,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        generator: Arc<dyn AnswerGenerator>,
        settings: AssemblySettings,
        policy: GenerationPolicy,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            sessions: SessionStore::new(settings.conversation_window),
            settings,
            policy,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let index = Arc::new(store::open_for_query(config, embedder.as_ref()));
        let generator: Arc<dyn AnswerGenerator> = Arc::from(create_generator(&config.generation)?);
        Ok(Self::new(
            embedder,
            index,
            generator,
            AssemblySettings {
                top_k: config.retrieval.top_k,
                budget_chars: config.retrieval.context_budget_chars,
                conversation_window: config.retrieval.conversation_window,
            },
            GenerationPolicy::from_config(&config.generation),
        ))
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Answer `query` within `session_id`, grounded on `statistics`.
    ///
    /// Only answered turns are added to the session's history.
    pub async fn ask(
        &self,
        query: &str,
        session_id: &str,
        statistics: Vec<StatSnippet>,
    ) -> QueryResponse {
        let started = Instant::now();
        let history = self.sessions.history(session_id);

        let assembler = ContextAssembler::new(self.embedder.as_ref(), &self.index, self.settings);
        let bundle = assembler.assemble(query, statistics, &history).await;
        let retrieval_ms = started.elapsed().as_millis() as u64;

        let prompt = build_prompt(query, &bundle);
        let generation_started = Instant::now();
        let outcome = generate_with_policy(self.generator.as_ref(), &prompt, &self.policy).await;
        let generation_ms = generation_started.elapsed().as_millis() as u64;

        let attempts = outcome.attempts();
        let (answer, status, unavailable_reason) = match outcome {
            GenerationOutcome::Answered { text, .. } => {
                self.sessions
                    .record(session_id, ConversationTurn::new(query, text.clone()));
                (text, AnswerStatus::Answered, None)
            }
            GenerationOutcome::Unavailable { text, reason, .. } => {
                (text, AnswerStatus::Unavailable, Some(reason))
            }
        };

        let response = QueryResponse {
            answer,
            status,
            citations: bundle.citations(),
            degraded: bundle.degraded.clone(),
            unavailable_reason,
            context_chars: bundle.char_len(),
            latency: Latency {
                retrieval_ms,
                generation_ms,
                total_ms: started.elapsed().as_millis() as u64,
                attempts,
            },
        };
        info!(
            session = session_id,
            status = ?response.status,
            citations = response.citations.len(),
            context_chars = response.context_chars,
            total_ms = response.latency.total_ms,
            "answered query"
        );
        response
    }
}

/// Summarize `dataset` under `filters`, or nothing when no dataset is given.
fn live_statistics(dataset: Option<&Path>, filters: &[Filter]) -> Result<Vec<StatSnippet>> {
    match dataset {
        Some(path) => {
            let data = Dataset::from_path(path)?;
            Ok(data.view(filters)?.summarize())
        }
        None => Ok(Vec::new()),
    }
}

fn print_response(response: &QueryResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    println!("{}", response.answer);
    println!();
    if !response.citations.is_empty() {
        println!("Sources:");
        for (i, id) in response.citations.iter().enumerate() {
            println!("  [{}] {}", i + 1, id);
        }
    }
    if let Some(ref reason) = response.degraded {
        println!("(documents skipped: {})", reason);
    }
    if let Some(ref reason) = response.unavailable_reason {
        println!("(reason: {})", reason);
    }
    println!(
        "({} ms retrieval, {} ms generation, {} attempt(s))",
        response.latency.retrieval_ms, response.latency.generation_ms, response.latency.attempts
    );
    Ok(())
}

/// `ainsights ask <query>`: answer one question.
pub async fn run_ask(
    config: &Config,
    query: &str,
    dataset: Option<&Path>,
    filters: &[Filter],
    json: bool,
) -> Result<()> {
    let statistics = live_statistics(dataset, filters)?;
    let engine = QueryEngine::from_config(config)?;
    let session = engine.sessions().create();
    let response = engine.ask(query, &session, statistics).await;
    print_response(&response, json)
}

/// `ainsights search <query>`: show the nearest segments without generating.
pub async fn run_search(config: &Config, query: &str, k: usize) -> Result<()> {
    let provider = create_provider(&config.embedding)?;
    let index = store::open_existing(config, provider.as_ref())?;
    if index.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let vector = embed_query(provider.as_ref(), query)
        .await
        .context("Failed to embed query")?;
    let hits = index.search(&vector, k)?;
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let seg = &hit.segment;
        let date = chrono::DateTime::from_timestamp_millis(seg.ingested_at)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            hit.distance,
            seg.document_id,
            seg.source_type
        );
        println!("    segment: {} (offset {})", seg.ordinal, seg.offset);
        println!("    ingested: {}", date);
        println!("    excerpt: \"{}\"", excerpt(&seg.text, 160));
        println!("    id: {}", seg.id);
        println!();
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        flat.to_string()
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

/// `ainsights chat`: an interactive session on stdin. `exit` or `quit` ends it.
pub async fn run_chat(config: &Config, dataset: Option<&Path>, filters: &[Filter]) -> Result<()> {
    let statistics = live_statistics(dataset, filters)?;
    let engine = QueryEngine::from_config(config)?;
    let session = engine.sessions().create();

    println!(
        "ainsights chat ({} segments indexed). Type `exit` to quit.",
        engine.index().len()
    );

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = match lines.next() {
            Some(line) => line?,
            None => break,
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "exit" || query == "quit" {
            break;
        }
        let response = engine.ask(query, &session, statistics.clone()).await;
        print_response(&response, false)?;
        println!();
    }
    engine.sessions().end(&session);
    Ok(())
}
