//! # AInsights Core
//!
//! Shared retrieval logic for AInsights: the document model, chunking,
//! the embedding trait, the vector index, and context assembly.
//!
//! This crate contains no tokio, HTTP clients, or CLI code. Concrete
//! embedding and generation backends live in the `ainsights` app crate.
//!
//! ```text
//! documents ─▶ Chunker ─▶ EmbeddingProvider ─▶ VectorIndex
//!                                                  │
//! query ─▶ EmbeddingProvider ─▶ search ────────────┘
//!                                  │
//!     live statistics ───▶ ContextAssembler ◀─── ConversationWindow
//!                                  │
//!                           ContextBundle ─▶ answer generator
//! ```

pub mod assemble;
pub mod chunk;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;

pub use error::{Error, Result};
