//! # AInsights
//!
//! Grounded question answering over business data: live statistics from a
//! CSV dataset plus retrieved passages from ingested reports, merged into a
//! bounded context and handed to a local or remote language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Documents  │──▶│ Chunk+Embed  │──▶│ Vector Index │
//! │ (fs, paths) │   │  (ingest)    │   │  (JSON file) │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │ top-k
//! ┌─────────────┐   ┌──────────────┐   ┌──────▼───────┐   ┌───────────┐
//! │ CSV dataset │──▶│ Statistics   │──▶│   Context    │──▶│ Generator │
//! └─────────────┘   └──────────────┘   │  Assembler   │   │ (timeout) │
//!                        session ────▶ └──────────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ainsights ingest ./reports            # chunk, embed, index
//! ainsights stats --dataset sales.csv --filter Region=North
//! ainsights ask "Why did West sales drop?" --dataset sales.csv
//! ainsights chat --dataset sales.csv
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector_fs`] | Filesystem document scanning |
//! | [`embedding`] | Embedding backends |
//! | [`ingest`] | Ingestion pipeline |
//! | [`store`] | Index open/save/remove/rebuild |
//! | [`stats`] | Live dataset statistics |
//! | [`generate`] | Answer generators and the timeout policy |
//! | [`session`] | Per-session conversation history |
//! | [`query`] | Query engine |
//! | [`progress`] | Ingest progress reporting |
//!
//! The chunker, vector index, and context assembler live in `ainsights_core`.

pub mod config;
pub mod connector_fs;
pub mod embedding;
pub mod generate;
pub mod ingest;
pub mod progress;
pub mod query;
pub mod session;
pub mod stats;
pub mod store;
