//! # Incident RAG
//!
//! A retrieval-augmented assistant over IT incident records.
//!
//! Incident exports are loaded from a JSON file or URL, chunked, embedded,
//! and stored in a hosted vector index. Questions are answered by a hosted
//! chat model grounded on the retrieved chunks, with citations. A thin
//! client over the ServiceNow Table API lists, creates, updates, and closes
//! incidents.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────┐   ┌────────────┐
//! │  Loader   │──▶│ Chunk+Embed │──▶│  Pinecone  │
//! │ file/URL  │   │             │   │   index    │
//! └───────────┘   └─────────────┘   └─────┬──────┘
//!                                         │ retrieve
//!                                   ┌─────▼──────┐   ┌─────────┐
//!                                   │    RAG     │──▶│ Mistral │
//!                                   │  pipeline  │   │  chat   │
//!                                   └─────┬──────┘   └─────────┘
//!                        ┌────────────────┤
//!                        ▼                ▼
//!                   ┌─────────┐     ┌──────────┐     ┌────────────┐
//!                   │   CLI   │     │   HTTP   │────▶│ ServiceNow │
//!                   │  (inc)  │     │  server  │     │   tables   │
//!                   └─────────┘     └──────────┘     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! inc --reload                  # rebuild the index, then start the REPL
//! inc "status of INC0000039?"   # one question
//! inc incidents list --state 2
//! inc serve                     # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`error`] | Error types per outbound concern |
//! | [`models`] | Core data types |
//! | [`loader`] | Incident JSON loading and normalization |
//! | [`chunk`] | Incident chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index capability (Pinecone, in-memory) |
//! | [`ranking`] | Score normalization, hybrid blending, MMR |
//! | [`store`] | Vector store adapter: index, replace, retrieve |
//! | [`llm`] | Chat model client |
//! | [`prompt`] | Prompt assembly |
//! | [`rag`] | Question answering pipeline |
//! | [`session`] | Per-conversation chat log |
//! | [`ingest`] | Reload pipeline |
//! | [`tickets`] | ServiceNow incident client |
//! | [`chat`] | Terminal REPL and output formatting |
//! | [`server`] | JSON HTTP server |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod models;
pub mod prompt;
pub mod rag;
pub mod ranking;
pub mod server;
pub mod session;
pub mod store;
pub mod tickets;
