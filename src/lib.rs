//! # KB Harness
//!
//! A local knowledge base for grounding chat answers in your own documents.
//!
//! Files (`.txt`, `.md`, `.pdf`) are added to named collections, split into
//! overlapping segments, embedded and stored in a vector index. Queries
//! retrieve the most similar segments, optionally scoped to a set of
//! collections, and the results can be folded into a grounding prompt for a
//! downstream model.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Registry   │──▶│  Ingestion   │──▶│ Vector index │
//! │ collections │   │ parse/split/ │   │ SQLite/memory│
//! │ + documents │   │ embed/store  │   └──────┬───────┘
//! └──────┬──────┘   └──────────────┘          │
//!        │                                    ▼
//!        ▼                            ┌──────────────┐
//! ┌─────────────┐                     │  Retrieval   │──▶ prompt
//! │  Snapshot   │                     │ oversample + │
//! │   (JSON)    │                     │ filter       │
//! └─────────────┘                     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kb collections create Manuals
//! kb add ./guide.pdf --collection Manuals
//! kb query "installation steps" --collection Manuals
//! kb prompt "How do I install it?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`knowledge_base`] | The service handle tying everything together |
//! | [`registry`] | Collections, documents, status events |
//! | [`store`] | JSON metadata snapshot |
//! | [`ingest`] | Worker pool running the ingestion pipeline |
//! | [`engine`] | One-time construction of provider and index |
//! | [`embedding`] | Concrete embedding providers |
//! | [`sqlite_index`] | SQLite vector index |
//! | [`parse`] | Text and PDF parsers |
//! | [`progress`] | CLI progress rendering |

pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod knowledge_base;
pub mod logging;
pub mod parse;
pub mod progress;
pub mod registry;
pub mod sqlite_index;
pub mod store;

pub use kb_harness_core as core;
pub use knowledge_base::KnowledgeBase;
