//! # KB Harness Core
//!
//! Shared, I/O-free logic for the KB Harness knowledge base: data models,
//! the paragraph splitter, the embedding and vector index contracts, the
//! collection-scoped retrieval algorithm and prompt augmentation.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP clients.
//! Concrete providers, parsers and the persistent index live in the
//! `kb-harness` application crate.

pub mod embedding;
pub mod index;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod split;
