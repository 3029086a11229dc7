//! # Scan Indexer Core
//!
//! I/O-free logic for scan-indexer: the tool and record taxonomy, the
//! layered mapping merge, the storage abstraction, and the bulk ingestion
//! engine that streams records into a store in bounded batches.
//!
//! This crate performs no filesystem or network I/O of its own. The
//! application crate supplies a concrete [`store::Store`] (Elasticsearch)
//! while tests use [`store::memory::InMemoryStore`].

pub mod bulk;
pub mod mapping;
pub mod models;
pub mod store;
