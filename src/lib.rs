//! # scan-indexer
//!
//! Ingests the output of security scanners into a document search engine,
//! one index per (record type, tool, project).
//!
//! Result directories are walked recursively and every file is assigned to
//! at most one tool, by filename first and by content second. Each tool's
//! parser turns its files into findings, hosts, services, certificates, and
//! ciphers with deterministic ids, which are written in bounded bulk
//! batches. Re-running an ingest overwrites rather than duplicates.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  classify   │──▶│   parsers    │──▶│  bulk engine │
//! │ name+probe  │   │ nmap/nessus… │   │  (core crate)│
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!        ▲                                     │
//!        │           ┌──────────────┐          ▼
//!   input dirs       │   mappings   │──▶ index manager ──▶ Elasticsearch
//!                    │ 4-layer TOML │                          │
//!                    └──────────────┘                          ▼
//!                                                        sanity checks
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | `scanidx.toml` loading and user-local layering |
//! | [`mappings`] | Four-layer index mapping composition |
//! | [`classify`] | Directory walk, extension filter, tool assignment |
//! | [`parsers`] | Per-tool parsers behind the [`parsers::ScanParser`] trait |
//! | [`handlers`] | Tool registry: parser constructor, sanity check, mapping quirks |
//! | [`index`] | Index naming and recreation |
//! | [`sanity`] | Post-ingestion cross-count checks |
//! | [`pipeline`] | The ingest state machine |
//! | [`elasticsearch`] | REST implementation of the store trait |
//! | [`maintenance`] | Listing and deleting indices |
//! | [`progress`] | Progress output on stderr |
//!
//! The store abstraction, record model, mapping merge, and bulk engine live
//! in the `scan-indexer-core` crate.

pub mod classify;
pub mod config;
pub mod elasticsearch;
pub mod handlers;
pub mod index;
pub mod maintenance;
pub mod mappings;
pub mod parsers;
pub mod pipeline;
pub mod progress;
pub mod sanity;
