//! # Intake Harness
//!
//! A configuration-driven ingestion substrate: call arbitrarily shaped REST
//! APIs, attribute what comes back to monitored entities, and persist the
//! resulting tasks into a typed document store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ SourceRegistry│──▶│ RequestFetcher│──▶│ResponseMapper│──▶│  IngestSweep │
//! │ (catalog +   │   │ (auth, params,│   │ (items_path, │   │ (chunk, OR,  │
//! │  secrets)    │   │  time filter) │   │  field rules)│   │  attribute)  │
//! └──────┬───────┘   └──────────────┘   └──────────────┘   └──────┬───────┘
//!        │                                                        │
//!        ▼                                                        ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ DocumentStore  (TokenSource bearer auth, typed-value codec, paging,   │
//! │                 499-write commits)                                    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! intake sources news                       # resolved sources of a type
//! intake fetch news search --param q=rust   # one call, mapped items
//! intake sweep news papers --dry-run        # plan + attribute, no writes
//! intake sweep news papers                  # enqueue tasks
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`codec`] | Typed-value wire format |
//! | [`auth`] | Service-account bearer tokens |
//! | [`store`] | Document-store gateway |
//! | [`models`] | Source, entity and task types |
//! | [`registry`] | Source configuration resolution |
//! | [`fetch`] | Configuration-driven HTTP calls |
//! | [`mapping`] | Response item extraction and field rules |
//! | [`ingest`] | Keyword chunking, attribution, sweeps |
//! | [`ai`] | Chat completions, embeddings, JSON repair |
//! | [`config`] | TOML configuration parsing |

pub mod ai;
pub mod ai_cmd;
pub mod app;
pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fetch_cmd;
pub mod get;
pub mod ingest;
pub mod mapping;
pub mod models;
pub mod registry;
pub mod secrets;
pub mod sources;
pub mod store;
pub mod sweep_cmd;

pub use error::{IntakeError, Result};
