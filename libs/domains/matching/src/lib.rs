//! Matching Domain
//!
//! Links photographs of real-world projects to the catalog products that
//! appear in them. For each project the engine queries a nearest-neighbor
//! index with every project image, scores each (project image, product image)
//! pair, aggregates pairs per product, nudges candidates that resemble
//! products already confirmed for the project, buckets them into tiers and
//! persists them under a run id so stale matches can be swept afterwards.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ MatchingService │  ← single project / batch, per-project lock
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   Aggregator    │  ← NN fan-out, pair scoring, grouping
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ TaxonomyBooster │  ← bonus from confirmed products
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  classify tier  │  ← verified / possible / dropped
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ RunScopedWriter │  ← upsert under run id, then delete stale rows
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_matching::{InMemoryCatalog, MatchingConfig, MatchingService};
//! use uuid::Uuid;
//!
//! # async fn run() -> domain_matching::MatchingResult<()> {
//! let catalog = InMemoryCatalog::new();
//! let service = MatchingService::new(catalog.stores(), MatchingConfig::default())?;
//!
//! let report = service.compute_and_upsert_matches_for_project(Uuid::new_v4()).await;
//! println!("upserted {} matches", report.upserted);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod config;
pub mod entity;
pub mod error;
pub mod lock;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod rpc_index;
pub mod scoring;
pub mod service;
pub mod taxonomy;
pub mod tier;
pub mod writer;

// Re-export commonly used types
pub use config::{MatchingConfig, ScoringWeights, TierThresholds};
pub use error::{MatchingError, MatchingResult};
pub use lock::ProjectLocks;
pub use memory::InMemoryCatalog;
pub use models::{
    Attributes, BatchReport, ImageSignal, ImageSource, MatchCandidate, MatchReason, MatchRecord,
    MatchTier, NeighborHit, PairScore, ProjectRunReport, ReasonKind, Taxonomy,
};
pub use postgres::PgMatchStore;
pub use repository::{
    ConfirmedLinkStore, EmbeddingStore, MatchStore, MatchingStores, NearestNeighborIndex,
    ProjectImageSource, TaxonomyStore,
};
pub use rpc_index::{HttpNeighborIndex, HttpNeighborIndexConfig};
pub use service::MatchingService;
