use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::MatchingResult;
use crate::models::{ImageSignal, ImageSource, MatchRecord, NeighborHit, Taxonomy};

/// Keyed access to AI-derived image signals
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn get_signal(
        &self,
        image_id: Uuid,
        source: ImageSource,
    ) -> MatchingResult<Option<ImageSignal>>;

    /// Batched lookup; images without a stored signal are absent from the map
    async fn get_signals(
        &self,
        image_ids: &[Uuid],
        source: ImageSource,
    ) -> MatchingResult<HashMap<Uuid, ImageSignal>>;
}

/// Vector similarity search over product images
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NearestNeighborIndex: Send + Sync {
    /// Up to `k` product images ordered by ascending distance
    async fn query_nearest(&self, embedding: &[f32], k: usize)
    -> MatchingResult<Vec<NeighborHit>>;
}

/// Products already linked to a project by hand or by an earlier verified match
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfirmedLinkStore: Send + Sync {
    async fn get_confirmed_products(&self, project_id: Uuid) -> MatchingResult<Vec<Uuid>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaxonomyStore: Send + Sync {
    async fn get_taxonomy(&self, product_ids: &[Uuid]) -> MatchingResult<HashMap<Uuid, Taxonomy>>;
}

/// Persistence of match records
///
/// Every write must be atomic per record: a row is either fully written or
/// not written at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Insert or replace the record keyed by (project_id, product_id)
    async fn upsert(&self, record: MatchRecord) -> MatchingResult<()>;

    /// Delete every record of the project whose run_id differs from
    /// `keep_run_id`, except the products listed in `retain_product_ids`
    async fn delete_stale(
        &self,
        project_id: Uuid,
        keep_run_id: Uuid,
        retain_product_ids: &[Uuid],
    ) -> MatchingResult<u64>;

    /// Records of a project, best score first
    async fn list_for_project(&self, project_id: Uuid) -> MatchingResult<Vec<MatchRecord>>;
}

/// Enumerates projects and the photographs in their galleries
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectImageSource: Send + Sync {
    async fn list_project_ids(&self) -> MatchingResult<Vec<Uuid>>;

    async fn list_project_images(&self, project_id: Uuid) -> MatchingResult<Vec<Uuid>>;
}

/// Every collaborator the engine needs, injected as trait objects
#[derive(Clone)]
pub struct MatchingStores {
    pub embeddings: Arc<dyn EmbeddingStore>,
    pub index: Arc<dyn NearestNeighborIndex>,
    pub confirmed_links: Arc<dyn ConfirmedLinkStore>,
    pub taxonomy: Arc<dyn TaxonomyStore>,
    pub matches: Arc<dyn MatchStore>,
    pub projects: Arc<dyn ProjectImageSource>,
}
