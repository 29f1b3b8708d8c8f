//! In-memory implementations of the collaborator traits (for development/testing)

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::MatchingResult;
use crate::models::{Attributes, ImageSignal, ImageSource, MatchRecord, NeighborHit, Taxonomy};
use crate::repository::{
    ConfirmedLinkStore, EmbeddingStore, MatchStore, MatchingStores, NearestNeighborIndex,
    ProjectImageSource, TaxonomyStore,
};

#[derive(Debug, Default, Clone)]
pub struct InMemoryEmbeddingStore {
    signals: Arc<RwLock<HashMap<(Uuid, ImageSource), ImageSignal>>>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, signal: ImageSignal) {
        let mut signals = self.signals.write().await;
        signals.insert((signal.image_id, signal.source), signal);
    }

    pub async fn remove(&self, image_id: Uuid, source: ImageSource) -> bool {
        let mut signals = self.signals.write().await;
        signals.remove(&(image_id, source)).is_some()
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn get_signal(
        &self,
        image_id: Uuid,
        source: ImageSource,
    ) -> MatchingResult<Option<ImageSignal>> {
        let signals = self.signals.read().await;
        Ok(signals.get(&(image_id, source)).cloned())
    }

    async fn get_signals(
        &self,
        image_ids: &[Uuid],
        source: ImageSource,
    ) -> MatchingResult<HashMap<Uuid, ImageSignal>> {
        let signals = self.signals.read().await;
        Ok(image_ids
            .iter()
            .filter_map(|id| signals.get(&(*id, source)).map(|s| (*id, s.clone())))
            .collect())
    }
}

#[derive(Debug, Clone)]
struct IndexedImage {
    image_id: Uuid,
    product_id: Uuid,
    attrs: Attributes,
    embedding: Vec<f32>,
}

/// Exact (brute-force) cosine search over product images
#[derive(Debug, Default, Clone)]
pub struct InMemoryNeighborIndex {
    entries: Arc<RwLock<Vec<IndexedImage>>>,
}

impl InMemoryNeighborIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a product image signal; signals without owner or embedding are ignored
    pub async fn insert(&self, signal: &ImageSignal) -> bool {
        let (Some(product_id), Some(embedding)) = (signal.owner_id, signal.embedding.as_ref())
        else {
            return false;
        };
        if signal.source != ImageSource::Product {
            return false;
        }

        let mut entries = self.entries.write().await;
        entries.retain(|e| e.image_id != signal.image_id);
        entries.push(IndexedImage {
            image_id: signal.image_id,
            product_id,
            attrs: signal.attrs.clone(),
            embedding: embedding.clone(),
        });
        true
    }
}

/// `1 - cosine similarity`; `None` for zero-length or mismatched vectors
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(1.0 - dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[async_trait]
impl NearestNeighborIndex for InMemoryNeighborIndex {
    async fn query_nearest(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> MatchingResult<Vec<NeighborHit>> {
        let entries = self.entries.read().await;

        let mut hits: Vec<NeighborHit> = entries
            .iter()
            .filter_map(|e| {
                let distance = cosine_distance(embedding, &e.embedding)?;
                Some(NeighborHit {
                    image_id: e.image_id,
                    product_id: e.product_id,
                    attrs: e.attrs.clone(),
                    distance: distance.max(0.0),
                })
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryConfirmedLinks {
    links: Arc<RwLock<HashMap<Uuid, Vec<Uuid>>>>,
}

impl InMemoryConfirmedLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn link(&self, project_id: Uuid, product_id: Uuid) {
        let mut links = self.links.write().await;
        let products = links.entry(project_id).or_default();
        if !products.contains(&product_id) {
            products.push(product_id);
        }
    }
}

#[async_trait]
impl ConfirmedLinkStore for InMemoryConfirmedLinks {
    async fn get_confirmed_products(&self, project_id: Uuid) -> MatchingResult<Vec<Uuid>> {
        let links = self.links.read().await;
        Ok(links.get(&project_id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryTaxonomy {
    products: Arc<RwLock<HashMap<Uuid, Taxonomy>>>,
}

impl InMemoryTaxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, product_id: Uuid, taxonomy: Taxonomy) {
        let mut products = self.products.write().await;
        products.insert(product_id, taxonomy);
    }
}

#[async_trait]
impl TaxonomyStore for InMemoryTaxonomy {
    async fn get_taxonomy(&self, product_ids: &[Uuid]) -> MatchingResult<HashMap<Uuid, Taxonomy>> {
        let products = self.products.read().await;
        Ok(product_ids
            .iter()
            .filter_map(|id| products.get(id).map(|t| (*id, t.clone())))
            .collect())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryMatchStore {
    records: Arc<RwLock<HashMap<(Uuid, Uuid), MatchRecord>>>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn upsert(&self, record: MatchRecord) -> MatchingResult<()> {
        let mut records = self.records.write().await;
        records.insert(record.key(), record);
        Ok(())
    }

    async fn delete_stale(
        &self,
        project_id: Uuid,
        keep_run_id: Uuid,
        retain_product_ids: &[Uuid],
    ) -> MatchingResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| {
            r.project_id != project_id
                || r.run_id == keep_run_id
                || retain_product_ids.contains(&r.product_id)
        });
        Ok((before - records.len()) as u64)
    }

    async fn list_for_project(&self, project_id: Uuid) -> MatchingResult<Vec<MatchRecord>> {
        let records = self.records.read().await;
        let mut result: Vec<MatchRecord> = records
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();

        result.sort_by(|a, b| b.score.cmp(&a.score).then(a.product_id.cmp(&b.product_id)));
        Ok(result)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryProjectGallery {
    galleries: Arc<RwLock<HashMap<Uuid, Vec<Uuid>>>>,
}

impl InMemoryProjectGallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_image(&self, project_id: Uuid, image_id: Uuid) {
        let mut galleries = self.galleries.write().await;
        let images = galleries.entry(project_id).or_default();
        if !images.contains(&image_id) {
            images.push(image_id);
        }
    }

    pub async fn remove_image(&self, project_id: Uuid, image_id: Uuid) {
        let mut galleries = self.galleries.write().await;
        if let Some(images) = galleries.get_mut(&project_id) {
            images.retain(|id| *id != image_id);
        }
    }
}

#[async_trait]
impl ProjectImageSource for InMemoryProjectGallery {
    async fn list_project_ids(&self) -> MatchingResult<Vec<Uuid>> {
        let galleries = self.galleries.read().await;
        let mut ids: Vec<Uuid> = galleries.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_project_images(&self, project_id: Uuid) -> MatchingResult<Vec<Uuid>> {
        let galleries = self.galleries.read().await;
        Ok(galleries.get(&project_id).cloned().unwrap_or_default())
    }
}

/// A complete in-memory catalog, handy for wiring a [`MatchingStores`] in tests
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    pub embeddings: InMemoryEmbeddingStore,
    pub index: InMemoryNeighborIndex,
    pub confirmed_links: InMemoryConfirmedLinks,
    pub taxonomy: InMemoryTaxonomy,
    pub matches: InMemoryMatchStore,
    pub projects: InMemoryProjectGallery,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project photo and its signal
    pub async fn add_project_image(&self, signal: ImageSignal) {
        if let Some(project_id) = signal.owner_id {
            self.projects.add_image(project_id, signal.image_id).await;
        }
        self.embeddings.insert(signal).await;
    }

    /// Register a product photo in both the signal store and the index
    pub async fn add_product_image(&self, signal: ImageSignal) {
        self.index.insert(&signal).await;
        self.embeddings.insert(signal).await;
    }

    pub fn stores(&self) -> MatchingStores {
        MatchingStores {
            embeddings: Arc::new(self.embeddings.clone()),
            index: Arc::new(self.index.clone()),
            confirmed_links: Arc::new(self.confirmed_links.clone()),
            taxonomy: Arc::new(self.taxonomy.clone()),
            matches: Arc::new(self.matches.clone()),
            projects: Arc::new(self.projects.clone()),
        }
    }
}
