//! End-to-end tests for the matching engine
//!
//! The service runs over the in-memory stores with a scripted
//! nearest-neighbor index that returns fixed distances, so every score in
//! these tests is exact.

use async_trait::async_trait;
use domain_matching::memory::InMemoryMatchStore;
use domain_matching::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ============================================================================
// Fixture
// ============================================================================

#[derive(Default)]
struct IndexState {
    next_key: u32,
    keys: HashMap<Uuid, u32>,
    responses: HashMap<u32, Result<Vec<NeighborHit>, String>>,
}

/// Index that answers each project image with a scripted hit list.
///
/// Every registered image gets the embedding `[key, 1.0]`, and the key is
/// how a query is mapped back to its script.
#[derive(Default, Clone)]
struct ScriptedIndex {
    state: Arc<Mutex<IndexState>>,
}

impl ScriptedIndex {
    fn register(&self, image_id: Uuid) -> Vec<f32> {
        let mut state = self.state.lock().unwrap();
        state.next_key += 1;
        let key = state.next_key;
        state.keys.insert(image_id, key);
        vec![key as f32, 1.0]
    }

    fn respond(&self, image_id: Uuid, hits: Vec<NeighborHit>) {
        let mut state = self.state.lock().unwrap();
        let key = state.keys[&image_id];
        state.responses.insert(key, Ok(hits));
    }

    fn fail(&self, image_id: Uuid) {
        let mut state = self.state.lock().unwrap();
        let key = state.keys[&image_id];
        state
            .responses
            .insert(key, Err("index unavailable".to_string()));
    }
}

#[async_trait]
impl NearestNeighborIndex for ScriptedIndex {
    async fn query_nearest(&self, embedding: &[f32], k: usize) -> MatchingResult<Vec<NeighborHit>> {
        let key = embedding[0] as u32;
        let state = self.state.lock().unwrap();
        match state.responses.get(&key) {
            None => Ok(vec![]),
            Some(Err(e)) => Err(MatchingError::Index(e.clone())),
            Some(Ok(hits)) => Ok(hits.iter().take(k).cloned().collect()),
        }
    }
}

struct Engine {
    catalog: InMemoryCatalog,
    index: ScriptedIndex,
    service: MatchingService,
}

impl Engine {
    fn new() -> Self {
        let catalog = InMemoryCatalog::new();
        let index = ScriptedIndex::default();
        let mut stores = catalog.stores();
        stores.index = Arc::new(index.clone());

        let config = MatchingConfig::default().with_embedding_dimension(2);
        let service = MatchingService::new(stores, config).unwrap();

        Self {
            catalog,
            index,
            service,
        }
    }

    async fn project_image(&self, project_id: Uuid, attrs: Attributes) -> Uuid {
        let image_id = Uuid::new_v4();
        let embedding = self.index.register(image_id);
        self.catalog
            .add_project_image(
                ImageSignal::new(image_id, ImageSource::Project, project_id)
                    .with_embedding(embedding)
                    .with_attrs(attrs)
                    .with_confidence(90.0),
            )
            .await;
        image_id
    }
}

fn hit(product_id: Uuid, distance: f64, attrs: Attributes) -> NeighborHit {
    NeighborHit {
        image_id: Uuid::new_v4(),
        product_id,
        attrs,
        distance,
    }
}

fn oak_sofa() -> Attributes {
    Attributes::new()
        .with_family("category", ["sofa"])
        .with_family("material", ["oak", "linen"])
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_single_strong_visual_match_is_verified() {
    let engine = Engine::new();
    let project = Uuid::new_v4();
    let product = Uuid::new_v4();

    let image = engine.project_image(project, oak_sofa()).await;
    engine
        .index
        .respond(image, vec![hit(product, 0.1, oak_sofa())]);

    let report = engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;
    assert!(report.errors.is_empty());
    assert_eq!(report.upserted, 1);

    let matches = engine.service.list_matches_for_project(project).await.unwrap();
    assert_eq!(matches.len(), 1);
    let record = &matches[0];

    // embedding 90, attribute 100 -> combined 93, plus one-hit frequency bonus
    assert_eq!(record.product_id, product);
    assert_eq!(record.tier, MatchTier::Verified);
    assert_eq!(record.score, 95);
    assert_eq!(
        record.reasons,
        vec![
            MatchReason::new(ReasonKind::Embedding, 90),
            MatchReason::new(ReasonKind::Attribute, 100),
            MatchReason::new(ReasonKind::Frequency, 1),
        ]
    );
    assert_eq!(record.evidence_image_ids, vec![image]);
}

#[tokio::test]
async fn test_weak_but_frequent_match_is_verified() {
    let engine = Engine::new();
    let project = Uuid::new_v4();
    let product = Uuid::new_v4();

    let mut images = Vec::new();
    for _ in 0..3 {
        let image = engine.project_image(project, oak_sofa()).await;
        // embedding 60, attribute 100 -> combined 72
        engine
            .index
            .respond(image, vec![hit(product, 0.4, oak_sofa())]);
        images.push(image);
    }

    engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;

    let matches = engine.service.list_matches_for_project(project).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].score, 78);
    assert_eq!(matches[0].tier, MatchTier::Verified);
    assert_eq!(matches[0].evidence_image_ids, images);
}

#[tokio::test]
async fn test_single_weak_match_is_only_possible() {
    let engine = Engine::new();
    let project = Uuid::new_v4();
    let product = Uuid::new_v4();

    let image = engine.project_image(project, oak_sofa()).await;
    engine
        .index
        .respond(image, vec![hit(product, 0.4, oak_sofa())]);

    engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;

    let matches = engine.service.list_matches_for_project(project).await.unwrap();
    assert_eq!(matches[0].score, 74);
    assert_eq!(matches[0].tier, MatchTier::Possible);
}

#[tokio::test]
async fn test_below_floor_produces_no_record() {
    let engine = Engine::new();
    let project = Uuid::new_v4();

    let image = engine.project_image(project, Attributes::new()).await;
    engine.index.respond(
        image,
        vec![
            // embedding 66, no attributes -> combined 46, aggregate 48
            hit(Uuid::new_v4(), 0.34, Attributes::new()),
            // combined 35, below the pair floor
            hit(Uuid::new_v4(), 0.5, Attributes::new()),
        ],
    );

    let report = engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;
    assert!(report.completed());
    assert_eq!(report.upserted, 0);
    assert!(engine.catalog.matches.is_empty().await);
}

#[tokio::test]
async fn test_stale_matches_are_removed_on_recompute() {
    let engine = Engine::new();
    let project = Uuid::new_v4();
    let (old_product, new_product) = (Uuid::new_v4(), Uuid::new_v4());

    let image = engine.project_image(project, oak_sofa()).await;
    engine
        .index
        .respond(image, vec![hit(old_product, 0.1, oak_sofa())]);
    engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;

    engine
        .index
        .respond(image, vec![hit(new_product, 0.1, oak_sofa())]);
    let report = engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;
    assert_eq!(report.stale_deleted, Some(1));

    let matches = engine.service.list_matches_for_project(project).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].product_id, new_product);
    assert_eq!(Some(matches[0].run_id), report.run_id);
}

/// Match store whose upserts of one product are always rejected
struct RejectingMatchStore {
    inner: InMemoryMatchStore,
    reject: Uuid,
}

#[async_trait]
impl MatchStore for RejectingMatchStore {
    async fn upsert(&self, record: MatchRecord) -> MatchingResult<()> {
        if record.product_id == self.reject {
            return Err(MatchingError::Store("check constraint violated".to_string()));
        }
        self.inner.upsert(record).await
    }

    async fn delete_stale(
        &self,
        project_id: Uuid,
        keep_run_id: Uuid,
        retain_product_ids: &[Uuid],
    ) -> MatchingResult<u64> {
        self.inner
            .delete_stale(project_id, keep_run_id, retain_product_ids)
            .await
    }

    async fn list_for_project(&self, project_id: Uuid) -> MatchingResult<Vec<MatchRecord>> {
        self.inner.list_for_project(project_id).await
    }
}

#[tokio::test]
async fn test_persistent_upsert_failure_does_not_block_stale_cleanup() {
    let engine = Engine::new();
    let project = Uuid::new_v4();
    let (dropped, rejected) = (Uuid::new_v4(), Uuid::new_v4());

    let image = engine.project_image(project, oak_sofa()).await;
    engine
        .index
        .respond(image, vec![hit(dropped, 0.1, oak_sofa())]);
    engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;

    let mut stores = engine.catalog.stores();
    stores.index = Arc::new(engine.index.clone());
    stores.matches = Arc::new(RejectingMatchStore {
        inner: engine.catalog.matches.clone(),
        reject: rejected,
    });
    let service = MatchingService::new(
        stores,
        MatchingConfig::default().with_embedding_dimension(2),
    )
    .unwrap();

    engine
        .index
        .respond(image, vec![hit(rejected, 0.1, oak_sofa())]);
    let report = service.compute_and_upsert_matches_for_project(project).await;

    assert!(report.completed());
    assert_eq!(report.upserted, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.stale_deleted, Some(1));
    assert!(report.gc_error.unwrap().contains(&rejected.to_string()));
    assert!(service.list_matches_for_project(project).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_taxonomy_prior_boosts_similar_products() {
    let engine = Engine::new();
    let project = Uuid::new_v4();
    let (confirmed, similar, unrelated) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    engine.catalog.confirmed_links.link(project, confirmed).await;
    let taxonomy = &engine.catalog.taxonomy;
    taxonomy
        .insert(confirmed, Taxonomy::new("furniture", "seating", "sofa"))
        .await;
    taxonomy
        .insert(similar, Taxonomy::new("furniture", "seating", "sofa"))
        .await;
    taxonomy
        .insert(unrelated, Taxonomy::new("lighting", "floor", "arc"))
        .await;

    let image = engine.project_image(project, oak_sofa()).await;
    engine.index.respond(
        image,
        vec![
            hit(similar, 0.4, oak_sofa()),
            hit(unrelated, 0.4, oak_sofa()),
        ],
    );

    engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;

    let matches = engine.service.list_matches_for_project(project).await.unwrap();
    let by_product: HashMap<Uuid, &MatchRecord> =
        matches.iter().map(|m| (m.product_id, m)).collect();

    // 72 + 2 frequency + 30 taxonomy, capped
    assert_eq!(by_product[&similar].score, 100);
    assert!(by_product[&similar]
        .reasons
        .contains(&MatchReason::new(ReasonKind::Taxonomy, 30)));
    assert_eq!(by_product[&unrelated].score, 74);
    assert!(by_product[&unrelated]
        .reasons
        .iter()
        .all(|r| r.kind != ReasonKind::Taxonomy));
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_repeated_runs_are_idempotent() {
    let engine = Engine::new();
    let project = Uuid::new_v4();
    let products: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

    for (i, product) in products.iter().enumerate() {
        let image = engine.project_image(project, oak_sofa()).await;
        engine.index.respond(
            image,
            vec![
                hit(*product, 0.1 * i as f64, oak_sofa()),
                hit(products[0], 0.3, oak_sofa()),
            ],
        );
    }

    let snapshot = |records: Vec<MatchRecord>| {
        records
            .into_iter()
            .map(|r| (r.product_id, r.score, r.tier, r.reasons, r.evidence_image_ids))
            .collect::<Vec<_>>()
    };

    let first = engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;
    let after_first = snapshot(engine.service.list_matches_for_project(project).await.unwrap());

    let second = engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;
    let after_second = snapshot(engine.service.list_matches_for_project(project).await.unwrap());

    assert_eq!(after_first, after_second);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.stale_deleted, Some(0));
}

#[tokio::test]
async fn test_evidence_covers_exactly_the_contributing_images() {
    let engine = Engine::new();
    let project = Uuid::new_v4();
    let (shared, solo) = (Uuid::new_v4(), Uuid::new_v4());

    let a = engine.project_image(project, oak_sofa()).await;
    let b = engine.project_image(project, oak_sofa()).await;
    let c = engine.project_image(project, oak_sofa()).await;
    engine.index.respond(a, vec![hit(shared, 0.2, oak_sofa())]);
    engine.index.respond(
        b,
        vec![hit(shared, 0.1, oak_sofa()), hit(solo, 0.2, oak_sofa())],
    );
    engine.index.respond(c, vec![]);

    engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;

    let matches = engine.service.list_matches_for_project(project).await.unwrap();
    let evidence: HashMap<Uuid, HashSet<Uuid>> = matches
        .iter()
        .map(|m| (m.product_id, m.evidence_image_ids.iter().copied().collect()))
        .collect();

    assert_eq!(evidence[&shared], HashSet::from([a, b]));
    assert_eq!(evidence[&solo], HashSet::from([b]));
}

#[tokio::test]
async fn test_index_outage_keeps_previous_matches() {
    let engine = Engine::new();
    let project = Uuid::new_v4();
    let product = Uuid::new_v4();

    let image = engine.project_image(project, oak_sofa()).await;
    engine
        .index
        .respond(image, vec![hit(product, 0.1, oak_sofa())]);
    engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;

    engine.index.fail(image);
    let report = engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;

    assert!(!report.completed());
    assert_eq!(report.errors.len(), 1);
    let matches = engine.service.list_matches_for_project(project).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].product_id, product);
}

#[tokio::test]
async fn test_one_failed_query_does_not_fail_the_project() {
    let engine = Engine::new();
    let project = Uuid::new_v4();
    let product = Uuid::new_v4();

    let broken = engine.project_image(project, oak_sofa()).await;
    let working = engine.project_image(project, oak_sofa()).await;
    engine.index.fail(broken);
    engine
        .index
        .respond(working, vec![hit(product, 0.1, oak_sofa())]);

    let report = engine
        .service
        .compute_and_upsert_matches_for_project(project)
        .await;
    assert!(report.completed());
    assert_eq!(report.upserted, 1);
}

#[tokio::test]
async fn test_batch_isolates_failing_project() {
    let engine = Engine::new();
    let (healthy, broken) = (Uuid::new_v4(), Uuid::new_v4());

    let good_image = engine.project_image(healthy, oak_sofa()).await;
    engine
        .index
        .respond(good_image, vec![hit(Uuid::new_v4(), 0.1, oak_sofa())]);
    let bad_image = engine.project_image(broken, oak_sofa()).await;
    engine.index.fail(bad_image);

    let batch = engine.service.compute_and_upsert_all_matches().await;

    assert_eq!(batch.projects_processed, 1);
    assert_eq!(batch.total_upserted, 1);
    assert_eq!(batch.errors.len(), 1);
    assert!(batch.errors[0].contains(&broken.to_string()));
    assert_eq!(
        engine.service.list_matches_for_project(healthy).await.unwrap().len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_for_same_project_leave_one_run() {
    let engine = Engine::new();
    let project = Uuid::new_v4();

    for _ in 0..4 {
        let image = engine.project_image(project, oak_sofa()).await;
        engine.index.respond(
            image,
            vec![
                hit(Uuid::new_v4(), 0.1, oak_sofa()),
                hit(Uuid::new_v4(), 0.2, oak_sofa()),
            ],
        );
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let service = engine.service.clone();
        handles.push(tokio::spawn(async move {
            service.compute_and_upsert_matches_for_project(project).await
        }));
    }
    for handle in handles {
        let report = handle.await.unwrap();
        assert!(report.errors.is_empty());
        assert!(report.gc_error.is_none());
    }

    let matches = engine.service.list_matches_for_project(project).await.unwrap();
    assert_eq!(matches.len(), 8);
    let run_ids: HashSet<Uuid> = matches.iter().map(|m| m.run_id).collect();
    assert_eq!(run_ids.len(), 1);
}
