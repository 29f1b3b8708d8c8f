use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::{
    entity,
    error::MatchingResult,
    models::MatchRecord,
    repository::MatchStore,
};

/// Postgres-backed match store
pub struct PgMatchStore {
    db: DatabaseConnection,
}

impl PgMatchStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MatchStore for PgMatchStore {
    async fn upsert(&self, record: MatchRecord) -> MatchingResult<()> {
        let active_model = entity::ActiveModel::try_from(&record)?;

        // Single statement, so a row is never half-written
        entity::Entity::insert(active_model)
            .on_conflict(
                OnConflict::columns([entity::Column::ProjectId, entity::Column::ProductId])
                    .update_columns([
                        entity::Column::RunId,
                        entity::Column::Score,
                        entity::Column::Tier,
                        entity::Column::Reasons,
                        entity::Column::EvidenceImageIds,
                        entity::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        tracing::debug!(
            project_id = %record.project_id,
            product_id = %record.product_id,
            score = record.score,
            tier = %record.tier,
            "Upserted match"
        );
        Ok(())
    }

    async fn delete_stale(
        &self,
        project_id: Uuid,
        keep_run_id: Uuid,
        retain_product_ids: &[Uuid],
    ) -> MatchingResult<u64> {
        let mut delete = entity::Entity::delete_many()
            .filter(entity::Column::ProjectId.eq(project_id))
            .filter(entity::Column::RunId.ne(keep_run_id));
        if !retain_product_ids.is_empty() {
            delete = delete.filter(
                entity::Column::ProductId.is_not_in(retain_product_ids.iter().copied()),
            );
        }
        let result = delete.exec(&self.db).await?;

        Ok(result.rows_affected)
    }

    async fn list_for_project(&self, project_id: Uuid) -> MatchingResult<Vec<MatchRecord>> {
        let models = entity::Entity::find()
            .filter(entity::Column::ProjectId.eq(project_id))
            .order_by_desc(entity::Column::Score)
            .order_by_asc(entity::Column::ProductId)
            .all(&self.db)
            .await?;

        models.into_iter().map(MatchRecord::try_from).collect()
    }
}
