use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProjectProductMatches::Table)
                    .if_not_exists()
                    .col(uuid(ProjectProductMatches::ProjectId))
                    .col(uuid(ProjectProductMatches::ProductId))
                    .col(uuid(ProjectProductMatches::RunId))
                    .col(integer(ProjectProductMatches::Score))
                    .col(text(ProjectProductMatches::Tier))
                    .col(json_binary(ProjectProductMatches::Reasons).default("[]"))
                    .col(json_binary(ProjectProductMatches::EvidenceImageIds).default("[]"))
                    .col(
                        timestamp_with_time_zone(ProjectProductMatches::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(ProjectProductMatches::ProjectId)
                            .col(ProjectProductMatches::ProductId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"
                ALTER TABLE project_product_matches
                    ADD CONSTRAINT project_product_matches_score_range
                        CHECK (score BETWEEN 0 AND 100),
                    ADD CONSTRAINT project_product_matches_tier_known
                        CHECK (tier IN ('verified', 'possible'))
                "#,
            )
            .await?;

        // Stale cleanup deletes by (project_id, run_id <> current)
        manager
            .create_index(
                Index::create()
                    .name("idx_project_product_matches_run")
                    .table(ProjectProductMatches::Table)
                    .col(ProjectProductMatches::ProjectId)
                    .col(ProjectProductMatches::RunId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_project_product_matches_product")
                    .table(ProjectProductMatches::Table)
                    .col(ProjectProductMatches::ProductId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProjectProductMatches::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum ProjectProductMatches {
    Table,
    ProjectId,
    ProductId,
    RunId,
    Score,
    Tier,
    Reasons,
    EvidenceImageIds,
    UpdatedAt,
}
