use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::MatchingError;
use crate::models::{MatchRecord, MatchTier};

/// Sea-ORM Entity for the project_product_matches table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "project_product_matches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub project_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub product_id: Uuid,
    pub run_id: Uuid,
    pub score: i32,
    #[sea_orm(column_type = "Text")]
    pub tier: String,
    pub reasons: Json,            // JSONB array of {kind, value}
    pub evidence_image_ids: Json, // JSONB array of uuids
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for MatchRecord {
    type Error = MatchingError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let score = u32::try_from(model.score)
            .map_err(|_| MatchingError::Store(format!("negative match score {}", model.score)))?;
        let tier = MatchTier::from_str(&model.tier)
            .map_err(|_| MatchingError::Store(format!("unknown match tier '{}'", model.tier)))?;

        Ok(Self {
            project_id: model.project_id,
            product_id: model.product_id,
            run_id: model.run_id,
            score,
            tier,
            reasons: serde_json::from_value(model.reasons)?,
            evidence_image_ids: serde_json::from_value(model.evidence_image_ids)?,
            updated_at: model.updated_at.into(),
        })
    }
}

impl TryFrom<&MatchRecord> for ActiveModel {
    type Error = MatchingError;

    fn try_from(record: &MatchRecord) -> Result<Self, Self::Error> {
        let score = i32::try_from(record.score)
            .map_err(|_| MatchingError::Internal(format!("score {} out of range", record.score)))?;

        Ok(ActiveModel {
            project_id: Set(record.project_id),
            product_id: Set(record.product_id),
            run_id: Set(record.run_id),
            score: Set(score),
            tier: Set(record.tier.to_string()),
            reasons: Set(serde_json::to_value(&record.reasons)?),
            evidence_image_ids: Set(serde_json::to_value(&record.evidence_image_ids)?),
            updated_at: Set(record.updated_at.into()),
        })
    }
}
