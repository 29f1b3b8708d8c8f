//! Nearest-neighbor index reached over an HTTP RPC endpoint
//! (e.g. a Postgres function exposed through a REST gateway).

use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse, env_required};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{MatchingError, MatchingResult};
use crate::models::{Attributes, NeighborHit};
use crate::repository::NearestNeighborIndex;

const DEFAULT_FUNCTION: &str = "match_product_images";

#[derive(Debug, Clone)]
pub struct HttpNeighborIndexConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub function: String,
    pub timeout: Duration,
}

impl HttpNeighborIndexConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            function: DEFAULT_FUNCTION.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = function.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/rpc/{}", self.base_url.trim_end_matches('/'), self.function)
    }
}

impl FromEnv for HttpNeighborIndexConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_key = env_or_default("NEIGHBOR_RPC_KEY", "");
        let timeout_ms: u64 = env_parse("NEIGHBOR_RPC_TIMEOUT_MS", 10_000)?;

        Ok(Self {
            base_url: env_required("NEIGHBOR_RPC_URL")?,
            api_key: (!api_key.is_empty()).then_some(api_key),
            function: env_or_default("NEIGHBOR_RPC_FUNCTION", DEFAULT_FUNCTION),
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

#[derive(Debug, Serialize)]
struct NeighborRequest<'a> {
    query_embedding: &'a [f32],
    match_count: usize,
}

pub struct HttpNeighborIndex {
    client: Client,
    config: HttpNeighborIndexConfig,
}

impl HttpNeighborIndex {
    pub fn new(config: HttpNeighborIndexConfig) -> MatchingResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> MatchingResult<Self> {
        Self::new(HttpNeighborIndexConfig::from_env()?)
    }
}

#[async_trait]
impl NearestNeighborIndex for HttpNeighborIndex {
    async fn query_nearest(&self, embedding: &[f32], k: usize) -> MatchingResult<Vec<NeighborHit>> {
        let mut request = self
            .client
            .post(self.config.endpoint())
            .header("Content-Type", "application/json")
            .json(&NeighborRequest {
                query_embedding: embedding,
                match_count: k,
            });
        if let Some(key) = &self.config.api_key {
            request = request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(MatchingError::Index(format!(
                "neighbor RPC error ({}): {}",
                status, error_text
            )));
        }

        let body: Value = response.json().await?;
        let mut hits = parse_neighbor_rows(body)?;
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }
}

/// One row of the RPC response
#[derive(Debug, Deserialize)]
struct NeighborRow {
    image_id: Uuid,
    product_id: Uuid,
    distance: f64,
    #[serde(default)]
    attrs: Option<BTreeMap<String, Vec<String>>>,
}

/// Validate the RPC response: a JSON array of
/// `{image_id, product_id, distance, attrs?}` rows.
///
/// Any malformed row rejects the whole response.
pub fn parse_neighbor_rows(body: Value) -> MatchingResult<Vec<NeighborHit>> {
    let rows: Vec<NeighborRow> = serde_json::from_value(body)
        .map_err(|e| MatchingError::MalformedNeighbor(e.to_string()))?;

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            if !row.distance.is_finite() || row.distance < 0.0 {
                return Err(MatchingError::MalformedNeighbor(format!(
                    "row {}: invalid distance {}",
                    i, row.distance
                )));
            }

            let mut attrs = Attributes::new();
            for (family, tags) in row.attrs.unwrap_or_default() {
                attrs.insert_family(&family, tags);
            }

            Ok(NeighborHit {
                image_id: row.image_id,
                product_id: row.product_id,
                attrs,
                distance: row.distance,
            })
        })
        .collect()
}
