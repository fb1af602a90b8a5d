use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::base_data::BaseData;
use super::generators::AgentContext;
use super::insights::{InsightKind, InsightOutcome};
use crate::error::AppError;
use crate::models::{AgentType, Timeframe};

/// Bump when the document layout changes; consumers key migrations off it.
pub const SCHEMA_VERSION: i64 = 1;

/// The persisted unit of the context engine: one versioned snapshot per
/// (tenant, agent type), fully regenerated and overwritten on each run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDocument {
    pub schema_version: i64,
    pub tenant_id: String,
    pub agent_type: AgentType,
    pub timeframe: Timeframe,
    pub generated_at: String,
    pub base_data: BaseData,
    pub insights: BTreeMap<InsightKind, InsightOutcome>,
    pub agent_context: AgentContext,
    pub data_quality_score: f64,
    pub connected_platforms: Vec<ConnectedPlatform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparisons: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPlatform {
    pub platform: String,
    pub accounts: i64,
    pub last_connected_at: String,
}

/// Insert-or-replace keyed by (tenant, agent type). Concurrent writers
/// race and the last one wins; no history is kept.
pub async fn upsert(pool: &SqlitePool, doc: &ContextDocument) -> Result<(), AppError> {
    let body = serde_json::to_string(doc)?;
    sqlx::query(
        r#"INSERT INTO business_contexts (tenant_id, agent_type, schema_version, document, generated_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(tenant_id, agent_type) DO UPDATE SET
             schema_version = excluded.schema_version,
             document = excluded.document,
             generated_at = excluded.generated_at"#,
    )
    .bind(&doc.tenant_id)
    .bind(doc.agent_type)
    .bind(doc.schema_version)
    .bind(body)
    .bind(&doc.generated_at)
    .execute(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

pub async fn load(
    pool: &SqlitePool,
    tenant_id: &str,
    agent_type: AgentType,
) -> Result<Option<ContextDocument>, AppError> {
    let row = sqlx::query_as::<_, (String,)>(
        "SELECT document FROM business_contexts WHERE tenant_id = ? AND agent_type = ? LIMIT 1",
    )
    .bind(tenant_id)
    .bind(agent_type)
    .fetch_optional(pool)
    .await
    .map_err(AppError::Database)?;

    match row {
        Some((body,)) => Ok(Some(serde_json::from_str(&body)?)),
        None => Ok(None),
    }
}
