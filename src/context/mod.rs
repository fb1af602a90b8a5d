pub mod base_data;
pub mod document;
pub mod generators;
pub mod insights;

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use strum::IntoEnumIterator;

use crate::db::{now_rfc3339, tenant_exists};
use crate::error::AppError;
use crate::models::{AgentType, Timeframe};
use document::{ConnectedPlatform, ContextDocument, SCHEMA_VERSION};
use insights::{InsightKind, InsightOutcome};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    pub timeframe: Timeframe,
    pub include_comparisons: bool,
    pub include_predictions: bool,
    pub include_recommendations: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::default(),
            include_comparisons: false,
            include_predictions: false,
            include_recommendations: true,
        }
    }
}

/// Request-scoped pipeline over the shared pool: base data, insights, the
/// requested agent template, quality score and platform lookup, then one
/// upsert of the finished document.
pub struct ContextEngine<'a> {
    db: &'a SqlitePool,
}

impl<'a> ContextEngine<'a> {
    pub fn new(db: &'a SqlitePool) -> Self {
        Self { db }
    }

    pub async fn generate(
        &self,
        tenant_id: &str,
        agent_type: AgentType,
        options: &ContextOptions,
    ) -> Result<ContextDocument, AppError> {
        if !tenant_exists(self.db, tenant_id).await? {
            return Err(AppError::NotFound("tenant"));
        }

        let base_data = base_data::load(self.db, tenant_id, options.timeframe).await?;
        let insights = collect_insights(self.db, tenant_id, options.timeframe).await;
        let agent_context = generators::generate(
            agent_type,
            &base_data,
            &insights,
            options.include_recommendations,
        );
        let data_quality_score = self.data_quality(tenant_id).await?;
        let connected_platforms = self.connected_platforms(tenant_id).await?;

        let doc = ContextDocument {
            schema_version: SCHEMA_VERSION,
            tenant_id: tenant_id.to_string(),
            agent_type,
            timeframe: options.timeframe,
            generated_at: now_rfc3339(),
            base_data,
            insights,
            agent_context,
            data_quality_score,
            connected_platforms,
            comparisons: options.include_comparisons.then(|| json!({})),
            predictions: options.include_predictions.then(|| json!({})),
        };

        document::upsert(self.db, &doc).await?;
        Ok(doc)
    }

    async fn data_quality(&self, tenant_id: &str) -> Result<f64, AppError> {
        let (customers, with_email) = sqlx::query_as::<_, (i64, i64)>(
            r#"SELECT COUNT(*),
                      COALESCE(SUM(CASE WHEN email IS NOT NULL AND email != '' THEN 1 ELSE 0 END), 0)
               FROM customers WHERE tenant_id = ?"#,
        )
        .bind(tenant_id)
        .fetch_one(self.db)
        .await?;

        let (appointments, priced) = sqlx::query_as::<_, (i64, i64)>(
            r#"SELECT COUNT(*), COALESCE(SUM(CASE WHEN price > 0 THEN 1 ELSE 0 END), 0)
               FROM appointments WHERE tenant_id = ?"#,
        )
        .bind(tenant_id)
        .fetch_one(self.db)
        .await?;

        let services = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM services WHERE tenant_id = ? AND active = 1",
        )
        .bind(tenant_id)
        .fetch_one(self.db)
        .await?;

        let email_ratio = ratio(with_email, customers);
        let priced_ratio = ratio(priced, appointments);
        Ok(quality_score(email_ratio, priced_ratio, services))
    }

    async fn connected_platforms(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ConnectedPlatform>, AppError> {
        let rows = sqlx::query_as::<_, (String, i64, String)>(
            r#"SELECT platform, COUNT(*), MAX(connected_at)
               FROM integrations
               WHERE tenant_id = ? AND status = 'connected'
               GROUP BY platform
               ORDER BY platform"#,
        )
        .bind(tenant_id)
        .fetch_all(self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(platform, accounts, last_connected_at)| ConnectedPlatform {
                platform,
                accounts,
                last_connected_at,
            })
            .collect())
    }
}

/// Every calculator runs even when one fails: a failure becomes an inline
/// `{error}` value under its key and the rest of the pipeline proceeds.
pub(crate) async fn collect_insights(
    pool: &SqlitePool,
    tenant_id: &str,
    timeframe: Timeframe,
) -> BTreeMap<InsightKind, InsightOutcome> {
    let mut out = BTreeMap::new();
    for kind in InsightKind::iter() {
        let outcome = match insights::compute(kind, pool, tenant_id, timeframe).await {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("Insight {kind} failed for tenant {tenant_id}: {err}");
                InsightOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        out.insert(kind, outcome);
    }
    out
}

fn ratio(part: i64, whole: i64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}

/// Weighted completeness sum, clamped to [0, 100] and non-decreasing in
/// every input: email coverage 30, priced appointments 40, catalog depth 30
/// (saturating at ten active services).
pub fn quality_score(email_ratio: f64, priced_ratio: f64, active_services: i64) -> f64 {
    let coverage = (active_services as f64 / 10.0).min(1.0);
    (email_ratio * 30.0 + priced_ratio * 40.0 + coverage * 30.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::db::testutil;
    use crate::models::AppointmentStatus;

    #[test]
    fn quality_score_is_monotone_and_clamped() {
        assert_eq!(quality_score(0.0, 0.0, 0), 0.0);
        assert_eq!(quality_score(1.0, 1.0, 10), 100.0);
        assert_eq!(quality_score(1.0, 1.0, 500), 100.0);

        let mut last = -1.0;
        for step in 0..=10 {
            let score = quality_score(step as f64 / 10.0, 0.5, 3);
            assert!(score >= last);
            last = score;
        }
        assert!(quality_score(0.5, 0.5, 4) <= quality_score(0.5, 0.5, 5));
        assert!(quality_score(0.5, 0.4, 4) <= quality_score(0.5, 0.5, 4));
    }

    #[actix_web::test]
    async fn one_failing_calculator_does_not_poison_the_rest() {
        let pool = testutil::pool().await;
        let tenant = testutil::tenant(&pool).await;
        let customer = testutil::customer(&pool, &tenant, "Ana", None).await;
        let service = testutil::service(&pool, &tenant, "Cut", 40.0).await;
        testutil::appointment(
            &pool,
            &tenant,
            &customer,
            &service,
            None,
            Utc::now() - Duration::days(2),
            AppointmentStatus::Completed,
            40.0,
        )
        .await;

        // Capacity utilization is the only calculator that reads staff.
        sqlx::query("DROP TABLE staff").execute(&pool).await.unwrap();

        let insights = collect_insights(&pool, &tenant, Timeframe::ThirtyDays).await;
        assert_eq!(insights.len(), 5);

        match insights.get(&InsightKind::CapacityUtilization) {
            Some(InsightOutcome::Failed { error }) => assert!(!error.is_empty()),
            other => panic!("expected a failed capacity insight, got {other:?}"),
        }
        assert!(matches!(
            insights.get(&InsightKind::RevenueTrend),
            Some(InsightOutcome::RevenueTrend(_))
        ));
        assert!(matches!(
            insights.get(&InsightKind::PeakHours),
            Some(InsightOutcome::PeakHours(_))
        ));
    }

    #[actix_web::test]
    async fn generate_persists_and_overwrites() {
        let pool = testutil::pool().await;
        let tenant = testutil::tenant(&pool).await;
        let customer = testutil::customer(&pool, &tenant, "Ana", Some("ana@example.com")).await;
        let service = testutil::service(&pool, &tenant, "Cut", 40.0).await;
        testutil::staff(&pool, &tenant, "Marco").await;
        testutil::appointment(
            &pool,
            &tenant,
            &customer,
            &service,
            None,
            Utc::now() - Duration::days(1),
            AppointmentStatus::Completed,
            40.0,
        )
        .await;

        let engine = ContextEngine::new(&pool);
        let options = ContextOptions::default();
        let doc = engine
            .generate(&tenant, AgentType::Financial, &options)
            .await
            .unwrap();
        assert_eq!(doc.schema_version, document::SCHEMA_VERSION);
        assert_eq!(doc.insights.len(), 5);
        assert!(doc.comparisons.is_none());
        assert!(doc.data_quality_score > 0.0);

        let stored = document::load(&pool, &tenant, AgentType::Financial)
            .await
            .unwrap()
            .expect("document stored");
        assert_eq!(stored.generated_at, doc.generated_at);

        // Regeneration overwrites in place; one row per (tenant, agent type).
        let with_stubs = ContextOptions {
            include_comparisons: true,
            include_predictions: true,
            ..ContextOptions::default()
        };
        let second = engine
            .generate(&tenant, AgentType::Financial, &with_stubs)
            .await
            .unwrap();
        assert_eq!(second.comparisons, Some(serde_json::json!({})));
        assert_eq!(second.predictions, Some(serde_json::json!({})));

        let rows = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM business_contexts WHERE tenant_id = ?",
        )
        .bind(&tenant)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(rows, 1);

        let reloaded = document::load(&pool, &tenant, AgentType::Financial)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.comparisons, Some(serde_json::json!({})));
    }

    #[actix_web::test]
    async fn unknown_tenant_is_a_not_found() {
        let pool = testutil::pool().await;
        let engine = ContextEngine::new(&pool);
        let err = engine
            .generate("ghost", AgentType::Growth, &ContextOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("tenant")));
    }
}
