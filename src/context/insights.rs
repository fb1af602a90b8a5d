use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use strum_macros::{Display, EnumIter, EnumString};

use super::base_data::window_start;
use crate::models::Timeframe;

/// Closed set of insight calculators. The orchestrator iterates the whole
/// enum, so adding a variant forces a dispatch arm at compile time.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InsightKind {
    RevenueTrend,
    ClientRetention,
    PeakHours,
    PricingOpportunity,
    CapacityUtilization,
}

/// A calculator either produced its payload or failed; failures are values
/// in the document, never request errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InsightOutcome {
    RevenueTrend(RevenueTrend),
    ClientRetention(ClientRetention),
    PeakHours(PeakHours),
    PricingOpportunity(PricingOpportunity),
    CapacityUtilization(CapacityUtilization),
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueTrend {
    pub growth_rate: f64,
    pub trend: TrendLabel,
    pub first_week_revenue: f64,
    pub last_week_revenue: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrendLabel {
    Growing,
    Stable,
    Declining,
    InsufficientData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRetention {
    pub total_clients: i64,
    pub returning_clients: i64,
    pub retention_rate: f64,
    pub at_risk: Vec<AtRiskClient>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtRiskClient {
    pub customer_id: String,
    pub name: String,
    pub days_since_last_visit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakHours {
    pub busy: Vec<HourLoad>,
    pub underutilized: Vec<HourLoad>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourLoad {
    pub hour: i64,
    pub appointments: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOpportunity {
    pub average_ticket: f64,
    pub underpriced: Vec<UnderpricedService>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnderpricedService {
    pub service_id: String,
    pub name: String,
    pub catalog_price: f64,
    pub average_ticket: f64,
    pub suggested_min: f64,
    pub suggested_max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityUtilization {
    pub booked_minutes: f64,
    pub capacity_minutes: f64,
    pub utilization_pct: f64,
    pub level: CapacityLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CapacityLevel {
    Overbooked,
    Healthy,
    Underutilized,
}

const AT_RISK_DAYS: i64 = 45;
const UNDERPRICED_TICKET: f64 = 50.0;
const WORKDAY_MINUTES: f64 = 480.0;

/// Run one calculator. Each issues its own queries against the store;
/// results are never shared between calculators.
pub async fn compute(
    kind: InsightKind,
    pool: &SqlitePool,
    tenant_id: &str,
    timeframe: Timeframe,
) -> Result<InsightOutcome, sqlx::Error> {
    match kind {
        InsightKind::RevenueTrend => Ok(InsightOutcome::RevenueTrend(
            revenue_trend(pool, tenant_id, timeframe).await?,
        )),
        InsightKind::ClientRetention => Ok(InsightOutcome::ClientRetention(
            client_retention(pool, tenant_id, timeframe).await?,
        )),
        InsightKind::PeakHours => Ok(InsightOutcome::PeakHours(
            peak_hours(pool, tenant_id, timeframe).await?,
        )),
        InsightKind::PricingOpportunity => Ok(InsightOutcome::PricingOpportunity(
            pricing_opportunity(pool, tenant_id, timeframe).await?,
        )),
        InsightKind::CapacityUtilization => Ok(InsightOutcome::CapacityUtilization(
            capacity_utilization(pool, tenant_id, timeframe).await?,
        )),
    }
}

pub fn trend_from(first: f64, last: f64, distinct_days: i64) -> RevenueTrend {
    if distinct_days < 2 {
        return RevenueTrend {
            growth_rate: 0.0,
            trend: TrendLabel::InsufficientData,
            first_week_revenue: first,
            last_week_revenue: last,
        };
    }
    let growth_rate = if first > 0.0 {
        (last - first) / first * 100.0
    } else {
        0.0
    };
    let trend = if growth_rate > 5.0 {
        TrendLabel::Growing
    } else if growth_rate < -5.0 {
        TrendLabel::Declining
    } else {
        TrendLabel::Stable
    };
    RevenueTrend {
        growth_rate,
        trend,
        first_week_revenue: first,
        last_week_revenue: last,
    }
}

async fn window_revenue(
    pool: &SqlitePool,
    tenant_id: &str,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<f64, sqlx::Error> {
    sqlx::query_scalar::<_, f64>(
        r#"SELECT COALESCE(SUM(price), 0.0) FROM appointments
           WHERE tenant_id = ? AND starts_at >= ? AND starts_at < ?"#,
    )
    .bind(tenant_id)
    .bind(from.to_rfc3339())
    .bind(until.to_rfc3339())
    .fetch_one(pool)
    .await
}

async fn revenue_trend(
    pool: &SqlitePool,
    tenant_id: &str,
    timeframe: Timeframe,
) -> Result<RevenueTrend, sqlx::Error> {
    let since = window_start(timeframe);
    let now = Utc::now();

    let distinct_days = sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(DISTINCT date(starts_at)) FROM appointments
           WHERE tenant_id = ? AND starts_at >= ?"#,
    )
    .bind(tenant_id)
    .bind(since.to_rfc3339())
    .fetch_one(pool)
    .await?;

    let first = window_revenue(pool, tenant_id, since, since + Duration::days(7)).await?;
    let last = window_revenue(pool, tenant_id, now - Duration::days(7), now).await?;

    Ok(trend_from(first, last, distinct_days))
}

async fn client_retention(
    pool: &SqlitePool,
    tenant_id: &str,
    timeframe: Timeframe,
) -> Result<ClientRetention, sqlx::Error> {
    let since = window_start(timeframe).to_rfc3339();

    let (total_clients, returning_clients) = sqlx::query_as::<_, (i64, i64)>(
        r#"SELECT COUNT(*), COALESCE(SUM(CASE WHEN visits > 1 THEN 1 ELSE 0 END), 0)
           FROM (SELECT customer_id, COUNT(*) AS visits
                 FROM appointments
                 WHERE tenant_id = ? AND starts_at >= ?
                 GROUP BY customer_id)"#,
    )
    .bind(tenant_id)
    .bind(&since)
    .fetch_one(pool)
    .await?;

    let retention_rate = if total_clients > 0 {
        returning_clients as f64 / total_clients as f64 * 100.0
    } else {
        0.0
    };

    // At-risk lapses are measured against the whole history, not the window.
    let cutoff = Utc::now() - Duration::days(AT_RISK_DAYS);
    let lapsed = sqlx::query_as::<_, (String, String, String)>(
        r#"SELECT c.id, c.name, MAX(a.starts_at)
           FROM appointments a
           JOIN customers c ON a.customer_id = c.id
           WHERE a.tenant_id = ?
           GROUP BY c.id, c.name
           HAVING MAX(a.starts_at) < ?
           ORDER BY MAX(a.starts_at) ASC
           LIMIT 10"#,
    )
    .bind(tenant_id)
    .bind(cutoff.to_rfc3339())
    .fetch_all(pool)
    .await?;

    let now = Utc::now();
    let at_risk = lapsed
        .into_iter()
        .map(|(customer_id, name, last_visit)| {
            let days_since_last_visit = DateTime::parse_from_rfc3339(&last_visit)
                .map(|when| (now - when.with_timezone(&Utc)).num_days())
                .unwrap_or(AT_RISK_DAYS);
            AtRiskClient {
                customer_id,
                name,
                days_since_last_visit,
            }
        })
        .collect();

    Ok(ClientRetention {
        total_clients,
        returning_clients,
        retention_rate,
        at_risk,
    })
}

async fn peak_hours(
    pool: &SqlitePool,
    tenant_id: &str,
    timeframe: Timeframe,
) -> Result<PeakHours, sqlx::Error> {
    let since = window_start(timeframe).to_rfc3339();

    let loads = sqlx::query_as::<_, (i64, i64)>(
        r#"SELECT CAST(strftime('%H', starts_at) AS INTEGER) AS hour, COUNT(*)
           FROM appointments
           WHERE tenant_id = ? AND starts_at >= ?
           GROUP BY hour
           ORDER BY COUNT(*) DESC, hour ASC"#,
    )
    .bind(tenant_id)
    .bind(&since)
    .fetch_all(pool)
    .await?;

    let loads: Vec<HourLoad> = loads
        .into_iter()
        .map(|(hour, appointments)| HourLoad { hour, appointments })
        .collect();

    let busy = loads.iter().take(3).cloned().collect();
    let underutilized = if loads.len() > 3 {
        loads.iter().rev().take(3).cloned().collect()
    } else {
        Vec::new()
    };

    Ok(PeakHours { busy, underutilized })
}

async fn pricing_opportunity(
    pool: &SqlitePool,
    tenant_id: &str,
    timeframe: Timeframe,
) -> Result<PricingOpportunity, sqlx::Error> {
    let since = window_start(timeframe).to_rfc3339();

    let average_ticket = sqlx::query_scalar::<_, f64>(
        r#"SELECT COALESCE(AVG(price), 0.0) FROM appointments
           WHERE tenant_id = ? AND starts_at >= ?"#,
    )
    .bind(tenant_id)
    .bind(&since)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query_as::<_, (String, String, f64, f64, i64)>(
        r#"SELECT s.id, s.name, s.price, COALESCE(AVG(a.price), 0.0), COUNT(a.id)
           FROM services s
           LEFT JOIN appointments a
             ON a.service_id = s.id AND a.starts_at >= ?
           WHERE s.tenant_id = ? AND s.active = 1
           GROUP BY s.id, s.name, s.price"#,
    )
    .bind(&since)
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    let underpriced = rows
        .into_iter()
        .filter(|(_, _, _, avg, booked)| *booked > 0 && *avg < UNDERPRICED_TICKET)
        .map(
            |(service_id, name, catalog_price, average_ticket, _)| UnderpricedService {
                service_id,
                name,
                catalog_price,
                average_ticket,
                suggested_min: average_ticket * 1.10,
                suggested_max: average_ticket * 1.15,
            },
        )
        .collect();

    Ok(PricingOpportunity {
        average_ticket,
        underpriced,
    })
}

pub fn capacity_level(utilization_pct: f64) -> CapacityLevel {
    if utilization_pct > 90.0 {
        CapacityLevel::Overbooked
    } else if utilization_pct >= 60.0 {
        CapacityLevel::Healthy
    } else {
        CapacityLevel::Underutilized
    }
}

async fn capacity_utilization(
    pool: &SqlitePool,
    tenant_id: &str,
    timeframe: Timeframe,
) -> Result<CapacityUtilization, sqlx::Error> {
    let since = window_start(timeframe).to_rfc3339();

    let booked_minutes = sqlx::query_scalar::<_, f64>(
        r#"SELECT COALESCE(SUM((julianday(ends_at) - julianday(starts_at)) * 1440.0), 0.0)
           FROM appointments
           WHERE tenant_id = ? AND starts_at >= ? AND status != 'cancelled'"#,
    )
    .bind(tenant_id)
    .bind(&since)
    .fetch_one(pool)
    .await?;

    let active_staff =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM staff WHERE tenant_id = ? AND active = 1")
            .bind(tenant_id)
            .fetch_one(pool)
            .await?;

    let capacity_minutes = active_staff as f64 * timeframe.days() as f64 * WORKDAY_MINUTES;
    let utilization_pct = if capacity_minutes > 0.0 {
        booked_minutes / capacity_minutes * 100.0
    } else {
        0.0
    };

    Ok(CapacityUtilization {
        booked_minutes,
        capacity_minutes,
        utilization_pct,
        level: capacity_level(utilization_pct),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Timelike, Utc};

    use super::*;
    use crate::db::testutil;
    use crate::models::AppointmentStatus;

    #[test]
    fn growth_rate_formula() {
        let trend = trend_from(100.0, 150.0, 14);
        assert!((trend.growth_rate - 50.0).abs() < 1e-9);
        assert_eq!(trend.trend, TrendLabel::Growing);

        let trend = trend_from(100.0, 90.0, 14);
        assert!((trend.growth_rate + 10.0).abs() < 1e-9);
        assert_eq!(trend.trend, TrendLabel::Declining);

        let trend = trend_from(100.0, 103.0, 14);
        assert_eq!(trend.trend, TrendLabel::Stable);
    }

    #[test]
    fn sparse_data_yields_sentinel() {
        let trend = trend_from(0.0, 500.0, 1);
        assert_eq!(trend.growth_rate, 0.0);
        assert_eq!(trend.trend, TrendLabel::InsufficientData);

        // Zero first-week revenue with real history stays defined.
        let trend = trend_from(0.0, 500.0, 5);
        assert_eq!(trend.growth_rate, 0.0);
        assert_eq!(trend.trend, TrendLabel::Stable);
    }

    #[test]
    fn capacity_levels() {
        assert_eq!(capacity_level(95.0), CapacityLevel::Overbooked);
        assert_eq!(capacity_level(75.0), CapacityLevel::Healthy);
        assert_eq!(capacity_level(10.0), CapacityLevel::Underutilized);
    }

    #[actix_web::test]
    async fn peak_hours_rank_by_load() {
        let pool = testutil::pool().await;
        let tenant = testutil::tenant(&pool).await;
        let customer = testutil::customer(&pool, &tenant, "Ana", None).await;
        let service = testutil::service(&pool, &tenant, "Cut", 40.0).await;

        let day = Utc::now() - Duration::days(2);
        for (hour, bookings) in [(10u32, 4), (14u32, 2), (9u32, 1), (16u32, 1)] {
            let at = day.with_hour(hour).unwrap().with_minute(0).unwrap();
            for _ in 0..bookings {
                testutil::appointment(
                    &pool,
                    &tenant,
                    &customer,
                    &service,
                    None,
                    at,
                    AppointmentStatus::Completed,
                    40.0,
                )
                .await;
            }
        }

        let outcome = compute(InsightKind::PeakHours, &pool, &tenant, Timeframe::ThirtyDays)
            .await
            .unwrap();
        let InsightOutcome::PeakHours(peaks) = outcome else {
            panic!("expected peak hours payload");
        };
        assert_eq!(
            peaks.busy[0],
            HourLoad {
                hour: 10,
                appointments: 4
            }
        );
        assert_eq!(peaks.busy.len(), 3);
        assert_eq!(peaks.underutilized.len(), 3);
        assert_eq!(peaks.underutilized[0].hour, 16);
    }

    #[actix_web::test]
    async fn retention_counts_and_lapsed_clients() {
        let pool = testutil::pool().await;
        let tenant = testutil::tenant(&pool).await;
        let loyal = testutil::customer(&pool, &tenant, "Loyal", None).await;
        let fresh = testutil::customer(&pool, &tenant, "Fresh", None).await;
        let lapsed = testutil::customer(&pool, &tenant, "Lapsed", None).await;
        let service = testutil::service(&pool, &tenant, "Cut", 40.0).await;

        let recent = Utc::now() - Duration::days(5);
        testutil::appointment(
            &pool, &tenant, &loyal, &service, None, recent, AppointmentStatus::Completed, 40.0,
        )
        .await;
        testutil::appointment(
            &pool,
            &tenant,
            &loyal,
            &service,
            None,
            recent + Duration::days(2),
            AppointmentStatus::Completed,
            40.0,
        )
        .await;
        testutil::appointment(
            &pool, &tenant, &fresh, &service, None, recent, AppointmentStatus::Completed, 40.0,
        )
        .await;
        testutil::appointment(
            &pool,
            &tenant,
            &lapsed,
            &service,
            None,
            Utc::now() - Duration::days(60),
            AppointmentStatus::Completed,
            40.0,
        )
        .await;

        let outcome = compute(
            InsightKind::ClientRetention,
            &pool,
            &tenant,
            Timeframe::ThirtyDays,
        )
        .await
        .unwrap();
        let InsightOutcome::ClientRetention(retention) = outcome else {
            panic!("expected retention payload");
        };
        assert_eq!(retention.total_clients, 2);
        assert_eq!(retention.returning_clients, 1);
        assert!((retention.retention_rate - 50.0).abs() < 1e-9);
        assert_eq!(retention.at_risk.len(), 1);
        assert_eq!(retention.at_risk[0].name, "Lapsed");
        assert!(retention.at_risk[0].days_since_last_visit >= 59);
    }

    #[actix_web::test]
    async fn underpriced_services_get_a_raise_band() {
        let pool = testutil::pool().await;
        let tenant = testutil::tenant(&pool).await;
        let customer = testutil::customer(&pool, &tenant, "Ana", None).await;
        let cheap = testutil::service(&pool, &tenant, "Quick Trim", 20.0).await;
        let premium = testutil::service(&pool, &tenant, "Full Grooming", 80.0).await;

        let at = Utc::now() - Duration::days(3);
        testutil::appointment(
            &pool, &tenant, &customer, &cheap, None, at, AppointmentStatus::Completed, 20.0,
        )
        .await;
        testutil::appointment(
            &pool, &tenant, &customer, &premium, None, at, AppointmentStatus::Completed, 80.0,
        )
        .await;

        let outcome = compute(
            InsightKind::PricingOpportunity,
            &pool,
            &tenant,
            Timeframe::ThirtyDays,
        )
        .await
        .unwrap();
        let InsightOutcome::PricingOpportunity(pricing) = outcome else {
            panic!("expected pricing payload");
        };
        assert!((pricing.average_ticket - 50.0).abs() < 1e-9);
        assert_eq!(pricing.underpriced.len(), 1);
        let flagged = &pricing.underpriced[0];
        assert_eq!(flagged.name, "Quick Trim");
        assert!((flagged.suggested_min - 22.0).abs() < 1e-9);
        assert!((flagged.suggested_max - 23.0).abs() < 1e-9);
    }
}
