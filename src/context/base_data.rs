use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use strum_macros::{Display, EnumString};

use crate::models::Timeframe;

/// Grouped aggregates for one tenant and window. Everything downstream of
/// the loader (insights, generators, quality score) reads from this shape
/// or re-queries the same tables on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseData {
    pub timeframe: Timeframe,
    pub window_start: String,
    pub summary: Summary,
    pub by_service: Vec<ServiceBreakdown>,
    pub by_client: Vec<ClientBreakdown>,
    pub by_staff: Vec<StaffBreakdown>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total_appointments: i64,
    pub unique_clients: i64,
    pub total_revenue: f64,
    pub avg_ticket: f64,
    pub cancellation_rate: f64,
    pub no_show_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceBreakdown {
    pub service_id: String,
    pub name: String,
    pub appointments: i64,
    pub revenue: f64,
    pub share_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientBreakdown {
    pub customer_id: String,
    pub name: String,
    pub visits: i64,
    pub total_spent: f64,
    pub share_pct: f64,
    pub last_visit: String,
    pub category: CustomerCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffBreakdown {
    pub staff_id: String,
    pub name: String,
    pub appointments: i64,
    pub revenue: f64,
    pub share_pct: f64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CustomerCategory {
    OneTime,
    Occasional,
    Regular,
    Vip,
}

/// Pure function of visit count and lifetime spend within the window.
/// Spend only promotes once a client has a real visit history.
pub fn categorize(visits: i64, total_spent: f64) -> CustomerCategory {
    if visits <= 1 {
        CustomerCategory::OneTime
    } else if visits >= 8 || (visits >= 4 && total_spent >= 500.0) {
        CustomerCategory::Vip
    } else if visits >= 4 {
        CustomerCategory::Regular
    } else {
        CustomerCategory::Occasional
    }
}

pub fn window_start(timeframe: Timeframe) -> DateTime<Utc> {
    Utc::now() - Duration::days(timeframe.days())
}

fn share(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

fn rate(part: i64, whole: i64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

/// One pass of grouped aggregate queries. Revenue sums are status-blind:
/// a cancelled booking keeps its price in total_revenue and shows up in
/// cancellation_rate instead. Query errors propagate to the caller.
pub async fn load(
    pool: &SqlitePool,
    tenant_id: &str,
    timeframe: Timeframe,
) -> Result<BaseData, sqlx::Error> {
    let since = window_start(timeframe).to_rfc3339();

    let (total, unique_clients, total_revenue, cancelled, no_shows) =
        sqlx::query_as::<_, (i64, i64, f64, i64, i64)>(
            r#"SELECT COUNT(*),
                      COUNT(DISTINCT customer_id),
                      COALESCE(SUM(price), 0.0),
                      COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0),
                      COALESCE(SUM(CASE WHEN status = 'no_show' THEN 1 ELSE 0 END), 0)
               FROM appointments
               WHERE tenant_id = ? AND starts_at >= ?"#,
        )
        .bind(tenant_id)
        .bind(&since)
        .fetch_one(pool)
        .await?;

    let summary = Summary {
        total_appointments: total,
        unique_clients,
        total_revenue,
        avg_ticket: if total > 0 {
            total_revenue / total as f64
        } else {
            0.0
        },
        cancellation_rate: rate(cancelled, total),
        no_show_rate: rate(no_shows, total),
    };

    let service_rows = sqlx::query_as::<_, (String, String, i64, f64)>(
        r#"SELECT s.id, s.name, COUNT(a.id), COALESCE(SUM(a.price), 0.0)
           FROM appointments a
           JOIN services s ON a.service_id = s.id
           WHERE a.tenant_id = ? AND a.starts_at >= ?
           GROUP BY s.id, s.name
           ORDER BY SUM(a.price) DESC"#,
    )
    .bind(tenant_id)
    .bind(&since)
    .fetch_all(pool)
    .await?;

    let by_service = service_rows
        .into_iter()
        .map(|(service_id, name, appointments, revenue)| ServiceBreakdown {
            service_id,
            name,
            appointments,
            revenue,
            share_pct: share(revenue, total_revenue),
        })
        .collect();

    let client_rows = sqlx::query_as::<_, (String, String, i64, f64, String)>(
        r#"SELECT c.id, c.name, COUNT(a.id), COALESCE(SUM(a.price), 0.0), MAX(a.starts_at)
           FROM appointments a
           JOIN customers c ON a.customer_id = c.id
           WHERE a.tenant_id = ? AND a.starts_at >= ?
           GROUP BY c.id, c.name
           ORDER BY SUM(a.price) DESC"#,
    )
    .bind(tenant_id)
    .bind(&since)
    .fetch_all(pool)
    .await?;

    let by_client = client_rows
        .into_iter()
        .map(
            |(customer_id, name, visits, total_spent, last_visit)| ClientBreakdown {
                customer_id,
                name,
                visits,
                total_spent,
                share_pct: share(total_spent, total_revenue),
                last_visit,
                category: categorize(visits, total_spent),
            },
        )
        .collect();

    let staff_rows = sqlx::query_as::<_, (String, String, i64, f64)>(
        r#"SELECT u.id, u.name, COUNT(a.id), COALESCE(SUM(a.price), 0.0)
           FROM appointments a
           JOIN staff u ON a.staff_id = u.id
           WHERE a.tenant_id = ? AND a.starts_at >= ?
           GROUP BY u.id, u.name
           ORDER BY SUM(a.price) DESC"#,
    )
    .bind(tenant_id)
    .bind(&since)
    .fetch_all(pool)
    .await?;

    let by_staff = staff_rows
        .into_iter()
        .map(|(staff_id, name, appointments, revenue)| StaffBreakdown {
            staff_id,
            name,
            appointments,
            revenue,
            share_pct: share(revenue, total_revenue),
        })
        .collect();

    Ok(BaseData {
        timeframe,
        window_start: since,
        summary,
        by_service,
        by_client,
        by_staff,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::testutil;
    use crate::models::AppointmentStatus;

    #[test]
    fn categorization_is_pure_and_fixed() {
        assert_eq!(categorize(10, 500.0), CustomerCategory::Vip);
        assert_eq!(categorize(2, 10_000.0), CustomerCategory::Occasional);
        assert_eq!(categorize(1, 10_000.0), CustomerCategory::OneTime);
        assert_eq!(categorize(0, 0.0), CustomerCategory::OneTime);
        assert_eq!(categorize(4, 499.0), CustomerCategory::Regular);
        assert_eq!(categorize(4, 500.0), CustomerCategory::Vip);
    }

    #[actix_web::test]
    async fn empty_window_is_all_zeros() {
        let pool = testutil::pool().await;
        let tenant = testutil::tenant(&pool).await;

        let data = load(&pool, &tenant, Timeframe::ThirtyDays).await.unwrap();
        assert_eq!(data.summary.total_appointments, 0);
        assert_eq!(data.summary.unique_clients, 0);
        assert_eq!(data.summary.total_revenue, 0.0);
        assert_eq!(data.summary.avg_ticket, 0.0);
        assert_eq!(data.summary.cancellation_rate, 0.0);
        assert_eq!(data.summary.no_show_rate, 0.0);
        assert!(data.by_service.is_empty());
        assert!(data.by_client.is_empty());
        assert!(data.by_staff.is_empty());
    }

    #[actix_web::test]
    async fn cancelled_bookings_keep_their_price() {
        let pool = testutil::pool().await;
        let tenant = testutil::tenant(&pool).await;
        let customer = testutil::customer(&pool, &tenant, "Ana", None).await;
        let service = testutil::service(&pool, &tenant, "Cut", 40.0).await;

        let base = Utc::now() - Duration::days(3);
        for (price, status) in [
            (30.0, AppointmentStatus::Completed),
            (40.0, AppointmentStatus::Completed),
            (50.0, AppointmentStatus::Cancelled),
        ] {
            testutil::appointment(
                &pool, &tenant, &customer, &service, None, base, status, price,
            )
            .await;
        }

        let data = load(&pool, &tenant, Timeframe::ThirtyDays).await.unwrap();
        assert_eq!(data.summary.total_appointments, 3);
        assert_eq!(data.summary.total_revenue, 120.0);
        assert!((data.summary.cancellation_rate - 33.333).abs() < 0.01);
        assert_eq!(data.summary.no_show_rate, 0.0);
        assert_eq!(data.summary.unique_clients, 1);
    }

    #[actix_web::test]
    async fn breakdowns_are_tenant_scoped_with_shares() {
        let pool = testutil::pool().await;
        let tenant = testutil::tenant(&pool).await;
        let other = testutil::tenant(&pool).await;

        let customer = testutil::customer(&pool, &tenant, "Ben", None).await;
        let cut = testutil::service(&pool, &tenant, "Cut", 60.0).await;
        let beard = testutil::service(&pool, &tenant, "Beard", 40.0).await;
        let barber = testutil::staff(&pool, &tenant, "Marco").await;

        let noise_customer = testutil::customer(&pool, &other, "Noise", None).await;
        let noise_service = testutil::service(&pool, &other, "Noise", 99.0).await;

        let base = Utc::now() - Duration::days(2);
        testutil::appointment(
            &pool,
            &tenant,
            &customer,
            &cut,
            Some(&barber),
            base,
            AppointmentStatus::Completed,
            60.0,
        )
        .await;
        testutil::appointment(
            &pool,
            &tenant,
            &customer,
            &beard,
            Some(&barber),
            base,
            AppointmentStatus::Completed,
            40.0,
        )
        .await;
        testutil::appointment(
            &pool,
            &other,
            &noise_customer,
            &noise_service,
            None,
            base,
            AppointmentStatus::Completed,
            99.0,
        )
        .await;

        let data = load(&pool, &tenant, Timeframe::SevenDays).await.unwrap();
        assert_eq!(data.summary.total_revenue, 100.0);
        assert_eq!(data.by_service.len(), 2);
        assert_eq!(data.by_service[0].name, "Cut");
        assert!((data.by_service[0].share_pct - 60.0).abs() < 1e-9);
        assert_eq!(data.by_client.len(), 1);
        assert_eq!(data.by_client[0].visits, 2);
        assert_eq!(data.by_client[0].category, CustomerCategory::Occasional);
        assert_eq!(data.by_staff.len(), 1);
        assert!((data.by_staff[0].share_pct - 100.0).abs() < 1e-9);
    }
}
