use std::{env, fs, path::Path};

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::AppointmentRow;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let demo = env::var("SEED_DEMO").unwrap_or_else(|_| "false".to_string());
    if demo == "true" {
        seed_demo_tenant(pool).await?;
    }
    Ok(())
}

/// Append-only audit feed. Failures are swallowed so a full activities
/// table never blocks the mutation that triggered the entry.
pub async fn log_activity(
    pool: &SqlitePool,
    tenant_id: &str,
    kind: &str,
    message: &str,
    appointment_id: Option<&str>,
) {
    let _ = sqlx::query(
        r#"INSERT INTO activities (id, tenant_id, kind, message, appointment_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(tenant_id)
    .bind(kind)
    .bind(message)
    .bind(appointment_id)
    .bind(now_rfc3339())
    .execute(pool)
    .await;
}

pub async fn fetch_appointment(
    pool: &SqlitePool,
    tenant_id: &str,
    appointment_id: &str,
) -> Result<Option<AppointmentRow>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentRow>(
        r#"SELECT a.id, a.tenant_id, a.customer_id, a.staff_id, a.service_id,
                  a.starts_at, a.ends_at, a.status, a.price, a.notes,
                  a.created_at, a.updated_at,
                  c.name AS customer_name,
                  u.name AS staff_name,
                  s.name AS service_name
           FROM appointments a
           JOIN customers c ON a.customer_id = c.id
           LEFT JOIN staff u ON a.staff_id = u.id
           JOIN services s ON a.service_id = s.id
           WHERE a.tenant_id = ? AND a.id = ?
           LIMIT 1"#,
    )
    .bind(tenant_id)
    .bind(appointment_id)
    .fetch_optional(pool)
    .await
}

pub async fn tenant_exists(pool: &SqlitePool, tenant_id: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query_as::<_, (String,)>("SELECT id FROM tenants WHERE id = ? LIMIT 1")
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

async fn seed_demo_tenant(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM tenants WHERE slug = ? LIMIT 1")
        .bind("demo")
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let tenant_id = new_id();
    let now = now_rfc3339();
    sqlx::query("INSERT INTO tenants (id, name, slug, created_at) VALUES (?, ?, ?, ?)")
        .bind(&tenant_id)
        .bind("Demo Barbershop")
        .bind("demo")
        .bind(&now)
        .execute(pool)
        .await?;

    let services = [
        ("Signature Cut", "Precision cut, styling, and lineup.", 45.0, 45),
        ("Fade & Line-Up", "Skin fade with sharp finishing touches.", 38.0, 35),
        ("Beard Sculpt", "Shape, trim, and conditioning for the beard.", 28.0, 25),
        ("Full Grooming", "Cut, beard, and grooming refresh.", 65.0, 60),
    ];
    for (name, description, price, duration) in services {
        sqlx::query(
            r#"INSERT INTO services
               (id, tenant_id, name, description, price, duration_minutes, active, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)"#,
        )
        .bind(new_id())
        .bind(&tenant_id)
        .bind(name)
        .bind(description)
        .bind(price)
        .bind(duration)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    for name in ["Marco Reyes", "Dee Carter"] {
        sqlx::query(
            r#"INSERT INTO staff
               (id, tenant_id, name, commission_rate, active, created_at, updated_at)
               VALUES (?, ?, ?, 0.4, 1, ?, ?)"#,
        )
        .bind(new_id())
        .bind(&tenant_id)
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    log::info!("Seeded demo tenant {tenant_id}");
    Ok(())
}
