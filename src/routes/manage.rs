use actix_web::{web, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    db::{fetch_appointment, log_activity, new_id, now_rfc3339, tenant_exists},
    error::AppError,
    models::{
        ActivityRow, AppointmentRow, AppointmentStatus, CustomerRow, PaymentRow, PaymentStatus,
        ServiceRow, StaffRow,
    },
    push,
    state::{AppState, TenantEvent},
};

const APPOINTMENT_SELECT: &str = r#"SELECT a.id, a.tenant_id, a.customer_id, a.staff_id, a.service_id,
       a.starts_at, a.ends_at, a.status, a.price, a.notes,
       a.created_at, a.updated_at,
       c.name AS customer_name,
       u.name AS staff_name,
       s.name AS service_name
FROM appointments a
JOIN customers c ON a.customer_id = c.id
LEFT JOIN staff u ON a.staff_id = u.id
JOIN services s ON a.service_id = s.id"#;

#[derive(Serialize)]
struct StatCard {
    label: String,
    value: i64,
}

#[derive(Deserialize)]
struct AppointmentFilter {
    status: Option<AppointmentStatus>,
}

#[derive(Deserialize)]
struct AppointmentCreate {
    customer_id: String,
    service_id: String,
    staff_id: Option<String>,
    starts_at: String,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct AppointmentUpdate {
    status: Option<AppointmentStatus>,
    staff_id: Option<String>,
    starts_at: Option<String>,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct CustomerCreate {
    name: String,
    phone: String,
    email: Option<String>,
    preferences: Option<String>,
}

#[derive(Deserialize)]
struct CustomerUpdate {
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    preferences: Option<String>,
}

#[derive(Deserialize)]
struct ServiceCreate {
    name: String,
    description: Option<String>,
    price: f64,
    duration_minutes: i64,
}

#[derive(Deserialize)]
struct ServiceUpdate {
    name: Option<String>,
    description: Option<String>,
    price: Option<f64>,
    duration_minutes: Option<i64>,
    active: Option<bool>,
}

#[derive(Deserialize)]
struct StaffCreate {
    name: String,
    phone: Option<String>,
    email: Option<String>,
    commission_rate: Option<f64>,
}

#[derive(Deserialize)]
struct StaffUpdate {
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    commission_rate: Option<f64>,
    availability: Option<String>,
    active: Option<bool>,
}

#[derive(Deserialize)]
struct PaymentCreate {
    appointment_id: String,
    amount: f64,
    method: String,
    status: Option<PaymentStatus>,
    processor_ref: Option<String>,
}

#[derive(Deserialize)]
struct IntegrationCreate {
    platform: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/tenants/{tenant_id}/dashboard").route(web::get().to(dashboard)))
        .service(
            web::resource("/tenants/{tenant_id}/appointments")
                .route(web::get().to(list_appointments))
                .route(web::post().to(create_appointment)),
        )
        .service(
            web::resource("/tenants/{tenant_id}/appointments/{id}")
                .route(web::get().to(appointment_detail))
                .route(web::patch().to(update_appointment)),
        )
        .service(
            web::resource("/tenants/{tenant_id}/customers")
                .route(web::get().to(list_customers))
                .route(web::post().to(create_customer)),
        )
        .service(
            web::resource("/tenants/{tenant_id}/customers/{id}")
                .route(web::get().to(customer_detail))
                .route(web::patch().to(update_customer)),
        )
        .service(
            web::resource("/tenants/{tenant_id}/services")
                .route(web::get().to(list_services))
                .route(web::post().to(create_service)),
        )
        .service(
            web::resource("/tenants/{tenant_id}/services/{id}")
                .route(web::patch().to(update_service)),
        )
        .service(
            web::resource("/tenants/{tenant_id}/staff")
                .route(web::get().to(list_staff))
                .route(web::post().to(create_staff)),
        )
        .service(
            web::resource("/tenants/{tenant_id}/staff/{id}").route(web::patch().to(update_staff)),
        )
        .service(
            web::resource("/tenants/{tenant_id}/payments")
                .route(web::get().to(list_payments))
                .route(web::post().to(create_payment)),
        )
        .service(
            web::resource("/tenants/{tenant_id}/integrations")
                .route(web::get().to(list_integrations))
                .route(web::post().to(create_integration)),
        );
}

async fn count(sql: &str, state: &web::Data<AppState>, tenant_id: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(sql)
        .bind(tenant_id)
        .fetch_one(&state.db)
        .await
        .unwrap_or(0)
}

async fn dashboard(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    if !tenant_exists(&state.db, &tenant_id).await? {
        return Err(AppError::NotFound("tenant"));
    }

    let total = count(
        "SELECT COUNT(*) FROM appointments WHERE tenant_id = ?",
        &state,
        &tenant_id,
    )
    .await;
    let pending = count(
        "SELECT COUNT(*) FROM appointments WHERE tenant_id = ? AND status = 'pending'",
        &state,
        &tenant_id,
    )
    .await;
    let confirmed = count(
        "SELECT COUNT(*) FROM appointments WHERE tenant_id = ? AND status = 'confirmed'",
        &state,
        &tenant_id,
    )
    .await;
    let completed = count(
        "SELECT COUNT(*) FROM appointments WHERE tenant_id = ? AND status = 'completed'",
        &state,
        &tenant_id,
    )
    .await;

    let stats = vec![
        StatCard {
            label: "Total appointments".to_string(),
            value: total,
        },
        StatCard {
            label: "Pending review".to_string(),
            value: pending,
        },
        StatCard {
            label: "Confirmed".to_string(),
            value: confirmed,
        },
        StatCard {
            label: "Completed".to_string(),
            value: completed,
        },
    ];

    let upcoming = sqlx::query_as::<_, AppointmentRow>(&format!(
        "{APPOINTMENT_SELECT}\nWHERE a.tenant_id = ? AND a.starts_at >= ?\nORDER BY a.starts_at ASC\nLIMIT 8"
    ))
    .bind(&tenant_id)
    .bind(now_rfc3339())
    .fetch_all(&state.db)
    .await?;

    let activities = sqlx::query_as::<_, ActivityRow>(
        r#"SELECT kind, message, created_at
           FROM activities
           WHERE tenant_id = ?
           ORDER BY created_at DESC
           LIMIT 10"#,
    )
    .bind(&tenant_id)
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "stats": stats,
        "upcoming": upcoming,
        "activities": activities,
    })))
}

async fn list_appointments(
    state: web::Data<AppState>,
    path: web::Path<String>,
    filter: web::Query<AppointmentFilter>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();

    let rows = match filter.status {
        Some(status) => {
            sqlx::query_as::<_, AppointmentRow>(&format!(
                "{APPOINTMENT_SELECT}\nWHERE a.tenant_id = ? AND a.status = ?\nORDER BY a.starts_at DESC"
            ))
            .bind(&tenant_id)
            .bind(status)
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query_as::<_, AppointmentRow>(&format!(
                "{APPOINTMENT_SELECT}\nWHERE a.tenant_id = ?\nORDER BY a.starts_at DESC"
            ))
            .bind(&tenant_id)
            .fetch_all(&state.db)
            .await?
        }
    };

    Ok(HttpResponse::Ok().json(rows))
}

async fn create_appointment(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AppointmentCreate>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let form = body.into_inner();

    if !tenant_exists(&state.db, &tenant_id).await? {
        return Err(AppError::NotFound("tenant"));
    }

    let mut errors = Vec::new();

    let customer = sqlx::query_as::<_, (String,)>(
        "SELECT id FROM customers WHERE tenant_id = ? AND id = ? LIMIT 1",
    )
    .bind(&tenant_id)
    .bind(&form.customer_id)
    .fetch_optional(&state.db)
    .await?;
    if customer.is_none() {
        errors.push("customer not found".to_string());
    }

    let service = sqlx::query_as::<_, ServiceRow>(
        r#"SELECT id, tenant_id, name, description, price, duration_minutes, active,
                  created_at, updated_at
           FROM services WHERE tenant_id = ? AND id = ? AND active = 1 LIMIT 1"#,
    )
    .bind(&tenant_id)
    .bind(&form.service_id)
    .fetch_optional(&state.db)
    .await?;
    if service.is_none() {
        errors.push("service not found".to_string());
    }

    if let Some(staff_id) = form.staff_id.as_deref() {
        let known = sqlx::query_as::<_, (String,)>(
            "SELECT id FROM staff WHERE tenant_id = ? AND id = ? AND active = 1 LIMIT 1",
        )
        .bind(&tenant_id)
        .bind(staff_id)
        .fetch_optional(&state.db)
        .await?;
        if known.is_none() {
            errors.push("staff member not found".to_string());
        }
    }

    let starts_at = match DateTime::parse_from_rfc3339(&form.starts_at) {
        Ok(when) => Some(when.with_timezone(&Utc)),
        Err(_) => {
            errors.push("starts_at must be an RFC 3339 timestamp".to_string());
            None
        }
    };

    let (service, starts_at) = match (service, starts_at) {
        (Some(service), Some(starts_at)) if errors.is_empty() => (service, starts_at),
        _ => return Err(AppError::Validation(errors)),
    };
    let ends_at = starts_at + Duration::minutes(service.duration_minutes);

    let appointment_id = new_id();
    let now = now_rfc3339();
    sqlx::query(
        r#"INSERT INTO appointments
           (id, tenant_id, customer_id, staff_id, service_id, starts_at, ends_at,
            status, price, notes, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&appointment_id)
    .bind(&tenant_id)
    .bind(&form.customer_id)
    .bind(&form.staff_id)
    .bind(&service.id)
    .bind(starts_at.to_rfc3339())
    .bind(ends_at.to_rfc3339())
    .bind(AppointmentStatus::Pending)
    .bind(service.price)
    .bind(&form.notes)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    log_activity(
        &state.db,
        &tenant_id,
        "appointment_created",
        "Appointment created from the management portal.",
        Some(&appointment_id),
    )
    .await;

    let row = fetch_appointment(&state.db, &tenant_id, &appointment_id)
        .await?
        .ok_or(AppError::NotFound("appointment"))?;
    let _ = state
        .events
        .send(TenantEvent::from_row("appointment_created", row.clone()));

    Ok(HttpResponse::Created().json(row))
}

async fn appointment_detail(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, appointment_id) = path.into_inner();
    let row = fetch_appointment(&state.db, &tenant_id, &appointment_id)
        .await?
        .ok_or(AppError::NotFound("appointment"))?;
    Ok(HttpResponse::Ok().json(row))
}

async fn update_appointment(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<AppointmentUpdate>,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, appointment_id) = path.into_inner();
    let form = body.into_inner();

    let current = fetch_appointment(&state.db, &tenant_id, &appointment_id)
        .await?
        .ok_or(AppError::NotFound("appointment"))?;

    let mut errors = Vec::new();

    let staff_id = match form.staff_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => {
            let known = sqlx::query_as::<_, (String,)>(
                "SELECT id FROM staff WHERE tenant_id = ? AND id = ? AND active = 1 LIMIT 1",
            )
            .bind(&tenant_id)
            .bind(id)
            .fetch_optional(&state.db)
            .await?;
            if known.is_none() {
                errors.push("staff member not found".to_string());
            }
            Some(id.to_string())
        }
        Some(_) => None,
        None => current.staff_id.clone(),
    };

    let (starts_at, ends_at) = match form.starts_at.as_deref() {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(when) => {
                let when = when.with_timezone(&Utc);
                let duration = sqlx::query_scalar::<_, i64>(
                    "SELECT duration_minutes FROM services WHERE id = ? LIMIT 1",
                )
                .bind(&current.service_id)
                .fetch_one(&state.db)
                .await?;
                (
                    when.to_rfc3339(),
                    (when + Duration::minutes(duration)).to_rfc3339(),
                )
            }
            Err(_) => {
                errors.push("starts_at must be an RFC 3339 timestamp".to_string());
                (current.starts_at.clone(), current.ends_at.clone())
            }
        },
        None => (current.starts_at.clone(), current.ends_at.clone()),
    };

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let status = form.status.unwrap_or(current.status);
    let notes = form.notes.or(current.notes);

    sqlx::query(
        r#"UPDATE appointments
           SET status = ?, staff_id = ?, starts_at = ?, ends_at = ?, notes = ?, updated_at = ?
           WHERE tenant_id = ? AND id = ?"#,
    )
    .bind(status)
    .bind(&staff_id)
    .bind(&starts_at)
    .bind(&ends_at)
    .bind(&notes)
    .bind(now_rfc3339())
    .bind(&tenant_id)
    .bind(&appointment_id)
    .execute(&state.db)
    .await?;

    log_activity(
        &state.db,
        &tenant_id,
        "appointment_updated",
        &format!("Appointment {appointment_id} moved to {status}."),
        Some(&appointment_id),
    )
    .await;

    push::notify_appointment(
        &state,
        &tenant_id,
        &appointment_id,
        "Booking updated",
        &format!("Status changed to {status}."),
        Some(&format!("/tenants/{tenant_id}/bookings/{appointment_id}")),
    )
    .await;

    let row = fetch_appointment(&state.db, &tenant_id, &appointment_id)
        .await?
        .ok_or(AppError::NotFound("appointment"))?;
    let _ = state
        .events
        .send(TenantEvent::from_row("appointment_updated", row.clone()));

    Ok(HttpResponse::Ok().json(row))
}

async fn list_customers(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let rows = sqlx::query_as::<_, CustomerRow>(
        r#"SELECT id, tenant_id, name, phone, email, preferences, created_at, updated_at
           FROM customers WHERE tenant_id = ? ORDER BY name"#,
    )
    .bind(&tenant_id)
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn create_customer(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CustomerCreate>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let form = body.into_inner();

    if !tenant_exists(&state.db, &tenant_id).await? {
        return Err(AppError::NotFound("tenant"));
    }

    let mut errors = Vec::new();
    if form.name.trim().is_empty() {
        errors.push("name is required".to_string());
    }
    if form.phone.trim().is_empty() {
        errors.push("phone is required".to_string());
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let id = new_id();
    let now = now_rfc3339();
    sqlx::query(
        r#"INSERT INTO customers (id, tenant_id, name, phone, email, preferences, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&tenant_id)
    .bind(form.name.trim())
    .bind(form.phone.trim())
    .bind(&form.email)
    .bind(&form.preferences)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

async fn customer_detail(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, customer_id) = path.into_inner();
    let row = sqlx::query_as::<_, CustomerRow>(
        r#"SELECT id, tenant_id, name, phone, email, preferences, created_at, updated_at
           FROM customers WHERE tenant_id = ? AND id = ? LIMIT 1"#,
    )
    .bind(&tenant_id)
    .bind(&customer_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("customer"))?;
    Ok(HttpResponse::Ok().json(row))
}

async fn update_customer(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<CustomerUpdate>,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, customer_id) = path.into_inner();
    let form = body.into_inner();

    let current = sqlx::query_as::<_, CustomerRow>(
        r#"SELECT id, tenant_id, name, phone, email, preferences, created_at, updated_at
           FROM customers WHERE tenant_id = ? AND id = ? LIMIT 1"#,
    )
    .bind(&tenant_id)
    .bind(&customer_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("customer"))?;

    sqlx::query(
        r#"UPDATE customers SET name = ?, phone = ?, email = ?, preferences = ?, updated_at = ?
           WHERE tenant_id = ? AND id = ?"#,
    )
    .bind(form.name.unwrap_or(current.name))
    .bind(form.phone.unwrap_or(current.phone))
    .bind(form.email.or(current.email))
    .bind(form.preferences.or(current.preferences))
    .bind(now_rfc3339())
    .bind(&tenant_id)
    .bind(&customer_id)
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn list_services(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let rows = sqlx::query_as::<_, ServiceRow>(
        r#"SELECT id, tenant_id, name, description, price, duration_minutes, active,
                  created_at, updated_at
           FROM services WHERE tenant_id = ? ORDER BY name"#,
    )
    .bind(&tenant_id)
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn create_service(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ServiceCreate>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let form = body.into_inner();

    if !tenant_exists(&state.db, &tenant_id).await? {
        return Err(AppError::NotFound("tenant"));
    }

    let mut errors = Vec::new();
    if form.name.trim().is_empty() {
        errors.push("name is required".to_string());
    }
    if form.price <= 0.0 {
        errors.push("price must be positive".to_string());
    }
    if form.duration_minutes <= 0 {
        errors.push("duration_minutes must be positive".to_string());
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let id = new_id();
    let now = now_rfc3339();
    sqlx::query(
        r#"INSERT INTO services
           (id, tenant_id, name, description, price, duration_minutes, active, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)"#,
    )
    .bind(&id)
    .bind(&tenant_id)
    .bind(form.name.trim())
    .bind(&form.description)
    .bind(form.price)
    .bind(form.duration_minutes)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

async fn update_service(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<ServiceUpdate>,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, service_id) = path.into_inner();
    let form = body.into_inner();

    let current = sqlx::query_as::<_, ServiceRow>(
        r#"SELECT id, tenant_id, name, description, price, duration_minutes, active,
                  created_at, updated_at
           FROM services WHERE tenant_id = ? AND id = ? LIMIT 1"#,
    )
    .bind(&tenant_id)
    .bind(&service_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("service"))?;

    if let Some(price) = form.price {
        if price <= 0.0 {
            return Err(AppError::Validation(vec![
                "price must be positive".to_string()
            ]));
        }
    }

    sqlx::query(
        r#"UPDATE services
           SET name = ?, description = ?, price = ?, duration_minutes = ?, active = ?, updated_at = ?
           WHERE tenant_id = ? AND id = ?"#,
    )
    .bind(form.name.unwrap_or(current.name))
    .bind(form.description.or(current.description))
    .bind(form.price.unwrap_or(current.price))
    .bind(form.duration_minutes.unwrap_or(current.duration_minutes))
    .bind(form.active.map(i64::from).unwrap_or(current.active))
    .bind(now_rfc3339())
    .bind(&tenant_id)
    .bind(&service_id)
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn list_staff(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let rows = sqlx::query_as::<_, StaffRow>(
        r#"SELECT id, tenant_id, name, phone, email, commission_rate, availability, active,
                  created_at, updated_at
           FROM staff WHERE tenant_id = ? ORDER BY name"#,
    )
    .bind(&tenant_id)
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn create_staff(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<StaffCreate>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let form = body.into_inner();

    if !tenant_exists(&state.db, &tenant_id).await? {
        return Err(AppError::NotFound("tenant"));
    }
    if form.name.trim().is_empty() {
        return Err(AppError::Validation(vec!["name is required".to_string()]));
    }

    let id = new_id();
    let now = now_rfc3339();
    sqlx::query(
        r#"INSERT INTO staff
           (id, tenant_id, name, phone, email, commission_rate, active, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)"#,
    )
    .bind(&id)
    .bind(&tenant_id)
    .bind(form.name.trim())
    .bind(&form.phone)
    .bind(&form.email)
    .bind(form.commission_rate.unwrap_or(0.0))
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

async fn update_staff(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<StaffUpdate>,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, staff_id) = path.into_inner();
    let form = body.into_inner();

    let current = sqlx::query_as::<_, StaffRow>(
        r#"SELECT id, tenant_id, name, phone, email, commission_rate, availability, active,
                  created_at, updated_at
           FROM staff WHERE tenant_id = ? AND id = ? LIMIT 1"#,
    )
    .bind(&tenant_id)
    .bind(&staff_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("staff member"))?;

    sqlx::query(
        r#"UPDATE staff
           SET name = ?, phone = ?, email = ?, commission_rate = ?, availability = ?, active = ?, updated_at = ?
           WHERE tenant_id = ? AND id = ?"#,
    )
    .bind(form.name.unwrap_or(current.name))
    .bind(form.phone.or(current.phone))
    .bind(form.email.or(current.email))
    .bind(form.commission_rate.unwrap_or(current.commission_rate))
    .bind(form.availability.or(current.availability))
    .bind(form.active.map(i64::from).unwrap_or(current.active))
    .bind(now_rfc3339())
    .bind(&tenant_id)
    .bind(&staff_id)
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn list_payments(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let rows = sqlx::query_as::<_, PaymentRow>(
        r#"SELECT id, tenant_id, appointment_id, customer_id, amount, status, method,
                  processor_ref, created_at
           FROM payments WHERE tenant_id = ? ORDER BY created_at DESC LIMIT 100"#,
    )
    .bind(&tenant_id)
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn create_payment(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<PaymentCreate>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let form = body.into_inner();

    let appointment = fetch_appointment(&state.db, &tenant_id, &form.appointment_id)
        .await?
        .ok_or(AppError::NotFound("appointment"))?;

    let mut errors = Vec::new();
    if form.amount <= 0.0 {
        errors.push("amount must be positive".to_string());
    }
    if form.method.trim().is_empty() {
        errors.push("method is required".to_string());
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO payments
           (id, tenant_id, appointment_id, customer_id, amount, status, method, processor_ref, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&tenant_id)
    .bind(&appointment.id)
    .bind(&appointment.customer_id)
    .bind(form.amount)
    .bind(form.status.unwrap_or(PaymentStatus::Completed))
    .bind(form.method.trim())
    .bind(&form.processor_ref)
    .bind(now_rfc3339())
    .execute(&state.db)
    .await?;

    log_activity(
        &state.db,
        &tenant_id,
        "payment_recorded",
        &format!("Payment of ${:.2} recorded.", form.amount),
        Some(&appointment.id),
    )
    .await;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

async fn list_integrations(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let rows = sqlx::query_as::<_, (String, String, String, String)>(
        r#"SELECT id, platform, status, connected_at
           FROM integrations WHERE tenant_id = ? ORDER BY platform"#,
    )
    .bind(&tenant_id)
    .fetch_all(&state.db)
    .await?;

    let payload: Vec<_> = rows
        .into_iter()
        .map(|(id, platform, status, connected_at)| {
            json!({
                "id": id,
                "platform": platform,
                "status": status,
                "connected_at": connected_at,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(payload))
}

async fn create_integration(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<IntegrationCreate>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let form = body.into_inner();

    if !tenant_exists(&state.db, &tenant_id).await? {
        return Err(AppError::NotFound("tenant"));
    }
    if form.platform.trim().is_empty() {
        return Err(AppError::Validation(vec![
            "platform is required".to_string()
        ]));
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO integrations (id, tenant_id, platform, status, connected_at)
           VALUES (?, ?, ?, 'connected', ?)"#,
    )
    .bind(&id)
    .bind(&tenant_id)
    .bind(form.platform.trim())
    .bind(now_rfc3339())
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}
