use actix_web::{web, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::{
    db::{fetch_appointment, log_activity, new_id, now_rfc3339, tenant_exists},
    error::AppError,
    models::{AppointmentStatus, ServiceRow},
    push,
    state::{AppState, TenantEvent},
};

#[derive(Deserialize)]
struct BookingRequest {
    customer_name: String,
    customer_phone: String,
    customer_email: Option<String>,
    service_id: String,
    staff_id: Option<String>,
    starts_at: String,
    notes: Option<String>,
    push_subscription: Option<serde_json::Value>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(
            web::resource("/tenants/{tenant_id}/bookings")
                .route(web::post().to(create_booking)),
        )
        .service(
            web::resource("/tenants/{tenant_id}/bookings/{id}")
                .route(web::get().to(booking_status)),
        )
        .service(
            web::resource("/tenants/{tenant_id}/bookings/{id}/subscribe")
                .route(web::post().to(subscribe_notifications)),
        );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn create_booking(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<BookingRequest>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let form = body.into_inner();

    if !tenant_exists(&state.db, &tenant_id).await? {
        return Err(AppError::NotFound("tenant"));
    }

    let mut errors = Vec::new();
    if form.customer_name.trim().is_empty() {
        errors.push("customer_name is required".to_string());
    }
    if form.customer_phone.trim().is_empty() {
        errors.push("customer_phone is required".to_string());
    }
    if form.service_id.trim().is_empty() {
        errors.push("service_id is required".to_string());
    }

    let starts_at = match DateTime::parse_from_rfc3339(&form.starts_at) {
        Ok(when) => Some(when.with_timezone(&Utc)),
        Err(_) => {
            errors.push("starts_at must be an RFC 3339 timestamp".to_string());
            None
        }
    };

    let service = sqlx::query_as::<_, ServiceRow>(
        r#"SELECT id, tenant_id, name, description, price, duration_minutes, active,
                  created_at, updated_at
           FROM services
           WHERE tenant_id = ? AND id = ? AND active = 1
           LIMIT 1"#,
    )
    .bind(&tenant_id)
    .bind(&form.service_id)
    .fetch_optional(&state.db)
    .await?;
    if service.is_none() && !form.service_id.trim().is_empty() {
        errors.push("service not found".to_string());
    }

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
        _ => None,
    };

    let (service, starts_at) = match (service, starts_at) {
        (Some(service), Some(starts_at)) if errors.is_empty() => (service, starts_at),
        _ => return Err(AppError::Validation(errors)),
    };
    let ends_at = starts_at + Duration::minutes(service.duration_minutes);

    let customer_id = find_or_create_customer(
        &state.db,
        &tenant_id,
        &form.customer_name,
        &form.customer_phone,
        form.customer_email.as_deref(),
    )
    .await?;

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
    .bind(&customer_id)
    .bind(&staff_id)
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
        &format!("New booking requested for {}.", form.customer_name),
        Some(&appointment_id),
    )
    .await;

    if let Some(subscription) = form.push_subscription {
        let _ = push::store_subscription(
            &state.db,
            &tenant_id,
            &appointment_id,
            &subscription.to_string(),
        )
        .await;
        push::notify_appointment(
            &state,
            &tenant_id,
            &appointment_id,
            "Booking request received",
            "We received your booking request. We'll confirm shortly.",
            Some(&format!("/tenants/{tenant_id}/bookings/{appointment_id}")),
        )
        .await;
    }

    if let Some(row) = fetch_appointment(&state.db, &tenant_id, &appointment_id).await? {
        let _ = state
            .events
            .send(TenantEvent::from_row("appointment_created", row));
    }

    Ok(HttpResponse::Created().json(json!({
        "id": appointment_id,
        "status": AppointmentStatus::Pending,
        "starts_at": starts_at.to_rfc3339(),
        "ends_at": ends_at.to_rfc3339(),
        "price": service.price,
    })))
}

async fn booking_status(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, appointment_id) = path.into_inner();
    let row = fetch_appointment(&state.db, &tenant_id, &appointment_id)
        .await?
        .ok_or(AppError::NotFound("appointment"))?;

    Ok(HttpResponse::Ok().json(json!({
        "id": row.id,
        "status": row.status,
        "service": row.service_name,
        "starts_at": row.starts_at,
        "staff": row.staff_name.unwrap_or_else(|| "Unassigned".to_string()),
        "customer": row.customer_name,
    })))
}

async fn subscribe_notifications(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, appointment_id) = path.into_inner();
    if fetch_appointment(&state.db, &tenant_id, &appointment_id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("appointment"));
    }

    let raw = String::from_utf8(body.to_vec()).unwrap_or_default();
    if raw.trim().is_empty() {
        return Err(AppError::Validation(vec![
            "push subscription payload is required".to_string(),
        ]));
    }

    push::store_subscription(&state.db, &tenant_id, &appointment_id, &raw).await?;
    push::notify_appointment(
        &state,
        &tenant_id,
        &appointment_id,
        "Notifications enabled",
        "You'll receive updates about your booking.",
        Some(&format!("/tenants/{tenant_id}/bookings/{appointment_id}")),
    )
    .await;

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn find_or_create_customer(
    pool: &sqlx::SqlitePool,
    tenant_id: &str,
    name: &str,
    phone: &str,
    email: Option<&str>,
) -> Result<String, AppError> {
    let existing = sqlx::query_as::<_, (String,)>(
        "SELECT id FROM customers WHERE tenant_id = ? AND phone = ? LIMIT 1",
    )
    .bind(tenant_id)
    .bind(phone)
    .fetch_optional(pool)
    .await?;

    if let Some((id,)) = existing {
        return Ok(id);
    }

    let id = new_id();
    let now = now_rfc3339();
    sqlx::query(
        r#"INSERT INTO customers (id, tenant_id, name, phone, email, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(tenant_id)
    .bind(name)
    .bind(phone)
    .bind(email)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use actix_web::{test, web, App};
    use chrono::{Duration, Utc};
    use tokio::sync::broadcast;

    use super::*;
    use crate::db::testutil;
    use crate::state::PushConfig;

    async fn test_state() -> AppState {
        let (events, _) = broadcast::channel(16);
        AppState {
            db: testutil::pool().await,
            events,
            push: PushConfig {
                public_key: String::new(),
                private_key: String::new(),
                subject: String::new(),
            },
        }
    }

    #[actix_web::test]
    async fn booking_flow_creates_and_reports_status() {
        let state = test_state().await;
        let tenant = testutil::tenant(&state.db).await;
        let service = testutil::service(&state.db, &tenant, "Signature Cut", 45.0).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let starts_at = (Utc::now() + Duration::days(1)).to_rfc3339();
        let req = test::TestRequest::post()
            .uri(&format!("/tenants/{tenant}/bookings"))
            .set_json(json!({
                "customer_name": "Ana Diaz",
                "customer_phone": "+15550001111",
                "service_id": service,
                "starts_at": starts_at,
            }))
            .to_request();
        let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["status"], "pending");
        assert_eq!(resp["price"], 45.0);
        let booking_id = resp["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/tenants/{tenant}/bookings/{booking_id}"))
            .to_request();
        let status: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status["service"], "Signature Cut");
        assert_eq!(status["staff"], "Unassigned");
        assert_eq!(status["customer"], "Ana Diaz");

        // A repeat booking with the same phone reuses the customer record.
        let req = test::TestRequest::post()
            .uri(&format!("/tenants/{tenant}/bookings"))
            .set_json(json!({
                "customer_name": "Ana Diaz",
                "customer_phone": "+15550001111",
                "service_id": service,
                "starts_at": starts_at,
            }))
            .to_request();
        let _: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        let customers =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM customers WHERE tenant_id = ?")
                .bind(&tenant)
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert_eq!(customers, 1);
    }

    #[actix_web::test]
    async fn invalid_payload_lists_every_problem() {
        let state = test_state().await;
        let tenant = testutil::tenant(&state.db).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/tenants/{tenant}/bookings"))
            .set_json(json!({
                "customer_name": "",
                "customer_phone": "",
                "service_id": "nope",
                "starts_at": "tomorrow-ish",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let details = body["details"].as_array().unwrap();
        assert_eq!(details.len(), 4);
    }

    #[actix_web::test]
    async fn unknown_tenant_is_rejected() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/tenants/ghost/bookings")
            .set_json(json!({
                "customer_name": "Ana",
                "customer_phone": "+1555",
                "service_id": "svc",
                "starts_at": "2026-08-07T10:00:00+00:00",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }
}
