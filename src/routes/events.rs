use actix_web::{http::header, web, HttpResponse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::state::{AppState, TenantEvent};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/tenants/{tenant_id}/events").route(web::get().to(stream_tenant_events)),
    )
    .service(
        web::resource("/tenants/{tenant_id}/bookings/{id}/events")
            .route(web::get().to(stream_booking_events)),
    );
}

async fn stream_tenant_events(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let tenant_id = path.into_inner();
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let event = match result {
            Ok(event) => event,
            Err(_) => return None,
        };
        if event.tenant_id != tenant_id {
            return None;
        }
        Some(Ok::<web::Bytes, actix_web::Error>(event_to_bytes(&event)))
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn event_to_bytes(event: &TenantEvent) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: update\ndata: {}\n\n", payload))
}

/// Public per-booking stream: the subset of the event a client may see.
#[derive(serde::Serialize)]
struct BookingStatusEvent {
    appointment_id: Option<String>,
    status: Option<crate::models::AppointmentStatus>,
    service: Option<String>,
    starts_at: Option<String>,
    staff: Option<String>,
}

async fn stream_booking_events(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tenant_id, appointment_id) = path.into_inner();
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let event = match result {
            Ok(event) => event,
            Err(_) => return None,
        };
        if event.tenant_id != tenant_id
            || event.appointment_id.as_deref() != Some(&appointment_id)
        {
            return None;
        }
        let public = BookingStatusEvent {
            appointment_id: event.appointment_id,
            status: event.status,
            service: event.service_name,
            starts_at: event.starts_at,
            staff: event.staff_name,
        };
        Some(Ok::<web::Bytes, actix_web::Error>(booking_event_to_bytes(
            &public,
        )))
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn booking_event_to_bytes(event: &BookingStatusEvent) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: update\ndata: {}\n\n", payload))
}
