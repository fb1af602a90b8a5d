use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::models::{AppointmentRow, AppointmentStatus};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: broadcast::Sender<TenantEvent>,
    pub push: PushConfig,
}

#[derive(Clone, Debug)]
pub struct PushConfig {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

impl PushConfig {
    pub fn enabled(&self) -> bool {
        !(self.public_key.trim().is_empty() || self.private_key.trim().is_empty())
    }
}

/// Fan-out payload for the tenant event stream. Every booking mutation
/// publishes one of these; SSE handlers filter by tenant (and appointment).
#[derive(Clone, Debug, Serialize)]
pub struct TenantEvent {
    pub kind: String,
    pub tenant_id: String,
    pub appointment_id: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub customer_name: Option<String>,
    pub staff_name: Option<String>,
    pub service_name: Option<String>,
    pub starts_at: Option<String>,
}

impl TenantEvent {
    pub fn from_row(kind: &str, row: AppointmentRow) -> Self {
        Self {
            kind: kind.to_string(),
            tenant_id: row.tenant_id,
            appointment_id: Some(row.id),
            status: Some(row.status),
            customer_name: row.customer_name,
            staff_name: row.staff_name,
            service_name: row.service_name,
            starts_at: Some(row.starts_at),
        }
    }
}
