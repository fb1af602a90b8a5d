use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, EnumString,
    Default,
)]
#[sqlx(type_name = "appointment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AppointmentStatus {
    #[default]
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, EnumString,
    Default,
)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// How far back aggregate queries look. The tokens are the wire format
/// accepted by the context endpoints.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
pub enum Timeframe {
    #[serde(rename = "7_days")]
    #[strum(serialize = "7_days")]
    SevenDays,
    #[default]
    #[serde(rename = "30_days")]
    #[strum(serialize = "30_days")]
    ThirtyDays,
    #[serde(rename = "90_days")]
    #[strum(serialize = "90_days")]
    NinetyDays,
    #[serde(rename = "1_year")]
    #[strum(serialize = "1_year")]
    OneYear,
}

impl Timeframe {
    pub fn days(self) -> i64 {
        match self {
            Timeframe::SevenDays => 7,
            Timeframe::ThirtyDays => 30,
            Timeframe::NinetyDays => 90,
            Timeframe::OneYear => 365,
        }
    }
}

/// Selects which context template the engine applies. Unknown labels fail
/// request parsing, so there is no runtime "generator not found" path.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    sqlx::Type,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[sqlx(type_name = "agent_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentType {
    Financial,
    Operations,
    ClientAcquisition,
    Brand,
    Growth,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TenantRow {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CustomerRow {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub preferences: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StaffRow {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub commission_rate: f64,
    pub availability: Option<String>,
    pub active: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ServiceRow {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub duration_minutes: i64,
    pub active: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Appointment joined with the display names the API returns alongside it.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AppointmentRow {
    pub id: String,
    pub tenant_id: String,
    pub customer_id: String,
    pub staff_id: Option<String>,
    pub service_id: String,
    pub starts_at: String,
    pub ends_at: String,
    pub status: AppointmentStatus,
    pub price: f64,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub customer_name: Option<String>,
    pub staff_name: Option<String>,
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PaymentRow {
    pub id: String,
    pub tenant_id: String,
    pub appointment_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub status: PaymentStatus,
    pub method: String,
    pub processor_ref: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ActivityRow {
    pub kind: String,
    pub message: String,
    pub created_at: String,
}
