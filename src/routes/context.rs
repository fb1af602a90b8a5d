use actix_web::{web, HttpResponse};

use crate::{
    context::{document, ContextEngine, ContextOptions},
    db::log_activity,
    error::AppError,
    models::AgentType,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/tenants/{tenant_id}/context/{agent_type}")
            .route(web::post().to(generate_context))
            .route(web::get().to(get_context)),
    );
}

async fn generate_context(
    state: web::Data<AppState>,
    path: web::Path<(String, AgentType)>,
    options: web::Json<ContextOptions>,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, agent_type) = path.into_inner();

    let engine = ContextEngine::new(&state.db);
    let doc = engine.generate(&tenant_id, agent_type, &options).await?;

    log_activity(
        &state.db,
        &tenant_id,
        "context_generated",
        &format!("Generated {agent_type} business context."),
        None,
    )
    .await;

    Ok(HttpResponse::Ok().json(doc))
}

async fn get_context(
    state: web::Data<AppState>,
    path: web::Path<(String, AgentType)>,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, agent_type) = path.into_inner();
    let doc = document::load(&state.db, &tenant_id, agent_type)
        .await?
        .ok_or(AppError::NotFound("context"))?;
    Ok(HttpResponse::Ok().json(doc))
}

#[cfg(test)]
mod tests {
    use actix_web::{test, web, App};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tokio::sync::broadcast;

    use super::*;
    use crate::db::testutil;
    use crate::models::AppointmentStatus;
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
    async fn generate_then_fetch_round_trips() {
        let state = test_state().await;
        let tenant = testutil::tenant(&state.db).await;
        let customer = testutil::customer(&state.db, &tenant, "Ana", Some("ana@example.com")).await;
        let service = testutil::service(&state.db, &tenant, "Cut", 40.0).await;
        testutil::staff(&state.db, &tenant, "Marco").await;
        testutil::appointment(
            &state.db,
            &tenant,
            &customer,
            &service,
            None,
            Utc::now() - Duration::days(1),
            AppointmentStatus::Completed,
            40.0,
        )
        .await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/tenants/{tenant}/context/financial"))
            .set_json(json!({ "timeframe": "30_days", "include_comparisons": true }))
            .to_request();
        let doc: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(doc["schema_version"], 1);
        assert_eq!(doc["agent_type"], "financial");
        assert_eq!(doc["comparisons"], json!({}));
        assert!(doc["predictions"].is_null());
        assert_eq!(doc["insights"].as_object().unwrap().len(), 5);

        let req = test::TestRequest::get()
            .uri(&format!("/tenants/{tenant}/context/financial"))
            .to_request();
        let stored: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stored["generated_at"], doc["generated_at"]);
    }

    #[actix_web::test]
    async fn unknown_agent_type_fails_parsing() {
        let state = test_state().await;
        let tenant = testutil::tenant(&state.db).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/tenants/{tenant}/context/astrology"))
            .set_json(json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn missing_context_is_a_404() {
        let state = test_state().await;
        let tenant = testutil::tenant(&state.db).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/tenants/{tenant}/context/growth"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }
}
