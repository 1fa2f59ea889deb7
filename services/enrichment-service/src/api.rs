use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Serialize;
use serde_json::json;
use shared::db::StoreProvider;
use shared::error::AppError;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::model::EnrichmentModel;
use crate::runner::{run_enrichment, BatchCfg, BatchReport, ReportOutcome};

pub struct AppState {
    pub stores: Arc<dyn StoreProvider>,
    pub model: EnrichmentModel,
    pub batch_cfg: BatchCfg,
    pub api_secret: Option<String>,
    run_lock: Mutex<()>,
}

impl AppState {
    pub fn new(
        stores: Arc<dyn StoreProvider>,
        model: EnrichmentModel,
        batch_cfg: BatchCfg,
        api_secret: Option<String>,
    ) -> Self {
        Self {
            stores,
            model,
            batch_cfg,
            api_secret,
            run_lock: Mutex::new(()),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TriggerError {
    #[error("an enrichment run is already in progress")]
    Busy,
    #[error(transparent)]
    Failed(#[from] AppError),
}

#[derive(Debug, Serialize)]
pub struct EnrichmentSummary {
    pub success: bool,
    pub analyzed: usize,
    pub enriched: usize,
    pub failed: usize,
    pub outcomes: Vec<ReportOutcome>,
}

impl From<BatchReport> for EnrichmentSummary {
    fn from(b: BatchReport) -> Self {
        Self {
            success: true,
            analyzed: b.analyzed,
            enriched: b.enriched,
            failed: b.failed(),
            outcomes: b.outcomes,
        }
    }
}

/// Run one pass unless another one is active. The store is opened here and
/// dropped before returning.
pub async fn trigger(state: &AppState) -> Result<BatchReport, TriggerError> {
    let _guard = state.run_lock.try_lock().map_err(|_| TriggerError::Busy)?;
    let store = state.stores.open().await?;
    let report = run_enrichment(store.as_ref(), &state.model, &state.batch_cfg).await?;
    Ok(report)
}

/// Without a configured secret nobody may trigger a run over HTTP.
fn authorized(req: &HttpRequest, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return false;
    };
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == format!("Bearer {secret}"))
}

async fn analyze(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if !authorized(&req, state.api_secret.as_deref()) {
        warn!("rejected analysis trigger without valid bearer token");
        return HttpResponse::Unauthorized().json(json!({"success": false, "error": "Unauthorized"}));
    }

    match trigger(&state).await {
        Ok(report) => HttpResponse::Ok().json(EnrichmentSummary::from(report)),
        Err(TriggerError::Busy) => {
            HttpResponse::Conflict().json(json!({"success": false, "error": "Analysis already running"}))
        }
        Err(TriggerError::Failed(e)) => {
            error!(%e, "Analysis error");
            HttpResponse::InternalServerError().json(json!({"success": false, "error": "Analysis failed"}))
        }
    }
}

async fn health() -> impl Responder {
    "OK"
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/analyze", web::post().to(analyze))
        .route("/health", web::get().to(health));
}

/// Trigger a pass every `every`, sharing the single-run guard with the HTTP
/// route. The first pass starts immediately.
pub async fn run_schedule(state: web::Data<AppState>, every: Duration) {
    info!(?every, "enrichment scheduler started");
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match trigger(&state).await {
            Ok(report) => info!(
                analyzed = report.analyzed,
                enriched = report.enriched,
                "scheduled enrichment finished"
            ),
            Err(TriggerError::Busy) => info!("scheduled enrichment skipped, run in progress"),
            Err(e) => error!(%e, "scheduled enrichment failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test as actix_test, App};
    use async_trait::async_trait;
    use shared::memory::{MemoryProvider, MemoryStore};
    use shared::openai_client::{
        ChatBackend, ChatChoice, ChatRequest, ChatResponse, ChoiceMessage, ModelError,
    };

    use crate::model::ModelParams;

    struct Fixed;

    #[async_trait]
    impl ChatBackend for Fixed {
        async fn create_chat_completion(&self, _: &ChatRequest) -> Result<ChatResponse, ModelError> {
            let content = r#"{"sentiment_score":0.1,"quality_score":5,"analysis":"ok","sentiment_aspects":{"speed_satisfaction":0,"reliability_satisfaction":0,"value_satisfaction":0,"service_satisfaction":0,"aspects_analysis":""}}"#;
            Ok(ChatResponse {
                choices: vec![ChatChoice {
                    message: Some(ChoiceMessage {
                        content: Some(content.into()),
                    }),
                }],
            })
        }
    }

    const SECRET: &str = "s3cret";

    fn post_analyze() -> actix_test::TestRequest {
        actix_test::TestRequest::post()
            .uri("/analyze")
            .insert_header((header::AUTHORIZATION, format!("Bearer {SECRET}")))
    }

    fn state(store: Arc<MemoryStore>, secret: Option<&str>) -> web::Data<AppState> {
        web::Data::new(AppState::new(
            Arc::new(MemoryProvider(store)),
            EnrichmentModel::new(Arc::new(Fixed), ModelParams::default()),
            BatchCfg::default(),
            secret.map(str::to_string),
        ))
    }

    #[actix_web::test]
    async fn health_ok() {
        let app = actix_test::init_service(App::new().configure(configure)).await;
        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn analyze_reports_counts_and_outcomes() {
        let store = Arc::new(MemoryStore::new());
        store.add_report(1, "fine", 5, None).await;
        store.add_report(2, "also fine", 4, None).await;
        let app = actix_test::init_service(
            App::new()
                .app_data(state(store.clone(), Some(SECRET)))
                .configure(configure),
        )
        .await;

        let req = post_analyze().to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["analyzed"], 2);
        assert_eq!(body["enriched"], 2);
        assert_eq!(body["failed"], 0);
        assert_eq!(body["outcomes"][0]["status"], "enriched");
        assert_eq!(store.report(2).await.unwrap().sentiment_score, Some(0.1));
    }

    #[actix_web::test]
    async fn analyze_requires_bearer_when_secret_set() {
        let store = Arc::new(MemoryStore::new());
        store.add_report(1, "fine", 5, None).await;
        let app = actix_test::init_service(
            App::new()
                .app_data(state(store.clone(), Some(SECRET)))
                .configure(configure),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/analyze")
            .insert_header((header::AUTHORIZATION, "Bearer wrong"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
        assert_eq!(store.report(1).await.unwrap().sentiment_score, None);

        let req = actix_test::TestRequest::post().uri("/analyze").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);

        let req = post_analyze().to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn analyze_is_closed_when_no_secret_is_configured() {
        let store = Arc::new(MemoryStore::new());
        store.add_report(1, "fine", 5, None).await;
        let app = actix_test::init_service(
            App::new()
                .app_data(state(store.clone(), None))
                .configure(configure),
        )
        .await;

        for req in [
            actix_test::TestRequest::post().uri("/analyze").to_request(),
            post_analyze().to_request(),
        ] {
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), 401);
            let body: serde_json::Value = actix_test::read_body_json(resp).await;
            assert_eq!(body, json!({"success": false, "error": "Unauthorized"}));
        }
        assert_eq!(store.report(1).await.unwrap().sentiment_score, None);
        assert!(store.analysis(1).await.is_none());
    }

    #[actix_web::test]
    async fn fetch_failure_is_a_500() {
        let store = Arc::new(MemoryStore::new());
        store.fail_fetch(true);
        let app = actix_test::init_service(
            App::new()
                .app_data(state(store, Some(SECRET)))
                .configure(configure),
        )
        .await;

        let req = post_analyze().to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 500);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body, json!({"success": false, "error": "Analysis failed"}));
    }

    #[actix_web::test]
    async fn second_trigger_while_running_is_busy() {
        let st = state(Arc::new(MemoryStore::new()), Some(SECRET));
        let _held = st.run_lock.try_lock().unwrap();
        assert!(matches!(trigger(&st).await, Err(TriggerError::Busy)));

        let app = actix_test::init_service(
            App::new().app_data(st.clone()).configure(configure),
        )
        .await;
        let req = post_analyze().to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 409);
    }
}
