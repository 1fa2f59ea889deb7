use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use enrichment_service::api::{self, AppState};
use enrichment_service::model::{EnrichmentModel, ModelParams};
use enrichment_service::runner::BatchCfg;
use shared::config::Settings;
use shared::db::{self, PgStoreProvider};
use shared::openai_client::HttpChatBackend;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    info!("starting enrichment service");

    let settings = Settings::new().map_err(|e| {
        error!(%e, "failed to load settings");
        e
    })?;
    if settings.model_api_key.is_empty() {
        warn!("MODEL_API_KEY is empty; model calls will be rejected");
    }
    if settings.api_secret().is_none() {
        warn!("API_SECRET is not set; POST /analyze will answer 401 to every caller");
    }

    match db::connect(&settings.database_url).await {
        Ok(client) => {
            if let Err(e) = db::ensure_schema(&client).await {
                error!(%e, "failed to ensure schema");
            }
        }
        Err(e) => warn!(%e, "database not reachable at start-up (continuing)"),
    }

    let backend = HttpChatBackend::from_settings(&settings)?;
    let model = EnrichmentModel::new(Arc::new(backend), ModelParams::from_settings(&settings));
    let batch_cfg = BatchCfg::from_settings(&settings);
    info!(?batch_cfg, model = model.model_name(), "enrichment configured");

    let state = web::Data::new(AppState::new(
        Arc::new(PgStoreProvider::new(settings.database_url.clone())),
        model,
        batch_cfg,
        settings.api_secret().map(str::to_string),
    ));

    if settings.analysis_interval_secs > 0 {
        actix_web::rt::spawn(api::run_schedule(
            state.clone(),
            Duration::from_secs(settings.analysis_interval_secs),
        ));
    }

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(api::configure)
    })
    .bind(("0.0.0.0", 8086))?
    .run()
    .await?;
    Ok(())
}
