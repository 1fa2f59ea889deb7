use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use serde_json::json;
use shared::config::Settings;
use shared::db::{self, PgStore, StatsSource};
use shared::stats::collect_stats;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct AppState {
    source: Arc<dyn StatsSource>,
}

async fn health() -> impl Responder {
    "OK"
}

async fn analysis_stats(state: web::Data<AppState>) -> HttpResponse {
    info!("loading analysis statistics");
    match collect_stats(state.source.as_ref()).await {
        Ok(stats) => HttpResponse::Ok().json(json!({"success": true, "stats": stats})),
        Err(e) => {
            error!(%e, "Stats error");
            HttpResponse::InternalServerError()
                .json(json!({"success": false, "error": "Failed to fetch statistics"}))
        }
    }
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/analysis-stats", web::get().to(analysis_stats))
        .route("/health", web::get().to(health));
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    info!("starting stats service");

    let settings = match Settings::new() {
        Ok(s) => s,
        Err(e) => {
            error!(%e, "failed to load settings");
            std::process::exit(1);
        }
    };

    let client = db::connect_with_retry(&settings.database_url).await;
    if let Err(e) = db::ensure_schema(&client).await {
        error!(%e, "failed to ensure schema");
    }

    let state = web::Data::new(AppState {
        source: Arc::new(PgStore::new(client)),
    });

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(routes)
    })
    .bind(("0.0.0.0", 8085))?
    .run()
    .await
}
