//! The enrichment pass: fetch candidates, ask the model about each one,
//! keep what validates, record what did not.

use std::time::Duration;

use futures::{stream, StreamExt};
use serde::Serialize;
use shared::config::Settings;
use shared::db::ReportStore;
use shared::dto::NetworkReport;
use shared::error::AppError;
use shared::openai_client::ModelError;
use tracing::{error, info, warn};

use crate::model::EnrichmentModel;
use crate::sanitize::sanitize;
use crate::validate::parse_analysis;

#[derive(Clone, Debug)]
pub struct BatchCfg {
    pub recency_window_minutes: i32,
    pub model_timeout: Duration,
    /// Reports in flight at once; 1 means strictly sequential.
    pub max_parallel: usize,
}

impl BatchCfg {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            recency_window_minutes: settings.recency_window_minutes,
            model_timeout: Duration::from_secs(settings.model_timeout_secs),
            max_parallel: settings.max_parallel.max(1),
        }
    }
}

impl Default for BatchCfg {
    fn default() -> Self {
        Self {
            recency_window_minutes: 120,
            model_timeout: Duration::from_secs(60),
            max_parallel: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Enriched {
        sentiment_score: f64,
        quality_score: f64,
    },
    /// Transport, service, empty-answer or timeout failure.
    ModelFailed { error: String },
    /// Unparseable or not shaped like an analysis.
    Rejected { error: String },
    PersistFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportOutcome {
    pub report_id: i32,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl ReportOutcome {
    pub fn is_enriched(&self) -> bool {
        matches!(self.status, OutcomeStatus::Enriched { .. })
    }
}

/// Result of one pass. `analyzed` counts attempted reports, not successes.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub analyzed: usize,
    pub enriched: usize,
    pub outcomes: Vec<ReportOutcome>,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.analyzed - self.enriched
    }
}

/// Run one enrichment pass over all eligible reports.
///
/// Only a failure to fetch the candidate list is returned as an error; every
/// per-report failure ends up in [`BatchReport::outcomes`].
pub async fn run_enrichment(
    store: &dyn ReportStore,
    model: &EnrichmentModel,
    cfg: &BatchCfg,
) -> Result<BatchReport, AppError> {
    let reports = store
        .fetch_candidates(cfg.recency_window_minutes)
        .await
        .map_err(|e| {
            error!(%e, "fetching enrichment candidates failed");
            e
        })?;

    info!(
        "Found {} reports to analyze (window={}min, max_parallel={}, timeout={:?}, model={})",
        reports.len(),
        cfg.recency_window_minutes,
        cfg.max_parallel,
        cfg.model_timeout,
        model.model_name()
    );

    let outcomes: Vec<ReportOutcome> = stream::iter(reports.iter())
        .map(|report| enrich_one(store, model, cfg, report))
        .buffered(cfg.max_parallel.max(1))
        .collect()
        .await;

    let enriched = outcomes.iter().filter(|o| o.is_enriched()).count();
    let batch = BatchReport {
        analyzed: outcomes.len(),
        enriched,
        outcomes,
    };
    info!(
        analyzed = batch.analyzed,
        enriched = batch.enriched,
        failed = batch.failed(),
        "enrichment pass finished"
    );
    Ok(batch)
}

async fn enrich_one(
    store: &dyn ReportStore,
    model: &EnrichmentModel,
    cfg: &BatchCfg,
    report: &NetworkReport,
) -> ReportOutcome {
    let status = match call_model(model, cfg, report).await {
        Err(e) => {
            warn!(report_id = report.id, %e, "Error analyzing report");
            OutcomeStatus::ModelFailed {
                error: e.to_string(),
            }
        }
        Ok(raw) => {
            let clean = sanitize(&raw);
            match parse_analysis(&clean) {
                Err(e) => {
                    warn!(
                        report_id = report.id,
                        %e,
                        content = %raw,
                        clean_content = %clean,
                        "Error parsing AI response"
                    );
                    OutcomeStatus::Rejected {
                        error: e.to_string(),
                    }
                }
                Ok(analysis) => match store.save_analysis(report.id, &analysis).await {
                    Ok(()) => {
                        info!(report_id = report.id, "Analyzed report");
                        OutcomeStatus::Enriched {
                            sentiment_score: analysis.sentiment_score,
                            quality_score: analysis.quality_score,
                        }
                    }
                    Err(e) => {
                        error!(report_id = report.id, %e, "saving analysis failed");
                        OutcomeStatus::PersistFailed {
                            error: e.to_string(),
                        }
                    }
                },
            }
        }
    };
    ReportOutcome {
        report_id: report.id,
        status,
    }
}

async fn call_model(
    model: &EnrichmentModel,
    cfg: &BatchCfg,
    report: &NetworkReport,
) -> Result<String, ModelError> {
    match tokio::time::timeout(cfg.model_timeout, model.analyze(report)).await {
        Ok(res) => res,
        Err(_) => Err(ModelError::Timeout(cfg.model_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_flat() {
        let o = ReportOutcome {
            report_id: 3,
            status: OutcomeStatus::Rejected {
                error: "missing field `quality_score`".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&o).unwrap(),
            serde_json::json!({
                "report_id": 3,
                "status": "rejected",
                "error": "missing field `quality_score`"
            })
        );
    }

    #[test]
    fn cfg_never_goes_below_one_in_flight() {
        let mut settings = Settings::new().unwrap();
        settings.max_parallel = 0;
        assert_eq!(BatchCfg::from_settings(&settings).max_parallel, 1);
    }
}
