//! In-process store with the same selection and aggregation rules as the
//! Postgres queries, plus hooks to make fetches or single writes fail.
//! Only compiled for tests and under the `test-support` feature.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::db::{ReportStore, StatsSource, StoreProvider};
use crate::dto::{NetworkReport, OverallStats, ProviderStats, ReportAnalysis};
use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct StoredReport {
    pub report: NetworkReport,
    pub sentiment_score: Option<f64>,
    pub network_quality_score: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct StoredAnalysis {
    pub sentiment_score: Option<f64>,
    pub quality_score: Option<f64>,
    pub sentiment_aspects: Option<serde_json::Value>,
    pub analysis_details: Option<serde_json::Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    reports: Mutex<BTreeMap<i32, StoredReport>>,
    analyses: Mutex<BTreeMap<i32, StoredAnalysis>>,
    providers: Mutex<BTreeMap<i32, String>>,
    failing_writes: Mutex<HashSet<i32>>,
    fail_fetch: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_provider(&self, id: i32, name: &str) {
        self.providers.lock().await.insert(id, name.to_string());
    }

    /// Insert an unenriched report created `minutes_ago` minutes before now.
    pub async fn add_report(
        &self,
        id: i32,
        comment: &str,
        minutes_ago: i64,
        provider_id: Option<i32>,
    ) -> NetworkReport {
        let report = NetworkReport {
            id,
            comment: comment.to_string(),
            download_speed: 50.0,
            upload_speed: 10.0,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            provider_id,
        };
        self.reports.lock().await.insert(
            id,
            StoredReport {
                report: report.clone(),
                sentiment_score: None,
                network_quality_score: None,
            },
        );
        report
    }

    /// Set report-side scores directly, as an earlier run would have.
    pub async fn set_report_scores(&self, id: i32, sentiment: Option<f64>, quality: Option<f64>) {
        if let Some(r) = self.reports.lock().await.get_mut(&id) {
            r.sentiment_score = sentiment;
            r.network_quality_score = quality;
        }
    }

    /// An empty analysis row, as created by the ingestion path.
    pub async fn add_placeholder_analysis(&self, report_id: i32) {
        self.analyses.lock().await.insert(
            report_id,
            StoredAnalysis {
                sentiment_score: None,
                quality_score: None,
                sentiment_aspects: None,
                analysis_details: None,
                updated_at: None,
            },
        );
    }

    pub async fn fail_writes_for(&self, report_id: i32) {
        self.failing_writes.lock().await.insert(report_id);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub async fn report(&self, id: i32) -> Option<StoredReport> {
        self.reports.lock().await.get(&id).cloned()
    }

    pub async fn analysis(&self, report_id: i32) -> Option<StoredAnalysis> {
        self.analyses.lock().await.get(&report_id).cloned()
    }
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn fetch_candidates(&self, window_minutes: i32) -> Result<Vec<NetworkReport>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(AppError::Database("connection refused".into()));
        }
        let cutoff = Utc::now() - Duration::minutes(i64::from(window_minutes));
        let reports = self.reports.lock().await;
        let analyses = self.analyses.lock().await;
        let mut out: Vec<NetworkReport> = reports
            .values()
            .filter(|r| {
                analyses
                    .get(&r.report.id)
                    .map_or(true, |a| a.sentiment_score.is_none())
            })
            .filter(|r| r.report.created_at >= cutoff)
            .map(|r| r.report.clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn save_analysis(&self, report_id: i32, analysis: &ReportAnalysis) -> Result<()> {
        if self.failing_writes.lock().await.contains(&report_id) {
            return Err(AppError::Database(format!(
                "write to analysis_results failed for report {report_id}"
            )));
        }
        let aspects = serde_json::to_value(&analysis.sentiment_aspects)
            .map_err(|e| AppError::Io(e.to_string()))?;

        let mut reports = self.reports.lock().await;
        let Some(report) = reports.get_mut(&report_id) else {
            return Err(AppError::NotFound(format!("network report {report_id}")));
        };
        report.sentiment_score = Some(analysis.sentiment_score);
        report.network_quality_score = Some(analysis.quality_score);

        self.analyses.lock().await.insert(
            report_id,
            StoredAnalysis {
                sentiment_score: Some(analysis.sentiment_score),
                quality_score: Some(analysis.quality_score),
                sentiment_aspects: Some(aspects),
                analysis_details: Some(analysis.details.clone()),
                updated_at: Some(Utc::now()),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl StatsSource for MemoryStore {
    async fn overall_stats(&self) -> Result<OverallStats> {
        let reports = self.reports.lock().await;
        let analyses = self.analyses.lock().await;
        Ok(OverallStats {
            total_reports: reports.len() as i64,
            analyzed_reports: reports
                .values()
                .filter(|r| r.sentiment_score.is_some())
                .count() as i64,
            avg_sentiment: average(reports.values().filter_map(|r| r.sentiment_score)),
            avg_quality: average(reports.values().filter_map(|r| r.network_quality_score)),
            last_analysis: reports
                .keys()
                .filter_map(|id| analyses.get(id).and_then(|a| a.updated_at))
                .max(),
        })
    }

    async fn provider_stats(&self) -> Result<Vec<ProviderStats>> {
        let reports = self.reports.lock().await;
        let providers = self.providers.lock().await;
        let mut out: Vec<ProviderStats> = providers
            .iter()
            .filter_map(|(id, name)| {
                let owned: Vec<&StoredReport> = reports
                    .values()
                    .filter(|r| r.report.provider_id == Some(*id))
                    .collect();
                if owned.is_empty() {
                    return None;
                }
                Some(ProviderStats {
                    provider_name: name.clone(),
                    report_count: owned.len() as i64,
                    avg_sentiment: average(owned.iter().filter_map(|r| r.sentiment_score)),
                    avg_quality: average(owned.iter().filter_map(|r| r.network_quality_score)),
                })
            })
            .collect();
        out.sort_by(|a, b| {
            b.report_count
                .cmp(&a.report_count)
                .then_with(|| a.provider_name.cmp(&b.provider_name))
        });
        Ok(out)
    }
}

/// Hands the same shared [`MemoryStore`] to every run.
pub struct MemoryProvider(pub Arc<MemoryStore>);

#[async_trait]
impl StoreProvider for MemoryProvider {
    async fn open(&self) -> Result<Arc<dyn ReportStore>> {
        let store: Arc<dyn ReportStore> = self.0.clone();
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(sentiment: f64) -> ReportAnalysis {
        ReportAnalysis {
            sentiment_score: sentiment,
            quality_score: 4.0,
            analysis: String::new(),
            sentiment_aspects: crate::dto::SentimentAspects {
                speed_satisfaction: 0.0,
                reliability_satisfaction: 0.0,
                value_satisfaction: 0.0,
                service_satisfaction: 0.0,
                aspects_analysis: String::new(),
            },
            details: serde_json::json!({}),
        }
    }

    async fn candidate_ids(store: &MemoryStore) -> Vec<i32> {
        store
            .fetch_candidates(120)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[tokio::test]
    async fn analyzed_and_stale_reports_are_not_candidates() {
        let store = MemoryStore::new();
        store.add_report(1, "fresh", 5, None).await;
        store.add_report(2, "stale", 121, None).await;
        store.add_report(3, "analyzed", 5, None).await;
        store.save_analysis(3, &analysis(0.1)).await.unwrap();
        store.add_report(4, "placeholder row", 5, None).await;
        store.add_placeholder_analysis(4).await;

        assert_eq!(candidate_ids(&store).await, vec![1, 4]);
    }

    #[tokio::test]
    async fn report_side_score_alone_does_not_exclude() {
        let store = MemoryStore::new();
        store.add_report(1, "scored elsewhere", 5, None).await;
        store.add_placeholder_analysis(1).await;
        store.set_report_scores(1, Some(0.3), None).await;

        assert_eq!(candidate_ids(&store).await, vec![1]);
    }

    #[tokio::test]
    async fn fetch_failure_is_reported() {
        let store = MemoryStore::new();
        store.fail_fetch(true);
        assert!(store.fetch_candidates(120).await.is_err());
    }
}
