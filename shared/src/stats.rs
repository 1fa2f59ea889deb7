//! Builds the dashboard statistics payload from a [`StatsSource`].

use tracing::debug;

use crate::db::StatsSource;
use crate::dto::{AnalysisStats, ProviderStatsItem};
use crate::error::Result;

/// Run both aggregate queries and shape them for the dashboard.
///
/// Averages over no scored reports come back as `0`.
pub async fn collect_stats(source: &dyn StatsSource) -> Result<AnalysisStats> {
    let overall = source.overall_stats().await?;
    let providers = source.provider_stats().await?;
    debug!(
        total = overall.total_reports,
        analyzed = overall.analyzed_reports,
        providers = providers.len(),
        "stats collected"
    );

    Ok(AnalysisStats {
        total_reports: overall.total_reports,
        analyzed_reports: overall.analyzed_reports,
        last_analysis_time: overall.last_analysis,
        average_sentiment: overall.avg_sentiment.unwrap_or(0.0),
        average_quality: overall.avg_quality.unwrap_or(0.0),
        provider_stats: providers
            .into_iter()
            .map(|p| ProviderStatsItem {
                provider_name: p.provider_name,
                report_count: p.report_count,
                avg_sentiment: p.avg_sentiment.unwrap_or(0.0),
                avg_quality: p.avg_quality.unwrap_or(0.0),
            })
            .collect(),
    })
}
